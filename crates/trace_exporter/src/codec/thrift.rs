//! Minimal thrift compact-protocol writer.
//!
//! Only the subset the Jaeger agent needs: oneway message headers, structs,
//! lists, strings, bools, doubles and zigzag varint integers.

use bytes::{BufMut, Bytes, BytesMut};

pub const PROTOCOL_ID: u8 = 0x82;
pub const VERSION: u8 = 1;
pub const MESSAGE_ONEWAY: u8 = 4;

/// Compact-protocol element types
pub mod field_type {
    pub const BOOL_TRUE: u8 = 1;
    pub const BOOL_FALSE: u8 = 2;
    pub const I32: u8 = 5;
    pub const I64: u8 = 6;
    pub const DOUBLE: u8 = 7;
    pub const BINARY: u8 = 8;
    pub const LIST: u8 = 9;
    pub const STRUCT: u8 = 12;
}

/// Largest encoding of a 32-bit varint.
pub const MAX_VARINT32_LEN: usize = 5;

pub struct CompactWriter {
    scratch: [u8; 10],
    buf: BytesMut,
    last_field_id: i16,
    // Field ids are delta-encoded per struct; outer structs' ids wait here.
    field_id_stack: Vec<i16>,
}

impl CompactWriter {
    pub fn with_capacity(size: usize) -> Self {
        CompactWriter {
            scratch: [0; 10],
            buf: BytesMut::with_capacity(size),
            last_field_id: 0,
            field_id_stack: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Writes a message header for a call with the given name.
    pub fn message_begin(&mut self, name: &str, message_type: u8, seq_id: i32) {
        self.buf.put_u8(PROTOCOL_ID);
        self.buf.put_u8((VERSION & 0x1f) | ((message_type << 5) & 0xe0));
        // Unlike field values, the seq id is a plain varint.
        self.uvarint(u64::from(seq_id as u32));
        self.byte_string(name.as_bytes());
    }

    pub fn struct_begin(&mut self) {
        self.field_id_stack.push(self.last_field_id);
        self.last_field_id = 0;
    }

    /// Writes the stop byte and restores the enclosing struct's field id.
    pub fn struct_end(&mut self) {
        self.buf.put_u8(0);
        self.last_field_id = self.field_id_stack.pop().unwrap_or(0);
    }

    pub fn field_header(&mut self, kind: u8, id: i16) {
        let delta = id - self.last_field_id;
        if delta > 0 && delta <= 15 {
            self.buf.put_u8(((delta as u8) << 4) | kind);
        } else {
            self.buf.put_u8(kind);
            self.uvarint(zigzag32(i32::from(id)) as u64);
        }
        self.last_field_id = id;
    }

    pub fn field_i32(&mut self, id: i16, value: i32) {
        self.field_header(field_type::I32, id);
        self.uvarint(zigzag32(value) as u64);
    }

    pub fn field_i64(&mut self, id: i16, value: i64) {
        self.field_header(field_type::I64, id);
        self.uvarint(zigzag64(value));
    }

    pub fn field_string(&mut self, id: i16, value: &str) {
        self.field_header(field_type::BINARY, id);
        self.byte_string(value.as_bytes());
    }

    pub fn field_double(&mut self, id: i16, value: f64) {
        self.field_header(field_type::DOUBLE, id);
        self.buf.put_f64_le(value);
    }

    /// Bools carry their value in the field type nibble.
    pub fn field_bool(&mut self, id: i16, value: bool) {
        let kind = if value {
            field_type::BOOL_TRUE
        } else {
            field_type::BOOL_FALSE
        };
        self.field_header(kind, id);
    }

    pub fn field_struct_begin(&mut self, id: i16) {
        self.field_header(field_type::STRUCT, id);
        self.struct_begin();
    }

    pub fn field_list_begin(&mut self, id: i16, element_type: u8, size: usize) {
        self.field_header(field_type::LIST, id);
        self.list_header(element_type, size);
    }

    pub fn list_header(&mut self, element_type: u8, size: usize) {
        if size < 15 {
            self.buf.put_u8(((size as u8) << 4) | element_type);
        } else {
            self.buf.put_u8(0xf0 | element_type);
            self.uvarint(size as u64);
        }
    }

    /// Appends already-encoded bytes verbatim.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a variable-length byte string.
    #[inline]
    pub fn byte_string(&mut self, bytes: &[u8]) {
        // 10 bytes is the maximum length of a uvarint.
        self.buf.reserve(10 + bytes.len());

        self.uvarint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a variable-length unsigned integer.
    #[inline]
    pub fn uvarint(&mut self, mut u: u64) {
        let mut i = 0;
        while u >= 0x80 {
            self.scratch[i] = (u as u8) | 0x80;
            u >>= 7;
            i += 1;
        }
        self.scratch[i] = u as u8;
        i += 1;
        self.buf.extend_from_slice(&self.scratch[..i]);
    }
}

#[inline]
pub fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
pub fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}
