use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// A finished span handed to the exporter by the tracer.
///
/// Spans are immutable once they reach the exporter; the exporter only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Unique trace identifier (128-bit)
    pub trace_id: u128,
    /// Unique span identifier (64-bit)
    pub span_id: u64,
    /// Parent span identifier, `None` for root spans
    pub parent_span_id: Option<u64>,
    /// Operation name
    pub name: String,
    /// Span kind
    pub kind: SpanKind,
    /// Wall-clock start time
    pub start_time: SystemTime,
    /// Elapsed time between start and end
    pub duration: Duration,
    /// Span attributes, ordered by key so encodings are deterministic
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Explicit links to other spans
    pub references: Vec<SpanReference>,
}

/// Scalar attribute values accepted on spans and process tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Renders the value as a string (Zipkin tags are string-valued)
    pub fn to_tag_string(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Int(i) => i.to_string(),
            AttributeValue::Float(f) => f.to_string(),
            AttributeValue::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Span kind according to OpenTelemetry specification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    /// Internal operation span
    #[default]
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
    /// Producer span (messaging)
    Producer,
    /// Consumer span (messaging)
    Consumer,
}

/// How a span relates to the span it references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    ChildOf,
    FollowsFrom,
}

/// An explicit link from one span to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanReference {
    pub kind: ReferenceKind,
    pub trace_id: u128,
    pub span_id: u64,
}

/// A key/value pair attached to the process envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: AttributeValue,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Span {
    /// Creates a root span starting now with zero duration
    pub fn new(trace_id: u128, span_id: u64, name: impl Into<String>) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id: None,
            name: name.into(),
            kind: SpanKind::Internal,
            start_time: SystemTime::now(),
            duration: Duration::ZERO,
            attributes: BTreeMap::new(),
            references: Vec::new(),
        }
    }

    /// Sets the parent span
    pub fn with_parent(mut self, parent_span_id: u64) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    /// Sets the span kind
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets start time and duration
    pub fn with_timing(mut self, start_time: SystemTime, duration: Duration) -> Self {
        self.start_time = start_time;
        self.duration = duration;
        self
    }

    /// Adds an attribute to the span
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Adds an explicit reference to another span
    pub fn add_reference(&mut self, reference: SpanReference) {
        self.references.push(reference);
    }

    /// Lower 64 bits of the trace id
    pub fn trace_id_low(&self) -> u64 {
        self.trace_id as u64
    }

    /// Upper 64 bits of the trace id
    pub fn trace_id_high(&self) -> u64 {
        (self.trace_id >> 64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_halves() {
        let span = Span::new(0x0123_4567_89ab_cdef_fedc_ba98_7654_3210, 1, "op");
        assert_eq!(span.trace_id_high(), 0x0123_4567_89ab_cdef);
        assert_eq!(span.trace_id_low(), 0xfedc_ba98_7654_3210);
    }

    #[test]
    fn test_attribute_tag_strings() {
        assert_eq!(AttributeValue::from("x").to_tag_string(), "x");
        assert_eq!(AttributeValue::from(42i64).to_tag_string(), "42");
        assert_eq!(AttributeValue::from(true).to_tag_string(), "true");
        assert_eq!(AttributeValue::from(1.5f64).to_tag_string(), "1.5");
    }

    #[test]
    fn test_builder_helpers() {
        let mut span = Span::new(7, 8, "child")
            .with_parent(3)
            .with_kind(SpanKind::Client);
        span.set_attribute("http.method", "GET");

        assert_eq!(span.parent_span_id, Some(3));
        assert_eq!(span.kind, SpanKind::Client);
        assert_eq!(
            span.attributes.get("http.method"),
            Some(&AttributeValue::String("GET".to_string()))
        );
    }
}
