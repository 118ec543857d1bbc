use super::SpanTransport;
use crate::assembler::Batch;
use crate::codec::SpanCodec;
use crate::error::TransportError;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// POSTs each batch as one request body to a collector URL.
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    codec: Arc<dyn SpanCodec>,
}

impl HttpTransport {
    pub fn new(
        url: Url,
        codec: Arc<dyn SpanCodec>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self { client, url, codec })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl SpanTransport for HttpTransport {
    async fn send(&self, batch: Batch) -> Result<usize, TransportError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let body = self.codec.frame(&batch);
        tracing::trace!(url = %self.url, bytes = body.len(), spans = batch.len(), "posting batch");

        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, self.codec.content_type())
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::DeliveryFailed {
                status: e.status().map(|s| s.as_u16()),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::DeliveryFailed {
                status: Some(status.as_u16()),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }
        Ok(batch.len())
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{AssemblerLimits, BatchAssembler};
    use crate::codec::ZipkinCodec;
    use crate::span::Span;
    use httpmock::prelude::*;

    fn batch_of(codec: &dyn SpanCodec, spans: u64) -> Batch {
        let mut assembler = BatchAssembler::new(AssemblerLimits::for_codec(codec, 65_000, 100));
        for i in 0..spans {
            assembler.append(codec.encode(&Span::new(1, i + 1, "op")).unwrap());
        }
        assembler.drain()
    }

    #[tokio::test]
    async fn test_posts_json_array() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v2/spans")
                    .header("content-type", "application/json");
                then.status(202);
            })
            .await;

        let codec: Arc<dyn SpanCodec> = Arc::new(ZipkinCodec::new("svc", vec![]));
        let url = Url::parse(&server.url("/api/v2/spans")).unwrap();
        let transport = HttpTransport::new(url, codec.clone(), Duration::from_secs(5)).unwrap();

        assert_eq!(transport.send(batch_of(codec.as_ref(), 2)).await, Ok(2));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_delivery_failure() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v2/spans");
                then.status(500);
            })
            .await;

        let codec: Arc<dyn SpanCodec> = Arc::new(ZipkinCodec::new("svc", vec![]));
        let url = Url::parse(&server.url("/api/v2/spans")).unwrap();
        let transport = HttpTransport::new(url, codec.clone(), Duration::from_secs(5)).unwrap();

        let result = transport.send(batch_of(codec.as_ref(), 1)).await;
        assert_eq!(
            result,
            Err(TransportError::DeliveryFailed {
                status: Some(500),
                reason: "Internal Server Error".to_string(),
            })
        );
        // No internal retry
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_redirect_status_is_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(304);
            })
            .await;

        let codec: Arc<dyn SpanCodec> = Arc::new(ZipkinCodec::new("svc", vec![]));
        let url = Url::parse(&server.url("/")).unwrap();
        let transport = HttpTransport::new(url, codec.clone(), Duration::from_secs(5)).unwrap();

        assert!(matches!(
            transport.send(batch_of(codec.as_ref(), 1)).await,
            Err(TransportError::DeliveryFailed {
                status: Some(304),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_connection_error_is_delivery_failure() {
        let codec: Arc<dyn SpanCodec> = Arc::new(ZipkinCodec::new("svc", vec![]));
        // Port 9 (discard) on loopback is expected to refuse connections.
        let url = Url::parse("http://127.0.0.1:9/api/v2/spans").unwrap();
        let transport = HttpTransport::new(url, codec.clone(), Duration::from_secs(2)).unwrap();

        assert!(matches!(
            transport.send(batch_of(codec.as_ref(), 1)).await,
            Err(TransportError::DeliveryFailed { status: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(202);
            })
            .await;

        let codec: Arc<dyn SpanCodec> = Arc::new(ZipkinCodec::new("svc", vec![]));
        let url = Url::parse(&server.url("/")).unwrap();
        let transport = HttpTransport::new(url, codec.clone(), Duration::from_secs(5)).unwrap();

        assert_eq!(transport.send(batch_of(codec.as_ref(), 0)).await, Ok(0));
        mock.assert_hits_async(0).await;
    }
}
