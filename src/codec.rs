//! Explicit serializers for values written to durable history.
//!
//! A codec is handed to the client at construction; there is no
//! process-wide converter registration.

use crate::error::CodecError;
use crate::types::{DurableHttpResponse, HttpCallOutcome};

pub trait HistoryCodec: Send + Sync {
    fn encode_response(&self, response: &DurableHttpResponse) -> Result<String, CodecError>;
    fn decode_response(&self, payload: &str) -> Result<DurableHttpResponse, CodecError>;
    fn encode_outcome(&self, outcome: &HttpCallOutcome) -> Result<String, CodecError>;
    fn decode_outcome(&self, payload: &str) -> Result<HttpCallOutcome, CodecError>;
}

/// JSON wire format: `{"statusCode": 200, "headers": {"Host": ["a", "b"]}, "content": "..."}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl HistoryCodec for JsonCodec {
    fn encode_response(&self, response: &DurableHttpResponse) -> Result<String, CodecError> {
        serde_json::to_string(response).map_err(CodecError::Encode)
    }

    fn decode_response(&self, payload: &str) -> Result<DurableHttpResponse, CodecError> {
        serde_json::from_str(payload).map_err(CodecError::Decode)
    }

    fn encode_outcome(&self, outcome: &HttpCallOutcome) -> Result<String, CodecError> {
        serde_json::to_string(outcome).map_err(CodecError::Encode)
    }

    fn decode_outcome(&self, payload: &str) -> Result<HttpCallOutcome, CodecError> {
        serde_json::from_str(payload).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn response_survives_encode_and_decode() {
        let response = DurableHttpResponse::new(200)
            .with_header("Host", "test.host.com")
            .with_header("Host", "test.response.com")
            .with_header("Content-Type", "application/json")
            .with_content(r#"{"done":true}"#);

        let payload = JsonCodec.encode_response(&response).unwrap();
        let decoded = JsonCodec.decode_response(&payload).unwrap();

        assert_eq!(decoded, response);
        assert_eq!(decoded.headers.get_all("Host"), ["test.host.com", "test.response.com"]);
    }

    #[test]
    fn outcome_payload_records_timeout_flag() {
        let outcome = HttpCallOutcome {
            response: DurableHttpResponse::new(202),
            polls: 3,
            timed_out: true,
            elapsed: Duration::from_secs(90),
        };
        let payload = JsonCodec.encode_outcome(&outcome).unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["timedOut"], true);
        assert_eq!(json["elapsed"], 90_000);
        assert_eq!(JsonCodec.decode_outcome(&payload).unwrap(), outcome);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = JsonCodec.decode_response("not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
