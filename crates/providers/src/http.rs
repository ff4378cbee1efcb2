//! HTTP helpers shared by the vendor adapters.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use writingway_core::provider::{VendorFailure, parse_retry_after};

/// A shared client without a global timeout; adapters bound each request
/// with the timeout from its `ProviderConfig`.
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_default()
}

/// Describe a reqwest error in transport terms.
pub fn transport_failure(e: reqwest::Error) -> VendorFailure {
    VendorFailure::Transport {
        timed_out: e.is_timeout(),
        message: e.to_string(),
    }
}

/// Send `request`, bounding the wait for response headers by `timeout`.
///
/// Returns the response only for a success status; anything else becomes a
/// [`VendorFailure::Status`] carrying the body and any `Retry-After` hint.
pub async fn send(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<reqwest::Response, VendorFailure> {
    let response = match tokio::time::timeout(timeout, request.send()).await {
        Ok(result) => result.map_err(transport_failure)?,
        Err(_) => {
            return Err(VendorFailure::Transport {
                message: format!("no response within {}s", timeout.as_secs()),
                timed_out: true,
            });
        }
    };

    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    Err(VendorFailure::Status {
        status,
        retry_after,
        body,
    })
}

/// Read a whole success body, bounded by `timeout`.
pub async fn read_body(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<String, VendorFailure> {
    match tokio::time::timeout(timeout, response.text()).await {
        Ok(result) => result.map_err(transport_failure),
        Err(_) => Err(VendorFailure::Transport {
            message: format!("response body not received within {}s", timeout.as_secs()),
            timed_out: true,
        }),
    }
}

/// Parse a JSON body, keeping the raw text when it does not match.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    what: &str,
) -> Result<T, VendorFailure> {
    serde_json::from_str(raw).map_err(|e| VendorFailure::Malformed {
        message: format!("failed to parse {what}: {e}"),
        raw: raw.to_string(),
    })
}

/// Whether an error body names the model as the thing that was not found.
pub fn mentions_missing_model(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("model")
        && (lower.contains("not found")
            || lower.contains("not_found")
            || lower.contains("does not exist")
            || lower.contains("model_not_found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Shape {
        #[allow(dead_code)]
        id: String,
    }

    #[test]
    fn malformed_json_keeps_raw_body() {
        match parse_json::<Shape>("{\"nope\":1}", "test response") {
            Err(VendorFailure::Malformed { message, raw }) => {
                assert!(message.contains("test response"));
                assert_eq!(raw, "{\"nope\":1}");
            }
            other => panic!("Expected Malformed, got: {other:?}"),
        }
    }

    #[test]
    fn missing_model_detection() {
        assert!(mentions_missing_model(
            r#"{"error":{"code":"model_not_found","message":"The model `gpt-9` does not exist"}}"#
        ));
        assert!(mentions_missing_model("models/gemini-9 is not found for API version v1beta"));
        assert!(!mentions_missing_model("route not found"));
    }
}
