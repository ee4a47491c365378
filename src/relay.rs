//! HTTP client for the relay's transport endpoints.
//!
//! The relay exposes three endpoints consumed by this engine:
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /stream?sessionCode=<code>` | Push stream (SSE) |
//! | `GET /poll?code=<code>&after=<lastId>` | Pull fallback |
//! | `POST /response` | Execution outcomes |
//!
//! The relay remains authoritative for request history; this client
//! holds no state beyond the HTTP connection pool.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionCode;
use crate::protocol::{PollBatch, ToolResponse};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for poll and response calls (the stream has none).
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for establishing any connection to the relay.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// RelayClient
// ============================================================================

/// Thin client over the relay's three transport endpoints.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RelayClient {
    /// Creates a client for the given relay base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the underlying client cannot be built.
    pub fn new(base_url: Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self { http, base_url })
    }

    /// Joins a path onto the base URL.
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|_| Error::invalid_base_url(format!("{}/{path}", self.base_url)))
    }

    /// Opens the push stream for a session.
    ///
    /// Returns the raw HTTP response; the caller consumes its byte
    /// stream through the SSE parser. Resolving here only means the
    /// stream is open at the HTTP level — application-level readiness
    /// is the relay's `connected` event.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] on 401/403
    /// - [`Error::ServerError`] on other non-success statuses
    /// - [`Error::Http`] on transport failure
    pub async fn open_stream(&self, code: &SessionCode) -> Result<reqwest::Response> {
        let mut url = self.endpoint("stream")?;
        url.query_pairs_mut()
            .append_pair("sessionCode", code.as_str());

        debug!(%url, "Opening push stream");

        let response = self
            .http
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        Self::check_status(response.status())?;
        Ok(response)
    }

    /// Fetches new requests since the cursor.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] on 401/403
    /// - [`Error::ServerError`] on other non-success statuses
    /// - [`Error::Parsing`] if the body is not a poll batch
    pub async fn poll(&self, code: &SessionCode, after: Option<&str>) -> Result<PollBatch> {
        let mut url = self.endpoint("poll")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", code.as_str());
            if let Some(after) = after {
                pairs.append_pair("after", after);
            }
        }

        trace!(%url, "Polling");

        let response = self.http.get(url).timeout(CALL_TIMEOUT).send().await?;
        Self::check_status(response.status())?;

        let batch = response
            .json::<PollBatch>()
            .await
            .map_err(|e| Error::parsing(format!("malformed poll batch: {e}")))?;

        trace!(requests = batch.requests.len(), "Poll batch received");
        Ok(batch)
    }

    /// Posts an execution outcome back to the relay.
    ///
    /// Body carries `result` on success and `error` on failure, never
    /// both.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] on 401/403
    /// - [`Error::ServerError`] on other non-success statuses
    pub async fn post_response(&self, code: &SessionCode, response: &ToolResponse) -> Result<()> {
        let url = self.endpoint("response")?;

        let body = if response.success {
            json!({
                "sessionCode": code,
                "requestId": response.request_id,
                "result": response.result,
            })
        } else {
            json!({
                "sessionCode": code,
                "requestId": response.request_id,
                "error": response.error,
            })
        };

        debug!(request_id = %response.request_id, success = response.success, "Posting response");

        let reply = self
            .http
            .post(url)
            .timeout(CALL_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        Self::check_status(reply.status())
    }

    /// Maps HTTP statuses to crate errors.
    fn check_status(status: StatusCode) -> Result<()> {
        if status.is_success() {
            return Ok(());
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::authentication(
                format!("relay rejected session: HTTP {status}"),
            )),
            other => Err(Error::server_error(other.as_u16())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RelayClient {
        RelayClient::new(Url::parse("https://relay.example.com").expect("url")).expect("client")
    }

    #[test]
    fn test_endpoint_join() {
        let client = client();
        assert_eq!(
            client.endpoint("stream").expect("join").as_str(),
            "https://relay.example.com/stream"
        );
        assert_eq!(
            client.endpoint("response").expect("join").as_str(),
            "https://relay.example.com/response"
        );
    }

    #[test]
    fn test_check_status_mapping() {
        assert!(RelayClient::check_status(StatusCode::OK).is_ok());
        assert!(RelayClient::check_status(StatusCode::NO_CONTENT).is_ok());

        assert!(matches!(
            RelayClient::check_status(StatusCode::UNAUTHORIZED),
            Err(Error::Authentication { .. })
        ));
        assert!(matches!(
            RelayClient::check_status(StatusCode::FORBIDDEN),
            Err(Error::Authentication { .. })
        ));
        assert!(matches!(
            RelayClient::check_status(StatusCode::INTERNAL_SERVER_ERROR),
            Err(Error::ServerError { status: 500 })
        ));
        assert!(matches!(
            RelayClient::check_status(StatusCode::NOT_FOUND),
            Err(Error::ServerError { status: 404 })
        ));
    }

    #[test]
    fn test_response_body_shape() {
        use crate::identifiers::RequestId;
        use crate::protocol::ResponseError;

        let ok = ToolResponse::success(RequestId::new("r1"), json!({"n": 1}), 5);
        let body = json!({
            "sessionCode": SessionCode::new("ABC"),
            "requestId": ok.request_id,
            "result": ok.result,
        });
        assert_eq!(body["requestId"], "r1");
        assert_eq!(body["result"]["n"], 1);

        let failed = ToolResponse::failure(
            RequestId::new("r2"),
            ResponseError::new("timeout", "too slow"),
            30_000,
        );
        let body = json!({
            "sessionCode": SessionCode::new("ABC"),
            "requestId": failed.request_id,
            "error": failed.error,
        });
        assert_eq!(body["error"]["type"], "timeout");
    }
}
