//! Webhook dispatch: POSTs the event envelope and classifies what came back.
//!
//! Every call yields a [`DispatchOutcome`]; nothing here returns an error.
//! Failures are data that end up in the invocation log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::resolve::ResolvedHeader;

/// Synthetic status for connection failures and timeouts.
pub const TRANSPORT_ERROR_STATUS: i32 = 1000;
/// Synthetic status when the response body could not be read or decoded.
pub const PARSE_ERROR_STATUS: i32 = 1001;
/// Synthetic status for everything that never reached the wire.
pub const OTHER_ERROR_STATUS: i32 = 500;

const USER_AGENT: &str = concat!("hookclock/", env!("CARGO_PKG_VERSION"));

/// JSON body sent to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEnvelope {
    pub id: String,
    /// Trigger name, cron events only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub scheduled_time: DateTime<Utc>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// One-off events only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// How one delivery attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The webhook answered; success iff 2xx.
    Http {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    /// Connect failure, timeout, or the request died in flight.
    Transport(String),
    /// Response arrived but its body could not be read as UTF-8 text.
    Parse(String),
    /// URL or header resolution failed before sending.
    Resolve(String),
    /// Request could not be built.
    Other(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Http { status, .. } if (200..300).contains(status))
    }

    /// Status recorded in the invocation log.
    pub fn status_code(&self) -> i32 {
        match self {
            DispatchOutcome::Http { status, .. } => *status as i32,
            DispatchOutcome::Transport(_) => TRANSPORT_ERROR_STATUS,
            DispatchOutcome::Parse(_) => PARSE_ERROR_STATUS,
            DispatchOutcome::Resolve(_) | DispatchOutcome::Other(_) => OTHER_ERROR_STATUS,
        }
    }

    pub fn response_headers(&self) -> &[(String, String)] {
        match self {
            DispatchOutcome::Http { headers, .. } => headers,
            _ => &[],
        }
    }

    /// Response column of the invocation log.
    pub fn response_json(&self) -> Value {
        let (kind, message) = match self {
            DispatchOutcome::Http { status, headers, body } => {
                return json!({
                    "type": "webhook_response",
                    "data": {
                        "status": status,
                        "headers": headers_json(headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))),
                        "body": body,
                    }
                });
            }
            DispatchOutcome::Transport(m) => ("client_error", m),
            DispatchOutcome::Parse(m) => ("parse_error", m),
            DispatchOutcome::Resolve(m) => ("resolve_error", m),
            DispatchOutcome::Other(m) => ("other_error", m),
        };
        json!({ "type": kind, "data": { "message": message } })
    }
}

fn headers_json<'a>(headers: impl Iterator<Item = (&'a str, &'a str)>) -> Value {
    Value::Array(
        headers
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect(),
    )
}

/// Request column of the invocation log. Environment-sourced header values are masked.
pub fn request_json(envelope: &WebhookEnvelope, headers: &[ResolvedHeader]) -> Value {
    let logged = headers.iter().map(|h| {
        let value = if h.from_env { "<redacted>" } else { h.value.as_str() };
        (h.name.as_str(), value)
    });
    json!({
        "version": "2",
        "payload": envelope,
        "headers": headers_json(logged),
    })
}

/// Shared HTTP client for webhook calls.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new() -> crate::error::Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST the envelope to `url`, giving up after `timeout`.
    pub async fn dispatch(
        &self,
        url: &str,
        headers: &[ResolvedHeader],
        envelope: &WebhookEnvelope,
        timeout: Duration,
    ) -> DispatchOutcome {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(envelope)
            .timeout(timeout);
        for header in headers {
            request = request.header(header.name.as_str(), header.value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return DispatchOutcome::Other(e.to_string()),
            Err(e) => return DispatchOutcome::Transport(e.to_string()),
        };

        let status = response.status().as_u16();
        let response_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) if e.is_timeout() => {
                return DispatchOutcome::Transport(format!("timed out reading response body: {e}"));
            }
            Err(e) => return DispatchOutcome::Parse(format!("failed to read response body: {e}")),
        };
        match String::from_utf8(bytes.to_vec()) {
            Ok(body) => DispatchOutcome::Http {
                status,
                headers: response_headers,
                body,
            },
            Err(e) => DispatchOutcome::Parse(format!("response body is not UTF-8: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope() -> WebhookEnvelope {
        WebhookEnvelope {
            id: "evt-1".into(),
            name: Some("hourly".into()),
            scheduled_time: Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap(),
            payload: json!({"kind": "ping"}),
            comment: None,
            created_at: None,
        }
    }

    fn token_header() -> Vec<ResolvedHeader> {
        vec![ResolvedHeader {
            name: "X-Token".into(),
            value: "s3cret".into(),
            from_env: true,
        }]
    }

    #[tokio::test]
    async fn test_success_posts_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-token", "s3cret"))
            .and(header("user-agent", USER_AGENT))
            .and(body_partial_json(json!({"id": "evt-1", "name": "hourly", "payload": {"kind": "ping"}})))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new().unwrap();
        let outcome = dispatcher
            .dispatch(&format!("{}/hook", server.uri()), &token_header(), &envelope(), Duration::from_secs(5))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.status_code(), 200);
        let response = outcome.response_json();
        assert_eq!(response["type"], "webhook_response");
        assert_eq!(response["data"]["body"], "ok");
    }

    #[tokio::test]
    async fn test_error_status_keeps_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let outcome = WebhookDispatcher::new()
            .unwrap()
            .dispatch(&server.uri(), &[], &envelope(), Duration::from_secs(5))
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.status_code(), 503);
        assert!(outcome
            .response_headers()
            .iter()
            .any(|(n, v)| n == "retry-after" && v == "30"));
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let outcome = WebhookDispatcher::new()
            .unwrap()
            .dispatch(&server.uri(), &[], &envelope(), Duration::from_millis(100))
            .await;

        assert!(matches!(outcome, DispatchOutcome::Transport(_)));
        assert_eq!(outcome.status_code(), TRANSPORT_ERROR_STATUS);
        assert_eq!(outcome.response_json()["type"], "client_error");
    }

    #[tokio::test]
    async fn test_stalled_body_is_transport_failure() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Sends headers promising more body than it ever writes.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let outcome = WebhookDispatcher::new()
            .unwrap()
            .dispatch(&format!("http://{addr}/hook"), &[], &envelope(), Duration::from_millis(300))
            .await;

        assert!(matches!(outcome, DispatchOutcome::Transport(_)), "{outcome:?}");
        assert_eq!(outcome.status_code(), TRANSPORT_ERROR_STATUS);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let outcome = WebhookDispatcher::new()
            .unwrap()
            .dispatch("http://127.0.0.1:1/hook", &[], &envelope(), Duration::from_secs(2))
            .await;
        assert_eq!(outcome.status_code(), TRANSPORT_ERROR_STATUS);
    }

    #[tokio::test]
    async fn test_non_utf8_body_is_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0xfd]))
            .mount(&server)
            .await;

        let outcome = WebhookDispatcher::new()
            .unwrap()
            .dispatch(&server.uri(), &[], &envelope(), Duration::from_secs(5))
            .await;
        assert_eq!(outcome.status_code(), PARSE_ERROR_STATUS);
        assert!(!outcome.is_success());
        assert_eq!(outcome.response_json()["type"], "parse_error");
    }

    #[tokio::test]
    async fn test_unbuildable_request_is_other_failure() {
        let outcome = WebhookDispatcher::new()
            .unwrap()
            .dispatch("not a url", &[], &envelope(), Duration::from_secs(1))
            .await;
        assert_eq!(outcome.status_code(), OTHER_ERROR_STATUS);
        assert_eq!(outcome.response_json()["type"], "other_error");
    }

    #[test]
    fn test_request_json_masks_env_headers() {
        let mut headers = token_header();
        headers.push(ResolvedHeader {
            name: "X-Static".into(),
            value: "abc".into(),
            from_env: false,
        });
        let logged = request_json(&envelope(), &headers);
        assert_eq!(logged["version"], "2");
        assert_eq!(logged["payload"]["id"], "evt-1");
        assert!(logged["payload"].get("comment").is_none());
        assert_eq!(logged["headers"][0]["value"], "<redacted>");
        assert_eq!(logged["headers"][1]["value"], "abc");
    }
}
