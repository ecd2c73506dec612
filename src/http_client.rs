//! Outbound HTTP client wrapper that logs every exchange as structured
//! events.
//!
//! The wrapper is an observer: request and response snapshots are logged
//! around the call, transport errors are logged and then handed back to
//! the caller untouched. Header maps are redacted against a deny list
//! unless debug logging is enabled for the [`HTTP_TARGET`] target.

use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Request};
use serde_json::{json, Value};
use tracing::{debug, error, info, Level};

/// Target under which outbound-HTTP events are emitted. Enable debug for
/// this target to see full header maps and pretty-printed snapshots.
pub const HTTP_TARGET: &str = "logship::http";

const SENSITIVE_PLACEHOLDER: &str = "<sensitive>";

/// A [`reqwest::Client`] wrapper that logs request/response pairs.
pub struct LoggedClient {
    client: Client,
    with_body: bool,
    sensitive_headers: Vec<String>,
}

/// Response snapshot returned by [`LoggedClient::execute`].
///
/// The body is read eagerly (logging needs it, and a reqwest body can only
/// be read once), so callers get the buffered copy.
#[derive(Debug, Clone)]
pub struct LoggedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub elapsed: Duration,
}

impl LoggedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the buffered body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

impl Default for LoggedClient {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl LoggedClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            with_body: true,
            sensitive_headers: vec!["authorization".to_string(), "cookie".to_string()],
        }
    }

    /// Capture bodies and header maps (`true`, the default) or replace
    /// them wholesale with the `<sensitive>` placeholder.
    pub fn with_body(mut self, with_body: bool) -> Self {
        self.with_body = with_body;
        self
    }

    /// Replace the header deny list. Matching is case-insensitive.
    pub fn sensitive_headers(mut self, headers: Vec<String>) -> Self {
        self.sensitive_headers = headers;
        self
    }

    /// Access the wrapped client, e.g. to build a request for
    /// [`execute`](LoggedClient::execute).
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Convenience GET.
    pub async fn get(&self, url: &str) -> Result<LoggedResponse, reqwest::Error> {
        let request = self.client.get(url).build()?;
        self.execute(request).await
    }

    /// Send `request`, logging the exchange around it.
    ///
    /// A transport error is logged at error level and then returned to the
    /// caller: logging observes the call, it never swallows it.
    pub async fn execute(&self, request: Request) -> Result<LoggedResponse, reqwest::Error> {
        let method = request.method().clone();
        let url = request.url().clone();

        let request_snapshot = json!({
            "moment": moment(),
            "method": method.as_str(),
            "url": url.as_str(),
            "headers": self.headers_value(request.headers()),
            "data": self.request_body_value(&request),
        });
        info!(target: HTTP_TARGET, request = %request_snapshot, "http send: {} {}", method, url);
        if tracing::enabled!(target: HTTP_TARGET, Level::DEBUG) {
            debug!(target: HTTP_TARGET, "request: {}", pretty(&request_snapshot));
        }

        let started = Instant::now();
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                error!(target: HTTP_TARGET, "request failed: {} {}: {}", method, url, err);
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                error!(target: HTTP_TARGET, "request failed: {} {}: {}", method, url, err);
                return Err(err);
            }
        };
        let elapsed = started.elapsed();

        let response_snapshot = json!({
            "moment": moment(),
            "elapsed": elapsed.as_secs_f64(),
            "status_code": status,
            "headers": self.headers_value(&headers),
            "data": self.body_value(&headers, &body),
        });
        info!(target: HTTP_TARGET, response = %response_snapshot, "request completed: {} {} {}", status, method, url);
        if tracing::enabled!(target: HTTP_TARGET, Level::DEBUG) {
            debug!(target: HTTP_TARGET, "response: {}", pretty(&response_snapshot));
        }

        Ok(LoggedResponse { status, headers, body, elapsed })
    }

    fn headers_value(&self, headers: &HeaderMap) -> Value {
        if !self.with_body {
            return Value::String(SENSITIVE_PLACEHOLDER.to_string());
        }
        let mut map = serde_json::Map::new();
        for (name, value) in headers {
            if self.is_sensitive(name.as_str()) {
                continue;
            }
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            map.insert(name.as_str().to_string(), Value::String(value));
        }
        Value::Object(map)
    }

    fn is_sensitive(&self, name: &str) -> bool {
        // The deny list is for operators reading shipped logs; a developer
        // who enabled debug for this target asked for the full picture.
        if tracing::enabled!(target: HTTP_TARGET, Level::DEBUG) {
            return false;
        }
        self.sensitive_headers.iter().any(|h| h.eq_ignore_ascii_case(name))
    }

    fn request_body_value(&self, request: &Request) -> Value {
        if !self.with_body {
            return Value::String(SENSITIVE_PLACEHOLDER.to_string());
        }
        let bytes = match request.body().and_then(|body| body.as_bytes()) {
            Some(bytes) => bytes,
            // Absent or streaming body; nothing to snapshot.
            None => return Value::Null,
        };
        let content_type = header_str(request.headers(), CONTENT_TYPE.as_str());
        body_as_value(content_type, &String::from_utf8_lossy(bytes))
    }

    fn body_value(&self, headers: &HeaderMap, body: &str) -> Value {
        if !self.with_body {
            return Value::String(SENSITIVE_PLACEHOLDER.to_string());
        }
        body_as_value(header_str(headers, CONTENT_TYPE.as_str()), body)
    }
}

fn moment() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or("")
}

/// JSON bodies are logged structurally when they parse; everything else is
/// carried as text.
fn body_as_value(content_type: &str, body: &str) -> Value {
    if content_type.starts_with("application/json") {
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
    } else {
        Value::String(body.to_string())
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn default_deny_list_hides_authorization_and_cookie() {
        let client = LoggedClient::default();
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Token secret".parse().unwrap());
        headers.insert("Cookie", "session=1".parse().unwrap());
        headers.insert("X-Trace", "abc".parse().unwrap());

        let value = client.headers_value(&headers);
        let map = value.as_object().unwrap();

        assert!(map.get("authorization").is_none());
        assert!(map.get("cookie").is_none());
        assert_eq!(map.get("x-trace"), Some(&json!("abc")));
    }

    #[test]
    fn custom_deny_list_matches_case_insensitively() {
        let client = LoggedClient::default().sensitive_headers(vec!["X-Api-Key".to_string()]);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "k".parse().unwrap());
        headers.insert("authorization", "now visible".parse().unwrap());

        let map = client.headers_value(&headers);

        assert!(map.get("x-api-key").is_none());
        assert_eq!(map["authorization"], json!("now visible"));
    }

    #[test]
    fn debug_logging_unmasks_the_deny_list() {
        let client = LoggedClient::default();
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Token secret".parse().unwrap());
        headers.insert("Cookie", "session=1".parse().unwrap());

        let subscriber = tracing_subscriber::fmt().with_max_level(Level::DEBUG).finish();
        let map = tracing::subscriber::with_default(subscriber, || client.headers_value(&headers));

        assert_eq!(map["authorization"], json!("Token secret"));
        assert_eq!(map["cookie"], json!("session=1"));

        // Hidden again once no debug subscriber is listening.
        assert!(client.headers_value(&headers).get("authorization").is_none());
    }

    #[test]
    fn with_body_false_replaces_snapshots_with_placeholder() {
        let client = LoggedClient::default().with_body(false);
        let mut headers = HeaderMap::new();
        headers.insert("x-trace", "abc".parse().unwrap());

        assert_eq!(client.headers_value(&headers), json!("<sensitive>"));
        assert_eq!(client.body_value(&headers, "secret body"), json!("<sensitive>"));
    }

    #[test]
    fn json_bodies_are_logged_structurally() {
        assert_eq!(
            body_as_value("application/json", "{\"ok\":true}"),
            json!({"ok": true})
        );
        assert_eq!(
            body_as_value("application/json; charset=utf-8", "[1,2]"),
            json!([1, 2])
        );
        assert_eq!(body_as_value("text/plain", "{\"ok\":true}"), json!("{\"ok\":true}"));
        assert_eq!(body_as_value("application/json", "not json"), json!("not json"));
    }

    #[tokio::test]
    async fn execute_buffers_the_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("{\"pong\":true}"),
            )
            .mount(&server)
            .await;

        let client = LoggedClient::default();
        let response = client.get(&format!("{}/ping", server.uri())).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.is_success());
        assert_eq!(response.body, "{\"pong\":true}");
        assert_eq!(response.json::<Value>().unwrap(), json!({"pong": true}));
    }

    #[tokio::test]
    async fn transport_errors_are_returned_to_the_caller() {
        // Nothing listens on port 1.
        let client = LoggedClient::default();
        let result = client.get("http://127.0.0.1:1/unreachable").await;
        assert!(result.is_err());
    }
}
