//! Request lifecycle hooks for web hosts.
//!
//! A middleware calls [`request_started`] as early as possible; the
//! returned guard logs the terminal access line and releases the context
//! slots when the request ends, whether it ran to completion or unwound.

use std::time::Instant;

use tracing::{error, info};

use crate::context::{self, RequestInfo, UserInfo};
use crate::request_id;

/// Everything the host framework knows about an inbound request when the
/// middleware chain starts.
#[derive(Debug, Clone, Default)]
pub struct RequestStart {
    pub method: String,
    pub path: String,
    /// Correlation id supplied by the caller (header-sourced), if any.
    /// Empty values count as absent.
    pub header_request_id: Option<String>,
    /// Authenticated principal, if the framework resolved one.
    pub user: Option<UserInfo>,
}

/// Scope guard for one request.
///
/// [`finished`](RequestLogGuard::finished) writes the processed line; a
/// guard dropped without it (unwind, cancellation) writes a failure line
/// instead. Either way the request and user slots are cleared.
pub struct RequestLogGuard {
    request_id: String,
    started: Instant,
    finished: bool,
}

/// Begin the logged lifetime of one request: resolve its correlation id
/// (the inbound value, or a freshly minted one), fill the request and user
/// slots of the current unit of work, and write the access-log start line.
///
/// The start line itself already carries the request context, since the
/// slots are filled before it is emitted.
pub fn request_started(start: RequestStart) -> RequestLogGuard {
    let request_id = start
        .header_request_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(request_id::mint_request_id);

    context::set_request_info(RequestInfo {
        id: request_id.clone(),
        method: start.method.clone(),
        path: start.path.clone(),
    });
    if let Some(user) = start.user {
        context::set_user_info(user);
    }

    info!("Request {:?} started: {} {}", request_id, start.method, start.path);

    RequestLogGuard {
        request_id,
        started: Instant::now(),
        finished: false,
    }
}

impl RequestLogGuard {
    /// Id under which this request is being logged; hosts usually echo it
    /// back in a response header.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Write the processed line with status and duration, then release the
    /// slots.
    pub fn finished(mut self, status_code: u16) {
        let duration = self.started.elapsed();
        info!(
            http.response.status_code = status_code,
            "Request {:?} processed: status_code={}, duration={:.4}s",
            self.request_id,
            status_code,
            duration.as_secs_f64()
        );
        self.finished = true;
    }
}

impl Drop for RequestLogGuard {
    fn drop(&mut self) {
        if !self.finished {
            let duration = self.started.elapsed();
            error!(
                "Request {:?} failed: duration={:.4}s",
                self.request_id,
                duration.as_secs_f64()
            );
        }
        context::clear_request_info();
        context::clear_user_info();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    use super::*;
    use crate::layer::ShipLayer;
    use crate::memory_sink::MemorySink;
    use crate::transport::{DeliveryMode, Shipper, ShipperConfig};

    fn inline_stack() -> (Arc<MemorySink>, impl tracing::Subscriber + Send + Sync + 'static) {
        let sink = Arc::new(MemorySink::new());
        let shipper = Arc::new(Shipper::new(
            sink.clone(),
            ShipperConfig { mode: DeliveryMode::Sync, ..Default::default() },
        ));
        let subscriber = Registry::default().with(ShipLayer::new(shipper));
        (sink, subscriber)
    }

    fn get_request(path: &str) -> RequestStart {
        RequestStart {
            method: "GET".to_string(),
            path: path.to_string(),
            header_request_id: None,
            user: None,
        }
    }

    #[test]
    fn mints_an_id_when_no_header_is_present() {
        context::sync_scope(|| {
            let guard = request_started(get_request("/health"));

            let id = guard.request_id().to_string();
            assert!(id.ends_with(|c: char| c.is_ascii_digit()));
            assert_eq!(context::get_request_info().map(|r| r.id), Some(id));

            guard.finished(200);
            assert_eq!(context::get_request_info(), None);
        });
    }

    #[test]
    fn inbound_header_id_wins_over_minting() {
        context::sync_scope(|| {
            let mut start = get_request("/orders");
            start.header_request_id = Some("upstream-42".to_string());

            let guard = request_started(start);
            assert_eq!(guard.request_id(), "upstream-42");
            guard.finished(201);
        });
    }

    #[test]
    fn empty_header_id_counts_as_absent() {
        context::sync_scope(|| {
            let mut start = get_request("/orders");
            start.header_request_id = Some(String::new());

            let guard = request_started(start);
            assert_ne!(guard.request_id(), "");
            guard.finished(200);
        });
    }

    #[test]
    fn user_slot_follows_the_request() {
        context::sync_scope(|| {
            let mut start = get_request("/me");
            start.user = Some(UserInfo {
                id: "7".to_string(),
                username: "ada".to_string(),
                is_authenticated: true,
            });

            let guard = request_started(start);
            assert_eq!(context::get_user_info().map(|u| u.username), Some("ada".to_string()));

            guard.finished(200);
            assert_eq!(context::get_user_info(), None);
        });
    }

    #[test]
    fn lifecycle_lines_carry_request_context() {
        let (sink, subscriber) = inline_stack();

        tracing::subscriber::with_default(subscriber, || {
            context::sync_scope(|| {
                let mut start = get_request("/orders/42");
                start.header_request_id = Some("req-1".to_string());
                let guard = request_started(start);
                guard.finished(204);
            });
        });

        let records = sink.records();
        assert_eq!(records.len(), 2);

        let started = &records[0];
        assert_eq!(started.get("message"), Some(&json!("Request \"req-1\" started: GET /orders/42")));
        assert_eq!(started.get("http.request.id"), Some(&json!("req-1")));
        assert_eq!(started.get("http.request.method"), Some(&json!("GET")));
        assert_eq!(started.get("url.path"), Some(&json!("/orders/42")));

        let processed = &records[1];
        assert_eq!(processed.get("log.level"), Some(&json!("INFO")));
        assert_eq!(processed.get("http.response.status_code"), Some(&json!(204)));
        assert!(processed
            .get("message")
            .and_then(|m| m.as_str())
            .is_some_and(|m| m.contains("processed: status_code=204")));
    }

    #[test]
    fn dropped_guard_writes_a_failure_line_and_clears_slots() {
        let (sink, subscriber) = inline_stack();

        tracing::subscriber::with_default(subscriber, || {
            context::sync_scope(|| {
                let guard = request_started(get_request("/explodes"));
                drop(guard);
                assert_eq!(context::get_request_info(), None);
            });
        });

        let records = sink.records();
        assert_eq!(records.len(), 2);
        let failed = &records[1];
        assert_eq!(failed.get("log.level"), Some(&json!("ERROR")));
        assert!(failed
            .get("message")
            .and_then(|m| m.as_str())
            .is_some_and(|m| m.contains("failed: duration=")));
        // The failure line is written before the slots are cleared.
        assert!(failed.get("http.request.id").is_some());
    }
}
