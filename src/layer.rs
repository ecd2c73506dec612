use crate::record::{ErrorInfo, LogEvent, StructuredRecord};
use crate::transport::{self, Shipper};
use std::collections::BTreeMap;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that renders every event it observes into a
/// [`StructuredRecord`] (ambient context included) and hands the record to
/// a [`Shipper`].
///
/// Level filtering is deliberately left to the surrounding subscriber
/// stack (`EnvFilter` or a per-layer filter); the layer ships whatever
/// reaches it. Events emitted from inside a sink delivery are skipped so
/// the HTTP stack underneath a sink cannot feed the queue it drains.
pub struct ShipLayer {
    shipper: Arc<Shipper>,
    /// Total events seen by the layer, skipped ones included.
    pub observed_events: Arc<AtomicU64>,
}

impl ShipLayer {
    pub fn new(shipper: Arc<Shipper>) -> Self {
        Self {
            shipper,
            observed_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn shipper(&self) -> &Arc<Shipper> {
        &self.shipper
    }
}

impl<S> Layer<S> for ShipLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.observed_events.fetch_add(1, Ordering::Relaxed);
        if transport::is_shipping() {
            return;
        }

        let meta = event.metadata();
        let mut log_event = LogEvent::now(meta.level().to_string(), meta.target().to_string());
        log_event.module_path = meta.module_path().map(|s| s.to_string());
        log_event.file = meta.file().map(|s| s.to_string());
        log_event.line = meta.line();

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        log_event.message = visitor.message;
        log_event.error = visitor.error;
        log_event.extra = visitor.fields;

        self.shipper.ship(StructuredRecord::from_event(&log_event));
    }
}

use tracing::field::{Field, Visit};

/// Collects event fields, routing the reserved names (`message`, `error`,
/// `error_type`, `error_message`, `error_stack_trace`) into their record
/// slots and everything else into extras. The serializer turns the error
/// slot into the `error.*` wire keys, so the usual `error = %e` call sites
/// produce `error.message` on the wire.
#[derive(Default)]
struct EventVisitor {
    fields: BTreeMap<String, serde_json::Value>,
    message: Option<String>,
    error: Option<ErrorInfo>,
}

impl EventVisitor {
    fn record_reserved(&mut self, name: &str, value: String) -> bool {
        match name {
            "message" => {
                self.message = Some(value);
                true
            }
            "error_type" => {
                self.error_mut().error_type = Some(value);
                true
            }
            "error" | "error_message" => {
                self.error_mut().message = value;
                true
            }
            "error_stack_trace" => {
                self.error_mut().stack_trace = Some(value);
                true
            }
            _ => false,
        }
    }

    fn error_mut(&mut self) -> &mut ErrorInfo {
        self.error.get_or_insert_with(|| ErrorInfo {
            error_type: None,
            message: String::new(),
            stack_trace: None,
        })
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if !self.record_reserved(field.name(), value.to_string()) {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if field.name() == "error" {
            let captured = ErrorInfo::from_error(value);
            let error = self.error_mut();
            error.message = captured.message;
            if error.stack_trace.is_none() {
                error.stack_trace = captured.stack_trace;
            }
        } else if !self.record_reserved(field.name(), value.to_string()) {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        if !self.record_reserved(field.name(), rendered.clone()) {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(rendered));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    use super::*;
    use crate::context::{self, RequestInfo};
    use crate::memory_sink::MemorySink;
    use crate::transport::{DeliveryMode, ShipperConfig};

    /// Layer over an inline shipper: records land in the sink before the
    /// emitting statement returns.
    fn inline_stack() -> (Arc<MemorySink>, impl Subscriber + Send + Sync + 'static) {
        let sink = Arc::new(MemorySink::new());
        let shipper = Arc::new(Shipper::new(
            sink.clone(),
            ShipperConfig { mode: DeliveryMode::Sync, ..Default::default() },
        ));
        let subscriber = Registry::default().with(ShipLayer::new(shipper));
        (sink, subscriber)
    }

    #[test]
    fn events_become_records_with_context_and_extras() {
        let (sink, subscriber) = inline_stack();

        tracing::subscriber::with_default(subscriber, || {
            context::sync_scope(|| {
                context::set_request_info(RequestInfo {
                    id: "host-1-00000001".to_string(),
                    method: "GET".to_string(),
                    path: "/orders/42".to_string(),
                });
                tracing::info!(elapsed_ms = 12, cache_hit = true, "order lookup");
            });
        });

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get("message"), Some(&json!("order lookup")));
        assert_eq!(record.get("log.level"), Some(&json!("INFO")));
        assert_eq!(record.get("elapsed_ms"), Some(&json!(12)));
        assert_eq!(record.get("cache_hit"), Some(&json!(true)));
        assert_eq!(record.get("http.request.id"), Some(&json!("host-1-00000001")));
        assert_eq!(record.get("url.path"), Some(&json!("/orders/42")));
    }

    #[test]
    fn error_fields_assemble_into_the_error_namespace() {
        let (sink, subscriber) = inline_stack();

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(
                error_type = "IoError",
                error_message = "no space left",
                "write failed"
            );
        });

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get("log.level"), Some(&json!("ERROR")));
        assert_eq!(record.get("message"), Some(&json!("write failed")));
        assert_eq!(record.get("error.type"), Some(&json!("IoError")));
        assert_eq!(record.get("error.message"), Some(&json!("no space left")));
        // Reserved names never leak through as plain extras.
        assert!(record.get("error_type").is_none());
        assert!(record.get("error_message").is_none());
    }

    #[test]
    fn display_logged_errors_feed_the_error_namespace() {
        let (sink, subscriber) = inline_stack();

        tracing::subscriber::with_default(subscriber, || {
            let err = std::io::Error::new(std::io::ErrorKind::Other, "pipe closed");
            tracing::warn!(error = %err, "flush failed");
        });

        let record = &sink.records()[0];
        assert_eq!(record.get("error.message"), Some(&json!("pipe closed")));
        assert_eq!(record.get("message"), Some(&json!("flush failed")));
        assert!(record.get("error").is_none());
    }

    #[derive(Debug)]
    struct WriteFailed {
        cause: std::io::Error,
    }

    impl std::fmt::Display for WriteFailed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("write failed")
        }
    }

    impl std::error::Error for WriteFailed {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.cause)
        }
    }

    #[test]
    fn dyn_errors_capture_their_cause_chain() {
        let (sink, subscriber) = inline_stack();

        tracing::subscriber::with_default(subscriber, || {
            let err = WriteFailed {
                cause: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            };
            tracing::error!(error = &err as &(dyn std::error::Error + 'static), "cannot persist");
        });

        let record = &sink.records()[0];
        assert_eq!(record.get("message"), Some(&json!("cannot persist")));
        assert_eq!(record.get("error.message"), Some(&json!("write failed")));
        assert_eq!(record.get("error.stack_trace"), Some(&json!("caused by: disk full")));
    }

    #[test]
    fn origin_metadata_is_captured() {
        let (sink, subscriber) = inline_stack();

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("look here");
        });

        let record = &sink.records()[0];
        assert_eq!(record.get("log.logger"), Some(&json!("logship::layer::tests")));
        assert!(record
            .get("log.origin.file.name")
            .and_then(|v| v.as_str())
            .is_some_and(|file| file.ends_with("layer.rs")));
        assert!(record.get("log.origin.file.line").is_some());
    }

    #[test]
    fn events_during_shipping_are_skipped() {
        let (sink, subscriber) = inline_stack();

        tracing::subscriber::with_default(subscriber, || {
            {
                let _guard = transport::mark_thread_shipping();
                tracing::info!("from inside a delivery");
            }
            tracing::info!("after the delivery");
        });

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("message"), Some(&json!("after the delivery")));
    }

    #[test]
    fn observed_counter_counts_skipped_events_too() {
        let sink = Arc::new(MemorySink::new());
        let shipper = Arc::new(Shipper::new(
            sink.clone(),
            ShipperConfig { mode: DeliveryMode::Sync, ..Default::default() },
        ));
        let layer = ShipLayer::new(Arc::clone(&shipper));
        let observed = Arc::clone(&layer.observed_events);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let _guard = transport::mark_thread_shipping();
            tracing::info!("skipped");
        });

        assert_eq!(observed.load(Ordering::Relaxed), 1);
        assert!(sink.is_empty());
    }
}
