use std::sync::Arc;

use tracing::info;

use logship::context;
use logship::encode::{self, WireFormat};
use logship::init::{init_logging_with_config, InitConfig};
use logship::job_log::{job_started, JobOutcome};
use logship::memory_sink::MemorySink;
use logship::record::ErrorInfo;
use logship::transport::{DeliveryMode, ShipperConfig};

fn main() {
    let sink = Arc::new(MemorySink::new());
    // Synchronous delivery: each record lands in the sink before the
    // logging statement returns, as a thread-based job runner would use it.
    let handle = init_logging_with_config(
        sink.clone(),
        InitConfig {
            shipper: ShipperConfig { mode: DeliveryMode::Sync, ..Default::default() },
            enable_stdout: false,
        },
    );

    context::sync_scope(|| {
        let guard = job_started("job-00000001", "rebuild_search_index");
        info!(documents = 15_000, "index pass complete");
        guard.finished(JobOutcome::Success);
    });

    context::sync_scope(|| {
        let guard = job_started("job-00000002", "charge_subscriptions");
        guard.finished(JobOutcome::Failed(Some(ErrorInfo {
            error_type: Some("PaymentDeclined".to_string()),
            message: "card expired".to_string(),
            stack_trace: Some("caused by: issuer refused".to_string()),
        })));
    });

    handle.close();

    println!("{} records shipped (nested layout):", sink.len());
    for record in sink.records() {
        let value = encode::to_value(&record, WireFormat::Nested);
        println!("{}", serde_json::to_string_pretty(&value).unwrap());
    }
}
