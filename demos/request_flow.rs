use std::sync::Arc;

use tracing::info;

use logship::access_log::{request_started, RequestStart};
use logship::context;
use logship::encode::{self, WireFormat};
use logship::init::{init_logging_with_config, InitConfig};
use logship::memory_sink::MemorySink;

#[tokio::main]
async fn main() {
    let sink = Arc::new(MemorySink::new());
    let handle = init_logging_with_config(
        sink.clone(),
        InitConfig { enable_stdout: false, ..Default::default() },
    );

    // One simulated request, the way a middleware would drive it.
    context::scope(async {
        let guard = request_started(RequestStart {
            method: "GET".to_string(),
            path: "/orders/42".to_string(),
            header_request_id: None,
            user: None,
        });

        info!(elapsed_ms = 12, "order lookup");
        info!(labels.cache = "warm", "cache probe");

        guard.finished(200);
    })
    .await;

    handle.close();

    println!("{} records shipped:", sink.len());
    for record in sink.records() {
        let value = encode::to_value(&record, WireFormat::Flat);
        println!("{}", serde_json::to_string_pretty(&value).unwrap());
    }
}
