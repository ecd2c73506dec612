use crate::record::StructuredRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::error::Error;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the layer itself without any
/// network I/O, and for hosts that want the access-log side effects of the
/// hooks without shipping anything.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&self, _record: &StructuredRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}
