use std::error::Error;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::record::StructuredRecord;
use crate::sink::LogSink;

/// A sink that buffers every record in memory, in arrival order.
///
/// Meant for tests and demos that need to inspect what would have been
/// shipped. Not intended for production use: the buffer grows without
/// bound.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<StructuredRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub fn records(&self) -> Vec<StructuredRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn send(&self, record: &StructuredRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}
