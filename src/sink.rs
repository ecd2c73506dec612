use crate::record::StructuredRecord;
use async_trait::async_trait;
use std::error::Error;

/// Destination for [`StructuredRecord`]s produced by the logging layer.
///
/// Implementations transport records to a concrete collector (an HTTP
/// ingest endpoint, an in-memory buffer, nowhere at all). The shipper
/// calls `send` from its background worker, or inline in synchronous
/// mode, and never lets a failure reach the code that emitted the event.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver a single record to the collector.
    ///
    /// **Parameters**
    /// - `record`: fully-rendered [`StructuredRecord`], context included.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was accepted by the collector.
    /// - `Err(..)` if delivery failed (network error, non-success HTTP
    ///   status, serialization error). The shipper reports the failure on
    ///   stderr and moves on; records are not retried.
    async fn send(&self, record: &StructuredRecord) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Flush any buffered records, if the collector implements buffering.
    ///
    /// The worker calls this once while draining on shutdown. Default
    /// implementation is a no-op.
    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}
