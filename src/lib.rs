//! Correlation-aware structured logging: a `tracing` layer that renders
//! events into flat ECS-style records, stamps them with the ambient
//! request/user/job context, and ships them to an HTTP collector without
//! ever blocking or failing the host application.

pub mod context;
pub mod record;
pub mod encode;
pub mod sink;
pub mod transport;
pub mod layer;

pub mod http_sink;
pub mod memory_sink;
pub mod noop_sink;

pub mod access_log;
pub mod job_log;
pub mod request_id;
pub mod http_client;

pub mod env;
pub mod init;
