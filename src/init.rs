use crate::layer::ShipLayer;
use crate::sink::LogSink;
use crate::transport::{Shipper, ShipperConfig};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Конфигурация инициализации логирования.
///
/// Управляет режимом доставки и очередью [`Shipper`], а также тем, нужно
/// ли дополнительно печатать события в консоль через `fmt`‑слой.
///
/// **Поля**
/// - `shipper`: настройки очереди, таймаутов и режима доставки
///   ([`ShipperConfig`]).
/// - `enable_stdout`: если `true`, поверх [`ShipLayer`] добавляется
///   `tracing_subscriber::fmt::Layer` и события печатаются в консоль.
#[derive(Clone, Debug)]
pub struct InitConfig {
    pub shipper: ShipperConfig,
    pub enable_stdout: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            shipper: ShipperConfig::default(),
            enable_stdout: true,
        }
    }
}

/// Handle returned by [`init_logging`]; keeps the shipper reachable so the
/// host can drain it on shutdown.
pub struct LoggingHandle {
    shipper: Arc<Shipper>,
}

impl LoggingHandle {
    /// Drain the queue and stop the worker, bounded by the configured
    /// shutdown timeout. Safe to call more than once.
    pub fn close(&self) {
        self.shipper.close();
    }

    pub fn shipper(&self) -> &Arc<Shipper> {
        &self.shipper
    }
}

/// Initialize the global `tracing` subscriber using the provided sink and
/// [`InitConfig`].
///
/// **Parameters**
/// - `sink`: implementation of [`LogSink`] that will receive rendered
///   [`StructuredRecord`](crate::record::StructuredRecord)s.
/// - `config`: [`InitConfig`] controlling delivery and console echo.
///
/// **Effects**
///
/// This installs a [`Registry`] combined with an `EnvFilter` and
/// [`ShipLayer`] as the global default subscriber, so all `tracing` events
/// in the process are observed by the layer. Level filtering follows
/// `RUST_LOG`, defaulting to `info`.
pub fn init_logging_with_config(sink: Arc<dyn LogSink>, config: InitConfig) -> LoggingHandle {
    let shipper = Arc::new(Shipper::new(sink, config.shipper));
    let layer = ShipLayer::new(Arc::clone(&shipper));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Всегда подключаем слой, который пишет во внешний sink. Дополнительно,
    // при `enable_stdout = true`, подключаем `fmt`‑слой, чтобы видеть
    // события в консоли. Для совместимости типов собираем subscriber в
    // двух вариантах.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(filter).with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    } else {
        let subscriber = Registry::default().with(filter).with(layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    }

    LoggingHandle { shipper }
}

/// Initialize logging with sensible defaults.
///
/// **Parameters**
/// - `sink`: implementation of [`LogSink`] that will receive rendered
///   [`StructuredRecord`](crate::record::StructuredRecord)s.
///
/// **Behavior**
///
/// Equivalent to calling [`init_logging_with_config`] with
/// [`InitConfig::default`]. This is the recommended entrypoint for typical
/// microservices.
pub fn init_logging(sink: Arc<dyn LogSink>) -> LoggingHandle {
    init_logging_with_config(sink, InitConfig::default())
}
