use std::sync::OnceLock;
use std::time::Instant;

/// Environment variable names and process-identity helpers used when
/// configuring the shipper from microservices.
///
/// These are purely helpers; the core sink and shipper types remain
/// decoupled from environment access.

/// Collector ingest URL, e.g. `http://127.0.0.1:8000/log/ingest`.
pub const LOGSHIP_URL_ENV: &str = "LOGSHIP_URL";

/// Optional token for `Authorization: Token <token>`.
pub const LOGSHIP_TOKEN_ENV: &str = "LOGSHIP_TOKEN";

/// Collector request timeout in seconds.
pub const LOGSHIP_TIMEOUT_ENV: &str = "LOGSHIP_TIMEOUT";

/// Logical application name, reported in `labels.app_name` and `tags`.
pub const APP_NAME_ENV: &str = "APP_NAME";

/// Application version, reported in `labels.app_version`.
pub const APP_VERSION_ENV: &str = "APP_VERSION";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Logical application name (`APP_NAME`, defaulting to the crate name).
pub fn app_name() -> String {
    env_or(APP_NAME_ENV, "logship")
}

/// Application version (`APP_VERSION`, defaulting to a zero version).
pub fn app_version() -> String {
    env_or(APP_VERSION_ENV, "0.0.0")
}

/// Hostname of this machine, resolved once and cached for the process.
pub fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    })
}

/// Short name of the running executable, cached for the process.
pub fn process_name() -> &'static str {
    static PROCESS_NAME: OnceLock<String> = OnceLock::new();
    PROCESS_NAME.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "main".to_string())
    })
}

/// Seconds elapsed since logging first produced a record in this process.
pub fn uptime_secs() -> f64 {
    static STARTED: OnceLock<Instant> = OnceLock::new();
    STARTED.get_or_init(Instant::now).elapsed().as_secs_f64()
}
