//! Diagnostic logging setup.

use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Filter directives, e.g. `FA_LOG=debug`.
pub const LOG_ENV: &str = "FA_LOG";
/// `json` switches the subscriber to one JSON object per event.
pub const LOG_FORMAT_ENV: &str = "FA_LOG_FORMAT";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub fn wants_json(value: Option<&str>) -> bool {
    value.is_some_and(|value| value.trim().eq_ignore_ascii_case("json"))
}

pub fn init_tracing(json: bool) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::builder()
            .with_default_directive(Level::WARN.into())
            .with_env_var(LOG_ENV)
            .from_env_lossy();

        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr);

        let _ = if json {
            tracing::subscriber::set_global_default(builder.json().finish())
        } else {
            tracing::subscriber::set_global_default(builder.finish())
        };
    });
}
