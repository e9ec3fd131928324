//! Env-var-driven configuration for the trading control plane, mirroring
//! the source system's 12-factor style: every knob in §6 of the design is
//! read from the environment, never from a checked-in file. `.env` is
//! loaded first (via `dotenvy`) so local development can avoid exporting
//! variables by hand.

use crate::error::ConfigError;

pub mod error;
pub mod settings;

pub use settings::{ApiConfig, Settings, TelegramConfig, TradingMode};

/// Loads and validates [`Settings`] from the process environment.
///
/// Nested fields use `__` as the separator (e.g. `EXCHANGE_API__KEY`),
/// matching `config::Environment`'s default convention. A `ConfigurationError`
/// here is fatal at startup (§6 exit code `1`).
pub fn load_config() -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();

    let builder = config::Config::builder()
        .add_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings: Settings = builder.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

/// Initializes the `tracing` subscriber from `Settings`, with optional
/// rolling file logging when `log_file_path` is configured — the same
/// toggle the teacher's binary exposed, generalized off `Settings` instead
/// of a CLI flag.
pub fn init_tracing(settings: &Settings) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, ConfigError> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(&settings.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = &settings.log_file_path {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("zenith.log");
        let file_appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
            .with(filter)
            .init();

        Ok(Some(guard))
    } else {
        fmt().with_env_filter(filter).init();
        Ok(None)
    }
}

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
