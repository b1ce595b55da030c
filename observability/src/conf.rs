use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use typed_builder::TypedBuilder;
use validator::Validate;

const TRACER_MAX_QUEUE_SIZE: usize = 8192;
const TRACER_MAX_EXPORT_BATCH_SIZE: usize = 2048;
const TRACER_SCHEDULED_DELAY_MS: u64 = 500;
const OTLP_DEFAULT_TIMEOUT_MS: u64 = 5000;
const METRICS_DEFAULT_EXPORT_INTERVAL_MS: u64 = 10_000;

lazy_static::lazy_static! {
    pub(crate) static ref ENVIRONMENT: ExecutionEnvironment = mode();
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, TypedBuilder, Eq, Default)]
pub struct BatchConf {
    /// The maximum number of spans that can be queued before they are exported.
    #[builder(default, setter(strip_option))]
    max_queue_size: Option<usize>,
    /// The maximum number of spans that can be exported in a single batch.
    #[builder(default, setter(strip_option))]
    max_export_batch_size: Option<usize>,
    /// The delay between two consecutive exports, in milliseconds.
    #[builder(default, setter(strip_option))]
    scheduled_delay_ms: Option<u64>,
}

impl BatchConf {
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size.unwrap_or(TRACER_MAX_QUEUE_SIZE)
    }

    pub fn max_export_batch_size(&self) -> usize {
        self.max_export_batch_size
            .unwrap_or(TRACER_MAX_EXPORT_BATCH_SIZE)
    }

    pub fn scheduled_delay(&self) -> Duration {
        Duration::from_millis(self.scheduled_delay_ms.unwrap_or(TRACER_SCHEDULED_DELAY_MS))
    }
}

/// Logging, tracing and metrics settings.
///
/// Without endpoints, spans and metrics stay in process and only the
/// console (and optionally a log directory) receives output.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, TypedBuilder, Validate, Default)]
pub struct TelemetryConfig {
    /// Identifies the service in the tracing and metrics backends.
    #[builder(default, setter(strip_option, into))]
    tracing_service_name: Option<String>,

    /// OTLP (gRPC) endpoint receiving spans.
    #[validate(url)]
    #[builder(default, setter(strip_option, into))]
    tracing_endpoint: Option<String>,

    /// Timeout of OTLP exports, in milliseconds.
    #[validate(range(min = 1))]
    #[builder(default, setter(strip_option))]
    tracing_otlp_timeout_ms: Option<u64>,

    /// OTLP (gRPC) endpoint receiving metrics.
    #[validate(url)]
    #[builder(default, setter(strip_option, into))]
    metrics_endpoint: Option<String>,

    /// Interval between two metric exports, in milliseconds.
    #[validate(range(min = 100))]
    #[builder(default, setter(strip_option))]
    metrics_export_interval_ms: Option<u64>,

    /// Emit console logs as JSON.
    #[builder(default, setter(strip_option))]
    json_logs: Option<bool>,

    /// Directory receiving daily rotated JSON log files.
    #[builder(default, setter(strip_option, into))]
    log_dir: Option<String>,

    #[builder(default, setter(strip_option))]
    batch: Option<BatchConf>,
}

impl TelemetryConfig {
    pub fn tracing_service_name(&self) -> Option<&str> {
        self.tracing_service_name.as_deref()
    }

    pub fn tracing_endpoint(&self) -> Option<&str> {
        self.tracing_endpoint.as_deref()
    }

    pub fn tracing_otlp_timeout(&self) -> Duration {
        Duration::from_millis(self.tracing_otlp_timeout_ms.unwrap_or(OTLP_DEFAULT_TIMEOUT_MS))
    }

    pub fn metrics_endpoint(&self) -> Option<&str> {
        self.metrics_endpoint.as_deref()
    }

    pub fn metrics_export_interval(&self) -> Duration {
        Duration::from_millis(
            self.metrics_export_interval_ms
                .unwrap_or(METRICS_DEFAULT_EXPORT_INTERVAL_MS),
        )
    }

    pub fn json_logs(&self) -> bool {
        self.json_logs.unwrap_or(false)
    }

    pub fn log_dir(&self) -> Option<&str> {
        self.log_dir.as_deref()
    }

    pub fn batch(&self) -> Option<&BatchConf> {
        self.batch.as_ref()
    }
}

#[derive(
    Default, Display, Deserialize, Serialize, Clone, EnumString, AsRefStr, Eq, PartialEq, Debug,
)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ExecutionEnvironment {
    #[default]
    Local,
    #[strum(serialize = "dev")]
    Development,
    Stage,
    #[strum(serialize = "prod")]
    Production,
    Integration,
}

#[derive(TypedBuilder, Debug)]
pub struct Settings<'a> {
    #[builder(setter(strip_option), default = None)]
    path: Option<&'a str>,
    env_prefix: &'a str,
    #[builder(default)]
    parse_keys: Vec<&'a str>,
}

fn mode() -> ExecutionEnvironment {
    env::var("RUN_MODE")
        .map(|enum_str| ExecutionEnvironment::from_str(enum_str.as_str()).unwrap_or_default())
        .unwrap_or_else(|_| ExecutionEnvironment::Local)
}

impl Settings<'_> {
    /// Loads `T` from, in increasing priority: `config/default`,
    /// `config/<prefix>`, `config/<prefix>-<RUN_MODE>`, `/etc/config/<prefix>.toml`,
    /// the explicit path and the `<PREFIX>__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be created or deserialized,
    /// or if the explicit path does not exist.
    pub fn init_conf<'de, T: Deserialize<'de> + std::fmt::Debug>(&self) -> Result<T, ConfigError> {
        let mut env_conf = config::Environment::default()
            .prefix(self.env_prefix)
            .separator("__")
            .list_separator(",");
        if !self.parse_keys.is_empty() {
            env_conf = env_conf.try_parsing(true);
        }
        for key in &self.parse_keys {
            env_conf = env_conf.with_list_parse_key(key);
        }
        let prefix = self.env_prefix.to_lowercase();
        let mut config_builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{prefix}")).required(false))
            .add_source(
                File::with_name(&format!("config/{prefix}-{}", *ENVIRONMENT)).required(false),
            )
            .add_source(File::with_name(&format!("/etc/config/{prefix}.toml")).required(false));

        if let Some(path) = self.path {
            config_builder = config_builder.add_source(File::with_name(path).required(true))
        };

        let config = config_builder.add_source(env_conf).build()?;

        let settings: T = config.try_deserialize()?;

        tracing::debug!("Loaded settings: {:?}", settings);

        Ok(settings)
    }
}
