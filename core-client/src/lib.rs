//! Key provisioning client library
//!
//! This library generates BGV key pairs on the client and registers the
//! public key with a provisioning server. It also includes an associated CLI.

pub mod codec;
pub mod error;
pub mod loader;
pub mod registration;
pub mod state;
pub mod workflow;

pub use crate::codec::{base64_to_bytes, bytes_to_base64};
pub use crate::error::ProvisioningError;
pub use crate::loader::{BgvEngineLoader, EngineHandle, EngineLoader, EngineRegistry, EngineSource};
pub use crate::registration::{RegistrationClient, RegistrationResult};
pub use crate::state::{ProvisioningController, ProvisioningEvent, UiState};
pub use crate::workflow::{KeyProvisioningWorkflow, ProgressSink, Stage};

use anyhow::Context;
use bgv_fhe::{BgvEngine, SerialFormat};
use clap::{Args, Parser, Subcommand};
use observability::conf::{Settings, TelemetryConfig};
use observability::metrics::METRICS;
use observability::metrics_names::{OP_EXPORT_ENGINE, OP_FETCH_CRYPTO_CONTEXT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use validator::Validate;

use crate::registration::DEFAULT_API_VERSION;

/// Prefix of the environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "KEYPROV_CLIENT";

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

#[derive(Serialize, Clone, Validate, Debug, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the provisioning server, without the `/api/...` suffix
    #[validate(url)]
    pub server_url: String,
    /// Version segment of the API paths
    #[validate(length(min = 1))]
    pub api_version: String,
    /// Engine asset to load instead of generating the engine tables at startup
    pub engine_asset: Option<PathBuf>,
    #[validate(nested)]
    pub telemetry: Option<TelemetryConfig>,
}

impl<'de> Deserialize<'de> for ClientConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize, Clone, Debug)]
        pub struct ClientConfigBuffer {
            pub server_url: String,
            #[serde(default = "default_api_version")]
            pub api_version: String,
            pub engine_asset: Option<PathBuf>,
            pub telemetry: Option<TelemetryConfig>,
        }

        let temp = ClientConfigBuffer::deserialize(deserializer)?;

        let conf = ClientConfig {
            server_url: temp.server_url,
            api_version: temp.api_version,
            engine_asset: temp.engine_asset,
            telemetry: temp.telemetry,
        };

        conf.validate().map_err(serde::de::Error::custom)?;

        Ok(conf)
    }
}

impl ClientConfig {
    pub fn engine_source(&self) -> EngineSource {
        match &self.engine_asset {
            Some(path) => EngineSource::Asset(path.clone()),
            None => EngineSource::Builtin,
        }
    }

    pub fn registration_client(&self) -> RegistrationClient {
        RegistrationClient::new(self.server_url.clone(), self.api_version.clone())
    }
}

#[derive(Debug, Parser, Clone, Validate)]
#[clap(name = "keyprov-client")]
#[clap(
    about = "Generates a BGV key pair and registers its public key with a provisioning server."
)]
pub struct CmdConfig {
    /// Path to the configuration file
    #[clap(long, short = 'f')]
    #[validate(length(min = 1))]
    pub file_conf: Option<String>,
    /// The command to execute
    #[clap(subcommand)]
    pub command: ClientCommand,
    /// Whether to print logs or not
    #[clap(long, short = 'l')]
    pub logs: bool,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum ClientCommand {
    /// Generate a key pair and register its public key
    Register,
    /// Fetch the crypto context the server holds for a session
    CryptoContext(SessionParameters),
    /// Write the builtin engine tables to an engine asset file
    ExportEngine(ExportParameters),
}

#[derive(Debug, Args, Clone, PartialEq)]
pub struct SessionParameters {
    #[clap(long, short = 's')]
    pub session_id: String,
}

#[derive(Debug, Args, Clone, PartialEq)]
pub struct ExportParameters {
    #[clap(long, short = 'o')]
    pub output: PathBuf,
}

/// Parameters of a crypto context, as printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub ring_dim: usize,
    pub cyclotomic_order: usize,
    pub plaintext_modulus: u64,
    pub moduli: Vec<u64>,
    pub log_q: u32,
    pub security_level: String,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutput {
    Registered(RegistrationResult),
    CryptoContext(ContextSummary),
    EngineExported { path: PathBuf, size: usize },
}

pub fn setup_logging() {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "keyprov-client.log");
    let file_and_stdout = file_appender.and(std::io::stdout);

    // read the RUST_LOG environment variable to set the logging level, or set to INFO as default
    let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
    let log_level = tracing::Level::from_str(&log_level_str).unwrap_or(tracing::Level::INFO);

    println!("Setting up logging with level: {log_level:?}");

    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_and_stdout)
        .with_ansi(false)
        .with_max_level(log_level)
        .json()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set logging subscriber: {e}");
    }
}

/// Loads the client configuration from the default locations, the file
/// given on the command line and the `KEYPROV_CLIENT__*` environment.
pub fn load_config(cmd_config: &CmdConfig) -> anyhow::Result<ClientConfig> {
    let settings = match cmd_config.file_conf.as_deref() {
        Some(path) => {
            tracing::info!("Path to config: {:?}", path);
            Settings::builder().path(path).env_prefix(ENV_PREFIX).build()
        }
        None => Settings::builder().env_prefix(ENV_PREFIX).build(),
    };
    settings
        .init_conf()
        .context("Failed to load the client configuration")
}

pub async fn execute_cmd(
    cmd_config: &CmdConfig,
    conf: &ClientConfig,
) -> anyhow::Result<CommandOutput> {
    let client_timer_start = tokio::time::Instant::now();
    let command = &cmd_config.command;
    tracing::info!("Starting command: {:?}", command);

    let registry = Arc::new(EngineRegistry::new(BgvEngineLoader::new(
        conf.engine_source(),
    )));

    let output = match command {
        ClientCommand::Register => {
            let workflow = KeyProvisioningWorkflow::new(registry, conf.registration_client());
            let result = do_register(workflow).await?;
            CommandOutput::Registered(result)
        }
        ClientCommand::CryptoContext(params) => {
            let summary =
                do_fetch_crypto_context(&registry, &conf.registration_client(), &params.session_id)
                    .await?;
            CommandOutput::CryptoContext(summary)
        }
        ClientCommand::ExportEngine(params) => {
            let size = do_export_engine(&registry, &params.output).await?;
            CommandOutput::EngineExported {
                path: params.output.clone(),
                size,
            }
        }
    };

    tracing::info!(
        "Command {:?} took {:.2?}",
        command,
        client_timer_start.elapsed()
    );
    Ok(output)
}

/// Runs the workflow through a controller and prints each stage as it starts.
async fn do_register(workflow: KeyProvisioningWorkflow) -> anyhow::Result<RegistrationResult> {
    let controller = ProvisioningController::new(Arc::new(workflow));
    let mut updates = controller.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let line = updates.borrow_and_update().message();
            if !line.is_empty() {
                println!("{line}");
            }
        }
    });

    let res = controller.trigger().await;
    drop(controller);
    if let Err(e) = printer.await {
        tracing::warn!("Progress printer failed: {e}");
    }
    Ok(res?)
}

async fn do_fetch_crypto_context(
    registry: &EngineRegistry,
    client: &RegistrationClient,
    session_id: &str,
) -> anyhow::Result<ContextSummary> {
    let _timer = METRICS
        .time_operation(OP_FETCH_CRYPTO_CONTEXT)
        .map(|b| b.start())
        .map_err(|e| tracing::warn!("Failed to start timer: {e}"))
        .ok();
    let fetched = async {
        let bytes = client.fetch_crypto_context(session_id).await?;
        let engine = registry.ensure_loaded().await?;
        let context = engine
            .deserialize_crypto_context(&bytes, SerialFormat::Binary)
            .map_err(ProvisioningError::from)?;
        let summary = ContextSummary {
            ring_dim: context.ring_dim(),
            cyclotomic_order: context.cyclotomic_order(),
            plaintext_modulus: context.plaintext_modulus(),
            moduli: context.moduli().to_vec(),
            log_q: context.log_q(),
            security_level: context.params().security_level.to_string(),
            features: context.features().map(|f| f.to_string()).collect(),
        };
        context.release();
        Ok::<_, ProvisioningError>(summary)
    }
    .await;

    fetched.map_err(|e| {
        tracing::error!("Failed to fetch the crypto context of session {session_id}: {e}");
        if let Err(metric_err) = METRICS.increment_error_counter(OP_FETCH_CRYPTO_CONTEXT, e.metric_tag())
        {
            tracing::warn!("Failed to increment error counter: {metric_err}");
        }
        anyhow::Error::new(e)
    })
}

/// Writes the tables of the configured engine to `output` and returns the
/// number of bytes written.
async fn do_export_engine(registry: &EngineRegistry, output: &Path) -> anyhow::Result<usize> {
    let _timer = METRICS
        .time_operation(OP_EXPORT_ENGINE)
        .map(|b| b.start())
        .map_err(|e| tracing::warn!("Failed to start timer: {e}"))
        .ok();
    let engine: Arc<BgvEngine> = registry.ensure_loaded().await?;
    let bytes = engine.to_bytes().map_err(ProvisioningError::from)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("Failed to write engine asset {}", output.display()))?;
    tracing::info!(
        "Wrote engine asset of {} bytes to {}",
        bytes.len(),
        output.display()
    );
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_parse_commands() {
        let cmd = CmdConfig::try_parse_from(["keyprov-client", "-f", "conf.toml", "-l", "register"])
            .unwrap();
        assert_eq!(cmd.file_conf.as_deref(), Some("conf.toml"));
        assert!(cmd.logs);
        assert_eq!(cmd.command, ClientCommand::Register);

        let cmd = CmdConfig::try_parse_from([
            "keyprov-client",
            "crypto-context",
            "--session-id",
            "abc123",
        ])
        .unwrap();
        assert_eq!(
            cmd.command,
            ClientCommand::CryptoContext(SessionParameters {
                session_id: "abc123".to_string()
            })
        );

        let cmd =
            CmdConfig::try_parse_from(["keyprov-client", "export-engine", "-o", "engine.bin"])
                .unwrap();
        assert_eq!(
            cmd.command,
            ClientCommand::ExportEngine(ExportParameters {
                output: PathBuf::from("engine.bin")
            })
        );

        assert!(CmdConfig::try_parse_from(["keyprov-client", "crypto-context"]).is_err());
    }

    #[test]
    fn test_config_validation() {
        let conf: ClientConfig =
            serde_json::from_str(r#"{"server_url": "http://localhost:6969"}"#).unwrap();
        assert_eq!(conf.api_version, "v0.1.0");
        assert_eq!(conf.engine_source(), EngineSource::Builtin);
        assert!(conf.telemetry.is_none());

        let bad: Result<ClientConfig, _> = serde_json::from_str(r#"{"server_url": "localhost"}"#);
        assert!(bad.is_err());

        let bad: Result<ClientConfig, _> = serde_json::from_str(
            r#"{"server_url": "http://localhost:6969", "telemetry": {"tracing_endpoint": "nope"}}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    #[serial]
    fn test_load_config_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(
            br#"
server_url = "http://localhost:6969"
engine_asset = "assets/engine.bin"
"#,
        )
        .unwrap();
        let cmd = CmdConfig {
            file_conf: Some(file.path().to_str().unwrap().to_string()),
            command: ClientCommand::Register,
            logs: false,
        };

        let conf = load_config(&cmd).unwrap();
        assert_eq!(conf.server_url, "http://localhost:6969");
        assert_eq!(
            conf.engine_source(),
            EngineSource::Asset(PathBuf::from("assets/engine.bin"))
        );

        std::env::set_var("KEYPROV_CLIENT__API_VERSION", "v0.2.0");
        let conf = load_config(&cmd);
        std::env::remove_var("KEYPROV_CLIENT__API_VERSION");
        assert_eq!(conf.unwrap().api_version, "v0.2.0");
    }

    #[tokio::test]
    async fn test_export_engine() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("engine.bin");
        let registry = EngineRegistry::new(BgvEngineLoader::builtin());

        let size = do_export_engine(&registry, &output).await.unwrap();
        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes.len(), size);
        let restored = BgvEngine::from_bytes(&bytes).unwrap();
        assert_eq!(restored.tables(), registry.get().unwrap().tables());
    }
}
