use aes_prng::AesRng;
use bgv_fhe::{BgvError, BgvParams, CryptoContext, KeyPair, SchemeFeature, SecurityLevel, SerialFormat};
use observability::metrics::METRICS;
use observability::metrics_names::{OP_KEYGEN, OP_PROVISION, OP_REGISTER, OP_SERIALIZE_PK};
use rand::SeedableRng;
use std::sync::Arc;

use crate::codec::bytes_to_base64;
use crate::error::ProvisioningError;
use crate::loader::{EngineHandle, EngineRegistry};
use crate::registration::{RegistrationClient, RegistrationResult};

/// The steps of a provisioning run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadingEngine,
    GeneratingKeys,
    SerializingKey,
    Registering,
}

impl Stage {
    pub fn message(&self) -> &'static str {
        match self {
            Stage::LoadingEngine => "Loading BGV engine...",
            Stage::GeneratingKeys => "Generating BGV key pair...",
            Stage::SerializingKey => "Serializing public key...",
            Stage::Registering => "Registering with server...",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Receives the stage notifications of a provisioning run.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: Stage);
}

impl<F> ProgressSink for F
where
    F: Fn(Stage) + Send + Sync,
{
    fn report(&self, stage: Stage) {
        self(stage)
    }
}

impl ProgressSink for tokio::sync::mpsc::UnboundedSender<Stage> {
    fn report(&self, stage: Stage) {
        // a closed receiver only means nobody is watching anymore
        let _ = self.send(stage);
    }
}

/// Parameters of every provisioned context.
pub fn provisioning_params() -> BgvParams {
    BgvParams::builder()
        .multiplicative_depth(bgv_fhe::params::DEFAULT_MULTIPLICATIVE_DEPTH)
        .plaintext_modulus(bgv_fhe::params::DEFAULT_PLAINTEXT_MODULUS)
        .security_level(SecurityLevel::HEStd128Classic)
        .build()
}

/// Generates a BGV key pair and registers its public key with the server.
#[derive(Debug, Clone)]
pub struct KeyProvisioningWorkflow {
    registry: Arc<EngineRegistry>,
    client: RegistrationClient,
}

impl KeyProvisioningWorkflow {
    pub fn new(registry: Arc<EngineRegistry>, client: RegistrationClient) -> Self {
        Self { registry, client }
    }

    /// Runs one provisioning attempt.
    ///
    /// The crypto context lives for the duration of the run only. It is
    /// released when the run returns, whatever the outcome, and when the
    /// returned future is dropped before completion.
    pub async fn run(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<RegistrationResult, ProvisioningError> {
        let _timer = METRICS
            .time_operation(OP_PROVISION)
            .map(|b| b.start())
            .map_err(|e| tracing::warn!("Failed to start timer: {e}"))
            .ok();
        let _ = METRICS
            .increment_request_counter(OP_PROVISION)
            .map_err(|e| tracing::warn!("Failed to increment request counter: {e}"));

        if self.registry.get().is_none() {
            sink.report(Stage::LoadingEngine);
            tracing::info!("{}", Stage::LoadingEngine);
        }
        let engine = self.registry.ensure_loaded().await?;

        sink.report(Stage::GeneratingKeys);
        tracing::info!("{}", Stage::GeneratingKeys);
        let (context, keys) = generate_keys(engine).await?;

        sink.report(Stage::SerializingKey);
        tracing::info!("{}", Stage::SerializingKey);
        let public_key = encode_public_key(&context, &keys)?;
        // the secret key never leaves the client
        drop(keys);

        sink.report(Stage::Registering);
        tracing::info!("{}", Stage::Registering);
        let result = {
            let _timer = METRICS
                .time_operation(OP_REGISTER)
                .map(|b| b.start())
                .map_err(|e| tracing::warn!("Failed to start timer: {e}"))
                .ok();
            self.client.register(&public_key).await?
        };
        tracing::info!("Registered public key, session id {}", result.session_id);

        context.release();
        Ok(result)
    }
}

async fn generate_keys(
    engine: EngineHandle,
) -> Result<(CryptoContext, KeyPair), ProvisioningError> {
    let _timer = METRICS
        .time_operation(OP_KEYGEN)
        .map(|b| b.start())
        .map_err(|e| tracing::warn!("Failed to start timer: {e}"))
        .ok();
    let generated = tokio::task::spawn_blocking(move || -> Result<_, BgvError> {
        let mut context = engine.gen_crypto_context(&provisioning_params())?;
        context.enable(SchemeFeature::Pke);
        context.enable(SchemeFeature::LeveledShe);
        tracing::debug!(
            "Created crypto context with ring dimension {} and {} moduli",
            context.ring_dim(),
            context.moduli().len()
        );
        let mut rng = AesRng::from_entropy();
        let keys = context.keygen(&mut rng)?;
        Ok((context, keys))
    })
    .await
    .map_err(|e| BgvError::CryptoFailure(format!("key generation task failed: {e}")))?;
    Ok(generated?)
}

fn encode_public_key(context: &CryptoContext, keys: &KeyPair) -> Result<String, ProvisioningError> {
    let _timer = METRICS
        .time_operation(OP_SERIALIZE_PK)
        .map(|b| b.start())
        .map_err(|e| tracing::warn!("Failed to start timer: {e}"))
        .ok();
    let bytes = context.serialize_public_key(&keys.public_key, SerialFormat::Binary)?;
    let encoded = bytes_to_base64(&bytes);
    tracing::debug!(
        "Serialized public key: {} bytes, {} base64 characters",
        bytes.len(),
        encoded.len()
    );
    if let Err(e) = METRICS.observe_size(OP_SERIALIZE_PK, bytes.len() as f64) {
        tracing::warn!("Failed to observe public key size: {e}");
    }
    Ok(encoded)
}
