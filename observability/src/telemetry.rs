use crate::conf::{ExecutionEnvironment, TelemetryConfig, ENVIRONMENT};
use anyhow::Context;
use opentelemetry::{global, trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
pub use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::metrics::PeriodicReader;
pub use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::{resource::Resource, trace::Sampler};
use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{layer, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "keyprov-client.log";

fn resource(settings: &TelemetryConfig) -> Resource {
    Resource::builder()
        .with_attributes(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME.to_string(),
                settings
                    .tracing_service_name()
                    .unwrap_or("unknown-service")
                    .to_string(),
            ),
            KeyValue::new(
                "service.version".to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            ),
            KeyValue::new(
                "deployment.environment".to_string(),
                ENVIRONMENT.to_string(),
            ),
        ])
        .build()
}

/// Installs the global meter provider. Metrics are pushed over OTLP when an
/// endpoint is configured and otherwise only aggregated in process.
pub fn init_metrics(settings: &TelemetryConfig) -> Result<SdkMeterProvider, anyhow::Error> {
    if matches!(*ENVIRONMENT, ExecutionEnvironment::Integration) {
        return Ok(SdkMeterProvider::default());
    }

    let provider = match settings.metrics_endpoint() {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .with_timeout(settings.tracing_otlp_timeout())
                .build()
                .context("Failed to create OTLP metric exporter")?;
            let reader = PeriodicReader::builder(exporter)
                .with_interval(settings.metrics_export_interval())
                .build();
            SdkMeterProvider::builder()
                .with_reader(reader)
                .with_resource(resource(settings))
                .build()
        }
        None => SdkMeterProvider::builder()
            .with_resource(resource(settings))
            .build(),
    };

    global::set_meter_provider(provider.clone());
    Ok(provider)
}

/// Installs the global tracing subscriber. The returned worker guard, if
/// any, flushes the log file when dropped.
pub async fn init_tracing(
    settings: &TelemetryConfig,
) -> Result<(SdkTracerProvider, Option<WorkerGuard>), anyhow::Error> {
    let provider = if let Some(endpoint) = settings.tracing_endpoint() {
        println!(
            "Configuring OTLP Tracing exporter with endpoint: {} and tracing_otlp_timeout={}ms",
            endpoint,
            settings.tracing_otlp_timeout().as_millis()
        );

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(settings.tracing_otlp_timeout())
            .build()?;

        let batch_conf = settings.batch().cloned().unwrap_or_default();
        let batch_config = opentelemetry_sdk::trace::BatchConfigBuilder::default()
            .with_max_queue_size(batch_conf.max_queue_size())
            .with_scheduled_delay(batch_conf.scheduled_delay())
            .with_max_export_batch_size(batch_conf.max_export_batch_size())
            .build();

        let batch_processor = opentelemetry_sdk::trace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();

        SdkTracerProvider::builder()
            .with_span_processor(batch_processor)
            .with_resource(resource(settings))
            .build()
    } else {
        SdkTracerProvider::builder()
            .with_sampler(
                // When RUST_LOG=trace, sample everything
                // Otherwise, sample nothing for OpenTelemetry
                if std::env::var("RUST_LOG")
                    .map(|v| v == "trace")
                    .unwrap_or(false)
                {
                    Sampler::AlwaysOn
                } else {
                    Sampler::AlwaysOff
                },
            )
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .with_resource(resource(settings))
            .build()
    };

    let tracer = provider.clone().tracer("keyprov-client");

    let mut log_guard = None;
    let file_layer = match settings.log_dir() {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create log directory {dir}"))?;
            let (writer, guard) = non_blocking(daily(dir, LOG_FILE_PREFIX));
            log_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
        }
        None => None,
    };

    let (json_layer, plain_layer) = if settings.json_logs() {
        (Some(fmt_layer().json()), None)
    } else {
        (None, Some(fmt_layer()))
    };

    let env_filter = match *ENVIRONMENT {
        ExecutionEnvironment::Integration | ExecutionEnvironment::Local => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,hyper=warn,h2=warn,tower=warn,reqwest=warn,opentelemetry_sdk=warn")
            })
        }
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(telemetry)
        .with(file_layer)
        .with(json_layer)
        .with(plain_layer)
        .with(env_filter)
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok((provider, log_guard))
}

/// Providers returned by [`init_telemetry`]. Shutting them down flushes
/// pending spans and metrics.
pub struct TelemetryGuard {
    pub tracer_provider: SdkTracerProvider,
    pub meter_provider: SdkMeterProvider,
    log_guard: Option<WorkerGuard>,
}

impl TelemetryGuard {
    pub fn shutdown(self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shut down tracer provider: {e}");
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to shut down meter provider: {e}");
        }
        drop(self.log_guard);
    }
}

pub async fn init_telemetry(settings: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    // metrics first, so that instruments are registered with the real provider
    let meter_provider = init_metrics(settings)?;

    let (tracer_provider, log_guard) = init_tracing(settings).await?;
    info!("Tracing initialization completed successfully");

    info!("Metrics initialization completed successfully");

    Ok(TelemetryGuard {
        tracer_provider,
        meter_provider,
        log_guard,
    })
}

fn fmt_layer<S>() -> Layer<S> {
    layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NONE)
}
