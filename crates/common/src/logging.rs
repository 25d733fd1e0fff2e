//! Logging bootstrap shared by the coordinator binary and anything embedding the client.
//!
//! Output always goes to stdout through a compact formatter filtered by `RUST_LOG`. When an OTLP
//! collector endpoint is configured, spans are additionally exported over gRPC.
use std::env;

use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use thiserror::Error;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable name for the OTLP collector endpoint.
pub const OTLP_URL_ENVVAR: &str = "WABISABI_OTLP_URL";

/// Environment variable name for the service label, which is appended to the whoami string.
pub const SVC_LABEL_ENVVAR: &str = "WABISABI_SVC_LABEL";

/// Errors that can occur while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The OTLP span exporter could not be built.
    #[error("could not build otlp exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global subscriber was already installed.
    #[error("could not install subscriber: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Configuration for the logger.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Identifies the service in logs and as the OpenTelemetry `service.name`.
    whoami: String,

    /// The OpenTelemetry collector URL for exporting spans.
    otel_url: Option<String>,

    /// The level used when `RUST_LOG` is absent.
    default_level: LevelFilter,
}

impl LoggerConfig {
    /// Creates a new instance with the whoami set verbatim.
    pub const fn new(whoami: String) -> Self {
        Self {
            whoami,
            otel_url: None,
            default_level: LevelFilter::INFO,
        }
    }

    /// Creates a new instance whose whoami is `base` suffixed with the service label, if any.
    pub fn with_base_name(base: &str) -> Self {
        let mut config = Self::new(get_whoami_string(base));
        if let Some(url) = get_otlp_url_from_env() {
            config.set_otlp_url(url);
        }
        config
    }

    /// Sets the opentelemetry URL to the provided string.
    pub fn set_otlp_url(&mut self, url: String) {
        self.otel_url = Some(url);
    }

    /// Overrides the level used when `RUST_LOG` is not set.
    pub const fn with_default_level(mut self, level: LevelFilter) -> Self {
        self.default_level = level;
        self
    }

    /// Returns the whoami string.
    pub fn whoami(&self) -> &str {
        &self.whoami
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("wabisabi")
    }
}

/// Installs the global subscriber described by `config`.
///
/// # Panics
///
/// If the subscriber cannot be installed, see [`try_init`] for the fallible variant.
pub fn init(config: LoggerConfig) {
    if let Err(e) = try_init(config) {
        panic!("failed to initialize logging: {e}");
    }
}

/// Installs the global subscriber described by `config`, reporting failures instead of panicking.
pub fn try_init(config: LoggerConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.default_level.into())
        .from_env_lossy();

    let log_file = env::var("LOG_FILE").is_ok_and(|v| v == "1");
    let log_line_num = env::var("LOG_LINE_NUM").is_ok_and(|v| v == "1");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_file(log_file)
        .with_line_number(log_line_num)
        .with_filter(filter);

    match &config.otel_url {
        Some(otel_url) => {
            let provider = otlp_provider(&config.whoami, otel_url)?;
            let otel_layer =
                tracing_opentelemetry::layer().with_tracer(provider.tracer("wabisabi"));

            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(otel_layer)
                .try_init()?;
        }
        None => tracing_subscriber::registry()
            .with(stdout_layer)
            .try_init()?,
    }

    info!(whoami = %config.whoami, otlp = config.otel_url.is_some(), "logging started");
    Ok(())
}

fn otlp_provider(whoami: &str, otel_url: &str) -> Result<SdkTracerProvider, LoggingError> {
    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", whoami.to_owned()))
        .build();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otel_url)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// Gets the OTLP URL from the standard envvar.
pub fn get_otlp_url_from_env() -> Option<String> {
    env::var(OTLP_URL_ENVVAR).ok()
}

/// Gets the service label from the standard envvar.
pub fn get_service_label_from_env() -> Option<String> {
    env::var(SVC_LABEL_ENVVAR).ok()
}

/// Computes a standard whoami string.
pub fn get_whoami_string(base: &str) -> String {
    match get_service_label_from_env() {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}
