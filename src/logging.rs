//! Tracing initialisation: terminal output, optional rolling log file, optional
//! OTLP export.

use crate::config::TelemetryConfig;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithHttpConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use std::path::Path;

const MAX_MESSAGE_CHARS: usize = 280;

/// Handles that must outlive the subscriber.
///
/// Hold this for the process lifetime and call [`LoggingGuard::shutdown`]
/// before exit so buffered spans and log lines are flushed.
pub struct LoggingGuard {
    provider: Option<SdkTracerProvider>,
    _file_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(error) = provider.shutdown() {
                eprintln!("failed to flush OTLP spans: {error}");
            }
        }
    }
}

fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

/// Initialise the global subscriber.
///
/// Terminal output is always on. `log_dir` adds a daily rolling file and an
/// OTLP endpoint in `telemetry` adds span export.
pub fn init_tracing(
    debug: bool,
    log_dir: Option<&Path>,
    telemetry: &TelemetryConfig,
) -> LoggingGuard {
    let field_formatter = || {
        format::debug_fn(|writer, field, value| {
            let field_name = field.name();
            if field_name == "message" {
                let formatted = format!("{value:?}");
                let (truncated, was_truncated) = truncate_for_log(&formatted, MAX_MESSAGE_CHARS);
                if was_truncated {
                    write!(writer, "{}={}...", field_name, truncated)
                } else {
                    write!(writer, "{}={formatted}", field_name)
                }
            } else {
                write!(writer, "{}={value:?}", field_name)
            }
        })
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .fmt_fields(field_formatter())
        .compact();

    let (file_layer, file_guard) = match log_dir {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "threadrelay.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .fmt_fields(field_formatter())
                .compact();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let provider = build_otlp_provider(telemetry);
    let otel_layer = provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer("threadrelay")));

    tracing_subscriber::registry()
        .with(build_env_filter(debug))
        .with(stdout_layer)
        .with(file_layer)
        .with(otel_layer)
        .init();

    LoggingGuard {
        provider,
        _file_guard: file_guard,
    }
}

/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--debug`.
fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let default_directive = if debug { "debug" } else { "info" };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive))
}

/// Span export pipeline for `telemetry`, or `None` when no endpoint is set or
/// the exporter cannot be built.
fn build_otlp_provider(telemetry: &TelemetryConfig) -> Option<SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig as _;
    use opentelemetry_sdk::trace::span_processor_with_async_runtime::BatchSpanProcessor;

    let endpoint = otlp_traces_endpoint(telemetry.otlp_endpoint.as_deref()?);
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.clone())
        .with_headers(telemetry.otlp_headers.clone())
        .build()
    {
        Ok(exporter) => exporter,
        Err(error) => {
            // The subscriber is not installed yet, so this goes to stderr.
            eprintln!("OTLP export to {endpoint} disabled: {error}");
            return None;
        }
    };

    Some(
        SdkTracerProvider::builder()
            .with_span_processor(
                BatchSpanProcessor::builder(exporter, opentelemetry_sdk::runtime::Tokio).build(),
            )
            .with_resource(
                opentelemetry_sdk::Resource::builder()
                    .with_service_name(telemetry.service_name.clone())
                    .build(),
            )
            .with_sampler(sampler_for(telemetry.sample_rate))
            .build(),
    )
}

/// Sample everything at rate 1.0; otherwise follow the parent decision and
/// sample new roots by trace id ratio.
fn sampler_for(rate: f64) -> opentelemetry_sdk::trace::Sampler {
    use opentelemetry_sdk::trace::Sampler;

    if rate >= 1.0 {
        Sampler::AlwaysOn
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(rate)))
    }
}

/// Append `/v1/traces` unless the endpoint already names it.
fn otlp_traces_endpoint(endpoint: &str) -> String {
    if endpoint.ends_with("/v1/traces") {
        endpoint.to_owned()
    } else {
        format!("{}/v1/traces", endpoint.trim_end_matches('/'))
    }
}
