use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "nullmark";
const DEFAULT_LOG_FILTER: &str = "nullmark=info,warn";

/// OpenTelemetry tracer for one analysis run.
///
/// Spans cover the snapshot load, each rule, each source unit and each
/// analyzed body. Body spans are opened on rayon workers under an explicit
/// parent context.
pub(crate) struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Exports spans to the OTLP/HTTP collector at `endpoint`.
    pub(crate) fn new(endpoint: &str) -> Result<Self> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(trace_endpoint(endpoint)?)
            .build()
            .context("build OTLP span exporter")?;
        Ok(Self::from_exporter(exporter))
    }

    fn from_exporter<E: SpanExporter + 'static>(exporter: E) -> Self {
        // on_end() is a channel send, so body spans may end on rayon workers.
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_max_queue_size(16_384)
                    .with_max_export_batch_size(1024)
                    .with_scheduled_delay(Duration::from_millis(250))
                    .build(),
            )
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .with_span_processor(processor)
            .build();
        opentelemetry::global::set_tracer_provider(provider.clone());
        Self {
            tracer: provider.tracer(SERVICE_NAME),
            provider,
        }
    }

    /// Runs `f` in a child span of the current context.
    pub(crate) fn in_span<T>(
        &self,
        name: &str,
        attributes: &[KeyValue],
        f: impl FnOnce() -> T,
    ) -> T {
        self.in_span_under(&OtelContext::current(), name, attributes, f)
    }

    /// Runs `f` in a child span of `parent_cx`. Worker threads do not inherit
    /// the caller's context, so their spans go through here.
    pub(crate) fn in_span_under<T>(
        &self,
        parent_cx: &OtelContext,
        name: &str,
        attributes: &[KeyValue],
        f: impl FnOnce() -> T,
    ) -> T {
        let span = self
            .tracer
            .span_builder(name.to_string())
            .with_attributes(attributes.to_vec())
            .start_with_context(&self.tracer, parent_cx);
        let _guard = parent_cx.with_span(span).attach();
        f()
    }

    /// Flushes pending spans.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|err| anyhow!("tracer provider shutdown failed: {err}"))
    }
}

/// Resolves the traces URL from a collector base URL or a logs/metrics URL.
fn trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint)
        .with_context(|| format!("parse OTLP endpoint {endpoint}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("unsupported OTLP endpoint scheme: {}", url.scheme());
    }
    let path = url.path().trim_end_matches('/');
    let sibling = ["/v1/logs", "/v1/metrics"]
        .iter()
        .find_map(|signal| path.strip_suffix(signal));
    let traces_path = match sibling {
        Some(prefix) => format!("{prefix}/v1/traces"),
        None if path.is_empty() => "/v1/traces".to_string(),
        None => return Ok(url.to_string()),
    };
    url.set_path(&traces_path);
    Ok(url.to_string())
}

/// Installs the stderr log subscriber.
///
/// `RUST_LOG` overrides the default filter; `quiet` lowers it to warnings.
pub(crate) fn init_logging(quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if quiet { "warn" } else { DEFAULT_LOG_FILTER })
    });
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    // Keeps a subscriber that is already installed.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .try_init();
}

/// Records an event on the active span, if there is one.
pub(crate) fn add_current_span_event(name: &str, attributes: &[KeyValue]) {
    OtelContext::map_current(|cx| {
        let span = cx.span();
        if span.span_context().is_valid() {
            span.add_event(name.to_string(), attributes.to_vec());
        }
    });
}

pub(crate) fn current_trace_id() -> Option<String> {
    OtelContext::map_current(|cx| {
        let span = cx.span();
        let span_context = span.span_context();
        span_context
            .is_valid()
            .then(|| span_context.trace_id().to_string())
    })
}

/// Runs `f` in a span when telemetry is enabled.
pub(crate) fn with_span<T>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: impl FnOnce() -> T,
) -> T {
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, f),
        None => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::trace::SpanData;

    #[derive(Debug)]
    struct NoopExporter;

    impl SpanExporter for NoopExporter {
        async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
            Ok(())
        }
    }

    #[test]
    fn telemetry_uses_exporter_without_errors() {
        let telemetry = Telemetry::from_exporter(NoopExporter);
        telemetry.in_span("test", &[KeyValue::new("test.key", "value")], || {});
        add_current_span_event("outside any span", &[]);
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn root_endpoint_points_at_traces() {
        let endpoint = trace_endpoint("http://localhost:4318/").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }

    #[test]
    fn sibling_signal_endpoints_point_at_traces() {
        assert_eq!(
            trace_endpoint("http://localhost:4318/v1/logs").expect("endpoint"),
            "http://localhost:4318/v1/traces"
        );
        assert_eq!(
            trace_endpoint("https://collector.example/otel/v1/metrics/").expect("endpoint"),
            "https://collector.example/otel/v1/traces"
        );
    }

    #[test]
    fn explicit_trace_endpoint_is_kept() {
        let endpoint = trace_endpoint("http://localhost:4318/v1/traces").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        let error = trace_endpoint("ftp://localhost/").expect_err("scheme");
        assert!(error.to_string().contains("ftp"));
    }

    #[test]
    fn nested_spans_share_trace_id() {
        let telemetry = Telemetry::from_exporter(NoopExporter);
        let (outer, inner) = telemetry.in_span("rule", &[], || {
            let outer = current_trace_id();
            let inner = telemetry.in_span("unit", &[], current_trace_id);
            (outer, inner)
        });
        assert_eq!(outer.as_deref().map(str::len), Some(32));
        assert_eq!(outer, inner);
        assert!(current_trace_id().is_none());
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn parent_context_links_worker_spans() {
        let telemetry = Telemetry::from_exporter(NoopExporter);
        let (outer, inner) = telemetry.in_span("unit", &[], || {
            let parent_cx = OtelContext::current();
            let outer = current_trace_id();
            let inner = std::thread::scope(|scope| {
                scope
                    .spawn(|| telemetry.in_span_under(&parent_cx, "body", &[], current_trace_id))
                    .join()
                    .expect("join worker")
            });
            (outer, inner)
        });
        assert!(outer.is_some());
        assert_eq!(outer, inner);
        telemetry.shutdown().expect("shutdown");
    }
}
