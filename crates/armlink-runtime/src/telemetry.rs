//! Log and span output for the `armlink` binary.
//!
//! The relay is a plain threaded program: the server runs one OS thread per
//! connection and the client drives its pipeline on the caller's thread.
//! Each of those threads opens a span (`relay_connection` on the server,
//! `relay_client` on the client) carrying the peer address, so every line
//! logged while handling a peer can be attributed to it.
//!
//! No Tokio runtime is ever started (the event bus uses `tokio::sync`
//! channels from blocking code), so spans bound for a collector go through
//! the simple exporter and are sent from the thread that closes them.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Filter directives, e.g. `armlink_middleware=debug`. Defaults to `info`. |
//! | `ARMLINK_LOG_FORMAT` | `json` (any case) for one JSON object per line; anything else is compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector base URL (e.g. `http://localhost:4318`). Enables OTLP/HTTP span export. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = armlink_runtime::telemetry::init_tracing("armlink");
//! // ... run the relay; spans are flushed when `_guard` drops.
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "ARMLINK_LOG_FORMAT";

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const DEFAULT_FILTER: &str = "info";

/// Install the process-wide subscriber.
///
/// Console output is always on, in the format picked by
/// [`LOG_FORMAT_ENV`].  The OpenTelemetry layer is only stacked on top when
/// a collector endpoint is configured.  A second call leaves the first
/// subscriber in place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let provider = build_provider(service_name);

    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("armlink")));
    let (json, compact) = if json_requested() {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer().compact()))
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(compact)
        .try_init()
    {
        eprintln!("[armlink] tracing already initialised: {e}");
    }

    TracerProviderGuard(provider)
}

fn json_requested() -> bool {
    std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Hold in `main`.  Dropping it shuts the exporter down, which sends any
/// span still buffered.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported to a collector.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[armlink] span exporter shutdown failed: {e}");
        }
    }
}

/// `None` without an endpoint.  An exporter that fails to build is reported
/// on stderr and the relay carries on with console output only.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var(OTLP_ENDPOINT_ENV).ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[armlink] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
