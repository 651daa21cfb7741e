use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber: env filter seeded from `logging.level`,
/// span traces for error reports and the configured output format.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        // one flat object per event
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
    }
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pressroom_cache_hit_total",
            Unit::Count,
            "Preview cache lookups served from storage."
        );
        describe_counter!(
            "pressroom_cache_miss_total",
            Unit::Count,
            "Preview cache lookups that fell through to rendering, including expired and self-healed entries."
        );
        describe_counter!(
            "pressroom_cache_evict_total",
            Unit::Count,
            "Preview cache entries evicted to bring a tenant back under quota."
        );
        describe_histogram!(
            "pressroom_render_ms",
            Unit::Milliseconds,
            "Headless render latency per call, labelled by format and result."
        );
        describe_histogram!(
            "pressroom_preview_ms",
            Unit::Milliseconds,
            "End-to-end synchronous preview latency, labelled by cache outcome."
        );
        describe_histogram!(
            "pressroom_production_ms",
            Unit::Milliseconds,
            "Production PDF composition latency, labelled by result."
        );
        describe_counter!(
            "pressroom_jobs_enqueued_total",
            Unit::Count,
            "Render jobs accepted, labelled by queue."
        );
        describe_counter!(
            "pressroom_jobs_completed_total",
            Unit::Count,
            "Render jobs finished successfully, labelled by queue."
        );
        describe_counter!(
            "pressroom_jobs_failed_total",
            Unit::Count,
            "Render jobs that ended in the failed state, labelled by queue."
        );
        describe_counter!(
            "pressroom_jobs_retried_total",
            Unit::Count,
            "Failed attempts scheduled for another try, labelled by queue."
        );
        describe_histogram!(
            "pressroom_job_ms",
            Unit::Milliseconds,
            "Wall time of one job attempt, labelled by queue and outcome."
        );
        describe_counter!(
            "pressroom_jobs_swept_total",
            Unit::Count,
            "Finished jobs removed after their retention window."
        );
        describe_counter!(
            "pressroom_http_errors_total",
            Unit::Count,
            "HTTP responses with a 4xx or 5xx status, labelled by status code."
        );
    });
}
