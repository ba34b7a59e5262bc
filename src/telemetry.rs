//! Logging setup and job spans.
//!
//! Long-running pipeline steps run inside an `INFO` span named `pipeline.job`
//! carrying the job type and target, so log lines from nested calls (index
//! builds, embedding batches) inherit them.

use crate::config::LoggingConfig;
use tracing::{field, span, Level, Span};
use tracing_subscriber::EnvFilter;

/// Pipeline job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    /// Article and geomap ingest
    Ingest,
    /// Passage embedding
    EmbeddingGeneration,
    /// Calibration fit or reuse
    Calibration,
    /// Graph build for one index
    IndexBuild,
    /// Index file write
    IndexSave,
    /// Index file read
    IndexLoad,
}

impl JobType {
    /// Get job type as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "store.ingest",
            Self::EmbeddingGeneration => "embedding.generate",
            Self::Calibration => "quantize.calibrate",
            Self::IndexBuild => "index.build",
            Self::IndexSave => "index.save",
            Self::IndexLoad => "index.load",
        }
    }
}

/// Create a job span.
///
/// `job.count` and `job.status` start empty; fill them with [`record_job`].
///
/// ```rust,ignore
/// let span = job_span(JobType::IndexBuild, "int8");
/// let _guard = span.enter();
/// ```
pub fn job_span(job_type: JobType, target: &str) -> Span {
    span!(
        Level::INFO,
        "pipeline.job",
        job.name = %format!("{} {}", job_type.as_str(), target),
        job.type = job_type.as_str(),
        job.target = target,
        job.count = field::Empty,
        job.status = field::Empty,
    )
}

/// Record the outcome of the job in the current span.
pub fn record_job(count: Option<usize>, status: &str) {
    let span = Span::current();
    if let Some(count) = count {
        span.record("job.count", count);
    }
    span.record("job.status", status);
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.filter`. Calling this twice is harmless; the
/// second call leaves the first subscriber in place.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_names() {
        assert_eq!(JobType::IndexBuild.as_str(), "index.build");
        assert_eq!(JobType::EmbeddingGeneration.as_str(), "embedding.generate");
        assert_eq!(JobType::Calibration.as_str(), "quantize.calibrate");
    }

    #[test]
    fn test_job_span_records() {
        init(&LoggingConfig::default());
        let span = job_span(JobType::IndexSave, "binary");
        let _guard = span.enter();
        record_job(Some(3), "success");
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "pipeline.job");
        }
    }
}
