//! Query-time search across the three precisions.
//!
//! ```text
//! text ──embed("query: ")──> f32 ──┬─ float32 ─────────────> news_f32.idx
//!                                  ├─ quantize_int8(ranges) > news_int8.idx
//!                                  └─ quantize_binary ─────> news_binary.idx
//!                                               │
//!                           ranked (key, distance) pairs
//!                                               │
//!                      one IN lookup on Article_Vectors ⋈ Articles
//! ```
//!
//! The searcher only loads indexes; building belongs to [`crate::pipeline`].

use crate::config::PipelineConfig;
use crate::embeddings::{Embedder, PromptConvention};
use crate::index::{AnyIndex, IndexSpec, QueryVector, SearchResult};
use crate::pipeline::BuildManifest;
use crate::quantize::{quantize_binary_vector, quantize_int8_vector, CalibrationRange};
use crate::storage::ArticleStore;
use crate::telemetry::{job_span, JobType};
use crate::types::error::{NewsIndexError, Result};
use crate::types::{ArticleHit, Precision};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Loaded indexes plus everything needed to answer queries.
///
/// `Searcher` is `Send + Sync`; concurrent searches share the indexes
/// read-only.
pub struct Searcher {
    embedder: Arc<dyn Embedder>,
    store: Arc<ArticleStore>,
    prompts: PromptConvention,
    float32: Option<Arc<AnyIndex>>,
    int8: Option<Arc<AnyIndex>>,
    binary: Option<Arc<AnyIndex>>,
    calibration: Option<Arc<CalibrationRange>>,
}

impl Searcher {
    /// Searcher with no indexes loaded.
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<ArticleStore>, prompts: PromptConvention) -> Self {
        Self {
            embedder,
            store,
            prompts,
            float32: None,
            int8: None,
            binary: None,
            calibration: None,
        }
    }

    /// Load every index and the calibration named by `config`.
    ///
    /// Anything that fails to load is logged and left unloaded; searches at
    /// that precision then fail with `IndexNotReady`. The calibration is only
    /// accepted if it hashes to the digest in the build manifest, so int8
    /// queries are never quantized with ranges the index was not built with.
    pub fn open(config: &PipelineConfig, embedder: Arc<dyn Embedder>, store: Arc<ArticleStore>) -> Self {
        let mut searcher = Self::new(embedder, store, config.embedding.prompts.clone());

        for precision in Precision::ALL {
            let path = config.index_path(precision);
            let spec = config.index_spec(precision);
            if let Err(err) = searcher.load_index(&path, spec) {
                warn!(precision = %precision, path = %path.display(), error = %err, "index not loaded");
            }
        }

        let calibration_path = config.calibration_path();
        match load_build_calibration(config) {
            Ok(ranges) => searcher.set_calibration(ranges),
            Err(err) => warn!(
                path = %calibration_path.display(),
                error = %err,
                "calibration not loaded, int8 search disabled"
            ),
        }
        searcher
    }

    /// Load one index from `path`, replacing any index at that precision.
    pub fn load_index(&mut self, path: &Path, spec: IndexSpec) -> Result<()> {
        let span = job_span(JobType::IndexLoad, spec.precision.as_str());
        let _guard = span.enter();

        let index = AnyIndex::load(path, spec)?;
        info!(precision = %spec.precision, vectors = index.len(), "index ready");
        self.set_index(index);
        Ok(())
    }

    /// Install an in-memory index at its precision.
    pub fn set_index(&mut self, index: AnyIndex) {
        let slot = match index.precision() {
            Precision::Float32 => &mut self.float32,
            Precision::Int8 => &mut self.int8,
            Precision::Binary => &mut self.binary,
        };
        *slot = Some(Arc::new(index));
    }

    /// Install the int8 calibration ranges.
    pub fn set_calibration(&mut self, ranges: CalibrationRange) {
        self.calibration = Some(Arc::new(ranges));
    }

    /// True if `precision` can be searched.
    pub fn is_ready(&self, precision: Precision) -> bool {
        self.index(precision).is_some() && (precision != Precision::Int8 || self.calibration.is_some())
    }

    fn index(&self, precision: Precision) -> Option<&Arc<AnyIndex>> {
        match precision {
            Precision::Float32 => self.float32.as_ref(),
            Precision::Int8 => self.int8.as_ref(),
            Precision::Binary => self.binary.as_ref(),
        }
    }

    /// Top-`k` articles for `query_text` using the `precision` index.
    ///
    /// Hits are ordered by index rank; articles sharing a key are adjacent,
    /// ordered by id. An empty index result skips the store lookup.
    ///
    /// # Errors
    ///
    /// - `NewsIndexError::IndexNotReady` if the index (or, for int8, the
    ///   calibration) is not loaded
    /// - `NewsIndexError::Encoding` if the embedder fails
    /// - `NewsIndexError::Storage` if the lookup fails
    pub async fn search(&self, query_text: &str, precision: Precision, k: usize) -> Result<Vec<ArticleHit>> {
        let results = self.search_keys(query_text, precision, k).await?;
        if results.is_empty() {
            debug!(precision = %precision, "no index hits, skipping lookup");
            return Ok(Vec::new());
        }

        let ranked: Vec<_> = results.iter().map(|r| (r.key, r.distance)).collect();
        let hits = self.store.lookup_hits(&ranked, precision)?;
        debug!(
            precision = %precision,
            keys = ranked.len(),
            articles = hits.len(),
            "resolved hits"
        );
        Ok(hits)
    }

    /// Ranked index keys for `query_text` without the store lookup.
    pub async fn search_keys(&self, query_text: &str, precision: Precision, k: usize) -> Result<Vec<SearchResult>> {
        let index = self
            .index(precision)
            .ok_or(NewsIndexError::IndexNotReady(precision))?;
        let ranges = match precision {
            Precision::Int8 => Some(
                self.calibration
                    .as_ref()
                    .ok_or(NewsIndexError::IndexNotReady(Precision::Int8))?,
            ),
            _ => None,
        };

        let texts = [query_text.to_string()];
        let embedding = self.embedder.embed(self.prompts.query(&texts)).await?;
        if embedding.rows() != 1 {
            return Err(NewsIndexError::encoding(format!(
                "expected one query embedding, got {}",
                embedding.rows()
            )));
        }
        let vector = embedding.row(0);

        let query = match (precision, ranges) {
            (Precision::Int8, Some(ranges)) => QueryVector::Int8(quantize_int8_vector(vector, ranges)?),
            (Precision::Int8, None) => return Err(NewsIndexError::IndexNotReady(Precision::Int8)),
            (Precision::Float32, _) => QueryVector::Float32(vector.to_vec()),
            (Precision::Binary, _) => QueryVector::Binary(quantize_binary_vector(vector)),
        };

        index.search(&query, k)
    }
}

/// Calibration of the last completed build.
fn load_build_calibration(config: &PipelineConfig) -> Result<CalibrationRange> {
    let path = config.calibration_path();
    let manifest = BuildManifest::load(config.manifest_path())?;
    let ranges = CalibrationRange::load_checked(&path, &manifest.calibration_blake3)?;
    if ranges.dim() != config.embedding.dimensions {
        return Err(NewsIndexError::corruption(
            &path,
            format!(
                "calibration covers {} dimensions, config expects {}",
                ranges.dim(),
                config.embedding.dimensions
            ),
        ));
    }
    Ok(ranges)
}
