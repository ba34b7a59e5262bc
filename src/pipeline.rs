//! Offline index build.
//!
//! ```text
//! Articles ──passage embeddings──> f32 matrix ──┬──────────────> news_f32.idx
//!                                               ├─ int8 ───────> news_int8.idx
//!                      calibration_ranges.npy ──┘  binary ─────> news_binary.idx
//!                                                                manifest.json
//! ```
//!
//! Every run rebuilds all three indexes from the current store contents.
//! The calibration is reused when present unless `recalibrate` is set, so
//! int8 codes always come from the ranges recorded in the manifest.
//!
//! Artifacts are first written to `.next` siblings. Only once all of them
//! are on disk are they renamed over the live files (calibration first,
//! then the indexes, then the manifest). A run that fails before that point
//! leaves the previous build untouched. A crash between renames leaves a
//! calibration whose digest disagrees with the old manifest, and
//! [`crate::search::Searcher::open`] then keeps int8 search disabled.

use crate::config::PipelineConfig;
use crate::embeddings::{check_shape, Embedder, PromptConvention};
use crate::index::{AnyIndex, BuildParams, IndexSpec};
use crate::keys::hash_id;
use crate::quantize::{quantize_binary, quantize_int8, CalibrationRange};
use crate::storage::ArticleStore;
use crate::telemetry::{job_span, record_job, JobType};
use crate::types::error::{NewsIndexError, Result};
use crate::types::{EmbeddingMatrix, HashedKey, Precision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Fit new calibration ranges even if a calibration file exists
    pub recalibrate: bool,
}

/// One index entry in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestIndex {
    pub precision: Precision,
    pub file: String,
    pub dim: usize,
    pub vectors: usize,
    pub has_graph: bool,
}

/// Sidecar describing the last successful build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub built_at: DateTime<Utc>,
    pub model: String,
    pub embedding_dim: usize,
    pub articles: usize,
    pub calibration_file: String,
    /// BLAKE3 of the calibration file the int8 index was built with
    pub calibration_blake3: String,
    pub calibration_fitted: bool,
    pub build: BuildParams,
    pub indexes: Vec<ManifestIndex>,
}

impl BuildManifest {
    /// Read a manifest written by a previous build.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| NewsIndexError::corruption(path, e.to_string()))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Outcome of [`IndexBuilder::run`].
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub manifest: BuildManifest,
    pub manifest_path: PathBuf,
    pub elapsed_ms: u64,
}

/// Builds the three indexes from the article store.
pub struct IndexBuilder {
    index_dir: PathBuf,
    model: String,
    embedding_dim: usize,
    batch_size: usize,
    prompts: PromptConvention,
    params: BuildParams,
    config: PipelineConfig,
}

impl IndexBuilder {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            index_dir: config.index.dir.clone(),
            model: config.embedding.model.clone(),
            embedding_dim: config.embedding.dimensions,
            batch_size: config.embedding.batch_size.max(1),
            prompts: config.embedding.prompts.clone(),
            params: config.index.build.clone(),
            config: config.clone(),
        }
    }

    /// Embed every article, quantize, build, and save all artifacts.
    ///
    /// # Errors
    ///
    /// - `NewsIndexError::InvalidInput` if the store holds no articles
    /// - `NewsIndexError::Encoding` if the embedder fails
    /// - `NewsIndexError::DataCorruption` if a reused calibration file is
    ///   unreadable or has the wrong dimensionality
    pub async fn run(
        &self,
        store: &ArticleStore,
        embedder: &dyn Embedder,
        options: BuildOptions,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        fs::create_dir_all(&self.index_dir)?;

        let articles = store.article_texts()?;
        if articles.is_empty() {
            return Err(NewsIndexError::invalid("no articles to index; run ingest first"));
        }
        let (ids, texts): (Vec<String>, Vec<String>) = articles.into_iter().unzip();
        if embedder.dimensions() != self.embedding_dim {
            return Err(NewsIndexError::Config(format!(
                "embedder produces {}-dim vectors, config expects {}",
                embedder.dimensions(),
                self.embedding_dim
            )));
        }

        let embeddings = self
            .embed_passages(embedder, &texts)
            .instrument(job_span(JobType::EmbeddingGeneration, &self.model))
            .await?;

        let keys: Vec<HashedKey> = ids.iter().map(|id| hash_id(id)).collect();
        let calibration = self.calibration(&embeddings, options)?;

        let staged = match self.stage(&keys, &embeddings, &calibration) {
            Ok(staged) => staged,
            Err(err) => {
                self.discard_staged();
                return Err(err);
            }
        };
        for (from, to) in &staged.moves {
            fs::rename(from, to)?;
        }

        let manifest = BuildManifest {
            built_at: Utc::now(),
            model: self.model.clone(),
            embedding_dim: self.embedding_dim,
            articles: ids.len(),
            calibration_file: crate::config::CALIBRATION_FILE.to_string(),
            calibration_blake3: calibration.digest,
            calibration_fitted: calibration.fitted,
            build: self.params.clone(),
            indexes: staged.indexes,
        };
        let manifest_path = self.config.manifest_path();
        manifest.save(&manifest_path)?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            articles = manifest.articles,
            calibration_fitted = manifest.calibration_fitted,
            elapsed_ms,
            "index build complete"
        );
        Ok(BuildReport {
            manifest,
            manifest_path,
            elapsed_ms,
        })
    }

    async fn embed_passages(&self, embedder: &dyn Embedder, texts: &[String]) -> Result<EmbeddingMatrix> {
        let mut embeddings = EmbeddingMatrix::with_cols(self.embedding_dim);
        for (batch_number, batch) in texts.chunks(self.batch_size).enumerate() {
            let matrix = embedder.embed(self.prompts.passage(batch)).await?;
            check_shape(&matrix, batch.len(), self.embedding_dim)?;
            embeddings.extend(&matrix)?;

            if (batch_number + 1) % 100 == 0 {
                info!(embedded = embeddings.rows(), total = texts.len(), "embedding progress");
            }
        }
        record_job(Some(embeddings.rows()), "success");
        Ok(embeddings)
    }

    /// Reuse the calibration on disk or fit a new one.
    ///
    /// Fitted ranges are not written here; [`IndexBuilder::stage`] writes
    /// them next to the indexes built from them.
    fn calibration(&self, embeddings: &EmbeddingMatrix, options: BuildOptions) -> Result<Calibration> {
        let span = job_span(JobType::Calibration, crate::config::CALIBRATION_FILE);
        let _guard = span.enter();
        let path = self.config.calibration_path();

        if path.exists() && !options.recalibrate {
            let (ranges, digest) = CalibrationRange::load_with_digest(&path)?;
            if ranges.dim() != self.embedding_dim {
                return Err(NewsIndexError::corruption(
                    &path,
                    format!(
                        "calibration covers {} dimensions, embeddings have {}; rebuild with --recalibrate",
                        ranges.dim(),
                        self.embedding_dim
                    ),
                ));
            }
            info!(path = %path.display(), "reusing frozen calibration");
            record_job(None, "reused");
            return Ok(Calibration {
                ranges,
                digest,
                fitted: false,
            });
        }

        if options.recalibrate && path.exists() {
            warn!(path = %path.display(), "replacing calibration; all indexes are rebuilt");
        }
        let ranges = CalibrationRange::fit(embeddings)?;
        info!(samples = embeddings.rows(), "fitted calibration");
        record_job(Some(embeddings.rows()), "fitted");
        Ok(Calibration {
            digest: ranges.digest(),
            ranges,
            fitted: true,
        })
    }

    /// Build all three indexes and write every new artifact to its staged path.
    fn stage(&self, keys: &[HashedKey], embeddings: &EmbeddingMatrix, calibration: &Calibration) -> Result<StagedBuild> {
        let mut moves = Vec::with_capacity(Precision::ALL.len() + 1);

        if calibration.fitted {
            let target = self.config.calibration_path();
            let staged = staged_path(&target);
            calibration.ranges.save(&staged)?;
            moves.push((staged, target));
        }

        let mut indexes = Vec::with_capacity(Precision::ALL.len());
        for precision in Precision::ALL {
            let spec = self.config.index_spec(precision);
            let mut index = AnyIndex::new(spec)?;
            {
                let span = job_span(JobType::IndexBuild, precision.as_str());
                let _guard = span.enter();
                match &mut index {
                    AnyIndex::Float32(inner) => inner.add(keys, embeddings.as_slice())?,
                    AnyIndex::Int8(inner) => {
                        inner.add(keys, quantize_int8(embeddings, &calibration.ranges)?.as_slice())?
                    }
                    AnyIndex::Binary(inner) => inner.add(keys, quantize_binary(embeddings).as_slice())?,
                }
                index.build_graph(&self.params)?;
                record_job(Some(index.len()), "success");
            }

            let target = self.config.index_path(precision);
            let staged = staged_path(&target);
            {
                let span = job_span(JobType::IndexSave, precision.as_str());
                let _guard = span.enter();
                index.save(&staged, &self.params)?;
                record_job(Some(index.len()), "staged");
            }
            moves.push((staged, target));
            indexes.push(manifest_entry(&index, spec, spec.file_name()));
        }

        Ok(StagedBuild { moves, indexes })
    }

    /// Remove staged artifacts left by a failed run.
    fn discard_staged(&self) {
        let targets = std::iter::once(self.config.calibration_path())
            .chain(Precision::ALL.into_iter().map(|p| self.config.index_path(p)));
        for target in targets {
            let staged = staged_path(&target);
            if staged.is_file() {
                match fs::remove_file(&staged) {
                    Ok(()) => debug!(path = %staged.display(), "discarded staged artifact"),
                    Err(err) => warn!(path = %staged.display(), error = %err, "could not discard staged artifact"),
                }
            }
        }
    }
}

/// Ranges used for this run and the digest the manifest records.
struct Calibration {
    ranges: CalibrationRange,
    digest: String,
    fitted: bool,
}

/// Artifacts written to staged paths, with the renames that publish them.
struct StagedBuild {
    /// `(staged, live)` pairs; the calibration, if refitted, comes first
    moves: Vec<(PathBuf, PathBuf)>,
    indexes: Vec<ManifestIndex>,
}

/// Path a build writes `path` to before publishing it.
pub(crate) fn staged_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".next");
    path.with_file_name(name)
}

fn manifest_entry(index: &AnyIndex, spec: IndexSpec, file: String) -> ManifestIndex {
    ManifestIndex {
        precision: spec.precision,
        file,
        dim: spec.dim,
        vectors: index.len(),
        has_graph: index.has_graph(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbedRequest;
    use crate::types::ArticleRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Embeds a text as the normalized byte histogram of its first 4 bytes.
    struct ByteEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for ByteEmbedder {
        async fn embed(&self, request: EmbedRequest<'_>) -> Result<EmbeddingMatrix> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.prefix, "passage: ");
            let rows = request
                .texts
                .iter()
                .map(|t| {
                    let mut v: Vec<f32> = t.bytes().take(4).map(|b| b as f32 - 100.0).collect();
                    v.resize(4, 1.0);
                    v
                })
                .collect();
            let mut matrix = EmbeddingMatrix::from_rows(rows)?;
            matrix.normalize_rows();
            Ok(matrix)
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    fn config(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.index.dir = dir.join("indexes");
        config.embedding.dimensions = 4;
        config.embedding.batch_size = 2;
        config
    }

    fn store_with(texts: &[&str]) -> ArticleStore {
        let store = ArticleStore::open_in_memory().unwrap();
        let records: Vec<ArticleRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| ArticleRecord {
                id: format!("article-{}", i),
                text: text.to_string(),
                ..ArticleRecord::default()
            })
            .collect();
        store.ingest_articles(&records).unwrap();
        store
    }

    #[tokio::test]
    async fn test_build_writes_all_artifacts() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let store = store_with(&["abcd", "zyxw", "mnop", "AbCd", "qrst"]);
        let embedder = ByteEmbedder {
            calls: AtomicUsize::new(0),
        };

        let report = IndexBuilder::new(&config)
            .run(&store, &embedder, BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.manifest.articles, 5);
        assert!(report.manifest.calibration_fitted);
        assert_eq!(report.manifest.indexes.len(), 3);
        assert_eq!(report.manifest.indexes[2].dim, 1);
        for precision in Precision::ALL {
            assert!(config.index_path(precision).exists());
        }
        assert!(config.calibration_path().exists());
        assert!(!staged_path(&config.calibration_path()).exists());
        assert_eq!(BuildManifest::load(&report.manifest_path).unwrap(), report.manifest);
        assert_eq!(
            report.manifest.calibration_blake3,
            CalibrationRange::load_with_digest(config.calibration_path()).unwrap().1
        );
    }

    #[tokio::test]
    async fn test_failed_recalibration_keeps_previous_build() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let embedder = ByteEmbedder {
            calls: AtomicUsize::new(0),
        };
        let builder = IndexBuilder::new(&config);
        builder
            .run(&store_with(&["abcd", "efgh"]), &embedder, BuildOptions::default())
            .await
            .unwrap();

        let snapshot = |path: PathBuf| fs::read(path).unwrap();
        let calibration_before = snapshot(config.calibration_path());
        let int8_before = snapshot(config.index_path(Precision::Int8));
        let manifest_before = snapshot(config.manifest_path());

        // The binary index is staged last; block its staged path.
        fs::create_dir_all(staged_path(&config.index_path(Precision::Binary))).unwrap();
        let wider = store_with(&["abcd", "efgh", "~~~~", "!!!!"]);
        let err = builder
            .run(&wider, &embedder, BuildOptions { recalibrate: true })
            .await
            .unwrap_err();
        assert!(matches!(err, NewsIndexError::Io(_)), "{}", err);

        assert_eq!(snapshot(config.calibration_path()), calibration_before);
        assert_eq!(snapshot(config.index_path(Precision::Int8)), int8_before);
        assert_eq!(snapshot(config.manifest_path()), manifest_before);
        assert!(!staged_path(&config.calibration_path()).exists());
        assert!(!staged_path(&config.index_path(Precision::Float32)).exists());
        assert!(!staged_path(&config.index_path(Precision::Int8)).exists());

        // Once unblocked, the recalibrating run publishes everything.
        fs::remove_dir(staged_path(&config.index_path(Precision::Binary))).unwrap();
        let refit = builder
            .run(&wider, &embedder, BuildOptions { recalibrate: true })
            .await
            .unwrap();
        assert_ne!(snapshot(config.calibration_path()), calibration_before);
        assert_ne!(snapshot(config.index_path(Precision::Int8)), int8_before);
        assert_eq!(
            refit.manifest.calibration_blake3,
            CalibrationRange::load_with_digest(config.calibration_path()).unwrap().1
        );
    }

    #[tokio::test]
    async fn test_calibration_is_frozen_unless_requested() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let embedder = ByteEmbedder {
            calls: AtomicUsize::new(0),
        };
        let builder = IndexBuilder::new(&config);

        let first = builder
            .run(&store_with(&["abcd", "efgh"]), &embedder, BuildOptions::default())
            .await
            .unwrap();
        let wider = store_with(&["abcd", "efgh", "~~~~", "!!!!"]);

        let reused = builder.run(&wider, &embedder, BuildOptions::default()).await.unwrap();
        assert!(!reused.manifest.calibration_fitted);
        assert_eq!(reused.manifest.calibration_blake3, first.manifest.calibration_blake3);

        let refit = builder
            .run(&wider, &embedder, BuildOptions { recalibrate: true })
            .await
            .unwrap();
        assert!(refit.manifest.calibration_fitted);
        assert_ne!(refit.manifest.calibration_blake3, first.manifest.calibration_blake3);
    }

    #[tokio::test]
    async fn test_empty_store_is_invalid_input() {
        let dir = tempdir().unwrap();
        let embedder = ByteEmbedder {
            calls: AtomicUsize::new(0),
        };
        let err = IndexBuilder::new(&config(dir.path()))
            .run(&ArticleStore::open_in_memory().unwrap(), &embedder, BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NewsIndexError::InvalidInput(_)));
    }
}
