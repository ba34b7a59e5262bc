//! # newscrawl-index
//!
//! Multi-precision semantic search over a geo-tagged news corpus.
//!
//! ## Architecture
//!
//! - **Store**: [`storage::ArticleStore`], SQLite tables for articles,
//!   locations, and the article id to [`HashedKey`] mapping
//! - **Keys**: [`keys::hash_id`], SHA-256 reduced to 63 bits
//! - **Quantization**: [`quantize`], float32 to int8 (calibrated) and binary
//! - **Indexes**: [`index::AnyIndex`], float32/cosine, int8/inner product,
//!   binary/Hamming, each a Vamana graph over keyed vectors
//! - **Build**: [`pipeline::IndexBuilder`], embed, quantize, index, save
//! - **Search**: [`search::Searcher`], embed query, search one index, join
//!   hits back to articles
//!
//! ## Example
//!
//! ```rust,ignore
//! use newscrawl_index::{ArticleStore, HttpEmbedder, PipelineConfig, Precision, Searcher};
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::load("newsidx.yaml")?;
//! let store = Arc::new(ArticleStore::open(&config.database.path)?);
//! let embedder = Arc::new(HttpEmbedder::from_config(&config.embedding)?);
//! let searcher = Searcher::open(&config, embedder, store);
//!
//! for hit in searcher.search("Hochwasser am Rhein", Precision::Int8, 10).await? {
//!     println!("{:.3} {}", hit.distance, hit.title.unwrap_or_default());
//! }
//! ```

pub mod config;
pub mod embeddings;
pub mod index;
pub mod keys;
pub mod pipeline;
pub mod quantize;
pub mod search;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use config::PipelineConfig;
pub use embeddings::{EmbedRequest, Embedder, HttpEmbedder, PromptConvention};
pub use index::{AnyIndex, IndexSpec, QueryVector, SearchResult, VectorIndex};
pub use keys::hash_id;
pub use pipeline::{BuildManifest, BuildOptions, BuildReport, IndexBuilder};
pub use quantize::{quantize_binary, quantize_int8, CalibrationRange};
pub use search::Searcher;
pub use storage::ArticleStore;
pub use types::{ArticleHit, ArticleRecord, EmbeddingMatrix, HashedKey, Metric, NewsIndexError, Precision, Result};
