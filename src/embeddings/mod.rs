//! Embedding model boundary.
//!
//! The model is opaque: texts plus a prompt prefix and a normalize flag go in,
//! an [`EmbeddingMatrix`] comes out. Documents are encoded with the passage
//! prefix at build time and queries with the query prefix at search time.

pub mod openai;

pub use openai::HttpEmbedder;

use crate::types::error::{NewsIndexError, Result};
use crate::types::EmbeddingMatrix;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One encoding call.
#[derive(Debug, Clone, Copy)]
pub struct EmbedRequest<'a> {
    /// Texts to encode, one output row each
    pub texts: &'a [String],

    /// Prefix prepended to every text (e.g. `"query: "`)
    pub prefix: &'a str,

    /// L2-normalize each output row
    pub normalize: bool,
}

impl<'a> EmbedRequest<'a> {
    /// Texts with the prefix applied.
    pub fn prefixed_texts(&self) -> Vec<String> {
        self.texts
            .iter()
            .map(|text| format!("{}{}", self.prefix, text))
            .collect()
    }
}

/// Embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode `request.texts`, one row per text in input order.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::Encoding` if the model fails or returns the
    /// wrong number of rows
    async fn embed(&self, request: EmbedRequest<'_>) -> Result<EmbeddingMatrix>;

    /// Width of the produced embeddings.
    fn dimensions(&self) -> usize;
}

/// Asymmetric prompt prefixes for query and document encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConvention {
    pub query_prefix: String,
    pub passage_prefix: String,
}

impl Default for PromptConvention {
    fn default() -> Self {
        Self {
            query_prefix: "query: ".to_string(),
            passage_prefix: "passage: ".to_string(),
        }
    }
}

impl PromptConvention {
    /// Request for a search query.
    pub fn query<'a>(&'a self, texts: &'a [String]) -> EmbedRequest<'a> {
        EmbedRequest {
            texts,
            prefix: &self.query_prefix,
            normalize: true,
        }
    }

    /// Request for documents being indexed.
    pub fn passage<'a>(&'a self, texts: &'a [String]) -> EmbedRequest<'a> {
        EmbedRequest {
            texts,
            prefix: &self.passage_prefix,
            normalize: true,
        }
    }
}

/// Check that `matrix` has one `dim`-wide row per requested text.
pub(crate) fn check_shape(matrix: &EmbeddingMatrix, expected_rows: usize, dim: usize) -> Result<()> {
    if matrix.rows() != expected_rows {
        return Err(NewsIndexError::encoding(format!(
            "model returned {} embeddings for {} texts",
            matrix.rows(),
            expected_rows
        )));
    }
    if expected_rows > 0 && matrix.cols() != dim {
        return Err(NewsIndexError::encoding(format!(
            "model returned {}-dim embeddings, expected {}",
            matrix.cols(),
            dim
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_prefixes() {
        let prompts = PromptConvention::default();
        let texts = vec!["Hochwasser in Köln".to_string()];

        assert_eq!(prompts.query(&texts).prefixed_texts(), vec!["query: Hochwasser in Köln"]);
        assert_eq!(
            prompts.passage(&texts).prefixed_texts(),
            vec!["passage: Hochwasser in Köln"]
        );
        assert!(prompts.query(&texts).normalize);
    }

    #[test]
    fn test_check_shape() {
        let matrix = EmbeddingMatrix::new(2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        assert!(check_shape(&matrix, 2, 2).is_ok());
        assert!(matches!(
            check_shape(&matrix, 3, 2),
            Err(NewsIndexError::Encoding(_))
        ));
        assert!(check_shape(&matrix, 2, 4).is_err());
    }
}
