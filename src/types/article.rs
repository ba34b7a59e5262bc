//! Article, location, and search-hit records.
//!
//! `ArticleRecord` is the fixed schema emitted by the upstream extraction,
//! NER, and geocoding stages (one JSON object per line). `ArticleHit` is what
//! the search path returns after joining index keys back to the store.

use crate::types::{HashedKey, Precision};
use serde::{Deserialize, Deserializer, Serialize};

/// Article as produced by the upstream extraction stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArticleRecord {
    /// Raw identifier, possibly wrapped as `<urn:uuid:...>`
    pub id: String,

    /// Source URL
    #[serde(default)]
    pub url: String,

    /// Short excerpt or teaser
    #[serde(default, deserialize_with = "nullable_string")]
    pub excerpt: String,

    /// Headline
    #[serde(default, deserialize_with = "nullable_string")]
    pub title: String,

    /// Extracted body text
    #[serde(default, deserialize_with = "nullable_string")]
    pub text: String,

    /// Tags, flattened to a comma-separated string when given as a list
    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: String,

    /// Categories, flattened like `tags`
    #[serde(default, deserialize_with = "string_or_list")]
    pub categories: String,

    /// Publisher hostname
    #[serde(default, deserialize_with = "nullable_string")]
    pub hostname: String,

    /// Publication date as reported by the page
    #[serde(default)]
    pub date: Option<String>,

    /// Crawl date
    #[serde(default)]
    pub date_crawled: Option<String>,

    /// Location mention chosen by the NER/geocoding stage
    #[serde(default)]
    pub loc_normal: Option<String>,
}

/// Geocoded location from the geomap table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    /// Normalized place name
    pub loc_normal: String,

    /// Latitude (WGS84)
    pub latitude: f64,

    /// Longitude (WGS84)
    pub longitude: f64,

    /// NUTS region code
    #[serde(rename = "NUTS", default)]
    pub nuts: String,

    /// Municipality name
    #[serde(rename = "GEN", default)]
    pub gen: String,
}

/// Search hit enriched with article metadata.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArticleHit {
    /// Index key the hit was found under
    pub key: HashedKey,

    /// Distance reported by the index (smaller is closer)
    pub distance: f32,

    /// Index precision that produced the hit
    pub precision: Precision,

    /// Article identifier
    pub id: String,

    /// Headline
    pub title: Option<String>,

    /// Body text
    pub text: Option<String>,

    /// Publisher hostname
    pub hostname: Option<String>,

    /// Crawl date
    pub date_crawled: Option<String>,
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_list<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    })
}
