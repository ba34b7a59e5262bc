//! Location normalization and geomap loading.

use crate::types::error::{NewsIndexError, Result};
use crate::types::Location;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Columns a geomap CSV must provide.
pub const GEOMAP_COLUMNS: [&str; 5] = ["loc_normal", "latitude", "longitude", "NUTS", "GEN"];

fn disallowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zäöüß ']").expect("static location pattern"))
}

/// Normalize a location mention for matching against the geomap.
///
/// Lowercases, drops everything outside `[a-zäöüß ']`, and trims.
pub fn normalize_location(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    disallowed_chars().replace_all(&lowered, "").trim().to_string()
}

/// Read a geomap CSV with the [`GEOMAP_COLUMNS`] header.
///
/// # Errors
///
/// Returns `NewsIndexError::InvalidInput` if a required column is missing and
/// `NewsIndexError::Csv` on malformed rows
pub fn read_geomap(path: impl AsRef<Path>) -> Result<Vec<Location>> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;

    let headers = reader.headers()?.clone();
    let missing: Vec<&str> = GEOMAP_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();
    if !missing.is_empty() {
        return Err(NewsIndexError::invalid(format!(
            "geomap {} is missing columns: {}",
            path.as_ref().display(),
            missing.join(", ")
        )));
    }

    reader
        .deserialize::<Location>()
        .map(|row| row.map_err(NewsIndexError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_location() {
        assert_eq!(normalize_location("  Köln-Mülheim! "), "kölnmülheim");
        assert_eq!(normalize_location("BAD TÖLZ"), "bad tölz");
        assert_eq!(normalize_location("Hof's 2024"), "hof's");
        assert_eq!(normalize_location("Straße"), "straße");
        assert_eq!(normalize_location(""), "");
    }

    #[test]
    fn test_read_geomap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geomap.csv");
        std::fs::write(
            &path,
            "loc_normal,latitude,longitude,NUTS,GEN,extra\n\
             köln,50.9375,6.9603,DEA23,Köln,x\n\
             bad tölz,47.7603,11.5579,DE21D,Bad Tölz,y\n",
        )
        .unwrap();

        let locations = read_geomap(&path).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].loc_normal, "köln");
        assert_eq!(locations[1].nuts, "DE21D");
        assert_eq!(locations[1].gen, "Bad Tölz");
    }

    #[test]
    fn test_missing_columns_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geomap.csv");
        std::fs::write(&path, "loc_normal,latitude,longitude\nköln,50.9,6.9\n").unwrap();

        let err = read_geomap(&path).unwrap_err();
        assert!(matches!(err, NewsIndexError::InvalidInput(ref msg) if msg.contains("NUTS, GEN")));
    }
}
