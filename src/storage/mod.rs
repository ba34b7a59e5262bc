//! Relational article store (SQLite).
//!
//! Four tables: `Articles` (text and metadata), `Locations` (geomap),
//! `Article_Locations` (article to location links), and `Article_Vectors`
//! (article id to [`HashedKey`]). The last one is the bridge the search
//! path joins through.

pub mod locations;
pub mod schema;

pub use locations::{normalize_location, read_geomap};

use crate::keys::{extract_tld, hash_id, location_id, strip_uuid};
use crate::telemetry::{job_span, record_job, JobType};
use crate::types::error::{NewsIndexError, Result};
use crate::types::{ArticleHit, ArticleRecord, HashedKey, Location, Precision};
use rusqlite::{params, Connection};
use schema::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Counts from one ingest call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Articles inserted or replaced
    pub articles: usize,

    /// New article id to key mappings
    pub key_mappings: usize,

    /// New article to location links
    pub location_links: usize,
}

impl std::ops::AddAssign for IngestReport {
    fn add_assign(&mut self, other: Self) {
        self.articles += other.articles;
        self.key_mappings += other.key_mappings;
        self.location_links += other.location_links;
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub articles: u64,
    pub locations: u64,
    pub article_locations: u64,
    pub article_vectors: u64,
}

/// SQLite-backed article store.
///
/// The connection sits behind a mutex; each call holds it for one statement
/// or one transaction.
pub struct ArticleStore {
    conn: Mutex<Connection>,
}

impl ArticleStore {
    /// Open or create the store at `path` with WAL journaling.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened article store");
        Self::init(conn)
    }

    /// In-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| NewsIndexError::StorageState("article store connection poisoned".to_string()))
    }

    /// Insert geomap locations; existing `loc_normal`s are kept.
    ///
    /// Returns the number of new rows.
    pub fn insert_locations(&self, locations: &[Location]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(INSERT_LOCATION_SQL)?;
            for location in locations {
                inserted += stmt.execute(params![
                    location_id(&location.loc_normal),
                    location.loc_normal,
                    location.latitude,
                    location.longitude,
                    location.nuts,
                    location.gen,
                ])?;
            }
        }
        tx.commit()?;
        info!(rows = locations.len(), inserted, "inserted locations");
        Ok(inserted)
    }

    /// Ingest one batch of articles in a single transaction.
    ///
    /// Ids are stripped of their `<urn:uuid:...>` wrapper. Articles are
    /// inserted or replaced, key mappings and location links are only added
    /// if absent.
    pub fn ingest_articles(&self, records: &[ArticleRecord]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare_cached(UPSERT_ARTICLE_SQL)?;
            let mut map_key = tx.prepare_cached(MAP_KEY_SQL)?;
            let mut link = tx.prepare_cached(LINK_LOCATION_SQL)?;

            for record in records {
                let id = strip_uuid(&record.id);
                if id.is_empty() {
                    warn!(url = %record.url, "skipping article without id");
                    continue;
                }

                report.articles += upsert.execute(params![
                    id,
                    record.url,
                    record.excerpt,
                    record.title,
                    record.text,
                    record.tags,
                    record.categories,
                    record.hostname,
                    extract_tld(&record.hostname),
                    record.date,
                    record.date_crawled,
                ])?;

                report.key_mappings += map_key.execute(params![id, hash_id(id).as_i64()])?;

                if let Some(raw) = record.loc_normal.as_deref() {
                    let loc_normal = normalize_location(raw);
                    if !loc_normal.is_empty() {
                        report.location_links += link.execute(params![id, loc_normal])?;
                    }
                }
            }
        }
        tx.commit()?;
        debug!(
            articles = report.articles,
            key_mappings = report.key_mappings,
            location_links = report.location_links,
            "ingested article batch"
        );
        Ok(report)
    }

    /// Ingest a JSON-lines file in batches of `batch_size`.
    pub fn ingest_jsonl(&self, path: impl AsRef<Path>, batch_size: usize) -> Result<IngestReport> {
        let path = path.as_ref();
        let span = job_span(JobType::Ingest, &path.display().to_string());
        let _guard = span.enter();

        let mut total = IngestReport::default();
        let mut batch = Vec::with_capacity(batch_size);

        for record in read_jsonl(path)? {
            batch.push(record?);
            if batch.len() >= batch_size.max(1) {
                total += self.ingest_articles(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            total += self.ingest_articles(&batch)?;
        }

        info!(
            path = %path.display(),
            articles = total.articles,
            location_links = total.location_links,
            "ingested articles"
        );
        record_job(Some(total.articles), "success");
        Ok(total)
    }

    /// Record that `article_id` is indexed under `key`. No-op if mapped.
    pub fn map_key(&self, article_id: &str, key: HashedKey) -> Result<bool> {
        let conn = self.conn()?;
        Ok(conn.execute(MAP_KEY_SQL, params![article_id, key.as_i64()])? > 0)
    }

    /// All `(id, text)` pairs ordered by id.
    pub fn article_texts(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, COALESCE(text, '') FROM Articles ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Join ranked index hits back to their articles.
    ///
    /// The distinct keys go into a per-connection temp table and one `IN`
    /// query joins them to their articles, so any `k` is a single lookup.
    /// Output follows the order of `hits`; articles sharing a key come out
    /// together, ordered by id. Keys with no mapped article are dropped.
    pub fn lookup_hits(&self, hits: &[(HashedKey, f32)], precision: Precision) -> Result<Vec<ArticleHit>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::with_capacity(hits.len());
        let distinct: Vec<HashedKey> = hits
            .iter()
            .map(|&(key, _)| key)
            .filter(|key| seen.insert(*key))
            .collect();

        let mut by_key: HashMap<HashedKey, Vec<ArticleRow>> = HashMap::with_capacity(distinct.len());
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            tx.execute_batch(QUERY_KEYS_SQL)?;
            {
                let mut insert = tx.prepare_cached(INSERT_QUERY_KEY_SQL)?;
                for key in &distinct {
                    insert.execute([key.as_i64()])?;
                }

                let mut stmt = tx.prepare_cached(LOOKUP_HITS_SQL)?;
                let rows = stmt.query_map([], |row| {
                    Ok(ArticleRow {
                        text: row.get(0)?,
                        id: row.get(1)?,
                        date_crawled: row.get(2)?,
                        hostname: row.get(3)?,
                        title: row.get(4)?,
                        hashed_id: row.get(5)?,
                    })
                })?;
                for row in rows {
                    let row = row?;
                    let key = HashedKey::from_i64(row.hashed_id).map_err(|e| {
                        NewsIndexError::StorageState(format!("malformed Article_Vectors row {}: {}", row.id, e))
                    })?;
                    by_key.entry(key).or_default().push(row);
                }
            }
            tx.execute(CLEAR_QUERY_KEYS_SQL, [])?;
            tx.commit()?;
        }

        let mut out = Vec::with_capacity(hits.len());
        for &(key, distance) in hits {
            let Some(mut rows) = by_key.remove(&key) else {
                continue;
            };
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            out.extend(rows.into_iter().map(|row| ArticleHit {
                key,
                distance,
                precision,
                id: row.id,
                title: row.title,
                text: row.text,
                hostname: row.hostname,
                date_crawled: row.date_crawled,
            }));
        }
        Ok(out)
    }

    /// Row counts per table.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(StoreStats {
            articles: count("Articles")?,
            locations: count("Locations")?,
            article_locations: count("Article_Locations")?,
            article_vectors: count("Article_Vectors")?,
        })
    }
}

struct ArticleRow {
    text: Option<String>,
    id: String,
    date_crawled: Option<String>,
    hostname: Option<String>,
    title: Option<String>,
    hashed_id: i64,
}

/// Stream article records from a JSON-lines file, skipping blank lines.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<impl Iterator<Item = Result<ArticleRecord>>> {
    let path = path.as_ref().to_path_buf();
    let reader = BufReader::new(File::open(&path)?);

    Ok(reader
        .lines()
        .enumerate()
        .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(move |(number, line)| {
            let line = line?;
            serde_json::from_str::<ArticleRecord>(&line).map_err(|e| {
                NewsIndexError::invalid(format!("{}:{}: {}", path.display(), number + 1, e))
            })
        }))
}
