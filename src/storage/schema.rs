//! SQLite schema.

/// Tables and indexes, created if absent.
///
/// `Article_Vectors.hashed_id` is indexed but not unique: two ids hashing to
/// the same key both keep their mapping row and are returned together.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS Articles (
    id TEXT PRIMARY KEY,
    url TEXT,
    excerpt TEXT,
    title TEXT,
    text TEXT,
    tags TEXT,
    categories TEXT,
    hostname TEXT,
    tld TEXT,
    date TEXT,
    date_crawled TEXT
);

CREATE TABLE IF NOT EXISTS Locations (
    location_id INTEGER PRIMARY KEY,
    loc_normal TEXT UNIQUE,
    latitude REAL,
    longitude REAL,
    NUTS TEXT,
    GEN TEXT
);

CREATE TABLE IF NOT EXISTS Article_Locations (
    article_id TEXT NOT NULL REFERENCES Articles(id),
    location_id INTEGER NOT NULL REFERENCES Locations(location_id),
    PRIMARY KEY (article_id, location_id)
);

CREATE TABLE IF NOT EXISTS Article_Vectors (
    article_id TEXT PRIMARY KEY,
    hashed_id INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_article_vectors_hashed_id
    ON Article_Vectors(hashed_id);
";

/// Per-connection scratch table holding the keys of one lookup.
///
/// Binding keys through a table keeps the lookup a single statement for any
/// `k`; an `IN (?, ?, ...)` list tops out at SQLite's variable limit.
pub const QUERY_KEYS_SQL: &str = "
CREATE TEMP TABLE IF NOT EXISTS query_keys (
    hashed_id INTEGER PRIMARY KEY
);
DELETE FROM temp.query_keys;
";

pub const INSERT_QUERY_KEY_SQL: &str = "
INSERT OR IGNORE INTO temp.query_keys (hashed_id) VALUES (?1)
";

pub const CLEAR_QUERY_KEYS_SQL: &str = "DELETE FROM temp.query_keys";

/// Search join over the keys in `temp.query_keys`.
pub const LOOKUP_HITS_SQL: &str = "
SELECT a.text, a.id, a.date_crawled, a.hostname, a.title, av.hashed_id
FROM Articles a
JOIN Article_Vectors av ON a.id = av.article_id
WHERE av.hashed_id IN (SELECT hashed_id FROM temp.query_keys)
";

pub const UPSERT_ARTICLE_SQL: &str = "
INSERT OR REPLACE INTO Articles (
    id, url, excerpt, title, text, tags, categories, hostname, tld, date, date_crawled
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
";

pub const MAP_KEY_SQL: &str = "
INSERT OR IGNORE INTO Article_Vectors (article_id, hashed_id) VALUES (?1, ?2)
";

pub const LINK_LOCATION_SQL: &str = "
INSERT OR IGNORE INTO Article_Locations (article_id, location_id)
SELECT ?1, location_id FROM Locations WHERE loc_normal = ?2
";

pub const INSERT_LOCATION_SQL: &str = "
INSERT OR IGNORE INTO Locations (location_id, loc_normal, latitude, longitude, NUTS, GEN)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";
