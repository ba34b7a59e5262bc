//! On-disk format for vector indexes.
//!
//! # File Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (64 bytes)                                       │
//! │   Magic: "NEWSIDX\0" (8 bytes)                          │
//! │   Version: u32                                          │
//! │   Precision: u8 | Metric: u8 | Flags: u8 | pad: u8      │
//! │   Dimensionality: u32                                   │
//! │   Count: u64                                            │
//! │   Medoid: u32                                           │
//! │   Search list size: u32                                 │
//! │   Keys offset: u64                                      │
//! │   Vectors offset: u64                                   │
//! │   Graph offset: u64 (0 = no graph)                      │
//! │   Reserved: [u8; 4]                                     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Keys: [u64; count]                                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Vectors: [[elem; dim]; count]                           │
//! ├─────────────────────────────────────────────────────────┤
//! │ Graph (CSR, optional)                                   │
//! │   Offsets: [u32; count + 1]                             │
//! │   Edges: [u32; offsets[count]]                          │
//! ├─────────────────────────────────────────────────────────┤
//! │ BLAKE3 of everything above (32 bytes)                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Files are written to a `.tmp` sibling and
//! renamed into place, so readers never observe a half-written index.

use crate::index::element::Element;
use crate::index::graph::CsrGraph;
use crate::index::vector::{IndexGraph, VectorIndex};
use crate::types::error::{NewsIndexError, Result};
use crate::types::{HashedKey, Metric, Precision};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Magic number for file format validation.
const MAGIC: &[u8; 8] = b"NEWSIDX\0";

/// Current file format version.
pub const VERSION: u32 = 1;

/// Header size in bytes.
const HEADER_SIZE: usize = 64;

/// Checksum trailer size in bytes.
const CHECKSUM_SIZE: usize = 32;

const FLAG_GRAPH: u8 = 0b0000_0001;

/// Index file header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    /// File format version
    pub version: u32,

    /// Element precision
    pub precision: Precision,

    /// Distance metric
    pub metric: Metric,

    /// Vector dimensionality
    pub dim: u32,

    /// Number of vectors
    pub count: u64,

    /// Whether a graph section is present
    pub has_graph: bool,

    /// Graph entry point (0 without graph)
    pub medoid: u32,

    /// Query beam width (0 without graph)
    pub search_list_size: u32,

    /// Byte offset of the key section
    pub keys_offset: u64,

    /// Byte offset of the vector section
    pub vectors_offset: u64,

    /// Byte offset of the graph section (0 without graph)
    pub graph_offset: u64,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(MAGIC);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12] = self.precision.to_tag();
        bytes[13] = self.metric.to_tag();
        bytes[14] = if self.has_graph { FLAG_GRAPH } else { 0 };
        bytes[16..20].copy_from_slice(&self.dim.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.count.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.medoid.to_le_bytes());
        bytes[32..36].copy_from_slice(&self.search_list_size.to_le_bytes());
        bytes[36..44].copy_from_slice(&self.keys_offset.to_le_bytes());
        bytes[44..52].copy_from_slice(&self.vectors_offset.to_le_bytes());
        bytes[52..60].copy_from_slice(&self.graph_offset.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < HEADER_SIZE {
            return Err("file too small for header".to_string());
        }
        if &bytes[0..8] != MAGIC {
            return Err(format!("invalid magic bytes {:?}", &bytes[0..8]));
        }

        let version = read_u32(bytes, 8);
        if version != VERSION {
            return Err(format!(
                "unsupported version: expected {}, got {}",
                VERSION, version
            ));
        }

        let precision = Precision::from_tag(bytes[12])
            .ok_or_else(|| format!("unknown precision tag {}", bytes[12]))?;
        let metric = Metric::from_tag(bytes[13])
            .ok_or_else(|| format!("unknown metric tag {}", bytes[13]))?;
        if metric != precision.metric() {
            return Err(format!("{} index cannot use metric {}", precision, metric));
        }

        Ok(Self {
            version,
            precision,
            metric,
            has_graph: bytes[14] & FLAG_GRAPH != 0,
            dim: read_u32(bytes, 16),
            count: read_u64(bytes, 20),
            medoid: read_u32(bytes, 28),
            search_list_size: read_u32(bytes, 32),
            keys_offset: read_u64(bytes, 36),
            vectors_offset: read_u64(bytes, 44),
            graph_offset: read_u64(bytes, 52),
        })
    }
}

/// Write `index` to `path` atomically.
pub fn write_index<E: Element>(path: &Path, index: &VectorIndex<E>) -> Result<()> {
    let count = index.len() as u64;
    let keys_offset = HEADER_SIZE as u64;
    let vectors_offset = keys_offset + count * 8;
    let graph_offset = vectors_offset + (index.raw_vectors().len() * E::SIZE) as u64;
    let graph = index.graph();

    let header = Header {
        version: VERSION,
        precision: E::PRECISION,
        metric: E::metric(),
        dim: index.dim() as u32,
        count,
        has_graph: graph.is_some(),
        medoid: graph.map_or(0, |g| g.medoid),
        search_list_size: graph.map_or(0, |g| g.search_list_size as u32),
        keys_offset,
        vectors_offset,
        graph_offset: if graph.is_some() { graph_offset } else { 0 },
    };

    let tmp_path = tmp_sibling(path);
    let file = File::create(&tmp_path)?;
    let mut writer = HashingWriter::new(BufWriter::new(file));

    writer.write_all(&header.to_bytes())?;
    for key in index.keys() {
        writer.write_all(&key.get().to_le_bytes())?;
    }

    let mut chunk = Vec::with_capacity(64 * 1024);
    for values in index.raw_vectors().chunks(64 * 1024 / E::SIZE) {
        chunk.clear();
        values.iter().for_each(|&v| v.write_le(&mut chunk));
        writer.write_all(&chunk)?;
    }

    if let Some(graph) = graph {
        for &offset in graph.csr.offsets.iter().chain(graph.csr.edges.iter()) {
            writer.write_all(&offset.to_le_bytes())?;
        }
    }

    let (mut inner, checksum) = writer.finish();
    inner.write_all(checksum.as_bytes())?;
    inner.flush()?;
    inner.get_ref().sync_all()?;
    drop(inner);

    std::fs::rename(&tmp_path, path)?;
    info!(
        path = %path.display(),
        precision = %E::PRECISION,
        vectors = count,
        has_graph = graph.is_some(),
        "saved vector index"
    );
    Ok(())
}

/// Read and validate the header of an index file.
pub fn read_header(path: &Path) -> Result<Header> {
    let mmap = map_verified(path)?;
    Header::from_bytes(&mmap).map_err(|reason| NewsIndexError::corruption(path, reason))
}

/// Load an index of element type `E` from `path`.
pub fn read_index<E: Element>(path: &Path) -> Result<VectorIndex<E>> {
    let mmap = map_verified(path)?;
    let corrupt = |reason: String| NewsIndexError::corruption(path, reason);

    let header = Header::from_bytes(&mmap).map_err(corrupt)?;
    if header.precision != E::PRECISION {
        return Err(corrupt(format!(
            "file holds a {} index, expected {}",
            header.precision,
            E::PRECISION
        )));
    }

    let body = &mmap[..mmap.len() - CHECKSUM_SIZE];
    let count = usize::try_from(header.count).map_err(|_| corrupt("count overflows".to_string()))?;
    let dim = header.dim as usize;

    let keys_bytes = section(body, header.keys_offset, count.checked_mul(8))
        .ok_or_else(|| corrupt("key section out of bounds".to_string()))?;
    let keys = keys_bytes
        .chunks_exact(8)
        .map(|b| HashedKey::new(read_u64(b, 0)))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| corrupt(e.to_string()))?;

    let vector_len = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(E::SIZE));
    let vector_bytes = section(body, header.vectors_offset, vector_len)
        .ok_or_else(|| corrupt("vector section out of bounds".to_string()))?;
    let vectors: Vec<E> = vector_bytes.chunks_exact(E::SIZE).map(E::read_le).collect();

    let mut end = header.vectors_offset as usize + vector_bytes.len();
    let graph = if header.has_graph {
        let offsets_bytes = section(body, header.graph_offset, (count + 1).checked_mul(4))
            .ok_or_else(|| corrupt("graph offsets out of bounds".to_string()))?;
        let offsets: Vec<u32> = offsets_bytes.chunks_exact(4).map(|b| read_u32(b, 0)).collect();
        let num_edges = offsets.last().copied().unwrap_or(0) as usize;
        let edges_offset = header.graph_offset + offsets_bytes.len() as u64;
        let edges_bytes = section(body, edges_offset, num_edges.checked_mul(4))
            .ok_or_else(|| corrupt("graph edges out of bounds".to_string()))?;
        let edges: Vec<u32> = edges_bytes.chunks_exact(4).map(|b| read_u32(b, 0)).collect();
        end = edges_offset as usize + edges_bytes.len();

        Some(IndexGraph {
            csr: CsrGraph { offsets, edges },
            medoid: header.medoid,
            search_list_size: header.search_list_size as usize,
        })
    } else {
        None
    };

    if end != body.len() {
        return Err(corrupt(format!(
            "{} trailing bytes after last section",
            body.len().saturating_sub(end)
        )));
    }

    let index = VectorIndex::from_parts(dim, keys, vectors, graph).map_err(corrupt)?;
    info!(
        path = %path.display(),
        precision = %E::PRECISION,
        vectors = index.len(),
        "loaded vector index"
    );
    Ok(index)
}

/// Map `path` and check its checksum trailer.
fn map_verified(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: the mapping is read-only and index files are only replaced by
    // rename, never modified in place
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(NewsIndexError::corruption(path, "file too small"));
    }
    let (body, trailer) = mmap.split_at(mmap.len() - CHECKSUM_SIZE);
    if blake3::hash(body).as_bytes() != trailer {
        return Err(NewsIndexError::corruption(path, "checksum mismatch"));
    }
    Ok(mmap)
}

fn section(body: &[u8], offset: u64, len: Option<usize>) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(len?)?;
    body.get(start..end)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
        }
    }

    fn finish(self) -> (W, blake3::Hash) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::BuildParams;
    use tempfile::tempdir;

    fn sample_index() -> VectorIndex<i8> {
        let mut index = VectorIndex::<i8>::new(4).unwrap();
        let keys: Vec<HashedKey> = (1..=5).map(|k| HashedKey::new(k * 1000).unwrap()).collect();
        let vectors: Vec<i8> = (0..20).map(|i| (i * 13 % 256 - 128) as i8).collect();
        index.add(&keys, &vectors).unwrap();
        index
    }

    #[test]
    fn test_header_serialization() {
        let header = Header {
            version: VERSION,
            precision: Precision::Binary,
            metric: Metric::Hamming,
            dim: 128,
            count: 1000,
            has_graph: true,
            medoid: 42,
            search_list_size: 100,
            keys_offset: 64,
            vectors_offset: 8064,
            graph_offset: 136_064,
        };
        let decoded = Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_rejects_metric_mismatch() {
        let mut bytes = Header {
            version: VERSION,
            precision: Precision::Int8,
            metric: Metric::InnerProduct,
            dim: 4,
            count: 0,
            has_graph: false,
            medoid: 0,
            search_list_size: 0,
            keys_offset: 64,
            vectors_offset: 64,
            graph_offset: 0,
        }
        .to_bytes();
        bytes[13] = Metric::Cosine.to_tag();
        assert!(Header::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_roundtrip_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("news_int8.idx");
        let index = sample_index();

        write_index(&path, &index).unwrap();
        let loaded: VectorIndex<i8> = read_index(&path).unwrap();

        assert_eq!(loaded.keys(), index.keys());
        assert_eq!(loaded.raw_vectors(), index.raw_vectors());
        assert!(!tmp_sibling(&path).exists());
    }

    #[test]
    fn test_roundtrip_with_graph() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("news_f32.idx");

        let mut index = VectorIndex::<f32>::new(2).unwrap();
        let keys: Vec<HashedKey> = (0..40).map(|k| HashedKey::new(k + 7).unwrap()).collect();
        let vectors: Vec<f32> = (0..40)
            .flat_map(|i| {
                let angle = i as f32 * 0.15;
                [angle.cos(), angle.sin()]
            })
            .collect();
        index.add(&keys, &vectors).unwrap();
        let params = BuildParams {
            max_degree: 4,
            search_list_size: 8,
            ..BuildParams::default()
        };
        index.save(&path, &params).unwrap();

        let loaded: VectorIndex<f32> = read_index(&path).unwrap();
        assert_eq!(loaded.graph(), index.graph());
        assert!(loaded.graph().is_some());
    }

    #[test]
    fn test_wrong_precision_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("news_int8.idx");
        write_index(&path, &sample_index()).unwrap();

        let err = read_index::<f32>(&path).unwrap_err();
        assert!(matches!(err, NewsIndexError::DataCorruption { .. }));
    }

    #[test]
    fn test_flipped_byte_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("news_int8.idx");
        write_index(&path, &sample_index()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 3] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = read_index::<i8>(&path).unwrap_err();
        assert!(matches!(err, NewsIndexError::DataCorruption { .. }));
    }

    #[test]
    fn test_truncated_file_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.idx");
        std::fs::write(&path, b"NEWSIDX\0").unwrap();

        let err = read_header(&path).unwrap_err();
        assert!(matches!(err, NewsIndexError::DataCorruption { .. }));
    }
}
