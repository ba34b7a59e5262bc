//! Save/load behaviour of the vector indexes and calibration file.

use newscrawl_index::index::{BuildParams, QueryVector};
use newscrawl_index::quantize::{quantize_binary_vector, quantize_int8_vector};
use newscrawl_index::{
    quantize_binary, quantize_int8, AnyIndex, CalibrationRange, EmbeddingMatrix, HashedKey,
    IndexSpec, NewsIndexError, Precision,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

const DIM: usize = 32;
const COUNT: usize = 400;

fn random_embeddings(seed: u64) -> EmbeddingMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f32> = (0..COUNT * DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let mut matrix = EmbeddingMatrix::new(DIM, data).unwrap();
    matrix.normalize_rows();
    matrix
}

fn keys() -> Vec<HashedKey> {
    (0..COUNT as u64).map(|i| HashedKey::new(i * 7919 + 1).unwrap()).collect()
}

fn params() -> BuildParams {
    BuildParams {
        max_degree: 16,
        search_list_size: 48,
        ..BuildParams::default()
    }
}

fn build_all(embeddings: &EmbeddingMatrix) -> (Vec<AnyIndex>, CalibrationRange) {
    let ranges = CalibrationRange::fit(embeddings).unwrap();
    let keys = keys();

    let mut f32_index = AnyIndex::new(IndexSpec::for_embedding(Precision::Float32, DIM)).unwrap();
    let mut int8_index = AnyIndex::new(IndexSpec::for_embedding(Precision::Int8, DIM)).unwrap();
    let mut binary_index = AnyIndex::new(IndexSpec::for_embedding(Precision::Binary, DIM)).unwrap();

    if let AnyIndex::Float32(index) = &mut f32_index {
        index.add(&keys, embeddings.as_slice()).unwrap();
    }
    if let AnyIndex::Int8(index) = &mut int8_index {
        index
            .add(&keys, quantize_int8(embeddings, &ranges).unwrap().as_slice())
            .unwrap();
    }
    if let AnyIndex::Binary(index) = &mut binary_index {
        index.add(&keys, quantize_binary(embeddings).as_slice()).unwrap();
    }

    (vec![f32_index, int8_index, binary_index], ranges)
}

fn query_for(precision: Precision, vector: &[f32], ranges: &CalibrationRange) -> QueryVector {
    match precision {
        Precision::Float32 => QueryVector::Float32(vector.to_vec()),
        Precision::Int8 => QueryVector::Int8(quantize_int8_vector(vector, ranges).unwrap()),
        Precision::Binary => QueryVector::Binary(quantize_binary_vector(vector)),
    }
}

#[test]
fn test_reload_gives_identical_results() {
    let dir = tempdir().unwrap();
    let embeddings = random_embeddings(7);
    let (mut indexes, ranges) = build_all(&embeddings);

    for index in &mut indexes {
        let spec = index.spec();
        let path = dir.path().join(spec.file_name());
        index.save(&path, &params()).unwrap();
        assert!(index.has_graph());

        let loaded = AnyIndex::load(&path, spec).unwrap();
        assert_eq!(loaded.len(), COUNT);
        assert!(loaded.has_graph());

        for probe in [0usize, 13, 250, 399] {
            let query = query_for(spec.precision, embeddings.row(probe), &ranges);
            assert_eq!(
                index.search(&query, 10).unwrap(),
                loaded.search(&query, 10).unwrap(),
                "{} probe {}",
                spec.precision,
                probe
            );
        }
    }
}

#[test]
fn test_graph_search_finds_stored_vector() {
    let embeddings = random_embeddings(11);
    let (mut indexes, _) = build_all(&embeddings);
    let f32_index = &mut indexes[0];
    f32_index.build_graph(&params()).unwrap();

    let keys = keys();
    let mut found = 0;
    for probe in (0..COUNT).step_by(20) {
        let query = QueryVector::Float32(embeddings.row(probe).to_vec());
        let hits = f32_index.search(&query, 5).unwrap();
        assert_eq!(hits.len(), 5);
        if hits[0].key == keys[probe] {
            found += 1;
        }
    }
    // greedy search is approximate; a healthy graph finds nearly every probe
    assert!(found >= 18, "found {} of 20", found);
}

#[test]
fn test_corrupt_files_are_rejected() {
    let dir = tempdir().unwrap();
    let embeddings = random_embeddings(3);
    let (mut indexes, _) = build_all(&embeddings);
    let index = &mut indexes[1];
    let spec = index.spec();
    let path = dir.path().join(spec.file_name());
    index.save(&path, &params()).unwrap();
    let original = std::fs::read(&path).unwrap();

    // truncated
    std::fs::write(&path, &original[..original.len() / 2]).unwrap();
    assert!(matches!(
        AnyIndex::load(&path, spec),
        Err(NewsIndexError::DataCorruption { .. })
    ));

    // flipped bit in the vector section
    let mut garbled = original.clone();
    garbled[original.len() / 2] ^= 0x01;
    std::fs::write(&path, &garbled).unwrap();
    assert!(matches!(
        AnyIndex::load(&path, spec),
        Err(NewsIndexError::DataCorruption { .. })
    ));

    // unknown version, checksum recomputed so only the version is wrong
    let mut future = original.clone();
    future[8..12].copy_from_slice(&99u32.to_le_bytes());
    let body_len = future.len() - 32;
    let checksum = *blake3::hash(&future[..body_len]).as_bytes();
    future[body_len..].copy_from_slice(&checksum);
    std::fs::write(&path, &future).unwrap();
    let err = AnyIndex::load(&path, spec).unwrap_err();
    assert!(err.to_string().contains("unsupported version"), "{}", err);

    // intact file loads again
    std::fs::write(&path, &original).unwrap();
    assert!(AnyIndex::load(&path, spec).is_ok());
}

#[test]
fn test_calibration_file_roundtrip_and_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("calibration_ranges.npy");
    let embeddings = random_embeddings(5);
    let ranges = CalibrationRange::fit(&embeddings).unwrap();

    ranges.save(&path).unwrap();
    let loaded = CalibrationRange::load(&path).unwrap();
    assert_eq!(loaded, ranges);
    assert_eq!(
        quantize_int8(&embeddings, &loaded).unwrap(),
        quantize_int8(&embeddings, &ranges).unwrap()
    );

    std::fs::write(&path, b"\x93NUMPY garbage").unwrap();
    assert!(matches!(
        CalibrationRange::load(&path),
        Err(NewsIndexError::DataCorruption { .. })
    ));
}
