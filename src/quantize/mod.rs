//! Embedding quantization.
//!
//! Three representations derive from the same normalized float32 embeddings:
//!
//! | Precision | Element | Per 1024-dim vector | Metric |
//! |-----------|---------|---------------------|--------|
//! | float32 | `f32` | 4096 bytes | cosine |
//! | int8 | `i8` | 1024 bytes | inner product |
//! | binary | packed `u8` | 128 bytes | Hamming |
//!
//! int8 needs a [`CalibrationRange`]; the same ranges must be used at build
//! time and query time.

pub mod binary;
pub mod calibration;
pub mod int8;

pub use binary::{packed_len, quantize_binary, quantize_binary_vector};
pub use calibration::CalibrationRange;
pub use int8::{quantize_int8, quantize_int8_vector};
