//! Payload compression for the disk tier

pub mod compressor;

pub use compressor::{CompressionAlgorithm, CompressionConfig, Compressor};
