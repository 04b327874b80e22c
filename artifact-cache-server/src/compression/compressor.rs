use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::{debug, warn};

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Stored as-is
    None,
    /// LZ4 - Fast compression/decompression
    Lz4,
    /// Zstandard - Better compression ratio (default)
    #[default]
    Zstd,
}

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Enable compression of disk payloads
    pub enabled: bool,
    /// Minimum payload size to compress (bytes)
    pub min_payload_size: usize,
    /// Algorithm used for new writes
    pub algorithm: CompressionAlgorithm,
    /// Compression level (zstd 1-22, lz4 0-16)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_payload_size: 512, // Don't compress tiny payloads
            algorithm: CompressionAlgorithm::Zstd,
            level: 3, // Balanced compression
        }
    }
}

/// Disk payload compressor
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    /// Create new compressor with configuration
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress a payload.
    ///
    /// Returns the stored bytes and the algorithm actually applied. A failing
    /// encoder, or output that is not smaller than the input, degrades to
    /// [`CompressionAlgorithm::None`].
    pub fn compress(&self, data: &[u8]) -> (Vec<u8>, CompressionAlgorithm) {
        if !self.should_compress(data) {
            debug!("Skipping compression: size={} bytes", data.len());
            return (data.to_vec(), CompressionAlgorithm::None);
        }

        let result = match self.config.algorithm {
            CompressionAlgorithm::None => return (data.to_vec(), CompressionAlgorithm::None),
            CompressionAlgorithm::Lz4 => self.compress_lz4(data),
            CompressionAlgorithm::Zstd => self.compress_zstd(data),
        };

        match result {
            Ok(compressed) if compressed.len() < data.len() => (compressed, self.config.algorithm),
            Ok(compressed) => {
                debug!(
                    "Compression gained nothing ({} -> {} bytes), storing uncompressed",
                    data.len(),
                    compressed.len()
                );
                (data.to_vec(), CompressionAlgorithm::None)
            }
            Err(e) => {
                warn!(
                    "{:?} compression failed, storing uncompressed: {}",
                    self.config.algorithm, e
                );
                (data.to_vec(), CompressionAlgorithm::None)
            }
        }
    }

    /// Decompress data using the algorithm recorded with it
    pub fn decompress(
        &self,
        data: &[u8],
        algorithm: CompressionAlgorithm,
    ) -> Result<Vec<u8>, std::io::Error> {
        match algorithm {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Lz4 => self.decompress_lz4(data),
            CompressionAlgorithm::Zstd => self.decompress_zstd(data),
        }
    }

    /// Compress using LZ4
    fn compress_lz4(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let level = self.config.level.clamp(0, 16) as u32;
        let mut encoder = lz4::EncoderBuilder::new().level(level).build(Vec::new())?;

        encoder.write_all(data)?;
        let (compressed, result) = encoder.finish();
        result?;

        debug!(
            "LZ4 compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            self.compression_ratio(data.len(), compressed.len())
        );

        Ok(compressed)
    }

    /// Decompress using LZ4
    fn decompress_lz4(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let mut decoder = lz4::Decoder::new(data)?;
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }

    /// Compress using Zstd
    fn compress_zstd(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let compressed = zstd::encode_all(data, self.config.level)?;

        debug!(
            "Zstd compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            self.compression_ratio(data.len(), compressed.len())
        );

        Ok(compressed)
    }

    /// Decompress using Zstd
    fn decompress_zstd(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        zstd::decode_all(data)
    }

    /// Calculate compression ratio
    pub fn compression_ratio(&self, original: usize, compressed: usize) -> f64 {
        if compressed == 0 {
            return 1.0;
        }
        original as f64 / compressed as f64
    }

    /// Estimate if compression would be beneficial
    pub fn should_compress(&self, data: &[u8]) -> bool {
        self.config.enabled
            && self.config.algorithm != CompressionAlgorithm::None
            && data.len() >= self.config.min_payload_size
    }
}
