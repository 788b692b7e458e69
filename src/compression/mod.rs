// Compression engine

pub mod codecs;
pub mod engine;

pub use codecs::{
    create_compressor, CompressionAlgorithm, Compressor, DeflateCompressor, GzipCompressor,
    Lz4Compressor, NoneCompressor, ZstdCompressor,
};
pub use engine::{
    auto_compress, compress, decompress, entropy, is_compressible, CompressionOutcome,
    ENTROPY_THRESHOLD,
};
