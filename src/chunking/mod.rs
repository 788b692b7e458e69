pub mod chunk;
pub mod chunker;
pub mod hasher;
pub mod bitmap;

pub use chunk::Chunk;
pub use chunker::{ChunkFramer, FrameHeader};
pub use hasher::{
    generate_chunk_id, generate_resume_token, generate_session_id, random_hex, ChunkHasher,
};
pub use bitmap::ChunkBitmap;
