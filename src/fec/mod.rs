// Reed-Solomon erasure coding over GF(2^8)

pub mod galois;
pub mod matrix;
pub mod reed_solomon;
pub mod stripes;

pub use matrix::Matrix;
pub use reed_solomon::ReedSolomon;
pub use stripes::{
    encode_stream, repair_stream, FecCapability, FecLevel, FecScheme, RepairReport, StripeLayout,
};
