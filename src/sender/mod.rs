// Sender module - turning files into chunk sequences

pub mod encoder;

pub use encoder::{encode_file, EncodedTransfer, Encoder};
