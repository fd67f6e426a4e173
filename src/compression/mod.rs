pub mod varint;
pub mod bitstream;
pub mod compress;
