pub mod decoder;
pub mod frame_extractor;
pub mod fusion;
