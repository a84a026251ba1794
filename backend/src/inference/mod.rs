pub mod client;
pub mod fallback;
pub mod remote_analyzer;
