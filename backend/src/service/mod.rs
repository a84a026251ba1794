pub mod media_analysis;
