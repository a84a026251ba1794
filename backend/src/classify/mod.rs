pub mod event_classifier;
pub mod taxonomy;
