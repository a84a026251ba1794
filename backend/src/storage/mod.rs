pub mod object_store;
pub mod s3_service;
