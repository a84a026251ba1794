pub mod cache;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod inference;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod video;
