pub mod cascade;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod reconcile;
pub mod resolver;
pub mod scheduler;
pub mod storage;
pub mod sync;
