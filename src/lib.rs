pub mod activity_log;
pub mod config;
pub mod portal;
pub mod record_store;
pub mod runner;
pub mod summary;
