//! Backend for an online-course platform: lesson/quiz progress tracking,
//! deterministic quiz grading, progress aggregation, and exactly-once
//! certificate issuance.

pub mod db;
pub mod error;
pub mod grading;
pub mod issuance;
pub mod models;
pub mod progress;
pub mod routes;
pub mod snapshot;
pub mod store;
