//! # jobhub-core
//!
//! Core crate for jobhub. Contains configuration schemas, domain models
//! (job requests, stats, status machine), capability traits for the queue
//! backend and the worker pool, and the unified error system.
//!
//! This crate has **no** internal dependencies on other jobhub crates.

pub mod config;
pub mod error;
pub mod models;
pub mod result;
pub mod traits;

pub use error::AppError;
pub use result::AppResult;
