//! Redis queue backend.

pub mod client;
pub mod driver;

pub use client::RedisClient;
pub use driver::RedisQueueBackend;
