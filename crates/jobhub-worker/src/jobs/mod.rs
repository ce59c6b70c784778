//! Built-in job implementations.

pub mod demo;

pub use demo::DemoJob;

/// Name the demo job registers under.
pub const KNOWN_JOB_DEMO: &str = "demo";
