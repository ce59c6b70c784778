//! Controller layer for jobhub.
//!
//! The controller sits between the HTTP edge and the worker pool: it
//! validates submissions, dispatches them by kind, installs status hooks,
//! and exposes status, control, and log retrieval.

pub mod controller;

pub use controller::Controller;
