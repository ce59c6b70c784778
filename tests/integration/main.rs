//! End-to-end tests of the job service over the HTTP surface, backed by
//! the in-memory queue driver.

mod api_test;
mod helpers;
mod hook_test;
mod lifecycle_test;
