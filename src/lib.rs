// Library exports for the binary, integration tests and reusable components

pub mod config;
pub mod error;
pub mod media_controls;
pub mod models;
pub mod playback;
pub mod progress_service;
pub mod retry;
pub mod server;

// Test support (unit tests, or integration tests with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
