#![allow(dead_code)]

pub mod player_fixture;

pub use player_fixture::*;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
