//! Scripted in-memory driver for tests and benchmarks.

mod mock_driver;

pub use mock_driver::{MockDriver, MockLog, MockScript};
