//! # diskshift Common
//!
//! Shared utilities for the diskshift components.

pub mod logging;

pub use logging::init_logging;
