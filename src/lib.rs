//! Ferroscan: a signature-based file scanning engine.
//!
//! This crate loads heterogeneous signature databases (file hashes, byte
//! patterns, logical signatures, import-table hashes, PE section hashes and
//! bytecode triggers), recursively extracts nested or concatenated container
//! formats, and matches every layer against the loaded signature set under
//! a first-match or all-match alerting policy.

pub mod container;
pub mod core;
pub mod engine;
pub mod session;
pub mod signatures;
pub mod utils;

// Re-export commonly used types
pub use crate::core::config::Config;
pub use crate::core::error::{Error, Result};
pub use crate::core::types::*;
pub use crate::session::ScanSession;
pub use crate::signatures::SignatureSet;
