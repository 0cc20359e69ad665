//! Signature model, database parsers and the loaded signature set.

pub mod parser;
pub mod set;
pub mod signature;

pub use set::{LoadOptions, SignatureSet};
pub use signature::{
    EngineRange, HashAlgo, LogicExpr, Signature, SignatureBody, TargetSize, ENGINE_FUNC_LEVEL,
};
