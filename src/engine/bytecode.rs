//! Bytecode signature evaluation.
//!
//! Bytecode programs are opaque to the loader; evaluation happens behind
//! the [`BytecodeEngine`] trait so a full interpreter can be plugged in.
//! The built-in [`TriggerEngine`] understands the descriptor form used by
//! test programs:
//!
//! ```text
//! VIRUSNAME:BC.Some-Name
//! TRIGGER:<hex pattern matched against the layer content>
//! REQUIRES:<name of a content signature that must already have fired>
//! ```
//!
//! A program the engine cannot understand simply does not fire.

use crate::core::error::{Error, Result};
use crate::core::types::Match;
use crate::engine::pattern::Pattern;

/// Evaluates one bytecode program against a layer.
///
/// `found` holds the content matches already recorded for this layer, in
/// firing order; bytecode runs strictly after them.
pub trait BytecodeEngine: Send + Sync {
    fn evaluate(&self, program: &[u8], content: &[u8], found: &[Match]) -> Result<bool>;
}

/// The built-in descriptor-form evaluator.
#[derive(Debug, Default)]
pub struct TriggerEngine;

impl BytecodeEngine for TriggerEngine {
    fn evaluate(&self, program: &[u8], content: &[u8], found: &[Match]) -> Result<bool> {
        let Ok(text) = std::str::from_utf8(program) else {
            log::debug!("Opaque bytecode program; treating as non-firing");
            return Ok(false);
        };

        let mut any_condition = false;
        for line in text.lines() {
            let line = line.trim();
            if let Some(hexsig) = line.strip_prefix("TRIGGER:") {
                any_condition = true;
                let pattern = Pattern::compile(hexsig).map_err(|e| {
                    Error::BytecodeEvaluationFailure {
                        signature: virus_name(text).unwrap_or_default(),
                        reason: format!("bad trigger pattern: {}", e),
                    }
                })?;
                if pattern.find(content).is_none() {
                    return Ok(false);
                }
            } else if let Some(required) = line.strip_prefix("REQUIRES:") {
                any_condition = true;
                let required = required.trim();
                if !found.iter().any(|m| m.signature_name == required) {
                    return Ok(false);
                }
            }
        }

        Ok(any_condition)
    }
}

fn virus_name(text: &str) -> Option<String> {
    text.lines()
        .find_map(|l| l.strip_prefix("VIRUSNAME:").map(|n| n.trim().to_string()))
}
