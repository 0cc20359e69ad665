//! Core type definitions used throughout ferroscan.

use serde::{Deserialize, Serialize};
use std::process::ExitCode;

/// Alerting policy for a scan session.
///
/// Configuration, not mutable state: passed into `ScanSession` at
/// construction and never changed mid-scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPolicy {
    /// Stop the session as soon as any signature fires.
    FirstMatch,
    /// Keep descending through every layer and signature kind, accumulating
    /// every firing signature.
    AllMatch,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        AlertPolicy::FirstMatch
    }
}

/// Terminal verdict of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// No signature fired anywhere.
    Clean,
    /// At least one signature fired.
    Infected,
    /// The scan could not run (unreadable input).
    Error,
}

impl Verdict {
    /// Process exit code for this verdict (0 clean, 1 virus, 2 error).
    pub fn exit_code(&self) -> u8 {
        match self {
            Verdict::Clean => 0,
            Verdict::Infected => 1,
            Verdict::Error => 2,
        }
    }

    /// Combine verdicts across multiple top-level targets; the most severe
    /// outcome wins (Error > Infected > Clean).
    pub fn merge(self, other: Verdict) -> Verdict {
        match (self, other) {
            (Verdict::Error, _) | (_, Verdict::Error) => Verdict::Error,
            (Verdict::Infected, _) | (_, Verdict::Infected) => Verdict::Infected,
            _ => Verdict::Clean,
        }
    }
}

impl From<Verdict> for ExitCode {
    fn from(v: Verdict) -> Self {
        ExitCode::from(v.exit_code())
    }
}

/// The matching algorithm family a signature belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Whole-file hash (MD5/SHA-1/SHA-256, exact or wildcard size)
    Hash,
    /// Import-table hash of a PE file
    ImportHash,
    /// PE section hash
    SectionHash,
    /// Byte/wildcard pattern
    Pattern,
    /// Logical signature over sub-pattern matches
    Logical,
    /// Bytecode trigger evaluated over prior content matches
    Bytecode,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchKind::Hash => write!(f, "hash"),
            MatchKind::ImportHash => write!(f, "import-hash"),
            MatchKind::SectionHash => write!(f, "section-hash"),
            MatchKind::Pattern => write!(f, "pattern"),
            MatchKind::Logical => write!(f, "logical"),
            MatchKind::Bytecode => write!(f, "bytecode"),
        }
    }
}

/// One firing signature at one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Name of the signature that fired, verbatim from the database.
    pub signature_name: String,
    /// Kind of signature (controls the report suffix).
    pub kind: MatchKind,
    /// Path of the layer the signature fired on, e.g. `file.zip!entry.txt`.
    pub layer_path: String,
    /// Byte offset of the match within the layer, where meaningful.
    pub offset: Option<usize>,
}

impl Match {
    /// Render the alert line for this match.
    ///
    /// Every signature kind reports `<name>.UNOFFICIAL FOUND` except raw
    /// bytecode triggers, which report `<name> FOUND` with no suffix. The
    /// asymmetry is load-bearing for downstream tooling; do not normalize.
    pub fn report_line(&self) -> String {
        match self.kind {
            MatchKind::Bytecode => format!("{} FOUND", self.signature_name),
            _ => format!("{}.UNOFFICIAL FOUND", self.signature_name),
        }
    }
}

/// Final result of one top-level scan invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Terminal verdict (drives the process exit code).
    pub verdict: Verdict,
    /// Every match, in firing order.
    pub matches: Vec<Match>,
    /// Number of layers scanned (top-level file plus extracted items).
    pub files_scanned: u64,
}

impl ScanResult {
    /// An error result with no partial matches.
    pub fn error() -> Self {
        Self {
            verdict: Verdict::Error,
            matches: Vec::new(),
            files_scanned: 0,
        }
    }
}
