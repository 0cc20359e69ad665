//! Signature types: the closed tagged union over every matching kind.

use crate::core::types::MatchKind;
use crate::engine::pattern::Pattern;

/// Functionality level of this engine build, compared against the
/// min/max levels a signature declares before it becomes eligible.
pub const ENGINE_FUNC_LEVEL: u32 = 120;

/// Digest algorithm of a hash-based signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgo {
    /// Infer the algorithm from the hex digest length (32/40/64 chars).
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(HashAlgo::Md5),
            40 => Some(HashAlgo::Sha1),
            64 => Some(HashAlgo::Sha256),
            _ => None,
        }
    }
}

/// Size constraint of a hash signature.
///
/// An exact-size and a wildcard-size signature may carry the same digest;
/// both are kept and both fire independently. Never deduplicate by digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetSize {
    Exact(u64),
    Any,
}

impl TargetSize {
    /// Parse the size field of a database line (`*` or a decimal size).
    pub fn parse(s: &str) -> Option<Self> {
        if s == "*" {
            Some(TargetSize::Any)
        } else {
            s.parse().ok().map(TargetSize::Exact)
        }
    }

    /// Whether content of `size` bytes satisfies this constraint.
    pub fn matches(&self, size: u64) -> bool {
        match self {
            TargetSize::Exact(n) => *n == size,
            TargetSize::Any => true,
        }
    }
}

/// Minimum/maximum engine functionality level a signature supports.
///
/// Opaque to the matching logic itself; checked once to decide eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineRange {
    pub min: u32,
    pub max: u32,
}

impl Default for EngineRange {
    fn default() -> Self {
        Self {
            min: 0,
            max: u32::MAX,
        }
    }
}

impl EngineRange {
    /// Range with only a lower bound (hash-db min-flevel fields).
    pub fn at_least(min: u32) -> Self {
        Self { min, max: u32::MAX }
    }

    pub fn contains(&self, level: u32) -> bool {
        self.min <= level && level <= self.max
    }
}

/// Boolean expression over logical-signature subsignature indexes.
///
/// Grammar: `expr := term ('|' term)*`, `term := factor ('&' factor)*`,
/// `factor := index | '(' expr ')'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicExpr {
    Sub(usize),
    And(Box<LogicExpr>, Box<LogicExpr>),
    Or(Box<LogicExpr>, Box<LogicExpr>),
}

impl LogicExpr {
    /// Parse an expression like `0`, `0&1` or `(0|1)&2`.
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        let mut pos = 0;
        let expr = Self::parse_or(bytes, &mut pos)?;
        if pos == bytes.len() {
            Some(expr)
        } else {
            None
        }
    }

    fn parse_or(bytes: &[u8], pos: &mut usize) -> Option<LogicExpr> {
        let mut left = Self::parse_and(bytes, pos)?;
        while bytes.get(*pos) == Some(&b'|') {
            *pos += 1;
            let right = Self::parse_and(bytes, pos)?;
            left = LogicExpr::Or(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn parse_and(bytes: &[u8], pos: &mut usize) -> Option<LogicExpr> {
        let mut left = Self::parse_factor(bytes, pos)?;
        while bytes.get(*pos) == Some(&b'&') {
            *pos += 1;
            let right = Self::parse_factor(bytes, pos)?;
            left = LogicExpr::And(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn parse_factor(bytes: &[u8], pos: &mut usize) -> Option<LogicExpr> {
        match bytes.get(*pos)? {
            b'(' => {
                *pos += 1;
                let expr = Self::parse_or(bytes, pos)?;
                if bytes.get(*pos) == Some(&b')') {
                    *pos += 1;
                    Some(expr)
                } else {
                    None
                }
            }
            b'0'..=b'9' => {
                let start = *pos;
                while matches!(bytes.get(*pos), Some(b'0'..=b'9')) {
                    *pos += 1;
                }
                std::str::from_utf8(&bytes[start..*pos])
                    .ok()?
                    .parse()
                    .ok()
                    .map(LogicExpr::Sub)
            }
            _ => None,
        }
    }

    /// Evaluate against a per-subsignature hit predicate.
    pub fn evaluate(&self, hit: &dyn Fn(usize) -> bool) -> bool {
        match self {
            LogicExpr::Sub(i) => hit(*i),
            LogicExpr::And(a, b) => a.evaluate(hit) && b.evaluate(hit),
            LogicExpr::Or(a, b) => a.evaluate(hit) || b.evaluate(hit),
        }
    }

    /// Largest subsignature index referenced.
    pub fn max_index(&self) -> usize {
        match self {
            LogicExpr::Sub(i) => *i,
            LogicExpr::And(a, b) | LogicExpr::Or(a, b) => a.max_index().max(b.max_index()),
        }
    }
}

/// Where a body pattern must occur within a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOffset {
    /// Anywhere in the buffer
    Any,
    /// At exactly this byte offset
    Absolute(u64),
}

/// Kind-specific payload of a signature.
#[derive(Debug, Clone)]
pub enum SignatureBody {
    /// Whole-content hash (.hdb/.hsb)
    FileHash { algo: HashAlgo, digest: String },
    /// PE import-table hash (.imp); target size counts imported functions
    ImportHash { digest: String },
    /// PE section hash (.mdb); target size is the raw section size
    SectionHash { digest: String },
    /// Byte/wildcard pattern (.ndb)
    Pattern {
        offset: PatternOffset,
        pattern: Pattern,
    },
    /// Logical condition over subsignature patterns (.ldb)
    Logical {
        expr: LogicExpr,
        subsigs: Vec<Pattern>,
    },
    /// Opaque bytecode trigger program (.cbc)
    Bytecode { program: Vec<u8> },
}

/// One loaded signature.
#[derive(Debug, Clone)]
pub struct Signature {
    /// Signature name, used verbatim in reporting.
    pub name: String,
    /// Size constraint for hash kinds; `Any` otherwise.
    pub target_size: TargetSize,
    /// Supported engine functionality levels.
    pub engine_range: EngineRange,
    /// Kind-specific payload.
    pub body: SignatureBody,
}

impl Signature {
    /// The matching-algorithm family this signature belongs to.
    pub fn kind(&self) -> MatchKind {
        match self.body {
            SignatureBody::FileHash { .. } => MatchKind::Hash,
            SignatureBody::ImportHash { .. } => MatchKind::ImportHash,
            SignatureBody::SectionHash { .. } => MatchKind::SectionHash,
            SignatureBody::Pattern { .. } => MatchKind::Pattern,
            SignatureBody::Logical { .. } => MatchKind::Logical,
            SignatureBody::Bytecode { .. } => MatchKind::Bytecode,
        }
    }

    /// Whether this build of the engine may evaluate the signature.
    pub fn eligible(&self) -> bool {
        self.engine_range.contains(ENGINE_FUNC_LEVEL)
    }
}
