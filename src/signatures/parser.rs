//! Textual signature database parsers.
//!
//! Each supported extension maps to one line grammar:
//!
//! - `.hdb`  `md5:size:name[:minflevel]`
//! - `.hsb`  `sha256|sha1:size:name[:minflevel]`
//! - `.imp`  `md5:size:name` (size counts imported functions)
//! - `.mdb`  `size:md5:name[:minflevel]` (size is the raw section size)
//! - `.ndb`  `name:target_type:offset:hexsig`
//! - `.ldb`  `name;Engine:min-max[,Target:n];expr;hexsig0;hexsig1;...`
//! - `.cbc`  bytecode trigger program (opaque; descriptor form understood
//!           by the built-in trigger engine)
//!
//! A line that violates its grammar fails the whole load: silently skipping
//! a bad entry could mask a real detection.

use crate::core::error::{Error, Result};
use crate::engine::pattern::Pattern;
use crate::signatures::signature::{
    EngineRange, HashAlgo, LogicExpr, PatternOffset, Signature, SignatureBody, TargetSize,
};
use std::path::Path;

/// Database extensions the loader recognizes.
pub const KNOWN_EXTENSIONS: &[&str] = &["hdb", "hsb", "imp", "mdb", "ndb", "ldb", "cbc"];

/// Parse one database file into signatures.
///
/// `load_bytecode` gates `.cbc` files the same way the scanner's
/// `--bytecode-unsigned` flag does; when false they parse to nothing.
pub fn parse_database(path: &Path, load_bytecode: bool) -> Result<Vec<Signature>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| Error::UnsupportedDatabase {
            path: path.to_path_buf(),
        })?;

    if ext == "cbc" {
        if !load_bytecode {
            log::debug!("Skipping bytecode database (not enabled): {:?}", path);
            return Ok(Vec::new());
        }
        return parse_cbc(path);
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::DatabaseRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut sigs = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let sig = match ext.as_str() {
            "hdb" => parse_hash_line(path, lineno, line, &[HashAlgo::Md5])?,
            "hsb" => parse_hash_line(path, lineno, line, &[HashAlgo::Sha1, HashAlgo::Sha256])?,
            "imp" => parse_imp_line(path, lineno, line)?,
            "mdb" => parse_mdb_line(path, lineno, line)?,
            "ndb" => parse_ndb_line(path, lineno, line)?,
            "ldb" => parse_ldb_line(path, lineno, line)?,
            _ => {
                return Err(Error::UnsupportedDatabase {
                    path: path.to_path_buf(),
                })
            }
        };
        sigs.push(sig);
    }

    log::debug!("Loaded {} signature(s) from {:?}", sigs.len(), path);
    Ok(sigs)
}

fn check_hex_digest(path: &Path, lineno: usize, digest: &str) -> Result<()> {
    if digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(Error::malformed(path, lineno, "digest is not valid hex"))
    }
}

/// `.hdb`/`.hsb`: `digest:size:name[:minflevel]`.
///
/// The algorithm is inferred from the digest length and must be one the
/// database kind allows (`.hdb` MD5, `.hsb` SHA-1/SHA-256).
fn parse_hash_line(
    path: &Path,
    lineno: usize,
    line: &str,
    allowed: &[HashAlgo],
) -> Result<Signature> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 3 || fields.len() > 4 {
        return Err(Error::malformed(path, lineno, "expected digest:size:name[:minflevel]"));
    }

    let digest = fields[0].to_lowercase();
    check_hex_digest(path, lineno, &digest)?;
    let algo = HashAlgo::from_hex_len(digest.len())
        .ok_or_else(|| Error::malformed(path, lineno, "unrecognized digest length"))?;
    if !allowed.contains(&algo) {
        return Err(Error::malformed(path, lineno, "digest length does not match database kind"));
    }

    let target_size = TargetSize::parse(fields[1])
        .ok_or_else(|| Error::malformed(path, lineno, "invalid size field"))?;
    let name = parse_name(path, lineno, fields[2])?;
    let engine_range = parse_min_flevel(path, lineno, fields.get(3).copied())?;

    Ok(Signature {
        name,
        target_size,
        engine_range,
        body: SignatureBody::FileHash { algo, digest },
    })
}

/// `.imp`: `md5:size:name` where size counts imported functions.
fn parse_imp_line(path: &Path, lineno: usize, line: &str) -> Result<Signature> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 3 {
        return Err(Error::malformed(path, lineno, "expected md5:size:name"));
    }

    let digest = fields[0].to_lowercase();
    check_hex_digest(path, lineno, &digest)?;
    if HashAlgo::from_hex_len(digest.len()) != Some(HashAlgo::Md5) {
        return Err(Error::malformed(path, lineno, "import hash must be MD5"));
    }

    let target_size = TargetSize::parse(fields[1])
        .ok_or_else(|| Error::malformed(path, lineno, "invalid size field"))?;
    let name = parse_name(path, lineno, fields[2])?;

    Ok(Signature {
        name,
        target_size,
        engine_range: EngineRange::default(),
        body: SignatureBody::ImportHash { digest },
    })
}

/// `.mdb`: `size:md5:name[:minflevel]` where size is the raw section size.
fn parse_mdb_line(path: &Path, lineno: usize, line: &str) -> Result<Signature> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 3 || fields.len() > 4 {
        return Err(Error::malformed(path, lineno, "expected size:md5:name[:minflevel]"));
    }

    let target_size = TargetSize::parse(fields[0])
        .ok_or_else(|| Error::malformed(path, lineno, "invalid size field"))?;

    let digest = fields[1].to_lowercase();
    check_hex_digest(path, lineno, &digest)?;
    if HashAlgo::from_hex_len(digest.len()) != Some(HashAlgo::Md5) {
        return Err(Error::malformed(path, lineno, "section hash must be MD5"));
    }

    let name = parse_name(path, lineno, fields[2])?;
    let engine_range = parse_min_flevel(path, lineno, fields.get(3).copied())?;

    Ok(Signature {
        name,
        target_size,
        engine_range,
        body: SignatureBody::SectionHash { digest },
    })
}

/// `.ndb`: `name:target_type:offset:hexsig`.
///
/// The target type is accepted but not used for candidate filtering here;
/// offset is `*` or a decimal absolute offset.
fn parse_ndb_line(path: &Path, lineno: usize, line: &str) -> Result<Signature> {
    let fields: Vec<&str> = line.splitn(4, ':').collect();
    if fields.len() != 4 {
        return Err(Error::malformed(path, lineno, "expected name:type:offset:hexsig"));
    }

    let name = parse_name(path, lineno, fields[0])?;

    fields[1]
        .parse::<u32>()
        .map_err(|_| Error::malformed(path, lineno, "invalid target type"))?;

    let offset = if fields[2] == "*" {
        PatternOffset::Any
    } else {
        fields[2]
            .parse::<u64>()
            .map(PatternOffset::Absolute)
            .map_err(|_| Error::malformed(path, lineno, "invalid offset field"))?
    };

    let pattern = Pattern::compile(fields[3])
        .map_err(|e| Error::malformed(path, lineno, format!("bad pattern: {}", e)))?;

    Ok(Signature {
        name,
        target_size: TargetSize::Any,
        engine_range: EngineRange::default(),
        body: SignatureBody::Pattern { offset, pattern },
    })
}

/// `.ldb`: `name;Engine:min-max[,Target:n];expr;hexsig0;...`.
fn parse_ldb_line(path: &Path, lineno: usize, line: &str) -> Result<Signature> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < 4 {
        return Err(Error::malformed(path, lineno, "expected name;tdata;expr;subsig..."));
    }

    let name = parse_name(path, lineno, fields[0])?;
    let engine_range = parse_tdata(path, lineno, fields[1])?;

    let expr = LogicExpr::parse(fields[2])
        .ok_or_else(|| Error::malformed(path, lineno, "invalid logical expression"))?;

    let subsigs: Vec<Pattern> = fields[3..]
        .iter()
        .map(|s| {
            Pattern::compile(s)
                .map_err(|e| Error::malformed(path, lineno, format!("bad subsignature: {}", e)))
        })
        .collect::<Result<_>>()?;

    if expr.max_index() >= subsigs.len() {
        return Err(Error::malformed(
            path,
            lineno,
            "logical expression references a missing subsignature",
        ));
    }

    Ok(Signature {
        name,
        target_size: TargetSize::Any,
        engine_range,
        body: SignatureBody::Logical { expr, subsigs },
    })
}

/// Parse the `.ldb` target-description block, e.g. `Engine:52-255,Target:1`.
fn parse_tdata(path: &Path, lineno: usize, tdata: &str) -> Result<EngineRange> {
    let mut range = EngineRange::default();
    for item in tdata.split(',') {
        let Some((key, value)) = item.split_once(':') else {
            return Err(Error::malformed(path, lineno, "invalid target description"));
        };
        match key {
            "Engine" => {
                let Some((min, max)) = value.split_once('-') else {
                    return Err(Error::malformed(path, lineno, "invalid Engine range"));
                };
                range = EngineRange {
                    min: min
                        .parse()
                        .map_err(|_| Error::malformed(path, lineno, "invalid Engine range"))?,
                    max: max
                        .parse()
                        .map_err(|_| Error::malformed(path, lineno, "invalid Engine range"))?,
                };
            }
            // Target and any future keys are accepted, not enforced
            _ => {
                value
                    .parse::<u32>()
                    .map_err(|_| Error::malformed(path, lineno, "invalid target description value"))?;
            }
        }
    }
    Ok(range)
}

/// Bytecode databases: the program is opaque to the loader.
///
/// The signature name comes from a `VIRUSNAME:` descriptor line when
/// present, otherwise from the file stem.
fn parse_cbc(path: &Path) -> Result<Vec<Signature>> {
    let program = std::fs::read(path).map_err(|e| Error::DatabaseRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let name = std::str::from_utf8(&program)
        .ok()
        .and_then(|text| {
            text.lines()
                .find_map(|l| l.strip_prefix("VIRUSNAME:").map(|n| n.trim().to_string()))
        })
        .filter(|n| !n.is_empty())
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
        })
        .ok_or_else(|| Error::malformed(path, 0, "cannot derive bytecode signature name"))?;

    Ok(vec![Signature {
        name,
        target_size: TargetSize::Any,
        engine_range: EngineRange::default(),
        body: SignatureBody::Bytecode { program },
    }])
}

fn parse_name(path: &Path, lineno: usize, raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(Error::malformed(path, lineno, "empty signature name"));
    }
    Ok(name.to_string())
}

fn parse_min_flevel(path: &Path, lineno: usize, field: Option<&str>) -> Result<EngineRange> {
    match field {
        None => Ok(EngineRange::default()),
        Some(f) => f
            .parse()
            .map(EngineRange::at_least)
            .map_err(|_| Error::malformed(path, lineno, "invalid min-flevel field")),
    }
}
