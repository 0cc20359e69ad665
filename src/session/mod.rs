//! Scan sessions: drive one top-level target through every layer.
//!
//! A session owns the traversal, not the matching: each layer (the file
//! itself, then everything extracted from it, recursively) goes through
//! [`MatchEngine`] and children are queued on an explicit worklist. The
//! worklist is popped so that a parent is always scanned before its
//! children and a container's items complete before a sibling starts.

use crate::container;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{AlertPolicy, ScanResult, Verdict};
use crate::engine::bytecode::{BytecodeEngine, TriggerEngine};
use crate::engine::MatchEngine;
use crate::signatures::set::SignatureSet;
use std::path::Path;
use std::sync::Arc;

/// One pending layer on the worklist.
struct Layer {
    path: String,
    content: Vec<u8>,
    depth: usize,
}

/// A configured scanner over one signature set.
pub struct ScanSession {
    set: Arc<SignatureSet>,
    config: Config,
    policy: AlertPolicy,
    bytecode: Box<dyn BytecodeEngine>,
}

impl ScanSession {
    /// Create a session with the config's default policy and the built-in
    /// bytecode evaluator.
    pub fn new(set: Arc<SignatureSet>, config: Config) -> Self {
        let policy = config.default_policy;
        Self {
            set,
            config,
            policy,
            bytecode: Box::new(TriggerEngine),
        }
    }

    /// Override the alerting policy.
    pub fn with_policy(mut self, policy: AlertPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the bytecode evaluator.
    pub fn with_bytecode_engine(mut self, engine: Box<dyn BytecodeEngine>) -> Self {
        self.bytecode = engine;
        self
    }

    /// Scan one file on disk.
    ///
    /// An unreadable target is the one fatal condition; everything found
    /// inside the file degrades rather than failing.
    pub fn scan_file(&self, path: &Path) -> Result<ScanResult> {
        let content = std::fs::read(path).map_err(|e| Error::unreadable(path, e))?;
        let name = path.display().to_string();
        Ok(self.scan_bytes(&name, content))
    }

    /// Scan an in-memory buffer as a top-level target.
    pub fn scan_bytes(&self, name: &str, content: Vec<u8>) -> ScanResult {
        let engine = MatchEngine::new(&self.set, self.bytecode.as_ref());
        let stop_after_first = self.policy == AlertPolicy::FirstMatch;

        let mut result = ScanResult {
            verdict: Verdict::Clean,
            matches: Vec::new(),
            files_scanned: 0,
        };

        let mut worklist = vec![Layer {
            path: name.to_string(),
            content,
            depth: 0,
        }];

        while let Some(layer) = worklist.pop() {
            result.files_scanned += 1;
            log::debug!("Scanning layer: {}", layer.path);

            let matches = engine.scan_layer(&layer.content, &layer.path, stop_after_first);
            let fired = !matches.is_empty();
            result.matches.extend(matches);

            if fired && stop_after_first {
                result.matches.truncate(1);
                break;
            }

            if layer.depth + 1 > self.config.scan.max_recursion_depth {
                // Only worth a warning when descent was actually suppressed
                if container::contains_archive(&layer.content) {
                    log::warn!(
                        "{}",
                        Error::RecursionLimitExceeded {
                            layer: layer.path.clone(),
                            limit: self.config.scan.max_recursion_depth,
                        }
                    );
                }
                continue;
            }

            let items = container::extract(&layer.content, &layer.path, &self.config.scan);
            // Reverse push keeps extraction order on a LIFO worklist
            for item in items.into_iter().rev() {
                worklist.push(Layer {
                    path: item.name,
                    content: item.content,
                    depth: layer.depth + 1,
                });
            }
        }

        if !result.matches.is_empty() {
            result.verdict = Verdict::Infected;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MatchKind;
    use crate::signatures::signature::{
        EngineRange, HashAlgo, PatternOffset, Signature, SignatureBody, TargetSize,
    };
    use crate::utils::hash::md5_hex;
    use std::io::Write;

    fn hash_sig(name: &str, content: &[u8], size: TargetSize) -> Signature {
        Signature {
            name: name.into(),
            target_size: size,
            engine_range: EngineRange::default(),
            body: SignatureBody::FileHash {
                algo: HashAlgo::Md5,
                digest: md5_hex(content),
            },
        }
    }

    fn pattern_sig(name: &str, literal: &[u8]) -> Signature {
        Signature {
            name: name.into(),
            target_size: TargetSize::Any,
            engine_range: EngineRange::default(),
            body: SignatureBody::Pattern {
                offset: PatternOffset::Any,
                pattern: crate::engine::pattern::Pattern::compile(&hex::encode(literal)).unwrap(),
            },
        }
    }

    fn session(sigs: Vec<Signature>, policy: AlertPolicy) -> ScanSession {
        let mut set = SignatureSet::default();
        for sig in sigs {
            set.insert(sig).unwrap();
        }
        ScanSession::new(Arc::new(set), Config::default()).with_policy(policy)
    }

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_clean_scan() {
        let s = session(vec![pattern_sig("Test.P", b"EVIL")], AlertPolicy::AllMatch);
        let result = s.scan_bytes("clean.txt", b"nothing to see".to_vec());
        assert_eq!(result.verdict, Verdict::Clean);
        assert!(result.matches.is_empty());
        assert_eq!(result.files_scanned, 1);
    }

    #[test]
    fn test_first_match_stops_with_one() {
        let content = b"EVIL payload".to_vec();
        let s = session(
            vec![
                hash_sig("Test.Hash", &content, TargetSize::Any),
                pattern_sig("Test.Pattern", b"EVIL"),
            ],
            AlertPolicy::FirstMatch,
        );
        let result = s.scan_bytes("target", content);
        assert_eq!(result.verdict, Verdict::Infected);
        assert_eq!(result.matches.len(), 1);
    }

    #[test]
    fn test_allmatch_collects_everything() {
        let content = b"EVIL payload".to_vec();
        let s = session(
            vec![
                hash_sig("Test.Hash", &content, TargetSize::Any),
                pattern_sig("Test.Pattern", b"EVIL"),
            ],
            AlertPolicy::AllMatch,
        );
        let result = s.scan_bytes("target", content);
        assert_eq!(result.matches.len(), 2);
    }

    #[test]
    fn test_exact_and_wildcard_hash_never_deduplicated() {
        let content = b"duplicate digest".to_vec();
        let s = session(
            vec![
                hash_sig("Test.Dup", &content, TargetSize::Exact(content.len() as u64)),
                hash_sig("Test.Dup", &content, TargetSize::Any),
            ],
            AlertPolicy::AllMatch,
        );
        let result = s.scan_bytes("target", content);
        assert_eq!(result.matches.len(), 2);
        assert!(result.matches.iter().all(|m| m.signature_name == "Test.Dup"));
    }

    #[test]
    fn test_zip_children_scanned_after_parent() {
        let zip = build_zip(&[("inner.txt", b"EVIL inside")]);
        let s = session(vec![pattern_sig("Test.P", b"EVIL")], AlertPolicy::AllMatch);
        let result = s.scan_bytes("outer.zip", zip);

        assert_eq!(result.verdict, Verdict::Infected);
        assert_eq!(result.files_scanned, 2);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].layer_path, "outer.zip!inner.txt");
    }

    #[test]
    fn test_sfx_prefix_and_embedded_entry_both_fire() {
        // Plain text carrying a pattern, then a zip appended to it
        let zip = build_zip(&[("inner.txt", b"EVIL inside")]);
        let mut sfx = b"prefix with MARKER text ".to_vec();
        sfx.extend_from_slice(&zip);

        let s = session(
            vec![pattern_sig("Test.Prefix", b"MARKER"), pattern_sig("Test.Inner", b"EVIL")],
            AlertPolicy::AllMatch,
        );
        let result = s.scan_bytes("sfx.exe", sfx);

        let names: Vec<&str> = result
            .matches
            .iter()
            .map(|m| m.signature_name.as_str())
            .collect();
        // Parent layer fires before the extracted child
        assert_eq!(names, vec!["Test.Prefix", "Test.Inner"]);
    }

    #[test]
    fn test_concatenated_zips_scan_in_file_order() {
        let first = build_zip(&[("a.txt", b"EVIL-A")]);
        let second = build_zip(&[("b.txt", b"EVIL-B")]);
        let mut both = first;
        both.extend_from_slice(&second);

        let s = session(
            vec![pattern_sig("Test.A", b"EVIL-A"), pattern_sig("Test.B", b"EVIL-B")],
            AlertPolicy::AllMatch,
        );
        let result = s.scan_bytes("double.zip", both);

        let layers: Vec<&str> = result
            .matches
            .iter()
            .map(|m| m.layer_path.as_str())
            .collect();
        assert_eq!(layers, vec!["double.zip!a.txt", "double.zip!b.txt"]);
    }

    #[test]
    fn test_stripped_central_directory_still_scans_entries() {
        let zip = build_zip(&[
            ("one.txt", b"EVIL one"),
            ("two.txt", b"EVIL two"),
            ("three.txt", b"EVIL three"),
            ("four.txt", b"EVIL four"),
        ]);
        let magic = b"PK\x01\x02";
        let cut = zip.windows(4).position(|w| w == magic).unwrap();
        let broken = zip[..cut].to_vec();

        let s = session(vec![pattern_sig("Test.P", b"EVIL")], AlertPolicy::AllMatch);
        let result = s.scan_bytes("broken.zip", broken);
        assert_eq!(result.matches.len(), 4);
    }

    #[test]
    fn test_nested_zip_respects_depth_limit() {
        let innermost = build_zip(&[("core.txt", b"EVIL core")]);
        let middle = build_zip(&[("inner.zip", &innermost)]);
        let outer = build_zip(&[("middle.zip", &middle)]);

        let mut config = Config::default();
        config.scan.max_recursion_depth = 1;
        let mut set = SignatureSet::default();
        set.insert(pattern_sig("Test.P", b"EVIL core")).unwrap();
        let s = ScanSession::new(Arc::new(set), config).with_policy(AlertPolicy::AllMatch);

        // Depth 1 reaches middle.zip's bytes but never extracts inner.zip
        let result = s.scan_bytes("outer.zip", outer.clone());
        assert_eq!(result.files_scanned, 2);
        assert!(result
            .matches
            .iter()
            .all(|m| !m.layer_path.contains("core.txt")));

        let deep = ScanSession::new(Arc::new({
            let mut set = SignatureSet::default();
            set.insert(pattern_sig("Test.P", b"EVIL core")).unwrap();
            set
        }), Config::default())
        .with_policy(AlertPolicy::AllMatch);
        let result = deep.scan_bytes("outer.zip", outer);
        assert_eq!(result.verdict, Verdict::Infected);
        assert_eq!(
            result.matches[0].layer_path,
            "outer.zip!middle.zip!inner.zip!core.txt"
        );
    }

    #[test]
    fn test_bytecode_reports_after_content_matches() {
        let s = session(
            vec![
                Signature {
                    name: "BC.Trigger".into(),
                    target_size: TargetSize::Any,
                    engine_range: EngineRange::default(),
                    body: SignatureBody::Bytecode {
                        program: format!("VIRUSNAME:BC.Trigger\nTRIGGER:{}\n", hex::encode(b"EVIL"))
                            .into_bytes(),
                    },
                },
                pattern_sig("Test.Pattern", b"EVIL"),
            ],
            AlertPolicy::AllMatch,
        );
        let result = s.scan_bytes("target", b"EVIL data".to_vec());

        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].kind, MatchKind::Pattern);
        assert_eq!(result.matches[1].kind, MatchKind::Bytecode);
        assert_eq!(result.matches[1].report_line(), "BC.Trigger FOUND");
    }

    #[test]
    fn test_scan_is_idempotent() {
        let content = b"EVIL payload".to_vec();
        let s = session(vec![pattern_sig("Test.P", b"EVIL")], AlertPolicy::AllMatch);
        let first = s.scan_bytes("target", content.clone());
        let second = s.scan_bytes("target", content);
        assert_eq!(first.matches, second.matches);
        assert_eq!(first.files_scanned, second.files_scanned);
    }

    #[test]
    fn test_unreadable_file_is_fatal() {
        let s = session(vec![], AlertPolicy::AllMatch);
        let err = s.scan_file(Path::new("/nonexistent/target")).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_scan_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        std::fs::write(&path, b"EVIL on disk").unwrap();

        let s = session(vec![pattern_sig("Test.P", b"EVIL")], AlertPolicy::AllMatch);
        let result = s.scan_file(&path).unwrap();
        assert_eq!(result.verdict, Verdict::Infected);
    }
}
