//! The per-layer matching engine.
//!
//! One layer (a top-level file or an extracted item) is matched against
//! every signature kind in a fixed order: whole-content hashes, PE
//! metadata hashes, byte patterns, logical signatures, and finally
//! bytecode. Bytecode always runs last because its programs may require
//! content matches recorded earlier on the same layer.

pub mod bytecode;
pub mod pattern;
pub mod pe;

use crate::core::types::Match;
use crate::signatures::set::SignatureSet;
use crate::signatures::signature::{HashAlgo, PatternOffset, Signature, SignatureBody};
use crate::utils::hash::ContentDigests;
use bytecode::BytecodeEngine;

/// Matches one layer's content against a signature set.
pub struct MatchEngine<'a> {
    set: &'a SignatureSet,
    bytecode: &'a dyn BytecodeEngine,
}

impl<'a> MatchEngine<'a> {
    pub fn new(set: &'a SignatureSet, bytecode: &'a dyn BytecodeEngine) -> Self {
        Self { set, bytecode }
    }

    /// Match every signature kind against one layer.
    ///
    /// With `stop_after_first` the first firing signature ends the layer;
    /// otherwise every firing signature is collected, in kind order. A
    /// signature never fires twice on the same layer, but two signatures
    /// sharing a name (exact-size and wildcard-size hash entries) each
    /// produce their own match.
    pub fn scan_layer(
        &self,
        content: &[u8],
        layer_path: &str,
        stop_after_first: bool,
    ) -> Vec<Match> {
        let mut matches = Vec::new();

        self.match_file_hashes(content, layer_path, &mut matches);
        if stop_after_first && !matches.is_empty() {
            matches.truncate(1);
            return matches;
        }

        self.match_pe_hashes(content, layer_path, &mut matches);
        if stop_after_first && !matches.is_empty() {
            matches.truncate(1);
            return matches;
        }

        self.match_patterns(content, layer_path, &mut matches);
        if stop_after_first && !matches.is_empty() {
            matches.truncate(1);
            return matches;
        }

        self.match_logicals(content, layer_path, &mut matches);
        if stop_after_first && !matches.is_empty() {
            matches.truncate(1);
            return matches;
        }

        self.match_bytecode(content, layer_path, &mut matches);
        if stop_after_first {
            matches.truncate(1);
        }
        matches
    }

    fn match_file_hashes(&self, content: &[u8], layer_path: &str, matches: &mut Vec<Match>) {
        let digests = ContentDigests::of(content);
        let lookups = [
            (HashAlgo::Md5, &digests.md5),
            (HashAlgo::Sha1, &digests.sha1),
            (HashAlgo::Sha256, &digests.sha256),
        ];
        for (algo, digest) in lookups {
            for sig in self.set.file_hash_candidates(algo, digest, digests.size) {
                matches.push(make_match(sig, layer_path, None));
            }
        }
    }

    fn match_pe_hashes(&self, content: &[u8], layer_path: &str, matches: &mut Vec<Match>) {
        if !self.set.wants_pe_metadata() {
            return;
        }
        let Some(meta) = pe::extract(content) else {
            return;
        };

        for sig in self
            .set
            .import_hash_candidates(&meta.import_hash, meta.import_count)
        {
            matches.push(make_match(sig, layer_path, None));
        }

        // Identical sections must not fire the same signature twice
        let mut fired: Vec<*const Signature> = Vec::new();
        for section in &meta.sections {
            for sig in self
                .set
                .section_hash_candidates(&section.md5, section.raw_size)
            {
                let id = sig as *const Signature;
                if fired.contains(&id) {
                    continue;
                }
                fired.push(id);
                matches.push(make_match(sig, layer_path, None));
            }
        }
    }

    fn match_patterns(&self, content: &[u8], layer_path: &str, matches: &mut Vec<Match>) {
        for sig in self.set.pattern_signatures() {
            let SignatureBody::Pattern { offset, pattern } = &sig.body else {
                continue;
            };
            let hit = match offset {
                PatternOffset::Any => pattern.find(content),
                PatternOffset::Absolute(at) => {
                    let at = *at as usize;
                    pattern.matches_at(content, at).then_some(at)
                }
            };
            if let Some(pos) = hit {
                matches.push(make_match(sig, layer_path, Some(pos)));
            }
        }
    }

    fn match_logicals(&self, content: &[u8], layer_path: &str, matches: &mut Vec<Match>) {
        for sig in self.set.logical_signatures() {
            let SignatureBody::Logical { expr, subsigs } = &sig.body else {
                continue;
            };
            let hits: Vec<bool> = subsigs.iter().map(|p| p.find(content).is_some()).collect();
            if expr.evaluate(&|i| hits.get(i).copied().unwrap_or(false)) {
                matches.push(make_match(sig, layer_path, None));
            }
        }
    }

    fn match_bytecode(&self, content: &[u8], layer_path: &str, matches: &mut Vec<Match>) {
        // Snapshot so a firing bytecode signature cannot satisfy another
        // program's REQUIRES on the same layer.
        let prior = matches.clone();
        for sig in self.set.bytecode_signatures() {
            let SignatureBody::Bytecode { program } = &sig.body else {
                continue;
            };
            match self.bytecode.evaluate(program, content, &prior) {
                Ok(true) => matches.push(make_match(sig, layer_path, None)),
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Bytecode evaluation failed for {}: {}", sig.name, e);
                }
            }
        }
    }
}

fn make_match(sig: &Signature, layer_path: &str, offset: Option<usize>) -> Match {
    Match {
        signature_name: sig.name.clone(),
        kind: sig.kind(),
        layer_path: layer_path.to_string(),
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MatchKind;
    use crate::signatures::signature::{EngineRange, LogicExpr, TargetSize};
    use crate::utils::hash::md5_hex;
    use bytecode::TriggerEngine;

    fn set_with(sigs: Vec<Signature>) -> SignatureSet {
        let mut set = SignatureSet::default();
        for sig in sigs {
            set.insert(sig).unwrap();
        }
        set
    }

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

    fn pattern_sig(name: &str, hexsig: &str, offset: PatternOffset) -> Signature {
        Signature {
            name: name.into(),
            target_size: TargetSize::Any,
            engine_range: EngineRange::default(),
            body: SignatureBody::Pattern {
                offset,
                pattern: pattern::Pattern::compile(hexsig).unwrap(),
            },
        }
    }

    #[test]
    fn test_exact_and_wildcard_hash_both_fire() {
        let content = b"ferroscan-hash-target";
        let set = set_with(vec![
            hash_sig("Test.Exact", content, TargetSize::Exact(content.len() as u64)),
            hash_sig("Test.Wild", content, TargetSize::Any),
        ]);
        let engine = MatchEngine::new(&set, &TriggerEngine);

        let matches = engine.scan_layer(content, "file", false);
        let names: Vec<&str> = matches.iter().map(|m| m.signature_name.as_str()).collect();
        assert_eq!(names, vec!["Test.Exact", "Test.Wild"]);
    }

    #[test]
    fn test_first_match_yields_exactly_one() {
        let content = b"CLAM pattern target";
        let set = set_with(vec![
            hash_sig("Test.Hash", content, TargetSize::Any),
            // "CLAM"
            pattern_sig("Test.Pattern", "434c414d", PatternOffset::Any),
        ]);
        let engine = MatchEngine::new(&set, &TriggerEngine);

        let matches = engine.scan_layer(content, "file", true);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].signature_name, "Test.Hash");

        let matches = engine.scan_layer(content, "file", false);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_absolute_offset_pattern() {
        let set = set_with(vec![pattern_sig(
            "Test.At4",
            "434c414d",
            PatternOffset::Absolute(4),
        )]);
        let engine = MatchEngine::new(&set, &TriggerEngine);

        assert_eq!(engine.scan_layer(b"xxxxCLAM", "f", false).len(), 1);
        assert!(engine.scan_layer(b"CLAMxxxx", "f", false).is_empty());
    }

    #[test]
    fn test_logical_signature() {
        let set = set_with(vec![Signature {
            name: "Test.Logic".into(),
            target_size: TargetSize::Any,
            engine_range: EngineRange::default(),
            body: SignatureBody::Logical {
                expr: LogicExpr::parse("0&1").unwrap(),
                subsigs: vec![
                    pattern::Pattern::compile("434c414d").unwrap(), // CLAM
                    pattern::Pattern::compile("5649").unwrap(),     // VI
                ],
            },
        }]);
        let engine = MatchEngine::new(&set, &TriggerEngine);

        assert_eq!(engine.scan_layer(b"CLAM..VI", "f", false).len(), 1);
        assert!(engine.scan_layer(b"CLAM only", "f", false).is_empty());
    }

    #[test]
    fn test_bytecode_runs_after_content() {
        let content = b"CLAM target";
        let set = set_with(vec![
            Signature {
                name: "BC.Requires".into(),
                target_size: TargetSize::Any,
                engine_range: EngineRange::default(),
                body: SignatureBody::Bytecode {
                    program: b"VIRUSNAME:BC.Requires\nREQUIRES:Test.Pattern\n".to_vec(),
                },
            },
            pattern_sig("Test.Pattern", "434c414d", PatternOffset::Any),
        ]);
        let engine = MatchEngine::new(&set, &TriggerEngine);

        let matches = engine.scan_layer(content, "f", false);
        let names: Vec<&str> = matches.iter().map(|m| m.signature_name.as_str()).collect();
        // Content match first even though the bytecode sig loaded first
        assert_eq!(names, vec!["Test.Pattern", "BC.Requires"]);
        assert_eq!(matches[1].kind, MatchKind::Bytecode);
    }

    #[test]
    fn test_import_and_section_hashes_fire_on_pe() {
        let section_data = b"distinctive section bytes";
        let image = pe::synthetic_pe(section_data);

        let set = set_with(vec![
            Signature {
                name: "Test.PESection".into(),
                target_size: TargetSize::Exact(section_data.len() as u64),
                engine_range: EngineRange::default(),
                body: SignatureBody::SectionHash {
                    digest: md5_hex(section_data),
                },
            },
            Signature {
                name: "Test.PESection.NoSize".into(),
                target_size: TargetSize::Any,
                engine_range: EngineRange::default(),
                body: SignatureBody::SectionHash {
                    digest: md5_hex(section_data),
                },
            },
            Signature {
                name: "Test.Imphash".into(),
                target_size: TargetSize::Exact(0),
                engine_range: EngineRange::default(),
                body: SignatureBody::ImportHash {
                    digest: md5_hex(b""),
                },
            },
            Signature {
                name: "Test.Imphash.NoSize".into(),
                target_size: TargetSize::Any,
                engine_range: EngineRange::default(),
                body: SignatureBody::ImportHash {
                    digest: md5_hex(b""),
                },
            },
        ]);
        let engine = MatchEngine::new(&set, &TriggerEngine);

        let matches = engine.scan_layer(&image, "clam.exe", false);
        let names: Vec<&str> = matches.iter().map(|m| m.signature_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Test.Imphash",
                "Test.Imphash.NoSize",
                "Test.PESection",
                "Test.PESection.NoSize"
            ]
        );
        assert_eq!(matches[0].kind, MatchKind::ImportHash);
        assert_eq!(matches[2].kind, MatchKind::SectionHash);

        // A wrong section size leaves only the wildcard entries
        let mut set = SignatureSet::default();
        set.insert(Signature {
            name: "Test.WrongSize".into(),
            target_size: TargetSize::Exact(1),
            engine_range: EngineRange::default(),
            body: SignatureBody::SectionHash {
                digest: md5_hex(section_data),
            },
        })
        .unwrap();
        let engine = MatchEngine::new(&set, &TriggerEngine);
        assert!(engine.scan_layer(&image, "clam.exe", false).is_empty());
    }

    #[test]
    fn test_clean_layer() {
        let set = set_with(vec![pattern_sig("Test.P", "deadbeef", PatternOffset::Any)]);
        let engine = MatchEngine::new(&set, &TriggerEngine);
        assert!(engine.scan_layer(b"harmless", "f", false).is_empty());
    }
}
