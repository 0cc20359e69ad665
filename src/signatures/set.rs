//! The loaded signature set and its lookup indexes.

use crate::core::error::{Error, Result};
use crate::signatures::parser::{self, KNOWN_EXTENSIONS};
use crate::signatures::signature::{HashAlgo, Signature, SignatureBody};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Options controlling database loading.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Load unsigned bytecode databases (`.cbc`).
    pub bytecode_unsigned: bool,
}

/// Every loaded signature, indexed by kind for candidate lookup.
///
/// Hash digests index into `sigs` rather than owning their signatures so
/// that an exact-size and a wildcard-size entry with the same digest stay
/// distinct. Deduplicating by digest would silently drop alerts.
#[derive(Debug, Default)]
pub struct SignatureSet {
    sigs: Vec<Signature>,
    file_hashes: HashMap<(HashAlgo, String), Vec<usize>>,
    import_hashes: HashMap<String, Vec<usize>>,
    section_hashes: HashMap<String, Vec<usize>>,
    patterns: Vec<usize>,
    logicals: Vec<usize>,
    bytecodes: Vec<usize>,
}

impl SignatureSet {
    /// Load and merge every database under the given sources.
    ///
    /// A source may be a database file or a directory; directories are
    /// read one level deep in name order so loads are deterministic.
    pub fn load(sources: &[PathBuf], options: &LoadOptions) -> Result<Self> {
        let mut set = SignatureSet::default();

        for source in sources {
            if source.is_dir() {
                let mut entries: Vec<PathBuf> = std::fs::read_dir(source)
                    .map_err(|e| Error::DatabaseRead {
                        path: source.clone(),
                        source: e,
                    })?
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| is_database(p))
                    .collect();
                entries.sort();
                for path in entries {
                    set.load_file(&path, options)?;
                }
            } else {
                set.load_file(source, options)?;
            }
        }

        log::info!("Signature set loaded: {} signature(s)", set.len());
        Ok(set)
    }

    fn load_file(&mut self, path: &Path, options: &LoadOptions) -> Result<()> {
        for sig in parser::parse_database(path, options.bytecode_unsigned)? {
            self.insert(sig)?;
        }
        Ok(())
    }

    /// Insert one signature, indexing it by kind.
    ///
    /// Two signatures may share a name only when their target sizes differ
    /// (the exact-size/wildcard-size pairing); otherwise the load fails.
    pub fn insert(&mut self, sig: Signature) -> Result<()> {
        if !sig.eligible() {
            log::debug!(
                "Skipping signature outside engine functionality range: {}",
                sig.name
            );
            return Ok(());
        }

        if self
            .sigs
            .iter()
            .any(|s| s.name == sig.name && s.target_size == sig.target_size)
        {
            return Err(Error::DuplicateSignature(sig.name));
        }

        let idx = self.sigs.len();
        match &sig.body {
            SignatureBody::FileHash { algo, digest } => {
                self.file_hashes
                    .entry((*algo, digest.clone()))
                    .or_default()
                    .push(idx);
            }
            SignatureBody::ImportHash { digest } => {
                self.import_hashes.entry(digest.clone()).or_default().push(idx);
            }
            SignatureBody::SectionHash { digest } => {
                self.section_hashes.entry(digest.clone()).or_default().push(idx);
            }
            SignatureBody::Pattern { .. } => self.patterns.push(idx),
            SignatureBody::Logical { .. } => self.logicals.push(idx),
            SignatureBody::Bytecode { .. } => self.bytecodes.push(idx),
        }
        self.sigs.push(sig);
        Ok(())
    }

    /// Number of loaded signatures.
    pub fn len(&self) -> usize {
        self.sigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }

    /// Whole-content hash signatures matching a digest and content size.
    pub fn file_hash_candidates(
        &self,
        algo: HashAlgo,
        digest: &str,
        size: u64,
    ) -> impl Iterator<Item = &Signature> {
        self.candidates(&self.file_hashes, &(algo, digest.to_string()), size)
    }

    /// Import-hash signatures matching a digest and import count.
    pub fn import_hash_candidates(
        &self,
        digest: &str,
        import_count: u64,
    ) -> impl Iterator<Item = &Signature> {
        self.candidates(&self.import_hashes, &digest.to_string(), import_count)
    }

    /// Section-hash signatures matching a digest and raw section size.
    pub fn section_hash_candidates(
        &self,
        digest: &str,
        section_size: u64,
    ) -> impl Iterator<Item = &Signature> {
        self.candidates(&self.section_hashes, &digest.to_string(), section_size)
    }

    fn candidates<'a, K: std::hash::Hash + Eq>(
        &'a self,
        index: &'a HashMap<K, Vec<usize>>,
        key: &K,
        size: u64,
    ) -> impl Iterator<Item = &'a Signature> {
        index
            .get(key)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.sigs[i])
            .filter(move |s| s.target_size.matches(size))
    }

    /// Every byte-pattern signature.
    pub fn pattern_signatures(&self) -> impl Iterator<Item = &Signature> {
        self.patterns.iter().map(move |&i| &self.sigs[i])
    }

    /// Every logical signature.
    pub fn logical_signatures(&self) -> impl Iterator<Item = &Signature> {
        self.logicals.iter().map(move |&i| &self.sigs[i])
    }

    /// Every bytecode signature.
    pub fn bytecode_signatures(&self) -> impl Iterator<Item = &Signature> {
        self.bytecodes.iter().map(move |&i| &self.sigs[i])
    }

    /// Whether any PE-specific signature (import or section hash) is loaded.
    /// When none is, layers never need PE parsing.
    pub fn wants_pe_metadata(&self) -> bool {
        !self.import_hashes.is_empty() || !self.section_hashes.is_empty()
    }
}

fn is_database(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| KNOWN_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
