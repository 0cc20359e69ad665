//! PE metadata extraction for import-hash and section-hash matching.
//!
//! Parsing is strictly best-effort: a layer that fails to parse as PE
//! simply yields no metadata, it never fails the scan.

use crate::utils::hash::md5_hex;
use goblin::pe::PE;

/// Digestable PE facts for one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeMetadata {
    /// Import-table hash (MD5 over the normalized import list).
    pub import_hash: String,
    /// Number of imported functions.
    pub import_count: u64,
    /// Per-section raw-data digests.
    pub sections: Vec<SectionDigest>,
}

/// Digest of one section's raw data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDigest {
    /// MD5 of the raw section bytes.
    pub md5: String,
    /// Raw data size on disk, which is what section signatures key on.
    pub raw_size: u64,
}

/// Extract import and section digests from a buffer, if it is a PE file.
pub fn extract(buffer: &[u8]) -> Option<PeMetadata> {
    if buffer.len() < 2 || &buffer[..2] != b"MZ" {
        return None;
    }

    let pe = match PE::parse(buffer) {
        Ok(pe) => pe,
        Err(e) => {
            log::debug!("Not a parseable PE file: {}", e);
            return None;
        }
    };

    let entries: Vec<String> = pe
        .imports
        .iter()
        .map(|imp| {
            format!(
                "{}.{}",
                normalize_dll(&imp.dll),
                normalize_func(&imp.name)
            )
        })
        .collect();

    let import_hash = md5_hex(entries.join(",").as_bytes());
    let import_count = entries.len() as u64;

    let sections = pe
        .sections
        .iter()
        .filter_map(|section| {
            let start = section.pointer_to_raw_data as usize;
            let size = section.size_of_raw_data as usize;
            let end = start.checked_add(size)?;
            let data = buffer.get(start..end)?;
            Some(SectionDigest {
                md5: md5_hex(data),
                raw_size: size as u64,
            })
        })
        .collect();

    Some(PeMetadata {
        import_hash,
        import_count,
        sections,
    })
}

/// Lowercase the DLL name and strip a recognized module extension.
fn normalize_dll(dll: &str) -> String {
    let lower = dll.to_lowercase();
    for ext in [".dll", ".sys", ".ocx", ".drv"] {
        if let Some(stem) = lower.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    lower
}

/// Lowercase the function name; ordinal imports become `ordN`.
fn normalize_func(name: &str) -> String {
    if let Some(ord) = name.strip_prefix("ORDINAL ") {
        return format!("ord{}", ord);
    }
    name.to_lowercase()
}

/// Build a minimal PE32 image with one `.text` section holding `section_data`
/// and an empty import table. Enough structure for goblin to parse.
#[cfg(test)]
pub(crate) fn synthetic_pe(section_data: &[u8]) -> Vec<u8> {
    const SECTION_OFFSET: usize = 0x200;
    let mut buf = vec![0u8; SECTION_OFFSET + section_data.len()];

    let put16 = |buf: &mut [u8], at: usize, v: u16| buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    let put32 = |buf: &mut [u8], at: usize, v: u32| buf[at..at + 4].copy_from_slice(&v.to_le_bytes());

    // DOS header
    buf[0] = b'M';
    buf[1] = b'Z';
    put32(&mut buf, 0x3c, 0x40); // e_lfanew

    // PE signature + COFF header
    buf[0x40..0x44].copy_from_slice(b"PE\0\0");
    put16(&mut buf, 0x44, 0x014c); // i386
    put16(&mut buf, 0x46, 1); // one section
    put16(&mut buf, 0x54, 0xe0); // optional header size
    put16(&mut buf, 0x56, 0x0102); // executable, 32-bit

    // Optional header (PE32)
    put16(&mut buf, 0x58, 0x010b);
    put32(&mut buf, 0x68, 0x1000); // entry point
    put32(&mut buf, 0x74, 0x0040_0000); // image base
    put32(&mut buf, 0x78, 0x1000); // section alignment
    put32(&mut buf, 0x7c, 0x200); // file alignment
    put16(&mut buf, 0x88, 4); // subsystem version
    put32(&mut buf, 0x90, 0x2000); // size of image
    put32(&mut buf, 0x94, 0x200); // size of headers
    put16(&mut buf, 0x9c, 3); // console subsystem
    put32(&mut buf, 0xb4, 16); // data directory count (all zeroed)

    // Section table
    buf[0x138..0x13d].copy_from_slice(b".text");
    put32(&mut buf, 0x140, section_data.len() as u32); // virtual size
    put32(&mut buf, 0x144, 0x1000); // virtual address
    put32(&mut buf, 0x148, section_data.len() as u32); // size of raw data
    put32(&mut buf, 0x14c, SECTION_OFFSET as u32); // pointer to raw data
    put32(&mut buf, 0x15c, 0x6000_0020); // code | read | execute

    buf[SECTION_OFFSET..].copy_from_slice(section_data);
    buf
}
