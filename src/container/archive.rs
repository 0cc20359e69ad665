//! ZIP extraction, tolerant of damaged or unusual archives.
//!
//! Extraction runs two passes over the same buffer:
//!
//! 1. The central directory, via the `zip` crate. This handles ordinary
//!    archives and self-extractor layouts where the archive sits after
//!    arbitrary prepended data.
//! 2. A raw sweep for `PK\x03\x04` local file headers at offsets the
//!    first pass did not cover. This recovers entries whose central
//!    directory records were truncated or stripped, and earlier archives
//!    in a concatenation (the central-directory pass only ever sees the
//!    last one).
//!
//! Damage never fails the scan; a structure that cannot be decoded simply
//! yields fewer items. Items come back in file order so child layers scan
//! in the order their bytes appear.

use crate::core::config::ScanLimits;
use crate::core::error::Error;
use std::io::Read;
use zip::ZipArchive;

const LOCAL_HEADER_MAGIC: &[u8; 4] = b"PK\x03\x04";
const LOCAL_HEADER_LEN: usize = 30;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// Flag bit 3: sizes live in a trailing data descriptor, not the header.
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// One file recovered from a container.
#[derive(Debug, Clone)]
pub struct ExtractedItem {
    /// Layer path of the item, e.g. `outer.zip!inner.txt`.
    pub name: String,
    /// Decompressed content.
    pub content: Vec<u8>,
}

/// Whether the buffer holds any container structure worth descending into.
pub fn contains_archive(buffer: &[u8]) -> bool {
    buffer
        .windows(LOCAL_HEADER_MAGIC.len())
        .any(|w| w == LOCAL_HEADER_MAGIC)
}

/// Extract every recoverable file from ZIP structures in `buffer`.
///
/// `parent` is the layer path of the containing buffer; item names are
/// formed as `parent!entry`.
pub fn extract(buffer: &[u8], parent: &str, limits: &ScanLimits) -> Vec<ExtractedItem> {
    if !contains_archive(buffer) {
        return Vec::new();
    }

    // (start of entry bytes, item) so the final order is file order
    let mut items: Vec<(u64, ExtractedItem)> = Vec::new();
    let mut covered: Vec<(u64, u64)> = Vec::new();

    extract_central(buffer, parent, limits, &mut items, &mut covered);
    extract_raw(buffer, parent, limits, &mut items, &covered);

    items.sort_by_key(|(offset, _)| *offset);
    if items.len() > limits.max_archive_entries {
        log::warn!(
            "{}: archive entry limit ({}) reached, ignoring the rest",
            parent,
            limits.max_archive_entries
        );
        items.truncate(limits.max_archive_entries);
    }

    items.into_iter().map(|(_, item)| item).collect()
}

/// Pass 1: entries reachable through the central directory.
fn extract_central(
    buffer: &[u8],
    parent: &str,
    limits: &ScanLimits,
    items: &mut Vec<(u64, ExtractedItem)>,
    covered: &mut Vec<(u64, u64)>,
) {
    let mut archive = match ZipArchive::new(std::io::Cursor::new(buffer)) {
        Ok(archive) => archive,
        Err(e) => {
            let err = Error::corrupt_container(parent, format!("no usable central directory: {}", e));
            log::debug!("{}", err);
            return;
        }
    };

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("{}: skipping damaged entry {} ({})", parent, index, e);
                continue;
            }
        };
        if !entry.is_file() {
            continue;
        }
        if entry.size() > limits.max_embedded_bytes() {
            log::warn!(
                "{}: entry {} exceeds the embedded size limit, skipping",
                parent,
                entry.name()
            );
            continue;
        }

        let header_start = entry.header_start();
        let data_end = entry.data_start() + entry.compressed_size();

        let mut content = Vec::with_capacity(entry.size() as usize);
        if let Err(e) = entry.read_to_end(&mut content) {
            log::debug!("{}: failed to decompress {} ({})", parent, entry.name(), e);
            continue;
        }

        covered.push((header_start, data_end));
        items.push((
            header_start,
            ExtractedItem {
                name: format!("{}!{}", parent, entry.name()),
                content,
            },
        ));
    }
}

/// Pass 2: local file headers at offsets the central directory missed.
fn extract_raw(
    buffer: &[u8],
    parent: &str,
    limits: &ScanLimits,
    items: &mut Vec<(u64, ExtractedItem)>,
    covered: &[(u64, u64)],
) {
    let mut offset = 0usize;
    while offset + LOCAL_HEADER_LEN <= buffer.len() {
        if &buffer[offset..offset + 4] != LOCAL_HEADER_MAGIC
            || covered
                .iter()
                .any(|&(start, end)| (offset as u64) >= start && (offset as u64) < end)
        {
            offset += 1;
            continue;
        }

        match parse_local_entry(buffer, offset, parent, limits) {
            Some((Some(item), next_offset)) => {
                items.push((offset as u64, item));
                offset = next_offset;
            }
            // Entry decoded but intentionally skipped; jump past its data
            Some((None, next_offset)) => offset = next_offset,
            None => offset += 1,
        }
    }
}

fn read_u16(buffer: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buffer[at], buffer[at + 1]])
}

fn read_u32(buffer: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3]])
}

/// Decode one local file header and its data.
///
/// `None` means the bytes do not form a decodable entry; `Some((None, end))`
/// means a valid entry was deliberately skipped and the sweep should resume
/// at `end`.
fn parse_local_entry(
    buffer: &[u8],
    offset: usize,
    parent: &str,
    limits: &ScanLimits,
) -> Option<(Option<ExtractedItem>, usize)> {
    let flags = read_u16(buffer, offset + 6);
    let method = read_u16(buffer, offset + 8);
    let compressed_size = read_u32(buffer, offset + 18) as usize;
    let uncompressed_size = read_u32(buffer, offset + 22) as usize;
    let name_len = read_u16(buffer, offset + 26) as usize;
    let extra_len = read_u16(buffer, offset + 28) as usize;

    if flags & FLAG_DATA_DESCRIPTOR != 0 && compressed_size == 0 {
        // Sizes only exist in the trailing descriptor; without the central
        // record there is no reliable way to find the data's end.
        log::debug!(
            "{}: local header at {} depends on a data descriptor, skipping",
            parent,
            offset
        );
        return None;
    }

    let name_start = offset + LOCAL_HEADER_LEN;
    let data_start = name_start.checked_add(name_len)?.checked_add(extra_len)?;
    let data_end = data_start.checked_add(compressed_size)?;
    if data_end > buffer.len() {
        return None;
    }

    let name = String::from_utf8_lossy(&buffer[name_start..name_start + name_len]).into_owned();
    if name.is_empty() || name.ends_with('/') {
        return None;
    }
    if uncompressed_size as u64 > limits.max_embedded_bytes() {
        log::warn!(
            "{}: entry {} exceeds the embedded size limit, skipping",
            parent,
            name
        );
        return Some((None, data_end));
    }

    let data = &buffer[data_start..data_end];
    let content = match method {
        METHOD_STORED => data.to_vec(),
        METHOD_DEFLATED => {
            let mut decoded = Vec::with_capacity(uncompressed_size);
            let limit = limits.max_embedded_bytes();
            let mut decoder = flate2::read::DeflateDecoder::new(data).take(limit);
            if let Err(e) = decoder.read_to_end(&mut decoded) {
                log::debug!("{}: failed to inflate {} ({})", parent, name, e);
                return None;
            }
            decoded
        }
        other => {
            log::debug!(
                "{}: entry {} uses unsupported method {}, skipping",
                parent,
                name,
                other
            );
            return None;
        }
    };

    Some((
        Some(ExtractedItem {
            name: format!("{}!{}", parent, name),
            content,
        }),
        data_end,
    ))
}
