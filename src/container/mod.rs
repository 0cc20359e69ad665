//! Container recognition and extraction.

pub mod archive;

pub use archive::{contains_archive, extract, ExtractedItem};
