//! Cheap document inspection: is it encrypted, and how many pages.

use lopdf::Document;
use serde::Serialize;

const ENCRYPT_KEY: &[u8] = b"/Encrypt";

/// What the UI needs to know before asking for a password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub is_pdf: bool,
    /// The document carries an encryption dictionary
    pub encrypted: bool,
    /// `None` when the page tree cannot be read without the password
    pub page_count: Option<u32>,
    pub size_bytes: usize,
}

/// Inspect raw PDF bytes without a password.
pub fn inspect(bytes: &[u8]) -> DocumentInfo {
    let is_pdf = bytes.starts_with(b"%PDF-");
    let encrypted = is_pdf && has_encrypt_entry(bytes);
    let page_count = if is_pdf {
        Document::load_mem(bytes)
            .ok()
            .map(|doc| doc.get_pages().len() as u32)
    } else {
        None
    };

    DocumentInfo {
        is_pdf,
        encrypted,
        page_count,
        size_bytes: bytes.len(),
    }
}

/// Byte-level scan for an `/Encrypt` key in a trailer or xref stream.
///
/// Only matches the exact name, so `/EncryptMetadata` inside other
/// dictionaries does not count.
fn has_encrypt_entry(bytes: &[u8]) -> bool {
    let mut pos = 0;
    while let Some(found) = find(&bytes[pos..], ENCRYPT_KEY) {
        let end = pos + found + ENCRYPT_KEY.len();
        match bytes.get(end) {
            Some(next) if next.is_ascii_alphanumeric() => pos = end,
            _ => return true,
        }
    }
    false
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
