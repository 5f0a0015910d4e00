//! Source-embeddable rendering of key blobs.
//!
//! A blob renders as a tab followed by its bytes as decimal literals
//! separated by `", "`. Before every N-th value the separator is followed
//! by a backslash line continuation and a tab, so the text can be pasted
//! into a C array initializer or macro.

use crate::error::{SignerError, SignerResult};

/// Values per line when rendering a public key.
pub const PUBLIC_KEY_VALUES_PER_LINE: usize = 10;

/// Values per line when rendering a private key.
pub const PRIVATE_KEY_VALUES_PER_LINE: usize = 15;

/// Renders bytes as a comma separated decimal list, breaking every `per_line` values.
#[must_use]
pub fn format_byte_list(bytes: &[u8], per_line: usize) -> String {
    let per_line = per_line.max(1);
    // Up to 3 digits plus ", " per byte, plus the breaks.
    let mut out = String::with_capacity(1 + bytes.len() * 5 + (bytes.len() / per_line) * 3);
    out.push('\t');
    for (i, byte) in bytes.iter().enumerate() {
        if i != 0 {
            out.push_str(", ");
            if i % per_line == 0 {
                out.push_str("\\\n\t");
            }
        }
        out.push_str(&byte.to_string());
    }
    out
}

/// Parses text produced by [`format_byte_list`] back into bytes.
///
/// Whitespace and backslash line continuations are ignored; a trailing
/// comma is tolerated.
pub fn parse_byte_list(text: &str) -> SignerResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut fields = text.split(',').peekable();
    while let Some(field) = fields.next() {
        let value = field.trim_matches(|c: char| c.is_whitespace() || c == '\\');
        if value.is_empty() {
            if fields.peek().is_none() && !bytes.is_empty() {
                break;
            }
            return Err(SignerError::InvalidKeyText(format!(
                "empty value at position {}",
                bytes.len()
            )));
        }
        let byte = value.parse::<u8>().map_err(|e| {
            SignerError::InvalidKeyText(format!("{value:?} at position {}: {e}", bytes.len()))
        })?;
        bytes.push(byte);
    }
    Ok(bytes)
}
