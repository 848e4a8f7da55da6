use sha1::{Digest, Sha1};

/// Hex SHA-1 digest of `text`.
pub fn sha1_hex(text: &str) -> String {
    format!("{:x}", Sha1::digest(text.as_bytes()))
}

/// First `len` hex digits of the SHA-1 digest of `text`.
pub fn short_hash(text: &str, len: usize) -> String {
    let mut digest = sha1_hex(text);
    digest.truncate(len);
    digest
}
