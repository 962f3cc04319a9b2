/// Computes BLAKE3 over attachment bytes and returns the 32-byte digest.
pub fn content_digest(input: &[u8]) -> [u8; 32] {
    *blake3::hash(input).as_bytes()
}

/// Lowercase hex form of [`content_digest`], used for content-addressed file names.
pub fn content_digest_hex(input: &[u8]) -> String {
    hex::encode(content_digest(input))
}

#[cfg(test)]
mod tests {
    use super::{content_digest, content_digest_hex};

    #[test]
    fn digest_is_deterministic() {
        let input = b"feedrelay";
        assert_eq!(content_digest(input), content_digest(input));
    }

    #[test]
    fn digest_changes_when_input_changes() {
        assert_ne!(content_digest(b"media-a"), content_digest(b"media-b"));
    }

    #[test]
    fn hex_digest_is_64_lowercase_chars() {
        let hex = content_digest_hex(b"photo bytes");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
