use subtle::ConstantTimeEq;

/// Constant-time equality for secrets (admin tokens, webhook secrets, mini-app
/// HMAC hex digests). Avoids timing side-channels on early-exit comparisons.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}

/// Constant-time equality over two strings, comparing as UTF-8 bytes.
pub fn ct_eq_str(a: &str, b: &str) -> bool {
    ct_eq(a.as_bytes(), b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_match() {
        assert!(ct_eq_str("secret-token", "secret-token"));
    }

    #[test]
    fn differing_strings_do_not_match() {
        assert!(!ct_eq_str("secret-token", "secret-tokeN"));
        assert!(!ct_eq_str("short", "longer-string"));
    }
}
