use crate::TransferError;

/// Longest oid accepted; leaves room for a root path and extension within
/// S3's 1024-byte key limit.
pub const MAX_OID_LEN: usize = 128;

/// Validates that an oid is safe to use as the last segment of a remote key.
///
/// Rejects:
/// - Empty oids
/// - Oids longer than [`MAX_OID_LEN`]
/// - Anything other than ASCII alphanumerics, `-` and `_` (so no `/`,
///   `.`, whitespace or control characters)
pub fn validate_oid(oid: &str) -> Result<(), TransferError> {
    if oid.is_empty() {
        return Err(TransferError::InvalidOid("empty oid".into()));
    }

    if oid.len() > MAX_OID_LEN {
        return Err(TransferError::InvalidOid(format!(
            "oid longer than {MAX_OID_LEN} bytes"
        )));
    }

    if let Some(c) = oid
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(TransferError::InvalidOid(format!(
            "character {c:?} not allowed in {oid:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_oid() {
        assert!(validate_oid("").is_err());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(validate_oid("abc/def").is_err());
        assert!(validate_oid("..").is_err());
        assert!(validate_oid("a\\b").is_err());
    }

    #[test]
    fn rejects_whitespace_and_control() {
        assert!(validate_oid("abc def").is_err());
        assert!(validate_oid("abc\n").is_err());
    }

    #[test]
    fn rejects_non_ascii() {
        assert!(validate_oid("caf\u{e9}").is_err());
    }

    #[test]
    fn rejects_too_long() {
        assert!(validate_oid(&"a".repeat(MAX_OID_LEN + 1)).is_err());
        assert!(validate_oid(&"a".repeat(MAX_OID_LEN)).is_ok());
    }

    #[test]
    fn accepts_sha256_hex() {
        let oid = "4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393";
        assert!(validate_oid(oid).is_ok());
    }

    #[test]
    fn accepts_dash_and_underscore() {
        assert!(validate_oid("build-42_final").is_ok());
    }
}
