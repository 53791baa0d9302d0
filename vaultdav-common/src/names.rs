//! Remote naming rules for backup data.
//!
//! Layout under the backup root:
//! - `<token>/`: one collection per restore set
//! - `<token>/.backup.metadata`: the restore set's encrypted metadata
//! - `<token>/<chunk>`: chunk resources
//! - `.nomedia`: media-scanner sentinel
//! - `*.SeedSnap`: legacy snapshot folders
//!
//! Anything else found while discovering backups is reported as an anomaly.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Name of the metadata resource inside every restore-set folder.
pub const FILE_BACKUP_METADATA: &str = ".backup.metadata";

/// Sentinel that keeps media scanners out of the backup root.
pub const FILE_NO_MEDIA: &str = ".nomedia";

/// Suffix of folders left behind by the legacy snapshot format.
pub const LEGACY_SNAPSHOT_SUFFIX: &str = ".SeedSnap";

/// Chunk folders are named after the first byte of the chunk id, in hex.
pub const DEFAULT_CHUNK_FOLDER_PATTERN: &str = "^[a-f0-9]{2}$";

// At most 19 digits, so every match fits in a u64.
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^(0|[1-9][0-9]{0,18})$").expect("token pattern is a valid regex")
});

/// Identifier of one backup generation.
///
/// Serialized as its decimal form, one path segment directly under the
/// backup root. Valid values are `0..=i64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RestoreSetToken(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("restore set token out of range: {0}")]
pub struct InvalidToken(pub i128);

impl RestoreSetToken {
    pub const MAX: u64 = i64::MAX as u64;

    pub fn new(value: u64) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for RestoreSetToken {
    type Error = InvalidToken;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidToken(i128::from(value)))
    }
}

impl TryFrom<i64> for RestoreSetToken {
    type Error = InvalidToken;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(InvalidToken(i128::from(value)))
    }
}

impl From<RestoreSetToken> for u64 {
    fn from(token: RestoreSetToken) -> Self {
        token.0
    }
}

impl fmt::Display for RestoreSetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a folder name as a restore-set token.
///
/// Returns `None` for empty names, signs, leading zeros, non-digits and
/// values above `i64::MAX`.
///
/// # Panics
///
/// Panics if a name accepted by the token pattern fails to parse, which
/// means the pattern itself is wrong.
pub fn classify_as_token(name: &str) -> Option<RestoreSetToken> {
    if name.is_empty() || !TOKEN_PATTERN.is_match(name) {
        return None;
    }
    let value: u64 = match name.parse() {
        Ok(value) => value,
        Err(e) => panic!("token pattern accepted unparseable name {name:?}: {e}"),
    };
    RestoreSetToken::new(value)
}

/// Classifies names found under the backup root.
#[derive(Debug, Clone)]
pub struct FilenameClassifier {
    chunk_folder: Regex,
}

impl FilenameClassifier {
    /// Build a classifier with a custom chunk-folder pattern.
    pub fn new(chunk_folder_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            chunk_folder: Regex::new(chunk_folder_pattern)?,
        })
    }

    pub fn classify_as_token(&self, name: &str) -> Option<RestoreSetToken> {
        classify_as_token(name)
    }

    pub fn is_chunk_folder(&self, name: &str) -> bool {
        self.chunk_folder.is_match(name)
    }

    /// True for names that are neither the sentinel, a chunk folder, nor a
    /// legacy snapshot folder. Only used for diagnostics.
    pub fn is_anomalous_name(&self, name: &str) -> bool {
        !name.is_empty()
            && name != FILE_NO_MEDIA
            && !self.is_chunk_folder(name)
            && !name.ends_with(LEGACY_SNAPSHOT_SUFFIX)
    }
}

impl Default for FilenameClassifier {
    fn default() -> Self {
        Self {
            chunk_folder: Regex::new(DEFAULT_CHUNK_FOLDER_PATTERN)
                .expect("default chunk folder pattern is a valid regex"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify_edge_values() {
        assert_eq!(classify_as_token("0").map(u64::from), Some(0));
        assert_eq!(
            classify_as_token("1700000000000").map(u64::from),
            Some(1_700_000_000_000)
        );
        assert_eq!(
            classify_as_token("9223372036854775807").map(u64::from),
            Some(i64::MAX as u64)
        );
        assert_eq!(classify_as_token(""), None);
        assert_eq!(classify_as_token("00"), None);
        assert_eq!(classify_as_token("0123"), None);
        assert_eq!(classify_as_token("-1"), None);
        assert_eq!(classify_as_token("+1"), None);
        assert_eq!(classify_as_token("12 "), None);
        assert_eq!(classify_as_token("1e5"), None);
    }

    #[test]
    fn test_classify_out_of_range_is_absent() {
        // Matches the digit pattern but exceeds i64::MAX.
        assert_eq!(classify_as_token("9223372036854775808"), None);
        assert_eq!(classify_as_token("9999999999999999999"), None);
        // Too long for the pattern.
        assert_eq!(classify_as_token("18446744073709551615"), None);
        assert_eq!(classify_as_token("99999999999999999999"), None);
    }

    #[test]
    fn test_token_conversions() {
        assert!(RestoreSetToken::try_from(-1i64).is_err());
        assert!(RestoreSetToken::try_from(u64::MAX).is_err());
        let token = RestoreSetToken::try_from(42i64).unwrap();
        assert_eq!(token.get(), 42);
        assert_eq!(token.to_string(), "42");
    }

    #[test]
    fn test_anomalous_names() {
        let classifier = FilenameClassifier::default();
        assert!(!classifier.is_anomalous_name(FILE_NO_MEDIA));
        assert!(!classifier.is_anomalous_name("a3"));
        assert!(!classifier.is_anomalous_name("stale.SeedSnap"));
        assert!(!classifier.is_anomalous_name(""));
        assert!(classifier.is_anomalous_name("garbage123abc"));
        assert!(classifier.is_anomalous_name("A3"));
        assert!(classifier.is_anomalous_name("abc"));
        assert!(classifier.is_anomalous_name("no-media"));
    }

    #[test]
    fn test_custom_chunk_folder_pattern() {
        let classifier = FilenameClassifier::new("^(?:[a-f0-9]{2}|chunks-tmp)$").unwrap();
        assert!(!classifier.is_anomalous_name("chunks-tmp"));
        assert!(!classifier.is_anomalous_name("ff"));
        assert!(classifier.is_anomalous_name("chunks"));
        assert!(FilenameClassifier::new("[unclosed").is_err());
    }

    proptest! {
        #[test]
        fn token_round_trips(value in 0..=RestoreSetToken::MAX) {
            let token = classify_as_token(&value.to_string());
            prop_assert_eq!(token.map(u64::from), Some(value));
        }

        #[test]
        fn leading_zero_is_rejected(digits in "0[0-9]{1,18}") {
            prop_assert_eq!(classify_as_token(&digits), None);
        }

        #[test]
        fn sign_is_rejected(sign in "[+-]", digits in "[0-9]{1,18}") {
            prop_assert_eq!(classify_as_token(&format!("{sign}{digits}")), None);
        }

        #[test]
        fn non_digit_is_rejected(
            head in "[0-9]{0,5}",
            junk in "[^0-9]",
            tail in "[0-9]{0,5}",
        ) {
            prop_assert_eq!(classify_as_token(&format!("{head}{junk}{tail}")), None);
        }
    }
}
