//! URL-safe codecs for addressing upstream resources.
//!
//! Two independent schemes are supported: unpadded URL-safe base64, used when
//! embedding a target URL into a relay path, and a literal substitution codec
//! for identifiers that were embedded into paths before base64 was adopted.

use crate::error::EncodingError;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};

/// Sentinel standing in for `/`.
pub const ENCODE_STR_SLASH: &str = "%FF-";

/// Sentinel standing in for `?`.
pub const ENCODE_STR_QUESTION: &str = "%DE-";

/// Escape for a literal `%`, so input that already holds a sentinel survives.
pub const ENCODE_STR_PERCENT: &str = "%25";

/// Base64 URL-encodes a string, stripping the `=` padding.
pub fn encode(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

/// Decodes a string produced by [`encode`], restoring the padding first.
pub fn decode(encoded: &str) -> Result<String, EncodingError> {
    let padding = (4 - encoded.len() % 4) % 4;
    let mut padded = String::with_capacity(encoded.len() + padding);
    padded.push_str(encoded);
    padded.extend(std::iter::repeat_n('=', padding));

    let bytes = URL_SAFE.decode(padded.as_bytes())?;
    Ok(String::from_utf8(bytes)?)
}

/// Replaces `/` and `?` with path-safe sentinels.
///
/// `%` is escaped as well; every `%` in the output starts a sentinel.
pub fn naive_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => encoded.push_str(ENCODE_STR_PERCENT),
            '/' => encoded.push_str(ENCODE_STR_SLASH),
            '?' => encoded.push_str(ENCODE_STR_QUESTION),
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Reverses [`naive_encode`] in a single left-to-right pass.
///
/// A `%` that starts no sentinel is kept as is.
pub fn naive_decode(value: &str) -> String {
    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('%') {
        decoded.push_str(&rest[..pos]);
        rest = &rest[pos..];

        let (c, len) = [
            (ENCODE_STR_SLASH, '/'),
            (ENCODE_STR_QUESTION, '?'),
            (ENCODE_STR_PERCENT, '%'),
        ]
        .into_iter()
        .find(|(sentinel, _)| rest.starts_with(sentinel))
        .map_or(('%', 1), |(sentinel, c)| (c, sentinel.len()));

        decoded.push(c);
        rest = &rest[len..];
    }

    decoded.push_str(rest);
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "a",
        "ab",
        "abc",
        "https://api.mangadex.org/manga/abc?includes[]=cover_art",
        "ワンピース / 第1話?",
        "emoji 📚 and tabs\t",
    ];

    #[test]
    fn test_base64_round_trip() {
        for sample in SAMPLES {
            assert_eq!(decode(&encode(sample)).unwrap(), *sample);
        }
    }

    #[test]
    fn test_base64_strips_padding() {
        assert_eq!(encode("a"), "YQ");
        assert_eq!(encode("ab"), "YWI");
        assert_eq!(encode("abc"), "YWJj");
        assert!(!encode("https://weebcentral.com/series/1").contains('='));
    }

    #[test]
    fn test_base64_is_url_safe() {
        assert_eq!(encode("???"), "Pz8_");
        assert_eq!(encode(">>>"), "Pj4-");
        assert_eq!(decode("Pz8_").unwrap(), "???");
    }

    #[test]
    fn test_base64_rejects_garbage() {
        assert!(decode("a").is_err());
        assert!(decode("!!!!").is_err());
    }

    #[test]
    fn test_naive_round_trip() {
        for sample in SAMPLES {
            assert_eq!(naive_decode(&naive_encode(sample)), *sample);
        }
    }

    #[test]
    fn test_naive_encode_sentinels() {
        assert_eq!(naive_encode("a/b?c"), "a%FF-b%DE-c");
        assert_eq!(naive_decode("a%FF-b%DE-c"), "a/b?c");
    }

    #[test]
    fn test_naive_round_trip_with_sentinels_in_input() {
        for sample in [
            "100%FF-off",
            "%DE-",
            "%25",
            "50% off/now?",
            "%%FF-%DE-%",
            "trailing%",
        ] {
            assert_eq!(naive_decode(&naive_encode(sample)), sample);
        }
        assert_eq!(naive_encode("100%FF-off"), "100%25FF-off");
    }

    #[test]
    fn test_naive_decode_keeps_stray_percent() {
        assert_eq!(naive_decode("50% off"), "50% off");
        assert_eq!(naive_decode("%"), "%");
    }
}
