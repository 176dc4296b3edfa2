//! Flat key scanner for workout frames.
//!
//! Frames are single-level `{"key":value,...}` objects. Values are located
//! by searching for the literal `"key":` prefix; there is no escaping,
//! nesting or array support. The first occurrence wins.

use heapless::String;

/// Longest key we look up (`"elapsed_ms"` plus quotes, colon and quote).
const MAX_PATTERN: usize = 32;

/// Longest string value kept, in bytes.
pub const LABEL_CAPACITY: usize = 16;

/// Fixed-capacity string value.
pub type Label = String<LABEL_CAPACITY>;

/// Byte offset just past the first occurrence of `needle`.
fn find_after(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + needle.len())
}

/// Build `"key":` (and optionally the opening quote of a string value).
fn pattern(key: &str, string_value: bool) -> Option<heapless::Vec<u8, MAX_PATTERN>> {
    let mut p = heapless::Vec::new();
    p.push(b'"').ok()?;
    p.extend_from_slice(key.as_bytes()).ok()?;
    p.extend_from_slice(b"\":").ok()?;
    if string_value {
        p.push(b'"').ok()?;
    }
    Some(p)
}

/// True when the frame contains `needle` anywhere.
pub fn contains(frame: &[u8], needle: &[u8]) -> bool {
    find_after(frame, needle).is_some()
}

/// String value of `key`, read up to the next quote and truncated to the
/// capacity of [`Label`].
///
/// `None` when the key is absent or the value is unterminated.
pub fn string(frame: &[u8], key: &str) -> Option<Label> {
    let start = find_after(frame, &pattern(key, true)?)?;
    let rest = &frame[start..];
    let len = rest.iter().position(|&b| b == b'"')?;
    let raw = &rest[..len.min(LABEL_CAPACITY)];

    // A cut through a multi-byte character keeps the valid prefix.
    let text = match core::str::from_utf8(raw) {
        Ok(s) => s,
        Err(e) => core::str::from_utf8(&raw[..e.valid_up_to()]).ok()?,
    };

    let mut out = Label::new();
    out.push_str(text).ok()?;
    Some(out)
}

/// Unsigned integer value of `key`: the leading decimal digits after
/// `"key":`, saturating at `u32::MAX`. Missing key or no digits give 0.
pub fn integer(frame: &[u8], key: &str) -> u32 {
    let Some(p) = pattern(key, false) else {
        return 0;
    };
    let Some(start) = find_after(frame, &p) else {
        return 0;
    };

    frame[start..]
        .iter()
        .skip_while(|b| **b == b' ')
        .take_while(|b| b.is_ascii_digit())
        .fold(0u32, |acc, b| {
            acc.saturating_mul(10).saturating_add(u32::from(b - b'0'))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_string_values() {
        let frame = br#"{"event":"start","mode":"intervals","laps":8}"#;
        assert_eq!(string(frame, "event").as_deref(), Some("start"));
        assert_eq!(string(frame, "mode").as_deref(), Some("intervals"));
        assert_eq!(string(frame, "state"), None);
    }

    #[test]
    fn long_strings_are_truncated() {
        let frame = br#"{"mode":"a-very-long-mode-name-indeed"}"#;
        assert_eq!(string(frame, "mode").as_deref(), Some("a-very-long-mode"));
    }

    #[test]
    fn unterminated_string_is_missing() {
        assert_eq!(string(br#"{"event":"sta"#, "event"), None);
    }

    #[test]
    fn string_key_does_not_match_integer_value() {
        assert_eq!(string(br#"{"event":5}"#, "event"), None);
    }

    #[test]
    fn reads_leading_digits() {
        let frame = br#"{"event":"lap","lap":3,"lap_ms":65230,"split_ms":131000}"#;
        assert_eq!(integer(frame, "lap"), 3);
        assert_eq!(integer(frame, "lap_ms"), 65_230);
        assert_eq!(integer(frame, "split_ms"), 131_000);
    }

    #[test]
    fn missing_or_non_numeric_integers_are_zero() {
        let frame = br#"{"event":"done","total_ms":"soon"}"#;
        assert_eq!(integer(frame, "laps"), 0);
        assert_eq!(integer(frame, "total_ms"), 0);
    }

    #[test]
    fn integers_tolerate_spaces_and_saturate() {
        assert_eq!(integer(br#"{"laps": 12}"#, "laps"), 12);
        assert_eq!(integer(br#"{"laps":99999999999}"#, "laps"), u32::MAX);
    }

    #[test]
    fn contains_finds_substrings() {
        assert!(contains(br#"{"cmd":"hr_req"}"#, br#""cmd":"hr_req""#));
        assert!(!contains(b"", b"x"));
        assert!(!contains(b"abc", b""));
    }
}
