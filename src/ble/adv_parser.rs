//! Advertisement data (AD structure) helpers.

/// AD type: Shortened Local Name.
const AD_SHORTENED_LOCAL_NAME: u8 = 0x08;
/// AD type: Complete Local Name.
const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Extract the complete/shortened local name from advertisement data.
///
/// Returns the raw name bytes; malformed AD structures end the walk.
pub fn local_name(data: &[u8]) -> Option<&[u8]> {
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        if ad_type == AD_COMPLETE_LOCAL_NAME || ad_type == AD_SHORTENED_LOCAL_NAME {
            return Some(&data[i + 2..i + 1 + len]);
        }
        i += len + 1;
    }
    None
}

/// True when the advertised name equals `target` exactly (length and content).
pub fn advertises_name(data: &[u8], target: &str) -> bool {
    match local_name(data) {
        Some(name) => !name.is_empty() && name == target.as_bytes(),
        None => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
