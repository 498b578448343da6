//! Group stream naming: `x<base64(id)>r` / `x<base64(id)>d`, using the
//! archive's own 64-symbol alphabet (not the standard MIME one, which uses
//! `+/` — both of which are awkward in a `0`-terminated C-string stream
//! name table, hence the `_#` substitution).

const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_#";

fn digit_value(c: u8) -> Option<u32> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u32)
}

/// Encodes `id` as a minimal-length base64 string over [`ALPHABET`].
fn encode_id(id: u64) -> String {
    if id == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    let mut n = id;
    while n > 0 {
        digits.push(ALPHABET[(n % 64) as usize]);
        n /= 64;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap()
}

fn decode_id(s: &str) -> Option<u64> {
    let mut n: u64 = 0;
    for b in s.bytes() {
        n = n.checked_mul(64)?.checked_add(digit_value(b)? as u64)?;
    }
    Some(n)
}

pub fn reference_stream(group_id: u64) -> String {
    format!("x{}r", encode_id(group_id))
}

pub fn delta_stream(group_id: u64) -> String {
    format!("x{}d", encode_id(group_id))
}

/// Parses a group id back out of a stream name produced by
/// [`reference_stream`] or [`delta_stream`], if it matches that shape.
pub fn parse_group_id(name: &str) -> Option<u64> {
    let rest = name.strip_prefix('x')?;
    let body = rest.strip_suffix('r').or_else(|| rest.strip_suffix('d'))?;
    decode_id(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_and_large_ids() {
        for id in [0u64, 1, 63, 64, 65, 4095, 1_000_000] {
            let name = reference_stream(id);
            assert_eq!(parse_group_id(&name), Some(id));
            let name = delta_stream(id);
            assert_eq!(parse_group_id(&name), Some(id));
        }
    }

    #[test]
    fn ref_and_delta_names_differ() {
        assert_ne!(reference_stream(5), delta_stream(5));
    }
}
