// src/checksums.rs
//
// NMEA-style XOR checksum helpers.
// Used to seal outgoing device commands and to flag incoming sentences
// whose trailing `*XX` does not match their payload.

/// Leading marker of a sentence/command.
pub const SENTENCE_MARKER: u8 = b'$';

/// Separator between payload and checksum digits.
pub const CHECKSUM_SEPARATOR: u8 = b'*';

// ============================================================================
// Checksum Functions
// ============================================================================

/// XOR of all bytes.
pub fn xor_checksum(data: &[u8]) -> u8 {
    let mut result: u8 = 0;
    for &byte in data {
        result ^= byte;
    }
    result
}

/// Render a checksum as the two uppercase hex digits used on the wire.
pub fn checksum_hex(checksum: u8) -> String {
    hex::encode_upper([checksum])
}

/// Split a sentence into `(payload, transmitted checksum)`.
///
/// The payload is everything between the leading `$` and the `*`.
/// Returns `None` when the line has no marker, no separator, or the
/// checksum field is not exactly two hex digits.
pub fn split_sentence(line: &str) -> Option<(&str, u8)> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let body = line.strip_prefix(SENTENCE_MARKER as char)?;
    let star = body.rfind(CHECKSUM_SEPARATOR as char)?;
    let (payload, digits) = (&body[..star], &body[star + 1..]);
    if digits.len() != 2 {
        return None;
    }
    let decoded = hex::decode(digits).ok()?;
    Some((payload, decoded[0]))
}

/// Verify the checksum of a sentence.
///
/// `Some(true)` / `Some(false)` for lines that carry a checksum,
/// `None` for lines that do not look like a checksummed sentence.
pub fn verify_sentence(line: &str) -> Option<bool> {
    let (payload, transmitted) = split_sentence(line)?;
    Some(xor_checksum(payload.as_bytes()) == transmitted)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_checksum_basic() {
        // 0x01 ^ 0x02 ^ 0x03 ^ 0x04 ^ 0x05 = 0x01
        assert_eq!(xor_checksum(&[0x01, 0x02, 0x03, 0x04, 0x05]), 0x01);
    }

    #[test]
    fn test_xor_checksum_pairs() {
        assert_eq!(xor_checksum(&[0x01, 0x02, 0x03]), 0x00);
        assert_eq!(xor_checksum(&[0xFF, 0xFF]), 0x00);
        assert_eq!(xor_checksum(&[0xAA, 0x55]), 0xFF);
    }

    #[test]
    fn test_xor_checksum_empty() {
        assert_eq!(xor_checksum(&[]), 0);
    }

    #[test]
    fn test_checksum_hex_is_two_uppercase_digits() {
        assert_eq!(checksum_hex(0x0A), "0A");
        assert_eq!(checksum_hex(0xFF), "FF");
        assert_eq!(checksum_hex(0x00), "00");
    }

    #[test]
    fn test_verify_known_sentence() {
        // Standard NMEA example sentence
        let line = "$GPGLL,5057.970,N,00146.110,E,142451,A*27";
        assert_eq!(verify_sentence(line), Some(true));
        assert_eq!(verify_sentence(&format!("{}\r\n", line)), Some(true));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let line = "$GPGLL,5057.970,N,00146.110,E,142451,A*28";
        assert_eq!(verify_sentence(line), Some(false));
    }

    #[test]
    fn test_verify_ignores_unsealed_lines() {
        assert_eq!(verify_sentence("hello world"), None);
        assert_eq!(verify_sentence("$PAMTX,1"), None);
        assert_eq!(verify_sentence("$PAMTX,1*5"), None);
        assert_eq!(verify_sentence("$PAMTX,1*ZZ"), None);
    }

    #[test]
    fn test_split_sentence() {
        let (payload, cs) = split_sentence("$PAMTX,0*50").unwrap();
        assert_eq!(payload, "PAMTX,0");
        assert_eq!(cs, 0x50);
    }
}
