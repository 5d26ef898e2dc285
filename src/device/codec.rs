// src/device/codec.rs
//
// Command encoder for the device's NMEA-0183 derived protocol.
// Wire format: `$<verb>[,<arg>]...*<XX>\r\n` where XX is the XOR of every
// byte between `$` and `*`, rendered as two uppercase hex digits.

use crate::checksums::{checksum_hex, xor_checksum, CHECKSUM_SEPARATOR, SENTENCE_MARKER};
use crate::io::IoError;

/// Line terminator appended to every command.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

const FIELD_SEPARATOR: char = ',';

/// Characters that would corrupt the sentence structure if embedded in a field.
const RESERVED: [char; 5] = [
    SENTENCE_MARKER as char,
    CHECKSUM_SEPARATOR as char,
    FIELD_SEPARATOR,
    '\r',
    '\n',
];

fn check_field(what: &str, value: &str) -> Result<(), IoError> {
    if let Some(c) = value.chars().find(|c| RESERVED.contains(c)) {
        return Err(IoError::Validation(format!(
            "{} '{}' contains reserved character {:?}",
            what, value, c
        )));
    }
    if !value.is_ascii() {
        return Err(IoError::Validation(format!("{} '{}' is not ASCII", what, value)));
    }
    Ok(())
}

/// Build the interior payload (`verb,arg,...`) without marker or checksum.
///
/// `None` and empty arguments keep their position as empty fields; the
/// device reads an empty field as "leave this setting unchanged".
pub fn build_payload<S: AsRef<str>>(verb: &str, args: &[Option<S>]) -> Result<String, IoError> {
    if verb.is_empty() {
        return Err(IoError::Validation("Command verb is empty".to_string()));
    }
    check_field("Command verb", verb)?;

    let mut payload = String::with_capacity(verb.len() + args.len() * 4);
    payload.push_str(verb);
    for arg in args {
        payload.push(FIELD_SEPARATOR);
        if let Some(value) = arg {
            let value = value.as_ref();
            check_field("Argument", value)?;
            payload.push_str(value);
        }
    }
    Ok(payload)
}

/// Seal a payload: marker, payload, `*`, checksum digits, CRLF.
pub fn seal_payload(payload: &str) -> Vec<u8> {
    let checksum = xor_checksum(payload.as_bytes());
    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(SENTENCE_MARKER);
    out.extend_from_slice(payload.as_bytes());
    out.push(CHECKSUM_SEPARATOR);
    out.extend_from_slice(checksum_hex(checksum).as_bytes());
    out.extend_from_slice(LINE_TERMINATOR);
    out
}

/// Encode a complete command ready for the wire.
pub fn encode<S: AsRef<str>>(verb: &str, args: &[Option<S>]) -> Result<Vec<u8>, IoError> {
    let payload = build_payload(verb, args)?;
    Ok(seal_payload(&payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::verify_sentence;

    fn text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_encode_sentence_enable() {
        let out = encode("PAMTC", &[Some("EN"), Some("GGA"), Some("1"), Some("10")]).unwrap();
        assert_eq!(text(&out), "$PAMTC,EN,GGA,1,10*31\r\n");
        assert_eq!(verify_sentence(&text(&out)), Some(true));
    }

    #[test]
    fn test_checksum_matches_payload_xor() {
        let out = encode("PAMTC", &[Some("EN"), Some("GGA"), Some("1"), Some("10")]).unwrap();
        let line = text(&out);
        let digits = &line[line.len() - 4..line.len() - 2];
        let expected = xor_checksum(b"PAMTC,EN,GGA,1,10");
        assert_eq!(digits, format!("{:02X}", expected));
    }

    #[test]
    fn test_null_arguments_keep_their_position() {
        let out = encode("PAMTC", &[Some("EN"), Some("GGA"), Some("1"), None]).unwrap();
        assert_eq!(text(&out), "$PAMTC,EN,GGA,1,*30\r\n");

        let out = encode("PAMTC", &[None, Some(""), Some("X")]).unwrap();
        assert!(text(&out).starts_with("$PAMTC,,,X*"));
        assert_eq!(verify_sentence(&text(&out)), Some(true));
    }

    #[test]
    fn test_verb_only() {
        let out = encode::<&str>("PAMTX", &[]).unwrap();
        assert!(text(&out).starts_with("$PAMTX*"));
        assert!(out.ends_with(b"\r\n"));
    }

    #[test]
    fn test_reserved_characters_rejected() {
        for bad in ["A*B", "$X", "1,2", "x\r", "y\n"] {
            let err = encode("PAMTC", &[Some(bad)]).unwrap_err();
            assert!(matches!(err, IoError::Validation(_)), "{:?} accepted", bad);
        }
        assert!(matches!(encode::<&str>("", &[]), Err(IoError::Validation(_))));
        assert!(matches!(encode::<&str>("PA*MTC", &[]), Err(IoError::Validation(_))));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = encode("PAMTC", &[Some("BAUD"), Some("38400")]).unwrap();
        let b = encode("PAMTC", &[Some("BAUD"), Some("38400")]).unwrap();
        assert_eq!(a, b);
        assert_eq!(text(&a), "$PAMTC,BAUD,38400*66\r\n");
    }
}
