//! Whitespace-preserving content partition (`spec.md` §4.3).
//!
//! Splits raw bytes into `(prefix, trimmed, suffix)` such that
//! `prefix ++ trimmed ++ suffix == data` and `trimmed` has no leading or
//! trailing Unicode-whitespace byte. Bytes are classified individually, each
//! viewed as its own Latin-1 code point (`char::is_whitespace`), not as a
//! decoded UTF-8 stream — this matches the spec's "Unicode whitespace
//! classification on each byte viewed as a code point".

fn is_whitespace_byte(b: u8) -> bool {
    (b as char).is_whitespace()
}

/// Partition `data` into `(prefix, trimmed, suffix)`.
///
/// If every byte is whitespace (including the empty-input case), the whole
/// input is returned as `prefix` with empty `trimmed` and `suffix`, per
/// `spec.md` §4.3.
pub fn partition(data: &[u8]) -> (&[u8], &[u8], &[u8]) {
    let first_non_ws = data.iter().position(|&b| !is_whitespace_byte(b));
    let Some(first) = first_non_ws else {
        return (data, &data[0..0], &data[0..0]);
    };
    let last = data
        .iter()
        .rposition(|&b| !is_whitespace_byte(b))
        .expect("first_non_ws is Some, so at least one non-whitespace byte exists");
    (&data[..first], &data[first..=last], &data[last + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_all_prefix() {
        let (p, t, s) = partition(b"");
        assert_eq!((p, t, s), (&b""[..], &b""[..], &b""[..]));
    }

    #[test]
    fn all_whitespace_is_all_prefix() {
        let (p, t, s) = partition(b"   \t\n ");
        assert_eq!(p, b"   \t\n ");
        assert!(t.is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn trims_both_sides() {
        let (p, t, s) = partition(b"  hello world  ");
        assert_eq!(p, b"  ");
        assert_eq!(t, b"hello world");
        assert_eq!(s, b"  ");
    }

    #[test]
    fn no_whitespace_is_all_trimmed() {
        let (p, t, s) = partition(b"hello");
        assert!(p.is_empty());
        assert_eq!(t, b"hello");
        assert!(s.is_empty());
    }

    #[test]
    fn reassembly_round_trips() {
        for data in [
            &b""[..],
            &b"   "[..],
            &b"x"[..],
            &b" x "[..],
            &b"\t\nhello\r\n"[..],
        ] {
            let (p, t, s) = partition(data);
            let mut reassembled = Vec::new();
            reassembled.extend_from_slice(p);
            reassembled.extend_from_slice(t);
            reassembled.extend_from_slice(s);
            assert_eq!(reassembled, data);
        }
    }

    #[test]
    fn binary_bytes_including_nul_round_trip() {
        let data = b"\x00\x01 hi \x00";
        let (p, t, s) = partition(data);
        assert_eq!(t, b"\x00\x01 hi \x00");
        let mut reassembled = Vec::new();
        reassembled.extend_from_slice(p);
        reassembled.extend_from_slice(t);
        reassembled.extend_from_slice(s);
        assert_eq!(reassembled, data);
    }
}
