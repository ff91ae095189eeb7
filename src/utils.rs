pub struct Utils;

impl Utils {
    /// Big-endian u16 at `offset`; zero when out of range.
    pub fn u16_be(data: &[u8], offset: usize) -> u16 {
        match data.get(offset..offset + 2) {
            Some(b) => u16::from_be_bytes([b[0], b[1]]),
            None => 0,
        }
    }

    /// Unsigned big-endian integer from a 1/2/4-byte slice.
    pub fn uint_be(data: &[u8]) -> Option<u64> {
        match data.len() {
            1 => Some(data[0] as u64),
            2 => Some(u16::from_be_bytes([data[0], data[1]]) as u64),
            4 => Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64),
            _ => None,
        }
    }

    pub fn round(value: f64, decimals: u8) -> f64 {
        let scale = 10_f64.powi(decimals as i32);
        (value * scale).round() / scale
    }

    /// Lossy ASCII decode with trailing NUL padding removed. Non-ASCII
    /// bytes are dropped rather than treated as an error.
    pub fn ascii_trimmed(data: &[u8]) -> String {
        data.iter()
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end_matches('\0')
            .to_string()
    }

    /// True when every byte is printable ASCII (0x20..=0x7E).
    pub fn is_printable_ascii(data: &[u8]) -> bool {
        data.iter().all(|b| (0x20..=0x7e).contains(b))
    }

    /// ASCII-encode a string into a fixed-width NUL-padded field,
    /// truncating if it is too long.
    pub fn padded_ascii(s: &str, width: usize) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.truncate(width);
        out.resize(width, 0);
        out
    }

    pub fn hex(data: &[u8]) -> String {
        data.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_be_widths() {
        assert_eq!(Utils::uint_be(&[0x2a]), Some(42));
        assert_eq!(Utils::uint_be(&[0x00, 0xfa]), Some(250));
        assert_eq!(Utils::uint_be(&[0x00, 0x01, 0x00, 0x00]), Some(65536));
        assert_eq!(Utils::uint_be(&[]), None);
        assert_eq!(Utils::uint_be(&[1, 2, 3]), None);
    }

    #[test]
    fn ascii_trimmed_strips_nuls() {
        assert_eq!(Utils::ascii_trimmed(b"QMN000AB\x00\x00"), "QMN000AB");
    }

    #[test]
    fn padded_ascii_width() {
        let padded = Utils::padded_ascii("AB", 4);
        assert_eq!(padded, vec![b'A', b'B', 0, 0]);
        assert_eq!(Utils::padded_ascii("ABCDE", 4), b"ABCD".to_vec());
    }
}
