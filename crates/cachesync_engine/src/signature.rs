//! Content signatures.

use serde::Serialize;
use std::fmt;

/// CRC-32 lookup table (IEEE polynomial, reflected).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Computes the CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// A content fingerprint, stored and compared as a decimal string.
///
/// Signatures are only compared for equality. The empty signature stands
/// for "content unavailable" and never equals a computed one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Signature(String);

impl Signature {
    /// Computes the signature of raw item content.
    pub fn of(content: &[u8]) -> Self {
        Self(crc32(content).to_string())
    }

    /// The signature used when content cannot be read.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Wraps a stored signature string.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns true for the empty signature.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the stored form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vectors() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b"hello world"), 0x0D4A_1185);
    }

    #[test]
    fn signature_is_decimal_crc() {
        assert_eq!(Signature::of(b"123456789").as_str(), "3421780262");
    }

    #[test]
    fn empty_signature_differs_from_computed() {
        assert!(Signature::empty().is_empty());
        assert_ne!(Signature::empty(), Signature::of(b"X"));
        // crc32 of no bytes is 0, which still renders as "0"
        assert_ne!(Signature::empty(), Signature::of(b""));
    }

    #[test]
    fn equal_content_equal_signature() {
        assert_eq!(Signature::of(b"BEGIN:VCARD"), Signature::of(b"BEGIN:VCARD"));
        assert_ne!(Signature::of(b"X"), Signature::of(b"Y"));
    }
}
