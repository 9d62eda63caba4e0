//! Fixed-width dictionary-backed string values
//!
//! Umbra-style strings as described in <https://www.cidrdb.org/cidr2020/papers/p29-neumann-cidr20.pdf>.
//! A value is a 20-byte image: a 4-byte prefix of the string followed by
//! either the inline remainder (strings up to 19 bytes) or the id of the full
//! string in a side dictionary. The last byte carries the inline length, or a
//! marker for the dictionary form, so inline and overflow images can never
//! collide. Equality is plain byte equality; because the dictionary
//! deduplicates, two values are equal iff their images are equal.

use std::cmp::Ordering;

use super::{Dictionary, Idx};

/// Inline payload capacity in bytes (excluding the prefix)
pub const STRING_SIZE: usize = 16;

const IMAGE_SIZE: usize = STRING_SIZE + 4;
const PREFIX_SIZE: usize = 4;
const INLINE_CAPACITY: usize = IMAGE_SIZE - 1;
const OVERFLOW_MARKER: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmbeddedString {
    data: [u8; IMAGE_SIZE],
}

impl EmbeddedString {
    /// Encode `value`, inserting into `dictionary` when it does not fit inline.
    pub fn new(value: &str, dictionary: &mut Dictionary) -> EmbeddedString {
        let bytes = value.as_bytes();
        let mut data = [0u8; IMAGE_SIZE];
        if bytes.len() <= INLINE_CAPACITY {
            data[..bytes.len()].copy_from_slice(bytes);
            data[IMAGE_SIZE - 1] = bytes.len() as u8;
        } else {
            let id = dictionary.get_or_insert(value);
            data[..PREFIX_SIZE].copy_from_slice(&bytes[..PREFIX_SIZE]);
            data[PREFIX_SIZE..PREFIX_SIZE + 4].copy_from_slice(&id.to_le_bytes());
            data[IMAGE_SIZE - 1] = OVERFLOW_MARKER;
        }
        EmbeddedString { data }
    }

    /// Encode `value` without mutating the dictionary. Returns `None` for a
    /// long string that is not in the dictionary, i.e. one no record carries.
    pub fn embed(value: &str, dictionary: &Dictionary) -> Option<EmbeddedString> {
        let bytes = value.as_bytes();
        let mut data = [0u8; IMAGE_SIZE];
        if bytes.len() <= INLINE_CAPACITY {
            data[..bytes.len()].copy_from_slice(bytes);
            data[IMAGE_SIZE - 1] = bytes.len() as u8;
        } else {
            let id = dictionary.lookup_id(value)?;
            data[..PREFIX_SIZE].copy_from_slice(&bytes[..PREFIX_SIZE]);
            data[PREFIX_SIZE..PREFIX_SIZE + 4].copy_from_slice(&id.to_le_bytes());
            data[IMAGE_SIZE - 1] = OVERFLOW_MARKER;
        }
        Some(EmbeddedString { data })
    }

    fn overflow_id(&self) -> Option<Idx> {
        if self.data[IMAGE_SIZE - 1] != OVERFLOW_MARKER {
            return None;
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[PREFIX_SIZE..PREFIX_SIZE + 4]);
        Some(Idx::from_le_bytes(bytes))
    }

    /// Decode the full string
    pub fn decode(&self, dictionary: &Dictionary) -> String {
        match self.overflow_id() {
            Some(id) => dictionary.lookup_value(id).to_string(),
            None => {
                let len = self.data[IMAGE_SIZE - 1] as usize;
                String::from_utf8_lossy(&self.data[..len]).into_owned()
            }
        }
    }

    /// Order by the 4-byte prefix alone. Returns `None` on a prefix tie;
    /// the caller must then compare the decoded strings.
    pub fn fast_compare(&self, other: &EmbeddedString) -> Option<Ordering> {
        if self.data == other.data {
            return Some(Ordering::Equal);
        }
        match self.data[..PREFIX_SIZE].cmp(&other.data[..PREFIX_SIZE]) {
            Ordering::Equal => None,
            ordering => Some(ordering),
        }
    }

    pub const fn as_bytes(&self) -> &[u8; IMAGE_SIZE] {
        &self.data
    }

    pub const fn from_bytes(data: [u8; IMAGE_SIZE]) -> EmbeddedString {
        EmbeddedString { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_roundtrip() {
        let mut dict = Dictionary::new();
        let value = EmbeddedString::new("Basel", &mut dict);
        assert_eq!(value.decode(&dict), "Basel");
        assert!(dict.is_empty());
    }

    #[test]
    fn test_overflow_roundtrip() {
        let mut dict = Dictionary::new();
        let long = "hCoV-19/Switzerland/BS-ETHZ-560123/2021";
        let value = EmbeddedString::new(long, &mut dict);
        assert_eq!(value.decode(&dict), long);
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_equal_iff_images_equal() {
        let mut dict = Dictionary::new();
        let long = "hCoV-19/Switzerland/BS-ETHZ-560123/2021";
        let first = EmbeddedString::new(long, &mut dict);
        let second = EmbeddedString::new(long, &mut dict);
        assert_eq!(first, second);
        assert_eq!(first.as_bytes(), second.as_bytes());

        let other = EmbeddedString::new("hCoV-19/Switzerland/BS-ETHZ-560124/2021", &mut dict);
        assert_ne!(first, other);
    }

    #[test]
    fn test_inline_and_overflow_never_collide() {
        let mut dict = Dictionary::new();
        // An inline string whose bytes could look like a prefix + id 0
        let short = EmbeddedString::new("aaaa", &mut dict);
        let long = EmbeddedString::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", &mut dict);
        assert_ne!(short, long);
    }

    #[test]
    fn test_fast_compare_prefix() {
        let mut dict = Dictionary::new();
        let apple = EmbeddedString::new("apple", &mut dict);
        let banana = EmbeddedString::new("banana", &mut dict);
        assert_eq!(apple.fast_compare(&banana), Some(Ordering::Less));
        assert_eq!(banana.fast_compare(&apple), Some(Ordering::Greater));

        // Shared prefix forces the slow path
        let applesauce = EmbeddedString::new("applesauce", &mut dict);
        assert_eq!(apple.fast_compare(&applesauce), None);
        assert_eq!(apple.fast_compare(&apple), Some(Ordering::Equal));
    }

    #[test]
    fn test_embed_without_insert() {
        let mut dict = Dictionary::new();
        let long = "a-string-that-certainly-overflows-the-inline-capacity";
        assert!(EmbeddedString::embed(long, &dict).is_none());
        let stored = EmbeddedString::new(long, &mut dict);
        let embedded = EmbeddedString::embed(long, &dict).unwrap();
        assert_eq!(stored, embedded);
    }
}
