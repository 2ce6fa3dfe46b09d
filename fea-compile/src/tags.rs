//! Well-known tags.

use font_types::Tag;

pub const SCRIPT_DFLT: Tag = Tag::new(b"DFLT");
pub const LANG_DFLT: Tag = Tag::new(b"dflt");

pub const AALT: Tag = Tag::new(b"aalt");
pub const SIZE: Tag = Tag::new(b"size");
pub const VRT2: Tag = Tag::new(b"vrt2");

/// No script/language/feature is in effect.
pub const TAG_UNDEF: Tag = Tag::new(&[0xFF; 4]);

/// Parking tag for lookups defined outside any feature block.
pub const TAG_STANDALONE: Tag = Tag::new(&[0x01; 4]);

/// `true` for `ss01`..`ss99`.
pub fn is_stylistic_set(tag: Tag) -> bool {
    is_numbered_feature(tag, b"ss")
}

/// `true` for `cv01`..`cv99`.
pub fn is_character_variant(tag: Tag) -> bool {
    is_numbered_feature(tag, b"cv")
}

fn is_numbered_feature(tag: Tag, prefix: &[u8; 2]) -> bool {
    let bytes = tag.to_be_bytes();
    bytes[..2] == prefix[..]
        && bytes[2].is_ascii_digit()
        && bytes[3].is_ascii_digit()
        && &bytes[2..] != b"00"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_features() {
        assert!(is_stylistic_set(Tag::new(b"ss01")));
        assert!(is_stylistic_set(Tag::new(b"ss99")));
        assert!(!is_stylistic_set(Tag::new(b"ss00")));
        assert!(!is_stylistic_set(Tag::new(b"ssAB")));
        assert!(is_character_variant(Tag::new(b"cv42")));
        assert!(!is_character_variant(Tag::new(b"liga")));
    }
}
