//! Byte-range annotations.
//!
//! A [`Translation`] is one decoded field tied to the exact bytes it came
//! from. A [`TranslationGroup`] is a contiguous run of translations: each
//! new field starts where the previous one ended, and undecoded padding is
//! declared with [`TranslationGroup::skip`]. That contiguity is what lets
//! [`search_groups`] resolve a file offset with two binary searches.

use std::cmp::Ordering;

use serde::Serialize;

use crate::bytes::ByteRange;

/// Shape of the bytes behind a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "bytes", rename_all = "snake_case")]
pub enum TranslationKind {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    /// `X.Y.Z` packed in 32 bits.
    Version32,
    /// `A.B.C.D.E` packed in 64 bits.
    Version64,
    Enum8,
    Enum16,
    Enum32,
    Utf8String(usize),
    Utf16String(usize),
    RawBytes(usize),
    Uleb128(usize),
    Sleb128(usize),
    Flags(usize),
    Code(usize),
}

impl TranslationKind {
    /// Number of file bytes the field occupies.
    pub const fn byte_len(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 | Self::Enum8 => 1,
            Self::UInt16 | Self::Int16 | Self::Enum16 => 2,
            Self::UInt32 | Self::Int32 | Self::Version32 | Self::Enum32 => 4,
            Self::UInt64 | Self::Int64 | Self::Version64 => 8,
            Self::Utf8String(n)
            | Self::Utf16String(n)
            | Self::RawBytes(n)
            | Self::Uleb128(n)
            | Self::Sleb128(n)
            | Self::Flags(n)
            | Self::Code(n) => *n,
        }
    }

    /// Unsigned integer kind of a given width, pointer fields mostly.
    pub const fn unsigned(width: usize) -> Self {
        match width {
            1 => Self::UInt8,
            2 => Self::UInt16,
            8 => Self::UInt64,
            _ => Self::UInt32,
        }
    }

    /// Human-readable type name.
    pub const fn description(&self) -> &'static str {
        match self {
            Self::UInt8 => "Unsigned Int-8",
            Self::UInt16 => "Unsigned Int-16",
            Self::UInt32 => "Unsigned Int-32",
            Self::UInt64 => "Unsigned Int-64",
            Self::Int8 => "Signed Int-8",
            Self::Int16 => "Signed Int-16",
            Self::Int32 => "Signed Int-32",
            Self::Int64 => "Signed Int-64",
            Self::Version32 | Self::Version64 => "Semantic Version",
            Self::Enum8 | Self::Enum16 | Self::Enum32 => "Number Enum",
            Self::Utf8String(_) => "String-UTF8",
            Self::Utf16String(_) => "String-UTF16",
            Self::RawBytes(_) => "Raw Data",
            Self::Uleb128(_) => "ULEB-128",
            Self::Sleb128(_) => "SLEB-128",
            Self::Flags(_) => "Bit Flags",
            Self::Code(_) => "Machine Code",
        }
    }
}

/// A secondary, derived value shown next to the primary one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Secondary {
    pub label: String,
    pub value: String,
}

/// One annotated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub range: ByteRange,
    pub kind: TranslationKind,
    pub label: String,
    pub value: String,
    pub secondary: Option<Secondary>,
    pub error: Option<String>,
}

impl Translation {
    /// Create a translation at an absolute offset; its length follows `kind`.
    pub fn new(
        start: u64,
        kind: TranslationKind,
        label: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            range: ByteRange::new(start, kind.byte_len() as u64),
            kind,
            label: label.into(),
            value: value.into(),
            secondary: None,
            error: None,
        }
    }

    /// Attach a secondary value.
    pub fn with_secondary(&mut self, label: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.secondary = Some(Secondary {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    /// Attach an optional secondary value; `None` leaves the field untouched.
    pub fn with_secondary_opt(&mut self, label: impl Into<String>, value: Option<String>) -> &mut Self {
        if let Some(value) = value {
            self.with_secondary(label, value);
        }
        self
    }

    /// Attach an inline error token.
    pub fn with_error(&mut self, error: impl Into<String>) -> &mut Self {
        self.error = Some(error.into());
        self
    }

    fn compare(&self, offset: u64) -> Ordering {
        compare_range(&self.range, offset)
    }
}

/// Orders a range against a target offset for binary search.
///
/// `Greater` means the range lies right of the target, `Less` left of it.
pub(crate) fn compare_range(range: &ByteRange, offset: u64) -> Ordering {
    if offset < range.start {
        Ordering::Greater
    } else if offset >= range.end() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Ordered, contiguous run of translations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationGroup {
    start: u64,
    len: u64,
    translations: Vec<Translation>,
}

impl TranslationGroup {
    /// Empty group anchored at an absolute file offset.
    pub fn new(start: u64) -> Self {
        Self {
            start,
            len: 0,
            translations: Vec::new(),
        }
    }

    /// Append a field at the group's current end.
    pub fn add(
        &mut self,
        kind: TranslationKind,
        label: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Translation {
        let translation = Translation::new(self.end(), kind, label, value);
        self.len += translation.range.len;
        self.translations.push(translation);
        let last = self.translations.len() - 1;
        &mut self.translations[last]
    }

    /// Advance past `n` undecoded bytes.
    pub fn skip(&mut self, n: u64) {
        self.len += n;
    }

    /// Range covered by the group, skips included.
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.start, self.len)
    }

    /// One past the last covered byte.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Members in ascending offset order.
    pub fn translations(&self) -> &[Translation] {
        &self.translations
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }

    /// Binary-search a member by absolute offset.
    pub fn search(&self, offset: u64) -> Option<&Translation> {
        if !self.range().contains(offset) {
            return None;
        }
        self.translations
            .binary_search_by(|t| t.compare(offset))
            .ok()
            .map(|index| &self.translations[index])
    }
}

/// Two-level search: first the group, then the field inside it.
pub fn search_groups(groups: &[TranslationGroup], offset: u64) -> Option<&Translation> {
    let index = groups
        .binary_search_by(|group| compare_range(&group.range(), offset))
        .ok()?;
    groups[index].search(offset)
}

/// Render a 32-bit packed `X.Y.Z` version.
pub fn version32(value: u32) -> String {
    format!("{}.{}.{}", value >> 16, (value >> 8) & 0xFF, value & 0xFF)
}

/// Render a 64-bit packed `A.B.C.D.E` source version.
pub fn version64(value: u64) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        value >> 40,
        (value >> 30) & 0x3FF,
        (value >> 20) & 0x3FF,
        (value >> 10) & 0x3FF,
        value & 0x3FF
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_group() -> TranslationGroup {
        let mut group = TranslationGroup::new(0x100);
        group.add(TranslationKind::UInt32, "A", "1");
        group.add(TranslationKind::UInt16, "B", "2");
        group.skip(2);
        group.add(TranslationKind::Utf8String(5), "C", "abcd");
        group
    }

    #[test]
    fn test_group_contiguity() {
        let group = sample_group();
        let ranges: Vec<_> = group.translations().iter().map(|t| t.range).collect();
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0x100, 4),
                ByteRange::new(0x104, 2),
                ByteRange::new(0x108, 5),
            ]
        );
        assert_eq!(group.range(), ByteRange::new(0x100, 13));
    }

    #[test]
    fn test_sum_of_sizes_without_skip() {
        let mut group = TranslationGroup::new(0);
        group.add(TranslationKind::UInt64, "x", "");
        group.add(TranslationKind::Uleb128(3), "y", "");
        group.add(TranslationKind::RawBytes(7), "z", "");
        let sum: u64 = group.translations().iter().map(|t| t.range.len).sum();
        assert_eq!(sum, group.range().len);
        for pair in group.translations().windows(2) {
            assert_eq!(pair[0].range.end(), pair[1].range.start);
        }
    }

    #[test]
    fn test_search_hits_and_gaps() {
        let group = sample_group();
        assert_eq!(group.search(0x100).map(|t| t.label.as_str()), Some("A"));
        assert_eq!(group.search(0x105).map(|t| t.label.as_str()), Some("B"));
        assert!(group.search(0x106).is_none(), "skip region");
        assert_eq!(group.search(0x10C).map(|t| t.label.as_str()), Some("C"));
        assert!(group.search(0x10D).is_none());
        assert!(group.search(0xFF).is_none());
    }

    #[test]
    fn test_search_groups_two_levels() {
        let mut first = TranslationGroup::new(0);
        first.add(TranslationKind::UInt32, "first", "");
        let mut second = TranslationGroup::new(8);
        second.add(TranslationKind::UInt32, "second", "");
        let groups = vec![first, second];
        assert_eq!(search_groups(&groups, 2).unwrap().label, "first");
        assert_eq!(search_groups(&groups, 11).unwrap().label, "second");
        assert!(search_groups(&groups, 5).is_none());
        assert!(search_groups(&groups, 12).is_none());
    }

    #[test]
    fn test_secondary_and_error() {
        let mut group = TranslationGroup::new(0);
        group
            .add(TranslationKind::UInt32, "Index", "5")
            .with_secondary("Symbol", "_main")
            .with_error("out of range");
        let t = &group.translations()[0];
        assert_eq!(t.secondary.as_ref().unwrap().value, "_main");
        assert_eq!(t.error.as_deref(), Some("out of range"));
    }

    #[test]
    fn test_versions() {
        assert_eq!(version32(0x000A_0F01), "10.15.1");
        let v = (1u64 << 40) | (2 << 30) | (3 << 20) | (4 << 10) | 5;
        assert_eq!(version64(v), "1.2.3.4.5");
    }
}
