//! Path String Collation
//!
//! File names on a volume are compared either exactly or case-folded,
//! depending on whether the volume does case-sensitive search. Case folding
//! is the NT kind: each character is upcased on its own, one character to
//! one character, and the folded strings are compared character by
//! character. A shorter string that is a prefix of a longer one sorts first.
//!
//! # Subtrees
//!
//! Paths use `\` as separator. A path `P` is a subpath of `parent` when it
//! is strictly longer and begins with `parent` followed by `\`. Because `\`
//! is a single character, all subpaths of a parent collate next to each
//! other: they are exactly the strings that start with the *subtree prefix*
//! `parent\`. A parent that already ends with `\` (the root, `\`) is its own
//! subtree prefix.

use core::cmp::Ordering;

/// Path component separator
pub const PATH_SEPARATOR: char = '\\';

/// Upcase a Unicode character (RtlUpcaseUnicodeChar)
///
/// Characters whose uppercase form is not a single character are left
/// unchanged.
#[inline]
pub fn rtl_upcase_unicode_char(c: char) -> char {
    if c.is_ascii() {
        return c.to_ascii_uppercase();
    }

    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

#[inline]
fn fold(c: char, case_insensitive: bool) -> char {
    if case_insensitive {
        rtl_upcase_unicode_char(c)
    } else {
        c
    }
}

fn compare_chars<A, B>(mut a: A, mut b: B, case_insensitive: bool) -> Ordering
where
    A: Iterator<Item = char>,
    B: Iterator<Item = char>,
{
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = fold(x, case_insensitive).cmp(&fold(y, case_insensitive));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Compare two strings (RtlCompareUnicodeString)
pub fn rtl_compare_unicode_string(s1: &str, s2: &str, case_insensitive: bool) -> Ordering {
    compare_chars(s1.chars(), s2.chars(), case_insensitive)
}

/// Compare two strings for equality (RtlEqualUnicodeString)
#[inline]
pub fn rtl_equal_unicode_string(s1: &str, s2: &str, case_insensitive: bool) -> bool {
    rtl_compare_unicode_string(s1, s2, case_insensitive) == Ordering::Equal
}

/// Check whether `prefix` is a prefix of `string` (RtlPrefixUnicodeString)
pub fn rtl_prefix_unicode_string(prefix: &str, string: &str, case_insensitive: bool) -> bool {
    let mut chars = string.chars();
    prefix.chars().all(|p| match chars.next() {
        Some(c) => fold(p, case_insensitive) == fold(c, case_insensitive),
        None => false,
    })
}

fn subtree_prefix(parent: &str) -> impl Iterator<Item = char> + '_ {
    let separator = if parent.ends_with(PATH_SEPARATOR) {
        None
    } else {
        Some(PATH_SEPARATOR)
    };
    parent.chars().chain(separator)
}

/// Compare `path` against the subtree prefix of `parent`
///
/// Returns `Less` for paths collating before every subpath of `parent`,
/// `Equal` for the prefix itself, `Greater` otherwise. Does not allocate.
pub fn rtl_compare_with_subtree_prefix(path: &str, parent: &str, case_insensitive: bool) -> Ordering {
    compare_chars(path.chars(), subtree_prefix(parent), case_insensitive)
}

/// Check whether `path` is a strict subpath of `parent`
pub fn rtl_is_subpath(parent: &str, path: &str, case_insensitive: bool) -> bool {
    let mut chars = path.chars();

    for p in subtree_prefix(parent) {
        match chars.next() {
            Some(c) if fold(p, case_insensitive) == fold(c, case_insensitive) => {}
            _ => return false,
        }
    }

    chars.next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upcase() {
        assert_eq!(rtl_upcase_unicode_char('a'), 'A');
        assert_eq!(rtl_upcase_unicode_char('\\'), '\\');
        assert_eq!(rtl_upcase_unicode_char('ä'), 'Ä');
        // Expands to "SS": left as is
        assert_eq!(rtl_upcase_unicode_char('ß'), 'ß');
    }

    #[test]
    fn test_compare() {
        assert_eq!(rtl_compare_unicode_string("\\a", "\\A", true), Ordering::Equal);
        assert_eq!(rtl_compare_unicode_string("\\a", "\\A", false), Ordering::Greater);
        assert_eq!(rtl_compare_unicode_string("\\a", "\\a\\b", true), Ordering::Less);
        assert!(rtl_equal_unicode_string("\\Dir\\File", "\\DIR\\file", true));
        assert!(!rtl_equal_unicode_string("\\Dir\\File", "\\DIR\\file", false));
    }

    #[test]
    fn test_prefix() {
        assert!(rtl_prefix_unicode_string("\\a", "\\A\\b", true));
        assert!(!rtl_prefix_unicode_string("\\a", "\\A\\b", false));
        assert!(!rtl_prefix_unicode_string("\\a\\b\\c", "\\a\\b", true));
        assert!(rtl_prefix_unicode_string("", "\\a", true));
    }

    #[test]
    fn test_subpath() {
        assert!(rtl_is_subpath("\\a", "\\a\\b", true));
        assert!(rtl_is_subpath("\\a", "\\A\\b\\c", true));
        assert!(!rtl_is_subpath("\\a", "\\A\\b", false));
        assert!(!rtl_is_subpath("\\a", "\\a", true));
        assert!(!rtl_is_subpath("\\a", "\\ab", true));
        assert!(!rtl_is_subpath("\\a", "\\a\\", true));
        assert!(rtl_is_subpath("\\", "\\a", true));
        assert!(!rtl_is_subpath("\\", "\\", true));
    }

    #[test]
    fn test_subtree_prefix_ordering() {
        // ' ' and '.' collate before the separator
        assert_eq!(rtl_compare_with_subtree_prefix("\\a b", "\\a", true), Ordering::Less);
        assert_eq!(rtl_compare_with_subtree_prefix("\\a.txt", "\\a", true), Ordering::Less);
        assert_eq!(rtl_compare_with_subtree_prefix("\\a\\", "\\a", true), Ordering::Equal);
        assert_eq!(rtl_compare_with_subtree_prefix("\\a\\b", "\\a", true), Ordering::Greater);
        assert_eq!(rtl_compare_with_subtree_prefix("\\b", "\\a", true), Ordering::Greater);
        assert_eq!(rtl_compare_with_subtree_prefix("\\a", "\\", true), Ordering::Greater);
    }
}
