//! Entry path comparison.

use std::cmp::Ordering;

/// Compare two entry paths.
///
/// Forward and back slashes are interchangeable; case folding is ASCII
/// and applied only when `ignore_case` is set. Ordering over the
/// folded bytes, so the result is usable for both equality and sorting.
pub fn compare(path1: &str, path2: &str, ignore_case: bool) -> Ordering {
    let fold = |b: u8| -> u8 {
        if b == b'\\' {
            b'/'
        } else if ignore_case {
            b.to_ascii_lowercase()
        } else {
            b
        }
    };

    let mut iter1 = path1.bytes().map(fold);
    let mut iter2 = path2.bytes().map(fold);

    loop {
        match (iter1.next(), iter2.next()) {
            (Some(b1), Some(b2)) => match b1.cmp(&b2) {
                Ordering::Equal => continue,
                other => return other,
            },
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
        }
    }
}

/// Whether two entry paths name the same entry.
#[inline]
pub fn matches(path1: &str, path2: &str, ignore_case: bool) -> bool {
    compare(path1, path2, ignore_case) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_agnostic() {
        assert!(matches("a/b/c.txt", "a\\b\\c.txt", false));
        assert!(matches("a\\b", "a/b", true));
    }

    #[test]
    fn test_case_sensitivity() {
        assert!(matches("Docs/README", "docs/readme", true));
        assert!(!matches("Docs/README", "docs/readme", false));
    }

    #[test]
    fn test_ordering() {
        assert_eq!(compare("a", "b", false), Ordering::Less);
        assert_eq!(compare("ab", "a", false), Ordering::Greater);
        assert_eq!(compare("B", "a", true), Ordering::Less);
    }
}
