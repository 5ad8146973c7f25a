//! SQL LIKE pattern matching.
//!
//! One canonical implementation used by both the scalar evaluator (`like`,
//! `ilike`) and filter pipelines, ensuring identical semantics everywhere.
//!
//! Two wildcards:
//! - `%` matches zero or more characters
//! - `_` matches exactly one character
//!
//! A backslash escapes the next pattern character, so `\%` matches a
//! literal percent sign. Matching operates on Unicode scalar values.

use alloc::vec::Vec;

/// Case-sensitive SQL LIKE.
///
/// ```
/// use rivulet_core::pattern_match::like;
/// assert!(like("hello", "h%o"));
/// assert!(like("hello", "_ello"));
/// assert!(like("100%", "100\\%"));
/// assert!(!like("hello", "world"));
/// ```
pub fn like(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    like_recursive(&v, &p, 0, 0)
}

/// Case-insensitive SQL LIKE.
///
/// Folds both sides through Unicode lowercasing before matching.
pub fn ilike(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().flat_map(char::to_lowercase).collect();
    let p: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    like_recursive(&v, &p, 0, 0)
}

fn like_recursive(v: &[char], p: &[char], vi: usize, pi: usize) -> bool {
    if pi == p.len() {
        return vi == v.len();
    }
    match p[pi] {
        '\\' if pi + 1 < p.len() => {
            // Escaped character matches literally
            vi < v.len() && v[vi] == p[pi + 1] && like_recursive(v, p, vi + 1, pi + 2)
        }
        '%' => {
            // % matches zero or more characters
            for skip in vi..=v.len() {
                if like_recursive(v, p, skip, pi + 1) {
                    return true;
                }
            }
            false
        }
        '_' => {
            // _ matches exactly one character
            vi < v.len() && like_recursive(v, p, vi + 1, pi + 1)
        }
        ch => vi < v.len() && v[vi] == ch && like_recursive(v, p, vi + 1, pi + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_exact() {
        assert!(like("hello", "hello"));
        assert!(!like("hello", "world"));
    }

    #[test]
    fn like_percent() {
        assert!(like("hello", "%"));
        assert!(like("hello", "h%"));
        assert!(like("hello", "%o"));
        assert!(like("hello", "h%o"));
        assert!(like("hello", "%ell%"));
        assert!(!like("hello", "x%"));
    }

    #[test]
    fn like_underscore() {
        assert!(like("hello", "_ello"));
        assert!(like("hello", "h_llo"));
        assert!(like("hello", "hell_"));
        assert!(like("hello", "_____"));
        assert!(!like("hello", "______"));
    }

    #[test]
    fn like_combined() {
        assert!(like("hello", "h%_o"));
        assert!(like("hello world", "hello%"));
        assert!(like("hello world", "%world"));
    }

    #[test]
    fn like_escape() {
        assert!(like("50%", "50\\%"));
        assert!(!like("50x", "50\\%"));
        assert!(like("a_b", "a\\_b"));
        assert!(!like("axb", "a\\_b"));
        assert!(like("a\\b", "a\\\\b"));
    }

    #[test]
    fn like_empty() {
        assert!(like("", ""));
        assert!(like("", "%"));
        assert!(!like("", "_"));
        assert!(!like("", "a"));
    }

    #[test]
    fn ilike_case_folding() {
        assert!(ilike("HELLO", "hello"));
        assert!(ilike("Hello World", "hello%"));
        assert!(ilike("hello", "H_LLO"));
        assert!(!ilike("hello", "world"));
    }
}
