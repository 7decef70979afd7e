//! IAM-style wildcard matching: `*` matches any run of characters (including
//! `/` and `:`), `?` matches exactly one. Everything else is literal.
//!
//! Besides matching text, patterns can be compared with each other: whether
//! one covers another, and whether two can match a common string.

use glob::{MatchOptions, Pattern};

pub fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?'])
}

fn compile(pattern: &str) -> Option<Pattern> {
    let mut escaped = String::with_capacity(pattern.len() + 4);
    let mut last_star = false;
    for c in pattern.chars() {
        match c {
            // glob rejects `**` outside a whole path component
            '*' if last_star => continue,
            '*' | '?' => escaped.push(c),
            '[' | ']' => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push(c),
        }
        last_star = c == '*';
    }
    Pattern::new(&escaped).ok()
}

/// Match `text` against an IAM wildcard `pattern`.
pub fn matches(pattern: &str, text: &str) -> bool {
    matches_with(pattern, text, true)
}

/// Case-insensitive variant used for action names.
pub fn matches_ignore_case(pattern: &str, text: &str) -> bool {
    matches_with(pattern, text, false)
}

fn matches_with(pattern: &str, text: &str, case_sensitive: bool) -> bool {
    if !has_wildcard(pattern) {
        return if case_sensitive {
            pattern == text
        } else {
            pattern.eq_ignore_ascii_case(text)
        };
    }
    let options = MatchOptions {
        case_sensitive,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    match compile(pattern) {
        Some(p) => p.matches_with(text, options),
        None => pattern == text,
    }
}

/// Collapse runs of `*` and move `?` ahead of `*` inside a wildcard run, so
/// equivalent spellings like `*?` and `?*` compare equal symbol by symbol.
fn normalize(pattern: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '*' && c != '?' {
            out.push(c);
            continue;
        }
        let (mut singles, mut star) = (0, false);
        let mut cur = Some(c);
        while let Some(w) = cur {
            match w {
                '?' => singles += 1,
                _ => star = true,
            }
            cur = chars.next_if(|&n| n == '*' || n == '?');
        }
        out.extend(std::iter::repeat('?').take(singles));
        if star {
            out.push('*');
        }
    }
    out
}

/// Every string matched by `specific` is also matched by `general`.
///
/// A `*` in `specific` is only absorbed by a `*` in `general`; a `?` by a
/// `?` or a `*`. Literals must match exactly.
pub fn covers(general: &str, specific: &str) -> bool {
    if !has_wildcard(specific) {
        return matches(general, specific);
    }
    let g = normalize(general);
    let s = normalize(specific);
    let mut memo = vec![vec![None; s.len() + 1]; g.len() + 1];
    covers_at(&g, &s, 0, 0, &mut memo)
}

fn covers_at(
    g: &[char],
    s: &[char],
    i: usize,
    j: usize,
    memo: &mut [Vec<Option<bool>>],
) -> bool {
    if let Some(known) = memo[i][j] {
        return known;
    }
    let result = if i == g.len() {
        j == s.len()
    } else if g[i] == '*' {
        covers_at(g, s, i + 1, j, memo) || (j < s.len() && covers_at(g, s, i, j + 1, memo))
    } else if j == s.len() {
        false
    } else {
        let symbol_ok = match g[i] {
            '?' => s[j] != '*',
            lit => s[j] == lit,
        };
        symbol_ok && covers_at(g, s, i + 1, j + 1, memo)
    };
    memo[i][j] = Some(result);
    result
}

/// Some string is matched by both patterns.
pub fn intersects(a: &str, b: &str) -> bool {
    if !has_wildcard(a) {
        return matches(b, a);
    }
    if !has_wildcard(b) {
        return matches(a, b);
    }
    let a = normalize(a);
    let b = normalize(b);
    let mut memo = vec![vec![None; b.len() + 1]; a.len() + 1];
    intersects_at(&a, &b, 0, 0, &mut memo)
}

fn intersects_at(
    a: &[char],
    b: &[char],
    i: usize,
    j: usize,
    memo: &mut [Vec<Option<bool>>],
) -> bool {
    if let Some(known) = memo[i][j] {
        return known;
    }
    let result = if i == a.len() && j == b.len() {
        true
    } else if i < a.len() && a[i] == '*' {
        // empty, or absorb one symbol of `b` (a `*` of `b` then stays empty)
        intersects_at(a, b, i + 1, j, memo)
            || (j < b.len() && intersects_at(a, b, i, j + 1, memo))
    } else if j < b.len() && b[j] == '*' {
        intersects_at(a, b, i, j + 1, memo)
            || (i < a.len() && intersects_at(a, b, i + 1, j, memo))
    } else if i < a.len() && j < b.len() {
        (a[i] == '?' || b[j] == '?' || a[i] == b[j]) && intersects_at(a, b, i + 1, j + 1, memo)
    } else {
        false
    };
    memo[i][j] = Some(result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_crosses_separators() {
        assert!(matches("arn:aws:s3:::bucket/*", "arn:aws:s3:::bucket/a/b/c"));
        assert!(matches("repo:org/app:*", "repo:org/app:ref:refs/heads/main"));
        assert!(!matches("repo:org/app:*", "repo:org/other:ref:refs/heads/main"));
    }

    #[test]
    fn test_question_mark_and_brackets() {
        assert!(matches("log-?", "log-a"));
        assert!(!matches("log-?", "log-ab"));
        assert!(matches("name[1]*", "name[1]-x"));
        assert!(!matches("name[1]", "name1"));
    }

    #[test]
    fn test_double_star_collapses() {
        assert!(matches("a**b", "a/x/y/b"));
    }

    #[test]
    fn test_case_insensitive_actions() {
        assert!(matches_ignore_case("s3:Get*", "s3:getobject"));
        assert!(matches_ignore_case("ECR:PutImage", "ecr:putimage"));
        assert!(!matches("ECR:PutImage", "ecr:putimage"));
    }

    #[test]
    fn test_covers_compares_wildcards_structurally() {
        assert!(covers("site/*", "site/?"));
        assert!(covers("site/*", "site/index*"));
        assert!(!covers("site/?", "site/*"));
        assert!(!covers("site/index*", "site/*"));
        assert!(covers("site/?*", "site/*?"));
        assert!(covers("site/*.html", "site/a/*.html"));
        assert!(!covers("site/*.html", "site/*"));
        assert!(covers("site/index.html", "site/index.html"));
    }

    #[test]
    fn test_intersects_without_containment() {
        assert!(intersects("site/index*", "site/*.html"));
        assert!(intersects("site/*.html", "site/index*"));
        assert!(intersects("site/?", "site/*"));
        assert!(!intersects("site/index*", "logs/*"));
        assert!(!intersects("site/?", "site/ab"));
        assert!(!intersects("site/*.html", "site/*.css"));
        assert!(intersects("*", "anything"));
    }
}
