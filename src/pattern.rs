//! Verification matchers for candidate files.
//!
//! The index narrows a query to candidate files; these matchers confirm or
//! reject each candidate line by line. Fixed patterns use SIMD-accelerated
//! `memchr::memmem`, regex patterns compile with `regex::bytes` so content
//! is never required to be valid UTF-8.

use memchr::memmem;

use crate::error::{Error, Result};

/// How the raw pattern text should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fixed string.
    Fixed,
    /// POSIX basic regular expression.
    Basic,
    /// POSIX extended regular expression.
    Extended,
}

/// A compiled per-line matcher.
#[derive(Debug)]
pub enum Matcher {
    Fixed(memmem::Finder<'static>),
    FixedIgnoreCase(Vec<u8>),
    Regex(regex::bytes::Regex),
}

impl Matcher {
    pub fn new(pattern: &str, mode: Mode, case_sensitive: bool) -> Result<Matcher> {
        match mode {
            Mode::Fixed => {
                if case_sensitive {
                    Ok(Matcher::Fixed(
                        memmem::Finder::new(pattern.as_bytes()).into_owned(),
                    ))
                } else {
                    Ok(Matcher::FixedIgnoreCase(
                        pattern.bytes().map(|b| b.to_ascii_lowercase()).collect(),
                    ))
                }
            }
            Mode::Basic | Mode::Extended => {
                let translated = if mode == Mode::Basic {
                    basic_to_extended(pattern)
                } else {
                    pattern.to_string()
                };
                let regex = regex::bytes::RegexBuilder::new(&translated)
                    .case_insensitive(!case_sensitive)
                    .unicode(false)
                    .build()
                    .map_err(|e| Error::MalformedRegex {
                        pattern: pattern.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Matcher::Regex(regex))
            }
        }
    }

    /// Byte range of the first match in a line, if any.
    pub fn find(&self, line: &[u8]) -> Option<(usize, usize)> {
        match self {
            Matcher::Fixed(finder) => {
                let start = finder.find(line)?;
                Some((start, start + finder.needle().len()))
            }
            Matcher::FixedIgnoreCase(needle) => {
                if needle.is_empty() {
                    return Some((0, 0));
                }
                line.windows(needle.len())
                    .position(|w| w.eq_ignore_ascii_case(needle))
                    .map(|start| (start, start + needle.len()))
            }
            Matcher::Regex(regex) => regex.find(line).map(|m| (m.start(), m.end())),
        }
    }
}

/// Translate a POSIX basic regular expression into the extended syntax the
/// `regex` crate speaks: BRE escapes its grouping and quantifier
/// metacharacters, so the backslash sense of `(){}|+?` flips. `^` anchors
/// only at the start of a basic pattern and `$` only at the end; anywhere
/// else both are ordinary characters and must be escaped for the regex
/// crate, which treats them as anchors at any position.
fn basic_to_extended(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.char_indices();
    let mut first = true;
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, m @ ('(' | ')' | '|' | '+' | '?' | '{' | '}'))) => out.push(m),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '(' | ')' | '|' | '+' | '?' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '^' if !first => out.push_str("\\^"),
            '$' if i + 1 != pattern.len() => out.push_str("\\$"),
            // A leading star is a literal in BRE.
            '*' if first => out.push_str("\\*"),
            _ => out.push(c),
        }
        first = false;
    }
    out
}

/// A verified match within a candidate file.
#[derive(Debug, Clone)]
pub struct LineMatch {
    pub file: String,
    pub line: usize,
    pub text: String,
}

/// Scan content line by line, returning up to `max_results` matches.
pub fn search_lines(
    file: &str,
    content: &[u8],
    matcher: &Matcher,
    max_results: usize,
) -> Vec<LineMatch> {
    let mut results = Vec::new();
    for (number, line) in content.split(|&b| b == b'\n').enumerate() {
        if results.len() >= max_results {
            break;
        }
        let line = match line.last() {
            Some(b'\r') => &line[..line.len() - 1],
            _ => line,
        };
        if matcher.find(line).is_some() {
            results.push(LineMatch {
                file: file.to_string(),
                line: number + 1,
                text: String::from_utf8_lossy(line).into_owned(),
            });
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_case_sensitive() {
        let m = Matcher::new("hello", Mode::Fixed, true).unwrap();
        assert_eq!(m.find(b"say hello world"), Some((4, 9)));
        assert_eq!(m.find(b"say HELLO world"), None);
    }

    #[test]
    fn fixed_case_insensitive() {
        let m = Matcher::new("Hello", Mode::Fixed, false).unwrap();
        assert_eq!(m.find(b"say hELLo world"), Some((4, 9)));
        assert_eq!(m.find(b"goodbye"), None);
    }

    #[test]
    fn extended_regex() {
        let m = Matcher::new("fn +[a-z_]+", Mode::Extended, true).unwrap();
        assert!(m.find(b"pub fn  main() {").is_some());
        assert!(m.find(b"struct Main;").is_none());
    }

    #[test]
    fn basic_regex_plain_metas_are_literal() {
        // In BRE, unescaped + and ( are ordinary characters.
        let m = Matcher::new("a+(b", Mode::Basic, true).unwrap();
        assert!(m.find(b"xx a+(b yy").is_some());
        assert!(m.find(b"aab").is_none());
    }

    #[test]
    fn basic_regex_escaped_group_and_alternation() {
        let m = Matcher::new(r"\(foo\|bar\)baz", Mode::Basic, true).unwrap();
        assert!(m.find(b"foobaz").is_some());
        assert!(m.find(b"barbaz").is_some());
        assert!(m.find(b"quxbaz").is_none());
    }

    #[test]
    fn basic_regex_mid_pattern_anchors_are_literal() {
        let m = Matcher::new("a^b", Mode::Basic, true).unwrap();
        assert!(m.find(b"xx a^b yy").is_some());
        assert!(m.find(b"ab").is_none());

        let m = Matcher::new("x$y", Mode::Basic, true).unwrap();
        assert!(m.find(b"say x$y!").is_some());
        assert!(m.find(b"xy").is_none());
    }

    #[test]
    fn basic_regex_boundary_anchors_still_anchor() {
        let m = Matcher::new("^abc$", Mode::Basic, true).unwrap();
        assert!(m.find(b"abc").is_some());
        assert!(m.find(b"xabc").is_none());
        assert!(m.find(b"abcx").is_none());
    }

    #[test]
    fn malformed_regex_is_reported() {
        let err = Matcher::new("a[b", Mode::Extended, true).unwrap_err();
        assert!(matches!(err, Error::MalformedRegex { .. }));
    }

    #[test]
    fn search_lines_reports_one_based_lines() {
        let m = Matcher::new("needle", Mode::Fixed, true).unwrap();
        let content = b"hay\nneedle here\nhay\nand a needle\n";
        let matches = search_lines("a.txt", content, &m, usize::MAX);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line, 2);
        assert_eq!(matches[0].text, "needle here");
        assert_eq!(matches[1].line, 4);
    }

    #[test]
    fn search_lines_honors_limit_and_crlf() {
        let m = Matcher::new("x", Mode::Fixed, true).unwrap();
        let content = b"x\r\nx\r\nx\r\n";
        let matches = search_lines("a.txt", content, &m, 2);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].text, "x");
    }

    #[test]
    fn regex_matches_non_utf8_content() {
        let m = Matcher::new("ab.d", Mode::Extended, true).unwrap();
        assert!(m.find(&[b'a', b'b', 0xff, b'd']).is_some());
    }
}
