//! YAML parsing support and source-span utilities

pub mod diagnostics;

pub use diagnostics::{YamlError, YamlSyntaxError};

use miette::SourceSpan;

/// Find the span of a `key:` entry in YAML content.
///
/// Searches for the key at the start of a line (allowing leading
/// whitespace) and returns the span of the whole line.
pub(crate) fn find_key_span(content: &str, key: &str) -> Option<SourceSpan> {
    let search_pattern = format!("{}:", key);

    let mut offset = 0;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with(&search_pattern) {
            let indent = line.len() - trimmed.len();
            return Some((offset + indent, trimmed.len()).into());
        }
        offset += line.len() + 1;
    }
    None
}

/// Find the span of a `key: value` entry in YAML content.
///
/// Unlike [`find_key_span`], this matches the value too, so it can point
/// at the right line when the same key appears many times in a file
/// (`ID:` and `REFID:` entries especially).
pub(crate) fn find_entry_span(content: &str, key: &str, value: &str) -> Option<SourceSpan> {
    let mut offset = 0;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(key) {
            let rest = rest.trim_start();
            if let Some(rest) = rest.strip_prefix(':') {
                let entry_value = rest.trim().trim_matches('"').trim_matches('\'');
                if entry_value == value {
                    let indent = line.len() - trimmed.len();
                    return Some((offset + indent, trimmed.len()).into());
                }
            }
        }
        offset += line.len() + 1;
    }
    None
}

/// Span covering the first line of the content, used when nothing more
/// precise can be located.
pub(crate) fn first_line_span(content: &str) -> SourceSpan {
    let len = content.find('\n').unwrap_or(content.len()).max(1);
    (0, len).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_key_span() {
        let content = "ID: Root\ntitle: \"Test\"\nthreats:\n";
        let span = find_key_span(content, "title").unwrap();
        assert_eq!(span.offset(), 9);

        assert!(find_key_span(content, "missing").is_none());
    }

    #[test]
    fn test_find_key_span_indented() {
        let content = "scope:\n  description: text\n";
        let span = find_key_span(content, "description").unwrap();
        assert_eq!(span.offset(), 9);
    }

    #[test]
    fn test_find_entry_span_picks_matching_value() {
        let content = "threats:\n  - REFID: T1\n  - REFID: T2\n";
        let span = find_entry_span(content, "REFID", "T2").unwrap();
        let start: usize = span.offset();
        assert!(content[start..].starts_with("REFID: T2"));
    }

    #[test]
    fn test_find_entry_span_quoted_value() {
        let content = "ID: \"Root\"\n";
        assert!(find_entry_span(content, "ID", "Root").is_some());
    }

    #[test]
    fn test_first_line_span() {
        let span = first_line_span("short\nlonger line\n");
        assert_eq!(span.offset(), 0);
        assert_eq!(span.len(), 5);
    }
}
