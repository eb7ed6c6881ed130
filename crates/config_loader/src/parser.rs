//! `key=value` line parsing
//!
//! Each line is split at its first `=`; key and value are trimmed.
//! Lines without `=`, lines with an empty key and `#` comment lines are skipped.

use contracts::Configuration;

/// Parse a single line into a `(key, value)` pair
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    if line.trim_start().starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    Some((key, value.trim()))
}

/// Parse configuration content
///
/// Later occurrences of a key replace earlier ones.
pub fn parse(content: &str) -> Configuration {
    content.lines().filter_map(parse_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_basic() {
        assert_eq!(parse_line("a=b"), Some(("a", "b")));
        assert_eq!(parse_line("  spaced key =  spaced value  "), Some(("spaced key", "spaced value")));
    }

    #[test]
    fn test_parse_line_splits_at_first_equals() {
        assert_eq!(
            parse_line("cloud_client_secret=abc=def=="),
            Some(("cloud_client_secret", "abc=def=="))
        );
    }

    #[test]
    fn test_parse_line_skips() {
        assert_eq!(parse_line("no separator here"), None);
        assert_eq!(parse_line("   = orphan value"), None);
        assert_eq!(parse_line("# commented=out"), None);
        assert_eq!(parse_line("   # indented=comment"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn test_parse_line_empty_value() {
        assert_eq!(parse_line("key="), Some(("key", "")));
    }

    #[test]
    fn test_parse_last_occurrence_wins() {
        let config = parse("a=1\nb=2\na=3\n");
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("a"), Some("3"));
        assert_eq!(config.get("b"), Some("2"));
    }

    #[test]
    fn test_parse_crlf() {
        let config = parse("a=1\r\nb = 2 \r\n");
        assert_eq!(config.get("a"), Some("1"));
        assert_eq!(config.get("b"), Some("2"));
    }
}
