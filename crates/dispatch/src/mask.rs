//! Wildcard mask compilation.
//!
//! Binding patterns support `*` (any run of characters, including empty)
//! and `?` (exactly one character); everything else is literal. Matching
//! is case-insensitive and anchored at both ends. Patterns compile once at
//! registration into a [`regex::Regex`].

use regex::RegexBuilder;

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Mask {
    pattern: String,
    regex: regex::Regex,
    literal: bool,
}

impl Mask {
    pub fn compile(pattern: &str) -> Result<Self, DispatchError> {
        if pattern.is_empty() {
            return Err(DispatchError::InvalidPattern {
                pattern: pattern.to_string(),
                message: "pattern must not be empty".to_string(),
            });
        }

        let mut source = String::with_capacity(pattern.len() + 8);
        source.push('^');
        let mut literal = true;
        for ch in pattern.chars() {
            match ch {
                '*' => {
                    literal = false;
                    source.push_str(".*");
                }
                '?' => {
                    literal = false;
                    source.push('.');
                }
                other => {
                    let mut buf = [0u8; 4];
                    source.push_str(&regex::escape(other.encode_utf8(&mut buf)));
                }
            }
        }
        source.push('$');

        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| DispatchError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            literal,
        })
    }

    pub fn matches(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// Whether the pattern contains no wildcards. Literal masks outrank
    /// wildcard masks when a first-match-only tie is broken.
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(pattern: &str) -> Mask {
        Mask::compile(pattern).unwrap()
    }

    #[test]
    fn star_matches_any_run() {
        let m = mask("#dev*");
        assert!(m.matches("#devops"));
        assert!(m.matches("#dev"));
        assert!(!m.matches("#staging"));
    }

    #[test]
    fn lone_star_matches_everything() {
        let m = mask("*");
        assert!(m.matches(""));
        assert!(m.matches("anything/at/all"));
    }

    #[test]
    fn question_mark_matches_exactly_one() {
        let m = mask("room-?");
        assert!(m.matches("room-1"));
        assert!(m.matches("room-X"));
        assert!(!m.matches("room-"));
        assert!(!m.matches("room-12"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let m = mask("GitHub/Push");
        assert!(m.matches("github/push"));
        assert!(m.matches("GITHUB/PUSH"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let m = mask("metrics.cpu+load");
        assert!(m.matches("metrics.cpu+load"));
        assert!(!m.matches("metricsXcpu+load"));
        assert!(!m.matches("metrics.cpuuload"));
    }

    #[test]
    fn anchored_both_ends() {
        let m = mask("push");
        assert!(!m.matches("github/push"));
        assert!(!m.matches("pushed"));
    }

    #[test]
    fn literal_flag() {
        assert!(mask("github/push").is_literal());
        assert!(!mask("github/*").is_literal());
        assert!(!mask("github/pus?").is_literal());
    }

    #[test]
    fn empty_pattern_rejected() {
        assert!(matches!(
            Mask::compile(""),
            Err(DispatchError::InvalidPattern { .. })
        ));
    }
}
