// Pattern matching for automod rules.
//
// This module handles:
// - Compiling the comma-separated wildcard syntax admins type into anchored regexes
// - Validating raw regexes and their flags before a rule is saved
// - Testing a rule's pattern set against a piece of text under a match mode
//
// Matching is exact: no case folding or whitespace normalization happens
// unless a pattern's own flags ask for it.

use super::automod_models::{MatchMode, Pattern};
use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Flags a pattern may carry. Anything else is rejected at authoring time.
pub const ALLOWED_FLAGS: [char; 4] = ['i', 'm', 's', 'x'];

// Flags every compiled wildcard carries.
const WILDCARD_FLAGS: &str = "s";

// Cap how many compiled regexes we keep so the cache can't grow unbounded.
const MAX_CACHED_PATTERNS: usize = 4_096;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPatternError {
    #[error("Pattern input is empty")]
    Empty,

    #[error("Wildcard token {index} is empty (check for stray commas)")]
    EmptyToken { index: usize },

    #[error("Wildcard ends with an unfinished escape (`\\`)")]
    UnterminatedEscape,

    #[error("Unsupported regex flag `{0}` (allowed: i, m, s, x)")]
    UnsupportedFlag(char),

    #[error("Regex flag `{0}` given more than once")]
    DuplicateFlag(char),

    #[error("Pattern `{pattern}` does not compile: {message}")]
    Compile { pattern: String, message: String },
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Outcome of checking a regex before it is stored on a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexValidation {
    pub valid: bool,
    pub error: Option<String>,
}

/// Try to build `pattern` with `flags` under the `regex` crate's dialect.
pub fn validate_regex(pattern: &str, flags: Option<&str>) -> RegexValidation {
    match build_regex(pattern, flags) {
        Ok(_) => RegexValidation {
            valid: true,
            error: None,
        },
        Err(e) => RegexValidation {
            valid: false,
            error: Some(e.to_string()),
        },
    }
}

/// Compile a stored pattern.
pub fn compile_pattern(pattern: &Pattern) -> Result<Regex, InvalidPatternError> {
    build_regex(&pattern.regex, pattern.flags.as_deref())
}

fn build_regex(pattern: &str, flags: Option<&str>) -> Result<Regex, InvalidPatternError> {
    if pattern.is_empty() {
        return Err(InvalidPatternError::Empty);
    }

    let mut builder = RegexBuilder::new(pattern);
    let mut seen = Vec::new();
    for flag in flags.unwrap_or_default().chars() {
        if !ALLOWED_FLAGS.contains(&flag) {
            return Err(InvalidPatternError::UnsupportedFlag(flag));
        }
        if seen.contains(&flag) {
            return Err(InvalidPatternError::DuplicateFlag(flag));
        }
        seen.push(flag);

        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            _ => unreachable!("flag checked against ALLOWED_FLAGS"),
        };
    }

    builder.build().map_err(|e| InvalidPatternError::Compile {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// WILDCARDS
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum WildcardPiece {
    Literal { ch: char, escaped: bool },
    AnySequence,
    AnyChar,
}

#[derive(Debug, Default)]
struct WildcardToken {
    pieces: Vec<WildcardPiece>,
}

impl WildcardToken {
    fn trim(mut self) -> Self {
        let is_blank =
            |p: &WildcardPiece| matches!(p, WildcardPiece::Literal { ch, escaped: false } if ch.is_whitespace());
        while self.pieces.last().is_some_and(is_blank) {
            self.pieces.pop();
        }
        let leading = self.pieces.iter().take_while(|p| is_blank(p)).count();
        self.pieces.drain(..leading);
        self
    }

    /// The token as the admin wrote it (escapes kept), used as the pattern label.
    fn source(&self) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                WildcardPiece::Literal { ch, escaped } => {
                    if *escaped {
                        out.push('\\');
                    }
                    out.push(*ch);
                }
                WildcardPiece::AnySequence => out.push('*'),
                WildcardPiece::AnyChar => out.push('?'),
            }
        }
        out
    }

    fn to_regex(&self) -> String {
        let mut out = String::from("^");
        let mut literal = String::new();
        for piece in &self.pieces {
            match piece {
                WildcardPiece::Literal { ch, .. } => literal.push(*ch),
                WildcardPiece::AnySequence | WildcardPiece::AnyChar => {
                    out.push_str(&regex::escape(&literal));
                    literal.clear();
                    out.push_str(if matches!(piece, WildcardPiece::AnySequence) {
                        ".*"
                    } else {
                        "."
                    });
                }
            }
        }
        out.push_str(&regex::escape(&literal));
        out.push('$');
        out
    }
}

fn split_wildcard_tokens(input: &str) -> Result<Vec<WildcardToken>, InvalidPatternError> {
    let mut tokens = Vec::new();
    let mut current = WildcardToken::default();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let next = chars.next().ok_or(InvalidPatternError::UnterminatedEscape)?;
                current.pieces.push(WildcardPiece::Literal {
                    ch: next,
                    escaped: true,
                });
            }
            ',' => tokens.push(std::mem::take(&mut current)),
            '*' => current.pieces.push(WildcardPiece::AnySequence),
            '?' => current.pieces.push(WildcardPiece::AnyChar),
            other => current.pieces.push(WildcardPiece::Literal {
                ch: other,
                escaped: false,
            }),
        }
    }
    tokens.push(current);

    Ok(tokens.into_iter().map(WildcardToken::trim).collect())
}

/// Compile comma-separated wildcard tokens into anchored regex patterns.
///
/// `*` matches any run of characters, `?` exactly one, and `\` escapes the
/// next character (so `\,` and `\*` are literals). Every other character is
/// matched literally.
pub fn compile_wildcard(input: &str) -> Result<Vec<Pattern>, InvalidPatternError> {
    if input.trim().is_empty() {
        return Err(InvalidPatternError::Empty);
    }

    let tokens = split_wildcard_tokens(input)?;
    let mut patterns = Vec::with_capacity(tokens.len());

    for (index, token) in tokens.iter().enumerate() {
        if token.pieces.is_empty() {
            return Err(InvalidPatternError::EmptyToken { index });
        }

        let regex = token.to_regex();
        // `*` and `?` must span line breaks too, or a newline dodges the rule.
        build_regex(&regex, Some(WILDCARD_FLAGS))?;
        patterns.push(
            Pattern::new(regex)
                .with_flags(WILDCARD_FLAGS)
                .with_label(token.source()),
        );
    }

    Ok(patterns)
}

// ============================================================================
// MATCHING
// ============================================================================

/// Result of testing a pattern set against some text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTest {
    pub matched: bool,
    pub matched_pattern: Option<Pattern>,
}

impl PatternTest {
    fn miss() -> Self {
        Self {
            matched: false,
            matched_pattern: None,
        }
    }

    fn hit(pattern: &Pattern) -> Self {
        Self {
            matched: true,
            matched_pattern: Some(pattern.clone()),
        }
    }
}

/// Tests pattern sets, caching compiled regexes between events.
pub struct PatternMatcher {
    cache: DashMap<(String, Option<String>), Regex>,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    fn regex_for(&self, pattern: &Pattern) -> Option<Regex> {
        let key = (pattern.regex.clone(), pattern.flags.clone());
        if let Some(regex) = self.cache.get(&key) {
            return Some(regex.clone());
        }

        match compile_pattern(pattern) {
            Ok(regex) => {
                // Simple eviction: drop an arbitrary entry once we cross the cap.
                if self.cache.len() >= MAX_CACHED_PATTERNS {
                    if let Some(first_key) = self.cache.iter().next().map(|e| e.key().clone()) {
                        self.cache.remove(&first_key);
                    }
                }
                self.cache.insert(key, regex.clone());
                Some(regex)
            }
            Err(e) => {
                // Stored rules are validated on write, so this means the store was edited by hand.
                tracing::warn!(pattern = %pattern.regex, error = %e, "Skipping uncompilable automod pattern");
                None
            }
        }
    }

    fn is_match(&self, pattern: &Pattern, content: &str) -> bool {
        self.regex_for(pattern)
            .map(|regex| regex.is_match(content))
            .unwrap_or(false)
    }

    /// Test `patterns` against `content`.
    ///
    /// `Any` returns on the first pattern that matches. `All` walks the list
    /// left to right and stops at the first pattern that does not match; on
    /// success the first pattern is reported. An empty list never matches.
    pub fn test_patterns(&self, patterns: &[Pattern], content: &str, mode: MatchMode) -> PatternTest {
        let Some(first) = patterns.first() else {
            return PatternTest::miss();
        };

        match mode {
            MatchMode::Any => patterns
                .iter()
                .find(|p| self.is_match(p, content))
                .map(PatternTest::hit)
                .unwrap_or_else(PatternTest::miss),
            MatchMode::All => {
                if patterns.iter().all(|p| self.is_match(p, content)) {
                    PatternTest::hit(first)
                } else {
                    PatternTest::miss()
                }
            }
        }
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
