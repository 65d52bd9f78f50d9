//! Glob pattern matching for the `KEYS` operation.
//!
//! Supported syntax:
//! - `*` matches any sequence of characters, including none
//! - `?` matches exactly one character
//! - `/` is an ordinary character; keys are not paths
//! - `[abc]`, `[a-z]` match one character from the class
//! - `[^abc]` / `[!abc]` match one character not in the class
//! - `\x` matches `x` literally
//!
//! Patterns are compiled once up front so a malformed pattern is reported
//! before any key is scanned.

use std::fmt;

/// Why a pattern could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// `[` without a closing `]`
    #[error("unclosed character class")]
    UnclosedClass,

    /// `[]` or `[^]`
    #[error("empty character class")]
    EmptyClass,

    /// A range missing one of its bounds, e.g. `[a-]` or `[-z]`
    #[error("malformed range in character class")]
    BadRange,

    /// A trailing `\` with nothing to escape
    #[error("dangling escape at end of pattern")]
    DanglingEscape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Single(char),
    Range(char, char),
}

impl ClassItem {
    fn contains(&self, c: char) -> bool {
        match *self {
            ClassItem::Single(s) => s == c,
            ClassItem::Range(lo, hi) => lo <= c && c <= hi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnySequence,
    Class { negated: bool, items: Vec<ClassItem> },
}

impl Token {
    /// Single-character match. `AnySequence` is handled by the matcher loop.
    fn matches_char(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => true,
            Token::AnySequence => false,
            Token::Class { negated, items } => items.iter().any(|i| i.contains(c)) != *negated,
        }
    }
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// Compiles `pattern`, rejecting malformed classes and escapes.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            let token = match c {
                '*' => {
                    // Consecutive stars are equivalent to one
                    while chars.peek() == Some(&'*') {
                        chars.next();
                    }
                    Token::AnySequence
                }
                '?' => Token::AnyChar,
                '\\' => Token::Literal(chars.next().ok_or(PatternError::DanglingEscape)?),
                '[' => {
                    let negated = matches!(chars.peek(), Some('^') | Some('!'));
                    if negated {
                        chars.next();
                    }

                    let mut items = Vec::new();
                    loop {
                        let lo = match chars.next() {
                            None => return Err(PatternError::UnclosedClass),
                            Some(']') if items.is_empty() => return Err(PatternError::EmptyClass),
                            Some(']') => break,
                            Some('-') => return Err(PatternError::BadRange),
                            Some('\\') => chars.next().ok_or(PatternError::DanglingEscape)?,
                            Some(ch) => ch,
                        };

                        if chars.peek() == Some(&'-') {
                            chars.next();
                            let hi = match chars.next() {
                                None => return Err(PatternError::UnclosedClass),
                                Some(']') | Some('-') => return Err(PatternError::BadRange),
                                Some('\\') => chars.next().ok_or(PatternError::DanglingEscape)?,
                                Some(ch) => ch,
                            };
                            items.push(ClassItem::Range(lo, hi));
                        } else {
                            items.push(ClassItem::Single(lo));
                        }
                    }

                    Token::Class { negated, items }
                }
                other => Token::Literal(other),
            };
            tokens.push(token);
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// The pattern text this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Tests whether `text` matches the whole pattern.
    ///
    /// Uses the iterative star-backtracking walk, so matching is
    /// `O(pattern * text)` in the worst case.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let mut p = 0;
        let mut t = 0;
        // (token index after the last star, text index that star resumes from)
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::AnySequence) => {
                    backtrack = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                Some(token) if token.matches_char(text[t]) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }

            match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }

        self.tokens[p..]
            .iter()
            .all(|token| matches!(token, Token::AnySequence))
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A `KEYS` pattern, compiled once and applied to many keys.
///
/// `"*"` matches everything without running the matcher. A malformed pattern
/// falls back to exact string equality.
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    All,
    Glob(GlobPattern),
    Exact(String),
}

impl KeyMatcher {
    pub fn new(pattern: &str) -> Self {
        if pattern == "*" {
            return KeyMatcher::All;
        }
        match GlobPattern::compile(pattern) {
            Ok(glob) => KeyMatcher::Glob(glob),
            Err(_) => KeyMatcher::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyMatcher::All => true,
            KeyMatcher::Glob(glob) => glob.matches(key),
            KeyMatcher::Exact(s) => s == key,
        }
    }
}

/// Matches `key` against `pattern` the way `KEYS` does.
pub fn match_key(pattern: &str, key: &str) -> bool {
    KeyMatcher::new(pattern).matches(key)
}
