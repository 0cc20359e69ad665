//! Byte/wildcard pattern compilation and scanning.
//!
//! Patterns are written as hex strings with wildcard elements: `??` matches
//! any byte, `a?`/`?a` match one nybble, `*` matches any gap, and `{n}`,
//! `{n-m}`, `{n-}`, `{-m}` match bounded gaps.

use thiserror::Error;

/// One compiled pattern element.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Consecutive literal bytes
    Literal(Vec<u8>),
    /// Any single byte (`??`)
    AnyByte,
    /// Single byte matched through a nybble mask (`a?` / `?a`)
    Mask { mask: u8, value: u8 },
    /// Gap of `min..=max` arbitrary bytes; `None` max is unbounded (`*`)
    Gap { min: usize, max: Option<usize> },
}

/// Error compiling a pattern from its hex source.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,

    #[error("invalid character '{0}' at position {1}")]
    InvalidCharacter(char, usize),

    #[error("nothing following ? wildcard")]
    TrailingNybble,

    #[error("odd number of hex digits in literal run")]
    OddLiteral,

    #[error("no closing brace for gap opened at position {0}")]
    UnclosedBrace(usize),

    #[error("invalid gap range: {0}")]
    InvalidGapRange(String),

    #[error("gap range start exceeds end: {0}")]
    GapRangeOrder(String),
}

/// A compiled byte/wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    tokens: Vec<Token>,
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl Pattern {
    /// Compile a pattern from its hex-string source.
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        let bytes = source.as_bytes();
        let mut tokens = Vec::new();
        let mut literal: Vec<u8> = Vec::new();
        let mut pending_nybble: Option<u8> = None;

        let flush =
            |literal: &mut Vec<u8>, pending: &Option<u8>, tokens: &mut Vec<Token>| -> Result<(), PatternError> {
                if pending.is_some() {
                    return Err(PatternError::OddLiteral);
                }
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(literal)));
                }
                Ok(())
            };

        let mut iter = bytes.iter().copied().enumerate();
        while let Some((pos, byte)) = iter.next() {
            match byte {
                b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                    let val = match byte {
                        b'0'..=b'9' => byte - b'0',
                        b'a'..=b'f' => byte - b'a' + 10,
                        _ => byte - b'A' + 10,
                    };
                    match pending_nybble.take() {
                        Some(high) => literal.push((high << 4) | val),
                        None => pending_nybble = Some(val),
                    }
                }
                b'?' => {
                    // A high nybble already read means `x?`: low-nybble wildcard.
                    if let Some(high) = pending_nybble.take() {
                        if !literal.is_empty() {
                            tokens.push(Token::Literal(std::mem::take(&mut literal)));
                        }
                        tokens.push(Token::Mask {
                            mask: 0xf0,
                            value: high << 4,
                        });
                        continue;
                    }
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    // Otherwise the next char decides: `??` or `?x`.
                    match iter.next() {
                        None => return Err(PatternError::TrailingNybble),
                        Some((_, b'?')) => tokens.push(Token::AnyByte),
                        Some((p, c)) => match hex_val(c) {
                            Some(low) => tokens.push(Token::Mask {
                                mask: 0x0f,
                                value: low,
                            }),
                            None => return Err(PatternError::InvalidCharacter(c as char, p)),
                        },
                    }
                }
                b'*' => {
                    flush(&mut literal, &pending_nybble, &mut tokens)?;
                    tokens.push(Token::Gap { min: 0, max: None });
                }
                b'{' => {
                    flush(&mut literal, &pending_nybble, &mut tokens)?;
                    let mut spec = String::new();
                    let mut closed = false;
                    for (_, c) in iter.by_ref() {
                        if c == b'}' {
                            closed = true;
                            break;
                        }
                        spec.push(c as char);
                    }
                    if !closed {
                        return Err(PatternError::UnclosedBrace(pos));
                    }
                    tokens.push(Self::parse_gap(&spec)?);
                }
                c => return Err(PatternError::InvalidCharacter(c as char, pos)),
            }
        }

        flush(&mut literal, &pending_nybble, &mut tokens)?;

        if tokens.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self { tokens })
    }

    /// Parse the inside of a `{...}` gap: `n`, `n-m`, `n-`, `-m`.
    fn parse_gap(spec: &str) -> Result<Token, PatternError> {
        let bad = || PatternError::InvalidGapRange(spec.to_string());
        let (min, max) = match spec.split_once('-') {
            None => {
                let n: usize = spec.parse().map_err(|_| bad())?;
                (n, Some(n))
            }
            Some((lo, hi)) => {
                let min = if lo.is_empty() {
                    0
                } else {
                    lo.parse().map_err(|_| bad())?
                };
                let max = if hi.is_empty() {
                    None
                } else {
                    Some(hi.parse().map_err(|_| bad())?)
                };
                (min, max)
            }
        };
        if let Some(max) = max {
            if min > max {
                return Err(PatternError::GapRangeOrder(spec.to_string()));
            }
        }
        Ok(Token::Gap { min, max })
    }

    /// Find the first offset at which the pattern matches.
    pub fn find(&self, buf: &[u8]) -> Option<usize> {
        (0..=buf.len()).find(|&start| self.matches_at(buf, start))
    }

    /// Whether the pattern matches starting exactly at `pos`.
    pub fn matches_at(&self, buf: &[u8], pos: usize) -> bool {
        if pos > buf.len() {
            return false;
        }
        Self::match_tokens(&self.tokens, buf, pos)
    }

    fn match_tokens(tokens: &[Token], buf: &[u8], pos: usize) -> bool {
        let Some((first, rest)) = tokens.split_first() else {
            return true;
        };
        match first {
            Token::Literal(lit) => {
                buf.len() - pos >= lit.len()
                    && &buf[pos..pos + lit.len()] == lit.as_slice()
                    && Self::match_tokens(rest, buf, pos + lit.len())
            }
            Token::AnyByte => pos < buf.len() && Self::match_tokens(rest, buf, pos + 1),
            Token::Mask { mask, value } => {
                pos < buf.len()
                    && buf[pos] & mask == *value
                    && Self::match_tokens(rest, buf, pos + 1)
            }
            Token::Gap { min, max } => {
                let remaining = buf.len() - pos;
                let upper = max.map_or(remaining, |m| m.min(remaining));
                (*min..=upper).any(|skip| Self::match_tokens(rest, buf, pos + skip))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        // "KERNEL32.DLL" prefix of the classic test pattern
        let p = Pattern::compile("4b45524e454c33322e444c4c").unwrap();
        assert_eq!(p.find(b"xxKERNEL32.DLLyy"), Some(2));
        assert_eq!(p.find(b"KERNEL32.DL"), None);
        assert!(p.matches_at(b"KERNEL32.DLL", 0));
        assert!(!p.matches_at(b"KERNEL32.DLL", 1));
    }

    #[test]
    fn test_case_insensitive_hex_digits() {
        let upper = Pattern::compile("4B45").unwrap();
        let lower = Pattern::compile("4b45").unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_any_byte_wildcard() {
        let p = Pattern::compile("41??43").unwrap();
        assert_eq!(p.find(b"AxC"), Some(0));
        assert_eq!(p.find(b"AC"), None);
    }

    #[test]
    fn test_nybble_masks() {
        // 4? matches any byte with high nybble 0x4
        let p = Pattern::compile("4?").unwrap();
        assert!(p.matches_at(&[0x41], 0));
        assert!(p.matches_at(&[0x4f], 0));
        assert!(!p.matches_at(&[0x51], 0));

        // ?1 matches any byte with low nybble 0x1
        let p = Pattern::compile("?1").unwrap();
        assert!(p.matches_at(&[0x41], 0));
        assert!(p.matches_at(&[0xf1], 0));
        assert!(!p.matches_at(&[0x42], 0));
    }

    #[test]
    fn test_unbounded_gap() {
        let p = Pattern::compile("41*42").unwrap();
        assert_eq!(p.find(b"AxxxxxB"), Some(0));
        assert_eq!(p.find(b"AB"), Some(0));
        assert_eq!(p.find(b"BxA"), None);
    }

    #[test]
    fn test_bounded_gap() {
        let p = Pattern::compile("41{1-3}42").unwrap();
        assert_eq!(p.find(b"AxB"), Some(0));
        assert_eq!(p.find(b"AxxxB"), Some(0));
        assert_eq!(p.find(b"AB"), None);
        assert_eq!(p.find(b"AxxxxB"), None);

        let exact = Pattern::compile("41{2}42").unwrap();
        assert_eq!(exact.find(b"AxxB"), Some(0));
        assert_eq!(exact.find(b"AxB"), None);
    }

    #[test]
    fn test_compile_errors() {
        assert_eq!(Pattern::compile(""), Err(PatternError::Empty));
        assert_eq!(Pattern::compile("4"), Err(PatternError::OddLiteral));
        assert_eq!(Pattern::compile("41?"), Err(PatternError::TrailingNybble));
        assert!(matches!(
            Pattern::compile("41{2"),
            Err(PatternError::UnclosedBrace(_))
        ));
        assert!(matches!(
            Pattern::compile("41{5-2}42"),
            Err(PatternError::GapRangeOrder(_))
        ));
        assert!(matches!(
            Pattern::compile("zz"),
            Err(PatternError::InvalidCharacter('z', 0))
        ));
    }

    #[test]
    fn test_match_at_end_of_buffer() {
        let p = Pattern::compile("4142").unwrap();
        assert_eq!(p.find(b"xxAB"), Some(2));
    }
}
