#![forbid(unsafe_code)]

//! Single-pass tokenizer for the expression language.
//!
//! Whitespace separates tokens. Every punctuation character in
//! [`PUNCTUATION`] is always a token of its own, even when glued to an
//! identifier (`a+b` is three tokens). A quoted run (`"..."` or `'...'`) is
//! one token, spaces included. Everything else merges into identifier or
//! number tokens.
//!
//! Tokens borrow from the source; the tokenizer never allocates text.

/// Characters that always form a single-character token.
pub const PUNCTUATION: &[char] = &[
    '+', '-', '*', '/', '^', '(', ')', '=', '<', '>', '!', ',', '?', ':', '{', '}',
];

/// Identifiers that are syntax rather than variable names.
pub const KEYWORDS: &[&str] = &["if", "else", "for", "in", "true", "false"];

#[inline]
#[must_use]
pub fn is_punctuation(c: char) -> bool {
    PUNCTUATION.contains(&c)
}

/// Split `source` into tokens.
#[must_use]
pub fn tokenize(source: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut quote: Option<char> = None;

    for (i, c) in source.char_indices() {
        if let Some(q) = quote {
            if c == q {
                if let Some(s) = start.take() {
                    tokens.push(&source[s..i + c.len_utf8()]);
                }
                quote = None;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            if let Some(s) = start.take() {
                tokens.push(&source[s..i]);
            }
            start = Some(i);
            quote = Some(c);
        } else if c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(&source[s..i]);
            }
        } else if is_punctuation(c) {
            if let Some(s) = start.take() {
                tokens.push(&source[s..i]);
            }
            tokens.push(&source[i..i + c.len_utf8()]);
        } else if start.is_none() {
            start = Some(i);
        }
    }
    // An unterminated quote swallows the rest of the input.
    if let Some(s) = start {
        tokens.push(&source[s..]);
    }
    tokens
}

/// Decimal number: digits with at most one dot, at least one digit.
#[must_use]
pub fn is_number(token: &str) -> bool {
    let mut digits = 0usize;
    let mut dots = 0usize;
    for c in token.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

/// `[A-Za-z_$][A-Za-z0-9_$]*`
#[must_use]
pub fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[must_use]
pub fn is_keyword(token: &str) -> bool {
    KEYWORDS.contains(&token)
}

/// Returns the unquoted body of a quoted text token.
#[must_use]
pub fn quoted_text(token: &str) -> Option<&str> {
    let first = token.chars().next()?;
    if (first == '"' || first == '\'') && token.len() >= 2 && token.ends_with(first) {
        Some(&token[1..token.len() - 1])
    } else {
        None
    }
}
