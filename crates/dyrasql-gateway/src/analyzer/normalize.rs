//! Statement normalization and fingerprinting
//!
//! Single pass over the statement text:
//! - line (`--`) and block (`/* */`) comments become whitespace
//! - whitespace runs collapse to one space
//! - single-quoted string literals become `?`
//! - standalone numeric literals become `?`
//! - everything else is lowercased
//!
//! Double-quoted identifiers are kept (lowercased) so that statements over
//! different tables or columns never share a fingerprint.

use dyrasql_common::{DyraError, Result};

/// Placeholder emitted for every literal
const PLACEHOLDER: char = '?';

/// A statement with its normalized form and fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub raw_text: String,
    pub normalized_text: String,
    /// blake3 of `normalized_text`, hex-encoded
    pub fingerprint: String,
}

impl NormalizedQuery {
    pub fn new(raw_text: &str) -> Result<Self> {
        let normalized_text = normalize(raw_text)?;
        let fingerprint = fingerprint(&normalized_text);
        Ok(Self {
            raw_text: raw_text.to_string(),
            normalized_text,
            fingerprint,
        })
    }
}

/// Fingerprint of already-normalized text
pub fn fingerprint(normalized_text: &str) -> String {
    blake3::hash(normalized_text.as_bytes()).to_hex().to_string()
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Output buffer that collapses whitespace lazily
struct Writer {
    out: String,
    pending_space: bool,
}

impl Writer {
    fn space(&mut self) {
        self.pending_space = true;
    }

    fn flush_space(&mut self) {
        if self.pending_space && !self.out.is_empty() {
            self.out.push(' ');
        }
        self.pending_space = false;
    }

    fn push(&mut self, c: char) {
        self.flush_space();
        self.out.extend(c.to_lowercase());
    }

    fn push_all(&mut self, chars: &[char]) {
        self.flush_space();
        for c in chars {
            self.out.extend(c.to_lowercase());
        }
    }

    /// Whether the next character would directly follow an identifier character
    fn follows_ident(&self) -> bool {
        !self.pending_space && self.out.chars().next_back().is_some_and(is_ident_char)
    }
}

/// Normalize a statement. Idempotent: `normalize(normalize(q)) == normalize(q)`.
pub fn normalize(sql: &str) -> Result<String> {
    let chars: Vec<char> = sql.chars().collect();
    let len = chars.len();
    let mut w = Writer {
        out: String::with_capacity(sql.len()),
        pending_space: false,
    };
    let mut depth: i64 = 0;
    let mut i = 0;

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '-' if next == Some('-') => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
                w.space();
            }
            '/' if next == Some('*') => {
                i += 2;
                loop {
                    if i >= len {
                        return Err(DyraError::QuerySyntax("unterminated block comment".into()));
                    }
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                w.space();
            }
            c if c.is_whitespace() => {
                w.space();
                i += 1;
            }
            '\'' => {
                i = skip_quoted(&chars, i, '\'')
                    .ok_or_else(|| DyraError::QuerySyntax("unterminated string literal".into()))?;
                w.push(PLACEHOLDER);
            }
            '"' => {
                let end = skip_quoted(&chars, i, '"').ok_or_else(|| {
                    DyraError::QuerySyntax("unterminated quoted identifier".into())
                })?;
                w.push_all(&chars[i..end]);
                i = end;
            }
            c if c.is_ascii_digit() && !w.follows_ident() => {
                let end = scan_number(&chars, i);
                if chars.get(end).copied().is_some_and(is_ident_char) {
                    // part of an identifier such as 1st_quarter
                    w.push_all(&chars[i..end]);
                } else {
                    w.push(PLACEHOLDER);
                }
                i = end;
            }
            _ => {
                if c == '(' {
                    depth += 1;
                } else if c == ')' {
                    depth -= 1;
                    if depth < 0 {
                        return Err(DyraError::QuerySyntax("unbalanced parentheses".into()));
                    }
                }
                w.push(c);
                i += 1;
            }
        }
    }

    if depth != 0 {
        return Err(DyraError::QuerySyntax("unbalanced parentheses".into()));
    }

    let normalized = w.out.trim_end_matches([';', ' ']).to_string();
    if normalized.is_empty() {
        return Err(DyraError::QuerySyntax("empty statement".into()));
    }
    Ok(normalized)
}

/// Index one past the closing quote, honouring doubled-quote escapes
fn skip_quoted(chars: &[char], start: usize, quote: char) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// Index one past a numeric literal: digits, optional fraction, optional exponent
fn scan_number(chars: &[char], start: usize) -> usize {
    let digits = |mut i: usize| {
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        i
    };

    let mut i = digits(start);
    if chars.get(i) == Some(&'.') {
        i = digits(i + 1);
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        let mut j = i + 1;
        if matches!(chars.get(j), Some('+') | Some('-')) {
            j += 1;
        }
        if chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
            i = digits(j);
        }
    }
    i
}
