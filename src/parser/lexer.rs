//! Logical-line lexer.
//!
//! Splits module source into logical lines the way the host language does:
//! physical lines are joined while brackets are open, inside triple-quoted
//! strings, and after a trailing backslash. Blank and comment-only lines are
//! kept as trivia attached to the next logical line, so a module can be
//! reproduced byte for byte from its lines.

use super::{ParseError, ParseResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Number,
    Str,
    Op,
}

/// A token with byte offsets into its logical line's text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicalLine {
    /// Blank and comment lines preceding this line, newlines included.
    pub leading: String,
    /// Raw text including indentation and the final newline, if any.
    pub text: String,
    /// 1-based number of the first physical line.
    pub lineno: usize,
    /// Width of the leading whitespace.
    pub indent: usize,
    pub tokens: Vec<Token>,
}

impl LogicalLine {
    pub fn token_text(&self, token: &Token) -> &str {
        &self.text[token.start..token.end]
    }

    /// Text of the token at `idx`, if any.
    pub fn tok(&self, idx: usize) -> Option<&str> {
        self.tokens.get(idx).map(|t| self.token_text(t))
    }

    /// Source between two tokens, both included.
    pub fn span(&self, first: usize, last: usize) -> &str {
        match (self.tokens.get(first), self.tokens.get(last)) {
            (Some(a), Some(b)) if a.start <= b.end => &self.text[a.start..b.end],
            _ => "",
        }
    }

    /// Leading whitespace of the line.
    pub fn indent_str(&self) -> &str {
        let width = self.text.len() - self.text.trim_start_matches([' ', '\t']).len();
        &self.text[..width]
    }

    pub fn is_op(&self, idx: usize, op: &str) -> bool {
        matches!(self.tokens.get(idx), Some(t) if t.kind == TokenKind::Op && self.token_text(t) == op)
    }

    /// True when the line ends with a block-opening colon.
    pub fn opens_block(&self) -> bool {
        self.tokens
            .len()
            .checked_sub(1)
            .map_or(false, |last| self.is_op(last, ":"))
    }

    pub fn is_decorator(&self) -> bool {
        self.is_op(0, "@")
    }

    /// Source of the line without indentation and trailing newline.
    pub fn code(&self) -> &str {
        self.text.trim_start_matches([' ', '\t']).trim_end_matches(['\n', '\r'])
    }
}

/// Bracket and string state carried across physical lines.
#[derive(Default)]
struct Continuation {
    depth: i32,
    /// Open triple-quoted string delimiter.
    triple: Option<char>,
}

impl Continuation {
    /// Scans one physical line; returns true if the logical line continues.
    fn scan(&mut self, line: &str) -> bool {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        let mut single: Option<char> = None;
        while i < chars.len() {
            let c = chars[i];
            if let Some(q) = self.triple {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == q && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                    self.triple = None;
                    i += 3;
                    continue;
                }
                i += 1;
                continue;
            }
            if let Some(q) = single {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == q || c == '\n' {
                    single = None;
                }
                i += 1;
                continue;
            }
            match c {
                '#' => break,
                '\'' | '"' => {
                    if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                        self.triple = Some(c);
                        i += 3;
                        continue;
                    }
                    single = Some(c);
                }
                '(' | '[' | '{' => self.depth += 1,
                ')' | ']' | '}' => self.depth -= 1,
                '\\' if chars[i + 1..].iter().all(|c| *c == '\n' || *c == '\r') => return true,
                _ => {}
            }
            i += 1;
        }
        self.depth > 0 || self.triple.is_some()
    }
}

fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

fn is_trivia(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Splits source into logical lines plus trailing trivia.
pub fn logical_lines(source: &str) -> ParseResult<(Vec<LogicalLine>, String)> {
    let mut lines = Vec::new();
    let mut leading = String::new();
    let mut current: Option<(String, usize)> = None;
    let mut state = Continuation::default();

    for (idx, physical) in source.split_inclusive('\n').enumerate() {
        let lineno = idx + 1;
        let (mut text, start) = match current.take() {
            Some(open) => open,
            None if is_trivia(physical) => {
                leading.push_str(physical);
                continue;
            }
            None => (String::new(), lineno),
        };
        text.push_str(physical);
        if state.scan(physical) {
            current = Some((text, start));
            continue;
        }
        let tokens = tokenize(&text, start)?;
        lines.push(LogicalLine {
            leading: std::mem::take(&mut leading),
            indent: indent_width(&text),
            text,
            lineno: start,
            tokens,
        });
        state = Continuation::default();
    }

    if let Some((_, start)) = current {
        return Err(ParseError::UnterminatedLine { line: start });
    }
    Ok((lines, leading))
}

const OPERATORS: [&str; 26] = [
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "==", "!=", "<=", ">=", "**", "//", "<<",
    ">>", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "<>", "~",
];

fn is_string_prefix(prefix: &str) -> bool {
    prefix.len() <= 2
        && prefix
            .chars()
            .all(|c| matches!(c.to_ascii_lowercase(), 'r' | 'b' | 'u' | 'f'))
}

/// Tokenizes one logical line.
pub fn tokenize(text: &str, lineno: usize) -> ParseResult<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < text.len() {
        let c = match text[i..].chars().next() {
            Some(c) => c,
            None => break,
        };
        let start = i;

        if c.is_whitespace() || c == '\\' {
            i += c.len_utf8();
        } else if c == '#' {
            i = text[i..].find('\n').map_or(text.len(), |n| i + n);
        } else if c.is_alphabetic() || c == '_' {
            while let Some(ch) = text[i..].chars().next() {
                if ch.is_alphanumeric() || ch == '_' {
                    i += ch.len_utf8();
                } else {
                    break;
                }
            }
            if i < text.len()
                && matches!(bytes[i], b'\'' | b'"')
                && is_string_prefix(&text[start..i])
            {
                i = scan_string(text, i, lineno)?;
                tokens.push(Token { kind: TokenKind::Str, start, end: i });
            } else {
                tokens.push(Token { kind: TokenKind::Name, start, end: i });
            }
        } else if c.is_ascii_digit()
            || (c == '.' && bytes.get(i + 1).map_or(false, u8::is_ascii_digit))
        {
            i += 1;
            while i < text.len() {
                let b = bytes[i];
                if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' {
                    i += 1;
                } else if matches!(b, b'+' | b'-') && matches!(bytes[i - 1], b'e' | b'E') {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token { kind: TokenKind::Number, start, end: i });
        } else if c == '\'' || c == '"' {
            i = scan_string(text, i, lineno)?;
            tokens.push(Token { kind: TokenKind::Str, start, end: i });
        } else {
            let len = OPERATORS
                .iter()
                .find(|op| text[i..].starts_with(*op))
                .map_or(c.len_utf8(), |op| op.len());
            i += len;
            tokens.push(Token { kind: TokenKind::Op, start, end: i });
        }
    }
    Ok(tokens)
}

/// Scans a string literal starting at its opening quote; returns the end offset.
fn scan_string(text: &str, start: usize, lineno: usize) -> ParseResult<usize> {
    let bytes = text.as_bytes();
    let quote = bytes[start];
    let triple = bytes.get(start + 1) == Some(&quote) && bytes.get(start + 2) == Some(&quote);
    let mut i = start + if triple { 3 } else { 1 };
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => {
                if !triple {
                    return Ok(i + 1);
                }
                if bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote) {
                    return Ok(i + 3);
                }
                i += 1;
            }
            b'\n' if !triple => break,
            _ => i += 1,
        }
    }
    Err(ParseError::UnterminatedString { line: lineno })
}
