use super::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    LParen,
    RParen,
    Comma,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    Bang,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset into the source.
    pub pos: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let (kind, end) = number(source, i)?;
            tokens.push(Token { kind, pos: start });
            i = end;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(source[start..i].to_string()),
                pos: start,
            });
            continue;
        }

        if c == b'\'' || c == b'"' {
            let (s, end) = string(source, i)?;
            tokens.push(Token {
                kind: TokenKind::Str(s),
                pos: start,
            });
            i = end;
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (kind, width) = match (c, next) {
            (b'*', Some(b'*')) => (TokenKind::StarStar, 2),
            (b'/', Some(b'/')) => (TokenKind::SlashSlash, 2),
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::NotEq, 2),
            (b'&', Some(b'&')) => (TokenKind::AndAnd, 2),
            (b'|', Some(b'|')) => (TokenKind::OrOr, 2),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'!', _) => (TokenKind::Bang, 1),
            _ => {
                let ch = source[i..].chars().next().unwrap_or('?');
                return Err(ParseError::new(i, format!("unexpected character '{ch}'")));
            }
        };
        tokens.push(Token { kind, pos: start });
        i += width;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: source.len(),
    });
    Ok(tokens)
}

fn number(source: &str, start: usize) -> Result<(TokenKind, usize), ParseError> {
    let bytes = source.as_bytes();
    let mut i = start;
    let mut is_float = false;

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            is_float = true;
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }

    let text = &source[start..i];
    let kind = if is_float {
        text.parse::<f64>()
            .map(TokenKind::Float)
            .map_err(|_| ParseError::new(start, format!("invalid number '{text}'")))?
    } else {
        text.parse::<i64>()
            .map(TokenKind::Int)
            .map_err(|_| ParseError::new(start, format!("integer literal '{text}' out of range")))?
    };
    Ok((kind, i))
}

fn string(source: &str, start: usize) -> Result<(String, usize), ParseError> {
    let quote = source.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = source[start + 1..].char_indices();

    while let Some((offset, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + 1 + offset + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(ParseError::new(start, "unterminated string literal"))
}
