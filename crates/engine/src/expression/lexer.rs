//! Tokenizer for the mapping expression language.

use serde_json::Number;

use super::ExpressionSyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(Number),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Question,
    QuestionQuestion,
    Colon,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eof,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Number(number) => format!("number {number}"),
            TokenKind::Str(text) => format!("string '{text}'"),
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Eof => "end of expression".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Question => "?",
            TokenKind::QuestionQuestion => "??",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Number(_) | TokenKind::Str(_) | TokenKind::Ident(_) | TokenKind::Eof => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token start within the source.
    pub offset: usize,
}

/// Splits `source` into tokens, always ending with [`TokenKind::Eof`].
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionSyntaxError> {
    let mut lexer = Lexer {
        source,
        chars: source.char_indices().peekable(),
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl Lexer<'_> {
    fn error(&self, offset: usize, message: impl Into<String>) -> ExpressionSyntaxError {
        ExpressionSyntaxError::new(self.source, offset, message)
    }

    fn next_token(&mut self) -> Result<Token, ExpressionSyntaxError> {
        while self.chars.next_if(|(_, ch)| ch.is_whitespace()).is_some() {}

        let Some((offset, ch)) = self.chars.next() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                offset: self.source.len(),
            });
        };

        let kind = match ch {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '.' if self.chars.peek().is_some_and(|(_, next)| next.is_ascii_digit()) => {
                return Err(self.error(offset, "numbers must start with a digit"));
            }
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '=' if self.eat('=') => TokenKind::EqEq,
            '=' => return Err(self.error(offset, "assignment is not supported; use '==' to compare")),
            '!' if self.eat('=') => TokenKind::NotEq,
            '!' => TokenKind::Bang,
            '<' if self.eat('=') => TokenKind::Le,
            '<' => TokenKind::Lt,
            '>' if self.eat('=') => TokenKind::Ge,
            '>' => TokenKind::Gt,
            '&' if self.eat('&') => TokenKind::AndAnd,
            '|' if self.eat('|') => TokenKind::OrOr,
            '?' if self.eat('?') => TokenKind::QuestionQuestion,
            '?' => TokenKind::Question,
            '\'' | '"' => TokenKind::Str(self.string(offset, ch)?),
            ch if ch.is_ascii_digit() => TokenKind::Number(self.number(offset)?),
            ch if ch.is_alphabetic() || ch == '_' => TokenKind::Ident(self.identifier(offset)),
            other => return Err(self.error(offset, format!("unexpected character '{other}'"))),
        };
        Ok(Token { kind, offset })
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|(_, ch)| *ch == expected).is_some()
    }

    fn end_offset(&mut self) -> usize {
        self.chars.peek().map(|(index, _)| *index).unwrap_or(self.source.len())
    }

    fn identifier(&mut self, start: usize) -> String {
        while self.chars.next_if(|(_, ch)| ch.is_alphanumeric() || *ch == '_').is_some() {}
        let end = self.end_offset();
        self.source[start..end].to_string()
    }

    fn number(&mut self, start: usize) -> Result<Number, ExpressionSyntaxError> {
        while self.chars.next_if(|(_, ch)| ch.is_ascii_digit()).is_some() {}
        let mut is_decimal = false;
        // A dot only belongs to the number when a digit follows it.
        let mut lookahead = self.chars.clone();
        if let (Some((_, '.')), Some((_, digit))) = (lookahead.next(), lookahead.next())
            && digit.is_ascii_digit()
        {
            is_decimal = true;
            self.chars.next();
            while self.chars.next_if(|(_, ch)| ch.is_ascii_digit()).is_some() {}
        }
        if self.chars.peek().is_some_and(|(_, ch)| *ch == 'e' || *ch == 'E') {
            let mut exponent = self.chars.clone();
            exponent.next();
            exponent.next_if(|(_, ch)| *ch == '+' || *ch == '-');
            if exponent.peek().is_some_and(|(_, ch)| ch.is_ascii_digit()) {
                is_decimal = true;
                self.chars = exponent;
                while self.chars.next_if(|(_, ch)| ch.is_ascii_digit()).is_some() {}
            }
        }
        let end = self.end_offset();
        let text = &self.source[start..end];
        if !is_decimal && let Ok(integer) = text.parse::<i64>() {
            return Ok(Number::from(integer));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .ok_or_else(|| self.error(start, format!("invalid number '{text}'")))
    }

    fn string(&mut self, start: usize, quote: char) -> Result<String, ExpressionSyntaxError> {
        let mut text = String::new();
        loop {
            let Some((offset, ch)) = self.chars.next() else {
                return Err(self.error(start, "unterminated string literal"));
            };
            match ch {
                ch if ch == quote => return Ok(text),
                '\\' => text.push(self.escape(offset)?),
                ch => text.push(ch),
            }
        }
    }

    fn escape(&mut self, offset: usize) -> Result<char, ExpressionSyntaxError> {
        let Some((_, ch)) = self.chars.next() else {
            return Err(self.error(offset, "unterminated escape sequence"));
        };
        match ch {
            '\\' => Ok('\\'),
            '\'' => Ok('\''),
            '"' => Ok('"'),
            'n' => Ok('\n'),
            't' => Ok('\t'),
            'r' => Ok('\r'),
            'u' => self.unicode_escape(offset),
            other => Err(self.error(offset, format!("unknown escape sequence '\\{other}'"))),
        }
    }

    fn unicode_escape(&mut self, offset: usize) -> Result<char, ExpressionSyntaxError> {
        if !self.eat('{') {
            return Err(self.error(offset, "unicode escapes are written '\\u{...}'"));
        }
        let mut digits = String::new();
        loop {
            match self.chars.next() {
                Some((_, '}')) => break,
                Some((_, ch)) if ch.is_ascii_hexdigit() && digits.len() < 6 => digits.push(ch),
                _ => return Err(self.error(offset, "malformed unicode escape")),
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(offset, format!("invalid unicode scalar '{digits}'")))
    }
}
