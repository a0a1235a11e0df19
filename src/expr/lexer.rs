use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::SyntaxError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    /// `` $`pointer` ``
    Deref(String),
    Punct(&'static str),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) offset: usize,
}

// longest first so `===` wins over `==` and `=`
const PUNCTS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "(", ")", "[", "]", ",", ".", "?", ":",
    "!", "+", "-", "*", "/", "%", "<", ">",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer<'s> {
    source: &'s str,
    chars: Peekable<CharIndices<'s>>,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Lexer { source, chars: source.char_indices().peekable() }
    }

    fn run(mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(&(offset, c)) = self.chars.peek() else { break };
            let token = match c {
                '0'..='9' => self.number()?,
                '\'' | '"' => self.string(c)?,
                '$' => self.deref()?,
                c if c.is_alphabetic() || c == '_' => self.ident(),
                _ => self.punct(offset)?,
            };
            out.push(Spanned { token, offset });
        }
        Ok(out)
    }

    fn number(&mut self) -> Result<Token, SyntaxError> {
        let start = self.offset();
        let mut seen_dot = false;
        while let Some(&(_, c)) = self.chars.peek() {
            match c {
                '0'..='9' => {}
                '.' if !seen_dot && self.digit_after_dot() => seen_dot = true,
                _ => break,
            }
            self.chars.next();
        }
        let digits = &self.source[start..self.offset()];
        digits
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| error(start, format!("invalid number `{digits}`")))
    }

    /// `1.5` is a number, `a.b` after an integer index is member access.
    fn digit_after_dot(&self) -> bool {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.peek().is_some_and(|(_, c)| c.is_ascii_digit())
    }

    fn string(&mut self, quote: char) -> Result<Token, SyntaxError> {
        let start = self.offset();
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(error(start, "unterminated string literal")),
                Some((_, c)) if c == quote => return Ok(Token::Str(out)),
                Some((at, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, c)) => out.push(c),
                    None => return Err(error(at, "dangling escape")),
                },
                Some((_, c)) => out.push(c),
            }
        }
    }

    fn deref(&mut self) -> Result<Token, SyntaxError> {
        let start = self.offset();
        self.chars.next();
        match self.chars.next() {
            Some((_, '`')) => {}
            _ => return Err(error(start, "expected `` ` `` after `$`")),
        }
        let mut pointer = String::new();
        loop {
            match self.chars.next() {
                None => return Err(error(start, "unterminated pointer reference")),
                Some((_, '`')) => return Ok(Token::Deref(pointer)),
                Some((_, c)) => pointer.push(c),
            }
        }
    }

    fn ident(&mut self) -> Token {
        let start = self.offset();
        while self
            .chars
            .peek()
            .filter(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
            .is_some()
        {
            self.chars.next();
        }
        Token::Ident(self.source[start..self.offset()].to_string())
    }

    fn punct(&mut self, offset: usize) -> Result<Token, SyntaxError> {
        let rest = &self.source[offset..];
        let Some(p) = PUNCTS.iter().find(|p| rest.starts_with(**p)) else {
            let c = rest.chars().next().unwrap_or(' ');
            return Err(error(offset, format!("unexpected character `{c}`")));
        };
        for _ in 0..p.chars().count() {
            self.chars.next();
        }
        Ok(Token::Punct(*p))
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().filter(|(_, c)| c.is_whitespace()).is_some() {
            self.chars.next();
        }
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map(|(i, _)| *i).unwrap_or(self.source.len())
    }
}

fn error(offset: usize, message: impl Into<String>) -> SyntaxError {
    SyntaxError { message: message.into(), offset }
}
