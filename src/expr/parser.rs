use crate::error::SyntaxError;

use super::lexer::{Spanned, Token, tokenize};
use super::{BinaryOp, Expr, Ident, Part, UnaryOp};

pub(crate) fn parse_expression(source: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0, end: source.len(), depth: 0 };
    if parser.tokens.is_empty() {
        return Err(SyntaxError { message: "empty expression".into(), offset: 0 });
    }
    let expr = parser.conditional()?;
    match parser.peek() {
        None => Ok(expr),
        Some(_) => Err(parser.expected("end of expression")),
    }
}

/// Split a template into literal text and holes.
///
/// Holes are `` $`pointer` `` or `${expression}`; everything else is text.
pub(crate) fn parse_template(source: &str) -> Result<Vec<Part>, SyntaxError> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut rest = source;
    let mut base = 0;
    while let Some(at) = rest.find('$') {
        let after = &rest[at + 1..];
        if let Some(pointer_src) = after.strip_prefix('`') {
            let close = pointer_src.find('`').ok_or(SyntaxError {
                message: "unterminated pointer reference".into(),
                offset: base + at,
            })?;
            text.push_str(&rest[..at]);
            flush(&mut parts, &mut text);
            parts.push(Part::Hole(Expr::Deref(pointer_src[..close].to_string())));
            let consumed = at + 2 + close + 1;
            base += consumed;
            rest = &rest[consumed..];
        } else if after.starts_with('{') {
            let body_start = at + 2;
            let close = matching_brace(&rest[body_start..]).ok_or(SyntaxError {
                message: "unterminated `${` hole".into(),
                offset: base + at,
            })?;
            text.push_str(&rest[..at]);
            flush(&mut parts, &mut text);
            let body = &rest[body_start..body_start + close];
            let hole = parse_expression(body).map_err(|e| SyntaxError {
                message: e.message,
                offset: base + body_start + e.offset,
            })?;
            parts.push(Part::Hole(hole));
            let consumed = body_start + close + 1;
            base += consumed;
            rest = &rest[consumed..];
        } else {
            text.push_str(&rest[..=at]);
            base += at + 1;
            rest = after;
        }
    }
    text.push_str(rest);
    flush(&mut parts, &mut text);
    Ok(parts)
}

fn flush(parts: &mut Vec<Part>, text: &mut String) {
    if !text.is_empty() {
        parts.push(Part::Text(std::mem::take(text)));
    }
}

/// Byte offset of the `}` closing a `${` hole, skipping quoted strings.
fn matching_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                _ if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

// ————————————————————————————————————————————————————————————————————————————
// PRATT-STYLE DESCENT
// ————————————————————————————————————————————————————————————————————————————

/// Deepest nesting of groups, calls, ternaries and prefix operators.
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    /// Run `parse` one nesting level down.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, SyntaxError>) -> Result<T, SyntaxError> {
        if self.depth >= MAX_DEPTH {
            return Err(SyntaxError {
                message: format!("expression nests deeper than {MAX_DEPTH} levels"),
                offset: self.offset(),
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn conditional(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(Self::ternary)
    }

    fn ternary(&mut self) -> Result<Expr, SyntaxError> {
        let test = self.binary(0)?;
        if !self.eat("?") {
            return Ok(test);
        }
        let then = self.conditional()?;
        self.expect(":")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional(Box::new(test), Box::new(then), Box::new(otherwise)))
    }

    /// Precedence climbing over the binary operator table.
    fn binary(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_binary() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(Self::prefixed)
    }

    fn prefixed(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat("+") {
            return Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let name = match self.peek() {
                    Some(Token::Ident(name)) => name.clone(),
                    _ => return Err(self.expected("a property name")),
                };
                self.pos += 1;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat("[") {
                let index = self.conditional()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let args = self.list(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let offset = self.offset();
        let Some(token) = self.next_token() else {
            return Err(SyntaxError { message: "unexpected end of expression".into(), offset });
        };
        match token {
            Token::Number(n) => Ok(Expr::Literal(super::eval::number(n))),
            Token::Str(s) => Ok(Expr::Literal(s.into())),
            Token::Deref(pointer) => Ok(Expr::Deref(pointer)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(true.into())),
                "false" => Ok(Expr::Literal(false.into())),
                "null" | "undefined" => Ok(Expr::Literal(serde_json::Value::Null)),
                _ => Ident::parse(&name).map(Expr::Ident).ok_or(SyntaxError {
                    message: format!("unknown identifier `{name}`"),
                    offset,
                }),
            },
            Token::Punct("(") => {
                let inner = self.conditional()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => Ok(Expr::Array(self.list("]")?)),
            Token::Punct(p) => Err(SyntaxError { message: format!("unexpected `{p}`"), offset }),
        }
    }

    /// Comma separated expressions up to `close` (already past the opener).
    fn list(&mut self, close: &'static str) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.conditional()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }

    fn peek_binary(&self) -> Option<BinaryOp> {
        match self.peek()? {
            Token::Punct(p) => BinaryOp::parse(p),
            _ => None,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos)?.token.clone();
        self.pos += 1;
        Some(token)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), SyntaxError> {
        if self.eat(punct) { Ok(()) } else { Err(self.expected(format!("`{punct}`"))) }
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.offset).unwrap_or(self.end)
    }

    fn expected(&self, expected: impl Into<String>) -> SyntaxError {
        let message = match self.peek() {
            Some(token) => format!("expected {}, found {}", expected.into(), describe(token)),
            None => format!("expected {}, reached end of expression", expected.into()),
        };
        SyntaxError { message, offset: self.offset() }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {n}"),
        Token::Str(s) => format!("string '{s}'"),
        Token::Ident(name) => format!("`{name}`"),
        Token::Deref(p) => format!("pointer `{p}`"),
        Token::Punct(p) => format!("`{p}`"),
    }
}
