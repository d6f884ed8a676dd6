//! Lexer and recursive-descent parser for conversion expressions
//!
//! Grammar, lowest to highest precedence:
//!
//! ```text
//! expr   := term  (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := '-' unary | power
//! power  := atom ('^' unary)?          right-associative
//! atom   := NUMBER | '{' IDENT '}' | IDENT | IDENT '(' args ')' | '(' expr ')'
//! ```
//!
//! Exponentiation binds tighter than unary minus (`-2^2` is `-(2^2)`).

use super::{BinaryOp, Expr, ExprError, Function};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    /// Bare identifier: variable, constant, or function name
    Ident(String),
    /// Braced sensor reference
    Reference(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn err(position: usize, message: impl Into<String>) -> ExprError {
    ExprError::Parse {
        position,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => pos += 1,
            '+' => {
                tokens.push((pos, Token::Plus));
                pos += 1;
            }
            '-' => {
                tokens.push((pos, Token::Minus));
                pos += 1;
            }
            '*' => {
                tokens.push((pos, Token::Star));
                pos += 1;
            }
            '/' => {
                tokens.push((pos, Token::Slash));
                pos += 1;
            }
            '^' => {
                tokens.push((pos, Token::Caret));
                pos += 1;
            }
            '(' => {
                tokens.push((pos, Token::LParen));
                pos += 1;
            }
            ')' => {
                tokens.push((pos, Token::RParen));
                pos += 1;
            }
            ',' => {
                tokens.push((pos, Token::Comma));
                pos += 1;
            }
            '{' => {
                let start = pos + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] as char != '}' {
                    end += 1;
                }
                if end == bytes.len() {
                    return Err(err(pos, "unterminated sensor reference"));
                }
                let name = &src[start..end];
                if !crate::sensor::is_valid_id(name) {
                    return Err(err(start, format!("invalid sensor reference '{{{name}}}'")));
                }
                tokens.push((pos, Token::Reference(name.to_string())));
                pos = end + 1;
            }
            _ if c.is_ascii_digit() => {
                let start = pos;
                while pos < bytes.len() && (bytes[pos] as char).is_ascii_digit() {
                    pos += 1;
                }
                if pos < bytes.len() && bytes[pos] as char == '.' {
                    pos += 1;
                    while pos < bytes.len() && (bytes[pos] as char).is_ascii_digit() {
                        pos += 1;
                    }
                }
                if pos < bytes.len() && matches!(bytes[pos] as char, 'e' | 'E') {
                    let mut lookahead = pos + 1;
                    if lookahead < bytes.len() && matches!(bytes[lookahead] as char, '+' | '-') {
                        lookahead += 1;
                    }
                    if lookahead < bytes.len() && (bytes[lookahead] as char).is_ascii_digit() {
                        pos = lookahead;
                        while pos < bytes.len() && (bytes[pos] as char).is_ascii_digit() {
                            pos += 1;
                        }
                    }
                }
                let literal = &src[start..pos];
                let value: f64 = literal
                    .parse()
                    .map_err(|_| err(start, format!("invalid number '{literal}'")))?;
                tokens.push((start, Token::Number(value)));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                while pos < bytes.len()
                    && ((bytes[pos] as char).is_ascii_alphanumeric() || bytes[pos] as char == '_')
                {
                    pos += 1;
                }
                tokens.push((start, Token::Ident(src[start..pos].to_string())));
            }
            _ => return Err(err(pos, format!("unexpected character '{c}'"))),
        }
    }

    Ok(tokens)
}

pub(super) fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(err(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };
    let expr = parser.parse_expr()?;
    if let Some((at, token)) = parser.peek_with_pos() {
        return Err(err(at, format!("unexpected trailing input near {token:?}")));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    /// Byte length of the source, reported for errors at end of input
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_with_pos(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(at, t)| (*at, t))
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ExprError> {
        match self.advance() {
            Some((_, t)) if t == token => Ok(()),
            Some((at, t)) => Err(err(at, format!("expected {what}, found {t:?}"))),
            None => Err(err(self.end, format!("expected {what}, found end of input"))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ExprError> {
        let base = self.parse_atom()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            // Right-associative; the exponent may itself be negated
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some((_, Token::Number(value))) => Ok(Expr::Number(value)),
            Some((_, Token::Reference(name))) => Ok(Expr::Variable(name)),
            Some((at, Token::Ident(name))) => self.finish_ident(at, name),
            Some((_, Token::LParen)) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some((at, token)) => Err(err(at, format!("unexpected {token:?}"))),
            None => Err(err(self.end, "unexpected end of input")),
        }
    }

    fn finish_ident(&mut self, at: usize, name: String) -> Result<Expr, ExprError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            let Some(func) = Function::from_name(&name) else {
                return Err(err(at, format!("unknown function '{name}'")));
            };
            self.advance();
            let mut args = vec![self.parse_expr()?];
            while matches!(self.peek(), Some(Token::Comma)) {
                self.advance();
                args.push(self.parse_expr()?);
            }
            self.expect(Token::RParen, "')'")?;
            if args.len() != func.arity() {
                return Err(err(
                    at,
                    format!(
                        "function '{func}' expects {} argument(s), got {}",
                        func.arity(),
                        args.len()
                    ),
                ));
            }
            return Ok(Expr::Call(func, args));
        }

        match name.as_str() {
            "PI" => Ok(Expr::Number(std::f64::consts::PI)),
            "E" => Ok(Expr::Number(std::f64::consts::E)),
            _ => Ok(Expr::Variable(name)),
        }
    }
}
