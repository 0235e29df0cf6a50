use thiserror::Error;

use super::lexer::{Token, TokenKind};

/// A malformed expression.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("syntax error at offset {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Literal),
    Name(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// `a < b <= c` holds iff every adjacent pair holds.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub(crate) fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Name(n) => out.push(n),
            Expr::Unary(_, e) => e.collect_names(out),
            Expr::Binary(_, l, r) | Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
            Expr::Compare(first, rest) => {
                first.collect_names(out);
                for (_, e) in rest {
                    e.collect_names(out);
                }
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.collect_names(out);
                }
            }
        }
    }
}

/// Recursive-descent parser; precedence from loosest to tightest:
/// `or`, `and`, `not`, comparisons, `+ -`, `* / // %`, unary sign, `**`.
pub(crate) struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    pub(crate) fn parse(mut self) -> Result<Expr, ParseError> {
        let expr = self.or_expr()?;
        match &self.peek().kind {
            TokenKind::Eof => Ok(expr),
            other => Err(ParseError::new(
                self.peek().pos,
                format!("unexpected {} after expression", describe(other)),
            )),
        }
    }

    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        token
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(w) if w == word)
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.at_keyword("or") || self.peek().kind == TokenKind::OrOr {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.not_expr()?;
        while self.at_keyword("and") || self.peek().kind == TokenKind::AndAnd {
            self.advance();
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword("not") || self.peek().kind == TokenKind::Bang {
            self.advance();
            let operand = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::Le => CmpOp::Le,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::Ge => CmpOp::Ge,
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::Ne,
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.atom()?;
        if self.peek().kind == TokenKind::StarStar {
            self.advance();
            // right-associative, and binds tighter than a unary sign on its left
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Int(v) => Ok(Expr::Literal(Literal::Int(v))),
            TokenKind::Float(v) => Ok(Expr::Literal(Literal::Float(v))),
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            TokenKind::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Literal::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Literal::Bool(false))),
                "and" | "or" | "not" => Err(ParseError::new(
                    token.pos,
                    format!("keyword '{name}' cannot start an operand"),
                )),
                _ if self.peek().kind == TokenKind::LParen => {
                    self.advance();
                    let args = self.call_args()?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Name(name)),
            },
            TokenKind::LParen => {
                let inner = self.or_expr()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            other => Err(ParseError::new(
                token.pos,
                format!("expected an operand, found {}", describe(&other)),
            )),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek().kind == TokenKind::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.or_expr()?);
            match self.peek().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {
                    self.advance();
                    return Ok(args);
                }
                _ => {
                    let token = self.peek();
                    return Err(ParseError::new(
                        token.pos,
                        format!("expected ',' or ')', found {}", describe(&token.kind)),
                    ));
                }
            }
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        let token = self.advance();
        if token.kind == TokenKind::RParen {
            Ok(())
        } else {
            Err(ParseError::new(
                token.pos,
                format!("expected ')', found {}", describe(&token.kind)),
            ))
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Int(v) => format!("number {v}"),
        TokenKind::Float(v) => format!("number {v}"),
        TokenKind::Str(s) => format!("string '{s}'"),
        TokenKind::Ident(n) => format!("name '{n}'"),
        TokenKind::Eof => "end of expression".to_string(),
        other => format!("{other:?}"),
    }
}
