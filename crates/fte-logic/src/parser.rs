// Recursive descent parser for fact logic.
//
//   procedure  → stmt*
//   stmt       → let IDENT = expr ;
//              | IDENT = expr ;
//              | if expr block (else (block | if-stmt))?
//              | for IDENT in expr block
//              | while expr block
//              | return expr ;
//              | expr ;
//   block      → { stmt* }
//   expr       → if expr then expr else expr | or_expr
//   or_expr    → and_expr (or and_expr)*
//   and_expr   → not_expr (and not_expr)*
//   not_expr   → not not_expr | comparison
//   comparison → additive ((== | != | < | <= | > | >=) additive)?
//   additive   → term ((+ | -) term)*
//   term       → unary ((* | / | %) unary)*
//   unary      → - unary | postfix
//   postfix    → primary ( [ expr ] | . IDENT | . INT | ( args ) )*
//   primary    → literal | IDENT | ( expr ) | [ args ] | { entries }

use fte_context::Value;
use std::ops::Range;

use crate::ast::{BinaryOp, Expr, Procedure, Stmt, UnaryOp};
use crate::error::LogicError;
use crate::lexer::{tokenize, Token};

/// Maximum nesting depth to prevent stack overflow on pathological input.
const MAX_DEPTH: usize = 64;

/// Parse a single expression
///
/// # Errors
/// Returns [`LogicError::Syntax`] when the source is not one complete expression.
pub fn parse_expression(source: &str) -> Result<Expr, LogicError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(&tokens, source.len());
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a procedure body
///
/// # Errors
/// Returns [`LogicError::Syntax`] on malformed statements.
pub fn parse_procedure(source: &str) -> Result<Procedure, LogicError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(&tokens, source.len());
    let mut body = Vec::new();
    while !parser.at_end() {
        body.push(parser.stmt()?);
    }
    Ok(Procedure { body })
}

struct Parser<'a> {
    tokens: &'a [(Token, Range<usize>)],
    pos: usize,
    depth: usize,
    source_len: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [(Token, Range<usize>)], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            source_len,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source_len, |(_, span)| span.start)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t);
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), LogicError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, LogicError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn expect_end(&self) -> Result<(), LogicError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    fn error(&self, message: impl Into<String>) -> LogicError {
        LogicError::syntax(self.position(), message)
    }

    fn enter(&mut self) -> Result<(), LogicError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ─── Statements ───

    fn stmt(&mut self) -> Result<Stmt, LogicError> {
        self.enter()?;
        let stmt = self.stmt_inner();
        self.leave();
        stmt
    }

    fn stmt_inner(&mut self) -> Result<Stmt, LogicError> {
        match self.peek() {
            Some(Token::Let) => {
                self.pos += 1;
                let name = self.expect_ident("variable name after 'let'")?;
                self.expect(&Token::Assign, "'='")?;
                let value = self.expr()?;
                self.expect(&Token::Semi, "';'")?;
                Ok(Stmt::Let { name, value })
            }
            Some(Token::If) => self.if_stmt(),
            Some(Token::For) => {
                self.pos += 1;
                let var = self.expect_ident("loop variable")?;
                self.expect(&Token::In, "'in'")?;
                let iter = self.expr()?;
                let body = self.block()?;
                Ok(Stmt::For { var, iter, body })
            }
            Some(Token::While) => {
                self.pos += 1;
                let cond = self.expr()?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::Return) => {
                self.pos += 1;
                let value = self.expr()?;
                self.expect(&Token::Semi, "';'")?;
                Ok(Stmt::Return(value))
            }
            Some(Token::Ident(name))
                if matches!(self.tokens.get(self.pos + 1), Some((Token::Assign, _))) =>
            {
                let name = name.clone();
                self.pos += 2;
                let value = self.expr()?;
                self.expect(&Token::Semi, "';'")?;
                Ok(Stmt::Assign { name, value })
            }
            _ => {
                let expr = self.expr()?;
                self.expect(&Token::Semi, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_stmt(&mut self) -> Result<Stmt, LogicError> {
        self.expect(&Token::If, "'if'")?;
        let cond = self.expr()?;
        let then = self.block()?;
        let otherwise = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                vec![self.if_stmt()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, LogicError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.at_end() {
                return Err(self.error("unterminated block"));
            }
            body.push(self.stmt()?);
        }
        Ok(body)
    }

    // ─── Expressions ───

    fn expr(&mut self) -> Result<Expr, LogicError> {
        self.enter()?;
        let expr = if self.eat(&Token::If) {
            let cond = self.expr()?;
            self.expect(&Token::Then, "'then'")?;
            let then = self.expr()?;
            self.expect(&Token::Else, "'else'")?;
            let otherwise = self.expr()?;
            Ok(Expr::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            })
        } else {
            self.or_expr()
        };
        self.leave();
        expr
    }

    fn or_expr(&mut self) -> Result<Expr, LogicError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::Or) {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, LogicError> {
        let mut lhs = self.not_expr()?;
        while self.eat(&Token::And) {
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, LogicError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let operand = self.not_expr();
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, LogicError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn additive(&mut self) -> Result<Expr, LogicError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, LogicError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, LogicError> {
        if self.eat(&Token::Minus) {
            self.enter()?;
            let operand = self.unary();
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand?),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, LogicError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    expr = match self.advance().cloned() {
                        Some(Token::Ident(name)) => Expr::Field {
                            target: Box::new(expr),
                            name,
                        },
                        Some(Token::Int(i)) => Expr::Index {
                            target: Box::new(expr),
                            index: Box::new(Expr::Literal(Value::Int(i))),
                        },
                        _ => {
                            self.pos -= 1;
                            return Err(self.error("expected field name after '.'"));
                        }
                    };
                }
                Some(Token::LParen) => {
                    let Expr::Name(name) = expr else {
                        return Err(self.error("only named functions can be called"));
                    };
                    self.pos += 1;
                    let args = self.args(&Token::RParen)?;
                    expr = Expr::Call { name, args };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn args(&mut self, close: &Token) -> Result<Vec<Expr>, LogicError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "',' or closing bracket")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, LogicError> {
        let Some(token) = self.advance().cloned() else {
            return Err(self.error("unexpected end of input"));
        };
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Decimal(d) => Ok(Expr::Literal(Value::Decimal(d))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => Ok(Expr::Name(name)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.args(&Token::RBracket)?)),
            Token::LBrace => {
                let mut entries = Vec::new();
                if self.eat(&Token::RBrace) {
                    return Ok(Expr::Map(entries));
                }
                loop {
                    let key = match self.advance().cloned() {
                        Some(Token::Ident(k) | Token::Str(k)) => k,
                        _ => {
                            self.pos -= 1;
                            return Err(self.error("expected mapping key"));
                        }
                    };
                    self.expect(&Token::Colon, "':'")?;
                    entries.push((key, self.expr()?));
                    if self.eat(&Token::RBrace) {
                        return Ok(Expr::Map(entries));
                    }
                    self.expect(&Token::Comma, "',' or '}'")?;
                }
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected an expression"))
            }
        }
    }
}
