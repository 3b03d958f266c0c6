//! Recursive-descent parser for bytebeat expressions.
//!
//! Implements the C/JS precedence ladder, lowest to highest:
//! ternary, `||`, `&&`, `|`, `^`, `&`, equality, relational, shifts,
//! additive, multiplicative, unary, primary.

use super::ast::{BinaryOp, Builtin, Expr, UnaryOp};
use super::token::{Spanned, Token};
use super::CompileError;

/// Maximum nesting depth accepted by the parser. Keeps recursive descent
/// (and later recursive evaluation) within stack bounds on hostile input.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Token-stream parser producing an [`Expr`] tree.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Parser over a lexed token stream (must end with `Eof`).
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub fn parse_expression(&mut self) -> Result<Expr, CompileError> {
        let expr = self.parse_ternary()?;
        match self.peek() {
            Token::Eof => Ok(expr),
            found => Err(CompileError::UnexpectedToken {
                expected: "end of expression".into(),
                found: found.to_string(),
                pos: self.span_pos(),
            }),
        }
    }

    // ── Helpers ──────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn span_pos(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Spanned {
        let s = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        s
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), CompileError> {
        if self.eat(expected) {
            Ok(())
        } else if *self.peek() == Token::Eof {
            Err(CompileError::UnexpectedEof {
                expected: what.into(),
            })
        } else {
            Err(CompileError::UnexpectedToken {
                expected: what.into(),
                found: self.peek().to_string(),
                pos: self.span_pos(),
            })
        }
    }

    fn enter(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(CompileError::TooDeep {
                limit: MAX_NESTING_DEPTH,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Parse a left-associative run of binary operators at one precedence
    /// level. `map` translates the operator token, returning `None` for
    /// tokens belonging to other levels.
    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, CompileError>,
        map: fn(&Token) -> Option<BinaryOp>,
    ) -> Result<Expr, CompileError> {
        let mut lhs = next(self)?;
        while let Some(op) = map(self.peek()) {
            self.advance();
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // ── Precedence ladder ────────────────────────────────────

    fn parse_ternary(&mut self) -> Result<Expr, CompileError> {
        self.enter()?;
        let cond = self.parse_or()?;
        let expr = if self.eat(&Token::Question) {
            let then = self.parse_ternary()?;
            self.expect(&Token::Colon, "':'")?;
            let alt = self.parse_ternary()?;
            Expr::Ternary(Box::new(cond), Box::new(then), Box::new(alt))
        } else {
            cond
        };
        self.leave();
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_and, |t| match t {
            Token::OrOr => Some(BinaryOp::Or),
            _ => None,
        })
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_bitor, |t| match t {
            Token::AndAnd => Some(BinaryOp::And),
            _ => None,
        })
    }

    fn parse_bitor(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_bitxor, |t| match t {
            Token::Pipe => Some(BinaryOp::BitOr),
            _ => None,
        })
    }

    fn parse_bitxor(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_bitand, |t| match t {
            Token::Caret => Some(BinaryOp::BitXor),
            _ => None,
        })
    }

    fn parse_bitand(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_equality, |t| match t {
            Token::Amp => Some(BinaryOp::BitAnd),
            _ => None,
        })
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_relational, |t| match t {
            Token::EqEq => Some(BinaryOp::Eq),
            Token::BangEq => Some(BinaryOp::Ne),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_shift, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::Le => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Ge => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn parse_shift(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_additive, |t| match t {
            Token::Shl => Some(BinaryOp::Shl),
            Token::Shr => Some(BinaryOp::Shr),
            Token::UShr => Some(BinaryOp::UShr),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_multiplicative, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(Self::parse_unary, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::Percent => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        self.enter()?;
        let expr = match self.peek() {
            Token::Minus => {
                self.advance();
                Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?))
            }
            Token::Tilde => {
                self.advance();
                Expr::Unary(UnaryOp::BitNot, Box::new(self.parse_unary()?))
            }
            Token::Bang => {
                self.advance();
                Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?))
            }
            _ => self.parse_primary()?,
        };
        self.leave();
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_ternary()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                let pos = self.span_pos();
                self.advance();
                if *self.peek() == Token::LParen {
                    self.parse_call(&name, pos)
                } else if name == "t" {
                    Ok(Expr::Time)
                } else {
                    Err(CompileError::UnknownIdent { name, pos })
                }
            }
            Token::Eof => Err(CompileError::UnexpectedEof {
                expected: "expression".into(),
            }),
            found => Err(CompileError::UnexpectedToken {
                expected: "expression".into(),
                found: found.to_string(),
                pos: self.span_pos(),
            }),
        }
    }

    fn parse_call(&mut self, name: &str, pos: usize) -> Result<Expr, CompileError> {
        let builtin = Builtin::lookup(name).ok_or_else(|| CompileError::UnknownIdent {
            name: name.to_string(),
            pos,
        })?;

        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_ternary()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen, "')' or ','")?;
                break;
            }
        }

        if args.len() != builtin.arity() {
            return Err(CompileError::WrongArity {
                name: builtin.name().to_string(),
                expected: builtin.arity(),
                got: args.len(),
            });
        }
        Ok(Expr::Call(builtin, args))
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::Lexer;
    use super::*;

    fn parse(input: &str) -> Result<Expr, CompileError> {
        let tokens = Lexer::new(input).tokenize()?;
        Parser::new(tokens).parse_expression()
    }

    #[test]
    fn shift_binds_looser_than_additive() {
        // t>>4 + 1 parses as t >> (4 + 1)
        let expr = parse("t>>4+1").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Shr,
                Box::new(Expr::Time),
                Box::new(Expr::Binary(
                    BinaryOp::Add,
                    Box::new(Expr::Number(4.0)),
                    Box::new(Expr::Number(1.0)),
                )),
            )
        );
    }

    #[test]
    fn ternary_is_right_associative() {
        let expr = parse("t?1:t?2:3").unwrap();
        let Expr::Ternary(_, _, alt) = expr else {
            panic!("expected ternary");
        };
        assert!(matches!(*alt, Expr::Ternary(..)));
    }

    #[test]
    fn call_arity_is_checked() {
        let err = parse("min(1)").unwrap_err();
        assert!(matches!(err, CompileError::WrongArity { expected: 2, got: 1, .. }));
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        let err = parse("t*u").unwrap_err();
        assert!(matches!(err, CompileError::UnknownIdent { .. }));
        let err = parse("frobnicate(t)").unwrap_err();
        assert!(matches!(err, CompileError::UnknownIdent { .. }));
    }

    #[test]
    fn unbalanced_parens_are_rejected() {
        assert!(matches!(
            parse("(t>>4").unwrap_err(),
            CompileError::UnexpectedEof { .. }
        ));
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let src = format!("{}t{}", "(".repeat(4096), ")".repeat(4096));
        assert!(matches!(
            parse(&src).unwrap_err(),
            CompileError::TooDeep { .. }
        ));
    }
}
