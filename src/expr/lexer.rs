//! Lexer for bytebeat expressions.
//!
//! Tokenizes the restricted C-style operator set: arithmetic, bitwise,
//! shifts, comparisons, logical operators and the ternary conditional.

use super::token::{Spanned, Token};
use super::CompileError;

/// Character-level tokenizer over the source text.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    /// Lexer over `input`.
    pub fn new(input: &str) -> Self {
        Lexer {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the whole input, ending with a single `Eof` token.
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let is_eof = spanned.token == Token::Eof;
            tokens.push(spanned);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.chars.get(self.pos) {
            if ch.is_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Consume a two- or three-character operator if the lookahead matches.
    fn eat_if(&mut self, expected: char) -> bool {
        if self.peek_at(0) == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn next_token(&mut self) -> Result<Spanned, CompileError> {
        self.skip_whitespace();

        let start = self.pos;
        let Some(ch) = self.advance() else {
            return Ok(Spanned {
                token: Token::Eof,
                pos: start,
            });
        };

        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '~' => Token::Tilde,
            '^' => Token::Caret,
            '?' => Token::Question,
            ':' => Token::Colon,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '&' => {
                if self.eat_if('&') {
                    Token::AndAnd
                } else {
                    Token::Amp
                }
            }
            '|' => {
                if self.eat_if('|') {
                    Token::OrOr
                } else {
                    Token::Pipe
                }
            }
            '!' => {
                if self.eat_if('=') {
                    Token::BangEq
                } else {
                    Token::Bang
                }
            }
            '=' => {
                if self.eat_if('=') {
                    Token::EqEq
                } else {
                    return Err(CompileError::UnexpectedChar { ch, pos: start });
                }
            }
            '<' => {
                if self.eat_if('<') {
                    Token::Shl
                } else if self.eat_if('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat_if('>') {
                    if self.eat_if('>') {
                        Token::UShr
                    } else {
                        Token::Shr
                    }
                } else if self.eat_if('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            _ if ch.is_ascii_digit() || ch == '.' => {
                self.pos = start;
                self.lex_number()?
            }
            _ if ch.is_ascii_alphabetic() || ch == '_' => {
                self.pos = start;
                self.lex_ident()
            }
            _ => return Err(CompileError::UnexpectedChar { ch, pos: start }),
        };

        Ok(Spanned { token, pos: start })
    }

    fn lex_number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;

        // Hex literal
        if self.peek_at(0) == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while matches!(self.peek_at(0), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            let value = u64::from_str_radix(&digits, 16).map_err(|_| {
                CompileError::InvalidNumber {
                    text: self.chars[start..self.pos].iter().collect(),
                    pos: start,
                }
            })?;
            return Ok(Token::Number(value as f64));
        }

        // Decimal literal: digits, optional fraction, optional exponent
        while matches!(self.peek_at(0), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek_at(0) == Some('.') {
            self.pos += 1;
            while matches!(self.peek_at(0), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek_at(0), Some('e') | Some('E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek_at(0), Some('+') | Some('-')) {
                self.pos += 1;
            }
            if matches!(self.peek_at(0), Some(c) if c.is_ascii_digit()) {
                while matches!(self.peek_at(0), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                // Not an exponent after all (e.g. `1e` followed by an ident)
                self.pos = mark;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| CompileError::InvalidNumber { text, pos: start })
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek_at(0), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        Token::Ident(self.chars[start..self.pos].iter().collect())
    }
}
