//! Recursive-descent parser for key expressions.

use crate::error::ExpressionError;

use super::{KeyExpr, PathStep};

/// Maximum nesting depth of functions and compound keys.
const MAX_EXPRESSION_DEPTH: usize = 16;

pub(super) struct Parser<'s> {
    source: &'s str,
    chars: Vec<char>,
    pos: usize,
}

impl<'s> Parser<'s> {
    pub(super) fn new(source: &'s str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    pub(super) fn parse(mut self) -> Result<KeyExpr, ExpressionError> {
        self.skip_ws();
        if self.peek().is_none() {
            return Err(ExpressionError::Empty);
        }
        let expr = self.expr(0)?;
        self.skip_ws();
        if self.peek().is_some() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> ExpressionError {
        ExpressionError::Unexpected {
            source_text: self.source.to_string(),
            position: self.pos,
            found: match self.peek() {
                Some(c) => format!("'{c}'"),
                None => "end of input".to_string(),
            },
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ExpressionError> {
        self.skip_ws();
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expr(&mut self, depth: usize) -> Result<KeyExpr, ExpressionError> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(self.unexpected());
        }
        self.skip_ws();
        match self.peek() {
            Some('$') => {
                self.pos += 1;
                self.path_steps(Vec::new())
            }
            Some('[') => {
                self.pos += 1;
                let mut items = vec![self.expr(depth + 1)?];
                loop {
                    self.skip_ws();
                    match self.peek() {
                        Some(',') => {
                            self.pos += 1;
                            items.push(self.expr(depth + 1)?);
                        }
                        Some(']') => {
                            self.pos += 1;
                            return Ok(KeyExpr::Compound(items));
                        }
                        _ => return Err(self.unexpected()),
                    }
                }
            }
            Some(c) if is_ident_start(c) => {
                let word = self.ident();
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.pos += 1;
                    self.call(&word, depth)
                } else {
                    self.path_steps(vec![PathStep::Field(word)])
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn call(&mut self, name: &str, depth: usize) -> Result<KeyExpr, ExpressionError> {
        let upper = name.to_ascii_uppercase();
        let expr = match upper.as_str() {
            "LOWER" | "UPPER" => {
                let inner = Box::new(self.expr(depth + 1)?);
                if upper == "LOWER" {
                    KeyExpr::Lower(inner)
                } else {
                    KeyExpr::Upper(inner)
                }
            }
            "NOW" => KeyExpr::Now,
            "RANDOM" => KeyExpr::Random,
            _ => return Err(ExpressionError::UnknownFunction(name.to_string())),
        };
        self.expect(')')?;
        Ok(expr)
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// Parse `.field`, `[*]` and `[n]` steps following a path start.
    fn path_steps(&mut self, mut steps: Vec<PathStep>) -> Result<KeyExpr, ExpressionError> {
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    if !self.peek().is_some_and(is_ident_start) {
                        return Err(self.unexpected());
                    }
                    steps.push(PathStep::Field(self.ident()));
                }
                Some('[') => {
                    self.pos += 1;
                    if self.peek() == Some('*') {
                        self.pos += 1;
                        steps.push(PathStep::Items);
                    } else {
                        let start = self.pos;
                        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                            self.pos += 1;
                        }
                        let digits: String = self.chars[start..self.pos].iter().collect();
                        let at = digits.parse().map_err(|_| self.unexpected())?;
                        steps.push(PathStep::Position(at));
                    }
                    if self.peek() != Some(']') {
                        return Err(self.unexpected());
                    }
                    self.pos += 1;
                }
                _ => break,
            }
        }
        Ok(if steps.is_empty() {
            KeyExpr::Root
        } else {
            KeyExpr::Path(steps)
        })
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
