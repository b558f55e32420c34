use super::lexer::{Lexer, Spanned, Token};
use super::{LuaTable, LuaValue, ParseError};

/// Knobs for [`parse_with_options`].
#[derive(Clone, Debug, Default)]
pub struct ParseOptions {
    /// When set, bare `nil` tokens parse as this string instead of
    /// [`LuaValue::Nil`], which keeps nil holes visible in arrays and maps.
    pub nil_placeholder: Option<String>,
}

/// Parses a Lua chunk and returns the value of its first statement.
///
/// Supported statements are `return`, `local`, `do ... end` and function
/// declarations. Expressions are limited to literals, identifiers, unary
/// minus, table constructors and function literals (which become the string
/// `"function"`).
pub fn parse(text: &str) -> Result<LuaValue, ParseError> {
    parse_with_options(text, &ParseOptions::default())
}

pub fn parse_with_options(text: &str, options: &ParseOptions) -> Result<LuaValue, ParseError> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        options,
    };
    let values = parser.parse_block(&[Token::Eof])?;
    parser.expect(&Token::Eof)?;
    values
        .into_iter()
        .next()
        .ok_or_else(|| ParseError::new(0, "empty chunk"))
}

static EOF: Token = Token::Eof;

/// Deepest nesting of tables, parentheses, unary minus and `do` blocks.
/// Debugger dumps stay far below this.
pub(crate) const MAX_DEPTH: usize = 200;

struct Parser<'o> {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    options: &'o ParseOptions,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // The token stream always ends with `Eof`.
        match self.tokens.get(self.pos) {
            Some(spanned) => &spanned.token,
            None => &EOF,
        }
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        match self.tokens.get(self.pos + ahead) {
            Some(spanned) => &spanned.token,
            None => &EOF,
        }
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|spanned| spanned.offset)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == expected
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.offset(), message)
    }

    /// Runs `f` one nesting level deeper, failing instead of recursing past
    /// [`MAX_DEPTH`].
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Parses statements until one of `terminators`, returning one value per statement.
    fn parse_block(&mut self, terminators: &[Token]) -> Result<Vec<LuaValue>, ParseError> {
        let mut values = Vec::new();
        loop {
            while self.eat(&Token::Semi) {}
            if terminators.contains(self.peek()) {
                return Ok(values);
            }
            values.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> Result<LuaValue, ParseError> {
        match self.peek() {
            Token::Return => {
                self.advance();
                let values = if self.at_block_end() {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                Ok(collapse(values))
            }
            Token::Local => {
                self.advance();
                if self.eat(&Token::Function) {
                    self.skip_function_body()?;
                    return Ok(function_placeholder());
                }
                self.parse_name_list()?;
                let values = if self.eat(&Token::Eq) {
                    self.parse_expr_list()?
                } else {
                    Vec::new()
                };
                Ok(collapse(values))
            }
            Token::Do => {
                self.advance();
                let values = self.nested(|p| p.parse_block(&[Token::End]))?;
                self.expect(&Token::End)?;
                Ok(values.into_iter().next().unwrap_or(LuaValue::Nil))
            }
            Token::Function => {
                self.advance();
                self.skip_function_body()?;
                Ok(function_placeholder())
            }
            other => Err(self.error(format!("unhandled node kind: {other:?}"))),
        }
    }

    fn at_block_end(&self) -> bool {
        matches!(
            self.peek(),
            Token::Eof | Token::End | Token::Semi | Token::Else | Token::ElseIf | Token::Until
        )
    }

    fn parse_name_list(&mut self) -> Result<(), ParseError> {
        loop {
            match self.advance() {
                Token::Name(_) => {}
                other => return Err(self.error(format!("expected name, found {other:?}"))),
            }
            // Lua 5.4 attributes: `local x <const> = ...`
            if self.check(&Token::Op("<")) {
                self.advance();
                self.advance();
                self.expect(&Token::Op(">"))?;
            }
            if !self.eat(&Token::Comma) {
                return Ok(());
            }
        }
    }

    fn parse_expr_list(&mut self) -> Result<Vec<LuaValue>, ParseError> {
        let mut values = vec![self.parse_expr()?];
        while self.eat(&Token::Comma) {
            values.push(self.parse_expr()?);
        }
        Ok(values)
    }

    fn parse_expr(&mut self) -> Result<LuaValue, ParseError> {
        match self.advance() {
            Token::Nil => Ok(match &self.options.nil_placeholder {
                Some(placeholder) => LuaValue::Str(placeholder.clone()),
                None => LuaValue::Nil,
            }),
            Token::True => Ok(LuaValue::Bool(true)),
            Token::False => Ok(LuaValue::Bool(false)),
            Token::Number(n) => Ok(LuaValue::Number(n)),
            Token::Str(s) => Ok(LuaValue::Str(s)),
            Token::Minus => match self.nested(Self::parse_expr)? {
                LuaValue::Number(n) => Ok(LuaValue::Number(-n)),
                other => Err(self.error(format!("cannot negate {other}"))),
            },
            Token::Name(name) => self.parse_identifier(name),
            Token::LBrace => self.nested(Self::parse_table),
            Token::Function => {
                self.skip_function_body()?;
                Ok(function_placeholder())
            }
            Token::LParen => {
                let value = self.nested(Self::parse_expr)?;
                self.expect(&Token::RParen)?;
                Ok(value)
            }
            other => {
                // Report the offset of the offending token, not the one after it.
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(format!("unhandled node kind: {other:?}")))
            }
        }
    }

    fn parse_identifier(&mut self, mut name: String) -> Result<LuaValue, ParseError> {
        while self.check(&Token::Dot) {
            let Token::Name(field) = self.peek_at(1).clone() else {
                break;
            };
            self.pos += 2;
            name.push('.');
            name.push_str(&field);
        }
        if name == "math.huge" {
            return Ok(LuaValue::Number(f64::INFINITY));
        }
        Ok(LuaValue::Str(name))
    }

    fn parse_table(&mut self) -> Result<LuaValue, ParseError> {
        let mut positional = Vec::new();
        let mut keyed = LuaTable::new();
        let mut has_keys = false;

        while !self.check(&Token::RBrace) {
            if self.eat(&Token::LBracket) {
                let key = self.parse_expr()?;
                self.expect(&Token::RBracket)?;
                self.expect(&Token::Eq)?;
                let value = self.parse_expr()?;
                has_keys = true;
                keyed.insert(key, value);
            } else if matches!(self.peek(), Token::Name(_)) && self.peek_at(1) == &Token::Eq {
                let Token::Name(key) = self.advance() else {
                    unreachable!("peeked a name token");
                };
                self.advance();
                let value = self.parse_expr()?;
                has_keys = true;
                keyed.insert(LuaValue::Str(key), value);
            } else {
                positional.push(self.parse_expr()?);
            }

            if !(self.eat(&Token::Comma) || self.eat(&Token::Semi)) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;

        if has_keys {
            if !positional.is_empty() {
                tracing::debug!(
                    target: "mobdebug.lua",
                    dropped = positional.len(),
                    "positional entries in keyed table are dropped"
                );
            }
            Ok(LuaValue::Table(keyed))
        } else {
            Ok(LuaValue::Array(positional))
        }
    }

    /// Skips a function body (after the `function` keyword) up to its matching `end`.
    fn skip_function_body(&mut self) -> Result<(), ParseError> {
        let start = self.offset();
        let mut depth = 1usize;
        loop {
            match self.advance() {
                Token::Function | Token::If | Token::Do | Token::Repeat => depth += 1,
                Token::End | Token::Until => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Token::Eof => return Err(ParseError::new(start, "unterminated function body")),
                _ => {}
            }
        }
    }
}

fn function_placeholder() -> LuaValue {
    LuaValue::Str("function".to_owned())
}

fn collapse(mut values: Vec<LuaValue>) -> LuaValue {
    if values.len() == 1 {
        values.remove(0)
    } else {
        LuaValue::Array(values)
    }
}
