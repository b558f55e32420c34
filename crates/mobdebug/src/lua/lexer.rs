use super::ParseError;

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Token {
    Number(f64),
    Str(String),
    Name(String),
    // Keywords
    And,
    Break,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Eq,
    Comma,
    Semi,
    Minus,
    Dot,
    /// Any other operator. Only ever skipped over (inside function bodies).
    Op(&'static str),
    Eof,
}

#[derive(Clone, Debug)]
pub(super) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(super) fn keyword(name: &str) -> Option<Token> {
    let token = match name {
        "and" => Token::And,
        "break" => Token::Break,
        "do" => Token::Do,
        "else" => Token::Else,
        "elseif" => Token::ElseIf,
        "end" => Token::End,
        "false" => Token::False,
        "for" => Token::For,
        "function" => Token::Function,
        "goto" => Token::Goto,
        "if" => Token::If,
        "in" => Token::In,
        "local" => Token::Local,
        "nil" => Token::Nil,
        "not" => Token::Not,
        "or" => Token::Or,
        "repeat" => Token::Repeat,
        "return" => Token::Return,
        "then" => Token::Then,
        "true" => Token::True,
        "until" => Token::Until,
        "while" => Token::While,
        _ => return None,
    };
    Some(token)
}

const OPERATORS: &[&str] = &[
    "...", "==", "~=", "<=", ">=", "..", "::", "//", "<<", ">>", "+", "*", "/", "%", "^", "#",
    "&", "~", "|", "<", ">", ":",
];

pub(super) struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let offset = self.pos;
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(Spanned { token, offset });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.pos, message)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)) {
                self.pos += 1;
            }
            if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                self.pos += 2;
                if self.peek() == Some(b'[') {
                    if let Some(level) = self.long_bracket_level() {
                        self.read_long_bracket(level)?;
                        continue;
                    }
                }
                while let Some(b) = self.peek() {
                    if b == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            return Ok(());
        }
    }

    /// If positioned on `[`, `[[` or `[==[`, returns the bracket level without consuming.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(1 + level) == Some(b'[')).then_some(level)
    }

    fn read_long_bracket(&mut self, level: usize) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += level + 2;
        // A newline right after the opening bracket is not part of the string.
        if self.peek() == Some(b'\r') {
            self.pos += 1;
        }
        if self.peek() == Some(b'\n') {
            self.pos += 1;
        }
        let body_start = self.pos;
        while self.pos < self.src.len() {
            if self.src[self.pos] == b']' {
                let close = self.pos;
                let mut eqs = 0;
                while self.src.get(close + 1 + eqs) == Some(&b'=') {
                    eqs += 1;
                }
                if eqs == level && self.src.get(close + 1 + eqs) == Some(&b']') {
                    self.pos = close + level + 2;
                    return Ok(String::from_utf8_lossy(&self.src[body_start..close]).into_owned());
                }
            }
            self.pos += 1;
        }
        Err(ParseError::new(start, "unterminated long bracket"))
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let Some(b) = self.peek() else {
            return Ok(Token::Eof);
        };

        match b {
            b'0'..=b'9' => self.read_number(),
            b'.' if matches!(self.peek_at(1), Some(b'0'..=b'9')) => self.read_number(),
            b'"' | b'\'' => {
                self.pos += 1;
                self.read_string(b).map(Token::Str)
            }
            b'[' => match self.long_bracket_level() {
                Some(level) => self.read_long_bracket(level).map(Token::Str),
                None => {
                    self.pos += 1;
                    Ok(Token::LBracket)
                }
            },
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let start = self.pos;
                while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')) {
                    self.pos += 1;
                }
                let name = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                Ok(keyword(&name).unwrap_or(Token::Name(name)))
            }
            _ => self.read_punctuation(),
        }
    }

    fn read_punctuation(&mut self) -> Result<Token, ParseError> {
        let single = match self.peek() {
            Some(b'{') => Some(Token::LBrace),
            Some(b'}') => Some(Token::RBrace),
            Some(b']') => Some(Token::RBracket),
            Some(b'(') => Some(Token::LParen),
            Some(b')') => Some(Token::RParen),
            Some(b',') => Some(Token::Comma),
            Some(b';') => Some(Token::Semi),
            Some(b'-') => Some(Token::Minus),
            Some(b'=') if self.peek_at(1) != Some(b'=') => Some(Token::Eq),
            Some(b'.') if self.peek_at(1) != Some(b'.') => Some(Token::Dot),
            _ => None,
        };
        if let Some(token) = single {
            self.pos += 1;
            return Ok(token);
        }

        let rest = &self.src[self.pos..];
        for op in OPERATORS {
            if rest.starts_with(op.as_bytes()) {
                self.pos += op.len();
                return Ok(Token::Op(op));
            }
        }
        Err(self.error(format!("unexpected character {:?}", char::from(rest[0]))))
    }

    fn read_number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap_or("");
            return u64::from_str_radix(digits, 16)
                .map(|n| Token::Number(n as f64))
                .map_err(|_| ParseError::new(start, "malformed hexadecimal number"));
        }

        while matches!(self.peek(), Some(b'0'..=b'9' | b'.')) {
            self.pos += 1;
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ParseError::new(start, format!("malformed number {text:?}")))
    }

    fn read_string(&mut self, delim: u8) -> Result<String, ParseError> {
        let start = self.pos.saturating_sub(1);
        let mut buf = Vec::new();
        loop {
            let Some(b) = self.bump() else {
                return Err(ParseError::new(start, "unterminated string"));
            };
            match b {
                b'\n' => return Err(ParseError::new(start, "unterminated string")),
                b'\\' => self.read_escape(&mut buf)?,
                b if b == delim => return Ok(String::from_utf8_lossy(&buf).into_owned()),
                b => buf.push(b),
            }
        }
    }

    fn read_escape(&mut self, buf: &mut Vec<u8>) -> Result<(), ParseError> {
        let Some(esc) = self.bump() else {
            return Err(self.error("unterminated escape"));
        };
        match esc {
            b'n' => buf.push(b'\n'),
            b't' => buf.push(b'\t'),
            b'r' => buf.push(b'\r'),
            b'a' => buf.push(0x07),
            b'b' => buf.push(0x08),
            b'f' => buf.push(0x0c),
            b'v' => buf.push(0x0b),
            b'\\' => buf.push(b'\\'),
            b'\'' => buf.push(b'\''),
            b'"' => buf.push(b'"'),
            b'\n' => buf.push(b'\n'),
            b'z' => {
                while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
                    self.pos += 1;
                }
            }
            b'x' => {
                let hi = self.bump().and_then(|b| char::from(b).to_digit(16));
                let lo = self.bump().and_then(|b| char::from(b).to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => buf.push((hi * 16 + lo) as u8),
                    _ => return Err(self.error("malformed \\x escape")),
                }
            }
            b'u' => {
                if self.bump() != Some(b'{') {
                    return Err(self.error("malformed \\u escape"));
                }
                let mut code: u32 = 0;
                loop {
                    match self.bump() {
                        Some(b'}') => break,
                        Some(b) => match char::from(b).to_digit(16) {
                            Some(d) => code = code.saturating_mul(16).saturating_add(d),
                            None => return Err(self.error("malformed \\u escape")),
                        },
                        None => return Err(self.error("unterminated escape")),
                    }
                }
                let ch = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
                let mut utf8 = [0u8; 4];
                buf.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            }
            b'0'..=b'9' => {
                let mut num = u32::from(esc - b'0');
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'9') => {
                            num = num * 10 + u32::from(d - b'0');
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                if num > 255 {
                    return Err(self.error("decimal escape too large"));
                }
                buf.push(num as u8);
            }
            other => {
                return Err(self.error(format!(
                    "invalid escape sequence \\{}",
                    char::from(other)
                )))
            }
        }
        Ok(())
    }
}
