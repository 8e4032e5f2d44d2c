/// Represents the different kinds of tokens found between a tag's `{%` and `%}` delimiters.
#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    // == Special Tokens ==
    /// Represents the end of the tag interior.
    Eof,
    /// Represents a sequence of one or more whitespace characters.
    Whitespace,
    /// Represents a token that could not be recognized by the lexer.
    Unknown,

    // == Literals ==
    /// A tag name, attribute name, or bare option id.
    /// Examples: `field`, `minLength`, `field-group`.
    Identifier(String),
    /// A string literal, enclosed in double quotes.
    /// The associated `String` holds the unescaped content.
    String(String),
    /// A number literal, which can be an integer or a floating-point value.
    Number(f64),

    // == Keywords ==
    True,
    False,
    Null,

    // == Punctuation ==
    /// Left Bracket: `[` (opens a list value)
    LBracket,
    /// Right Bracket: `]`
    RBracket,
    /// Comma: `,`
    Comma,
    /// Equals: `=` (separates attribute name and value)
    Equals,
    /// Hash: `#` (prefix of an option annotation, e.g. `{% #yes %}`)
    Hash,
    /// Slash: `/` (closing tag prefix or self-closing suffix)
    Slash,
}

/// A token with its type and absolute byte position in the document.
#[derive(Debug, Clone)]
pub struct Token {
    pub ttype: TokenType,
    pub pos_start: usize,
    pub pos_end: usize,
}

impl Token {
    pub fn new(ttype: TokenType, pos_start: usize, pos_end: usize) -> Token {
        Token {
            ttype,
            pos_start,
            pos_end,
        }
    }
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_offset(input, 0)
    }

    /// Lexes `input` as if it started at byte `offset` of a larger document.
    pub fn with_offset(input: &'a str, offset: usize) -> Self {
        Self {
            chars: input.chars().peekable(),
            position: offset,
        }
    }

    pub fn lex(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            if token.ttype == TokenType::Eof {
                tokens.push(token);
                break;
            }
            tokens.push(token);
        }
        log::trace!("lexed {} tag tokens", tokens.len());
        tokens
    }

    pub fn next_token(&mut self) -> Token {
        let start_pos = self.position;

        let ttype = if let Some(char) = self.advance() {
            match char {
                '[' => TokenType::LBracket,
                ']' => TokenType::RBracket,
                ',' => TokenType::Comma,
                '=' => TokenType::Equals,
                '#' => TokenType::Hash,
                '/' => TokenType::Slash,
                '"' => self.read_string(),
                c if c.is_whitespace() => self.read_whitespace(),
                c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(c),
                c if c.is_ascii_digit()
                    || (c == '-' && self.peek().is_some_and(|c| c.is_ascii_digit())) =>
                {
                    self.read_number(c)
                }
                _ => TokenType::Unknown,
            }
        } else {
            TokenType::Eof
        };

        Token::new(ttype, start_pos, self.position)
    }

    fn advance(&mut self) -> Option<char> {
        let char = self.chars.next();
        if let Some(c) = char {
            self.position += c.len_utf8();
        }
        char
    }

    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    fn read_whitespace(&mut self) -> TokenType {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
        TokenType::Whitespace
    }

    fn read_string(&mut self) -> TokenType {
        let mut value = String::new();
        while let Some(c) = self.advance() {
            match c {
                '"' => return TokenType::String(value),
                '\\' => match self.advance() {
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return TokenType::Unknown, // Unclosed escape sequence
                },
                _ => value.push(c),
            }
        }
        TokenType::Unknown // Unclosed string
    }

    fn read_identifier(&mut self, first_char: char) -> TokenType {
        let mut ident = String::new();
        ident.push(first_char);

        while let Some(&c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match ident.as_str() {
            "true" => TokenType::True,
            "false" => TokenType::False,
            "null" => TokenType::Null,
            _ => TokenType::Identifier(ident),
        }
    }

    fn read_number(&mut self, first_char: char) -> TokenType {
        let mut number_str = String::new();
        number_str.push(first_char);
        let mut has_dot = false;
        let mut has_exponent = false;

        while let Some(&c) = self.peek() {
            if c.is_ascii_digit() {
                number_str.push(c);
                self.advance();
            } else if c == '.' && !has_dot && !has_exponent {
                has_dot = true;
                number_str.push(c);
                self.advance();
            } else if (c == 'e' || c == 'E') && !has_exponent {
                has_exponent = true;
                number_str.push(c);
                self.advance();
                if let Some(&sign) = self.peek() {
                    if sign == '+' || sign == '-' {
                        number_str.push(sign);
                        self.advance();
                    }
                }
            } else if c.is_ascii_alphabetic() || c == '_' || c == '-' {
                // Option ids such as `1990s` start with a digit.
                return self.read_identifier_tail(number_str);
            } else {
                break;
            }
        }

        match number_str.parse::<f64>() {
            Ok(num) => TokenType::Number(num),
            Err(_) => TokenType::Unknown,
        }
    }

    fn read_identifier_tail(&mut self, mut ident: String) -> TokenType {
        while let Some(&c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if ident.starts_with('-') {
            TokenType::Unknown
        } else {
            TokenType::Identifier(ident)
        }
    }
}
