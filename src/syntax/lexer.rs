use crate::syntax::token::Token;
use crate::syntax::token_type::{lookup_ident, TokenType};

/// The horn lexer.
///
/// Tokenizes clause text. `.` is context-sensitive: a dot followed by a
/// letter is the field-access operator, otherwise it terminates the term.
#[derive(Debug, Clone)]
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    read_position: usize,
    current_char: Option<char>,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: impl Into<String>) -> Self {
        let mut lexer = Self {
            input: input.into().chars().collect(),
            position: 0,
            read_position: 0,
            current_char: None,
            line: 1,
            column: 0,
        };
        lexer.read_char();
        lexer
    }

    /// Get the next token from the input.
    pub fn next_token(&mut self) -> Token {
        self.skip_ignorable();

        let line = self.line;
        let col = self.column;

        let token = match self.current_char {
            // Two-character operators
            Some(':') if self.peek_char() == Some('-') => {
                self.read_char();
                Token::new(TokenType::Implies, ":-", line, col)
            }
            Some(':') if self.peek_char() == Some(':') => {
                self.read_char();
                Token::new(TokenType::DoubleColon, "::", line, col)
            }
            Some('=') if self.peek_char() == Some('<') => {
                self.read_char();
                Token::new(TokenType::Lte, "=<", line, col)
            }
            Some('<') if self.peek_char() == Some('=') => {
                self.read_char();
                Token::new(TokenType::Lte, "<=", line, col)
            }
            Some('>') if self.peek_char() == Some('=') => {
                self.read_char();
                Token::new(TokenType::Gte, ">=", line, col)
            }
            Some('/') if self.peek_char() == Some('>') => {
                self.read_char();
                Token::new(TokenType::SlashGt, "/>", line, col)
            }
            Some(';') if self.peek_char() == Some(';') => {
                self.read_char();
                Token::new(TokenType::DoubleSemi, ";;", line, col)
            }

            // Single-character operators and delimiters
            Some('+') => Token::new(TokenType::Plus, "+", line, col),
            Some('-') => Token::new(TokenType::Minus, "-", line, col),
            Some('*') => Token::new(TokenType::Asterisk, "*", line, col),
            Some('/') => Token::new(TokenType::Slash, "/", line, col),
            Some('<') => Token::new(TokenType::Lt, "<", line, col),
            Some('>') => Token::new(TokenType::Gt, ">", line, col),
            Some('=') => Token::new(TokenType::Unify, "=", line, col),
            Some('!') => Token::new(TokenType::Cut, "!", line, col),
            Some(':') => Token::new(TokenType::Colon, ":", line, col),
            Some(',') => Token::new(TokenType::Comma, ",", line, col),
            Some(';') => Token::new(TokenType::Semicolon, ";", line, col),
            Some('(') => Token::new(TokenType::LParen, "(", line, col),
            Some(')') => Token::new(TokenType::RParen, ")", line, col),
            Some('.') => {
                if self.peek_char().is_some_and(is_letter) {
                    Token::new(TokenType::Dot, ".", line, col)
                } else {
                    Token::new(TokenType::TermEnd, ".", line, col)
                }
            }

            // String literals
            Some('"') => {
                return self.read_string();
            }

            // Quoted atoms
            Some('\'') => {
                return self.read_quoted_atom();
            }

            // End of file
            None => Token::new(TokenType::Eof, "", line, col),

            // Identifiers, variables, keywords
            Some(ch) if is_letter(ch) => {
                let ident = self.read_identifier();
                let token_type = if starts_variable(ch) {
                    TokenType::Variable
                } else {
                    lookup_ident(&ident)
                };
                return Token::new(token_type, ident, line, col);
            }

            // Numbers
            Some(ch) if ch.is_ascii_digit() => {
                return self.read_number();
            }

            Some(ch) => Token::new(TokenType::Illegal, ch.to_string(), line, col),
        };

        self.read_char();
        token
    }

    fn read_char(&mut self) {
        if let Some('\n') = self.current_char {
            self.line += 1;
            self.column = 0;
        }
        self.current_char = self.input.get(self.read_position).copied();
        self.position = self.read_position;
        self.read_position += 1;
        if self.current_char.is_some() {
            self.column += 1;
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.read_position).copied()
    }

    fn skip_ignorable(&mut self) {
        loop {
            match self.current_char {
                Some(ch) if ch.is_whitespace() => self.read_char(),
                // Line comments
                Some('%') => {
                    while self.current_char.is_some() && self.current_char != Some('\n') {
                        self.read_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while self.current_char.is_some_and(is_ident_char) {
            self.read_char();
        }
        self.input[start..self.position].iter().collect()
    }

    fn read_number(&mut self) -> Token {
        let line = self.line;
        let col = self.column;
        let start = self.position;
        while self.current_char.is_some_and(|c| c.is_ascii_digit()) {
            self.read_char();
        }
        // A dot only continues the number when a digit follows; otherwise it
        // is the term terminator.
        let mut is_float = false;
        if self.current_char == Some('.') && self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.read_char();
            while self.current_char.is_some_and(|c| c.is_ascii_digit()) {
                self.read_char();
            }
        }
        let literal: String = self.input[start..self.position].iter().collect();
        let token_type = if is_float {
            TokenType::Float
        } else {
            TokenType::Int
        };
        Token::new(token_type, literal, line, col)
    }

    fn read_string(&mut self) -> Token {
        let line = self.line;
        let col = self.column;
        self.read_char(); // consume opening quote
        let mut literal = String::new();
        loop {
            match self.current_char {
                Some('"') => {
                    self.read_char();
                    break;
                }
                Some('\\') => {
                    self.read_char();
                    match self.current_char {
                        Some('n') => literal.push('\n'),
                        Some('t') => literal.push('\t'),
                        Some('"') => literal.push('"'),
                        Some('\\') => literal.push('\\'),
                        Some(other) => literal.push(other),
                        None => return Token::new(TokenType::Illegal, literal, line, col),
                    }
                    self.read_char();
                }
                Some(ch) => {
                    literal.push(ch);
                    self.read_char();
                }
                None => return Token::new(TokenType::Illegal, literal, line, col),
            }
        }
        Token::new(TokenType::String, literal, line, col)
    }

    fn read_quoted_atom(&mut self) -> Token {
        let line = self.line;
        let col = self.column;
        self.read_char(); // consume opening quote
        let mut literal = String::new();
        loop {
            match self.current_char {
                Some('\'') => {
                    self.read_char();
                    break;
                }
                Some(ch) => {
                    literal.push(ch);
                    self.read_char();
                }
                None => return Token::new(TokenType::Illegal, literal, line, col),
            }
        }
        Token::new(TokenType::Atom, literal, line, col)
    }
}

fn is_letter(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn starts_variable(ch: char) -> bool {
    ch.is_uppercase() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_types(input: &str) -> Vec<TokenType> {
        let mut lexer = Lexer::new(input);
        let mut types = Vec::new();
        loop {
            let token = lexer.next_token();
            if token.token_type == TokenType::Eof {
                break;
            }
            types.push(token.token_type);
        }
        types
    }

    #[test]
    fn test_clause_tokens() {
        let types = collect_types("p(X) :- q(X), X > 1.");
        assert_eq!(
            types,
            vec![
                TokenType::Atom,
                TokenType::LParen,
                TokenType::Variable,
                TokenType::RParen,
                TokenType::Implies,
                TokenType::Atom,
                TokenType::LParen,
                TokenType::Variable,
                TokenType::RParen,
                TokenType::Comma,
                TokenType::Variable,
                TokenType::Gt,
                TokenType::Int,
                TokenType::TermEnd,
            ]
        );
    }

    #[test]
    fn test_numbers_and_terminator_dot() {
        let mut lexer = Lexer::new("f(1.5, 2).");
        let mut literals = Vec::new();
        loop {
            let token = lexer.next_token();
            if token.token_type == TokenType::Eof {
                break;
            }
            literals.push((token.token_type, token.literal));
        }
        assert_eq!(literals[2], (TokenType::Float, "1.5".to_string()));
        assert_eq!(literals[4], (TokenType::Int, "2".to_string()));
        assert_eq!(literals[6].0, TokenType::TermEnd);
    }

    #[test]
    fn test_field_access_dot() {
        let types = collect_types("X.name.");
        assert_eq!(
            types,
            vec![
                TokenType::Variable,
                TokenType::Dot,
                TokenType::Atom,
                TokenType::TermEnd,
            ]
        );
    }

    #[test]
    fn test_delimited_stream_tokens() {
        let types = collect_types("a(b); a(c);;");
        assert_eq!(
            types,
            vec![
                TokenType::Atom,
                TokenType::LParen,
                TokenType::Atom,
                TokenType::RParen,
                TokenType::Semicolon,
                TokenType::Atom,
                TokenType::LParen,
                TokenType::Atom,
                TokenType::RParen,
                TokenType::DoubleSemi,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let types = collect_types("X =< 2, Y >= 3, Z = p/2");
        assert_eq!(
            types,
            vec![
                TokenType::Variable,
                TokenType::Lte,
                TokenType::Int,
                TokenType::Comma,
                TokenType::Variable,
                TokenType::Gte,
                TokenType::Int,
                TokenType::Comma,
                TokenType::Variable,
                TokenType::Unify,
                TokenType::Atom,
                TokenType::Slash,
                TokenType::Int,
            ]
        );
    }

    #[test]
    fn test_comments_and_quoted_atoms() {
        let types = collect_types("% a comment\n'hello world'(1).");
        assert_eq!(
            types,
            vec![
                TokenType::Atom,
                TokenType::LParen,
                TokenType::Int,
                TokenType::RParen,
                TokenType::TermEnd,
            ]
        );
    }
}
