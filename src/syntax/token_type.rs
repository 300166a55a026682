use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Special
    Illegal,
    Eof,

    // Identifiers and literals
    Atom,
    Variable,
    Int,
    Float,
    String,

    // Arithmetic operators
    Plus,
    Minus,
    Asterisk,
    Slash,

    // Comparison operators
    Lt,
    Gt,
    Lte,
    Gte,

    // Term connectives
    Implies,   // :-
    Comma,     // ,
    Semicolon, // ;
    Unify,     // =
    Cut,       // !
    Colon,     // :
    SlashGt,   // />
    Dot,       // infix field access
    DoubleColon,

    // Delimiters
    LParen,
    RParen,
    TermEnd,    // clause-terminating .
    DoubleSemi, // ;; stream terminator in delimited mode

    // Keywords
    New,
    Null,
    True,
    False,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenType::Illegal => "ILLEGAL",
            TokenType::Eof => "EOF",
            TokenType::Atom => "ATOM",
            TokenType::Variable => "VARIABLE",
            TokenType::Int => "INT",
            TokenType::Float => "FLOAT",
            TokenType::String => "STRING",
            TokenType::Plus => "+",
            TokenType::Minus => "-",
            TokenType::Asterisk => "*",
            TokenType::Slash => "/",
            TokenType::Lt => "<",
            TokenType::Gt => ">",
            TokenType::Lte => "=<",
            TokenType::Gte => ">=",
            TokenType::Implies => ":-",
            TokenType::Comma => ",",
            TokenType::Semicolon => ";",
            TokenType::Unify => "=",
            TokenType::Cut => "!",
            TokenType::Colon => ":",
            TokenType::SlashGt => "/>",
            TokenType::Dot => ".",
            TokenType::DoubleColon => "::",
            TokenType::LParen => "(",
            TokenType::RParen => ")",
            TokenType::TermEnd => "end of term",
            TokenType::DoubleSemi => ";;",
            TokenType::New => "new",
            TokenType::Null => "null",
            TokenType::True => "true",
            TokenType::False => "false",
        };
        write!(f, "{}", s)
    }
}

/// Keyword lookup for lowercase identifiers.
pub fn lookup_ident(ident: &str) -> TokenType {
    match ident {
        "new" => TokenType::New,
        "null" => TokenType::Null,
        "true" => TokenType::True,
        "false" => TokenType::False,
        _ => TokenType::Atom,
    }
}
