pub mod lexer;
pub mod parser;
pub mod position;
pub mod term;
pub mod token;
pub mod token_type;

pub use position::{Position, Span};
pub use term::Term;
pub use token::Token;
pub use token_type::TokenType;
