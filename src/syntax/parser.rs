use crate::error::CompileError;
use crate::runtime::symbol::Interner;
use crate::syntax::lexer::Lexer;
use crate::syntax::term::{Term, Variable};
use crate::syntax::token::Token;
use crate::syntax::token_type::TokenType;

/// A parsed top-level term with its source line.
#[derive(Debug, Clone)]
pub struct SourceTerm {
    pub term: Term,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Xfx,
    Xfy,
    Yfx,
}

/// Operator table: canonical functor, priority, associativity. Lower
/// priority binds tighter.
fn infix_op(token_type: TokenType) -> Option<(&'static str, u16, Assoc)> {
    Some(match token_type {
        TokenType::Implies => (":-", 1200, Assoc::Xfx),
        TokenType::Semicolon => (";", 1100, Assoc::Xfy),
        TokenType::Comma => (",", 1000, Assoc::Xfy),
        TokenType::Unify => ("=", 700, Assoc::Xfx),
        TokenType::Lt => ("<", 700, Assoc::Xfx),
        TokenType::Gt => (">", 700, Assoc::Xfx),
        TokenType::Lte => ("=<", 700, Assoc::Xfx),
        TokenType::Gte => (">=", 700, Assoc::Xfx),
        TokenType::Colon => (":", 600, Assoc::Xfy),
        TokenType::SlashGt => ("/>", 600, Assoc::Xfy),
        TokenType::Plus => ("+", 500, Assoc::Yfx),
        TokenType::Minus => ("-", 500, Assoc::Yfx),
        TokenType::Asterisk => ("*", 400, Assoc::Yfx),
        TokenType::Slash => ("/", 400, Assoc::Yfx),
        TokenType::Dot => (".", 100, Assoc::Yfx),
        TokenType::DoubleColon => ("::", 100, Assoc::Yfx),
        _ => return None,
    })
}

/// The horn term parser.
///
/// Produces one surface term per clause. Supports the ordinary
/// `.`-terminated stream and the delimited mode where `;` separates terms
/// and `;;` ends the stream.
pub struct Parser<'a> {
    lexer: Lexer,
    cur: Token,
    peek: Token,
    interner: &'a mut Interner,
    file: String,
    fresh: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: impl Into<String>, file: impl Into<String>, interner: &'a mut Interner) -> Self {
        let mut lexer = Lexer::new(input);
        let cur = lexer.next_token();
        let peek = lexer.next_token();
        Self {
            lexer,
            cur,
            peek,
            interner,
            file: file.into(),
            fresh: 0,
        }
    }

    fn next_token(&mut self) {
        self.cur = std::mem::replace(&mut self.peek, self.lexer.next_token());
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.file.clone(), self.cur.position.line)
    }

    fn expect(&mut self, token_type: TokenType) -> Result<(), CompileError> {
        if self.cur.token_type == token_type {
            self.next_token();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                token_type, self.cur.token_type
            )))
        }
    }

    /// Parse a `.`-terminated stream of top-level terms until EOF.
    pub fn parse_program(&mut self) -> Result<Vec<SourceTerm>, CompileError> {
        let mut terms = Vec::new();
        while self.cur.token_type != TokenType::Eof {
            let line = self.cur.position.line;
            let term = self.parse_expr(1200)?;
            self.expect(TokenType::TermEnd)?;
            terms.push(SourceTerm { term, line });
        }
        Ok(terms)
    }

    /// Parse a `;`-delimited stream of top-level terms ended by `;;`.
    pub fn parse_delimited(&mut self) -> Result<Vec<SourceTerm>, CompileError> {
        let mut terms = Vec::new();
        loop {
            match self.cur.token_type {
                TokenType::DoubleSemi => {
                    self.next_token();
                    break;
                }
                TokenType::Eof => break,
                _ => {}
            }
            let line = self.cur.position.line;
            // Parse below the `;` priority so the separator stays a separator.
            let term = self.parse_expr(1050)?;
            terms.push(SourceTerm { term, line });
            match self.cur.token_type {
                TokenType::Semicolon => self.next_token(),
                TokenType::DoubleSemi | TokenType::Eof => {}
                _ => {
                    return Err(self.error(format!(
                        "expected ; or ;; after term, found {}",
                        self.cur.token_type
                    )))
                }
            }
        }
        Ok(terms)
    }

    /// Parse a single query goal. A trailing `.` is permitted.
    pub fn parse_query(&mut self) -> Result<Term, CompileError> {
        let term = self.parse_expr(1200)?;
        if self.cur.token_type == TokenType::TermEnd {
            self.next_token();
        }
        if self.cur.token_type != TokenType::Eof {
            return Err(self.error(format!(
                "unexpected {} after query",
                self.cur.token_type
            )));
        }
        Ok(term)
    }

    fn parse_expr(&mut self, max_priority: u16) -> Result<Term, CompileError> {
        let mut left = self.parse_primary()?;
        while let Some((name, priority, assoc)) = infix_op(self.cur.token_type) {
            if priority > max_priority {
                break;
            }
            self.next_token();
            let right_max = match assoc {
                Assoc::Xfy => priority,
                Assoc::Xfx | Assoc::Yfx => priority - 1,
            };
            let right = self.parse_expr(right_max)?;
            left = Term::call(self.interner.intern(name), vec![left, right]);
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Term, CompileError> {
        match self.cur.token_type {
            TokenType::Int => {
                let value: i64 = self
                    .cur
                    .literal
                    .parse()
                    .map_err(|_| self.error(format!("invalid integer {}", self.cur.literal)))?;
                self.next_token();
                Ok(Term::Int(value))
            }
            TokenType::Float => {
                let value: f32 = self
                    .cur
                    .literal
                    .parse()
                    .map_err(|_| self.error(format!("invalid float {}", self.cur.literal)))?;
                self.next_token();
                Ok(Term::Float(value))
            }
            TokenType::String => {
                let value = self.cur.literal.clone();
                self.next_token();
                Ok(Term::Str(value.into()))
            }
            TokenType::True => {
                self.next_token();
                Ok(Term::Bool(true))
            }
            TokenType::False => {
                self.next_token();
                Ok(Term::Bool(false))
            }
            TokenType::Null => {
                self.next_token();
                Ok(Term::Null)
            }
            TokenType::Cut => {
                self.next_token();
                Ok(Term::Atom(self.interner.intern("!")))
            }
            TokenType::Minus => {
                self.next_token();
                let operand = self.parse_primary()?;
                match operand {
                    Term::Int(i) => Ok(Term::Int(-i)),
                    Term::Float(x) => Ok(Term::Float(-x)),
                    other => Ok(Term::call(self.interner.intern("-"), vec![other])),
                }
            }
            TokenType::Variable => {
                let term = if self.cur.literal == "_" {
                    self.fresh += 1;
                    Term::Var(Variable::generated(format!("_G{}", self.fresh)))
                } else {
                    Term::Var(Variable::new(self.cur.literal.clone()))
                };
                self.next_token();
                Ok(term)
            }
            TokenType::New => {
                self.next_token();
                let inner = self.parse_primary()?;
                if !matches!(inner, Term::Call(_)) {
                    return Err(self.error("new requires a constructor call"));
                }
                Ok(Term::call(self.interner.intern("new"), vec![inner]))
            }
            TokenType::Atom => {
                let name = self.cur.literal.clone();
                if self.peek.token_type == TokenType::LParen {
                    self.next_token(); // onto '('
                    self.next_token(); // past '('
                    let mut args = Vec::new();
                    loop {
                        args.push(self.parse_expr(999)?);
                        match self.cur.token_type {
                            TokenType::Comma => self.next_token(),
                            TokenType::RParen => {
                                self.next_token();
                                break;
                            }
                            _ => {
                                return Err(self.error(format!(
                                    "expected , or ) in argument list, found {}",
                                    self.cur.token_type
                                )))
                            }
                        }
                    }
                    Ok(Term::call(self.interner.intern(&name), args))
                } else {
                    self.next_token();
                    Ok(Term::Atom(self.interner.intern(&name)))
                }
            }
            TokenType::LParen => {
                self.next_token();
                let term = self.parse_expr(1200)?;
                self.expect(TokenType::RParen)?;
                Ok(term)
            }
            other => Err(self.error(format!("unexpected {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &str) -> Term {
        let mut interner = Interner::new();
        let mut parser = Parser::new(input, "<test>", &mut interner);
        let terms = parser.parse_program().expect("parse failed");
        assert_eq!(terms.len(), 1);
        terms.into_iter().next().unwrap().term
    }

    #[test]
    fn test_parse_fact() {
        let term = parse_one("parent(tom, bob).");
        match term {
            Term::Call(c) => {
                assert_eq!(c.functor.name(), "parent");
                assert_eq!(c.arity(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rule_shape() {
        let term = parse_one("p(X) :- q(X), X > 1.");
        let Term::Call(rule) = term else {
            panic!("expected rule");
        };
        assert_eq!(rule.functor.name(), ":-");
        assert_eq!(rule.arity(), 2);
        let Term::Call(body) = &rule.args[1] else {
            panic!("expected body conjunction");
        };
        assert_eq!(body.functor.name(), ",");
        // `,` is right-associative: q(X), (X > 1)
        assert!(body.args[1].is_call(">", 2));
    }

    #[test]
    fn test_conjunction_is_right_associative() {
        let term = parse_one("p :- a, b, c.");
        let Term::Call(rule) = term else {
            panic!("expected rule")
        };
        let Term::Call(conj) = &rule.args[1] else {
            panic!("expected conjunction")
        };
        assert!(matches!(conj.args[0], Term::Atom(_)));
        assert!(conj.args[1].is_call(",", 2));
    }

    #[test]
    fn test_disjunction_binds_looser_than_conjunction() {
        let term = parse_one("p :- a, b ; c.");
        let Term::Call(rule) = term else {
            panic!("expected rule")
        };
        let Term::Call(disj) = &rule.args[1] else {
            panic!("expected disjunction")
        };
        assert_eq!(disj.functor.name(), ";");
        assert!(disj.args[0].is_call(",", 2));
    }

    #[test]
    fn test_arithmetic_priorities() {
        let term = parse_one("p(X) :- X = 1 + 2 * 3.");
        let Term::Call(rule) = term else {
            panic!("expected rule")
        };
        let Term::Call(unify) = &rule.args[1] else {
            panic!("expected unification")
        };
        let Term::Call(sum) = &unify.args[1] else {
            panic!("expected sum")
        };
        assert_eq!(sum.functor.name(), "+");
        assert!(sum.args[1].is_call("*", 2));
    }

    #[test]
    fn test_anonymous_variables_are_distinct() {
        let term = parse_one("p(_, _).");
        let Term::Call(c) = term else {
            panic!("expected call")
        };
        let (Term::Var(a), Term::Var(b)) = (&c.args[0], &c.args[1]) else {
            panic!("expected variables")
        };
        assert!(a.generated && b.generated);
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn test_predicate_indicator() {
        let term = parse_one("trace(p/2).");
        let Term::Call(c) = term else {
            panic!("expected call")
        };
        let Term::Call(pi) = &c.args[0] else {
            panic!("expected indicator")
        };
        assert_eq!(pi.functor.name(), "/");
        assert!(matches!(&pi.args[0], Term::Atom(s) if s.name() == "p"));
        assert_eq!(pi.args[1], Term::Int(2));
    }

    #[test]
    fn test_delimited_stream() {
        let mut interner = Interner::new();
        let mut parser = Parser::new("delimited_code(a); delimited_code(b);;", "<test>", &mut interner);
        let terms = parser.parse_delimited().expect("parse failed");
        assert_eq!(terms.len(), 2);
        assert!(terms[0].term.is_call("delimited_code", 1));
        assert!(terms[1].term.is_call("delimited_code", 1));
    }

    #[test]
    fn test_query_with_optional_terminator() {
        let mut interner = Interner::new();
        let mut parser = Parser::new("p(X), X > 1", "<query>", &mut interner);
        let goal = parser.parse_query().expect("parse failed");
        assert!(goal.is_call(",", 2));
    }

    #[test]
    fn test_negative_literal() {
        let term = parse_one("p(-3).");
        let Term::Call(c) = term else {
            panic!("expected call")
        };
        assert_eq!(c.args[0], Term::Int(-3));
    }
}
