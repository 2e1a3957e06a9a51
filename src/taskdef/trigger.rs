// src/taskdef/trigger.rs

//! Trigger expression parser.
//!
//! Grammar (whitespace is insignificant):
//!
//! ```text
//! expr  := and ('|' and)*
//! and   := atom ('&' atom)*
//! atom  := '(' expr ')' | '@' label | name ('[' offset ']')? (':' qualifier)?
//! ```
//!
//! The parser only checks shape. Names, offsets and qualifiers are resolved
//! against the workflow when the definition store is built.

use crate::errors::{CyclerunError, Result};

/// One `name[offset]:qualifier` reference, still unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRef {
    pub name: String,
    pub offset: Option<String>,
    pub qualifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAst {
    Ref(TriggerRef),
    Xtrigger(String),
    And(Vec<TriggerAst>),
    Or(Vec<TriggerAst>),
}

/// A parsed trigger: the dependency expression (if any) plus the xtrigger
/// labels that gate it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedTrigger {
    pub expr: Option<TriggerAst>,
    pub xtriggers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Offset(String),
    Colon,
    At,
    And,
    Or,
    LParen,
    RParen,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '%' | '.')
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '&' => {
                chars.next();
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                tokens.push(Token::Or);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '@' => {
                chars.next();
                tokens.push(Token::At);
            }
            '[' => {
                chars.next();
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => inner.push(ch),
                        None => {
                            return Err(CyclerunError::config(format!(
                                "unterminated '[' in trigger '{src}'"
                            )));
                        }
                    }
                }
                tokens.push(Token::Offset(inner.trim().to_string()));
            }
            c if is_name_char(c) => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if !is_name_char(ch) {
                        break;
                    }
                    ident.push(ch);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(CyclerunError::config(format!(
                    "unexpected character '{other}' in trigger '{src}'"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn error(&self, what: &str) -> CyclerunError {
        CyclerunError::config(format!("{what} in trigger '{}'", self.src))
    }

    fn expr(&mut self) -> Result<TriggerAst> {
        let mut terms = vec![self.and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            terms.push(self.and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            TriggerAst::Or(terms)
        })
    }

    fn and(&mut self) -> Result<TriggerAst> {
        let mut terms = vec![self.atom()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            terms.push(self.atom()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            TriggerAst::And(terms)
        })
    }

    fn atom(&mut self) -> Result<TriggerAst> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("missing ')'")),
                }
            }
            Some(Token::At) => match self.next() {
                Some(Token::Ident(label)) => Ok(TriggerAst::Xtrigger(label)),
                _ => Err(self.error("expected xtrigger label after '@'")),
            },
            Some(Token::Ident(name)) => {
                let offset = match self.peek() {
                    Some(Token::Offset(o)) => {
                        let o = o.clone();
                        self.next();
                        Some(o)
                    }
                    _ => None,
                };
                let qualifier = if self.peek() == Some(&Token::Colon) {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(q)) => Some(q),
                        _ => return Err(self.error("expected output after ':'")),
                    }
                } else {
                    None
                };
                Ok(TriggerAst::Ref(TriggerRef {
                    name,
                    offset,
                    qualifier,
                }))
            }
            _ => Err(self.error("expected a task name, '@label' or '('")),
        }
    }
}

/// Parse one trigger expression. An empty string means "no dependencies".
pub fn parse_trigger(src: &str) -> Result<ParsedTrigger> {
    if src.trim().is_empty() {
        return Ok(ParsedTrigger::default());
    }
    let mut parser = Parser {
        src,
        tokens: tokenize(src)?,
        pos: 0,
    };
    let ast = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }

    // Xtriggers may only be AND-ed at the top level.
    let top: Vec<TriggerAst> = match ast {
        TriggerAst::And(terms) => terms,
        other => vec![other],
    };
    let mut xtriggers = Vec::new();
    let mut rest = Vec::new();
    for term in top {
        match term {
            TriggerAst::Xtrigger(label) => xtriggers.push(label),
            other if contains_xtrigger(&other) => {
                return Err(CyclerunError::config(format!(
                    "xtriggers must be AND-ed at the top level of trigger '{src}'"
                )));
            }
            other => rest.push(other),
        }
    }

    let expr = match rest.len() {
        0 => None,
        1 => rest.pop(),
        _ => Some(TriggerAst::And(rest)),
    };
    Ok(ParsedTrigger { expr, xtriggers })
}

fn contains_xtrigger(ast: &TriggerAst) -> bool {
    match ast {
        TriggerAst::Xtrigger(_) => true,
        TriggerAst::Ref(_) => false,
        TriggerAst::And(terms) | TriggerAst::Or(terms) => terms.iter().any(contains_xtrigger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(name: &str, offset: Option<&str>, qualifier: Option<&str>) -> TriggerAst {
        TriggerAst::Ref(TriggerRef {
            name: name.to_string(),
            offset: offset.map(str::to_string),
            qualifier: qualifier.map(str::to_string),
        })
    }

    #[test]
    fn parses_precedence_and_offsets() {
        let parsed = parse_trigger("a[-P1]:fail | b & (c | d:x)").unwrap();
        assert_eq!(
            parsed.expr,
            Some(TriggerAst::Or(vec![
                r("a", Some("-P1"), Some("fail")),
                TriggerAst::And(vec![
                    r("b", None, None),
                    TriggerAst::Or(vec![r("c", None, None), r("d", None, Some("x"))]),
                ]),
            ]))
        );
    }

    #[test]
    fn splits_top_level_xtriggers() {
        let parsed = parse_trigger("@clock & foo & @ready").unwrap();
        assert_eq!(parsed.xtriggers, vec!["clock".to_string(), "ready".to_string()]);
        assert_eq!(parsed.expr, Some(r("foo", None, None)));
    }

    #[test]
    fn rejects_xtrigger_inside_or() {
        assert!(parse_trigger("foo | @clock").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_trigger("foo &").is_err());
        assert!(parse_trigger("(foo").is_err());
        assert!(parse_trigger("foo[-P1").is_err());
        assert!(parse_trigger("foo bar").is_err());
    }

    #[test]
    fn empty_trigger_has_no_dependencies() {
        assert_eq!(parse_trigger("  ").unwrap(), ParsedTrigger::default());
    }
}
