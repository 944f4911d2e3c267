//! Exchange types for the external expression language.
//!
//! The narrative parser compiles `~`-prefixed code into a flat token list;
//! the engine later hands that list, plus the variable store, to whatever
//! [`Evaluator`] the host supplies and receives a single typed result back.
//! The evaluator may call named functions through [`FnDispatch`] — this is
//! how scripts reach host functionality and their own `=== function ===`
//! entries.

use crate::store::VarStore;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One token of a compiled expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprToken {
    /// Identifier: a variable or function name. Dots are allowed so
    /// namespaced store keys (`quest.stage`) tokenize as one name.
    Ident(String),
    /// Integer literal.
    Int(i64),
    /// Floating-point literal.
    Float(f64),
    /// String literal, quotes removed and escapes processed.
    Str(String),
    /// Operator or punctuation (`=`, `==`, `+=`, `(`, `,`, `;`, ...).
    Op(String),
}

/// A compiled expression fragment: the token list handed to the evaluator,
/// plus the original source text for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledExpr {
    /// Original source text of the fragment.
    pub source: String,
    /// The pre-compiled token list.
    pub tokens: Vec<ExprToken>,
}

impl CompiledExpr {
    /// Tokenize an expression source fragment.
    pub fn compile(source: &str) -> Self {
        Self {
            source: source.to_string(),
            tokens: tokenize(source),
        }
    }

    /// Whether the fragment compiled to no tokens at all.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Result of evaluating a compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    /// The value the expression produced.
    pub value: Value,
    /// True if the expression executed a `return` statement. The engine
    /// treats this as the end of the current narrative thread.
    pub returned: bool,
}

impl EvalOutcome {
    /// An ordinary (non-returning) outcome.
    pub fn of(value: Value) -> Self {
        Self {
            value,
            returned: false,
        }
    }

    /// An outcome produced by a `return` statement.
    pub fn returning(value: Value) -> Self {
        Self {
            value,
            returned: true,
        }
    }
}

/// Function dispatch interface handed to the evaluator.
///
/// Returns `None` when no registered function answers to the name; the
/// evaluator then treats the call result as [`Value::Unknown`].
pub trait FnDispatch {
    /// Invoke the named function with already-evaluated arguments.
    fn call(&mut self, name: &str, args: &[Value], store: &mut dyn VarStore) -> Option<Value>;
}

/// A dispatcher with no functions registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFns;

impl FnDispatch for NoFns {
    fn call(&mut self, _name: &str, _args: &[Value], _store: &mut dyn VarStore) -> Option<Value> {
        None
    }
}

/// The external expression evaluator.
pub trait Evaluator {
    /// Execute a compiled expression against the store, dispatching any
    /// function calls through `fns`.
    fn eval(
        &self,
        expr: &CompiledExpr,
        store: &mut dyn VarStore,
        fns: &mut dyn FnDispatch,
    ) -> EvalOutcome;
}

/// A host-registered native function callable from script expressions.
pub trait NativeFn {
    /// Whether this entry answers to the given function name.
    fn can_handle(&self, name: &str) -> bool;

    /// Invoke the function.
    fn call(&mut self, name: &str, args: &[Value], store: &mut dyn VarStore) -> Value;
}

/// Two-character operators, checked before single characters.
const DOUBLE_OPS: &[&str] = &["==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "&&", "||"];

/// Single-character operators and punctuation.
const SINGLE_OPS: &[char] = &[
    '=', '+', '-', '*', '/', '%', '<', '>', '!', '(', ')', ',', ';',
];

fn tokenize(source: &str) -> Vec<ExprToken> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut s = String::new();
            let mut escaped = false;
            for (_, sc) in chars.by_ref() {
                if escaped {
                    s.push(match sc {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    escaped = false;
                } else if sc == '\\' {
                    escaped = true;
                } else if sc == '"' {
                    break;
                } else {
                    s.push(sc);
                }
            }
            tokens.push(ExprToken::Str(s));
            continue;
        }

        if c.is_ascii_digit() {
            let mut end = i;
            let mut is_float = false;
            while let Some(&(j, d)) = chars.peek() {
                if d.is_ascii_digit() {
                    end = j + d.len_utf8();
                    chars.next();
                } else if d == '.' && !is_float {
                    // only a decimal point when a digit follows
                    let mut ahead = chars.clone();
                    ahead.next();
                    match ahead.peek() {
                        Some(&(_, n)) if n.is_ascii_digit() => {
                            is_float = true;
                            end = j + 1;
                            chars.next();
                        }
                        _ => break,
                    }
                } else {
                    break;
                }
            }
            let text = &source[i..end];
            if is_float {
                if let Ok(f) = text.parse::<f64>() {
                    tokens.push(ExprToken::Float(f));
                }
            } else if let Ok(n) = text.parse::<i64>() {
                tokens.push(ExprToken::Int(n));
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut end = i;
            while let Some(&(j, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' || d == '.' {
                    end = j + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let word = &source[i..end];
            match word {
                "true" => tokens.push(ExprToken::Int(1)),
                "false" => tokens.push(ExprToken::Int(0)),
                _ => tokens.push(ExprToken::Ident(word.to_string())),
            }
            continue;
        }

        // operators: try the two-character forms first
        let rest = &source[i..];
        if let Some(op) = DOUBLE_OPS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(ExprToken::Op((*op).to_string()));
            chars.next();
            chars.next();
            continue;
        }
        if SINGLE_OPS.contains(&c) {
            tokens.push(ExprToken::Op(c.to_string()));
            chars.next();
            continue;
        }

        // unrecognized character: skip it
        chars.next();
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_assignment() {
        let expr = CompiledExpr::compile("myVar = 1 + 2");
        assert_eq!(
            expr.tokens,
            vec![
                ExprToken::Ident("myVar".into()),
                ExprToken::Op("=".into()),
                ExprToken::Int(1),
                ExprToken::Op("+".into()),
                ExprToken::Int(2),
            ]
        );
    }

    #[test]
    fn tokenize_compound_assignment() {
        let expr = CompiledExpr::compile("x += 3;");
        assert_eq!(
            expr.tokens,
            vec![
                ExprToken::Ident("x".into()),
                ExprToken::Op("+=".into()),
                ExprToken::Int(3),
                ExprToken::Op(";".into()),
            ]
        );
    }

    #[test]
    fn tokenize_call() {
        let expr = CompiledExpr::compile("greet(\"Mara\", 2)");
        assert_eq!(
            expr.tokens,
            vec![
                ExprToken::Ident("greet".into()),
                ExprToken::Op("(".into()),
                ExprToken::Str("Mara".into()),
                ExprToken::Op(",".into()),
                ExprToken::Int(2),
                ExprToken::Op(")".into()),
            ]
        );
    }

    #[test]
    fn tokenize_floats_and_dots() {
        let expr = CompiledExpr::compile("quest.stage > 1.5");
        assert_eq!(
            expr.tokens,
            vec![
                ExprToken::Ident("quest.stage".into()),
                ExprToken::Op(">".into()),
                ExprToken::Float(1.5),
            ]
        );
    }

    #[test]
    fn tokenize_booleans_as_ints() {
        let expr = CompiledExpr::compile("flag = true");
        assert_eq!(expr.tokens[2], ExprToken::Int(1));
    }

    #[test]
    fn tokenize_string_escapes() {
        let expr = CompiledExpr::compile(r#""a\nb""#);
        assert_eq!(expr.tokens, vec![ExprToken::Str("a\nb".into())]);
    }

    #[test]
    fn empty_compiles_empty() {
        assert!(CompiledExpr::compile("   ").is_empty());
    }
}
