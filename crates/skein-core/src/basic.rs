//! A small reference implementation of the expression evaluator.
//!
//! Covers the subset of the expression language that the tests, the demos,
//! and the CLI player need: assignment (plain and compound), arithmetic,
//! comparison, logical operators, function calls, and `return`. Statements
//! are separated by `;`. Hosts embedding the engine are expected to plug in
//! their own [`Evaluator`]; nothing in the engine depends on this one.

use crate::expr::{CompiledExpr, EvalOutcome, Evaluator, ExprToken, FnDispatch};
use crate::store::VarStore;
use crate::value::Value;

/// The reference evaluator. Stateless; one instance can serve any number
/// of scripts and stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEvaluator;

impl BasicEvaluator {
    /// Create a new evaluator.
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for BasicEvaluator {
    fn eval(
        &self,
        expr: &CompiledExpr,
        store: &mut dyn VarStore,
        fns: &mut dyn FnDispatch,
    ) -> EvalOutcome {
        let mut parser = Parser {
            tokens: &expr.tokens,
            pos: 0,
            store,
            fns,
        };
        parser.run()
    }
}

struct Parser<'a> {
    tokens: &'a [ExprToken],
    pos: usize,
    store: &'a mut dyn VarStore,
    fns: &'a mut dyn FnDispatch,
}

impl Parser<'_> {
    fn run(&mut self) -> EvalOutcome {
        let mut last = Value::Unknown;
        loop {
            while self.eat_op(";") {}
            if self.at_end() {
                break;
            }
            let before = self.pos;
            let outcome = self.statement();
            if outcome.returned {
                return outcome;
            }
            last = outcome.value;
            // a statement ends at `;` or the end of the token list;
            // skip anything a malformed statement left behind
            if self.pos == before {
                self.pos += 1;
            }
            while !self.at_end() && !self.eat_op(";") {
                self.pos += 1;
            }
        }
        EvalOutcome::of(last)
    }

    fn statement(&mut self) -> EvalOutcome {
        if let Some(ExprToken::Ident(name)) = self.peek() {
            if name == "return" {
                self.pos += 1;
                if self.at_end() || self.peek_op(";") {
                    return EvalOutcome::returning(Value::Unknown);
                }
                let value = self.expression();
                return EvalOutcome::returning(value);
            }
            // assignment: Ident followed by an assigning operator
            if let Some(ExprToken::Op(op)) = self.peek_at(1) {
                if matches!(op.as_str(), "=" | "+=" | "-=" | "*=" | "/=") {
                    let name = name.clone();
                    let op = op.clone();
                    self.pos += 2;
                    let rhs = self.expression();
                    let value = if op == "=" {
                        rhs
                    } else {
                        let current = self.store.get(&name).unwrap_or(Value::Int(0));
                        arith(&op[..1], current, rhs)
                    };
                    self.store.set(&name, value.clone());
                    return EvalOutcome::of(value);
                }
            }
        }
        EvalOutcome::of(self.expression())
    }

    fn expression(&mut self) -> Value {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Value {
        let mut left = self.and_expr();
        while self.eat_op("||") {
            let right = self.and_expr();
            left = Value::Int(i64::from(left.is_truthy() || right.is_truthy()));
        }
        left
    }

    fn and_expr(&mut self) -> Value {
        let mut left = self.equality();
        while self.eat_op("&&") {
            let right = self.equality();
            left = Value::Int(i64::from(left.is_truthy() && right.is_truthy()));
        }
        left
    }

    fn equality(&mut self) -> Value {
        let mut left = self.comparison();
        loop {
            let op = if self.eat_op("==") {
                "=="
            } else if self.eat_op("!=") {
                "!="
            } else {
                break;
            };
            let right = self.comparison();
            left = compare(op, left, right);
        }
        left
    }

    fn comparison(&mut self) -> Value {
        let mut left = self.additive();
        loop {
            let op = if self.eat_op("<=") {
                "<="
            } else if self.eat_op(">=") {
                ">="
            } else if self.eat_op("<") {
                "<"
            } else if self.eat_op(">") {
                ">"
            } else {
                break;
            };
            let right = self.additive();
            left = compare(op, left, right);
        }
        left
    }

    fn additive(&mut self) -> Value {
        let mut left = self.term();
        loop {
            let op = if self.eat_op("+") {
                "+"
            } else if self.eat_op("-") {
                "-"
            } else {
                break;
            };
            let right = self.term();
            left = arith(op, left, right);
        }
        left
    }

    fn term(&mut self) -> Value {
        let mut left = self.unary();
        loop {
            let op = if self.eat_op("*") {
                "*"
            } else if self.eat_op("/") {
                "/"
            } else if self.eat_op("%") {
                "%"
            } else {
                break;
            };
            let right = self.unary();
            left = arith(op, left, right);
        }
        left
    }

    fn unary(&mut self) -> Value {
        if self.eat_op("-") {
            let v = self.unary();
            return match v {
                Value::Float(f) => Value::Float(-f),
                other => Value::Int(-other.as_int()),
            };
        }
        if self.eat_op("!") {
            let v = self.unary();
            return Value::Int(i64::from(!v.is_truthy()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Value {
        match self.peek().cloned() {
            Some(ExprToken::Int(n)) => {
                self.pos += 1;
                Value::Int(n)
            }
            Some(ExprToken::Float(f)) => {
                self.pos += 1;
                Value::Float(f)
            }
            Some(ExprToken::Str(s)) => {
                self.pos += 1;
                Value::Str(s)
            }
            Some(ExprToken::Ident(name)) => {
                self.pos += 1;
                if self.peek_op("(") {
                    self.call(&name)
                } else {
                    self.store.get(&name).unwrap_or(Value::Unknown)
                }
            }
            Some(ExprToken::Op(op)) if op == "(" => {
                self.pos += 1;
                let v = self.expression();
                self.eat_op(")");
                v
            }
            _ => {
                // unusable token; consume it so parsing always advances
                self.pos += 1;
                Value::Unknown
            }
        }
    }

    fn call(&mut self, name: &str) -> Value {
        self.eat_op("(");
        let mut args = Vec::new();
        if !self.peek_op(")") && !self.at_end() {
            loop {
                args.push(self.expression());
                if !self.eat_op(",") {
                    break;
                }
            }
        }
        self.eat_op(")");
        self.fns
            .call(name, &args, self.store)
            .unwrap_or(Value::Unknown)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&ExprToken> {
        self.tokens.get(self.pos + offset)
    }

    fn peek_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(ExprToken::Op(o)) if o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.peek_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn arith(op: &str, left: Value, right: Value) -> Value {
    if op == "+" && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_))) {
        return Value::Str(format!("{}{}", left.as_text(), right.as_text()));
    }
    let as_float = matches!(left, Value::Float(_)) || matches!(right, Value::Float(_));
    if as_float {
        let (a, b) = (left.as_float(), right.as_float());
        Value::Float(match op {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            "/" if b != 0.0 => a / b,
            "%" if b != 0.0 => a % b,
            _ => 0.0,
        })
    } else {
        let (a, b) = (left.as_int(), right.as_int());
        Value::Int(match op {
            "+" => a.wrapping_add(b),
            "-" => a.wrapping_sub(b),
            "*" => a.wrapping_mul(b),
            "/" if b != 0 => a.wrapping_div(b),
            "%" if b != 0 => a.wrapping_rem(b),
            _ => 0,
        })
    }
}

fn compare(op: &str, left: Value, right: Value) -> Value {
    let result = if let (Value::Str(a), Value::Str(b)) = (&left, &right) {
        match op {
            "==" => a == b,
            "!=" => a != b,
            "<" => a < b,
            ">" => a > b,
            "<=" => a <= b,
            ">=" => a >= b,
            _ => false,
        }
    } else {
        let (a, b) = (left.as_float(), right.as_float());
        match op {
            "==" => a == b,
            "!=" => a != b,
            "<" => a < b,
            ">" => a > b,
            "<=" => a <= b,
            ">=" => a >= b,
            _ => false,
        }
    };
    Value::Int(i64::from(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NoFns;
    use crate::store::MemoryStore;

    fn eval_in(store: &mut MemoryStore, source: &str) -> EvalOutcome {
        let expr = CompiledExpr::compile(source);
        BasicEvaluator::new().eval(&expr, store, &mut NoFns)
    }

    #[test]
    fn assignment_writes_store() {
        let mut store = MemoryStore::new();
        eval_in(&mut store, "myVar = 1 + 2");
        assert_eq!(store.get_int("myVar"), 3);
    }

    #[test]
    fn compound_assignment() {
        let mut store = MemoryStore::new();
        eval_in(&mut store, "myVar = 1 + 2");
        eval_in(&mut store, "myVar += 3");
        assert_eq!(store.get_int("myVar"), 6);
    }

    #[test]
    fn multiple_statements() {
        let mut store = MemoryStore::new();
        eval_in(&mut store, "a = 2; b = a * 5;");
        assert_eq!(store.get_int("a"), 2);
        assert_eq!(store.get_int("b"), 10);
    }

    #[test]
    fn precedence() {
        let mut store = MemoryStore::new();
        assert_eq!(eval_in(&mut store, "2 + 3 * 4").value, Value::Int(14));
        assert_eq!(eval_in(&mut store, "(2 + 3) * 4").value, Value::Int(20));
    }

    #[test]
    fn float_promotion() {
        let mut store = MemoryStore::new();
        assert_eq!(eval_in(&mut store, "1 + 0.5").value, Value::Float(1.5));
    }

    #[test]
    fn comparisons_yield_ints() {
        let mut store = MemoryStore::new();
        assert_eq!(eval_in(&mut store, "3 > 2").value, Value::Int(1));
        assert_eq!(eval_in(&mut store, "3 < 2").value, Value::Int(0));
        assert_eq!(eval_in(&mut store, "2 == 2 && 1 < 3").value, Value::Int(1));
    }

    #[test]
    fn string_concat() {
        let mut store = MemoryStore::new();
        let v = eval_in(&mut store, "\"He\" + \"llo\"").value;
        assert_eq!(v, Value::Str("Hello".into()));
    }

    #[test]
    fn unknown_identifier_reads_unknown() {
        let mut store = MemoryStore::new();
        assert_eq!(eval_in(&mut store, "nothing").value, Value::Unknown);
    }

    #[test]
    fn bare_return() {
        let mut store = MemoryStore::new();
        let outcome = eval_in(&mut store, "return");
        assert!(outcome.returned);
        assert_eq!(outcome.value, Value::Unknown);
    }

    #[test]
    fn return_with_value_stops_execution() {
        let mut store = MemoryStore::new();
        let outcome = eval_in(&mut store, "return 5; x = 1");
        assert!(outcome.returned);
        assert_eq!(outcome.value, Value::Int(5));
        assert!(!store.contains("x"));
    }

    #[test]
    fn division_by_zero_is_zero() {
        let mut store = MemoryStore::new();
        assert_eq!(eval_in(&mut store, "4 / 0").value, Value::Int(0));
    }

    #[test]
    fn unary_operators() {
        let mut store = MemoryStore::new();
        assert_eq!(eval_in(&mut store, "-4 + 1").value, Value::Int(-3));
        assert_eq!(eval_in(&mut store, "!0").value, Value::Int(1));
    }

    #[test]
    fn call_dispatch() {
        struct Doubler;
        impl FnDispatch for Doubler {
            fn call(
                &mut self,
                name: &str,
                args: &[Value],
                _store: &mut dyn VarStore,
            ) -> Option<Value> {
                (name == "double").then(|| Value::Int(args[0].as_int() * 2))
            }
        }
        let mut store = MemoryStore::new();
        let expr = CompiledExpr::compile("x = double(21)");
        BasicEvaluator::new().eval(&expr, &mut store, &mut Doubler);
        assert_eq!(store.get_int("x"), 42);
    }

    #[test]
    fn unhandled_call_is_unknown() {
        let mut store = MemoryStore::new();
        assert_eq!(eval_in(&mut store, "nope()").value, Value::Unknown);
    }
}
