//! The reference evaluator: an ecmascript-like expression subset.
//!
//! [`BasicEvaluator`] covers the expression shapes typical charts use for
//! guards and value expressions:
//!
//! - literals: numbers, single/double-quoted strings, `true`, `false`,
//!   `null`, `undefined`, array (`[…]`) and object (`{…}`) literals;
//! - data-store access: bare root names, dotted member access, bracketed
//!   access (`user['name']`, `xs[0]`), and the reserved `_event` root;
//! - operators, by falling precedence: unary `!`/`-`, then `* / %`,
//!   `+ -`, `< <= > >=`, `== != === !==`, `&&`, `||`;
//! - `Date.now()` returning milliseconds since the Unix epoch.
//!
//! Anything outside the subset is a syntax or type error, which the
//! executing layer traps into a platform error event. Assignment and
//! statement forms are deliberately absent — mutation goes through
//! `<assign>`, not through expressions.

use super::{is_truthy, EvalError, ExpressionEvaluator};
use crate::datamodel::DataStore;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Number, Value};

/// The built-in ecmascript-like evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEvaluator;

#[async_trait]
impl ExpressionEvaluator for BasicEvaluator {
    async fn evaluate(&self, expr: &str, store: &DataStore) -> Result<Value, EvalError> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            store,
        };
        let value = parser.expression()?;
        parser.expect_end()?;
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!", "(",
    ")", "[", "]", "{", "}", ",", ":", ".",
];

fn tokenize(src: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    'outer: while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch == quote {
                    i += 1;
                    tokens.push(Token::Str(s));
                    continue 'outer;
                }
                if ch == '\\' && i + 1 < bytes.len() {
                    i += 1;
                    s.push(bytes[i] as char);
                } else {
                    s.push(ch);
                }
                i += 1;
            }
            return Err(EvalError::Syntax(format!("unterminated string in '{src}'")));
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.') {
                // A dot only continues the number when a digit follows.
                if bytes[i] == b'.'
                    && !(i + 1 < bytes.len() && (bytes[i + 1] as char).is_ascii_digit())
                {
                    break;
                }
                i += 1;
            }
            let text = &src[start..i];
            let n: f64 = text
                .parse()
                .map_err(|_| EvalError::Syntax(format!("bad number '{text}'")))?;
            tokens.push(Token::Num(n));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(src[start..i].to_string()));
            continue;
        }
        for punct in PUNCTS {
            if src[i..].starts_with(punct) {
                tokens.push(Token::Punct(punct));
                i += punct.len();
                continue 'outer;
            }
        }
        return Err(EvalError::Syntax(format!("unexpected character '{c}' in '{src}'")));
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    store: &'a DataStore,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(q)) if *q == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), EvalError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(EvalError::Syntax(format!("expected '{p}'")))
        }
    }

    fn expect_end(&self) -> Result<(), EvalError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(EvalError::Syntax("trailing tokens after expression".to_string()))
        }
    }

    fn expression(&mut self) -> Result<Value, EvalError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.and_expr()?;
        while self.eat_punct("||") {
            let right = self.and_expr()?;
            if !is_truthy(&left) {
                left = right;
            }
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.eq_expr()?;
        while self.eat_punct("&&") {
            let right = self.eq_expr()?;
            if is_truthy(&left) {
                left = right;
            }
        }
        Ok(left)
    }

    fn eq_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.rel_expr()?;
        loop {
            if self.eat_punct("==") || self.eat_punct("===") {
                let right = self.rel_expr()?;
                left = Value::Bool(loose_eq(&left, &right));
            } else if self.eat_punct("!=") || self.eat_punct("!==") {
                let right = self.rel_expr()?;
                left = Value::Bool(!loose_eq(&left, &right));
            } else {
                return Ok(left);
            }
        }
    }

    fn rel_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.add_expr()?;
        loop {
            let op = if self.eat_punct("<=") {
                "<="
            } else if self.eat_punct(">=") {
                ">="
            } else if self.eat_punct("<") {
                "<"
            } else if self.eat_punct(">") {
                ">"
            } else {
                return Ok(left);
            };
            let right = self.add_expr()?;
            left = Value::Bool(compare(&left, &right, op)?);
        }
    }

    fn add_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.mul_expr()?;
        loop {
            if self.eat_punct("+") {
                let right = self.mul_expr()?;
                left = add(&left, &right)?;
            } else if self.eat_punct("-") {
                let right = self.mul_expr()?;
                left = numeric(&left, &right, "-", |a, b| a - b)?;
            } else {
                return Ok(left);
            }
        }
    }

    fn mul_expr(&mut self) -> Result<Value, EvalError> {
        let mut left = self.unary_expr()?;
        loop {
            if self.eat_punct("*") {
                let right = self.unary_expr()?;
                left = numeric(&left, &right, "*", |a, b| a * b)?;
            } else if self.eat_punct("/") {
                let right = self.unary_expr()?;
                left = numeric(&left, &right, "/", |a, b| a / b)?;
            } else if self.eat_punct("%") {
                let right = self.unary_expr()?;
                left = numeric(&left, &right, "%", |a, b| a % b)?;
            } else {
                return Ok(left);
            }
        }
    }

    fn unary_expr(&mut self) -> Result<Value, EvalError> {
        if self.eat_punct("!") {
            let v = self.unary_expr()?;
            return Ok(Value::Bool(!is_truthy(&v)));
        }
        if self.eat_punct("-") {
            let v = self.unary_expr()?;
            let n = as_number(&v).ok_or_else(|| EvalError::Type("cannot negate non-number".to_string()))?;
            return Ok(number(-n));
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> Result<Value, EvalError> {
        let mut base = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let Some(Token::Ident(name)) = self.next() else {
                    return Err(EvalError::Syntax("expected member name after '.'".to_string()));
                };
                if self.eat_punct("(") {
                    base = self.call(&base, &name)?;
                } else {
                    base = member(&base, &name)?;
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                base = indexed(&base, &index)?;
            } else {
                return Ok(base);
            }
        }
    }

    /// The only supported callee is `Date.now()`.
    fn call(&mut self, base: &Value, name: &str) -> Result<Value, EvalError> {
        self.expect_punct(")")?;
        match (base, name) {
            (Value::String(obj), "now") if obj == "\u{0}Date" => {
                Ok(json!(Utc::now().timestamp_millis()))
            }
            _ => Err(EvalError::Type(format!("'{name}' is not a supported function"))),
        }
    }

    fn primary(&mut self) -> Result<Value, EvalError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(number(n)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Punct("(")) => {
                let v = self.expression()?;
                self.expect_punct(")")?;
                Ok(v)
            }
            Some(Token::Punct("[")) => {
                let mut items = Vec::new();
                if !self.eat_punct("]") {
                    loop {
                        items.push(self.expression()?);
                        if self.eat_punct("]") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Value::Array(items))
            }
            Some(Token::Punct("{")) => {
                let mut map = Map::new();
                if !self.eat_punct("}") {
                    loop {
                        let key = match self.next() {
                            Some(Token::Ident(k)) => k,
                            Some(Token::Str(k)) => k,
                            _ => return Err(EvalError::Syntax("expected object key".to_string())),
                        };
                        self.expect_punct(":")?;
                        map.insert(key, self.expression()?);
                        if self.eat_punct("}") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Value::Object(map))
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" | "undefined" => Ok(Value::Null),
                // Sentinel value consumed by `call`; `Date` alone has no
                // other meaning in the subset.
                "Date" => Ok(Value::String("\u{0}Date".to_string())),
                _ => self
                    .store
                    .root(&name)
                    .cloned()
                    .ok_or(EvalError::UnknownIdentifier(name)),
            },
            other => Err(EvalError::Syntax(format!("unexpected token {other:?}"))),
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        json!(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn member(base: &Value, name: &str) -> Result<Value, EvalError> {
    match base {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(json!(items.len())),
        Value::String(s) if name == "length" => Ok(json!(s.chars().count())),
        Value::Null => Err(EvalError::Type(format!(
            "cannot read property '{name}' of null"
        ))),
        _ => Ok(Value::Null),
    }
}

fn indexed(base: &Value, index: &Value) -> Result<Value, EvalError> {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_u64()
                .ok_or_else(|| EvalError::Type("array index must be a non-negative integer".to_string()))?;
            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Null, _) => Err(EvalError::Type("cannot index null".to_string())),
        _ => Ok(Value::Null),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_number(a) == as_number(b),
        (Value::Number(_), Value::Bool(_)) | (Value::Bool(_), Value::Number(_)) => {
            as_number(a) == as_number(b)
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value, op: &str) -> Result<bool, EvalError> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Ok(match op {
            "<" => x < y,
            "<=" => x <= y,
            ">" => x > y,
            _ => x >= y,
        });
    }
    let (x, y) = match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(EvalError::Type(format!(
                "cannot compare {a} {op} {b}"
            )))
        }
    };
    Ok(match op {
        "<" => x < y,
        "<=" => x <= y,
        ">" => x > y,
        _ => x >= y,
    })
}

fn add(a: &Value, b: &Value) -> Result<Value, EvalError> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return Ok(number(x + y));
    }
    match (a, b) {
        (Value::String(x), _) => Ok(Value::String(format!("{x}{}", stringify(b)))),
        (_, Value::String(y)) => Ok(Value::String(format!("{}{y}", stringify(a)))),
        _ => Err(EvalError::Type(format!("cannot add {a} + {b}"))),
    }
}

fn numeric(a: &Value, b: &Value, op: &str, f: impl Fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => Ok(number(f(x, y))),
        _ => Err(EvalError::Type(format!("cannot apply '{op}' to {a} and {b}"))),
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
