//! Sandboxed filter expressions for webhook rules
//!
//! A deterministic, side-effect-free evaluator over the request `body` and
//! `headers`. Supported surface: field paths, string/number/bool/null
//! literals, `==` `!=`, `in [..]`, `has(path)`, `contains`, `startsWith`,
//! `endsWith`, `matches` (regex), `!`, `&&`, `||` and parentheses. Nothing
//! else: no arithmetic, no calls into the host, no I/O.
//!
//! Compiled expressions are cached per expression text.

use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::tasks::types::{Error, Result};

lazy_static! {
    static ref COMPILED: DashMap<String, Arc<Expr>> = DashMap::new();
    static ref REGEXES: DashMap<String, Regex> = DashMap::new();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    Has(Vec<String>),
    Contains(Box<Expr>, Box<Expr>),
    StartsWith(Box<Expr>, Box<Expr>),
    EndsWith(Box<Expr>, Box<Expr>),
    Matches(Box<Expr>, String),
}

/// Compile an expression, hitting the per-text cache.
pub fn compile(text: &str) -> Result<Arc<Expr>> {
    if let Some(cached) = COMPILED.get(text) {
        return Ok(cached.clone());
    }
    let expr = Arc::new(parse(text)?);
    COMPILED.insert(text.to_string(), expr.clone());
    Ok(expr)
}

/// Compile (cached) and evaluate against the request data.
pub fn evaluate(text: &str, data: &Value) -> Result<bool> {
    let expr = compile(text)?;
    Ok(is_truthy(&eval(&expr, data)?))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn lookup<'a>(data: &'a Value, path: &[String]) -> &'a Value {
    let mut current = data;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment).unwrap_or(&Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn as_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn eval(expr: &Expr, data: &Value) -> Result<Value> {
    Ok(match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(path) => lookup(data, path).clone(),
        Expr::Not(inner) => Value::Bool(!is_truthy(&eval(inner, data)?)),
        Expr::And(left, right) => {
            Value::Bool(is_truthy(&eval(left, data)?) && is_truthy(&eval(right, data)?))
        }
        Expr::Or(left, right) => {
            Value::Bool(is_truthy(&eval(left, data)?) || is_truthy(&eval(right, data)?))
        }
        Expr::Eq(left, right) => {
            Value::Bool(values_equal(&eval(left, data)?, &eval(right, data)?))
        }
        Expr::Ne(left, right) => {
            Value::Bool(!values_equal(&eval(left, data)?, &eval(right, data)?))
        }
        Expr::In(needle, haystack) => {
            let needle = eval(needle, data)?;
            let mut found = false;
            for candidate in haystack {
                if values_equal(&needle, &eval(candidate, data)?) {
                    found = true;
                    break;
                }
            }
            Value::Bool(found)
        }
        Expr::Has(path) => Value::Bool(!lookup(data, path).is_null()),
        Expr::Contains(haystack, needle) => {
            let haystack = eval(haystack, data)?;
            let needle = eval(needle, data)?;
            let result = match (&haystack, &needle) {
                (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
                (Value::Array(items), _) => items.iter().any(|i| values_equal(i, &needle)),
                _ => false,
            };
            Value::Bool(result)
        }
        Expr::StartsWith(subject, prefix) => {
            let subject = eval(subject, data)?;
            let prefix = eval(prefix, data)?;
            Value::Bool(matches!(
                (as_str(&subject), as_str(&prefix)),
                (Some(s), Some(p)) if s.starts_with(p)
            ))
        }
        Expr::EndsWith(subject, suffix) => {
            let subject = eval(subject, data)?;
            let suffix = eval(suffix, data)?;
            Value::Bool(matches!(
                (as_str(&subject), as_str(&suffix)),
                (Some(s), Some(p)) if s.ends_with(p)
            ))
        }
        Expr::Matches(subject, pattern) => {
            let subject = eval(subject, data)?;
            let regex = cached_regex(pattern)?;
            Value::Bool(as_str(&subject).is_some_and(|s| regex.is_match(s)))
        }
    })
}

fn cached_regex(pattern: &str) -> Result<Regex> {
    if let Some(regex) = REGEXES.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(pattern)
        .map_err(|e| Error::FilterError(format!("invalid regex {pattern:?}: {e}")))?;
    REGEXES.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

// Tokenizer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Sym(&'static str),
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' | ')' | '[' | ']' | ',' | '.' => {
                tokens.push(Token::Sym(match c {
                    '(' => "(",
                    ')' => ")",
                    '[' => "[",
                    ']' => "]",
                    ',' => ",",
                    _ => ".",
                }));
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Sym("=="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Sym("!="));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Sym("!"));
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Sym("&&"));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Sym("||"));
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                value.push(escaped);
                                i += 2;
                            } else {
                                return Err(Error::FilterError(
                                    "dangling escape in string literal".to_string(),
                                ));
                            }
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(Error::FilterError(
                                "unterminated string literal".to_string(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let num = raw
                    .parse::<f64>()
                    .map_err(|_| Error::FilterError(format!("bad number literal {raw:?}")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::FilterError(format!(
                    "unexpected character {other:?} in filter"
                )));
            }
        }
    }
    Ok(tokens)
}

// Recursive-descent parser

/// Parse an expression into its AST.
pub fn parse(text: &str) -> Result<Expr> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(Error::FilterError("empty filter expression".to_string()));
    }
    let mut state = ParseState { tokens, pos: 0 };
    let expr = state.or_expr()?;
    if state.pos != state.tokens.len() {
        return Err(Error::FilterError(format!(
            "trailing tokens after expression (at token {})",
            state.pos
        )));
    }
    Ok(expr)
}

struct ParseState {
    tokens: Vec<Token>,
    pos: usize,
}

impl ParseState {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_sym(&mut self, sym: &'static str) -> Result<()> {
        match self.bump() {
            Some(Token::Sym(s)) if s == sym => Ok(()),
            other => Err(Error::FilterError(format!(
                "expected {sym:?}, found {other:?}"
            ))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Sym("||")) {
            self.bump();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.unary_expr()?;
        while self.peek() == Some(&Token::Sym("&&")) {
            self.bump();
            let right = self.unary_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Sym("!")) {
            self.bump();
            let inner = self.unary_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.term()?;
        match self.peek() {
            Some(Token::Sym("==")) => {
                self.bump();
                let right = self.term()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Token::Sym("!=")) => {
                self.bump();
                let right = self.term()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            Some(Token::Ident(ident)) if ident == "in" => {
                self.bump();
                self.expect_sym("[")?;
                let mut items = Vec::new();
                if self.peek() != Some(&Token::Sym("]")) {
                    loop {
                        items.push(self.term()?);
                        match self.peek() {
                            Some(Token::Sym(",")) => {
                                self.bump();
                            }
                            _ => break,
                        }
                    }
                }
                self.expect_sym("]")?;
                Ok(Expr::In(Box::new(left), items))
            }
            _ => Ok(left),
        }
    }

    fn term(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(serde_json::json!(n))),
            Some(Token::Sym("(")) => {
                let inner = self.or_expr()?;
                self.expect_sym(")")?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "has" => {
                    self.expect_sym("(")?;
                    let path = self.path_segments()?;
                    self.expect_sym(")")?;
                    Ok(Expr::Has(path))
                }
                "contains" | "startsWith" | "endsWith" => {
                    self.expect_sym("(")?;
                    let first = self.term()?;
                    self.expect_sym(",")?;
                    let second = self.term()?;
                    self.expect_sym(")")?;
                    Ok(match ident.as_str() {
                        "contains" => Expr::Contains(Box::new(first), Box::new(second)),
                        "startsWith" => Expr::StartsWith(Box::new(first), Box::new(second)),
                        _ => Expr::EndsWith(Box::new(first), Box::new(second)),
                    })
                }
                "matches" => {
                    self.expect_sym("(")?;
                    let subject = self.term()?;
                    self.expect_sym(",")?;
                    let pattern = match self.bump() {
                        Some(Token::Str(pattern)) => pattern,
                        other => {
                            return Err(Error::FilterError(format!(
                                "matches() needs a string pattern, found {other:?}"
                            )));
                        }
                    };
                    self.expect_sym(")")?;
                    // Compile now so bad patterns fail at compile time
                    cached_regex(&pattern)?;
                    Ok(Expr::Matches(Box::new(subject), pattern))
                }
                _ => {
                    // A field path rooted at this identifier
                    let mut path = vec![ident];
                    path.extend(self.path_tail()?);
                    Ok(Expr::Path(path))
                }
            },
            other => Err(Error::FilterError(format!(
                "unexpected token {other:?} in filter"
            ))),
        }
    }

    fn path_segments(&mut self) -> Result<Vec<String>> {
        match self.bump() {
            Some(Token::Ident(root)) => {
                let mut path = vec![root];
                path.extend(self.path_tail()?);
                Ok(path)
            }
            other => Err(Error::FilterError(format!(
                "expected a field path, found {other:?}"
            ))),
        }
    }

    fn path_tail(&mut self) -> Result<Vec<String>> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Sym(".")) => {
                    self.bump();
                    match self.bump() {
                        Some(Token::Ident(segment)) => segments.push(segment),
                        other => {
                            return Err(Error::FilterError(format!(
                                "expected a field after '.', found {other:?}"
                            )));
                        }
                    }
                }
                Some(Token::Sym("[")) => {
                    // Only string subscripts: headers["x-github-event"]
                    let checkpoint = self.pos;
                    self.bump();
                    match self.bump() {
                        Some(Token::Str(key)) => {
                            self.expect_sym("]")?;
                            segments.push(key);
                        }
                        Some(Token::Num(index)) if index.fract() == 0.0 && index >= 0.0 => {
                            self.expect_sym("]")?;
                            segments.push((index as u64).to_string());
                        }
                        _ => {
                            // Not a subscript (e.g. the list of an `in`)
                            self.pos = checkpoint;
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        json!({
            "body": {
                "action": "opened",
                "number": 42,
                "draft": false,
                "labels": ["bug", "urgent"],
                "pull_request": {"title": "Fix flaky retry loop"},
            },
            "headers": {
                "x-github-event": "pull_request",
            },
        })
    }

    #[test]
    fn equality_on_fields() {
        assert!(evaluate("body.action == \"opened\"", &data()).unwrap());
        assert!(!evaluate("body.action == \"closed\"", &data()).unwrap());
        assert!(evaluate("body.action != \"closed\"", &data()).unwrap());
        assert!(evaluate("body.number == 42", &data()).unwrap());
    }

    #[test]
    fn header_subscript_access() {
        assert!(evaluate("headers[\"x-github-event\"] == \"pull_request\"", &data()).unwrap());
    }

    #[test]
    fn in_list() {
        assert!(evaluate("body.action in [\"opened\", \"reopened\"]", &data()).unwrap());
        assert!(!evaluate("body.action in [\"closed\"]", &data()).unwrap());
        assert!(!evaluate("body.action in []", &data()).unwrap());
    }

    #[test]
    fn logical_composition() {
        assert!(evaluate(
            "body.action == \"opened\" && headers[\"x-github-event\"] == \"pull_request\"",
            &data()
        )
        .unwrap());
        assert!(evaluate(
            "body.action == \"closed\" || body.number == 42",
            &data()
        )
        .unwrap());
        assert!(evaluate("!(body.draft)", &data()).unwrap());
        assert!(evaluate("!body.draft && body.number != 0", &data()).unwrap());
    }

    #[test]
    fn has_predicate() {
        assert!(evaluate("has(body.pull_request)", &data()).unwrap());
        assert!(!evaluate("has(body.issue)", &data()).unwrap());
        assert!(evaluate("has(headers)", &data()).unwrap());
    }

    #[test]
    fn string_matching() {
        assert!(evaluate("contains(body.pull_request.title, \"flaky\")", &data()).unwrap());
        assert!(evaluate("startsWith(body.pull_request.title, \"Fix\")", &data()).unwrap());
        assert!(evaluate("endsWith(body.pull_request.title, \"loop\")", &data()).unwrap());
        assert!(evaluate("matches(body.action, \"^open\")", &data()).unwrap());
        assert!(!evaluate("matches(body.action, \"closed$\")", &data()).unwrap());
    }

    #[test]
    fn contains_on_arrays() {
        assert!(evaluate("contains(body.labels, \"bug\")", &data()).unwrap());
        assert!(!evaluate("contains(body.labels, \"docs\")", &data()).unwrap());
    }

    #[test]
    fn missing_fields_are_null_and_falsy() {
        assert!(!evaluate("body.missing", &data()).unwrap());
        assert!(evaluate("body.missing == null", &data()).unwrap());
        assert!(!evaluate("body.missing.deeper == \"x\"", &data()).unwrap());
    }

    #[test]
    fn parse_errors_are_surfaced() {
        assert!(evaluate("", &data()).is_err());
        assert!(evaluate("body.action ==", &data()).is_err());
        assert!(evaluate("body.action == \"unterminated", &data()).is_err());
        assert!(evaluate("body.action @ \"opened\"", &data()).is_err());
        assert!(evaluate("matches(body.action, \"[\")", &data()).is_err());
        assert!(evaluate("body.action == \"x\" trailing", &data()).is_err());
    }

    #[test]
    fn compile_cache_returns_same_ast() {
        let a = compile("body.action == \"opened\"").unwrap();
        let b = compile("body.action == \"opened\"").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn number_equality_is_numeric() {
        let d = json!({"body": {"count": 2.0}});
        assert!(evaluate("body.count == 2", &d).unwrap());
    }
}
