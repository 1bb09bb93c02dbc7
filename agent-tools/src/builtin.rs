//! Utility tools that ship with every backend: clock and calculator.

use agent_primitives::{ParamType, ParameterSpec, ToolDescriptor};
use chrono::Local;
use serde_json::{Map, Number, Value, json};

use crate::registry::{ToolError, ToolRegistry, ToolResult};

/// Name of the clock tool.
pub const CURRENT_TIME_TOOL: &str = "get_current_time";
/// Name of the calculator tool.
pub const CALCULATE_TOOL: &str = "calculate";
/// Backend name the built-in tools advertise.
pub const UTILITY_SERVER: &str = "utility";

/// Registers the built-in tools on `registry`.
///
/// # Errors
///
/// Returns [`ToolError::DuplicateTool`] when either name is already taken.
pub fn register_builtin_tools(registry: &ToolRegistry) -> ToolResult<()> {
    let [time, calc] = builtin_descriptors()?;
    registry.register_tool(time, |_: Map<String, Value>| async move { Ok(current_time()) })?;
    registry.register_tool(calc, |arguments: Map<String, Value>| async move {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let result = evaluate(expression).map_err(ToolError::execution)?;
        Ok(json!({ "expression": expression, "result": to_json_number(result) }))
    })?;
    Ok(())
}

/// Descriptors of the built-in tools, as they should appear in a catalog.
///
/// # Errors
///
/// Never fails in practice; the descriptors are static and valid.
pub fn builtin_descriptors() -> ToolResult<[ToolDescriptor; 2]> {
    let invalid = |err: agent_primitives::Error| ToolError::execution(err.to_string());
    let time = ToolDescriptor::builder(
        CURRENT_TIME_TOOL,
        "Returns the current local date, time, weekday and timezone offset",
    )
    .server(UTILITY_SERVER)
    .category("utility")
    .keyword("time")
    .keyword("date")
    .keyword("clock")
    .keyword("today")
    .example("what time is it now")
    .example("what is today's date")
    .build()
    .map_err(invalid)?;

    let calc = ToolDescriptor::builder(
        CALCULATE_TOOL,
        "Evaluates an arithmetic expression with + - * / % ^, parentheses and abs, round, min, max, pow",
    )
    .server(UTILITY_SERVER)
    .category("utility")
    .keyword("math")
    .keyword("arithmetic")
    .keyword("calculator")
    .keyword("compute")
    .parameter(
        ParameterSpec::required("expression", ParamType::String)
            .with_description("Arithmetic expression, e.g. (3 + 4) * 2"),
    )
    .example("what is 12 times 7")
    .example("calculate 15% of 240")
    .build()
    .map_err(invalid)?;

    Ok([time, calc])
}

fn current_time() -> Value {
    let now = Local::now();
    json!({
        "datetime": now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "weekday": now.format("%A").to_string(),
        "timezone": now.format("%:z").to_string(),
    })
}

fn to_json_number(value: f64) -> Value {
    // exact integers print without a fractional part
    #[allow(clippy::cast_possible_truncation)]
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        return Value::Number(Number::from(value as i64));
    }
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Evaluates an arithmetic expression.
///
/// # Errors
///
/// Returns a message for syntax errors, unknown functions, division or
/// modulo by zero, and non-finite results.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected `{token}`"));
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err("result is not a finite number".into())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Ident(name) => f.write_str(name),
            Self::Op(op) => write!(f, "{op}"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Comma => f.write_str(","),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number `{literal}`"))?;
                tokens.push(Token::Num(value));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Op('^'));
                i += 2;
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(format!("unexpected character `{other}`")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr := term (("+" | "-") term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            if self.eat(&Token::Op('+')) {
                value += self.term()?;
            } else if self.eat(&Token::Op('-')) {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    // term := unary (("*" | "/" | "%") unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            if self.eat(&Token::Op('*')) {
                value *= self.unary()?;
            } else if self.eat(&Token::Op('/')) {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("division by zero".into());
                }
                value /= rhs;
            } else if self.eat(&Token::Op('%')) {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("modulo by zero".into());
                }
                value = value.rem_euclid(rhs);
            } else {
                return Ok(value);
            }
        }
    }

    // unary := ("-" | "+") unary | power
    fn unary(&mut self) -> Result<f64, String> {
        if self.eat(&Token::Op('-')) {
            return Ok(-self.unary()?);
        }
        if self.eat(&Token::Op('+')) {
            return self.unary();
        }
        self.power()
    }

    // power := atom ("^" unary)?, right-associative
    fn power(&mut self) -> Result<f64, String> {
        let base = self.atom()?;
        if self.eat(&Token::Op('^')) {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expr()?;
                if self.eat(&Token::RParen) {
                    Ok(value)
                } else {
                    Err("missing `)`".into())
                }
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "pi" => Ok(std::f64::consts::PI),
                "e" => Ok(std::f64::consts::E),
                _ => {
                    let args = self.call_args(&name)?;
                    apply(&name, &args)
                }
            },
            Some(token) => Err(format!("unexpected `{token}`")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn call_args(&mut self, name: &str) -> Result<Vec<f64>, String> {
        if !self.eat(&Token::LParen) {
            return Err(format!("unknown name `{name}`"));
        }
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            return Err(format!("expected `,` or `)` in call to `{name}`"));
        }
    }
}

fn apply(name: &str, args: &[f64]) -> Result<f64, String> {
    let arity = |expected: &str| format!("`{name}` expects {expected} argument(s), got {}", args.len());
    match (name, args) {
        ("abs", [x]) => Ok(x.abs()),
        ("round", [x]) => Ok(x.round()),
        ("round", [x, digits]) => {
            let factor = 10_f64.powf(digits.trunc());
            Ok((x * factor).round() / factor)
        }
        ("pow", [base, exponent]) => Ok(base.powf(*exponent)),
        ("min", [first, rest @ ..]) => Ok(rest.iter().copied().fold(*first, f64::min)),
        ("max", [first, rest @ ..]) => Ok(rest.iter().copied().fold(*first, f64::max)),
        ("abs", _) => Err(arity("1")),
        ("round", _) => Err(arity("1 or 2")),
        ("pow", _) => Err(arity("2")),
        ("min" | "max", _) => Err(arity("at least 1")),
        _ => Err(format!("unknown function `{name}`")),
    }
}
