//! Expression evaluator tool
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary ('^' unary)?
//! primary := number | '(' expr ')'
//! ```
//!
//! `^` is right-associative and binds tighter than unary minus, so `-2^2`
//! is `-4`.

use super::calculator::number_value;
use super::{parse_input, Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::iter::Peekable;
use std::str::Chars;

const MAX_EXPRESSION_LEN: usize = 1000;
const MAX_DEPTH: usize = 64;

/// Arithmetic expression evaluator
pub struct EvaluateMathTool;

#[derive(Debug, Deserialize)]
struct MathInput {
    expression: String,
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            depth: 0,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn descend(&mut self) -> Result<(), ToolError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ToolError::invalid_input("expression is nested too deeply"));
        }
        Ok(())
    }

    fn parse(mut self) -> Result<f64, ToolError> {
        let value = self.expr()?;
        match self.peek() {
            None => Ok(value),
            Some(c) => Err(ToolError::invalid_input(format!("unexpected character '{c}'"))),
        }
    }

    fn expr(&mut self) -> Result<f64, ToolError> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, ToolError> {
        let mut value = self.unary()?;
        loop {
            if self.eat('*') {
                value *= self.unary()?;
            } else if self.eat('/') {
                let divisor = self.unary()?;
                if divisor == 0.0 {
                    return Err(ToolError::execution("division by zero"));
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> Result<f64, ToolError> {
        self.descend()?;
        let value = if self.eat('-') {
            -self.unary()?
        } else if self.eat('+') {
            self.unary()?
        } else {
            self.power()?
        };
        self.depth -= 1;
        Ok(value)
    }

    fn power(&mut self) -> Result<f64, ToolError> {
        let base = self.primary()?;
        if self.eat('^') {
            let exponent = self.unary()?;
            Ok(base.powf(exponent))
        } else {
            Ok(base)
        }
    }

    fn primary(&mut self) -> Result<f64, ToolError> {
        match self.peek() {
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                if self.eat(')') {
                    Ok(value)
                } else {
                    Err(ToolError::invalid_input("missing closing parenthesis"))
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(ToolError::invalid_input(format!("unexpected character '{c}'"))),
            None => Err(ToolError::invalid_input("unexpected end of expression")),
        }
    }

    fn number(&mut self) -> Result<f64, ToolError> {
        let mut literal = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                literal.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        literal
            .parse::<f64>()
            .map_err(|_| ToolError::invalid_input(format!("invalid number '{literal}'")))
    }
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> Result<f64, ToolError> {
    if expression.trim().is_empty() {
        return Err(ToolError::invalid_input("expression is empty"));
    }
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(ToolError::invalid_input("expression is too long"));
    }
    let value = Parser::new(expression).parse()?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ToolError::execution("result is not a finite number"))
    }
}

#[async_trait]
impl Tool for EvaluateMathTool {
    fn name(&self) -> &'static str {
        "evaluate_math"
    }

    fn description(&self) -> String {
        "Evaluate an arithmetic expression. Supports + - * / ^, parentheses and unary minus, e.g. \"(3 + 4) * 2^3\".".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["expression"],
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The arithmetic expression to evaluate"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let input: MathInput = parse_input(input)?;
        let result = evaluate(&input.expression)?;
        Ok(json!({
            "expression": input.expression,
            "result": number_value(result),
        }))
    }
}
