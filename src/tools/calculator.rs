//! Calculator tool - basic arithmetic on two operands

use super::{parse_input, Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Calculator tool for two-operand arithmetic
pub struct CalculatorTool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalculatorInput {
    a: f64,
    b: f64,
    operation: Operation,
}

/// JSON number for a computed value, integral results as integers
#[allow(clippy::cast_possible_truncation)] // guarded by the range check
pub(crate) fn number_value(x: f64) -> Value {
    const MAX_SAFE_INT: f64 = 9_007_199_254_740_992.0;
    if x.fract() == 0.0 && x.abs() < MAX_SAFE_INT {
        json!(x as i64)
    } else {
        json!(x)
    }
}

fn compute(a: f64, b: f64, operation: Operation) -> Result<f64, ToolError> {
    let result = match operation {
        Operation::Add => a + b,
        Operation::Subtract => a - b,
        Operation::Multiply => a * b,
        Operation::Divide => {
            if b == 0.0 {
                return Err(ToolError::execution("division by zero"));
            }
            a / b
        }
    };
    if result.is_finite() {
        Ok(result)
    } else {
        Err(ToolError::execution("result is not a finite number"))
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn description(&self) -> String {
        "Perform a basic arithmetic operation on two numbers. Supported operations: add, subtract, multiply, divide.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["a", "b", "operation"],
            "properties": {
                "a": {"type": "number", "description": "First operand"},
                "b": {"type": "number", "description": "Second operand"},
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide"],
                    "description": "Operation to apply"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let input: CalculatorInput = parse_input(input)?;
        let result = compute(input.a, input.b, input.operation)?;
        Ok(json!({
            "a": number_value(input.a),
            "b": number_value(input.b),
            "operation": input.operation.as_str(),
            "result": number_value(result),
        }))
    }
}
