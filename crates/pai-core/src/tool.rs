//! Tool System
//!
//! Tools are local callables the model may ask to run. Each one carries a
//! descriptor with a JSON-Schema style parameter block that is embedded in
//! the capabilities banner. Registration happens once at startup through
//! an explicit registry; invocation never fails the caller, errors come back
//! as `{"error": ...}` values.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AgentError, Result};

/// Schema keys copied from a parameter definition into its property
const CONSTRAINT_KEYS: &[&str] = &[
    "enum",
    "minimum",
    "maximum",
    "minLength",
    "maxLength",
    "pattern",
    "format",
];

/// Declared parameter of a tool, before schema normalization
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamDef {
    pub param_type: String,
    pub description: Option<String>,
    /// A parameter without a default is required
    pub default: Option<Value>,
    pub constraints: Map<String, Value>,
}

impl ParamDef {
    pub fn new(param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            description: Some(description.into()),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }
}

/// One property inside a [`ParameterSchema`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `enum`, `minimum`, `maxLength`, ...
    #[serde(flatten)]
    pub constraints: Map<String, Value>,
}

/// `{"type": "object", "properties": {...}, "required": [...]}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            schema_type: "object".into(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

/// Build the parameter schema for a list of declared parameters.
///
/// `"numeric"` is normalized to `"number"`; a parameter is required iff it
/// has no default; only the recognized constraint keys are copied.
pub fn build_parameter_schema(params: &[(String, ParamDef)]) -> ParameterSchema {
    let mut schema = ParameterSchema::default();
    for (name, def) in params {
        let param_type = match def.param_type.as_str() {
            "numeric" => "number".to_string(),
            "" => "string".to_string(),
            other => other.to_string(),
        };
        let constraints = def
            .constraints
            .iter()
            .filter(|(key, _)| CONSTRAINT_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        schema.properties.insert(
            name.clone(),
            PropertySchema {
                param_type,
                description: def.description.clone(),
                constraints,
            },
        );
        if def.default.is_none() {
            schema.required.push(name.clone());
        }
    }
    schema
}

/// Descriptor embedded into prompts and session snapshots
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
    /// Declared defaults, applied before invocation
    #[serde(skip)]
    pub defaults: Map<String, Value>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        params: Vec<(String, ParamDef)>,
    ) -> Self {
        let defaults = params
            .iter()
            .filter_map(|(name, def)| def.default.clone().map(|d| (name.clone(), d)))
            .collect();
        Self {
            name: name.into(),
            description: description.into(),
            parameters: build_parameter_schema(&params),
            defaults,
        }
    }
}

/// Tool call parsed from model output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Result of one invocation, serialized exactly as embedded in follow-up prompts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCallResult {
    Success {
        func_name: String,
        func_args: Map<String, Value>,
        func_results: Value,
    },
    Failure {
        error: String,
    },
}

impl ToolCallResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Descriptor; read once at registration
    fn descriptor(&self) -> ToolDescriptor;

    /// Run with defaults already applied
    async fn call(&self, args: &Map<String, Value>) -> Result<Value>;
}

type ToolFn = dyn Fn(&Map<String, Value>) -> Result<Value> + Send + Sync;

/// Wraps a synchronous closure as a [`Tool`]
pub struct FnTool {
    descriptor: ToolDescriptor,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(descriptor: ToolDescriptor, func: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn call(&self, args: &Map<String, Value>) -> Result<Value> {
        (self.func)(args)
    }
}

struct Registered {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Registered>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a later registration under the same name replaces it
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor();
        tracing::debug!(tool = %descriptor.name, "Registered tool");
        self.tools
            .insert(descriptor.name.clone(), Registered { descriptor, tool });
    }

    /// Register a closure with its description and declared parameters
    pub fn register_fn<F>(
        &mut self,
        name: &str,
        description: &str,
        params: Vec<(String, ParamDef)>,
        func: F,
    ) where
        F: Fn(&Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(FnTool::new(
            ToolDescriptor::new(name, description, params),
            func,
        ));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| Arc::clone(&r.tool))
    }

    /// Descriptors of every tool, sorted by name
    pub fn describe_all(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|r| r.descriptor.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool. Unknown tools, missing arguments and tool failures come
    /// back as [`ToolCallResult::Failure`]; nothing is raised.
    pub async fn invoke(&self, name: &str, args: &Map<String, Value>) -> ToolCallResult {
        let Some(registered) = self.tools.get(name) else {
            tracing::error!(tool = name, "Tool not found");
            return ToolCallResult::failure(format!("Unknown tool: {name}"));
        };

        let mut effective = registered.descriptor.defaults.clone();
        effective.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(missing) = registered
            .descriptor
            .parameters
            .required
            .iter()
            .find(|p| !effective.contains_key(*p))
        {
            tracing::warn!(tool = name, param = %missing, "Missing required parameter");
            return ToolCallResult::failure(format!("Missing required parameter: {missing}"));
        }

        let args_value = Value::Object(args.clone());
        tracing::info!(tool = name, args = %args_value, "Executing tool");
        match registered.tool.call(&effective).await {
            Ok(func_results) => ToolCallResult::Success {
                func_name: name.to_string(),
                func_args: args.clone(),
                func_results,
            },
            Err(e) => {
                tracing::error!(tool = name, error = %e, "Tool failed");
                ToolCallResult::failure(e.to_string())
            }
        }
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// Register `sum2num`, `getlocalfile`, `datetime` and `calculate`
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Sum2NumTool);
    registry.register(GetLocalFileTool);
    registry.register(DateTimeTool);
    registry.register(CalculatorTool);
}

fn param(name: &str, def: ParamDef) -> (String, ParamDef) {
    (name.to_string(), def)
}

fn number_arg(args: &Map<String, Value>, key: &str) -> Result<Value> {
    match args.get(key) {
        Some(v @ Value::Number(_)) => Ok(v.clone()),
        Some(Value::String(s)) => serde_json::from_str::<serde_json::Number>(s.trim())
            .map(Value::Number)
            .map_err(|_| AgentError::InvalidArgument(format!("'{key}' must be a number, got \"{s}\""))),
        Some(other) => Err(AgentError::InvalidArgument(format!(
            "'{key}' must be a number, got {other}"
        ))),
        None => Err(AgentError::InvalidArgument(format!("missing '{key}'"))),
    }
}

/// Adds two numbers
pub struct Sum2NumTool;

#[async_trait]
impl Tool for Sum2NumTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "sum2num",
            "Adds 2 numbers",
            vec![
                param("a", ParamDef::new("number", "First number")),
                param("b", ParamDef::new("number", "Second number")),
            ],
        )
    }

    async fn call(&self, args: &Map<String, Value>) -> Result<Value> {
        let a = number_arg(args, "a")?;
        let b = number_arg(args, "b")?;
        if let Some(sum) = a.as_i64().zip(b.as_i64()).and_then(|(x, y)| x.checked_add(y)) {
            return Ok(json!(sum));
        }
        let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
        Ok(json!(x + y))
    }
}

/// Reads a local text file
pub struct GetLocalFileTool;

#[async_trait]
impl Tool for GetLocalFileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "getlocalfile",
            "Reads a local file and returns its content",
            vec![param(
                "file_path",
                ParamDef::new("string", "Path to the local file"),
            )],
        )
    }

    async fn call(&self, args: &Map<String, Value>) -> Result<Value> {
        let path = args
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidArgument("'file_path' must be a string".into()))?;
        // Read failures are reported to the model as the tool's output
        Ok(match tokio::fs::read_to_string(path).await {
            Ok(text) => Value::String(text),
            Err(e) => Value::String(format!("Error reading file: {e}")),
        })
    }
}

/// Current date and time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "datetime",
            "Get the current date and time (UTC)",
            vec![param(
                "format",
                ParamDef::new("string", "Output format: 'iso', 'human', or 'unix'")
                    .with_default(json!("human"))
                    .with_constraint("enum", json!(["iso", "human", "unix"])),
            )],
        )
    }

    async fn call(&self, args: &Map<String, Value>) -> Result<Value> {
        let now = chrono::Utc::now();
        let output = match args.get("format").and_then(Value::as_str).unwrap_or("human") {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            "human" => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
            other => {
                return Err(AgentError::InvalidArgument(format!(
                    "unknown datetime format '{other}'"
                )));
            }
        };
        Ok(Value::String(output))
    }
}

/// Evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "calculate",
            "Evaluate a mathematical expression",
            vec![param(
                "expression",
                ParamDef::new(
                    "string",
                    "Expression using + - * / ^ and parentheses (e.g. '(2 + 3) * 4')",
                ),
            )],
        )
    }

    async fn call(&self, args: &Map<String, Value>) -> Result<Value> {
        let expr = args
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidArgument("'expression' must be a string".into()))?;
        let result = evaluate_expression(expr).map_err(AgentError::InvalidArgument)?;
        Ok(json!(result))
    }
}

/// Deepest nesting of parentheses, signs and exponents `calculate` accepts
const MAX_EXPRESSION_DEPTH: usize = 256;

/// Recursive-descent evaluator: `expr := term (('+'|'-') term)*`,
/// `term := power (('*'|'/') power)*`, `power := unary ('^' power)?`.
fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let tokens: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if tokens.is_empty() {
        return Err("Empty expression".into());
    }
    let mut parser = ExprParser { tokens, pos: 0, depth: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("Unexpected '{}'", parser.tokens[parser.pos]));
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err("Result is not a finite number".into())
    }
}

struct ExprParser {
    tokens: Vec<char>,
    pos: usize,
    depth: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    /// Run one level of recursion, bounded by `MAX_EXPRESSION_DEPTH`
    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> std::result::Result<f64, String>,
    ) -> std::result::Result<f64, String> {
        if self.depth >= MAX_EXPRESSION_DEPTH {
            return Err("Expression nested too deeply".into());
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn expr(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.power()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.power()?;
            if op == '/' {
                if rhs == 0.0 {
                    return Err("Division by zero".into());
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.unary()?;
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.nested(Self::unary)?)
            }
            Some('+') => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            Some('(') => {
                self.pos += 1;
                let value = self.nested(Self::expr)?;
                if self.peek() != Some(')') {
                    return Err("Missing closing parenthesis".into());
                }
                self.pos += 1;
                Ok(value)
            }
            _ => self.number(),
        }
    }

    fn number(&mut self) -> std::result::Result<f64, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                Some(c) => format!("Unexpected '{c}'"),
                None => "Unexpected end of expression".into(),
            });
        }
        let text: String = self.tokens[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|e| format!("Parse error: {e}"))
    }
}
