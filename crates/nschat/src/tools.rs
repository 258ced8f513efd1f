//! Capability functions and their registry
//!
//! A `ToolItem` pairs the schema advertised to the completion service with the
//! function that implements it. Capabilities receive their arguments, a log
//! callback and a `ToolContext` giving them access to script execution, the
//! progress relays, the chat file store and the confirmation gate.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::confirm::ConfirmationGate;
use crate::errors::RegistryError;
use crate::kernel::runner::{ScriptHandlers, ScriptRunner};
use crate::models::tool::Tool;
use crate::providers::utils::is_valid_function_name;

pub mod compute;
pub mod data_url;
pub mod figure;

/// `(title, message)` log callback handed to every capability call
pub type LogFn = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type TextSink = Arc<dyn Fn(&str) + Send + Sync>;
/// `(name, content)` sink writing into the chat file store
pub type FileSink = Arc<dyn Fn(&str, &str) -> Result<()> + Send + Sync>;

/// The implementation behind a tool name
#[async_trait]
pub trait Capability: Send + Sync {
    /// Run the tool. Strings are returned to the model verbatim, any other
    /// value is serialized.
    async fn call(&self, args: Value, on_log_message: LogFn, ctx: ToolContext) -> Result<Value>;
}

struct FnCapability<F>(F);

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(Value, LogFn, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, args: Value, on_log_message: LogFn, ctx: ToolContext) -> Result<Value> {
        (self.0)(args, on_log_message, ctx).await
    }
}

/// Wrap an async closure as a capability
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn Capability>
where
    F: Fn(Value, LogFn, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnCapability(f))
}

/// A capability registration
#[derive(Clone)]
pub struct ToolItem {
    pub tool: Tool,
    /// Serial tools finish, in order, before any other tool of the batch starts
    pub serial: bool,
    /// Appended to the system prompt when present
    pub detailed_description: Option<String>,
    pub function: Arc<dyn Capability>,
}

impl ToolItem {
    pub fn new(tool: Tool, function: Arc<dyn Capability>) -> Self {
        Self {
            tool,
            serial: false,
            detailed_description: None,
            function,
        }
    }

    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    pub fn with_detailed_description<S: Into<String>>(mut self, description: S) -> Self {
        self.detailed_description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }
}

impl std::fmt::Debug for ToolItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolItem")
            .field("name", &self.tool.name)
            .field("serial", &self.serial)
            .finish()
    }
}

/// Tools keyed by name, in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    items: Vec<ToolItem>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, checking that its name and schema can be advertised to
    /// the completion service
    pub fn register(&mut self, item: ToolItem) -> Result<(), RegistryError> {
        let name = item.tool.name.clone();
        if !is_valid_function_name(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if self.index.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        validate_parameters(&name, &item.tool.parameters)?;

        self.index.insert(name, self.items.len());
        self.items.push(item);
        Ok(())
    }

    pub fn with(mut self, item: ToolItem) -> Result<Self, RegistryError> {
        self.register(item)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ToolItem> {
        self.index.get(name).map(|&i| &self.items[i])
    }

    pub fn items(&self) -> &[ToolItem] {
        &self.items
    }

    /// Schemas advertised to the completion service
    pub fn schemas(&self) -> Vec<Tool> {
        self.items.iter().map(|item| item.tool.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The script capabilities every chat starts with
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new()
            .with(compute::compute_script_tool())?
            .with(figure::figure_script_tool())
    }
}

fn validate_parameters(name: &str, parameters: &Value) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let object = parameters
        .as_object()
        .ok_or_else(|| invalid("parameters must be a JSON object"))?;
    if object.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("parameters must have type \"object\""));
    }
    if let Some(properties) = object.get("properties") {
        if !properties.is_object() {
            return Err(invalid("properties must be an object"));
        }
    }
    Ok(())
}

/// What a capability may reach while it runs. Every hook is optional; a
/// missing confirmation gate means scripts run without asking.
#[derive(Clone, Default)]
pub struct ToolContext {
    pub model_name: String,
    pub credentials: Option<String>,
    pub execute_script: Option<Arc<ScriptRunner>>,
    /// `(name, png data url)`
    pub on_add_image: Option<FileSink>,
    /// `(name, figure json)`
    pub on_add_figure_data: Option<FileSink>,
    pub on_stdout: Option<TextSink>,
    pub on_stderr: Option<TextSink>,
    pub confirm_okay_to_run: Option<Arc<ConfirmationGate>>,
}

impl ToolContext {
    pub fn new<S: Into<String>>(model_name: S) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    pub async fn execute_script(&self, script: &str, handlers: ScriptHandlers) -> Result<()> {
        let runner = self
            .execute_script
            .as_ref()
            .ok_or_else(|| anyhow!("Script execution is not available"))?;
        runner.execute(script, handlers).await?;
        Ok(())
    }

    pub async fn confirm_okay_to_run(&self, script: &str) -> Result<bool> {
        match &self.confirm_okay_to_run {
            Some(gate) => Ok(gate.confirm_okay_to_run(script).await?),
            None => Ok(true),
        }
    }

    pub fn stdout(&self, message: &str) {
        if let Some(sink) = &self.on_stdout {
            sink(message);
        }
    }

    pub fn stderr(&self, message: &str) {
        if let Some(sink) = &self.on_stderr {
            sink(message);
        }
    }

    pub fn add_image(&self, name: &str, data_url: &str) -> Result<()> {
        let sink = self
            .on_add_image
            .as_ref()
            .ok_or_else(|| anyhow!("Image output is not available"))?;
        sink(name, data_url)
    }

    pub fn add_figure_data(&self, name: &str, content: &str) -> Result<()> {
        let sink = self
            .on_add_figure_data
            .as_ref()
            .ok_or_else(|| anyhow!("Figure output is not available"))?;
        sink(name, content)
    }
}

/// Text of the `tool` response message for a capability result
pub fn render_response(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Schema shared by the script tools: a single required `script` string
pub(crate) fn script_parameters(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "script": {
                "type": "string",
                "description": description,
            }
        },
        "required": ["script"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Arc<dyn Capability> {
        from_fn(|args: Value, _log: LogFn, _ctx: ToolContext| async move { Ok(args) })
    }

    fn tool(name: &str) -> Tool {
        Tool::new(name, "test tool", json!({"type": "object", "properties": {}}))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ToolRegistry::new()
            .with(ToolItem::new(tool("first"), echo()).serial())
            .unwrap()
            .with(ToolItem::new(tool("second"), echo()))
            .unwrap();

        assert!(registry.get("first").unwrap().serial);
        assert!(!registry.get("second").unwrap().serial);
        assert!(registry.get("third").is_none());
        let names: Vec<_> = registry.schemas().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolItem::new(tool("same"), echo())).unwrap();
        assert_eq!(
            registry.register(ToolItem::new(tool("same"), echo())),
            Err(RegistryError::Duplicate("same".into()))
        );
    }

    #[test]
    fn test_register_rejects_invalid_name() {
        let mut registry = ToolRegistry::new();
        assert_eq!(
            registry.register(ToolItem::new(tool("bad name"), echo())),
            Err(RegistryError::InvalidName("bad name".into()))
        );
    }

    #[test]
    fn test_register_rejects_bad_schema() {
        let mut registry = ToolRegistry::new();
        let item = ToolItem::new(Tool::new("x", "d", json!({"type": "string"})), echo());
        assert!(matches!(
            registry.register(item),
            Err(RegistryError::InvalidSchema { .. })
        ));
        let item = ToolItem::new(Tool::new("y", "d", json!([])), echo());
        assert!(matches!(
            registry.register(item),
            Err(RegistryError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ToolRegistry::builtin().unwrap();
        assert!(registry.get(compute::COMPUTE_SCRIPT_TOOL).unwrap().serial);
        assert!(registry.get(figure::FIGURE_SCRIPT_TOOL).unwrap().serial);
        assert_eq!(registry.items().len(), 2);
    }

    #[test]
    fn test_render_response() {
        assert_eq!(render_response(json!("plain")), "plain");
        assert_eq!(render_response(json!({"a": 1})), "{\"a\":1}");
        assert_eq!(render_response(json!(42)), "42");
    }

    #[tokio::test]
    async fn test_from_fn_capability() {
        let log: LogFn = Arc::new(|_, _| {});
        let result = echo()
            .call(json!({"x": 1}), log, ToolContext::new("model"))
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_context_without_hooks() {
        let ctx = ToolContext::new("model");
        assert!(ctx.confirm_okay_to_run("x").await.unwrap());
        assert!(ctx
            .execute_script("x", ScriptHandlers::default())
            .await
            .is_err());
        assert!(ctx.add_image("a.png", "data:image/png;base64,AA==").is_err());
        // relays are silently skipped
        ctx.stdout("ignored");
    }
}
