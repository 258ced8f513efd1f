use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

use crate::tools::ToolItem;

/// Base prompt used when the host does not supply one
pub const DEFAULT_SYSTEM_MESSAGE: &str = include_str!("prompts/base.md");

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[derive(Serialize)]
struct ToolDescription<'a> {
    name: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct SystemPromptContext<'a> {
    base: &'a str,
    tools: Vec<ToolDescription<'a>>,
}

/// The system message: the base prompt followed by the detailed description
/// of every tool that has one
pub fn system_prompt(base: &str, items: &[ToolItem]) -> Result<String, TeraError> {
    let tools = items
        .iter()
        .filter_map(|item| {
            item.detailed_description
                .as_deref()
                .map(|description| ToolDescription {
                    name: item.name(),
                    description,
                })
        })
        .collect();
    load_prompt(
        SYSTEM_TEMPLATE,
        &SystemPromptContext {
            base: base.trim(),
            tools,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::Tool;
    use crate::tools::{from_fn, LogFn, ToolContext};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn item(name: &str, detailed: Option<&str>) -> ToolItem {
        let function = from_fn(|_: Value, _: LogFn, _: ToolContext| async move { Ok(json!("")) });
        let item = ToolItem::new(Tool::new(name, "short", json!({"type": "object"})), function);
        match detailed {
            Some(d) => item.with_detailed_description(d),
            None => item,
        }
    }

    #[test]
    fn test_load_prompt() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        context.insert("age".to_string(), 30.to_string());

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(result, "Hello, Alice! You are 30 years old.");
    }

    #[test]
    fn test_load_prompt_missing_variable() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        let result = load_prompt(template, &context);
        assert!(result.is_err());
    }

    #[test]
    fn test_system_prompt_appends_detailed_descriptions() {
        let prompt = system_prompt(
            "You are helpful.",
            &[
                item("plain", None),
                item("compute_script", Some("Runs <python> & prints")),
            ],
        )
        .unwrap();

        assert!(prompt.starts_with("You are helpful."));
        assert!(prompt.contains("Here's a detailed description of the compute_script tool:"));
        // no html escaping
        assert!(prompt.contains("Runs <python> & prints"));
        assert!(!prompt.contains("plain tool"));
        assert_eq!(prompt.matches("========================").count(), 2);
    }

    #[test]
    fn test_system_prompt_without_tools() {
        let prompt = system_prompt(DEFAULT_SYSTEM_MESSAGE, &[]).unwrap();
        assert_eq!(prompt.trim(), DEFAULT_SYSTEM_MESSAGE.trim());
    }
}
