use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::compute::{script_argument, Transcript, NOT_APPROVED};
use super::data_url::png_data_url;
use super::{script_parameters, Capability, LogFn, ToolContext, ToolItem};
use crate::models::tool::Tool;

pub const FIGURE_SCRIPT_TOOL: &str = "figure_script";

const DETAILED_DESCRIPTION: &str = "\
Use figure_script to make plots for the user. Build the figure with \
matplotlib and call plt.show(), or build a plotly figure and call fig.show(). \
The response contains a markdown reference for every figure produced; \
include those references verbatim in your reply so the user can see them.";

/// Runs a plotting script and stores each figure in the chat file store
pub struct FigureScript;

pub fn figure_script_tool() -> ToolItem {
    ToolItem::new(
        Tool::new(
            FIGURE_SCRIPT_TOOL,
            "Run a Python script that produces figures for the user",
            script_parameters("The Python script that creates and shows the figures"),
        ),
        Arc::new(FigureScript),
    )
    .serial()
    .with_detailed_description(DETAILED_DESCRIPTION)
}

#[derive(Default)]
struct Figures {
    references: Vec<String>,
    errors: Vec<String>,
}

impl Figures {
    fn record(&mut self, result: Result<String>) {
        match result {
            Ok(reference) => self.references.push(reference),
            Err(e) => self.errors.push(e.to_string()),
        }
    }
}

fn new_name(prefix: &str, extension: &str) -> String {
    format!("{}_{}.{}", prefix, Uuid::new_v4().simple(), extension)
}

#[async_trait]
impl Capability for FigureScript {
    async fn call(&self, args: Value, on_log_message: LogFn, ctx: ToolContext) -> Result<Value> {
        let script = script_argument(&args)?;
        if !ctx.confirm_okay_to_run(script).await? {
            return Ok(json!(NOT_APPROVED));
        }
        on_log_message(FIGURE_SCRIPT_TOOL, script);

        let transcript = Arc::new(Mutex::new(Transcript::default()));
        let figures = Arc::new(Mutex::new(Figures::default()));

        let (images, plots) = (Arc::clone(&figures), Arc::clone(&figures));
        let (image_ctx, plot_ctx) = (ctx.clone(), ctx.clone());
        let handlers = Transcript::handlers(&transcript, &ctx)
            .on_image(move |_, data| {
                let name = new_name("image", "png");
                let result = image_ctx
                    .add_image(&name, &png_data_url(data))
                    .map(|()| format!("![image](image://{name})"));
                if let Ok(mut f) = images.lock() {
                    f.record(result);
                }
            })
            .on_figure(move |_, content| {
                let name = new_name("figure", "json");
                let result = plot_ctx
                    .add_figure_data(&name, &content.to_string())
                    .map(|()| format!("![figure](figure://{name})"));
                if let Ok(mut f) = plots.lock() {
                    f.record(result);
                }
            });

        ctx.execute_script(script, handlers).await?;

        let figures = figures
            .lock()
            .map_err(|_| anyhow!("figure output was lost"))?;
        if let Some(error) = figures.errors.first() {
            return Err(anyhow!("Failed to store figure: {}", error));
        }
        let mut response = transcript
            .lock()
            .map(|t| t.render())
            .map_err(|_| anyhow!("script output was lost"))?;

        if figures.references.is_empty() {
            response.push_str("\nThe script did not produce any figures.");
        } else {
            for reference in &figures.references {
                response.push('\n');
                response.push_str(reference);
            }
        }
        Ok(json!(response.trim_start().to_string()))
    }
}
