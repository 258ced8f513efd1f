use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureFormat {
    Plotly,
}

/// One item streamed by a code execution session, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputItem {
    Stdout { content: String },
    Stderr { content: String },
    /// Base64 encoded image data
    Image { format: ImageFormat, content: String },
    Figure { format: FigureFormat, content: Value },
}

impl OutputItem {
    pub fn stdout<S: Into<String>>(content: S) -> Self {
        OutputItem::Stdout {
            content: content.into(),
        }
    }

    pub fn stderr<S: Into<String>>(content: S) -> Self {
        OutputItem::Stderr {
            content: content.into(),
        }
    }

    pub fn png<S: Into<String>>(content: S) -> Self {
        OutputItem::Image {
            format: ImageFormat::Png,
            content: content.into(),
        }
    }

    pub fn plotly(content: Value) -> Self {
        OutputItem::Figure {
            format: FigureFormat::Plotly,
            content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Ephemeral progress line shown while a tool batch runs; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProgressMessage {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub message: String,
}
