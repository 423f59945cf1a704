//! MCP Apps widget resource
//!
//! Both tools point their output at one HTML widget, served as the
//! `ui://widget/tool-output.html` resource. The HTML comes from a prebuilt
//! frontend bundle on disk and is read on first use; a failed read is not
//! cached, so building the bundle later fixes a running server.

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

pub const WIDGET_URI: &str = "ui://widget/tool-output.html";
pub const WIDGET_MIME_TYPE: &str = "text/html;profile=mcp-app";

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error(
        "Widget HTML not found at {}. Build the widget bundle first \
         (cd widget && pnpm install && pnpm run build)",
        .0.display()
    )]
    NotFound(PathBuf),

    #[error("Failed to read widget HTML at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `_meta` attached to every tool definition
pub fn tool_meta() -> Value {
    json!({ "ui": { "resourceUri": WIDGET_URI } })
}

fn resource_meta() -> Value {
    json!({ "ui": { "prefersBorder": true } })
}

/// `resources/list` entries
pub fn resource_definitions() -> Value {
    json!([
        {
            "uri": WIDGET_URI,
            "name": "tool-output-widget",
            "title": "Tool Output Widget",
            "description": "Widget that renders tool output as markdown",
            "mimeType": WIDGET_MIME_TYPE,
            "_meta": resource_meta(),
        }
    ])
}

#[derive(Debug)]
pub struct Widget {
    path: PathBuf,
    html: OnceCell<String>,
}

impl Widget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            html: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn html(&self) -> Result<&str, WidgetError> {
        let html = self
            .html
            .get_or_try_init(|| async {
                let html = tokio::fs::read_to_string(&self.path)
                    .await
                    .map_err(|e| match e.kind() {
                        std::io::ErrorKind::NotFound => WidgetError::NotFound(self.path.clone()),
                        _ => WidgetError::Io {
                            path: self.path.clone(),
                            source: e,
                        },
                    })?;
                debug!(path = %self.path.display(), bytes = html.len(), "Loaded widget HTML");
                Ok::<_, WidgetError>(html)
            })
            .await?;
        Ok(html)
    }

    /// `ReadResourceResult` for `uri`. An unknown URI is not a protocol
    /// error: it yields no contents and the reason in `_meta.error`.
    pub async fn read(&self, uri: &str) -> Result<Value, WidgetError> {
        if uri != WIDGET_URI {
            return Ok(json!({
                "contents": [],
                "_meta": { "error": format!("Unknown resource: {uri}") },
            }));
        }

        Ok(json!({
            "contents": [{
                "uri": WIDGET_URI,
                "mimeType": WIDGET_MIME_TYPE,
                "text": self.html().await?,
                "_meta": resource_meta(),
            }],
        }))
    }
}
