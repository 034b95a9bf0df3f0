pub mod escape;
pub mod layout;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MathmateError, Result};
use crate::expr::Expr;

pub use escape::{escape_attribute, escape_html};
pub use layout::{remove_file_if_exists, SessionLayout};

/// Display role of an artifact in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Input,
    Text,
    Message,
    Image,
    Result,
}

impl ArtifactKind {
    /// CSS role class on the rendered cell.
    pub fn role_class(self) -> &'static str {
        match self {
            ArtifactKind::Input => "input",
            ArtifactKind::Text => "text",
            ArtifactKind::Message => "message",
            ArtifactKind::Image => "display",
            ArtifactKind::Result => "return",
        }
    }

    /// Margin label prefix (`In`, `Out`, `Msg`).
    pub fn margin_label(self) -> &'static str {
        match self {
            ArtifactKind::Input => "In",
            ArtifactKind::Text | ArtifactKind::Message => "Msg",
            ArtifactKind::Image | ArtifactKind::Result => "Out",
        }
    }
}

/// Backing file of an image artifact, inside the session folder.
#[derive(Debug)]
pub struct ImageFile {
    name: String,
    path: PathBuf,
}

impl ImageFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
pub enum ArtifactContent {
    Input(String),
    Text(String),
    Message(String),
    Image(ImageFile),
    Result(Expr),
}

/// One logged unit of session output.
///
/// Not `Clone`: an image artifact is the sole owner of its backing file.
#[derive(Debug)]
pub struct Artifact {
    group: u32,
    content: ArtifactContent,
    suppressed: bool,
}

impl Artifact {
    fn new(group: u32, content: ArtifactContent) -> Self {
        Self {
            group,
            content,
            suppressed: false,
        }
    }

    pub fn input(group: u32, expression: impl Into<String>) -> Self {
        Self::new(group, ArtifactContent::Input(expression.into()))
    }

    pub fn text(group: u32, text: impl Into<String>) -> Self {
        Self::new(group, ArtifactContent::Text(text.into()))
    }

    pub fn message(group: u32, text: impl Into<String>) -> Self {
        Self::new(group, ArtifactContent::Message(text.into()))
    }

    pub fn result(group: u32, expr: Expr) -> Self {
        Self::new(group, ArtifactContent::Result(expr))
    }

    /// Persist `data` to a fresh file in the session folder and wrap it.
    ///
    /// On a failed write the partial file is removed and no artifact is returned.
    pub fn image(layout: &SessionLayout, group: u32, data: &[u8], extension: &str) -> Result<Self> {
        let name = SessionLayout::unique_name(extension);
        let path = layout.named_file(&name);

        if let Err(e) = std::fs::write(&path, data) {
            let _ = std::fs::remove_file(&path);
            return Err(MathmateError::fs(&path, e));
        }
        debug!(group, path = %path.display(), bytes = data.len(), "stored image artifact");

        Ok(Self::new(
            group,
            ArtifactContent::Image(ImageFile { name, path }),
        ))
    }

    pub fn kind(&self) -> ArtifactKind {
        match self.content {
            ArtifactContent::Input(_) => ArtifactKind::Input,
            ArtifactContent::Text(_) => ArtifactKind::Text,
            ArtifactContent::Message(_) => ArtifactKind::Message,
            ArtifactContent::Image(_) => ArtifactKind::Image,
            ArtifactContent::Result(_) => ArtifactKind::Result,
        }
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn content(&self) -> &ArtifactContent {
        &self.content
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Mark a result as subdued because an image represents it better.
    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    /// Backing file, for image artifacts.
    pub fn file(&self) -> Option<&ImageFile> {
        match &self.content {
            ArtifactContent::Image(file) => Some(file),
            _ => None,
        }
    }

    /// Textual content with HTML entities substituted.
    pub fn html_escaped_content(&self) -> Result<String> {
        let escaped = match &self.content {
            ArtifactContent::Input(s) | ArtifactContent::Text(s) | ArtifactContent::Message(s) => {
                escape_html(s)
            }
            ArtifactContent::Result(expr) => escape_html(&expr.to_string()),
            ArtifactContent::Image(_) => {
                return Err(MathmateError::IllegalState(
                    "image artifacts have no textual content".into(),
                ))
            }
        };
        Ok(escaped)
    }

    pub fn is_graphical_result(&self) -> Result<bool> {
        match &self.content {
            ArtifactContent::Result(expr) => Ok(expr.is_graphical()),
            _ => Err(MathmateError::IllegalState(format!(
                "graphics classification requires a result artifact, got {:?}",
                self.kind()
            ))),
        }
    }

    /// Render one transcript cell. Hidden cells keep their markup but are not displayed.
    pub fn render(&self, visible: bool) -> String {
        let kind = self.kind();
        let style = if visible { "" } else { " style='display:none;'" };
        let subdue = if kind == ArtifactKind::Result && self.suppressed {
            " subdue"
        } else {
            ""
        };

        let body = match &self.content {
            ArtifactContent::Image(file) => format!(
                "  <div class='content'>    <img src='{}' onclick='toggle({})' />  </div>",
                escape_attribute(&file.path.display().to_string()),
                self.group
            ),
            _ => format!(
                "  <div class='content'>{}</div>",
                self.html_escaped_content().unwrap_or_default()
            ),
        };

        format!(
            "<div class='cell {}{subdue}'{style}>  <div class='margin'>{}[{}] := </div>{body}</div>",
            kind.role_class(),
            kind.margin_label(),
            self.group,
        )
    }

    /// Delete the backing file of an image artifact. Safe to call repeatedly.
    pub fn release(&self) -> Result<()> {
        if let ArtifactContent::Image(file) = &self.content {
            if remove_file_if_exists(&file.path)? {
                debug!(path = %file.path.display(), "released image artifact");
            }
        }
        Ok(())
    }
}

/// Owned, cloneable view of an artifact for inspection outside the log lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactSnapshot {
    pub kind: ArtifactKind,
    pub group: u32,
    pub suppressed: bool,
    /// Text, textual form of the result, or image file name.
    pub content: String,
    pub file: Option<PathBuf>,
}

impl From<&Artifact> for ArtifactSnapshot {
    fn from(artifact: &Artifact) -> Self {
        let content = match &artifact.content {
            ArtifactContent::Input(s) | ArtifactContent::Text(s) | ArtifactContent::Message(s) => {
                s.clone()
            }
            ArtifactContent::Result(expr) => expr.to_string(),
            ArtifactContent::Image(file) => file.name.clone(),
        };
        Self {
            kind: artifact.kind(),
            group: artifact.group,
            suppressed: artifact.suppressed,
            content,
            file: artifact.file().map(|f| f.path.clone()),
        }
    }
}
