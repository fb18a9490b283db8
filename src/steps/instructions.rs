//! Instruction documents: one markdown file per step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::InstructionError;
use crate::steps::types::StepId;

/// Resolves a step to the instruction text the model follows for it.
#[async_trait]
pub trait InstructionSource: Send + Sync {
    async fn load(&self, step: &StepId) -> Result<String, InstructionError>;
}

/// Instructions read from `<dir>/<step-name>.md`.
pub struct FileInstructions {
    dir: PathBuf,
}

impl FileInstructions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Step names available in the directory, sorted by file name.
    pub async fn discover(&self) -> Result<Vec<String>, InstructionError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        tracing::debug!(dir = %self.dir.display(), count = names.len(), "Discovered step instructions");
        Ok(names)
    }
}

#[async_trait]
impl InstructionSource for FileInstructions {
    async fn load(&self, step: &StepId) -> Result<String, InstructionError> {
        let path = self.dir.join(format!("{}.md", step.as_str()));
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InstructionError::NotFound {
                    step: step.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        validate(step, content)
    }
}

/// Instructions held in memory.
#[derive(Default)]
pub struct StaticInstructions {
    docs: HashMap<String, String>,
}

impl StaticInstructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: impl Into<String>, content: impl Into<String>) -> Self {
        self.docs.insert(step.into(), content.into());
        self
    }
}

#[async_trait]
impl InstructionSource for StaticInstructions {
    async fn load(&self, step: &StepId) -> Result<String, InstructionError> {
        let content = self
            .docs
            .get(step.as_str())
            .cloned()
            .ok_or_else(|| InstructionError::NotFound {
                step: step.to_string(),
            })?;
        validate(step, content)
    }
}

fn validate(step: &StepId, content: String) -> Result<String, InstructionError> {
    if content.trim().is_empty() {
        return Err(InstructionError::Malformed {
            step: step.to_string(),
            reason: "document is empty".to_string(),
        });
    }
    Ok(content)
}
