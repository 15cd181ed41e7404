use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::files::{FileEntry, FileSet};
use crate::language::{Language, LanguageRegistry};

pub const DEFAULT_USER_ID: &str = "anonymous";
pub const DEFAULT_PROJECT_ID: &str = "default";

/// Single-source submission as received on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRequest {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub save_metric: bool,
}

/// Multi-file submission as received on the wire. Files are validated by
/// the builder, not during deserialization, so a bad path becomes an
/// engine rejection rather than a transport error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesRequest {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<FileEntry>>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub save_metric: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Code(String),
    Files(FileSet),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub user_id: String,
    pub project_id: String,
    pub save_metric: bool,
}

impl JobContext {
    fn new(user_id: Option<String>, project_id: Option<String>, save_metric: bool) -> Self {
        Self {
            user_id: user_id
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            project_id: project_id
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string()),
            save_metric,
        }
    }
}

/// One validated execution request. Only [`JobBuilder`] constructs jobs,
/// so every job carries a supported language and a safe payload.
#[derive(Debug, Clone)]
pub struct Job {
    id: Uuid,
    language: Language,
    payload: Payload,
    context: JobContext,
}

impl Job {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }
}

pub struct JobBuilder<'a> {
    registry: &'a LanguageRegistry,
}

impl<'a> JobBuilder<'a> {
    pub fn new(registry: &'a LanguageRegistry) -> Self {
        Self { registry }
    }

    pub fn code(&self, request: CodeRequest) -> EngineResult<Job> {
        let (Some(tag), Some(code)) = (non_empty(request.language), request.code) else {
            return Err(EngineError::MissingInput);
        };
        let language = self.registry.resolve(&tag)?;
        Ok(self.build(
            language,
            Payload::Code(code),
            JobContext::new(request.user_id, request.project_id, request.save_metric),
        ))
    }

    pub fn files(&self, request: FilesRequest) -> EngineResult<Job> {
        let (Some(tag), Some(files)) = (non_empty(request.language), request.files) else {
            return Err(EngineError::MissingInput);
        };
        let language = self.registry.resolve(&tag)?;
        let files = FileSet::new(files)?;
        Ok(self.build(
            language,
            Payload::Files(files),
            JobContext::new(request.user_id, request.project_id, request.save_metric),
        ))
    }

    fn build(&self, language: Language, payload: Payload, context: JobContext) -> Job {
        Job {
            id: Uuid::new_v4(),
            language,
            payload,
            context,
        }
    }
}

/// An empty language tag counts as missing.
fn non_empty(tag: Option<String>) -> Option<String> {
    tag.filter(|t| !t.is_empty())
}
