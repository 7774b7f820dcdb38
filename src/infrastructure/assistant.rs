use crate::domain::models::Category;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

const LOCAL_SUMMARY_MAX_CHARS: usize = 200;

/// Text categorization, summarization and transcription service.
#[async_trait]
pub trait TaskAssistant: Send + Sync {
    async fn categorize_title(&self, title: &str) -> Result<Category, InfraError>;
    async fn summarize_process_text(&self, text: &str) -> Result<String, InfraError>;
    async fn transcribe_audio(&self, audio: &[u8]) -> Result<String, InfraError>;
}

/// Offline mode: every request fails and callers take their fallback path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAssistant;

#[async_trait]
impl TaskAssistant for DisabledAssistant {
    async fn categorize_title(&self, _title: &str) -> Result<Category, InfraError> {
        Err(InfraError::Assistant("assistant is disabled".to_string()))
    }

    async fn summarize_process_text(&self, _text: &str) -> Result<String, InfraError> {
        Err(InfraError::Assistant("assistant is disabled".to_string()))
    }

    async fn transcribe_audio(&self, _audio: &[u8]) -> Result<String, InfraError> {
        Err(InfraError::Assistant("assistant is disabled".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySource {
    Assistant,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySuggestion {
    pub category: Category,
    pub source: CategorySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySource {
    Assistant,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub text: String,
    pub source: SummarySource,
}

/// Best-effort wrapper: the planner never blocks on, or fails because of, the assistant.
#[derive(Clone)]
pub struct AssistantService {
    assistant: Arc<dyn TaskAssistant>,
}

impl AssistantService {
    pub fn new(assistant: Arc<dyn TaskAssistant>) -> Self {
        Self { assistant }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledAssistant))
    }

    /// Falls back to `Personal`, flagged as `CategorySource::Fallback`.
    pub async fn suggest_category(&self, title: &str) -> CategorySuggestion {
        if title.trim().is_empty() {
            return CategorySuggestion {
                category: Category::Personal,
                source: CategorySource::Fallback,
            };
        }
        match self.assistant.categorize_title(title).await {
            Ok(category) => CategorySuggestion {
                category,
                source: CategorySource::Assistant,
            },
            Err(error) => {
                warn!(%error, "title categorization failed; using fallback category");
                CategorySuggestion {
                    category: Category::Personal,
                    source: CategorySource::Fallback,
                }
            }
        }
    }

    pub async fn summarize(&self, text: &str) -> ProcessSummary {
        match self.assistant.summarize_process_text(text).await {
            Ok(summary) if !summary.trim().is_empty() => ProcessSummary {
                text: summary.trim().to_string(),
                source: SummarySource::Assistant,
            },
            Ok(_) => ProcessSummary {
                text: local_summary(text),
                source: SummarySource::Local,
            },
            Err(error) => {
                warn!(%error, "process summarization failed; summarizing locally");
                ProcessSummary {
                    text: local_summary(text),
                    source: SummarySource::Local,
                }
            }
        }
    }

    /// `None` when transcription is unavailable; the caller keeps whatever text it has.
    pub async fn transcribe(&self, audio: &[u8]) -> Option<String> {
        match self.assistant.transcribe_audio(audio).await {
            Ok(text) => Some(text),
            Err(error) => {
                warn!(%error, bytes = audio.len(), "transcription failed");
                None
            }
        }
    }
}

/// First sentence of the text, capped at 200 characters.
pub fn local_summary(text: &str) -> String {
    let trimmed = text.trim();
    let first_sentence = trimmed
        .find(['.', '!', '?', '\n'])
        .map(|index| &trimmed[..=index])
        .unwrap_or(trimmed)
        .trim();
    if first_sentence.chars().count() <= LOCAL_SUMMARY_MAX_CHARS {
        return first_sentence.to_string();
    }
    let truncated = first_sentence
        .chars()
        .take(LOCAL_SUMMARY_MAX_CHARS - 3)
        .collect::<String>();
    format!("{}...", truncated.trim_end())
}
