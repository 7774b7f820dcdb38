use crate::infrastructure::assistant::{AssistantService, CategorySuggestion};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleSuggestion {
    pub title: String,
    pub suggestion: CategorySuggestion,
}

/// Suggests a category for a title being typed, once typing pauses. Each keystroke
/// cancels the request scheduled by the previous one.
pub struct CategorizationDebouncer {
    assistant: AssistantService,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    suggestions: Arc<watch::Sender<Option<TitleSuggestion>>>,
}

impl CategorizationDebouncer {
    pub fn new(assistant: AssistantService, delay: Duration) -> Self {
        let (suggestions, _) = watch::channel(None);
        Self {
            assistant,
            delay,
            pending: Mutex::new(None),
            suggestions: Arc::new(suggestions),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TitleSuggestion>> {
        self.suggestions.subscribe()
    }

    pub fn title_changed(&self, title: &str) {
        self.cancel();
        let title = title.trim().to_string();
        if title.is_empty() {
            return;
        }

        let assistant = self.assistant.clone();
        let suggestions = Arc::clone(&self.suggestions);
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let suggestion = assistant.suggest_category(&title).await;
            debug!(%title, category = %suggestion.category, "category suggested");
            suggestions.send_replace(Some(TitleSuggestion { title, suggestion }));
        });
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(handle);
        }
    }

    /// Drops a scheduled request, e.g. when the edit dialog closes.
    pub fn cancel(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for CategorizationDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
