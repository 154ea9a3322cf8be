//! Task and event wire types exchanged with the calling gateway.
//! Field names follow the bus protocol (camelCase JSON); the gateway
//! correlates responses by taskId + targetLanguage, never by arrival order.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Quality/cost level of a translation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    Basic,
    Medium,
    Premium,
}

impl TierName {
    /// Degradation order for the fallback cascade (most to least expensive).
    pub const CASCADE: [TierName; 3] = [TierName::Premium, TierName::Medium, TierName::Basic];

    /// Cost rank: higher means more expensive.
    pub fn rank(self) -> u8 {
        match self {
            TierName::Basic => 0,
            TierName::Medium => 1,
            TierName::Premium => 2,
        }
    }

    /// Next cheaper tier, if any.
    pub fn cheaper(self) -> Option<TierName> {
        match self {
            TierName::Premium => Some(TierName::Medium),
            TierName::Medium => Some(TierName::Basic),
            TierName::Basic => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TierName::Basic => "basic",
            TierName::Medium => "medium",
            TierName::Premium => "premium",
        }
    }
}

impl std::fmt::Display for TierName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic class used to isolate queue capacity. Broadcast conversations
/// fan out to many languages and must not starve one-to-one traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationClass {
    #[default]
    Standard,
    Broadcast,
}

impl ConversationClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationClass::Standard => "standard",
            ConversationClass::Broadcast => "broadcast",
        }
    }
}

impl std::fmt::Display for ConversationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of translation work submitted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationTask {
    /// Caller-assigned, unique.
    pub task_id: String,
    pub message_id: String,
    pub text: String,
    /// ISO 639-1 code, or "auto" for detection.
    #[serde(default = "default_source_language")]
    pub source_language: String,
    /// ISO 639-1 codes.
    pub target_languages: Vec<String>,
    #[serde(default)]
    pub conversation_class: ConversationClass,
    #[serde(default = "default_tier")]
    pub requested_tier: TierName,
}

fn default_source_language() -> String {
    "auto".to_string()
}

fn default_tier() -> TierName {
    TierName::Medium
}

impl TranslationTask {
    /// Admission-time validation. Failures become INVALID_ARGUMENT events
    /// and the task never enters a queue.
    pub fn validate(&self, max_input_chars: usize) -> Result<(), String> {
        if self.task_id.is_empty() {
            return Err("taskId must not be empty".into());
        }
        if self.text.trim().is_empty() {
            return Err("text must not be empty".into());
        }
        if self.target_languages.is_empty() {
            return Err("targetLanguages must not be empty".into());
        }
        if self.target_languages.iter().any(|l| l.trim().is_empty()) {
            return Err("targetLanguages must not contain empty codes".into());
        }
        let chars = self.text.chars().count();
        if chars > max_input_chars {
            return Err(format!(
                "text length {chars} exceeds maximum input length {max_input_chars}"
            ));
        }
        Ok(())
    }
}

/// One completed translation, published per (task, targetLanguage) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub task_id: String,
    pub target_language: String,
    pub translated_text: String,
    /// Tier that actually produced the text ("none" for source-language echo).
    pub tier_used: String,
    pub confidence: f32,
    pub from_cache: bool,
    pub processing_time_ms: u64,
}

/// A terminal failure for a task or a (task, targetLanguage) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationFailure {
    pub task_id: String,
    /// Absent for admission-time rejections, which cover the whole task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    pub code: ErrorCode,
    pub message: String,
}

/// Server-push event stream payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TranslationEvent {
    Result(TranslationResult),
    Error(TranslationFailure),
}

impl TranslationEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TranslationEvent::Result(r) => &r.task_id,
            TranslationEvent::Error(e) => &e.task_id,
        }
    }
}
