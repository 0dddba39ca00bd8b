use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use image::DynamicImage;

use super::{AnalyzeRequest, ImageSynthesizer, ReasoningModel};
use crate::error::ModelError;

/// Queued answer for one reasoning call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Json(String),
    Empty,
    Fail(String),
}

impl ScriptedReply {
    pub fn json(value: &serde_json::Value) -> Self {
        Self::Json(value.to_string())
    }
}

/// Answer for every synthesis call.
#[derive(Debug, Clone)]
pub enum ScriptedPreview {
    None,
    Image(DynamicImage),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub schema_name: String,
    pub prompt: String,
    pub image_count: usize,
    pub image_dims: Vec<(u32, u32)>,
}

/// In-memory backend replaying queued replies in order. Used by tests and
/// by embedders that want to drive the workflow without network access.
#[derive(Debug)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    preview: ScriptedPreview,
    calls: Mutex<Vec<RecordedCall>>,
    synth_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            preview: ScriptedPreview::None,
            calls: Mutex::new(Vec::new()),
            synth_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_preview(mut self, preview: ScriptedPreview) -> Self {
        self.preview = preview;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn synth_prompts(&self) -> Vec<String> {
        lock(&self.synth_prompts).clone()
    }
}

impl ReasoningModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn analyze(&self, request: &AnalyzeRequest<'_>) -> Result<Option<String>, ModelError> {
        lock(&self.calls).push(RecordedCall {
            schema_name: request.schema_name.to_string(),
            prompt: request.prompt.to_string(),
            image_count: request.images.len(),
            image_dims: request
                .images
                .iter()
                .map(|image| (image.width(), image.height()))
                .collect(),
        });
        match lock(&self.replies).pop_front() {
            Some(ScriptedReply::Json(text)) => Ok(Some(text)),
            Some(ScriptedReply::Empty) => Ok(None),
            Some(ScriptedReply::Fail(message)) => Err(ModelError::Unavailable(message)),
            None => Err(ModelError::Unavailable(format!(
                "no scripted reply left for '{}'",
                request.schema_name
            ))),
        }
    }
}

impl ImageSynthesizer for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn synthesize(
        &self,
        prompt: &str,
        _image: &DynamicImage,
    ) -> Result<Option<DynamicImage>, ModelError> {
        lock(&self.synth_prompts).push(prompt.to_string());
        match &self.preview {
            ScriptedPreview::None => Ok(None),
            ScriptedPreview::Image(image) => Ok(Some(image.clone())),
            ScriptedPreview::Fail(message) => Err(ModelError::Unavailable(message.clone())),
        }
    }
}

// Poisoning is ignored; the guarded data is append-only records.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
