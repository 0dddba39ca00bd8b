use std::sync::Arc;

use image::DynamicImage;
use serde_json::Value;

use crate::error::ModelError;

mod dryrun;
mod gemini;
mod scripted;

pub use dryrun::DryrunModel;
pub use gemini::{GeminiConfig, GeminiModel};
pub use scripted::{RecordedCall, ScriptedModel, ScriptedPreview, ScriptedReply};

/// One structured reasoning call: images first, then the prompt, answered
/// with JSON conforming to `schema`.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeRequest<'a> {
    pub images: &'a [DynamicImage],
    pub prompt: &'a str,
    pub schema: &'a Value,
    pub schema_name: &'a str,
    pub temperature: f32,
    pub thinking_budget: i32,
}

/// Image(s) + prompt + schema -> JSON text.
pub trait ReasoningModel: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the model answered without any text content.
    fn analyze(&self, request: &AnalyzeRequest<'_>) -> Result<Option<String>, ModelError>;
}

/// Prompt + image -> at most one synthesized image.
pub trait ImageSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    fn synthesize(
        &self,
        prompt: &str,
        image: &DynamicImage,
    ) -> Result<Option<DynamicImage>, ModelError>;
}

/// Capability handle threaded through the workflow. Built once at process
/// start; clones share the underlying backends.
#[derive(Clone)]
pub struct Capabilities {
    pub reasoning: Arc<dyn ReasoningModel>,
    pub synthesizer: Arc<dyn ImageSynthesizer>,
}

impl Capabilities {
    pub fn new(
        reasoning: Arc<dyn ReasoningModel>,
        synthesizer: Arc<dyn ImageSynthesizer>,
    ) -> Self {
        Self {
            reasoning,
            synthesizer,
        }
    }

    /// Uses one backend for both capabilities.
    pub fn single<M>(model: M) -> Self
    where
        M: ReasoningModel + ImageSynthesizer + 'static,
    {
        let shared = Arc::new(model);
        Self {
            reasoning: shared.clone(),
            synthesizer: shared,
        }
    }

    pub fn gemini(config: GeminiConfig) -> Self {
        Self::single(GeminiModel::new(config))
    }

    pub fn dryrun() -> Self {
        Self::single(DryrunModel)
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("reasoning", &self.reasoning.name())
            .field("synthesizer", &self.synthesizer.name())
            .finish()
    }
}
