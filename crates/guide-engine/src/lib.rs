pub mod error;
pub mod imaging;
pub mod models;
pub mod preview;
pub mod prompts;
pub mod render;
pub mod schema;
pub mod workflow;

pub use error::{ModelError, PlanError, PlanResult, Stage};
pub use models::{
    AnalyzeRequest, Capabilities, DryrunModel, GeminiConfig, GeminiModel, ImageSynthesizer,
    ReasoningModel, ScriptedModel, ScriptedPreview, ScriptedReply,
};
pub use render::{crop_objects, highlight_first_step, slugify_label, CroppedObject};
pub use workflow::{ArtifactLayout, PlanWorkflow, PreviewOutcome, WorkflowArtifacts};
