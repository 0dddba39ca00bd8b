use std::path::{Path, PathBuf};

use guide_contracts::{actionable_steps, merge_objects, Plan, PlanStep, PlanningProfile};
use image::DynamicImage;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{PlanError, PlanResult, Stage};
use crate::imaging::resize_to_width;
use crate::models::{AnalyzeRequest, Capabilities};
use crate::preview::synthesize_preview;
use crate::prompts::{analysis_prompt, completion_prompt, steps_prompt};
use crate::render::{crop_objects, highlight_first_step};
use crate::schema::{
    analysis_schema, completion_schema, parse_analysis, parse_completion, parse_steps,
    steps_schema, warn_unknown_labels, ANALYSIS_SCHEMA, COMPLETION_SCHEMA, STEPS_SCHEMA,
};

/// File layout for one plan's artifacts under a per-goal directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_image_path(&self) -> PathBuf {
        self.root.join("request.png")
    }

    pub fn crops_dir(&self) -> PathBuf {
        self.root.join("object_crops")
    }

    pub fn highlight_path(&self) -> PathBuf {
        self.root.join("first_step_highlight.png")
    }

    pub fn preview_path(&self) -> PathBuf {
        self.root.join("first_step_banana.png")
    }

    pub fn continuation_highlight_path(&self) -> PathBuf {
        self.root.join("continuation_first_step_highlight.png")
    }

    pub fn continuation_preview_path(&self) -> PathBuf {
        self.root.join("continuation_first_step_banana.png")
    }
}

/// What happened to the preview image. Only `Generated` carries a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    Generated(PathBuf),
    NoImage,
    Failed(String),
    SkippedNoStep,
    SkippedNoHighlight,
}

impl PreviewOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Generated(path) => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowArtifacts {
    pub plan: Plan,
    pub highlight_path: Option<PathBuf>,
    pub preview: PreviewOutcome,
    pub crops: Vec<PathBuf>,
}

impl WorkflowArtifacts {
    pub fn preview_path(&self) -> Option<&Path> {
        self.preview.path()
    }
}

/// Generate/refresh state machine, parameterized by a planning profile and
/// the injected model capabilities.
#[derive(Debug, Clone)]
pub struct PlanWorkflow {
    models: Capabilities,
    profile: PlanningProfile,
}

impl PlanWorkflow {
    pub fn new(models: Capabilities, profile: PlanningProfile) -> Self {
        Self { models, profile }
    }

    /// Builds a fresh plan from a single scene image.
    pub fn generate(
        &self,
        image: &DynamicImage,
        layout: &ArtifactLayout,
    ) -> PlanResult<WorkflowArtifacts> {
        let profile = &self.profile;
        let scene = resize_to_width(image, profile.analysis_width);

        let analysis_text = self.ask(
            Stage::Analysis,
            std::slice::from_ref(&scene),
            &analysis_prompt(profile),
            &analysis_schema(),
            ANALYSIS_SCHEMA,
            profile.analysis_temperature,
        )?;
        let analysis = parse_analysis(analysis_text)?;
        info!(
            goal = %analysis.goal,
            objects = analysis.objects.len(),
            "analysis complete"
        );

        let crops = crop_objects(image, &analysis.objects, &layout.crops_dir())?;
        let mut step_images = Vec::with_capacity(crops.len() + 1);
        step_images.push(scene);
        step_images.extend(
            crops
                .iter()
                .map(|crop| resize_to_width(&crop.image, profile.crop_width)),
        );

        let prompt = steps_prompt(&analysis.goal, &analysis.objects, crops.len(), profile);
        let steps_text = self.ask(
            Stage::Steps,
            &step_images,
            &prompt,
            &steps_schema(profile.trajectory),
            STEPS_SCHEMA,
            profile.analysis_temperature,
        )?;
        let steps = parse_steps(steps_text, profile.trajectory)?;
        info!(goal = %steps.goal, steps = steps.steps.len(), "steps complete");
        let plan = Plan {
            goal: steps.goal,
            objects: analysis.objects,
            steps: steps.steps,
        };
        warn_unknown_labels(Stage::Steps, &plan);

        let highlight_path =
            highlight_first_step(image, &plan.objects, &plan.steps, &layout.highlight_path())?;
        let preview = self.attempt_preview(
            &plan.steps,
            highlight_path.as_deref(),
            &layout.preview_path(),
        );

        Ok(WorkflowArtifacts {
            plan,
            highlight_path,
            preview,
            crops: crops.into_iter().map(|crop| crop.path).collect(),
        })
    }

    /// Re-evaluates `existing` against a newer scene image. The goal is
    /// kept verbatim and objects keep their original order and labels.
    pub fn refresh(
        &self,
        image: &DynamicImage,
        existing: &Plan,
        layout: &ArtifactLayout,
    ) -> PlanResult<WorkflowArtifacts> {
        let profile = &self.profile;
        let scene = resize_to_width(image, profile.analysis_width);

        let completion_text = self.ask(
            Stage::Completion,
            std::slice::from_ref(&scene),
            &completion_prompt(existing, profile),
            &completion_schema(profile.trajectory),
            COMPLETION_SCHEMA,
            profile.completion_temperature,
        )?;
        let completion = parse_completion(completion_text, profile.trajectory)?;
        if completion.goal.trim() != existing.goal.trim() {
            warn!(
                expected = %existing.goal,
                returned = %completion.goal,
                "completion changed the goal; keeping the original"
            );
        }

        let plan = Plan {
            goal: existing.goal.clone(),
            objects: merge_objects(&existing.objects, &completion.objects),
            steps: completion.steps,
        };
        warn_unknown_labels(Stage::Completion, &plan);
        let remaining = actionable_steps(&plan.steps);
        info!(
            steps = plan.steps.len(),
            remaining = remaining.len(),
            state = ?plan.state(),
            "completion check complete"
        );

        let highlight_path = highlight_first_step(
            image,
            &plan.objects,
            &remaining,
            &layout.continuation_highlight_path(),
        )?;
        let preview = self.attempt_preview(
            &remaining,
            highlight_path.as_deref(),
            &layout.continuation_preview_path(),
        );

        Ok(WorkflowArtifacts {
            plan,
            highlight_path,
            preview,
            crops: Vec::new(),
        })
    }

    fn ask(
        &self,
        stage: Stage,
        images: &[DynamicImage],
        prompt: &str,
        schema: &Value,
        schema_name: &str,
        temperature: f32,
    ) -> PlanResult<Option<String>> {
        let request = AnalyzeRequest {
            images,
            prompt,
            schema,
            schema_name,
            temperature,
            thinking_budget: self.profile.thinking_budget,
        };
        self.models
            .reasoning
            .analyze(&request)
            .map_err(|source| PlanError::Model { stage, source })
    }

    // Preview failures never fail the plan.
    fn attempt_preview(
        &self,
        steps: &[PlanStep],
        highlight: Option<&Path>,
        output_path: &Path,
    ) -> PreviewOutcome {
        let Some(first_step) = steps.first() else {
            return PreviewOutcome::SkippedNoStep;
        };
        let Some(highlight) = highlight else {
            return PreviewOutcome::SkippedNoHighlight;
        };
        match synthesize_preview(
            self.models.synthesizer.as_ref(),
            &first_step.text,
            highlight,
            output_path,
            self.profile.preview_width,
        ) {
            Ok(Some(path)) => PreviewOutcome::Generated(path),
            Ok(None) => PreviewOutcome::NoImage,
            Err(err) => {
                warn!(error = %err, "preview generation failed");
                PreviewOutcome::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use guide_contracts::{DetectedObject, NormalizedBox, PlanState, ProfileRegistry};
    use image::{Rgb, RgbImage};
    use serde_json::json;

    use super::*;
    use crate::models::{ScriptedModel, ScriptedPreview, ScriptedReply};

    fn scene() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([240, 240, 240])))
    }

    fn workflow(model: &Arc<ScriptedModel>, profile: &str) -> PlanWorkflow {
        let profile = ProfileRegistry::default()
            .get(profile)
            .cloned()
            .unwrap_or_default();
        PlanWorkflow::new(Capabilities::new(model.clone(), model.clone()), profile)
    }

    fn tidy_plan() -> Plan {
        Plan {
            goal: "Tidy the desk".to_string(),
            objects: vec![DetectedObject::new(
                "red mug",
                Some(NormalizedBox::new(100, 100, 300, 300)),
            )],
            steps: vec![PlanStep::new("Move the red mug to the tray", "red mug")],
        }
    }

    #[test]
    fn generate_produces_plan_highlight_and_preview() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = ArtifactLayout::new(dir.path().join("goal-1"));
        let model = Arc::new(
            ScriptedModel::new([
                ScriptedReply::json(&json!({
                    "goal": "Clean up",
                    "objects": [
                        {"label": "red mug", "box_2d": [100, 100, 300, 300]},
                        {"label": "lid", "box_2d": null}
                    ]
                })),
                ScriptedReply::json(&json!({
                    "goal": "Tidy the desk",
                    "steps": [{
                        "text": "Move the red mug to the tray",
                        "object_label": "red mug",
                        "trajectory": [{"point": [200, 200]}, {"point": [600, 800]}]
                    }]
                })),
            ])
            .with_preview(ScriptedPreview::Image(DynamicImage::ImageRgb8(RgbImage::new(16, 8)))),
        );

        let artifacts = workflow(&model, "default").generate(&scene(), &layout)?;

        assert_eq!(artifacts.plan.goal, "Tidy the desk");
        assert_eq!(artifacts.plan.objects.len(), 2);
        assert_eq!(artifacts.plan.steps[0].trajectory_points().len(), 2);
        assert_eq!(artifacts.highlight_path, Some(layout.highlight_path()));
        assert_eq!(artifacts.preview, PreviewOutcome::Generated(layout.preview_path()));
        assert!(layout.preview_path().is_file());
        assert_eq!(artifacts.crops.len(), 1);
        assert!(layout.crops_dir().join("object_1_red_mug.png").is_file());

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].schema_name, ANALYSIS_SCHEMA);
        assert_eq!(calls[0].image_dims, vec![(1600, 800)]);
        assert_eq!(calls[1].schema_name, STEPS_SCHEMA);
        assert_eq!(calls[1].image_dims, vec![(1600, 800), (1000, 500)]);
        assert!(calls[1].prompt.starts_with("Initial goal: Clean up"));
        assert_eq!(
            model.synth_prompts(),
            vec!["Using the provided image, apply the following: Move the red mug to the tray."
                .to_string()]
        );
        Ok(())
    }

    #[test]
    fn generate_fails_on_empty_analysis() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = Arc::new(ScriptedModel::new([ScriptedReply::Empty]));
        let result = workflow(&model, "default").generate(&scene(), &ArtifactLayout::new(dir.path()));
        assert!(matches!(
            result,
            Err(PlanError::EmptyContent { stage: Stage::Analysis })
        ));
        Ok(())
    }

    #[test]
    fn generate_fails_on_malformed_steps() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = Arc::new(ScriptedModel::new([
            ScriptedReply::json(&json!({"goal": "g", "objects": []})),
            ScriptedReply::Json("{\"goal\": \"g\", \"steps\": \"nope\"}".to_string()),
        ]));
        let result = workflow(&model, "plain").generate(&scene(), &ArtifactLayout::new(dir.path()));
        assert!(matches!(
            result,
            Err(PlanError::Schema { stage: Stage::Steps, .. })
        ));
        Ok(())
    }

    #[test]
    fn preview_failure_keeps_the_plan() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = Arc::new(
            ScriptedModel::new([
                ScriptedReply::json(&json!({
                    "goal": "Tidy the desk",
                    "objects": [{"label": "red mug", "box_2d": [100, 100, 300, 300]}]
                })),
                ScriptedReply::json(&json!({
                    "goal": "Tidy the desk",
                    "steps": [{"text": "Move the red mug", "object_label": "red mug"}]
                })),
            ])
            .with_preview(ScriptedPreview::Fail("quota exceeded".to_string())),
        );
        let artifacts =
            workflow(&model, "plain").generate(&scene(), &ArtifactLayout::new(dir.path()))?;
        assert!(artifacts.highlight_path.is_some());
        assert!(matches!(artifacts.preview, PreviewOutcome::Failed(_)));
        assert_eq!(artifacts.preview_path(), None);
        Ok(())
    }

    #[test]
    fn refresh_with_all_steps_done_skips_artifacts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = ArtifactLayout::new(dir.path());
        let model = Arc::new(ScriptedModel::new([ScriptedReply::json(&json!({
            "goal": "Something else",
            "objects": [{"label": "red mug", "box_2d": [400, 400, 600, 600]}],
            "steps": [{"text": "[DONE] Move the red mug to the tray", "object_label": "red mug"}]
        }))]));

        let artifacts = workflow(&model, "default").refresh(&scene(), &tidy_plan(), &layout)?;

        assert_eq!(artifacts.plan.goal, "Tidy the desk");
        assert_eq!(artifacts.plan.state(), PlanState::Complete);
        assert_eq!(
            artifacts.plan.objects[0].bbox,
            Some(NormalizedBox::new(400, 400, 600, 600))
        );
        assert_eq!(artifacts.highlight_path, None);
        assert_eq!(artifacts.preview, PreviewOutcome::SkippedNoStep);
        assert!(!layout.continuation_highlight_path().exists());
        assert!(model.synth_prompts().is_empty());

        let calls = model.calls();
        assert_eq!(calls[0].schema_name, COMPLETION_SCHEMA);
        assert_eq!(calls[0].image_count, 1);
        Ok(())
    }

    #[test]
    fn refresh_merges_objects_and_highlights_next_step() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = ArtifactLayout::new(dir.path());
        let existing = Plan {
            goal: "Set the table".to_string(),
            objects: vec![
                DetectedObject::new("A", Some(NormalizedBox::new(0, 0, 10, 10))),
                DetectedObject::new("B", Some(NormalizedBox::new(0, 0, 20, 20))),
                DetectedObject::new("C", Some(NormalizedBox::new(0, 0, 30, 30))),
            ],
            steps: vec![
                PlanStep::new("Place A", "A"),
                PlanStep::new("Place C", "C"),
            ],
        };
        let model = Arc::new(ScriptedModel::new([ScriptedReply::json(&json!({
            "goal": "Set the table",
            "objects": [
                {"label": "c", "box_2d": [500, 500, 900, 900]},
                {"label": "a", "box_2d": [100, 100, 200, 200]},
                {"label": "D", "box_2d": [1, 1, 2, 2]}
            ],
            "steps": [
                {"text": "[DONE] Place A", "object_label": "A"},
                {"text": "Place C on the mat", "object_label": "C"}
            ]
        }))]));

        let artifacts = workflow(&model, "plain").refresh(&scene(), &existing, &layout)?;

        let labels: Vec<&str> = artifacts
            .plan
            .objects
            .iter()
            .map(|object| object.label.as_str())
            .collect();
        assert_eq!(labels, vec!["A", "B", "C"]);
        assert_eq!(
            artifacts.plan.objects[0].bbox,
            Some(NormalizedBox::new(100, 100, 200, 200))
        );
        assert_eq!(artifacts.plan.objects[1].bbox, None);
        assert_eq!(artifacts.plan.steps.len(), 2);
        assert_eq!(
            artifacts.highlight_path,
            Some(layout.continuation_highlight_path())
        );
        assert_eq!(artifacts.preview, PreviewOutcome::NoImage);
        assert_eq!(
            model.synth_prompts(),
            vec!["Using the provided image, apply the following: Place C on the mat.".to_string()]
        );
        Ok(())
    }

    #[test]
    fn refresh_propagates_model_failures() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = Arc::new(ScriptedModel::new([ScriptedReply::Fail("503".to_string())]));
        let result = workflow(&model, "default").refresh(
            &scene(),
            &tidy_plan(),
            &ArtifactLayout::new(dir.path()),
        );
        let err = result.err().map(|err| err.is_model_failure());
        assert_eq!(err, Some(true));
        Ok(())
    }
}
