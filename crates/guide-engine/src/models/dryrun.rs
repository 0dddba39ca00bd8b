use guide_contracts::{DetectedObject, NormalizedBox, Plan, PlanStep, TrajectoryPoint};
use image::{DynamicImage, Rgba};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{AnalyzeRequest, ImageSynthesizer, ReasoningModel};
use crate::error::ModelError;
use crate::schema::{ANALYSIS_SCHEMA, COMPLETION_SCHEMA, STEPS_SCHEMA};

const DRYRUN_GOAL: &str = "Inspect the scene";
const DRYRUN_LABEL: &str = "scene";
const DRYRUN_STEP: &str = "Inspect the scene center";

/// Offline backend with deterministic answers, for local runs without
/// credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunModel;

impl ReasoningModel for DryrunModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze(&self, request: &AnalyzeRequest<'_>) -> Result<Option<String>, ModelError> {
        let objects = vec![DetectedObject::new(
            DRYRUN_LABEL,
            Some(NormalizedBox::new(250, 250, 750, 750)),
        )];
        let mut step = PlanStep::new(DRYRUN_STEP, DRYRUN_LABEL);
        if wants_trajectory(request.schema) {
            step = step.with_trajectory(vec![
                TrajectoryPoint::new(500, 500),
                TrajectoryPoint::new(600, 600),
            ]);
        }
        let payload = match request.schema_name {
            ANALYSIS_SCHEMA => json!({ "goal": DRYRUN_GOAL, "objects": objects }),
            STEPS_SCHEMA => json!({ "goal": DRYRUN_GOAL, "steps": [step] }),
            COMPLETION_SCHEMA => {
                step.mark_done();
                json!(Plan {
                    goal: DRYRUN_GOAL.to_string(),
                    objects,
                    steps: vec![step],
                })
            }
            other => {
                return Err(ModelError::Unavailable(format!(
                    "dryrun backend has no answer for schema '{other}'"
                )))
            }
        };
        Ok(Some(payload.to_string()))
    }
}

impl ImageSynthesizer for DryrunModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn synthesize(
        &self,
        prompt: &str,
        image: &DynamicImage,
    ) -> Result<Option<DynamicImage>, ModelError> {
        let (r, g, b) = color_from_prompt(prompt);
        let mut tinted = image.to_rgba8();
        for pixel in tinted.pixels_mut() {
            let Rgba([pr, pg, pb, pa]) = *pixel;
            *pixel = Rgba([blend(pr, r), blend(pg, g), blend(pb, b), pa]);
        }
        Ok(Some(DynamicImage::ImageRgba8(tinted)))
    }
}

fn wants_trajectory(schema: &Value) -> bool {
    schema
        .pointer("/properties/steps/items/properties/trajectory")
        .is_some()
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn blend(base: u8, tint: u8) -> u8 {
    ((u16::from(base) * 3 + u16::from(tint)) / 4) as u8
}
