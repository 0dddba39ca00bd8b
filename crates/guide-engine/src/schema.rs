//! JSON-Schema documents handed to the reasoning model, the wire types the
//! answers parse into, and the checks applied after parsing.

use guide_contracts::{DetectedObject, Plan, PlanStep, TrajectoryPolicy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{PlanError, PlanResult, Stage};

pub const ANALYSIS_SCHEMA: &str = "analysis";
pub const STEPS_SCHEMA: &str = "steps";
pub const COMPLETION_SCHEMA: &str = "completion";

/// First-pass answer: inferred goal plus the relevant objects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalysisResponse {
    pub goal: String,
    pub objects: Vec<DetectedObject>,
}

/// Second-pass answer: refined goal plus ordered steps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StepsResponse {
    pub goal: String,
    pub steps: Vec<PlanStep>,
}

fn box_schema() -> Value {
    json!({
        "anyOf": [
            {
                "type": "array",
                "items": { "type": "integer" },
                "minItems": 4,
                "maxItems": 4,
                "description": "Normalized [ymin, xmin, ymax, xmax] in the 0-1000 range."
            },
            { "type": "null" }
        ],
        "description": "Bounding box, or null when the object is not visible."
    })
}

fn objects_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "label": { "type": "string", "description": "A unique identifying label." },
                "box_2d": box_schema()
            },
            "required": ["label", "box_2d"]
        }
    })
}

fn step_schema(policy: TrajectoryPolicy) -> Value {
    let mut properties = json!({
        "text": { "type": "string", "description": "Detailed manipulation instruction." },
        "object_label": {
            "type": "string",
            "description": "Label of the primary object mentioned in this step."
        }
    });
    if policy.enabled() {
        properties["trajectory"] = json!({
            "anyOf": [
                {
                    "type": "array",
                    "maxItems": policy.max_points(),
                    "items": {
                        "type": "object",
                        "properties": {
                            "point": {
                                "type": "array",
                                "items": { "type": "integer" },
                                "minItems": 2,
                                "maxItems": 2,
                                "description": "Normalized [y, x] waypoint in the 0-1000 range."
                            }
                        },
                        "required": ["point"]
                    }
                },
                { "type": "null" }
            ],
            "description": format!(
                "Optional path for moving the object, up to {} normalized [y, x] points.",
                policy.max_points()
            )
        });
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["text", "object_label"]
    })
}

pub fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "goal": {
                "type": "string",
                "description": "High-level natural language goal inferred from the image."
            },
            "objects": objects_schema()
        },
        "required": ["goal", "objects"],
        "propertyOrdering": ["goal", "objects"]
    })
}

pub fn steps_schema(policy: TrajectoryPolicy) -> Value {
    json!({
        "type": "object",
        "properties": {
            "goal": {
                "type": "string",
                "description": "Refined goal after reviewing the scene and cropped objects."
            },
            "steps": { "type": "array", "items": step_schema(policy) }
        },
        "required": ["goal", "steps"],
        "propertyOrdering": ["goal", "steps"]
    })
}

pub fn completion_schema(policy: TrajectoryPolicy) -> Value {
    json!({
        "type": "object",
        "properties": {
            "goal": { "type": "string", "description": "The unchanged goal, verbatim." },
            "objects": objects_schema(),
            "steps": { "type": "array", "items": step_schema(policy) }
        },
        "required": ["goal", "objects", "steps"],
        "propertyOrdering": ["goal", "objects", "steps"]
    })
}

/// Strict parse of a model answer; a missing or blank answer is
/// [`PlanError::EmptyContent`].
pub fn parse_response<T: DeserializeOwned>(stage: Stage, text: Option<String>) -> PlanResult<T> {
    let text = text.unwrap_or_default();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PlanError::EmptyContent { stage });
    }
    serde_json::from_str(trimmed).map_err(|source| PlanError::Schema { stage, source })
}

pub fn parse_analysis(text: Option<String>) -> PlanResult<AnalysisResponse> {
    parse_response(Stage::Analysis, text)
}

pub fn parse_steps(text: Option<String>, policy: TrajectoryPolicy) -> PlanResult<StepsResponse> {
    let mut response: StepsResponse = parse_response(Stage::Steps, text)?;
    validate_steps(Stage::Steps, &mut response.steps, policy)?;
    Ok(response)
}

pub fn parse_completion(text: Option<String>, policy: TrajectoryPolicy) -> PlanResult<Plan> {
    let mut plan: Plan = parse_response(Stage::Completion, text)?;
    validate_steps(Stage::Completion, &mut plan.steps, policy)?;
    Ok(plan)
}

/// Enforces the trajectory policy on parsed steps. Over-long trajectories
/// fail; trajectories on steps the policy excludes are dropped.
pub fn validate_steps(
    stage: Stage,
    steps: &mut [PlanStep],
    policy: TrajectoryPolicy,
) -> PlanResult<()> {
    let mut actionable_index = 0usize;
    for (position, step) in steps.iter_mut().enumerate() {
        let index = if step.is_done() {
            None
        } else {
            actionable_index += 1;
            Some(actionable_index - 1)
        };
        let Some(points) = step.trajectory.as_ref() else {
            continue;
        };
        if !policy.allows(index) {
            if !points.is_empty() {
                warn!(
                    %stage,
                    step = position,
                    points = points.len(),
                    "dropping trajectory not allowed by the planning profile"
                );
            }
            step.trajectory = None;
            continue;
        }
        if points.len() > policy.max_points() {
            return Err(PlanError::SchemaViolation {
                stage,
                reason: format!(
                    "step {} has {} trajectory points, at most {} allowed",
                    position + 1,
                    points.len(),
                    policy.max_points()
                ),
            });
        }
    }
    Ok(())
}

/// Logs step labels that do not resolve to any object of `plan`.
pub fn warn_unknown_labels(stage: Stage, plan: &Plan) {
    for label in plan.unknown_step_labels() {
        warn!(%stage, %label, "step references an unknown object label");
    }
}

#[cfg(test)]
mod tests {
    use guide_contracts::{NormalizedBox, TrajectoryPoint};

    use super::*;

    fn path(len: usize) -> Vec<TrajectoryPoint> {
        (0..len).map(|idx| TrajectoryPoint::new(idx as i32, idx as i32)).collect()
    }

    #[test]
    fn trajectory_field_follows_policy() {
        let plain = steps_schema(TrajectoryPolicy::None);
        assert!(plain
            .pointer("/properties/steps/items/properties/trajectory")
            .is_none());

        let per_step = completion_schema(TrajectoryPolicy::PerStep { max_points: 10 });
        assert_eq!(
            per_step.pointer("/properties/steps/items/properties/trajectory/anyOf/0/maxItems"),
            Some(&json!(10))
        );
        assert_eq!(
            analysis_schema().pointer("/propertyOrdering"),
            Some(&json!(["goal", "objects"]))
        );
    }

    #[test]
    fn parse_rejects_blank_and_malformed_answers() {
        assert!(matches!(
            parse_analysis(None),
            Err(PlanError::EmptyContent { stage: Stage::Analysis })
        ));
        assert!(matches!(
            parse_analysis(Some("   ".to_string())),
            Err(PlanError::EmptyContent { .. })
        ));
        assert!(matches!(
            parse_analysis(Some("{\"goal\": 3}".to_string())),
            Err(PlanError::Schema { stage: Stage::Analysis, .. })
        ));
        let three_coords = r#"{"goal":"g","objects":[{"label":"a","box_2d":[1,2,3]}]}"#;
        assert!(matches!(
            parse_analysis(Some(three_coords.to_string())),
            Err(PlanError::Schema { .. })
        ));
    }

    #[test]
    fn parse_accepts_null_boxes() -> anyhow::Result<()> {
        let text = r#"{"goal":"g","objects":[{"label":"a","box_2d":null},{"label":"b","box_2d":[1,2,3,4]}]}"#;
        let analysis = parse_analysis(Some(text.to_string()))?;
        assert_eq!(analysis.objects[0].bbox, None);
        assert_eq!(analysis.objects[1].bbox, Some(NormalizedBox::new(1, 2, 3, 4)));
        Ok(())
    }

    #[test]
    fn over_long_trajectory_is_a_violation() {
        let mut steps = vec![PlanStep::new("Move", "mug").with_trajectory(path(6))];
        let result = validate_steps(
            Stage::Steps,
            &mut steps,
            TrajectoryPolicy::PerStep { max_points: 5 },
        );
        assert!(matches!(result, Err(PlanError::SchemaViolation { .. })));
    }

    #[test]
    fn first_step_only_keeps_next_actionable_trajectory() -> anyhow::Result<()> {
        let mut steps = vec![
            PlanStep::new("[DONE] Pick up", "mug").with_trajectory(path(2)),
            PlanStep::new("Place", "mug").with_trajectory(path(3)),
            PlanStep::new("Wipe", "desk").with_trajectory(path(3)),
        ];
        validate_steps(
            Stage::Completion,
            &mut steps,
            TrajectoryPolicy::FirstStepOnly { max_points: 5 },
        )?;
        assert_eq!(steps[0].trajectory, None);
        assert_eq!(steps[1].trajectory_points().len(), 3);
        assert_eq!(steps[2].trajectory, None);
        Ok(())
    }

    #[test]
    fn plain_policy_drops_every_trajectory() -> anyhow::Result<()> {
        let text = r#"{"goal":"g","steps":[{"text":"Move","object_label":"mug","trajectory":[{"point":[1,2]}]}]}"#;
        let response = parse_steps(Some(text.to_string()), TrajectoryPolicy::None)?;
        assert_eq!(response.steps[0].trajectory, None);
        Ok(())
    }
}
