use serde::{Deserialize, Serialize};

use crate::geometry::{box_to_pixels, NormalizedBox, NormalizedPoint};

/// Literal prefix marking a step as completed. Matching is case-insensitive
/// and ignores leading whitespace.
pub const DONE_PREFIX: &str = "[DONE] ";
const DONE_TOKEN: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    /// `None` when the object is not visible in the current scene.
    #[serde(rename = "box_2d")]
    pub bbox: Option<NormalizedBox>,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, bbox: Option<NormalizedBox>) -> Self {
        Self {
            label: label.into(),
            bbox,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub point: NormalizedPoint,
}

impl TrajectoryPoint {
    pub fn new(y: i32, x: i32) -> Self {
        Self {
            point: NormalizedPoint::new(y, x),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub text: String,
    pub object_label: String,
    #[serde(default)]
    pub trajectory: Option<Vec<TrajectoryPoint>>,
}

impl PlanStep {
    pub fn new(text: impl Into<String>, object_label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            object_label: object_label.into(),
            trajectory: None,
        }
    }

    pub fn with_trajectory(mut self, points: Vec<TrajectoryPoint>) -> Self {
        self.trajectory = Some(points);
        self
    }

    pub fn is_done(&self) -> bool {
        self.text
            .trim_start()
            .get(..DONE_TOKEN.len())
            .map(|head| head.eq_ignore_ascii_case(DONE_TOKEN))
            .unwrap_or(false)
    }

    pub fn status(&self) -> StepStatus {
        if self.is_done() {
            StepStatus::Done
        } else {
            StepStatus::Pending
        }
    }

    /// Prefixes the text with [`DONE_PREFIX`] unless it already carries it.
    pub fn mark_done(&mut self) {
        if !self.is_done() {
            self.text = format!("{DONE_PREFIX}{}", self.text.trim_start());
        }
    }

    pub fn trajectory_points(&self) -> &[TrajectoryPoint] {
        self.trajectory.as_deref().unwrap_or_default()
    }
}

/// Completion state derived from the `[DONE]` text convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Done,
}

/// Aggregate root: field order `goal, objects, steps` is part of the
/// persisted format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub objects: Vec<DetectedObject>,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Open,
    Complete,
}

impl Plan {
    pub fn find_object(&self, label: &str) -> Option<&DetectedObject> {
        find_object_by_label(label, &self.objects)
    }

    pub fn actionable_steps(&self) -> Vec<PlanStep> {
        actionable_steps(&self.steps)
    }

    pub fn state(&self) -> PlanState {
        if self.steps.iter().any(|step| !step.is_done()) {
            PlanState::Open
        } else {
            PlanState::Complete
        }
    }

    /// Step labels that do not resolve to any object in this plan.
    pub fn unknown_step_labels(&self) -> Vec<String> {
        let mut unknown: Vec<String> = Vec::new();
        for step in &self.steps {
            if self.find_object(&step.object_label).is_some() {
                continue;
            }
            if !unknown.contains(&step.object_label) {
                unknown.push(step.object_label.clone());
            }
        }
        unknown
    }

    /// Copy of the plan with boxes expressed in absolute pixels of a
    /// `width` x `height` image, keeping `[ymin, xmin, ymax, xmax]` order.
    pub fn to_pixel_space(&self, width: u32, height: u32) -> PixelPlan {
        PixelPlan {
            goal: self.goal.clone(),
            objects: self
                .objects
                .iter()
                .map(|object| PixelObject {
                    label: object.label.clone(),
                    bbox: object
                        .bbox
                        .map(|bbox| box_to_pixels(bbox, width, height).to_yxyx()),
                })
                .collect(),
            steps: self.steps.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelObject {
    pub label: String,
    #[serde(rename = "box_2d")]
    pub bbox: Option<[u32; 4]>,
}

/// Client-facing plan with pixel-space boxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPlan {
    pub goal: String,
    pub objects: Vec<PixelObject>,
    pub steps: Vec<PlanStep>,
}

impl PixelPlan {
    pub fn retain_actionable(mut self) -> Self {
        self.steps.retain(|step| !step.is_done());
        self
    }
}

/// Trimmed, lower-cased label used for every cross-reference lookup.
pub fn label_key(label: &str) -> String {
    label.trim().to_lowercase()
}

pub fn find_object_by_label<'a>(
    label: &str,
    objects: &'a [DetectedObject],
) -> Option<&'a DetectedObject> {
    let key = label_key(label);
    if key.is_empty() {
        return None;
    }
    objects.iter().find(|object| label_key(&object.label) == key)
}

pub fn actionable_steps(steps: &[PlanStep]) -> Vec<PlanStep> {
    steps
        .iter()
        .filter(|step| step.status() == StepStatus::Pending)
        .cloned()
        .collect()
}

/// Rebuilds `reference` with boxes taken from same-label entries of
/// `updated`. Order and labels always come from `reference`; reference
/// objects without a match lose their box; extra updated entries are dropped.
pub fn merge_objects(
    reference: &[DetectedObject],
    updated: &[DetectedObject],
) -> Vec<DetectedObject> {
    reference
        .iter()
        .map(|object| DetectedObject {
            label: object.label.clone(),
            bbox: find_object_by_label(&object.label, updated).and_then(|found| found.bbox),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn object(label: &str, bbox: Option<[i32; 4]>) -> DetectedObject {
        DetectedObject::new(label, bbox.map(NormalizedBox))
    }

    #[test]
    fn done_prefix_is_case_insensitive_and_ignores_leading_space() {
        assert!(PlanStep::new("[DONE] Move the mug", "mug").is_done());
        assert!(PlanStep::new("  [done] move the mug", "mug").is_done());
        assert!(PlanStep::new("[Done]Move", "mug").is_done());
        assert!(!PlanStep::new("Move the mug [DONE]", "mug").is_done());
        assert!(!PlanStep::new("[DON", "mug").is_done());
        assert!(!PlanStep::new("", "mug").is_done());
    }

    #[test]
    fn mark_done_is_idempotent() {
        let mut step = PlanStep::new("Open the drawer", "drawer");
        step.mark_done();
        assert_eq!(step.text, "[DONE] Open the drawer");
        step.mark_done();
        assert_eq!(step.text, "[DONE] Open the drawer");
        assert_eq!(step.status(), StepStatus::Done);
    }

    #[test]
    fn actionable_steps_drops_only_done_steps_and_keeps_order() {
        let all_done = vec![
            PlanStep::new("[DONE] a", "x"),
            PlanStep::new("[done] b", "x"),
        ];
        assert!(actionable_steps(&all_done).is_empty());

        let none_done = vec![
            PlanStep::new("first", "x"),
            PlanStep::new("second", "y"),
            PlanStep::new("third", "z"),
        ];
        assert_eq!(actionable_steps(&none_done), none_done);

        let mixed = vec![
            PlanStep::new("[DONE] first", "x"),
            PlanStep::new("second", "y"),
            PlanStep::new("[DONE] third", "z"),
            PlanStep::new("fourth", "z"),
        ];
        let texts: Vec<String> = actionable_steps(&mixed)
            .into_iter()
            .map(|step| step.text)
            .collect();
        assert_eq!(texts, vec!["second", "fourth"]);
    }

    #[test]
    fn merge_objects_keeps_reference_order_and_drops_extras() {
        let reference = vec![
            object("A", Some([1, 1, 2, 2])),
            object("B", Some([3, 3, 4, 4])),
            object("C", Some([5, 5, 6, 6])),
        ];
        let updated = vec![
            object(" c ", Some([50, 50, 60, 60])),
            object("a", Some([10, 10, 20, 20])),
            object("D", Some([7, 7, 8, 8])),
        ];
        let merged = merge_objects(&reference, &updated);
        assert_eq!(
            merged,
            vec![
                object("A", Some([10, 10, 20, 20])),
                object("B", None),
                object("C", Some([50, 50, 60, 60])),
            ]
        );
    }

    #[test]
    fn merge_objects_takes_first_duplicate_and_null_boxes() {
        let reference = vec![object("cup", Some([1, 1, 2, 2]))];
        let updated = vec![object("CUP", None), object("cup", Some([9, 9, 10, 10]))];
        assert_eq!(merge_objects(&reference, &updated), vec![object("cup", None)]);
    }

    #[test]
    fn plan_json_round_trip_preserves_nulls_and_empty_trajectories() -> anyhow::Result<()> {
        let plan = Plan {
            goal: "Tidy the desk".to_string(),
            objects: vec![
                object("red mug", Some([100, 100, 300, 300])),
                object("stapler", None),
            ],
            steps: vec![
                PlanStep::new("Move the red mug", "red mug")
                    .with_trajectory(vec![TrajectoryPoint::new(200, 200), TrajectoryPoint::new(50, 900)]),
                PlanStep::new("Put away the stapler", "stapler").with_trajectory(Vec::new()),
                PlanStep::new("[DONE] Clear papers", "stapler"),
            ],
        };
        let raw = serde_json::to_string_pretty(&plan)?;
        let parsed: Plan = serde_json::from_str(&raw)?;
        assert_eq!(parsed, plan);

        let value: Value = serde_json::from_str(&raw)?;
        let keys: Vec<&str> = value
            .as_object()
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default();
        assert_eq!(keys, vec!["goal", "objects", "steps"]);
        assert_eq!(value["objects"][1]["box_2d"], Value::Null);
        assert_eq!(value["steps"][1]["trajectory"], json!([]));
        assert_eq!(value["steps"][2]["trajectory"], Value::Null);
        Ok(())
    }

    #[test]
    fn plan_parses_records_without_trajectory_field() -> anyhow::Result<()> {
        let plan: Plan = serde_json::from_value(json!({
            "goal": "Tidy the desk",
            "objects": [{"label": "red mug", "box_2d": [100, 100, 300, 300]}],
            "steps": [{"text": "Move the red mug to the shelf", "object_label": "red mug"}]
        }))?;
        assert_eq!(plan.steps[0].trajectory, None);
        assert_eq!(plan.objects[0].bbox, Some(NormalizedBox::new(100, 100, 300, 300)));
        Ok(())
    }

    #[test]
    fn plan_state_tracks_actionable_steps() {
        let mut plan = Plan {
            goal: "g".to_string(),
            objects: vec![object("mug", None)],
            steps: vec![PlanStep::new("Move the mug", "mug")],
        };
        assert_eq!(plan.state(), PlanState::Open);
        plan.steps[0].mark_done();
        assert_eq!(plan.state(), PlanState::Complete);
        plan.steps.clear();
        assert_eq!(plan.state(), PlanState::Complete);
    }

    #[test]
    fn unknown_step_labels_are_reported_once() {
        let plan = Plan {
            goal: "g".to_string(),
            objects: vec![object("Red Mug", None)],
            steps: vec![
                PlanStep::new("a", " red mug "),
                PlanStep::new("b", "shelf"),
                PlanStep::new("c", "shelf"),
            ],
        };
        assert_eq!(plan.unknown_step_labels(), vec!["shelf".to_string()]);
    }

    #[test]
    fn pixel_space_converts_boxes_and_keeps_steps() {
        let plan = Plan {
            goal: "g".to_string(),
            objects: vec![object("mug", Some([100, 200, 300, 400])), object("lid", None)],
            steps: vec![
                PlanStep::new("[DONE] lift", "mug"),
                PlanStep::new("place", "mug").with_trajectory(vec![TrajectoryPoint::new(10, 20)]),
            ],
        };
        let pixel = plan.to_pixel_space(1000, 500).retain_actionable();
        assert_eq!(pixel.objects[0].bbox, Some([50, 200, 150, 400]));
        assert_eq!(pixel.objects[1].bbox, None);
        assert_eq!(pixel.steps.len(), 1);
        assert_eq!(pixel.steps[0].trajectory_points(), &[TrajectoryPoint::new(10, 20)]);
    }
}
