use guide_contracts::{DetectedObject, Plan, PlanStep, PlanningProfile, TrajectoryPolicy};

const ANALYSIS_PROMPT: &str = "\
Inspect the provided image and infer a single high-level goal that represents the most reasonable outcome in the situation.
Express the goal as a short imperative sentence grounded solely in the visual evidence.

Identify the objects that are relevant to achieving the goal and provide their bounding boxes.
Each detected object must be assigned a unique identifying label.
Represent every bounding box using \"box_2d\": [ymin, xmin, ymax, xmax] with each coordinate normalized to the 0-1000 range (integers).

Return a JSON object structured as:
{
    \"goal\": <goal>,
    \"objects\": [{\"label\": <label>, \"box_2d\": [ymin, xmin, ymax, xmax]}, ...]
}";

pub fn analysis_prompt(profile: &PlanningProfile) -> String {
    with_hint(ANALYSIS_PROMPT.to_string(), profile.analysis_hint.as_deref())
}

pub fn steps_prompt(
    goal: &str,
    objects: &[DetectedObject],
    crop_count: usize,
    profile: &PlanningProfile,
) -> String {
    let objects_summary = if objects.is_empty() {
        "No objects were detected in the first pass.".to_string()
    } else {
        objects
            .iter()
            .enumerate()
            .map(|(idx, object)| match object.bbox {
                Some(bbox) => format!("{}. {}: box_2d {:?}", idx + 1, object.label, bbox.0),
                None => format!("{}. {}: box_2d null", idx + 1, object.label),
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let attachment_note = if crop_count > 0 {
        " and cropped close-up images for each listed object (these attachments follow the scene image in the same order)."
    } else {
        ". No cropped close-up images are available; rely solely on the scene image."
    };
    let trajectory = profile.trajectory;

    let mut prompt = format!(
        "Initial goal: {goal}

You are given the original scene image (first attachment){attachment_note}
Use the initial goal, the object metadata, and any new evidence from the close-up crops to reason about the best final goal.

Objects:
{objects_summary}

If the initial goal already fits, repeat it verbatim. Otherwise, refine it to something more appropriate now that you have detailed context.
Produce an ordered list of detailed, clear, imperative manipulation steps that reference the object labels directly.
For each step set \"object_label\" to the single most relevant label taken verbatim from the list above.
"
    );
    if let Some(rule) = trajectory_rule(trajectory, "the first step") {
        prompt.push_str(&rule);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "Return JSON structured exactly as {{\"goal\": <final_goal>, \"steps\": [{}, ...]}} with the goal field appearing before steps.",
        step_shape(trajectory)
    ));
    prompt
}

pub fn completion_prompt(existing: &Plan, profile: &PlanningProfile) -> String {
    let goal = &existing.goal;
    let trajectory = profile.trajectory;
    let mut prompt = format!(
        "You previously generated a plan for a robot and are now checking progress.
Goal (repeat verbatim in the output): {goal}

Objects reference list:
{objects}

Prior ordered steps:
{steps}

Look at the updated scene image (attachment) and determine which steps have been completed.
Objects instructions:
- For each label above (and in the same order), inspect the latest image and provide its bounding box as normalized integers in [ymin, xmin, ymax, xmax] format spanning 0-1000.
- Do not introduce new labels or reorder them. When an object is not visible, set its box_2d to null.

Steps instructions:
- For each existing step, keep its object_label identical.
- When a step is fully satisfied, prefix its text with \"[DONE] \" but keep the rest of the wording.
- For steps that still require work, rewrite the text so it reflects what remains.
- Maintain the execution order from top to bottom so the robot knows what to do next.
- Add new steps at the end only if more actions are required to finish the unchanged goal. Use an object_label from the reference list; never invent new labels.
",
        objects = summarize_objects(&existing.objects),
        steps = summarize_steps(&existing.steps),
    );
    if let Some(rule) = trajectory_rule(trajectory, "the first step not prefixed with \"[DONE] \"") {
        prompt.push_str(&format!("- {rule}\n"));
    }
    prompt.push_str(&format!(
        "
Return JSON structured exactly as {{\"goal\": <goal>, \"objects\": [{{\"label\": <label>, \"box_2d\": [ymin, xmin, ymax, xmax] or null}}, ...], \"steps\": [{}, ...]}} with the goal field appearing before objects.
The \"goal\" field MUST be exactly: {goal}

If no steps were provided previously, create a fresh ordered list that the robot can follow from the current state to finish the goal.
",
        step_shape(trajectory)
    ));
    with_hint(prompt, profile.completion_hint.as_deref())
}

pub fn preview_prompt(step_text: &str) -> String {
    format!("Using the provided image, apply the following: {step_text}.")
}

fn summarize_objects(objects: &[DetectedObject]) -> String {
    if objects.is_empty() {
        return "No objects were provided.".to_string();
    }
    objects
        .iter()
        .enumerate()
        .map(|(idx, object)| format!("{}. {}", idx + 1, object.label))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarize_steps(steps: &[PlanStep]) -> String {
    if steps.is_empty() {
        return "(No previous steps. You may generate a fresh ordered list.)".to_string();
    }
    steps
        .iter()
        .enumerate()
        .map(|(idx, step)| {
            format!(
                "{}. {} (object_label: {})",
                idx + 1,
                step.text,
                step.object_label
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn trajectory_rule(policy: TrajectoryPolicy, first_step: &str) -> Option<String> {
    match policy {
        TrajectoryPolicy::None => None,
        TrajectoryPolicy::FirstStepOnly { max_points } => Some(format!(
            "For {first_step} only, when it moves an object, add \"trajectory\": up to {max_points} waypoints {{\"point\": [y, x]}} normalized to 0-1000 that trace the motion path. Omit trajectory on every other step."
        )),
        TrajectoryPolicy::PerStep { max_points } => Some(format!(
            "For any step that moves an object, add \"trajectory\": up to {max_points} waypoints {{\"point\": [y, x]}} normalized to 0-1000 that trace the motion path. Omit trajectory when no motion is involved."
        )),
    }
}

fn step_shape(policy: TrajectoryPolicy) -> &'static str {
    if policy.enabled() {
        "{\"text\": <step_text>, \"object_label\": <object_label>, \"trajectory\": [{\"point\": [y, x]}, ...] or null}"
    } else {
        "{\"text\": <step_text>, \"object_label\": <object_label>}"
    }
}

fn with_hint(mut prompt: String, hint: Option<&str>) -> String {
    if let Some(hint) = hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        if !prompt.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push('\n');
        prompt.push_str(hint);
    }
    prompt
}
