use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{ContractError, ContractResult};
use crate::plan::Plan;

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanEventKind {
    PlanGenerated,
    PlanRefreshed,
}

impl PlanEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanGenerated => "plan_generated",
            Self::PlanRefreshed => "plan_refreshed",
        }
    }
}

/// Append-only `events.jsonl` journal for one goal.
///
/// Every line carries `type`, `goal_id` and `ts`; the caller payload is
/// merged last and may override them. The journal holds no lock: callers
/// must serialize appends for a goal, as the server does with its per-goal
/// lock.
#[derive(Debug, Clone)]
pub struct PlanJournal {
    path: PathBuf,
    goal_id: String,
}

impl PlanJournal {
    pub fn new(path: impl Into<PathBuf>, goal_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            goal_id: goal_id.into(),
        }
    }

    fn emit(&self, event_type: &str, payload: EventPayload) -> ContractResult<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("goal_id".to_string(), Value::String(self.goal_id.clone()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| ContractError::io(parent, err))?;
        }

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|err| ContractError::io(&self.path, err))?;

        Ok(Value::Object(event))
    }

    /// Records a workflow outcome with plan counts and artifact flags.
    pub fn record(
        &self,
        kind: PlanEventKind,
        plan: &Plan,
        highlight: bool,
        preview: bool,
    ) -> ContractResult<Value> {
        self.emit(kind.as_str(), plan_summary(plan, highlight, preview))
    }
}

pub fn plan_summary(plan: &Plan, highlight: bool, preview: bool) -> EventPayload {
    let mut payload = EventPayload::new();
    payload.insert("goal".to_string(), Value::String(plan.goal.clone()));
    payload.insert("objects".to_string(), Value::from(plan.objects.len()));
    payload.insert(
        "visible_objects".to_string(),
        Value::from(plan.objects.iter().filter(|object| object.bbox.is_some()).count()),
    );
    payload.insert("steps".to_string(), Value::from(plan.steps.len()));
    payload.insert(
        "actionable_steps".to_string(),
        Value::from(plan.actionable_steps().len()),
    );
    payload.insert("highlight".to_string(), Value::Bool(highlight));
    payload.insert("preview".to_string(), Value::Bool(preview));
    payload
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use crate::plan::{DetectedObject, PlanStep};

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("goal.events.jsonl");
        let journal = PlanJournal::new(&path, "goal-123");

        let mut payload = EventPayload::new();
        payload.insert("note".to_string(), Value::String("hello".to_string()));
        let emitted = journal.emit("custom", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("custom".to_string()));
        assert_eq!(parsed["goal_id"], Value::String("goal-123".to_string()));
        assert_eq!(parsed["note"], Value::String("hello".to_string()));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn record_counts_actionable_steps_and_visible_objects() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("g.jsonl");
        let journal = PlanJournal::new(&path, "g");
        let plan = Plan {
            goal: "Tidy".to_string(),
            objects: vec![
                DetectedObject::new("mug", None),
                DetectedObject::new("book", Some(crate::geometry::NormalizedBox::new(1, 2, 3, 4))),
            ],
            steps: vec![
                PlanStep::new("[DONE] move mug", "mug"),
                PlanStep::new("shelve book", "book"),
            ],
        };
        journal.record(PlanEventKind::PlanGenerated, &plan, true, false)?;
        let event = journal.record(PlanEventKind::PlanRefreshed, &plan, false, false)?;

        assert_eq!(event["type"], "plan_refreshed");
        assert_eq!(event["objects"], 2);
        assert_eq!(event["visible_objects"], 1);
        assert_eq!(event["actionable_steps"], 1);
        assert_eq!(event["highlight"], false);

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 2);
        Ok(())
    }
}
