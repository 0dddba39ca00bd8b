use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ContractError, ContractResult};
use crate::plan::Plan;

pub const GOAL_ID_MAX_LEN: usize = 64;

/// Flat keyed store of plans: one pretty-printed JSON file per goal id.
///
/// The store does not serialize writers; callers refreshing the same id
/// concurrently must hold a per-id lock.
#[derive(Debug, Clone)]
pub struct GoalStore {
    root: PathBuf,
}

impl GoalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh identifier for a newly generated plan.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    pub fn path_for(&self, id: &str) -> ContractResult<PathBuf> {
        let id = validate_goal_id(id)?;
        Ok(self.root.join(format!("{id}.json")))
    }

    pub fn events_path_for(&self, id: &str) -> ContractResult<PathBuf> {
        let id = validate_goal_id(id)?;
        Ok(self.root.join(format!("{id}.events.jsonl")))
    }

    pub fn contains(&self, id: &str) -> ContractResult<bool> {
        Ok(self.path_for(id)?.is_file())
    }

    pub fn load(&self, id: &str) -> ContractResult<Plan> {
        let path = self.path_for(id)?;
        if !path.is_file() {
            return Err(ContractError::GoalNotFound { id: id.trim().to_string() });
        }
        read_plan(&path)
    }

    pub fn save(&self, id: &str, plan: &Plan) -> ContractResult<PathBuf> {
        let path = self.path_for(id)?;
        write_plan(&path, plan)?;
        debug!(goal_id = id.trim(), path = %path.display(), "persisted plan");
        Ok(path)
    }
}

/// Trims `id` and checks it against `[A-Za-z0-9_-]{1,64}`.
pub fn validate_goal_id(id: &str) -> ContractResult<&str> {
    let trimmed = id.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= GOAL_ID_MAX_LEN
        && trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if !valid {
        return Err(ContractError::InvalidGoalId { id: id.to_string() });
    }
    Ok(trimmed)
}

pub fn read_plan(path: &Path) -> ContractResult<Plan> {
    let raw = fs::read_to_string(path).map_err(|err| ContractError::io(path, err))?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn write_plan(path: &Path, plan: &Plan) -> ContractResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| ContractError::io(parent, err))?;
    }
    fs::write(path, serde_json::to_string_pretty(plan)?)
        .map_err(|err| ContractError::io(path, err))?;
    Ok(())
}
