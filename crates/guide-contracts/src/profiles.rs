use indexmap::IndexMap;

pub const DEFAULT_PROFILE: &str = "default";

/// Which steps may carry trajectory waypoints, and how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryPolicy {
    None,
    FirstStepOnly { max_points: usize },
    PerStep { max_points: usize },
}

impl TrajectoryPolicy {
    pub fn max_points(&self) -> usize {
        match self {
            Self::None => 0,
            Self::FirstStepOnly { max_points } | Self::PerStep { max_points } => *max_points,
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_points() > 0
    }

    /// Whether the step at `actionable_index` (0 = next to do) may keep a
    /// trajectory. Done steps never do under first-step-only.
    pub fn allows(&self, actionable_index: Option<usize>) -> bool {
        match self {
            Self::None => false,
            Self::FirstStepOnly { .. } => actionable_index == Some(0),
            Self::PerStep { .. } => true,
        }
    }
}

/// Everything that distinguishes one planning variant from another; the
/// workflow state machine itself is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningProfile {
    pub name: String,
    pub description: String,
    pub trajectory: TrajectoryPolicy,
    pub analysis_temperature: f32,
    pub completion_temperature: f32,
    /// `-1` lets the model pick its own budget, `0` disables thinking.
    pub thinking_budget: i32,
    pub analysis_width: u32,
    pub crop_width: u32,
    pub preview_width: u32,
    /// Free-form guidance appended to the analysis prompt.
    pub analysis_hint: Option<String>,
    /// Free-form guidance appended to the completion prompt.
    pub completion_hint: Option<String>,
}

impl PlanningProfile {
    fn base(name: &str, description: &str, trajectory: TrajectoryPolicy) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            trajectory,
            analysis_temperature: 0.5,
            completion_temperature: 0.3,
            thinking_budget: -1,
            analysis_width: 1600,
            crop_width: 1000,
            preview_width: 1600,
            analysis_hint: None,
            completion_hint: None,
        }
    }
}

impl Default for PlanningProfile {
    fn default() -> Self {
        default_profiles()
            .shift_remove(DEFAULT_PROFILE)
            .unwrap_or_else(|| {
                Self::base(
                    DEFAULT_PROFILE,
                    "Per-step trajectories",
                    TrajectoryPolicy::PerStep { max_points: 10 },
                )
            })
    }
}

#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: IndexMap<String, PlanningProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProfileRegistry {
    pub fn new(profiles: Option<IndexMap<String, PlanningProfile>>) -> Self {
        Self {
            profiles: profiles.unwrap_or_else(default_profiles),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PlanningProfile> {
        self.profiles.get(name.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &PlanningProfile> {
        self.profiles.values()
    }
}

fn default_profiles() -> IndexMap<String, PlanningProfile> {
    let mut map = IndexMap::new();
    let mut insert = |profile: PlanningProfile| {
        map.insert(profile.name.clone(), profile);
    };

    insert(PlanningProfile::base(
        DEFAULT_PROFILE,
        "Steps may carry up to 10 trajectory waypoints each.",
        TrajectoryPolicy::PerStep { max_points: 10 },
    ));
    let mut first_step = PlanningProfile::base(
        "first-step",
        "Only the next actionable step carries a trajectory, up to 5 waypoints.",
        TrajectoryPolicy::FirstStepOnly { max_points: 5 },
    );
    first_step.completion_hint = Some(
        "Keep trajectories short: describe only the motion needed for the next step.".to_string(),
    );
    insert(first_step);
    insert(PlanningProfile::base(
        "plain",
        "Steps without trajectories.",
        TrajectoryPolicy::None,
    ));

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_builtin_profiles_in_order() {
        let registry = ProfileRegistry::default();
        let names: Vec<&str> = registry.list().map(|profile| profile.name.as_str()).collect();
        assert_eq!(names, vec!["default", "first-step", "plain"]);
        assert!(registry.list().all(|profile| !profile.description.is_empty()));
        assert_eq!(
            registry.get(" first-step ").map(|profile| profile.trajectory),
            Some(TrajectoryPolicy::FirstStepOnly { max_points: 5 })
        );
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn default_profile_matches_registry_entry() {
        let profile = PlanningProfile::default();
        assert_eq!(profile.name, DEFAULT_PROFILE);
        assert_eq!(profile.trajectory.max_points(), 10);
        assert_eq!(profile.analysis_width, 1600);
        assert_eq!(profile.crop_width, 1000);
        assert_eq!(profile.thinking_budget, -1);
    }

    #[test]
    fn trajectory_policy_allows_by_position() {
        let first = TrajectoryPolicy::FirstStepOnly { max_points: 5 };
        assert!(first.allows(Some(0)));
        assert!(!first.allows(Some(1)));
        assert!(!first.allows(None));

        let per_step = TrajectoryPolicy::PerStep { max_points: 10 };
        assert!(per_step.allows(Some(3)));
        assert!(per_step.allows(None));

        assert!(!TrajectoryPolicy::None.allows(Some(0)));
        assert!(!TrajectoryPolicy::None.enabled());
    }
}
