//! Milestone Tables
//!
//! A milestone is a literal substring a tool prints when it reaches a known
//! point of its run, paired with the job progress that point stands for.
//! Tables are configuration data (they depend on the installed tool version),
//! so they are validated on construction rather than trusted.

use phylo_pipeline_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// One progress marker in a tool's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Case-sensitive substring to look for
    pub pattern: String,
    /// Progress percentage reached when the pattern is seen
    pub percent: u8,
}

impl Milestone {
    pub fn new(pattern: impl Into<String>, percent: u8) -> Self {
        Self {
            pattern: pattern.into(),
            percent,
        }
    }
}

/// Ordered milestones with strictly ascending percentages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Milestone>", into = "Vec<Milestone>")]
pub struct MilestoneTable {
    milestones: Vec<Milestone>,
}

impl MilestoneTable {
    /// Build a table, rejecting empty patterns, percentages above 100 and
    /// percentages that do not strictly increase.
    pub fn new(milestones: Vec<Milestone>) -> CoreResult<Self> {
        let mut previous: Option<u8> = None;
        for milestone in &milestones {
            if milestone.pattern.is_empty() {
                return Err(CoreError::validation("milestone pattern must not be empty"));
            }
            if milestone.percent > 100 {
                return Err(CoreError::validation(format!(
                    "milestone '{}' exceeds 100% ({})",
                    milestone.pattern, milestone.percent
                )));
            }
            if let Some(prev) = previous {
                if milestone.percent <= prev {
                    return Err(CoreError::validation(format!(
                        "milestone '{}' ({}%) must be above the previous one ({}%)",
                        milestone.pattern, milestone.percent, prev
                    )));
                }
            }
            previous = Some(milestone.percent);
        }
        Ok(Self { milestones })
    }

    /// A table with no milestones.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.milestones.is_empty()
    }

    pub fn len(&self) -> usize {
        self.milestones.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Milestone> {
        self.milestones.iter()
    }

    /// Replace `placeholder` in every pattern, e.g. `{bootstrap}` with the
    /// requested replicate count.
    pub fn substitute(&self, placeholder: &str, value: &str) -> Self {
        Self {
            milestones: self
                .milestones
                .iter()
                .map(|m| Milestone::new(m.pattern.replace(placeholder, value), m.percent))
                .collect(),
        }
    }

    /// Drop every milestone whose pattern still contains `placeholder`.
    pub fn without_placeholder(&self, placeholder: &str) -> Self {
        Self {
            milestones: self
                .milestones
                .iter()
                .filter(|m| !m.pattern.contains(placeholder))
                .cloned()
                .collect(),
        }
    }

    /// Start tracking matches for one stage run.
    pub fn tracker(&self) -> MilestoneTracker {
        MilestoneTracker {
            matched: vec![false; self.milestones.len()],
            table: self.clone(),
        }
    }
}

impl TryFrom<Vec<Milestone>> for MilestoneTable {
    type Error = CoreError;

    fn try_from(milestones: Vec<Milestone>) -> CoreResult<Self> {
        MilestoneTable::new(milestones)
    }
}

impl From<MilestoneTable> for Vec<Milestone> {
    fn from(table: MilestoneTable) -> Self {
        table.milestones
    }
}

/// Remembers which milestones of a table have already fired.
#[derive(Debug, Clone)]
pub struct MilestoneTracker {
    table: MilestoneTable,
    matched: Vec<bool>,
}

impl MilestoneTracker {
    /// Check newly observed text. Returns the percentages of milestones
    /// matched for the first time, in table order. A milestone never fires
    /// twice.
    pub fn observe(&mut self, text: &str) -> Vec<u8> {
        let mut fired = Vec::new();
        for (milestone, matched) in self.table.milestones.iter().zip(self.matched.iter_mut()) {
            if !*matched && text.contains(milestone.pattern.as_str()) {
                *matched = true;
                fired.push(milestone.percent);
            }
        }
        fired
    }

    /// Number of milestones that have fired.
    pub fn matched_count(&self) -> usize {
        self.matched.iter().filter(|m| **m).count()
    }

    /// Whether every milestone has fired.
    pub fn is_exhausted(&self) -> bool {
        self.matched.iter().all(|m| *m)
    }
}
