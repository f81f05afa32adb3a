//! Activity Ledger
//!
//! The ordered steps of one routine together with their completion flags.
//! Positions are always `0..len` in order; the only way to flip a flag is
//! [`ActivityLedger::mark_complete`].

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    pub position: usize,
    pub name: String,
    pub completed: bool,
    pub completed_at: Option<i64>,
}

impl Activity {
    /// Identity used for matching: lowercase, single-spaced.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Lowercase a name and collapse its whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Persisted form of one activity. Older rows store bare names.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredActivity {
    Name(String),
    Entry {
        name: String,
        #[serde(default)]
        completed: bool,
        #[serde(default)]
        completed_at: Option<i64>,
        #[serde(default)]
        position: Option<usize>,
    },
}

#[derive(Serialize)]
struct LedgerEntry<'a> {
    name: &'a str,
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ActivityLedger {
    activities: Vec<Activity>,
}

impl ActivityLedger {
    /// Build a fresh ledger. Names are trimmed; blank names are dropped.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ledger = Self::default();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() {
                ledger.push(name);
            }
        }
        ledger
    }

    /// Parse the persisted JSON column. An empty column is an empty ledger.
    pub fn parse(json: &str) -> Result<Self, LedgerError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let stored: Vec<StoredActivity> =
            serde_json::from_str(json).map_err(|e| LedgerError::Parse(e.to_string()))?;

        let mut activities = Vec::with_capacity(stored.len());
        for (index, entry) in stored.into_iter().enumerate() {
            let activity = match entry {
                StoredActivity::Name(name) => Activity {
                    position: index,
                    name,
                    completed: false,
                    completed_at: None,
                },
                StoredActivity::Entry { name, completed, completed_at, position } => {
                    if let Some(position) = position {
                        if position != index {
                            return Err(LedgerError::NonContiguous { index, position });
                        }
                    }
                    Activity {
                        position: index,
                        name,
                        completed,
                        completed_at: if completed { completed_at } else { None },
                    }
                }
            };
            activities.push(activity);
        }
        Ok(Self { activities })
    }

    /// Encode as the persisted JSON column: an ordered list of `{name, completed}`.
    pub fn to_json(&self) -> Result<String, LedgerError> {
        let entries: Vec<LedgerEntry<'_>> = self
            .activities
            .iter()
            .map(|a| LedgerEntry {
                name: &a.name,
                completed: a.completed,
                completed_at: a.completed_at,
            })
            .collect();
        serde_json::to_string(&entries).map_err(|e| LedgerError::Encode(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Activity> {
        self.activities.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Activity> {
        self.activities.iter()
    }

    pub fn completed_count(&self) -> usize {
        self.activities.iter().filter(|a| a.completed).count()
    }

    /// Position of the lowest-index incomplete activity.
    pub fn first_incomplete(&self) -> Option<usize> {
        self.activities.iter().position(|a| !a.completed)
    }

    /// Mark one activity complete. Returns `false` if it already was.
    pub fn mark_complete(&mut self, index: usize, now: i64) -> Result<bool, LedgerError> {
        let len = self.activities.len();
        let activity = self
            .activities
            .get_mut(index)
            .ok_or(LedgerError::OutOfRange { index, len })?;
        if activity.completed {
            return Ok(false);
        }
        activity.completed = true;
        activity.completed_at = Some(now);
        Ok(true)
    }

    /// Clear every completion flag.
    pub fn reset(&mut self) {
        for activity in &mut self.activities {
            activity.completed = false;
            activity.completed_at = None;
        }
    }

    pub(crate) fn push(&mut self, name: &str) -> usize {
        let position = self.activities.len();
        self.activities.push(Activity {
            position,
            name: name.to_string(),
            completed: false,
            completed_at: None,
        });
        position
    }
}
