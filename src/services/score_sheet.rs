use std::collections::BTreeMap;

use chrono::Utc;
use tracing::warn;

use crate::error::ValidationError;
use crate::models::{Aspect, Rubric};
use crate::services::persistence::{ScopeKey, SheetSnapshot};

/// Aspect id -> committed score.
pub type Entries = BTreeMap<String, u32>;

/// A judge's in-progress scores for one (judge, form, event, team) context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreSheet {
    pub judge_id: Option<String>,
    pub form_id: Option<String>,
    pub event_id: Option<String>,
    pub team_id: Option<String>,
    entries: Entries,
}

impl ScoreSheet {
    pub fn new(judge_id: impl Into<String>) -> Self {
        Self {
            judge_id: Some(judge_id.into()),
            ..Self::default()
        }
    }

    /// `None` until judge, form and event are all known.
    pub fn scope_key(&self) -> Option<ScopeKey> {
        match (&self.judge_id, &self.form_id, &self.event_id) {
            (Some(judge), Some(form), Some(event)) => Some(ScopeKey::new(judge, form, event)),
            _ => None,
        }
    }

    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    pub fn get_score(&self, aspect_id: &str) -> u32 {
        self.entries.get(aspect_id).copied().unwrap_or(0)
    }

    /// Stores `value` for the aspect. Values outside `[0, max_score]` are rejected and leave
    /// the previous score in place; values outside every declared band are accepted.
    pub fn set_score(
        &mut self,
        rubric: &Rubric,
        aspect_id: &str,
        value: i64,
    ) -> Result<(), ValidationError> {
        let aspect = rubric
            .aspect(aspect_id)
            .ok_or_else(|| ValidationError::UnknownAspect(aspect_id.to_string()))?;
        self.set_aspect_score(aspect, value)
    }

    /// Parses raw numeric input before storing it.
    pub fn set_score_input(
        &mut self,
        rubric: &Rubric,
        aspect_id: &str,
        input: &str,
    ) -> Result<(), ValidationError> {
        let value = parse_score_input(input).ok_or_else(|| ValidationError::NotNumeric {
            aspect_id: aspect_id.to_string(),
            input: input.to_string(),
        })?;
        self.set_score(rubric, aspect_id, value)
    }

    pub fn set_aspect_score(&mut self, aspect: &Aspect, value: i64) -> Result<(), ValidationError> {
        if !aspect.accepts(value) {
            return Err(ValidationError::OutOfRange {
                aspect_id: aspect.id.clone(),
                value,
                max: aspect.max_score,
            });
        }
        // accepts() bounds the value to [0, max_score], which fits in u32.
        self.entries.insert(aspect.id.clone(), value as u32);
        Ok(())
    }

    /// Empties the entries; identity fields and team stay as they are.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn select_team(&mut self, team_id: Option<String>) {
        self.team_id = team_id;
    }

    /// Drops the team selection together with the scores that belonged to it.
    pub fn clear_team(&mut self) {
        self.team_id = None;
        self.entries.clear();
    }

    /// Moves to another event. Team and entries never carry over.
    pub fn switch_event(&mut self, event_id: Option<String>) {
        self.event_id = event_id;
        self.clear_team();
    }

    /// Moves to another form. Team and entries never carry over.
    pub fn switch_form(&mut self, form_id: Option<String>) {
        self.form_id = form_id;
        self.clear_team();
    }

    pub fn snapshot(&self) -> SheetSnapshot {
        SheetSnapshot {
            scores: self.entries.clone(),
            team_id: self.team_id.clone(),
            last_updated: Utc::now().timestamp_millis(),
        }
    }

    /// Replaces team and entries with a saved snapshot. Scores for aspects the rubric no longer
    /// has, or above their maximum, are dropped.
    pub fn hydrate(&mut self, rubric: &Rubric, snapshot: &SheetSnapshot) {
        self.team_id = snapshot.team_id.clone().filter(|id| !id.is_empty());
        self.entries.clear();
        for (aspect_id, value) in &snapshot.scores {
            if let Err(err) = self.set_score(rubric, aspect_id, i64::from(*value)) {
                warn!("Dropping saved score while restoring sheet: {err}");
            }
        }
    }
}

fn parse_score_input(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    // Integral decimals such as "12.0" count as numbers; anything fractional does not.
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.fract() == 0.0)
        .map(|v| v as i64)
}
