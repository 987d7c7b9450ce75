use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{StoreError, SubmissionError, ValidationError};
use crate::models::{Event, Participant, QualityBand, Rubric};
use crate::services::aggregator::{FormSummary, summarize_form};
use crate::services::backend::ScoringBackend;
use crate::services::participant_filter::{
    filter_by_event, ids_match, reconcile_selection, team_display_name,
};
use crate::services::persistence::PersistenceGateway;
use crate::services::quick_fill::{self, QuickFillOutcome};
use crate::services::rubric_repository::RubricRepository;
use crate::services::score_sheet::ScoreSheet;
use crate::services::submission::{self, SubmissionReceipt};

/// Identifies the (form, event) context a load was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextToken(u64);

/// One judge's scoring session: the active form, event and team, the sheet being filled in,
/// and the reference data needed to validate selections.
pub struct JudgeSession {
    backend: Arc<dyn ScoringBackend>,
    rubrics: Arc<RubricRepository>,
    gateway: PersistenceGateway,
    sheet: ScoreSheet,
    rubric: Option<Arc<Rubric>>,
    events: Vec<Event>,
    participants: Vec<Participant>,
    participants_loaded: bool,
    generation: u64,
}

impl JudgeSession {
    pub fn new(
        judge_id: impl Into<String>,
        backend: Arc<dyn ScoringBackend>,
        rubrics: Arc<RubricRepository>,
        gateway: PersistenceGateway,
    ) -> Self {
        Self {
            backend,
            rubrics,
            gateway,
            sheet: ScoreSheet::new(judge_id),
            rubric: None,
            events: Vec::new(),
            participants: Vec::new(),
            participants_loaded: false,
            generation: 0,
        }
    }

    /// Fetches the event and participant lists. A failed fetch keeps whatever was loaded before.
    pub async fn load_reference_data(&mut self) {
        match self.backend.list_events().await {
            Ok(events) => {
                info!("Loaded {} events", events.len());
                self.events = events;
            }
            Err(err) => warn!("Keeping {} cached events: {}", self.events.len(), err),
        }

        match self.backend.list_participants(None).await {
            Ok(participants) => {
                info!("Loaded {} participants", participants.len());
                self.participants = participants;
                self.participants_loaded = true;
            }
            Err(err) => warn!(
                "Keeping {} cached participants: {}",
                self.participants.len(),
                err
            ),
        }

        if self.participants_loaded {
            self.reconcile_team();
        }
    }

    pub fn sheet(&self) -> &ScoreSheet {
        &self.sheet
    }

    pub fn rubric(&self) -> Option<&Rubric> {
        self.rubric.as_deref()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn visible_teams(&self) -> Vec<&Participant> {
        match self.sheet.event_id.as_deref() {
            Some(event_id) => filter_by_event(&self.participants, event_id),
            None => Vec::new(),
        }
    }

    pub fn team_name(&self) -> Option<&str> {
        let team_id = self.sheet.team_id.as_deref()?;
        team_display_name(&self.participants, team_id)
    }

    /// Starts moving to another form. The previous scope's saved sheet is cleared and any load
    /// begun for the previous context becomes stale.
    pub fn begin_form_switch(&mut self, form_id: &str) -> ContextToken {
        self.leave_scope();
        info!(
            "Transition: form {} -> {}",
            self.sheet.form_id.as_deref().unwrap_or("-"),
            form_id
        );
        self.sheet.switch_form(Some(form_id.to_string()));
        self.rubric = None;
        self.next_token()
    }

    /// Installs a rubric loaded for `token`. Returns `false`, changing nothing, when the
    /// context has moved on since the load started.
    pub fn apply_rubric(&mut self, token: ContextToken, rubric: Arc<Rubric>) -> bool {
        if token.0 != self.generation {
            info!(
                "Ignoring rubric {} loaded for a previous context",
                rubric.id
            );
            return false;
        }
        self.rubric = Some(rubric);
        self.enter_scope();
        true
    }

    pub async fn select_form(&mut self, form_id: &str) {
        if self.sheet.form_id.as_deref() == Some(form_id) && self.rubric.is_some() {
            return;
        }
        let token = self.begin_form_switch(form_id);
        let rubric = self.rubrics.load(form_id).await;
        self.apply_rubric(token, rubric);
    }

    /// Moves to another event. The previous scope's saved sheet is cleared, the team and
    /// entries never carry over, and a sheet already saved under the new scope is restored.
    pub fn select_event(&mut self, event_id: &str) {
        if self.sheet.event_id.as_deref() == Some(event_id) {
            return;
        }
        self.leave_scope();
        info!(
            "Transition: event {} -> {}",
            self.sheet.event_id.as_deref().unwrap_or("-"),
            event_id
        );
        self.sheet.switch_event(Some(event_id.to_string()));
        self.next_token();
        self.enter_scope();
    }

    /// Selects the team to score. Switching from another team starts a fresh sheet.
    pub fn select_team(&mut self, team_id: &str) -> Result<(), ValidationError> {
        let Some(event_id) = self.sheet.event_id.as_deref() else {
            return Err(ValidationError::MissingContext("event"));
        };
        if self.participants_loaded
            && !filter_by_event(&self.participants, event_id)
                .iter()
                .any(|p| ids_match(&p.id, team_id))
        {
            return Err(ValidationError::TeamNotVisible(team_id.to_string()));
        }
        if self
            .sheet
            .team_id
            .as_deref()
            .is_some_and(|current| ids_match(current, team_id))
        {
            return Ok(());
        }

        if self.sheet.team_id.is_some() || !self.sheet.entries().is_empty() {
            self.sheet.clear_team();
            if let Err(err) = self.clear_saved() {
                warn!("Failed to clear saved sheet on team switch: {err}");
            }
        }
        info!("Transition: team -> {}", team_id);
        self.sheet.select_team(Some(team_id.to_string()));
        self.persist();
        Ok(())
    }

    pub fn set_score(&mut self, aspect_id: &str, value: i64) -> Result<(), ValidationError> {
        let rubric = self.active_rubric()?;
        self.sheet.set_score(&rubric, aspect_id, value)?;
        self.persist();
        Ok(())
    }

    pub fn set_score_input(&mut self, aspect_id: &str, input: &str) -> Result<(), ValidationError> {
        let rubric = self.active_rubric()?;
        self.sheet.set_score_input(&rubric, aspect_id, input)?;
        self.persist();
        Ok(())
    }

    pub fn quick_fill_aspect(
        &mut self,
        aspect_id: &str,
        tier: QualityBand,
    ) -> Result<Option<u32>, ValidationError> {
        let rubric = self.active_rubric()?;
        let aspect = rubric
            .aspect(aspect_id)
            .ok_or_else(|| ValidationError::UnknownAspect(aspect_id.to_string()))?;
        let applied = quick_fill::quick_fill_aspect(&mut self.sheet, aspect, tier)?;
        if applied.is_some() {
            self.persist();
        }
        Ok(applied)
    }

    pub fn quick_fill_category(
        &mut self,
        category_name: &str,
        tier: QualityBand,
    ) -> Result<QuickFillOutcome, ValidationError> {
        let rubric = self.active_rubric()?;
        let category = rubric
            .category(category_name)
            .ok_or_else(|| ValidationError::UnknownCategory(category_name.to_string()))?;
        let outcome = quick_fill::quick_fill_category(&mut self.sheet, category, tier)?;
        if outcome.changed() {
            self.persist();
        }
        Ok(outcome)
    }

    /// Quick-fills every category of the active rubric.
    pub fn quick_fill_all(&mut self, tier: QualityBand) -> Result<QuickFillOutcome, ValidationError> {
        let rubric = self.active_rubric()?;
        let mut outcome = QuickFillOutcome::default();
        for category in &rubric.categories {
            let filled = quick_fill::quick_fill_category(&mut self.sheet, category, tier)?;
            outcome.applied.extend(filled.applied);
            outcome.skipped.extend(filled.skipped);
        }
        if outcome.changed() {
            self.persist();
        }
        Ok(outcome)
    }

    /// Discards the current scores, in memory and on disk.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        info!("Resetting score sheet");
        self.sheet.clear_all();
        self.clear_saved()
    }

    pub fn summary(&self) -> Option<FormSummary> {
        let rubric = self.rubric.as_deref()?;
        Some(summarize_form(rubric, self.sheet.entries()))
    }

    pub async fn submit(&mut self) -> Result<SubmissionReceipt, SubmissionError> {
        let rubric = self.active_rubric()?;
        submission::submit(self.backend.as_ref(), &self.gateway, &mut self.sheet, &rubric).await
    }

    /// Writes any pending debounced save right away.
    pub fn flush(&self) {
        self.gateway.flush();
    }

    fn active_rubric(&self) -> Result<Arc<Rubric>, ValidationError> {
        self.rubric.clone().ok_or(ValidationError::RubricNotLoaded)
    }

    fn next_token(&mut self) -> ContextToken {
        self.generation += 1;
        ContextToken(self.generation)
    }

    fn persist(&self) {
        if let Some(key) = self.sheet.scope_key() {
            self.gateway.save(&key, self.sheet.snapshot());
        }
    }

    fn clear_saved(&self) -> Result<(), StoreError> {
        match self.sheet.scope_key() {
            Some(key) => self.gateway.clear(&key),
            None => Ok(()),
        }
    }

    // A scope being left is cleared so no later context inherits its values.
    fn leave_scope(&mut self) {
        if let Some(key) = self.sheet.scope_key()
            && let Err(err) = self.gateway.clear(&key)
        {
            warn!("Failed to clear saved sheet {} on context switch: {}", key, err);
        }
    }

    fn enter_scope(&mut self) {
        if let (Some(key), Some(rubric)) = (self.sheet.scope_key(), self.rubric.clone())
            && let Some(snapshot) = self.gateway.load(&key)
        {
            self.sheet.hydrate(&rubric, &snapshot);
            info!(
                "Restored {} saved scores for {}",
                self.sheet.entries().len(),
                key
            );
        }
        if self.participants_loaded {
            self.reconcile_team();
        }
    }

    fn reconcile_team(&mut self) {
        let Some(event_id) = self.sheet.event_id.clone() else {
            return;
        };
        let visible = filter_by_event(&self.participants, &event_id);
        reconcile_selection(&mut self.sheet, &visible);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::{EventRef, RawRubric};
    use crate::services::backend::MemoryBackend;
    use crate::services::persistence::ScopeKey;
    use crate::services::store::{KeyValueStore, MemoryStore};

    fn participant(id: &str, event_id: &str) -> Participant {
        Participant {
            id: id.to_string(),
            school_name: format!("Sekolah {id}"),
            event: EventRef {
                id: event_id.to_string(),
                name: format!("Event {event_id}"),
            },
            category_id: "1".to_string(),
            coach: String::new(),
            address: String::new(),
        }
    }

    fn form(id: &str) -> RawRubric {
        serde_json::from_value(json!({
            "id": id,
            "name": format!("Form {id}"),
            "categories": [{
                "name": "Dasar",
                "aspects": [
                    { "id": "a1", "name": "Bersaf Kumpul", "max_score": 35,
                      "aspect_score": { "poor": [1, 2, 4], "fair": [6, 8, 12],
                                        "good": [15, 19, 23], "excellent": [29, 35] } },
                    { "id": "a2", "name": "Hormat", "max_score": 20,
                      "aspect_score": { "good": [11, 13, 15] } }
                ]
            }]
        }))
        .unwrap()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        session: JudgeSession,
    }

    async fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_rubric("f1", form("f1"));
        backend.insert_rubric("f2", form("f2"));
        backend.set_participants(vec![
            participant("t1", "e1"),
            participant("t2", "e1"),
            participant("t3", "e2"),
        ]);
        let store = Arc::new(MemoryStore::new());
        let rubrics = Arc::new(RubricRepository::new(backend.clone()));
        let gateway = PersistenceGateway::new(store.clone());
        let mut session = JudgeSession::new("j1", backend, rubrics, gateway);
        session.load_reference_data().await;
        Harness { store, session }
    }

    #[tokio::test(start_paused = true)]
    async fn scores_need_a_rubric() {
        let mut h = harness().await;
        assert_eq!(
            h.session.set_score("a1", 3),
            Err(ValidationError::RubricNotLoaded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn selecting_a_hidden_team_is_rejected() {
        let mut h = harness().await;
        h.session.select_event("e1");
        h.session.select_form("f1").await;

        assert_eq!(
            h.session.select_team("t3"),
            Err(ValidationError::TeamNotVisible("t3".to_string()))
        );
        assert!(h.session.select_team("t1").is_ok());
        assert_eq!(h.session.team_name(), Some("Sekolah t1"));
        assert_eq!(h.session.visible_teams().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn event_switch_clears_team_entries_and_saved_sheet() {
        let mut h = harness().await;
        h.session.select_event("e1");
        h.session.select_form("f1").await;
        h.session.select_team("t1").unwrap();
        h.session.set_score("a1", 19).unwrap();
        h.session.flush();
        let old_key = ScopeKey::new("j1", "f1", "e1");
        assert!(h.store.get(old_key.as_str()).unwrap().is_some());

        h.session.select_event("e2");

        assert_eq!(h.session.sheet().team_id, None);
        assert!(h.session.sheet().entries().is_empty());
        assert_eq!(h.session.gateway().load(&old_key), None);
        assert!(h.store.get(old_key.as_str()).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_edits_do_not_survive_an_event_switch() {
        let mut h = harness().await;
        h.session.select_event("e1");
        h.session.select_form("f1").await;
        h.session.select_team("t1").unwrap();
        h.session.set_score("a1", 19).unwrap();

        h.session.select_event("e2");
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;

        assert_eq!(h.session.gateway().pending_count(), 0);
        assert!(h.store.get(ScopeKey::new("j1", "f1", "e1").as_str()).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn returning_to_an_event_starts_a_fresh_sheet() {
        let mut h = harness().await;
        h.session.select_event("e1");
        h.session.select_form("f1").await;
        h.session.select_team("t2").unwrap();
        h.session.set_score("a1", 23).unwrap();

        h.session.select_event("e2");
        h.session.select_event("e1");

        assert_eq!(h.session.sheet().team_id, None);
        assert_eq!(h.session.sheet().get_score("a1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn form_switch_clears_the_previous_form_sheet() {
        let mut h = harness().await;
        h.session.select_event("e1");
        h.session.select_form("f1").await;
        h.session.select_team("t1").unwrap();
        h.session.set_score("a1", 8).unwrap();

        h.session.select_form("f2").await;

        assert_eq!(h.session.sheet().team_id, None);
        assert!(h.session.sheet().entries().is_empty());
        assert_eq!(
            h.session.gateway().load(&ScopeKey::new("j1", "f1", "e1")),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restored_team_outside_the_event_is_cleared() {
        let mut h = harness().await;
        let key = ScopeKey::new("j1", "f1", "e1");
        h.store
            .set(
                key.as_str(),
                r#"{"scores":{"a1":12},"teamId":"t3","lastUpdated":1}"#,
            )
            .unwrap();

        h.session.select_event("e1");
        h.session.select_form("f1").await;

        assert_eq!(h.session.sheet().team_id, None);
        assert!(h.session.sheet().entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_team_starts_a_fresh_sheet() {
        let mut h = harness().await;
        h.session.select_event("e1");
        h.session.select_form("f1").await;
        h.session.select_team("t1").unwrap();
        h.session.set_score("a1", 8).unwrap();

        h.session.select_team("t2").unwrap();

        assert!(h.session.sheet().entries().is_empty());
        h.session.flush();
        let saved = h
            .session
            .gateway()
            .load(&ScopeKey::new("j1", "f1", "e1"))
            .unwrap();
        assert_eq!(saved.team_id.as_deref(), Some("t2"));
        assert!(saved.scores.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rubric_loaded_for_a_previous_form_is_ignored() {
        let mut h = harness().await;
        h.session.select_event("e1");

        let stale = h.session.begin_form_switch("f1");
        let rubric_f1 = Arc::new(crate::services::rubric_repository::normalize_rubric(
            form("f1"),
            "f1",
        ));
        let current = h.session.begin_form_switch("f2");
        let rubric_f2 = Arc::new(crate::services::rubric_repository::normalize_rubric(
            form("f2"),
            "f2",
        ));

        assert!(!h.session.apply_rubric(stale, rubric_f1));
        assert!(h.session.rubric().is_none());
        assert!(h.session.apply_rubric(current, rubric_f2));
        assert_eq!(h.session.rubric().map(|r| r.id.as_str()), Some("f2"));
    }

    #[tokio::test(start_paused = true)]
    async fn event_switch_invalidates_in_flight_form_loads() {
        let mut h = harness().await;
        h.session.select_event("e1");
        let token = h.session.begin_form_switch("f1");
        h.session.select_event("e2");

        let rubric = Arc::new(crate::services::rubric_repository::normalize_rubric(
            form("f1"),
            "f1",
        ));
        assert!(!h.session.apply_rubric(token, rubric));
    }

    #[tokio::test(start_paused = true)]
    async fn quick_fill_updates_and_persists() {
        let mut h = harness().await;
        h.session.select_event("e1");
        h.session.select_form("f1").await;
        h.session.select_team("t1").unwrap();

        let outcome = h
            .session
            .quick_fill_category("Dasar", QualityBand::Excellent)
            .unwrap();
        assert_eq!(outcome.applied, vec![("a1".to_string(), 35)]);
        assert_eq!(outcome.skipped, vec!["a2".to_string()]);
        assert_eq!(
            h.session.quick_fill_aspect("a2", QualityBand::Good),
            Ok(Some(13))
        );
        assert_eq!(
            h.session.quick_fill_category("Nope", QualityBand::Good),
            Err(ValidationError::UnknownCategory("Nope".to_string()))
        );

        h.session.flush();
        let saved = h
            .session
            .gateway()
            .load(&ScopeKey::new("j1", "f1", "e1"))
            .unwrap();
        assert_eq!(saved.scores.get("a1"), Some(&35));
        assert_eq!(saved.scores.get("a2"), Some(&13));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_memory_and_storage() {
        let mut h = harness().await;
        h.session.select_event("e1");
        h.session.select_form("f1").await;
        h.session.select_team("t1").unwrap();
        h.session.set_score("a1", 15).unwrap();
        h.session.flush();

        h.session.reset().unwrap();

        assert!(h.session.sheet().entries().is_empty());
        assert_eq!(
            h.session.gateway().load(&ScopeKey::new("j1", "f1", "e1")),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn offline_reference_data_keeps_the_selection() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_offline(true);
        let store = Arc::new(MemoryStore::new());
        let key = ScopeKey::new("j1", "default", "e1");
        store
            .set(
                key.as_str(),
                r#"{"scores":{"pbb-hormat":17},"teamId":"t9","lastUpdated":1}"#,
            )
            .unwrap();
        let rubrics = Arc::new(RubricRepository::new(backend.clone()));
        let mut session = JudgeSession::new(
            "j1",
            backend.clone(),
            rubrics,
            PersistenceGateway::new(store.clone()),
        );

        session.load_reference_data().await;
        session.select_event("e1");
        session.select_form("default").await;

        assert!(session.events().is_empty());
        assert_eq!(session.rubric().map(|r| r.id.as_str()), Some("default"));
        assert_eq!(session.sheet().team_id.as_deref(), Some("t9"));
        assert_eq!(session.sheet().get_score("pbb-hormat"), 17);
        assert_eq!(backend.rubric_requests(), vec!["default".to_string()]);
    }
}
