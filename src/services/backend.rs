use std::collections::{HashMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::TransportError;
use crate::models::{Event, Participant, RawRubric};
use crate::services::participant_filter::ids_match;
use crate::services::submission::{SubmissionPayload, SubmitResponse};

/// Remote collaborators the scoring engine talks to.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    async fn get_rubric(&self, form_id: &str) -> Result<RawRubric, TransportError>;
    async fn list_events(&self) -> Result<Vec<Event>, TransportError>;
    async fn list_participants(
        &self,
        event_filter: Option<&str>,
    ) -> Result<Vec<Participant>, TransportError>;
    async fn submit_scores(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<SubmitResponse, TransportError>;
}

/// Serves everything from a data folder:
///
/// - `forms/<form_id>.json` in the `GetRubric` shape
/// - `events.json` and `participants.json`
/// - submissions appended as one JSON line each to the submissions file
#[derive(Debug, Clone)]
pub struct FileBackend {
    data_dir: PathBuf,
    submissions_path: PathBuf,
}

impl FileBackend {
    pub fn new(data_dir: impl Into<PathBuf>, submissions_file: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.into();
        let submissions_path = data_dir.join(submissions_file);
        Self {
            data_dir,
            submissions_path,
        }
    }

    pub fn submissions_path(&self) -> &Path {
        &self.submissions_path
    }

    fn read_json<T: DeserializeOwned>(&self, operation: &str, path: &Path) -> Result<T, TransportError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            TransportError::new(operation, format!("failed to read {}: {}", path.display(), err))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            TransportError::new(operation, format!("failed to parse {}: {}", path.display(), err))
        })
    }
}

#[async_trait]
impl ScoringBackend for FileBackend {
    async fn get_rubric(&self, form_id: &str) -> Result<RawRubric, TransportError> {
        let operation = format!("GetRubric({form_id})");
        if form_id.is_empty() || form_id.contains(['/', '\\']) || form_id.contains("..") {
            return Err(TransportError::new(operation, "invalid form id"));
        }
        let path = self.data_dir.join("forms").join(format!("{form_id}.json"));
        self.read_json(&operation, &path)
    }

    async fn list_events(&self) -> Result<Vec<Event>, TransportError> {
        self.read_json("ListEvents", &self.data_dir.join("events.json"))
    }

    async fn list_participants(
        &self,
        event_filter: Option<&str>,
    ) -> Result<Vec<Participant>, TransportError> {
        let all: Vec<Participant> =
            self.read_json("ListParticipants", &self.data_dir.join("participants.json"))?;
        Ok(match event_filter {
            Some(event_id) => all
                .into_iter()
                .filter(|p| ids_match(&p.event.id, event_id))
                .collect(),
            None => all,
        })
    }

    async fn submit_scores(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<SubmitResponse, TransportError> {
        let line = serde_json::to_string(payload)
            .map_err(|err| TransportError::new("SubmitScores", err.to_string()))?;
        if let Some(parent) = self.submissions_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| TransportError::new("SubmitScores", err.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.submissions_path)
            .map_err(|err| {
                TransportError::new(
                    "SubmitScores",
                    format!("failed to open {}: {}", self.submissions_path.display(), err),
                )
            })?;
        writeln!(file, "{line}").map_err(|err| TransportError::new("SubmitScores", err.to_string()))?;
        info!(
            "Recorded submission for team {} in {}",
            payload.team_id,
            self.submissions_path.display()
        );
        Ok(SubmitResponse {
            success: true,
            message: None,
        })
    }
}

/// In-process backend holding canned responses.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rubrics: Mutex<HashMap<String, RawRubric>>,
    queued_rubrics: Mutex<HashMap<String, VecDeque<(RawRubric, Duration)>>>,
    events: Mutex<Vec<Event>>,
    participants: Mutex<Vec<Participant>>,
    submissions: Mutex<Vec<SubmissionPayload>>,
    rubric_requests: Mutex<Vec<String>>,
    offline: AtomicBool,
    submit_outcome: Mutex<Option<Result<SubmitResponse, TransportError>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_rubric(&self, form_id: impl Into<String>, rubric: RawRubric) {
        lock(&self.rubrics).insert(form_id.into(), rubric);
    }

    /// Queues a one-shot response for the next `get_rubric(form_id)`, delivered after `delay`.
    pub fn queue_rubric(&self, form_id: impl Into<String>, rubric: RawRubric, delay: Duration) {
        lock(&self.queued_rubrics)
            .entry(form_id.into())
            .or_default()
            .push_back((rubric, delay));
    }

    pub fn set_events(&self, events: Vec<Event>) {
        *lock(&self.events) = events;
    }

    pub fn set_participants(&self, participants: Vec<Participant>) {
        *lock(&self.participants) = participants;
    }

    /// While offline every call fails with a `TransportError`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Overrides the answer to `submit_scores`; `None` restores plain success.
    pub fn set_submit_outcome(&self, outcome: Option<Result<SubmitResponse, TransportError>>) {
        *lock(&self.submit_outcome) = outcome;
    }

    pub fn submissions(&self) -> Vec<SubmissionPayload> {
        lock(&self.submissions).clone()
    }

    pub fn rubric_requests(&self) -> Vec<String> {
        lock(&self.rubric_requests).clone()
    }

    fn check_online(&self, operation: &str) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::new(operation, "backend unreachable"));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ScoringBackend for MemoryBackend {
    async fn get_rubric(&self, form_id: &str) -> Result<RawRubric, TransportError> {
        let operation = format!("GetRubric({form_id})");
        lock(&self.rubric_requests).push(form_id.to_string());
        self.check_online(&operation)?;

        let queued = lock(&self.queued_rubrics)
            .get_mut(form_id)
            .and_then(VecDeque::pop_front);
        if let Some((rubric, delay)) = queued {
            tokio::time::sleep(delay).await;
            return Ok(rubric);
        }

        lock(&self.rubrics)
            .get(form_id)
            .cloned()
            .ok_or_else(|| TransportError::new(operation, "form not found"))
    }

    async fn list_events(&self) -> Result<Vec<Event>, TransportError> {
        self.check_online("ListEvents")?;
        Ok(lock(&self.events).clone())
    }

    async fn list_participants(
        &self,
        event_filter: Option<&str>,
    ) -> Result<Vec<Participant>, TransportError> {
        self.check_online("ListParticipants")?;
        let all = lock(&self.participants).clone();
        Ok(match event_filter {
            Some(event_id) => all
                .into_iter()
                .filter(|p| ids_match(&p.event.id, event_id))
                .collect(),
            None => all,
        })
    }

    async fn submit_scores(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<SubmitResponse, TransportError> {
        self.check_online("SubmitScores")?;
        let outcome = lock(&self.submit_outcome).clone();
        let response = match outcome {
            Some(outcome) => outcome?,
            None => SubmitResponse {
                success: true,
                message: None,
            },
        };
        if response.success {
            lock(&self.submissions).push(payload.clone());
        }
        Ok(response)
    }
}
