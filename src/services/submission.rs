use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{SubmissionError, ValidationError};
use crate::models::Rubric;
use crate::services::aggregator::{form_max, form_total, percentage};
use crate::services::backend::ScoringBackend;
use crate::services::persistence::{PersistenceGateway, ScopeKey};
use crate::services::score_sheet::ScoreSheet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub aspect_id: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub event_id: String,
    pub judge_id: String,
    pub form_id: String,
    pub team_id: String,
    pub scores: Vec<ScoreLine>,
    pub total_score: u32,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// What a successful submission reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub team_id: String,
    pub total_score: u32,
    pub percentage: u32,
    pub message: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ValidationError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ValidationError::MissingContext(name))
}

/// Builds the payload for the sheet. Every aspect of the rubric is listed in rubric order;
/// unscored aspects are sent as 0.
pub fn build_payload(
    sheet: &ScoreSheet,
    rubric: &Rubric,
) -> Result<SubmissionPayload, ValidationError> {
    let team_id = required(&sheet.team_id, "team")?;
    let event_id = required(&sheet.event_id, "event")?;
    let judge_id = required(&sheet.judge_id, "judge")?;
    let form_id = required(&sheet.form_id, "form")?;

    let scores = rubric
        .aspects()
        .map(|aspect| ScoreLine {
            aspect_id: aspect.id.clone(),
            score: sheet.get_score(&aspect.id),
        })
        .collect();
    let total_score = form_total(rubric, sheet.entries());
    let max = form_max(rubric);

    Ok(SubmissionPayload {
        event_id: event_id.to_string(),
        judge_id: judge_id.to_string(),
        form_id: form_id.to_string(),
        team_id: team_id.to_string(),
        scores,
        total_score,
        percentage: percentage(total_score, max),
    })
}

/// Sends the sheet. On success the persisted snapshot is removed and the sheet's team and
/// entries are reset so the next team can be scored. On failure nothing local changes.
pub async fn submit(
    backend: &dyn ScoringBackend,
    gateway: &PersistenceGateway,
    sheet: &mut ScoreSheet,
    rubric: &Rubric,
) -> Result<SubmissionReceipt, SubmissionError> {
    let payload = build_payload(sheet, rubric)?;

    let response = backend.submit_scores(&payload).await.map_err(|err| {
        warn!("Submission for team {} failed: {}", payload.team_id, err);
        SubmissionError::from(err)
    })?;
    if !response.success {
        let message = response
            .message
            .unwrap_or_else(|| "rejected by collector".to_string());
        warn!("Submission for team {} rejected: {}", payload.team_id, message);
        return Err(SubmissionError::Rejected(message));
    }

    let key = ScopeKey::new(&payload.judge_id, &payload.form_id, &payload.event_id);
    if let Err(err) = gateway.clear(&key) {
        warn!("Submitted, but failed to clear saved sheet {}: {}", key, err);
    }
    sheet.clear_team();

    info!(
        "Submitted team {} total={} percentage={}",
        payload.team_id, payload.total_score, payload.percentage
    );
    Ok(SubmissionReceipt {
        team_id: payload.team_id,
        total_score: payload.total_score,
        percentage: payload.percentage,
        message: response.message,
    })
}
