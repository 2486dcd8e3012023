use crate::api::AppState;
use crate::domain::{CapTableSnapshot, FundingRound, HolderName, SecurityLedger};
use crate::engine::{Breakpoint, HolderDilution, WaterfallResult};
use crate::error::AppError;
use crate::orchestration::{Scenario, WaterfallOutcome};
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub ledger: SecurityLedger,
    #[serde(default)]
    pub rounds: Vec<FundingRound>,
    pub holder_of_interest: Option<HolderName>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    pub history_id: String,
    /// When this history entered the cache; repeated builds return the
    /// original time.
    pub cached_at: DateTime<Utc>,
    pub snapshots: Vec<CapTableSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_dilution: Option<HolderDilution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterfallRequest {
    pub history_id: Option<String>,
    pub ledger: Option<SecurityLedger>,
    #[serde(default)]
    pub rounds: Vec<FundingRound>,
    pub scenario: Scenario,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterfallResponse {
    pub history_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<WaterfallResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<Breakpoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<WaterfallResult>>,
}

pub async fn build(
    State(state): State<AppState>,
    Json(request): Json<BuildRequest>,
) -> Result<Json<BuildResponse>, AppError> {
    let outcome = state
        .analyzer
        .build(request.ledger, request.rounds, request.holder_of_interest)
        .await?;

    Ok(Json(BuildResponse {
        history_id: outcome.history_id,
        cached_at: outcome.cached_at,
        snapshots: outcome.history.snapshots.clone(),
        holder_dilution: outcome.history.holder_dilution.clone(),
    }))
}

pub async fn waterfall(
    State(state): State<AppState>,
    Json(request): Json<WaterfallRequest>,
) -> Result<Json<WaterfallResponse>, AppError> {
    let (history_id, history) = match (request.history_id, request.ledger) {
        (Some(id), None) => {
            if !request.rounds.is_empty() {
                return Err(AppError::BadRequest(
                    "rounds cannot be combined with historyId".to_string(),
                ));
            }
            let history = state.analyzer.history(&id).await?;
            (id, history)
        }
        (None, Some(ledger)) => {
            let outcome = state.analyzer.build(ledger, request.rounds, None).await?;
            (outcome.history_id, outcome.history)
        }
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest(
                "provide either historyId or ledger, not both".to_string(),
            ))
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "historyId or ledger is required".to_string(),
            ))
        }
    };

    let outcome = state.analyzer.waterfall(history, request.scenario).await?;
    let response = match outcome {
        WaterfallOutcome::Results(results) => WaterfallResponse {
            history_id,
            results: Some(results),
            breakpoints: None,
            points: None,
        },
        WaterfallOutcome::Curve(curve) => WaterfallResponse {
            history_id,
            results: None,
            breakpoints: Some(curve.breakpoints),
            points: Some(curve.points),
        },
    };
    Ok(Json(response))
}
