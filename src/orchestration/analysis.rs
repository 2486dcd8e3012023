use crate::config::Config;
use crate::domain::{Decimal, FundingRound, HolderName, SecurityLedger};
use crate::engine::{
    range_points, BisectionConfig, BreakpointFinder, CapTableError, CapTableHistory,
    HistoryBuilder, PayoutCurve, PreferenceStack, WaterfallEngine, WaterfallResult,
};
use crate::store::HistoryStore;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

/// Exit values evaluated per blocking task for range scenarios.
const RANGE_CHUNK: usize = 256;

/// Exit scenario to evaluate against a history's final ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Scenario {
    Single { exit_value: Decimal },
    Range { min: Decimal, max: Decimal, step: Decimal },
    /// Breakpoints plus the payout curve through them.
    Auto,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub history_id: String,
    pub history: Arc<CapTableHistory>,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum WaterfallOutcome {
    Results(Vec<WaterfallResult>),
    Curve(PayoutCurve),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Engine(#[from] CapTableError),
    #[error("unknown history id {0}")]
    UnknownHistory(String),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Builds histories and evaluates exit scenarios off the async runtime.
#[derive(Clone)]
pub struct Analyzer {
    store: Arc<HistoryStore>,
    engine: WaterfallEngine,
    bisection: BisectionConfig,
    max_curve_points: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryKey<'a> {
    ledger: &'a SecurityLedger,
    rounds: &'a [FundingRound],
    holder_of_interest: Option<&'a HolderName>,
}

impl Analyzer {
    pub fn new(config: &Config, store: Arc<HistoryStore>) -> Self {
        Self {
            store,
            engine: WaterfallEngine::new(config.max_conversion_iterations),
            bisection: BisectionConfig {
                tolerance: config.bisection_tolerance,
                max_iterations: config.bisection_max_iterations,
            },
            max_curve_points: config.max_curve_points,
        }
    }

    /// Content hash identifying a build request: the first 16 bytes of the
    /// SHA-256 of its JSON encoding, hex encoded.
    pub fn history_id(
        ledger: &SecurityLedger,
        rounds: &[FundingRound],
        holder: Option<&HolderName>,
    ) -> Result<String, AnalysisError> {
        let bytes = serde_json::to_vec(&HistoryKey {
            ledger,
            rounds,
            holder_of_interest: holder,
        })?;
        let digest = Sha256::digest(&bytes);
        Ok(hex::encode(&digest[..16]))
    }

    /// Build (or fetch) the history for a ledger and its rounds.
    pub async fn build(
        &self,
        ledger: SecurityLedger,
        rounds: Vec<FundingRound>,
        holder: Option<HolderName>,
    ) -> Result<BuildOutcome, AnalysisError> {
        let history_id = Self::history_id(&ledger, &rounds, holder.as_ref())?;
        if let Some(stored) = self.store.get(&history_id).await {
            tracing::debug!(history_id = %history_id, "history cache hit");
            return Ok(BuildOutcome {
                history_id,
                history: stored.history,
                cached_at: stored.stored_at,
            });
        }

        let history = tokio::task::spawn_blocking(move || match holder {
            Some(holder) => HistoryBuilder::build_for_holder(&ledger, &rounds, &holder),
            None => HistoryBuilder::build(&ledger, &rounds),
        })
        .await??;

        let stored = self
            .store
            .insert(history_id.clone(), Arc::new(history))
            .await;
        tracing::info!(
            history_id = %history_id,
            rounds = stored.history.rounds.len(),
            "built cap table history"
        );
        Ok(BuildOutcome {
            history_id,
            history: stored.history,
            cached_at: stored.stored_at,
        })
    }

    pub async fn cached_histories(&self) -> usize {
        self.store.len().await
    }

    pub async fn history(&self, history_id: &str) -> Result<Arc<CapTableHistory>, AnalysisError> {
        self.store
            .get(history_id)
            .await
            .map(|stored| stored.history)
            .ok_or_else(|| AnalysisError::UnknownHistory(history_id.to_string()))
    }

    /// Evaluate a scenario against the final ledger of `history`.
    pub async fn waterfall(
        &self,
        history: Arc<CapTableHistory>,
        scenario: Scenario,
    ) -> Result<WaterfallOutcome, AnalysisError> {
        let stack = Arc::new(history.preference_stack()?);

        match scenario {
            Scenario::Single { exit_value } => {
                let engine = self.engine;
                let result = tokio::task::spawn_blocking(move || {
                    engine.distribute(exit_value, &stack, history.ledger.classes())
                })
                .await??;
                Ok(WaterfallOutcome::Results(vec![result]))
            }
            Scenario::Range { min, max, step } => {
                let values = range_points(min, max, step, self.max_curve_points)?;
                let results = self.distribute_chunked(history, stack, values).await?;
                Ok(WaterfallOutcome::Results(results))
            }
            Scenario::Auto => {
                let engine = self.engine;
                let bisection = self.bisection;
                let curve = tokio::task::spawn_blocking(move || {
                    BreakpointFinder::new(engine, bisection, &stack, history.ledger.classes())
                        .payout_curve()
                })
                .await??;
                tracing::info!(breakpoints = curve.breakpoints.len(), "computed payout curve");
                Ok(WaterfallOutcome::Curve(curve))
            }
        }
    }

    async fn distribute_chunked(
        &self,
        history: Arc<CapTableHistory>,
        stack: Arc<PreferenceStack>,
        values: Vec<Decimal>,
    ) -> Result<Vec<WaterfallResult>, AnalysisError> {
        let tasks = values.chunks(RANGE_CHUNK).map(|chunk| {
            let chunk = chunk.to_vec();
            let history = history.clone();
            let stack = stack.clone();
            let engine = self.engine;
            async move {
                let results = tokio::task::spawn_blocking(move || {
                    engine.distribute_many(&chunk, &stack, history.ledger.classes())
                })
                .await??;
                Ok::<_, AnalysisError>(results)
            }
        });
        let chunks = try_join_all(tasks).await?;
        Ok(chunks.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Allocation, ClassId, SecurityClass, SecurityKind};

    fn ledger() -> SecurityLedger {
        SecurityLedger::new(vec![SecurityClass {
            id: ClassId::new("common"),
            label: "Common".to_string(),
            kind: SecurityKind::Common,
            issue_price_per_share: Decimal::zero(),
            allocations: vec![Allocation::new(HolderName::new("Founder"), 1_000)],
            seniority_rank: None,
            pari_passu: false,
            pro_rata_eligible: false,
            round_index: None,
        }])
    }

    #[test]
    fn test_history_id_is_stable() {
        let a = Analyzer::history_id(&ledger(), &[], None).unwrap();
        let b = Analyzer::history_id(&ledger(), &[], None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        let c = Analyzer::history_id(&ledger(), &[], Some(&HolderName::new("Founder"))).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_scenario_json() {
        let scenario: Scenario =
            serde_json::from_str(r#"{"mode":"single","exitValue":"1000"}"#).unwrap();
        assert_eq!(
            scenario,
            Scenario::Single {
                exit_value: Decimal::from(1000u64)
            }
        );
        let scenario: Scenario = serde_json::from_str(r#"{"mode":"auto"}"#).unwrap();
        assert_eq!(scenario, Scenario::Auto);
    }

    #[tokio::test]
    async fn test_common_only_range() {
        let analyzer = Analyzer::new(&Config::default(), Arc::new(HistoryStore::new(8)));
        let built = analyzer.build(ledger(), vec![], None).await.unwrap();
        let outcome = analyzer
            .waterfall(
                built.history,
                Scenario::Range {
                    min: Decimal::zero(),
                    max: Decimal::from(1000u64),
                    step: Decimal::from(100u64),
                },
            )
            .await
            .unwrap();
        match outcome {
            WaterfallOutcome::Results(results) => {
                assert_eq!(results.len(), 11);
                assert_eq!(
                    results[10].holder_total(&HolderName::new("Founder")),
                    Decimal::from(1000u64)
                );
            }
            WaterfallOutcome::Curve(_) => panic!("expected results"),
        }
    }

    #[tokio::test]
    async fn test_unknown_history() {
        let analyzer = Analyzer::new(&Config::default(), Arc::new(HistoryStore::new(8)));
        assert!(matches!(
            analyzer.history("nope").await,
            Err(AnalysisError::UnknownHistory(_))
        ));
    }
}
