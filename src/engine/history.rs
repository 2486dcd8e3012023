//! Folds funding rounds over an initial ledger and tracks one holder's
//! dilution with and without exercising pro-rata rights.

use crate::domain::{
    CapTableSnapshot, Decimal, FundingRound, HolderName, ProRataParticipation, RoundRef,
    SecurityLedger,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::error::{CapTableError, CapTableResult};
use super::preference_stack::PreferenceStack;
use super::round_processor::{CapTableState, RoundProcessor};

/// Every snapshot produced from an initial ledger and a round sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapTableHistory {
    pub initial: SecurityLedger,
    pub rounds: Vec<FundingRound>,
    pub snapshots: Vec<CapTableSnapshot>,
    /// Ledger after the last round.
    pub ledger: SecurityLedger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_dilution: Option<HolderDilution>,
}

impl CapTableHistory {
    pub fn latest_snapshot(&self) -> Option<&CapTableSnapshot> {
        self.snapshots.last()
    }

    /// Seniority stack of the final ledger.
    ///
    /// # Errors
    /// As [`PreferenceStack::resolve`].
    pub fn preference_stack(&self) -> CapTableResult<PreferenceStack> {
        PreferenceStack::resolve(self.ledger.classes())
    }
}

/// Holder ownership after one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipPoint {
    pub round: RoundRef,
    pub ownership_pct: Decimal,
}

/// What keeping up with pro-rata costs in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowOnCost {
    pub round: RoundRef,
    /// Ownership with pro-rata minus ownership without, in percentage points.
    pub ownership_gap: Decimal,
    /// Dollars the holder invests in this round when exercising pro-rata.
    pub pro_rata_dollars: Decimal,
    /// The full allocation did not fit in the round; the holder took only
    /// what the round had left after the other participants.
    pub limited_by_round: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderDilution {
    pub holder: HolderName,
    /// Round in which the holder first invests; 0 when the holder is on
    /// the initial ledger.
    pub entry_round: usize,
    pub held_initially: bool,
    pub entry_ownership: Decimal,
    without_pro_rata: Vec<OwnershipPoint>,
    with_pro_rata: Vec<OwnershipPoint>,
    follow_on: Vec<FollowOnCost>,
}

impl HolderDilution {
    /// Ownership per round from entry onwards, never taking pro-rata.
    pub fn dilution_without_pro_rata(&self) -> &[OwnershipPoint] {
        &self.without_pro_rata
    }

    /// Ownership per round from entry onwards, taking full pro-rata in every
    /// round after entry where the holder has the right to.
    pub fn dilution_with_pro_rata(&self) -> &[OwnershipPoint] {
        &self.with_pro_rata
    }

    pub fn follow_on_cost(&self) -> &[FollowOnCost] {
        &self.follow_on
    }
}

pub struct HistoryBuilder;

impl HistoryBuilder {
    /// Validate inputs and fold every round in order.
    ///
    /// # Errors
    /// `InputValidation` for an invalid initial ledger, a round dated before
    /// its predecessor, or any round the processor rejects.
    pub fn build(initial: &SecurityLedger, rounds: &[FundingRound]) -> CapTableResult<CapTableHistory> {
        initial.validate()?;
        check_chronology(rounds)?;
        let (ledger, snapshots) = fold(initial, rounds, |_, _, round| Ok(round.clone()))?;
        tracing::debug!(rounds = rounds.len(), "built cap table history");
        Ok(CapTableHistory {
            initial: initial.clone(),
            rounds: rounds.to_vec(),
            snapshots,
            ledger,
            holder_dilution: None,
        })
    }

    /// Build the history and compare the holder's dilution with and without
    /// exercising pro-rata rights.
    ///
    /// # Errors
    /// As [`HistoryBuilder::build`], plus `InputValidation` when the holder is
    /// neither on the initial ledger nor a new investor in any round.
    pub fn build_for_holder(
        initial: &SecurityLedger,
        rounds: &[FundingRound],
        holder: &HolderName,
    ) -> CapTableResult<CapTableHistory> {
        let mut history = Self::build(initial, rounds)?;

        let held_initially = initial.holds_shares(holder);
        let entry_round = if held_initially {
            0
        } else {
            rounds
                .iter()
                .position(|r| r.is_new_investor(holder))
                .ok_or_else(|| {
                    CapTableError::invalid(format!(
                        "holder {} is not on the initial ledger and invests in no round",
                        holder
                    ))
                })?
        };
        // Rounds before this index are replayed unchanged.
        let first_adjusted = if held_initially { 0 } else { entry_round + 1 };

        let (_, without) = fold(initial, rounds, |_, index, round| {
            if index < first_adjusted {
                return Ok(round.clone());
            }
            let mut round = round.clone();
            round.pro_rata_participants.retain(|p| &p.holder != holder);
            Ok(round)
        })?;

        let mut limited = BTreeSet::new();
        let (with_ledger, with) = fold(initial, rounds, |state, index, round| {
            if index < first_adjusted
                || round.is_new_investor(holder)
                || !state.ledger.has_pro_rata_rights(holder)
            {
                return Ok(round.clone());
            }
            let (round, fits) = with_full_pro_rata(state, round, holder);
            if !fits {
                limited.insert(index);
            }
            Ok(round)
        })?;

        let entry_ownership = if held_initially {
            initial
                .ownership_pct()
                .get(holder)
                .copied()
                .unwrap_or_default()
        } else {
            without[entry_round].post_money_pct(holder)
        };

        let points = |snapshots: &[CapTableSnapshot]| -> Vec<OwnershipPoint> {
            snapshots[entry_round..]
                .iter()
                .map(|s| OwnershipPoint {
                    round: s.round_ref.clone(),
                    ownership_pct: s.post_money_pct(holder),
                })
                .collect()
        };
        let without_pro_rata = points(&without);
        let with_pro_rata = points(&with);

        let follow_on = without_pro_rata
            .iter()
            .zip(&with_pro_rata)
            .map(|(w, p)| {
                let pro_rata_dollars = if p.round.index < first_adjusted {
                    Decimal::zero()
                } else {
                    with_ledger
                        .classes()
                        .iter()
                        .filter(|c| c.round_index == Some(p.round.index))
                        .flat_map(|c| {
                            c.allocations
                                .iter()
                                .filter(|a| &a.holder == holder)
                                .map(move |a| c.allocation_invested(a))
                        })
                        .sum()
                };
                FollowOnCost {
                    round: p.round.clone(),
                    ownership_gap: p.ownership_pct - w.ownership_pct,
                    pro_rata_dollars,
                    limited_by_round: limited.contains(&p.round.index),
                }
            })
            .collect();

        history.holder_dilution = Some(HolderDilution {
            holder: holder.clone(),
            entry_round,
            held_initially,
            entry_ownership,
            without_pro_rata,
            with_pro_rata,
            follow_on,
        });
        Ok(history)
    }
}

/// `round` with `holder` taking its full pro-rata allocation, capped at what
/// the round has left after the other participants. The flag is false when
/// the cap applied.
fn with_full_pro_rata(
    state: &CapTableState,
    round: &FundingRound,
    holder: &HolderName,
) -> (FundingRound, bool) {
    let mut without_holder = round.clone();
    without_holder.pro_rata_participants.retain(|p| &p.holder != holder);
    let mut full = without_holder.clone();
    full.pro_rata_participants
        .push(ProRataParticipation::full(holder.clone()));

    // Participants holding the whole table leave nothing to buy.
    let Ok(plan) = RoundProcessor::pro_rata_plan(state, &full) else {
        return (without_holder, false);
    };
    let (own, others): (Vec<_>, Vec<_>) = plan.into_iter().partition(|(h, _)| h == holder);
    let wanted: Decimal = own.iter().map(|(_, amount)| *amount).sum();
    let room = full.investment_amount - others.iter().map(|(_, amount)| *amount).sum::<Decimal>();
    if wanted <= room {
        return (full, true);
    }

    tracing::debug!(
        round = %round.name,
        holder = %holder,
        wanted = %wanted,
        room = %room,
        "pro-rata limited by round size"
    );
    let mut limited = without_holder;
    if room.is_positive() {
        limited
            .pro_rata_participants
            .push(ProRataParticipation::amount(holder.clone(), room));
    }
    (limited, false)
}

fn check_chronology(rounds: &[FundingRound]) -> CapTableResult<()> {
    for pair in rounds.windows(2) {
        if pair[1].date < pair[0].date {
            return Err(CapTableError::invalid(format!(
                "round {} ({}) is dated before round {} ({})",
                pair[1].name, pair[1].date, pair[0].name, pair[0].date
            )));
        }
    }
    Ok(())
}

/// Run every round through the processor, letting `adjust` rewrite each round
/// against the state it is applied to.
fn fold<F>(
    initial: &SecurityLedger,
    rounds: &[FundingRound],
    mut adjust: F,
) -> CapTableResult<(SecurityLedger, Vec<CapTableSnapshot>)>
where
    F: FnMut(&CapTableState, usize, &FundingRound) -> CapTableResult<FundingRound>,
{
    let mut state = CapTableState::new(initial.clone());
    let mut snapshots = Vec::with_capacity(rounds.len());
    for (index, round) in rounds.iter().enumerate() {
        let round = adjust(&state, index, round)?;
        let (next, snapshot) = RoundProcessor::process(&state, &round)?;
        snapshots.push(snapshot);
        state = next;
    }
    Ok((state.ledger, snapshots))
}
