use crate::domain::{
    Allocation, CapTableSnapshot, ClassId, Decimal, FundingRound, HolderName, Participation,
    ParticipationCap, PoolTiming, ProRataFunding, RoundRef, SecurityClass, SecurityKind,
    SecurityLedger, OPTION_POOL_CLASS_ID, OPTION_POOL_HOLDER,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::allocation::{allocate_cents, allocate_shares};
use super::error::{CapTableError, CapTableResult};

/// Cap table state threaded between rounds. Never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapTableState {
    pub ledger: SecurityLedger,
    /// Number of rounds folded into `ledger` so far.
    pub rounds_processed: usize,
}

impl CapTableState {
    pub fn new(ledger: SecurityLedger) -> Self {
        Self {
            ledger,
            rounds_processed: 0,
        }
    }
}

/// Pure transition from one cap table state to the next.
pub struct RoundProcessor;

impl RoundProcessor {
    /// Apply one funding round, returning the new state and its snapshot.
    ///
    /// Order of operations: pre-money pool top-up, pricing, pro-rata
    /// allocations, new-investor allocations, post-money pool top-up.
    ///
    /// # Errors
    /// `InputValidation` for malformed rounds, including pro-rata dollars
    /// exceeding the round's investment amount.
    pub fn process(
        state: &CapTableState,
        round: &FundingRound,
    ) -> CapTableResult<(CapTableState, CapTableSnapshot)> {
        validate_round(&state.ledger, round)?;

        let class_id = round.class_id();
        if state.ledger.contains_class(&class_id) {
            return Err(CapTableError::invalid(format!(
                "round {}: security class {} already exists",
                round.name, class_id
            )));
        }

        let (mut classes, pre_fd, mut pool_added) = pre_money_table(&state.ledger, round)?;
        let price = round.pre_money_valuation / Decimal::from_shares(pre_fd);
        let pre_ledger = SecurityLedger::new(classes.clone());
        let pre_money_ownership = pre_ledger.ownership_pct();

        let pro_rata = pro_rata_amounts(&pre_ledger, pre_fd, round)?;
        let pro_rata_dollars: Decimal = pro_rata.iter().map(|(_, amount)| *amount).sum();
        if pro_rata_dollars > round.investment_amount {
            return Err(CapTableError::invalid(format!(
                "round {}: pro-rata dollars {} exceed the investment amount {}",
                round.name, pro_rata_dollars, round.investment_amount
            )));
        }

        let new_capital = match round.pro_rata_funding {
            ProRataFunding::WithinRound => round.investment_amount - pro_rata_dollars,
            ProRataFunding::Additional => round.investment_amount,
        };
        if new_capital.is_positive() && round.new_investors.is_empty() {
            return Err(CapTableError::invalid(format!(
                "round {}: {} of new capital has no new investors",
                round.name, new_capital
            )));
        }

        let mut allocations = Vec::new();
        let mut new_money_shares = 0u64;
        if !round.new_investors.is_empty() {
            let weights: Vec<Decimal> = round
                .new_investors
                .iter()
                .map(|i| i.commitment.unwrap_or_else(Decimal::one))
                .collect();
            new_money_shares = shares_for(new_capital, price, &round.name)?;
            let shares = allocate_shares(new_money_shares, &weights)?;
            let invested = allocate_cents(new_capital, &weights)?;
            for ((investor, shares), invested) in round.new_investors.iter().zip(shares).zip(invested) {
                allocations.push(Allocation::with_invested(investor.name.clone(), shares, invested));
            }
        }

        let mut pro_rata_shares = 0u64;
        for (holder, amount) in &pro_rata {
            let shares = shares_for(*amount, price, &round.name)?;
            pro_rata_shares += shares;
            allocations.push(Allocation::with_invested(holder.clone(), shares, *amount));
        }

        classes.push(SecurityClass {
            id: class_id,
            label: round.class_label(),
            kind: series_kind(round),
            issue_price_per_share: price,
            allocations,
            seniority_rank: round.terms.seniority_rank,
            pari_passu: round.terms.pari_passu,
            pro_rata_eligible: round.terms.pro_rata_rights,
            round_index: Some(state.rounds_processed),
        });

        if let Some(expansion) = round.option_pool {
            if expansion.timing == PoolTiming::PostMoney {
                let added = pool_top_up(fully_diluted(&classes), expansion.pct)?;
                add_pool_shares(&mut classes, added)?;
                pool_added += added;
            }
        }

        let ledger = SecurityLedger::new(classes);
        let post_money_valuation = round.pre_money_valuation + new_capital + pro_rata_dollars;

        tracing::debug!(
            round = %round.name,
            price_per_share = %price,
            new_money_shares,
            pro_rata_shares,
            pool_added,
            "processed funding round"
        );

        let snapshot = CapTableSnapshot {
            round_ref: RoundRef {
                index: state.rounds_processed,
                name: round.name.clone(),
                date: round.date,
            },
            pre_money_ownership,
            post_money_ownership: ledger.ownership_pct(),
            shares_by_holder: ledger.shares_by_holder(),
            price_per_share: price,
            pre_money_valuation: round.pre_money_valuation,
            post_money_valuation,
            fully_diluted_shares: ledger.fully_diluted_shares(),
            new_money_shares,
            pro_rata_shares,
            option_pool_shares_added: pool_added,
        };

        Ok((
            CapTableState {
                ledger,
                rounds_processed: state.rounds_processed + 1,
            },
            snapshot,
        ))
    }

    /// Dollars each pro-rata participant would invest if `round` were applied
    /// to `state`, in participant order. Amounts are not checked against the
    /// round's investment.
    ///
    /// # Errors
    /// `InputValidation` when the round cannot be priced, or under
    /// `Additional` funding when the participants hold the whole table.
    pub fn pro_rata_plan(
        state: &CapTableState,
        round: &FundingRound,
    ) -> CapTableResult<Vec<(HolderName, Decimal)>> {
        let (classes, pre_fd, _) = pre_money_table(&state.ledger, round)?;
        pro_rata_amounts(&SecurityLedger::new(classes), pre_fd, round)
    }
}

/// Classes after any pre-money pool top-up, their fully diluted count, and
/// the pool shares added.
fn pre_money_table(
    ledger: &SecurityLedger,
    round: &FundingRound,
) -> CapTableResult<(Vec<SecurityClass>, u64, u64)> {
    let mut classes = ledger.classes.clone();
    let mut pool_added = 0u64;
    if let Some(expansion) = round.option_pool {
        if expansion.timing == PoolTiming::PreMoney {
            pool_added = pool_top_up(fully_diluted(&classes), expansion.pct)?;
            add_pool_shares(&mut classes, pool_added)?;
        }
    }
    let pre_fd = fully_diluted(&classes);
    if pre_fd == 0 {
        return Err(CapTableError::invalid(format!(
            "round {}: cannot price a round on a cap table with no shares",
            round.name
        )));
    }
    Ok((classes, pre_fd, pool_added))
}

/// Dollar amount each pro-rata participant invests, in participant order.
///
/// A full allocation preserves the holder's pre-money percentage: `f * I`
/// when carved out of the round, `f * I / (1 - F)` when raised on top of it,
/// where `F` is the combined fraction of all participants.
fn pro_rata_amounts(
    pre_ledger: &SecurityLedger,
    pre_fd: u64,
    round: &FundingRound,
) -> CapTableResult<Vec<(HolderName, Decimal)>> {
    if round.pro_rata_participants.is_empty() {
        return Ok(Vec::new());
    }
    let shares = pre_ledger.shares_by_holder();
    let total = Decimal::from_shares(pre_fd);
    let fractions: Vec<Decimal> = round
        .pro_rata_participants
        .iter()
        .map(|p| Decimal::from_shares(shares.get(&p.holder).copied().unwrap_or(0)) / total)
        .collect();
    let combined: Decimal = fractions.iter().sum();

    let full_base = match round.pro_rata_funding {
        ProRataFunding::WithinRound => round.investment_amount,
        ProRataFunding::Additional => {
            if combined >= Decimal::one() {
                return Err(CapTableError::invalid(format!(
                    "round {}: pro-rata participants hold the entire cap table",
                    round.name
                )));
            }
            round.investment_amount / (Decimal::one() - combined)
        }
    };

    Ok(round
        .pro_rata_participants
        .iter()
        .zip(fractions)
        .map(|(p, fraction)| {
            let amount = p
                .amount
                .unwrap_or_else(|| (full_base * fraction).floor_cents());
            (p.holder.clone(), amount)
        })
        .collect())
}

fn series_kind(round: &FundingRound) -> SecurityKind {
    let liquidation_multiple = round.terms.liquidation_multiple;
    match round.terms.participation {
        Participation::NonParticipating => SecurityKind::NonParticipatingPreferred {
            liquidation_multiple,
        },
        Participation::Participating(cap) => SecurityKind::ParticipatingPreferred {
            liquidation_multiple,
            cap,
        },
    }
}

fn shares_for(amount: Decimal, price: Decimal, round_name: &str) -> CapTableResult<u64> {
    (amount / price).floor_to_shares().ok_or_else(|| {
        CapTableError::invalid(format!(
            "round {}: {} at {} per share is out of range",
            round_name, amount, price
        ))
    })
}

fn fully_diluted(classes: &[SecurityClass]) -> u64 {
    classes.iter().map(|c| c.shares_outstanding()).sum()
}

/// New pool shares so that they make up `pct` of the enlarged table.
fn pool_top_up(fully_diluted: u64, pct: Decimal) -> CapTableResult<u64> {
    if pct.is_zero() {
        return Ok(0);
    }
    let fd = Decimal::from_shares(fully_diluted);
    (fd * pct / (Decimal::one() - pct))
        .floor_to_shares()
        .ok_or_else(|| CapTableError::invalid(format!("option pool top-up of {} overflows", pct)))
}

fn add_pool_shares(classes: &mut Vec<SecurityClass>, added: u64) -> CapTableResult<()> {
    if added == 0 {
        return Ok(());
    }
    let holder = HolderName::new(OPTION_POOL_HOLDER);
    if let Some(pool) = classes
        .iter_mut()
        .find(|c| matches!(c.kind, SecurityKind::OptionPool))
    {
        match pool.allocations.iter_mut().find(|a| a.holder == holder) {
            Some(allocation) => allocation.shares += added,
            None => pool.allocations.push(Allocation::new(holder, added)),
        }
        return Ok(());
    }

    let id = ClassId::new(OPTION_POOL_CLASS_ID);
    if classes.iter().any(|c| c.id == id) {
        return Err(CapTableError::invalid(format!(
            "class id {} is reserved for the option pool",
            OPTION_POOL_CLASS_ID
        )));
    }
    classes.push(SecurityClass {
        id,
        label: "Employee Option Pool".to_string(),
        kind: SecurityKind::OptionPool,
        issue_price_per_share: Decimal::zero(),
        allocations: vec![Allocation::new(holder, added)],
        seniority_rank: None,
        pari_passu: false,
        pro_rata_eligible: false,
        round_index: None,
    });
    Ok(())
}

fn validate_round(ledger: &SecurityLedger, round: &FundingRound) -> CapTableResult<()> {
    let name = &round.name;
    if name.trim().is_empty() {
        return Err(CapTableError::invalid("round name must not be empty"));
    }
    if !round.pre_money_valuation.is_positive() {
        return Err(CapTableError::invalid(format!(
            "round {}: pre-money valuation must be positive, got {}",
            name, round.pre_money_valuation
        )));
    }
    if !round.investment_amount.is_positive() {
        return Err(CapTableError::invalid(format!(
            "round {}: investment amount must be positive, got {}",
            name, round.investment_amount
        )));
    }
    if !round.investment_amount.is_whole_cents() {
        return Err(CapTableError::invalid(format!(
            "round {}: investment amount must be whole cents",
            name
        )));
    }
    if let Some(expansion) = round.option_pool {
        if expansion.pct.is_negative() || expansion.pct >= Decimal::one() {
            return Err(CapTableError::invalid(format!(
                "round {}: option pool pct must be in [0, 1), got {}",
                name, expansion.pct
            )));
        }
    }

    let terms = &round.terms;
    if terms.liquidation_multiple.is_negative() {
        return Err(CapTableError::invalid(format!(
            "round {}: liquidation multiple must not be negative",
            name
        )));
    }
    if let Participation::Participating(ParticipationCap::Multiple(cap)) = terms.participation {
        if cap < terms.liquidation_multiple {
            return Err(CapTableError::invalid(format!(
                "round {}: participation cap {} is below liquidation multiple {}",
                name, cap, terms.liquidation_multiple
            )));
        }
    }

    let with_commitment = round
        .new_investors
        .iter()
        .filter(|i| i.commitment.is_some())
        .count();
    if with_commitment != 0 && with_commitment != round.new_investors.len() {
        return Err(CapTableError::invalid(format!(
            "round {}: either every new investor states a commitment or none does",
            name
        )));
    }

    let mut seen = BTreeSet::new();
    for investor in &round.new_investors {
        if investor.name.as_str().trim().is_empty() {
            return Err(CapTableError::invalid(format!(
                "round {}: investor name must not be empty",
                name
            )));
        }
        if investor.commitment.is_some_and(|c| !c.is_positive()) {
            return Err(CapTableError::invalid(format!(
                "round {}: commitment for {} must be positive",
                name, investor.name
            )));
        }
        if !seen.insert(&investor.name) {
            return Err(CapTableError::invalid(format!(
                "round {}: investor {} listed twice",
                name, investor.name
            )));
        }
    }

    for participant in &round.pro_rata_participants {
        if !seen.insert(&participant.holder) {
            return Err(CapTableError::invalid(format!(
                "round {}: {} appears more than once among investors and pro-rata participants",
                name, participant.holder
            )));
        }
        if !ledger.has_pro_rata_rights(&participant.holder) {
            return Err(CapTableError::invalid(format!(
                "round {}: {} holds no class with pro-rata rights",
                name, participant.holder
            )));
        }
        if let Some(amount) = participant.amount {
            if !amount.is_positive() || !amount.is_whole_cents() {
                return Err(CapTableError::invalid(format!(
                    "round {}: pro-rata amount for {} must be positive whole cents",
                    name, participant.holder
                )));
            }
        }
    }
    Ok(())
}
