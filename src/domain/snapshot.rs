//! Immutable post-round cap table snapshot.

use crate::domain::{Decimal, HolderName, RoundRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ownership and pricing after one round has been processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapTableSnapshot {
    pub round_ref: RoundRef,
    /// Percent (0-100) of the pre-money fully diluted table the round was
    /// priced on, after any pre-money pool expansion.
    pub pre_money_ownership: BTreeMap<HolderName, Decimal>,
    pub post_money_ownership: BTreeMap<HolderName, Decimal>,
    pub shares_by_holder: BTreeMap<HolderName, u64>,
    pub price_per_share: Decimal,
    pub pre_money_valuation: Decimal,
    pub post_money_valuation: Decimal,
    pub fully_diluted_shares: u64,
    pub new_money_shares: u64,
    pub pro_rata_shares: u64,
    pub option_pool_shares_added: u64,
}

impl CapTableSnapshot {
    pub fn post_money_pct(&self, holder: &HolderName) -> Decimal {
        self.post_money_ownership
            .get(holder)
            .copied()
            .unwrap_or_default()
    }

    pub fn pre_money_pct(&self, holder: &HolderName) -> Decimal {
        self.pre_money_ownership
            .get(holder)
            .copied()
            .unwrap_or_default()
    }

    /// Sum of post-money percentages; 100 up to decimal precision.
    pub fn post_money_total_pct(&self) -> Decimal {
        self.post_money_ownership.values().sum()
    }
}
