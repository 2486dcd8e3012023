//! Security ledger: every class of equity and its contractual terms.

use crate::domain::{ClassId, Decimal, HolderName};
use crate::engine::CapTableError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Class id used for the employee option pool created by round processing.
pub const OPTION_POOL_CLASS_ID: &str = "option-pool";

/// Holder tag for unallocated and allocated option pool shares.
pub const OPTION_POOL_HOLDER: &str = "Option Pool";

/// Upper limit on how much a participating class can take in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParticipationCap {
    Uncapped,
    /// Cap on total proceeds (preference plus participation) as a multiple
    /// of invested capital.
    Multiple(Decimal),
}

/// Closed set of security behaviours the waterfall has to handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SecurityKind {
    Common,
    OptionPool,
    /// Treated as a common equivalent; the exercise price is informational.
    Warrant {
        exercise_price: Decimal,
    },
    ParticipatingPreferred {
        liquidation_multiple: Decimal,
        cap: ParticipationCap,
    },
    NonParticipatingPreferred {
        liquidation_multiple: Decimal,
    },
}

impl SecurityKind {
    pub fn is_preferred(&self) -> bool {
        matches!(
            self,
            SecurityKind::ParticipatingPreferred { .. } | SecurityKind::NonParticipatingPreferred { .. }
        )
    }

    /// Common, option pool and warrants share the residual by share count
    /// and never hold a preference.
    pub fn is_common_equivalent(&self) -> bool {
        matches!(
            self,
            SecurityKind::Common | SecurityKind::OptionPool | SecurityKind::Warrant { .. }
        )
    }

    pub fn liquidation_multiple(&self) -> Decimal {
        match self {
            SecurityKind::ParticipatingPreferred {
                liquidation_multiple,
                ..
            }
            | SecurityKind::NonParticipatingPreferred {
                liquidation_multiple,
            } => *liquidation_multiple,
            SecurityKind::Common | SecurityKind::OptionPool | SecurityKind::Warrant { .. } => {
                Decimal::zero()
            }
        }
    }
}

/// A block of shares in one class held by one holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub holder: HolderName,
    pub shares: u64,
    /// Dollars paid for this block. Defaults to `shares * issue_price`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invested: Option<Decimal>,
}

impl Allocation {
    pub fn new(holder: HolderName, shares: u64) -> Self {
        Self {
            holder,
            shares,
            invested: None,
        }
    }

    pub fn with_invested(holder: HolderName, shares: u64, invested: Decimal) -> Self {
        Self {
            holder,
            shares,
            invested: Some(invested),
        }
    }
}

/// One class of equity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityClass {
    pub id: ClassId,
    pub label: String,
    pub kind: SecurityKind,
    pub issue_price_per_share: Decimal,
    pub allocations: Vec<Allocation>,
    /// Lower ranks are paid first. `None` falls back to reverse round order.
    #[serde(default)]
    pub seniority_rank: Option<u32>,
    /// Must be set on every class that shares an explicit rank.
    #[serde(default)]
    pub pari_passu: bool,
    #[serde(default)]
    pub pro_rata_eligible: bool,
    /// Index of the funding round that created this class.
    #[serde(default)]
    pub round_index: Option<usize>,
}

impl SecurityClass {
    pub fn shares_outstanding(&self) -> u64 {
        self.allocations.iter().map(|a| a.shares).sum()
    }

    /// Dollars paid in for one allocation.
    pub fn allocation_invested(&self, allocation: &Allocation) -> Decimal {
        allocation
            .invested
            .unwrap_or_else(|| Decimal::from_shares(allocation.shares) * self.issue_price_per_share)
            .round_cents()
    }

    /// Total dollars paid in for the class.
    pub fn invested_capital(&self) -> Decimal {
        self.allocations
            .iter()
            .map(|a| self.allocation_invested(a))
            .sum()
    }

    pub fn is_preferred(&self) -> bool {
        self.kind.is_preferred()
    }

    pub fn is_participating(&self) -> bool {
        matches!(self.kind, SecurityKind::ParticipatingPreferred { .. })
    }

    pub fn is_common_equivalent(&self) -> bool {
        self.kind.is_common_equivalent()
    }

    /// Liquidation preference owed before junior classes are paid.
    pub fn preference_claim(&self) -> Decimal {
        (self.invested_capital() * self.kind.liquidation_multiple()).round_cents()
    }

    /// Maximum total proceeds for a capped participating class.
    pub fn participation_cap_amount(&self) -> Option<Decimal> {
        match self.kind {
            SecurityKind::ParticipatingPreferred {
                cap: ParticipationCap::Multiple(multiple),
                ..
            } => Some((self.invested_capital() * multiple).floor_cents()),
            _ => None,
        }
    }

    pub fn shares_held_by(&self, holder: &HolderName) -> u64 {
        self.allocations
            .iter()
            .filter(|a| &a.holder == holder)
            .map(|a| a.shares)
            .sum()
    }

    /// Validate the class in isolation.
    ///
    /// # Errors
    /// Returns `InputValidation` describing the first problem found.
    pub fn validate(&self) -> Result<(), CapTableError> {
        if self.id.as_str().trim().is_empty() {
            return Err(CapTableError::invalid("security class id must not be empty"));
        }
        if self.issue_price_per_share.is_negative() {
            return Err(CapTableError::invalid(format!(
                "class {}: issue price must not be negative",
                self.id
            )));
        }
        if self.is_preferred() && !self.issue_price_per_share.is_positive() {
            return Err(CapTableError::invalid(format!(
                "class {}: preferred classes need a positive issue price",
                self.id
            )));
        }
        if self.kind.liquidation_multiple().is_negative() {
            return Err(CapTableError::invalid(format!(
                "class {}: liquidation multiple must not be negative",
                self.id
            )));
        }
        match &self.kind {
            SecurityKind::ParticipatingPreferred {
                liquidation_multiple,
                cap: ParticipationCap::Multiple(cap),
            } if cap < liquidation_multiple => {
                return Err(CapTableError::invalid(format!(
                    "class {}: participation cap {} is below liquidation multiple {}",
                    self.id, cap, liquidation_multiple
                )));
            }
            SecurityKind::Warrant { exercise_price } if exercise_price.is_negative() => {
                return Err(CapTableError::invalid(format!(
                    "class {}: warrant exercise price must not be negative",
                    self.id
                )));
            }
            _ => {}
        }
        let mut seen = BTreeSet::new();
        for allocation in &self.allocations {
            if allocation.holder.as_str().trim().is_empty() {
                return Err(CapTableError::invalid(format!(
                    "class {}: allocation holder must not be empty",
                    self.id
                )));
            }
            if !seen.insert(&allocation.holder) {
                return Err(CapTableError::invalid(format!(
                    "class {}: holder {} appears in more than one allocation",
                    self.id, allocation.holder
                )));
            }
            if allocation.invested.is_some_and(|v| v.is_negative()) {
                return Err(CapTableError::invalid(format!(
                    "class {}: invested amount for {} must not be negative",
                    self.id, allocation.holder
                )));
            }
        }
        Ok(())
    }
}

/// Immutable ordered collection of security classes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLedger {
    pub classes: Vec<SecurityClass>,
}

impl SecurityLedger {
    pub fn new(classes: Vec<SecurityClass>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[SecurityClass] {
        &self.classes
    }

    pub fn class(&self, id: &ClassId) -> Option<&SecurityClass> {
        self.classes.iter().find(|c| &c.id == id)
    }

    pub fn contains_class(&self, id: &ClassId) -> bool {
        self.class(id).is_some()
    }

    /// Every outstanding share, including the whole option pool.
    pub fn fully_diluted_shares(&self) -> u64 {
        self.classes.iter().map(|c| c.shares_outstanding()).sum()
    }

    /// Shares per holder aggregated across every class.
    pub fn shares_by_holder(&self) -> BTreeMap<HolderName, u64> {
        let mut out: BTreeMap<HolderName, u64> = BTreeMap::new();
        for class in &self.classes {
            for allocation in &class.allocations {
                *out.entry(allocation.holder.clone()).or_default() += allocation.shares;
            }
        }
        out
    }

    /// Fully diluted ownership percentage (0-100) per holder.
    pub fn ownership_pct(&self) -> BTreeMap<HolderName, Decimal> {
        let total = Decimal::from_shares(self.fully_diluted_shares());
        if total.is_zero() {
            return BTreeMap::new();
        }
        self.shares_by_holder()
            .into_iter()
            .map(|(holder, shares)| {
                let pct = Decimal::from_shares(shares) * Decimal::hundred() / total;
                (holder, pct)
            })
            .collect()
    }

    pub fn holds_shares(&self, holder: &HolderName) -> bool {
        self.classes
            .iter()
            .any(|c| c.shares_held_by(holder) > 0)
    }

    /// True when the holder owns shares in at least one class that carries
    /// pro-rata rights.
    pub fn has_pro_rata_rights(&self, holder: &HolderName) -> bool {
        self.classes
            .iter()
            .any(|c| c.pro_rata_eligible && c.shares_held_by(holder) > 0)
    }

    pub fn holders_with_pro_rata_rights(&self) -> BTreeSet<HolderName> {
        self.classes
            .iter()
            .filter(|c| c.pro_rata_eligible)
            .flat_map(|c| c.allocations.iter())
            .filter(|a| a.shares > 0)
            .map(|a| a.holder.clone())
            .collect()
    }

    pub fn option_pool(&self) -> Option<&SecurityClass> {
        self.classes
            .iter()
            .find(|c| matches!(c.kind, SecurityKind::OptionPool))
    }

    /// Validate the ledger as a whole.
    ///
    /// # Errors
    /// Returns `InputValidation` for an empty ledger, duplicate class ids, or
    /// any invalid class.
    pub fn validate(&self) -> Result<(), CapTableError> {
        if self.classes.is_empty() {
            return Err(CapTableError::invalid(
                "ledger must contain at least one security class",
            ));
        }
        let mut ids = BTreeSet::new();
        for class in &self.classes {
            class.validate()?;
            if !ids.insert(&class.id) {
                return Err(CapTableError::invalid(format!(
                    "duplicate security class id {}",
                    class.id
                )));
            }
        }
        if self
            .classes
            .iter()
            .filter(|c| matches!(c.kind, SecurityKind::OptionPool))
            .count()
            > 1
        {
            return Err(CapTableError::invalid(
                "ledger may contain at most one option pool class",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn series_a() -> SecurityClass {
        SecurityClass {
            id: ClassId::new("series-a"),
            label: "Series A Preferred".to_string(),
            kind: SecurityKind::ParticipatingPreferred {
                liquidation_multiple: d("1"),
                cap: ParticipationCap::Multiple(d("3")),
            },
            issue_price_per_share: d("2"),
            allocations: vec![
                Allocation::with_invested(HolderName::new("Fund I"), 1_000, d("2000")),
                Allocation::new(HolderName::new("Angel"), 500),
            ],
            seniority_rank: None,
            pari_passu: false,
            pro_rata_eligible: true,
            round_index: Some(0),
        }
    }

    fn common() -> SecurityClass {
        SecurityClass {
            id: ClassId::new("common"),
            label: "Common".to_string(),
            kind: SecurityKind::Common,
            issue_price_per_share: d("0.001"),
            allocations: vec![Allocation::new(HolderName::new("Founder"), 8_500)],
            seniority_rank: None,
            pari_passu: false,
            pro_rata_eligible: false,
            round_index: None,
        }
    }

    #[test]
    fn test_invested_capital_defaults_to_price_times_shares() {
        let class = series_a();
        assert_eq!(class.shares_outstanding(), 1_500);
        assert_eq!(class.invested_capital(), d("3000"));
        assert_eq!(class.preference_claim(), d("3000"));
        assert_eq!(class.participation_cap_amount(), Some(d("9000")));
    }

    #[test]
    fn test_ownership_pct_aggregates_holders() {
        let ledger = SecurityLedger::new(vec![common(), series_a()]);
        let pct = ledger.ownership_pct();
        assert_eq!(ledger.fully_diluted_shares(), 10_000);
        assert_eq!(pct[&HolderName::new("Founder")], d("85"));
        assert_eq!(pct[&HolderName::new("Fund I")], d("10"));
        let total: Decimal = pct.values().sum();
        assert_eq!(total, d("100"));
    }

    #[test]
    fn test_pro_rata_rights_follow_class_flag() {
        let ledger = SecurityLedger::new(vec![common(), series_a()]);
        assert!(ledger.has_pro_rata_rights(&HolderName::new("Fund I")));
        assert!(!ledger.has_pro_rata_rights(&HolderName::new("Founder")));
        assert!(!ledger.has_pro_rata_rights(&HolderName::new("Stranger")));
    }

    #[test]
    fn test_duplicate_class_ids_rejected() {
        let ledger = SecurityLedger::new(vec![common(), common()]);
        assert!(matches!(
            ledger.validate(),
            Err(CapTableError::InputValidation(_))
        ));
    }

    #[test]
    fn test_cap_below_multiple_rejected() {
        let mut class = series_a();
        class.kind = SecurityKind::ParticipatingPreferred {
            liquidation_multiple: d("2"),
            cap: ParticipationCap::Multiple(d("1.5")),
        };
        assert!(class.validate().is_err());
    }

    #[test]
    fn test_preferred_requires_positive_price() {
        let mut class = series_a();
        class.issue_price_per_share = Decimal::zero();
        assert!(class.validate().is_err());
    }

    #[test]
    fn test_empty_ledger_rejected() {
        assert!(SecurityLedger::default().validate().is_err());
    }

    #[test]
    fn test_kind_json_shape() {
        let json = serde_json::to_value(&series_a().kind).unwrap();
        assert_eq!(json["type"], "participatingPreferred");
        assert_eq!(json["liquidationMultiple"], "1");
        assert_eq!(json["cap"]["multiple"], "3");
    }
}
