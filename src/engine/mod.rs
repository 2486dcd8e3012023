//! Pure computation engine(s) for cap table evolution and exit waterfalls.

use crate::domain::{ClassId, Decimal, HolderName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod allocation;
pub mod breakpoints;
pub mod error;
pub mod history;
pub mod preference_stack;
pub mod round_processor;
pub mod waterfall;

pub use allocation::{allocate_cents, allocate_shares};
pub use breakpoints::{
    find_breakpoints, payout_curve, BisectionConfig, BreakpointAnalysis, BreakpointFinder,
    PayoutCurve,
};
pub use error::{CapTableError, CapTableResult};
pub use history::{CapTableHistory, HistoryBuilder, HolderDilution, OwnershipPoint};
pub use preference_stack::{PreferenceStack, SeniorityGroup, SeniorityKey};
pub use round_processor::{CapTableState, RoundProcessor};
pub use waterfall::{distribute, range_points, WaterfallEngine};

/// How a class took part in a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassTreatment {
    /// Common, option pool or warrant.
    Common,
    /// Preferred class that kept its preference.
    Preference,
    /// Non-participating preferred that converted to common.
    Converted,
}

/// What one class received at an exit value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassPayout {
    pub class_id: ClassId,
    pub treatment: ClassTreatment,
    pub preference: Decimal,
    pub participation: Decimal,
    pub total: Decimal,
    pub capped: bool,
}

/// Exact distribution of one exit value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterfallResult {
    pub exit_value: Decimal,
    pub distributions: BTreeMap<ClassId, Decimal>,
    pub per_holder_proceeds: BTreeMap<HolderName, Decimal>,
    pub classes_converted: BTreeSet<ClassId>,
    pub classes_capped: BTreeSet<ClassId>,
    /// Leading seniority groups whose preference is paid in full.
    pub senior_groups_paid: usize,
    pub class_payouts: Vec<ClassPayout>,
}

impl WaterfallResult {
    pub fn class_total(&self, id: &ClassId) -> Decimal {
        self.distributions.get(id).copied().unwrap_or_default()
    }

    pub fn holder_total(&self, holder: &HolderName) -> Decimal {
        self.per_holder_proceeds
            .get(holder)
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BreakpointEvent {
    /// These classes' preferences become fully paid.
    PreferenceSatisfied { classes: Vec<ClassId> },
    /// A participating class reaches its cap.
    CapReached { class_id: ClassId },
    /// A non-participating class starts converting to common.
    Converted { class_id: ClassId },
}

/// Exit value at which at least one waterfall decision changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub exit_value: Decimal,
    pub events: Vec<BreakpointEvent>,
}
