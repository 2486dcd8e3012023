use crate::domain::{ClassId, Decimal, HolderName, SecurityClass, SecurityKind};
use std::collections::{BTreeMap, BTreeSet};

use super::allocation::{allocate_cents, split_exact};
use super::error::{CapTableError, CapTableResult};
use super::preference_stack::PreferenceStack;
use super::{ClassPayout, ClassTreatment, WaterfallResult};

/// Default bound on conversion fixpoint iterations.
pub const DEFAULT_MAX_CONVERSION_ITERATIONS: usize = 64;

/// Distributes exit proceeds across every security class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterfallEngine {
    max_conversion_iterations: usize,
}

impl Default for WaterfallEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONVERSION_ITERATIONS)
    }
}

/// Distribute `exit_value` with the default engine settings.
///
/// # Errors
/// See [`WaterfallEngine::distribute`].
pub fn distribute(
    exit_value: Decimal,
    stack: &PreferenceStack,
    classes: &[SecurityClass],
) -> CapTableResult<WaterfallResult> {
    WaterfallEngine::default().distribute(exit_value, stack, classes)
}

impl WaterfallEngine {
    pub fn new(max_conversion_iterations: usize) -> Self {
        Self {
            max_conversion_iterations,
        }
    }

    /// Compute the exact dollar distribution for one exit value.
    ///
    /// Non-participating preferred classes convert to common one at a time,
    /// largest gain first, until no class would gain by converting. Gains
    /// are compared on unrounded amounts; only the settled distribution is
    /// apportioned in cents.
    ///
    /// # Errors
    /// - `InputValidation` for a negative or sub-cent exit value, or a stack
    ///   that does not match `classes`.
    /// - `Convergence` when the conversion fixpoint exceeds its bound.
    /// - `ConservationViolation` when the result does not reconcile.
    pub fn distribute(
        &self,
        exit_value: Decimal,
        stack: &PreferenceStack,
        classes: &[SecurityClass],
    ) -> CapTableResult<WaterfallResult> {
        if exit_value.is_negative() || !exit_value.is_whole_cents() {
            return Err(CapTableError::invalid(format!(
                "exit value must be non-negative whole cents, got {}",
                exit_value
            )));
        }
        let ctx = Context::new(stack, classes)?;
        let mut converted = vec![false; classes.len()];

        for _ in 0..self.max_conversion_iterations {
            let base = ctx.run_pass(exit_value, &converted, Rounding::Exact)?;

            let mut best: Option<(Decimal, usize)> = None;
            for i in ctx.conversion_candidates(&converted) {
                let mut trial = converted.clone();
                trial[i] = true;
                let alt = ctx.run_pass(exit_value, &trial, Rounding::Exact)?;
                let gain = alt.total(i) - base.total(i);
                if gain.is_positive() && best.map_or(true, |(g, _)| gain > g) {
                    best = Some((gain, i));
                }
            }

            match best {
                Some((gain, i)) => {
                    tracing::debug!(
                        exit_value = %exit_value,
                        class = %classes[i].id,
                        gain = %gain,
                        "class converts to common"
                    );
                    converted[i] = true;
                }
                None => {
                    let settled = ctx.run_pass(exit_value, &converted, Rounding::Cents)?;
                    return ctx.finish(exit_value, settled, &converted);
                }
            }
        }

        Err(CapTableError::Convergence(format!(
            "conversion decisions at exit value {} did not settle within {} iterations",
            exit_value, self.max_conversion_iterations
        )))
    }

    /// Evaluate several independent exit values.
    ///
    /// # Errors
    /// The first error encountered; no partial results.
    pub fn distribute_many(
        &self,
        exit_values: &[Decimal],
        stack: &PreferenceStack,
        classes: &[SecurityClass],
    ) -> CapTableResult<Vec<WaterfallResult>> {
        exit_values
            .iter()
            .map(|v| self.distribute(*v, stack, classes))
            .collect()
    }

    /// Evaluate `min, min + step, ...` up to and including `max`.
    ///
    /// # Errors
    /// `InputValidation` for an empty or oversized range, otherwise as
    /// [`WaterfallEngine::distribute`].
    pub fn distribute_range(
        &self,
        min: Decimal,
        max: Decimal,
        step: Decimal,
        max_points: usize,
        stack: &PreferenceStack,
        classes: &[SecurityClass],
    ) -> CapTableResult<Vec<WaterfallResult>> {
        let values = range_points(min, max, step, max_points)?;
        self.distribute_many(&values, stack, classes)
    }
}

/// Exit values of a `(min, max, step)` request.
///
/// # Errors
/// `InputValidation` when `min < 0`, `max < min`, `step <= 0`, or the range
/// would produce more than `max_points` values.
pub fn range_points(
    min: Decimal,
    max: Decimal,
    step: Decimal,
    max_points: usize,
) -> CapTableResult<Vec<Decimal>> {
    if min.is_negative() || max < min || !step.is_positive() {
        return Err(CapTableError::invalid(format!(
            "invalid exit range min={} max={} step={}",
            min, max, step
        )));
    }
    let count = ((max - min) / step)
        .floor_to_shares()
        .and_then(|n| usize::try_from(n).ok())
        .and_then(|n| n.checked_add(1))
        .filter(|n| *n <= max_points)
        .ok_or_else(|| {
            CapTableError::invalid(format!(
                "exit range would exceed {} points",
                max_points
            ))
        })?;
    let mut values = Vec::with_capacity(count);
    let mut value = min;
    for _ in 0..count {
        values.push(value);
        value += step;
    }
    Ok(values)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rounding {
    /// Proportional splits carry full precision.
    Exact,
    /// Every split is apportioned in whole cents.
    Cents,
}

impl Rounding {
    fn split(self, amount: Decimal, weights: &[Decimal]) -> CapTableResult<Vec<Decimal>> {
        match self {
            Rounding::Exact => split_exact(amount, weights),
            Rounding::Cents => allocate_cents(amount, weights),
        }
    }
}

/// One distribution under fixed conversion decisions.
struct Pass {
    preference: Vec<Decimal>,
    participation: Vec<Decimal>,
    capped: Vec<bool>,
    groups_paid: usize,
}

impl Pass {
    fn total(&self, i: usize) -> Decimal {
        self.preference[i] + self.participation[i]
    }
}

/// Per-class figures that do not depend on the exit value.
struct Context<'a> {
    stack: &'a PreferenceStack,
    classes: &'a [SecurityClass],
    group_members: Vec<Vec<usize>>,
    claims: Vec<Decimal>,
    caps: Vec<Option<Decimal>>,
    shares: Vec<Decimal>,
}

impl<'a> Context<'a> {
    fn new(stack: &'a PreferenceStack, classes: &'a [SecurityClass]) -> CapTableResult<Self> {
        let index: BTreeMap<&ClassId, usize> =
            classes.iter().enumerate().map(|(i, c)| (&c.id, i)).collect();

        let mut in_stack = vec![false; classes.len()];
        let mut group_members = Vec::with_capacity(stack.len());
        for group in stack.groups() {
            let mut members = Vec::with_capacity(group.class_ids.len());
            for id in &group.class_ids {
                let i = *index.get(id).ok_or_else(|| {
                    CapTableError::invalid(format!("preference stack names unknown class {}", id))
                })?;
                if !classes[i].is_preferred() || in_stack[i] {
                    return Err(CapTableError::invalid(format!(
                        "class {} cannot appear in the preference stack here",
                        id
                    )));
                }
                in_stack[i] = true;
                members.push(i);
            }
            group_members.push(members);
        }
        if let Some(missing) = classes
            .iter()
            .enumerate()
            .find(|(i, c)| c.is_preferred() && !in_stack[*i])
        {
            return Err(CapTableError::invalid(format!(
                "preferred class {} is missing from the preference stack",
                missing.1.id
            )));
        }

        Ok(Self {
            stack,
            classes,
            group_members,
            claims: classes.iter().map(|c| c.preference_claim()).collect(),
            caps: classes.iter().map(|c| c.participation_cap_amount()).collect(),
            shares: classes
                .iter()
                .map(|c| Decimal::from_shares(c.shares_outstanding()))
                .collect(),
        })
    }

    fn conversion_candidates<'b>(&'b self, converted: &'b [bool]) -> impl Iterator<Item = usize> + 'b {
        self.classes.iter().enumerate().filter_map(move |(i, c)| {
            let eligible = matches!(c.kind, SecurityKind::NonParticipatingPreferred { .. })
                && !converted[i]
                && self.shares[i].is_positive();
            eligible.then_some(i)
        })
    }

    /// Shares in the residual: common equivalents, converted preferred and
    /// participating preferred.
    fn shares_in_residual(&self, i: usize, converted: &[bool]) -> bool {
        match self.classes[i].kind {
            SecurityKind::Common | SecurityKind::OptionPool | SecurityKind::Warrant { .. } => true,
            SecurityKind::ParticipatingPreferred { .. } => true,
            SecurityKind::NonParticipatingPreferred { .. } => converted[i],
        }
    }

    fn run_pass(
        &self,
        exit_value: Decimal,
        converted: &[bool],
        rounding: Rounding,
    ) -> CapTableResult<Pass> {
        let n = self.classes.len();
        let mut preference = vec![Decimal::zero(); n];
        let mut participation = vec![Decimal::zero(); n];
        let mut capped = vec![false; n];
        let mut remaining = exit_value;
        let mut groups_paid = 0;
        let mut leading = true;

        // Preferences, senior group first.
        for members in &self.group_members {
            let unpaid: Vec<usize> = members.iter().copied().filter(|&i| !converted[i]).collect();
            let claims: Vec<Decimal> = unpaid.iter().map(|&i| self.claims[i]).collect();
            let aggregate: Decimal = claims.iter().sum();
            let paid = remaining.min(aggregate);
            if paid.is_positive() {
                let parts = rounding.split(paid, &claims)?;
                for (&i, part) in unpaid.iter().zip(parts) {
                    preference[i] = part;
                }
                remaining -= paid;
            }
            if leading && paid == aggregate {
                groups_paid += 1;
            } else {
                leading = false;
            }
        }

        // Residual, recycling whatever capped classes cannot take.
        let mut active: Vec<usize> = (0..n)
            .filter(|&i| self.shares_in_residual(i, converted) && self.shares[i].is_positive())
            .collect();
        for &i in &active {
            if let Some(cap) = self.caps[i] {
                if preference[i] >= cap {
                    capped[i] = true;
                }
            }
        }
        active.retain(|&i| !capped[i]);

        for _ in 0..=n {
            if remaining.is_zero() {
                break;
            }
            let weights: Vec<Decimal> = active.iter().map(|&i| self.shares[i]).collect();
            let parts = rounding.split(remaining, &weights)?;

            let mut newly_capped = Vec::new();
            for (&i, part) in active.iter().zip(&parts) {
                if let Some(cap) = self.caps[i] {
                    let headroom = cap - preference[i] - participation[i];
                    if *part >= headroom {
                        newly_capped.push((i, headroom));
                    }
                }
            }

            if newly_capped.is_empty() {
                for (&i, part) in active.iter().zip(parts) {
                    participation[i] += part;
                }
                remaining = Decimal::zero();
                break;
            }
            for (i, headroom) in newly_capped {
                participation[i] += headroom;
                remaining -= headroom;
                capped[i] = true;
            }
            active.retain(|&i| !capped[i]);
        }

        if !remaining.is_zero() {
            return Err(CapTableError::ConservationViolation(format!(
                "{} of {} left undistributed",
                remaining, exit_value
            )));
        }

        Ok(Pass {
            preference,
            participation,
            capped,
            groups_paid,
        })
    }

    fn finish(
        &self,
        exit_value: Decimal,
        pass: Pass,
        converted: &[bool],
    ) -> CapTableResult<WaterfallResult> {
        let mut distributions = BTreeMap::new();
        let mut per_holder: BTreeMap<HolderName, Decimal> = BTreeMap::new();
        let mut class_payouts = Vec::with_capacity(self.classes.len());
        let mut classes_converted = BTreeSet::new();
        let mut classes_capped = BTreeSet::new();

        for (i, class) in self.classes.iter().enumerate() {
            let total = pass.total(i);
            if pass.preference[i].is_negative() || pass.participation[i].is_negative() {
                return Err(CapTableError::ConservationViolation(format!(
                    "negative distribution {} to class {}",
                    total, class.id
                )));
            }
            let treatment = if converted[i] {
                classes_converted.insert(class.id.clone());
                ClassTreatment::Converted
            } else if class.is_preferred() {
                ClassTreatment::Preference
            } else {
                ClassTreatment::Common
            };
            if pass.capped[i] {
                classes_capped.insert(class.id.clone());
            }

            let by_invested: Vec<Decimal> = class
                .allocations
                .iter()
                .map(|a| class.allocation_invested(a))
                .collect();
            let by_shares: Vec<Decimal> = class
                .allocations
                .iter()
                .map(|a| Decimal::from_shares(a.shares))
                .collect();
            let pref_parts = allocate_cents(pass.preference[i], &by_invested)?;
            let residual_parts = allocate_cents(pass.participation[i], &by_shares)?;
            for ((allocation, p), r) in class.allocations.iter().zip(pref_parts).zip(residual_parts) {
                *per_holder.entry(allocation.holder.clone()).or_default() += p + r;
            }

            distributions.insert(class.id.clone(), total);
            class_payouts.push(ClassPayout {
                class_id: class.id.clone(),
                treatment,
                preference: pass.preference[i],
                participation: pass.participation[i],
                total,
                capped: pass.capped[i],
            });
        }

        let distributed: Decimal = distributions.values().sum();
        if distributed != exit_value {
            return Err(CapTableError::ConservationViolation(format!(
                "distributed {} but exit value is {}",
                distributed, exit_value
            )));
        }
        let to_holders: Decimal = per_holder.values().sum();
        if to_holders != exit_value {
            return Err(CapTableError::ConservationViolation(format!(
                "holders received {} but exit value is {}",
                to_holders, exit_value
            )));
        }

        Ok(WaterfallResult {
            exit_value,
            distributions,
            per_holder_proceeds: per_holder,
            classes_converted,
            classes_capped,
            senior_groups_paid: pass.groups_paid.min(self.stack.len()),
            class_payouts,
        })
    }
}
