//! Exit values at which the waterfall's decisions change.
//!
//! Between two breakpoints every class's payout is linear in the exit value,
//! so evaluating the waterfall at each breakpoint gives the exact payout
//! curve.

use crate::domain::{ClassId, Decimal, SecurityClass, SecurityKind};
use std::collections::BTreeSet;

use super::error::{CapTableError, CapTableResult};
use super::preference_stack::PreferenceStack;
use super::waterfall::WaterfallEngine;
use super::{Breakpoint, BreakpointEvent, WaterfallResult};

pub const DEFAULT_TOLERANCE_DOLLARS: u64 = 1;
pub const DEFAULT_MAX_ITERATIONS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BisectionConfig {
    /// Width of the interval a breakpoint is narrowed to.
    pub tolerance: Decimal,
    /// Bound on halvings per search, and on doublings of the upper bound.
    pub max_iterations: u32,
}

impl Default for BisectionConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::from(DEFAULT_TOLERANCE_DOLLARS),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Located breakpoints plus the exit value beyond which nothing changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointAnalysis {
    pub breakpoints: Vec<Breakpoint>,
    pub upper_bound: Decimal,
}

/// Waterfall results at 0, every breakpoint and the upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutCurve {
    pub breakpoints: Vec<Breakpoint>,
    pub points: Vec<WaterfallResult>,
}

/// Decisions that shape the payout curve at one exit value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Signature {
    converted: BTreeSet<ClassId>,
    capped: BTreeSet<ClassId>,
    groups_paid: usize,
}

impl Signature {
    fn of(result: &WaterfallResult) -> Self {
        Self {
            converted: result.classes_converted.clone(),
            capped: result.classes_capped.clone(),
            groups_paid: result.senior_groups_paid,
        }
    }
}

/// Locates breakpoints by bisecting between candidate exit values.
pub struct BreakpointFinder<'a> {
    engine: WaterfallEngine,
    config: BisectionConfig,
    stack: &'a PreferenceStack,
    classes: &'a [SecurityClass],
}

impl<'a> BreakpointFinder<'a> {
    pub fn new(
        engine: WaterfallEngine,
        config: BisectionConfig,
        stack: &'a PreferenceStack,
        classes: &'a [SecurityClass],
    ) -> Self {
        Self {
            engine,
            config,
            stack,
            classes,
        }
    }

    /// All breakpoints in ascending order.
    ///
    /// # Errors
    /// - `InputValidation` for a tolerance below one cent or zero iterations.
    /// - `Convergence` when a search exceeds `max_iterations`.
    /// - `MonotonicityViolation` when a decision is undone as exit value rises.
    /// - Any error from the waterfall itself.
    pub fn find(&self) -> CapTableResult<BreakpointAnalysis> {
        if self.config.tolerance < Decimal::cent() || self.config.max_iterations == 0 {
            return Err(CapTableError::invalid(format!(
                "bisection needs tolerance >= 0.01 and at least one iteration, got {} / {}",
                self.config.tolerance, self.config.max_iterations
            )));
        }

        let upper_bound = self.upper_bound()?;
        let mut candidates: Vec<Decimal> = std::iter::once(Decimal::zero())
            .chain(self.cumulative_thresholds(&BTreeSet::new()))
            .chain(std::iter::once(upper_bound))
            .filter(|v| *v <= upper_bound)
            .collect();
        candidates.sort();
        candidates.dedup();

        let mut evaluated = Vec::with_capacity(candidates.len());
        for value in candidates {
            evaluated.push((value, self.signature_at(value)?));
        }

        let mut breakpoints = Vec::new();
        for pair in evaluated.windows(2) {
            let (lo, lo_sig) = &pair[0];
            let (hi, hi_sig) = &pair[1];
            if lo_sig != hi_sig {
                self.locate(*lo, lo_sig, *hi, hi_sig, 0, &mut breakpoints)?;
            }
        }

        tracing::debug!(
            breakpoints = breakpoints.len(),
            upper_bound = %upper_bound,
            "breakpoints located"
        );
        Ok(BreakpointAnalysis {
            breakpoints: merge_coincident(breakpoints),
            upper_bound,
        })
    }

    /// Evaluate the waterfall at 0, each breakpoint and the upper bound.
    ///
    /// # Errors
    /// As [`BreakpointFinder::find`].
    pub fn payout_curve(&self) -> CapTableResult<PayoutCurve> {
        let analysis = self.find()?;
        let mut values: Vec<Decimal> = std::iter::once(Decimal::zero())
            .chain(analysis.breakpoints.iter().map(|b| b.exit_value))
            .chain(std::iter::once(analysis.upper_bound))
            .collect();
        values.dedup();
        let points = self
            .engine
            .distribute_many(&values, self.stack, self.classes)?;
        Ok(PayoutCurve {
            breakpoints: analysis.breakpoints,
            points,
        })
    }

    fn signature_at(&self, exit_value: Decimal) -> CapTableResult<Signature> {
        self.engine
            .distribute(exit_value, self.stack, self.classes)
            .map(|r| Signature::of(&r))
    }

    /// Decisions at an exit value large enough that nothing changes after it.
    fn terminal_signature(&self) -> Signature {
        let mut converted = BTreeSet::new();
        let mut capped = BTreeSet::new();
        for class in self.classes.iter().filter(|c| c.shares_outstanding() > 0) {
            match class.kind {
                SecurityKind::NonParticipatingPreferred { .. } => {
                    converted.insert(class.id.clone());
                }
                SecurityKind::ParticipatingPreferred { .. }
                    if class.participation_cap_amount().is_some() =>
                {
                    capped.insert(class.id.clone());
                }
                _ => {}
            }
        }
        Signature {
            converted,
            capped,
            groups_paid: self.stack.len(),
        }
    }

    fn upper_bound(&self) -> CapTableResult<Decimal> {
        let terminal = self.terminal_signature();
        let claims: Decimal = self.classes.iter().map(|c| c.preference_claim()).sum();
        let mut upper = claims.max(Decimal::one());
        for _ in 0..=self.config.max_iterations {
            if self.signature_at(upper)? == terminal {
                return Ok(upper);
            }
            upper = upper.checked_mul(Decimal::from(2u64)).ok_or_else(|| {
                CapTableError::Convergence("upper bound search overflowed".to_string())
            })?;
        }
        Err(CapTableError::Convergence(format!(
            "no exit value up to {} settles every decision",
            upper
        )))
    }

    /// Exit values at which each successive seniority group is fully paid,
    /// ignoring classes that have converted.
    fn cumulative_thresholds(&self, converted: &BTreeSet<ClassId>) -> Vec<Decimal> {
        let mut running = Decimal::zero();
        self.stack
            .groups()
            .iter()
            .map(|group| {
                running += group
                    .class_ids
                    .iter()
                    .filter(|id| !converted.contains(*id))
                    .filter_map(|id| self.classes.iter().find(|c| &c.id == id))
                    .map(|c| c.preference_claim())
                    .sum::<Decimal>();
                running
            })
            .collect()
    }

    fn locate(
        &self,
        lo: Decimal,
        lo_sig: &Signature,
        hi: Decimal,
        hi_sig: &Signature,
        depth: u32,
        out: &mut Vec<Breakpoint>,
    ) -> CapTableResult<()> {
        check_monotonic(lo, lo_sig, hi, hi_sig)?;

        if hi - lo <= self.config.tolerance {
            out.push(self.breakpoint(lo, lo_sig, hi, hi_sig));
            return Ok(());
        }
        if depth >= self.config.max_iterations {
            return Err(CapTableError::Convergence(format!(
                "breakpoint between {} and {} not isolated within {} halvings",
                lo, hi, self.config.max_iterations
            )));
        }

        let mid = ((lo + hi) / Decimal::from(2u64)).floor_cents();
        let mid_sig = self.signature_at(mid)?;
        if &mid_sig != lo_sig {
            self.locate(lo, lo_sig, mid, &mid_sig, depth + 1, out)?;
        }
        if &mid_sig != hi_sig {
            self.locate(mid, &mid_sig, hi, hi_sig, depth + 1, out)?;
        }
        Ok(())
    }

    fn breakpoint(&self, lo: Decimal, lo_sig: &Signature, hi: Decimal, hi_sig: &Signature) -> Breakpoint {
        let mut events = Vec::new();

        if hi_sig.groups_paid > lo_sig.groups_paid {
            let classes = self.stack.groups()[lo_sig.groups_paid..hi_sig.groups_paid]
                .iter()
                .flat_map(|g| g.class_ids.iter().cloned())
                .collect();
            events.push(BreakpointEvent::PreferenceSatisfied { classes });
        }
        for class_id in hi_sig.capped.difference(&lo_sig.capped) {
            events.push(BreakpointEvent::CapReached {
                class_id: class_id.clone(),
            });
        }
        for class_id in hi_sig.converted.difference(&lo_sig.converted) {
            events.push(BreakpointEvent::Converted {
                class_id: class_id.clone(),
            });
        }

        let preference_only = lo_sig.converted == hi_sig.converted && lo_sig.capped == hi_sig.capped;
        let exit_value = if preference_only {
            self.cumulative_thresholds(&hi_sig.converted)
                .get(hi_sig.groups_paid.saturating_sub(1))
                .copied()
                .filter(|t| *t >= lo && *t <= hi)
                .unwrap_or(hi)
        } else {
            hi
        };

        Breakpoint { exit_value, events }
    }
}

/// Find breakpoints with default settings.
///
/// # Errors
/// As [`BreakpointFinder::find`].
pub fn find_breakpoints(
    stack: &PreferenceStack,
    classes: &[SecurityClass],
) -> CapTableResult<BreakpointAnalysis> {
    BreakpointFinder::new(WaterfallEngine::default(), BisectionConfig::default(), stack, classes)
        .find()
}

/// Payout curve with default settings.
///
/// # Errors
/// As [`BreakpointFinder::find`].
pub fn payout_curve(stack: &PreferenceStack, classes: &[SecurityClass]) -> CapTableResult<PayoutCurve> {
    BreakpointFinder::new(WaterfallEngine::default(), BisectionConfig::default(), stack, classes)
        .payout_curve()
}

fn check_monotonic(lo: Decimal, lo_sig: &Signature, hi: Decimal, hi_sig: &Signature) -> CapTableResult<()> {
    if let Some(id) = lo_sig.converted.difference(&hi_sig.converted).next() {
        return Err(CapTableError::MonotonicityViolation(format!(
            "class {} converts at {} but not at {}",
            id, lo, hi
        )));
    }
    if let Some(id) = lo_sig.capped.difference(&hi_sig.capped).next() {
        return Err(CapTableError::MonotonicityViolation(format!(
            "class {} is capped at {} but not at {}",
            id, lo, hi
        )));
    }
    if hi_sig.groups_paid < lo_sig.groups_paid {
        return Err(CapTableError::MonotonicityViolation(format!(
            "fewer seniority groups paid at {} than at {}",
            hi, lo
        )));
    }
    Ok(())
}

fn merge_coincident(breakpoints: Vec<Breakpoint>) -> Vec<Breakpoint> {
    let mut merged: Vec<Breakpoint> = Vec::with_capacity(breakpoints.len());
    for bp in breakpoints {
        match merged.last_mut() {
            Some(last) if last.exit_value == bp.exit_value => last.events.extend(bp.events),
            _ => merged.push(bp),
        }
    }
    merged
}
