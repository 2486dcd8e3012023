//! Apportionment of whole cents and whole shares.
//!
//! Every pro-rata split in the engine goes through here so that the parts
//! always add back up to the whole exactly. Money uses a divisor method
//! (Jefferson / D'Hondt), which is house monotone: raising the total never
//! takes a cent away from any recipient. Share issuance is a one-off split
//! and keeps largest remainder, which stays closest to the quotas.

use super::error::{CapTableError, CapTableResult};
use crate::domain::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Split `total` (whole cents, >= 0) across `weights` in proportion.
///
/// # Errors
/// `ConservationViolation` when a positive amount has no positive weight to
/// go to, or the apportionment cannot be reconciled.
pub fn allocate_cents(total: Decimal, weights: &[Decimal]) -> CapTableResult<Vec<Decimal>> {
    if total.is_negative() || !total.is_whole_cents() {
        return Err(CapTableError::ConservationViolation(format!(
            "cannot apportion {} in whole cents",
            total
        )));
    }
    let total_cents = total
        .to_cents()
        .ok_or_else(|| CapTableError::ConservationViolation(format!("{} overflows cents", total)))?;
    let units = highest_averages(total_cents, weights)?;
    units
        .into_iter()
        .map(|u| {
            Decimal::from_cents(u).ok_or_else(|| {
                CapTableError::ConservationViolation(format!("{} cents overflows decimal", u))
            })
        })
        .collect()
}

/// Split `total` whole shares across `weights` in proportion.
///
/// # Errors
/// Same conditions as [`allocate_cents`].
pub fn allocate_shares(total: u64, weights: &[Decimal]) -> CapTableResult<Vec<u64>> {
    let units = largest_remainder(i128::from(total), weights)?;
    units
        .into_iter()
        .map(|u| {
            u64::try_from(u).map_err(|_| {
                CapTableError::ConservationViolation(format!("{} shares out of range", u))
            })
        })
        .collect()
}

/// Exact `total * w / sum(w)` for every weight, without rounding to units.
///
/// # Errors
/// `ConservationViolation` for negative weights, or a positive total with no
/// positive weight.
pub fn split_exact(total: Decimal, weights: &[Decimal]) -> CapTableResult<Vec<Decimal>> {
    let weight_sum = checked_weight_sum(weights)?;
    if weight_sum.is_zero() {
        if total.is_zero() {
            return Ok(vec![Decimal::zero(); weights.len()]);
        }
        return Err(CapTableError::ConservationViolation(format!(
            "{} has no recipient with positive weight",
            total
        )));
    }
    Ok(weights.iter().map(|w| quota(total, *w, weight_sum)).collect())
}

fn checked_weight_sum(weights: &[Decimal]) -> CapTableResult<Decimal> {
    if weights.iter().any(|w| w.is_negative()) {
        return Err(CapTableError::ConservationViolation(
            "apportionment weights must not be negative".to_string(),
        ));
    }
    Ok(weights.iter().sum())
}

fn quota(total: Decimal, weight: Decimal, weight_sum: Decimal) -> Decimal {
    // Multiply first for precision; fall back to the ratio on overflow.
    total
        .checked_mul(weight)
        .and_then(|p| p.checked_div(weight_sum))
        .unwrap_or_else(|| total * (weight / weight_sum))
}

fn units_decimal(units: i128) -> Option<Decimal> {
    rust_decimal::Decimal::try_from_i128_with_scale(units, 0)
        .ok()
        .map(Decimal::new)
}

/// Floors of the exact quotas, the quotas themselves, and the units left over.
struct Quotas {
    floors: Vec<i128>,
    exact: Vec<Decimal>,
    leftover: i128,
}

/// `None` when there is nothing to apportion.
fn quotas(total: i128, weights: &[Decimal]) -> CapTableResult<Option<Quotas>> {
    let weight_sum = checked_weight_sum(weights)?;
    if weight_sum.is_zero() {
        if total == 0 {
            return Ok(None);
        }
        return Err(CapTableError::ConservationViolation(format!(
            "{} units have no recipient with positive weight",
            total
        )));
    }

    let total_dec = units_decimal(total)
        .ok_or_else(|| CapTableError::ConservationViolation(format!("{} overflows decimal", total)))?;
    let mut floors = Vec::with_capacity(weights.len());
    let mut exact = Vec::with_capacity(weights.len());
    for weight in weights {
        let q = quota(total_dec, *weight, weight_sum);
        let floor = q.inner().floor().to_i128().ok_or_else(|| {
            CapTableError::ConservationViolation(format!("share of {} overflows", total))
        })?;
        floors.push(floor);
        exact.push(q);
    }

    let assigned: i128 = floors.iter().sum();
    let leftover = total - assigned;
    let recipients = weights.iter().filter(|w| w.is_positive()).count() as i128;
    if leftover < 0 || leftover > recipients {
        return Err(CapTableError::ConservationViolation(format!(
            "apportioning {} left {} unassigned",
            total, leftover
        )));
    }
    Ok(Some(Quotas {
        floors,
        exact,
        leftover,
    }))
}

/// Jefferson / D'Hondt. Starting from the quota floors, each leftover unit
/// goes to the highest `w / (a + 1)`, ties to the lowest index.
fn highest_averages(total: i128, weights: &[Decimal]) -> CapTableResult<Vec<i128>> {
    let Some(Quotas {
        mut floors,
        leftover,
        ..
    }) = quotas(total, weights)?
    else {
        return Ok(vec![0; weights.len()]);
    };

    for _ in 0..leftover {
        let mut best: Option<usize> = None;
        for i in (0..weights.len()).filter(|&i| weights[i].is_positive()) {
            best = match best {
                Some(b) if !outranks(weights[i], floors[i], weights[b], floors[b]) => Some(b),
                _ => Some(i),
            };
        }
        match best {
            Some(i) => floors[i] += 1,
            None => {
                return Err(CapTableError::ConservationViolation(format!(
                    "apportioning {} left {} unassigned",
                    total, leftover
                )))
            }
        }
    }
    Ok(floors)
}

/// Whether `w_a / (a + 1)` is strictly greater than `w_b / (b + 1)`.
fn outranks(w_a: Decimal, a: i128, w_b: Decimal, b: i128) -> bool {
    let next = |units: i128| units_decimal(units.saturating_add(1));
    match (next(a), next(b)) {
        (Some(da), Some(db)) => match (w_a.checked_mul(db), w_b.checked_mul(da)) {
            (Some(lhs), Some(rhs)) => lhs > rhs,
            _ => w_a / da > w_b / db,
        },
        _ => false,
    }
}

/// Hamilton: the quota floors, then one unit each to the largest
/// fractional remainders, ties to the lowest index.
fn largest_remainder(total: i128, weights: &[Decimal]) -> CapTableResult<Vec<i128>> {
    let Some(Quotas {
        mut floors,
        exact,
        leftover,
    }) = quotas(total, weights)?
    else {
        return Ok(vec![0; weights.len()]);
    };

    let mut order: Vec<usize> = (0..weights.len())
        .filter(|&i| weights[i].is_positive())
        .collect();
    order.sort_by(|&a, &b| {
        exact[b]
            .fract_part()
            .cmp(&exact[a].fract_part())
            .then(a.cmp(&b))
    });
    for &i in order.iter().take(leftover as usize) {
        floors[i] += 1;
    }
    Ok(floors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_three_way_split_sums_exactly() {
        let parts = allocate_cents(d("100"), &[d("1"), d("1"), d("1")]).unwrap();
        assert_eq!(parts, vec![d("33.34"), d("33.33"), d("33.33")]);
        let total: Decimal = parts.iter().sum();
        assert_eq!(total, d("100"));
    }

    #[test]
    fn test_highest_average_wins_extra_cent() {
        let parts = allocate_cents(d("0.10"), &[d("1"), d("2")]).unwrap();
        // 1/4 against 2/7 for the spare cent.
        assert_eq!(parts, vec![d("0.03"), d("0.07")]);
    }

    #[test]
    fn test_cent_split_never_shrinks_as_total_grows() {
        let weights = [d("5"), d("7"), d("2")];
        let mut previous = allocate_cents(Decimal::zero(), &weights).unwrap();
        for cents in 1..=500 {
            let total = Decimal::from_cents(cents).unwrap();
            let parts = allocate_cents(total, &weights).unwrap();
            assert_eq!(parts.iter().copied().sum::<Decimal>(), total);
            for (now, before) in parts.iter().zip(&previous) {
                assert!(now >= before, "{} shrank at {}", before, total);
            }
            previous = parts;
        }
    }

    #[test]
    fn test_split_exact_is_unrounded() {
        let parts = split_exact(d("1"), &[d("1"), d("2")]).unwrap();
        assert_eq!(parts[0] + parts[1], d("1"));
        assert!(!parts[0].is_whole_cents());
        assert!(split_exact(d("1"), &[d("0")]).is_err());
    }

    #[test]
    fn test_zero_weight_gets_nothing() {
        let parts = allocate_cents(d("10"), &[d("0"), d("5")]).unwrap();
        assert_eq!(parts, vec![d("0"), d("10")]);
    }

    #[test]
    fn test_amount_without_recipient_is_violation() {
        let err = allocate_cents(d("10"), &[d("0"), d("0")]).unwrap_err();
        assert!(matches!(err, CapTableError::ConservationViolation(_)));
        assert_eq!(
            allocate_cents(Decimal::zero(), &[d("0")]).unwrap(),
            vec![Decimal::zero()]
        );
    }

    #[test]
    fn test_sub_cent_total_rejected() {
        assert!(allocate_cents(d("1.001"), &[d("1")]).is_err());
    }

    #[test]
    fn test_share_split_by_commitment() {
        // Ties on w / (a + 1) here; largest remainder picks the 0.67 quota.
        let shares = allocate_shares(2_777_777, &[d("10000000"), d("5000000")]).unwrap();
        assert_eq!(shares.iter().sum::<u64>(), 2_777_777);
        assert_eq!(shares, vec![1_851_851, 925_926]);
    }

    #[test]
    fn test_large_totals_do_not_overflow() {
        let total = d("1000000000000000000");
        let parts = allocate_cents(total, &[d("16851851"), d("2962962"), d("1")]).unwrap();
        let sum: Decimal = parts.iter().sum();
        assert_eq!(sum, total);
    }
}
