#![allow(dead_code)]

use captable::domain::{
    Allocation, ClassId, Decimal, FundingRound, HolderName, InvestorCommitment,
    OptionPoolExpansion, PoolTiming, ProRataFunding, SecurityClass, SecurityKind, SecurityLedger,
    SeriesTerms,
};
use chrono::NaiveDate;

pub fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

pub fn date(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn founders_ledger() -> SecurityLedger {
    SecurityLedger::new(vec![SecurityClass {
        id: ClassId::new("common"),
        label: "Common Stock".to_string(),
        kind: SecurityKind::Common,
        issue_price_per_share: Decimal::zero(),
        allocations: vec![
            Allocation::new(HolderName::new("Alice"), 5_000_000),
            Allocation::new(HolderName::new("Bob"), 3_000_000),
        ],
        seniority_rank: None,
        pari_passu: false,
        pro_rata_eligible: false,
        round_index: None,
    }])
}

pub fn round(
    name: &str,
    on: NaiveDate,
    pre_money: &str,
    amount: &str,
    investors: &[(&str, Option<&str>)],
) -> FundingRound {
    FundingRound {
        name: name.to_string(),
        date: on,
        pre_money_valuation: d(pre_money),
        investment_amount: d(amount),
        new_investors: investors
            .iter()
            .map(|(n, c)| InvestorCommitment::new(HolderName::new(*n), c.map(d)))
            .collect(),
        option_pool: None,
        pro_rata_participants: vec![],
        pro_rata_funding: ProRataFunding::Additional,
        terms: SeriesTerms::standard(),
    }
}

/// Seed $2M @ $8M pre, Series A $15M @ $60M pre with a 10% pre-money pool
/// ($10M of it from "Investor"), Series B $32M @ $150M pre. Every series is
/// 1x non-participating.
pub fn seed_a_b_rounds() -> Vec<FundingRound> {
    let seed = round("Seed", date(2020, 3, 1), "8000000", "2000000", &[("Seed Fund", None)]);
    let mut series_a = round(
        "Series A",
        date(2021, 6, 1),
        "60000000",
        "15000000",
        &[("Investor", Some("10000000")), ("Lead A", Some("5000000"))],
    );
    series_a.option_pool = Some(OptionPoolExpansion {
        pct: d("0.10"),
        timing: PoolTiming::PreMoney,
    });
    let series_b = round(
        "Series B",
        date(2022, 9, 1),
        "150000000",
        "32000000",
        &[("Lead B", None)],
    );
    vec![seed, series_a, series_b]
}
