mod common;

use captable::domain::{
    Allocation, ClassId, Decimal, HolderName, ParticipationCap, SecurityClass, SecurityKind,
};
use captable::engine::{
    distribute, ClassTreatment, HistoryBuilder, PreferenceStack, WaterfallEngine, WaterfallResult,
};
use common::{d, founders_ledger, seed_a_b_rounds};

fn final_classes() -> Vec<SecurityClass> {
    HistoryBuilder::build(&founders_ledger(), &seed_a_b_rounds())
        .unwrap()
        .ledger
        .classes
}

fn assert_conserved(result: &WaterfallResult) {
    let by_class: Decimal = result.distributions.values().sum();
    let by_holder: Decimal = result.per_holder_proceeds.values().sum();
    assert_eq!(by_class, result.exit_value);
    assert_eq!(by_holder, result.exit_value);
    assert!(result.distributions.values().all(|v| !v.is_negative()));
    assert!(result.per_holder_proceeds.values().all(|v| v.is_whole_cents()));
}

#[test]
fn test_investor_receives_exact_preference_at_50m() {
    let classes = final_classes();
    let stack = PreferenceStack::resolve(&classes).unwrap();
    let result = distribute(d("50000000"), &stack, &classes).unwrap();

    assert_conserved(&result);
    assert!(result.classes_converted.is_empty());
    assert_eq!(result.holder_total(&HolderName::new("Investor")), d("10000000"));
    assert_eq!(result.holder_total(&HolderName::new("Lead A")), d("5000000"));
    assert_eq!(result.class_total(&ClassId::new("series-b")), d("32000000"));
    assert_eq!(result.class_total(&ClassId::new("seed")), d("2000000"));
    // $1M left for common and the pool.
    let common_side = result.class_total(&ClassId::new("common"))
        + result.class_total(&ClassId::new("option-pool"));
    assert_eq!(common_side, d("1000000"));
}

#[test]
fn test_everyone_converts_at_400m() {
    let classes = final_classes();
    let stack = PreferenceStack::resolve(&classes).unwrap();
    let result = distribute(d("400000000"), &stack, &classes).unwrap();

    assert_conserved(&result);
    for id in ["seed", "series-a", "series-b"] {
        assert!(result.classes_converted.contains(&ClassId::new(id)));
    }
    let investor = result.holder_total(&HolderName::new("Investor"));
    assert!(investor > d("10000000"));
    // As-converted: 1,851,851 of 16,851,850 shares.
    let expected = (d("400000000") * d("1851851") / d("16851850")).floor_cents();
    assert!((investor - expected).abs() <= d("0.02"));
    assert!(result
        .class_payouts
        .iter()
        .filter(|p| p.class_id.as_str() != "common" && p.class_id.as_str() != "option-pool")
        .all(|p| p.treatment == ClassTreatment::Converted && p.preference.is_zero()));
}

#[test]
fn test_distribute_is_idempotent() {
    let classes = final_classes();
    let stack = PreferenceStack::resolve(&classes).unwrap();
    let engine = WaterfallEngine::default();
    for exit in ["0", "31999999.99", "123456789.01", "987654321"] {
        let first = engine.distribute(d(exit), &stack, &classes).unwrap();
        let second = engine.distribute(d(exit), &stack, &classes).unwrap();
        assert_eq!(first, second);
        assert_conserved(&first);
    }
}

#[test]
fn test_payouts_are_monotonic_in_exit_value() {
    let classes = final_classes();
    let stack = PreferenceStack::resolve(&classes).unwrap();
    let engine = WaterfallEngine::default();
    let results = engine
        .distribute_range(d("0"), d("300000000"), d("2500000"), 1_000, &stack, &classes)
        .unwrap();
    assert_eq!(results.len(), 121);

    for pair in results.windows(2) {
        assert_conserved(&pair[1]);
        for (holder, amount) in &pair[0].per_holder_proceeds {
            assert!(pair[1].holder_total(holder) >= *amount);
        }
        assert!(pair[1].classes_converted.is_superset(&pair[0].classes_converted));
    }
}

#[test]
fn test_cent_sweep_keeps_every_class_payout_non_decreasing() {
    let classes = final_classes();
    let stack = PreferenceStack::resolve(&classes).unwrap();
    let engine = WaterfallEngine::default();
    let results = engine
        .distribute_range(d("58111108"), d("58111114"), Decimal::cent(), 1_000, &stack, &classes)
        .unwrap();

    for pair in results.windows(2) {
        for (class_id, amount) in &pair[0].distributions {
            assert!(
                pair[1].class_total(class_id) >= *amount,
                "{} dropped at {}",
                class_id,
                pair[1].exit_value
            );
        }
        assert!(pair[1].classes_converted.is_superset(&pair[0].classes_converted));
    }
}

#[test]
fn test_three_x_cap_holds_at_sixty_million() {
    let classes = vec![
        SecurityClass {
            id: ClassId::new("common"),
            label: "Common".to_string(),
            kind: SecurityKind::Common,
            issue_price_per_share: Decimal::zero(),
            allocations: vec![Allocation::new(HolderName::new("Founders"), 10_000_000)],
            seniority_rank: None,
            pari_passu: false,
            pro_rata_eligible: false,
            round_index: None,
        },
        SecurityClass {
            id: ClassId::new("series-a"),
            label: "Series A Participating".to_string(),
            kind: SecurityKind::ParticipatingPreferred {
                liquidation_multiple: Decimal::one(),
                cap: ParticipationCap::Multiple(d("3")),
            },
            issue_price_per_share: d("10"),
            allocations: vec![Allocation::new(HolderName::new("Growth Fund"), 2_000_000)],
            seniority_rank: None,
            pari_passu: false,
            pro_rata_eligible: true,
            round_index: Some(0),
        },
    ];
    let stack = PreferenceStack::resolve(&classes).unwrap();

    let result = distribute(d("500000000"), &stack, &classes).unwrap();
    assert_conserved(&result);
    assert_eq!(result.class_total(&ClassId::new("series-a")), d("60000000"));
    assert_eq!(result.class_total(&ClassId::new("common")), d("440000000"));
    assert!(result.classes_capped.contains(&ClassId::new("series-a")));
    assert!(result.classes_converted.is_empty());

    // Below the cap the class takes its preference plus a sixth of the rest.
    let result = distribute(d("80000000"), &stack, &classes).unwrap();
    assert_eq!(result.class_total(&ClassId::new("series-a")), d("30000000"));
    assert!(result.classes_capped.is_empty());
}

#[test]
fn test_pari_passu_shortfall_split_by_claim() {
    let preferred = |id: &str, rank: u32, shares: u64| SecurityClass {
        id: ClassId::new(id),
        label: id.to_string(),
        kind: SecurityKind::NonParticipatingPreferred {
            liquidation_multiple: Decimal::one(),
        },
        issue_price_per_share: d("1"),
        allocations: vec![Allocation::new(HolderName::new(id), shares)],
        seniority_rank: Some(rank),
        pari_passu: true,
        pro_rata_eligible: true,
        round_index: None,
    };
    let classes = vec![
        SecurityClass {
            id: ClassId::new("common"),
            label: "Common".to_string(),
            kind: SecurityKind::Common,
            issue_price_per_share: Decimal::zero(),
            allocations: vec![Allocation::new(HolderName::new("Founders"), 1_000_000)],
            seniority_rank: None,
            pari_passu: false,
            pro_rata_eligible: false,
            round_index: None,
        },
        preferred("series-a", 1, 1_000_000),
        preferred("series-b", 1, 2_000_000),
    ];
    let stack = PreferenceStack::resolve(&classes).unwrap();
    let result = distribute(d("1000000"), &stack, &classes).unwrap();
    assert_conserved(&result);
    assert_eq!(result.class_total(&ClassId::new("series-a")), d("333333.33"));
    assert_eq!(result.class_total(&ClassId::new("series-b")), d("666666.67"));
    assert!(result.class_total(&ClassId::new("common")).is_zero());
}

fn class(id: &str, holder: &str, kind: SecurityKind, price: &str, shares: u64) -> SecurityClass {
    SecurityClass {
        id: ClassId::new(id),
        label: id.to_string(),
        kind,
        issue_price_per_share: d(price),
        allocations: vec![Allocation::new(HolderName::new(holder), shares)],
        seniority_rank: None,
        pari_passu: false,
        pro_rata_eligible: false,
        round_index: None,
    }
}

/// Common, pool and a warrant under two $2M series sharing one rank.
fn warrant_and_pari_passu_table() -> Vec<SecurityClass> {
    let preferred = |id: &str, holder: &str, price: &str, shares: u64, round: usize| SecurityClass {
        seniority_rank: Some(1),
        pari_passu: true,
        pro_rata_eligible: true,
        round_index: Some(round),
        ..class(
            id,
            holder,
            SecurityKind::NonParticipatingPreferred {
                liquidation_multiple: Decimal::one(),
            },
            price,
            shares,
        )
    };
    vec![
        class("common", "Founders", SecurityKind::Common, "0", 6_000_000),
        class("option-pool", "Pool", SecurityKind::OptionPool, "0", 1_000_000),
        class(
            "warrant",
            "Lender",
            SecurityKind::Warrant {
                exercise_price: d("0.50"),
            },
            "0",
            500_000,
        ),
        preferred("series-a", "Fund A", "2", 1_000_000, 0),
        preferred("series-b", "Fund B", "4", 500_000, 1),
    ]
}

#[test]
fn test_warrant_takes_its_residual_share() {
    let classes = warrant_and_pari_passu_table();
    let stack = PreferenceStack::resolve(&classes).unwrap();
    assert_eq!(stack.len(), 1);

    // Underfunded pari passu group: equal claims split the exit evenly.
    let result = distribute(d("3000000"), &stack, &classes).unwrap();
    assert_conserved(&result);
    assert_eq!(result.class_total(&ClassId::new("series-a")), d("1500000"));
    assert_eq!(result.class_total(&ClassId::new("series-b")), d("1500000"));
    assert!(result.class_total(&ClassId::new("warrant")).is_zero());

    // $9M residual over 7.5M common-equivalent shares is $1.20 a share.
    let result = distribute(d("13000000"), &stack, &classes).unwrap();
    assert_conserved(&result);
    assert!(result.classes_converted.is_empty());
    assert_eq!(result.class_total(&ClassId::new("warrant")), d("600000"));
    assert_eq!(result.holder_total(&HolderName::new("Lender")), d("600000"));
    assert_eq!(result.class_total(&ClassId::new("option-pool")), d("1200000"));
    assert_eq!(result.class_total(&ClassId::new("common")), d("7200000"));
    assert_eq!(
        result
            .class_payouts
            .iter()
            .find(|p| p.class_id.as_str() == "warrant")
            .unwrap()
            .treatment,
        ClassTreatment::Common
    );

    // Both series convert; the warrant holds 500,000 of 9,000,000 shares.
    let result = distribute(d("40000000"), &stack, &classes).unwrap();
    assert_conserved(&result);
    assert!(result.classes_converted.contains(&ClassId::new("series-a")));
    assert!(result.classes_converted.contains(&ClassId::new("series-b")));
    assert_eq!(result.class_total(&ClassId::new("warrant")), d("2222222.22"));
}
