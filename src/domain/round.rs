//! Funding round input records.

use crate::domain::{ClassId, Decimal, HolderName, ParticipationCap};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// When new option pool shares are created relative to the investment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoolTiming {
    /// Pool shares are issued before pricing, diluting only existing holders.
    PreMoney,
    /// Pool shares are issued after the investment, diluting everyone.
    PostMoney,
}

/// Option pool top-up for one round.
///
/// `pct` is the fraction (0 <= pct < 1) of the resulting share count the new
/// pool shares represent: of the pre-money table for `PreMoney`, of the
/// post-money table for `PostMoney`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionPoolExpansion {
    pub pct: Decimal,
    pub timing: PoolTiming,
}

/// How pro-rata dollars relate to the round's nominal investment amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProRataFunding {
    /// Pro-rata dollars are carved out of `investment_amount`; new investors
    /// receive what is left.
    WithinRound,
    /// Pro-rata dollars are raised on top of `investment_amount`, so the
    /// pro-rata shares dilute every non-participating holder.
    Additional,
}

/// A brand-new investor in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorCommitment {
    pub name: HolderName,
    #[serde(default)]
    pub commitment: Option<Decimal>,
}

impl InvestorCommitment {
    pub fn new(name: HolderName, commitment: Option<Decimal>) -> Self {
        Self { name, commitment }
    }
}

/// An existing holder exercising pro-rata rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProRataParticipation {
    pub holder: HolderName,
    /// Dollars invested. `None` buys the full pro-rata allocation.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl ProRataParticipation {
    pub fn full(holder: HolderName) -> Self {
        Self {
            holder,
            amount: None,
        }
    }

    pub fn amount(holder: HolderName, amount: Decimal) -> Self {
        Self {
            holder,
            amount: Some(amount),
        }
    }
}

/// Whether the series shares in residual proceeds after its preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Participation {
    NonParticipating,
    Participating(ParticipationCap),
}

/// Contractual terms of the preferred series a round creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesTerms {
    /// Defaults to a slug of the round name.
    #[serde(default)]
    pub class_id: Option<ClassId>,
    /// Defaults to "<round name> Preferred".
    #[serde(default)]
    pub label: Option<String>,
    pub liquidation_multiple: Decimal,
    pub participation: Participation,
    #[serde(default)]
    pub seniority_rank: Option<u32>,
    #[serde(default)]
    pub pari_passu: bool,
    #[serde(default = "default_pro_rata_rights")]
    pub pro_rata_rights: bool,
}

fn default_pro_rata_rights() -> bool {
    true
}

impl SeriesTerms {
    /// 1x non-participating preferred with pro-rata rights.
    pub fn standard() -> Self {
        Self {
            class_id: None,
            label: None,
            liquidation_multiple: Decimal::one(),
            participation: Participation::NonParticipating,
            seniority_rank: None,
            pari_passu: false,
            pro_rata_rights: true,
        }
    }
}

/// One priced financing round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRound {
    pub name: String,
    pub date: NaiveDate,
    pub pre_money_valuation: Decimal,
    pub investment_amount: Decimal,
    #[serde(default)]
    pub new_investors: Vec<InvestorCommitment>,
    #[serde(default)]
    pub option_pool: Option<OptionPoolExpansion>,
    #[serde(default)]
    pub pro_rata_participants: Vec<ProRataParticipation>,
    pub pro_rata_funding: ProRataFunding,
    pub terms: SeriesTerms,
}

impl FundingRound {
    /// Nominal post-money valuation (pre-money plus the round's investment).
    pub fn post_money_valuation(&self) -> Decimal {
        self.pre_money_valuation + self.investment_amount
    }

    pub fn class_id(&self) -> ClassId {
        self.terms
            .class_id
            .clone()
            .unwrap_or_else(|| ClassId::new(slugify(&self.name)))
    }

    pub fn class_label(&self) -> String {
        self.terms
            .label
            .clone()
            .unwrap_or_else(|| format!("{} Preferred", self.name))
    }

    pub fn is_new_investor(&self, holder: &HolderName) -> bool {
        self.new_investors.iter().any(|i| &i.name == holder)
    }

    pub fn participates_pro_rata(&self, holder: &HolderName) -> bool {
        self.pro_rata_participants.iter().any(|p| &p.holder == holder)
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_round_names() {
        assert_eq!(slugify("Series B"), "series-b");
        assert_eq!(slugify("  Seed (extension) "), "seed-extension");
    }

    #[test]
    fn test_round_deserializes_from_camel_case() {
        let json = serde_json::json!({
            "name": "Series A",
            "date": "2022-03-01",
            "preMoneyValuation": "60000000",
            "investmentAmount": "15000000",
            "newInvestors": [{"name": "Lead", "commitment": "10000000"}],
            "optionPool": {"pct": "0.10", "timing": "preMoney"},
            "proRataFunding": "additional",
            "terms": {
                "liquidationMultiple": "1",
                "participation": "nonParticipating"
            }
        });
        let round: FundingRound = serde_json::from_value(json).unwrap();
        assert_eq!(round.class_id(), ClassId::new("series-a"));
        assert_eq!(round.class_label(), "Series A Preferred");
        assert_eq!(round.option_pool.unwrap().timing, PoolTiming::PreMoney);
        assert!(round.terms.pro_rata_rights);
        assert_eq!(
            round.post_money_valuation(),
            Decimal::from_str_canonical("75000000").unwrap()
        );
    }

    #[test]
    fn test_missing_funding_convention_is_an_error() {
        let json = serde_json::json!({
            "name": "Seed",
            "date": "2021-01-01",
            "preMoneyValuation": "8000000",
            "investmentAmount": "2000000",
            "terms": {"liquidationMultiple": "1", "participation": "nonParticipating"}
        });
        assert!(serde_json::from_value::<FundingRound>(json).is_err());
    }
}
