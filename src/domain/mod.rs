//! Domain types for cap table modelling.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: HolderName, ClassId, RoundRef
//! - The security ledger and its closed set of security kinds
//! - Funding round inputs and the immutable post-round snapshot

pub mod decimal;
pub mod primitives;
pub mod round;
pub mod security;
pub mod snapshot;

pub use decimal::Decimal;
pub use primitives::{ClassId, HolderName, RoundRef};
pub use round::{
    FundingRound, InvestorCommitment, OptionPoolExpansion, Participation, PoolTiming,
    ProRataFunding, ProRataParticipation, SeriesTerms,
};
pub use security::{
    Allocation, ParticipationCap, SecurityClass, SecurityKind, SecurityLedger,
    OPTION_POOL_CLASS_ID, OPTION_POOL_HOLDER,
};
pub use snapshot::CapTableSnapshot;
