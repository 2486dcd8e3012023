pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod store;

pub use config::Config;
pub use domain::{
    Allocation, CapTableSnapshot, ClassId, Decimal, FundingRound, HolderName, SecurityClass,
    SecurityKind, SecurityLedger,
};
pub use engine::{
    CapTableError, CapTableHistory, HistoryBuilder, PreferenceStack, RoundProcessor,
    WaterfallEngine, WaterfallResult,
};
pub use error::AppError;
pub use orchestration::Analyzer;
pub use store::HistoryStore;
