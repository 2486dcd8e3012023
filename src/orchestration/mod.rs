//! Async coordination between the HTTP layer, the history store and the
//! synchronous engine.

pub mod analysis;

pub use analysis::{AnalysisError, Analyzer, BuildOutcome, Scenario, WaterfallOutcome};
