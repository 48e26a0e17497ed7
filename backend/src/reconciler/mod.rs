pub mod derive;
pub mod engine;

pub use derive::{Derivation, derive_target};
pub use engine::{StatusReconciler, TickSummary};
