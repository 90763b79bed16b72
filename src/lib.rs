pub mod config;
pub mod decision;
pub mod error;
pub mod id;
pub mod index;
pub mod ledger;
pub mod query;
pub mod review;
pub mod store;

pub use decision::{DecidedBy, Decision, DecisionInput, DecisionStatus, DecisionType, Role};
pub use error::{LedgerError, Result};
pub use ledger::{Ledger, SupersedeInput, SupersedeOutcome};
