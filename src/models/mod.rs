//! Data models for the lead sourcing engine.

mod automation;
mod candidate;
mod proposal;
mod record;
mod run_log;

pub use automation::AutomationConfig;
pub use candidate::Candidate;
pub use proposal::{EntityType, Proposal, ProposalBody, ProposalStatus, RecordDraft, Rejection};
pub use record::LeadRecord;
pub use run_log::{RunLog, RunOutcome, RunStatus};
