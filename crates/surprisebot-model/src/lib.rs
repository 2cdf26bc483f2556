pub mod candidate;
pub mod cooldown;
pub mod failover;

pub use candidate::{build_candidates, Candidate};
pub use cooldown::CooldownStore;
pub use failover::{run_with_failover, AttemptRecord, CandidateError, ExecutionError, FailoverOutcome};
