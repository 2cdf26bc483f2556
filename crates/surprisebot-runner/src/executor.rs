//! Model executor interfaces (§6): `runEmbeddedPiAgent` and
//! `runCliAgent`, generalized into one trait so [`crate::runner`] treats
//! both backends identically and the failover loop doesn't need to know
//! which kind of candidate it's driving.

use async_trait::async_trait;
use surprisebot_model::CandidateError;

use crate::types::{ExecutorArgs, ExecutorOutcome};

#[async_trait]
pub trait ModelExecutor: Send + Sync {
    async fn execute(&self, args: ExecutorArgs) -> Result<ExecutorOutcome, CandidateError>;
}

/// Dispatches to an embedded (in-process) or CLI (subprocess) executor
/// based on whether `provider` is configured as a CLI backend.
pub struct DualExecutor {
    pub embedded: Box<dyn ModelExecutor>,
    pub cli: Box<dyn ModelExecutor>,
    pub cli_providers: Vec<String>,
}

impl DualExecutor {
    pub fn is_cli_provider(&self, provider: &str) -> bool {
        self.cli_providers.iter().any(|p| p == provider)
    }

    pub async fn execute(&self, args: ExecutorArgs) -> Result<ExecutorOutcome, CandidateError> {
        if self.is_cli_provider(&args.provider) {
            self.cli.execute(args).await
        } else {
            self.embedded.execute(args).await
        }
    }
}
