//! Outbound delivery interface (§6): `deliverOutboundPayloads`. The
//! channel adapters themselves (WhatsApp/Telegram/Slack/Discord/Signal)
//! are out of scope (§1) — the runner only needs a sink it can hand
//! payloads to, and whether that sink's failure should propagate.

use async_trait::async_trait;

use crate::types::Payload;

#[derive(Debug, thiserror::Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(
        &self,
        channel: &str,
        to: &str,
        account_id: Option<&str>,
        payloads: &[Payload],
    ) -> Result<(), DeliveryError>;
}

/// A sink that drops every payload and always succeeds — useful for
/// heartbeat/cron dry runs and tests that don't exercise real channels.
pub struct NullDeliverySink;

#[async_trait]
impl DeliverySink for NullDeliverySink {
    async fn deliver(&self, _channel: &str, _to: &str, _account_id: Option<&str>, _payloads: &[Payload]) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Wraps a sink call with §7's best-effort semantics: on failure,
/// `best_effort=true` swallows the error and the run's status remains
/// `done` rather than `failed`; the caller is expected to emit a
/// skipped/error observability event either way.
pub async fn deliver_with_best_effort(
    sink: &dyn DeliverySink,
    channel: &str,
    to: &str,
    account_id: Option<&str>,
    payloads: &[Payload],
    best_effort: bool,
) -> Result<(), DeliveryError> {
    match sink.deliver(channel, to, account_id, payloads).await {
        Ok(()) => Ok(()),
        Err(err) if best_effort => {
            tracing::warn!(%err, channel, to, "delivery failed, swallowed by best-effort policy");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
