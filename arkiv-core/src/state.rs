//! Ticket tag state machine.
//!
//! State is derived from the upstream tag set. Transitions are idempotent
//! multi-tag operations applied in a fixed order so replays and races
//! converge on the same terminal set.

use crate::zammad::{TicketingClient, UpstreamResult};

pub const TRIGGER_TAG: &str = "pdf:sign";
pub const PROCESSING_TAG: &str = "pdf:processing";
pub const DONE_TAG: &str = "pdf:signed";
pub const ERROR_TAG: &str = "pdf:error";

pub fn should_process(tags: &[String], trigger_tag: &str, require_trigger: bool) -> bool {
    if tags.iter().any(|tag| tag == DONE_TAG) {
        return false;
    }
    if require_trigger {
        return tags.iter().any(|tag| tag == trigger_tag);
    }
    true
}

/// Any state -> processing.
pub async fn apply_processing(
    client: &dyn TicketingClient,
    ticket_id: u64,
    trigger_tag: &str,
) -> UpstreamResult<()> {
    client.remove_tag(ticket_id, DONE_TAG).await?;
    client.remove_tag(ticket_id, ERROR_TAG).await?;
    client.remove_tag(ticket_id, trigger_tag).await?;
    client.add_tag(ticket_id, PROCESSING_TAG).await
}

/// Any state -> done.
pub async fn apply_done(
    client: &dyn TicketingClient,
    ticket_id: u64,
    trigger_tag: &str,
) -> UpstreamResult<()> {
    client.remove_tag(ticket_id, PROCESSING_TAG).await?;
    client.remove_tag(ticket_id, ERROR_TAG).await?;
    client.remove_tag(ticket_id, trigger_tag).await?;
    client.add_tag(ticket_id, DONE_TAG).await
}

/// Any state -> error. Transient failures keep the trigger tag so a replay
/// stays possible; permanent failures drop it so the ticket cannot loop.
pub async fn apply_error(
    client: &dyn TicketingClient,
    ticket_id: u64,
    keep_trigger: bool,
    trigger_tag: &str,
) -> UpstreamResult<()> {
    client.remove_tag(ticket_id, PROCESSING_TAG).await?;
    client.remove_tag(ticket_id, DONE_TAG).await?;
    if keep_trigger {
        client.add_tag(ticket_id, trigger_tag).await?;
    } else {
        client.remove_tag(ticket_id, trigger_tag).await?;
    }
    client.add_tag(ticket_id, ERROR_TAG).await
}
