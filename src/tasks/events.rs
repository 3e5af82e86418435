//! Structured reconcile events
//!
//! Every controller publishes named events on the resource it is converging.
//! The events are observability output only; nothing in the operator reads
//! them back.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType};
use tracing::warn;

use super::types::Context;

/// Publish a normal event; failures are logged and swallowed so event
/// emission can never fail a reconcile.
pub async fn publish(ctx: &Context, reference: &ObjectReference, reason: &str, note: String) {
    publish_typed(ctx, reference, EventType::Normal, reason, note).await;
}

/// Publish a warning event.
pub async fn publish_warning(ctx: &Context, reference: &ObjectReference, reason: &str, note: String) {
    publish_typed(ctx, reference, EventType::Warning, reason, note).await;
}

async fn publish_typed(
    ctx: &Context,
    reference: &ObjectReference,
    type_: EventType,
    reason: &str,
    note: String,
) {
    let event = Event {
        type_,
        reason: reason.to_string(),
        note: Some(note),
        action: "Reconcile".to_string(),
        secondary: None,
    };
    if let Err(e) = ctx.recorder.publish(&event, reference).await {
        warn!(reason, "failed to publish event: {e}");
    }
}
