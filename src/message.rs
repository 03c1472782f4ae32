//! The envelope every inter-node payload travels in (spec §4.2). Messages
//! are self-describing and opaque to whatever transport carries them.

use serde::{Deserialize, Serialize};

use crate::clock::{ClockSnapshot, NodeId, VectorClock};
use crate::emergency::EmergencyContext;

/// Discriminates the payload carried by a [`CausalMessage`] without the
/// receiver needing to downcast anything. A receiver that doesn't
/// recognize a kind drops the message without merging its clock (spec
/// §4.2: "to avoid being corrupted by garbage from the transport").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Normal,
    Emergency,
    Heartbeat,
    Sync,
    Result,
}

/// Envelope wrapping every inter-node payload with sender id, sender clock
/// snapshot, message kind, and optional emergency context. `payload` is
/// kept generic rather than `Vec<u8>` so axum can (de)serialize it as JSON
/// directly; callers that truly need opaque bytes use `Vec<u8>` for `P`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalMessage<P> {
    pub sender_id: NodeId,
    pub vector_clock: ClockSnapshot,
    pub message_kind: MessageKind,
    pub emergency_context: Option<EmergencyContext>,
    pub payload: P,
}

impl<P> CausalMessage<P> {
    /// Build an envelope for sending: ticks `clock`, then snapshots it.
    /// This is the single canonical path for transmitting a clock (spec
    /// §9: "there is no second way to transmit a clock").
    pub fn send(
        clock: &VectorClock,
        message_kind: MessageKind,
        emergency_context: Option<EmergencyContext>,
        payload: P,
    ) -> Self {
        clock.tick();
        Self {
            sender_id: clock.owner().to_string(),
            vector_clock: clock.snapshot(),
            message_kind,
            emergency_context,
            payload,
        }
    }

    /// Apply this envelope's causal effect at the receiver: merge the
    /// sender's clock into `local` (which ticks as part of merging), then
    /// hand back the payload for dispatch. Callers that can't recognize
    /// `message_kind` must not call this at all — see
    /// [`CausalMessage::drop_unrecognized`].
    pub fn receive(self, local: &VectorClock) -> (MessageKind, Option<EmergencyContext>, P) {
        local.merge(&self.vector_clock);
        (self.message_kind, self.emergency_context, self.payload)
    }
}

/// Marker for a message whose `message_kind` the receiver could not
/// interpret. The caller must drop it and must not touch its clock.
pub fn is_recognized(kind: &MessageKind, recognized: &[MessageKind]) -> bool {
    recognized.contains(kind)
}
