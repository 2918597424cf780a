//! Inbound dispatcher.
//!
//! Every MESSAGE frame is resolved to at most one registered channel,
//! decoded as that channel's payload kind, checked against the dedup cache,
//! and handed to the channel's callback. Nothing here fails loudly: bad or
//! unroutable frames are logged and dropped, and a panicking callback is
//! contained, so the read loop keeps going.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, trace, warn};

use parley_net::Frame;
use parley_shared::protocol::InboundMessage;

use crate::dedup::{DedupCache, EvictionPolicy};
use crate::registry::SubscriptionRegistry;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Duplicate,
    /// No live subscription matches the frame.
    Unroutable,
    /// The body could not be decoded as the channel's payload.
    Malformed,
    /// The callback panicked. The message still counts as seen.
    CallbackPanicked,
}

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    dedup: Mutex<DedupCache>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            registry,
            dedup: Mutex::new(DedupCache::new(capacity, policy)),
        }
    }

    fn dedup(&self) -> MutexGuard<'_, DedupCache> {
        self.dedup.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one frame. The callback runs on the caller's task.
    pub fn dispatch(&self, frame: &Frame) -> DispatchOutcome {
        let subscription = frame.get("subscription");
        let destination = frame.get("destination");

        let Some((channel, callback)) = self.registry.resolve(subscription, destination) else {
            debug!(
                subscription = ?subscription,
                destination = ?destination,
                "No subscription for inbound frame, dropping"
            );
            return DispatchOutcome::Unroutable;
        };

        let decoded = match channel.payload_kind() {
            Some(kind) => InboundMessage::decode(kind, &frame.body),
            None => InboundMessage::decode_tagged(&frame.body),
        };
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                warn!(channel = %channel, error = %e, len = frame.body.len(), "Dropping malformed frame");
                return DispatchOutcome::Malformed;
            }
        };

        if let Some(key) = message.dedup_key() {
            if !self.dedup().remember(key) {
                trace!(channel = %channel, kind = %key.kind, id = %key.id, "Duplicate suppressed");
                return DispatchOutcome::Duplicate;
            }
        }

        trace!(channel = %channel, kind = %message.kind(), "Delivering message");
        match catch_unwind(AssertUnwindSafe(|| callback(message))) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(panic) => {
                error!(channel = %channel, panic = panic_message(&*panic), "Subscriber callback panicked");
                DispatchOutcome::CallbackPanicked
            }
        }
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup().len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
