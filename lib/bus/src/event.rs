//! The unit of communication on the bus.
//!
//! Every event is a concrete Rust type. The type *is* the kind: handlers
//! subscribe to `MemoryRequest`, not to the string `"memory_request"`, so a
//! handler can only ever be handed the shape it was written for.

use mibo_core::{ChatId, EventId};
use std::any::Any;
use std::fmt;

/// A typed, immutable bus event.
///
/// Implementors carry a correlation identifier generated at construction.
/// Responses to a request copy the request's identifier so that
/// [`EventBus::wait`](crate::EventBus::wait) can pair them up.
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// The correlation identifier of this event.
    fn correlation_id(&self) -> EventId;

    /// The chat this event concerns, if any.
    fn chat_id(&self) -> Option<&ChatId> {
        None
    }

    /// Short type name used in logs.
    fn kind_name() -> &'static str
    where
        Self: Sized,
    {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Implements [`Event`] for a struct with an `id: EventId` field, and
/// optionally a `chat_id: ChatId` field.
///
/// ```ignore
/// impl_event!(NewChat, chat);
/// impl_event!(ShutdownRequested);
/// ```
#[macro_export]
macro_rules! impl_event {
    ($ty:ty) => {
        impl $crate::Event for $ty {
            fn correlation_id(&self) -> $crate::EventId {
                self.id
            }
        }
    };
    ($ty:ty, chat) => {
        impl $crate::Event for $ty {
            fn correlation_id(&self) -> $crate::EventId {
                self.id
            }

            fn chat_id(&self) -> Option<&$crate::ChatId> {
                Some(&self.chat_id)
            }
        }
    };
}

/// Published by the bus when a handler returns an error or panics.
///
/// Carries the correlation identifier of the event whose handler failed.
/// Failures of `HandlerFailed` handlers are logged but not re-published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailed {
    /// Correlation identifier of the failed event.
    pub correlation_id: EventId,
    /// Kind of the failed event.
    pub kind: &'static str,
    /// Chat of the failed event, if any.
    pub chat_id: Option<ChatId>,
    /// Rendered error or panic message.
    pub error: String,
    /// Whether the handler panicked rather than returning an error.
    pub panicked: bool,
}

impl Event for HandlerFailed {
    fn correlation_id(&self) -> EventId {
        self.correlation_id
    }

    fn chat_id(&self) -> Option<&ChatId> {
        self.chat_id.as_ref()
    }
}
