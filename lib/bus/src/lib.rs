//! Event bus for the mibo relay.
//!
//! Collaborators never call each other directly. They publish typed events
//! and subscribe to the event types they care about:
//!
//! - **Fire-and-forget**: [`EventBus::emit`] hands an event to every handler
//!   registered for its type. Each handler runs as its own task, and a
//!   failing handler cannot affect the emitter or its siblings.
//! - **Request/response**: [`EventBus::wait`] emits a request and suspends
//!   until a response of the given type carrying the same correlation
//!   identifier comes back, or the deadline passes.
//!
//! Handler failures surface on the bus itself as [`HandlerFailed`] events.

pub mod bus;
pub mod error;
pub mod event;
pub mod handler;

pub use bus::EventBus;
pub use error::BusError;
pub use event::{Event, HandlerFailed};
pub use handler::{HandlerError, HandlerId, HandlerResult};
pub use mibo_core::{ChatId, EventId};
