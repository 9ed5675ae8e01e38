//! ratedes - discrete event simulation kernel.
//!
//! A small, deterministic kernel for actor-style simulations:
//!
//! - **Virtual time** as `(tick, epsilon)` pairs: ticks carry every real
//!   delay, epsilons give a total order to "immediately after" steps within
//!   a tick.
//! - **Actor arena**: the simulator owns every actor; handlers interact
//!   only by scheduling events, never by reference.
//! - **Deterministic dispatch**: events sharing a `(tick, epsilon)` key are
//!   executed as one batch, grouped per actor. With more than one worker
//!   thread the groups run in parallel, but per-actor order and the merged
//!   schedule are identical to the single-threaded run.
//!
//! The kernel knows nothing about what is being simulated; applications
//! define an [`Actor`] with their own event payload and shared state.

pub mod event;
pub mod sim;
pub mod time;

pub use event::{ActorId, ScheduledEvent, SequenceNumber};
pub use sim::{Actor, Context, SimSummary, Simulator};
pub use time::{Tick, Time};
