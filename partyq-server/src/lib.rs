//! # PartyQ Server
//!
//! Shared party queue: clients search, enqueue and vote on tracks; a
//! background scheduler plays the top-ranked track on an external playback
//! service whenever the previous one ends.
//!
//! - [`queue`]: vote-ordered Normal and Admin queues plus sessions
//! - [`gateway`]: playback service contract, Spotify and in-memory backends
//! - [`scheduler`]: polling state machine driving playback
//! - [`dispatch`]: operations invoked by inbound requests
//! - [`api`]: HTTP transport and SSE

pub mod api;
pub mod app;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod queue;
pub mod scheduler;

pub use app::App;
pub use dispatch::Dispatcher;
pub use gateway::{PlaybackBackend, PlaybackGateway};
pub use queue::QueueStore;
pub use scheduler::{Scheduler, SchedulerSettings};
