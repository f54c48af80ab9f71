// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rush Async Actors
//!
//! Tokio actor runtime whose handlers may perform deferred work (I/O, timers, background
//! computation) without giving up the actor guarantee: one message at a time per actor,
//! with no partial state visible in between.
//!
//! ## Overview
//!
//! A handler that needs to wait returns a deferred computation instead of a value. The
//! actor does not block its task while waiting:
//!
//! 1. The computation is polled once. If it already settled, its value is used at once.
//! 2. Otherwise the actor is marked as awaiting, its mailbox is suspended and the
//!    computation is driven on another tokio task.
//! 3. Messages that reach the actor meanwhile are stashed in arrival order.
//! 4. On settlement, a completion signal addressed to the actor itself ends the wait.
//!    The stash is released and the result applied on the actor's own task, before any
//!    stashed message.
//!
//! Deferred failures go through the same path as synchronous ones: they are faults of
//! the actor, handled by its parent or its [`SupervisionStrategy`], and are returned to
//! the sender that asked.
//!
//! ## Actor flavours
//!
//! - [`AsyncActor`]: one `receive` entry point, see [`AsyncBehavior`].
//! - [`ReceiveActor`]: one handler per message type, see [`Receive`] and
//!   [`AsyncReceive`].
//! - [`Fsm`]: declarative state machine whose states are declared with `when` or
//!   `when_async`, see [`FsmBehavior`]. A deferred transition is applied only once it
//!   settled; until then the machine stays in its current state.
//!
//! Plain actors implement [`Actor`] and [`Handler`] and may use [`invoke`] and
//! [`Resumable`] to wire the same mechanism by hand.
//!
//! ## Example
//!
//! ```ignore
//! use actor::{ActorContext, ActorPath, AsyncActor, AsyncBehavior, Deferred, Error};
//! use futures::FutureExt;
//!
//! struct Fetcher {
//!     pages: usize,
//! }
//!
//! #[async_trait]
//! impl AsyncBehavior for Fetcher {
//!     type Message = Url;
//!     type Event = ();
//!     type Output = String;
//!
//!     async fn receive(
//!         &mut self,
//!         _sender: &ActorPath,
//!         url: Url,
//!         _ctx: &mut ActorContext<AsyncActor<Self>>,
//!     ) -> Result<Option<Deferred<String>>, Error> {
//!         Ok(Some(download(url).boxed()))
//!     }
//!
//!     async fn complete(
//!         &mut self,
//!         _page: String,
//!         _ctx: &mut ActorContext<AsyncActor<Self>>,
//!     ) -> Result<(), Error> {
//!         self.pages += 1;
//!         Ok(())
//!     }
//! }
//!
//! let fetcher = system
//!     .create_root_actor("fetcher", AsyncActor::new(Fetcher { pages: 0 }))
//!     .await?;
//! // Returns once the page was downloaded and counted.
//! fetcher.ask(url).await?;
//! ```
//!

mod actor;
mod async_actor;
mod async_fsm;
mod bridge;
mod error;
mod fsm;
mod handler;
mod path;
mod receive;
mod runner;
mod sink;
mod stash;
mod supervision;
mod system;

//
// Core Actor System Types
//

pub use actor::{
    Actor, ActorContext, ActorRef, ChildAction, Event, Handler, Message,
    Response,
};

pub use error::Error;

pub use path::ActorPath;

pub use sink::{Sink, Subscriber};

pub use system::{ActorSystem, SystemEvent, SystemRef, SystemRunner};

//
// Supervision and Fault Tolerance
//

pub use supervision::{
    ExponentialBackoffStrategy, FixedIntervalStrategy, NoIntervalStrategy,
    RetryStrategy, Strategy, SupervisionStrategy,
};

//
// Deferred Handling
//

pub use bridge::{Completion, Deferred, Outcome, Resumable, invoke, raise};

pub use async_actor::{AsyncActor, AsyncBehavior};

pub use receive::{
    AnyMessage, AsyncReceive, Receive, ReceiveActor, ReceiveBehavior, Routed,
};

pub use fsm::{
    Declaration, Fsm, FsmBehavior, Snapshot, StateEvent, StateHandler,
    StateTransition, Transition,
};
