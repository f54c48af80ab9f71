// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Async actor
//!
//! Single entry-point actor whose handler may return a deferred computation. The
//! behavior receives a message and optionally returns the computation; once it settles,
//! its output is handed to [`AsyncBehavior::complete`]. No other message is handled in
//! between: messages arriving meanwhile are buffered and handled afterwards, in arrival
//! order.
//!
//! Failures of `receive`, of the computation or of `complete` are faults of the actor:
//! they go through its supervision strategy and are returned to an asking sender.
//!

use crate::{
    ActorPath, Error,
    actor::{Actor, ActorContext, Event, Handler, Message},
    bridge::{Completion, Deferred, Outcome, Resumable, invoke, raise},
    supervision::SupervisionStrategy,
};

use async_trait::async_trait;

/// Behavior of an [`AsyncActor`].
#[async_trait]
pub trait AsyncBehavior: Send + Sync + Sized + 'static {
    /// Messages the actor receives.
    type Message: Message;
    /// Events the actor publishes.
    type Event: Event;
    /// Output of the deferred computations.
    type Output: Send + Sync + 'static;

    fn supervision_strategy() -> SupervisionStrategy {
        SupervisionStrategy::Stop
    }

    fn stash_capacity() -> Option<usize> {
        None
    }

    async fn pre_start(
        &mut self,
        _ctx: &mut ActorContext<AsyncActor<Self>>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called on restart. Defaults to `pre_start`.
    async fn pre_restart(
        &mut self,
        ctx: &mut ActorContext<AsyncActor<Self>>,
        _error: Option<&Error>,
    ) -> Result<(), Error> {
        self.pre_start(ctx).await
    }

    async fn post_stop(
        &mut self,
        _ctx: &mut ActorContext<AsyncActor<Self>>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Handles a message. A returned computation suspends the actor until it settles.
    async fn receive(
        &mut self,
        sender: &ActorPath,
        msg: Self::Message,
        ctx: &mut ActorContext<AsyncActor<Self>>,
    ) -> Result<Option<Deferred<Self::Output>>, Error>;

    /// Applies the output of a settled computation.
    async fn complete(
        &mut self,
        output: Self::Output,
        ctx: &mut ActorContext<AsyncActor<Self>>,
    ) -> Result<(), Error>;
}

/// Actor running an [`AsyncBehavior`].
pub struct AsyncActor<B: AsyncBehavior> {
    behavior: B,
}

impl<B: AsyncBehavior> AsyncActor<B> {
    pub fn new(behavior: B) -> Self {
        Self { behavior }
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    async fn complete(
        &mut self,
        output: B::Output,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        match self.behavior.complete(output, ctx).await {
            Ok(()) => Ok(()),
            Err(error) => Err(raise(ctx, error).await),
        }
    }
}

#[async_trait]
impl<B: AsyncBehavior> Actor for AsyncActor<B> {
    type Message = B::Message;
    type Event = B::Event;
    type Response = ();

    fn supervision_strategy() -> SupervisionStrategy {
        B::supervision_strategy()
    }

    fn stash_capacity() -> Option<usize> {
        B::stash_capacity()
    }

    async fn pre_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        self.behavior.pre_start(ctx).await
    }

    async fn pre_restart(
        &mut self,
        ctx: &mut ActorContext<Self>,
        error: Option<&Error>,
    ) -> Result<(), Error> {
        self.behavior.pre_restart(ctx, error).await
    }

    async fn post_stop(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        self.behavior.post_stop(ctx).await
    }
}

#[async_trait]
impl<B: AsyncBehavior> Handler<AsyncActor<B>> for AsyncActor<B> {
    async fn handle_message(
        &mut self,
        sender: ActorPath,
        msg: B::Message,
        ctx: &mut ActorContext<AsyncActor<B>>,
    ) -> Result<(), Error> {
        let deferred = match self.behavior.receive(&sender, msg, ctx).await {
            Ok(deferred) => deferred,
            Err(error) => return Err(raise(ctx, error).await),
        };
        match invoke(ctx, deferred) {
            Ok(Outcome::Ready(output)) => self.complete(output, ctx).await,
            Ok(Outcome::Absent) | Ok(Outcome::Pending) => Ok(()),
            Err(error) => Err(raise(ctx, error).await),
        }
    }
}

#[async_trait]
impl<B: AsyncBehavior> Resumable<B::Output> for AsyncActor<B> {
    async fn resume(
        &mut self,
        completion: Completion<B::Output>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        let output = Result::from(completion)?;
        // Raised by the completion signal on error.
        self.behavior.complete(output, ctx).await
    }
}
