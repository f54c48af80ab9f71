// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Async state handlers
//!
//! `when_async` declares a state whose handler may return a deferred [`Transition`].
//! Until the computation settles the machine stays where it is: no state change, no
//! hook, no published transition, and later events wait in the stash. The settled
//! transition is then applied as if the handler had returned it, and the buffered events
//! are handled in the resulting state.
//!

use crate::{
    Error,
    actor::ActorContext,
    bridge::{Completion, Deferred, Outcome, Resumable, invoke},
    fsm::{Declaration, Fsm, FsmBehavior, Snapshot, StateEvent, Transition},
};

use async_trait::async_trait;

impl<B: FsmBehavior> Declaration<B> {
    /// Declares `state` with a handler that may return a deferred transition.
    ///
    /// `Ok(None)` keeps the current state and data.
    pub fn when_async<F>(&mut self, state: B::State, handler: F) -> &mut Self
    where
        F: Fn(
                &mut B,
                StateEvent<B::Event, B::Data>,
                &mut ActorContext<Fsm<B>>,
            )
                -> Result<Option<Deferred<Transition<B::State, B::Data>>>, Error>
            + Send
            + Sync
            + 'static,
    {
        self.when(state, move |behavior, event, ctx| {
            let data = event.data.clone();
            let deferred = handler(behavior, event, ctx)?;
            match invoke(ctx, deferred)? {
                Outcome::Ready(transition) => Ok(transition),
                Outcome::Absent | Outcome::Pending => Ok(Transition::Stay(data)),
            }
        })
    }
}

#[async_trait]
impl<B: FsmBehavior> Resumable<Transition<B::State, B::Data>> for Fsm<B> {
    async fn resume(
        &mut self,
        completion: Completion<Transition<B::State, B::Data>>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<Snapshot<B::State, B::Data>, Error> {
        let transition = Result::from(completion)?;
        self.apply(transition, ctx).await
    }
}
