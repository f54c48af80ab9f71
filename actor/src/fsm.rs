// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Finite state machine
//!
//! Declarative state machine actor. A [`FsmBehavior`] declares its start state and one
//! handler per state; each handler maps an event and the current data to a
//! [`Transition`]:
//!
//! - `Stay(data)` keeps the state with new data;
//! - `GoTo(state, data)` moves to another declared state;
//! - `Stop` stops the actor.
//!
//! Every applied `GoTo` runs the transition hooks and publishes a [`StateTransition`] on
//! the actor's event stream. A restart puts the machine back in its start state.
//!
//! Handlers returning deferred transitions are declared with `when_async`.
//!

use crate::{
    ActorPath, Error,
    actor::{Actor, ActorContext, Event, Handler, Message, Response},
    bridge::raise,
    supervision::SupervisionStrategy,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use tracing::{debug, warn};

use std::{collections::HashMap, fmt::Debug, hash::Hash};

/// Behavior of a [`Fsm`].
pub trait FsmBehavior: Send + Sync + Sized + 'static {
    /// State names.
    type State: Clone
        + Debug
        + Eq
        + Hash
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static;
    /// Data carried along the states.
    type Data: Clone + Debug + Send + Sync + 'static;
    /// Events the machine receives.
    type Event: Message + Debug;

    /// Declares start state, handlers and hooks.
    fn declare(&self, fsm: &mut Declaration<Self>);

    fn supervision_strategy() -> SupervisionStrategy {
        SupervisionStrategy::Stop
    }

    fn stash_capacity() -> Option<usize> {
        None
    }
}

/// Event delivered to a state handler, with the data of the current state.
#[derive(Debug, Clone)]
pub struct StateEvent<E, D> {
    pub event: E,
    pub data: D,
}

/// Result of a state handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<S, D> {
    Stay(D),
    GoTo(S, D),
    Stop,
}

/// Published on every applied `GoTo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition<S> {
    pub from: S,
    pub to: S,
}

impl<S> Event for StateTransition<S> where
    S: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// State and data of a machine, returned to asking senders.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<S, D> {
    pub state: S,
    pub data: D,
}

impl<S, D> Response for Snapshot<S, D>
where
    S: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
}

/// Synchronous state handler.
pub type StateHandler<B> = Box<
    dyn Fn(
            &mut B,
            StateEvent<<B as FsmBehavior>::Event, <B as FsmBehavior>::Data>,
            &mut ActorContext<Fsm<B>>,
        ) -> Result<
            Transition<<B as FsmBehavior>::State, <B as FsmBehavior>::Data>,
            Error,
        > + Send
        + Sync,
>;

type TransitionHook<B> = Box<
    dyn Fn(&mut B, &<B as FsmBehavior>::State, &<B as FsmBehavior>::State)
        + Send
        + Sync,
>;

/// Declaration of a machine, filled by [`FsmBehavior::declare`].
pub struct Declaration<B: FsmBehavior> {
    start: Option<(B::State, B::Data)>,
    handlers: HashMap<B::State, StateHandler<B>>,
    hooks: Vec<TransitionHook<B>>,
}

impl<B: FsmBehavior> Declaration<B> {
    fn new() -> Self {
        Self {
            start: None,
            handlers: HashMap::new(),
            hooks: Vec::new(),
        }
    }

    /// Sets the start state and data.
    pub fn start_with(&mut self, state: B::State, data: B::Data) -> &mut Self {
        self.start = Some((state, data));
        self
    }

    /// Declares `state` with its handler.
    pub fn when<F>(&mut self, state: B::State, handler: F) -> &mut Self
    where
        F: Fn(
                &mut B,
                StateEvent<B::Event, B::Data>,
                &mut ActorContext<Fsm<B>>,
            ) -> Result<Transition<B::State, B::Data>, Error>
            + Send
            + Sync
            + 'static,
    {
        if self.handlers.insert(state.clone(), Box::new(handler)).is_some() {
            warn!("Handler of state {:?} replaced.", state);
        }
        self
    }

    /// Adds a hook run on every applied `GoTo`, with the old and the new state.
    pub fn on_transition<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut B, &B::State, &B::State) + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }
}

/// State machine actor.
pub struct Fsm<B: FsmBehavior> {
    behavior: B,
    handlers: HashMap<B::State, StateHandler<B>>,
    hooks: Vec<TransitionHook<B>>,
    start: (B::State, B::Data),
    state: B::State,
    data: B::Data,
}

impl<B: FsmBehavior> Fsm<B> {
    /// Builds the machine. Fails if the behavior declares no start state.
    pub fn new(behavior: B) -> Result<Self, Error> {
        let mut declaration = Declaration::new();
        behavior.declare(&mut declaration);
        let Declaration {
            start,
            handlers,
            hooks,
        } = declaration;
        let start = start.ok_or_else(|| {
            Error::Fsm("no start state declared".to_owned())
        })?;
        Ok(Self {
            behavior,
            handlers,
            hooks,
            state: start.0.clone(),
            data: start.1.clone(),
            start,
        })
    }

    pub fn state(&self) -> &B::State {
        &self.state
    }

    pub fn data(&self) -> &B::Data {
        &self.data
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    fn snapshot(&self) -> Snapshot<B::State, B::Data> {
        Snapshot {
            state: self.state.clone(),
            data: self.data.clone(),
        }
    }

    /// Applies a transition. Errors are returned, not raised.
    pub(crate) async fn apply(
        &mut self,
        transition: Transition<B::State, B::Data>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<Snapshot<B::State, B::Data>, Error> {
        match transition {
            Transition::Stay(data) => {
                self.data = data;
            }
            Transition::GoTo(state, data) => {
                if !self.handlers.contains_key(&state) && state != self.start.0 {
                    return Err(Error::Fsm(format!(
                        "state {:?} is not declared",
                        state
                    )));
                }
                let from = std::mem::replace(&mut self.state, state);
                self.data = data;
                for hook in &self.hooks {
                    hook(&mut self.behavior, &from, &self.state);
                }
                debug!(
                    "Fsm {} moved from {:?} to {:?}.",
                    ctx.path(),
                    from,
                    self.state
                );
                ctx.publish_event(StateTransition {
                    from,
                    to: self.state.clone(),
                })
                .await?;
            }
            Transition::Stop => {
                debug!("Fsm {} stops in {:?}.", ctx.path(), self.state);
                ctx.stop(None).await;
            }
        }
        Ok(self.snapshot())
    }
}

#[async_trait]
impl<B: FsmBehavior> Actor for Fsm<B> {
    type Message = B::Event;
    type Event = StateTransition<B::State>;
    type Response = Snapshot<B::State, B::Data>;

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
        debug!("Fsm {} starts in {:?}.", ctx.path(), self.state);
        Ok(())
    }

    async fn pre_restart(
        &mut self,
        ctx: &mut ActorContext<Self>,
        _error: Option<&Error>,
    ) -> Result<(), Error> {
        self.state = self.start.0.clone();
        self.data = self.start.1.clone();
        self.pre_start(ctx).await
    }
}

#[async_trait]
impl<B: FsmBehavior> Handler<Fsm<B>> for Fsm<B> {
    async fn handle_message(
        &mut self,
        _sender: ActorPath,
        event: B::Event,
        ctx: &mut ActorContext<Fsm<B>>,
    ) -> Result<Snapshot<B::State, B::Data>, Error> {
        let transition = match self.handlers.get(&self.state) {
            Some(handler) => {
                let data = self.data.clone();
                match handler(&mut self.behavior, StateEvent { event, data }, ctx)
                {
                    Ok(transition) => transition,
                    Err(error) => return Err(raise(ctx, error).await),
                }
            }
            None => {
                warn!(
                    "Fsm {} has no handler in state {:?}. Event {:?} ignored.",
                    ctx.path(),
                    self.state,
                    event
                );
                Transition::Stay(self.data.clone())
            }
        };
        match self.apply(transition, ctx).await {
            Ok(snapshot) => Ok(snapshot),
            Err(error) => Err(raise(ctx, error).await),
        }
    }
}
