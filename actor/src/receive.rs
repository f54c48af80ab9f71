// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Receive actor
//!
//! Actor with one handler per message type. Handlers are registered on a
//! [`ReceiveActor`] with [`receive`](ReceiveActor::receive) (plain handler, see
//! [`Receive`]) or [`receive_async`](ReceiveActor::receive_async) (handler that may
//! return a deferred computation, see [`AsyncReceive`]). Messages travel as
//! [`AnyMessage`] and are routed by their concrete type.
//!
//! All handlers share one suspension: while any async handler awaits, every message is
//! buffered, whatever its type.
//!

use crate::{
    ActorPath, Error,
    actor::{Actor, ActorContext, Event, Handler, Message},
    bridge::{Completion, Deferred, Outcome, Resumable, invoke, raise},
    supervision::SupervisionStrategy,
};

use async_trait::async_trait;
use futures::{FutureExt, TryFutureExt};

use tracing::{debug, warn};

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::Arc,
};

/// Type-erased message.
#[derive(Clone)]
pub struct AnyMessage {
    type_id: TypeId,
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl AnyMessage {
    pub fn new<M>(message: M) -> Self
    where
        M: Any + Send + Sync,
    {
        Self {
            type_id: TypeId::of::<M>(),
            type_name: type_name::<M>(),
            payload: Arc::new(message),
        }
    }

    /// Name of the concrete message type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<M: Any>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }

    /// Copy of the message, if it is an `M`.
    pub fn downcast<M>(&self) -> Option<M>
    where
        M: Any + Clone,
    {
        self.payload.downcast_ref::<M>().cloned()
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("type", &self.type_name)
            .finish()
    }
}

impl Message for AnyMessage {}

/// State and lifecycle of a [`ReceiveActor`].
#[async_trait]
pub trait ReceiveBehavior: Send + Sync + Sized + 'static {
    /// Events the actor publishes.
    type Event: Event;

    fn supervision_strategy() -> SupervisionStrategy {
        SupervisionStrategy::Stop
    }

    fn stash_capacity() -> Option<usize> {
        None
    }

    async fn pre_start(
        &mut self,
        _ctx: &mut ActorContext<ReceiveActor<Self>>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn pre_restart(
        &mut self,
        ctx: &mut ActorContext<ReceiveActor<Self>>,
        _error: Option<&Error>,
    ) -> Result<(), Error> {
        self.pre_start(ctx).await
    }

    async fn post_stop(
        &mut self,
        _ctx: &mut ActorContext<ReceiveActor<Self>>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Plain handler for messages of type `M`.
#[async_trait]
pub trait Receive<M>: ReceiveBehavior
where
    M: Any + Clone + Send + Sync,
{
    async fn receive(
        &mut self,
        sender: &ActorPath,
        msg: M,
        ctx: &mut ActorContext<ReceiveActor<Self>>,
    ) -> Result<(), Error>;
}

/// Handler for messages of type `M` that may return a deferred computation.
#[async_trait]
pub trait AsyncReceive<M>: ReceiveBehavior
where
    M: Any + Clone + Send + Sync,
{
    /// Output of the deferred computation.
    type Output: Send + Sync + 'static;

    async fn receive(
        &mut self,
        sender: &ActorPath,
        msg: M,
        ctx: &mut ActorContext<ReceiveActor<Self>>,
    ) -> Result<Option<Deferred<Self::Output>>, Error>;

    /// Applies the output of a settled computation.
    async fn complete(
        &mut self,
        output: Self::Output,
        ctx: &mut ActorContext<ReceiveActor<Self>>,
    ) -> Result<(), Error>;
}

/// Output of a deferred computation, tagged with the route that produced it.
pub struct Routed {
    route: TypeId,
    output: Box<dyn Any + Send + Sync>,
}

#[async_trait]
trait Route<S: ReceiveBehavior>: Send + Sync {
    async fn dispatch(
        &self,
        behavior: &mut S,
        sender: &ActorPath,
        msg: &AnyMessage,
        ctx: &mut ActorContext<ReceiveActor<S>>,
    ) -> Result<Option<Deferred<Routed>>, Error>;

    async fn complete(
        &self,
        behavior: &mut S,
        output: Box<dyn Any + Send + Sync>,
        ctx: &mut ActorContext<ReceiveActor<S>>,
    ) -> Result<(), Error>;
}

fn mismatch<M>() -> Error {
    Error::Functional(format!("message is not a {}", type_name::<M>()))
}

struct SyncRoute<M>(PhantomData<fn() -> M>);

#[async_trait]
impl<S, M> Route<S> for SyncRoute<M>
where
    S: Receive<M>,
    M: Any + Clone + Send + Sync,
{
    async fn dispatch(
        &self,
        behavior: &mut S,
        sender: &ActorPath,
        msg: &AnyMessage,
        ctx: &mut ActorContext<ReceiveActor<S>>,
    ) -> Result<Option<Deferred<Routed>>, Error> {
        let msg = msg.downcast::<M>().ok_or_else(mismatch::<M>)?;
        <S as Receive<M>>::receive(behavior, sender, msg, ctx).await?;
        Ok(None)
    }

    async fn complete(
        &self,
        _behavior: &mut S,
        _output: Box<dyn Any + Send + Sync>,
        _ctx: &mut ActorContext<ReceiveActor<S>>,
    ) -> Result<(), Error> {
        Err(Error::Functional(format!(
            "handler of {} has no deferred output",
            type_name::<M>()
        )))
    }
}

struct AsyncRoute<M>(PhantomData<fn() -> M>);

#[async_trait]
impl<S, M> Route<S> for AsyncRoute<M>
where
    S: AsyncReceive<M>,
    M: Any + Clone + Send + Sync,
{
    async fn dispatch(
        &self,
        behavior: &mut S,
        sender: &ActorPath,
        msg: &AnyMessage,
        ctx: &mut ActorContext<ReceiveActor<S>>,
    ) -> Result<Option<Deferred<Routed>>, Error> {
        let msg = msg.downcast::<M>().ok_or_else(mismatch::<M>)?;
        let deferred =
            <S as AsyncReceive<M>>::receive(behavior, sender, msg, ctx).await?;
        Ok(deferred.map(|deferred| {
            deferred
                .map_ok(|output| Routed {
                    route: TypeId::of::<M>(),
                    output: Box::new(output),
                })
                .boxed()
        }))
    }

    async fn complete(
        &self,
        behavior: &mut S,
        output: Box<dyn Any + Send + Sync>,
        ctx: &mut ActorContext<ReceiveActor<S>>,
    ) -> Result<(), Error> {
        let output = output
            .downcast::<<S as AsyncReceive<M>>::Output>()
            .map_err(|_| {
                Error::Functional(format!(
                    "unexpected output for {}",
                    type_name::<M>()
                ))
            })?;
        <S as AsyncReceive<M>>::complete(behavior, *output, ctx).await
    }
}

/// Actor routing [`AnyMessage`]s to per-type handlers of `S`.
pub struct ReceiveActor<S: ReceiveBehavior> {
    behavior: S,
    routes: HashMap<TypeId, Box<dyn Route<S>>>,
}

impl<S: ReceiveBehavior> ReceiveActor<S> {
    pub fn new(behavior: S) -> Self {
        Self {
            behavior,
            routes: HashMap::new(),
        }
    }

    /// Routes messages of type `M` to `S`'s [`Receive<M>`] handler.
    pub fn receive<M>(self) -> Self
    where
        S: Receive<M>,
        M: Any + Clone + Send + Sync,
    {
        self.route::<M>(Box::new(SyncRoute::<M>(PhantomData)))
    }

    /// Routes messages of type `M` to `S`'s [`AsyncReceive<M>`] handler.
    pub fn receive_async<M>(self) -> Self
    where
        S: AsyncReceive<M>,
        M: Any + Clone + Send + Sync,
    {
        self.route::<M>(Box::new(AsyncRoute::<M>(PhantomData)))
    }

    fn route<M: Any>(mut self, route: Box<dyn Route<S>>) -> Self {
        if self.routes.insert(TypeId::of::<M>(), route).is_some() {
            warn!("Handler of {} replaced.", type_name::<M>());
        }
        self
    }

    pub fn behavior(&self) -> &S {
        &self.behavior
    }

    async fn complete(
        &mut self,
        routed: Routed,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        let Some(route) = self.routes.get(&routed.route) else {
            return Err(Error::Functional("route of output is gone".to_owned()));
        };
        route.complete(&mut self.behavior, routed.output, ctx).await
    }
}

#[async_trait]
impl<S: ReceiveBehavior> Actor for ReceiveActor<S> {
    type Message = AnyMessage;
    type Event = S::Event;
    type Response = ();

    fn supervision_strategy() -> SupervisionStrategy {
        S::supervision_strategy()
    }

    fn stash_capacity() -> Option<usize> {
        S::stash_capacity()
    }

    async fn pre_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        debug!("Actor {} has {} route(s).", ctx.path(), self.routes.len());
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
impl<S: ReceiveBehavior> Handler<ReceiveActor<S>> for ReceiveActor<S> {
    async fn handle_message(
        &mut self,
        sender: ActorPath,
        msg: AnyMessage,
        ctx: &mut ActorContext<ReceiveActor<S>>,
    ) -> Result<(), Error> {
        let Some(route) = self.routes.get(&msg.type_id) else {
            warn!(
                "Actor {} has no handler for {}.",
                ctx.path(),
                msg.type_name()
            );
            return Err(Error::Unhandled(msg.type_name().to_owned()));
        };
        let deferred =
            match route.dispatch(&mut self.behavior, &sender, &msg, ctx).await {
                Ok(deferred) => deferred,
                Err(error) => return Err(raise(ctx, error).await),
            };
        match invoke(ctx, deferred) {
            Ok(Outcome::Ready(routed)) => {
                match self.complete(routed, ctx).await {
                    Ok(()) => Ok(()),
                    Err(error) => Err(raise(ctx, error).await),
                }
            }
            Ok(Outcome::Absent) | Ok(Outcome::Pending) => Ok(()),
            Err(error) => Err(raise(ctx, error).await),
        }
    }
}

#[async_trait]
impl<S: ReceiveBehavior> Resumable<Routed> for ReceiveActor<S> {
    async fn resume(
        &mut self,
        completion: Completion<Routed>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        let routed = Result::from(completion)?;
        self.complete(routed, ctx).await
    }
}
