// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait and the `ActorRef` type. The `Actor` trait is the
//! main trait that actors must implement. The `ActorRef` type is a reference to an actor that can
//! be used to send messages to him.
//!

use crate::{
    ActorPath, Error,
    bridge::Suspension,
    handler::{
        BoxedMessageHandler, HandleHelper, MailboxControl, MailboxSender,
        ReplySender, SuspendReason, WeakMailboxSender,
    },
    runner::{InnerAction, InnerSender, StopSender},
    stash::Stash,
    supervision::SupervisionStrategy,
    system::SystemRef,
};

use tokio::sync::{broadcast::Receiver as EventReceiver, mpsc, oneshot};

use async_trait::async_trait;

use serde::{Serialize, de::DeserializeOwned};

use tracing::{debug, error, warn};

use std::fmt::Debug;

/// Actor execution context.
///
/// Owned by the actor's runner and lent to every hook and handler. Besides the system
/// services (children, events, stop, faults) it holds the per-instance state of the
/// async layer: the stash, the outstanding-computation flag and the parked reply. All of
/// it is only touched from the actor's own task.
pub struct ActorContext<A: Actor + Handler<A>> {
    stop: StopSender,
    path: ActorPath,
    system: SystemRef,
    error: Option<Error>,
    error_sender: ChildErrorSender,
    inner_sender: InnerSender<A>,
    child_senders: Vec<StopSender>,
    /// Own mailbox, used for self-addressed completion signals.
    myself: WeakMailboxSender<A>,
    mailbox: MailboxControl,
    stash: Stash<A>,
    stash_requested: bool,
    suspension: Suspension,
    parked: Option<ReplySender<A>>,
    /// Set once a stop was requested. Nothing else is dispatched afterwards.
    stopping: bool,
}

impl<A> ActorContext<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(
        stop: StopSender,
        path: ActorPath,
        system: SystemRef,
        error_sender: ChildErrorSender,
        inner_sender: InnerSender<A>,
        myself: WeakMailboxSender<A>,
    ) -> Self {
        Self {
            stop,
            path,
            system,
            error: None,
            error_sender,
            inner_sender,
            child_senders: Vec::new(),
            myself,
            mailbox: MailboxControl::default(),
            stash: Stash::new(A::stash_capacity()),
            stash_requested: false,
            suspension: Suspension::default(),
            parked: None,
            stopping: false,
        }
    }

    /// Restarts the actor. Buffered messages, the parked reply and any outstanding
    /// computation are discarded; the mailbox is kept.
    pub(crate) async fn restart(
        &mut self,
        actor: &mut A,
        error: Option<&Error>,
    ) -> Result<(), Error> {
        let dropped = self.stash.clear();
        if dropped > 0 {
            debug!(
                "Actor {} dropped {} buffered message(s) on restart.",
                self.path, dropped
            );
        }
        self.stash_requested = false;
        self.parked = None;
        self.suspension.reset();
        self.mailbox.clear();
        actor.pre_restart(self, error).await
    }

    /// Returns the actor reference.
    pub async fn reference(&self) -> Option<ActorRef<A>> {
        self.system.get_actor(&self.path).await
    }

    /// Returns the actor path.
    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    /// Returns the actor system.
    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// Returns the parent actor reference, if any.
    pub async fn parent<P: Actor + Handler<P>>(&self) -> Option<ActorRef<P>> {
        self.system.get_actor(&self.path.parent()).await
    }

    /// Stops the child actors.
    pub(crate) async fn stop_childs(&mut self) {
        while let Some(sender) = self.child_senders.pop() {
            let (stop_sender, stop_receiver) = oneshot::channel();
            if sender.send(Some(stop_sender)).await.is_err() {
                continue;
            } else {
                let _ = stop_receiver.await;
            };
        }
    }

    /// Removes the actor from the system.
    pub(crate) async fn remove_actor(&self) {
        self.system.remove_actor(&self.path).await;
    }

    /// Stops the actor. Buffered and not yet handled messages are not dispatched.
    pub async fn stop(&mut self, sender: Option<oneshot::Sender<()>>) {
        debug!("Stopping actor from handle reference.");
        self.stopping = true;
        let _ = self.stop.send(sender).await;
    }

    /// Drops every buffered message of a stopping actor.
    pub(crate) fn discard_stash(&mut self) {
        let dropped = self.stash.clear();
        if dropped > 0 {
            debug!(
                "Actor {} dropped {} buffered message(s) on stop.",
                self.path, dropped
            );
        }
    }

    /// Publishes an event on the actor's event stream.
    pub async fn publish_event(&self, event: A::Event) -> Result<(), Error> {
        self.inner_sender
            .send(InnerAction::Event(event))
            .map_err(|e| Error::SendEvent(e.to_string()))
    }

    /// Reports an error to the parent actor. The actor keeps running.
    pub async fn emit_error(&mut self, error: Error) -> Result<(), Error> {
        self.inner_sender
            .send(InnerAction::Error(error))
            .map_err(|e| Error::Send(e.to_string()))
    }

    /// Raises a fault. Message handling stops until supervision decides to restart or
    /// stop the actor.
    pub async fn emit_fail(&mut self, error: Error) -> Result<(), Error> {
        // Store error to stop message handling.
        self.set_error(error.clone());
        self.suspend_mailbox(SuspendReason::Supervision);
        self.inner_sender
            .send(InnerAction::Fail(error))
            .map_err(|e| Error::Send(e.to_string()))
    }

    /// Creates a supervised child actor.
    pub async fn create_child<C>(
        &mut self,
        name: &str,
        actor: C,
    ) -> Result<ActorRef<C>, Error>
    where
        C: Actor + Handler<C>,
    {
        let path = self.path.clone() / name;
        let (actor_ref, stop_sender) = self
            .system
            .create_actor_path(path, actor, Some(self.error_sender.clone()))
            .await?;

        self.child_senders.push(stop_sender);
        Ok(actor_ref)
    }

    /// Returns a child actor reference.
    pub async fn get_child<C>(&self, name: &str) -> Option<ActorRef<C>>
    where
        C: Actor + Handler<C>,
    {
        let path = self.path.clone() / name;
        self.system.get_actor(&path).await
    }

    /// Buffers the message being handled instead of answering it. It is handled again,
    /// with its reply channel, after [`unstash_all`](Self::unstash_all).
    pub fn stash(&mut self) {
        self.stash_requested = true;
    }

    /// Moves all buffered messages, in arrival order, ahead of everything else waiting
    /// for this actor. They are handled once the current message is done.
    pub fn unstash_all(&mut self) -> usize {
        self.stash.unstash_all()
    }

    /// Number of buffered messages.
    pub fn stashed(&self) -> usize {
        self.stash.len()
    }

    /// True while a deferred computation of this actor is outstanding.
    pub fn is_awaiting(&self) -> bool {
        self.suspension.is_awaiting()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.error.clone()
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    pub(crate) fn clean_error(&mut self) {
        self.error = None;
    }

    pub(crate) fn take_stash_request(&mut self) -> bool {
        std::mem::take(&mut self.stash_requested)
    }

    /// Buffers an envelope. A full stash is a fault.
    pub(crate) async fn stash_envelope(&mut self, envelope: BoxedMessageHandler<A>) {
        if self.stash.push(envelope).is_err() {
            warn!("Stash of actor {} is full.", self.path);
            let overflow = Error::StashOverflow(self.path.clone());
            if let Err(send_error) = self.emit_fail(overflow.clone()).await {
                error!(
                    "Actor {} can not raise {}: {}",
                    self.path, overflow, send_error
                );
            }
        }
    }

    /// Next unstashed envelope, unless the mailbox is suspended or the actor stops.
    pub(crate) fn next_unstashed(&mut self) -> Option<BoxedMessageHandler<A>> {
        if self.stopping || self.mailbox.is_suspended() {
            None
        } else {
            self.stash.next()
        }
    }

    pub(crate) fn accepts_messages(&self) -> bool {
        !self.stopping && !self.mailbox.is_suspended()
    }

    pub(crate) fn suspend_mailbox(&mut self, reason: SuspendReason) {
        if self.mailbox.suspend(reason) {
            debug!("Suspending mailbox of {} ({:?}).", self.path, reason);
        }
    }

    pub(crate) fn resume_mailbox(&mut self, reason: SuspendReason) {
        if self.mailbox.resume(reason) {
            debug!("Resuming mailbox of {} ({:?}).", self.path, reason);
        }
    }

    pub(crate) fn suspension(&self) -> &Suspension {
        &self.suspension
    }

    pub(crate) fn suspension_mut(&mut self) -> &mut Suspension {
        &mut self.suspension
    }

    pub(crate) fn park_reply(&mut self, rsvp: ReplySender<A>) {
        self.parked = Some(rsvp);
    }

    pub(crate) fn take_parked(&mut self) -> Option<ReplySender<A>> {
        self.parked.take()
    }

    /// Own mailbox sender, while the actor is alive.
    pub(crate) fn self_sender(&self) -> Option<MailboxSender<A>> {
        self.myself.upgrade()
    }

    pub(crate) fn inner_sender(&self) -> InnerSender<A> {
        self.inner_sender.clone()
    }
}

/// Lifecycle of an actor runner.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorLifecycle {
    /// The actor is created.
    Created,
    /// The actor is started.
    Started,
    /// The actor is restarted.
    Restarted,
    /// The actor is faulty.
    Failed,
    /// The actor is stopped.
    Stopped,
    /// The actor is terminated.
    Terminated,
}

/// Action the parent takes on a faulty child.
#[derive(Debug, Clone)]
pub enum ChildAction {
    /// Stop the child.
    Stop,
    /// Restart the child.
    Restart,
    /// Let the child's own supervision strategy decide.
    Delegate,
}

pub(crate) type ChildErrorReceiver = mpsc::UnboundedReceiver<ChildError>;

pub(crate) type ChildErrorSender = mpsc::UnboundedSender<ChildError>;

/// Error reported by a child actor.
pub enum ChildError {
    /// Error that does not stop the child.
    Error { error: Error },
    /// Fault; the child waits for the action.
    Fault {
        error: Error,
        sender: oneshot::Sender<ChildAction>,
    },
}

/// The `Actor` trait is the main trait that actors must implement.
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static + Handler<Self> {
    /// The type of messages that the actor can receive.
    type Message: Message;

    /// The type of events that the actor can publish.
    type Event: Event;

    /// The type of responses that the actor can send.
    type Response: Response;

    /// Supervision strategy applied when the actor faults.
    fn supervision_strategy() -> SupervisionStrategy {
        SupervisionStrategy::Stop
    }

    /// Maximum number of buffered messages. `None` is unbounded.
    fn stash_capacity() -> Option<usize> {
        None
    }

    /// Called when the actor starts.
    async fn pre_start(
        &mut self,
        _context: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called when the actor restarts after a fault.
    async fn pre_restart(
        &mut self,
        ctx: &mut ActorContext<Self>,
        _error: Option<&Error>,
    ) -> Result<(), Error> {
        self.pre_start(ctx).await
    }

    /// Called before the actor stops.
    async fn pre_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called after the actor stopped.
    async fn post_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Defines what an actor publishes on its event stream.
pub trait Event:
    Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static
{
}

/// Defines what an actor will receive as its message.
pub trait Message: Clone + Send + Sync + 'static {}

/// Defines the response of a message.
pub trait Response: Send + Sync + 'static {}

impl Response for () {}

impl Event for () {}

/// Defines how an actor handles its messages.
#[async_trait]
pub trait Handler<A: Actor + Handler<A>>: Send + Sync {
    /// Handles a message.
    async fn handle_message(
        &mut self,
        sender: ActorPath,
        msg: A::Message,
        ctx: &mut ActorContext<A>,
    ) -> Result<A::Response, Error>;

    /// Handles an error reported by a child.
    async fn on_child_error(
        &mut self,
        error: Error,
        _ctx: &mut ActorContext<A>,
    ) {
        debug!("Handling error: {:?}", error);
    }

    /// Handles a fault of a child and decides what happens to it.
    async fn on_child_fault(
        &mut self,
        error: Error,
        _ctx: &mut ActorContext<A>,
    ) -> ChildAction {
        debug!("Handling fault: {:?}", error);
        ChildAction::Stop
    }
}

/// Actor reference.
pub struct ActorRef<A>
where
    A: Actor + Handler<A>,
{
    path: ActorPath,
    sender: HandleHelper<A>,
    event_receiver: EventReceiver<<A as Actor>::Event>,
    stop_sender: StopSender,
}

impl<A> ActorRef<A>
where
    A: Actor + Handler<A>,
{
    pub fn new(
        path: ActorPath,
        sender: HandleHelper<A>,
        stop_sender: StopSender,
        event_receiver: EventReceiver<<A as Actor>::Event>,
    ) -> Self {
        Self {
            path,
            sender,
            stop_sender,
            event_receiver,
        }
    }

    /// Sends a message without waiting for the response. The sender is anonymous.
    pub async fn tell(&self, message: A::Message) -> Result<(), Error> {
        self.sender.tell(ActorPath::anonymous(), message).await
    }

    /// Sends a message and waits for the response. The sender is anonymous.
    pub async fn ask(&self, message: A::Message) -> Result<A::Response, Error> {
        self.sender.ask(ActorPath::anonymous(), message).await
    }

    /// Asks the actor to stop and waits until it did.
    pub async fn ask_stop(&self) -> Result<(), Error> {
        debug!("Stopping actor from handle reference.");
        let (response_sender, response_receiver) = oneshot::channel();

        if self.stop_sender.send(Some(response_sender)).await.is_err() {
            Ok(())
        } else {
            response_receiver
                .await
                .map_err(|error| Error::Send(error.to_string()))
        }
    }

    /// Asks the actor to stop.
    pub async fn tell_stop(&self) {
        debug!("Stopping actor from handle reference.");
        let _ = self.stop_sender.send(None).await;
    }

    /// Returns the actor path.
    pub fn path(&self) -> ActorPath {
        self.path.clone()
    }

    /// True if the actor no longer accepts messages.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Subscribes to the actor's event stream.
    pub fn subscribe(&self) -> EventReceiver<<A as Actor>::Event> {
        self.event_receiver.resubscribe()
    }
}

impl<A> Clone for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            sender: self.sender.clone(),
            stop_sender: self.stop_sender.clone(),
            event_receiver: self.event_receiver.resubscribe(),
        }
    }
}
