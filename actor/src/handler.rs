// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox
//!
//! Type-erased message envelopes, the mailbox channel that carries them and the
//! suspend/resume control of the mailbox.
//!

use crate::{
    ActorPath, Error,
    actor::{Actor, ActorContext, Handler},
};

use async_trait::async_trait;

use tokio::sync::{mpsc, oneshot};

use tracing::{debug, error};

use std::{collections::HashSet, marker::PhantomData};

/// What the runner does with an envelope after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The envelope is consumed.
    Done,
    /// The envelope goes to the stash, reply channel included.
    Stash,
}

/// Message handler trait for processing actor messages.
/// This trait abstracts the handling of different envelope kinds (user messages and
/// completion signals), allowing the runner to process them uniformly.
#[async_trait]
pub trait MessageHandler<A: Actor + Handler<A>>: Send + Sync {
    /// Handles the envelope for the given actor.
    async fn handle(&mut self, actor: &mut A, ctx: &mut ActorContext<A>) -> Dispatch;

    /// Path of the actor that sent the envelope.
    fn sender(&self) -> &ActorPath;
}

/// Reply channel of an `ask`.
pub type ReplySender<A> =
    oneshot::Sender<Result<<A as Actor>::Response, Error>>;

/// Envelope of a user message.
struct ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    /// The actual message to be processed by the actor.
    message: A::Message,
    /// The path of the actor that sent this message.
    sender: ActorPath,
    /// Reply channel for the ask pattern. None for tell.
    rsvp: Option<ReplySender<A>>,
    _phantom_actor: PhantomData<A>,
}

impl<A> ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    pub fn new(
        message: A::Message,
        sender: ActorPath,
        rsvp: Option<ReplySender<A>>,
    ) -> Self {
        debug!("Creating new internal actor message.");
        Self {
            message,
            sender,
            rsvp,
            _phantom_actor: PhantomData,
        }
    }
}

#[async_trait]
impl<A> MessageHandler<A> for ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    async fn handle(&mut self, actor: &mut A, ctx: &mut ActorContext<A>) -> Dispatch {
        if ctx.is_awaiting() {
            debug!(
                "Actor {} is awaiting a completion. Stashing message from {}.",
                ctx.path(),
                self.sender
            );
            return Dispatch::Stash;
        }

        debug!("Handling message.");
        let result = actor
            .handle_message(self.sender.clone(), self.message.clone(), ctx)
            .await;

        if ctx.take_stash_request() {
            return Dispatch::Stash;
        }

        if let Some(rsvp) = self.rsvp.take() {
            if ctx.is_awaiting() {
                // Handling suspended; the completion answers.
                debug!("Parking response until completion.");
                ctx.park_reply(rsvp);
            } else {
                debug!("Sending back response (if any).");
                rsvp.send(result).unwrap_or_else(|_failed| {
                    error!("Failed to send back response!");
                })
            }
        }
        Dispatch::Done
    }

    fn sender(&self) -> &ActorPath {
        &self.sender
    }
}

/// Boxed message handler for type-erased message handling.
pub type BoxedMessageHandler<A> = Box<dyn MessageHandler<A>>;

/// Mailbox receiver side.
pub type MailboxReceiver<A> = mpsc::UnboundedReceiver<BoxedMessageHandler<A>>;

/// Mailbox sender side.
pub type MailboxSender<A> = mpsc::UnboundedSender<BoxedMessageHandler<A>>;

/// Mailbox sender that does not keep the mailbox open.
pub type WeakMailboxSender<A> =
    mpsc::WeakUnboundedSender<BoxedMessageHandler<A>>;

/// Complete mailbox tuple containing both sender and receiver sides.
pub type Mailbox<A> = (MailboxSender<A>, MailboxReceiver<A>);

/// Creates a new unbounded mailbox for an actor.
pub fn mailbox<A>() -> Mailbox<A>
where
    A: Actor + Handler<A>,
{
    mpsc::unbounded_channel()
}

/// Reason tag for a mailbox suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendReason {
    /// A deferred computation is outstanding.
    AwaitingCompletion,
    /// A fault is waiting for its supervision decision.
    Supervision,
}

/// Suspend/resume state of a mailbox. Suspend and resume are idempotent per reason;
/// the mailbox is read only when no reason is active.
#[derive(Debug, Default)]
pub(crate) struct MailboxControl {
    reasons: HashSet<SuspendReason>,
}

impl MailboxControl {
    /// Returns true if the reason was not active yet.
    pub(crate) fn suspend(&mut self, reason: SuspendReason) -> bool {
        self.reasons.insert(reason)
    }

    /// Returns true if the reason was active.
    pub(crate) fn resume(&mut self, reason: SuspendReason) -> bool {
        self.reasons.remove(&reason)
    }

    pub(crate) fn is_suspended(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.reasons.clear();
    }
}

/// Handle helper for sending messages to an actor.
pub struct HandleHelper<A: Actor + Handler<A>> {
    /// The underlying mailbox sender for this actor.
    sender: MailboxSender<A>,
}

impl<A> HandleHelper<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(sender: MailboxSender<A>) -> Self {
        debug!("Creating new handle reference.");
        Self { sender }
    }

    /// Sends a message to the actor without expecting a response.
    pub(crate) async fn tell(
        &self,
        sender: ActorPath,
        message: A::Message,
    ) -> Result<(), Error> {
        debug!("Telling message to actor from handle reference.");
        let msg = ActorMessage::new(message, sender, None);
        if let Err(error) = self.sender.send(Box::new(msg)) {
            debug!("Failed to tell message! {}", error.to_string());
            Err(Error::Send(error.to_string()))
        } else {
            debug!("Message sent successfully.");
            Ok(())
        }
    }

    /// Sends a message to the actor and waits for a response.
    ///
    /// If the handling suspends on a deferred computation, the response arrives once
    /// the computation settled and its result was applied.
    pub(crate) async fn ask(
        &self,
        sender: ActorPath,
        message: A::Message,
    ) -> Result<A::Response, Error> {
        debug!("Asking message to actor from handle reference.");
        let (response_sender, response_receiver) = oneshot::channel();
        let msg = ActorMessage::new(message, sender, Some(response_sender));
        if let Err(error) = self.sender.send(Box::new(msg)) {
            error!("Failed to ask message! {}", error.to_string());
            Err(Error::Send(error.to_string()))
        } else {
            response_receiver
                .await
                .map_err(|error| Error::Send(error.to_string()))?
        }
    }

    /// Mailbox sender that does not keep the actor alive.
    pub(crate) fn downgrade(&self) -> WeakMailboxSender<A> {
        self.sender.downgrade()
    }

    /// Checks if the mailbox is closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<A> Clone for HandleHelper<A>
where
    A: Actor + Handler<A>,
{
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
