// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor runner
//!
//! Every actor runs inside its own `ActorRunner`, a tokio task that owns the actor, its
//! context and the receiving ends of its channels. The runner drives the lifecycle
//! (`Created`, `Started`, `Failed`, `Restarted`, `Stopped`, `Terminated`) and, while
//! started, selects over:
//!
//! - stop requests,
//! - errors and faults reported by children,
//! - internal control actions (events, errors, faults and completion resumes),
//! - the mailbox.
//!
//! Envelopes released from the stash are dispatched before the mailbox is read again.
//! Neither the replay queue nor the mailbox is read while the mailbox is suspended.
//!

use crate::{
    ActorPath, Error,
    actor::{
        Actor, ActorContext, ActorLifecycle, ActorRef, ChildAction, ChildError,
        ChildErrorReceiver, ChildErrorSender, Handler,
    },
    handler::{
        BoxedMessageHandler, Dispatch, HandleHelper, MailboxReceiver,
        SuspendReason, WeakMailboxSender, mailbox,
    },
    supervision::{RetryStrategy, SupervisionStrategy},
    system::SystemRef,
};

use tokio::{
    select,
    sync::{
        broadcast::{self, Sender as EventSender},
        mpsc, oneshot,
    },
};
use tracing::{debug, error, warn};

/// Inner sender.
pub type InnerSender<A> = mpsc::UnboundedSender<InnerAction<A>>;

/// Inner receiver.
pub type InnerReceiver<A> = mpsc::UnboundedReceiver<InnerAction<A>>;

/// Stop receiver.
pub type StopReceiver = mpsc::Receiver<Option<oneshot::Sender<()>>>;

/// Stop sender.
pub type StopSender = mpsc::Sender<Option<oneshot::Sender<()>>>;

/// Actor runner.
pub(crate) struct ActorRunner<A: Actor> {
    path: ActorPath,
    actor: A,
    lifecycle: ActorLifecycle,
    receiver: MailboxReceiver<A>,
    /// Weak handle on the mailbox, lent to the context for self-sends.
    myself: WeakMailboxSender<A>,
    event_sender: EventSender<A::Event>,
    stop_receiver: StopReceiver,
    error_sender: ChildErrorSender,
    parent_sender: Option<ChildErrorSender>,
    error_receiver: ChildErrorReceiver,
    inner_sender: InnerSender<A>,
    inner_receiver: InnerReceiver<A>,
    stop_signal: bool,
}

impl<A> ActorRunner<A>
where
    A: Actor + Handler<A>,
{
    /// Creates a new actor runner and the actor reference.
    pub(crate) fn create(
        path: ActorPath,
        actor: A,
        parent_sender: Option<ChildErrorSender>,
    ) -> (Self, ActorRef<A>, StopSender) {
        debug!("Creating new actor runner.");
        let (sender, receiver) = mailbox();
        let (stop_sender, stop_receiver) = mpsc::channel(100);
        let (error_sender, error_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = broadcast::channel(10000);
        let (inner_sender, inner_receiver) = mpsc::unbounded_channel();
        let helper = HandleHelper::new(sender);
        let myself = helper.downgrade();

        let actor_ref = ActorRef::new(
            path.clone(),
            helper,
            stop_sender.clone(),
            event_receiver,
        );
        let runner: ActorRunner<A> = ActorRunner {
            path,
            actor,
            lifecycle: ActorLifecycle::Created,
            receiver,
            myself,
            stop_receiver,
            event_sender,
            error_sender,
            parent_sender,
            error_receiver,
            inner_sender,
            inner_receiver,
            stop_signal: false,
        };
        (runner, actor_ref, stop_sender)
    }

    /// Drives the actor lifecycle until it terminates.
    pub(crate) async fn init(
        &mut self,
        system: SystemRef,
        stop_sender: StopSender,
        mut sender: Option<oneshot::Sender<bool>>,
    ) {
        debug!("Initializing actor {} runner.", &self.path);

        debug!("Creating actor {} context.", &self.path);
        let mut ctx: ActorContext<A> = ActorContext::new(
            stop_sender,
            self.path.clone(),
            system,
            self.error_sender.clone(),
            self.inner_sender.clone(),
            self.myself.clone(),
        );

        // The strategy keeps its backoff state across restarts.
        let mut strategy = A::supervision_strategy();
        let mut retries = 0;
        loop {
            match self.lifecycle {
                ActorLifecycle::Created => {
                    debug!("Actor {} is created.", &self.path);
                    match self.actor.pre_start(&mut ctx).await {
                        Ok(_) => {
                            debug!(
                                "Actor '{}' has started successfully.",
                                &self.path
                            );
                            self.lifecycle = ActorLifecycle::Started;
                        }
                        Err(err) => {
                            error!(
                                "Actor {} failed to start: {:?}",
                                &self.path, err
                            );
                            ctx.set_error(err);
                            self.lifecycle = ActorLifecycle::Failed;
                        }
                    }
                }
                ActorLifecycle::Started => {
                    debug!("Actor {} is started.", &self.path);
                    if let Some(sender) = sender.take() {
                        sender.send(true).unwrap_or_else(|err| {
                            error!("Failed to send signal: {:?}", err);
                        });
                    }
                    self.run(&mut ctx).await;
                }
                ActorLifecycle::Failed => {
                    debug!("Actor {} is faulty.", &self.path);
                    self.lifecycle = self.supervise(ctx.error()).await;
                }
                ActorLifecycle::Restarted => {
                    self.lifecycle = Self::apply_supervision_strategy(
                        &self.path,
                        &mut self.actor,
                        &mut strategy,
                        &mut ctx,
                        &mut retries,
                    )
                    .await;
                }
                ActorLifecycle::Stopped => {
                    debug!("Actor {} is stopped.", &self.path);
                    ctx.stop_childs().await;
                    if self.actor.post_stop(&mut ctx).await.is_err() {
                        error!("Actor '{}' failed to stop!", &self.path);
                    }
                    self.lifecycle = ActorLifecycle::Terminated;
                }
                ActorLifecycle::Terminated => {
                    debug!("Actor {} is terminated.", &self.path);
                    ctx.remove_actor().await;
                    if let Some(sender) = sender.take() {
                        sender.send(false).unwrap_or_else(|err| {
                            error!("Failed to send signal: {:?}", err);
                        });
                    }
                    // Answer stop requests that arrived while the actor was failing.
                    while let Ok(Some(stop)) = self.stop_receiver.try_recv() {
                        let _ = stop.send(());
                    }
                    break;
                }
            }
        }
        self.receiver.close();
    }

    /// Main loop of a started actor. Returns when the lifecycle must move on.
    pub(crate) async fn run(&mut self, ctx: &mut ActorContext<A>) {
        debug!("Running actor {}.", &self.path);

        loop {
            if let Some(envelope) = ctx.next_unstashed() {
                self.dispatch(envelope, ctx).await;
                continue;
            }
            let accepts = ctx.accepts_messages();

            select! {
                stop = self.stop_receiver.recv() => {
                    debug!("Stopping actor.");
                    if self.actor.pre_stop(ctx).await.is_err() {
                        error!("Failed to stop actor!");
                    }

                    ctx.discard_stash();
                    ctx.stop_childs().await;
                    ctx.remove_actor().await;

                    if let Some(Some(stop)) = stop {
                        let _ = stop.send(());
                    }

                    self.lifecycle = ActorLifecycle::Stopped;
                    break;
                }
                error = self.error_receiver.recv(), if !self.stop_signal => {
                    if let Some(error) = error {
                        match error {
                            ChildError::Error { error } => self.actor.on_child_error(error, ctx).await,
                            ChildError::Fault { error, sender } => {
                                let action = self.actor.on_child_fault(error, ctx).await;
                                if sender.send(action).is_err() {
                                    error!("Can not send action to child!");
                                }
                            },
                        }
                    } else {
                        ctx.stop(None).await;
                        self.stop_signal = true;
                    }
                }
                recv = self.inner_receiver.recv(), if !self.stop_signal => {
                    if let Some(action) = recv {
                        if self.inner_handle(action, ctx).await {
                            self.lifecycle = ActorLifecycle::Failed;
                            break;
                        }
                    } else {
                        ctx.stop(None).await;
                        self.stop_signal = true;
                    }
                }
                msg = self.receiver.recv(), if !self.stop_signal && accepts => {
                    if let Some(msg) = msg {
                        self.dispatch(msg, ctx).await;
                    } else {
                        ctx.stop(None).await;
                        self.stop_signal = true;
                    }
                }
            }
        }
    }

    /// Handles one envelope and buffers it if asked to.
    async fn dispatch(
        &mut self,
        mut envelope: BoxedMessageHandler<A>,
        ctx: &mut ActorContext<A>,
    ) {
        if let Dispatch::Stash = envelope.handle(&mut self.actor, ctx).await {
            debug!(
                "Stashing message from {} in actor {}.",
                envelope.sender(),
                &self.path
            );
            ctx.stash_envelope(envelope).await;
        }
    }

    /// Handles an internal action. Returns true if the actor faulted.
    async fn inner_handle(
        &mut self,
        action: InnerAction<A>,
        ctx: &mut ActorContext<A>,
    ) -> bool {
        match action {
            InnerAction::Event(event) => {
                match self.event_sender.send(event) {
                    Ok(size) => {
                        debug!(
                            "Event sent successfully to {} subscribers.",
                            size
                        );
                    }
                    Err(_err) => {
                        debug!("Event published without subscribers.");
                    }
                }
                false
            }
            InnerAction::Error(error) => {
                if let Some(parent_helper) = self.parent_sender.as_mut() {
                    parent_helper
                        .send(ChildError::Error { error })
                        .unwrap_or_else(|err| {
                            error!(
                                "Failed to send error to parent actor: {:?}",
                                err
                            );
                        });
                }
                false
            }
            InnerAction::Fail(error) => {
                error!("Actor {} failed: {}", &self.path, error);
                true
            }
            InnerAction::Resume(epoch) => {
                if ctx.suspension().is_current(epoch) {
                    ctx.resume_mailbox(SuspendReason::AwaitingCompletion);
                } else {
                    debug!(
                        "Actor {} ignored resume request #{}.",
                        &self.path, epoch
                    );
                }
                false
            }
        }
    }

    /// Decides what happens to a faulty actor. Children ask their parent, root actors
    /// apply their own strategy.
    async fn supervise(&mut self, error: Option<Error>) -> ActorLifecycle {
        let Some(parent_helper) = self.parent_sender.as_ref() else {
            return ActorLifecycle::Restarted;
        };
        let error = error.unwrap_or_else(|| {
            Error::Functional(format!("Actor {} is faulty", &self.path))
        });
        let (action_sender, action_receiver) = oneshot::channel();
        if parent_helper
            .send(ChildError::Fault {
                error,
                sender: action_sender,
            })
            .is_err()
        {
            error!("Failed to send fail to parent actor!");
            return ActorLifecycle::Stopped;
        }
        match action_receiver.await {
            Ok(ChildAction::Stop) => ActorLifecycle::Stopped,
            Ok(ChildAction::Restart) | Ok(ChildAction::Delegate) => {
                ActorLifecycle::Restarted
            }
            Err(_) => {
                warn!("Parent of {} is gone.", &self.path);
                ActorLifecycle::Stopped
            }
        }
    }

    async fn apply_supervision_strategy(
        path: &ActorPath,
        actor: &mut A,
        strategy: &mut SupervisionStrategy,
        ctx: &mut ActorContext<A>,
        retries: &mut usize,
    ) -> ActorLifecycle {
        match strategy {
            SupervisionStrategy::Stop => {
                error!("Actor '{}' is stopped by its supervision.", path);
                ActorLifecycle::Stopped
            }
            SupervisionStrategy::Retry(retry_strategy) => {
                debug!(
                    "Restarting actor with retry strategy: {:?}",
                    retry_strategy
                );
                if *retries >= retry_strategy.max_retries() {
                    error!("Actor '{}' exhausted its retries.", path);
                    return ActorLifecycle::Stopped;
                }
                debug!("retries: {}", retries);
                if let Some(duration) = retry_strategy.next_backoff() {
                    debug!("Backoff for {:?}", &duration);
                    tokio::time::sleep(duration).await;
                }
                *retries += 1;
                let error = ctx.error();
                match ctx.restart(actor, error.as_ref()).await {
                    Ok(_) => {
                        debug!("Actor {} is restarted.", path);
                        ctx.clean_error();
                        retry_strategy.reset();
                        *retries = 0;
                        ActorLifecycle::Started
                    }
                    Err(err) => {
                        ctx.set_error(err);
                        ActorLifecycle::Restarted
                    }
                }
            }
        }
    }
}

/// Internal control actions of a runner.
#[derive(Debug, Clone)]
pub enum InnerAction<A: Actor> {
    /// Publish an event.
    Event(A::Event),
    /// Report an error to the parent.
    Error(Error),
    /// Fault.
    Fail(Error),
    /// A deferred computation settled; its completion signal is in the mailbox.
    Resume(u64),
}
