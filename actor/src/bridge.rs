// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Suspension bridge
//!
//! Lets a handler hand back a deferred computation instead of a value without blocking
//! the actor. [`invoke`] polls the computation once:
//!
//! - no computation: nothing happens ([`Outcome::Absent`]);
//! - already resolved: the value is returned ([`Outcome::Ready`]);
//! - already rejected: the error is returned to the caller;
//! - pending: the actor is marked as awaiting, its mailbox is suspended and the
//!   computation is driven on a separate tokio task ([`Outcome::Pending`]).
//!
//! When the computation settles, the task sends a completion signal to the actor's own
//! mailbox and asks the runner to resume it. While the actor awaits, every other message
//! is stashed. The completion signal ends the wait, releases the stash and hands the
//! result to [`Resumable::resume`] on the actor's own task.
//!
//! Each wait has an epoch. Signals and resume requests from an older wait (for example,
//! one abandoned by a restart) are discarded.
//!

use crate::{
    ActorPath, Error,
    actor::{Actor, ActorContext, Handler},
    handler::{Dispatch, MessageHandler, SuspendReason},
    runner::InnerAction,
};

use async_trait::async_trait;
use futures::{
    FutureExt,
    future::BoxFuture,
    task::noop_waker_ref,
};

use tracing::{debug, error, warn};

use std::{
    any::Any,
    marker::PhantomData,
    panic::AssertUnwindSafe,
    task::{Context, Poll},
};

/// A computation that settles later with a value or an error.
pub type Deferred<T> = BoxFuture<'static, Result<T, Error>>;

/// Result of a settled deferred computation.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
    Success(T),
    Failure(Error),
}

impl<T> From<Result<T, Error>> for Completion<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Completion::Success(value),
            Err(error) => Completion::Failure(error),
        }
    }
}

impl<T> From<Completion<T>> for Result<T, Error> {
    fn from(completion: Completion<T>) -> Self {
        match completion {
            Completion::Success(value) => Ok(value),
            Completion::Failure(error) => Err(error),
        }
    }
}

/// What [`invoke`] did with a handler's result.
#[derive(Debug, PartialEq)]
pub enum Outcome<T> {
    /// The handler produced no computation.
    Absent,
    /// The computation had already resolved.
    Ready(T),
    /// The actor is now awaiting the computation.
    Pending,
}

/// An actor that can take the result of its own deferred computations.
#[async_trait]
pub trait Resumable<T>: Actor + Handler<Self>
where
    T: Send + Sync + 'static,
{
    /// Applies a settled computation. Runs on the actor's task with the stash already
    /// released; the released messages are handled after this returns. The returned
    /// value answers the `ask` that started the computation, if any.
    async fn resume(
        &mut self,
        completion: Completion<T>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<Self::Response, Error>;
}

/// Epoch bookkeeping of the outstanding computation.
#[derive(Debug, Default)]
pub(crate) struct Suspension {
    awaiting: Option<u64>,
    last_epoch: u64,
}

impl Suspension {
    /// Starts a wait and returns its epoch.
    pub(crate) fn begin(&mut self) -> u64 {
        self.last_epoch += 1;
        self.awaiting = Some(self.last_epoch);
        self.last_epoch
    }

    pub(crate) fn is_awaiting(&self) -> bool {
        self.awaiting.is_some()
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.awaiting == Some(epoch)
    }

    pub(crate) fn finish(&mut self) {
        self.awaiting = None;
    }

    /// Abandons the current wait. Epochs keep growing.
    pub(crate) fn reset(&mut self) {
        self.awaiting = None;
    }
}

/// Runs the bridge on a handler's deferred computation.
///
/// At most one computation may be outstanding per actor; calling this while awaiting
/// fails with [`Error::Functional`].
pub fn invoke<A, T>(
    ctx: &mut ActorContext<A>,
    deferred: Option<Deferred<T>>,
) -> Result<Outcome<T>, Error>
where
    A: Resumable<T>,
    T: Send + Sync + 'static,
{
    let Some(mut deferred) = deferred else {
        return Ok(Outcome::Absent);
    };
    if ctx.is_awaiting() {
        return Err(Error::Functional(format!(
            "actor {} is already awaiting a deferred computation",
            ctx.path()
        )));
    }

    let mut cx = Context::from_waker(noop_waker_ref());
    match deferred.poll_unpin(&mut cx) {
        Poll::Ready(Ok(value)) => {
            debug!("Deferred computation of {} resolved at once.", ctx.path());
            Ok(Outcome::Ready(value))
        }
        Poll::Ready(Err(error)) => {
            debug!("Deferred computation of {} rejected at once.", ctx.path());
            Err(error)
        }
        Poll::Pending => {
            suspend(ctx, deferred)?;
            Ok(Outcome::Pending)
        }
    }
}

fn suspend<A, T>(ctx: &mut ActorContext<A>, deferred: Deferred<T>) -> Result<(), Error>
where
    A: Resumable<T>,
    T: Send + Sync + 'static,
{
    let mailbox = ctx.self_sender().ok_or_else(|| {
        Error::Send(format!("mailbox of actor {} is closed", ctx.path()))
    })?;
    let inner = ctx.inner_sender();
    let path = ctx.path().clone();

    let epoch = ctx.suspension_mut().begin();
    ctx.suspend_mailbox(SuspendReason::AwaitingCompletion);
    debug!("Actor {} is awaiting completion #{}.", path, epoch);

    tokio::spawn(async move {
        let completion = match AssertUnwindSafe(deferred).catch_unwind().await {
            Ok(result) => Completion::from(result),
            Err(panic) => Completion::Failure(Error::Panicked(panic_message(panic))),
        };
        let signal = CompletionSignal::<A, T>::new(path.clone(), epoch, completion);
        if mailbox.send(Box::new(signal)).is_err() {
            debug!("Actor {} is gone. Completion #{} dropped.", path, epoch);
            return;
        }
        if inner.send(InnerAction::Resume(epoch)).is_err() {
            debug!("Actor {} is gone. Resume #{} dropped.", path, epoch);
        }
    });
    Ok(())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Raises `error` as a fault of the actor and gives it back.
pub async fn raise<A>(ctx: &mut ActorContext<A>, error: Error) -> Error
where
    A: Actor + Handler<A>,
{
    if let Err(send_error) = ctx.emit_fail(error.clone()).await {
        error!("Actor {} can not raise {}: {}", ctx.path(), error, send_error);
    }
    error
}

/// Self-addressed envelope carrying a settled computation.
pub(crate) struct CompletionSignal<A, T> {
    sender: ActorPath,
    epoch: u64,
    completion: Option<Completion<T>>,
    _phantom_actor: PhantomData<fn() -> A>,
}

impl<A, T> CompletionSignal<A, T> {
    pub(crate) fn new(sender: ActorPath, epoch: u64, completion: Completion<T>) -> Self {
        Self {
            sender,
            epoch,
            completion: Some(completion),
            _phantom_actor: PhantomData,
        }
    }
}

#[async_trait]
impl<A, T> MessageHandler<A> for CompletionSignal<A, T>
where
    A: Resumable<T>,
    T: Send + Sync + 'static,
{
    async fn handle(&mut self, actor: &mut A, ctx: &mut ActorContext<A>) -> Dispatch {
        if self.sender != *ctx.path() {
            // Only the actor itself may end its wait.
            if ctx.is_awaiting() {
                return Dispatch::Stash;
            }
            warn!(
                "Actor {} discarded a completion signal sent by {}.",
                ctx.path(),
                self.sender
            );
            return Dispatch::Done;
        }
        if !ctx.suspension().is_current(self.epoch) {
            warn!(
                "Actor {} discarded stale completion #{}.",
                ctx.path(),
                self.epoch
            );
            return Dispatch::Done;
        }
        let Some(completion) = self.completion.take() else {
            return Dispatch::Done;
        };

        ctx.suspension_mut().finish();
        ctx.resume_mailbox(SuspendReason::AwaitingCompletion);
        let released = ctx.unstash_all();
        debug!(
            "Actor {} completed #{}. {} message(s) released.",
            ctx.path(),
            self.epoch,
            released
        );

        let result = match actor.resume(completion, ctx).await {
            Ok(response) => Ok(response),
            Err(error) => Err(raise(ctx, error).await),
        };

        // A resume that started another computation keeps the reply parked.
        if !ctx.is_awaiting() {
            if let Some(rsvp) = ctx.take_parked() {
                if rsvp.send(result).is_err() {
                    debug!("Asker of {} is gone.", ctx.path());
                }
            }
        }
        Dispatch::Done
    }

    fn sender(&self) -> &ActorPath {
        &self.sender
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{
        ActorRef, ChildAction, Message, Response, SystemRef,
        handler::MailboxSender,
        supervision::{NoIntervalStrategy, Strategy, SupervisionStrategy},
    };

    use futures::future;
    use tokio::sync::{mpsc, oneshot};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    type Gate = oneshot::Receiver<Result<u32, Error>>;

    /// Accumulates values. `Load` waits on a gate so tests control when it settles.
    struct Loader {
        log: Arc<Mutex<Vec<String>>>,
        gates: Arc<Mutex<Vec<Gate>>>,
        mailbox: Arc<Mutex<Option<MailboxSender<Loader>>>>,
        total: u32,
    }

    #[derive(Clone)]
    enum Command {
        Ready(u32),
        Reject,
        Load,
        Crash,
        Record(&'static str),
        Total,
        Capture,
        Arm,
    }

    impl Message for Command {}

    #[derive(Debug, Clone, PartialEq)]
    struct Total(u32);

    impl Response for Total {}

    #[async_trait]
    impl Actor for Loader {
        type Message = Command;
        type Event = ();
        type Response = Total;

        fn supervision_strategy() -> SupervisionStrategy {
            SupervisionStrategy::Retry(Strategy::NoInterval(
                NoIntervalStrategy::new(3),
            ))
        }

        async fn pre_restart(
            &mut self,
            _ctx: &mut ActorContext<Self>,
            _error: Option<&Error>,
        ) -> Result<(), Error> {
            self.total = 0;
            self.log.lock().unwrap().push("restart".to_owned());
            Ok(())
        }
    }

    impl Loader {
        fn deferred(&mut self, command: &Command) -> Option<Deferred<u32>> {
            match command {
                Command::Ready(value) => {
                    Some(future::ready(Ok(*value)).boxed())
                }
                Command::Reject => Some(
                    future::ready(Err(Error::Functional("rejected".to_owned())))
                        .boxed(),
                ),
                Command::Load => {
                    let gate = self.gates.lock().unwrap().remove(0);
                    Some(
                        async move {
                            gate.await
                                .map_err(|e| Error::Functional(e.to_string()))?
                        }
                        .boxed(),
                    )
                }
                Command::Crash => {
                    let crash = true;
                    Some(
                        async move {
                            tokio::task::yield_now().await;
                            if crash {
                                panic!("worker crashed");
                            }
                            Ok::<u32, Error>(0)
                        }
                        .boxed(),
                    )
                }
                _ => None,
            }
        }
    }

    #[async_trait]
    impl Handler<Loader> for Loader {
        async fn handle_message(
            &mut self,
            _sender: ActorPath,
            msg: Command,
            ctx: &mut ActorContext<Loader>,
        ) -> Result<Total, Error> {
            match msg {
                Command::Record(label) => {
                    self.log.lock().unwrap().push(label.to_owned());
                }
                Command::Capture => {
                    *self.mailbox.lock().unwrap() = ctx.self_sender();
                }
                Command::Total => {}
                Command::Arm => {
                    ctx.create_child("fuse", Fuse).await?;
                }
                command => match invoke(ctx, self.deferred(&command)) {
                    Ok(Outcome::Ready(value)) => self.total += value,
                    Ok(_) => {}
                    Err(error) => return Err(raise(ctx, error).await),
                },
            }
            Ok(Total(self.total))
        }

        async fn on_child_fault(
            &mut self,
            error: Error,
            ctx: &mut ActorContext<Loader>,
        ) -> ChildAction {
            // A faulty child faults its parent too.
            if let Err(send_error) = ctx.emit_fail(error).await {
                self.log.lock().unwrap().push(send_error.to_string());
            }
            ChildAction::Stop
        }
    }

    /// Child that faults on every message.
    struct Fuse;

    #[derive(Debug, Clone)]
    struct Blow;

    impl Message for Blow {}

    #[async_trait]
    impl Actor for Fuse {
        type Message = Blow;
        type Event = ();
        type Response = ();
    }

    #[async_trait]
    impl Handler<Fuse> for Fuse {
        async fn handle_message(
            &mut self,
            _sender: ActorPath,
            _msg: Blow,
            ctx: &mut ActorContext<Fuse>,
        ) -> Result<(), Error> {
            let error = Error::Functional("blown".to_owned());
            Err(raise(ctx, error).await)
        }
    }

    #[async_trait]
    impl Resumable<u32> for Loader {
        async fn resume(
            &mut self,
            completion: Completion<u32>,
            _ctx: &mut ActorContext<Loader>,
        ) -> Result<Total, Error> {
            let value = Result::from(completion)?;
            self.total += value;
            self.log.lock().unwrap().push(format!("loaded {}", value));
            Ok(Total(self.total))
        }
    }

    struct Fixture {
        system: SystemRef,
        actor: ActorRef<Loader>,
        log: Arc<Mutex<Vec<String>>>,
        mailbox: Arc<Mutex<Option<MailboxSender<Loader>>>>,
        gates: Vec<oneshot::Sender<Result<u32, Error>>>,
    }

    impl Fixture {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        /// Starts a `Load` and waits until the actor is suspended on it.
        async fn load(&self) -> tokio::task::JoinHandle<Result<Total, Error>> {
            let actor = self.actor.clone();
            let load = tokio::spawn(async move { actor.ask(Command::Load).await });
            settle().await;
            load
        }
    }

    async fn fixture(name: &str, loads: usize) -> Fixture {
        let (event_sender, _) = mpsc::channel(10);
        let system = SystemRef::new(event_sender, CancellationToken::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mailbox = Arc::new(Mutex::new(None));
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..loads).map(|_| oneshot::channel()).unzip();
        let actor = system
            .create_root_actor(
                name,
                Loader {
                    log: log.clone(),
                    gates: Arc::new(Mutex::new(receivers)),
                    mailbox: mailbox.clone(),
                    total: 0,
                },
            )
            .await
            .unwrap();
        Fixture {
            system,
            actor,
            log,
            mailbox,
            gates: senders,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    fn forged(sender: &str, epoch: u64) -> Box<CompletionSignal<Loader, u32>> {
        Box::new(CompletionSignal::new(
            ActorPath::from(sender),
            epoch,
            Completion::Success(1000),
        ))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_resolved_computation_never_suspends() {
        let fixture = fixture("ready", 0).await;
        assert_eq!(fixture.actor.ask(Command::Ready(2)).await.unwrap(), Total(2));
        assert_eq!(fixture.actor.ask(Command::Ready(3)).await.unwrap(), Total(5));
        assert!(logs_contain("Deferred computation of /user/ready resolved at once"));
        assert!(!logs_contain("is awaiting completion"));
        assert!(!logs_contain("Stashing message"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_absent_computation_is_a_noop() {
        let fixture = fixture("absent", 0).await;
        fixture.actor.tell(Command::Record("first")).await.unwrap();
        assert_eq!(fixture.actor.ask(Command::Total).await.unwrap(), Total(0));
        assert_eq!(fixture.log(), vec!["first"]);
        assert!(!logs_contain("Suspending mailbox"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rejected_computation_raises_synchronously() {
        let fixture = fixture("reject", 0).await;
        fixture.actor.tell(Command::Ready(4)).await.unwrap();
        let error = fixture.actor.ask(Command::Reject).await.unwrap_err();
        assert_eq!(error, Error::Functional("rejected".to_owned()));
        // The fault restarted the actor.
        assert_eq!(fixture.actor.ask(Command::Total).await.unwrap(), Total(0));
        assert!(!logs_contain("is awaiting completion"));
        assert_eq!(fixture.log(), vec!["restart"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_pending_computation_keeps_order() {
        let mut fixture = fixture("pending", 1).await;
        let load = fixture.load().await;
        for label in ["m1", "m2", "m3"] {
            fixture.actor.tell(Command::Record(label)).await.unwrap();
        }
        settle().await;
        assert!(!load.is_finished());
        assert!(fixture.log().is_empty());

        fixture.gates.remove(0).send(Ok(7)).unwrap();
        assert_eq!(load.await.unwrap().unwrap(), Total(7));
        assert_eq!(fixture.actor.ask(Command::Total).await.unwrap(), Total(7));
        assert_eq!(fixture.log(), vec!["loaded 7", "m1", "m2", "m3"]);
        assert!(logs_contain("Actor /user/pending is awaiting completion #1"));
        assert!(logs_contain("Actor /user/pending completed #1. 3 message(s) released"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_deferred_failure_raises_after_release() {
        let mut fixture = fixture("failure", 1).await;
        fixture.actor.tell(Command::Ready(1)).await.unwrap();
        let load = fixture.load().await;
        fixture.actor.tell(Command::Record("buffered")).await.unwrap();
        settle().await;

        fixture
            .gates
            .remove(0)
            .send(Err(Error::Functional("disk".to_owned())))
            .unwrap();
        let error = load.await.unwrap().unwrap_err();
        assert_eq!(error, Error::Functional("disk".to_owned()));

        assert_eq!(fixture.actor.ask(Command::Total).await.unwrap(), Total(0));
        // Raised once; the buffered message went away with the restart.
        assert_eq!(fixture.log(), vec!["restart"]);
        assert!(logs_contain("dropped 1 buffered message(s) on restart"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panicking_computation_is_a_failure() {
        let fixture = fixture("crash", 0).await;
        let error = fixture.actor.ask(Command::Crash).await.unwrap_err();
        assert_eq!(error, Error::Panicked("worker crashed".to_owned()));
        assert_eq!(fixture.actor.ask(Command::Total).await.unwrap(), Total(0));
        assert_eq!(fixture.log(), vec!["restart"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stale_and_foreign_signals() {
        let mut fixture = fixture("signals", 1).await;
        fixture.actor.ask(Command::Capture).await.unwrap();
        let mailbox = fixture.mailbox.lock().unwrap().clone().unwrap();

        // Not awaiting: both are discarded.
        assert!(mailbox.send(forged("/user/intruder", 1)).is_ok());
        assert!(mailbox.send(forged("/user/signals", 0)).is_ok());
        assert_eq!(fixture.actor.ask(Command::Total).await.unwrap(), Total(0));
        assert!(logs_contain(
            "Actor /user/signals discarded a completion signal sent by /user/intruder"
        ));
        assert!(logs_contain("Actor /user/signals discarded stale completion #0"));

        // Awaiting: neither ends the wait; the foreign one is buffered.
        let load = fixture.load().await;
        fixture.actor.tell(Command::Record("m1")).await.unwrap();
        assert!(mailbox.send(forged("/user/intruder", 1)).is_ok());
        assert!(mailbox.send(forged("/user/signals", 99)).is_ok());
        settle().await;
        assert!(!load.is_finished());

        fixture.gates.remove(0).send(Ok(3)).unwrap();
        assert_eq!(load.await.unwrap().unwrap(), Total(3));
        assert_eq!(fixture.actor.ask(Command::Total).await.unwrap(), Total(3));
        assert_eq!(fixture.log(), vec!["loaded 3", "m1"]);
        assert!(logs_contain("discarded stale completion #99"));
        assert!(logs_contain("completed #1. 2 message(s) released"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_computation_outliving_a_restart_is_ignored() {
        let mut fixture = fixture("outlived", 2).await;
        fixture.actor.ask(Command::Arm).await.unwrap();
        let fuse = fixture
            .system
            .get_actor::<Fuse>(&ActorPath::from("/user/outlived/fuse"))
            .await
            .unwrap();

        let load = fixture.load().await;
        // Restarted while #1 is outstanding.
        fuse.tell(Blow).await.unwrap();
        settle().await;
        assert!(load.await.unwrap().is_err());
        assert_eq!(fixture.log(), vec!["restart"]);

        fixture.gates.remove(0).send(Ok(50)).unwrap();
        settle().await;
        assert!(logs_contain("Actor /user/outlived ignored resume request #1"));
        assert!(logs_contain("Actor /user/outlived discarded stale completion #1"));
        assert_eq!(fixture.actor.ask(Command::Total).await.unwrap(), Total(0));

        // A new computation takes a new epoch.
        let load = fixture.load().await;
        fixture.gates.remove(0).send(Ok(4)).unwrap();
        assert_eq!(load.await.unwrap().unwrap(), Total(4));
        assert!(logs_contain("Actor /user/outlived completed #2"));
        assert_eq!(fixture.log(), vec!["restart", "loaded 4"]);
    }

    #[test]
    fn test_epochs_grow_across_resets() {
        let mut suspension = Suspension::default();
        let first = suspension.begin();
        assert!(suspension.is_awaiting());
        assert!(suspension.is_current(first));
        suspension.reset();
        assert!(!suspension.is_awaiting());
        let second = suspension.begin();
        assert!(second > first);
        assert!(!suspension.is_current(first));
        suspension.finish();
        assert!(!suspension.is_current(second));
    }
}
