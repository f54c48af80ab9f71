// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests for async actors.

use actor::{
    Actor, ActorContext, ActorPath, ActorSystem, AsyncActor, AsyncBehavior,
    ChildAction, Deferred, Error, Handler, Message, NoIntervalStrategy,
    Strategy, SupervisionStrategy,
};
use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use tracing_test::traced_test;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

type Source = watch::Receiver<Option<Result<u32, Error>>>;
type Probe = Arc<Mutex<Vec<String>>>;

// Counter whose initial value is loaded by a deferred computation.
pub struct Counter {
    value: u32,
    source: Source,
    probe: Probe,
}

#[derive(Debug, Clone)]
pub enum Command {
    Load,
    Add(u32),
}

impl Message for Command {}

fn load(mut source: Source) -> Deferred<u32> {
    async move {
        let loaded = source
            .wait_for(Option::is_some)
            .await
            .map_err(|e| Error::Functional(e.to_string()))?
            .clone();
        loaded.unwrap_or_else(|| Err(Error::Functional("no value".to_owned())))
    }
    .boxed()
}

#[async_trait]
impl AsyncBehavior for Counter {
    type Message = Command;
    type Event = ();
    type Output = u32;

    fn supervision_strategy() -> SupervisionStrategy {
        SupervisionStrategy::Retry(Strategy::NoInterval(
            NoIntervalStrategy::new(3),
        ))
    }

    async fn pre_restart(
        &mut self,
        _ctx: &mut ActorContext<AsyncActor<Self>>,
        _error: Option<&Error>,
    ) -> Result<(), Error> {
        self.value = 0;
        self.probe.lock().unwrap().push("restarted".to_owned());
        Ok(())
    }

    async fn receive(
        &mut self,
        _sender: &ActorPath,
        msg: Command,
        _ctx: &mut ActorContext<AsyncActor<Self>>,
    ) -> Result<Option<Deferred<u32>>, Error> {
        match msg {
            Command::Load => Ok(Some(load(self.source.clone()))),
            Command::Add(n) => {
                self.value += n;
                self.probe
                    .lock()
                    .unwrap()
                    .push(format!("add {} = {}", n, self.value));
                Ok(None)
            }
        }
    }

    async fn complete(
        &mut self,
        output: u32,
        _ctx: &mut ActorContext<AsyncActor<Self>>,
    ) -> Result<(), Error> {
        self.value = output;
        self.probe.lock().unwrap().push(format!("loaded {}", output));
        Ok(())
    }
}

// Same counter with a stash of one message.
pub struct Narrow(Counter);

#[async_trait]
impl AsyncBehavior for Narrow {
    type Message = Command;
    type Event = ();
    type Output = u32;

    fn stash_capacity() -> Option<usize> {
        Some(1)
    }

    async fn receive(
        &mut self,
        _sender: &ActorPath,
        msg: Command,
        _ctx: &mut ActorContext<AsyncActor<Self>>,
    ) -> Result<Option<Deferred<u32>>, Error> {
        match msg {
            Command::Load => Ok(Some(load(self.0.source.clone()))),
            Command::Add(n) => {
                self.0.value += n;
                self.0.probe.lock().unwrap().push(format!("add {}", n));
                Ok(None)
            }
        }
    }

    async fn complete(
        &mut self,
        output: u32,
        _ctx: &mut ActorContext<AsyncActor<Self>>,
    ) -> Result<(), Error> {
        self.0.value = output;
        self.0.probe.lock().unwrap().push(format!("loaded {}", output));
        Ok(())
    }
}

// Parent recording the faults of its counter.
pub struct Supervisor {
    source: Source,
    probe: Probe,
    faults: Arc<Mutex<Vec<Error>>>,
}

#[derive(Debug, Clone)]
pub struct Ping;

impl Message for Ping {}

#[async_trait]
impl Actor for Supervisor {
    type Message = Ping;
    type Event = ();
    type Response = ();

    async fn pre_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        let counter = Counter {
            value: 0,
            source: self.source.clone(),
            probe: self.probe.clone(),
        };
        ctx.create_child("counter", AsyncActor::new(counter)).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler<Supervisor> for Supervisor {
    async fn handle_message(
        &mut self,
        _sender: ActorPath,
        _msg: Ping,
        _ctx: &mut ActorContext<Supervisor>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn on_child_fault(
        &mut self,
        error: Error,
        _ctx: &mut ActorContext<Supervisor>,
    ) -> ChildAction {
        self.faults.lock().unwrap().push(error);
        ChildAction::Stop
    }
}

fn counter(source: Source, probe: &Probe) -> AsyncActor<Counter> {
    AsyncActor::new(Counter {
        value: 0,
        source,
        probe: probe.clone(),
    })
}

#[tokio::test]
#[traced_test]
async fn test_lazy_initial_state_keeps_message_order() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (value, source) = watch::channel(None);
    let probe = Probe::default();
    let actor = system
        .create_root_actor("lazy", counter(source, &probe))
        .await
        .unwrap();

    actor.tell(Command::Load).await.unwrap();
    for n in 1..=3 {
        actor.tell(Command::Add(n)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(probe.lock().unwrap().is_empty());

    value.send(Some(Ok(42))).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        *probe.lock().unwrap(),
        vec!["loaded 42", "add 1 = 43", "add 2 = 45", "add 3 = 48"]
    );
}

#[tokio::test]
#[traced_test]
async fn test_consecutive_plain_messages_are_not_buffered() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (_value, source) = watch::channel(None);
    let probe = Probe::default();
    let actor = system
        .create_root_actor("plain", counter(source, &probe))
        .await
        .unwrap();

    actor.ask(Command::Add(1)).await.unwrap();
    actor.ask(Command::Add(2)).await.unwrap();
    assert_eq!(*probe.lock().unwrap(), vec!["add 1 = 1", "add 2 = 3"]);
}

#[tokio::test]
#[traced_test]
async fn test_ask_is_answered_on_completion() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (value, source) = watch::channel(None);
    let probe = Probe::default();
    let actor = system
        .create_root_actor("asked", counter(source, &probe))
        .await
        .unwrap();

    let asker = actor.clone();
    let load = tokio::spawn(async move { asker.ask(Command::Load).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!load.is_finished());

    value.send(Some(Ok(7))).unwrap();
    load.await.unwrap().unwrap();
    assert_eq!(*probe.lock().unwrap(), vec!["loaded 7"]);
}

#[tokio::test]
#[traced_test]
async fn test_deferred_failure_restarts_and_drops_buffered_messages() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (value, source) = watch::channel(None);
    let probe = Probe::default();
    let actor = system
        .create_root_actor("failing", counter(source, &probe))
        .await
        .unwrap();

    let asker = actor.clone();
    let load = tokio::spawn(async move { asker.ask(Command::Load).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    actor.tell(Command::Add(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    value
        .send(Some(Err(Error::Functional("disk gone".to_owned()))))
        .unwrap();
    assert_eq!(
        load.await.unwrap().unwrap_err(),
        Error::Functional("disk gone".to_owned())
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*probe.lock().unwrap(), vec!["restarted"]);

    // Fresh state after the restart.
    actor.ask(Command::Add(1)).await.unwrap();
    assert_eq!(*probe.lock().unwrap(), vec!["restarted", "add 1 = 1"]);
}

#[tokio::test]
#[traced_test]
async fn test_child_deferred_failure_reaches_parent() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (value, source) = watch::channel(None);
    let probe = Probe::default();
    let faults = Arc::new(Mutex::new(Vec::new()));
    let _parent = system
        .create_root_actor(
            "supervisor",
            Supervisor {
                source,
                probe: probe.clone(),
                faults: faults.clone(),
            },
        )
        .await
        .unwrap();
    let child = system
        .get_actor::<AsyncActor<Counter>>(&ActorPath::from(
            "/user/supervisor/counter",
        ))
        .await
        .unwrap();

    child.tell(Command::Load).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    value
        .send(Some(Err(Error::Functional("disk gone".to_owned()))))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        *faults.lock().unwrap(),
        vec![Error::Functional("disk gone".to_owned())]
    );
    assert!(child.is_closed());
    assert!(probe.lock().unwrap().is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_stash_overflow_is_a_fault() {
    let (system, _runner) = ActorSystem::create(CancellationToken::new());
    let (value, source) = watch::channel(None);
    let probe = Probe::default();
    let actor = system
        .create_root_actor(
            "narrow",
            AsyncActor::new(Narrow(Counter {
                value: 0,
                source,
                probe: probe.clone(),
            })),
        )
        .await
        .unwrap();

    actor.tell(Command::Load).await.unwrap();
    actor.tell(Command::Add(1)).await.unwrap();
    actor.tell(Command::Add(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    value.send(Some(Ok(1))).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Full stash faults the actor before the load completes.
    assert!(actor.is_closed());
    assert!(probe.lock().unwrap().is_empty());
}
