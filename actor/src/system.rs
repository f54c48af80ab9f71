// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! Registry of running actors, keyed by path. Root actors live under `/user`; cancelling
//! the system token stops them (and, through them, their children) in reverse creation
//! order.
//!

use crate::{
    Actor, ActorPath, ActorRef, Error, Event, Handler,
    actor::ChildErrorSender,
    runner::{ActorRunner, StopSender},
    sink::Sink,
};

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use std::{any::Any, collections::HashMap, sync::Arc};

/// Entry point to build an actor system.
pub struct ActorSystem {}

impl ActorSystem {
    /// Creates the system reference and the runner that reports its shutdown.
    pub fn create(token: CancellationToken) -> (SystemRef, SystemRunner) {
        let (event_sender, event_receiver) = mpsc::channel(100);
        let system = SystemRef::new(event_sender, token);
        let runner = SystemRunner::new(event_receiver);
        (system, runner)
    }
}

/// System-wide events.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Every root actor has stopped.
    StopSystem,
}

type ActorRegistry =
    Arc<RwLock<HashMap<ActorPath, Box<dyn Any + Send + Sync + 'static>>>>;

/// Handle to the actor system.
#[derive(Clone)]
pub struct SystemRef {
    actors: ActorRegistry,
    root_senders: Arc<RwLock<Vec<StopSender>>>,
    token: CancellationToken,
}

impl SystemRef {
    pub fn new(
        event_sender: mpsc::Sender<SystemEvent>,
        token: CancellationToken,
    ) -> Self {
        let root_senders = Arc::new(RwLock::new(Vec::<StopSender>::new()));
        let root_sender_clone = root_senders.clone();
        let token_clone = token.clone();

        tokio::spawn(async move {
            token_clone.cancelled().await;
            debug!("Stopping actor system...");
            let mut root_senders = root_sender_clone.write().await;
            while let Some(sender) = root_senders.pop() {
                let (stop_sender, stop_receiver) = oneshot::channel();
                if sender.send(Some(stop_sender)).await.is_ok() {
                    let _ = stop_receiver.await;
                }
            }

            let _ = event_sender.send(SystemEvent::StopSystem).await;
        });

        SystemRef {
            actors: Arc::new(RwLock::new(HashMap::new())),
            token,
            root_senders,
        }
    }

    /// Returns the reference of a running actor.
    pub async fn get_actor<A>(&self, path: &ActorPath) -> Option<ActorRef<A>>
    where
        A: Actor + Handler<A>,
    {
        let actors = self.actors.read().await;
        actors
            .get(path)
            .and_then(|any| any.downcast_ref::<ActorRef<A>>().cloned())
    }

    pub(crate) async fn create_actor_path<A>(
        &self,
        path: ActorPath,
        actor: A,
        parent_error_sender: Option<ChildErrorSender>,
    ) -> Result<(ActorRef<A>, StopSender), Error>
    where
        A: Actor + Handler<A>,
    {
        {
            let actors = self.actors.read().await;
            if actors.contains_key(&path) {
                error!("Actor '{}' already exists!", &path);
                return Err(Error::Exists(path));
            }
        }
        let system = self.clone();
        let (mut runner, actor_ref, stop_sender) =
            ActorRunner::create(path.clone(), actor, parent_error_sender);

        {
            let mut actors = self.actors.write().await;
            actors.insert(path.clone(), Box::new(actor_ref.clone()));
        }
        let (sender, receiver) = oneshot::channel::<bool>();

        let stop_sender_clone = stop_sender.clone();
        tokio::spawn(async move {
            runner.init(system, stop_sender_clone, Some(sender)).await;
        });

        if receiver.await.map_err(|e| Error::Start(e.to_string()))? {
            Ok((actor_ref, stop_sender))
        } else {
            Err(Error::Start(format!("Runner can not init {}", path)))
        }
    }

    /// Creates an actor at `/user/{name}`.
    pub async fn create_root_actor<A>(
        &self,
        name: &str,
        actor: A,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        let path = ActorPath::from("/user") / name;
        let (actor_ref, stop_sender) =
            self.create_actor_path::<A>(path, actor, None).await?;
        let mut senders = self.root_senders.write().await;
        senders.push(stop_sender);
        Ok(actor_ref)
    }

    pub(crate) async fn remove_actor(&self, path: &ActorPath) {
        let mut actors = self.actors.write().await;
        actors.remove(path);
    }

    /// Stops every root actor.
    pub fn stop_system(&self) {
        self.token.cancel();
    }

    /// Runs an event sink on its own task.
    pub async fn run_sink<E>(&self, mut sink: Sink<E>)
    where
        E: Event,
    {
        tokio::spawn(async move {
            sink.run().await;
        });
    }
}

/// Waits for the system to stop.
pub struct SystemRunner {
    event_receiver: mpsc::Receiver<SystemEvent>,
}

impl SystemRunner {
    pub(crate) fn new(event_receiver: mpsc::Receiver<SystemEvent>) -> Self {
        Self { event_receiver }
    }

    pub async fn run(&mut self) {
        debug!("Running actor system...");
        if let Some(SystemEvent::StopSystem) = self.event_receiver.recv().await {
            debug!("Actor system stopped.");
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{ActorContext, Message};

    use async_trait::async_trait;
    use tracing_test::traced_test;

    #[derive(Debug, Clone)]
    struct Idle;

    #[derive(Debug, Clone)]
    struct Noop;

    impl Message for Noop {}

    #[async_trait]
    impl Actor for Idle {
        type Message = Noop;
        type Event = ();
        type Response = ();
    }

    #[async_trait]
    impl Handler<Idle> for Idle {
        async fn handle_message(
            &mut self,
            _sender: ActorPath,
            _msg: Noop,
            _ctx: &mut ActorContext<Idle>,
        ) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stop_actor_system() {
        let token = CancellationToken::new();
        let (system, mut runner) = ActorSystem::create(token.clone());
        let actor_ref = system.create_root_actor("idle", Idle).await.unwrap();

        let handle = tokio::spawn(async move {
            runner.run().await;
        });
        token.cancel();
        handle.await.unwrap();

        assert!(logs_contain("Running actor system..."));
        assert!(logs_contain("Stopping actor system..."));
        assert!(logs_contain("Actor system stopped."));
        assert!(actor_ref.ask(Noop).await.is_err());
        assert!(
            system
                .get_actor::<Idle>(&ActorPath::from("/user/idle"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_duplicated_root_actor() {
        let (system, _runner) = ActorSystem::create(CancellationToken::new());
        system.create_root_actor("idle", Idle).await.unwrap();
        let result = system.create_root_actor("idle", Idle).await;
        assert_eq!(
            result.err(),
            Some(Error::Exists(ActorPath::from("/user/idle")))
        );
    }
}
