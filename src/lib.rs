//! Core library for the Rush async actors.
//! Re-exports the actor runtime and the deferred handling built on it: async actors,
//! multi-handler actors and state machines whose handlers may wait on deferred work
//! without blocking their actor.

pub use actor::{
    Actor, ActorContext, ActorPath, ActorRef, ActorSystem, AnyMessage,
    AsyncActor, AsyncBehavior, AsyncReceive, ChildAction, Completion,
    Declaration, Deferred, Error as ActorError, Event, ExponentialBackoffStrategy,
    FixedIntervalStrategy, Fsm, FsmBehavior, Handler, Message,
    NoIntervalStrategy, Outcome, Receive, ReceiveActor, ReceiveBehavior,
    Response, Resumable, RetryStrategy, Routed, Sink, Snapshot, StateEvent,
    StateHandler, StateTransition, Strategy, Subscriber, SupervisionStrategy,
    SystemEvent, SystemRef, SystemRunner, Transition, invoke, raise,
};
