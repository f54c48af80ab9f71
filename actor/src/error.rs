// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::ActorPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor system.
///
/// The type is `Clone` so that a failure produced by a deferred computation on a worker
/// task can be carried back to the actor and re-raised with the same value.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An error occurred while sending a message to an actor.
    #[error("An error occurred while sending a message to actor: {0}.")]
    Send(String),
    /// An error occurred while creating an actor.
    #[error("An error occurred while creating an actor.")]
    Create,
    /// The actor already exists.
    #[error("Actor {0} exist.")]
    Exists(ActorPath),
    /// An error occurred while stopping an actor.
    #[error("An error occurred while stopping an actor.")]
    Stop,
    /// An error occurred while starting an actor.
    #[error("An error occurred while starting an actor: {0}.")]
    Start(String),
    /// An error occurred while sending an event to the event bus.
    #[error("An error occurred while sending an event to event bus: {0}.")]
    SendEvent(String),
    /// The stash of the actor is full.
    #[error("Stash of actor {0} is full.")]
    StashOverflow(ActorPath),
    /// No route is registered for the message type.
    #[error("Unhandled message of type {0}.")]
    Unhandled(String),
    /// The state machine was declared or driven inconsistently.
    #[error("State machine error: {0}")]
    Fsm(String),
    /// A deferred computation panicked before settling.
    #[error("Deferred computation panicked: {0}")]
    Panicked(String),
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
}
