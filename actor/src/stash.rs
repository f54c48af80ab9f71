// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Stash
//!
//! Ordered buffer of withheld message envelopes. Envelopes keep their reply channel, so
//! a buffered `ask` is answered when the envelope is finally handled.
//!
//! Unstashing does not dispatch anything by itself: buffered envelopes move, in order,
//! to the front of the replay queue, which the runner drains before it reads the mailbox
//! again. The envelope being handled when `unstash_all` is called always finishes first.
//!

use crate::{
    actor::{Actor, Handler},
    handler::BoxedMessageHandler,
};

use std::collections::VecDeque;

pub(crate) struct Stash<A: Actor + Handler<A>> {
    /// Withheld envelopes, in arrival order.
    buffer: VecDeque<BoxedMessageHandler<A>>,
    /// Envelopes waiting to be dispatched again.
    replay: VecDeque<BoxedMessageHandler<A>>,
    capacity: Option<usize>,
}

impl<A> Stash<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            buffer: VecDeque::new(),
            replay: VecDeque::new(),
            capacity,
        }
    }

    /// Appends an envelope. Gives it back if the stash is full.
    pub(crate) fn push(
        &mut self,
        envelope: BoxedMessageHandler<A>,
    ) -> Result<(), BoxedMessageHandler<A>> {
        match self.capacity {
            Some(capacity) if self.buffer.len() >= capacity => Err(envelope),
            _ => {
                self.buffer.push_back(envelope);
                Ok(())
            }
        }
    }

    /// Moves every buffered envelope ahead of the pending replay queue. Returns how many
    /// envelopes were moved.
    pub(crate) fn unstash_all(&mut self) -> usize {
        let moved = self.buffer.len();
        if moved > 0 {
            self.buffer.append(&mut self.replay);
            std::mem::swap(&mut self.buffer, &mut self.replay);
        }
        moved
    }

    /// Next envelope to dispatch again.
    pub(crate) fn next(&mut self) -> Option<BoxedMessageHandler<A>> {
        self.replay.pop_front()
    }

    /// Drops every buffered and pending envelope. Returns how many were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.buffer.len() + self.replay.len();
        self.buffer.clear();
        self.replay.clear();
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
