use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result, Violation};
use crate::message::Block;
use crate::piece::Blocks;

/// Outcome of matching an arrived block against the outstanding requests.
#[derive(Debug, PartialEq, Eq)]
pub enum Arrival {
    /// The block answered the oldest request. `backfill` is the request to send in its place.
    Accepted { backfill: Option<Block> },
    /// The block answers a request voided by a choke. It will be requested again.
    Stale,
}

/// Bounded pipeline of block requests, answered in the order they were sent.
#[derive(Debug)]
pub struct RequestWindow {
    depth: usize,
    blocks: Blocks,
    requeued: VecDeque<Block>,
    in_flight: VecDeque<Block>,
    /// Voided requests per block whose late answer has not shown up yet.
    voided: HashMap<Block, usize>,
}

impl RequestWindow {
    pub fn new(blocks: Blocks, depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            blocks,
            requeued: VecDeque::new(),
            in_flight: VecDeque::with_capacity(depth),
            voided: HashMap::new(),
        }
    }

    /// Requests to send so that `depth` of them are outstanding, or as many as are left.
    pub fn fill(&mut self) -> Vec<Block> {
        let mut requests = Vec::new();
        while self.in_flight.len() < self.depth {
            match self.next_block() {
                Some(block) => {
                    self.in_flight.push_back(block);
                    requests.push(block);
                }
                None => break,
            }
        }
        requests
    }

    pub fn on_block_arrived(&mut self, block: &Block) -> Result<Arrival> {
        match self.in_flight.front().copied() {
            Some(expected) if expected == *block => {
                self.in_flight.pop_front();
                let backfill = self.next_block();
                self.in_flight.extend(backfill);
                Ok(Arrival::Accepted { backfill })
            }
            _ if self.take_voided(block) => Ok(Arrival::Stale),
            Some(expected) => Err(Error::OrderingViolation(Violation::UnexpectedBlock {
                expected,
                actual: *block,
            })),
            None => Err(Error::OrderingViolation(Violation::Unsolicited(*block))),
        }
    }

    /// Voids every outstanding request. They are requeued in order ahead of fresh blocks.
    pub fn on_connection_choked(&mut self) -> usize {
        let voided = self.in_flight.len();
        for block in self.in_flight.drain(..).rev() {
            *self.voided.entry(block).or_default() += 1;
            self.requeued.push_front(block);
        }
        voided
    }

    /// Number of requests sent and not answered yet.
    pub fn outstanding(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of blocks that still need to be requested.
    pub fn unrequested(&self) -> usize {
        self.requeued.len() + self.blocks.len()
    }

    pub fn is_drained(&self) -> bool {
        self.outstanding() == 0 && self.unrequested() == 0
    }

    /// Accounts for one late answer to a voided request of `block`.
    fn take_voided(&mut self, block: &Block) -> bool {
        let Some(count) = self.voided.get_mut(block) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.voided.remove(block);
        }
        true
    }

    fn next_block(&mut self) -> Option<Block> {
        self.requeued.pop_front().or_else(|| self.blocks.next())
    }
}
