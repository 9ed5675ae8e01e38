//! The simulation kernel: actor arena, event queue, and dispatch loop.
//!
//! Actors are owned by the simulator in a dense arena and addressed by
//! [`ActorId`]. Handlers never hold references to other actors; all
//! interaction goes through events scheduled via [`Context`].
//!
//! Dispatch drains the queue in batches that share one `(tick, epsilon)`
//! key. Within a batch, events are grouped per actor and the groups may run
//! in parallel on worker threads; events bound to one actor always run
//! serially, in insertion order. Follow-up events are merged back in
//! ascending actor order, so a run is bit-identical for every thread count.

use std::collections::{BTreeMap, BinaryHeap};
use std::thread;

use tracing::info;

use crate::event::{ActorId, ScheduledEvent, SequenceNumber};
use crate::time::Time;

/// How many processed events between progress log lines.
const PROGRESS_INTERVAL: u64 = 1_000_000;

/// A simulated actor.
///
/// `Shared` is read-only state visible to every handler (it must be `Sync`
/// because handlers of distinct actors may run concurrently).
pub trait Actor: Send {
    type Event: Send;
    type Shared: Sync;

    fn handle(
        &mut self,
        shared: &Self::Shared,
        ctx: &mut Context<'_, Self::Event>,
        event: Self::Event,
    );
}

/// Handler-side view of the simulator.
///
/// Scheduling is the only side effect a handler can have outside its own
/// actor. Every scheduled time must be strictly after [`Context::now`];
/// "immediately after" is expressed with [`Time::plus_eps`].
pub struct Context<'a, E> {
    now: Time,
    self_id: ActorId,
    out: &'a mut Vec<(ActorId, Time, E)>,
}

impl<'a, E> Context<'a, E> {
    fn new(now: Time, self_id: ActorId, out: &'a mut Vec<(ActorId, Time, E)>) -> Self {
        Self { now, self_id, out }
    }

    /// The current virtual time.
    pub fn now(&self) -> Time {
        self.now
    }

    /// The id of the actor whose handler is running.
    pub fn self_id(&self) -> ActorId {
        self.self_id
    }

    /// Schedule an event on another actor (or this one).
    pub fn schedule(&mut self, to: ActorId, time: Time, event: E) {
        assert!(
            time > self.now,
            "event scheduled at or before the current time ({} <= {})",
            time,
            self.now
        );
        self.out.push((to, time, event));
    }

    /// Schedule an event on this actor.
    pub fn schedule_self(&mut self, time: Time, event: E) {
        let id = self.self_id;
        self.schedule(id, time, event);
    }
}

/// Summary of a (partial) simulation run.
#[derive(Debug, Clone, Copy)]
pub struct SimSummary {
    /// Virtual time when the run stopped.
    pub end_time: Time,
    /// Events processed so far, across all runs of this simulator.
    pub events_processed: u64,
}

/// Discrete event simulator over an arena of actors.
pub struct Simulator<A: Actor> {
    /// Actor arena; `None` only transiently while a batch executes.
    actors: Vec<Option<A>>,
    /// State visible to every handler.
    shared: A::Shared,
    /// Pending events, ordered by `(time, seq)`.
    queue: BinaryHeap<ScheduledEvent<A::Event>>,
    /// Current virtual time.
    now: Time,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// Worker threads used per batch.
    threads: usize,
    /// Total events processed.
    events_processed: u64,
    /// Threshold for the next progress log line.
    next_progress: u64,
}

impl<A: Actor> Simulator<A> {
    pub fn new(shared: A::Shared, threads: usize) -> Self {
        assert!(threads >= 1, "at least one worker thread is required");
        Self {
            actors: Vec::new(),
            shared,
            queue: BinaryHeap::new(),
            now: Time::ZERO,
            next_seq: 0,
            threads,
            events_processed: 0,
            next_progress: PROGRESS_INTERVAL,
        }
    }

    /// Add an actor to the arena, returning its id.
    pub fn add_actor(&mut self, actor: A) -> ActorId {
        let id = self.actors.len() as ActorId;
        self.actors.push(Some(actor));
        id
    }

    pub fn shared(&self) -> &A::Shared {
        &self.shared
    }

    pub fn actor(&self, id: ActorId) -> &A {
        self.actors[id as usize].as_ref().expect("actor in flight")
    }

    pub fn actor_mut(&mut self, id: ActorId) -> &mut A {
        self.actors[id as usize].as_mut().expect("actor in flight")
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn now(&self) -> Time {
        self.now
    }

    /// Schedule an event from outside any handler (setup code).
    pub fn schedule(&mut self, to: ActorId, time: Time, event: A::Event) {
        assert!(time >= self.now, "event scheduled in the past");
        assert!((to as usize) < self.actors.len(), "unknown actor {to}");
        self.push_event(to, time, event);
    }

    fn push_event(&mut self, to: ActorId, time: Time, event: A::Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.queue.push(ScheduledEvent::new(time, seq, to, event));
    }

    /// Run until the event queue is empty.
    pub fn simulate(&mut self) -> SimSummary {
        while self.step() {}
        SimSummary {
            end_time: self.now,
            events_processed: self.events_processed,
        }
    }

    /// Run until every event at or before `end` has fired.
    pub fn run_until(&mut self, end: Time) -> SimSummary {
        while self.queue.peek().is_some_and(|e| e.time <= end) {
            self.step();
        }
        if self.now < end {
            self.now = end;
        }
        SimSummary {
            end_time: self.now,
            events_processed: self.events_processed,
        }
    }

    /// Execute one `(tick, epsilon)` batch. Returns false when idle.
    fn step(&mut self) -> bool {
        let Some(head) = self.queue.peek() else {
            return false;
        };
        let batch_time = head.time;
        debug_assert!(batch_time >= self.now);
        self.now = batch_time;

        // Group this batch's events per actor; heap pop order keeps each
        // group sorted by sequence number.
        let mut groups: BTreeMap<ActorId, Vec<A::Event>> = BTreeMap::new();
        let mut batch_len = 0u64;
        while self.queue.peek().is_some_and(|e| e.time == batch_time) {
            let ev = self.queue.pop().expect("peeked");
            groups.entry(ev.actor).or_default().push(ev.event);
            batch_len += 1;
        }

        self.dispatch(groups);

        self.events_processed += batch_len;
        if self.events_processed >= self.next_progress {
            info!(
                events = self.events_processed,
                tick = self.now.tick(),
                pending = self.queue.len(),
                "simulation progress"
            );
            self.next_progress += PROGRESS_INTERVAL;
        }
        true
    }

    fn dispatch(&mut self, groups: BTreeMap<ActorId, Vec<A::Event>>) {
        let now = self.now;

        if self.threads == 1 || groups.len() == 1 {
            let mut out = Vec::new();
            for (id, events) in groups {
                let mut actor = self.actors[id as usize]
                    .take()
                    .unwrap_or_else(|| panic!("event for unknown actor {id}"));
                for event in events {
                    let mut ctx = Context::new(now, id, &mut out);
                    actor.handle(&self.shared, &mut ctx, event);
                }
                self.actors[id as usize] = Some(actor);
            }
            for (to, time, event) in out {
                self.push_event(to, time, event);
            }
            return;
        }

        // Parallel path: move each actor and its events into a work item,
        // split the items into contiguous chunks, one scoped thread each.
        // Reinsertion and event merging walk the items in their original
        // (ascending actor id) order, matching the sequential path exactly.
        let mut items: Vec<(ActorId, A, Vec<A::Event>)> = groups
            .into_iter()
            .map(|(id, events)| {
                let actor = self.actors[id as usize]
                    .take()
                    .unwrap_or_else(|| panic!("event for unknown actor {id}"));
                (id, actor, events)
            })
            .collect();

        let workers = self.threads.min(items.len());
        let per_chunk = items.len().div_ceil(workers);
        let mut chunks = Vec::with_capacity(workers);
        while !items.is_empty() {
            let take = per_chunk.min(items.len());
            let rest = items.split_off(take);
            chunks.push(std::mem::replace(&mut items, rest));
        }

        let shared = &self.shared;
        let processed: Vec<Vec<(ActorId, A, Vec<(ActorId, Time, A::Event)>)>> =
            thread::scope(|s| {
                let handles: Vec<_> = chunks
                    .into_iter()
                    .map(|chunk| {
                        s.spawn(move || {
                            chunk
                                .into_iter()
                                .map(|(id, mut actor, events)| {
                                    let mut out = Vec::new();
                                    for event in events {
                                        let mut ctx = Context::new(now, id, &mut out);
                                        actor.handle(shared, &mut ctx, event);
                                    }
                                    (id, actor, out)
                                })
                                .collect()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("worker thread panicked"))
                    .collect()
            });

        for chunk in processed {
            for (id, actor, out) in chunk {
                self.actors[id as usize] = Some(actor);
                for (to, time, event) in out {
                    self.push_event(to, time, event);
                }
            }
        }
    }
}
