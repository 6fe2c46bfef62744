/*
 * Copyright (C) 2026 Argon developers
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use log::{debug, error};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

/// Work executed by the pool, once per dequeued item.
pub trait Handler<T>: Send + Sync {
    fn handle(&self, item: T);
}

impl<T, F> Handler<T> for F
where
    F: Fn(T) + Send + Sync,
{
    fn handle(&self, item: T) {
        self(item)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("invalid pool size: capacity={capacity} workers={workers}")]
    InvalidSize { capacity: usize, workers: usize },

    #[error("pool already started")]
    AlreadyStarted,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn push(&mut self, item: T) -> Result<(), T> {
        if self.count == self.capacity() {
            return Err(item);
        }

        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;

        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }

        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;

        item
    }
}

struct QueueState<T> {
    ring: RingBuffer<T>,
    running: bool,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,

    // signaled once per enqueue, broadcast on shutdown
    not_empty: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // user code never runs while the lock is held, so the state is
        // consistent even if some thread panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded task queue served by a fixed set of worker threads.
///
/// The queue never blocks the producer: `enqueue` fails when the queue is
/// full or shutting down and gives the item back, so the caller decides how
/// to dispose of it. On shutdown, items already queued are all handled
/// before the workers exit.
pub struct WorkerPool<T> {
    shared: Arc<Shared<T>>,
    worker_count: usize,
    workers: Vec<thread::JoinHandle<()>>,
    started: bool,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(capacity: usize, worker_count: usize) -> Result<Self, PoolError> {
        if capacity == 0 || worker_count == 0 {
            return Err(PoolError::InvalidSize {
                capacity,
                workers: worker_count,
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    ring: RingBuffer::new(capacity),
                    running: true,
                }),
                not_empty: Condvar::new(),
            }),
            worker_count,
            workers: Vec::with_capacity(worker_count),
            started: false,
        })
    }

    pub fn start<H>(&mut self, handler: H) -> Result<(), PoolError>
    where
        H: Handler<T> + 'static,
    {
        if self.started {
            return Err(PoolError::AlreadyStarted);
        }

        self.started = true;

        let handler: Arc<dyn Handler<T>> = Arc::new(handler);

        for id in 0..self.worker_count {
            let shared = Arc::clone(&self.shared);
            let handler = Arc::clone(&handler);

            let thread = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || {
                    debug!("worker {}: starting", id);

                    Self::run(id, &shared, &*handler);

                    debug!("worker {}: stopped", id);
                })
                .map_err(PoolError::Spawn)?;

            self.workers.push(thread);
        }

        Ok(())
    }

    pub fn enqueue(&self, item: T) -> Result<(), T> {
        {
            let mut state = self.shared.lock();

            if !state.running {
                return Err(item);
            }

            state.ring.push(item)?;
        }

        self.shared.not_empty.notify_one();

        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    fn run(id: usize, shared: &Shared<T>, handler: &dyn Handler<T>) {
        loop {
            let item = {
                let mut state = shared.lock();

                while state.ring.is_empty() && state.running {
                    state = shared
                        .not_empty
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }

                // empty here means the pool is stopping and fully drained
                match state.ring.pop() {
                    Some(item) => item,
                    None => break,
                }
            };

            if let Err(e) = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(item))) {
                error!("worker {}: handler panicked: {}", id, panic_message(&*e));
            }
        }
    }
}

impl<T> WorkerPool<T> {
    /// Stops admission, lets the workers drain the queue and joins them.
    /// Repeat calls do nothing.
    pub fn shutdown(&mut self) {
        let purged = {
            let mut state = self.shared.lock();

            if !state.running {
                return;
            }

            state.running = false;

            // without workers nothing would ever drain the queue
            let mut purged = Vec::new();
            if !self.started {
                while let Some(item) = state.ring.pop() {
                    purged.push(item);
                }
            }

            purged
        };

        self.shared.not_empty.notify_all();

        if !purged.is_empty() {
            debug!("purged {} queued items", purged.len());
        }

        // dropped outside of the lock
        drop(purged);

        for (id, thread) in self.workers.drain(..).enumerate() {
            if thread.join().is_err() {
                error!("worker {}: thread panicked", id);
            }
        }
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(e: &(dyn Any + Send)) -> &str {
    if let Some(s) = e.downcast_ref::<&str>() {
        s
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
