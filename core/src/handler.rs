// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::queue::WorkQueue;
use crate::work::SocketWork;

/// Per-thread hooks a handler's worker runs around each dequeued item.
///
/// `handle` does the actual protocol work for one connection and reports only
/// genuine I/O failures (broken pipe, reset, timeout); protocol-level and
/// user-code errors are expected to be caught and turned into an error response
/// inside `handle` itself. Implementations own whatever per-thread state (method
/// registries, RPC adapters, module hooks) their protocol needs -- it is never
/// shared across workers. The factory's `create_worker`/the returned worker's
/// `Drop` impl are the per-thread init/teardown hooks.
pub trait Worker: Send {
    fn handle(&mut self, work: SocketWork) -> io::Result<()>;
}

/// What a concrete handler (HTTP, FRPC, dummy echo, ...) must provide to plug
/// into the worker-pool lifecycle that `HandlerBase` runs.
pub trait WorkerFactory: Send + Sync {
    /// Called once per worker thread, after the logging prefix is set, before
    /// the thread enters its dequeue loop. This is the per-thread init hook.
    fn create_worker(&self) -> Box<dyn Worker>;
}

/// Shared lifecycle for every handler: a named worker pool draining a FIFO work
/// queue. Concrete handlers (`DummyHandler`, `HttpHandler`, `FrpcHandler`) embed
/// one of these and delegate `enqueue`/`create_workers`/`destroy_workers` to it.
pub struct HandlerBase {
    name: String,
    worker_count: usize,
    queue: Arc<WorkQueue<SocketWork>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl HandlerBase {
    pub fn new(name: impl Into<String>, worker_count: usize) -> HandlerBase {
        HandlerBase {
            name: name.into(),
            worker_count,
            queue: Arc::new(WorkQueue::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn enqueue(&self, work: SocketWork) { self.queue.enqueue(work); }

    /// Spawns `worker_count` threads, each running `factory.create_worker()`
    /// once and then looping dequeue -> handle until the queue finishes. Must
    /// be called only after the process has forked into its final pid, since
    /// worker threads do not survive a subsequent `fork()`.
    pub fn create_workers(&self, factory: Arc<dyn WorkerFactory>) {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        for _ in 0..self.worker_count {
            let queue = self.queue.clone();
            let factory = factory.clone();
            let name = self.name.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker", name))
                .spawn(move || run_worker(&name, queue, factory))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }
    }

    /// Closes the queue (no more dequeues will block forever) and joins every
    /// worker thread. In-flight drain is not guaranteed beyond what's already
    /// queued at the moment `finish()` takes effect.
    pub fn destroy_workers(&self) {
        self.queue.finish();
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_worker(name: &str, queue: Arc<WorkQueue<SocketWork>>, factory: Arc<dyn WorkerFactory>) {
    let pid = std::process::id();
    let tid = format!("{:?}", thread::current().id());
    let prefix = format!("{}[{}:{}]", name, pid, tid);
    slog_scope::scope(&slog_scope::logger().new(slog::o!("worker" => prefix.clone())), || {
        let mut worker = factory.create_worker();
        loop {
            let work = match queue.dequeue() {
                Some(work) => work,
                None => break,
            };

            let result = panic::catch_unwind(AssertUnwindSafe(|| worker.handle(work)));
            match result {
                Ok(Ok(())) => {},
                Ok(Err(e)) if is_peer_closed(&e) => {
                    log::debug!("handler {}: connection closed by peer: {}", prefix, e);
                },
                Ok(Err(e)) => {
                    log::error!("handler {} thrown an error: {}", prefix, e);
                },
                Err(panic) => {
                    let message = panic_message(&panic);
                    log::error!("handler {} panicked: {}", prefix, message);
                },
            }
        }
    });
}

fn is_peer_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Top-level trait the server root holds heterogeneous handlers behind. Mirrors
/// the distilled spec's `HandlerCapability { createWorker, enqueue }`.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;
    fn enqueue(&self, work: SocketWork);
    fn create_workers(&self);
    fn destroy_workers(&self);
}
