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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::listener::Listener;

/// Owns the set of running listener accept threads and coordinates their
/// shutdown as one unit.
///
/// This stands in for the original's shared `boost::asio::io_service` plus its
/// single driver thread: each `Listener::run` spawns its own blocking
/// accept-loop thread and registers it here; `IoDriver::run` spins up one
/// additional coordination thread that waits for `stop()` and then stops every
/// registered listener in turn. `stop()` drops the "work token" (the running
/// flag) and joins the driver thread.
pub struct IoDriver {
    listeners: Mutex<Vec<Arc<Listener>>>,
    running: Arc<AtomicBool>,
    driver_thread: Mutex<Option<JoinHandle<()>>>,
}

impl IoDriver {
    pub fn new() -> IoDriver {
        IoDriver {
            listeners: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            driver_thread: Mutex::new(None),
        }
    }

    /// Registers a listener that has already started its own accept thread.
    pub fn register(&self, listener: Arc<Listener>) { self.listeners.lock().expect("io driver mutex poisoned").push(listener); }

    /// Spins up the single IO driver thread. Idempotent.
    pub fn run(&self) {
        let mut guard = self.driver_thread.lock().expect("io driver mutex poisoned");
        if guard.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        *guard = Some(thread::Builder::new().name("io-driver".into()).spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::park_timeout(std::time::Duration::from_millis(200));
            }
        }).expect("failed to spawn IO driver thread"));
    }

    /// Stops every registered listener, drops the work token, and joins the
    /// driver thread.
    pub fn stop(&self) {
        for listener in self.listeners.lock().expect("io driver mutex poisoned").drain(..) {
            listener.stop();
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.driver_thread.lock().expect("io driver mutex poisoned").take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Default for IoDriver {
    fn default() -> Self { IoDriver::new() }
}
