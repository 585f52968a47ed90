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
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A FIFO of work items with a terminal "finished" state.
///
/// While open, `enqueue` always succeeds and `dequeue` blocks on an empty queue
/// until an item arrives or the queue finishes. Once `finish()` is called the
/// queue never reopens; further `enqueue` calls are dropped, and `dequeue` drains
/// whatever remains before returning `None` for good. Producers never block on
/// consumer availability, only on the internal mutex.
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    finished: bool,
}

impl<T> WorkQueue<T> {
    pub fn new() -> WorkQueue<T> {
        WorkQueue {
            state: Mutex::new(State { items: VecDeque::new(), finished: false }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes an item onto the queue. A no-op once the queue has finished.
    pub fn enqueue(&self, item: T) {
        let mut state = self.state.lock().expect("work queue mutex poisoned");
        if state.finished {
            return;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Blocks until an item is available or the queue finishes. Returns `None`
    /// only once the queue is finished and drained.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.state.lock().expect("work queue mutex poisoned");
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.finished {
                return None;
            }
            state = self.not_empty.wait(state).expect("work queue mutex poisoned");
        }
    }

    /// Marks the queue finished and wakes every waiting consumer. Idempotent.
    pub fn finish(&self) {
        let mut state = self.state.lock().expect("work queue mutex poisoned");
        state.finished = true;
        self.not_empty.notify_all();
    }

    pub fn is_finished(&self) -> bool { self.state.lock().expect("work queue mutex poisoned").finished }

    pub fn len(&self) -> usize { self.state.lock().expect("work queue mutex poisoned").items.len() }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self { WorkQueue::new() }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q: WorkQueue<i32> = WorkQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), Some(3));
    }

    #[test]
    fn finish_drains_then_ends() {
        let q: WorkQueue<i32> = WorkQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.finish();
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn enqueue_after_finish_is_noop() {
        let q: WorkQueue<i32> = WorkQueue::new();
        q.finish();
        q.enqueue(42);
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn never_reopens() {
        let q: WorkQueue<i32> = WorkQueue::new();
        q.finish();
        assert!(q.is_finished());
        q.enqueue(1);
        assert!(q.is_finished());
    }

    #[test]
    fn blocking_dequeue_wakes_on_enqueue() {
        let q = Arc::new(WorkQueue::<i32>::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.dequeue());
        thread::sleep(Duration::from_millis(50));
        q.enqueue(7);
        assert_eq!(handle.join().unwrap(), Some(7));
    }

    #[test]
    fn blocking_dequeue_wakes_on_finish() {
        let q = Arc::new(WorkQueue::<i32>::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.dequeue());
        thread::sleep(Duration::from_millis(50));
        q.finish();
        assert_eq!(handle.join().unwrap(), None);
    }
}
