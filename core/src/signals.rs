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
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use chan_signal::Signal;

/// The events the signal thread reports to the main supervision loop.
pub enum SignalEvent {
    /// SIGTERM/SIGINT: stop the server.
    Stop,
    /// SIGHUP/SIGUSR1: reopen log files.
    ReopenLogs,
    /// SIGCHLD: a child process exited; the supervisor should reap it.
    ChildExited,
}

/// Installs the signal handler thread.
///
/// Must run before any other thread is spawned in the *final* process: signal
/// masks are inherited by child threads, and `chan_signal::notify` needs to
/// claim the signals before anything else touches them. Only the calling
/// thread survives `fork()`, so when daemonizing this has to be called after
/// `supervisor::detach()`/`supervisor::supervise()` have produced the final
/// worker process, not before -- a thread spawned pre-fork is simply gone in
/// the child, leaving `signals.recv()` with no producer.
pub fn install() -> Receiver<SignalEvent> {
    let signals = chan_signal::notify(&[Signal::INT, Signal::TERM, Signal::HUP, Signal::USR1, Signal::CHLD]);
    let (tx, rx): (SyncSender<SignalEvent>, Receiver<SignalEvent>) = sync_channel(16);

    thread::Builder::new()
        .name("signal-handler".into())
        .spawn(move || run(signals, tx))
        .expect("failed to spawn signal handler thread");

    rx
}

fn run(signals: chan::Receiver<Signal>, tx: SyncSender<SignalEvent>) {
    loop {
        let signal = match signals.recv() {
            Some(signal) => signal,
            None => break,
        };
        log::info!("[core] signal received: {:?}", signal);

        let event = match signal {
            Signal::INT | Signal::TERM => Some(SignalEvent::Stop),
            Signal::HUP | Signal::USR1 => Some(SignalEvent::ReopenLogs),
            Signal::CHLD => Some(SignalEvent::ChildExited),
            _ => None,
        };

        if let Some(event) = event {
            let stop = matches!(event, SignalEvent::Stop);
            if tx.send(event).is_err() {
                break;
            }
            if stop {
                break;
            }
        }
    }
}
