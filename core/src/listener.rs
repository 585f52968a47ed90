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
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use net2::TcpBuilder;

use crate::error::CreationError;
use crate::handler::Handler;
use crate::network::{is_forbidden, Network};
use crate::work::SocketWork;

/// One bound TCP address, its ACL policy, and the accept-loop thread that feeds
/// accepted sockets to a named handler.
///
/// ACL verdicts are computed at accept time and carried on the `SocketWork`
/// rather than enforced here: a forbidden connection is still handed to the
/// handler (matching the original's behavior of letting the protocol engine
/// decide how to respond to a forbidden peer, e.g. an HTTP 403) with
/// `SocketWork::forbidden` set.
pub struct Listener {
    name: String,
    bind_address: SocketAddr,
    handler: Mutex<Option<Weak<dyn Handler>>>,
    allow_first: bool,
    allow_nets: Vec<Network>,
    deny_nets: Vec<Network>,
    backlog: i32,
    socket: Mutex<Option<TcpListener>>,
    running: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

pub struct ListenerConfig {
    pub name: String,
    pub bind_address: SocketAddr,
    pub allow_first: bool,
    pub allow_nets: Vec<Network>,
    pub deny_nets: Vec<Network>,
    pub backlog: i32,
    pub reuseaddr: bool,
    pub reuseport: bool,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Result<Arc<Listener>, CreationError> {
        let socket = configure_builder(&config)?;
        Ok(Arc::new(Listener {
            name: config.name,
            bind_address: config.bind_address,
            handler: Mutex::new(None),
            allow_first: config.allow_first,
            allow_nets: config.allow_nets,
            deny_nets: config.deny_nets,
            backlog: config.backlog,
            socket: Mutex::new(Some(socket)),
            running: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn bind_address(&self) -> SocketAddr { self.bind_address }

    pub fn bind_handler(&self, handler: Weak<dyn Handler>) { *self.handler.lock().expect("listener mutex poisoned") = Some(handler); }

    /// Evaluates the ACL for an already-accepted peer address.
    pub fn is_forbidden(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => is_forbidden(v4, self.allow_first, &self.allow_nets, &self.deny_nets),
            // IPv6 peers are always forbidden: the ACL model is IPv4-only by design.
            IpAddr::V6(_) => true,
        }
    }

    /// Spawns the accept-loop thread. The underlying socket is taken out of
    /// `self.socket`, so `run` can only be called once per listener.
    pub fn run(self: &Arc<Self>) -> Result<(), CreationError> {
        let listener = self
            .socket
            .lock()
            .expect("listener mutex poisoned")
            .take()
            .ok_or_else(|| CreationError::invalid(format!("listener '{}' already running", self.name)))?;

        listener
            .set_nonblocking(true)
            .map_err(CreationError::Io)?;

        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-accept", self.name))
            .spawn(move || accept_loop(this, listener))
            .map_err(CreationError::Io)?;
        *self.accept_thread.lock().expect("listener mutex poisoned") = Some(handle);
        Ok(())
    }

    /// Stops accepting new connections. The accept thread notices within one
    /// poll interval and exits.
    pub fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.lock().expect("listener mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: Arc<Listener>, socket: TcpListener) {
    while listener.running.load(Ordering::SeqCst) {
        match socket.accept() {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let forbidden = listener.is_forbidden(peer.ip());
                let handler = match listener
                    .handler
                    .lock()
                    .expect("listener mutex poisoned")
                    .as_ref()
                    .and_then(|h| h.upgrade())
                {
                    Some(h) => h,
                    None => {
                        log::error!("listener {}: no handler bound, dropping connection from {}", listener.name, peer);
                        continue;
                    },
                };
                let work = SocketWork::new(Arc::downgrade(&listener), stream, forbidden);
                handler.enqueue(work);
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            },
            Err(e) => {
                log::error!("listener {}: accept failed: {}", listener.name, e);
            },
        }
    }
}

fn configure_builder(config: &ListenerConfig) -> Result<TcpListener, CreationError> {
    let builder = match config.bind_address {
        SocketAddr::V4(_) => TcpBuilder::new_v4().map_err(CreationError::Io)?,
        SocketAddr::V6(_) => TcpBuilder::new_v6().map_err(CreationError::Io)?,
    };

    if config.reuseaddr {
        builder.reuse_address(true).map_err(CreationError::Io)?;
    }
    #[cfg(unix)]
    if config.reuseport {
        use net2::unix::UnixTcpBuilderExt;
        builder.reuse_port(true).map_err(CreationError::Io)?;
    }

    builder.bind(config.bind_address).map_err(CreationError::Io)?;
    let listener = builder.listen(config.backlog.max(1) as i32).map_err(CreationError::Io)?;
    Ok(listener)
}
