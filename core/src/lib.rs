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

//! Core dispatch fabric for ThreadServer-style front ends: listeners, IPv4
//! ACLs, a handler/worker capability model, and a plugin ABI that concrete
//! protocol engines (HTTP, FRPC, dummy echo) plug into.

pub mod config;
pub mod error;
pub mod handler;
pub mod io_driver;
pub mod listener;
pub mod logging;
pub mod network;
pub mod plugin;
pub mod queue;
pub mod server;
pub mod signals;
pub mod supervisor;
pub mod work;

pub use config::Configuration;
pub use error::{CodedError, CreationError};
pub use handler::{Handler, HandlerBase, Worker, WorkerFactory};
pub use listener::{Listener, ListenerConfig};
pub use network::Network;
pub use queue::WorkQueue;
pub use server::Server;
pub use signals::SignalEvent;
pub use work::SocketWork;
