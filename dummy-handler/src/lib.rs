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

//! A minimal handler that reads a request up to its blank line and replies
//! with a fixed "Hello World!" response. Used as a smoke test for the
//! listener/handler/worker plumbing and as the reference plugin implementation.
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;

use threadserver_core::{Handler, HandlerBase, SocketWork, Worker, WorkerFactory};

pub struct DummyHandler {
    base: HandlerBase,
}

impl DummyHandler {
    pub fn new(name: impl Into<String>, worker_count: usize) -> Arc<DummyHandler> {
        let name = name.into();
        log::info!("[dummy] creating handler {}", name);
        Arc::new(DummyHandler { base: HandlerBase::new(name, worker_count) })
    }
}

impl Handler for DummyHandler {
    fn name(&self) -> &str { self.base.name() }

    fn enqueue(&self, work: SocketWork) { self.base.enqueue(work); }

    fn create_workers(&self) {
        let factory: Arc<dyn WorkerFactory> = Arc::new(DummyWorkerFactory);
        self.base.create_workers(factory);
    }

    fn destroy_workers(&self) {
        log::info!("[dummy] destroying workers");
        self.base.destroy_workers();
    }
}

struct DummyWorkerFactory;

impl WorkerFactory for DummyWorkerFactory {
    fn create_worker(&self) -> Box<dyn Worker> {
        log::info!("[dummy] creating worker");
        Box::new(DummyWorker)
    }
}

struct DummyWorker;

impl Worker for DummyWorker {
    fn handle(&mut self, mut work: SocketWork) -> io::Result<()> {
        let mut reader = BufReader::new(work.socket().try_clone()?);
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(10));

        let body = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nHello World!\r\n";
        work.socket_mut().write_all(body.as_bytes())
    }
}

impl Drop for DummyWorker {
    fn drop(&mut self) { log::info!("[dummy] destroying worker"); }
}

mod abi {
    use std::ffi::CStr;
    use std::sync::Arc;

    use threadserver_core::Handler;
    use threadserver_core::plugin::{HandlerConfig, PluginDescriptor, PLUGIN_ABI_VERSION};

    #[no_mangle]
    pub unsafe extern "C" fn threadserver_plugin_entry() -> PluginDescriptor {
        PluginDescriptor { abi_version: PLUGIN_ABI_VERSION, create }
    }

    unsafe extern "C" fn create(name: *const libc::c_char, worker_count: usize, _config: *const HandlerConfig) -> *mut dyn Handler {
        let name = CStr::from_ptr(name).to_string_lossy().into_owned();
        let handler = super::DummyHandler::new(name, worker_count);
        Arc::into_raw(handler as Arc<dyn Handler>) as *mut dyn Handler
    }
}
