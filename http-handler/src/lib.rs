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

//! A small HTTP/1.x protocol engine: parses a request off the wire, dispatches
//! it through a per-worker method registry built by a user-supplied module,
//! and writes the response back.

pub mod message;
pub mod mime;
pub mod module;
pub mod params;
pub mod registry;
pub mod status;

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use threadserver_core::{CreationError, Handler, HandlerBase, SocketWork, Worker, WorkerFactory};

pub use message::{Message, Request, Response};
pub use module::Module;
pub use params::Parameters;
pub use registry::{HttpError, Method, MethodRegistry};

pub struct HttpHandlerConfig {
    pub name: String,
    pub worker_count: usize,
    pub module_path: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_line_size: usize,
    pub max_request_size: usize,
}

pub struct HttpHandler {
    base: HandlerBase,
    module: Arc<dyn Module>,
    _loaded: module::LoadedModule,
    read_timeout: Duration,
    write_timeout: Duration,
    max_line_size: usize,
    max_request_size: usize,
}

impl HttpHandler {
    pub fn from_config(config: HttpHandlerConfig) -> Result<Arc<HttpHandler>, CreationError> {
        let filename = module::parse_module_spec(&config.module_path)?;
        let loaded = module::load_module(filename)?;
        log::info!("[http] handler {} module={}", config.name, config.module_path);

        Ok(Arc::new(HttpHandler {
            base: HandlerBase::new(config.name, config.worker_count),
            module: loaded.module.clone(),
            _loaded: loaded,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            max_line_size: config.max_line_size,
            max_request_size: config.max_request_size,
        }))
    }
}

impl Handler for HttpHandler {
    fn name(&self) -> &str { self.base.name() }

    fn enqueue(&self, work: SocketWork) { self.base.enqueue(work); }

    fn create_workers(&self) {
        let factory: Arc<dyn WorkerFactory> = Arc::new(HttpWorkerFactory { handler: unsafe { arc_self(self) } });
        self.base.create_workers(factory);
    }

    fn destroy_workers(&self) { self.base.destroy_workers(); }
}

/// Recovers an `Arc<HttpHandler>` from a `&HttpHandler` known to already live
/// behind one. Sound because every `HttpHandler` this crate constructs comes
/// from `HttpHandler::from_config`, which always hands back an `Arc`; nothing
/// in this crate ever places one on the stack.
unsafe fn arc_self(handler: &HttpHandler) -> Arc<HttpHandler> {
    let ptr = handler as *const HttpHandler;
    Arc::increment_strong_count(ptr);
    Arc::from_raw(ptr)
}

struct HttpWorkerFactory {
    handler: Arc<HttpHandler>,
}

impl WorkerFactory for HttpWorkerFactory {
    fn create_worker(&self) -> Box<dyn Worker> {
        let mut registry = MethodRegistry::new();
        self.handler.module.thread_create(&mut registry);
        Box::new(HttpWorker { handler: self.handler.clone(), registry })
    }
}

struct HttpWorker {
    handler: Arc<HttpHandler>,
    registry: MethodRegistry,
}

impl Drop for HttpWorker {
    fn drop(&mut self) { self.handler.module.thread_destroy(); }
}

impl Worker for HttpWorker {
    fn handle(&mut self, mut work: SocketWork) -> io::Result<()> {
        if work.forbidden {
            return send_forbidden(&self.handler, work.socket_mut());
        }

        let stream = work.socket().try_clone()?;
        stream.set_read_timeout(Some(self.handler.read_timeout))?;
        stream.set_write_timeout(Some(self.handler.write_timeout))?;
        let mut reader = BufReader::new(stream);

        let request = match read_request(&mut reader, self.handler.max_line_size, self.handler.max_request_size) {
            Ok(request) => request,
            Err(BadRequest) => {
                log::warn!("[http] bad request");
                let data = b"HTTP/1.0 400 Bad Request\r\nServer: ThreadServer/HttpHandler Rust\r\n\r\n";
                return work.socket_mut().write_all(data);
            },
        };

        let mut response = Response::for_request(&request);
        response.message.content_type = "text/plain".to_string();

        let mut request = request;
        if !self.registry.dispatch(&mut request, &mut response) {
            response.set_status(404);
            response.message.data = format!(
                "<html><head><title>404 Not Found</title></head><body><h1>404 Not Found</h1>\
                 The requested URL {} was not found on this server.<hr /></body></html>",
                request.unparsed_uri
            )
            .into_bytes();
        } else if response.message.headers.get("Content-Type").is_none() {
            response.message.headers.insert("Content-Type".to_string(), response.message.content_type.clone());
        }

        write_response(work.socket_mut(), &request, &response)
    }
}

struct BadRequest;

fn read_request<R: BufRead>(reader: &mut R, max_line_size: usize, max_request_size: usize) -> Result<Request, BadRequest> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).map_err(|_| BadRequest)?;
    let request_line = request_line.trim_end();
    if request_line.is_empty() || request_line.len() > max_line_size {
        return Err(BadRequest);
    }

    let parts: Vec<&str> = request_line.splitn(3, ' ').collect();
    if parts.len() != 3 {
        return Err(BadRequest);
    }
    if parts[2] != "HTTP/1.0" && parts[2] != "HTTP/1.1" {
        return Err(BadRequest);
    }

    let mut request = Request::new();
    request.method = parts[0].to_string();
    request.unparsed_uri = parts[1].to_string();
    request.uri = request.unparsed_uri.splitn(2, |c| c == '?' || c == '#').next().unwrap_or("").to_string();
    request.message.protocol = parts[2].to_string();

    loop {
        let mut line = String::new();
        reader.read_line(&mut line).map_err(|_| BadRequest)?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
        let line = line.trim_end();
        if let Some((key, value)) = line.split_once(':') {
            request.message.headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    request.message.content_type = request.message.headers.get("Content-Type").cloned().unwrap_or_else(|| "text/plain".to_string());

    if let Some(length) = request.message.headers.get("Content-Length").and_then(|v| v.parse::<usize>().ok()) {
        if length > max_request_size {
            return Err(BadRequest);
        }
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).map_err(|_| BadRequest)?;
        request.message.data = body;
    }

    Ok(request)
}

fn write_response(stream: &mut impl Write, request: &Request, response: &Response) -> io::Result<()> {
    let status = response.status();
    let reason = status::reason_phrase(status).map(str::to_string).unwrap_or_else(|| {
        if response.status_message.is_empty() { "Unknown".to_string() } else { response.status_message.clone() }
    });

    let mut head = format!("{} {} {}\r\n", response.message.protocol, status, reason);
    for (key, value) in &response.message.headers {
        head.push_str(&format!("{}: {}\r\n", key, value));
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.message.data)?;

    if !response.dont_log {
        let line = format!("{} {} {}", status, request.method, request.unparsed_uri);
        if status / 100 < 4 {
            log::info!("[http] {}", line);
        } else if status / 100 < 5 {
            log::warn!("[http] {}", line);
        } else {
            log::error!("[http] {}", line);
        }
    }

    Ok(())
}

fn send_forbidden(handler: &HttpHandler, stream: &mut std::net::TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(handler.read_timeout))?;
    stream.set_write_timeout(Some(handler.write_timeout))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return stream.write_all(b"HTTP/1.0 400 Bad Request\r\nServer: ThreadServer/HttpHandler Rust\r\n\r\n");
    }
    let parts: Vec<&str> = request_line.trim_end().splitn(3, ' ').collect();
    if parts.len() != 3 || (parts[2] != "HTTP/1.0" && parts[2] != "HTTP/1.1") {
        return stream.write_all(b"HTTP/1.0 400 Bad Request\r\nServer: ThreadServer/HttpHandler Rust\r\n\r\n");
    }

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
    }

    let data = format!("{} 403 Forbidden\r\nServer: ThreadServer/HttpHandler Rust\r\n\r\n", parts[2]);
    stream.write_all(data.as_bytes())
}

mod abi {
    use std::ffi::CStr;
    use std::sync::Arc;
    use std::time::Duration;

    use threadserver_core::plugin::{HandlerConfig, PluginDescriptor, PLUGIN_ABI_VERSION};
    use threadserver_core::Handler;

    #[no_mangle]
    pub unsafe extern "C" fn threadserver_plugin_entry() -> PluginDescriptor {
        PluginDescriptor { abi_version: PLUGIN_ABI_VERSION, create }
    }

    unsafe extern "C" fn create(name: *const libc::c_char, worker_count: usize, config: *const HandlerConfig) -> *mut dyn Handler {
        let name = CStr::from_ptr(name).to_string_lossy().into_owned();
        let config = &*config;
        let module_path = CStr::from_ptr(config.module_path).to_string_lossy().into_owned();
        let handler = super::HttpHandler::from_config(super::HttpHandlerConfig {
            name,
            worker_count,
            module_path,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            max_line_size: config.max_line_size,
            max_request_size: config.max_body_size,
        })
        .expect("failed to construct HttpHandler from plugin entry point");
        Arc::into_raw(handler as Arc<dyn Handler>) as *mut dyn Handler
    }
}
