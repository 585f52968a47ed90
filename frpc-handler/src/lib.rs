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

//! An XML-RPC-style ("FRPC") protocol engine: an HTTP-framed request carries a
//! single RPC call in its body, dispatched through a per-worker method
//! registry a user-supplied module builds.

pub mod error;
pub mod frpc_proto;
pub mod module;

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use threadserver_core::{CreationError, Handler, HandlerBase, SocketWork, Worker, WorkerFactory};

pub use error::RpcError;
pub use frpc_proto::MethodRegistry;
pub use module::FrpcModule;

pub struct FrpcHandlerConfig {
    pub name: String,
    pub worker_count: usize,
    pub module_path: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_line_size: usize,
    pub max_body_size: usize,
}

pub struct FrpcHandler {
    base: HandlerBase,
    module: Arc<dyn FrpcModule>,
    _loaded: module::LoadedModule,
    read_timeout: Duration,
    write_timeout: Duration,
    max_line_size: usize,
    max_body_size: usize,
}

impl FrpcHandler {
    pub fn from_config(config: FrpcHandlerConfig) -> Result<Arc<FrpcHandler>, CreationError> {
        let filename = module::parse_module_spec(&config.module_path)?;
        let loaded = module::load_module(filename)?;
        log::info!("[frpc] handler {} module={}", config.name, config.module_path);

        Ok(Arc::new(FrpcHandler {
            base: HandlerBase::new(config.name, config.worker_count),
            module: loaded.module.clone(),
            _loaded: loaded,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            max_line_size: config.max_line_size,
            max_body_size: config.max_body_size,
        }))
    }
}

impl Handler for FrpcHandler {
    fn name(&self) -> &str { self.base.name() }

    fn enqueue(&self, work: SocketWork) { self.base.enqueue(work); }

    fn create_workers(&self) {
        let factory: Arc<dyn WorkerFactory> = Arc::new(FrpcWorkerFactory { handler: unsafe { arc_self(self) } });
        self.base.create_workers(factory);
    }

    fn destroy_workers(&self) { self.base.destroy_workers(); }
}

/// Recovers an `Arc<FrpcHandler>` from a `&FrpcHandler` known to already live
/// behind one, for the same reason and under the same soundness argument as
/// `http_handler::arc_self`: every `FrpcHandler` comes from `from_config`,
/// which always returns an `Arc`.
unsafe fn arc_self(handler: &FrpcHandler) -> Arc<FrpcHandler> {
    let ptr = handler as *const FrpcHandler;
    Arc::increment_strong_count(ptr);
    Arc::from_raw(ptr)
}

struct FrpcWorkerFactory {
    handler: Arc<FrpcHandler>,
}

impl WorkerFactory for FrpcWorkerFactory {
    fn create_worker(&self) -> Box<dyn Worker> {
        let mut registry = MethodRegistry::new();
        self.handler.module.thread_create(&mut registry);
        Box::new(FrpcWorker { handler: self.handler.clone(), registry })
    }
}

struct FrpcWorker {
    handler: Arc<FrpcHandler>,
    registry: MethodRegistry,
}

impl Drop for FrpcWorker {
    fn drop(&mut self) { self.handler.module.thread_destroy(); }
}

impl Worker for FrpcWorker {
    fn handle(&mut self, mut work: SocketWork) -> io::Result<()> {
        if work.forbidden {
            return send_forbidden(&self.handler, work.socket_mut());
        }

        let client_ip = work.client_address().map(|a| a.ip().to_string()).unwrap_or_else(|_| "unknown".to_string());

        let stream = work.socket().try_clone()?;
        stream.set_read_timeout(Some(self.handler.read_timeout))?;
        stream.set_write_timeout(Some(self.handler.write_timeout))?;
        let mut reader = BufReader::new(stream);

        let (protocol, body) = match read_request(&mut reader, self.handler.max_line_size, self.handler.max_body_size) {
            Ok(parsed) => parsed,
            Err(BadRequest) => {
                log::warn!("[frpc] bad request");
                let data = b"HTTP/1.0 400 Bad Request\r\nAccept: text/xml, application/x-frpc\r\nServer: ThreadServer/CppFrpcHandler Rust\r\n\r\n";
                return work.socket_mut().write_all(data);
            },
        };

        let response_body = match frpc_proto::parse_call(&body) {
            Ok(call) => match self.registry.dispatch(&call.method, &call.params, &client_ip) {
                Ok(value) => frpc_proto::encode_result(value),
                Err(fault) => frpc_proto::encode_fault(&fault),
            },
            Err(fault) => frpc_proto::encode_fault(&fault),
        };

        write_response(work.socket_mut(), &protocol, &response_body)
    }
}

struct BadRequest;

fn read_request<R: BufRead>(reader: &mut R, max_line_size: usize, max_body_size: usize) -> Result<(String, Vec<u8>), BadRequest> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).map_err(|_| BadRequest)?;
    let request_line = request_line.trim_end();
    if request_line.is_empty() || request_line.len() > max_line_size {
        return Err(BadRequest);
    }

    let parts: Vec<&str> = request_line.splitn(3, ' ').collect();
    if parts.len() != 3 || (parts[2] != "HTTP/1.0" && parts[2] != "HTTP/1.1") {
        return Err(BadRequest);
    }
    let protocol = parts[2].to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).map_err(|_| BadRequest)?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
        let line = line.trim_end();
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            if key.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().map_err(|_| BadRequest)?;
            }
        }
    }

    if content_length > max_body_size {
        return Err(BadRequest);
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).map_err(|_| BadRequest)?;

    Ok((protocol, body))
}

fn write_response(stream: &mut impl Write, protocol: &str, body: &[u8]) -> io::Result<()> {
    let head = format!(
        "{} 200 OK\r\nContent-Type: application/x-frpc\r\nContent-Length: {}\r\n\r\n",
        protocol,
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)
}

fn send_forbidden(handler: &FrpcHandler, stream: &mut std::net::TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(handler.read_timeout))?;
    stream.set_write_timeout(Some(handler.write_timeout))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return stream.write_all(b"HTTP/1.0 400 Bad Request\r\nAccept: text/xml, application/x-frpc\r\nServer: ThreadServer/CppFrpcHandler Rust\r\n\r\n");
    }
    let parts: Vec<&str> = request_line.trim_end().splitn(3, ' ').collect();
    if parts.len() != 3 || (parts[2] != "HTTP/1.0" && parts[2] != "HTTP/1.1") {
        return stream.write_all(b"HTTP/1.0 400 Bad Request\r\nAccept: text/xml, application/x-frpc\r\nServer: ThreadServer/CppFrpcHandler Rust\r\n\r\n");
    }

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
    }

    let data = format!("{} 403 Forbidden\r\nAccept: text/xml, application/x-frpc\r\nServer: ThreadServer/CppFrpcHandler Rust\r\n\r\n", parts[2]);
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
        let handler = super::FrpcHandler::from_config(super::FrpcHandlerConfig {
            name,
            worker_count,
            module_path,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            max_line_size: config.max_line_size,
            max_body_size: config.max_body_size,
        })
        .expect("failed to construct FrpcHandler from plugin entry point");
        Arc::into_raw(handler as Arc<dyn Handler>) as *mut dyn Handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_result_envelope() {
        let bytes = frpc_proto::encode_result(serde_json::json!(42));
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], 200);
        assert_eq!(value["result"], 42);
    }

    #[test]
    fn encodes_fault_envelope() {
        let bytes = frpc_proto::encode_fault(&RpcError::new(404, "no such method"));
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], 404);
        assert_eq!(value["statusMessage"], "no such method");
    }

    #[test]
    fn dispatch_logs_and_returns_registered_method() {
        let mut registry = MethodRegistry::new();
        registry.register("echo", |params, _ip| Ok(params.first().cloned().unwrap_or(serde_json::Value::Null)));
        let result = registry.dispatch("echo", &[serde_json::json!("hi")], "127.0.0.1").unwrap();
        assert_eq!(result, serde_json::json!("hi"));
    }

    #[test]
    fn dispatch_unknown_method_is_404_fault() {
        let registry = MethodRegistry::new();
        let err = registry.dispatch("missing", &[], "127.0.0.1").unwrap_err();
        assert_eq!(err.code, 404);
    }
}
