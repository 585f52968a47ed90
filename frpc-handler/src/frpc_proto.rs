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
//
// Stand-in for the external FRPC wire library the original links against
// (`libfrpc`'s binary marshalling of `FRPC::Value_t`/`FRPC::Array_t`, its
// fault encoding, its `FRPC::Server_t::serve` HTTP-framed request loop). This
// module satisfies the same contract -- a call in, a value or fault out --
// using `serde_json::Value` as the value model and a small JSON envelope as
// the framing, rather than reimplementing the original's bespoke binary
// format. It is not a byte-compatible FRPC codec.
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RpcError;

/// One call's worth of method name + positional parameters.
pub struct Call {
    pub method: String,
    pub params: Vec<serde_json::Value>,
}

/// Parses the `{"method": "...", "params": [...]}` envelope carried in the
/// request body.
pub fn parse_call(body: &[u8]) -> Result<Call, RpcError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| RpcError::new(400, format!("malformed RPC call: {}", e)))?;

    let method = value
        .get("method")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| RpcError::new(400, "RPC call missing \"method\""))?
        .to_string();

    let params = value.get("params").and_then(serde_json::Value::as_array).cloned().unwrap_or_default();

    Ok(Call { method, params })
}

pub fn encode_result(value: serde_json::Value) -> Vec<u8> {
    serde_json::json!({ "status": 200, "result": value }).to_string().into_bytes()
}

pub fn encode_fault(fault: &RpcError) -> Vec<u8> {
    serde_json::json!({ "status": fault.code, "statusMessage": fault.message }).to_string().into_bytes()
}

type MethodFn = dyn Fn(&[serde_json::Value], &str) -> Result<serde_json::Value, RpcError> + Send + Sync;

/// Per-worker table of registered RPC methods, mirroring the original's
/// `FRPC::Server_t::registry()` -- constructed fresh for every worker thread
/// since the original's own `frpc` server instance is itself a
/// `boost::thread_specific_ptr`.
#[derive(Default)]
pub struct MethodRegistry {
    routes: HashMap<String, Arc<MethodFn>>,
}

impl MethodRegistry {
    pub fn new() -> MethodRegistry { MethodRegistry::default() }

    pub fn register<F>(&mut self, name: impl Into<String>, method: F)
    where F: Fn(&[serde_json::Value], &str) -> Result<serde_json::Value, RpcError> + Send + Sync + 'static {
        self.routes.insert(name.into(), Arc::new(method));
    }

    /// Looks up and calls `method`, logging before/after exactly as the
    /// original's `Callbacks_t::preProcess`/`postProcess` pair do.
    pub fn dispatch(&self, method: &str, params: &[serde_json::Value], client_ip: &str) -> Result<serde_json::Value, RpcError> {
        let handler = self.routes.get(method).cloned().ok_or_else(|| RpcError::new(404, format!("unknown method {}", method)))?;

        log::info!("[frpc] calling method {}({:?}) from IP: {}", method, params, client_ip);
        let started = std::time::Instant::now();
        let result = handler(params, client_ip);
        let elapsed = started.elapsed();

        match &result {
            Ok(value) => log::info!("[frpc] method {} returned {:?} after {:?}", method, value, elapsed),
            Err(fault) => log::warn!("[frpc] method {} returned fault ({} {}) after {:?}", method, fault.code, fault.message, elapsed),
        }

        result
    }
}
