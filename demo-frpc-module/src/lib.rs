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

//! A minimal FRPC module proving the module ABI: an `echo` method and a
//! `fail` method demonstrating the `RpcError` -> fault mapping.

use std::sync::Arc;

use frpc_handler::{FrpcModule, MethodRegistry, RpcError};

struct DemoModule;

impl FrpcModule for DemoModule {
    fn thread_create(&self, registry: &mut MethodRegistry) {
        registry.register("echo", |params, _client_ip| Ok(params.first().cloned().unwrap_or(serde_json::Value::Null)));

        registry.register("fail", |_params, _client_ip| Err(RpcError::new(500, "demo module asked to fail")));
    }
}

#[no_mangle]
pub unsafe extern "C" fn threadserver_frpc_module_entry() -> *mut dyn FrpcModule {
    let module: Arc<dyn FrpcModule> = Arc::new(DemoModule);
    Arc::into_raw(module) as *mut dyn FrpcModule
}
