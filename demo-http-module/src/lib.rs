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

//! A minimal HTTP module proving the module ABI: a raw root page, a fixed
//! plaintext ping, a parameter-echoing method, and a JSON method that can
//! fail with a terminal error.

use std::sync::Arc;

use http_handler::registry::{HttpError, Method};
use http_handler::{Module, MethodRegistry};

struct DemoModule;

impl Module for DemoModule {
    fn thread_create(&self, registry: &mut MethodRegistry) {
        let _ = registry.register("^/$", Method::raw(|_request, response| {
            response.message.data = b"demo-http-module is alive".to_vec();
        }));

        let _ = registry.register("^/ping$", Method::raw(|_request, response| {
            response.message.content_type = "text/plain".to_string();
            response.message.data = b"pong".to_vec();
        }));

        let _ = registry.register(
            "^/echo$",
            Method::json(|_request, _response, params| {
                let first = params.get_first::<String>("x").unwrap_or_default();
                let all = params.get::<String>("x");
                Ok(serde_json::json!({ "first": first, "all": all }))
            }),
        );

        let _ = registry.register(
            "^/json/(\\w+)$",
            Method::json(|request, _response, params| {
                let name = request.match_groups.first().cloned().unwrap_or_default();
                if name == "fail" {
                    return Err(HttpError::new(500, "demo module asked to fail"));
                }
                let value = params.get_first::<String>("value").unwrap_or_else(|| "world".to_string());
                Ok(serde_json::json!({ "method": name, "value": value }))
            }),
        );

        let _ = registry.register(
            "^/upload$",
            Method::mime_params(|_request, response, params| {
                let name = params.params().get_first::<String>("name").unwrap_or_default();
                let files: Vec<&str> = params.get_files("file").iter().map(|f| f.filename.as_str()).collect();
                response.message.content_type = "application/json; charset=utf-8".to_string();
                response.message.data = serde_json::json!({ "name": name, "files": files }).to_string().into_bytes();
                Ok(())
            }),
        );

        let _ = registry.register(
            "^/rpc$",
            Method::json_rpc(|_request, _response, body| Ok(serde_json::json!({ "echo": body }))),
        );
    }
}

#[no_mangle]
pub unsafe extern "C" fn threadserver_http_module_entry() -> *mut dyn Module {
    let module: Arc<dyn Module> = Arc::new(DemoModule);
    Arc::into_raw(module) as *mut dyn Module
}
