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
use regex::Regex;
use threadserver_core::CodedError;

use crate::message::{Request, Response};
use crate::mime::MimeParameters;
use crate::params::Parameters;

pub type HttpError = CodedError;

/// The five method shapes the original's template hierarchy (and its
/// companion multipart/JSON-RPC handling) offered: `Method_t`/`BoundMethod_t`
/// (raw access to the wire-level request), `HttpMethod_t` (pre-parsed
/// query/POST parameters), a MIME-aware variant layering file uploads on top
/// of the same parameters, `JsonMethod_t` (parameters in, a JSON value out),
/// and a JSON-RPC variant that trades parameters for a parsed JSON body.
/// Closures replace the C++ member function pointer + object reference
/// pairing.
pub enum Method {
    Raw(Box<dyn Fn(&Request, &mut Response) + Send + Sync>),
    Http(Box<dyn Fn(&Request, &mut Response, &Parameters) -> Result<(), HttpError> + Send + Sync>),
    MimeParams(Box<dyn Fn(&Request, &mut Response, &MimeParameters) -> Result<(), HttpError> + Send + Sync>),
    Json(Box<dyn Fn(&Request, &mut Response, &Parameters) -> Result<serde_json::Value, HttpError> + Send + Sync>),
    JsonRpc(Box<dyn Fn(&Request, &mut Response, &serde_json::Value) -> Result<serde_json::Value, HttpError> + Send + Sync>),
}

impl Method {
    pub fn raw<F>(f: F) -> Method
    where F: Fn(&Request, &mut Response) + Send + Sync + 'static {
        Method::Raw(Box::new(f))
    }

    pub fn http<F>(f: F) -> Method
    where F: Fn(&Request, &mut Response, &Parameters) -> Result<(), HttpError> + Send + Sync + 'static {
        Method::Http(Box::new(f))
    }

    pub fn mime_params<F>(f: F) -> Method
    where F: Fn(&Request, &mut Response, &MimeParameters) -> Result<(), HttpError> + Send + Sync + 'static {
        Method::MimeParams(Box::new(f))
    }

    pub fn json<F>(f: F) -> Method
    where F: Fn(&Request, &mut Response, &Parameters) -> Result<serde_json::Value, HttpError> + Send + Sync + 'static {
        Method::Json(Box::new(f))
    }

    /// Rejects anything but `POST` with `405` before user code ever runs,
    /// then hands it the request body parsed as a JSON document instead of
    /// form parameters.
    pub fn json_rpc<F>(f: F) -> Method
    where F: Fn(&Request, &mut Response, &serde_json::Value) -> Result<serde_json::Value, HttpError> + Send + Sync + 'static {
        Method::JsonRpc(Box::new(f))
    }

    /// Invokes the method. A terminal `HttpError` (status code `>= 400`)
    /// propagates to the caller; a non-terminal one is swallowed after
    /// overriding `response`'s status, matching the original's
    /// `e.code() / 100 >= 4` rethrow guard.
    pub fn call(&self, request: &Request, response: &mut Response) -> Result<(), HttpError> {
        match self {
            Method::Raw(f) => {
                f(request, response);
                Ok(())
            },
            Method::Http(f) => {
                let params = Parameters::from_request(request);
                match f(request, response, &params) {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_terminal() => Err(e),
                    Err(e) => {
                        response.set_status(e.code);
                        Ok(())
                    },
                }
            },
            Method::MimeParams(f) => {
                let params = MimeParameters::from_request(request);
                match f(request, response, &params) {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_terminal() => Err(e),
                    Err(e) => {
                        response.set_status(e.code);
                        Ok(())
                    },
                }
            },
            Method::Json(f) => {
                let params = Parameters::from_request(request);
                response.message.content_type = "application/json; charset=utf-8".to_string();
                match f(request, response, &params) {
                    Ok(value) => {
                        response.message.data = value.to_string().into_bytes();
                        Ok(())
                    },
                    Err(e) if e.is_terminal() => Err(e),
                    Err(e) => {
                        response.set_status(e.code);
                        Ok(())
                    },
                }
            },
            Method::JsonRpc(f) => {
                if request.method != "POST" {
                    return Err(HttpError::new(405, "method not allowed"));
                }
                let body: serde_json::Value = serde_json::from_slice(request.body())
                    .map_err(|e| HttpError::new(400, format!("invalid json body: {}", e)))?;
                response.message.content_type = "application/json; charset=utf-8".to_string();
                match f(request, response, &body) {
                    Ok(value) => {
                        response.message.data = value.to_string().into_bytes();
                        Ok(())
                    },
                    Err(e) if e.is_terminal() => Err(e),
                    Err(e) => {
                        response.set_status(e.code);
                        Ok(())
                    },
                }
            },
        }
    }
}

/// Ordered list of `(route regex, method)` pairs, matched in registration
/// order against the request URI (not the query string). The first match
/// wins; captured groups become `Request::match_groups`.
#[derive(Default)]
pub struct MethodRegistry {
    routes: Vec<(Regex, Method)>,
}

impl MethodRegistry {
    pub fn new() -> MethodRegistry { MethodRegistry::default() }

    pub fn register(&mut self, location: &str, method: Method) -> Result<(), HttpError> {
        let regex = Regex::new(location).map_err(|e| HttpError::new(500, format!("invalid route pattern {}: {}", location, e)))?;
        self.routes.push((regex, method));
        Ok(())
    }

    pub fn dispatch(&self, request: &mut Request, response: &mut Response) -> bool {
        for (regex, method) in &self.routes {
            if let Some(captures) = regex.captures(&request.uri) {
                request.match_groups =
                    captures.iter().skip(1).map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default()).collect();
                match method.call(request, response) {
                    Ok(()) => {},
                    Err(e) => {
                        response.set_status(e.code);
                        response.message.data = e.message.into_bytes();
                    },
                }
                return true;
            }
        }
        false
    }
}
