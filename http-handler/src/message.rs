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
use std::collections::HashMap;

/// Shared fields of an HTTP request or response.
pub struct Message {
    pub status: u16,
    pub protocol: String,
    pub headers: HashMap<String, String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(protocol: impl Into<String>) -> Message {
        Message { status: 200, protocol: protocol.into(), headers: HashMap::new(), content_type: String::new(), data: Vec::new() }
    }
}

pub struct Request {
    pub message: Message,
    pub method: String,
    pub unparsed_uri: String,
    pub uri: String,
    pub match_groups: Vec<String>,
}

impl Request {
    pub fn new() -> Request {
        Request {
            message: Message::new("HTTP/1.0"),
            method: String::new(),
            unparsed_uri: String::new(),
            uri: String::new(),
            match_groups: Vec::new(),
        }
    }

    pub fn protocol(&self) -> &str { &self.message.protocol }

    pub fn content_type(&self) -> &str { &self.message.content_type }

    pub fn body(&self) -> &[u8] { &self.message.data }

    /// The portion of `unparsed_uri` that constitutes the query string.
    ///
    /// Reproduces the original's exact `?`/`#` cut-point logic, bug for bug:
    /// a `#` appearing at or before the `?` suppresses query parsing
    /// entirely, since the original's `pos2 > pos` guard silently drops the
    /// substring call in that case.
    pub fn query_string(&self) -> Option<&str> {
        let uri = self.unparsed_uri.as_str();
        let pos = uri.find('?');
        let pos2 = uri.find('#');
        match (pos, pos2) {
            (Some(p), Some(p2)) if p2 > p => Some(&uri[p + 1..p2]),
            (Some(_), Some(_)) => None,
            (Some(p), None) => Some(&uri[p + 1..]),
            (None, _) => None,
        }
    }
}

impl Default for Request {
    fn default() -> Self { Request::new() }
}

pub struct Response {
    pub message: Message,
    pub status_message: String,
    pub debug_log_info: String,
    pub dont_log: bool,
}

impl Response {
    pub fn for_request(request: &Request) -> Response {
        Response {
            message: Message::new(request.protocol().to_string()),
            status_message: String::new(),
            debug_log_info: String::new(),
            dont_log: false,
        }
    }

    pub fn status(&self) -> u16 { self.message.status }

    pub fn set_status(&mut self, status: u16) { self.message.status = status; }
}
