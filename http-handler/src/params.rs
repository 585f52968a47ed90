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
use std::str::FromStr;

use crate::message::Request;
use crate::registry::HttpError;

/// `application/x-www-form-urlencoded` parameters, parsed from a query string
/// and/or POST body. Repeated keys accumulate in declaration order.
#[derive(Default)]
pub struct Parameters {
    data: HashMap<String, Vec<String>>,
}

impl Parameters {
    pub fn new() -> Parameters { Parameters::default() }

    /// Builds parameters the way the original's `HttpMethod_t`/`JsonMethod_t`
    /// do: from the query string always, and additionally from the body when
    /// the request is a POST.
    pub fn from_request(request: &Request) -> Parameters {
        let mut params = Parameters::new();
        if let Some(query) = request.query_string() {
            params.parse(query);
        }
        if request.method == "POST" {
            if let Ok(body) = std::str::from_utf8(request.body()) {
                params.parse(body);
            }
        }
        params
    }

    pub fn parse(&mut self, params: &str) {
        for token in params.split('&') {
            if token.is_empty() {
                continue;
            }
            match token.find('=') {
                Some(pos) => {
                    let key = unescape(&token[..pos]);
                    let value = unescape(&token[pos + 1..]);
                    self.data.entry(key).or_default().push(value);
                },
                None => {
                    self.data.entry(unescape(token)).or_default().push(String::new());
                },
            }
        }
    }

    pub fn get_first<T: FromStr>(&self, name: &str) -> Option<T> { self.data.get(name)?.first()?.parse().ok() }

    pub fn get<T: FromStr>(&self, name: &str) -> Vec<T> {
        match self.data.get(name) {
            Some(values) => values.iter().filter_map(|v| v.parse().ok()).collect(),
            None => Vec::new(),
        }
    }

    /// `None` when `name` isn't present at all; `Some(Err(_))` when it is
    /// present but isn't one of the recognized boolean literals -- unlike a
    /// missing parameter, a malformed one is a client error, not a default.
    pub fn get_first_bool(&self, name: &str) -> Option<Result<bool, HttpError>> { self.get_first::<String>(name).map(|v| parse_bool(&v)) }

    pub fn get_bool(&self, name: &str) -> Result<Vec<bool>, HttpError> {
        self.get::<String>(name).iter().map(|v| parse_bool(v)).collect()
    }

    pub(crate) fn data(&self) -> &HashMap<String, Vec<String>> { &self.data }

    pub(crate) fn data_mut(&mut self) -> &mut HashMap<String, Vec<String>> { &mut self.data }
}

fn parse_bool(value: &str) -> Result<bool, HttpError> {
    match value {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        other => Err(HttpError::new(400, format!("invalid literal '{}' for boolean parameter", other))),
    }
}

fn unhex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 0xa),
        b'A'..=b'F' => Some(c - b'A' + 0xa),
        _ => None,
    }
}

/// Decodes `+` as space and `%XX` escapes, leaving malformed escapes
/// untouched -- matching the original's catch-and-keep-the-percent behavior.
pub fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                result.push(b' ');
                i += 1;
            },
            b'%' if i + 2 < bytes.len() => match (unhex(bytes[i + 1]), unhex(bytes[i + 2])) {
                (Some(d1), Some(d2)) => {
                    result.push(d1 * 16 + d2);
                    i += 3;
                },
                _ => {
                    result.push(bytes[i]);
                    i += 1;
                },
            },
            b => {
                result.push(b);
                i += 1;
            },
        }
    }
    String::from_utf8_lossy(&result).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_plus_and_percent() {
        assert_eq!(unescape("a+b%20c"), "a b c");
    }

    #[test]
    fn unescape_keeps_malformed_percent() {
        assert_eq!(unescape("100%"), "100%");
    }

    #[test]
    fn parse_accumulates_repeated_keys() {
        let mut p = Parameters::new();
        p.parse("a=1&a=2&b=3");
        assert_eq!(p.get::<i32>("a"), vec![1, 2]);
        assert_eq!(p.get_first::<i32>("b"), Some(3));
    }

    #[test]
    fn bool_truthy_values() {
        let mut p = Parameters::new();
        p.parse("x=on&x=0&x=true");
        assert_eq!(p.get_bool("x").unwrap(), vec![true, false, true]);
    }

    #[test]
    fn bool_rejects_unrecognized_literal() {
        let mut p = Parameters::new();
        p.parse("x=yes");
        assert!(p.get_bool("x").is_err());
    }

    #[test]
    fn first_bool_missing_is_none() {
        let p = Parameters::new();
        assert!(p.get_first_bool("missing").is_none());
    }
}
