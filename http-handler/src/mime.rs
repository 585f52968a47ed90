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
// `multipart/form-data` parsing the original gets from `mimetic`. No crate in
// this workspace's stack covers that narrow a need, so the boundary split and
// header parsing below are hand-rolled; `base64` (already a dependency for
// other reasons) covers the one transfer encoding worth decoding here.
use std::collections::HashMap;

use base64::Engine;
use regex::Regex;

use crate::message::Request;
use crate::params::Parameters;

#[derive(Clone, Debug, Default)]
pub struct MimeFile {
    pub data: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// Parameters parsed from a `multipart/form-data` body: plain fields fall
/// into the inherited `Parameters` map, parts carrying a filename or a
/// non-empty content type land in `file_data` instead.
#[derive(Default)]
pub struct MimeParameters {
    params: Parameters,
    file_data: HashMap<String, Vec<MimeFile>>,
}

impl MimeParameters {
    pub fn new() -> MimeParameters { MimeParameters::default() }

    /// Builds parameters from the query string always, and additionally from
    /// the body on a `POST`/`PUT`: as a `multipart/form-data` parse when the
    /// `Content-Type` says so, otherwise as plain urlencoded body parameters,
    /// same as `Parameters::from_request`.
    pub fn from_request(request: &Request) -> MimeParameters {
        let mut mime_params = MimeParameters::new();
        if let Some(query) = request.query_string() {
            mime_params.params.parse(query);
        }
        if matches!(request.method.as_str(), "POST" | "PUT") {
            match multipart_boundary(request.content_type()) {
                Some(boundary) => mime_params.parse_mime(request.body(), &boundary),
                None => {
                    if let Ok(body) = std::str::from_utf8(request.body()) {
                        mime_params.params.parse(body);
                    }
                },
            }
        }
        mime_params
    }

    pub fn params(&self) -> &Parameters { &self.params }

    pub fn get_files(&self, name: &str) -> &[MimeFile] { self.file_data.get(name).map(Vec::as_slice).unwrap_or(&[]) }

    /// Matches field names of the form `name[N]` against `pattern` (with
    /// literal `[]` standing in for the index placeholder, as in the
    /// original) and returns the first file under each matched index, keyed
    /// by the captured index path.
    pub fn get_indexed_files(&self, pattern: &str) -> HashMap<Vec<usize>, &MimeFile> {
        let escaped = regex::escape(pattern).replace(r"\[\]", r"\[([0-9]+)\]");
        let regex = match Regex::new(&format!("^{}$", escaped)) {
            Ok(r) => r,
            Err(_) => return HashMap::new(),
        };

        let mut result = HashMap::new();
        for (key, files) in &self.file_data {
            if let Some(captures) = regex.captures(key) {
                let indexes: Option<Vec<usize>> =
                    captures.iter().skip(1).map(|c| c.and_then(|m| m.as_str().parse().ok())).collect();
                if let (Some(indexes), Some(first)) = (indexes, files.first()) {
                    result.insert(indexes, first);
                }
            }
        }
        result
    }

    /// Parses a `multipart/form-data` body given its boundary (as found in
    /// the request's `Content-Type` header).
    pub fn parse_mime(&mut self, body: &[u8], boundary: &str) {
        let delimiter = format!("--{}", boundary).into_bytes();
        for part in split_parts(body, &delimiter) {
            if let Some((headers, content)) = split_header_body(part) {
                self.ingest_part(&headers, content);
            }
        }
    }

    fn ingest_part(&mut self, headers: &[(String, String)], body: &[u8]) {
        let content_type = header_value(headers, "content-type").unwrap_or_default();
        let disposition = header_value(headers, "content-disposition").unwrap_or_default();
        let name = disposition_param(&disposition, "name").unwrap_or_default();
        let filename = disposition_param(&disposition, "filename");
        let encoding = header_value(headers, "content-transfer-encoding").unwrap_or_default();

        let decoded = match encoding.to_lowercase().as_str() {
            "base64" => base64::engine::general_purpose::STANDARD
                .decode(strip_whitespace(body))
                .unwrap_or_else(|_| body.to_vec()),
            "quoted-printable" => decode_quoted_printable(body),
            _ => body.to_vec(),
        };

        match filename {
            Some(filename) if !filename.is_empty() => {
                self.file_data.entry(name).or_default().push(MimeFile { data: decoded, content_type, filename });
            },
            _ if !content_type.is_empty() && content_type != "text/plain" => {
                self.file_data.entry(name).or_default().push(MimeFile { data: decoded, content_type, filename: String::new() });
            },
            _ => {
                let value = String::from_utf8_lossy(&decoded).into_owned();
                self.params.data_mut().entry(name).or_default().push(value);
            },
        }
    }
}

/// Splits a multipart body on every occurrence of `delimiter`, returning the
/// (trimmed) content strictly between each consecutive pair of boundaries.
/// The preamble before the first boundary and the epilogue after the closing
/// `--boundary--` are dropped, same as any conforming multipart reader.
fn split_parts<'a>(body: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut positions = Vec::new();
    let mut offset = 0;
    while offset <= body.len() {
        match find(&body[offset..], delimiter) {
            Some(pos) => {
                positions.push(offset + pos);
                offset = offset + pos + delimiter.len();
            },
            None => break,
        }
    }

    let mut parts = Vec::new();
    for pair in positions.windows(2) {
        let start = (pair[0] + delimiter.len()).min(body.len());
        let end = pair[1].min(body.len());
        if start >= end {
            continue;
        }
        let candidate = trim_crlf(&body[start..end]);
        if !candidate.is_empty() {
            parts.push(candidate);
        }
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> { haystack.windows(needle.len().max(1)).position(|w| w == needle) }

fn trim_crlf(mut s: &[u8]) -> &[u8] {
    while s.first() == Some(&b'\r') || s.first() == Some(&b'\n') {
        s = &s[1..];
    }
    while s.last() == Some(&b'\r') || s.last() == Some(&b'\n') {
        s = &s[..s.len() - 1];
    }
    s
}

fn split_header_body(part: &[u8]) -> Option<(Vec<(String, String)>, &[u8])> {
    let marker = b"\r\n\r\n";
    let pos = find(part, marker).or_else(|| find(part, b"\n\n"))?;
    let header_len = if part[pos..].starts_with(marker) { marker.len() } else { 2 };
    let header_bytes = &part[..pos];
    let body = &part[pos + header_len..];

    let headers = String::from_utf8_lossy(header_bytes)
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_lowercase(), value.trim().to_string()))
        })
        .collect();

    Some((headers, body))
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

fn disposition_param(disposition: &str, key: &str) -> Option<String> {
    for segment in disposition.split(';') {
        let segment = segment.trim();
        if let Some(rest) = segment.strip_prefix(&format!("{}=", key)) {
            return Some(rest.trim_matches('"').to_string());
        }
    }
    None
}

/// Extracts the `boundary=` parameter from a `multipart/form-data` content
/// type, `None` for any other content type (including an absent one).
fn multipart_boundary(content_type: &str) -> Option<String> {
    if !content_type.to_lowercase().starts_with("multipart/form-data") {
        return None;
    }
    content_type.split(';').skip(1).find_map(|segment| {
        segment.trim().strip_prefix("boundary=").map(|b| b.trim_matches('"').to_string())
    })
}

fn strip_whitespace(data: &[u8]) -> Vec<u8> { data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect() }

fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'=' if i + 2 < data.len() && data[i + 1] == b'\r' && data[i + 2] == b'\n' => i += 3,
            b'=' if i + 1 < data.len() && data[i + 1] == b'\n' => i += 2,
            b'=' if i + 2 < data.len() => {
                let hi = (data[i + 1] as char).to_digit(16);
                let lo = (data[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        result.push((hi * 16 + lo) as u8);
                        i += 3;
                    },
                    _ => {
                        result.push(data[i]);
                        i += 1;
                    },
                }
            },
            b => {
                result.push(b);
                i += 1;
            },
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_field() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"foo\"\r\n\r\nbar\r\n--B--\r\n";
        let mut mp = MimeParameters::new();
        mp.parse_mime(body, "B");
        assert_eq!(mp.params().get_first::<String>("foo"), Some("bar".to_string()));
    }

    #[test]
    fn parses_file_field() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"up\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--B--\r\n";
        let mut mp = MimeParameters::new();
        mp.parse_mime(body, "B");
        let files = mp.get_files("up");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "a.txt");
        assert_eq!(files[0].data, b"hello");
    }

    #[test]
    fn indexed_files_extracts_index() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"f[3]\"; filename=\"a.bin\"\r\n\r\nx\r\n--B--\r\n";
        let mut mp = MimeParameters::new();
        mp.parse_mime(body, "B");
        let indexed = mp.get_indexed_files("f[]");
        assert_eq!(indexed.len(), 1);
        assert!(indexed.contains_key(&vec![3]));
    }

    #[test]
    fn boundary_extracted_from_content_type() {
        assert_eq!(multipart_boundary("multipart/form-data; boundary=----WebKitX").as_deref(), Some("----WebKitX"));
        assert_eq!(multipart_boundary("application/x-www-form-urlencoded"), None);
    }

    #[test]
    fn from_request_parses_multipart_body() {
        let mut request = Request::new();
        request.method = "POST".to_string();
        request.message.content_type = "multipart/form-data; boundary=B".to_string();
        request.message.data = b"--B\r\nContent-Disposition: form-data; name=\"foo\"\r\n\r\nbar\r\n--B--\r\n".to_vec();

        let mp = MimeParameters::from_request(&request);
        assert_eq!(mp.params().get_first::<String>("foo"), Some("bar".to_string()));
    }
}
