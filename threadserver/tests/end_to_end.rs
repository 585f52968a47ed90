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
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use spectral::prelude::*;

mod support;
use support::{next_port, HttpServerOptions, ThreadServerRunner};

#[test]
fn happy_path_ping() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(port, HttpServerOptions::default());

    let response = server.send(b"GET /ping HTTP/1.0\r\n\r\n");
    let response = String::from_utf8_lossy(&response);

    assert_that(&response.starts_with("HTTP/1.0 200 OK")).is_true();
    assert_that(&response.contains("Content-Type: text/plain")).is_true();
    assert_that(&response.ends_with("pong")).is_true();
}

#[test]
fn not_found_reports_the_path() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(port, HttpServerOptions::default());

    let response = server.send(b"GET /nope HTTP/1.0\r\n\r\n");
    let response = String::from_utf8_lossy(&response);

    assert_that(&response.starts_with("HTTP/1.0 404")).is_true();
    assert_that(&response.contains("/nope")).is_true();
}

#[test]
fn acl_denies_then_allows_by_address() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(
        port,
        HttpServerOptions { order: Some("allow,deny"), allow: vec!["127.0.0.0/8"], deny: vec!["127.0.0.1/32"] },
    );

    // Every test client on this box connects from 127.0.0.1, so under this
    // particular allow/deny pair every request observes the deny branch; the
    // complementary "request from a different allowed address" half of this
    // scenario is exercised directly against `Network`/`Listener` in core's
    // own unit tests, where the source address can be constructed by hand.
    let response = server.send(b"GET /ping HTTP/1.0\r\n\r\n");
    let response = String::from_utf8_lossy(&response);
    assert_that(&response.starts_with("HTTP/1.0 403")).is_true();
}

#[test]
fn acl_allows_when_not_denied() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(
        port,
        HttpServerOptions { order: Some("allow,deny"), allow: vec!["127.0.0.0/8"], deny: vec!["10.0.0.0/8"] },
    );

    let response = server.send(b"GET /ping HTTP/1.0\r\n\r\n");
    let response = String::from_utf8_lossy(&response);
    assert_that(&response.starts_with("HTTP/1.0 200 OK")).is_true();
}

#[test]
fn echo_reports_first_value_and_full_list() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(port, HttpServerOptions::default());

    let response = server.send(b"GET /echo?x=hello%20world&x=two HTTP/1.0\r\n\r\n");
    let response = String::from_utf8_lossy(&response);

    assert_that(&response.starts_with("HTTP/1.0 200 OK")).is_true();
    assert_that(&response.contains("\"first\":\"hello world\"")).is_true();
    assert_that(&response.contains("\"all\":[\"hello world\",\"two\"]")).is_true();
}

#[test]
fn malformed_request_line_is_rejected_and_connection_stays_usable() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(port, HttpServerOptions::default());

    let mut stream = server.connect();
    stream.write_all(b"GARBAGE\r\n\r\n").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    let response = String::from_utf8_lossy(&response);
    assert_that(&response.starts_with("HTTP/1.0 400 Bad Request")).is_true();

    // The listener's accept loop must still be alive after a bad request on
    // one connection.
    let follow_up = server.send(b"GET /ping HTTP/1.0\r\n\r\n");
    let follow_up = String::from_utf8_lossy(&follow_up);
    assert_that(&follow_up.starts_with("HTTP/1.0 200 OK")).is_true();
}

#[test]
fn graceful_shutdown_drains_in_flight_requests() {
    let port = next_port();
    let mut server = ThreadServerRunner::spawn_http(port, HttpServerOptions::default());

    // Eight concurrent requests, each left open long enough that a shutdown
    // signal has to wait for them rather than cutting them off.
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mut stream = server.connect();
            thread::spawn(move || {
                stream.write_all(b"GET /ping HTTP/1.0\r\n\r\n").unwrap();
                stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
                let mut response = Vec::new();
                let _ = stream.read_to_end(&mut response);
                response
            })
        })
        .collect();

    // Give every request a moment to land in a worker before signalling.
    thread::sleep(Duration::from_millis(50));
    server.kill_with_signal(libc::SIGTERM);

    for handle in handles {
        let response = handle.join().expect("worker thread panicked");
        let response = String::from_utf8_lossy(&response);
        assert_that(&response.starts_with("HTTP/1.0 200 OK")).is_true();
    }

    let status = server.wait_for_exit(Duration::from_secs(5)).expect("server did not exit after SIGTERM");
    assert_that(&status.success()).is_true();
}

#[test]
fn daemonized_server_responds_and_stops_on_forwarded_sigterm() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http_daemonized(port, HttpServerOptions::default());

    // The process this harness spawned has already exited (it forked twice
    // and stepped aside); the listener answering at all proves the real
    // double-forked worker installed its signal handling and workers.
    let response = server.send(b"GET /ping HTTP/1.0\r\n\r\n");
    let response = String::from_utf8_lossy(&response);
    assert_that(&response.starts_with("HTTP/1.0 200 OK")).is_true();

    // SIGTERM here goes to the guard process's own pid, exactly as an
    // operator's `kill` would target it; the guard has to forward it on to
    // the worker for the listener to ever go away.
    server.kill_real_pid_with_signal(libc::SIGTERM);
    assert_that(&server.wait_for_port_closed(Duration::from_secs(5))).is_true();
}

#[test]
fn upload_echoes_field_and_uploaded_filenames() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(port, HttpServerOptions::default());

    let boundary = "----testboundary";
    let mut body = String::new();
    body.push_str(&format!("--{}\r\n", boundary));
    body.push_str("Content-Disposition: form-data; name=\"name\"\r\n\r\n");
    body.push_str("ferris\r\n");
    body.push_str(&format!("--{}\r\n", boundary));
    body.push_str("Content-Disposition: form-data; name=\"file\"; filename=\"crab.txt\"\r\n");
    body.push_str("Content-Type: text/plain\r\n\r\n");
    body.push_str("pinchy\r\n");
    body.push_str(&format!("--{}--\r\n", boundary));

    let request = format!(
        "POST /upload HTTP/1.0\r\nContent-Type: multipart/form-data; boundary={}\r\nContent-Length: {}\r\n\r\n{}",
        boundary,
        body.len(),
        body
    );

    let response = server.send(request.as_bytes());
    let response = String::from_utf8_lossy(&response);
    assert_that(&response.starts_with("HTTP/1.0 200 OK")).is_true();
    assert_that(&response.contains("\"name\":\"ferris\"")).is_true();
    assert_that(&response.contains("\"crab.txt\"")).is_true();
}

#[test]
fn json_rpc_rejects_get_with_405() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(port, HttpServerOptions::default());

    let response = server.send(b"GET /rpc HTTP/1.0\r\n\r\n");
    let response = String::from_utf8_lossy(&response);
    assert_that(&response.starts_with("HTTP/1.0 405")).is_true();
}

#[test]
fn json_rpc_echoes_parsed_body() {
    let port = next_port();
    let server = ThreadServerRunner::spawn_http(port, HttpServerOptions::default());

    let body = "{\"hello\":\"world\"}";
    let request = format!("POST /rpc HTTP/1.0\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);

    let response = server.send(request.as_bytes());
    let response = String::from_utf8_lossy(&response);
    assert_that(&response.starts_with("HTTP/1.0 200 OK")).is_true();
    assert_that(&response.contains("\"echo\":{\"hello\":\"world\"}")).is_true();
}
