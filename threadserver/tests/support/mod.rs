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
// Spawns the real `threadserver` binary against a generated config file and
// waits for its listener to come up, mirroring the teacher's own
// `synchrotron-test` crate (which does the same thing for `synchrotron`).
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::Duration;

use tempfile::{Builder, TempDir};

static PORT_OFFSET: AtomicU16 = AtomicU16::new(0);

fn workspace_target_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../target/debug")
}

fn cdylib_path(crate_name: &str) -> std::path::PathBuf {
    workspace_target_dir().join(format!("lib{}.so", crate_name.replace('-', "_")))
}

pub fn next_port() -> u16 { 51100 + PORT_OFFSET.fetch_add(1, Ordering::SeqCst) }

/// Options for starting a `threadserver` instance bound to the `http-handler`
/// plugin with `demo-http-module` registering routes.
#[derive(Default)]
pub struct HttpServerOptions<'a> {
    pub order: Option<&'a str>,
    pub allow: Vec<&'a str>,
    pub deny: Vec<&'a str>,
}

pub struct ThreadServerRunner {
    handle: Child,
    port: u16,
    pid_path: std::path::PathBuf,
    _conf_dir: TempDir,
}

impl ThreadServerRunner {
    pub fn spawn_http(port: u16, opts: HttpServerOptions) -> ThreadServerRunner {
        Self::spawn_http_with_args(port, opts, &["-d"])
    }

    /// Spawns `threadserver` through its real daemonizing path (no `-d`), so
    /// the process that answers the listener is the double-forked grandchild
    /// `supervisor::supervise()` produces, not the process this harness
    /// itself spawned -- that one exits immediately via `std::process::exit`
    /// once it has forked. `real_pid()` reads the pidfile the final worker
    /// writes after daemonizing to recover a pid signals can actually reach.
    pub fn spawn_http_daemonized(port: u16, opts: HttpServerOptions) -> ThreadServerRunner {
        Self::spawn_http_with_args(port, opts, &[])
    }

    fn spawn_http_with_args(port: u16, opts: HttpServerOptions, extra_args: &[&str]) -> ThreadServerRunner {
        let conf_dir = Builder::new().prefix("threadserver-test-").tempdir().expect("tempdir");
        let pid_path = conf_dir.path().join("threadserver.pid");

        let mut config = String::new();
        config.push_str("main.Handler=http\n");
        config.push_str("main.Listener=main\n");
        config.push_str(&format!("main.PidFile={}\n", pid_path.display()));
        config.push_str(&format!("http.Handler={}:unused\n", cdylib_path("http-handler").display()));
        config.push_str("http.WorkerCount=4\n");
        config.push_str(&format!("http.Module={}:unused\n", cdylib_path("demo-http-module").display()));
        config.push_str(&format!("main.Address=127.0.0.1:{}\n", port));
        if let Some(order) = opts.order {
            config.push_str(&format!("main.Order={}\n", order));
        }
        for net in &opts.allow {
            config.push_str(&format!("main.Allow={}\n", net));
        }
        for net in &opts.deny {
            config.push_str(&format!("main.Deny={}\n", net));
        }
        if opts.allow.is_empty() {
            config.push_str("main.Allow=0.0.0.0/0\n");
        }

        let config_path = conf_dir.path().join("threadserver.conf");
        std::fs::write(&config_path, config).expect("write config");

        let handle = Command::new(workspace_target_dir().join("threadserver"))
            .arg("-f")
            .arg(&config_path)
            .args(extra_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn threadserver");

        wait_until(|| check_port(port));

        ThreadServerRunner { handle, port, pid_path, _conf_dir: conf_dir }
    }

    pub fn port(&self) -> u16 { self.port }

    /// The pid the running server itself last wrote to its pidfile. In
    /// daemonizing mode this is the final double-forked worker process, not
    /// the pid this harness's own `Command::spawn` returned.
    pub fn real_pid(&self) -> libc::pid_t {
        let mut pid_str = String::new();
        wait_until(|| std::fs::read_to_string(&self.pid_path).map(|s| { pid_str = s; true }).unwrap_or(false));
        pid_str.trim().parse().expect("pidfile did not contain a valid pid")
    }

    pub fn kill_real_pid_with_signal(&self, signal: libc::c_int) {
        unsafe {
            libc::kill(self.real_pid(), signal);
        }
    }

    pub fn send(&self, request: &[u8]) -> Vec<u8> {
        let addr: SocketAddr = format!("127.0.0.1:{}", self.port).parse().unwrap();
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(request).unwrap();
        let mut response = Vec::new();
        let _ = stream.read_to_end(&mut response);
        response
    }

    pub fn connect(&self) -> TcpStream {
        let addr: SocketAddr = format!("127.0.0.1:{}", self.port).parse().unwrap();
        TcpStream::connect(addr).expect("connect")
    }

    pub fn kill_with_signal(&self, signal: libc::c_int) {
        unsafe {
            libc::kill(self.handle.id() as libc::pid_t, signal);
        }
    }

    /// Polls until the listener stops accepting connections, for daemonizing
    /// runs where no `Child` tracks the real worker process to `wait()` on.
    pub fn wait_for_port_closed(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if !check_port(self.port) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<std::process::ExitStatus> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Ok(Some(status)) = self.handle.try_wait() {
                return Some(status);
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for ThreadServerRunner {
    fn drop(&mut self) {
        let _ = self.handle.kill();
        let _ = self.handle.wait();
        if let Ok(pid_str) = std::fs::read_to_string(&self.pid_path) {
            if let Ok(pid) = pid_str.trim().parse::<libc::pid_t>() {
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
            }
        }
    }
}

fn wait_until<F: Fn() -> bool>(f: F) {
    let mut sleep_ms = 20;
    for _ in 0..20 {
        if f() {
            return;
        }
        thread::sleep(Duration::from_millis(sleep_ms));
        sleep_ms = (sleep_ms * 2).min(500);
    }
}

fn check_port(port: u16) -> bool { TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() }
