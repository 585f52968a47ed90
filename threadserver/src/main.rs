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
use std::path::PathBuf;
use std::process::ExitCode;

use threadserver_core::{Configuration, Server, SignalEvent};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let configuration = match Configuration::from_args(&args) {
        Ok(configuration) => configuration,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        },
    };

    let log_level: String = configuration.get_or("main.LogMask", "info".to_string());
    let log_file: Option<String> = configuration.get("main.LogFile").ok();
    let _logging_guard = threadserver_core::logging::init(&log_level, log_file.as_deref());
    log::info!("[core] logging configured");

    let server = match Server::new(configuration) {
        Ok(server) => server,
        Err(e) => {
            log::error!("[core] failed to initialize server: {}", e);
            return ExitCode::FAILURE;
        },
    };

    let nodetach = server.configuration.nodetach;
    if !nodetach {
        if let Err(e) = threadserver_core::supervisor::detach() {
            log::error!("[core] failed to daemonize: {}", e);
            return ExitCode::FAILURE;
        }

        // The supervisor loop lives in the grandparent; `supervise()` only
        // returns in the final worker process.
        if let Err(e) = threadserver_core::supervisor::supervise() {
            log::error!("[core] supervisor failed: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if let Some(pid_file) = server.configuration.pid_file.clone() {
        if let Err(e) = threadserver_core::supervisor::write_pid_file(&PathBuf::from(&pid_file)) {
            log::error!("[core] failed to write pidfile: {}", e);
            return ExitCode::FAILURE;
        }
    }

    // Only the calling thread survives `fork()`, so signal handling (and the
    // worker threads below) can only be installed once we're running as the
    // final process -- after `detach()`/`supervise()` have finished forking.
    let signals = threadserver_core::signals::install();

    server.create_workers();

    if let Err(e) = server.run() {
        log::error!("[core] failed to start listeners: {}", e);
        return ExitCode::FAILURE;
    }
    log::info!("[core] threadserver running");

    loop {
        match signals.recv() {
            Ok(SignalEvent::Stop) => {
                log::info!("[core] shutdown signal received");
                break;
            },
            Ok(SignalEvent::ReopenLogs) => threadserver_core::logging::reopen(),
            Ok(SignalEvent::ChildExited) => {},
            Err(_) => break,
        }
    }

    server.stop();
    log::info!("[core] threadserver stopped");
    ExitCode::SUCCESS
}
