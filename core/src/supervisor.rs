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
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::thread;

use chan_signal::Signal;

use crate::error::CreationError;

/// Double-forks into a session leader detached from the controlling terminal,
/// redirecting stdio to `/dev/null`. Matches the original's `detach()`
/// byte-for-byte: first fork exits the parent, `setsid()`, second fork exits
/// the intermediate process, `chdir("/")`, `umask(0)`, then `dup2` onto an
/// open `/dev/null`.
///
/// Returns once running as the final, detached child. The parent and
/// intermediate processes call `exit(0)` and never return.
pub fn detach() -> Result<(), CreationError> {
    log::info!("[core] forking to background");
    match unsafe { libc::fork() } {
        pid if pid < 0 => return Err(CreationError::invalid(format!("can't fork: {}", last_errno()))),
        pid if pid > 0 => std::process::exit(0),
        _ => {},
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(CreationError::invalid(format!("can't setsid: {}", last_errno())));
    }

    match unsafe { libc::fork() } {
        pid if pid < 0 => return Err(CreationError::invalid(format!("can't fork: {}", last_errno()))),
        pid if pid > 0 => std::process::exit(0),
        _ => {},
    }

    let root = CString::new("/").expect("static string");
    if unsafe { libc::chdir(root.as_ptr()) } == -1 {
        return Err(CreationError::invalid(format!("can't chdir to /: {}", last_errno())));
    }
    unsafe { libc::umask(0) };

    let dev_null = CString::new("/dev/null").expect("static string");
    let fd = unsafe { libc::open(dev_null.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(CreationError::invalid(format!("can't open /dev/null: {}", last_errno())));
    }
    for target in 0..3 {
        if unsafe { libc::dup2(fd, target) } == -1 {
            return Err(CreationError::invalid(format!("can't dup2 fd {} -> {}: {}", fd, target, last_errno())));
        }
    }
    if fd > 2 {
        unsafe { libc::close(fd) };
    }

    Ok(())
}

fn last_errno() -> std::io::Error { std::io::Error::last_os_error() }

/// Writes the current process id to `path`, truncating any existing content.
/// Mirrors the original's pidfile re-write that happens after `detach()`, once
/// the final child pid is known.
pub fn write_pid_file(path: &Path) -> Result<(), CreationError> {
    let mut file = File::create(path).map_err(CreationError::Io)?;
    writeln!(file, "{}", std::process::id()).map_err(CreationError::Io)?;
    Ok(())
}

/// Verifies a pidfile path is writable before detaching, matching the
/// original's pre-flight open-in-append-mode check.
pub fn check_pid_file(path: &Path) -> Result<(), CreationError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|_| CreationError::invalid(format!("can't open pidfile {}", path.display())))
}

/// The guard-process supervision loop: forks a worker child, waits for it,
/// and reforks if it died from a signal other than SIGKILL/SIGTERM/SIGINT.
/// Terminal signals and normal exits propagate the exit code out of the guard
/// process itself via `std::process::exit`.
///
/// While a worker is running, the guard also forwards INT/TERM/HUP/USR1 it
/// receives itself on to the worker's pid via `kill()`, the same relay the
/// original's `signalHandler` does for `ThreadServer::childPid`, and reopens
/// its own log on HUP/USR1. Without this, only the worker process (which
/// installs its own signal thread after the final fork) would ever see these
/// signals when sent to the guard's pid.
///
/// Runs only in the guard process; returns `Ok(())` in the forked child so it
/// can continue as the real server.
pub fn supervise() -> Result<(), CreationError> {
    let guard_signals = chan_signal::notify(&[Signal::INT, Signal::TERM, Signal::HUP, Signal::USR1]);

    loop {
        log::info!("[core] forking from guard process");
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(CreationError::invalid(format!("can't fork: {}", last_errno())));
        }
        if pid == 0 {
            return Ok(());
        }

        match wait_forwarding_signals(pid, &guard_signals)? {
            ChildOutcome::Respawn => continue,
            ChildOutcome::Exited(code) => std::process::exit(code),
        }
    }
}

enum ChildOutcome {
    /// The worker died from a non-terminal signal; fork a replacement.
    Respawn,
    /// The worker exited (or died from a terminal signal); propagate the code.
    Exited(libc::c_int),
}

/// Waits for `pid` to exit while relaying signals the guard itself receives,
/// since `waitpid` alone would leave the guard deaf to anything sent to it
/// rather than directly to the worker.
fn wait_forwarding_signals(pid: libc::pid_t, guard_signals: &chan::Receiver<Signal>) -> Result<ChildOutcome, CreationError> {
    let (wait_tx, wait_rx) = chan::sync(0);
    thread::Builder::new()
        .name("supervisor-wait".into())
        .spawn(move || {
            let mut status: libc::c_int = 0;
            loop {
                let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
                if ret >= 0 {
                    break;
                }
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    log::error!("[core] can't wait on worker pid {}: {}", pid, err);
                    break;
                }
            }
            wait_tx.send(status);
        })
        .expect("failed to spawn supervisor wait thread");

    loop {
        chan::chan_select! {
            wait_rx.recv() -> status => {
                let status = status.ok_or_else(|| CreationError::invalid("supervisor wait thread exited without reporting a status".to_string()))?;
                if libc_wifsignaled(status) {
                    let signal = libc_wtermsig(status);
                    if signal != libc::SIGKILL && signal != libc::SIGTERM && signal != libc::SIGINT {
                        log::info!("[core] server process killed with signal {}, starting it again", signal);
                        return Ok(ChildOutcome::Respawn);
                    } else {
                        log::info!("[core] server process killed with signal {}, terminating", signal);
                    }
                }
                return Ok(ChildOutcome::Exited(libc_wexitstatus(status)));
            }
            guard_signals.recv() -> signal => {
                if let Some(signal) = signal {
                    forward_signal(pid, signal);
                }
            }
        }
    }
}

/// Relays `signal` to the worker `pid`, mirroring the original guard's
/// `kill(ThreadServer::childPid, signo)`, and reopens the guard's own log on
/// HUP/USR1 just as the original does before forwarding.
fn forward_signal(pid: libc::pid_t, signal: Signal) {
    let raw = match signal {
        Signal::INT => libc::SIGINT,
        Signal::TERM => libc::SIGTERM,
        Signal::HUP => libc::SIGHUP,
        Signal::USR1 => libc::SIGUSR1,
        _ => return,
    };

    log::info!("[core] forwarding signal {} to worker pid {}", raw, pid);
    unsafe {
        libc::kill(pid, raw);
    }

    if matches!(signal, Signal::HUP | Signal::USR1) {
        crate::logging::reopen();
    }
}

fn libc_wifsignaled(status: libc::c_int) -> bool { (status & 0x7f) != 0 && (status & 0x7f) != 0x7f }

fn libc_wtermsig(status: libc::c_int) -> libc::c_int { status & 0x7f }

fn libc_wexitstatus(status: libc::c_int) -> libc::c_int { (status >> 8) & 0xff }
