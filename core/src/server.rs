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
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Configuration;
use crate::error::CreationError;
use crate::handler::Handler;
use crate::io_driver::IoDriver;
use crate::listener::{Listener, ListenerConfig};
use crate::network::Network;
use crate::plugin::{self, LoadedPlugin};

/// The dispatch fabric: every registered handler and listener, plus the
/// plugin libraries keeping their vtables alive.
///
/// Mirrors `ThreadServer_t`: constructed from a `Configuration`, registers
/// handlers (loading their plugin by `filename:symbol`) then listeners
/// (binding each to its handler by name), optionally daemonizes, then creates
/// worker pools. Dropping a `Server` drops listeners before handlers before
/// plugin libraries, in that order, so no handler's `Drop` ever runs against
/// an already-unloaded plugin.
pub struct Server {
    pub configuration: Configuration,
    handlers: HashMap<String, Arc<dyn Handler>>,
    listeners: HashMap<String, Arc<Listener>>,
    plugins: Vec<LoadedPlugin>,
    io_driver: IoDriver,
}

impl Server {
    pub fn new(configuration: Configuration) -> Result<Server, CreationError> {
        let mut server = Server {
            configuration,
            handlers: HashMap::new(),
            listeners: HashMap::new(),
            plugins: Vec::new(),
            io_driver: IoDriver::new(),
        };

        server.register_handlers()?;
        server.register_listeners()?;

        if let Some(pid_file) = server.configuration.pid_file.clone() {
            crate::supervisor::check_pid_file(&PathBuf::from(&pid_file))?;
        }

        log::info!("[core] server successfully initialized");
        Ok(server)
    }

    /// Registers a handler built in-process rather than loaded from a plugin
    /// (used for the server's own built-in handlers and for tests).
    pub fn register_builtin_handler(&mut self, handler: Arc<dyn Handler>) -> Result<(), CreationError> {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            return Err(CreationError::invalid(format!("handler {} already registered", name)));
        }
        Ok(())
    }

    fn register_handlers(&mut self) -> Result<(), CreationError> {
        let names = self.configuration.handler_names.clone();
        for name in names {
            let spec: String = self.configuration.get(&format!("{}.Handler", name))?;
            let (filename, symbol) = spec
                .split_once(':')
                .ok_or_else(|| CreationError::config(format!("invalid handler specification {}", spec)))?;
            let worker_count: usize = self.configuration.get(&format!("{}.WorkerCount", name))?;

            // `symbol` is kept in the configuration grammar for compatibility with
            // existing `Handler = path:symbol` entries, but the plugin ABI now
            // always enters through the fixed `PLUGIN_ENTRY_SYMBOL`.
            let _ = symbol;

            let settings = plugin::HandlerSettings {
                module_path: self.configuration.get_or(&format!("{}.Module", name), String::new()),
                read_timeout_ms: self.configuration.get_or(&format!("{}.ReadTimeout", name), 10_000),
                write_timeout_ms: self.configuration.get_or(&format!("{}.WriteTimeout", name), 10_000),
                max_line_size: self.configuration.get_or(&format!("{}.MaxLineSize", name), 1024),
                max_body_size: self.configuration.get_or(&format!("{}.MaxRequestSize", name), 1024 * 1024),
            };
            let (handler, plugin) = plugin::load_handler(filename, &name, worker_count, &settings)?;
            if self.handlers.insert(name.clone(), handler).is_some() {
                return Err(CreationError::invalid(format!("handler {} already registered", name)));
            }
            self.plugins.push(plugin);
        }
        Ok(())
    }

    fn register_listeners(&mut self) -> Result<(), CreationError> {
        let names = self.configuration.listener_names.clone();
        for name in names {
            let address: String = self.configuration.get(&format!("{}.Address", name))?;
            let handler_name: String = self.configuration.get(&format!("{}.Handler", name))?;

            log::info!("[core] listener {} on {} -> {}", name, address, handler_name);

            let order: String = self.configuration.get_or(&format!("{}.Order", name), "allow,deny".to_string());
            let allow_first = match order.as_str() {
                "allow,deny" => true,
                "deny,allow" => false,
                other => return Err(CreationError::config(format!("invalid Order {}", other))),
            };

            let allow_specs: Vec<String> = self.configuration.get_vector(&format!("{}.Allow", name));
            let deny_specs: Vec<String> = self.configuration.get_vector(&format!("{}.Deny", name));
            let allow_nets = Network::parse_all(&allow_specs)?;
            let deny_nets = Network::parse_all(&deny_specs)?;

            if allow_nets.is_empty() {
                log::warn!("[core] no allowed addresses for listener {} defined!", name);
            }

            let handler = self
                .handlers
                .get(&handler_name)
                .ok_or_else(|| CreationError::invalid(format!("handler {} not found", handler_name)))?
                .clone();

            let bind_address = parse_listen_address(&address)?;

            let reuseaddr = self.configuration.get_bool_or(&format!("{}.ReuseAddr", name), true);
            let reuseport = self.configuration.get_bool_or(&format!("{}.ReusePort", name), false);
            let backlog = self.configuration.get_or(&format!("{}.Backlog", name), 1024);

            let listener = Listener::new(ListenerConfig {
                name: name.clone(),
                bind_address,
                allow_first,
                allow_nets,
                deny_nets,
                backlog,
                reuseaddr,
                reuseport,
            })?;
            listener.bind_handler(Arc::downgrade(&handler));

            if self.listeners.insert(name.clone(), listener).is_some() {
                return Err(CreationError::invalid(format!("listener {} already registered", name)));
            }
        }
        Ok(())
    }

    /// Spawns every handler's worker pool. Must run only after the process
    /// has reached its final pid (i.e. after daemonizing, if daemonizing at
    /// all) since worker threads do not survive a later `fork()`.
    pub fn create_workers(&self) {
        for handler in self.handlers.values() {
            handler.create_workers();
        }
    }

    /// Starts every registered listener's accept thread and the IO driver.
    pub fn run(&self) -> Result<(), CreationError> {
        for listener in self.listeners.values() {
            log::info!("[core] listening on {} (handler {})", listener.bind_address(), listener.name());
            listener.run()?;
            self.io_driver.register(listener.clone());
        }
        self.io_driver.run();
        Ok(())
    }

    /// Stops every listener, then every handler's worker pool.
    pub fn stop(&self) {
        for listener in self.listeners.values() {
            log::info!("[core] shutting down listener on {} (handler {})", listener.bind_address(), listener.name());
        }
        self.io_driver.stop();
        for handler in self.handlers.values() {
            handler.destroy_workers();
        }
    }
}

/// Parses a `<l>.Address` entry of the form `<host>:<port>`. A bare `*` host
/// (or no host at all, e.g. `:8080`) means "listen on every interface", the
/// same shorthand `Network::parse_all` already accepts for ACL entries, so it
/// binds to `0.0.0.0` rather than being handed to `SocketAddr::parse` verbatim
/// and rejected.
fn parse_listen_address(address: &str) -> Result<SocketAddr, CreationError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| CreationError::invalid(format!("invalid listen address {}", address)))?;

    let port: u16 = port
        .parse()
        .map_err(|_| CreationError::invalid(format!("invalid listen address {}", address)))?;

    let ip: IpAddr = if host.is_empty() || host == "*" {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        host.trim_matches(|c| c == '[' || c == ']')
            .parse()
            .map_err(|_| CreationError::invalid(format!("invalid listen address {}", address)))?
    };

    Ok(SocketAddr::new(ip, port))
}
