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
use std::sync::Arc;

use libloading::{Library, Symbol};
use threadserver_core::CreationError;

use crate::frpc_proto::MethodRegistry;

/// User-supplied RPC method registration, loaded as a dynamic library.
///
/// `thread_create` is called once per worker thread to populate that
/// worker's own `MethodRegistry`, matching the original's `Module_t::threadCreate`
/// being invoked from inside `Worker_t`'s constructor against a freshly
/// constructed, thread-local `FRPC::Server_t`.
pub trait FrpcModule: Send + Sync {
    fn thread_create(&self, registry: &mut MethodRegistry);

    fn thread_destroy(&self) {}
}

pub const MODULE_ENTRY_SYMBOL: &[u8] = b"threadserver_frpc_module_entry";

pub type ModuleEntryFn = unsafe extern "C" fn() -> *mut dyn FrpcModule;

pub struct LoadedModule {
    pub module: Arc<dyn FrpcModule>,
    _library: Library,
}

pub fn load_module(path: &str) -> Result<LoadedModule, CreationError> {
    let library = unsafe { Library::new(path) }.map_err(|e| CreationError::plugin(format!("can't load module {}: {}", path, e)))?;

    let entry: Symbol<ModuleEntryFn> = unsafe { library.get(MODULE_ENTRY_SYMBOL) }
        .map_err(|e| CreationError::plugin(format!("can't load module {} create function: {}", path, e)))?;

    let raw = unsafe { entry() };
    if raw.is_null() {
        return Err(CreationError::plugin(format!("can't create module {}", path)));
    }
    let module = unsafe { Arc::from_raw(raw) };
    Ok(LoadedModule { module, _library: library })
}

/// Parses a `filename:symbol`-shaped module spec; only the filename matters
/// since the entry point is fixed, kept for config grammar compatibility.
pub fn parse_module_spec(spec: &str) -> Result<&str, CreationError> {
    match spec.split_once(':') {
        Some((filename, _symbol)) => Ok(filename),
        None => Ok(spec),
    }
}
