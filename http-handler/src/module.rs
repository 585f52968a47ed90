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

use crate::registry::MethodRegistry;

/// User-supplied route registration, loaded as a dynamic library.
///
/// Each worker thread owns its own `MethodRegistry`, built once at thread
/// start by `thread_create` and torn down at thread end by `thread_destroy` --
/// routes are never shared or mutated across threads, so a module never needs
/// its own synchronization to register them. This is a deliberate
/// simplification of the original's per-handler module hook, which the
/// surviving header/source pair in this pack describe inconsistently (one
/// shows a shared registry, the other treats it as reset-per-thread); per-
/// worker ownership is the reading that needs no extra locking and matches
/// the `threadCreate`/`threadDestroy` lifecycle names.
pub trait Module: Send + Sync {
    fn thread_create(&self, registry: &mut MethodRegistry);

    fn thread_destroy(&self) {}
}

pub const MODULE_ENTRY_SYMBOL: &[u8] = b"threadserver_http_module_entry";

pub type ModuleEntryFn = unsafe extern "C" fn() -> *mut dyn Module;

pub struct LoadedModule {
    pub module: Arc<dyn Module>,
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

/// Parses a `name:filename.so:symbol`-equivalent `filename` spec. Only the
/// filename matters since the entry point is fixed; kept for config grammar
/// compatibility with the handler's own `Module = filename:symbol` entries.
pub fn parse_module_spec(spec: &str) -> Result<&str, CreationError> {
    match spec.split_once(':') {
        Some((filename, _symbol)) => Ok(filename),
        None => Ok(spec),
    }
}
