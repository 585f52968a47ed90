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
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::error::CreationError;
use crate::handler::Handler;

/// ABI version every plugin's descriptor must report. Bumped whenever the
/// shape of `PluginDescriptor`/`HandlerConfig` or the `Handler`/`Worker`
/// traits changes in a way that breaks binary compatibility.
pub const PLUGIN_ABI_VERSION: u32 = 2;

/// The symbol every handler plugin exports, of type `PluginEntryFn`.
pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"threadserver_plugin_entry";

pub type PluginEntryFn = unsafe extern "C" fn() -> PluginDescriptor;

/// Per-handler configuration (`<h>.Module`, `<h>.ReadTimeout`,
/// `<h>.WriteTimeout`, `<h>.MaxLineSize`, `<h>.MaxRequestSize` in the
/// original's naming) passed across the plugin boundary alongside the
/// handler's name and worker count. `module_path` is borrowed for the
/// duration of the `create` call only; a plugin that needs to keep it must
/// copy it before returning.
#[repr(C)]
pub struct HandlerConfig {
    pub module_path: *const libc::c_char,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_line_size: usize,
    pub max_body_size: usize,
}

/// The Rust-side, owned counterpart of `HandlerConfig`, read out of
/// `Configuration` by `Server::register_handlers` and borrowed across the FFI
/// boundary by `load_handler`.
pub struct HandlerSettings {
    pub module_path: String,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_line_size: usize,
    pub max_body_size: usize,
}

/// What a plugin hands back across the dynamic-library boundary.
///
/// Replaces the original's raw `dlsym`'d factory function pointer
/// (`HandlerCreateFunction_t`) with a small versioned struct so a mismatched
/// plugin build fails with a clear error message at load time instead of
/// crashing on an ABI mismatch deep inside a worker thread.
// `*mut dyn Handler` is a fat pointer, so this struct is only binary-stable
// across plugins built by the same compiler version as the host -- true C ABI
// stability would need an opaque `*mut c_void` plus a vtable of `extern "C"`
// functions. Acceptable here since host and plugins are built from one
// workspace; documented as the tradeoff it is.
#[repr(C)]
pub struct PluginDescriptor {
    pub abi_version: u32,
    pub create: unsafe extern "C" fn(name: *const libc::c_char, worker_count: usize, config: *const HandlerConfig) -> *mut dyn Handler,
}

/// Keeps a loaded `Library` alive for as long as any handler it produced is in
/// use. Dropping this closes the library, matching the original's
/// `dlclose` in `ThreadServer_t`'s destructor -- but only after every handler
/// built from it has already been dropped, since `Handler` trait objects
/// produced from the plugin's vtable become dangling the moment the library
/// unloads.
pub struct LoadedPlugin {
    _library: Library,
}

/// Loads a handler plugin by filename and calls its entry point.
///
/// # Safety
///
/// The caller must trust `path`: loading a shared library runs arbitrary
/// native code at load time (constructors, `threadserver_plugin_entry`
/// itself). This is the same trust boundary the original's `dlopen` call
/// carried.
pub fn load_handler(
    path: &str,
    name: &str,
    worker_count: usize,
    settings: &HandlerSettings,
) -> Result<(Arc<dyn Handler>, LoadedPlugin), CreationError> {
    let library = unsafe { Library::new(path) }.map_err(|e| CreationError::plugin(format!("can't load handler {} ({}): {}", name, path, e)))?;

    let entry: Symbol<PluginEntryFn> = unsafe { library.get(PLUGIN_ENTRY_SYMBOL) }
        .map_err(|e| CreationError::plugin(format!("can't load handler {} ({}) entry point: {}", name, path, e)))?;

    let descriptor = unsafe { entry() };
    if descriptor.abi_version != PLUGIN_ABI_VERSION {
        return Err(CreationError::plugin(format!(
            "handler {} ({}) built against plugin ABI {}, server expects {}",
            name, path, descriptor.abi_version, PLUGIN_ABI_VERSION
        )));
    }

    let c_name = CString::new(name).map_err(|_| CreationError::invalid("handler name contains a NUL byte"))?;
    let c_module_path =
        CString::new(settings.module_path.as_str()).map_err(|_| CreationError::invalid("handler module path contains a NUL byte"))?;
    let config = HandlerConfig {
        module_path: c_module_path.as_ptr(),
        read_timeout_ms: settings.read_timeout_ms,
        write_timeout_ms: settings.write_timeout_ms,
        max_line_size: settings.max_line_size,
        max_body_size: settings.max_body_size,
    };

    let raw = unsafe { (descriptor.create)(c_name.as_ptr(), worker_count, &config) };
    if raw.is_null() {
        return Err(CreationError::plugin(format!("can't create handler {} ({})", name, path)));
    }

    let handler = unsafe { Arc::from_raw(raw) };
    Ok((handler, LoadedPlugin { _library: library }))
}
