//! Binding facade.
//!
//! [`LuaState`] owns the engine handle for its whole lifetime and closes
//! it exactly once on drop. All registration tables and the reference
//! registry live behind a stable heap pointer threaded to native
//! callbacks through upvalues; nothing here is process-global, so
//! independent instances are fully isolated (and a single instance must
//! be driven by a single thread, which the raw handle already enforces).

use std::ffi::{CString, c_char, c_int, c_void};

use log::{error, info};
use moonbind_sys as sys;

use crate::adapter;
use crate::bind::{Function, UserType};
use crate::descriptor::BridgeState;
use crate::mangle::{demangle, mangle_declaration};
use crate::stack::{push_value, read_text, read_value};
use crate::value::{MultiValue, ObjectRef, Value};

/// One embedded engine instance plus its binding state.
pub struct LuaState {
    raw: *mut sys::lua_State,
    bridge: *mut BridgeState,
}

impl LuaState {
    /// Open a fresh engine with the standard libraries loaded, the
    /// engine's `print` rerouted to bridge logging, and the engine's
    /// panic hook replaced with a reporting abort.
    pub fn new() -> Self {
        let raw = unsafe { sys::luaL_newstate() };
        assert!(!raw.is_null(), "engine allocation failed");
        let bridge = Box::into_raw(Box::new(BridgeState::default()));
        unsafe {
            sys::luaL_openlibs(raw);
            sys::lua_atpanic(raw, engine_panic);
            sys::lua_pushcfunction(raw, print_adapter);
            sys::lua_setglobal(raw, c"print".as_ptr());
        }
        Self { raw, bridge }
    }

    /// Load and run script source inside a protected call.
    ///
    /// Every value pushed beyond the pre-call depth becomes the result;
    /// zero results are `None`, never an empty sequence. Failures are
    /// reported as diagnostics and produce `None`; the internal error
    /// representation never reaches the caller.
    pub fn eval(&mut self, source: &str) -> Option<MultiValue> {
        unsafe {
            let base = sys::lua_gettop(self.raw);
            let status = sys::luaL_loadbufferx(
                self.raw,
                source.as_ptr() as *const c_char,
                source.len(),
                c"=eval".as_ptr(),
                std::ptr::null(),
            );
            if status != sys::LUA_OK {
                self.report_script_error("script load failed", base);
                return None;
            }
            let status = sys::lua_pcall(self.raw, 0, sys::LUA_MULTRET, 0);
            if status != sys::LUA_OK {
                self.report_script_error("script call failed", base);
                return None;
            }
            self.take_results(base)
        }
    }

    /// Invoke a global script-side function with marshaled arguments,
    /// under the same protected-call discipline as [`LuaState::eval`].
    pub fn call(&mut self, name: &str, args: &[Value]) -> Option<MultiValue> {
        let global = global_name(name);
        unsafe {
            let base = sys::lua_gettop(self.raw);
            sys::lua_getglobal(self.raw, global.as_ptr());
            if sys::lua_type(self.raw, -1) != sys::LUA_TFUNCTION {
                error!("global '{name}' is not a script function");
                sys::lua_settop(self.raw, base);
                return None;
            }
            let mut pushed = 0;
            for value in args {
                pushed += push_value(self.raw, self.bridge, value);
            }
            let status = sys::lua_pcall(self.raw, pushed, sys::LUA_MULTRET, 0);
            if status != sys::LUA_OK {
                self.report_script_error("script call failed", base);
                return None;
            }
            self.take_results(base)
        }
    }

    /// Bind a free function as a global script function under its own
    /// bindable name.
    pub fn register_function(&mut self, function: Function) {
        let name = function.name().to_owned();
        self.register_function_as(function, &name);
    }

    /// Bind a free function under an explicit override name.
    ///
    /// Registering a second function under the same name adds an
    /// overload; re-registering an identical signature is a fatal
    /// configuration error.
    pub fn register_function_as(&mut self, function: Function, name: &str) {
        let global = global_name(name);
        let key = mangle_declaration(name, true, function.params());
        let table = {
            let state = unsafe { &mut *self.bridge };
            let table = state.bindings.global_table(name);
            state.bindings.tables[table].insert(key, function.into_def());
            table
        };
        unsafe {
            sys::lua_pushlightuserdata(self.raw, self.bridge as *mut c_void);
            sys::lua_pushinteger(self.raw, table as sys::lua_Integer);
            sys::lua_pushcclosure(self.raw, adapter::call_adapter, 2);
            sys::lua_setglobal(self.raw, global.as_ptr());
        }
    }

    /// Hand a host object to scripts as a named global, building its
    /// type descriptor on first use. The returned handle shares the
    /// object with the engine side.
    pub fn register_object<T: UserType>(&mut self, name: &str, object: T) -> ObjectRef {
        let handle = ObjectRef::new(object);
        self.set_global(name, &Value::Object(handle.clone()));
        handle
    }

    /// Assign any marshalable value as a named global. A multi-value
    /// assigns its first element; an empty one assigns nil.
    pub fn set_global(&mut self, name: &str, value: &Value) {
        let global = global_name(name);
        unsafe {
            let base = sys::lua_gettop(self.raw);
            let pushed = push_value(self.raw, self.bridge, value);
            if pushed == 0 {
                sys::lua_pushnil(self.raw);
            } else if pushed > 1 {
                sys::lua_settop(self.raw, base + 1);
            }
            sys::lua_setglobal(self.raw, global.as_ptr());
        }
    }

    /// Read a named global back as a host value.
    pub fn global(&mut self, name: &str) -> Value {
        let global = global_name(name);
        unsafe {
            sys::lua_getglobal(self.raw, global.as_ptr());
            let value = read_value(self.raw, self.bridge, -1);
            sys::lua_pop(self.raw, 1);
            value
        }
    }

    /// Enumerate a type's bound entries in demangled form, for
    /// debugging. Builds the descriptor if it does not exist yet.
    pub fn inspect_descriptor(&mut self, object: &ObjectRef) -> Vec<String> {
        let descriptor = unsafe { (object.ensure)(self.raw, self.bridge) };
        let state = unsafe { &*self.bridge };
        let mut entries: Vec<String> = state.bindings.descriptors[descriptor]
            .methods
            .values()
            .flat_map(|&table| state.bindings.tables[table].entries.keys())
            .map(|key| demangle(key).unwrap_or_else(|_| key.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Drive a full collection cycle; finalize notifications for
    /// unreachable bridge objects fire during the cycle.
    pub fn collect_garbage(&mut self) {
        unsafe {
            sys::lua_gc(self.raw, sys::LUA_GCCOLLECT);
        }
    }

    /// Number of host objects currently kept alive by engine-side
    /// handles.
    pub fn tracked_references(&self) -> usize {
        unsafe { &*self.bridge }.registry.len()
    }

    /// Report the error value a failed protected call left on top of
    /// the stack, then restore the pre-call depth.
    unsafe fn report_script_error(&mut self, context: &str, base: c_int) {
        unsafe {
            let message = if sys::lua_type(self.raw, -1) == sys::LUA_TSTRING {
                read_text(self.raw, -1)
            } else {
                let mut len = 0usize;
                let ptr = sys::luaL_tolstring(self.raw, -1, &mut len);
                let text = String::from_utf8_lossy(std::slice::from_raw_parts(
                    ptr as *const u8,
                    len,
                ))
                .into_owned();
                sys::lua_pop(self.raw, 1);
                text
            };
            error!("{context}: {message}");
            sys::lua_settop(self.raw, base);
        }
    }

    /// Capture every value above `base` as the call's result list.
    unsafe fn take_results(&mut self, base: c_int) -> Option<MultiValue> {
        unsafe {
            let top = sys::lua_gettop(self.raw);
            if top == base {
                return None;
            }
            let mut values = Vec::with_capacity((top - base) as usize);
            for index in (base + 1)..=top {
                values.push(read_value(self.raw, self.bridge, index));
            }
            sys::lua_settop(self.raw, base);
            Some(MultiValue::from(values))
        }
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LuaState {
    fn drop(&mut self) {
        // Closing runs pending finalizers, which still reach the bridge
        // state through their upvalues; free it only afterwards.
        unsafe {
            sys::lua_close(self.raw);
            drop(Box::from_raw(self.bridge));
        }
    }
}

fn global_name(name: &str) -> CString {
    match CString::new(name) {
        Ok(name) => name,
        Err(_) => panic!("global name '{name}' contains an interior NUL"),
    }
}

/// Replacement for the engine's `print`: joins its arguments with tabs
/// and routes them through bridge logging.
unsafe extern "C" fn print_adapter(l: *mut sys::lua_State) -> c_int {
    let count = unsafe { sys::lua_gettop(l) };
    let mut line = String::new();
    for index in 1..=count {
        unsafe {
            let mut len = 0usize;
            let ptr = sys::luaL_tolstring(l, index, &mut len);
            let text = std::slice::from_raw_parts(ptr as *const u8, len);
            line.push_str(&String::from_utf8_lossy(text));
            sys::lua_pop(l, 1);
        }
        if index < count {
            line.push('\t');
        }
    }
    info!("[script] {line}");
    0
}

/// Engine panic hook: an error escaped every protected call boundary,
/// which means bridge state can no longer be trusted. Report and abort.
unsafe extern "C" fn engine_panic(l: *mut sys::lua_State) -> c_int {
    let message = if unsafe { sys::lua_type(l, -1) } == sys::LUA_TSTRING {
        unsafe { read_text(l, -1) }
    } else {
        "unknown engine error".to_owned()
    };
    error!("engine panic outside any protected call: {message}");
    std::process::abort();
}
