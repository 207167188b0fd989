//! Universal call adapter.
//!
//! A single native callback serves every bound function and method. Its
//! only static association is carried in upvalues: the bridge-state
//! pointer and the index of the relevant lookup table. No state
//! persists between invocations; once entered, an invocation runs to
//! completion before control returns to the engine.

use std::ffi::{c_char, c_int};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use log::warn;
use moonbind_sys as sys;

use crate::bind::MethodDef;
use crate::descriptor::BridgeState;
use crate::error::{CallError, NativeError};
use crate::mangle::{demangle, mangle_call_site};
use crate::registry::RefToken;
use crate::stack::{describe_type, push_value, read_object, stack_kind};
use crate::value::Args;

/// Raise a script-visible engine error. Performs a non-local unwind to
/// the nearest protected call; all owned values must be dropped before
/// the call.
unsafe fn raise(l: *mut sys::lua_State, message: String) -> c_int {
    unsafe {
        sys::lua_pushlstring(l, message.as_ptr() as *const c_char, message.len());
    }
    drop(message);
    unsafe { sys::lua_error(l) }
}

/// Entry point for every bound function and method.
///
/// Upvalues: 1 = bridge-state pointer, 2 = lookup-table index.
pub(crate) unsafe extern "C" fn call_adapter(l: *mut sys::lua_State) -> c_int {
    let bridge =
        unsafe { sys::lua_touserdata(l, sys::lua_upvalueindex(1)) } as *mut BridgeState;
    let table = unsafe { sys::lua_tointeger(l, sys::lua_upvalueindex(2)) } as usize;
    match unsafe { dispatch(l, bridge, table) } {
        Ok(pushed) => pushed,
        Err(err) => {
            let message = err.to_string();
            drop(err);
            unsafe { raise(l, message) }
        }
    }
}

unsafe fn dispatch(
    l: *mut sys::lua_State,
    bridge: *mut BridgeState,
    table: usize,
) -> Result<c_int, CallError> {
    let stack_args = unsafe { sys::lua_gettop(l) };

    // Resolve the target through the call-site mangled key; the borrow
    // of the bridge state ends before anything host-side runs.
    let (name, resolved) = {
        let state = unsafe { &*bridge };
        let lookup = &state.bindings.tables[table];

        let mut kinds = Vec::with_capacity(stack_args as usize);
        for index in 1..=stack_args {
            match unsafe { stack_kind(l, index) } {
                Some(kind) => kinds.push(kind),
                None => {
                    let type_name = unsafe { describe_type(l, index) };
                    warn!(
                        "skipping {type_name} argument at stack index {index} in call to '{}'",
                        lookup.name
                    );
                }
            }
        }
        let key = mangle_call_site(&lookup.name, &kinds);
        let resolved = lookup.entries.get(&key).cloned().ok_or_else(|| {
            let readable = demangle(&key).unwrap_or_else(|_| key.clone());
            CallError::UnknownFunction {
                mangled: key,
                readable,
            }
        });
        (lookup.name.clone(), resolved)
    };
    let method: Rc<MethodDef> = resolved?;

    let (receiver, first_param) = if method.is_static {
        (None, 1)
    } else {
        let receiver = unsafe { read_object(l, bridge, 1) }
            .ok_or_else(|| CallError::BadReceiver { name: name.clone() })?;
        (Some(receiver), 2)
    };

    // Exact arity check against the declaration; skipped call-site
    // categories surface here as a surplus.
    let supplied = (stack_args - (first_param - 1)) as usize;
    if supplied != method.params.len() {
        return Err(CallError::ArgCount { name });
    }

    let mut values = Vec::with_capacity(method.params.len());
    for (position, kind) in method.params.iter().enumerate() {
        let index = first_param + position as c_int;
        let value = unsafe { convert_argument(l, bridge, index, *kind) }.map_err(|expected| {
            CallError::BadArgument {
                name: name.clone(),
                index: position + 1,
                expected,
            }
        })?;
        values.push(value);
    }
    let args = Args::new(values);

    // Host panics (including RefCell borrow conflicts) must not unwind
    // into the engine; they become script-visible errors instead.
    let outcome = catch_unwind(AssertUnwindSafe(|| (method.call)(receiver.as_ref(), &args)));
    let produced = match outcome {
        Ok(result) => result.map_err(CallError::Native)?,
        Err(payload) => {
            return Err(CallError::Native(NativeError::message(panic_text(payload))));
        }
    };

    match produced {
        Some(value) => Ok(unsafe { push_value(l, bridge, &value) }),
        None => Ok(0),
    }
}

/// Convert the stack value at `index` to the declared parameter
/// category; `Err` names the expected category.
unsafe fn convert_argument(
    l: *mut sys::lua_State,
    bridge: *mut BridgeState,
    index: c_int,
    kind: crate::mangle::ParamKind,
) -> Result<crate::value::Value, &'static str> {
    use crate::mangle::ParamKind;
    use crate::value::Value;

    unsafe {
        match kind {
            ParamKind::Boolean => {
                if sys::lua_type(l, index) != sys::LUA_TBOOLEAN {
                    return Err("boolean");
                }
                Ok(Value::Boolean(sys::lua_toboolean(l, index) != 0))
            }
            ParamKind::Number => {
                if sys::lua_isinteger(l, index) != 0 {
                    return Ok(Value::Integer(sys::lua_tointeger(l, index)));
                }
                let mut is_number = 0;
                let number = sys::lua_tonumberx(l, index, &mut is_number);
                if is_number == 0 {
                    return Err("number");
                }
                Ok(Value::Number(number))
            }
            ParamKind::Text => {
                if sys::lua_type(l, index) != sys::LUA_TSTRING {
                    return Err("text");
                }
                Ok(Value::Text(crate::stack::read_text(l, index)))
            }
            ParamKind::Object => read_object(l, bridge, index)
                .map(Value::Object)
                .ok_or("object reference"),
        }
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "host callable panicked".to_owned()
    }
}

/// Finalize notification for a bridge-owned block (`__gc`).
///
/// Releases the tracking entry exactly once. An untracked token panics
/// inside an `extern "C"` frame and therefore aborts: that is an
/// internal consistency failure of the bridge, never user error.
pub(crate) unsafe extern "C" fn finalize_adapter(l: *mut sys::lua_State) -> c_int {
    let bridge =
        unsafe { sys::lua_touserdata(l, sys::lua_upvalueindex(1)) } as *mut BridgeState;
    let token = unsafe {
        let block = sys::lua_touserdata(l, 1) as *const u64;
        RefToken::from_bits(block.read())
    };
    let released = unsafe { &mut *bridge }.registry.untrack(token);
    drop(released);
    0
}

/// Stringify hook (`__tostring`). Upvalues: bridge pointer, descriptor
/// index. Produces the custom display text or a default embedding the
/// type name and the engine-side address.
pub(crate) unsafe extern "C" fn stringify_adapter(l: *mut sys::lua_State) -> c_int {
    let bridge =
        unsafe { sys::lua_touserdata(l, sys::lua_upvalueindex(1)) } as *mut BridgeState;
    let descriptor = unsafe { sys::lua_tointeger(l, sys::lua_upvalueindex(2)) } as usize;

    let address = unsafe { sys::lua_topointer(l, 1) };
    let text = match unsafe { read_object(l, bridge, 1) } {
        Some(object) => {
            let descriptor = unsafe { &(&(*bridge).bindings.descriptors)[descriptor] };
            descriptor
                .display
                .as_ref()
                .and_then(|hook| hook(&object))
                .unwrap_or_else(|| format!("{}: {address:p}", descriptor.type_name))
        }
        None => format!("released object: {address:p}"),
    };
    unsafe {
        sys::lua_pushlstring(l, text.as_ptr() as *const c_char, text.len());
    }
    1
}

/// Equality hook (`__eq`). Upvalues: bridge pointer, descriptor index.
/// Delegates to the type's equality override, defaulting to handle
/// identity; anything that is not a live bridge object compares false.
pub(crate) unsafe extern "C" fn equality_adapter(l: *mut sys::lua_State) -> c_int {
    let bridge =
        unsafe { sys::lua_touserdata(l, sys::lua_upvalueindex(1)) } as *mut BridgeState;
    let descriptor = unsafe { sys::lua_tointeger(l, sys::lua_upvalueindex(2)) } as usize;

    let left = unsafe { read_object(l, bridge, 1) };
    let right = unsafe { read_object(l, bridge, 2) };
    let equal = match (left, right) {
        (Some(left), Some(right)) => {
            let descriptor = unsafe { &(&(*bridge).bindings.descriptors)[descriptor] };
            match &descriptor.eq {
                Some(hook) => hook(&left, &right),
                None => left.ptr_eq(&right),
            }
        }
        _ => false,
    };
    unsafe { sys::lua_pushboolean(l, c_int::from(equal)) };
    1
}
