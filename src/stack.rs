//! Value marshaler between the engine stack and host values.
//!
//! Pushing is total over [`Value`]; reading is total over the engine's
//! scalar and string categories plus bridge-owned userdata. Engine
//! categories the bridge cannot represent (tables, functions, threads)
//! degrade to [`Value::Nil`] with a logged diagnostic rather than
//! raising, so callers must tolerate fewer values than expected.

use std::ffi::{CStr, c_char, c_int};

use log::{error, warn};
use moonbind_sys as sys;
use num_enum::TryFromPrimitive;

use crate::descriptor::BridgeState;
use crate::mangle::ParamKind;
use crate::registry::RefToken;
use crate::value::{ObjectRef, Value};

/// Engine value type tags, mirrored from the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub(crate) enum EngineType {
    None = sys::LUA_TNONE,
    Nil = sys::LUA_TNIL,
    Boolean = sys::LUA_TBOOLEAN,
    LightUserdata = sys::LUA_TLIGHTUSERDATA,
    Number = sys::LUA_TNUMBER,
    Text = sys::LUA_TSTRING,
    Table = sys::LUA_TTABLE,
    Function = sys::LUA_TFUNCTION,
    Userdata = sys::LUA_TUSERDATA,
    Thread = sys::LUA_TTHREAD,
}

/// Name of the engine type at `index`, for diagnostics.
pub(crate) unsafe fn describe_type(l: *mut sys::lua_State, index: c_int) -> String {
    unsafe {
        let tag = sys::lua_type(l, index);
        CStr::from_ptr(sys::lua_typename(l, tag))
            .to_string_lossy()
            .into_owned()
    }
}

/// Classify the engine value at `index` into a mangling category.
///
/// `None` for categories outside the codec; the caller decides whether
/// to skip (call-site mangling) or reject (argument conversion).
pub(crate) unsafe fn stack_kind(l: *mut sys::lua_State, index: c_int) -> Option<ParamKind> {
    match EngineType::try_from(unsafe { sys::lua_type(l, index) }) {
        Ok(EngineType::Boolean) => Some(ParamKind::Boolean),
        Ok(EngineType::Number) => Some(ParamKind::Number),
        Ok(EngineType::Text) => Some(ParamKind::Text),
        Ok(EngineType::Userdata) => Some(ParamKind::Object),
        _ => None,
    }
}

/// Push a host value, returning how many engine values were pushed.
///
/// Scalars and text push exactly one; [`Value::Multi`] expands
/// depth-first in order; objects allocate a fresh engine-side block,
/// track it in the registry, and attach the type's metatable (building
/// the descriptor on first use).
pub(crate) unsafe fn push_value(
    l: *mut sys::lua_State,
    bridge: *mut BridgeState,
    value: &Value,
) -> c_int {
    match value {
        Value::Nil => {
            unsafe { sys::lua_pushnil(l) };
            1
        }
        Value::Boolean(b) => {
            unsafe { sys::lua_pushboolean(l, c_int::from(*b)) };
            1
        }
        Value::Integer(i) => {
            unsafe { sys::lua_pushinteger(l, *i) };
            1
        }
        Value::Number(n) => {
            unsafe { sys::lua_pushnumber(l, *n) };
            1
        }
        Value::Text(s) => {
            // Length-prefixed push: embedded zeros survive.
            unsafe { sys::lua_pushlstring(l, s.as_ptr() as *const c_char, s.len()) };
            1
        }
        Value::Object(object) => unsafe { push_object(l, bridge, object) },
        Value::Multi(multi) => {
            if unsafe { sys::lua_checkstack(l, multi.len() as c_int) } == 0 {
                error!("engine stack exhausted expanding a {}-value sequence", multi.len());
                return 0;
            }
            let mut pushed = 0;
            for nested in multi.iter() {
                pushed += unsafe { push_value(l, bridge, nested) };
            }
            pushed
        }
    }
}

unsafe fn push_object(
    l: *mut sys::lua_State,
    bridge: *mut BridgeState,
    object: &ObjectRef,
) -> c_int {
    let descriptor = unsafe { (object.ensure)(l, bridge) };
    // One tracking entry per engine-side block; the finalize
    // notification for this block releases it.
    let token = unsafe { &mut *bridge }.registry.track(object.clone());
    unsafe {
        let block = sys::lua_newuserdatauv(l, size_of::<u64>(), 0) as *mut u64;
        block.write(token.to_bits());
        let metatable = (&(*bridge).bindings.descriptors)[descriptor].metatable.as_ptr();
        sys::luaL_getmetatable(l, metatable);
        sys::lua_setmetatable(l, -2);
    }
    1
}

/// Read the engine value at `index` as a host value.
pub(crate) unsafe fn read_value(
    l: *mut sys::lua_State,
    bridge: *mut BridgeState,
    index: c_int,
) -> Value {
    match EngineType::try_from(unsafe { sys::lua_type(l, index) }) {
        Ok(EngineType::None) | Ok(EngineType::Nil) => Value::Nil,
        Ok(EngineType::Boolean) => Value::Boolean(unsafe { sys::lua_toboolean(l, index) } != 0),
        Ok(EngineType::Number) => unsafe {
            if sys::lua_isinteger(l, index) != 0 {
                Value::Integer(sys::lua_tointeger(l, index))
            } else {
                Value::Number(sys::lua_tonumber(l, index))
            }
        },
        Ok(EngineType::Text) => Value::Text(unsafe { read_text(l, index) }),
        Ok(EngineType::Userdata) => match unsafe { read_object(l, bridge, index) } {
            Some(object) => Value::Object(object),
            None => {
                warn!("userdata at stack index {index} is not a bridge object; reading nil");
                Value::Nil
            }
        },
        _ => {
            let name = unsafe { describe_type(l, index) };
            warn!("cannot marshal {name} value at stack index {index}; reading nil");
            Value::Nil
        }
    }
}

/// Read a string value with its trusted length. Caller must have
/// checked the value is a string; conversion in place is never wanted.
pub(crate) unsafe fn read_text(l: *mut sys::lua_State, index: c_int) -> String {
    unsafe {
        let mut len = 0usize;
        let ptr = sys::lua_tolstring(l, index, &mut len);
        if ptr.is_null() {
            return String::new();
        }
        let bytes = std::slice::from_raw_parts(ptr as *const u8, len);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Resolve the userdata at `index` as a bridge object.
///
/// Checks the metatable's ownership marker first, so foreign userdata
/// and stale tokens both come back as `None`.
pub(crate) unsafe fn read_object(
    l: *mut sys::lua_State,
    bridge: *mut BridgeState,
    index: c_int,
) -> Option<ObjectRef> {
    unsafe {
        if sys::lua_type(l, index) != sys::LUA_TUSERDATA {
            return None;
        }
        if sys::lua_getmetatable(l, index) == 0 {
            return None;
        }
        sys::lua_getfield(l, -1, c"__bridge".as_ptr());
        let marker = sys::lua_touserdata(l, -1);
        sys::lua_pop(l, 2);
        if marker != bridge as *mut std::ffi::c_void {
            return None;
        }
        let block = sys::lua_touserdata(l, index) as *const u64;
        let token = RefToken::from_bits(block.read());
        (*bridge).registry.resolve(token)
    }
}
