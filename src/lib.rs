//! moonbind — a dynamic binding bridge between host Rust objects and an
//! embedded Lua 5.4 engine.
//!
//! The bridge exposes host objects, free functions, and overloaded
//! methods to scripts and marshals values and lifetimes across the
//! boundary. Overloads are resolved at call time through a
//! signature-mangled lookup key; per-type descriptors are built lazily
//! and idempotently; host objects referenced from the engine stay alive
//! through a generational reference registry driven by the engine's
//! finalize notifications.
//!
//! # Example
//!
//! ```
//! use moonbind::{Function, LuaState, ParamKind, Value};
//!
//! let mut lua = LuaState::new();
//! lua.register_function(Function::new(
//!     "add",
//!     &[ParamKind::Number, ParamKind::Number],
//!     |args| Ok(Some(Value::Number(args.number(0)? + args.number(1)?))),
//! ));
//!
//! let result = lua.eval("return add(1.5, 2.25)").unwrap();
//! assert_eq!(result.get(0).and_then(Value::as_number), Some(3.75));
//! ```

mod adapter;
mod bind;
mod descriptor;
mod error;
mod mangle;
mod registry;
mod stack;
mod state;
mod value;

pub use bind::{CallResult, Function, TypeBuilder, UserType};
pub use error::{MangleError, NativeError};
pub use mangle::{ParamKind, demangle, mangle_call_site, mangle_declaration};
pub use registry::{RefRegistry, RefToken};
pub use state::LuaState;
pub use value::{Args, MultiValue, ObjectRef, Value};
