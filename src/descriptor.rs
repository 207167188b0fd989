//! Type descriptor builder.
//!
//! A descriptor is the engine-side face of a host type: a metatable
//! wired as its own resolution table, holding one call-adapter closure
//! per bound method name plus the three lifecycle hooks (finalize,
//! stringify, equality). Descriptors are built lazily, at most once per
//! type per engine instance.

use std::ffi::{CString, c_void};
use std::rc::Rc;

use moonbind_sys as sys;
use rustc_hash::FxHashMap;

use crate::adapter;
use crate::bind::{DisplayHook, EqHook, MethodDef, TypeBuilder, UserType};
use crate::mangle::mangle_declaration;
use crate::registry::RefRegistry;

/// Per (type, simple-method-name) overload table: mangled signature key
/// to resolved method.
pub(crate) struct LookupTable {
    pub(crate) name: String,
    pub(crate) entries: FxHashMap<String, Rc<MethodDef>>,
}

impl LookupTable {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: FxHashMap::default(),
        }
    }

    /// Register one overload. Duplicate keys are a configuration error
    /// and abort setup; an overload is never silently replaced.
    pub(crate) fn insert(&mut self, key: String, def: Rc<MethodDef>) {
        use std::collections::hash_map::Entry;
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                panic!(
                    "duplicate overload '{}' registered for '{}'",
                    entry.key(),
                    self.name
                );
            }
            Entry::Vacant(entry) => {
                entry.insert(def);
            }
        }
    }
}

/// One host type's engine-side description.
pub(crate) struct Descriptor {
    pub(crate) type_name: &'static str,
    /// Registry key of the engine-side metatable.
    pub(crate) metatable: CString,
    /// Simple method name to lookup-table index.
    pub(crate) methods: FxHashMap<String, usize>,
    pub(crate) display: Option<DisplayHook>,
    pub(crate) eq: Option<EqHook>,
}

/// Registration tables owned by one facade instance.
///
/// Never process-global: every engine instance carries its own set, so
/// independent instances stay fully isolated.
#[derive(Default)]
pub(crate) struct Bindings {
    pub(crate) tables: Vec<LookupTable>,
    pub(crate) descriptors: Vec<Descriptor>,
    /// Type name to descriptor index.
    pub(crate) types: FxHashMap<&'static str, usize>,
    /// Global function bind-name to lookup-table index.
    pub(crate) globals: FxHashMap<String, usize>,
}

impl Bindings {
    /// Lookup table for a global bind-name, created on first use so
    /// later registrations under the same name land as overloads.
    pub(crate) fn global_table(&mut self, name: &str) -> usize {
        if let Some(&table) = self.globals.get(name) {
            return table;
        }
        self.tables.push(LookupTable::new(name));
        let table = self.tables.len() - 1;
        self.globals.insert(name.to_owned(), table);
        table
    }
}

/// All mutable bridge state threaded to native callbacks through
/// upvalues. Owned by the facade behind a stable heap address.
#[derive(Default)]
pub(crate) struct BridgeState {
    pub(crate) bindings: Bindings,
    pub(crate) registry: RefRegistry,
}

/// Build `T`'s descriptor if this engine instance has none yet, and
/// return its index.
///
/// Idempotent: a second call for the same type returns the cached
/// descriptor untouched; no hooks or methods are re-registered.
///
/// # Safety
///
/// `l` must be a live engine handle and `bridge` the state owned by the
/// facade driving it.
pub(crate) unsafe fn ensure_descriptor<T: UserType>(
    l: *mut sys::lua_State,
    bridge: *mut BridgeState,
) -> usize {
    let state = unsafe { &mut *bridge };
    if let Some(&id) = state.bindings.types.get(T::NAME) {
        return id;
    }

    let mut builder = TypeBuilder::<T>::new();
    T::bind(&mut builder);
    let (methods, display, eq) = builder.finish();

    // Group bound methods into per-name overload tables.
    let mut method_tables: FxHashMap<String, usize> = FxHashMap::default();
    for (bind_name, def) in methods {
        let key = mangle_declaration(&bind_name, def.is_static, &def.params);
        let table = match method_tables.get(&bind_name) {
            Some(&table) => table,
            None => {
                state.bindings.tables.push(LookupTable::new(&*bind_name));
                let table = state.bindings.tables.len() - 1;
                method_tables.insert(bind_name, table);
                table
            }
        };
        state.bindings.tables[table].insert(key, Rc::new(def));
    }

    let metatable = match CString::new(format!("moonbind.{}", T::NAME)) {
        Ok(name) => name,
        Err(_) => panic!("type name '{}' contains an interior NUL", T::NAME),
    };

    let id = state.bindings.descriptors.len();
    state.bindings.descriptors.push(Descriptor {
        type_name: T::NAME,
        metatable,
        methods: method_tables,
        display,
        eq,
    });
    state.bindings.types.insert(T::NAME, id);

    unsafe {
        build_metatable(l, bridge, id);
    }
    id
}

/// Create the engine-side metatable for an already-recorded descriptor.
unsafe fn build_metatable(l: *mut sys::lua_State, bridge: *mut BridgeState, id: usize) {
    let state = unsafe { &mut *bridge };
    let descriptor = &state.bindings.descriptors[id];
    let bridge_ptr = bridge as *mut c_void;

    unsafe {
        if sys::luaL_newmetatable(l, descriptor.metatable.as_ptr()) == 0 {
            // Another type already claimed this registry key.
            panic!(
                "metatable '{}' already registered on this engine",
                descriptor.type_name
            );
        }

        for (simple_name, &table) in &descriptor.methods {
            let field = match CString::new(simple_name.as_str()) {
                Ok(field) => field,
                Err(_) => panic!("method name '{simple_name}' contains an interior NUL"),
            };
            sys::lua_pushlightuserdata(l, bridge_ptr);
            sys::lua_pushinteger(l, table as sys::lua_Integer);
            sys::lua_pushcclosure(l, adapter::call_adapter, 2);
            sys::lua_setfield(l, -2, field.as_ptr());
        }

        // Member lookup on an instance resolves through the descriptor
        // itself.
        sys::lua_pushvalue(l, -1);
        sys::lua_setfield(l, -2, c"__index".as_ptr());

        sys::lua_pushlightuserdata(l, bridge_ptr);
        sys::lua_pushcclosure(l, adapter::finalize_adapter, 1);
        sys::lua_setfield(l, -2, c"__gc".as_ptr());

        sys::lua_pushlightuserdata(l, bridge_ptr);
        sys::lua_pushinteger(l, id as sys::lua_Integer);
        sys::lua_pushcclosure(l, adapter::stringify_adapter, 2);
        sys::lua_setfield(l, -2, c"__tostring".as_ptr());

        sys::lua_pushlightuserdata(l, bridge_ptr);
        sys::lua_pushinteger(l, id as sys::lua_Integer);
        sys::lua_pushcclosure(l, adapter::equality_adapter, 2);
        sys::lua_setfield(l, -2, c"__eq".as_ptr());

        // Ownership marker checked when reading userdata back, so
        // foreign userdata never resolves as a bridge object.
        sys::lua_pushlightuserdata(l, bridge_ptr);
        sys::lua_setfield(l, -2, c"__bridge".as_ptr());

        sys::lua_pop(l, 1);
    }
}
