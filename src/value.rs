//! Host-side value model for data crossing the engine boundary.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use moonbind_sys::lua_State;

use crate::bind::UserType;
use crate::descriptor::BridgeState;
use crate::error::NativeError;

/// Descriptor-ensure hook carried by every [`ObjectRef`]; instantiated
/// per concrete type so pushing never needs runtime type introspection.
pub(crate) type EnsureFn = unsafe fn(*mut lua_State, *mut BridgeState) -> usize;

/// A host value as seen by the bridge.
///
/// The set is closed, so pushing an unsupported host category is ruled
/// out at compile time. Reading from the engine side can still meet
/// categories outside this set (tables, functions, threads); those come
/// back as [`Value::Nil`] with a logged diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Object(ObjectRef),
    /// Ordered sequence expanded in place when pushed; nested sequences
    /// expand depth-first, preserving order.
    Multi(MultiValue),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

/// Ordered, fixed-length sequence of values representing one call's full
/// argument or result list.
///
/// Created per call and discarded once marshaling completes. Zero
/// results are always represented as the absence of a `MultiValue`
/// (`Option::None` at the facade), never as an empty sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiValue {
    values: Vec<Value>,
}

impl MultiValue {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for MultiValue {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl IntoIterator for MultiValue {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// Shared handle to a host object reachable from the engine.
///
/// Cloning is cheap and shares the underlying object. The handle keeps
/// the object alive host-side; engine-side lifetime extension goes
/// through the reference registry instead.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Rc<RefCell<dyn Any>>,
    type_name: &'static str,
    pub(crate) ensure: EnsureFn,
}

impl ObjectRef {
    /// Wrap a host object for use from scripts.
    pub fn new<T: UserType>(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
            type_name: T::NAME,
            ensure: crate::descriptor::ensure_descriptor::<T>,
        }
    }

    /// The bound type's registered name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Identity comparison: true when both handles share one object.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` against the object if it is a `T`.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.borrow().downcast_ref::<T>().map(f)
    }

    /// Run `f` against the object mutably if it is a `T`.
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.borrow_mut().downcast_mut::<T>().map(f)
    }

    /// Typed shared borrow; `None` if the object is not a `T`.
    pub fn borrow<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.inner.borrow(), |value| value.downcast_ref::<T>()).ok()
    }

    /// Typed exclusive borrow; `None` if the object is not a `T`.
    pub fn borrow_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.inner.borrow_mut(), |value| value.downcast_mut::<T>()).ok()
    }

    pub(crate) fn borrow_any_mut(&self) -> RefMut<'_, dyn Any> {
        self.inner.borrow_mut()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("type_name", &self.type_name)
            .field("address", &Rc::as_ptr(&self.inner))
            .finish()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// Converted argument window handed to bound host callables.
///
/// Indices are zero-based and count declared parameters only; the
/// receiver of an instance method is never part of the window.
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    fn arg(&self, index: usize) -> Result<&Value, NativeError> {
        self.values
            .get(index)
            .ok_or(NativeError::MissingArg { index })
    }

    pub fn boolean(&self, index: usize) -> Result<bool, NativeError> {
        self.arg(index)?
            .as_boolean()
            .ok_or(NativeError::ArgType {
                index,
                expected: "boolean",
            })
    }

    pub fn integer(&self, index: usize) -> Result<i64, NativeError> {
        self.arg(index)?.as_integer().ok_or(NativeError::ArgType {
            index,
            expected: "integer",
        })
    }

    /// Numeric access; integers widen to `f64`.
    pub fn number(&self, index: usize) -> Result<f64, NativeError> {
        self.arg(index)?.as_number().ok_or(NativeError::ArgType {
            index,
            expected: "number",
        })
    }

    pub fn text(&self, index: usize) -> Result<&str, NativeError> {
        self.arg(index)?.as_text().ok_or(NativeError::ArgType {
            index,
            expected: "text",
        })
    }

    pub fn object(&self, index: usize) -> Result<&ObjectRef, NativeError> {
        self.arg(index)?.as_object().ok_or(NativeError::ArgType {
            index,
            expected: "object reference",
        })
    }
}
