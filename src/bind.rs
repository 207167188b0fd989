//! Compile-time-known bindings.
//!
//! Dispatch never introspects host types at runtime. A host type opts
//! in by implementing [`UserType`] and describing its bound methods
//! through a [`TypeBuilder`]; free functions are described by
//! [`Function`]. Both produce [`MethodDef`]s, the resolved entries the
//! lookup tables hand to the call adapter.

use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::NativeError;
use crate::mangle::ParamKind;
use crate::value::{Args, ObjectRef, Value};

/// Outcome of a bound host callable: zero or one value (use
/// [`Value::Multi`] for several), or a failure surfaced to the script.
pub type CallResult = Result<Option<Value>, NativeError>;

pub(crate) type NativeCall = Box<dyn Fn(Option<&ObjectRef>, &Args) -> CallResult>;
pub(crate) type DisplayHook = Rc<dyn Fn(&ObjectRef) -> Option<String>>;
pub(crate) type EqHook = Rc<dyn Fn(&ObjectRef, &ObjectRef) -> bool>;

/// A resolved bound callable: declared parameter categories, staticness,
/// and the type-erased invocation closure.
pub struct MethodDef {
    pub(crate) params: Vec<ParamKind>,
    pub(crate) is_static: bool,
    pub(crate) call: NativeCall,
}

/// A host type whose instances can cross into the engine.
///
/// `NAME` doubles as the engine-side metatable key, so it must be
/// unique per engine instance.
pub trait UserType: Sized + 'static {
    const NAME: &'static str;

    /// Describe the bound method set.
    fn bind(builder: &mut TypeBuilder<Self>);
}

/// Builder collecting a type's bound methods and lifecycle overrides.
///
/// Handed to [`UserType::bind`] by the descriptor builder; duplicate
/// overloads are rejected later, at descriptor construction.
pub struct TypeBuilder<T: UserType> {
    methods: Vec<(String, MethodDef)>,
    display: Option<DisplayHook>,
    eq: Option<EqHook>,
    _marker: PhantomData<T>,
}

impl<T: UserType> TypeBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            methods: Vec::new(),
            display: None,
            eq: None,
            _marker: PhantomData,
        }
    }

    /// Bind an instance method. The receiver is resolved from the
    /// engine-side handle and downcast before `body` runs.
    pub fn method<F>(&mut self, name: &str, params: &[ParamKind], body: F) -> &mut Self
    where
        F: Fn(&mut T, &Args) -> CallResult + 'static,
    {
        let call = Box::new(move |receiver: Option<&ObjectRef>, args: &Args| {
            let receiver = receiver.ok_or(NativeError::ReceiverType { expected: T::NAME })?;
            let mut guard = receiver.borrow_any_mut();
            let typed = guard
                .downcast_mut::<T>()
                .ok_or(NativeError::ReceiverType { expected: T::NAME })?;
            body(typed, args)
        });
        self.methods.push((
            name.to_owned(),
            MethodDef {
                params: params.to_vec(),
                is_static: false,
                call,
            },
        ));
        self
    }

    /// Bind a static method, reachable from scripts as a field of any
    /// instance (`obj.name(...)`).
    pub fn static_method<F>(&mut self, name: &str, params: &[ParamKind], body: F) -> &mut Self
    where
        F: Fn(&Args) -> CallResult + 'static,
    {
        self.methods.push((
            name.to_owned(),
            MethodDef {
                params: params.to_vec(),
                is_static: true,
                call: Box::new(move |_receiver, args| body(args)),
            },
        ));
        self
    }

    /// Override the engine-side stringify hook.
    pub fn with_display<F>(&mut self, display: F) -> &mut Self
    where
        F: Fn(&T) -> String + 'static,
    {
        self.display = Some(Rc::new(move |object: &ObjectRef| {
            object.with(|value: &T| display(value))
        }));
        self
    }

    /// Override the engine-side equality hook. The default compares
    /// handle identity.
    pub fn with_eq<F>(&mut self, eq: F) -> &mut Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.eq = Some(Rc::new(move |a: &ObjectRef, b: &ObjectRef| {
            a.with(|x: &T| b.with(|y: &T| eq(x, y)))
                .flatten()
                .unwrap_or(false)
        }));
        self
    }

    pub(crate) fn finish(self) -> (Vec<(String, MethodDef)>, Option<DisplayHook>, Option<EqHook>) {
        (self.methods, self.display, self.eq)
    }
}

/// A free function or static host method bound as a global script
/// function.
pub struct Function {
    name: String,
    def: Rc<MethodDef>,
}

impl Function {
    pub fn new<F>(name: impl Into<String>, params: &[ParamKind], body: F) -> Self
    where
        F: Fn(&Args) -> CallResult + 'static,
    {
        Self {
            name: name.into(),
            def: Rc::new(MethodDef {
                params: params.to_vec(),
                is_static: true,
                call: Box::new(move |_receiver, args| body(args)),
            }),
        }
    }

    /// The bindable name used when no explicit override is given.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.def.params
    }

    pub(crate) fn into_def(self) -> Rc<MethodDef> {
        self.def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point {
        x: i64,
        y: i64,
    }

    impl UserType for Point {
        const NAME: &'static str = "Point";

        fn bind(builder: &mut TypeBuilder<Self>) {
            builder
                .method("sum", &[], |p, _| Ok(Some(Value::Integer(p.x + p.y))))
                .static_method("zero", &[], |_| Ok(Some(Value::Integer(0))));
        }
    }

    fn defs() -> Vec<(String, MethodDef)> {
        let mut builder = TypeBuilder::<Point>::new();
        Point::bind(&mut builder);
        builder.finish().0
    }

    #[test]
    fn instance_methods_are_non_static() {
        let methods = defs();
        let (name, def) = &methods[0];
        assert_eq!(name, "sum");
        assert!(!def.is_static);

        let receiver = ObjectRef::new(Point { x: 2, y: 3 });
        let result = (def.call)(Some(&receiver), &Args::new(Vec::new()));
        assert_eq!(result.unwrap(), Some(Value::Integer(5)));
    }

    #[test]
    fn instance_method_without_receiver_fails() {
        let methods = defs();
        let (_, def) = &methods[0];
        let result = (def.call)(None, &Args::new(Vec::new()));
        assert!(matches!(
            result,
            Err(NativeError::ReceiverType { expected: "Point" })
        ));
    }

    #[test]
    fn wrong_receiver_type_fails() {
        struct Other;
        impl UserType for Other {
            const NAME: &'static str = "Other";
            fn bind(_builder: &mut TypeBuilder<Self>) {}
        }

        let methods = defs();
        let (_, def) = &methods[0];
        let receiver = ObjectRef::new(Other);
        let result = (def.call)(Some(&receiver), &Args::new(Vec::new()));
        assert!(matches!(result, Err(NativeError::ReceiverType { .. })));
    }

    #[test]
    fn static_methods_ignore_the_receiver() {
        let methods = defs();
        let (name, def) = &methods[1];
        assert_eq!(name, "zero");
        assert!(def.is_static);
        let result = (def.call)(None, &Args::new(Vec::new()));
        assert_eq!(result.unwrap(), Some(Value::Integer(0)));
    }

    #[test]
    fn free_function_invokes_its_body() {
        let double = Function::new("double", &[ParamKind::Number], |args| {
            Ok(Some(Value::Number(args.number(0)? * 2.0)))
        });
        assert_eq!(double.name(), "double");
        assert_eq!(double.params(), &[ParamKind::Number]);

        let def = double.into_def();
        let result = (def.call)(None, &Args::new(vec![Value::Number(2.5)]));
        assert_eq!(result.unwrap(), Some(Value::Number(5.0)));
    }
}
