//! End-to-end tests driving the bridge through real script execution.

use std::cell::Cell;
use std::rc::Rc;

use moonbind::{Function, LuaState, ParamKind, TypeBuilder, UserType, Value};

#[derive(Default)]
struct Counter {
    count: i64,
    multiplied: Rc<Cell<bool>>,
}

impl UserType for Counter {
    const NAME: &'static str = "Counter";

    fn bind(builder: &mut TypeBuilder<Self>) {
        builder
            .method(
                "multiply",
                &[ParamKind::Number, ParamKind::Number],
                |counter, args| {
                    counter.multiplied.set(true);
                    Ok(Some(Value::Integer(args.integer(0)? * args.integer(1)?)))
                },
            )
            .method("increment", &[], |counter, _| {
                counter.count += 1;
                Ok(None)
            })
            .method("value", &[], |counter, _| {
                Ok(Some(Value::Integer(counter.count)))
            })
            .static_method("origin", &[], |_| Ok(Some(Value::Integer(0))));
    }
}

struct Labeled {
    label: String,
}

impl UserType for Labeled {
    const NAME: &'static str = "Labeled";

    fn bind(builder: &mut TypeBuilder<Self>) {
        builder
            // Overload set: same simple name, different categories.
            .method("describe", &[ParamKind::Number], |labeled, args| {
                Ok(Some(Value::Text(format!(
                    "{} #{}",
                    labeled.label,
                    args.integer(0)?
                ))))
            })
            .method("describe", &[ParamKind::Text], |labeled, args| {
                Ok(Some(Value::Text(format!(
                    "{} ({})",
                    labeled.label,
                    args.text(0)?
                ))))
            })
            .with_display(|labeled| format!("Labeled[{}]", labeled.label))
            .with_eq(|a, b| a.label == b.label);
    }
}

fn add_function() -> Function {
    Function::new("add", &[ParamKind::Number, ParamKind::Number], |args| {
        Ok(Some(Value::Number(args.number(0)? + args.number(1)?)))
    })
}

#[test]
fn static_function_adds_numbers() {
    let mut lua = LuaState::new();
    lua.register_function(add_function());

    let result = lua.eval("return add(3.14, 4.13)").unwrap();
    assert_eq!(result.len(), 1);
    let sum = result.get(0).and_then(Value::as_number).unwrap();
    assert!((sum - 7.27).abs() < 1e-9);
}

#[test]
fn explicit_name_overrides_the_bindable_name() {
    let mut lua = LuaState::new();
    lua.register_function_as(add_function(), "sum");

    assert!(lua.eval("return sum(1, 2)").is_some());
    assert!(lua.eval("return add(1, 2)").is_none());
}

#[test]
fn instance_method_multiplies_through_the_receiver() {
    let mut lua = LuaState::new();
    lua.register_object("obj", Counter::default());

    let result = lua.eval("return obj:multiply(100001, 7)").unwrap();
    assert_eq!(result.get(0).and_then(Value::as_integer), Some(700007));
}

#[test]
fn static_method_is_reachable_without_a_receiver() {
    let mut lua = LuaState::new();
    lua.register_object("obj", Counter::default());

    let result = lua.eval("return obj.origin()").unwrap();
    assert_eq!(result.get(0).and_then(Value::as_integer), Some(0));
}

#[test]
fn scalar_results_round_trip() {
    let mut lua = LuaState::new();
    let result = lua.eval("return 42, true, 'hi', 3.5").unwrap();
    assert_eq!(result.len(), 4);
    assert_eq!(result.get(0).and_then(Value::as_integer), Some(42));
    assert_eq!(result.get(1).and_then(Value::as_boolean), Some(true));
    assert_eq!(result.get(2).and_then(Value::as_text), Some("hi"));
    assert_eq!(result.get(3).and_then(Value::as_number), Some(3.5));
}

#[test]
fn zero_results_are_absence_not_an_empty_sequence() {
    let mut lua = LuaState::new();
    assert!(lua.eval("local x = 1").is_none());
}

#[test]
fn invalid_source_reports_and_returns_nothing() {
    let mut lua = LuaState::new();
    assert!(lua.eval("return return").is_none());
}

#[test]
fn runtime_script_error_reports_and_returns_nothing() {
    let mut lua = LuaState::new();
    assert!(lua.eval("error('boom')").is_none());
}

#[test]
fn call_invokes_a_global_script_function() {
    let mut lua = LuaState::new();
    lua.eval("function twice(x) return x * 2 end");

    let result = lua.call("twice", &[Value::Number(4.0)]).unwrap();
    assert_eq!(result.get(0).and_then(Value::as_number), Some(8.0));
    assert!(lua.call("missing", &[]).is_none());
}

#[test]
fn multi_value_results_expand_depth_first() {
    let mut lua = LuaState::new();
    lua.register_function(Function::new("triple", &[], |_| {
        Ok(Some(Value::Multi(
            vec![
                Value::Integer(1),
                Value::Multi(vec![Value::Integer(2), Value::Integer(3)].into()),
            ]
            .into(),
        )))
    }));

    let result = lua
        .eval("local a, b, c = triple() return a + b + c")
        .unwrap();
    assert_eq!(result.get(0).and_then(Value::as_integer), Some(6));
}

#[test]
fn overloads_resolve_by_argument_categories() {
    let mut lua = LuaState::new();
    lua.register_object("item", Labeled { label: "crate".into() });

    let by_number = lua.eval("return item:describe(7)").unwrap();
    assert_eq!(
        by_number.get(0).and_then(Value::as_text),
        Some("crate #7")
    );

    let by_text = lua.eval("return item:describe('full')").unwrap();
    assert_eq!(
        by_text.get(0).and_then(Value::as_text),
        Some("crate (full)")
    );
}

#[test]
fn unknown_overload_names_the_demangled_signature() {
    let mut lua = LuaState::new();
    let flag = Rc::new(Cell::new(false));
    lua.register_object(
        "obj",
        Counter {
            count: 0,
            multiplied: flag.clone(),
        },
    );

    let result = lua
        .eval("local ok, err = pcall(function() return obj:multiply('a', 'b') end) return ok, err")
        .unwrap();
    assert_eq!(result.get(0).and_then(Value::as_boolean), Some(false));
    let message = result.get(1).and_then(Value::as_text).unwrap();
    assert!(message.contains("multiply_css"), "got: {message}");
    assert!(message.contains("multiply(Object,Text,Text)"), "got: {message}");
    assert!(!flag.get(), "no host invocation may happen");
}

#[test]
fn wrong_argument_count_aborts_before_invocation() {
    let mut lua = LuaState::new();
    let flag = Rc::new(Cell::new(false));
    lua.register_object(
        "obj",
        Counter {
            count: 0,
            multiplied: flag.clone(),
        },
    );

    // The table argument has no mangling category, so the key still
    // matches the two-number overload while the stack carries three
    // arguments; the arity check must reject that before invocation.
    let result = lua
        .eval("local ok, err = pcall(function() return obj:multiply(1, 2, {}) end) return ok, err")
        .unwrap();
    assert_eq!(result.get(0).and_then(Value::as_boolean), Some(false));
    let message = result.get(1).and_then(Value::as_text).unwrap();
    assert!(
        message.contains("Invalid number of parameters"),
        "got: {message}"
    );
    assert!(!flag.get(), "no host invocation may happen");
}

#[test]
fn dot_call_on_an_instance_method_is_an_unknown_function() {
    let mut lua = LuaState::new();
    lua.register_object("obj", Counter::default());

    // Without the receiver on the stack the key lacks its leading
    // Object code and resolves to nothing.
    let result = lua
        .eval("local ok = pcall(function() return obj.multiply(1, 2) end) return ok")
        .unwrap();
    assert_eq!(result.get(0).and_then(Value::as_boolean), Some(false));
}

#[test]
fn host_failure_unwinds_to_the_protected_call() {
    let mut lua = LuaState::new();
    lua.register_function(Function::new("fail", &[], |_| {
        Err(moonbind::NativeError::message("host says no"))
    }));

    let result = lua
        .eval("local ok, err = pcall(fail) return ok, err")
        .unwrap();
    assert_eq!(result.get(0).and_then(Value::as_boolean), Some(false));
    assert!(
        result
            .get(1)
            .and_then(Value::as_text)
            .unwrap()
            .contains("host says no")
    );
}

#[test]
fn registering_two_objects_of_one_type_is_idempotent() {
    let mut lua = LuaState::new();
    let first = lua.register_object("a", Counter::default());
    let second = lua.register_object("b", Counter::default());

    let entries_a = lua.inspect_descriptor(&first);
    let entries_b = lua.inspect_descriptor(&second);
    assert_eq!(entries_a, entries_b);
    assert_eq!(
        entries_a,
        vec![
            "increment(Object)".to_owned(),
            "multiply(Object,Number,Number)".to_owned(),
            "origin()".to_owned(),
            "value(Object)".to_owned(),
        ]
    );

    // Both instances dispatch through the shared descriptor.
    assert!(lua.eval("return a:multiply(2, 3)").is_some());
    assert!(lua.eval("return b:multiply(2, 3)").is_some());
}

#[test]
fn script_mutation_is_visible_through_the_host_handle() {
    let mut lua = LuaState::new();
    let handle = lua.register_object("obj", Counter::default());

    lua.eval("obj:increment() obj:increment()");
    assert_eq!(handle.borrow::<Counter>().unwrap().count, 2);

    let result = lua.eval("return obj:value()").unwrap();
    assert_eq!(result.get(0).and_then(Value::as_integer), Some(2));
}

#[test]
fn finalize_notification_releases_exactly_one_entry() {
    let mut lua = LuaState::new();
    lua.register_object("keep", Counter::default());
    lua.register_object("drop", Counter::default());
    assert_eq!(lua.tracked_references(), 2);

    lua.eval("drop = nil");
    lua.collect_garbage();
    lua.collect_garbage();
    assert_eq!(lua.tracked_references(), 1);

    // The surviving handle still resolves.
    assert!(lua.eval("return keep:value()").is_some());
}

#[test]
fn tracked_object_outlives_host_handle_while_engine_reachable() {
    let mut lua = LuaState::new();
    {
        let handle = lua.register_object("obj", Counter::default());
        drop(handle);
    }
    lua.collect_garbage();
    // Still reachable through the global, so still tracked and usable.
    assert_eq!(lua.tracked_references(), 1);
    let result = lua.eval("obj:increment() return obj:value()").unwrap();
    assert_eq!(result.get(0).and_then(Value::as_integer), Some(1));
}

#[test]
fn stringify_hook_reports_identity() {
    let mut lua = LuaState::new();
    lua.register_object("obj", Counter::default());
    lua.register_object("item", Labeled { label: "box".into() });

    let default_text = lua.eval("return tostring(obj)").unwrap();
    let text = default_text.get(0).and_then(Value::as_text).unwrap().to_owned();
    assert!(text.starts_with("Counter: 0x"), "got: {text}");

    let custom_text = lua.eval("return tostring(item)").unwrap();
    assert_eq!(
        custom_text.get(0).and_then(Value::as_text),
        Some("Labeled[box]")
    );
}

#[test]
fn equality_hook_defaults_to_identity() {
    let mut lua = LuaState::new();
    let handle = lua.register_object("a", Counter::default());
    lua.set_global("b", &Value::Object(handle.clone()));
    lua.register_object("c", Counter::default());

    let result = lua.eval("return a == b, a == c").unwrap();
    assert_eq!(result.get(0).and_then(Value::as_boolean), Some(true));
    assert_eq!(result.get(1).and_then(Value::as_boolean), Some(false));
}

#[test]
fn equality_hook_delegates_to_host_semantics() {
    let mut lua = LuaState::new();
    lua.register_object("x", Labeled { label: "same".into() });
    lua.register_object("y", Labeled { label: "same".into() });
    lua.register_object("z", Labeled { label: "other".into() });

    let result = lua.eval("return x == y, x == z").unwrap();
    assert_eq!(result.get(0).and_then(Value::as_boolean), Some(true));
    assert_eq!(result.get(1).and_then(Value::as_boolean), Some(false));
}

#[test]
fn objects_pass_back_into_host_callables() {
    let mut lua = LuaState::new();
    lua.register_function(Function::new("reset", &[ParamKind::Object], |args| {
        let target = args.object(0)?;
        target.with_mut(|counter: &mut Counter| counter.count = 0);
        Ok(None)
    }));
    let handle = lua.register_object("obj", Counter::default());

    lua.eval("obj:increment() reset(obj)");
    assert_eq!(handle.borrow::<Counter>().unwrap().count, 0);
}

#[test]
fn globals_round_trip_through_set_and_get() {
    let mut lua = LuaState::new();
    lua.set_global("answer", &Value::Integer(42));
    assert_eq!(lua.global("answer").as_integer(), Some(42));
    assert!(lua.global("never_set").is_nil());

    // Engine categories outside the value model degrade to nil.
    lua.eval("holder = {}");
    assert!(lua.global("holder").is_nil());
}

#[test]
fn embedded_zeros_survive_the_text_round_trip() {
    let mut lua = LuaState::new();
    lua.eval("function length(s) return #s end");
    let text = Value::Text("ab\0cd".to_owned());
    let result = lua.call("length", &[text]).unwrap();
    assert_eq!(result.get(0).and_then(Value::as_integer), Some(5));
}
