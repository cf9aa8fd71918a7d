//! Function invocation, construction, eval, and function-object
//! instantiation.
//!
//! Calls recurse: each invocation builds the callee's environment record
//! (indexed or activation-backed, per the code block's flags), coerces the
//! receiver for sloppy callees, and runs a fresh frame. Exactly one
//! enter/leave pair brackets every call on all exit paths.

use std::rc::Rc;

use crate::{
    atom::{AtomId, StaticAtoms},
    bytecode::{code::CodeBlock, compiler, vm::object_ops},
    environment::{ActivationData, DeclarativeBindings, EnvRecord, LexicalEnv, ThisStatus},
    error::{RunError, RunResult, SimpleError},
    heap::{HeapData, HeapId},
    object::{self, BoundData, FunctionData, JsObject, NativeFunction, ObjectKind},
    parser,
    resource::ResourceTracker,
    shape::PropertyFlags,
    source::SourceBuffer,
    string,
    tracer::VmTracer,
    value::Value,
};

use super::{Frame, VmContext, binary, run_frame};

/// Calls a value. `this` arrives uncoerced; sloppy callees substitute the
/// global object for `undefined`/`null` in their own prologue.
pub(crate) fn invoke<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    callee: Value,
    this: Value,
    args: Vec<Value>,
    is_new: bool,
) -> RunResult<Value> {
    let Some(callee_id) = callable_id(ctx, callee) else {
        let description = binary::to_display_string(ctx, callee).unwrap_or_default();
        return Err(RunError::type_error(format!("{description} is not a function")));
    };

    ctx.call_depth += 1;
    let result = invoke_inner(ctx, callee_id, this, args, is_new);
    ctx.call_depth -= 1;
    result
}

fn callable_id<T: ResourceTracker, Tr: VmTracer>(ctx: &VmContext<T, Tr>, callee: Value) -> Option<HeapId> {
    match callee {
        Value::Ref(id) if ctx.heap.object_checked(id).is_some_and(|o| o.as_function().is_some()) => Some(id),
        _ => None,
    }
}

fn invoke_inner<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    callee_id: HeapId,
    this: Value,
    args: Vec<Value>,
    is_new: bool,
) -> RunResult<Value> {
    ctx.heap.tracker().check_call_depth(ctx.call_depth)?;

    let (code, outer_env, is_native) = {
        let function = ctx
            .heap
            .object(callee_id)
            .as_function()
            .expect("callable_id verified the function");
        (
            Rc::clone(&function.code),
            function.outer_env,
            function.native.is_some() || function.bound.is_some(),
        )
    };

    let (env, this_value) = if is_native {
        (ctx.global_env, this)
    } else {
        build_function_environment(ctx, &code, outer_env.unwrap_or(ctx.global_env), this, &args)?
    };

    let mut frame = Frame::new(code, env, this_value, Some(callee_id), args, is_new);
    run_frame(ctx, &mut frame)
}

/// Builds the function environment record for one invocation: parameter
/// slots filled left to right (so duplicate names take the last argument),
/// remaining inner identifiers undefined until their initializers run.
fn build_function_environment<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    code: &Rc<CodeBlock>,
    outer_env: HeapId,
    this: Value,
    args: &[Value],
) -> RunResult<(HeapId, Value)> {
    // sloppy receiver adjustment happens here, in the callee's prologue
    let this_value = if code.is_strict() {
        this
    } else {
        match this.materialize() {
            Value::Undefined | Value::Null => Value::Ref(ctx.global_object),
            other => other,
        }
    };

    let identifiers = code.inner_identifiers();
    let mut bindings = if code.needs_activation() {
        DeclarativeBindings::Activation(ActivationData::new(identifiers.to_vec()))
    } else {
        DeclarativeBindings::Indexed(vec![Value::Undefined; identifiers.len()])
    };
    for (index, &param) in code.params().iter().enumerate() {
        let slot = identifiers
            .iter()
            .position(|&name| name == param)
            .ok_or_else(|| RunError::internal("parameter missing from identifier table"))?;
        let value = args.get(index).copied().unwrap_or(Value::Undefined);
        bindings.set(slot, value);
    }

    let mut env = LexicalEnv::function(bindings, this_value, Some(outer_env));
    if let EnvRecord::Function { this_status, .. } = &mut env.record {
        *this_status = ThisStatus::Initialized;
    }
    let env_id = ctx.heap.allocate(HeapData::Env(env))?;

    // dynamic scopes get a real `arguments` binding so eval can see it
    if code.needs_arguments() && code.is_dynamic_scope() {
        let args_obj = materialize_arguments(ctx, code, args, None)?;
        if let EnvRecord::Function {
            bindings: DeclarativeBindings::Activation(data),
            ..
        } = &mut ctx.heap.env_mut(env_id).record
        {
            let slot = data.create_binding(AtomId::from(StaticAtoms::Arguments));
            data.set(slot, args_obj);
        }
        ctx.bump_ic_generation();
    }
    Ok((env_id, this_value))
}

/// `new callee(...)`: builds `this` from `callee.prototype`, runs the body
/// as a construction, and keeps the explicit return value only when it is
/// an object.
pub(crate) fn construct<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    callee: Value,
    mut args: Vec<Value>,
) -> RunResult<Value> {
    // unwrap bound-function chains, accumulating bound arguments
    let mut target = callee;
    loop {
        let Some(id) = callable_id(ctx, target) else {
            let description = binary::to_display_string(ctx, target).unwrap_or_default();
            return Err(RunError::type_error(format!("{description} is not a constructor")));
        };
        let function = ctx.heap.object(id).as_function().expect("checked above");
        match &function.bound {
            Some(bound) => {
                let mut merged = bound.bound_args.clone();
                let next = bound.target;
                merged.extend(args);
                args = merged;
                target = next;
            }
            None => {
                if function.native.is_some() || !function.is_constructor {
                    let description = binary::to_display_string(ctx, target).unwrap_or_default();
                    return Err(RunError::type_error(format!("{description} is not a constructor")));
                }
                break;
            }
        }
    }
    let Some(target_id) = callable_id(ctx, target) else {
        return Err(RunError::internal("bound chain resolved to a non-function"));
    };

    let prototype = object_ops::property_get(ctx, target_id, StaticAtoms::Prototype.into(), target)?;
    let proto = match prototype {
        Value::Ref(id) if ctx.heap.object_checked(id).is_some() => prototype,
        _ => Value::Ref(ctx.intrinsics.object_prototype),
    };
    let this_obj = ctx.heap.allocate(HeapData::Object(JsObject::new(
        Rc::clone(&ctx.intrinsics.root_shape),
        proto,
        ObjectKind::Plain,
    )))?;

    let result = invoke(ctx, target, Value::Ref(this_obj), args, true)?;
    if ctx.heap.is_object(result) {
        Ok(result)
    } else {
        Ok(Value::Ref(this_obj))
    }
}

/// `PrepareFunctionCall`: resolves the member callee, using the property
/// cache when the key is a fixed name.
pub(crate) fn prepare_member_call<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    code: &CodeBlock,
    target: Value,
    key: Value,
    site: u16,
) -> RunResult<Value> {
    match key {
        Value::InternStr(atom) => object_ops::get_named(ctx, code, target, atom, site),
        _ => object_ops::get_member(ctx, target, key),
    }
}

/// `CallEvalFunction`: resolves `eval` in the current scope. When it is
/// still the intrinsic, the argument runs as a direct eval in the caller's
/// environment and strictness; anything else is an ordinary call.
pub(crate) fn call_eval<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &Frame,
    args: Vec<Value>,
) -> RunResult<Value> {
    let eval_atom = AtomId::from(StaticAtoms::Eval);
    let Some(binding) = crate::environment::resolve_binding(&ctx.heap, &ctx.atoms, frame.env, eval_atom) else {
        return Err(RunError::reference("eval is not defined"));
    };
    let callee = match crate::environment::read_declarative(&ctx.heap, binding) {
        Some(value) => value,
        None => {
            let object = crate::environment::binding_object(&ctx.heap, binding)
                .ok_or_else(|| RunError::internal("binding neither declarative nor object-backed"))?;
            object_ops::property_get(ctx, object, eval_atom, Value::Ref(object))?
        }
    };

    if callee != Value::Ref(ctx.intrinsics.eval_function) {
        return invoke(ctx, callee, Value::Undefined, args, false);
    }

    let Some(&argument) = args.first() else {
        return Ok(Value::Undefined);
    };
    if !string::is_string_value(argument, &ctx.heap) {
        return Ok(argument);
    }
    let source_text = string::string_to_rust(&mut ctx.heap, &ctx.atoms, argument);
    eval_source(ctx, &source_text, frame.strict, frame.env, frame.this_value)
}

/// Parses, compiles, and runs eval text in the given environment.
fn eval_source<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    source_text: &str,
    strict_caller: bool,
    caller_env: HeapId,
    this_value: Value,
) -> RunResult<Value> {
    let buffer = SourceBuffer::new(source_text);
    let program = parser::parse_program(&buffer, &mut ctx.atoms, strict_caller)?;
    let code = compiler::compile_program(&program, &mut ctx.atoms)?;

    // strict eval code gets its own variable record so its `var`s do not
    // leak into the caller
    let env = if code.is_strict() {
        let env = LexicalEnv::function(
            DeclarativeBindings::Activation(ActivationData::new(Vec::new())),
            this_value,
            Some(caller_env),
        );
        ctx.heap.allocate(HeapData::Env(env))?
    } else {
        caller_env
    };

    ctx.call_depth += 1;
    let depth_check = ctx.heap.tracker().check_call_depth(ctx.call_depth);
    let result = match depth_check {
        Ok(()) => {
            let mut frame = Frame::new(code, env, this_value, None, Vec::new(), false);
            run_frame(ctx, &mut frame)
        }
        Err(err) => Err(err.into()),
    };
    ctx.call_depth -= 1;
    result
}

/// `ExecuteNativeFunction`: dispatches on the callee's native tag and
/// returns the call result directly.
pub(crate) fn run_native<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &Frame,
) -> RunResult<Value> {
    let callee_id = frame
        .callee
        .ok_or_else(|| RunError::internal("native stub without a callee"))?;
    let native = ctx
        .heap
        .object(callee_id)
        .as_function()
        .and_then(|f| f.native)
        .ok_or_else(|| RunError::internal("native stub over a non-native callee"))?;
    match native {
        NativeFunction::Eval => {
            // indirect eval: global scope, sloppy, global receiver
            let Some(&argument) = frame.args.first() else {
                return Ok(Value::Undefined);
            };
            if !string::is_string_value(argument, &ctx.heap) {
                return Ok(argument);
            }
            let source_text = string::string_to_rust(&mut ctx.heap, &ctx.atoms, argument);
            let global_env = ctx.global_env;
            let global_this = Value::Ref(ctx.global_object);
            eval_source(ctx, &source_text, false, global_env, global_this)
        }
    }
}

/// `CallBoundFunction`: forwards to the bound target with the stored
/// receiver and prepended arguments.
pub(crate) fn run_bound<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &Frame,
) -> RunResult<Value> {
    let callee_id = frame
        .callee
        .ok_or_else(|| RunError::internal("bound stub without a callee"))?;
    let (target, bound_this, mut merged) = {
        let bound = ctx
            .heap
            .object(callee_id)
            .as_function()
            .and_then(|f| f.bound.as_ref())
            .ok_or_else(|| RunError::internal("bound stub over an unbound callee"))?;
        (bound.target, bound.bound_this, bound.bound_args.clone())
    };
    merged.extend(frame.args.iter().copied());
    invoke(ctx, target, bound_this, merged, false)
}

/// Lazily materializes the invocation's arguments object.
pub(crate) fn arguments_object<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &mut Frame,
) -> RunResult<Value> {
    if let Some(existing) = frame.arguments_object {
        return Ok(existing);
    }
    let args: Vec<Value> = frame.args.clone();
    let callee = frame.callee;
    let code = Rc::clone(&frame.code);
    let value = materialize_arguments(ctx, &code, &args, callee)?;
    frame.arguments_object = Some(value);
    Ok(value)
}

fn materialize_arguments<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    code: &CodeBlock,
    args: &[Value],
    callee: Option<HeapId>,
) -> RunResult<Value> {
    let obj_id = ctx.heap.allocate(HeapData::Object(JsObject::new(
        Rc::clone(&ctx.intrinsics.root_shape),
        Value::Ref(ctx.intrinsics.object_prototype),
        ObjectKind::Plain,
    )))?;
    for (index, &value) in args.iter().enumerate() {
        let key = ctx.atoms.intern_index(u32::try_from(index).expect("argument index fits u32"));
        let VmContext { heap, atoms, .. } = ctx;
        object::define_data_property(heap, atoms, obj_id, key, value, PropertyFlags::plain_data());
    }
    let length = Value::from_u32(u32::try_from(args.len()).expect("argument count fits u32"));
    {
        let VmContext { heap, atoms, .. } = ctx;
        object::define_data_property(
            heap,
            atoms,
            obj_id,
            StaticAtoms::Length.into(),
            length,
            PropertyFlags::builtin(),
        );
    }
    if !code.is_strict()
        && let Some(callee_id) = callee
    {
        let VmContext { heap, atoms, .. } = ctx;
        object::define_data_property(
            heap,
            atoms,
            obj_id,
            StaticAtoms::Callee.into(),
            Value::Ref(callee_id),
            PropertyFlags::builtin(),
        );
    }
    Ok(Value::Ref(obj_id))
}

/// `CreateFunction`: instantiates a closure over the current environment,
/// wiring the named-function-expression self binding when the name is not
/// otherwise declared.
pub(crate) fn instantiate_function<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    code: Rc<CodeBlock>,
    env: HeapId,
) -> RunResult<Value> {
    let self_binding_name = if code.is_function_expression() {
        code.function_name()
            .filter(|name| !code.inner_identifiers().contains(name))
    } else {
        None
    };
    let outer_env = match self_binding_name {
        Some(name) => {
            let binder = LexicalEnv {
                record: EnvRecord::Declarative(DeclarativeBindings::Activation(ActivationData::new(vec![name]))),
                outer: Some(env),
            };
            ctx.heap.allocate(HeapData::Env(binder))?
        }
        None => env,
    };

    let param_count = code.params().len();
    let function = JsObject::new(
        Rc::clone(&ctx.intrinsics.root_shape),
        Value::Ref(ctx.intrinsics.function_prototype),
        ObjectKind::Function(Box::new(FunctionData {
            code,
            outer_env: Some(outer_env),
            bound: None,
            is_constructor: true,
            native: None,
        })),
    );
    let fn_id = ctx.heap.allocate(HeapData::Object(function))?;

    // self binding for named function expressions
    if let Some(name) = self_binding_name
        && let EnvRecord::Declarative(DeclarativeBindings::Activation(data)) =
            &mut ctx.heap.env_mut(outer_env).record
        && let Some(slot) = data.find(name)
    {
        data.set(slot, Value::Ref(fn_id));
    }

    // length is frozen; prototype is writable but not enumerable
    {
        let VmContext { heap, atoms, .. } = ctx;
        object::define_data_property(
            heap,
            atoms,
            fn_id,
            StaticAtoms::Length.into(),
            Value::from_u32(u32::try_from(param_count).expect("parameter count fits u32")),
            PropertyFlags::frozen_data(),
        );
    }
    let proto_obj = ctx.heap.allocate(HeapData::Object(JsObject::new(
        Rc::clone(&ctx.intrinsics.root_shape),
        Value::Ref(ctx.intrinsics.object_prototype),
        ObjectKind::Plain,
    )))?;
    {
        let VmContext { heap, atoms, .. } = ctx;
        object::define_data_property(
            heap,
            atoms,
            proto_obj,
            StaticAtoms::Constructor.into(),
            Value::Ref(fn_id),
            PropertyFlags::builtin(),
        );
        object::define_data_property(
            heap,
            atoms,
            fn_id,
            StaticAtoms::Prototype.into(),
            Value::Ref(proto_obj),
            PropertyFlags::from_bits(PropertyFlags::WRITABLE),
        );
    }
    Ok(Value::Ref(fn_id))
}

/// Creates a bound function over `target` (the host `bind` surface).
pub(crate) fn make_bound_function<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    target: Value,
    bound_this: Value,
    bound_args: Vec<Value>,
) -> RunResult<Value> {
    if callable_id(ctx, target).is_none() {
        return Err(RunError::type_error("Bind target is not a function"));
    }
    let function = JsObject::new(
        Rc::clone(&ctx.intrinsics.root_shape),
        Value::Ref(ctx.intrinsics.function_prototype),
        ObjectKind::Function(Box::new(FunctionData {
            code: Rc::clone(&ctx.intrinsics.bound_stub),
            outer_env: None,
            bound: Some(BoundData {
                target,
                bound_this,
                bound_args,
            }),
            is_constructor: true,
            native: None,
        })),
    );
    let id = ctx.heap.allocate(HeapData::Object(function))?;
    Ok(Value::Ref(id))
}

/// Materializes an engine error as an ordinary error object so user code
/// can catch it.
pub(crate) fn create_error_object<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    simple: SimpleError,
) -> RunResult<Value> {
    let proto = ctx.intrinsics.error_prototype(simple.kind);
    let obj = JsObject::new(
        Rc::clone(&ctx.intrinsics.root_shape),
        Value::Ref(proto),
        ObjectKind::Error(simple.kind),
    );
    let id = ctx.heap.allocate(HeapData::Object(obj))?;
    let message_atom = ctx.atoms.intern_str(&simple.message);
    let VmContext { heap, atoms, .. } = ctx;
    object::define_data_property(
        heap,
        atoms,
        id,
        StaticAtoms::Message.into(),
        Value::InternStr(message_atom),
        PropertyFlags::builtin(),
    );
    Ok(Value::Ref(id))
}
