//! Construction of the intrinsic objects and the global scope.
//!
//! The standard library proper is out of scope; what lives here is the
//! minimum the core semantics touch: `Object.prototype` as the default
//! `[[Prototype]]`, `Function.prototype` for closures, the error prototype
//! chain so thrown engine errors are ordinary objects with `name` and
//! `message`, and a global object carrying `undefined`, `NaN`, `Infinity`,
//! and the `eval` intrinsic.

use std::rc::Rc;

use crate::{
    atom::{AtomTable, StaticAtoms},
    bytecode::{CodeBlock, Intrinsics, Opcode},
    bytecode::builder::CodeBuilder,
    bytecode::code::CodeBlockFlags,
    error::{ErrorKind, RunResult},
    heap::{Heap, HeapData, HeapId},
    object::{self, FunctionData, JsObject, NativeFunction, ObjectKind},
    resource::ResourceTracker,
    shape::{PropertyFlags, Shape},
    value::Value,
};

/// Builds the intrinsics, the global object, and the global environment.
pub(crate) fn setup<T: ResourceTracker>(
    heap: &mut Heap<T>,
    atoms: &mut AtomTable,
) -> RunResult<(Intrinsics, HeapId, HeapId)> {
    let root_shape = Shape::root();

    let object_prototype = heap.allocate(HeapData::Object(JsObject::new(
        Rc::clone(&root_shape),
        Value::Null,
        ObjectKind::Plain,
    )))?;
    let function_prototype = heap.allocate(HeapData::Object(JsObject::new(
        Rc::clone(&root_shape),
        Value::Ref(object_prototype),
        ObjectKind::Plain,
    )))?;

    // Error.prototype, then one prototype per kind chaining back to it
    let base_error_prototype = heap.allocate(HeapData::Object(JsObject::new(
        Rc::clone(&root_shape),
        Value::Ref(object_prototype),
        ObjectKind::Plain,
    )))?;
    install_error_prototype_fields(heap, atoms, base_error_prototype, ErrorKind::Error);

    let kinds = [
        ErrorKind::SyntaxError,
        ErrorKind::ReferenceError,
        ErrorKind::TypeError,
        ErrorKind::RangeError,
        ErrorKind::InternalError,
    ];
    let mut error_prototypes = [(ErrorKind::Error, base_error_prototype); 6];
    for (index, kind) in kinds.into_iter().enumerate() {
        let proto = heap.allocate(HeapData::Object(JsObject::new(
            Rc::clone(&root_shape),
            Value::Ref(base_error_prototype),
            ObjectKind::Plain,
        )))?;
        install_error_prototype_fields(heap, atoms, proto, kind);
        error_prototypes[index + 1] = (kind, proto);
    }

    let bound_stub = stub_code(Opcode::CallBoundFunction);
    let native_stub = stub_code(Opcode::ExecuteNativeFunction);

    // the eval intrinsic: a native function recognized by call sites
    let eval_function = heap.allocate(HeapData::Object(JsObject::new(
        Rc::clone(&root_shape),
        Value::Ref(function_prototype),
        ObjectKind::Function(Box::new(FunctionData {
            code: Rc::clone(&native_stub),
            outer_env: None,
            bound: None,
            is_constructor: false,
            native: Some(NativeFunction::Eval),
        })),
    )))?;
    object::define_data_property(
        heap,
        atoms,
        eval_function,
        StaticAtoms::Length.into(),
        Value::Int32(1),
        PropertyFlags::frozen_data(),
    );

    let global_object = heap.allocate(HeapData::Object(JsObject::new(
        Rc::clone(&root_shape),
        Value::Ref(object_prototype),
        ObjectKind::Plain,
    )))?;
    object::define_data_property(
        heap,
        atoms,
        global_object,
        StaticAtoms::Undefined.into(),
        Value::Undefined,
        PropertyFlags::frozen_data(),
    );
    object::define_data_property(
        heap,
        atoms,
        global_object,
        StaticAtoms::NaN.into(),
        Value::Double(f64::NAN),
        PropertyFlags::frozen_data(),
    );
    object::define_data_property(
        heap,
        atoms,
        global_object,
        StaticAtoms::Infinity.into(),
        Value::Double(f64::INFINITY),
        PropertyFlags::frozen_data(),
    );
    object::define_data_property(
        heap,
        atoms,
        global_object,
        StaticAtoms::Eval.into(),
        Value::Ref(eval_function),
        PropertyFlags::builtin(),
    );

    let global_env = heap.allocate(HeapData::Env(crate::environment::LexicalEnv::global(global_object)))?;

    let intrinsics = Intrinsics {
        root_shape,
        object_prototype,
        function_prototype,
        error_prototypes,
        eval_function,
        bound_stub,
        native_stub,
    };
    Ok((intrinsics, global_object, global_env))
}

fn install_error_prototype_fields<T: ResourceTracker>(
    heap: &mut Heap<T>,
    atoms: &mut AtomTable,
    proto: HeapId,
    kind: ErrorKind,
) {
    let name: &'static str = kind.into();
    let name_atom = atoms.intern_str(name);
    object::define_data_property(
        heap,
        atoms,
        proto,
        StaticAtoms::Name.into(),
        Value::InternStr(name_atom),
        PropertyFlags::builtin(),
    );
    let empty = StaticAtoms::Empty.into();
    object::define_data_property(
        heap,
        atoms,
        proto,
        StaticAtoms::Message.into(),
        Value::InternStr(empty),
        PropertyFlags::builtin(),
    );
}

/// One-opcode code block backing bound and native function objects.
fn stub_code(op: Opcode) -> Rc<CodeBlock> {
    let mut builder = CodeBuilder::new();
    builder.emit(op);
    Rc::new(builder.build(
        Vec::new(),
        Vec::new(),
        CodeBlockFlags {
            needs_activation: false,
            needs_arguments: false,
            is_strict: false,
            is_function_expression: true,
            is_dynamic_scope: false,
        },
        None,
    ))
}
