//! Public interface for embedding the engine.
//!
//! [`Engine`] owns one global scope and evaluates source texts against it;
//! results and inputs cross the boundary as the plain [`Object`] host type
//! so embedders never touch engine values. Errors surface as
//! [`Exception`](crate::Exception) with the constructor kind, message, and
//! source line.

use ahash::AHashSet;

use crate::{
    atom::StaticAtoms,
    ast::ProgramAst,
    bytecode::{self, Frame, VmContext, run_frame, vm},
    error::{ErrorKind, Exception, RunError},
    heap::{HeapId, HeapStats},
    object::{self, ObjectKind},
    parser,
    resource::{LimitedTracker, NoLimitTracker, ResourceLimits, ResourceTracker},
    shape::PropertyFlags,
    source::SourceBuffer,
    string,
    tracer::{NoopTracer, VmTracer},
    value::Value,
};

/// Conversion depth for host output; nested structures below this render
/// as their description string.
const MAX_HOST_DEPTH: usize = 8;

/// Host-side representation of an engine value.
///
/// Inputs convert to engine values on the way in; results convert back on
/// the way out. Objects and arrays are deep-copied snapshots, not live
/// handles.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(String),
    Array(Vec<Object>),
    /// Enumerable own data properties, in insertion order.
    Object(Vec<(String, Object)>),
    /// Functions cross the boundary as their name only.
    Function {
        name: String,
    },
}

impl std::fmt::Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(n) => write!(f, "{}", crate::value::number_to_string(*n)),
            Self::Str(s) => write!(f, "{s}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Object(props) => {
                write!(f, "{{")?;
                for (i, (key, value)) in props.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Function { name } => write!(f, "function {name}() {{ ... }}"),
        }
    }
}

/// A parsed program, for host-side inspection before evaluation.
#[derive(Debug)]
pub struct Program {
    pub(crate) ast: ProgramAst,
}

impl Program {
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.ast.is_strict
    }

    /// Number of function definitions anywhere in the program.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.ast.functions.len()
    }

    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.ast.body.len()
    }
}

/// A parsed dynamic function: parameter names plus its body program.
#[derive(Debug)]
pub struct FunctionProgram {
    params: Vec<String>,
    pub(crate) body: Program,
}

impl FunctionProgram {
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    #[must_use]
    pub fn body(&self) -> &Program {
        &self.body
    }
}

/// An engine instance: one global scope, evaluated against repeatedly.
///
/// # Example
/// ```
/// use nerite::{Engine, Object};
///
/// let mut engine = Engine::new().unwrap();
/// let result = engine.evaluate("var a = 1; a + 2").unwrap();
/// assert_eq!(result, Object::Int(3));
/// ```
pub struct Engine<T: ResourceTracker = NoLimitTracker, Tr: VmTracer = NoopTracer> {
    ctx: VmContext<T, Tr>,
}

impl Engine {
    /// An engine with no resource limits and no tracing.
    pub fn new() -> Result<Self, Exception> {
        Self::with_parts(NoLimitTracker, NoopTracer)
    }
}

impl Engine<LimitedTracker, NoopTracer> {
    /// An engine enforcing the given resource budget.
    pub fn with_limits(limits: ResourceLimits) -> Result<Self, Exception> {
        Self::with_parts(LimitedTracker::new(limits), NoopTracer)
    }
}

impl<T: ResourceTracker, Tr: VmTracer> Engine<T, Tr> {
    /// An engine over a custom tracker and tracer.
    pub fn with_parts(tracker: T, tracer: Tr) -> Result<Self, Exception> {
        let mut heap = crate::heap::Heap::new(tracker);
        let mut atoms = crate::atom::AtomTable::new();
        let (intrinsics, global_object, global_env) =
            crate::intrinsics::setup(&mut heap, &mut atoms).map_err(|err| match err {
                RunError::Simple(simple) => Exception::from(simple),
                RunError::Thrown(_) => Exception::new(ErrorKind::InternalError, "setup threw".into(), None),
            })?;
        Ok(Self {
            ctx: VmContext {
                heap,
                atoms,
                intrinsics,
                global_env,
                global_object,
                ic_generation: 0,
                tracer,
                call_depth: 0,
            },
        })
    }

    /// Parses a source text without evaluating it.
    pub fn parse(&mut self, source: &str, strict: bool) -> Result<Program, Exception> {
        let buffer = SourceBuffer::new(source);
        let ast = parser::parse_program(&buffer, &mut self.ctx.atoms, strict)
            .map_err(|err| self.to_exception(err))?;
        Ok(Program { ast })
    }

    /// Parses the pieces of a dynamically constructed function, as the
    /// `Function` constructor surface does.
    pub fn parse_function(&mut self, params_src: &str, body_src: &str) -> Result<FunctionProgram, Exception> {
        let buffer = SourceBuffer::new(body_src);
        let (params, ast) = parser::parse_function_source(params_src, &buffer, &mut self.ctx.atoms)
            .map_err(|err| self.to_exception(err))?;
        let params = params
            .into_iter()
            .map(|atom| self.ctx.atoms.text(atom).into_owned())
            .collect();
        Ok(FunctionProgram {
            params,
            body: Program { ast },
        })
    }

    /// Evaluates a source text against the engine's global scope, returning
    /// the program's completion value.
    pub fn evaluate(&mut self, source: &str) -> Result<Object, Exception> {
        let buffer = SourceBuffer::new(source);
        let program = parser::parse_program(&buffer, &mut self.ctx.atoms, false)
            .map_err(|err| self.to_exception(err))?;
        let code = bytecode::compile_program(&program, &mut self.ctx.atoms)
            .map_err(|err| self.to_exception(err))?;
        let global_this = Value::Ref(self.ctx.global_object);
        let mut frame = Frame::new(code, self.ctx.global_env, global_this, None, Vec::new(), false);
        let value = run_frame(&mut self.ctx, &mut frame).map_err(|err| self.to_exception(err))?;
        Ok(self.to_host(value, 0, &mut AHashSet::new()))
    }

    /// Builds a function from parameter and body sources and calls it with
    /// the given arguments.
    pub fn call_function(
        &mut self,
        params_src: &str,
        body_src: &str,
        args: Vec<Object>,
    ) -> Result<Object, Exception> {
        let buffer = SourceBuffer::new(body_src);
        let (params, ast) = parser::parse_function_source(params_src, &buffer, &mut self.ctx.atoms)
            .map_err(|err| self.to_exception(err))?;
        let code = bytecode::compile_function_program(&params, &ast, &mut self.ctx.atoms)
            .map_err(|err| self.to_exception(err))?;
        let global_env = self.ctx.global_env;
        let function = vm::instantiate_function(&mut self.ctx, code, global_env)
            .map_err(|err| self.to_exception(err))?;
        let mut engine_args = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.from_host(&arg).map_err(|err| self.to_exception(err))?;
            engine_args.push(value);
        }
        let value = vm::invoke(&mut self.ctx, function, Value::Undefined, engine_args, false)
            .map_err(|err| self.to_exception(err))?;
        Ok(self.to_host(value, 0, &mut AHashSet::new()))
    }

    /// Heap occupancy snapshot, for monitoring and tests.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.ctx.heap.stats()
    }

    /// The tracer, for reading back recorded events.
    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.ctx.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.ctx.tracer
    }

    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    fn to_exception(&mut self, err: RunError) -> Exception {
        match err {
            RunError::Simple(simple) => Exception::from(simple),
            RunError::Thrown(value) => {
                let error_object = match value {
                    Value::Ref(id) => self.ctx.heap.object_checked(id).and_then(|obj| match &obj.kind {
                        ObjectKind::Error(kind) => Some((id, *kind)),
                        _ => None,
                    }),
                    _ => None,
                };
                if let Some((id, kind)) = error_object {
                    let message_value = match object::get_own_property(
                        &self.ctx.heap,
                        &self.ctx.atoms,
                        id,
                        StaticAtoms::Message.into(),
                    ) {
                        Some(object::OwnProperty::Data { value, .. }) => value,
                        _ => Value::Undefined,
                    };
                    let message = match message_value {
                        Value::Undefined => String::new(),
                        other => self.describe(other),
                    };
                    return Exception::new(kind, message, None);
                }
                Exception::new(ErrorKind::Error, self.describe(value), None)
            }
        }
    }

    /// Side-effect-free description of a value for exception messages.
    fn describe(&mut self, value: Value) -> String {
        match value {
            Value::Empty | Value::Undefined => "undefined".to_owned(),
            Value::Null => "null".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Int32(_) | Value::Double(_) => crate::value::value_number_to_string(value),
            Value::InternStr(_) => string::string_to_rust(&mut self.ctx.heap, &self.ctx.atoms, value),
            Value::Ref(id) => {
                if string::is_string_value(value, &self.ctx.heap) {
                    string::string_to_rust(&mut self.ctx.heap, &self.ctx.atoms, value)
                } else {
                    let obj = self.ctx.heap.object_checked(id);
                    match obj.map(|o| &o.kind) {
                        Some(ObjectKind::Function(_)) => "function".to_owned(),
                        Some(ObjectKind::Array(_)) => "array".to_owned(),
                        _ => "[object Object]".to_owned(),
                    }
                }
            }
        }
    }

    fn to_host(&mut self, value: Value, depth: usize, seen: &mut AHashSet<HeapId>) -> Object {
        match value {
            Value::Empty | Value::Undefined => Object::Undefined,
            Value::Null => Object::Null,
            Value::Bool(b) => Object::Bool(b),
            Value::Int32(i) => Object::Int(i),
            Value::Double(d) => Object::Float(d),
            Value::InternStr(_) => Object::Str(string::string_to_rust(&mut self.ctx.heap, &self.ctx.atoms, value)),
            Value::Ref(id) => {
                if string::is_string_value(value, &self.ctx.heap) {
                    return Object::Str(string::string_to_rust(&mut self.ctx.heap, &self.ctx.atoms, value));
                }
                if depth >= MAX_HOST_DEPTH || !seen.insert(id) {
                    return Object::Str(self.describe(value));
                }
                let result = self.object_to_host(id, depth, seen);
                seen.remove(&id);
                result
            }
        }
    }

    fn object_to_host(&mut self, id: HeapId, depth: usize, seen: &mut AHashSet<HeapId>) -> Object {
        enum HostKind {
            Function(Option<crate::atom::AtomId>),
            Array(u32),
            Other,
        }
        let kind = match &self.ctx.heap.object(id).kind {
            ObjectKind::Function(data) => HostKind::Function(data.code.function_name()),
            ObjectKind::Array(data) => HostKind::Array(data.length),
            _ => HostKind::Other,
        };
        match kind {
            HostKind::Function(name) => {
                let name = name.map_or_else(String::new, |atom| self.ctx.atoms.text(atom).into_owned());
                Object::Function { name }
            }
            HostKind::Array(length) => {
                let mut items = Vec::with_capacity(length as usize);
                for index in 0..length {
                    let key = self.ctx.atoms.intern_index(index);
                    let element =
                        match object::get_own_property(&self.ctx.heap, &self.ctx.atoms, id, key) {
                            Some(object::OwnProperty::Data { value, .. } | object::OwnProperty::ArrayElement(value)) => {
                                value
                            }
                            _ => Value::Undefined,
                        };
                    items.push(self.to_host(element, depth + 1, seen));
                }
                Object::Array(items)
            }
            HostKind::Other => {
                // enumerable own data properties, insertion order
                let props: Vec<(crate::atom::AtomId, Value)> = {
                    let obj = self.ctx.heap.object(id);
                    obj.shape
                        .properties()
                        .iter()
                        .enumerate()
                        .filter(|(_, info)| info.flags.is_enumerable() && !info.flags.is_accessor())
                        .map(|(slot, info)| (info.key, obj.slots[slot]))
                        .collect()
                };
                let mut out = Vec::with_capacity(props.len());
                for (key, prop_value) in props {
                    let key_text = self.ctx.atoms.text(key).into_owned();
                    out.push((key_text, self.to_host(prop_value, depth + 1, seen)));
                }
                Object::Object(out)
            }
        }
    }

    fn from_host(&mut self, object: &Object) -> Result<Value, RunError> {
        Ok(match object {
            Object::Undefined => Value::Undefined,
            Object::Null => Value::Null,
            Object::Bool(b) => Value::Bool(*b),
            Object::Int(i) => Value::Int32(*i),
            Object::Float(n) => Value::number(*n),
            Object::Str(s) => {
                let units: Vec<u16> = s.encode_utf16().collect();
                let id = self
                    .ctx
                    .heap
                    .allocate(crate::heap::HeapData::Str(string::JsString::Raw(string::RawString::new(units))))?;
                Value::Ref(id)
            }
            Object::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(self.from_host(item)?);
                }
                let length = u32::try_from(elements.len()).map_err(|_| RunError::range("Invalid array length"))?;
                let obj = object::JsObject::new(
                    std::rc::Rc::clone(&self.ctx.intrinsics.root_shape),
                    Value::Ref(self.ctx.intrinsics.object_prototype),
                    ObjectKind::Array(object::ArrayData {
                        vector: elements,
                        length,
                        fast: true,
                    }),
                );
                Value::Ref(self.ctx.heap.allocate(crate::heap::HeapData::Object(obj))?)
            }
            Object::Object(props) => {
                let obj = object::JsObject::new(
                    std::rc::Rc::clone(&self.ctx.intrinsics.root_shape),
                    Value::Ref(self.ctx.intrinsics.object_prototype),
                    ObjectKind::Plain,
                );
                let id = self.ctx.heap.allocate(crate::heap::HeapData::Object(obj))?;
                for (key, prop) in props {
                    let prop_value = self.from_host(prop)?;
                    let atom = self.ctx.atoms.intern_str(key);
                    let VmContext { heap, atoms, .. } = &mut self.ctx;
                    object::define_data_property(heap, atoms, id, atom, prop_value, PropertyFlags::plain_data());
                }
                Value::Ref(id)
            }
            Object::Function { .. } => {
                return Err(RunError::type_error("Function inputs cannot cross the host boundary"));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_arithmetic() {
        let mut engine = Engine::new().expect("engine");
        assert_eq!(engine.evaluate("1 + 2 * 3").expect("eval"), Object::Int(7));
    }

    #[test]
    fn globals_persist_across_evaluations() {
        let mut engine = Engine::new().expect("engine");
        engine.evaluate("var counter = 10;").expect("eval");
        assert_eq!(engine.evaluate("counter + 1").expect("eval"), Object::Int(11));
    }

    #[test]
    fn exceptions_carry_kind_and_message() {
        let mut engine = Engine::new().expect("engine");
        let err = engine.evaluate("undeclared_name").expect_err("must throw");
        assert_eq!(err.kind(), ErrorKind::ReferenceError);
        assert!(err.message().contains("undeclared_name"));
    }

    #[test]
    fn parse_reports_strictness() {
        let mut engine = Engine::new().expect("engine");
        let program = engine.parse("'use strict'; var x = 1;", false).expect("parse");
        assert!(program.is_strict());
        let sloppy = engine.parse("var x = 1;", false).expect("parse");
        assert!(!sloppy.is_strict());
    }

    #[test]
    fn call_function_with_host_arguments() {
        let mut engine = Engine::new().expect("engine");
        let result = engine
            .call_function("a, b", "return a + b;", vec![Object::Int(2), Object::Int(40)])
            .expect("call");
        assert_eq!(result, Object::Int(42));
    }
}
