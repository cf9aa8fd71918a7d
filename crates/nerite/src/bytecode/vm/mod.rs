//! The bytecode interpreter.
//!
//! Dispatch is a decode-and-match loop over one invocation's code block;
//! function calls recurse into a fresh frame, so the operand stack, temp
//! stack, and guard stack are all invocation-local and released on every
//! exit path. Shared engine state (heap, atoms, intrinsics, the
//! identifier-cache generation counter) lives in [`VmContext`] and is
//! threaded through every entry point.
//!
//! Abrupt completions that must cross `finally` blocks are reified as
//! control-flow records on the heap: `JumpComplexCase`, `ReturnFunction*`,
//! and the throw path all funnel through the guard-stack walk, and
//! `FinallyEnd` either consumes the pending record or forwards it to the
//! next enclosing guard.

mod binary;
mod call;
mod object_ops;

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    atom::{AtomId, AtomTable},
    bytecode::{
        code::{CachedBinding, CodeBlock},
        compiler::{COMPLEX_JUMP_BREAK, COMPLEX_JUMP_CONTINUE, NO_CATCH_PARAM},
        op::Opcode,
    },
    environment::{self, BindingSlot, DeclarativeBindings, EnvRecord, LexicalEnv},
    error::{ErrorKind, RunError, RunResult},
    heap::{ControlFlowRecord, FlowReason, Heap, HeapData, HeapId},
    object,
    resource::ResourceTracker,
    shape::Shape,
    tracer::{TraceEvent, VmTracer},
    value::Value,
};

pub(crate) use call::{instantiate_function, invoke};

/// The engine's intrinsic objects and shared roots.
#[derive(Debug)]
pub(crate) struct Intrinsics {
    pub root_shape: Rc<Shape>,
    pub object_prototype: HeapId,
    pub function_prototype: HeapId,
    pub error_prototypes: [(ErrorKind, HeapId); 6],
    /// The global `eval` function object, recognized for direct-eval.
    pub eval_function: HeapId,
    /// Shared stub code blocks for bound and native functions.
    pub bound_stub: Rc<CodeBlock>,
    pub native_stub: Rc<CodeBlock>,
}

impl Intrinsics {
    pub fn error_prototype(&self, kind: ErrorKind) -> HeapId {
        self.error_prototypes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .expect("every error kind has a prototype")
    }
}

/// Per-engine state threaded through every interpreter entry point.
pub(crate) struct VmContext<T: ResourceTracker, Tr: VmTracer> {
    pub heap: Heap<T>,
    pub atoms: AtomTable,
    pub intrinsics: Intrinsics,
    pub global_env: HeapId,
    pub global_object: HeapId,
    /// Bumped by every declarative binding creation; invalidates all
    /// `GetById`/`SetById` caches at once.
    pub ic_generation: u64,
    pub tracer: Tr,
    /// Current nested-invocation depth, checked against the tracker.
    pub call_depth: usize,
}

impl<T: ResourceTracker, Tr: VmTracer> VmContext<T, Tr> {
    pub fn bump_ic_generation(&mut self) {
        self.ic_generation += 1;
        if self.tracer.enabled() {
            self.tracer.event(TraceEvent::CacheInvalidation {
                generation: self.ic_generation,
            });
        }
    }
}

/// Where a try guard currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TryPhase {
    InTry,
    InCatch,
    InFinally,
}

/// One entry of the invocation's guard stack: a `try` statement or a
/// `with` scope.
#[derive(Debug)]
enum GuardKind {
    Try {
        catch_pc: Option<usize>,
        finally_pc: Option<usize>,
        catch_param: Option<AtomId>,
        phase: TryPhase,
        /// `Empty` or a `Ref` to a control-flow record awaiting `FinallyEnd`.
        pending: Value,
    },
    With,
}

#[derive(Debug)]
struct GuardFrame {
    kind: GuardKind,
    saved_env: HeapId,
    saved_sp: usize,
}

/// One interpreter invocation's mutable state.
pub(crate) struct Frame {
    pub code: Rc<CodeBlock>,
    pub pc: usize,
    pub stack: Vec<Value>,
    temp: SmallVec<[Value; 8]>,
    guards: Vec<GuardFrame>,
    /// Current lexical environment (catch/with scopes push and pop).
    pub env: HeapId,
    /// The invocation's function or global record, for indexed slot access.
    pub variable_env: HeapId,
    pub this_value: Value,
    pub callee: Option<HeapId>,
    pub args: Vec<Value>,
    pub is_new: bool,
    pub strict: bool,
    arguments_object: Option<Value>,
    /// Completion value observable from program-level invocations.
    completion: Value,
    /// Depth recorded by `LoadStackPointer`.
    sp_mark: usize,
}

impl Frame {
    pub fn new(
        code: Rc<CodeBlock>,
        env: HeapId,
        this_value: Value,
        callee: Option<HeapId>,
        args: Vec<Value>,
        is_new: bool,
    ) -> Self {
        let strict = code.is_strict();
        let max_stack = usize::from(code.max_stack());
        Self {
            code,
            pc: 0,
            stack: Vec::with_capacity(max_stack.min(4096)),
            temp: SmallVec::new(),
            guards: Vec::new(),
            env,
            variable_env: env,
            this_value,
            callee,
            args,
            is_new,
            strict,
            arguments_object: None,
            completion: Value::Undefined,
            sp_mark: 0,
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn peek(&self) -> Value {
        *self.stack.last().expect("operand stack underflow")
    }
}

/// Fetches a `u16` operand (little-endian), advancing the frame's pc.
macro_rules! fetch_u16 {
    ($frame:expr) => {{
        let code = $frame.code.code();
        let lo = code[$frame.pc];
        let hi = code[$frame.pc + 1];
        $frame.pc += 2;
        u16::from_le_bytes([lo, hi])
    }};
}

/// Fetches an `i16` operand (little-endian), advancing the frame's pc.
macro_rules! fetch_i16 {
    ($frame:expr) => {{
        let code = $frame.code.code();
        let lo = code[$frame.pc];
        let hi = code[$frame.pc + 1];
        $frame.pc += 2;
        i16::from_le_bytes([lo, hi])
    }};
}

/// Fetches a `u8` operand.
macro_rules! fetch_u8 {
    ($frame:expr) => {{
        let byte = $frame.code.code()[$frame.pc];
        $frame.pc += 1;
        byte
    }};
}

/// Applies a relative jump to the pc.
macro_rules! jump_relative {
    ($frame:expr, $offset:expr) => {{
        let pc = i64::try_from($frame.pc).expect("pc exceeds i64");
        let target = pc + i64::from($offset);
        $frame.pc = usize::try_from(target).expect("jump produced a negative pc");
    }};
}

/// Evaluates a fallible operation; on a thrown error, routes through the
/// guard stack and continues dispatch (or propagates out of the frame).
macro_rules! vm_try {
    ($ctx:expr, $frame:expr, $expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => {
                handle_throw($ctx, $frame, err)?;
                continue;
            }
        }
    };
}

/// Runs one frame to completion.
pub(crate) fn run_frame<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &mut Frame,
) -> RunResult<Value> {
    // bound the operand stack against the tracker's byte budget
    let stack_limit = ctx.heap.tracker().operand_stack_limit() / std::mem::size_of::<Value>();
    if usize::from(frame.code.max_stack()) > stack_limit {
        return Err(RunError::range(crate::error::STACK_OVERFLOW_MESSAGE));
    }
    if ctx.tracer.enabled() {
        ctx.tracer.event(TraceEvent::EnterFrame { depth: ctx.call_depth });
    }
    let result = dispatch(ctx, frame);
    if ctx.tracer.enabled() {
        ctx.tracer.event(TraceEvent::LeaveFrame { depth: ctx.call_depth });
    }
    // stamp the source line on errors leaving this frame without one
    result.map_err(|err| {
        let missing_line = matches!(&err, RunError::Simple(simple) if simple.line.is_none());
        if missing_line
            && let Some(line) = frame.code.line_for_offset(frame.pc)
        {
            err.with_line(line)
        } else {
            err
        }
    })
}

#[expect(clippy::too_many_lines, reason = "one arm per opcode keeps dispatch flat")]
fn dispatch<T: ResourceTracker, Tr: VmTracer>(ctx: &mut VmContext<T, Tr>, frame: &mut Frame) -> RunResult<Value> {
    loop {
        let op_byte = frame.code.code()[frame.pc];
        let opcode = Opcode::from_repr(op_byte)
            .ok_or_else(|| RunError::internal(format!("undecodable opcode byte {op_byte}")))?;
        if ctx.tracer.enabled() {
            ctx.tracer.event(TraceEvent::Op {
                opcode,
                offset: frame.pc,
            });
        }
        frame.pc += 1;

        match opcode {
            // --- stack ---
            Opcode::Push => {
                let index = fetch_u16!(frame);
                let value = frame.code.constant(index);
                frame.push(value);
            }
            Opcode::Pop => {
                frame.pop();
            }
            Opcode::Dup => {
                let top = frame.peek();
                frame.push(top);
            }
            Opcode::PopExpressionStatement => {
                frame.completion = frame.pop().materialize();
            }
            Opcode::PushToTemp => {
                let value = frame.pop();
                frame.temp.push(value);
            }
            Opcode::PopFromTemp => {
                let value = frame.temp.pop().expect("temp stack underflow");
                frame.push(value);
            }

            // --- locals and bindings ---
            Opcode::GetByIndex => {
                let index = fetch_u16!(frame);
                let value = read_function_slot(ctx, frame, 0, index);
                frame.push(value);
            }
            Opcode::SetByIndex => {
                let index = fetch_u16!(frame);
                let value = frame.peek();
                write_function_slot(ctx, frame, 0, index, value);
            }
            Opcode::GetByIndexWithActivation => {
                let up = fetch_u16!(frame);
                let index = fetch_u16!(frame);
                let value = read_function_slot(ctx, frame, up, index);
                frame.push(value);
            }
            Opcode::SetByIndexWithActivation => {
                let up = fetch_u16!(frame);
                let index = fetch_u16!(frame);
                let value = frame.peek();
                write_function_slot(ctx, frame, up, index, value);
            }
            Opcode::GetById => {
                let atom = AtomId::from_index(fetch_u16!(frame));
                let site = fetch_u16!(frame);
                let value = vm_try!(ctx, frame, get_by_id(ctx, frame, atom, site));
                frame.push(value);
            }
            Opcode::SetById => {
                let atom = AtomId::from_index(fetch_u16!(frame));
                let site = fetch_u16!(frame);
                let value = frame.peek();
                vm_try!(ctx, frame, set_by_id(ctx, frame, atom, site, value));
            }
            Opcode::CreateBinding => {
                let atom = AtomId::from_index(fetch_u16!(frame));
                vm_try!(ctx, frame, create_binding(ctx, frame, atom));
            }

            // --- arithmetic and friends (binary.rs) ---
            Opcode::Plus => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = vm_try!(ctx, frame, binary::add(ctx, lhs, rhs));
                frame.push(value);
            }
            Opcode::Minus => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = vm_try!(ctx, frame, binary::arithmetic(ctx, Opcode::Minus, lhs, rhs));
                frame.push(value);
            }
            Opcode::Multiply => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = vm_try!(ctx, frame, binary::arithmetic(ctx, Opcode::Multiply, lhs, rhs));
                frame.push(value);
            }
            Opcode::Division => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = vm_try!(ctx, frame, binary::arithmetic(ctx, Opcode::Division, lhs, rhs));
                frame.push(value);
            }
            Opcode::Mod => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = vm_try!(ctx, frame, binary::arithmetic(ctx, Opcode::Mod, lhs, rhs));
                frame.push(value);
            }
            Opcode::Increment => {
                let value = frame.pop();
                let result = vm_try!(ctx, frame, binary::increment(value, 1));
                frame.push(result);
            }
            Opcode::Decrement => {
                let value = frame.pop();
                let result = vm_try!(ctx, frame, binary::increment(value, -1));
                frame.push(result);
            }
            Opcode::UnaryMinus => {
                let value = frame.pop();
                let result = vm_try!(ctx, frame, binary::negate(ctx, value));
                frame.push(result);
            }
            Opcode::UnaryPlus | Opcode::ToNumber => {
                let value = frame.pop();
                let result = vm_try!(ctx, frame, binary::to_number_value(ctx, value));
                frame.push(result);
            }
            Opcode::UnaryNot => {
                let value = frame.pop();
                let truthy = value.to_boolean(&ctx.heap, &ctx.atoms);
                frame.push(Value::Bool(!truthy));
            }
            Opcode::UnaryBitwiseNot => {
                let value = frame.pop();
                let n = vm_try!(ctx, frame, binary::to_number_f64(ctx, value));
                frame.push(Value::Int32(!crate::value::to_int32(n)));
            }

            // --- relational / equality ---
            Opcode::Equal | Opcode::NotEqual => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let eq = vm_try!(ctx, frame, binary::abstract_equals(ctx, lhs, rhs));
                frame.push(Value::Bool(if opcode == Opcode::Equal { eq } else { !eq }));
            }
            Opcode::StrictEqual | Opcode::NotStrictEqual => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let eq = crate::value::strict_equals(&mut ctx.heap, &ctx.atoms, lhs, rhs);
                frame.push(Value::Bool(if opcode == Opcode::StrictEqual { eq } else { !eq }));
            }
            Opcode::LessThan | Opcode::LessThanOrEqual | Opcode::GreaterThan | Opcode::GreaterThanOrEqual => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = vm_try!(ctx, frame, binary::relational(ctx, opcode, lhs, rhs));
                frame.push(value);
            }

            // --- bitwise ---
            Opcode::BitwiseAnd | Opcode::BitwiseOr | Opcode::BitwiseXor => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = vm_try!(ctx, frame, binary::bitwise(ctx, opcode, lhs, rhs));
                frame.push(value);
            }
            Opcode::LeftShift | Opcode::SignedRightShift | Opcode::UnsignedRightShift => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = vm_try!(ctx, frame, binary::shift(ctx, opcode, lhs, rhs));
                frame.push(value);
            }

            // --- type operators ---
            Opcode::UnaryTypeOf => {
                let value = frame.pop();
                let tag = object::type_of(&ctx.heap, value);
                let atom = ctx.atoms.intern_str(tag);
                frame.push(Value::InternStr(atom));
            }
            Opcode::UnaryTypeOfById => {
                let atom = AtomId::from_index(fetch_u16!(frame));
                let value = match environment::resolve_binding(&ctx.heap, &ctx.atoms, frame.env, atom) {
                    Some(binding) => vm_try!(ctx, frame, read_binding(ctx, binding, atom)),
                    None => Value::Undefined,
                };
                let tag = object::type_of(&ctx.heap, value);
                let tag_atom = ctx.atoms.intern_str(tag);
                frame.push(Value::InternStr(tag_atom));
            }
            Opcode::UnaryDelete => {
                let key = frame.pop();
                let target = frame.pop();
                let result = vm_try!(ctx, frame, object_ops::delete_member(ctx, frame, target, key));
                frame.push(Value::Bool(result));
            }
            Opcode::UnaryDeleteById => {
                let atom = AtomId::from_index(fetch_u16!(frame));
                let result = vm_try!(ctx, frame, delete_binding(ctx, frame, atom));
                frame.push(Value::Bool(result));
            }
            Opcode::UnaryVoid => {
                frame.pop();
                frame.push(Value::Undefined);
            }
            Opcode::StringIn => {
                let container = frame.pop();
                let key = frame.pop();
                let result = vm_try!(ctx, frame, object_ops::has_member(ctx, key, container));
                frame.push(Value::Bool(result));
            }
            Opcode::InstanceOf => {
                let constructor = frame.pop();
                let value = frame.pop();
                let result = vm_try!(ctx, frame, object_ops::instance_of(ctx, value, constructor));
                frame.push(Value::Bool(result));
            }

            // --- objects (object_ops.rs) ---
            Opcode::CreateObject => {
                let hint = fetch_u16!(frame);
                let id = vm_try!(ctx, frame, object_ops::create_plain_object(ctx, hint));
                frame.push(Value::Ref(id));
            }
            Opcode::CreateArray => {
                let count = fetch_u16!(frame);
                let start = frame.stack.len() - usize::from(count);
                let elements: Vec<Value> = frame.stack.drain(start..).collect();
                let id = vm_try!(ctx, frame, object_ops::create_array(ctx, elements));
                frame.push(Value::Ref(id));
            }
            Opcode::CreateRegExp => {
                let index = fetch_u16!(frame);
                let id = vm_try!(ctx, frame, object_ops::create_regexp(ctx, &frame.code, index));
                frame.push(Value::Ref(id));
            }
            Opcode::InitObject => {
                let value = frame.pop();
                let key = frame.pop();
                let target = frame.peek();
                vm_try!(ctx, frame, object_ops::init_property(ctx, target, key, value));
            }
            Opcode::SetObjectPropertyGetter => {
                let function = frame.pop();
                let key = frame.pop();
                let target = frame.peek();
                vm_try!(ctx, frame, object_ops::init_accessor(ctx, target, key, Some(function), None));
            }
            Opcode::SetObjectPropertySetter => {
                let function = frame.pop();
                let key = frame.pop();
                let target = frame.peek();
                vm_try!(ctx, frame, object_ops::init_accessor(ctx, target, key, None, Some(function)));
            }
            Opcode::GetObject => {
                let key = frame.pop();
                let target = frame.pop();
                let value = vm_try!(ctx, frame, object_ops::get_member(ctx, target, key));
                frame.push(value);
            }
            Opcode::GetObjectWithPeeking => {
                let key = frame.peek();
                let target = frame.stack[frame.stack.len() - 2];
                let value = vm_try!(ctx, frame, object_ops::get_member(ctx, target, key));
                frame.push(value);
            }
            Opcode::GetObjectPreComputed => {
                let atom = AtomId::from_index(fetch_u16!(frame));
                let site = fetch_u16!(frame);
                let target = frame.pop();
                let value = vm_try!(ctx, frame, object_ops::get_named(ctx, &frame.code, target, atom, site));
                frame.push(value);
            }
            Opcode::GetObjectPreComputedWithPeeking => {
                let atom = AtomId::from_index(fetch_u16!(frame));
                let site = fetch_u16!(frame);
                let target = frame.peek();
                let value = vm_try!(ctx, frame, object_ops::get_named(ctx, &frame.code, target, atom, site));
                frame.push(value);
            }
            Opcode::SetObject => {
                let value = frame.pop();
                let key = frame.pop();
                let target = frame.pop();
                vm_try!(
                    ctx,
                    frame,
                    object_ops::set_member(ctx, target, key, value, frame.strict)
                );
                frame.push(value);
            }
            Opcode::SetObjectPreComputed => {
                let atom = AtomId::from_index(fetch_u16!(frame));
                let site = fetch_u16!(frame);
                let value = frame.pop();
                let target = frame.pop();
                vm_try!(
                    ctx,
                    frame,
                    object_ops::set_named(ctx, &frame.code, target, atom, site, value, frame.strict)
                );
                frame.push(value);
            }

            // --- functions and calls (call.rs) ---
            Opcode::CreateFunction => {
                let index = fetch_u16!(frame);
                let code = Rc::clone(frame.code.function(index));
                let value = vm_try!(ctx, frame, instantiate_function(ctx, code, frame.env));
                frame.push(value);
            }
            Opcode::PrepareFunctionCall => {
                let site = fetch_u16!(frame);
                let key = frame.pop();
                let target = frame.pop();
                let callee = vm_try!(ctx, frame, call::prepare_member_call(ctx, &frame.code, target, key, site));
                frame.push(callee);
                frame.push(target);
            }
            Opcode::PushFunctionCallReceiver => {
                frame.push(Value::Undefined);
            }
            Opcode::CallFunction => {
                let argc = usize::from(fetch_u16!(frame));
                let args_start = frame.stack.len() - argc;
                let args: Vec<Value> = frame.stack.drain(args_start..).collect();
                let receiver = frame.pop();
                let callee = frame.pop();
                let result = vm_try!(ctx, frame, invoke(ctx, callee, receiver, args, false));
                frame.push(result);
            }
            Opcode::NewFunctionCall => {
                let argc = usize::from(fetch_u16!(frame));
                let args_start = frame.stack.len() - argc;
                let args: Vec<Value> = frame.stack.drain(args_start..).collect();
                let callee = frame.pop();
                let result = vm_try!(ctx, frame, call::construct(ctx, callee, args));
                frame.push(result);
            }
            Opcode::CallEvalFunction => {
                let argc = usize::from(fetch_u16!(frame));
                let args_start = frame.stack.len() - argc;
                let args: Vec<Value> = frame.stack.drain(args_start..).collect();
                let result = vm_try!(ctx, frame, call::call_eval(ctx, frame, args));
                frame.push(result);
            }
            Opcode::CallBoundFunction => {
                let result = vm_try!(ctx, frame, call::run_bound(ctx, frame));
                return Ok(result);
            }
            Opcode::ExecuteNativeFunction => {
                let result = vm_try!(ctx, frame, call::run_native(ctx, frame));
                return Ok(result);
            }
            Opcode::ReturnFunction => {
                if let Some(value) = do_return(ctx, frame, Value::Undefined)? {
                    return Ok(value);
                }
            }
            Opcode::ReturnFunctionWithValue => {
                let value = frame.pop();
                if let Some(value) = do_return(ctx, frame, value)? {
                    return Ok(value);
                }
            }

            // --- control ---
            Opcode::Jump => {
                let offset = fetch_i16!(frame);
                jump_relative!(frame, offset);
            }
            Opcode::JumpIfFalse => {
                let offset = fetch_i16!(frame);
                let value = frame.pop();
                if !value.to_boolean(&ctx.heap, &ctx.atoms) {
                    jump_relative!(frame, offset);
                }
            }
            Opcode::JumpIfTrue => {
                let offset = fetch_i16!(frame);
                let value = frame.pop();
                if value.to_boolean(&ctx.heap, &ctx.atoms) {
                    jump_relative!(frame, offset);
                }
            }
            Opcode::JumpIfFalseWithPeeking => {
                let offset = fetch_i16!(frame);
                let value = frame.peek();
                if value.to_boolean(&ctx.heap, &ctx.atoms) {
                    frame.pop();
                } else {
                    jump_relative!(frame, offset);
                }
            }
            Opcode::JumpIfTrueWithPeeking => {
                let offset = fetch_i16!(frame);
                let value = frame.peek();
                if value.to_boolean(&ctx.heap, &ctx.atoms) {
                    jump_relative!(frame, offset);
                } else {
                    frame.pop();
                }
            }
            Opcode::JumpComplexCase => {
                let reason_byte = fetch_u8!(frame);
                let unwind = fetch_u8!(frame);
                let target_sp = fetch_u16!(frame);
                let offset = fetch_i16!(frame);
                let base = i64::try_from(frame.pc).expect("pc exceeds i64");
                let target = usize::try_from(base + i64::from(offset)).expect("jump target out of range");
                let reason = match reason_byte {
                    COMPLEX_JUMP_BREAK => FlowReason::Break,
                    COMPLEX_JUMP_CONTINUE => FlowReason::Continue,
                    _ => FlowReason::Jump,
                };
                vm_try!(
                    ctx,
                    frame,
                    do_complex_jump(ctx, frame, reason, u32::from(unwind), target_sp, target)
                );
            }
            Opcode::LoopStart => {
                if ctx.tracer.enabled() {
                    ctx.tracer.event(TraceEvent::LoopIteration { offset: frame.pc - 1 });
                }
            }

            // --- environments ---
            Opcode::EnterWithEnvironment => {
                let value = frame.pop();
                let obj_id = match value {
                    Value::Ref(id) if ctx.heap.object_checked(id).is_some() => id,
                    _ => {
                        handle_throw(
                            ctx,
                            frame,
                            RunError::type_error("Cannot convert value to object for 'with'"),
                        )?;
                        continue;
                    }
                };
                let with_env = vm_try!(
                    ctx,
                    frame,
                    ctx.heap
                        .allocate(HeapData::Env(LexicalEnv::with_scope(obj_id, frame.env)))
                );
                frame.guards.push(GuardFrame {
                    kind: GuardKind::With,
                    saved_env: frame.env,
                    saved_sp: frame.stack.len(),
                });
                frame.env = with_env;
            }
            Opcode::ExitEnvironment => {
                let guard = frame.guards.pop().expect("environment guard underflow");
                debug_assert!(matches!(guard.kind, GuardKind::With));
                frame.env = guard.saved_env;
            }

            // --- exceptions ---
            Opcode::Try => {
                let param = fetch_u16!(frame);
                // each offset is relative to the position just past its own
                // operand, matching how forward jumps are patched
                let catch_offset = fetch_i16!(frame);
                let catch_base = i64::try_from(frame.pc).expect("pc exceeds i64");
                let finally_offset = fetch_i16!(frame);
                let finally_base = i64::try_from(frame.pc).expect("pc exceeds i64");
                let catch_pc = if param == NO_CATCH_PARAM {
                    None
                } else {
                    Some(usize::try_from(catch_base + i64::from(catch_offset)).expect("catch target out of range"))
                };
                let finally_pc = if finally_offset == 0 {
                    None
                } else {
                    Some(
                        usize::try_from(finally_base + i64::from(finally_offset))
                            .expect("finally target out of range"),
                    )
                };
                frame.guards.push(GuardFrame {
                    kind: GuardKind::Try {
                        catch_pc,
                        finally_pc,
                        catch_param: (param != NO_CATCH_PARAM).then(|| AtomId::from_index(param)),
                        phase: TryPhase::InTry,
                        pending: Value::Empty,
                    },
                    saved_env: frame.env,
                    saved_sp: frame.stack.len(),
                });
            }
            Opcode::TryCatchBodyEnd => {
                let offset = fetch_i16!(frame);
                let has_finally = {
                    let guard = frame.guards.last_mut().expect("try guard underflow");
                    frame.env = guard.saved_env;
                    match &mut guard.kind {
                        GuardKind::Try { finally_pc, phase, .. } => {
                            if finally_pc.is_some() {
                                *phase = TryPhase::InFinally;
                                true
                            } else {
                                false
                            }
                        }
                        GuardKind::With => {
                            debug_assert!(false, "TryCatchBodyEnd over a with guard");
                            false
                        }
                    }
                };
                if !has_finally {
                    frame.guards.pop();
                }
                jump_relative!(frame, offset);
            }
            Opcode::Throw => {
                let value = frame.pop();
                handle_throw(ctx, frame, RunError::Thrown(value))?;
            }
            Opcode::FinallyEnd => {
                if let Some(value) = finally_end(ctx, frame)? {
                    return Ok(value);
                }
            }

            // --- enumeration ---
            Opcode::EnumerateObject => {
                let target = frame.pop();
                let state = vm_try!(ctx, frame, object_ops::enumerate(ctx, target));
                frame.push(state);
            }
            Opcode::EnumerateObjectKey => {
                let offset = fetch_i16!(frame);
                let state_value = frame.peek();
                match vm_try!(ctx, frame, object_ops::enumerate_next(ctx, state_value)) {
                    Some(key) => frame.push(key),
                    None => jump_relative!(frame, offset),
                }
            }

            // --- introspection ---
            Opcode::This => {
                frame.push(frame.this_value);
            }
            Opcode::GetArgumentsObject => {
                let value = vm_try!(ctx, frame, call::arguments_object(ctx, frame));
                frame.push(value);
            }
            Opcode::SetArgumentsObject => {
                let value = frame.peek();
                frame.arguments_object = Some(value);
            }
            Opcode::LoadStackPointer => {
                frame.sp_mark = frame.stack.len();
            }
            Opcode::CheckStackPointer => {
                let expected = usize::from(fetch_u16!(frame));
                debug_assert_eq!(
                    frame.stack.len(),
                    frame.sp_mark + expected,
                    "operand stack drifted from the compiler's accounting"
                );
                frame.stack.truncate(frame.sp_mark + expected);
            }

            Opcode::End => {
                return Ok(frame.completion);
            }
        }
    }
}

// ----------------------------------------------------------------------
// Identifier and binding operations
// ----------------------------------------------------------------------

/// Walks outward to the `(up + 1)`-th function or global record from the
/// current environment, skipping catch and with scopes.
fn nth_function_env<T: ResourceTracker, Tr: VmTracer>(ctx: &VmContext<T, Tr>, frame: &Frame, up: u16) -> HeapId {
    let mut remaining = up;
    let mut current = frame.env;
    loop {
        let env = ctx.heap.env(current);
        if matches!(env.record, EnvRecord::Function { .. } | EnvRecord::Global { .. }) {
            if remaining == 0 {
                return current;
            }
            remaining -= 1;
        }
        current = env.outer.expect("function record count exceeds lexical depth");
    }
}

fn read_function_slot<T: ResourceTracker, Tr: VmTracer>(
    ctx: &VmContext<T, Tr>,
    frame: &Frame,
    up: u16,
    index: u16,
) -> Value {
    let env_id = nth_function_env(ctx, frame, up);
    match &ctx.heap.env(env_id).record {
        EnvRecord::Function { bindings, .. } => bindings.get(usize::from(index)),
        EnvRecord::Global { declarative, .. } => declarative.get(usize::from(index)),
        _ => unreachable!("nth_function_env returns function or global records"),
    }
}

fn write_function_slot<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &Frame,
    up: u16,
    index: u16,
    value: Value,
) {
    let env_id = nth_function_env(ctx, frame, up);
    match &mut ctx.heap.env_mut(env_id).record {
        EnvRecord::Function { bindings, .. } => bindings.set(usize::from(index), value),
        EnvRecord::Global { declarative, .. } => declarative.set(usize::from(index), value),
        _ => unreachable!("nth_function_env returns function or global records"),
    }
}

/// Reads through a resolved binding, invoking getters for object-backed
/// slots.
fn read_binding<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    binding: environment::BindingRef,
    name: AtomId,
) -> RunResult<Value> {
    if let Some(value) = environment::read_declarative(&ctx.heap, binding) {
        return Ok(value);
    }
    let object = environment::binding_object(&ctx.heap, binding)
        .ok_or_else(|| RunError::internal("binding neither declarative nor object-backed"))?;
    object_ops::property_get(ctx, object, name, Value::Ref(object))
}

fn get_by_id<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &Frame,
    name: AtomId,
    site: u16,
) -> RunResult<Value> {
    // cache hit: a previously resolved global binding
    if let Some(ic) = frame.code.ident_ic(site)
        && let Some(cached) = ic.lookup(ctx.ic_generation)
    {
        match cached.slot {
            BindingSlot::GlobalDecl(_) => {
                if let Some(value) =
                    environment::read_declarative(&ctx.heap, environment::BindingRef {
                        env: cached.env,
                        slot: cached.slot,
                    })
                {
                    return Ok(value);
                }
            }
            BindingSlot::GlobalObject => {
                if object::has_property(&ctx.heap, &ctx.atoms, ctx.global_object, name) {
                    return object_ops::property_get(ctx, ctx.global_object, name, Value::Ref(ctx.global_object));
                }
            }
            BindingSlot::Decl(_) | BindingSlot::Object => {}
        }
    }
    let Some(binding) = environment::resolve_binding(&ctx.heap, &ctx.atoms, frame.env, name) else {
        return Err(RunError::reference(format!(
            "{} is not defined",
            ctx.atoms.text(name)
        )));
    };
    if binding.env == ctx.global_env
        && let Some(ic) = frame.code.ident_ic(site)
    {
        ic.fill(ctx.ic_generation, CachedBinding {
            env: binding.env,
            slot: binding.slot,
        });
    }
    read_binding(ctx, binding, name)
}

fn set_by_id<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &Frame,
    name: AtomId,
    site: u16,
    value: Value,
) -> RunResult<()> {
    if let Some(ic) = frame.code.ident_ic(site)
        && let Some(cached) = ic.lookup(ctx.ic_generation)
        && let BindingSlot::GlobalDecl(_) = cached.slot
    {
        let wrote = environment::write_declarative(
            &mut ctx.heap,
            environment::BindingRef {
                env: cached.env,
                slot: cached.slot,
            },
            value,
        );
        if wrote {
            return Ok(());
        }
    }
    match environment::resolve_binding(&ctx.heap, &ctx.atoms, frame.env, name) {
        Some(binding) => {
            if environment::write_declarative(&mut ctx.heap, binding, value) {
                if binding.env == ctx.global_env
                    && let Some(ic) = frame.code.ident_ic(site)
                {
                    ic.fill(ctx.ic_generation, CachedBinding {
                        env: binding.env,
                        slot: binding.slot,
                    });
                }
                return Ok(());
            }
            let object = environment::binding_object(&ctx.heap, binding)
                .ok_or_else(|| RunError::internal("binding neither declarative nor object-backed"))?;
            object_ops::set_member(ctx, Value::Ref(object), Value::InternStr(name), value, frame.strict)
        }
        None => {
            // unresolved write: strict throws, sloppy creates a global
            if frame.strict {
                return Err(RunError::reference(format!(
                    "{} is not defined",
                    ctx.atoms.text(name)
                )));
            }
            let global = ctx.global_object;
            let VmContext { heap, atoms, .. } = ctx;
            object::define_data_property(heap, atoms, global, name, value, crate::shape::PropertyFlags::plain_data());
            Ok(())
        }
    }
}

/// `CreateBinding`: a mutable binding on the nearest variable record. An
/// existing binding is left untouched (`var` re-declaration semantics).
fn create_binding<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &Frame,
    name: AtomId,
) -> RunResult<()> {
    let env_id = nth_function_env(ctx, frame, 0);
    match &mut ctx.heap.env_mut(env_id).record {
        EnvRecord::Function { bindings, .. } => match bindings {
            DeclarativeBindings::Activation(data) => {
                data.create_binding(name);
            }
            DeclarativeBindings::Indexed(_) => {
                return Err(RunError::internal("binding creation against an indexed record"));
            }
        },
        EnvRecord::Global { declarative, .. } => {
            declarative.create_binding(name);
        }
        _ => unreachable!("nth_function_env returns function or global records"),
    }
    ctx.bump_ic_generation();
    Ok(())
}

/// `delete identifier` in sloppy mode: object-backed bindings (globals,
/// `with` objects) are deletable subject to property attributes,
/// declarative bindings are not.
fn delete_binding<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &Frame,
    name: AtomId,
) -> RunResult<bool> {
    match environment::resolve_binding(&ctx.heap, &ctx.atoms, frame.env, name) {
        None => Ok(true),
        Some(binding) => match environment::binding_object(&ctx.heap, binding) {
            Some(object) => {
                let VmContext { heap, atoms, .. } = ctx;
                Ok(object::delete_property(heap, atoms, object, name))
            }
            None => Ok(false),
        },
    }
}

// ----------------------------------------------------------------------
// Abrupt-completion machinery
// ----------------------------------------------------------------------

/// Materializes a throw into a value user code can bind.
fn thrown_value<T: ResourceTracker, Tr: VmTracer>(ctx: &mut VmContext<T, Tr>, err: RunError) -> RunResult<Value> {
    match err {
        RunError::Thrown(value) => Ok(value),
        RunError::Simple(simple) => call::create_error_object(ctx, simple),
    }
}

/// Routes a thrown error through the guard stack: `Ok(())` means a handler
/// took over (pc/env/stack updated), `Err` propagates to the caller frame.
fn handle_throw<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &mut Frame,
    err: RunError,
) -> RunResult<()> {
    let mut err = err;
    // stamp the line eagerly: by the time the error escapes, pc has moved
    if let RunError::Simple(simple) = &err
        && simple.line.is_none()
        && let Some(line) = frame.code.line_for_offset(frame.pc)
    {
        err = err.with_line(line);
    }
    while let Some(guard) = frame.guards.last_mut() {
        match &mut guard.kind {
            GuardKind::With => {
                frame.env = guard.saved_env;
                frame.guards.pop();
            }
            GuardKind::Try {
                catch_pc,
                finally_pc,
                catch_param,
                phase,
                pending,
            } => {
                if *phase == TryPhase::InTry && catch_pc.is_some() {
                    let target = (*catch_pc).expect("checked above");
                    let param = (*catch_param).expect("catch clause always binds its parameter");
                    *phase = TryPhase::InCatch;
                    let saved_env = guard.saved_env;
                    let saved_sp = guard.saved_sp;
                    frame.stack.truncate(saved_sp);
                    let caught = thrown_value(ctx, err)?;
                    let catch_env = ctx
                        .heap
                        .allocate(HeapData::Env(LexicalEnv::catch_scope(param, caught, saved_env)))?;
                    frame.env = catch_env;
                    frame.pc = target;
                    return Ok(());
                }
                if *phase != TryPhase::InFinally && finally_pc.is_some() {
                    let target = (*finally_pc).expect("checked above");
                    *phase = TryPhase::InFinally;
                    let saved_env = guard.saved_env;
                    let saved_sp = guard.saved_sp;
                    let caught = thrown_value(ctx, err)?;
                    let record = ctx.heap.allocate(HeapData::ControlFlow(ControlFlowRecord {
                        reason: FlowReason::Throw,
                        value: caught,
                        depth: 0,
                        target: 0,
                        target_sp: 0,
                    }))?;
                    // write the record after reborrowing; the allocation
                    // above invalidated the guard borrow
                    if let Some(GuardFrame {
                        kind: GuardKind::Try { pending, .. },
                        ..
                    }) = frame.guards.last_mut()
                    {
                        *pending = Value::Ref(record);
                    }
                    frame.stack.truncate(saved_sp);
                    frame.env = saved_env;
                    frame.pc = target;
                    return Ok(());
                }
                let _ = pending;
                frame.env = guard.saved_env;
                frame.guards.pop();
            }
        }
    }
    Err(err)
}

/// `return`: runs pending finallies first. `Ok(Some(v))` means the frame
/// finishes now; `Ok(None)` means a finally took over.
fn do_return<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &mut Frame,
    value: Value,
) -> RunResult<Option<Value>> {
    while let Some(guard) = frame.guards.last_mut() {
        match &mut guard.kind {
            GuardKind::With => {
                frame.env = guard.saved_env;
                frame.guards.pop();
            }
            GuardKind::Try {
                finally_pc, phase, ..
            } => {
                if *phase != TryPhase::InFinally && finally_pc.is_some() {
                    let target = (*finally_pc).expect("checked above");
                    *phase = TryPhase::InFinally;
                    let saved_env = guard.saved_env;
                    let saved_sp = guard.saved_sp;
                    let record = ctx.heap.allocate(HeapData::ControlFlow(ControlFlowRecord {
                        reason: FlowReason::Return,
                        value,
                        depth: 0,
                        target: 0,
                        target_sp: 0,
                    }))?;
                    if let Some(GuardFrame {
                        kind: GuardKind::Try { pending, .. },
                        ..
                    }) = frame.guards.last_mut()
                    {
                        *pending = Value::Ref(record);
                    }
                    frame.stack.truncate(saved_sp);
                    frame.env = saved_env;
                    frame.pc = target;
                    return Ok(None);
                }
                frame.env = guard.saved_env;
                frame.guards.pop();
            }
        }
    }
    Ok(Some(value))
}

/// A break/continue jump crossing `unwind` guard scopes: pops with scopes,
/// runs finallies, then lands at `target` with the stack cut to
/// `target_sp`.
fn do_complex_jump<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &mut Frame,
    reason: FlowReason,
    mut unwind: u32,
    target_sp: u16,
    target: usize,
) -> RunResult<()> {
    while unwind > 0 {
        let Some(guard) = frame.guards.last_mut() else {
            return Err(RunError::internal("guard unwind exceeded guard stack"));
        };
        match &mut guard.kind {
            GuardKind::With => {
                frame.env = guard.saved_env;
                frame.guards.pop();
                unwind -= 1;
            }
            GuardKind::Try {
                finally_pc, phase, ..
            } => {
                if *phase != TryPhase::InFinally && finally_pc.is_some() {
                    let finally_target = (*finally_pc).expect("checked above");
                    *phase = TryPhase::InFinally;
                    let saved_env = guard.saved_env;
                    let saved_sp = guard.saved_sp;
                    let record = ctx.heap.allocate(HeapData::ControlFlow(ControlFlowRecord {
                        reason,
                        value: Value::Undefined,
                        depth: unwind - 1,
                        target: u32::try_from(target).expect("target fits u32"),
                        target_sp,
                    }))?;
                    // re-store through a fresh borrow after the allocation
                    if let Some(GuardFrame {
                        kind: GuardKind::Try { pending, .. },
                        ..
                    }) = frame.guards.last_mut()
                    {
                        *pending = Value::Ref(record);
                    }
                    frame.stack.truncate(saved_sp);
                    frame.env = saved_env;
                    frame.pc = finally_target;
                    return Ok(());
                }
                frame.env = guard.saved_env;
                frame.guards.pop();
                unwind -= 1;
            }
        }
    }
    frame.stack.truncate(frame.sp_mark + usize::from(target_sp));
    frame.pc = target;
    Ok(())
}

/// `FinallyEnd`: falls through on normal completion, otherwise consumes or
/// forwards the pending control-flow record. `Ok(Some(v))` finishes the
/// frame (a `return` travelled through).
fn finally_end<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &mut Frame,
) -> RunResult<Option<Value>> {
    let guard = frame.guards.pop().expect("FinallyEnd without a guard frame");
    frame.env = guard.saved_env;
    let GuardKind::Try { pending, phase, .. } = guard.kind else {
        return Err(RunError::internal("FinallyEnd over a with guard"));
    };
    debug_assert_eq!(phase, TryPhase::InFinally);
    let Value::Ref(record_id) = pending else {
        // normal completion: fall through past the finally
        return Ok(None);
    };
    let HeapData::ControlFlow(record) = ctx.heap.get(record_id) else {
        return Err(RunError::internal("pending completion is not a control-flow record"));
    };
    let record = *record;
    match record.reason {
        FlowReason::Throw => {
            handle_throw(ctx, frame, RunError::Thrown(record.value))?;
            Ok(None)
        }
        FlowReason::Return => do_return(ctx, frame, record.value),
        FlowReason::Break | FlowReason::Continue | FlowReason::Jump => {
            let target = usize::try_from(record.target).expect("record target fits usize");
            do_complex_jump(ctx, frame, record.reason, record.depth, record.target_sp, target)?;
            Ok(None)
        }
    }
}
