//! Binary and unary operator helpers for the interpreter.
//!
//! Every helper takes already-popped operands and returns the result value.
//! The `Int32 + Int32` shapes run a checked fast path first and promote to
//! doubles on overflow; everything else reduces operands with `ToPrimitive`
//! (which may run user `valueOf`/`toString` code) and then applies the
//! numeric or string semantics.

use crate::{
    bytecode::op::Opcode,
    error::{RunError, RunResult},
    heap::HeapData,
    object::{self, ObjectKind},
    resource::ResourceTracker,
    string,
    tracer::VmTracer,
    value::{self, Value},
};

use super::{VmContext, call};

/// Preferred primitive type for `ToPrimitive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PrimitiveHint {
    Default,
    Number,
    String,
}

/// ToPrimitive (ES5 9.1): primitives pass through; objects try
/// `valueOf`/`toString` in hint order, falling back to engine-level
/// descriptions when neither is callable (the standard library that would
/// normally supply them is out of scope).
pub(super) fn to_primitive<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    value: Value,
    hint: PrimitiveHint,
) -> RunResult<Value> {
    if value.is_primitive(&ctx.heap) {
        return Ok(value.materialize());
    }
    let Value::Ref(obj_id) = value else {
        return Ok(value.materialize());
    };
    let method_order = if hint == PrimitiveHint::String {
        [crate::atom::StaticAtoms::ToString, crate::atom::StaticAtoms::ValueOf]
    } else {
        [crate::atom::StaticAtoms::ValueOf, crate::atom::StaticAtoms::ToString]
    };
    for method in method_order {
        let name = crate::atom::AtomId::from(method);
        if object::has_property(&ctx.heap, &ctx.atoms, obj_id, name) {
            let callee = super::object_ops::property_get(ctx, obj_id, name, value)?;
            if object::is_callable(&ctx.heap, callee) {
                let result = call::invoke(ctx, callee, value, Vec::new(), false)?;
                if result.is_primitive(&ctx.heap) {
                    return Ok(result.materialize());
                }
            }
        }
    }
    Ok(default_description(ctx, obj_id)?)
}

/// Pre-extracted facts for [`default_description`], so the heap borrow
/// releases before any conversion re-enters the interpreter.
enum DescriptionKind {
    Array(u32),
    Function(Option<crate::atom::AtomId>),
    Error(crate::error::ErrorKind),
    RegExp {
        source: crate::atom::AtomId,
        global: bool,
        ignore_case: bool,
        multiline: bool,
    },
    Plain,
}

/// Engine-level fallback string for objects with no callable conversion
/// methods.
fn default_description<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    obj_id: crate::heap::HeapId,
) -> RunResult<Value> {
    let kind = match &ctx.heap.object(obj_id).kind {
        ObjectKind::Array(data) => DescriptionKind::Array(data.length),
        ObjectKind::Function(data) => DescriptionKind::Function(data.code.function_name()),
        ObjectKind::Error(kind) => DescriptionKind::Error(*kind),
        ObjectKind::RegExp(data) => DescriptionKind::RegExp {
            source: data.source,
            global: data.global,
            ignore_case: data.ignore_case,
            multiline: data.multiline,
        },
        ObjectKind::Plain => DescriptionKind::Plain,
    };
    let text = match kind {
        DescriptionKind::Array(length) => {
            // comma-joined elements, the Array.prototype.toString shape
            let mut out = String::new();
            for index in 0..length {
                if index > 0 {
                    out.push(',');
                }
                let key = ctx.atoms.intern_index(index);
                if object::has_property(&ctx.heap, &ctx.atoms, obj_id, key) {
                    let element = super::object_ops::property_get(ctx, obj_id, key, Value::Ref(obj_id))?;
                    if !matches!(element, Value::Undefined | Value::Null | Value::Empty) {
                        out.push_str(&to_display_string(ctx, element)?);
                    }
                }
            }
            out
        }
        DescriptionKind::Function(name) => {
            let name = name.map_or_else(String::new, |n| ctx.atoms.text(n).into_owned());
            format!("function {name}() {{ [native code] }}")
        }
        DescriptionKind::Error(error_kind) => {
            let name = crate::atom::AtomId::from(crate::atom::StaticAtoms::Message);
            let message_value = match object::get_own_property(&ctx.heap, &ctx.atoms, obj_id, name) {
                Some(object::OwnProperty::Data { value, .. }) => Some(value),
                _ => None,
            };
            let message = match message_value {
                Some(value) => to_display_string(ctx, value)?,
                None => String::new(),
            };
            if message.is_empty() {
                error_kind.to_string()
            } else {
                format!("{error_kind}: {message}")
            }
        }
        DescriptionKind::RegExp {
            source,
            global,
            ignore_case,
            multiline,
        } => {
            let mut out = format!("/{}/", ctx.atoms.text(source));
            if global {
                out.push('g');
            }
            if ignore_case {
                out.push('i');
            }
            if multiline {
                out.push('m');
            }
            out
        }
        DescriptionKind::Plain => "[object Object]".to_owned(),
    };
    let units: Vec<u16> = text.encode_utf16().collect();
    let id = ctx
        .heap
        .allocate(HeapData::Str(crate::string::JsString::Raw(crate::string::RawString::new(units))))?;
    Ok(Value::Ref(id))
}

/// Rust-string rendering of any value, for messages and joins. Objects
/// reduce through `ToPrimitive` first.
pub(super) fn to_display_string<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    value: Value,
) -> RunResult<String> {
    let prim = to_primitive(ctx, value, PrimitiveHint::String)?;
    Ok(match prim {
        Value::Empty | Value::Undefined => "undefined".to_owned(),
        Value::Null => "null".to_owned(),
        Value::Bool(b) => if b { "true" } else { "false" }.to_owned(),
        Value::Int32(_) | Value::Double(_) => value::value_number_to_string(prim),
        Value::InternStr(_) | Value::Ref(_) => string::string_to_rust(&mut ctx.heap, &ctx.atoms, prim),
    })
}

/// ToString producing a string *value* (interned or heap).
pub(super) fn to_string_value<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    value: Value,
) -> RunResult<Value> {
    let prim = to_primitive(ctx, value, PrimitiveHint::String)?;
    if string::is_string_value(prim, &ctx.heap) {
        return Ok(prim);
    }
    let text = match prim {
        Value::Empty | Value::Undefined => "undefined".to_owned(),
        Value::Null => "null".to_owned(),
        Value::Bool(b) => if b { "true" } else { "false" }.to_owned(),
        Value::Int32(_) | Value::Double(_) => value::value_number_to_string(prim),
        _ => unreachable!("string values returned above"),
    };
    let units: Vec<u16> = text.encode_utf16().collect();
    let id = ctx
        .heap
        .allocate(HeapData::Str(crate::string::JsString::Raw(crate::string::RawString::new(units))))?;
    Ok(Value::Ref(id))
}

/// ToNumber over any value, reducing objects first.
pub(super) fn to_number_f64<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    value: Value,
) -> RunResult<f64> {
    let prim = to_primitive(ctx, value, PrimitiveHint::Number)?;
    Ok(prim.to_number(&mut ctx.heap, &ctx.atoms))
}

/// ToNumber producing a normalized number value.
pub(super) fn to_number_value<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    value: Value,
) -> RunResult<Value> {
    if let Value::Int32(_) = value {
        return Ok(value);
    }
    Ok(Value::number(to_number_f64(ctx, value)?))
}

/// The `+` operator: numeric addition or string concatenation, decided
/// after `ToPrimitive` on both sides.
pub(super) fn add<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    lhs: Value,
    rhs: Value,
) -> RunResult<Value> {
    // integer fast path
    if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
        return Ok(match a.checked_add(b) {
            Some(sum) => Value::Int32(sum),
            None => Value::Double(f64::from(a) + f64::from(b)),
        });
    }
    let left = to_primitive(ctx, lhs, PrimitiveHint::Default)?;
    let right = to_primitive(ctx, rhs, PrimitiveHint::Default)?;
    let left_is_string = string::is_string_value(left, &ctx.heap);
    let right_is_string = string::is_string_value(right, &ctx.heap);
    if left_is_string || right_is_string {
        let left_str = to_string_value(ctx, left)?;
        let right_str = to_string_value(ctx, right)?;
        return string::concat_strings(&mut ctx.heap, &ctx.atoms, left_str, right_str);
    }
    let a = left.to_number(&mut ctx.heap, &ctx.atoms);
    let b = right.to_number(&mut ctx.heap, &ctx.atoms);
    Ok(Value::number(a + b))
}

/// `-`, `*`, `/`, `%`. Division stays IEEE-754: a zero divisor yields
/// infinities or NaN, never an exception.
pub(super) fn arithmetic<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    op: Opcode,
    lhs: Value,
    rhs: Value,
) -> RunResult<Value> {
    if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
        match op {
            Opcode::Minus => {
                if let Some(result) = a.checked_sub(b) {
                    return Ok(Value::Int32(result));
                }
            }
            Opcode::Multiply => {
                // keep the fast path away from the -0 results
                if let Some(result) = a.checked_mul(b)
                    && (result != 0 || (a >= 0 && b >= 0))
                {
                    return Ok(Value::Int32(result));
                }
            }
            Opcode::Mod => {
                if b != 0 && !(a == i32::MIN && b == -1) {
                    let result = a % b;
                    // a zero result with a negative dividend is -0
                    if result != 0 || a >= 0 {
                        return Ok(Value::Int32(result));
                    }
                }
            }
            _ => {}
        }
    }
    let a = to_number_f64(ctx, lhs)?;
    let b = to_number_f64(ctx, rhs)?;
    let result = match op {
        Opcode::Minus => a - b,
        Opcode::Multiply => a * b,
        Opcode::Division => a / b,
        Opcode::Mod => a % b,
        _ => return Err(RunError::internal("non-arithmetic opcode in arithmetic helper")),
    };
    Ok(Value::number(result))
}

/// `Increment`/`Decrement` over an operand already passed through
/// `ToNumber`.
pub(super) fn increment(value: Value, delta: i32) -> RunResult<Value> {
    match value {
        Value::Int32(i) => Ok(match i.checked_add(delta) {
            Some(result) => Value::Int32(result),
            None => Value::Double(f64::from(i) + f64::from(delta)),
        }),
        Value::Double(d) => Ok(Value::number(d + f64::from(delta))),
        _ => Err(RunError::internal("increment on a non-number operand")),
    }
}

/// Unary `-`.
pub(super) fn negate<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    value: Value,
) -> RunResult<Value> {
    if let Value::Int32(i) = value
        && i != 0
        && let Some(result) = i.checked_neg()
    {
        return Ok(Value::Int32(result));
    }
    let n = to_number_f64(ctx, value)?;
    Ok(Value::number(-n))
}

/// `&`, `|`, `^`.
pub(super) fn bitwise<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    op: Opcode,
    lhs: Value,
    rhs: Value,
) -> RunResult<Value> {
    let a = value::to_int32(to_number_f64(ctx, lhs)?);
    let b = value::to_int32(to_number_f64(ctx, rhs)?);
    Ok(Value::Int32(match op {
        Opcode::BitwiseAnd => a & b,
        Opcode::BitwiseOr => a | b,
        Opcode::BitwiseXor => a ^ b,
        _ => return Err(RunError::internal("non-bitwise opcode in bitwise helper")),
    }))
}

/// `<<`, `>>`, `>>>`: the shift count is masked to five bits.
pub(super) fn shift<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    op: Opcode,
    lhs: Value,
    rhs: Value,
) -> RunResult<Value> {
    let count = value::to_uint32(to_number_f64(ctx, rhs)?) & 0x1F;
    match op {
        Opcode::LeftShift => {
            let a = value::to_int32(to_number_f64(ctx, lhs)?);
            Ok(Value::Int32(a.wrapping_shl(count)))
        }
        Opcode::SignedRightShift => {
            let a = value::to_int32(to_number_f64(ctx, lhs)?);
            Ok(Value::Int32(a.wrapping_shr(count)))
        }
        Opcode::UnsignedRightShift => {
            let a = value::to_uint32(to_number_f64(ctx, lhs)?);
            Ok(Value::from_u32(a.wrapping_shr(count)))
        }
        _ => Err(RunError::internal("non-shift opcode in shift helper")),
    }
}

/// Abstract equality (ES5 11.9.3), including the object arms.
pub(super) fn abstract_equals<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    lhs: Value,
    rhs: Value,
) -> RunResult<bool> {
    let lhs_obj = ctx.heap.is_object(lhs);
    let rhs_obj = ctx.heap.is_object(rhs);
    match (lhs_obj, rhs_obj) {
        (true, true) => Ok(lhs == rhs),
        (true, false) => {
            if matches!(rhs.materialize(), Value::Undefined | Value::Null) {
                return Ok(false);
            }
            let left = to_primitive(ctx, lhs, PrimitiveHint::Default)?;
            abstract_equals(ctx, left, rhs)
        }
        (false, true) => {
            if matches!(lhs.materialize(), Value::Undefined | Value::Null) {
                return Ok(false);
            }
            let right = to_primitive(ctx, rhs, PrimitiveHint::Default)?;
            abstract_equals(ctx, lhs, right)
        }
        (false, false) => Ok(value::abstract_equals_primitive(&mut ctx.heap, &ctx.atoms, lhs, rhs)),
    }
}

/// Relational operators via the abstract relational comparison: strings
/// order by UTF-16 units, everything else numerically, NaN poisons to
/// false.
pub(super) fn relational<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    op: Opcode,
    lhs: Value,
    rhs: Value,
) -> RunResult<Value> {
    // integer fast path
    if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
        return Ok(Value::Bool(match op {
            Opcode::LessThan => a < b,
            Opcode::LessThanOrEqual => a <= b,
            Opcode::GreaterThan => a > b,
            Opcode::GreaterThanOrEqual => a >= b,
            _ => return Err(RunError::internal("non-relational opcode in relational helper")),
        }));
    }
    let left = to_primitive(ctx, lhs, PrimitiveHint::Number)?;
    let right = to_primitive(ctx, rhs, PrimitiveHint::Number)?;
    if string::is_string_value(left, &ctx.heap) && string::is_string_value(right, &ctx.heap) {
        let ordering = string::string_cmp(&mut ctx.heap, &ctx.atoms, left, right);
        return Ok(Value::Bool(match op {
            Opcode::LessThan => ordering == std::cmp::Ordering::Less,
            Opcode::LessThanOrEqual => ordering != std::cmp::Ordering::Greater,
            Opcode::GreaterThan => ordering == std::cmp::Ordering::Greater,
            Opcode::GreaterThanOrEqual => ordering != std::cmp::Ordering::Less,
            _ => return Err(RunError::internal("non-relational opcode in relational helper")),
        }));
    }
    let a = left.to_number(&mut ctx.heap, &ctx.atoms);
    let b = right.to_number(&mut ctx.heap, &ctx.atoms);
    if a.is_nan() || b.is_nan() {
        return Ok(Value::Bool(false));
    }
    Ok(Value::Bool(match op {
        Opcode::LessThan => a < b,
        Opcode::LessThanOrEqual => a <= b,
        Opcode::GreaterThan => a > b,
        Opcode::GreaterThanOrEqual => a >= b,
        _ => return Err(RunError::internal("non-relational opcode in relational helper")),
    }))
}
