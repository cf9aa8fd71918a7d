//! Property access, inline caches, and enumeration for the interpreter.
//!
//! `get_named`/`set_named` are the precomputed-key paths with shape-chain
//! inline caches: a read hit compares the receiver's shape and each
//! prototype's shape against the cached chain and loads the slot directly;
//! a write hit either stores into a known slot or replays a cached add
//! transition. A site that misses twice parks itself in the slow state,
//! which stands in for rewriting the opcode to its slow-mode form, so a
//! megamorphic site stops paying verification costs.

use smallvec::SmallVec;

use crate::{
    atom::{AtomId, StaticAtoms},
    bytecode::code::{CodeBlock, PropIcState},
    error::{RunError, RunResult},
    heap::{EnumerationState, HeapData, HeapId},
    object::{self, ArrayData, JsObject, ObjectKind, OwnProperty, PutDecision, RegExpData},
    resource::ResourceTracker,
    shape::PropertyFlags,
    string,
    tracer::VmTracer,
    value::Value,
};

use super::{VmContext, binary, call};

// ----------------------------------------------------------------------
// Creation
// ----------------------------------------------------------------------

pub(super) fn create_plain_object<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    capacity_hint: u16,
) -> RunResult<HeapId> {
    let mut obj = JsObject::new(
        std::rc::Rc::clone(&ctx.intrinsics.root_shape),
        Value::Ref(ctx.intrinsics.object_prototype),
        ObjectKind::Plain,
    );
    obj.slots.reserve(usize::from(capacity_hint));
    ctx.heap.allocate(HeapData::Object(obj))
}

pub(super) fn create_array<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    elements: Vec<Value>,
) -> RunResult<HeapId> {
    let length = u32::try_from(elements.len()).map_err(|_| RunError::range("Invalid array length"))?;
    let obj = JsObject::new(
        std::rc::Rc::clone(&ctx.intrinsics.root_shape),
        Value::Ref(ctx.intrinsics.object_prototype),
        ObjectKind::Array(ArrayData {
            vector: elements,
            length,
            fast: true,
        }),
    );
    ctx.heap.allocate(HeapData::Object(obj))
}

pub(super) fn create_regexp<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    code: &CodeBlock,
    index: u16,
) -> RunResult<HeapId> {
    let def = code.regexp(index);
    let obj = JsObject::new(
        std::rc::Rc::clone(&ctx.intrinsics.root_shape),
        Value::Ref(ctx.intrinsics.object_prototype),
        ObjectKind::RegExp(Box::new(RegExpData {
            source: def.source,
            global: def.global,
            ignore_case: def.ignore_case,
            multiline: def.multiline,
            compiled: def.compiled.clone(),
        })),
    );
    let id = ctx.heap.allocate(HeapData::Object(obj))?;
    let VmContext { heap, atoms, .. } = ctx;
    let frozen = PropertyFlags::frozen_data();
    object::define_data_property(heap, atoms, id, StaticAtoms::Source.into(), Value::InternStr(def.source), frozen);
    object::define_data_property(heap, atoms, id, StaticAtoms::Global.into(), Value::Bool(def.global), frozen);
    object::define_data_property(
        heap,
        atoms,
        id,
        StaticAtoms::IgnoreCase.into(),
        Value::Bool(def.ignore_case),
        frozen,
    );
    object::define_data_property(
        heap,
        atoms,
        id,
        StaticAtoms::Multiline.into(),
        Value::Bool(def.multiline),
        frozen,
    );
    object::define_data_property(
        heap,
        atoms,
        id,
        StaticAtoms::LastIndex.into(),
        Value::Int32(0),
        PropertyFlags::from_bits(PropertyFlags::WRITABLE),
    );
    Ok(id)
}

// ----------------------------------------------------------------------
// Keys
// ----------------------------------------------------------------------

/// ToPropertyKey: reduces the key to an interned atom.
pub(super) fn to_property_key<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    key: Value,
) -> RunResult<AtomId> {
    if let Value::InternStr(atom) = key {
        return Ok(atom);
    }
    if let Value::Int32(i) = key
        && i >= 0
    {
        return Ok(ctx.atoms.intern_index(i as u32));
    }
    let string_value = binary::to_string_value(ctx, key)?;
    if let Value::InternStr(atom) = string_value {
        return Ok(atom);
    }
    string::ensure_flat(&mut ctx.heap, &ctx.atoms, string_value);
    let units: Vec<u16> = string::flat_units(&ctx.heap, &ctx.atoms, string_value).to_vec();
    Ok(ctx.atoms.intern_units(&units))
}

// ----------------------------------------------------------------------
// Reads
// ----------------------------------------------------------------------

/// Full prototype-chain property read, invoking getters against
/// `receiver`.
pub(super) fn property_get<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    obj_id: HeapId,
    key: AtomId,
    receiver: Value,
) -> RunResult<Value> {
    let mut current = obj_id;
    loop {
        match object::get_own_property(&ctx.heap, &ctx.atoms, current, key) {
            Some(OwnProperty::Data { value, .. }) => return Ok(value.materialize()),
            Some(OwnProperty::ArrayElement(value)) => return Ok(value.materialize()),
            Some(OwnProperty::ArrayLength(length)) => return Ok(Value::from_u32(length)),
            Some(OwnProperty::Accessor { pair, .. }) => {
                if pair.getter == Value::Undefined {
                    return Ok(Value::Undefined);
                }
                return call::invoke(ctx, pair.getter, receiver, Vec::new(), false);
            }
            None => match ctx.heap.object(current).proto {
                Value::Ref(next) => current = next,
                _ => return Ok(Value::Undefined),
            },
        }
    }
}

/// Engine-level string properties: `length` and indexed character access.
fn string_property<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    target: Value,
    key: AtomId,
) -> RunResult<Value> {
    if key == AtomId::from(StaticAtoms::Length) {
        return Ok(Value::from_u32(string::string_length(target, &ctx.heap, &ctx.atoms)));
    }
    if let Some(index) = ctx.atoms.as_array_index(key) {
        string::ensure_flat(&mut ctx.heap, &ctx.atoms, target);
        let units = string::flat_units(&ctx.heap, &ctx.atoms, target);
        if let Some(&unit) = units.get(index as usize) {
            let atom = ctx.atoms.intern_units(&[unit]);
            return Ok(Value::InternStr(atom));
        }
    }
    Ok(Value::Undefined)
}

/// `obj[key]` with a computed key.
pub(super) fn get_member<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    target: Value,
    key: Value,
) -> RunResult<Value> {
    match target {
        Value::Empty | Value::Undefined | Value::Null => Err(cannot_read(ctx, target, key)),
        Value::Ref(id) if ctx.heap.object_checked(id).is_some() => {
            // dense array fast path for integer keys
            if let Value::Int32(index) = key
                && index >= 0
                && let ObjectKind::Array(data) = &ctx.heap.object(id).kind
                && data.fast
            {
                if let Some(value) = data.vector.get(index as usize)
                    && !value.is_empty_value()
                {
                    return Ok(*value);
                }
                // holes and out-of-range fall through to the prototype walk
            }
            let atom = to_property_key(ctx, key)?;
            property_get(ctx, id, atom, target)
        }
        _ if string::is_string_value(target, &ctx.heap) => {
            let atom = to_property_key(ctx, key)?;
            string_property(ctx, target, atom)
        }
        // primitive receivers have no wrapper objects in this engine
        _ => Ok(Value::Undefined),
    }
}

/// `obj.name` with the shape-chain inline cache.
pub(super) fn get_named<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    code: &CodeBlock,
    target: Value,
    name: AtomId,
    site: u16,
) -> RunResult<Value> {
    match target {
        Value::Empty | Value::Undefined | Value::Null => {
            Err(cannot_read(ctx, target, Value::InternStr(name)))
        }
        Value::Ref(id) if ctx.heap.object_checked(id).is_some() => {
            if let Some(ic) = code.prop_ic(site) {
                // cache hit: verify the shape chain and load the slot
                if let PropIcState::GetMono { chain, slot } = &*ic.state.borrow()
                    && let Some(value) = try_cached_get(ctx, id, chain, *slot)
                {
                    return Ok(value);
                }
            }
            let (value, fill) = get_named_slow(ctx, id, name, target)?;
            if let Some(ic) = code.prop_ic(site) {
                let mut state = ic.state.borrow_mut();
                let untouched = matches!(&*state, PropIcState::Uninit);
                let parked = matches!(&*state, PropIcState::Slow);
                match fill {
                    Some((chain, slot)) if untouched => *state = PropIcState::GetMono { chain, slot },
                    None if untouched || parked => {}
                    // a second distinct receiver shape parks the site
                    _ => *state = PropIcState::Slow,
                }
            }
            Ok(value)
        }
        _ if string::is_string_value(target, &ctx.heap) => string_property(ctx, target, name),
        _ => Ok(Value::Undefined),
    }
}

/// Verifies a cached shape chain against the live prototype chain.
fn try_cached_get<T: ResourceTracker, Tr: VmTracer>(
    ctx: &VmContext<T, Tr>,
    obj_id: HeapId,
    chain: &SmallVec<[std::rc::Rc<crate::shape::Shape>; 2]>,
    slot: u16,
) -> Option<Value> {
    let mut current = obj_id;
    for (depth, cached_shape) in chain.iter().enumerate() {
        let obj = ctx.heap.object_checked(current)?;
        if !std::rc::Rc::ptr_eq(&obj.shape, cached_shape) {
            return None;
        }
        if depth + 1 == chain.len() {
            return obj.slots.get(usize::from(slot)).copied().map(Value::materialize);
        }
        match obj.proto {
            Value::Ref(next) => current = next,
            _ => return None,
        }
    }
    None
}

type GetFill = Option<(SmallVec<[std::rc::Rc<crate::shape::Shape>; 2]>, u16)>;

/// Slow-path named read that also computes the cacheable chain when the
/// result is a plain data property reachable through non-dictionary
/// shapes.
fn get_named_slow<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    obj_id: HeapId,
    key: AtomId,
    receiver: Value,
) -> RunResult<(Value, GetFill)> {
    let mut chain: SmallVec<[std::rc::Rc<crate::shape::Shape>; 2]> = SmallVec::new();
    let mut cacheable = true;
    let mut current = obj_id;
    loop {
        let obj = ctx.heap.object(current);
        if obj.shape.is_dictionary() || chain.len() >= 4 {
            cacheable = false;
        }
        chain.push(std::rc::Rc::clone(&obj.shape));
        match object::get_own_property(&ctx.heap, &ctx.atoms, current, key) {
            Some(OwnProperty::Data { value, slot, .. }) => {
                let fill = if cacheable {
                    Some((chain, u16::try_from(slot).unwrap_or(u16::MAX)))
                } else {
                    None
                };
                return Ok((value.materialize(), fill));
            }
            Some(OwnProperty::ArrayElement(value)) => return Ok((value.materialize(), None)),
            Some(OwnProperty::ArrayLength(length)) => return Ok((Value::from_u32(length), None)),
            Some(OwnProperty::Accessor { pair, .. }) => {
                let result = if pair.getter == Value::Undefined {
                    Value::Undefined
                } else {
                    call::invoke(ctx, pair.getter, receiver, Vec::new(), false)?
                };
                return Ok((result, None));
            }
            None => match ctx.heap.object(current).proto {
                Value::Ref(next) => current = next,
                _ => return Ok((Value::Undefined, None)),
            },
        }
    }
}

// ----------------------------------------------------------------------
// Writes
// ----------------------------------------------------------------------

/// Executes a `[[Put]]` decision, retrying once after array demotion.
fn run_put<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    obj_id: HeapId,
    key: AtomId,
    value: Value,
    strict: bool,
) -> RunResult<()> {
    for _ in 0..2 {
        match object::put_search(&ctx.heap, &ctx.atoms, obj_id, key) {
            PutDecision::WriteSlot(slot) => {
                ctx.heap.object_mut(obj_id).slots[slot] = value;
                return Ok(());
            }
            PutDecision::WriteArrayElement(_) | PutDecision::CreateOwn => {
                let VmContext { heap, atoms, .. } = ctx;
                object::define_data_property(heap, atoms, obj_id, key, value, PropertyFlags::plain_data());
                // index writes keep the array length one past the highest
                if let Some(index) = atoms.as_array_index(key)
                    && let ObjectKind::Array(data) = &mut heap.object_mut(obj_id).kind
                    && index >= data.length
                {
                    data.length = index + 1;
                }
                return Ok(());
            }
            PutDecision::WriteArrayLength => {
                let length = binary::to_number_f64(ctx, value)?;
                let VmContext { heap, atoms, .. } = ctx;
                return object::set_array_length(heap, atoms, obj_id, length);
            }
            PutDecision::CallSetter(setter) => {
                call::invoke(ctx, setter, Value::Ref(obj_id), vec![value], false)?;
                return Ok(());
            }
            PutDecision::DemoteAndRetry => {
                let VmContext { heap, atoms, .. } = ctx;
                object::demote_array(heap, atoms, obj_id);
            }
            PutDecision::Reject => {
                if strict {
                    return Err(RunError::type_error(format!(
                        "Cannot assign to read only property '{}'",
                        ctx.atoms.text(key)
                    )));
                }
                return Ok(());
            }
        }
    }
    Err(RunError::internal("array demotion did not settle the put"))
}

/// `obj[key] = value` with a computed key.
pub(super) fn set_member<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    target: Value,
    key: Value,
    value: Value,
    strict: bool,
) -> RunResult<()> {
    match target {
        Value::Empty | Value::Undefined | Value::Null => Err(cannot_write(ctx, target, key)),
        Value::Ref(id) if ctx.heap.object_checked(id).is_some() => {
            // dense array fast path
            if let Value::Int32(index) = key
                && index >= 0
                && matches!(&ctx.heap.object(id).kind, ObjectKind::Array(data) if data.fast)
            {
                let atom = ctx.atoms.intern_index(index as u32);
                return run_put(ctx, id, atom, value, strict);
            }
            let atom = to_property_key(ctx, key)?;
            run_put(ctx, id, atom, value, strict)
        }
        // writes to primitive receivers silently vanish (no wrappers);
        // strict mode reports them
        _ => {
            if strict {
                Err(RunError::type_error("Cannot create property on primitive value"))
            } else {
                Ok(())
            }
        }
    }
}

/// `obj.name = value` with the write inline cache.
pub(super) fn set_named<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    code: &CodeBlock,
    target: Value,
    name: AtomId,
    site: u16,
    value: Value,
    strict: bool,
) -> RunResult<()> {
    match target {
        Value::Empty | Value::Undefined | Value::Null => Err(cannot_write(ctx, target, Value::InternStr(name))),
        Value::Ref(id) if ctx.heap.object_checked(id).is_some() => {
            // extract the cached write plan first so the cell borrow ends
            // before the heap mutates
            enum CachedWrite {
                Existing(std::rc::Rc<crate::shape::Shape>, u16),
                Transition(std::rc::Rc<crate::shape::Shape>, std::rc::Rc<crate::shape::Shape>, u16),
            }
            let cached = code.prop_ic(site).and_then(|ic| match &*ic.state.borrow() {
                PropIcState::SetMonoExisting { shape, slot } => {
                    Some(CachedWrite::Existing(std::rc::Rc::clone(shape), *slot))
                }
                PropIcState::SetMonoTransition { from, to, slot } => Some(CachedWrite::Transition(
                    std::rc::Rc::clone(from),
                    std::rc::Rc::clone(to),
                    *slot,
                )),
                _ => None,
            });
            match cached {
                Some(CachedWrite::Existing(shape, slot)) => {
                    let obj = ctx.heap.object_mut(id);
                    if std::rc::Rc::ptr_eq(&obj.shape, &shape) {
                        obj.slots[usize::from(slot)] = value;
                        return Ok(());
                    }
                }
                Some(CachedWrite::Transition(from, to, slot)) => {
                    let obj = ctx.heap.object_mut(id);
                    if std::rc::Rc::ptr_eq(&obj.shape, &from) {
                        obj.shape = to;
                        obj.slots.push(value);
                        debug_assert_eq!(usize::from(slot) + 1, obj.slots.len());
                        return Ok(());
                    }
                }
                None => {}
            }
            set_named_slow(ctx, code, id, name, site, value, strict)
        }
        _ => {
            if strict {
                Err(RunError::type_error("Cannot create property on primitive value"))
            } else {
                Ok(())
            }
        }
    }
}

fn set_named_slow<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    code: &CodeBlock,
    obj_id: HeapId,
    name: AtomId,
    site: u16,
    value: Value,
    strict: bool,
) -> RunResult<()> {
    let before_shape = std::rc::Rc::clone(&ctx.heap.object(obj_id).shape);
    let decision = object::put_search(&ctx.heap, &ctx.atoms, obj_id, name);
    run_put(ctx, obj_id, name, value, strict)?;
    if let Some(ic) = code.prop_ic(site) {
        if matches!(&*ic.state.borrow(), PropIcState::Slow) {
            return Ok(());
        }
        let fill = match decision {
            PutDecision::WriteSlot(slot) if !before_shape.is_dictionary() => Some(PropIcState::SetMonoExisting {
                shape: before_shape,
                slot: u16::try_from(slot).unwrap_or(u16::MAX),
            }),
            PutDecision::CreateOwn if !before_shape.is_dictionary() => {
                let after = std::rc::Rc::clone(&ctx.heap.object(obj_id).shape);
                if after.is_dictionary() || std::rc::Rc::ptr_eq(&after, &before_shape) {
                    None
                } else {
                    let slot = after.property_count() - 1;
                    Some(PropIcState::SetMonoTransition {
                        from: before_shape,
                        to: after,
                        slot: u16::try_from(slot).unwrap_or(u16::MAX),
                    })
                }
            }
            _ => None,
        };
        let mut state = ic.state.borrow_mut();
        let untouched = matches!(&*state, PropIcState::Uninit);
        match fill {
            Some(new_state) if untouched => *state = new_state,
            None if untouched => {}
            // second miss with a different shape: park the site
            _ => *state = PropIcState::Slow,
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Literal initialization
// ----------------------------------------------------------------------

pub(super) fn init_property<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    target: Value,
    key: Value,
    value: Value,
) -> RunResult<()> {
    let Value::Ref(id) = target else {
        return Err(RunError::internal("object literal target is not an object"));
    };
    let atom = to_property_key(ctx, key)?;
    let VmContext { heap, atoms, .. } = ctx;
    object::define_data_property(heap, atoms, id, atom, value, PropertyFlags::plain_data());
    Ok(())
}

pub(super) fn init_accessor<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    target: Value,
    key: Value,
    getter: Option<Value>,
    setter: Option<Value>,
) -> RunResult<()> {
    let Value::Ref(id) = target else {
        return Err(RunError::internal("object literal target is not an object"));
    };
    let atom = to_property_key(ctx, key)?;
    let VmContext { heap, atoms, .. } = ctx;
    object::define_accessor_property(heap, atoms, id, atom, getter, setter)
}

// ----------------------------------------------------------------------
// delete / in / instanceof
// ----------------------------------------------------------------------

pub(super) fn delete_member<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    frame: &super::Frame,
    target: Value,
    key: Value,
) -> RunResult<bool> {
    match target {
        Value::Empty | Value::Undefined | Value::Null => Err(cannot_read(ctx, target, key)),
        Value::Ref(id) if ctx.heap.object_checked(id).is_some() => {
            let atom = to_property_key(ctx, key)?;
            let VmContext { heap, atoms, .. } = ctx;
            let deleted = object::delete_property(heap, atoms, id, atom);
            if !deleted && frame.strict {
                return Err(RunError::type_error(format!(
                    "Cannot delete property '{}'",
                    ctx.atoms.text(atom)
                )));
            }
            Ok(deleted)
        }
        _ => Ok(true),
    }
}

/// The `in` operator; the key goes through the array-index fast path for
/// dense receivers before the generic name route.
pub(super) fn has_member<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    key: Value,
    container: Value,
) -> RunResult<bool> {
    let Value::Ref(id) = container else {
        return Err(RunError::type_error("Cannot use 'in' operator on a non-object"));
    };
    if ctx.heap.object_checked(id).is_none() {
        return Err(RunError::type_error("Cannot use 'in' operator on a non-object"));
    }
    if let Value::Int32(index) = key
        && index >= 0
        && let ObjectKind::Array(data) = &ctx.heap.object(id).kind
        && data.fast
    {
        if let Some(value) = data.vector.get(index as usize)
            && !value.is_empty_value()
        {
            return Ok(true);
        }
        // fall through: the prototype chain may still carry the index
    }
    let atom = to_property_key(ctx, key)?;
    Ok(object::has_property(&ctx.heap, &ctx.atoms, id, atom))
}

/// `instanceof` via the ordinary has-instance walk.
pub(super) fn instance_of<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    value: Value,
    constructor: Value,
) -> RunResult<bool> {
    let Value::Ref(ctor_id) = constructor else {
        return Err(RunError::type_error("Right-hand side of 'instanceof' is not callable"));
    };
    let Some(ctor) = ctx.heap.object_checked(ctor_id) else {
        return Err(RunError::type_error("Right-hand side of 'instanceof' is not callable"));
    };
    let Some(function) = ctor.as_function() else {
        return Err(RunError::type_error("Right-hand side of 'instanceof' is not callable"));
    };
    // bound functions delegate to their target
    if let Some(bound) = &function.bound {
        let target = bound.target;
        return instance_of(ctx, value, target);
    }
    let prototype = property_get(ctx, ctor_id, StaticAtoms::Prototype.into(), constructor)?;
    let Value::Ref(proto_id) = prototype else {
        return Err(RunError::type_error("Function has non-object prototype in instanceof check"));
    };
    let Value::Ref(mut current) = value else {
        return Ok(false);
    };
    if ctx.heap.object_checked(current).is_none() {
        return Ok(false);
    }
    loop {
        match ctx.heap.object(current).proto {
            Value::Ref(next) => {
                if next == proto_id {
                    return Ok(true);
                }
                current = next;
            }
            _ => return Ok(false),
        }
    }
}

// ----------------------------------------------------------------------
// Enumeration
// ----------------------------------------------------------------------

/// `EnumerateObject`: snapshots enumerable keys. `null`/`undefined`
/// enumerate nothing; primitive strings enumerate their indices.
pub(super) fn enumerate<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    target: Value,
) -> RunResult<Value> {
    let keys = match target {
        Value::Empty | Value::Undefined | Value::Null => Vec::new(),
        Value::Ref(id) if ctx.heap.object_checked(id).is_some() => {
            let VmContext { heap, atoms, .. } = ctx;
            object::collect_enumeration_keys(heap, atoms, id)
        }
        _ if string::is_string_value(target, &ctx.heap) => {
            let length = string::string_length(target, &ctx.heap, &ctx.atoms);
            (0..length).map(|i| Value::InternStr(ctx.atoms.intern_index(i))).collect()
        }
        _ => Vec::new(),
    };
    let id = ctx.heap.allocate(HeapData::EnumState(EnumerationState {
        target,
        keys,
        index: 0,
    }))?;
    Ok(Value::Ref(id))
}

/// `EnumerateObjectKey`: the next not-deleted key, or `None` when
/// exhausted.
pub(super) fn enumerate_next<T: ResourceTracker, Tr: VmTracer>(
    ctx: &mut VmContext<T, Tr>,
    state_value: Value,
) -> RunResult<Option<Value>> {
    let Value::Ref(state_id) = state_value else {
        return Err(RunError::internal("enumeration state missing from the stack"));
    };
    loop {
        let (key, target) = {
            let HeapData::EnumState(state) = ctx.heap.get_mut(state_id) else {
                return Err(RunError::internal("enumeration state missing from the stack"));
            };
            if state.index >= state.keys.len() {
                return Ok(None);
            }
            let key = state.keys[state.index];
            state.index += 1;
            (key, state.target)
        };
        // keys deleted after the snapshot are skipped when their turn comes
        if let Value::Ref(obj_id) = target
            && ctx.heap.object_checked(obj_id).is_some()
            && let Value::InternStr(atom) = key
            && !object::has_property(&ctx.heap, &ctx.atoms, obj_id, atom)
        {
            continue;
        }
        return Ok(Some(key));
    }
}

// ----------------------------------------------------------------------
// Error messages
// ----------------------------------------------------------------------

fn cannot_read<T: ResourceTracker, Tr: VmTracer>(ctx: &mut VmContext<T, Tr>, target: Value, key: Value) -> RunError {
    let key_text = binary::to_display_string(ctx, key).unwrap_or_default();
    let target_text = if matches!(target.materialize(), Value::Null) {
        "null"
    } else {
        "undefined"
    };
    RunError::type_error(format!("Cannot read property '{key_text}' of {target_text}"))
}

fn cannot_write<T: ResourceTracker, Tr: VmTracer>(ctx: &mut VmContext<T, Tr>, target: Value, key: Value) -> RunError {
    let key_text = binary::to_display_string(ctx, key).unwrap_or_default();
    let target_text = if matches!(target.materialize(), Value::Null) {
        "null"
    } else {
        "undefined"
    };
    RunError::type_error(format!("Cannot set property '{key_text}' of {target_text}"))
}
