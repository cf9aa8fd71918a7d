//! Objects: shape + slots storage and the data half of the property
//! protocol.
//!
//! Everything here is side-effect-free with respect to user code: own-property
//! lookup, the `[[Put]]` search decision, defines, deletes, and enumeration
//! snapshots. Invoking getters/setters and the `this` plumbing live in the
//! interpreter, which consumes the decisions made here.
//!
//! Arrays keep a dense `vector` fast path while writes stay dense; creating a
//! hole, writing past the end with a gap, or touching attributes demotes the
//! array to the generic named-property machinery for good.

use std::rc::Rc;

use ahash::AHashSet;

use crate::{
    atom::{AtomId, AtomTable, StaticAtoms},
    bytecode::CodeBlock,
    error::{ErrorKind, RunError, RunResult},
    heap::{AccessorPair, Heap, HeapData, HeapId},
    regexp::CompiledRegex,
    resource::ResourceTracker,
    shape::{PropertyFlags, Shape},
    value::Value,
};

/// Maximum dense length; appends beyond this demote to the generic path.
const ARRAY_FAST_CAP: u64 = 1024 * 1024;

/// An object: shared shape, one slot per shape property, prototype link,
/// and kind-specific payload.
#[derive(Debug)]
pub(crate) struct JsObject {
    pub shape: Rc<Shape>,
    pub slots: Vec<Value>,
    /// `Ref` to another object or `Null`.
    pub proto: Value,
    pub extensible: bool,
    pub kind: ObjectKind,
}

#[derive(Debug)]
pub(crate) enum ObjectKind {
    Plain,
    Array(ArrayData),
    Function(Box<FunctionData>),
    Error(ErrorKind),
    RegExp(Box<RegExpData>),
}

#[derive(Debug)]
pub(crate) struct ArrayData {
    /// Dense element storage while in fast mode; `Empty` marks holes that
    /// only exist transiently (hole creation demotes).
    pub vector: Vec<Value>,
    pub length: u32,
    pub fast: bool,
}

#[derive(Debug)]
pub(crate) struct FunctionData {
    pub code: Rc<CodeBlock>,
    /// Environment captured at function creation; `None` for natives.
    pub outer_env: Option<HeapId>,
    /// Present on bound functions.
    pub bound: Option<BoundData>,
    pub is_constructor: bool,
    pub native: Option<NativeFunction>,
}

/// `Function.prototype.bind`-style binding payload.
#[derive(Debug)]
pub(crate) struct BoundData {
    pub target: Value,
    pub bound_this: Value,
    pub bound_args: Vec<Value>,
}

/// Host-provided native entry points, dispatched by tag in the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NativeFunction {
    Eval,
}

#[derive(Debug)]
pub(crate) struct RegExpData {
    pub source: AtomId,
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
    pub compiled: CompiledRegex,
}

impl JsObject {
    pub fn new(shape: Rc<Shape>, proto: Value, kind: ObjectKind) -> Self {
        Self {
            shape,
            slots: Vec::new(),
            proto,
            extensible: true,
            kind,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ObjectKind::Plain => "Object",
            ObjectKind::Array(_) => "Array",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Error(_) => "Error",
            ObjectKind::RegExp(_) => "RegExp",
        }
    }

    pub fn estimate_payload_size(&self) -> usize {
        let slots = self.slots.len() * std::mem::size_of::<Value>();
        let kind = match &self.kind {
            ObjectKind::Array(data) => data.vector.len() * std::mem::size_of::<Value>(),
            _ => 0,
        };
        slots + kind
    }

    pub fn as_function(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match &self.kind {
            ObjectKind::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// True when the value is a callable object.
pub(crate) fn is_callable(heap: &Heap<impl ResourceTracker>, value: Value) -> bool {
    matches!(value, Value::Ref(id) if heap.object_checked(id).is_some_and(|o| o.as_function().is_some()))
}

/// Result of own-property lookup.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OwnProperty {
    Data {
        value: Value,
        flags: PropertyFlags,
        slot: usize,
    },
    Accessor {
        pair: AccessorPair,
        flags: PropertyFlags,
        slot: usize,
    },
    /// Dense array element (never a hole).
    ArrayElement(Value),
    ArrayLength(u32),
}

impl OwnProperty {
    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { flags, .. } | Self::Accessor { flags, .. } => flags.is_enumerable(),
            Self::ArrayElement(_) => true,
            Self::ArrayLength(_) => false,
        }
    }
}

/// [[GetOwnProperty]] over the data structures (never runs user code).
pub(crate) fn get_own_property(
    heap: &Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    obj_id: HeapId,
    key: AtomId,
) -> Option<OwnProperty> {
    let obj = heap.object(obj_id);
    if let ObjectKind::Array(data) = &obj.kind {
        if key == AtomId::from(StaticAtoms::Length) {
            return Some(OwnProperty::ArrayLength(data.length));
        }
        if data.fast
            && let Some(index) = atoms.as_array_index(key)
        {
            if index < data.length {
                let value = data.vector.get(index as usize).copied().unwrap_or(Value::Empty);
                if value.is_empty_value() {
                    return None;
                }
                return Some(OwnProperty::ArrayElement(value));
            }
            return None;
        }
    }
    let slot = obj.shape.find(key)?;
    let info = obj.shape.property(slot);
    let value = obj.slots[slot];
    if info.flags.is_accessor() {
        let Value::Ref(pair_id) = value else {
            return None;
        };
        let HeapData::Accessor(pair) = heap.get(pair_id) else {
            return None;
        };
        Some(OwnProperty::Accessor {
            pair: *pair,
            flags: info.flags,
            slot,
        })
    } else {
        Some(OwnProperty::Data {
            value,
            flags: info.flags,
            slot,
        })
    }
}

/// [[HasProperty]]: own-property search up the prototype chain.
pub(crate) fn has_property(
    heap: &Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    obj_id: HeapId,
    key: AtomId,
) -> bool {
    let mut current = obj_id;
    loop {
        if get_own_property(heap, atoms, current, key).is_some() {
            return true;
        }
        match heap.object(current).proto {
            Value::Ref(next) => current = next,
            _ => return false,
        }
    }
}

/// Defines or overwrites an own data property directly, bypassing
/// writability (literal construction, intrinsics, `catch` bindings).
pub(crate) fn define_data_property(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &mut AtomTable,
    obj_id: HeapId,
    key: AtomId,
    value: Value,
    flags: PropertyFlags,
) {
    // dense array path
    if flags == PropertyFlags::plain_data()
        && let Some(index) = atoms.as_array_index(key)
    {
        let mut needs_demote = false;
        if let ObjectKind::Array(data) = &mut heap.object_mut(obj_id).kind
            && data.fast
        {
            if fast_array_store(data, index, value) {
                return;
            }
            needs_demote = true;
        }
        if needs_demote {
            demote_array(heap, atoms, obj_id);
        }
    }

    let obj = heap.object_mut(obj_id);
    if let Some(slot) = obj.shape.find(key) {
        let existing = obj.shape.property(slot);
        if existing.flags == flags {
            obj.slots[slot] = value;
            return;
        }
        // attribute change: unique dictionary shape
        let shape = if obj.shape.is_dictionary() {
            obj.shape.with_flags(key, flags).expect("slot found above")
        } else {
            obj.shape.to_dictionary().with_flags(key, flags).expect("slot found above")
        };
        obj.shape = shape;
        obj.slots[slot] = value;
        return;
    }
    obj.shape = obj.shape.add(key, flags);
    obj.slots.push(value);
    debug_assert_eq!(obj.slots.len(), obj.shape.property_count());
}

/// Defines an accessor property (object-literal getters/setters). A second
/// definition for the same key merges into the existing pair.
pub(crate) fn define_accessor_property(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &mut AtomTable,
    obj_id: HeapId,
    key: AtomId,
    getter: Option<Value>,
    setter: Option<Value>,
) -> RunResult<()> {
    if let Some(OwnProperty::Accessor { pair, slot, .. }) = get_own_property(heap, atoms, obj_id, key) {
        let merged = AccessorPair {
            getter: getter.unwrap_or(pair.getter),
            setter: setter.unwrap_or(pair.setter),
        };
        let obj = heap.object(obj_id);
        let Value::Ref(pair_id) = obj.slots[slot] else {
            return Err(RunError::internal("accessor slot without accessor pair"));
        };
        heap.replace(pair_id, HeapData::Accessor(merged));
        return Ok(());
    }
    if matches!(&heap.object(obj_id).kind, ObjectKind::Array(data) if data.fast)
        && atoms.as_array_index(key).is_some()
    {
        demote_array(heap, atoms, obj_id);
    }
    let pair = AccessorPair {
        getter: getter.unwrap_or(Value::Undefined),
        setter: setter.unwrap_or(Value::Undefined),
    };
    let pair_id = heap.allocate(HeapData::Accessor(pair))?;
    let obj = heap.object_mut(obj_id);
    if let Some(slot) = obj.shape.find(key) {
        // data -> accessor attribute change: dictionary shape
        let shape = if obj.shape.is_dictionary() {
            Rc::clone(&obj.shape)
        } else {
            obj.shape.to_dictionary()
        };
        obj.shape = shape
            .with_flags(key, PropertyFlags::accessor(true, true))
            .expect("slot found above");
        obj.slots[slot] = Value::Ref(pair_id);
    } else {
        obj.shape = obj.shape.add(key, PropertyFlags::accessor(true, true));
        obj.slots.push(Value::Ref(pair_id));
    }
    Ok(())
}

/// Writes into a fast array if the write keeps it dense (in-bounds store or
/// gapless append); `false` means the caller must demote first. Fast mode
/// maintains `length == vector.len()`.
fn fast_array_store(data: &mut ArrayData, index: u32, value: Value) -> bool {
    debug_assert_eq!(data.length as usize, data.vector.len());
    let len = data.length;
    if index < len {
        data.vector[index as usize] = value;
        return true;
    }
    if index == len && u64::from(len) + 1 <= ARRAY_FAST_CAP {
        data.vector.push(value);
        data.length = len + 1;
        return true;
    }
    // any gap write would create holes
    false
}

/// Moves a fast array's dense elements into named index properties; the
/// array answers through the generic machinery from then on.
pub(crate) fn demote_array(heap: &mut Heap<impl ResourceTracker>, atoms: &mut AtomTable, obj_id: HeapId) {
    let elements: Vec<(u32, Value)> = {
        let obj = heap.object_mut(obj_id);
        let ObjectKind::Array(data) = &mut obj.kind else { return };
        if !data.fast {
            return;
        }
        data.fast = false;
        let vector = std::mem::take(&mut data.vector);
        vector
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_empty_value())
            .map(|(i, v)| (u32::try_from(i).expect("array index fits u32"), v))
            .collect()
    };
    for (index, value) in elements {
        let key = atoms.intern_index(index);
        let obj = heap.object_mut(obj_id);
        obj.shape = obj.shape.add(key, PropertyFlags::plain_data());
        obj.slots.push(value);
    }
}

/// Decision for a `[[Put]]`; the interpreter executes it.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PutDecision {
    /// Overwrite an own data slot.
    WriteSlot(usize),
    /// Store into the dense array vector (append or in-bounds write).
    WriteArrayElement(u32),
    /// Re-set the array length (truncating or extending).
    WriteArrayLength,
    /// Invoke a setter (own or inherited).
    CallSetter(Value),
    /// Create a new own property.
    CreateOwn,
    /// Demote the array, then redo the search.
    DemoteAndRetry,
    /// Rejected: non-writable data property or getter-only accessor.
    Reject,
}

/// [[Put]] search (ES5 8.12.5), up to but not including side effects.
pub(crate) fn put_search(
    heap: &Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    obj_id: HeapId,
    key: AtomId,
) -> PutDecision {
    // own property first
    let obj = heap.object(obj_id);
    if let ObjectKind::Array(data) = &obj.kind {
        if key == AtomId::from(StaticAtoms::Length) {
            return PutDecision::WriteArrayLength;
        }
        if data.fast {
            if let Some(index) = atoms.as_array_index(key) {
                if index < data.length || index == data.length {
                    return PutDecision::WriteArrayElement(index);
                }
                return PutDecision::DemoteAndRetry;
            }
        }
    }
    match get_own_property(heap, atoms, obj_id, key) {
        Some(OwnProperty::Data { flags, slot, .. }) => {
            if flags.is_writable() {
                PutDecision::WriteSlot(slot)
            } else {
                PutDecision::Reject
            }
        }
        Some(OwnProperty::Accessor { pair, .. }) => {
            if pair.setter == Value::Undefined {
                PutDecision::Reject
            } else {
                PutDecision::CallSetter(pair.setter)
            }
        }
        Some(OwnProperty::ArrayElement(_) | OwnProperty::ArrayLength(_)) => {
            // handled by the array arm above; slow-mode arrays fall through
            PutDecision::CreateOwn
        }
        None => {
            // inherited setters and inherited read-only data block creation
            let mut current = obj.proto;
            while let Value::Ref(proto_id) = current {
                match get_own_property(heap, atoms, proto_id, key) {
                    Some(OwnProperty::Accessor { pair, .. }) => {
                        return if pair.setter == Value::Undefined {
                            PutDecision::Reject
                        } else {
                            PutDecision::CallSetter(pair.setter)
                        };
                    }
                    Some(OwnProperty::Data { flags, .. }) => {
                        return if flags.is_writable() {
                            PutDecision::CreateOwn
                        } else {
                            PutDecision::Reject
                        };
                    }
                    Some(_) => return PutDecision::CreateOwn,
                    None => current = heap.object(proto_id).proto,
                }
            }
            if heap.object(obj_id).extensible {
                PutDecision::CreateOwn
            } else {
                PutDecision::Reject
            }
        }
    }
}

/// [[Delete]]: true on success or absence, false when blocked by a
/// non-configurable property.
pub(crate) fn delete_property(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &mut AtomTable,
    obj_id: HeapId,
    key: AtomId,
) -> bool {
    if matches!(&heap.object(obj_id).kind, ObjectKind::Array(data) if data.fast)
        && atoms.as_array_index(key).is_some()
    {
        // deleting an element creates a hole: leave fast mode first
        demote_array(heap, atoms, obj_id);
    }
    if matches!(&heap.object(obj_id).kind, ObjectKind::Array(_)) && key == AtomId::from(StaticAtoms::Length) {
        return false;
    }
    let obj = heap.object(obj_id);
    let Some(slot) = obj.shape.find(key) else {
        return true;
    };
    if !obj.shape.property(slot).flags.is_configurable() {
        return false;
    }
    let obj = heap.object_mut(obj_id);
    let (shape, index) = obj
        .shape
        .without_property(key)
        .expect("slot located before delete");
    obj.shape = shape;
    obj.slots.remove(index);
    true
}

/// Array `length` assignment: truncates dense storage or named index
/// properties above the new length.
pub(crate) fn set_array_length(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &mut AtomTable,
    obj_id: HeapId,
    new_length: f64,
) -> RunResult<()> {
    let as_u32 = crate::value::to_uint32(new_length);
    if f64::from(as_u32) != new_length {
        return Err(RunError::range("Invalid array length"));
    }
    {
        let obj = heap.object_mut(obj_id);
        let ObjectKind::Array(data) = &mut obj.kind else {
            return Err(RunError::internal("array length write on non-array"));
        };
        if data.fast {
            if as_u32 <= data.length {
                data.vector.truncate(as_u32 as usize);
                data.length = as_u32;
                return Ok(());
            }
            // extension creates holes
        }
    }
    demote_array(heap, atoms, obj_id);
    let keys_to_drop: Vec<AtomId> = {
        let obj = heap.object_mut(obj_id);
        let ObjectKind::Array(data) = &mut obj.kind else {
            return Err(RunError::internal("array length write on non-array"));
        };
        data.length = as_u32;
        obj.shape
            .properties()
            .iter()
            .map(|p| p.key)
            .filter(|&k| atoms.as_array_index(k).is_some_and(|i| i >= as_u32))
            .collect()
    };
    for key in keys_to_drop {
        let _ = delete_property(heap, atoms, obj_id, key);
    }
    Ok(())
}

/// Snapshot of enumerable string keys for `for (k in o)`: own properties
/// before inherited ones, insertion order per level, shadowed names skipped.
pub(crate) fn collect_enumeration_keys(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &mut AtomTable,
    obj_id: HeapId,
) -> Vec<Value> {
    let mut keys = Vec::new();
    let mut seen: AHashSet<AtomId> = AHashSet::new();
    let mut current = Some(obj_id);
    while let Some(id) = current {
        // dense array elements first, as index order
        let indices: Vec<u32> = match heap.object(id).as_array() {
            Some(data) if data.fast => data
                .vector
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_empty_value())
                .map(|(i, _)| u32::try_from(i).expect("index fits u32"))
                .collect(),
            _ => Vec::new(),
        };
        for index in indices {
            let key = atoms.intern_index(index);
            if seen.insert(key) {
                keys.push(Value::InternStr(key));
            }
        }
        let obj = heap.object(id);
        let props: Vec<(AtomId, bool)> = obj
            .shape
            .properties()
            .iter()
            .map(|p| (p.key, p.flags.is_enumerable()))
            .collect();
        for (key, enumerable) in props {
            if seen.insert(key) && enumerable {
                keys.push(Value::InternStr(key));
            }
        }
        current = match heap.object(id).proto {
            Value::Ref(next) => Some(next),
            _ => None,
        };
    }
    keys
}

/// `typeof` tag for any value.
pub(crate) fn type_of(heap: &Heap<impl ResourceTracker>, value: Value) -> &'static str {
    if let Some(tag) = value.type_of_primitive() {
        return tag;
    }
    let Value::Ref(id) = value else { return "undefined" };
    match heap.get(id) {
        HeapData::Str(_) => "string",
        HeapData::Object(obj) => {
            if obj.as_function().is_some() {
                "function"
            } else {
                "object"
            }
        }
        _ => "object",
    }
}
