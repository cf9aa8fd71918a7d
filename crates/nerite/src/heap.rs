//! Arena heap for all reference-type runtime entities.
//!
//! Every heap entity is a [`HeapData`] variant stored in a slot vector and
//! addressed by [`HeapId`]. The engine assumes an external collector owns
//! reclamation (slots are never freed mid-run); the arena's job is identity,
//! typed access, and allocation accounting through the [`ResourceTracker`].

use std::collections::BTreeMap;

use crate::{
    environment::LexicalEnv,
    error::RunResult,
    object::JsObject,
    resource::ResourceTracker,
    string::JsString,
    value::Value,
};

/// Index of a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Why an abrupt completion is crossing `finally` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowReason {
    Return,
    Throw,
    Break,
    Continue,
    Jump,
}

/// Reified abrupt completion.
///
/// Created when a `break`/`continue`/`return`/`throw` crosses one or more
/// `finally` blocks; consumed by the finally-end opcode. `depth` counts the
/// try scopes still to unwind, `target` is the bytecode offset for the jump
/// reasons.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlFlowRecord {
    pub reason: FlowReason,
    pub value: Value,
    pub depth: u32,
    pub target: u32,
    /// Operand-stack depth the jump reasons land with.
    pub target_sp: u16,
}

/// Snapshot of an object's enumerable keys taken when a `for (k in o)` loop
/// starts. Keys deleted after the snapshot are skipped when their turn comes.
#[derive(Debug)]
pub(crate) struct EnumerationState {
    /// The object being enumerated.
    pub target: Value,
    /// Key strings, own properties before prototype properties, each chain
    /// level in insertion order.
    pub keys: Vec<Value>,
    pub index: usize,
}

/// Getter/setter pair stored in an accessor property's slot. Absent halves
/// are `Undefined`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AccessorPair {
    pub getter: Value,
    pub setter: Value,
}

/// The tagged union of heap entities.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(JsString),
    Object(JsObject),
    Accessor(AccessorPair),
    EnumState(EnumerationState),
    ControlFlow(ControlFlowRecord),
    Env(LexicalEnv),
}

impl HeapData {
    /// Rough byte estimate for allocation accounting.
    fn estimate_size(&self) -> usize {
        let inline = std::mem::size_of::<Self>();
        let payload = match self {
            Self::Str(JsString::Raw(raw)) => raw.units().len() * 2,
            Self::Str(JsString::Rope(_)) | Self::Accessor(_) | Self::ControlFlow(_) => 0,
            Self::Object(obj) => obj.estimate_payload_size(),
            Self::EnumState(state) => state.keys.len() * std::mem::size_of::<Value>(),
            Self::Env(env) => env.estimate_payload_size(),
        };
        inline + payload
    }

    /// Variant name for heap statistics.
    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::Object(obj) => obj.kind_name(),
            Self::Accessor(_) => "Accessor",
            Self::EnumState(_) => "EnumState",
            Self::ControlFlow(_) => "ControlFlow",
            Self::Env(_) => "Env",
        }
    }
}

/// Snapshot of heap occupancy, for host monitoring and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    /// Breakdown by entity kind name, deterministic order.
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// The slot arena.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    slots: Vec<HeapData>,
    tracker: T,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            slots: Vec::with_capacity(64),
            tracker,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn allocate(&mut self, data: HeapData) -> RunResult<HeapId> {
        self.tracker.on_allocate(data.estimate_size())?;
        let id = HeapId(u32::try_from(self.slots.len()).expect("heap exceeds u32 slots"));
        self.slots.push(data);
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()]
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()]
    }

    /// Replaces a slot's contents in place, preserving identity. Used by
    /// rope flattening and dictionary-mode shape swaps.
    pub fn replace(&mut self, id: HeapId, data: HeapData) {
        self.slots[id.index()] = data;
    }

    /// The object in a slot, or `None` when the slot holds another entity.
    #[must_use]
    pub fn object_checked(&self, id: HeapId) -> Option<&JsObject> {
        match self.get(id) {
            HeapData::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// # Panics
    /// Panics when the slot is not an object; ids are typed by construction
    /// so a mismatch is an interpreter invariant violation.
    #[must_use]
    pub fn object(&self, id: HeapId) -> &JsObject {
        match self.get(id) {
            HeapData::Object(obj) => obj,
            other => panic!("expected object heap slot, found {}", other.type_name()),
        }
    }

    pub fn object_mut(&mut self, id: HeapId) -> &mut JsObject {
        match self.get_mut(id) {
            HeapData::Object(obj) => obj,
            other => panic!("expected object heap slot, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn env(&self, id: HeapId) -> &LexicalEnv {
        match self.get(id) {
            HeapData::Env(env) => env,
            other => panic!("expected environment heap slot, found {}", other.type_name()),
        }
    }

    pub fn env_mut(&mut self, id: HeapId) -> &mut LexicalEnv {
        match self.get_mut(id) {
            HeapData::Env(env) => env,
            other => panic!("expected environment heap slot, found {}", other.type_name()),
        }
    }

    /// True when the slot holds an object (not a string or internal entity).
    #[must_use]
    pub fn is_object(&self, value: Value) -> bool {
        matches!(value, Value::Ref(id) if matches!(self.get(id), HeapData::Object(_)))
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        for slot in &self.slots {
            *objects_by_type.entry(slot.type_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: self.slots.len(),
            objects_by_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;
    use crate::string::RawString;

    #[test]
    fn allocate_and_read_back() {
        let mut heap = Heap::new(NoLimitTracker);
        let id = heap
            .allocate(HeapData::Str(JsString::Raw(RawString::new(vec![0x61]))))
            .expect("allocate");
        match heap.get(id) {
            HeapData::Str(JsString::Raw(raw)) => assert_eq!(raw.units(), &[0x61]),
            other => panic!("unexpected slot {other:?}"),
        }
    }

    #[test]
    fn stats_group_by_type() {
        let mut heap = Heap::new(NoLimitTracker);
        heap.allocate(HeapData::Str(JsString::Raw(RawString::new(vec![])))).expect("allocate");
        heap.allocate(HeapData::Accessor(AccessorPair {
            getter: Value::Undefined,
            setter: Value::Undefined,
        }))
        .expect("allocate");
        let stats = heap.stats();
        assert_eq!(stats.live_objects, 2);
        assert_eq!(stats.objects_by_type.get("Str"), Some(&1));
        assert_eq!(stats.objects_by_type.get("Accessor"), Some(&1));
    }
}
