//! Lexical environments and binding resolution.
//!
//! Environment records live on the heap (closures keep them alive) and form
//! a chain through `outer`. Four record families exist:
//!
//! * declarative records back function locals and `catch` scopes; their
//!   slots are either purely index-addressed (when every access site is
//!   known at compile time) or activation-backed with a name table (when
//!   closures, `eval`, or `with` can look bindings up by name),
//! * object records forward bindings to an object (`with`),
//! * function records add the `this` binding,
//! * the global record pairs a declarative half (`var` hoists) with the
//!   global object, declarative half consulted first.
//!
//! Resolution returns a [`BindingRef`] describing *where* a binding lives;
//! reading and writing through it is interpreter work because object-backed
//! bindings can invoke accessors.

use crate::{
    atom::{AtomId, AtomTable},
    heap::{Heap, HeapId},
    object,
    resource::ResourceTracker,
    value::Value,
};

/// Name table plus slots; lookup by name, storage by index.
#[derive(Debug, Default)]
pub(crate) struct ActivationData {
    names: Vec<AtomId>,
    slots: Vec<Value>,
}

impl ActivationData {
    pub fn new(names: Vec<AtomId>) -> Self {
        let slots = vec![Value::Undefined; names.len()];
        Self { names, slots }
    }

    pub fn find(&self, name: AtomId) -> Option<usize> {
        self.names.iter().position(|&n| n == name)
    }

    /// Adds a binding, returning its slot. Re-declaring an existing name
    /// returns the existing slot (`var` semantics).
    pub fn create_binding(&mut self, name: AtomId) -> usize {
        if let Some(index) = self.find(name) {
            return index;
        }
        self.names.push(name);
        self.slots.push(Value::Undefined);
        self.slots.len() - 1
    }

    pub fn get(&self, index: usize) -> Value {
        self.slots[index]
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.slots[index] = value;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Slot storage for a declarative record.
#[derive(Debug)]
pub(crate) enum DeclarativeBindings {
    /// Index-only access; name lookups fall through this record.
    Indexed(Vec<Value>),
    /// Name-addressable slots for records captured by closures or visible
    /// to `eval`.
    Activation(ActivationData),
}

impl DeclarativeBindings {
    pub fn get(&self, index: usize) -> Value {
        match self {
            Self::Indexed(slots) => slots[index],
            Self::Activation(data) => data.get(index),
        }
    }

    pub fn set(&mut self, index: usize, value: Value) {
        match self {
            Self::Indexed(slots) => slots[index] = value,
            Self::Activation(data) => data.set(index, value),
        }
    }

    pub fn find(&self, name: AtomId) -> Option<usize> {
        match self {
            Self::Indexed(_) => None,
            Self::Activation(data) => data.find(name),
        }
    }

    pub fn slot_count(&self) -> usize {
        match self {
            Self::Indexed(slots) => slots.len(),
            Self::Activation(data) => data.len(),
        }
    }
}

/// Lifecycle of the `this` binding in a function record: read only after an
/// explicit bind, bound at most once per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThisStatus {
    Uninitialized,
    Initialized,
}

/// One environment record.
#[derive(Debug)]
pub(crate) enum EnvRecord {
    /// Catch scopes and other plain declarative scopes.
    Declarative(DeclarativeBindings),
    /// `with` scopes: bindings forwarded to the object.
    Object { bindings: HeapId },
    /// Function scopes: declarative bindings plus the `this` value.
    Function {
        bindings: DeclarativeBindings,
        this_value: Value,
        this_status: ThisStatus,
    },
    /// The global scope: declarative half first, then the global object.
    Global {
        declarative: ActivationData,
        object: HeapId,
    },
}

/// An environment record plus its outer link.
#[derive(Debug)]
pub(crate) struct LexicalEnv {
    pub record: EnvRecord,
    pub outer: Option<HeapId>,
}

impl LexicalEnv {
    pub fn function(bindings: DeclarativeBindings, this_value: Value, outer: Option<HeapId>) -> Self {
        Self {
            record: EnvRecord::Function {
                bindings,
                this_value,
                this_status: ThisStatus::Uninitialized,
            },
            outer,
        }
    }

    /// Single-binding declarative scope for a `catch` parameter.
    pub fn catch_scope(param: AtomId, caught: Value, outer: HeapId) -> Self {
        let mut data = ActivationData::new(vec![param]);
        data.set(0, caught);
        Self {
            record: EnvRecord::Declarative(DeclarativeBindings::Activation(data)),
            outer: Some(outer),
        }
    }

    pub fn with_scope(bindings: HeapId, outer: HeapId) -> Self {
        Self {
            record: EnvRecord::Object { bindings },
            outer: Some(outer),
        }
    }

    pub fn global(object: HeapId) -> Self {
        Self {
            record: EnvRecord::Global {
                declarative: ActivationData::default(),
                object,
            },
            outer: None,
        }
    }

    pub fn estimate_payload_size(&self) -> usize {
        let slots = match &self.record {
            EnvRecord::Declarative(b) | EnvRecord::Function { bindings: b, .. } => b.slot_count(),
            EnvRecord::Global { declarative, .. } => declarative.len(),
            EnvRecord::Object { .. } => 0,
        };
        slots * std::mem::size_of::<Value>()
    }
}

/// Where a resolved binding lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingSlot {
    /// Slot in the environment's declarative bindings.
    Decl(u16),
    /// Property of an object record's binding object.
    Object,
    /// Slot in the global record's declarative half.
    GlobalDecl(u16),
    /// Property of the global object.
    GlobalObject,
}

/// A resolved binding: the owning environment and the slot within it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BindingRef {
    pub env: HeapId,
    pub slot: BindingSlot,
}

/// Walks the lexical chain resolving `name`. Indexed declarative records
/// answer only to pre-resolved indices, so by construction they fall
/// through here.
pub(crate) fn resolve_binding(
    heap: &Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    env_id: HeapId,
    name: AtomId,
) -> Option<BindingRef> {
    let mut current = Some(env_id);
    while let Some(id) = current {
        let env = heap.env(id);
        match &env.record {
            EnvRecord::Declarative(bindings) | EnvRecord::Function { bindings, .. } => {
                if let Some(index) = bindings.find(name) {
                    return Some(BindingRef {
                        env: id,
                        slot: BindingSlot::Decl(u16::try_from(index).expect("binding slot fits u16")),
                    });
                }
            }
            EnvRecord::Object { bindings } => {
                if object::has_property(heap, atoms, *bindings, name) {
                    return Some(BindingRef {
                        env: id,
                        slot: BindingSlot::Object,
                    });
                }
            }
            EnvRecord::Global { declarative, object } => {
                if let Some(index) = declarative.find(name) {
                    return Some(BindingRef {
                        env: id,
                        slot: BindingSlot::GlobalDecl(u16::try_from(index).expect("binding slot fits u16")),
                    });
                }
                if object::has_property(heap, atoms, *object, name) {
                    return Some(BindingRef {
                        env: id,
                        slot: BindingSlot::GlobalObject,
                    });
                }
            }
        }
        current = env.outer;
    }
    None
}

/// Reads a declarative binding through a [`BindingRef`]. Object-backed
/// slots go through the interpreter's property path instead.
pub(crate) fn read_declarative(heap: &Heap<impl ResourceTracker>, binding: BindingRef) -> Option<Value> {
    let env = heap.env(binding.env);
    match (&env.record, binding.slot) {
        (EnvRecord::Declarative(b) | EnvRecord::Function { bindings: b, .. }, BindingSlot::Decl(index)) => {
            Some(b.get(index as usize))
        }
        (EnvRecord::Global { declarative, .. }, BindingSlot::GlobalDecl(index)) => {
            Some(declarative.get(index as usize))
        }
        _ => None,
    }
}

/// Writes a declarative binding through a [`BindingRef`].
pub(crate) fn write_declarative(
    heap: &mut Heap<impl ResourceTracker>,
    binding: BindingRef,
    value: Value,
) -> bool {
    let env = heap.env_mut(binding.env);
    match (&mut env.record, binding.slot) {
        (EnvRecord::Declarative(b) | EnvRecord::Function { bindings: b, .. }, BindingSlot::Decl(index)) => {
            b.set(index as usize, value);
            true
        }
        (EnvRecord::Global { declarative, .. }, BindingSlot::GlobalDecl(index)) => {
            declarative.set(index as usize, value);
            true
        }
        _ => false,
    }
}

/// The binding object of an object-backed [`BindingRef`] (`with` scopes and
/// the global object half).
pub(crate) fn binding_object(heap: &Heap<impl ResourceTracker>, binding: BindingRef) -> Option<HeapId> {
    let env = heap.env(binding.env);
    match (&env.record, binding.slot) {
        (EnvRecord::Object { bindings }, BindingSlot::Object) => Some(*bindings),
        (EnvRecord::Global { object, .. }, BindingSlot::GlobalObject) => Some(*object),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{heap::HeapData, resource::NoLimitTracker};

    fn alloc_env(heap: &mut Heap<NoLimitTracker>, env: LexicalEnv) -> HeapId {
        heap.allocate(HeapData::Env(env)).expect("allocate env")
    }

    #[test]
    fn catch_scope_shadows_outer_function_binding() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut atoms = AtomTable::new();
        let e = atoms.intern_str("e");

        let mut fn_data = ActivationData::new(vec![e]);
        fn_data.set(0, Value::Int32(1));
        let fn_env = alloc_env(
            &mut heap,
            LexicalEnv::function(
                DeclarativeBindings::Activation(fn_data),
                Value::Undefined,
                None,
            ),
        );
        let catch_env = alloc_env(&mut heap, LexicalEnv::catch_scope(e, Value::Int32(2), fn_env));

        let binding = resolve_binding(&heap, &atoms, catch_env, e).expect("resolves");
        assert_eq!(binding.env, catch_env);
        assert_eq!(read_declarative(&heap, binding), Some(Value::Int32(2)));

        let outer = resolve_binding(&heap, &atoms, fn_env, e).expect("resolves");
        assert_eq!(read_declarative(&heap, outer), Some(Value::Int32(1)));
    }

    #[test]
    fn indexed_records_fall_through_name_lookup() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut atoms = AtomTable::new();
        let x = atoms.intern_str("x");

        let mut global_decl = ActivationData::default();
        let slot = global_decl.create_binding(x);
        global_decl.set(slot, Value::Int32(7));
        // a fake global object id is fine: the declarative half answers first
        let obj_shape = crate::shape::Shape::root();
        let global_obj = heap
            .allocate(HeapData::Object(crate::object::JsObject::new(
                obj_shape,
                Value::Null,
                crate::object::ObjectKind::Plain,
            )))
            .expect("allocate global");
        let global_env = alloc_env(
            &mut heap,
            LexicalEnv {
                record: EnvRecord::Global {
                    declarative: global_decl,
                    object: global_obj,
                },
                outer: None,
            },
        );
        let fn_env = alloc_env(
            &mut heap,
            LexicalEnv::function(
                DeclarativeBindings::Indexed(vec![Value::Int32(99)]),
                Value::Undefined,
                Some(global_env),
            ),
        );

        let binding = resolve_binding(&heap, &atoms, fn_env, x).expect("resolves in global");
        assert_eq!(binding.env, global_env);
        assert_eq!(binding.slot, BindingSlot::GlobalDecl(0));
        assert_eq!(read_declarative(&heap, binding), Some(Value::Int32(7)));
    }
}
