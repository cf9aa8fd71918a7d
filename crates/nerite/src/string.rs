//! Immutable engine strings: raw UTF-16 buffers and concatenation ropes.
//!
//! Concatenation builds a rope node in O(1) once operands pass a small size
//! threshold. Any operation needing contiguous storage (comparison against a
//! property key, relational ordering, numeric conversion, regex input) forces
//! the rope flat exactly once: the heap slot is replaced by the raw form, so
//! later reads pay nothing.
//!
//! Short string values live as interned atoms (`Value::InternStr`) and never
//! reach this module's heap forms; rope leaves may reference them directly.

use crate::{
    atom::AtomTable,
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    value::Value,
};

/// Concatenations below this many total units copy eagerly instead of
/// building a rope node.
const ROPE_THRESHOLD: u32 = 24;

/// Heap representation of a string.
#[derive(Debug)]
pub(crate) enum JsString {
    Raw(RawString),
    Rope(RopeString),
}

impl JsString {
    #[must_use]
    pub fn len(&self) -> u32 {
        match self {
            Self::Raw(raw) => raw.len(),
            Self::Rope(rope) => rope.len,
        }
    }
}

/// Owned UTF-16 code units with a cached all-ASCII flag.
#[derive(Debug)]
pub(crate) struct RawString {
    units: Vec<u16>,
    ascii: bool,
}

impl RawString {
    #[must_use]
    pub fn new(units: Vec<u16>) -> Self {
        let ascii = units.iter().all(|&u| u < 0x80);
        Self { units, ascii }
    }

    #[must_use]
    pub fn units(&self) -> &[u16] {
        &self.units
    }

    #[must_use]
    pub fn is_ascii(&self) -> bool {
        self.ascii
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        u32::try_from(self.units.len()).expect("string length exceeds u32")
    }
}

/// Concatenation node; children are string values (interned or heap).
#[derive(Debug)]
pub(crate) struct RopeString {
    pub left: Value,
    pub right: Value,
    pub len: u32,
}

/// Length of any string value without flattening.
pub(crate) fn string_length(value: Value, heap: &Heap<impl ResourceTracker>, atoms: &AtomTable) -> u32 {
    match value {
        Value::InternStr(id) => u32::try_from(atoms.units(id).len()).expect("atom length exceeds u32"),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => s.len(),
            _ => 0,
        },
        _ => 0,
    }
}

/// True when the value is a string (interned or heap).
pub(crate) fn is_string_value(value: Value, heap: &Heap<impl ResourceTracker>) -> bool {
    match value {
        Value::InternStr(_) => true,
        Value::Ref(id) => matches!(heap.get(id), HeapData::Str(_)),
        _ => false,
    }
}

/// Concatenates two string values, producing a rope above the size
/// threshold.
pub(crate) fn concat_strings(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    left: Value,
    right: Value,
) -> Result<Value, crate::error::RunError> {
    let left_len = string_length(left, heap, atoms);
    let right_len = string_length(right, heap, atoms);
    if left_len == 0 {
        return Ok(right);
    }
    if right_len == 0 {
        return Ok(left);
    }
    let total = left_len
        .checked_add(right_len)
        .ok_or_else(|| crate::error::RunError::range("Invalid string length"))?;

    if total <= ROPE_THRESHOLD {
        let mut units = Vec::with_capacity(total as usize);
        collect_units(heap, atoms, left, &mut units);
        collect_units(heap, atoms, right, &mut units);
        let id = heap.allocate(HeapData::Str(JsString::Raw(RawString::new(units))))?;
        return Ok(Value::Ref(id));
    }
    let id = heap.allocate(HeapData::Str(JsString::Rope(RopeString {
        left,
        right,
        len: total,
    })))?;
    Ok(Value::Ref(id))
}

/// Appends a string value's units without mutating the heap. Ropes are
/// walked iteratively.
fn collect_units(heap: &Heap<impl ResourceTracker>, atoms: &AtomTable, value: Value, out: &mut Vec<u16>) {
    let mut stack = vec![value];
    while let Some(v) = stack.pop() {
        match v {
            Value::InternStr(id) => out.extend_from_slice(atoms.units(id)),
            Value::Ref(id) => match heap.get(id) {
                HeapData::Str(JsString::Raw(raw)) => out.extend_from_slice(raw.units()),
                HeapData::Str(JsString::Rope(rope)) => {
                    stack.push(rope.right);
                    stack.push(rope.left);
                }
                _ => debug_assert!(false, "collect_units on non-string heap value"),
            },
            _ => debug_assert!(false, "collect_units on non-string value"),
        }
    }
}

/// Forces a heap string flat, replacing the rope in place. No-op for raw
/// strings and non-string values.
pub(crate) fn ensure_flat(heap: &mut Heap<impl ResourceTracker>, atoms: &AtomTable, value: Value) {
    let Value::Ref(id) = value else { return };
    let len = match heap.get(id) {
        HeapData::Str(JsString::Rope(rope)) => rope.len,
        _ => return,
    };
    let mut units = Vec::with_capacity(len as usize);
    collect_units(heap, atoms, value, &mut units);
    heap.replace(id, HeapData::Str(JsString::Raw(RawString::new(units))));
}

/// Units of a string value. The caller must have called [`ensure_flat`]
/// first for heap strings.
///
/// # Panics
/// Panics when handed a non-string or an unflattened rope, which is an
/// interpreter invariant violation.
pub(crate) fn flat_units<'h>(heap: &'h Heap<impl ResourceTracker>, atoms: &'h AtomTable, value: Value) -> &'h [u16] {
    match value {
        Value::InternStr(id) => atoms.units(id),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(JsString::Raw(raw)) => raw.units(),
            _ => panic!("flat_units on unflattened or non-string heap value"),
        },
        _ => panic!("flat_units on non-string value"),
    }
}

/// Content equality of two string values, flattening as needed.
pub(crate) fn string_eq(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    a: Value,
    b: Value,
) -> bool {
    if string_length(a, heap, atoms) != string_length(b, heap, atoms) {
        return false;
    }
    ensure_flat(heap, atoms, a);
    ensure_flat(heap, atoms, b);
    flat_units(heap, atoms, a) == flat_units(heap, atoms, b)
}

/// UTF-16 ordering of two string values, as the relational operators
/// require.
pub(crate) fn string_cmp(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    a: Value,
    b: Value,
) -> std::cmp::Ordering {
    ensure_flat(heap, atoms, a);
    ensure_flat(heap, atoms, b);
    let left = flat_units(heap, atoms, a);
    let right = flat_units(heap, atoms, b);
    left.cmp(right)
}

/// Lossy UTF-8 rendering of a string value, for host output and messages.
pub(crate) fn string_to_rust(heap: &mut Heap<impl ResourceTracker>, atoms: &AtomTable, value: Value) -> String {
    ensure_flat(heap, atoms, value);
    String::from_utf16_lossy(flat_units(heap, atoms, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    fn setup() -> (Heap<NoLimitTracker>, AtomTable) {
        (Heap::new(NoLimitTracker), AtomTable::new())
    }

    fn alloc_raw(heap: &mut Heap<NoLimitTracker>, text: &str) -> Value {
        let units: Vec<u16> = text.encode_utf16().collect();
        Value::Ref(
            heap.allocate(HeapData::Str(JsString::Raw(RawString::new(units))))
                .expect("allocate"),
        )
    }

    #[test]
    fn short_concat_copies_eagerly() {
        let (mut heap, atoms) = setup();
        let a = alloc_raw(&mut heap, "foo");
        let b = alloc_raw(&mut heap, "bar");
        let joined = concat_strings(&mut heap, &atoms, a, b).expect("concat");
        assert_eq!(string_to_rust(&mut heap, &atoms, joined), "foobar");
        let Value::Ref(id) = joined else { panic!("expected heap string") };
        assert!(matches!(heap.get(id), HeapData::Str(JsString::Raw(_))));
    }

    #[test]
    fn long_concat_builds_rope_and_flattens_once() {
        let (mut heap, atoms) = setup();
        let a = alloc_raw(&mut heap, "0123456789abcdef");
        let b = alloc_raw(&mut heap, "0123456789abcdef");
        let joined = concat_strings(&mut heap, &atoms, a, b).expect("concat");
        let Value::Ref(id) = joined else { panic!("expected heap string") };
        assert!(matches!(heap.get(id), HeapData::Str(JsString::Rope(_))));
        assert_eq!(string_length(joined, &heap, &atoms), 32);

        ensure_flat(&mut heap, &atoms, joined);
        assert!(matches!(heap.get(id), HeapData::Str(JsString::Raw(_))));
        assert_eq!(
            string_to_rust(&mut heap, &atoms, joined),
            "0123456789abcdef0123456789abcdef"
        );
    }

    #[test]
    fn concat_with_empty_returns_other_side() {
        let (mut heap, mut atoms) = setup();
        let empty = Value::InternStr(atoms.intern_str(""));
        let b = alloc_raw(&mut heap, "tail");
        let joined = concat_strings(&mut heap, &atoms, empty, b).expect("concat");
        assert_eq!(joined, b);
    }

    #[test]
    fn string_eq_mixes_atom_and_heap() {
        let (mut heap, mut atoms) = setup();
        let atom = Value::InternStr(atoms.intern_str("same"));
        let heap_str = alloc_raw(&mut heap, "same");
        assert!(string_eq(&mut heap, &atoms, atom, heap_str));
        let other = alloc_raw(&mut heap, "diff");
        assert!(!string_eq(&mut heap, &atoms, atom, other));
    }

    #[test]
    fn ascii_flag() {
        assert!(RawString::new("plain".encode_utf16().collect()).is_ascii());
        assert!(!RawString::new("caf\u{e9}".encode_utf16().collect()).is_ascii());
    }
}
