//! Interning of identifier and property-key strings.
//!
//! Every name the engine compares repeatedly -- identifiers, property keys,
//! string literals -- is interned once into an [`AtomTable`] and referred to
//! by a compact [`AtomId`]. Name comparison is then an integer compare, and
//! shape property tables, environment records, and bytecode operands all
//! store `AtomId`s.
//!
//! Atoms are stored as UTF-16 code units (property keys may contain lone
//! surrogates) with a cached UTF-8 rendering when one exists. The well-known
//! names in [`StaticAtoms`] are interned at table construction in declaration
//! order, so `AtomId::from(StaticAtoms::X)` is a constant-time conversion.

use ahash::AHashMap;
use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

/// Index into the atom table.
///
/// `u32` keeps the id small enough to embed in bytecode operands (the
/// compiler additionally checks the `u16` range when emitting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AtomId(u32);

impl AtomId {
    /// Reconstructs an id from a bytecode operand.
    #[inline]
    #[must_use]
    pub fn from_index(index: u16) -> Self {
        Self(u32::from(index))
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Operand encoding for the bytecode builder.
    ///
    /// # Panics
    /// Panics if more than 65535 atoms are live, which indicates a
    /// pathological program; the compiler surfaces this before emission.
    #[inline]
    #[must_use]
    pub fn operand(self) -> u16 {
        u16::try_from(self.0).expect("atom id exceeds u16 bytecode operand range")
    }
}

impl From<StaticAtoms> for AtomId {
    fn from(s: StaticAtoms) -> Self {
        Self(s as u32)
    }
}

/// Names known at compile time, interned ahead of any user code.
///
/// Declaration order is load order: the discriminant of each variant is its
/// `AtomId`. Keep this in sync with `AtomTable::new`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum StaticAtoms {
    #[strum(serialize = "")]
    Empty,
    Prototype,
    Constructor,
    Length,
    Name,
    Message,
    Arguments,
    Callee,
    Caller,
    Eval,
    This,
    ToString,
    ValueOf,
    Undefined,
    #[strum(serialize = "NaN")]
    NaN,
    #[strum(serialize = "Infinity")]
    Infinity,
    #[strum(serialize = "Object")]
    Object,
    #[strum(serialize = "Function")]
    Function,
    #[strum(serialize = "Array")]
    Array,
    #[strum(serialize = "String")]
    String,
    #[strum(serialize = "Boolean")]
    Boolean,
    #[strum(serialize = "Number")]
    Number,
    #[strum(serialize = "RegExp")]
    RegExp,
    #[strum(serialize = "Error")]
    Error,
    #[strum(serialize = "SyntaxError")]
    SyntaxError,
    #[strum(serialize = "ReferenceError")]
    ReferenceError,
    #[strum(serialize = "TypeError")]
    TypeError,
    #[strum(serialize = "RangeError")]
    RangeError,
    #[strum(serialize = "InternalError")]
    InternalError,
    Source,
    Global,
    #[strum(serialize = "ignoreCase")]
    IgnoreCase,
    Multiline,
    #[strum(serialize = "lastIndex")]
    LastIndex,
}

/// Interner mapping name strings to [`AtomId`]s and back.
///
/// Lookup by UTF-16 units is the canonical path; a UTF-8 convenience path
/// exists for names originating in Rust string literals and host input.
#[derive(Debug)]
pub struct AtomTable {
    atoms: Vec<AtomData>,
    lookup: AHashMap<Vec<u16>, AtomId>,
}

#[derive(Debug)]
struct AtomData {
    units: Vec<u16>,
    /// Cached UTF-8 form; `None` when the units contain lone surrogates.
    utf8: Option<Box<str>>,
}

impl AtomTable {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            atoms: Vec::with_capacity(StaticAtoms::COUNT + 64),
            lookup: AHashMap::with_capacity(StaticAtoms::COUNT + 64),
        };
        for s in StaticAtoms::iter() {
            let text: &'static str = s.into();
            let id = table.intern_str(text);
            debug_assert_eq!(id, AtomId::from(s), "static atom loaded out of order");
        }
        table
    }

    /// Interns a UTF-16 name, returning the existing id when already present.
    pub fn intern_units(&mut self, units: &[u16]) -> AtomId {
        if let Some(&id) = self.lookup.get(units) {
            return id;
        }
        let id = AtomId(u32::try_from(self.atoms.len()).expect("atom table exceeds u32 range"));
        let utf8 = String::from_utf16(units).ok().map(String::into_boxed_str);
        self.atoms.push(AtomData {
            units: units.to_vec(),
            utf8,
        });
        self.lookup.insert(units.to_vec(), id);
        id
    }

    /// Interns a UTF-8 name.
    pub fn intern_str(&mut self, text: &str) -> AtomId {
        let units: Vec<u16> = text.encode_utf16().collect();
        if let Some(&id) = self.lookup.get(&units) {
            return id;
        }
        let id = AtomId(u32::try_from(self.atoms.len()).expect("atom table exceeds u32 range"));
        self.lookup.insert(units.clone(), id);
        self.atoms.push(AtomData {
            units,
            utf8: Some(text.into()),
        });
        id
    }

    /// Looks up a name without interning it.
    #[must_use]
    pub fn get_units(&self, units: &[u16]) -> Option<AtomId> {
        self.lookup.get(units).copied()
    }

    /// UTF-16 units of an atom.
    #[must_use]
    pub fn units(&self, id: AtomId) -> &[u16] {
        &self.atoms[id.index()].units
    }

    /// UTF-8 rendering of an atom, lossy when the atom holds lone surrogates.
    #[must_use]
    pub fn text(&self, id: AtomId) -> std::borrow::Cow<'_, str> {
        match &self.atoms[id.index()].utf8 {
            Some(s) => std::borrow::Cow::Borrowed(s),
            None => std::borrow::Cow::Owned(String::from_utf16_lossy(&self.atoms[id.index()].units)),
        }
    }

    /// Number of interned atoms (static names included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Interns the decimal rendering of an array index, used when indexed
    /// properties fall back onto the named-property path.
    pub fn intern_index(&mut self, index: u32) -> AtomId {
        let buf = itoa_u32(index);
        self.intern_str(&buf)
    }

    /// Parses an atom as an array index per the `ToString(ToUint32(P)) == P`
    /// rule; returns `None` for non-index names.
    #[must_use]
    pub fn as_array_index(&self, id: AtomId) -> Option<u32> {
        let units = self.units(id);
        if units.is_empty() || units.len() > 10 {
            return None;
        }
        if units.len() > 1 && units[0] == u16::from(b'0') {
            return None;
        }
        let mut value: u64 = 0;
        for &u in units {
            if !(u16::from(b'0')..=u16::from(b'9')).contains(&u) {
                return None;
            }
            value = value * 10 + u64::from(u - u16::from(b'0'));
        }
        // 2^32 - 1 itself is the array "length" sentinel, not an index
        if value < u64::from(u32::MAX) { Some(value as u32) } else { None }
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

fn itoa_u32(value: u32) -> String {
    let mut s = String::with_capacity(10);
    use std::fmt::Write;
    write!(s, "{value}").expect("writing to String cannot fail");
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_atoms_load_in_discriminant_order() {
        let table = AtomTable::new();
        assert_eq!(table.text(AtomId::from(StaticAtoms::Prototype)), "prototype");
        assert_eq!(table.text(AtomId::from(StaticAtoms::LastIndex)), "lastIndex");
        assert_eq!(table.text(AtomId::from(StaticAtoms::Empty)), "");
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = AtomTable::new();
        let a = table.intern_str("foo");
        let b = table.intern_str("foo");
        let c = table.intern_units(&[0x66, 0x6F, 0x6F]);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn lone_surrogate_atoms_round_trip_units() {
        let mut table = AtomTable::new();
        let units = [0xD800u16];
        let id = table.intern_units(&units);
        assert_eq!(table.units(id), &units);
        assert_eq!(table.get_units(&units), Some(id));
    }

    #[test]
    fn array_index_parsing() {
        let mut table = AtomTable::new();
        let zero = table.intern_str("0");
        let ten = table.intern_str("10");
        let padded = table.intern_str("01");
        let huge = table.intern_str("4294967295");
        let name = table.intern_str("x");
        assert_eq!(table.as_array_index(zero), Some(0));
        assert_eq!(table.as_array_index(ten), Some(10));
        assert_eq!(table.as_array_index(padded), None);
        assert_eq!(table.as_array_index(huge), None);
        assert_eq!(table.as_array_index(name), None);
    }
}
