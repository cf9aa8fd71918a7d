//! Hidden classes (shapes) describing object property layouts.
//!
//! Objects adding the same properties in the same order share one shape, so
//! a property lookup resolves to a slot index that inline caches can reuse
//! for every object of that shape. Adding a property either follows a cached
//! transition edge (`parent --key--> child`) or creates the child and caches
//! the edge.
//!
//! Deletes and attribute changes leave the sharing regime: the object gets a
//! unique dictionary shape that is never entered into a transition map, and
//! every further structural change on it produces a fresh unique shape so
//! any cache holding the old pointer self-invalidates.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;

use crate::atom::AtomId;

/// Property attribute bits. `ACCESSOR` marks the slot as holding an
/// accessor-pair heap reference instead of a data value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PropertyFlags(u8);

impl PropertyFlags {
    pub const WRITABLE: u8 = 1;
    pub const ENUMERABLE: u8 = 2;
    pub const CONFIGURABLE: u8 = 4;
    pub const ACCESSOR: u8 = 8;

    /// writable + enumerable + configurable: ordinary assignment semantics.
    #[must_use]
    pub fn plain_data() -> Self {
        Self(Self::WRITABLE | Self::ENUMERABLE | Self::CONFIGURABLE)
    }

    /// writable + configurable, not enumerable: built-in method semantics.
    #[must_use]
    pub fn builtin() -> Self {
        Self(Self::WRITABLE | Self::CONFIGURABLE)
    }

    /// Fully locked data property.
    #[must_use]
    pub fn frozen_data() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn accessor(enumerable: bool, configurable: bool) -> Self {
        let mut bits = Self::ACCESSOR;
        if enumerable {
            bits |= Self::ENUMERABLE;
        }
        if configurable {
            bits |= Self::CONFIGURABLE;
        }
        Self(bits)
    }

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE != 0
    }

    #[must_use]
    pub fn is_enumerable(self) -> bool {
        self.0 & Self::ENUMERABLE != 0
    }

    #[must_use]
    pub fn is_configurable(self) -> bool {
        self.0 & Self::CONFIGURABLE != 0
    }

    #[must_use]
    pub fn is_accessor(self) -> bool {
        self.0 & Self::ACCESSOR != 0
    }
}

/// One property's key and attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PropertyInfo {
    pub key: AtomId,
    pub flags: PropertyFlags,
}

/// A property layout shared by every object built the same way.
///
/// The transition map is interior-mutable because edges are cached through
/// shared `Rc` handles during property addition.
#[derive(Debug)]
pub(crate) struct Shape {
    parent: Option<Rc<Shape>>,
    /// The property whose addition created this shape from `parent`.
    added: Option<PropertyInfo>,
    properties: Vec<PropertyInfo>,
    transitions: RefCell<AHashMap<(AtomId, u8), Rc<Shape>>>,
    is_dictionary: bool,
}

impl Shape {
    /// The empty root shape. Each engine instance owns one and threads it to
    /// every object construction site.
    #[must_use]
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            parent: None,
            added: None,
            properties: Vec::new(),
            transitions: RefCell::new(AHashMap::new()),
            is_dictionary: false,
        })
    }

    #[must_use]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn properties(&self) -> &[PropertyInfo] {
        &self.properties
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Rc<Self>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn added_property(&self) -> Option<PropertyInfo> {
        self.added
    }

    #[must_use]
    pub fn is_dictionary(&self) -> bool {
        self.is_dictionary
    }

    /// Slot index of a key, if present.
    #[must_use]
    pub fn find(&self, key: AtomId) -> Option<usize> {
        self.properties.iter().position(|p| p.key == key)
    }

    #[must_use]
    pub fn property(&self, index: usize) -> PropertyInfo {
        self.properties[index]
    }

    /// Shape after adding `key` with `flags`: the cached transition child
    /// when one exists, a fresh child (cached for the next object) when not.
    /// Dictionary shapes never share, so they always take the fresh path.
    #[must_use]
    pub fn add(self: &Rc<Self>, key: AtomId, flags: PropertyFlags) -> Rc<Self> {
        debug_assert!(self.find(key).is_none(), "adding an already-present key");
        if !self.is_dictionary {
            if let Some(existing) = self.transitions.borrow().get(&(key, flags.bits())) {
                return Rc::clone(existing);
            }
        }
        let info = PropertyInfo { key, flags };
        let mut properties = self.properties.clone();
        properties.push(info);
        let child = Rc::new(Self {
            parent: Some(Rc::clone(self)),
            added: Some(info),
            properties,
            transitions: RefCell::new(AHashMap::new()),
            is_dictionary: self.is_dictionary,
        });
        if !self.is_dictionary {
            self.transitions
                .borrow_mut()
                .insert((key, flags.bits()), Rc::clone(&child));
        }
        child
    }

    /// A unique dictionary copy of this shape. The slot layout is preserved
    /// so the object's slot vector stays valid.
    #[must_use]
    pub fn to_dictionary(&self) -> Rc<Self> {
        Rc::new(Self {
            parent: None,
            added: None,
            properties: self.properties.clone(),
            transitions: RefCell::new(AHashMap::new()),
            is_dictionary: true,
        })
    }

    /// Dictionary shape with one property removed; returns the removed slot
    /// index so the object can splice its slot vector.
    #[must_use]
    pub fn without_property(&self, key: AtomId) -> Option<(Rc<Self>, usize)> {
        let index = self.find(key)?;
        let mut properties = self.properties.clone();
        properties.remove(index);
        let shape = Rc::new(Self {
            parent: None,
            added: None,
            properties,
            transitions: RefCell::new(AHashMap::new()),
            is_dictionary: true,
        });
        Some((shape, index))
    }

    /// Dictionary shape with one property's attributes replaced.
    #[must_use]
    pub fn with_flags(&self, key: AtomId, flags: PropertyFlags) -> Option<Rc<Self>> {
        let index = self.find(key)?;
        let mut properties = self.properties.clone();
        properties[index].flags = flags;
        Some(Rc::new(Self {
            parent: None,
            added: None,
            properties,
            transitions: RefCell::new(AHashMap::new()),
            is_dictionary: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomTable;

    #[test]
    fn transitions_are_shared() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern_str("a");
        let b = atoms.intern_str("b");
        let root = Shape::root();

        let s1 = root.add(a, PropertyFlags::plain_data());
        let s2 = root.add(a, PropertyFlags::plain_data());
        assert!(Rc::ptr_eq(&s1, &s2), "same add must reuse the transition edge");

        let s3 = s1.add(b, PropertyFlags::plain_data());
        assert_eq!(s3.property_count(), 2);
        assert_eq!(s3.find(a), Some(0));
        assert_eq!(s3.find(b), Some(1));
        // child's property list is the parent's plus the added key
        assert_eq!(&s3.properties()[..1], s1.properties());
    }

    #[test]
    fn different_flags_take_different_edges() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern_str("a");
        let root = Shape::root();
        let plain = root.add(a, PropertyFlags::plain_data());
        let frozen = root.add(a, PropertyFlags::frozen_data());
        assert!(!Rc::ptr_eq(&plain, &frozen));
    }

    #[test]
    fn dictionary_shapes_never_share() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern_str("a");
        let b = atoms.intern_str("b");
        let root = Shape::root();
        let shape = root.add(a, PropertyFlags::plain_data());

        let dict = shape.to_dictionary();
        assert!(dict.is_dictionary());
        assert_eq!(dict.find(a), Some(0));

        let d1 = dict.add(b, PropertyFlags::plain_data());
        let d2 = dict.add(b, PropertyFlags::plain_data());
        assert!(!Rc::ptr_eq(&d1, &d2), "dictionary adds must not cache transitions");
    }

    #[test]
    fn without_property_preserves_remaining_order() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern_str("a");
        let b = atoms.intern_str("b");
        let c = atoms.intern_str("c");
        let shape = Shape::root()
            .add(a, PropertyFlags::plain_data())
            .add(b, PropertyFlags::plain_data())
            .add(c, PropertyFlags::plain_data());
        let (removed, index) = shape.without_property(b).expect("b exists");
        assert_eq!(index, 1);
        assert_eq!(removed.find(a), Some(0));
        assert_eq!(removed.find(c), Some(1));
        assert!(removed.is_dictionary());
    }
}
