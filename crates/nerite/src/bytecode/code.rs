//! Compiled code blocks and their inline-cache site tables.
//!
//! A [`CodeBlock`] is the unit the interpreter executes: raw opcode bytes, a
//! constant pool, nested function blocks, precompiled regex literals, the
//! parameter and inner-identifier tables used to build the activation at
//! call time, and per-site inline caches.
//!
//! Cache sites use interior mutability (`Cell`/`RefCell`) because the
//! interpreter holds the code block shared while refilling caches. A site
//! that observes a megamorphic access flips itself to the slow state, which
//! is this design's equivalent of rewriting the opcode to its slow-mode
//! form: the site never thrashes again.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use smallvec::SmallVec;

use crate::{
    atom::AtomId,
    environment::BindingSlot,
    heap::HeapId,
    regexp::CompiledRegex,
    shape::Shape,
    value::Value,
};

/// Sentinel cache-site operand meaning "do not cache" (dynamic scopes).
pub(crate) const NO_CACHE_SITE: u16 = u16::MAX;

/// One `GetById`/`SetById` cache entry: the resolved global binding plus the
/// VM generation it was filled at. Any declarative binding creation bumps
/// the generation and therefore invalidates every entry at once.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CachedBinding {
    pub env: HeapId,
    pub slot: BindingSlot,
}

#[derive(Debug, Default)]
pub(crate) struct IdentIcSite {
    generation: Cell<u64>,
    binding: Cell<Option<CachedBinding>>,
}

impl IdentIcSite {
    pub fn lookup(&self, generation: u64) -> Option<CachedBinding> {
        if self.generation.get() == generation {
            self.binding.get()
        } else {
            None
        }
    }

    pub fn fill(&self, generation: u64, binding: CachedBinding) {
        self.generation.set(generation);
        self.binding.set(Some(binding));
    }
}

/// State of a precomputed property-access cache site.
#[derive(Debug, Default)]
pub(crate) enum PropIcState {
    #[default]
    Uninit,
    /// Read hit: shape chain from the receiver down to the holder, and the
    /// holder's slot.
    GetMono {
        chain: SmallVec<[Rc<Shape>; 2]>,
        slot: u16,
    },
    /// Write hit on an existing own data slot.
    SetMonoExisting { shape: Rc<Shape>, slot: u16 },
    /// Write that adds a property along a cached transition edge.
    SetMonoTransition {
        from: Rc<Shape>,
        to: Rc<Shape>,
        slot: u16,
    },
    /// Megamorphic or accessor-involved: stay on the generic path.
    Slow,
}

#[derive(Debug, Default)]
pub(crate) struct PropIcSite {
    pub state: RefCell<PropIcState>,
}

/// A regex literal compiled at emission time.
#[derive(Debug)]
pub(crate) struct RegExpDef {
    pub source: AtomId,
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
    pub compiled: CompiledRegex,
}

/// Maps a bytecode offset to the source line active from there on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocationEntry {
    pub offset: u32,
    pub line: u32,
}

/// One compiled function or program.
#[derive(Debug)]
pub(crate) struct CodeBlock {
    code: Vec<u8>,
    constants: Vec<Value>,
    functions: Vec<Rc<CodeBlock>>,
    regexps: Vec<RegExpDef>,
    /// Formal parameter names, in order; a prefix of `inner_identifiers`.
    params: Vec<AtomId>,
    /// Every name bound in the function record at entry: parameters first,
    /// then hoisted `var` and function-declaration names.
    inner_identifiers: Vec<AtomId>,
    /// The record must be name-addressable (closures or dynamic lookups
    /// reach into it).
    needs_activation: bool,
    /// The body mentions `arguments` without shadowing it.
    needs_arguments: bool,
    is_strict: bool,
    is_function_expression: bool,
    /// `with`/direct-`eval` present: identifier sites resolve dynamically.
    is_dynamic_scope: bool,
    function_name: Option<AtomId>,
    /// Operand-stack depth bound, from builder accounting.
    max_stack: u16,
    location_table: Vec<LocationEntry>,
    ident_ics: Vec<IdentIcSite>,
    prop_ics: Vec<PropIcSite>,
}

impl CodeBlock {
    #[expect(clippy::too_many_arguments, reason = "assembled once, by the builder")]
    pub fn new(
        code: Vec<u8>,
        constants: Vec<Value>,
        functions: Vec<Rc<CodeBlock>>,
        regexps: Vec<RegExpDef>,
        params: Vec<AtomId>,
        inner_identifiers: Vec<AtomId>,
        flags: CodeBlockFlags,
        function_name: Option<AtomId>,
        max_stack: u16,
        location_table: Vec<LocationEntry>,
        ident_ic_count: usize,
        prop_ic_count: usize,
    ) -> Self {
        let ident_ics = std::iter::repeat_with(IdentIcSite::default).take(ident_ic_count).collect();
        let prop_ics = std::iter::repeat_with(PropIcSite::default).take(prop_ic_count).collect();
        Self {
            code,
            constants,
            functions,
            regexps,
            params,
            inner_identifiers,
            needs_activation: flags.needs_activation,
            needs_arguments: flags.needs_arguments,
            is_strict: flags.is_strict,
            is_function_expression: flags.is_function_expression,
            is_dynamic_scope: flags.is_dynamic_scope,
            function_name,
            max_stack,
            location_table,
            ident_ics,
            prop_ics,
        }
    }

    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[must_use]
    pub fn constant(&self, index: u16) -> Value {
        self.constants[index as usize]
    }

    #[must_use]
    pub fn function(&self, index: u16) -> &Rc<CodeBlock> {
        &self.functions[index as usize]
    }

    #[must_use]
    pub fn regexp(&self, index: u16) -> &RegExpDef {
        &self.regexps[index as usize]
    }

    #[must_use]
    pub fn params(&self) -> &[AtomId] {
        &self.params
    }

    #[must_use]
    pub fn inner_identifiers(&self) -> &[AtomId] {
        &self.inner_identifiers
    }

    #[must_use]
    pub fn needs_activation(&self) -> bool {
        self.needs_activation
    }

    #[must_use]
    pub fn needs_arguments(&self) -> bool {
        self.needs_arguments
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.is_strict
    }

    #[must_use]
    pub fn is_function_expression(&self) -> bool {
        self.is_function_expression
    }

    #[must_use]
    pub fn is_dynamic_scope(&self) -> bool {
        self.is_dynamic_scope
    }

    #[must_use]
    pub fn function_name(&self) -> Option<AtomId> {
        self.function_name
    }

    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    #[must_use]
    pub fn ident_ic(&self, site: u16) -> Option<&IdentIcSite> {
        if site == NO_CACHE_SITE {
            return None;
        }
        self.ident_ics.get(site as usize)
    }

    #[must_use]
    pub fn prop_ic(&self, site: u16) -> Option<&PropIcSite> {
        if site == NO_CACHE_SITE {
            return None;
        }
        self.prop_ics.get(site as usize)
    }

    /// Source line for a bytecode offset, from the last entry at or before
    /// it.
    #[must_use]
    pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
        let offset = u32::try_from(offset).ok()?;
        self.location_table
            .iter()
            .rev()
            .find(|entry| entry.offset <= offset)
            .map(|entry| entry.line)
    }
}

/// Behavior flags gathered during compilation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CodeBlockFlags {
    pub needs_activation: bool,
    pub needs_arguments: bool,
    pub is_strict: bool,
    pub is_function_expression: bool,
    pub is_dynamic_scope: bool,
}
