//! Builder for emitting bytecode during compilation.
//!
//! Handles encoding opcodes and operands into raw bytes, managing forward
//! jumps with patching, allocating inline-cache sites, and tracking operand
//! stack depth so every code block carries a tight `max_stack` bound.

use std::rc::Rc;

use crate::{
    atom::AtomId,
    bytecode::code::{CodeBlock, CodeBlockFlags, LocationEntry, RegExpDef},
    source::CodeRange,
    value::Value,
};

use super::op::Opcode;

/// Label for a forward jump that needs patching.
///
/// Stores the bytecode offset of the jump's `i16` operand. Pass it to
/// `patch_jump()` once the target is known.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JumpLabel(usize);

#[derive(Debug, Default)]
pub(crate) struct CodeBuilder {
    bytecode: Vec<u8>,
    constants: Vec<Value>,
    functions: Vec<Rc<CodeBlock>>,
    regexps: Vec<RegExpDef>,
    location_table: Vec<LocationEntry>,
    current_line: u32,
    current_stack_depth: u16,
    max_stack_depth: u16,
    ident_ic_count: usize,
    prop_ic_count: usize,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source line recorded for subsequently emitted instructions.
    pub fn set_location(&mut self, range: CodeRange) {
        if range.line != self.current_line {
            self.current_line = range.line;
            let offset = u32::try_from(self.bytecode.len()).expect("bytecode length exceeds u32");
            self.location_table.push(LocationEntry {
                offset,
                line: range.line,
            });
        }
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        self.bytecode.push(op as u8);
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits an instruction with one u16 operand.
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        match op {
            // pops argc + receiver + callee, pushes result
            Opcode::CallFunction => self.adjust_stack(-1 - i16::try_from(operand).expect("argc fits i16")),
            // pops argc + callee, pushes result
            Opcode::NewFunctionCall => self.adjust_stack(-i16::try_from(operand).expect("argc fits i16")),
            // pops argc, pushes result
            Opcode::CallEvalFunction => self.adjust_stack(1 - i16::try_from(operand).expect("argc fits i16")),
            // pops count elements, pushes the array
            Opcode::CreateArray => self.adjust_stack(1 - i16::try_from(operand).expect("count fits i16")),
            _ => {
                if let Some(effect) = op.stack_effect() {
                    self.adjust_stack(effect);
                }
            }
        }
    }

    /// Emits an instruction with two u16 operands.
    pub fn emit_u16_u16(&mut self, op: Opcode, a: u16, b: u16) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&a.to_le_bytes());
        self.bytecode.extend_from_slice(&b.to_le_bytes());
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits a forward jump, returning the label to patch.
    #[must_use]
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.bytecode.push(op as u8);
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        match op {
            // the peeking variants pop on fallthrough and keep the value on
            // the jump edge; account for the fallthrough path here and let
            // the jump target re-establish depth via set_stack_depth
            Opcode::JumpIfFalseWithPeeking | Opcode::JumpIfTrueWithPeeking => self.adjust_stack(-1),
            _ => {
                if let Some(effect) = op.stack_effect() {
                    self.adjust_stack(effect);
                }
            }
        }
        label
    }

    /// Emits `JumpComplexCase` with its reason/unwind/target-depth operands,
    /// returning the offset label.
    #[must_use]
    pub fn emit_jump_complex(&mut self, reason: u8, unwind: u8, target_sp: u16) -> JumpLabel {
        self.bytecode.push(Opcode::JumpComplexCase as u8);
        self.bytecode.push(reason);
        self.bytecode.push(unwind);
        self.bytecode.extend_from_slice(&target_sp.to_le_bytes());
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        label
    }

    /// Emits a `Try` with forward-patched catch and finally offsets.
    ///
    /// Returns `(catch_label, finally_label)`; patch each once the
    /// corresponding block position is known. An unpatched finally label
    /// keeps offset 0, which the interpreter reads as "no finally".
    #[must_use]
    pub fn emit_try(&mut self, catch_param: u16) -> (JumpLabel, JumpLabel) {
        self.bytecode.push(Opcode::Try as u8);
        self.bytecode.extend_from_slice(&catch_param.to_le_bytes());
        let catch_label = JumpLabel(self.bytecode.len());
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        let finally_label = JumpLabel(self.bytecode.len());
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        (catch_label, finally_label)
    }

    /// Patches a forward jump to land at the current offset.
    ///
    /// # Panics
    /// Panics when the offset leaves the `i16` range, which means the
    /// function body is too large; surfacing that at compile time beats
    /// silent truncation.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = i64::try_from(self.bytecode.len()).expect("bytecode target exceeds i64");
        let base = i64::try_from(label.0 + 2).expect("label base exceeds i64");
        let offset = i16::try_from(target - base).expect("jump offset exceeds i16 range; function too large");
        let bytes = offset.to_le_bytes();
        self.bytecode[label.0] = bytes[0];
        self.bytecode[label.0 + 1] = bytes[1];
    }

    /// Patches a forward jump to a specific, already-emitted target offset
    /// (switch dispatch edges).
    pub fn patch_jump_to(&mut self, label: JumpLabel, target: usize) {
        let target = i64::try_from(target).expect("target exceeds i64");
        let base = i64::try_from(label.0 + 2).expect("label base exceeds i64");
        let offset = i16::try_from(target - base).expect("jump offset exceeds i16 range; function too large");
        let bytes = offset.to_le_bytes();
        self.bytecode[label.0] = bytes[0];
        self.bytecode[label.0 + 1] = bytes[1];
    }

    /// Emits a backward jump to a known target offset.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        self.bytecode.push(op as u8);
        let base = i64::try_from(self.bytecode.len() + 2).expect("offset exceeds i64");
        let target = i64::try_from(target).expect("target exceeds i64");
        let offset = i16::try_from(target - base).expect("jump offset exceeds i16 range; function too large");
        self.bytecode.extend_from_slice(&offset.to_le_bytes());
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Current bytecode offset; record loop heads with this.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Adds a constant, returning its pool index.
    ///
    /// # Panics
    /// Panics past 65535 entries (the operand width).
    #[must_use]
    pub fn add_const(&mut self, value: Value) -> u16 {
        // literals repeat constantly; reuse exact matches
        if let Some(found) = self.constants.iter().position(|v| same_constant(*v, value)) {
            return u16::try_from(found).expect("constant pool exceeds u16 range");
        }
        let index = u16::try_from(self.constants.len()).expect("constant pool exceeds u16 range; too many literals");
        self.constants.push(value);
        index
    }

    /// Adds a nested function code block, returning its table index.
    #[must_use]
    pub fn add_function(&mut self, code: Rc<CodeBlock>) -> u16 {
        let index = u16::try_from(self.functions.len()).expect("function table exceeds u16 range");
        self.functions.push(code);
        index
    }

    /// Adds a compiled regex literal, returning its table index.
    #[must_use]
    pub fn add_regexp(&mut self, def: RegExpDef) -> u16 {
        let index = u16::try_from(self.regexps.len()).expect("regex table exceeds u16 range");
        self.regexps.push(def);
        index
    }

    /// Allocates a `GetById`/`SetById` cache site.
    #[must_use]
    pub fn add_ident_ic(&mut self) -> u16 {
        let index = u16::try_from(self.ident_ic_count).expect("cache table exceeds u16 range");
        self.ident_ic_count += 1;
        index
    }

    /// Allocates a precomputed property-access cache site.
    #[must_use]
    pub fn add_prop_ic(&mut self) -> u16 {
        let index = u16::try_from(self.prop_ic_count).expect("cache table exceeds u16 range");
        self.prop_ic_count += 1;
        index
    }

    /// Current tracked stack depth.
    #[must_use]
    pub fn stack_depth(&self) -> u16 {
        self.current_stack_depth
    }

    /// Re-establishes the depth at a jump target where branches converge
    /// with different tracked states.
    pub fn set_stack_depth(&mut self, depth: u16) {
        self.current_stack_depth = depth;
        self.max_stack_depth = self.max_stack_depth.max(depth);
    }

    pub fn adjust_stack_depth(&mut self, delta: i16) {
        self.adjust_stack(delta);
    }

    fn adjust_stack(&mut self, delta: i16) {
        let depth = i32::from(self.current_stack_depth) + i32::from(delta);
        debug_assert!(depth >= 0, "compiler stack accounting went negative: {depth}");
        self.current_stack_depth = u16::try_from(depth.max(0)).unwrap_or(u16::MAX);
        self.max_stack_depth = self.max_stack_depth.max(self.current_stack_depth);
    }

    /// Assembles the final code block.
    #[must_use]
    pub fn build(
        self,
        params: Vec<AtomId>,
        inner_identifiers: Vec<AtomId>,
        flags: CodeBlockFlags,
        function_name: Option<AtomId>,
    ) -> CodeBlock {
        CodeBlock::new(
            self.bytecode,
            self.constants,
            self.functions,
            self.regexps,
            params,
            inner_identifiers,
            flags,
            function_name,
            self.max_stack_depth,
            self.location_table,
            self.ident_ic_count,
            self.prop_ic_count,
        )
    }
}

/// Constant-pool deduplication equality: bit-exact for doubles so that 0.0
/// and -0.0 stay distinct and NaN still matches itself.
fn same_constant(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        (Value::Ref(_), _) | (_, Value::Ref(_)) => false,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_basic() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::This);
        builder.emit(Opcode::Pop);
        let code = builder.build(vec![], vec![], CodeBlockFlags::default(), None);
        assert_eq!(code.code(), &[Opcode::This as u8, Opcode::Pop as u8]);
    }

    #[test]
    fn forward_jump_patching() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::This);
        let jump = builder.emit_jump(Opcode::JumpIfFalse);
        builder.emit(Opcode::This);
        builder.emit(Opcode::Pop);
        builder.patch_jump(jump);
        builder.emit(Opcode::End);
        let code = builder.build(vec![], vec![], CodeBlockFlags::default(), None);
        // jump operand starts at offset 2; target offset 6; offset = 6 - 4
        assert_eq!(
            code.code(),
            &[
                Opcode::This as u8,
                Opcode::JumpIfFalse as u8,
                2,
                0,
                Opcode::This as u8,
                Opcode::Pop as u8,
                Opcode::End as u8,
            ]
        );
    }

    #[test]
    fn backward_jump_encoding() {
        let mut builder = CodeBuilder::new();
        let top = builder.current_offset();
        builder.emit(Opcode::This);
        builder.emit(Opcode::Pop);
        builder.emit_jump_to(Opcode::Jump, top);
        let code = builder.build(vec![], vec![], CodeBlockFlags::default(), None);
        let expected = (-5i16).to_le_bytes();
        assert_eq!(
            code.code(),
            &[
                Opcode::This as u8,
                Opcode::Pop as u8,
                Opcode::Jump as u8,
                expected[0],
                expected[1],
            ]
        );
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut builder = CodeBuilder::new();
        let a = builder.add_const(Value::Int32(1));
        let b = builder.add_const(Value::Int32(1));
        let c = builder.add_const(Value::Double(0.0));
        let d = builder.add_const(Value::Double(-0.0));
        assert_eq!(a, b);
        assert_ne!(c, d, "0.0 and -0.0 must stay distinct constants");
    }

    #[test]
    fn stack_depth_tracks_maximum() {
        let mut builder = CodeBuilder::new();
        let idx = builder.add_const(Value::Int32(1));
        builder.emit_u16(Opcode::Push, idx);
        builder.emit_u16(Opcode::Push, idx);
        builder.emit(Opcode::Plus);
        builder.emit(Opcode::Pop);
        assert_eq!(builder.stack_depth(), 0);
        let code = builder.build(vec![], vec![], CodeBlockFlags::default(), None);
        assert_eq!(code.max_stack(), 2);
    }
}
