//! Opcode definitions.
//!
//! Opcodes are one byte followed by little-endian operands of fixed width
//! per opcode. Control transfers carry `i16` byte offsets relative to the
//! position just past the operand. The numbering is internal; nothing
//! serializes it.

use strum::FromRepr;

/// The instruction set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, strum::IntoStaticStr)]
pub enum Opcode {
    // --- stack ---
    /// `u16` constant index.
    Push,
    Pop,
    Dup,
    /// Pops into the invocation's completion-value register.
    PopExpressionStatement,
    PushToTemp,
    PopFromTemp,

    // --- locals and bindings ---
    /// `u16` atom, `u16` cache site (0xFFFF = uncached).
    GetById,
    /// `u16` atom, `u16` cache site.
    SetById,
    /// `u16` slot in the nearest function record.
    GetByIndex,
    /// `u16` slot.
    SetByIndex,
    /// `u16` up-count (function records to skip), `u16` slot.
    GetByIndexWithActivation,
    /// `u16` up-count, `u16` slot.
    SetByIndexWithActivation,
    /// `u16` atom: creates a mutable binding in the nearest variable record.
    CreateBinding,

    // --- arithmetic ---
    Plus,
    Minus,
    Multiply,
    Division,
    Mod,
    Increment,
    Decrement,
    UnaryMinus,
    UnaryPlus,
    UnaryNot,
    UnaryBitwiseNot,
    ToNumber,

    // --- relational / equality ---
    Equal,
    NotEqual,
    StrictEqual,
    NotStrictEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // --- bitwise ---
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    SignedRightShift,
    UnsignedRightShift,

    // --- type operators ---
    UnaryTypeOf,
    /// `u16` atom: `typeof identifier`, which must not throw on unresolved
    /// names.
    UnaryTypeOfById,
    UnaryDelete,
    /// `u16` atom: `delete identifier`.
    UnaryDeleteById,
    UnaryVoid,
    /// The `in` operator (key coerced to a property name).
    StringIn,
    InstanceOf,

    // --- objects ---
    /// `u16` property-count hint.
    CreateObject,
    /// `u16` element count popped from the stack (`Empty` marks holes).
    CreateArray,
    /// `u16` regex-table index.
    CreateRegExp,
    /// `[obj, key, value]` -> `[obj]`: defines an own data property.
    InitObject,
    /// `[obj, key, fn]` -> `[obj]`.
    SetObjectPropertyGetter,
    /// `[obj, key, fn]` -> `[obj]`.
    SetObjectPropertySetter,
    /// `[obj, key]` -> `[value]`.
    GetObject,
    /// `[obj, key]` -> `[obj, key, value]`: compound-assignment read.
    GetObjectWithPeeking,
    /// `u16` atom, `u16` cache site. `[obj]` -> `[value]`.
    GetObjectPreComputed,
    /// `u16` atom, `u16` cache site. `[obj]` -> `[obj, value]`.
    GetObjectPreComputedWithPeeking,
    /// `[obj, key, value]` -> `[value]`.
    SetObject,
    /// `u16` atom, `u16` cache site. `[obj, value]` -> `[value]`.
    SetObjectPreComputed,

    // --- functions and calls ---
    /// `u16` function-table index.
    CreateFunction,
    /// `u16` cache site. `[obj, key]` -> `[callee, receiver]`.
    PrepareFunctionCall,
    /// Pushes the undefined receiver for non-member calls.
    PushFunctionCallReceiver,
    /// `u16` argc. `[callee, receiver, args..]` -> `[result]`.
    CallFunction,
    /// `u16` argc. `[callee, args..]` -> `[constructed]`.
    NewFunctionCall,
    /// `u16` argc. `[args..]` -> `[result]`: resolves `eval` at runtime and
    /// runs a direct eval when it is still the intrinsic.
    CallEvalFunction,
    /// Body of a bound-function stub: forwards to the bound target.
    CallBoundFunction,
    /// Body of a native-function stub: dispatches on the callee's tag.
    ExecuteNativeFunction,
    ReturnFunction,
    ReturnFunctionWithValue,

    // --- control ---
    /// `i16` offset.
    Jump,
    /// `i16` offset; pops the condition.
    JumpIfFalse,
    /// `i16` offset; pops the condition.
    JumpIfTrue,
    /// `i16` offset; jumps keeping the value, otherwise pops it.
    JumpIfFalseWithPeeking,
    /// `i16` offset; jumps keeping the value, otherwise pops it.
    JumpIfTrueWithPeeking,
    /// `u8` reason (break/continue/jump), `u8` guard scopes to unwind,
    /// `u16` operand-stack depth at the target, `i16` offset: a jump that
    /// must run intervening `finally` blocks before landing.
    JumpComplexCase,
    /// Loop-header marker; tracer hook only.
    LoopStart,

    // --- environments ---
    /// Pops an object and enters an object environment over it (`with`).
    EnterWithEnvironment,
    /// Leaves the innermost entered environment scope.
    ExitEnvironment,

    // --- exceptions ---
    /// `u16` catch-parameter atom (0xFFFF = no catch), `i16` catch offset,
    /// `i16` finally offset (0 = none).
    Try,
    /// `i16` offset to the finally block or past the statement; ends the
    /// protected body or a catch body.
    TryCatchBodyEnd,
    Throw,
    /// Consumes or forwards the pending control-flow record.
    FinallyEnd,

    // --- enumeration ---
    /// `[obj]` -> `[state]`.
    EnumerateObject,
    /// `i16` end offset. `[state]` -> `[state, key]`, or jump when done.
    EnumerateObjectKey,

    // --- introspection ---
    This,
    GetArgumentsObject,
    SetArgumentsObject,
    /// Saves the operand-stack depth for the matching check.
    LoadStackPointer,
    /// `u16` expected depth relative to the invocation base.
    CheckStackPointer,

    /// Terminates a program-level invocation, yielding the completion value.
    End,
}

impl Opcode {
    /// Fixed stack effect, `None` when it depends on operands
    /// (`CallFunction`, `CreateArray`) or on control flow.
    #[must_use]
    pub fn stack_effect(self) -> Option<i16> {
        Some(match self {
            Self::Push
            | Self::Dup
            | Self::PopFromTemp
            | Self::GetById
            | Self::GetByIndex
            | Self::GetByIndexWithActivation
            | Self::UnaryTypeOfById
            | Self::UnaryDeleteById
            | Self::CreateObject
            | Self::CreateRegExp
            | Self::CreateFunction
            | Self::PushFunctionCallReceiver
            | Self::This
            | Self::GetArgumentsObject => 1,

            Self::Pop
            | Self::PopExpressionStatement
            | Self::PushToTemp
            | Self::JumpIfFalse
            | Self::JumpIfTrue
            | Self::Throw
            | Self::ReturnFunctionWithValue => -1,

            Self::SetById
            | Self::SetByIndex
            | Self::SetByIndexWithActivation
            | Self::SetArgumentsObject
            | Self::CreateBinding
            | Self::Increment
            | Self::Decrement
            | Self::UnaryMinus
            | Self::UnaryPlus
            | Self::UnaryNot
            | Self::UnaryBitwiseNot
            | Self::ToNumber
            | Self::UnaryTypeOf
            | Self::UnaryVoid
            | Self::EnumerateObject
            | Self::GetObjectPreComputed
            | Self::Jump
            | Self::JumpComplexCase
            | Self::ExitEnvironment
            | Self::LoopStart
            | Self::Try
            | Self::TryCatchBodyEnd
            | Self::FinallyEnd
            | Self::LoadStackPointer
            | Self::CheckStackPointer
            | Self::ReturnFunction
            | Self::CallBoundFunction
            | Self::ExecuteNativeFunction
            | Self::End => 0,

            Self::Plus
            | Self::Minus
            | Self::Multiply
            | Self::Division
            | Self::Mod
            | Self::Equal
            | Self::NotEqual
            | Self::StrictEqual
            | Self::NotStrictEqual
            | Self::LessThan
            | Self::LessThanOrEqual
            | Self::GreaterThan
            | Self::GreaterThanOrEqual
            | Self::BitwiseAnd
            | Self::BitwiseOr
            | Self::BitwiseXor
            | Self::LeftShift
            | Self::SignedRightShift
            | Self::UnsignedRightShift
            | Self::UnaryDelete
            | Self::StringIn
            | Self::InstanceOf
            | Self::GetObject
            | Self::EnterWithEnvironment
            | Self::SetObjectPreComputed => -1,

            Self::GetObjectWithPeeking | Self::GetObjectPreComputedWithPeeking | Self::EnumerateObjectKey => 1,

            Self::SetObject | Self::InitObject | Self::SetObjectPropertyGetter | Self::SetObjectPropertySetter => -2,

            Self::PrepareFunctionCall => 0,

            Self::CallFunction | Self::NewFunctionCall | Self::CallEvalFunction | Self::CreateArray => return None,

            Self::JumpIfFalseWithPeeking | Self::JumpIfTrueWithPeeking => return None,
        })
    }

    /// Total operand width in bytes following the opcode byte.
    #[must_use]
    pub fn operand_width(self) -> usize {
        match self {
            Self::Push
            | Self::GetByIndex
            | Self::SetByIndex
            | Self::CreateBinding
            | Self::UnaryTypeOfById
            | Self::UnaryDeleteById
            | Self::CreateObject
            | Self::CreateArray
            | Self::CreateRegExp
            | Self::CreateFunction
            | Self::PrepareFunctionCall
            | Self::CallFunction
            | Self::NewFunctionCall
            | Self::CallEvalFunction
            | Self::CheckStackPointer => 2,

            Self::GetById
            | Self::SetById
            | Self::GetByIndexWithActivation
            | Self::SetByIndexWithActivation
            | Self::GetObjectPreComputed
            | Self::GetObjectPreComputedWithPeeking
            | Self::SetObjectPreComputed => 4,

            Self::JumpComplexCase => 6,

            Self::Jump
            | Self::JumpIfFalse
            | Self::JumpIfTrue
            | Self::JumpIfFalseWithPeeking
            | Self::JumpIfTrueWithPeeking
            | Self::TryCatchBodyEnd
            | Self::EnumerateObjectKey => 2,

            Self::Try => 6,

            _ => 0,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_repr_round_trips() {
        assert_eq!(Opcode::from_repr(Opcode::Push as u8), Some(Opcode::Push));
        assert_eq!(Opcode::from_repr(Opcode::End as u8), Some(Opcode::End));
        assert_eq!(Opcode::from_repr(255), None);
    }

    #[test]
    fn jump_operands_are_two_bytes() {
        assert_eq!(Opcode::Jump.operand_width(), 2);
        assert_eq!(Opcode::Try.operand_width(), 6);
        assert_eq!(Opcode::JumpComplexCase.operand_width(), 6);
        assert_eq!(Opcode::Pop.operand_width(), 0);
    }
}
