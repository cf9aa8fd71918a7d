//! AST to bytecode compilation.
//!
//! Every expression node compiles through `emit_expression` (net +1 stack),
//! every statement through `emit_statement` (net 0), and assignment targets
//! through the store sequences in `emit_assignment`/`emit_update`, which is
//! the reference-write entry point.
//!
//! Identifier sites resolve against the compile-time function-scope stack:
//! a hit in the current function emits `GetByIndex`, a hit in an enclosing
//! function emits `GetByIndexWithActivation` with the function-record
//! up-count, and everything else (globals, dynamic scopes, catch-shadowed
//! names) emits the name-keyed `GetById` with an inline-cache site.
//!
//! `break`/`continue`/`return` crossing `try` or `with` scopes compile to
//! `JumpComplexCase`, which reifies the jump as a control-flow record so the
//! interpreter can run intervening `finally` blocks before landing.

use std::rc::Rc;

use crate::{
    ast::{
        AssignOp, BinaryOp, Expr, ExprNode, FunctionDef, FunctionIndex, Lit, LogicalOp, MemberProp, ProgramAst,
        PropertyDef, PropertyKey, Stmt, StmtNode, SwitchCase, TryStmt, UnaryOp, UpdateOp,
    },
    atom::{AtomId, AtomTable, StaticAtoms},
    bytecode::{
        builder::{CodeBuilder, JumpLabel},
        code::{CodeBlock, CodeBlockFlags, NO_CACHE_SITE, RegExpDef},
        op::Opcode,
    },
    error::{RunError, RunResult},
    regexp::{DefaultRegexEngine, RegexEngine},
    value::Value,
};

/// `JumpComplexCase` reason operands.
pub(crate) const COMPLEX_JUMP_BREAK: u8 = 1;
pub(crate) const COMPLEX_JUMP_CONTINUE: u8 = 2;

/// Operand marking a `Try` without a catch clause.
pub(crate) const NO_CATCH_PARAM: u16 = u16::MAX;

/// Compiles a parsed program (or eval text) into a program code block.
pub(crate) fn compile_program(program: &ProgramAst, atoms: &mut AtomTable) -> RunResult<Rc<CodeBlock>> {
    let mut compiler = Compiler {
        program,
        atoms,
        fn_scopes: vec![FnScope {
            identifiers: Vec::new(),
            dynamic: true,
            is_program: true,
        }],
        active_catch_params: Vec::new(),
        regex_engine: DefaultRegexEngine,
    };
    compiler.compile_program_block()
}

/// Compiles a dynamically constructed function (the `Function` constructor
/// path): a synthetic [`FunctionDef`] from a parameter list and a program
/// parsed as the body.
pub(crate) fn compile_function_program(
    params: &[AtomId],
    body: &ProgramAst,
    atoms: &mut AtomTable,
) -> RunResult<Rc<CodeBlock>> {
    let def = FunctionDef {
        name: None,
        params: params.to_vec(),
        body: body.body.clone(),
        scope: body.scope.clone(),
        is_strict: body.is_strict,
        is_expression: true,
        range: crate::source::CodeRange::synthetic(),
    };
    let mut compiler = Compiler {
        program: body,
        atoms,
        fn_scopes: vec![FnScope {
            identifiers: Vec::new(),
            dynamic: true,
            is_program: true,
        }],
        active_catch_params: Vec::new(),
        regex_engine: DefaultRegexEngine,
    };
    compiler.compile_function(&def)
}

/// One function's compile-time scope table.
struct FnScope {
    identifiers: Vec<AtomId>,
    /// `with` or direct eval present: name sites resolve at runtime.
    dynamic: bool,
    is_program: bool,
}

/// How an identifier site is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentAccess {
    /// Slot in the current function record.
    Local(u16),
    /// Slot in an enclosing function record, `up` function records out.
    Outer { up: u16, index: u16 },
    /// Name-keyed lookup through the lexical chain.
    Dynamic,
}

struct Compiler<'a> {
    program: &'a ProgramAst,
    atoms: &'a mut AtomTable,
    fn_scopes: Vec<FnScope>,
    /// Catch parameters lexically active at the emission point; names
    /// matching one resolve dynamically so the catch scope can shadow.
    active_catch_params: Vec<AtomId>,
    regex_engine: DefaultRegexEngine,
}

/// Per-breakable-statement bookkeeping.
struct LabelScope {
    names: Vec<AtomId>,
    is_loop: bool,
    /// Unlabeled `break` may target this scope (loops and switches, but
    /// not labeled plain statements).
    breakable: bool,
    break_jumps: Vec<JumpLabel>,
    continue_jumps: Vec<JumpLabel>,
    /// Guard (try/with) scopes open when the statement began; jumps from
    /// deeper guard nesting go through `JumpComplexCase`.
    guard_depth: u32,
    /// Operand-stack depth jumps arrive with at the break target.
    break_sp: u16,
    /// Operand-stack depth at the continue target.
    continue_sp: u16,
}

/// Per-function emission state.
struct FnCtx {
    builder: CodeBuilder,
    labels: Vec<LabelScope>,
    guard_depth: u32,
    is_program: bool,
    /// Labels waiting to attach to the next breakable statement.
    pending_labels: Vec<AtomId>,
}

impl Compiler<'_> {
    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    fn compile_program_block(&mut self) -> RunResult<Rc<CodeBlock>> {
        let mut ctx = FnCtx {
            builder: CodeBuilder::new(),
            labels: Vec::new(),
            guard_depth: 0,
            is_program: true,
            pending_labels: Vec::new(),
        };
        // program-level `var`s become bindings on the nearest variable
        // record: the global record, or the caller's for direct eval
        for &name in &self.program.scope.var_names {
            ctx.builder.emit_u16(Opcode::CreateBinding, name.operand());
        }
        ctx.builder.emit(Opcode::LoadStackPointer);
        for stmt in &self.program.body {
            self.emit_statement(&mut ctx, stmt)?;
        }
        ctx.builder.emit(Opcode::End);

        let flags = CodeBlockFlags {
            needs_activation: true,
            needs_arguments: false,
            is_strict: self.program.is_strict,
            is_function_expression: false,
            is_dynamic_scope: true,
        };
        Ok(Rc::new(ctx.builder.build(Vec::new(), Vec::new(), flags, None)))
    }

    fn compile_function(&mut self, def: &FunctionDef) -> RunResult<Rc<CodeBlock>> {
        // parameters first (first occurrence wins a slot), then hoisted vars
        let mut identifiers: Vec<AtomId> = Vec::with_capacity(def.params.len() + def.scope.var_names.len());
        for &param in &def.params {
            if !identifiers.contains(&param) {
                identifiers.push(param);
            }
        }
        for &name in &def.scope.var_names {
            if !identifiers.contains(&name) {
                identifiers.push(name);
            }
        }

        let dynamic = def.scope.is_dynamic();
        let declares_arguments = identifiers.contains(&AtomId::from(StaticAtoms::Arguments));
        let needs_arguments = (def.scope.uses_arguments || dynamic) && !declares_arguments;

        self.fn_scopes.push(FnScope {
            identifiers: identifiers.clone(),
            dynamic,
            is_program: false,
        });

        let mut ctx = FnCtx {
            builder: CodeBuilder::new(),
            labels: Vec::new(),
            guard_depth: 0,
            is_program: false,
            pending_labels: Vec::new(),
        };
        ctx.builder.set_location(def.range);
        ctx.builder.emit(Opcode::LoadStackPointer);
        let result: RunResult<()> = (|| {
            for stmt in &def.body {
                self.emit_statement(&mut ctx, stmt)?;
            }
            Ok(())
        })();
        self.fn_scopes.pop();
        result?;
        // every body terminates through one exit
        ctx.builder.emit(Opcode::ReturnFunction);

        let flags = CodeBlockFlags {
            needs_activation: def.scope.has_inner_function || dynamic,
            needs_arguments,
            is_strict: def.is_strict,
            is_function_expression: def.is_expression,
            is_dynamic_scope: dynamic,
        };
        Ok(Rc::new(ctx.builder.build(def.params.clone(), identifiers, flags, def.name)))
    }

    // ------------------------------------------------------------------
    // Identifier resolution
    // ------------------------------------------------------------------

    fn resolve_ident(&self, name: AtomId) -> IdentAccess {
        if self.active_catch_params.contains(&name) {
            return IdentAccess::Dynamic;
        }
        let current = self.fn_scopes.last().expect("scope stack is never empty");
        if current.dynamic {
            return IdentAccess::Dynamic;
        }
        if let Some(index) = current.identifiers.iter().position(|&n| n == name) {
            return IdentAccess::Local(u16::try_from(index).expect("slot index fits u16"));
        }
        let mut up: u16 = 0;
        for scope in self.fn_scopes[..self.fn_scopes.len() - 1].iter().rev() {
            if scope.is_program {
                break;
            }
            up += 1;
            if scope.dynamic {
                return IdentAccess::Dynamic;
            }
            if let Some(index) = scope.identifiers.iter().position(|&n| n == name) {
                return IdentAccess::Outer {
                    up,
                    index: u16::try_from(index).expect("slot index fits u16"),
                };
            }
        }
        IdentAccess::Dynamic
    }

    /// Whether `name` is the `arguments` identifier of the current function
    /// (no declared binding shadows it).
    fn is_arguments_access(&self, name: AtomId) -> bool {
        if name != AtomId::from(StaticAtoms::Arguments) {
            return false;
        }
        let current = self.fn_scopes.last().expect("scope stack is never empty");
        !current.is_program && !current.identifiers.contains(&name) && !self.active_catch_params.contains(&name)
    }

    fn emit_ident_read(&mut self, ctx: &mut FnCtx, name: AtomId) {
        if self.is_arguments_access(name) {
            ctx.builder.emit(Opcode::GetArgumentsObject);
            return;
        }
        match self.resolve_ident(name) {
            IdentAccess::Local(index) => ctx.builder.emit_u16(Opcode::GetByIndex, index),
            IdentAccess::Outer { up, index } => ctx.builder.emit_u16_u16(Opcode::GetByIndexWithActivation, up, index),
            IdentAccess::Dynamic => {
                let site = self.ident_ic_site(ctx);
                ctx.builder.emit_u16_u16(Opcode::GetById, name.operand(), site);
            }
        }
    }

    /// Stores the top of stack into an identifier binding, keeping the value.
    fn emit_ident_store(&mut self, ctx: &mut FnCtx, name: AtomId) {
        if self.is_arguments_access(name) {
            ctx.builder.emit(Opcode::SetArgumentsObject);
            return;
        }
        match self.resolve_ident(name) {
            IdentAccess::Local(index) => ctx.builder.emit_u16(Opcode::SetByIndex, index),
            IdentAccess::Outer { up, index } => ctx.builder.emit_u16_u16(Opcode::SetByIndexWithActivation, up, index),
            IdentAccess::Dynamic => {
                let site = self.ident_ic_site(ctx);
                ctx.builder.emit_u16_u16(Opcode::SetById, name.operand(), site);
            }
        }
    }

    /// Identifier cache sites are useless in dynamic scopes, where a `with`
    /// object or eval-introduced binding can shadow between executions.
    fn ident_ic_site(&mut self, ctx: &mut FnCtx) -> u16 {
        let dynamic = self.fn_scopes.last().is_some_and(|s| s.dynamic && !s.is_program);
        if dynamic { NO_CACHE_SITE } else { ctx.builder.add_ident_ic() }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn emit_expression(&mut self, ctx: &mut FnCtx, node: &ExprNode) -> RunResult<()> {
        ctx.builder.set_location(node.range);
        match &node.expr {
            Expr::This => ctx.builder.emit(Opcode::This),
            Expr::Identifier(name) => self.emit_ident_read(ctx, *name),
            Expr::Literal(lit) => self.emit_literal(ctx, lit, node)?,
            Expr::Array(elements) => {
                let count = u16::try_from(elements.len())
                    .map_err(|_| RunError::range("Array literal exceeds element limit"))?;
                for element in elements {
                    match element {
                        Some(expr) => self.emit_expression(ctx, expr)?,
                        None => {
                            let hole = ctx.builder.add_const(Value::Empty);
                            ctx.builder.emit_u16(Opcode::Push, hole);
                        }
                    }
                }
                ctx.builder.emit_u16(Opcode::CreateArray, count);
            }
            Expr::Object(properties) => self.emit_object_literal(ctx, properties)?,
            Expr::Function(index) => self.emit_function_literal(ctx, *index)?,
            Expr::Unary { op, argument } => self.emit_unary(ctx, *op, argument)?,
            Expr::Update { op, prefix, argument } => self.emit_update(ctx, *op, *prefix, argument)?,
            Expr::Binary { op, left, right } => {
                self.emit_expression(ctx, left)?;
                self.emit_expression(ctx, right)?;
                ctx.builder.emit(binary_opcode(*op));
            }
            Expr::Logical { op, left, right } => {
                self.emit_expression(ctx, left)?;
                let depth = ctx.builder.stack_depth();
                let jump = ctx.builder.emit_jump(match op {
                    LogicalOp::And => Opcode::JumpIfFalseWithPeeking,
                    LogicalOp::Or => Opcode::JumpIfTrueWithPeeking,
                });
                self.emit_expression(ctx, right)?;
                ctx.builder.patch_jump(jump);
                ctx.builder.set_stack_depth(depth);
            }
            Expr::Assignment { op, target, value } => self.emit_assignment(ctx, *op, target, value)?,
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.emit_expression(ctx, test)?;
                let to_else = ctx.builder.emit_jump(Opcode::JumpIfFalse);
                let depth = ctx.builder.stack_depth();
                self.emit_expression(ctx, consequent)?;
                let to_end = ctx.builder.emit_jump(Opcode::Jump);
                ctx.builder.patch_jump(to_else);
                ctx.builder.set_stack_depth(depth);
                self.emit_expression(ctx, alternate)?;
                ctx.builder.patch_jump(to_end);
            }
            Expr::Call { callee, arguments } => self.emit_call(ctx, callee, arguments)?,
            Expr::New { callee, arguments } => {
                self.emit_expression(ctx, callee)?;
                for argument in arguments {
                    self.emit_expression(ctx, argument)?;
                }
                let argc =
                    u16::try_from(arguments.len()).map_err(|_| RunError::range("Too many constructor arguments"))?;
                ctx.builder.emit_u16(Opcode::NewFunctionCall, argc);
            }
            Expr::Member { object, property } => {
                self.emit_expression(ctx, object)?;
                match property {
                    MemberProp::Named(name) => {
                        let site = ctx.builder.add_prop_ic();
                        ctx.builder
                            .emit_u16_u16(Opcode::GetObjectPreComputed, name.operand(), site);
                    }
                    MemberProp::Computed(key) => {
                        self.emit_expression(ctx, key)?;
                        ctx.builder.emit(Opcode::GetObject);
                    }
                }
            }
            Expr::Sequence(exprs) => {
                for (i, expr) in exprs.iter().enumerate() {
                    self.emit_expression(ctx, expr)?;
                    if i + 1 < exprs.len() {
                        ctx.builder.emit(Opcode::Pop);
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_literal(&mut self, ctx: &mut FnCtx, lit: &Lit, node: &ExprNode) -> RunResult<()> {
        let constant = match lit {
            Lit::Null => ctx.builder.add_const(Value::Null),
            Lit::Bool(b) => ctx.builder.add_const(Value::Bool(*b)),
            Lit::Number(n) => ctx.builder.add_const(Value::number(*n)),
            Lit::Str(units) => {
                let atom = self.atoms.intern_units(units);
                ctx.builder.add_const(Value::InternStr(atom))
            }
            Lit::Regex { body, flags } => {
                let compiled = self
                    .regex_engine
                    .compile(body, flags.contains('i'), flags.contains('m'))
                    .map_err(|err| err.with_line(node.range.line))?;
                let source = self.atoms.intern_str(body);
                let index = ctx.builder.add_regexp(RegExpDef {
                    source,
                    global: flags.contains('g'),
                    ignore_case: flags.contains('i'),
                    multiline: flags.contains('m'),
                    compiled,
                });
                ctx.builder.emit_u16(Opcode::CreateRegExp, index);
                return Ok(());
            }
        };
        ctx.builder.emit_u16(Opcode::Push, constant);
        Ok(())
    }

    fn emit_object_literal(&mut self, ctx: &mut FnCtx, properties: &[PropertyDef]) -> RunResult<()> {
        let hint = u16::try_from(properties.len()).unwrap_or(u16::MAX);
        ctx.builder.emit_u16(Opcode::CreateObject, hint);
        for property in properties {
            match property {
                PropertyDef::Data { key, value } => {
                    self.emit_property_key(ctx, *key);
                    self.emit_expression(ctx, value)?;
                    ctx.builder.emit(Opcode::InitObject);
                }
                PropertyDef::Getter { key, function } => {
                    self.emit_property_key(ctx, *key);
                    self.emit_function_literal(ctx, *function)?;
                    ctx.builder.emit(Opcode::SetObjectPropertyGetter);
                }
                PropertyDef::Setter { key, function } => {
                    self.emit_property_key(ctx, *key);
                    self.emit_function_literal(ctx, *function)?;
                    ctx.builder.emit(Opcode::SetObjectPropertySetter);
                }
            }
        }
        Ok(())
    }

    fn emit_property_key(&mut self, ctx: &mut FnCtx, key: PropertyKey) {
        let constant = match key {
            PropertyKey::Atom(atom) | PropertyKey::NumberAtom(atom) => ctx.builder.add_const(Value::InternStr(atom)),
            PropertyKey::Number(index) => ctx.builder.add_const(Value::from_u32(index)),
        };
        ctx.builder.emit_u16(Opcode::Push, constant);
    }

    fn emit_function_literal(&mut self, ctx: &mut FnCtx, index: FunctionIndex) -> RunResult<()> {
        let def = self.program.function(index);
        let code = self.compile_function(def)?;
        let table_index = ctx.builder.add_function(code);
        ctx.builder.emit_u16(Opcode::CreateFunction, table_index);
        Ok(())
    }

    fn emit_unary(&mut self, ctx: &mut FnCtx, op: UnaryOp, argument: &ExprNode) -> RunResult<()> {
        match op {
            UnaryOp::TypeOf => {
                // `typeof unresolved` must not throw, so identifier operands
                // resolve through the non-throwing variant
                if let Expr::Identifier(name) = argument.expr
                    && !self.is_arguments_access(name)
                    && self.resolve_ident(name) == IdentAccess::Dynamic
                {
                    ctx.builder.emit_u16(Opcode::UnaryTypeOfById, name.operand());
                    return Ok(());
                }
                self.emit_expression(ctx, argument)?;
                ctx.builder.emit(Opcode::UnaryTypeOf);
            }
            UnaryOp::Delete => match &argument.expr {
                Expr::Identifier(name) => {
                    // strict-mode `delete x` was rejected at parse time
                    match self.resolve_ident(*name) {
                        IdentAccess::Dynamic => ctx.builder.emit_u16(Opcode::UnaryDeleteById, name.operand()),
                        _ => {
                            // declarative bindings are not deletable
                            let constant = ctx.builder.add_const(Value::Bool(false));
                            ctx.builder.emit_u16(Opcode::Push, constant);
                        }
                    }
                }
                Expr::Member { object, property } => {
                    self.emit_expression(ctx, object)?;
                    match property {
                        MemberProp::Named(name) => {
                            let constant = ctx.builder.add_const(Value::InternStr(*name));
                            ctx.builder.emit_u16(Opcode::Push, constant);
                        }
                        MemberProp::Computed(key) => self.emit_expression(ctx, key)?,
                    }
                    ctx.builder.emit(Opcode::UnaryDelete);
                }
                _ => {
                    // deleting a non-reference evaluates the operand for
                    // effect and yields true
                    self.emit_expression(ctx, argument)?;
                    ctx.builder.emit(Opcode::Pop);
                    let constant = ctx.builder.add_const(Value::Bool(true));
                    ctx.builder.emit_u16(Opcode::Push, constant);
                }
            },
            UnaryOp::Minus => {
                self.emit_expression(ctx, argument)?;
                ctx.builder.emit(Opcode::UnaryMinus);
            }
            UnaryOp::Plus => {
                self.emit_expression(ctx, argument)?;
                ctx.builder.emit(Opcode::UnaryPlus);
            }
            UnaryOp::Not => {
                self.emit_expression(ctx, argument)?;
                ctx.builder.emit(Opcode::UnaryNot);
            }
            UnaryOp::BitwiseNot => {
                self.emit_expression(ctx, argument)?;
                ctx.builder.emit(Opcode::UnaryBitwiseNot);
            }
            UnaryOp::Void => {
                self.emit_expression(ctx, argument)?;
                ctx.builder.emit(Opcode::UnaryVoid);
            }
        }
        Ok(())
    }

    fn emit_update(&mut self, ctx: &mut FnCtx, op: UpdateOp, prefix: bool, argument: &ExprNode) -> RunResult<()> {
        let step = match op {
            UpdateOp::Increment => Opcode::Increment,
            UpdateOp::Decrement => Opcode::Decrement,
        };
        match &argument.expr {
            Expr::Identifier(name) => {
                self.emit_ident_read(ctx, *name);
                ctx.builder.emit(Opcode::ToNumber);
                if prefix {
                    ctx.builder.emit(step);
                    self.emit_ident_store(ctx, *name);
                } else {
                    ctx.builder.emit(Opcode::Dup);
                    ctx.builder.emit(Opcode::PushToTemp);
                    ctx.builder.emit(step);
                    self.emit_ident_store(ctx, *name);
                    ctx.builder.emit(Opcode::Pop);
                    ctx.builder.emit(Opcode::PopFromTemp);
                }
            }
            Expr::Member { object, property } => {
                self.emit_expression(ctx, object)?;
                match property {
                    MemberProp::Named(name) => {
                        let site = ctx.builder.add_prop_ic();
                        ctx.builder
                            .emit_u16_u16(Opcode::GetObjectPreComputedWithPeeking, name.operand(), site);
                        ctx.builder.emit(Opcode::ToNumber);
                        if prefix {
                            ctx.builder.emit(step);
                            let store = ctx.builder.add_prop_ic();
                            ctx.builder
                                .emit_u16_u16(Opcode::SetObjectPreComputed, name.operand(), store);
                        } else {
                            ctx.builder.emit(Opcode::Dup);
                            ctx.builder.emit(Opcode::PushToTemp);
                            ctx.builder.emit(step);
                            let store = ctx.builder.add_prop_ic();
                            ctx.builder
                                .emit_u16_u16(Opcode::SetObjectPreComputed, name.operand(), store);
                            ctx.builder.emit(Opcode::Pop);
                            ctx.builder.emit(Opcode::PopFromTemp);
                        }
                    }
                    MemberProp::Computed(key) => {
                        self.emit_expression(ctx, key)?;
                        ctx.builder.emit(Opcode::GetObjectWithPeeking);
                        ctx.builder.emit(Opcode::ToNumber);
                        if prefix {
                            ctx.builder.emit(step);
                            ctx.builder.emit(Opcode::SetObject);
                        } else {
                            ctx.builder.emit(Opcode::Dup);
                            ctx.builder.emit(Opcode::PushToTemp);
                            ctx.builder.emit(step);
                            ctx.builder.emit(Opcode::SetObject);
                            ctx.builder.emit(Opcode::Pop);
                            ctx.builder.emit(Opcode::PopFromTemp);
                        }
                    }
                }
            }
            _ => return Err(RunError::internal("update on non-reference survived parsing")),
        }
        Ok(())
    }

    fn emit_assignment(
        &mut self,
        ctx: &mut FnCtx,
        op: AssignOp,
        target: &ExprNode,
        value: &ExprNode,
    ) -> RunResult<()> {
        match (&target.expr, op.binary_op()) {
            (Expr::Identifier(name), None) => {
                self.emit_expression(ctx, value)?;
                self.emit_ident_store(ctx, *name);
            }
            (Expr::Identifier(name), Some(binary)) => {
                self.emit_ident_read(ctx, *name);
                self.emit_expression(ctx, value)?;
                ctx.builder.emit(binary_opcode(binary));
                self.emit_ident_store(ctx, *name);
            }
            (Expr::Member { object, property }, None) => {
                self.emit_expression(ctx, object)?;
                match property {
                    MemberProp::Named(name) => {
                        self.emit_expression(ctx, value)?;
                        let site = ctx.builder.add_prop_ic();
                        ctx.builder
                            .emit_u16_u16(Opcode::SetObjectPreComputed, name.operand(), site);
                    }
                    MemberProp::Computed(key) => {
                        self.emit_expression(ctx, key)?;
                        self.emit_expression(ctx, value)?;
                        ctx.builder.emit(Opcode::SetObject);
                    }
                }
            }
            (Expr::Member { object, property }, Some(binary)) => {
                self.emit_expression(ctx, object)?;
                match property {
                    MemberProp::Named(name) => {
                        let read = ctx.builder.add_prop_ic();
                        ctx.builder
                            .emit_u16_u16(Opcode::GetObjectPreComputedWithPeeking, name.operand(), read);
                        self.emit_expression(ctx, value)?;
                        ctx.builder.emit(binary_opcode(binary));
                        let write = ctx.builder.add_prop_ic();
                        ctx.builder
                            .emit_u16_u16(Opcode::SetObjectPreComputed, name.operand(), write);
                    }
                    MemberProp::Computed(key) => {
                        self.emit_expression(ctx, key)?;
                        ctx.builder.emit(Opcode::GetObjectWithPeeking);
                        self.emit_expression(ctx, value)?;
                        ctx.builder.emit(binary_opcode(binary));
                        ctx.builder.emit(Opcode::SetObject);
                    }
                }
            }
            _ => return Err(RunError::internal("assignment to non-reference survived parsing")),
        }
        Ok(())
    }

    fn emit_call(&mut self, ctx: &mut FnCtx, callee: &ExprNode, arguments: &[ExprNode]) -> RunResult<()> {
        let argc = u16::try_from(arguments.len()).map_err(|_| RunError::range("Too many call arguments"))?;
        match &callee.expr {
            // syntactic eval call: resolve `eval` at runtime, direct-eval in
            // this environment when it is still the intrinsic
            Expr::Identifier(name) if *name == AtomId::from(StaticAtoms::Eval) => {
                for argument in arguments {
                    self.emit_expression(ctx, argument)?;
                }
                ctx.builder.emit_u16(Opcode::CallEvalFunction, argc);
            }
            Expr::Member { object, property } => {
                self.emit_expression(ctx, object)?;
                match property {
                    MemberProp::Named(name) => {
                        let constant = ctx.builder.add_const(Value::InternStr(*name));
                        ctx.builder.emit_u16(Opcode::Push, constant);
                    }
                    MemberProp::Computed(key) => self.emit_expression(ctx, key)?,
                }
                let site = ctx.builder.add_prop_ic();
                ctx.builder.emit_u16(Opcode::PrepareFunctionCall, site);
                for argument in arguments {
                    self.emit_expression(ctx, argument)?;
                }
                ctx.builder.emit_u16(Opcode::CallFunction, argc);
            }
            _ => {
                self.emit_expression(ctx, callee)?;
                ctx.builder.emit(Opcode::PushFunctionCallReceiver);
                for argument in arguments {
                    self.emit_expression(ctx, argument)?;
                }
                ctx.builder.emit_u16(Opcode::CallFunction, argc);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn emit_statement(&mut self, ctx: &mut FnCtx, node: &StmtNode) -> RunResult<()> {
        ctx.builder.set_location(node.range);
        // labels attach to the immediately following statement
        let takes_labels = matches!(
            node.stmt,
            Stmt::While { .. } | Stmt::DoWhile { .. } | Stmt::For { .. } | Stmt::ForIn { .. } | Stmt::Switch { .. }
        );
        if !takes_labels && !ctx.pending_labels.is_empty() && !matches!(node.stmt, Stmt::Labeled { .. }) {
            // labeled plain statement: the label is only a break target
            let names = std::mem::take(&mut ctx.pending_labels);
            let scope = LabelScope {
                names,
                is_loop: false,
                breakable: false,
                break_jumps: Vec::new(),
                continue_jumps: Vec::new(),
                guard_depth: ctx.guard_depth,
                break_sp: ctx.builder.stack_depth(),
                continue_sp: ctx.builder.stack_depth(),
            };
            ctx.labels.push(scope);
            self.emit_statement_unlabeled(ctx, node)?;
            let scope = ctx.labels.pop().expect("label scope pushed above");
            for jump in scope.break_jumps {
                ctx.builder.patch_jump(jump);
            }
            return Ok(());
        }
        self.emit_statement_unlabeled(ctx, node)
    }

    fn emit_statement_unlabeled(&mut self, ctx: &mut FnCtx, node: &StmtNode) -> RunResult<()> {
        match &node.stmt {
            Stmt::Empty | Stmt::Debugger => {}
            Stmt::Block(body) => {
                for stmt in body {
                    self.emit_statement(ctx, stmt)?;
                }
            }
            Stmt::Expression { expr, from_var_decl } => {
                self.emit_expression(ctx, expr)?;
                // program completion value tracks real expression
                // statements, not degraded var initializers
                if ctx.is_program && !*from_var_decl {
                    ctx.builder.emit(Opcode::PopExpressionStatement);
                } else {
                    ctx.builder.emit(Opcode::Pop);
                }
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.emit_expression(ctx, test)?;
                let to_else = ctx.builder.emit_jump(Opcode::JumpIfFalse);
                self.emit_statement(ctx, consequent)?;
                match alternate {
                    Some(alternate) => {
                        let to_end = ctx.builder.emit_jump(Opcode::Jump);
                        ctx.builder.patch_jump(to_else);
                        self.emit_statement(ctx, alternate)?;
                        ctx.builder.patch_jump(to_end);
                    }
                    None => ctx.builder.patch_jump(to_else),
                }
            }
            Stmt::While { test, body } => self.emit_while(ctx, test, body)?,
            Stmt::DoWhile { body, test } => self.emit_do_while(ctx, body, test)?,
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.emit_for(ctx, init.as_ref(), test.as_ref(), update.as_ref(), body)?,
            Stmt::ForIn { left, right, body } => self.emit_for_in(ctx, left, right, body)?,
            Stmt::Continue(label) => self.emit_continue(ctx, *label, node)?,
            Stmt::Break(label) => self.emit_break(ctx, *label, node)?,
            Stmt::Return(argument) => {
                match argument {
                    Some(expr) => {
                        self.emit_expression(ctx, expr)?;
                        ctx.builder.emit(Opcode::ReturnFunctionWithValue);
                    }
                    None => ctx.builder.emit(Opcode::ReturnFunction),
                }
            }
            Stmt::With { object, body } => {
                self.emit_expression(ctx, object)?;
                ctx.builder.emit(Opcode::EnterWithEnvironment);
                ctx.guard_depth += 1;
                let result = self.emit_statement(ctx, body);
                ctx.guard_depth -= 1;
                result?;
                ctx.builder.emit(Opcode::ExitEnvironment);
            }
            Stmt::Switch { discriminant, cases } => self.emit_switch(ctx, discriminant, cases)?,
            Stmt::Labeled { label, body } => {
                ctx.pending_labels.push(*label);
                self.emit_statement(ctx, body)?;
                // a loop consumed the pending label itself; a plain
                // statement consumed it in emit_statement
                ctx.pending_labels.retain(|l| l != label);
            }
            Stmt::Throw(argument) => {
                self.emit_expression(ctx, argument)?;
                ctx.builder.emit(Opcode::Throw);
            }
            Stmt::Try(stmt) => self.emit_try(ctx, stmt)?,
            Stmt::FunctionDecl(index) => {
                let def = self.program.function(*index);
                let name = def.name.ok_or_else(|| RunError::internal("function declaration without a name"))?;
                if ctx.is_program {
                    ctx.builder.emit_u16(Opcode::CreateBinding, name.operand());
                }
                self.emit_function_literal(ctx, *index)?;
                self.emit_ident_store(ctx, name);
                ctx.builder.emit(Opcode::Pop);
            }
        }
        Ok(())
    }

    fn begin_loop(&mut self, ctx: &mut FnCtx) -> usize {
        let names = std::mem::take(&mut ctx.pending_labels);
        let depth = ctx.builder.stack_depth();
        ctx.labels.push(LabelScope {
            names,
            is_loop: true,
            breakable: true,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            guard_depth: ctx.guard_depth,
            break_sp: depth,
            continue_sp: depth,
        });
        ctx.labels.len() - 1
    }

    /// Pops the scope and patches break edges to land here.
    fn end_loop(&mut self, ctx: &mut FnCtx, scope_index: usize) {
        let scope = ctx.labels.remove(scope_index);
        debug_assert_eq!(scope_index, ctx.labels.len());
        for jump in scope.break_jumps {
            ctx.builder.patch_jump(jump);
        }
    }

    fn emit_while(&mut self, ctx: &mut FnCtx, test: &ExprNode, body: &StmtNode) -> RunResult<()> {
        let scope_index = self.begin_loop(ctx);
        let loop_start = ctx.builder.current_offset();
        ctx.labels[scope_index].continue_sp = ctx.builder.stack_depth();
        ctx.builder.emit(Opcode::LoopStart);
        ctx.builder
            .emit_u16(Opcode::CheckStackPointer, ctx.builder.stack_depth());
        self.emit_expression(ctx, test)?;
        let exit = ctx.builder.emit_jump(Opcode::JumpIfFalse);
        self.emit_statement(ctx, body)?;
        // continue lands on the loop head
        let continue_jumps = std::mem::take(&mut ctx.labels[scope_index].continue_jumps);
        for jump in continue_jumps {
            ctx.builder.patch_jump(jump);
        }
        ctx.builder.emit_jump_to(Opcode::Jump, loop_start);
        ctx.builder.patch_jump(exit);
        self.end_loop(ctx, scope_index);
        Ok(())
    }

    fn emit_do_while(&mut self, ctx: &mut FnCtx, body: &StmtNode, test: &ExprNode) -> RunResult<()> {
        let scope_index = self.begin_loop(ctx);
        let loop_start = ctx.builder.current_offset();
        ctx.builder.emit(Opcode::LoopStart);
        ctx.builder
            .emit_u16(Opcode::CheckStackPointer, ctx.builder.stack_depth());
        self.emit_statement(ctx, body)?;
        // continue lands on the condition
        let continue_jumps = std::mem::take(&mut ctx.labels[scope_index].continue_jumps);
        for jump in continue_jumps {
            ctx.builder.patch_jump(jump);
        }
        self.emit_expression(ctx, test)?;
        ctx.builder.emit_jump_to(Opcode::JumpIfTrue, loop_start);
        self.end_loop(ctx, scope_index);
        Ok(())
    }

    fn emit_for(
        &mut self,
        ctx: &mut FnCtx,
        init: Option<&ExprNode>,
        test: Option<&ExprNode>,
        update: Option<&ExprNode>,
        body: &StmtNode,
    ) -> RunResult<()> {
        if let Some(init) = init {
            self.emit_expression(ctx, init)?;
            ctx.builder.emit(Opcode::Pop);
        }
        let scope_index = self.begin_loop(ctx);
        let loop_start = ctx.builder.current_offset();
        ctx.builder.emit(Opcode::LoopStart);
        ctx.builder
            .emit_u16(Opcode::CheckStackPointer, ctx.builder.stack_depth());
        let exit = match test {
            Some(test) => {
                self.emit_expression(ctx, test)?;
                Some(ctx.builder.emit_jump(Opcode::JumpIfFalse))
            }
            None => None,
        };
        self.emit_statement(ctx, body)?;
        // continue lands on the update clause
        let continue_jumps = std::mem::take(&mut ctx.labels[scope_index].continue_jumps);
        for jump in continue_jumps {
            ctx.builder.patch_jump(jump);
        }
        if let Some(update) = update {
            self.emit_expression(ctx, update)?;
            ctx.builder.emit(Opcode::Pop);
        }
        ctx.builder.emit_jump_to(Opcode::Jump, loop_start);
        if let Some(exit) = exit {
            ctx.builder.patch_jump(exit);
        }
        self.end_loop(ctx, scope_index);
        Ok(())
    }

    fn emit_for_in(&mut self, ctx: &mut FnCtx, left: &ExprNode, right: &ExprNode, body: &StmtNode) -> RunResult<()> {
        self.emit_expression(ctx, right)?;
        ctx.builder.emit(Opcode::EnumerateObject);
        // the enumeration state lives on the operand stack for the whole
        // loop; break/continue targets sit above it
        let scope_index = self.begin_loop(ctx);
        ctx.labels[scope_index].break_sp = ctx.builder.stack_depth();
        ctx.labels[scope_index].continue_sp = ctx.builder.stack_depth();
        let loop_start = ctx.builder.current_offset();
        ctx.builder.emit(Opcode::LoopStart);
        ctx.builder
            .emit_u16(Opcode::CheckStackPointer, ctx.builder.stack_depth());
        let exit = ctx.builder.emit_jump(Opcode::EnumerateObjectKey);
        self.emit_store_key(ctx, left)?;
        ctx.builder.emit(Opcode::Pop);
        self.emit_statement(ctx, body)?;
        let continue_jumps = std::mem::take(&mut ctx.labels[scope_index].continue_jumps);
        for jump in continue_jumps {
            ctx.builder.patch_jump(jump);
        }
        ctx.builder.emit_jump_to(Opcode::Jump, loop_start);
        ctx.builder.patch_jump(exit);
        ctx.builder.set_stack_depth(ctx.labels[scope_index].break_sp);
        self.end_loop(ctx, scope_index);
        ctx.builder.emit(Opcode::Pop);
        Ok(())
    }

    /// Stores the key pushed by `EnumerateObjectKey` into the for-in target,
    /// leaving the key on the stack (the caller pops it).
    fn emit_store_key(&mut self, ctx: &mut FnCtx, left: &ExprNode) -> RunResult<()> {
        match &left.expr {
            Expr::Identifier(name) => {
                self.emit_ident_store(ctx, *name);
            }
            Expr::Member { object, property } => {
                ctx.builder.emit(Opcode::PushToTemp);
                self.emit_expression(ctx, object)?;
                match property {
                    MemberProp::Named(name) => {
                        ctx.builder.emit(Opcode::PopFromTemp);
                        let site = ctx.builder.add_prop_ic();
                        ctx.builder
                            .emit_u16_u16(Opcode::SetObjectPreComputed, name.operand(), site);
                    }
                    MemberProp::Computed(key) => {
                        self.emit_expression(ctx, key)?;
                        ctx.builder.emit(Opcode::PopFromTemp);
                        ctx.builder.emit(Opcode::SetObject);
                    }
                }
            }
            _ => return Err(RunError::internal("for-in target is not a reference")),
        }
        Ok(())
    }

    fn emit_switch(&mut self, ctx: &mut FnCtx, discriminant: &ExprNode, cases: &[SwitchCase]) -> RunResult<()> {
        let scope_index = self.begin_loop(ctx);
        ctx.labels[scope_index].is_loop = false;
        self.emit_expression(ctx, discriminant)?;

        // dispatch: one strict-equality test per case clause in order
        let mut body_jumps: Vec<(usize, JumpLabel)> = Vec::new();
        let mut default_index: Option<usize> = None;
        for (index, case) in cases.iter().enumerate() {
            match &case.test {
                Some(test) => {
                    ctx.builder.emit(Opcode::Dup);
                    self.emit_expression(ctx, test)?;
                    ctx.builder.emit(Opcode::StrictEqual);
                    let miss = ctx.builder.emit_jump(Opcode::JumpIfFalse);
                    ctx.builder.emit(Opcode::Pop);
                    let hit = ctx.builder.emit_jump(Opcode::Jump);
                    body_jumps.push((index, hit));
                    ctx.builder.patch_jump(miss);
                    ctx.builder.adjust_stack_depth(1);
                }
                None => default_index = Some(index),
            }
        }
        ctx.builder.emit(Opcode::Pop);
        let fallback = ctx.builder.emit_jump(Opcode::Jump);

        // bodies in order; fallthrough is sequential execution
        let mut body_offsets: Vec<usize> = Vec::with_capacity(cases.len());
        for case in cases {
            body_offsets.push(ctx.builder.current_offset());
            ctx.builder.set_stack_depth(ctx.labels[scope_index].break_sp);
            for stmt in &case.body {
                self.emit_statement(ctx, stmt)?;
            }
        }
        // patch dispatch edges
        for (index, label) in body_jumps {
            patch_jump_to(ctx, label, body_offsets[index]);
        }
        match default_index {
            Some(index) => patch_jump_to(ctx, fallback, body_offsets[index]),
            None => ctx.builder.patch_jump(fallback),
        }
        self.end_loop(ctx, scope_index);
        Ok(())
    }

    fn emit_break(&mut self, ctx: &mut FnCtx, label: Option<AtomId>, node: &StmtNode) -> RunResult<()> {
        let Some(index) = find_label_scope(ctx, label, false) else {
            return Err(RunError::syntax("Illegal break statement", node.range.line));
        };
        let crossing = ctx.guard_depth - ctx.labels[index].guard_depth;
        let target_sp = ctx.labels[index].break_sp;
        let jump = if crossing == 0 {
            let pops = ctx.builder.stack_depth().saturating_sub(target_sp);
            for _ in 0..pops {
                ctx.builder.emit(Opcode::Pop);
            }
            let jump = ctx.builder.emit_jump(Opcode::Jump);
            ctx.builder.set_stack_depth(target_sp + pops);
            jump
        } else {
            ctx.builder.emit_jump_complex(
                COMPLEX_JUMP_BREAK,
                u8::try_from(crossing).map_err(|_| RunError::range("Guard nesting too deep"))?,
                target_sp,
            )
        };
        ctx.labels[index].break_jumps.push(jump);
        Ok(())
    }

    fn emit_continue(&mut self, ctx: &mut FnCtx, label: Option<AtomId>, node: &StmtNode) -> RunResult<()> {
        let Some(index) = find_label_scope(ctx, label, true) else {
            return Err(RunError::syntax("Illegal continue statement", node.range.line));
        };
        let crossing = ctx.guard_depth - ctx.labels[index].guard_depth;
        let target_sp = ctx.labels[index].continue_sp;
        let jump = if crossing == 0 {
            let pops = ctx.builder.stack_depth().saturating_sub(target_sp);
            for _ in 0..pops {
                ctx.builder.emit(Opcode::Pop);
            }
            let jump = ctx.builder.emit_jump(Opcode::Jump);
            ctx.builder.set_stack_depth(target_sp + pops);
            jump
        } else {
            ctx.builder.emit_jump_complex(
                COMPLEX_JUMP_CONTINUE,
                u8::try_from(crossing).map_err(|_| RunError::range("Guard nesting too deep"))?,
                target_sp,
            )
        };
        ctx.labels[index].continue_jumps.push(jump);
        Ok(())
    }

    fn emit_try(&mut self, ctx: &mut FnCtx, stmt: &TryStmt) -> RunResult<()> {
        let catch_param = stmt.handler.as_ref().map_or(NO_CATCH_PARAM, |h| h.param.operand());
        let (catch_label, finally_label) = ctx.builder.emit_try(catch_param);
        let base_depth = ctx.builder.stack_depth();
        ctx.guard_depth += 1;

        let result: RunResult<()> = (|| {
            for inner in &stmt.block {
                self.emit_statement(ctx, inner)?;
            }
            let body_end = ctx.builder.emit_jump(Opcode::TryCatchBodyEnd);
            let mut end_jumps = vec![body_end];

            if let Some(handler) = &stmt.handler {
                ctx.builder.patch_jump(catch_label);
                ctx.builder.set_stack_depth(base_depth);
                self.active_catch_params.push(handler.param);
                let catch_result: RunResult<()> = (|| {
                    for inner in &handler.body {
                        self.emit_statement(ctx, inner)?;
                    }
                    Ok(())
                })();
                self.active_catch_params.pop();
                catch_result?;
                end_jumps.push(ctx.builder.emit_jump(Opcode::TryCatchBodyEnd));
            }

            match &stmt.finalizer {
                Some(finalizer) => {
                    ctx.builder.patch_jump(finally_label);
                    ctx.builder.set_stack_depth(base_depth);
                    for jump in end_jumps {
                        ctx.builder.patch_jump(jump);
                    }
                    for inner in finalizer {
                        self.emit_statement(ctx, inner)?;
                    }
                    ctx.builder.emit(Opcode::FinallyEnd);
                }
                None => {
                    for jump in end_jumps {
                        ctx.builder.patch_jump(jump);
                    }
                }
            }
            Ok(())
        })();
        ctx.guard_depth -= 1;
        result
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Plus => Opcode::Plus,
        BinaryOp::Minus => Opcode::Minus,
        BinaryOp::Multiply => Opcode::Multiply,
        BinaryOp::Division => Opcode::Division,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Equal => Opcode::Equal,
        BinaryOp::NotEqual => Opcode::NotEqual,
        BinaryOp::StrictEqual => Opcode::StrictEqual,
        BinaryOp::NotStrictEqual => Opcode::NotStrictEqual,
        BinaryOp::LessThan => Opcode::LessThan,
        BinaryOp::LessThanOrEqual => Opcode::LessThanOrEqual,
        BinaryOp::GreaterThan => Opcode::GreaterThan,
        BinaryOp::GreaterThanOrEqual => Opcode::GreaterThanOrEqual,
        BinaryOp::BitwiseAnd => Opcode::BitwiseAnd,
        BinaryOp::BitwiseOr => Opcode::BitwiseOr,
        BinaryOp::BitwiseXor => Opcode::BitwiseXor,
        BinaryOp::LeftShift => Opcode::LeftShift,
        BinaryOp::SignedRightShift => Opcode::SignedRightShift,
        BinaryOp::UnsignedRightShift => Opcode::UnsignedRightShift,
        BinaryOp::In => Opcode::StringIn,
        BinaryOp::InstanceOf => Opcode::InstanceOf,
    }
}

/// Finds the innermost matching label scope: by name when labeled, else the
/// innermost loop (or any breakable for `break`).
fn find_label_scope(ctx: &FnCtx, label: Option<AtomId>, for_continue: bool) -> Option<usize> {
    match label {
        Some(name) => ctx
            .labels
            .iter()
            .rposition(|scope| scope.names.contains(&name) && (!for_continue || scope.is_loop)),
        None => ctx
            .labels
            .iter()
            .rposition(|scope| if for_continue { scope.is_loop } else { scope.breakable }),
    }
}

/// Patches a forward jump to a target already emitted (switch dispatch).
fn patch_jump_to(ctx: &mut FnCtx, label: JumpLabel, target: usize) {
    ctx.builder.patch_jump_to(label, target);
}
