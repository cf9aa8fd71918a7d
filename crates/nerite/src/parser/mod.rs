//! Recursive-descent parser for ECMAScript 5.1.
//!
//! Statements, declarations, directive prologues, and function parsing live
//! here; expression parsing (including the cover-grammar discipline) is in
//! [`expr`]. The parser owns the lexer and keeps a one-token lookahead.
//!
//! Hoisting happens during parsing: `var` declarators register their name in
//! the enclosing function scope and degrade in place to plain assignment
//! expressions, and function declarations are moved to the front of the
//! finished body so instantiation precedes all executable statements.
//!
//! ES2015 syntax (classes, arrow functions, template literals, rest/spread,
//! `const`) is detected and rejected with a fixed diagnostic rather than
//! half-parsed.

mod expr;

use crate::{
    ast::{CatchClause, Expr, ExprNode, FunctionDef, FunctionIndex, ProgramAst, ScopeInfo, Stmt, StmtNode, SwitchCase,
          TryStmt},
    atom::{AtomId, AtomTable, StaticAtoms},
    error::{RunError, RunResult, STACK_OVERFLOW_MESSAGE},
    lexer::{Keyword, Lexer, Punct, Token, TokenKind},
    source::{CodeRange, SourceBuffer},
};

/// Maximum recursive-descent depth before the parser raises
/// `RangeError: Maximum call stack size exceeded`.
///
/// Debug builds use a lower bound because unoptimized stack frames are much
/// larger.
#[cfg(not(debug_assertions))]
pub const MAX_PARSE_DEPTH: u32 = 1024;
#[cfg(debug_assertions)]
pub const MAX_PARSE_DEPTH: u32 = 128;

/// Shared parser flags.
///
/// `is_binding_element` / `is_assignment_target` implement the cover-grammar
/// discipline: sub-expression parsers tighten them, and the isolate/inherit
/// helpers in `expr.rs` save and restore them so parsers stay reentrant.
#[derive(Debug)]
pub(crate) struct ParseContext {
    pub strict: bool,
    pub allow_in: bool,
    pub in_iteration: bool,
    pub in_switch: bool,
    pub in_function_body: bool,
    pub is_binding_element: bool,
    pub is_assignment_target: bool,
    /// Deferred diagnostic for `{a = 1}`-style cover-initialized names; fires
    /// unless the surrounding context turns out to accept a pattern (it never
    /// does in ES5, so the error always fires once the expression completes).
    pub first_cover_initialized_name_error: Option<(String, u32)>,
    /// Active labels: `(name, labels_a_loop)`.
    pub label_set: Vec<(AtomId, bool)>,
}

impl ParseContext {
    fn new(strict: bool) -> Self {
        Self {
            strict,
            allow_in: true,
            in_iteration: false,
            in_switch: false,
            in_function_body: false,
            is_binding_element: true,
            is_assignment_target: true,
            first_cover_initialized_name_error: None,
            label_set: Vec::new(),
        }
    }
}

pub(crate) struct Parser<'a> {
    lexer: Lexer<'a>,
    source: &'a SourceBuffer,
    pub(crate) atoms: &'a mut AtomTable,
    pub(crate) lookahead: Token,
    pub(crate) ctx: ParseContext,
    /// Function scope stack; index 0 is the program scope.
    scopes: Vec<ScopeInfo>,
    /// Completed function definitions, indexed by [`FunctionIndex`].
    functions: Vec<FunctionDef>,
    depth: u32,
    /// End offset of the most recently consumed token, for node ranges.
    last_end: u32,
}

/// Parses a complete program.
pub fn parse_program(source: &SourceBuffer, atoms: &mut AtomTable, strict: bool) -> RunResult<ProgramAst> {
    let mut parser = Parser::new(source, atoms, strict)?;
    parser.parse_program()
}

/// Parses the pieces of a dynamically constructed function: a comma-separated
/// formal parameter list and a function body, as used by the `Function`
/// constructor surface.
pub fn parse_function_source(
    params_src: &str,
    body_source: &SourceBuffer,
    atoms: &mut AtomTable,
) -> RunResult<(Vec<AtomId>, ProgramAst)> {
    // The parameter list is itself parsed with the full lexer so escapes and
    // comments behave identically to inline source.
    let params_buffer = SourceBuffer::new(params_src);
    let mut params = Vec::new();
    {
        let mut parser = Parser::new(&params_buffer, atoms, false)?;
        if parser.lookahead.kind != TokenKind::Eof {
            loop {
                let name = parser.expect_identifier()?;
                params.push(name);
                if parser.lookahead.kind == TokenKind::Eof {
                    break;
                }
                parser.expect_punct(Punct::Comma)?;
            }
        }
    }

    let mut parser = Parser::new(body_source, atoms, false)?;
    parser.ctx.in_function_body = true;
    let program = parser.parse_program()?;
    Ok((params, program))
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a SourceBuffer, atoms: &'a mut AtomTable, strict: bool) -> RunResult<Self> {
        let mut lexer = Lexer::new(source);
        let lookahead = lexer.next_token()?;
        Ok(Self {
            lexer,
            source,
            atoms,
            lookahead,
            ctx: ParseContext::new(strict),
            scopes: vec![ScopeInfo::default()],
            functions: Vec::new(),
            depth: 0,
            last_end: 0,
        })
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    /// Consumes the lookahead and refills it, returning the consumed token.
    pub(crate) fn next_token(&mut self) -> RunResult<Token> {
        let next = self.lexer.next_token()?;
        self.last_end = self.lookahead.end;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    pub(crate) fn throw_unexpected(&self, token: &Token) -> RunError {
        let message = match token.kind {
            TokenKind::Eof => "Unexpected end of input".to_owned(),
            TokenKind::NumericLiteral => "Unexpected number".to_owned(),
            TokenKind::StringLiteral => "Unexpected string".to_owned(),
            TokenKind::Template => "Template literals are not supported".to_owned(),
            TokenKind::Keyword => match token.keyword {
                Some(Keyword::Class) => "Class declarations are not supported".to_owned(),
                Some(Keyword::Const) => "const declarations are not supported".to_owned(),
                Some(Keyword::Super | Keyword::Export | Keyword::Import | Keyword::Extends | Keyword::Enum) => {
                    "Unexpected reserved word".to_owned()
                }
                _ => format!("Unexpected token {}", token.describe()),
            },
            TokenKind::Punctuator => match token.punct {
                Some(Punct::Arrow) => "Arrow functions are not supported".to_owned(),
                Some(Punct::Ellipsis) => "Rest and spread syntax is not supported".to_owned(),
                _ => format!("Unexpected token {}", token.describe()),
            },
            _ => format!("Unexpected token {}", token.describe()),
        };
        RunError::syntax(message, token.line_number)
    }

    pub(crate) fn expect_punct(&mut self, p: Punct) -> RunResult<Token> {
        if self.lookahead.is_punct(p) {
            self.next_token()
        } else {
            Err(self.throw_unexpected(&self.lookahead))
        }
    }

    pub(crate) fn expect_keyword(&mut self, k: Keyword) -> RunResult<Token> {
        if self.lookahead.is_keyword(k) {
            self.next_token()
        } else {
            Err(self.throw_unexpected(&self.lookahead))
        }
    }

    /// Consumes the lookahead if it is the given punctuator.
    pub(crate) fn eat_punct(&mut self, p: Punct) -> RunResult<bool> {
        if self.lookahead.is_punct(p) {
            self.next_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Parses an identifier token into an atom, applying strict-mode
    /// reserved-word policing.
    pub(crate) fn expect_identifier(&mut self) -> RunResult<AtomId> {
        if self.lookahead.kind != TokenKind::Identifier {
            return Err(self.throw_unexpected(&self.lookahead));
        }
        let tok = self.next_token()?;
        let name = tok.ident_text().unwrap_or_default();
        if self.ctx.strict && is_strict_reserved_word(name) {
            return Err(RunError::syntax(
                "Use of future reserved word in strict mode",
                tok.line_number,
            ));
        }
        Ok(self.atoms.intern_str(name))
    }

    /// Whether an identifier spelling is `eval` or `arguments`.
    pub(crate) fn is_restricted_word(&self, id: AtomId) -> bool {
        id == AtomId::from(StaticAtoms::Eval) || id == AtomId::from(StaticAtoms::Arguments)
    }

    /// Automatic semicolon insertion: an explicit `;`, a `}`, end of input,
    /// or a crossed line terminator all end the statement.
    pub(crate) fn consume_semicolon(&mut self) -> RunResult<()> {
        if self.lookahead.is_punct(Punct::Semicolon) {
            self.next_token()?;
            return Ok(());
        }
        if self.lookahead.preceded_by_newline
            || self.lookahead.kind == TokenKind::Eof
            || self.lookahead.is_punct(Punct::RBrace)
        {
            return Ok(());
        }
        Err(self.throw_unexpected(&self.lookahead))
    }

    /// Recursion-depth guard shared by statement and expression descent.
    pub(crate) fn enter(&mut self) -> RunResult<DepthGuard> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(RunError::range(STACK_OVERFLOW_MESSAGE).with_line(self.lookahead.line_number));
        }
        Ok(DepthGuard)
    }

    pub(crate) fn leave(&mut self, _guard: DepthGuard) {
        self.depth -= 1;
    }

    pub(crate) fn finish_range(&self, start: &Token) -> CodeRange {
        CodeRange::new(start.start, self.last_end, start.line_number)
    }

    pub(crate) fn scope_mut(&mut self) -> &mut ScopeInfo {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    /// True while parsing inside some function (not at program level).
    pub(crate) fn in_function(&self) -> bool {
        self.scopes.len() > 1
    }

    pub(crate) fn add_function(&mut self, def: FunctionDef) -> FunctionIndex {
        let index = FunctionIndex(u32::try_from(self.functions.len()).expect("function table exceeds u32"));
        self.functions.push(def);
        index
    }

    // ------------------------------------------------------------------
    // Program and directive prologue
    // ------------------------------------------------------------------

    fn parse_program(&mut self) -> RunResult<ProgramAst> {
        let mut body = Vec::new();
        self.parse_directive_prologues(&mut body)?;
        while self.lookahead.kind != TokenKind::Eof {
            body.push(self.parse_statement()?);
        }
        rearrange_declarations(&mut body);
        let scope = std::mem::take(&mut self.scopes[0]);
        Ok(ProgramAst {
            body,
            scope,
            functions: std::mem::take(&mut self.functions),
            is_strict: self.ctx.strict,
        })
    }

    /// Scans the directive prologue. The first `"use strict"` directive
    /// promotes strict mode; octal-flagged string tokens seen before the
    /// promotion make the prologue retroactively illegal.
    fn parse_directive_prologues(&mut self, body: &mut Vec<StmtNode>) -> RunResult<()> {
        let mut first_restricted: Option<u32> = None;
        while self.lookahead.kind == TokenKind::StringLiteral {
            let token = self.lookahead.clone();
            let stmt = self.parse_statement()?;
            // Only a plain string-literal expression statement is a directive.
            let is_directive = matches!(
                &stmt.stmt,
                Stmt::Expression { expr, .. } if matches!(expr.expr, Expr::Literal(crate::ast::Lit::Str(_)))
            );
            body.push(stmt);
            if !is_directive {
                break;
            }
            // Compare the raw source characters: escapes disqualify the
            // directive ("use\x20strict" is not a directive).
            let raw = self
                .source
                .slice_string(token.start as usize + 1, token.end as usize - 1);
            if raw == "use strict" {
                self.ctx.strict = true;
                if let Some(line) = first_restricted {
                    return Err(RunError::syntax("Octal literals are not allowed in strict mode.", line));
                }
            } else if first_restricted.is_none() && token.octal {
                first_restricted = Some(token.line_number);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub(crate) fn parse_statement(&mut self) -> RunResult<StmtNode> {
        let guard = self.enter()?;
        let result = self.parse_statement_inner();
        self.leave(guard);
        result
    }

    fn parse_statement_inner(&mut self) -> RunResult<StmtNode> {
        let start = self.lookahead.clone();
        let stmt = match self.lookahead.kind {
            TokenKind::Keyword => match self.lookahead.keyword.expect("keyword token carries keyword") {
                Keyword::Var => self.parse_variable_statement()?,
                Keyword::If => self.parse_if_statement()?,
                Keyword::Do => self.parse_do_while_statement()?,
                Keyword::While => self.parse_while_statement()?,
                Keyword::For => self.parse_for_statement()?,
                Keyword::Continue => self.parse_continue_statement()?,
                Keyword::Break => self.parse_break_statement()?,
                Keyword::Return => self.parse_return_statement()?,
                Keyword::With => self.parse_with_statement()?,
                Keyword::Switch => self.parse_switch_statement()?,
                Keyword::Throw => self.parse_throw_statement()?,
                Keyword::Try => self.parse_try_statement()?,
                Keyword::Debugger => {
                    self.next_token()?;
                    self.consume_semicolon()?;
                    Stmt::Debugger
                }
                Keyword::Function => {
                    let index = self.parse_function_declaration()?;
                    Stmt::FunctionDecl(index)
                }
                _ => return Err(self.throw_unexpected(&self.lookahead)),
            },
            TokenKind::Punctuator => match self.lookahead.punct {
                Some(Punct::LBrace) => Stmt::Block(self.parse_block_body()?),
                Some(Punct::Semicolon) => {
                    self.next_token()?;
                    Stmt::Empty
                }
                _ => self.parse_expression_or_labeled_statement()?,
            },
            TokenKind::Identifier => self.parse_expression_or_labeled_statement()?,
            _ => self.parse_expression_or_labeled_statement()?,
        };
        Ok(StmtNode::new(stmt, self.finish_range(&start)))
    }

    fn parse_block_body(&mut self) -> RunResult<Vec<StmtNode>> {
        self.expect_punct(Punct::LBrace)?;
        let mut body = Vec::new();
        while !self.lookahead.is_punct(Punct::RBrace) {
            if self.lookahead.kind == TokenKind::Eof {
                return Err(self.throw_unexpected(&self.lookahead));
            }
            body.push(self.parse_statement()?);
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(body)
    }

    /// `var` statement: names hoist into the function scope, initializers
    /// degrade to assignment expression statements.
    fn parse_variable_statement(&mut self) -> RunResult<Stmt> {
        self.expect_keyword(Keyword::Var)?;
        let assignments = self.parse_variable_declaration_list()?;
        self.consume_semicolon()?;
        Ok(var_declarations_to_statement(assignments))
    }

    /// Parses `x = init, y, z = init2` after `var`, returning the
    /// initializer assignments (declarators without initializers vanish).
    pub(crate) fn parse_variable_declaration_list(&mut self) -> RunResult<Vec<ExprNode>> {
        let mut assignments = Vec::new();
        loop {
            let start = self.lookahead.clone();
            let name = self.expect_identifier()?;
            if self.ctx.strict && self.is_restricted_word(name) {
                return Err(RunError::syntax(
                    "Variable name may not be eval or arguments in strict mode",
                    start.line_number,
                ));
            }
            self.scope_mut().declare_var(name);
            if self.eat_punct(Punct::Assign)? {
                let init = self.isolate_cover_grammar(Parser::parse_assignment_expression)?;
                let range = self.finish_range(&start);
                let target = ExprNode::new(Expr::Identifier(name), CodeRange::new(start.start, start.end, start.line_number));
                assignments.push(ExprNode::new(
                    Expr::Assignment {
                        op: crate::ast::AssignOp::Assign,
                        target: Box::new(target),
                        value: Box::new(init),
                    },
                    range,
                ));
            }
            if !self.eat_punct(Punct::Comma)? {
                break;
            }
        }
        Ok(assignments)
    }

    fn parse_if_statement(&mut self) -> RunResult<Stmt> {
        self.expect_keyword(Keyword::If)?;
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.lookahead.is_keyword(Keyword::Else) {
            self.next_token()?;
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_iteration_body(&mut self) -> RunResult<Box<StmtNode>> {
        let saved = self.ctx.in_iteration;
        self.ctx.in_iteration = true;
        let body = self.parse_statement();
        self.ctx.in_iteration = saved;
        Ok(Box::new(body?))
    }

    fn parse_do_while_statement(&mut self) -> RunResult<Stmt> {
        self.expect_keyword(Keyword::Do)?;
        let body = self.parse_iteration_body()?;
        self.expect_keyword(Keyword::While)?;
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        // the semicolon after do-while is optional even without a newline
        let _ = self.eat_punct(Punct::Semicolon)?;
        Ok(Stmt::DoWhile { body, test })
    }

    fn parse_while_statement(&mut self) -> RunResult<Stmt> {
        self.expect_keyword(Keyword::While)?;
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        let body = self.parse_iteration_body()?;
        Ok(Stmt::While { test, body })
    }

    /// `for (init; test; update)` and `for (lhs in obj)`, including the
    /// `var`-declaration forms of both. `allow_in` is cleared while parsing
    /// the init so the `in` operator cannot swallow the enumeration form.
    fn parse_for_statement(&mut self) -> RunResult<Stmt> {
        self.expect_keyword(Keyword::For)?;
        self.expect_punct(Punct::LParen)?;

        let mut init: Option<ExprNode> = None;
        let mut for_in_left: Option<ExprNode> = None;
        let mut for_in_right: Option<ExprNode> = None;

        if self.lookahead.is_punct(Punct::Semicolon) {
            self.next_token()?;
        } else if self.lookahead.is_keyword(Keyword::Var) {
            self.next_token()?;
            let start = self.lookahead.clone();
            let name = self.expect_identifier()?;
            if self.ctx.strict && self.is_restricted_word(name) {
                return Err(RunError::syntax(
                    "Variable name may not be eval or arguments in strict mode",
                    start.line_number,
                ));
            }
            self.scope_mut().declare_var(name);
            let ident_range = CodeRange::new(start.start, start.end, start.line_number);

            if self.lookahead.is_keyword(Keyword::In) {
                self.next_token()?;
                for_in_left = Some(ExprNode::new(Expr::Identifier(name), ident_range));
                for_in_right = Some(self.parse_expression()?);
            } else {
                // first declarator (possibly initialized), then either more
                // declarators or `in` (only legal right after a bare first
                // declarator with initializer is rejected by the grammar, but
                // Annex-B-tolerant engines accept it; we follow the strict
                // grammar and reject).
                let mut assignments = Vec::new();
                if self.eat_punct(Punct::Assign)? {
                    let saved_allow_in = self.ctx.allow_in;
                    self.ctx.allow_in = false;
                    let init_expr = self.isolate_cover_grammar(Parser::parse_assignment_expression);
                    self.ctx.allow_in = saved_allow_in;
                    let init_expr = init_expr?;
                    let range = self.finish_range(&start);
                    assignments.push(ExprNode::new(
                        Expr::Assignment {
                            op: crate::ast::AssignOp::Assign,
                            target: Box::new(ExprNode::new(Expr::Identifier(name), ident_range)),
                            value: Box::new(init_expr),
                        },
                        range,
                    ));
                }
                if self.eat_punct(Punct::Comma)? {
                    let saved_allow_in = self.ctx.allow_in;
                    self.ctx.allow_in = false;
                    let more = self.parse_variable_declaration_list();
                    self.ctx.allow_in = saved_allow_in;
                    assignments.extend(more?);
                }
                self.expect_punct(Punct::Semicolon)?;
                if !assignments.is_empty() {
                    let range = assignments
                        .iter()
                        .map(|a| a.range)
                        .reduce(CodeRange::to)
                        .expect("non-empty assignment list");
                    init = Some(if assignments.len() == 1 {
                        assignments.pop().expect("one assignment")
                    } else {
                        ExprNode::new(Expr::Sequence(assignments), range)
                    });
                }
            }
        } else {
            let saved_allow_in = self.ctx.allow_in;
            self.ctx.allow_in = false;
            let first = self.inherit_cover_grammar(Parser::parse_expression_base);
            self.ctx.allow_in = saved_allow_in;
            let first = first?;

            if self.lookahead.is_keyword(Keyword::In) {
                if !self.ctx.is_assignment_target || !first.expr.is_reference() {
                    return Err(RunError::simple(
                        crate::error::ErrorKind::ReferenceError,
                        "Invalid left-hand side in for-in",
                    ));
                }
                self.next_token()?;
                for_in_left = Some(first);
                for_in_right = Some(self.parse_expression()?);
            } else {
                // continue a comma expression if needed, then the `;`
                let full = self.finish_sequence_expression(first)?;
                init = Some(full);
                self.expect_punct(Punct::Semicolon)?;
            }
        }

        if let (Some(left), Some(right)) = (for_in_left, for_in_right) {
            self.expect_punct(Punct::RParen)?;
            let body = self.parse_iteration_body()?;
            return Ok(Stmt::ForIn {
                left: Box::new(left),
                right,
                body,
            });
        }

        let test = if self.lookahead.is_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::Semicolon)?;
        let update = if self.lookahead.is_punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = self.parse_iteration_body()?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_continue_statement(&mut self) -> RunResult<Stmt> {
        let kw = self.expect_keyword(Keyword::Continue)?;
        // `continue \n label` is `continue;` by the restricted production
        if self.lookahead.kind == TokenKind::Identifier && !self.lookahead.preceded_by_newline {
            let tok = self.lookahead.clone();
            let label = self.expect_identifier()?;
            let found = self.ctx.label_set.iter().find(|(name, _)| *name == label);
            match found {
                None => {
                    return Err(RunError::syntax(
                        format!("Undefined label '{}'", self.atoms.text(label)),
                        tok.line_number,
                    ));
                }
                Some((_, is_loop)) if !is_loop => {
                    return Err(RunError::syntax("Illegal continue statement", tok.line_number));
                }
                Some(_) => {}
            }
            self.consume_semicolon()?;
            return Ok(Stmt::Continue(Some(label)));
        }
        self.consume_semicolon()?;
        if !self.ctx.in_iteration {
            return Err(RunError::syntax("Illegal continue statement", kw.line_number));
        }
        Ok(Stmt::Continue(None))
    }

    fn parse_break_statement(&mut self) -> RunResult<Stmt> {
        let kw = self.expect_keyword(Keyword::Break)?;
        if self.lookahead.kind == TokenKind::Identifier && !self.lookahead.preceded_by_newline {
            let tok = self.lookahead.clone();
            let label = self.expect_identifier()?;
            if !self.ctx.label_set.iter().any(|(name, _)| *name == label) {
                return Err(RunError::syntax(
                    format!("Undefined label '{}'", self.atoms.text(label)),
                    tok.line_number,
                ));
            }
            self.consume_semicolon()?;
            return Ok(Stmt::Break(Some(label)));
        }
        self.consume_semicolon()?;
        if !self.ctx.in_iteration && !self.ctx.in_switch {
            return Err(RunError::syntax("Illegal break statement", kw.line_number));
        }
        Ok(Stmt::Break(None))
    }

    fn parse_return_statement(&mut self) -> RunResult<Stmt> {
        let kw = self.expect_keyword(Keyword::Return)?;
        if !self.ctx.in_function_body {
            return Err(RunError::syntax("Illegal return statement", kw.line_number));
        }
        // restricted production: `return \n expr` returns undefined
        let argument = if self.lookahead.preceded_by_newline
            || self.lookahead.is_punct(Punct::Semicolon)
            || self.lookahead.is_punct(Punct::RBrace)
            || self.lookahead.kind == TokenKind::Eof
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_semicolon()?;
        Ok(Stmt::Return(argument))
    }

    fn parse_with_statement(&mut self) -> RunResult<Stmt> {
        let kw = self.expect_keyword(Keyword::With)?;
        if self.ctx.strict {
            return Err(RunError::syntax(
                "Strict mode code may not include a with statement",
                kw.line_number,
            ));
        }
        self.expect_punct(Punct::LParen)?;
        let object = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        self.scope_mut().has_with = true;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::With { object, body })
    }

    fn parse_switch_statement(&mut self) -> RunResult<Stmt> {
        self.expect_keyword(Keyword::Switch)?;
        self.expect_punct(Punct::LParen)?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        self.expect_punct(Punct::LBrace)?;

        let saved = self.ctx.in_switch;
        self.ctx.in_switch = true;
        let mut cases = Vec::new();
        let mut seen_default = false;
        let result: RunResult<()> = (|| {
            while !self.lookahead.is_punct(Punct::RBrace) {
                if self.lookahead.kind == TokenKind::Eof {
                    return Err(self.throw_unexpected(&self.lookahead));
                }
                let test = if self.lookahead.is_keyword(Keyword::Default) {
                    let tok = self.next_token()?;
                    if seen_default {
                        return Err(RunError::syntax(
                            "More than one default clause in switch statement",
                            tok.line_number,
                        ));
                    }
                    seen_default = true;
                    None
                } else {
                    self.expect_keyword(Keyword::Case)?;
                    Some(self.parse_expression()?)
                };
                self.expect_punct(Punct::Colon)?;
                let mut body = Vec::new();
                while !self.lookahead.is_punct(Punct::RBrace)
                    && !self.lookahead.is_keyword(Keyword::Case)
                    && !self.lookahead.is_keyword(Keyword::Default)
                {
                    body.push(self.parse_statement()?);
                }
                cases.push(SwitchCase { test, body });
            }
            Ok(())
        })();
        self.ctx.in_switch = saved;
        result?;
        self.expect_punct(Punct::RBrace)?;
        Ok(Stmt::Switch { discriminant, cases })
    }

    fn parse_throw_statement(&mut self) -> RunResult<Stmt> {
        let kw = self.expect_keyword(Keyword::Throw)?;
        if self.lookahead.preceded_by_newline {
            return Err(RunError::syntax("Illegal newline after throw", kw.line_number));
        }
        let argument = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Throw(argument))
    }

    fn parse_try_statement(&mut self) -> RunResult<Stmt> {
        let kw = self.expect_keyword(Keyword::Try)?;
        let block = self.parse_block_body()?;

        let handler = if self.lookahead.is_keyword(Keyword::Catch) {
            self.next_token()?;
            self.expect_punct(Punct::LParen)?;
            let tok = self.lookahead.clone();
            let param = self.expect_identifier()?;
            if self.ctx.strict && self.is_restricted_word(param) {
                return Err(RunError::syntax(
                    "Catch variable may not be eval or arguments in strict mode",
                    tok.line_number,
                ));
            }
            self.expect_punct(Punct::RParen)?;
            let body = self.parse_block_body()?;
            Some(CatchClause { param, body })
        } else {
            None
        };

        let finalizer = if self.lookahead.is_keyword(Keyword::Finally) {
            self.next_token()?;
            Some(self.parse_block_body()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(RunError::syntax("Missing catch or finally after try", kw.line_number));
        }
        Ok(Stmt::Try(Box::new(TryStmt {
            block,
            handler,
            finalizer,
        })))
    }

    /// Disambiguates labeled statements from expression statements.
    fn parse_expression_or_labeled_statement(&mut self) -> RunResult<Stmt> {
        if self.lookahead.kind == TokenKind::Identifier {
            // identifier ':' starts a labeled statement; anything else is an
            // expression statement beginning with that identifier
            let saved_state = self.lexer.state();
            let saved_lookahead = self.lookahead.clone();
            let saved_last_end = self.last_end;

            let ident_tok = self.next_token()?;
            if self.lookahead.is_punct(Punct::Colon) {
                self.next_token()?;
                let name = ident_tok.ident_text().unwrap_or_default().to_owned();
                if self.ctx.strict && is_strict_reserved_word(&name) {
                    return Err(RunError::syntax(
                        "Use of future reserved word in strict mode",
                        ident_tok.line_number,
                    ));
                }
                let label = self.atoms.intern_str(&name);
                if self.ctx.label_set.iter().any(|(l, _)| *l == label) {
                    return Err(RunError::syntax(
                        format!("Label '{name}' has already been declared"),
                        ident_tok.line_number,
                    ));
                }
                let labels_loop = matches!(
                    self.lookahead.keyword,
                    Some(Keyword::For | Keyword::While | Keyword::Do)
                );
                self.ctx.label_set.push((label, labels_loop));
                let body = self.parse_statement();
                self.ctx.label_set.pop();
                return Ok(Stmt::Labeled {
                    label,
                    body: Box::new(body?),
                });
            }
            // not a label: rewind and parse as an expression statement
            self.lexer.restore(saved_state);
            self.lookahead = saved_lookahead;
            self.last_end = saved_last_end;
        }
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expression {
            expr,
            from_var_decl: false,
        })
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn parse_function_declaration(&mut self) -> RunResult<FunctionIndex> {
        let start = self.lookahead.clone();
        self.expect_keyword(Keyword::Function)?;
        let name_tok = self.lookahead.clone();
        let name = self.expect_identifier()?;
        let mut first_restricted: Option<(String, u32)> = None;
        if self.ctx.strict {
            if self.is_restricted_word(name) {
                return Err(RunError::syntax(
                    "Function name may not be eval or arguments in strict mode",
                    name_tok.line_number,
                ));
            }
        } else if self.is_restricted_word(name) {
            first_restricted = Some((
                "Function name may not be eval or arguments in strict mode".to_owned(),
                name_tok.line_number,
            ));
        }
        self.scope_mut().declare_var(name);
        let index = self.parse_function_rest(Some(name), false, first_restricted, &start)?;
        Ok(index)
    }

    pub(crate) fn parse_function_expression(&mut self) -> RunResult<FunctionIndex> {
        let start = self.lookahead.clone();
        self.expect_keyword(Keyword::Function)?;
        let mut name = None;
        let mut first_restricted: Option<(String, u32)> = None;
        if self.lookahead.kind == TokenKind::Identifier {
            let name_tok = self.lookahead.clone();
            let id = self.expect_identifier()?;
            if self.is_restricted_word(id) {
                let message = "Function name may not be eval or arguments in strict mode".to_owned();
                if self.ctx.strict {
                    return Err(RunError::syntax(message, name_tok.line_number));
                }
                first_restricted = Some((message, name_tok.line_number));
            }
            name = Some(id);
        }
        self.parse_function_rest(name, true, first_restricted, &start)
    }

    /// Parses parameters and body after the function keyword and optional
    /// name. `first_restricted` carries a deferred sloppy-mode diagnostic
    /// that fires if the body turns out to be strict.
    fn parse_function_rest(
        &mut self,
        name: Option<AtomId>,
        is_expression: bool,
        mut first_restricted: Option<(String, u32)>,
        start: &Token,
    ) -> RunResult<FunctionIndex> {
        self.expect_punct(Punct::LParen)?;
        let mut params: Vec<AtomId> = Vec::new();
        if !self.lookahead.is_punct(Punct::RParen) {
            loop {
                if self.lookahead.is_punct(Punct::Ellipsis) {
                    return Err(RunError::syntax(
                        "Rest parameters are not supported",
                        self.lookahead.line_number,
                    ));
                }
                let tok = self.lookahead.clone();
                let param = self.expect_identifier()?;
                if self.is_restricted_word(param) {
                    let message = "Parameter name eval or arguments is not allowed in strict mode".to_owned();
                    if self.ctx.strict {
                        return Err(RunError::syntax(message, tok.line_number));
                    }
                    if first_restricted.is_none() {
                        first_restricted = Some((message, tok.line_number));
                    }
                }
                if params.contains(&param) {
                    let message = "Strict mode function may not have duplicate parameter names".to_owned();
                    if self.ctx.strict {
                        return Err(RunError::syntax(message, tok.line_number));
                    }
                    if first_restricted.is_none() {
                        first_restricted = Some((message, tok.line_number));
                    }
                }
                if self.lookahead.is_punct(Punct::Assign) {
                    return Err(RunError::syntax(
                        "Default parameters are not supported",
                        self.lookahead.line_number,
                    ));
                }
                params.push(param);
                if !self.eat_punct(Punct::Comma)? {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;
        self.parse_function_body_common(name, params, is_expression, first_restricted, start)
    }

    /// Parses a function body and assembles the [`FunctionDef`], shared by
    /// declarations, expressions, and object-literal accessors.
    pub(crate) fn parse_function_body_common(
        &mut self,
        name: Option<AtomId>,
        params: Vec<AtomId>,
        is_expression: bool,
        first_restricted: Option<(String, u32)>,
        start: &Token,
    ) -> RunResult<FunctionIndex> {
        // New function scope; strictness is inherited and may be promoted by
        // the body's own prologue.
        self.scopes.push(ScopeInfo::default());
        let saved_strict = self.ctx.strict;
        let saved_in_function = self.ctx.in_function_body;
        let saved_in_iteration = self.ctx.in_iteration;
        let saved_in_switch = self.ctx.in_switch;
        let saved_labels = std::mem::take(&mut self.ctx.label_set);
        self.ctx.in_function_body = true;
        self.ctx.in_iteration = false;
        self.ctx.in_switch = false;

        let body_result = self.parse_function_body();

        let became_strict = self.ctx.strict;
        self.ctx.strict = saved_strict;
        self.ctx.in_function_body = saved_in_function;
        self.ctx.in_iteration = saved_in_iteration;
        self.ctx.in_switch = saved_in_switch;
        self.ctx.label_set = saved_labels;
        let scope = self.scopes.pop().expect("function scope pushed above");
        let mut body = body_result?;

        if became_strict && !saved_strict {
            // re-validate name and params under the promoted strictness
            if let Some((message, line)) = first_restricted {
                return Err(RunError::syntax(message, line));
            }
            let mut seen: Vec<AtomId> = Vec::new();
            for &param in &params {
                if self.is_restricted_word(param) {
                    return Err(RunError::syntax(
                        "Parameter name eval or arguments is not allowed in strict mode",
                        start.line_number,
                    ));
                }
                if seen.contains(&param) {
                    return Err(RunError::syntax(
                        "Strict mode function may not have duplicate parameter names",
                        start.line_number,
                    ));
                }
                seen.push(param);
            }
        }

        rearrange_declarations(&mut body);
        self.scope_mut().has_inner_function = true;
        let range = self.finish_range(start);
        Ok(self.add_function(FunctionDef {
            name,
            params,
            body,
            scope,
            is_strict: became_strict,
            is_expression,
            range,
        }))
    }

    fn parse_function_body(&mut self) -> RunResult<Vec<StmtNode>> {
        self.expect_punct(Punct::LBrace)?;
        let mut body = Vec::new();
        self.parse_directive_prologues(&mut body)?;
        while !self.lookahead.is_punct(Punct::RBrace) {
            if self.lookahead.kind == TokenKind::Eof {
                return Err(self.throw_unexpected(&self.lookahead));
            }
            body.push(self.parse_statement()?);
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(body)
    }
}

/// Depth-guard token; pairs every [`Parser::enter`] with a `leave`.
pub(crate) struct DepthGuard;

/// Converts the surviving initializer assignments of a `var` statement into
/// an executable statement.
fn var_declarations_to_statement(mut assignments: Vec<ExprNode>) -> Stmt {
    match assignments.len() {
        0 => Stmt::Empty,
        1 => Stmt::Expression {
            expr: assignments.pop().expect("one assignment"),
            from_var_decl: true,
        },
        _ => {
            let range = assignments
                .iter()
                .map(|a| a.range)
                .reduce(CodeRange::to)
                .expect("non-empty assignment list");
            Stmt::Expression {
                expr: ExprNode::new(Expr::Sequence(assignments), range),
                from_var_decl: true,
            }
        }
    }
}

/// Moves function declarations to the front of a finished body, stably, so
/// they are instantiated before any executable statement runs.
fn rearrange_declarations(body: &mut [StmtNode]) {
    body.sort_by_key(|node| !matches!(node.stmt, Stmt::FunctionDecl(_)));
}

/// Future reserved words in strict mode.
fn is_strict_reserved_word(name: &str) -> bool {
    matches!(
        name,
        "implements" | "interface" | "let" | "package" | "private" | "protected" | "public" | "static" | "yield"
    )
}
