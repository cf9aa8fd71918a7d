//! Expression parsing.
//!
//! The cover-grammar discipline lives here: `is_binding_element` and
//! `is_assignment_target` are tightened as sub-expressions are parsed, and
//! [`Parser::isolate_cover_grammar`] / [`Parser::inherit_cover_grammar`]
//! save and restore them so sub-parsers stay reentrant. The deferred
//! `first_cover_initialized_name_error` fires at the next isolation boundary;
//! ES5 has no destructuring context that could absolve it.

use super::Parser;
use crate::{
    ast::{AssignOp, BinaryOp, Expr, ExprNode, Lit, LogicalOp, MemberProp, PropertyDef, PropertyKey, UnaryOp,
          UpdateOp},
    atom::{AtomId, StaticAtoms},
    error::{ErrorKind, RunError, RunResult},
    lexer::{Keyword, Punct, Token, TokenKind, TokenValue},
    source::CodeRange,
    value::number_to_string,
};

use ahash::AHashMap;

const PROP_DATA: u8 = 1;
const PROP_GET: u8 = 2;
const PROP_SET: u8 = 4;

impl Parser<'_> {
    // ------------------------------------------------------------------
    // Cover grammar plumbing
    // ------------------------------------------------------------------

    /// Runs a sub-parser with fresh cover-grammar state; a deferred
    /// cover-initialized-name error recorded inside fires here.
    pub(crate) fn isolate_cover_grammar(&mut self, f: fn(&mut Self) -> RunResult<ExprNode>) -> RunResult<ExprNode> {
        let prev_binding = self.ctx.is_binding_element;
        let prev_assign = self.ctx.is_assignment_target;
        let prev_error = self.ctx.first_cover_initialized_name_error.take();
        self.ctx.is_binding_element = true;
        self.ctx.is_assignment_target = true;
        let result = f(self);
        if let Some((message, line)) = self.ctx.first_cover_initialized_name_error.take() {
            return Err(RunError::syntax(message, line));
        }
        self.ctx.is_binding_element = prev_binding;
        self.ctx.is_assignment_target = prev_assign;
        self.ctx.first_cover_initialized_name_error = prev_error;
        result
    }

    /// Runs a sub-parser whose cover-grammar restrictions combine with the
    /// surrounding expression's.
    pub(crate) fn inherit_cover_grammar(&mut self, f: fn(&mut Self) -> RunResult<ExprNode>) -> RunResult<ExprNode> {
        let prev_binding = self.ctx.is_binding_element;
        let prev_assign = self.ctx.is_assignment_target;
        let prev_error = self.ctx.first_cover_initialized_name_error.take();
        self.ctx.is_binding_element = true;
        self.ctx.is_assignment_target = true;
        let result = f(self);
        self.ctx.is_binding_element &= prev_binding;
        self.ctx.is_assignment_target &= prev_assign;
        if self.ctx.first_cover_initialized_name_error.is_none() {
            self.ctx.first_cover_initialized_name_error = prev_error;
        }
        result
    }

    // ------------------------------------------------------------------
    // Top level: comma and assignment expressions
    // ------------------------------------------------------------------

    /// Full `Expression` production including the comma operator.
    pub(crate) fn parse_expression(&mut self) -> RunResult<ExprNode> {
        let first = self.isolate_cover_grammar(Parser::parse_assignment_expression)?;
        self.finish_sequence_expression(first)
    }

    /// First assignment expression of a possible comma sequence; used by the
    /// `for` statement head, which must look at the first expression before
    /// deciding between the three-clause and for-in forms.
    pub(crate) fn parse_expression_base(&mut self) -> RunResult<ExprNode> {
        self.parse_assignment_expression()
    }

    /// Continues a comma sequence after its first element.
    pub(crate) fn finish_sequence_expression(&mut self, first: ExprNode) -> RunResult<ExprNode> {
        if !self.lookahead.is_punct(Punct::Comma) {
            return Ok(first);
        }
        let start_range = first.range;
        let mut exprs = vec![first];
        while self.eat_punct(Punct::Comma)? {
            exprs.push(self.isolate_cover_grammar(Parser::parse_assignment_expression)?);
        }
        let range = exprs.iter().map(|e| e.range).fold(start_range, CodeRange::to);
        Ok(ExprNode::new(Expr::Sequence(exprs), range))
    }

    pub(crate) fn parse_assignment_expression(&mut self) -> RunResult<ExprNode> {
        let guard = self.enter()?;
        let result = self.parse_assignment_expression_inner();
        self.leave(guard);
        result
    }

    fn parse_assignment_expression_inner(&mut self) -> RunResult<ExprNode> {
        let start = self.lookahead.clone();
        let expr = self.parse_conditional_expression()?;

        if self.lookahead.is_punct(Punct::Arrow) {
            return Err(RunError::syntax(
                "Arrow functions are not supported",
                self.lookahead.line_number,
            ));
        }

        let Some(op) = self.lookahead.punct.and_then(AssignOp::from_punct) else {
            return Ok(expr);
        };

        if !self.ctx.is_assignment_target || !expr.expr.is_reference() {
            return Err(RunError::simple(
                ErrorKind::ReferenceError,
                "Invalid left-hand side in assignment",
            ));
        }
        if self.ctx.strict
            && let Expr::Identifier(id) = expr.expr
            && self.is_restricted_word(id)
        {
            return Err(RunError::syntax(
                "Assignment to eval or arguments is not allowed in strict mode",
                start.line_number,
            ));
        }
        if op != AssignOp::Assign {
            self.ctx.is_assignment_target = false;
            self.ctx.is_binding_element = false;
        }

        self.next_token()?;
        let value = self.isolate_cover_grammar(Parser::parse_assignment_expression)?;
        let range = self.finish_range(&start);
        self.ctx.first_cover_initialized_name_error = None;
        Ok(ExprNode::new(
            Expr::Assignment {
                op,
                target: Box::new(expr),
                value: Box::new(value),
            },
            range,
        ))
    }

    // ------------------------------------------------------------------
    // Conditional and binary expressions
    // ------------------------------------------------------------------

    fn parse_conditional_expression(&mut self) -> RunResult<ExprNode> {
        let start = self.lookahead.clone();
        let expr = self.inherit_cover_grammar(Parser::parse_binary_expression)?;
        if !self.lookahead.is_punct(Punct::Question) {
            return Ok(expr);
        }
        self.next_token()?;
        let saved_allow_in = self.ctx.allow_in;
        self.ctx.allow_in = true;
        let consequent = self.isolate_cover_grammar(Parser::parse_assignment_expression);
        self.ctx.allow_in = saved_allow_in;
        let consequent = consequent?;
        self.expect_punct(Punct::Colon)?;
        let alternate = self.isolate_cover_grammar(Parser::parse_assignment_expression)?;
        self.ctx.is_assignment_target = false;
        self.ctx.is_binding_element = false;
        let range = self.finish_range(&start);
        Ok(ExprNode::new(
            Expr::Conditional {
                test: Box::new(expr),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            range,
        ))
    }

    /// Precedence of the lookahead as a binary operator, 0 when it is not
    /// one. `in` only counts when `allow_in` is set, which is how
    /// `for (x in y)` heads are kept unambiguous.
    fn binary_precedence(&self, token: &Token) -> u8 {
        match token.kind {
            TokenKind::Punctuator => token.punct.map_or(0, |p| p.binary_precedence(self.ctx.allow_in)),
            TokenKind::Keyword => match token.keyword {
                Some(Keyword::Instanceof) => 7,
                Some(Keyword::In) if self.ctx.allow_in => 7,
                _ => 0,
            },
            _ => 0,
        }
    }

    /// Left-associative binary-operator parsing with an explicit operator
    /// stack: higher-precedence runs reduce before lower-precedence
    /// operators are shifted.
    fn parse_binary_expression(&mut self) -> RunResult<ExprNode> {
        let first = self.inherit_cover_grammar(Parser::parse_unary_expression)?;

        let mut token = self.lookahead.clone();
        let mut prec = self.binary_precedence(&token);
        if prec == 0 {
            return Ok(first);
        }
        self.ctx.is_assignment_target = false;
        self.ctx.is_binding_element = false;
        self.next_token()?;
        token.prec = prec;

        let mut exprs: Vec<ExprNode> = vec![first];
        let mut ops: Vec<Token> = vec![token];
        exprs.push(self.isolate_cover_grammar(Parser::parse_unary_expression)?);

        loop {
            prec = self.binary_precedence(&self.lookahead);
            if prec == 0 {
                break;
            }
            while let Some(top) = ops.last()
                && prec <= top.prec
            {
                let right = exprs.pop().expect("binary reduction right operand");
                let left = exprs.pop().expect("binary reduction left operand");
                let op = ops.pop().expect("binary reduction operator");
                exprs.push(make_binary(op, left, right));
            }
            let mut op = self.next_token()?;
            op.prec = prec;
            ops.push(op);
            exprs.push(self.isolate_cover_grammar(Parser::parse_unary_expression)?);
        }

        let mut expr = exprs.pop().expect("final binary operand");
        while let Some(op) = ops.pop() {
            let left = exprs.pop().expect("final binary reduction operand");
            expr = make_binary(op, left, expr);
        }
        Ok(expr)
    }

    // ------------------------------------------------------------------
    // Unary and postfix expressions
    // ------------------------------------------------------------------

    fn parse_unary_expression(&mut self) -> RunResult<ExprNode> {
        let token = self.lookahead.clone();

        let unary_op = match token.kind {
            TokenKind::Punctuator => match token.punct {
                Some(Punct::Plus) => Some(UnaryOp::Plus),
                Some(Punct::Minus) => Some(UnaryOp::Minus),
                Some(Punct::Bang) => Some(UnaryOp::Not),
                Some(Punct::Tilde) => Some(UnaryOp::BitwiseNot),
                Some(Punct::PlusPlus | Punct::MinusMinus) => {
                    return self.parse_prefix_update_expression();
                }
                _ => None,
            },
            TokenKind::Keyword => match token.keyword {
                Some(Keyword::Typeof) => Some(UnaryOp::TypeOf),
                Some(Keyword::Void) => Some(UnaryOp::Void),
                Some(Keyword::Delete) => Some(UnaryOp::Delete),
                _ => None,
            },
            _ => None,
        };

        let Some(op) = unary_op else {
            return self.parse_postfix_expression();
        };

        self.next_token()?;
        let argument = self.inherit_cover_grammar(Parser::parse_unary_expression)?;
        if op == UnaryOp::Delete
            && self.ctx.strict
            && matches!(argument.expr, Expr::Identifier(_))
        {
            return Err(RunError::syntax(
                "Delete of an unqualified identifier in strict mode.",
                token.line_number,
            ));
        }
        self.ctx.is_assignment_target = false;
        self.ctx.is_binding_element = false;
        let range = self.finish_range(&token);
        Ok(ExprNode::new(
            Expr::Unary {
                op,
                argument: Box::new(argument),
            },
            range,
        ))
    }

    fn parse_prefix_update_expression(&mut self) -> RunResult<ExprNode> {
        let token = self.next_token()?;
        let op = if token.is_punct(Punct::PlusPlus) {
            UpdateOp::Increment
        } else {
            UpdateOp::Decrement
        };
        let argument = self.inherit_cover_grammar(Parser::parse_unary_expression)?;
        self.check_update_target(&argument, &token, "prefix")?;
        self.ctx.is_assignment_target = false;
        self.ctx.is_binding_element = false;
        let range = self.finish_range(&token);
        Ok(ExprNode::new(
            Expr::Update {
                op,
                prefix: true,
                argument: Box::new(argument),
            },
            range,
        ))
    }

    fn parse_postfix_expression(&mut self) -> RunResult<ExprNode> {
        let start = self.lookahead.clone();
        let expr = self.inherit_cover_grammar(Parser::parse_left_hand_side_expression_allow_call)?;
        if self.lookahead.preceded_by_newline {
            return Ok(expr);
        }
        let Some(p) = self.lookahead.punct else { return Ok(expr) };
        if p != Punct::PlusPlus && p != Punct::MinusMinus {
            return Ok(expr);
        }
        let op_tok = self.next_token()?;
        self.check_update_target(&expr, &op_tok, "postfix")?;
        let op = if p == Punct::PlusPlus {
            UpdateOp::Increment
        } else {
            UpdateOp::Decrement
        };
        self.ctx.is_assignment_target = false;
        self.ctx.is_binding_element = false;
        let range = self.finish_range(&start);
        Ok(ExprNode::new(
            Expr::Update {
                op,
                prefix: false,
                argument: Box::new(expr),
            },
            range,
        ))
    }

    fn check_update_target(&self, target: &ExprNode, token: &Token, position: &str) -> RunResult<()> {
        if self.ctx.strict
            && let Expr::Identifier(id) = target.expr
            && self.is_restricted_word(id)
        {
            return Err(RunError::syntax(
                format!("{} increment/decrement may not have eval or arguments operand in strict mode",
                    if position == "prefix" { "Prefix" } else { "Postfix" }),
                token.line_number,
            ));
        }
        if !self.ctx.is_assignment_target || !target.expr.is_reference() {
            return Err(RunError::simple(
                ErrorKind::ReferenceError,
                format!("Invalid left-hand side expression in {position} operation"),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Left-hand-side, call, and new expressions
    // ------------------------------------------------------------------

    fn parse_left_hand_side_expression_allow_call(&mut self) -> RunResult<ExprNode> {
        self.parse_left_hand_side_expression_impl(true)
    }

    fn parse_left_hand_side_expression(&mut self) -> RunResult<ExprNode> {
        self.parse_left_hand_side_expression_impl(false)
    }

    fn parse_left_hand_side_expression_impl(&mut self, allow_call: bool) -> RunResult<ExprNode> {
        let start = self.lookahead.clone();
        let mut expr = if self.lookahead.is_keyword(Keyword::New) {
            self.inherit_cover_grammar(Parser::parse_new_expression)?
        } else {
            self.inherit_cover_grammar(Parser::parse_primary_expression)?
        };

        loop {
            if self.lookahead.is_punct(Punct::Dot) {
                self.next_token()?;
                let name = self.parse_identifier_name()?;
                self.ctx.is_binding_element = false;
                self.ctx.is_assignment_target = true;
                let range = self.finish_range(&start);
                expr = ExprNode::new(
                    Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Named(name),
                    },
                    range,
                );
            } else if self.lookahead.is_punct(Punct::LBracket) {
                self.next_token()?;
                let property = self.isolate_cover_grammar(Parser::parse_expression_full)?;
                self.expect_punct(Punct::RBracket)?;
                self.ctx.is_binding_element = false;
                self.ctx.is_assignment_target = true;
                let range = self.finish_range(&start);
                expr = ExprNode::new(
                    Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(property)),
                    },
                    range,
                );
            } else if allow_call && self.lookahead.is_punct(Punct::LParen) {
                // a syntactic `eval(...)` call makes the scope dynamic
                if let Expr::Identifier(id) = expr.expr
                    && id == AtomId::from(StaticAtoms::Eval)
                {
                    self.scope_mut().has_direct_eval = true;
                }
                let arguments = self.parse_arguments()?;
                self.ctx.is_binding_element = false;
                self.ctx.is_assignment_target = false;
                let range = self.finish_range(&start);
                expr = ExprNode::new(
                    Expr::Call {
                        callee: Box::new(expr),
                        arguments,
                    },
                    range,
                );
            } else if self.lookahead.kind == TokenKind::Template {
                return Err(RunError::syntax(
                    "Template literals are not supported",
                    self.lookahead.line_number,
                ));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Trampoline so the full-expression parser fits the `ParseFn` shape.
    fn parse_expression_full(&mut self) -> RunResult<ExprNode> {
        self.parse_expression()
    }

    fn parse_new_expression(&mut self) -> RunResult<ExprNode> {
        let start = self.expect_keyword(Keyword::New)?;
        if self.lookahead.is_punct(Punct::Dot) {
            // new.target is ES2015 meta-property syntax
            return Err(RunError::syntax(
                "new.target is not supported",
                self.lookahead.line_number,
            ));
        }
        let callee = self.isolate_cover_grammar(Parser::parse_left_hand_side_expression)?;
        let arguments = if self.lookahead.is_punct(Punct::LParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        self.ctx.is_assignment_target = false;
        self.ctx.is_binding_element = false;
        let range = self.finish_range(&start);
        Ok(ExprNode::new(
            Expr::New {
                callee: Box::new(callee),
                arguments,
            },
            range,
        ))
    }

    fn parse_arguments(&mut self) -> RunResult<Vec<ExprNode>> {
        self.expect_punct(Punct::LParen)?;
        let mut arguments = Vec::new();
        if !self.lookahead.is_punct(Punct::RParen) {
            loop {
                if self.lookahead.is_punct(Punct::Ellipsis) {
                    return Err(RunError::syntax(
                        "Rest and spread syntax is not supported",
                        self.lookahead.line_number,
                    ));
                }
                arguments.push(self.isolate_cover_grammar(Parser::parse_assignment_expression)?);
                if !self.eat_punct(Punct::Comma)? {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(arguments)
    }

    /// IdentifierName after `.`: keywords and literal-like names are valid
    /// property names.
    fn parse_identifier_name(&mut self) -> RunResult<AtomId> {
        match self.lookahead.kind {
            TokenKind::Identifier | TokenKind::Keyword | TokenKind::BooleanLiteral | TokenKind::NullLiteral => {
                let tok = self.next_token()?;
                let text = match &tok.value {
                    TokenValue::Ident(s) => s.clone(),
                    _ => return Err(self.throw_unexpected(&tok)),
                };
                Ok(self.atoms.intern_str(&text))
            }
            _ => Err(self.throw_unexpected(&self.lookahead)),
        }
    }

    // ------------------------------------------------------------------
    // Primary expressions
    // ------------------------------------------------------------------

    fn parse_primary_expression(&mut self) -> RunResult<ExprNode> {
        let token = self.lookahead.clone();
        let range = CodeRange::new(token.start, token.end, token.line_number);

        match token.kind {
            TokenKind::Identifier => {
                self.next_token()?;
                let name = token.ident_text().unwrap_or_default();
                if self.ctx.strict && super::is_strict_reserved_word(name) {
                    return Err(RunError::syntax(
                        "Use of future reserved word in strict mode",
                        token.line_number,
                    ));
                }
                let id = self.atoms.intern_str(name);
                if id == AtomId::from(StaticAtoms::Arguments) && self.in_function() {
                    self.scope_mut().uses_arguments = true;
                }
                Ok(ExprNode::new(Expr::Identifier(id), range))
            }
            TokenKind::NumericLiteral => {
                if token.octal && self.ctx.strict {
                    return Err(RunError::syntax(
                        "Octal literals are not allowed in strict mode.",
                        token.line_number,
                    ));
                }
                self.ctx.is_assignment_target = false;
                self.ctx.is_binding_element = false;
                self.next_token()?;
                let TokenValue::Number(value) = token.value else {
                    return Err(RunError::internal("numeric token without numeric value"));
                };
                Ok(ExprNode::new(Expr::Literal(Lit::Number(value)), range))
            }
            TokenKind::StringLiteral => {
                if token.octal && self.ctx.strict {
                    return Err(RunError::syntax(
                        "Octal literals are not allowed in strict mode.",
                        token.line_number,
                    ));
                }
                self.ctx.is_assignment_target = false;
                self.ctx.is_binding_element = false;
                self.next_token()?;
                let TokenValue::Str(units) = token.value else {
                    return Err(RunError::internal("string token without string value"));
                };
                Ok(ExprNode::new(Expr::Literal(Lit::Str(units)), range))
            }
            TokenKind::BooleanLiteral => {
                self.ctx.is_assignment_target = false;
                self.ctx.is_binding_element = false;
                self.next_token()?;
                let value = token.ident_text() == Some("true");
                Ok(ExprNode::new(Expr::Literal(Lit::Bool(value)), range))
            }
            TokenKind::NullLiteral => {
                self.ctx.is_assignment_target = false;
                self.ctx.is_binding_element = false;
                self.next_token()?;
                Ok(ExprNode::new(Expr::Literal(Lit::Null), range))
            }
            TokenKind::Template => Err(RunError::syntax(
                "Template literals are not supported",
                token.line_number,
            )),
            TokenKind::Keyword => match token.keyword {
                Some(Keyword::This) => {
                    self.ctx.is_assignment_target = false;
                    self.ctx.is_binding_element = false;
                    self.next_token()?;
                    Ok(ExprNode::new(Expr::This, range))
                }
                Some(Keyword::Function) => {
                    self.ctx.is_assignment_target = false;
                    self.ctx.is_binding_element = false;
                    let start = self.lookahead.clone();
                    let index = self.parse_function_expression()?;
                    Ok(ExprNode::new(Expr::Function(index), self.finish_range(&start)))
                }
                _ => Err(self.throw_unexpected(&self.lookahead)),
            },
            TokenKind::Punctuator => match token.punct {
                Some(Punct::LParen) => self.parse_group_expression(),
                Some(Punct::LBracket) => self.parse_array_initializer(),
                Some(Punct::LBrace) => self.parse_object_initializer(),
                Some(Punct::Slash | Punct::SlashAssign) => self.parse_regex_literal(),
                _ => Err(self.throw_unexpected(&self.lookahead)),
            },
            _ => Err(self.throw_unexpected(&self.lookahead)),
        }
    }

    fn parse_group_expression(&mut self) -> RunResult<ExprNode> {
        self.expect_punct(Punct::LParen)?;
        if self.lookahead.is_punct(Punct::RParen) {
            // `()` only exists as an arrow-function head
            self.next_token()?;
            return Err(RunError::syntax(
                "Arrow functions are not supported",
                self.lookahead.line_number,
            ));
        }
        let expr = self.inherit_cover_grammar(Parser::parse_expression_full)?;
        self.expect_punct(Punct::RParen)?;
        Ok(expr)
    }

    fn parse_regex_literal(&mut self) -> RunResult<ExprNode> {
        let slash = self.lookahead.clone();
        let token = self.lexer.rescan_as_regex(slash.start as usize)?;
        // refill the lookahead past the regex body
        self.lookahead = self.lexer.next_token()?;
        self.last_end = token.end;
        let TokenValue::Regex { body, flags } = token.value else {
            return Err(RunError::internal("regex token without regex value"));
        };
        let mut seen = [false; 3];
        for c in flags.chars() {
            let slot = match c {
                'g' => 0,
                'i' => 1,
                'm' => 2,
                _ => {
                    return Err(RunError::syntax(
                        "Invalid regular expression flags",
                        token.line_number,
                    ));
                }
            };
            if seen[slot] {
                return Err(RunError::syntax(
                    "Invalid regular expression flags",
                    token.line_number,
                ));
            }
            seen[slot] = true;
        }
        self.ctx.is_assignment_target = false;
        self.ctx.is_binding_element = false;
        let range = CodeRange::new(token.start, token.end, token.line_number);
        Ok(ExprNode::new(Expr::Literal(Lit::Regex { body, flags }), range))
    }

    fn parse_array_initializer(&mut self) -> RunResult<ExprNode> {
        let start = self.expect_punct(Punct::LBracket)?;
        let mut elements: Vec<Option<ExprNode>> = Vec::new();
        loop {
            if self.lookahead.is_punct(Punct::RBracket) {
                break;
            }
            if self.lookahead.is_punct(Punct::Comma) {
                // elision
                self.next_token()?;
                elements.push(None);
                continue;
            }
            if self.lookahead.is_punct(Punct::Ellipsis) {
                return Err(RunError::syntax(
                    "Rest and spread syntax is not supported",
                    self.lookahead.line_number,
                ));
            }
            elements.push(Some(self.inherit_cover_grammar(Parser::parse_assignment_expression)?));
            if !self.lookahead.is_punct(Punct::RBracket) {
                self.expect_punct(Punct::Comma)?;
            }
        }
        self.expect_punct(Punct::RBracket)?;
        let range = self.finish_range(&start);
        Ok(ExprNode::new(Expr::Array(elements), range))
    }

    // ------------------------------------------------------------------
    // Object literals
    // ------------------------------------------------------------------

    fn parse_object_initializer(&mut self) -> RunResult<ExprNode> {
        let start = self.expect_punct(Punct::LBrace)?;
        let mut properties: Vec<PropertyDef> = Vec::new();
        // property name -> kinds already defined, for the strict duplicate
        // rules and the data/accessor exclusivity rules
        let mut defined: AHashMap<AtomId, u8> = AHashMap::new();

        while !self.lookahead.is_punct(Punct::RBrace) {
            let prop = self.parse_object_property()?;
            let (key, kind) = match &prop {
                PropertyDef::Data { key, .. } => (*key, PROP_DATA),
                PropertyDef::Getter { key, .. } => (*key, PROP_GET),
                PropertyDef::Setter { key, .. } => (*key, PROP_SET),
            };
            let canonical = self.canonical_property_atom(key);
            let previous = defined.get(&canonical).copied().unwrap_or(0);
            if kind == PROP_DATA {
                if previous & PROP_DATA != 0 && self.ctx.strict {
                    return Err(RunError::syntax(
                        "Duplicate data property in object literal not allowed in strict mode",
                        self.lookahead.line_number,
                    ));
                }
                if previous & (PROP_GET | PROP_SET) != 0 {
                    return Err(RunError::syntax(
                        "Object literal may not have data and accessor property with the same name",
                        self.lookahead.line_number,
                    ));
                }
            } else {
                if previous & PROP_DATA != 0 {
                    return Err(RunError::syntax(
                        "Object literal may not have data and accessor property with the same name",
                        self.lookahead.line_number,
                    ));
                }
                if previous & kind != 0 {
                    return Err(RunError::syntax(
                        "Object literal may not have multiple get/set accessors with the same name",
                        self.lookahead.line_number,
                    ));
                }
            }
            defined.insert(canonical, previous | kind);
            properties.push(prop);
            if !self.lookahead.is_punct(Punct::RBrace) {
                self.expect_punct(Punct::Comma)?;
            }
        }
        self.expect_punct(Punct::RBrace)?;
        let range = self.finish_range(&start);
        Ok(ExprNode::new(Expr::Object(properties), range))
    }

    fn canonical_property_atom(&mut self, key: PropertyKey) -> AtomId {
        match key {
            PropertyKey::Atom(id) | PropertyKey::NumberAtom(id) => id,
            PropertyKey::Number(index) => self.atoms.intern_index(index),
        }
    }

    fn parse_object_property(&mut self) -> RunResult<PropertyDef> {
        let token = self.lookahead.clone();

        // `get`/`set` begin an accessor definition unless followed by a
        // colon or comma (then they are ordinary keys)
        if token.kind == TokenKind::Identifier
            && let Some(text) = token.ident_text()
            && (text == "get" || text == "set")
        {
            let saved_state = self.lexer.state();
            let saved_lookahead = self.lookahead.clone();
            let saved_last_end = self.last_end;
            self.next_token()?;
            let is_accessor = !self.lookahead.is_punct(Punct::Colon)
                && !self.lookahead.is_punct(Punct::Comma)
                && !self.lookahead.is_punct(Punct::RBrace)
                && !self.lookahead.is_punct(Punct::LParen);
            if is_accessor {
                let is_getter = text == "get";
                let key = self.parse_object_property_key()?;
                let function = self.parse_accessor_function(is_getter, &token)?;
                return Ok(if is_getter {
                    PropertyDef::Getter { key, function }
                } else {
                    PropertyDef::Setter { key, function }
                });
            }
            self.lexer.restore(saved_state);
            self.lookahead = saved_lookahead;
            self.last_end = saved_last_end;
        }

        let key = self.parse_object_property_key()?;
        self.expect_punct(Punct::Colon)?;
        let value = self.inherit_cover_grammar(Parser::parse_assignment_expression)?;
        Ok(PropertyDef::Data { key, value })
    }

    fn parse_object_property_key(&mut self) -> RunResult<PropertyKey> {
        let token = self.lookahead.clone();
        match token.kind {
            TokenKind::Identifier | TokenKind::Keyword | TokenKind::BooleanLiteral | TokenKind::NullLiteral => {
                self.next_token()?;
                let text = token.ident_text().unwrap_or_default();
                Ok(PropertyKey::Atom(self.atoms.intern_str(text)))
            }
            TokenKind::StringLiteral => {
                if token.octal && self.ctx.strict {
                    return Err(RunError::syntax(
                        "Octal literals are not allowed in strict mode.",
                        token.line_number,
                    ));
                }
                self.next_token()?;
                let TokenValue::Str(units) = token.value else {
                    return Err(RunError::internal("string token without string value"));
                };
                Ok(PropertyKey::Atom(self.atoms.intern_units(&units)))
            }
            TokenKind::NumericLiteral => {
                if token.octal && self.ctx.strict {
                    return Err(RunError::syntax(
                        "Octal literals are not allowed in strict mode.",
                        token.line_number,
                    ));
                }
                self.next_token()?;
                let TokenValue::Number(value) = token.value else {
                    return Err(RunError::internal("numeric token without numeric value"));
                };
                // an exact uint32 rendering keeps numeric and string spellings
                // of the same index on one key
                if value.fract() == 0.0 && value >= 0.0 && value < f64::from(u32::MAX) {
                    Ok(PropertyKey::Number(value as u32))
                } else {
                    let text = number_to_string(value);
                    Ok(PropertyKey::NumberAtom(self.atoms.intern_str(&text)))
                }
            }
            _ => Err(self.throw_unexpected(&token)),
        }
    }

    /// Parses the function part of a getter or setter definition.
    fn parse_accessor_function(&mut self, is_getter: bool, start: &Token) -> RunResult<crate::ast::FunctionIndex> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        if is_getter {
            self.expect_punct(Punct::RParen)?;
        } else {
            let tok = self.lookahead.clone();
            let param = self.expect_identifier()?;
            if self.ctx.strict && self.is_restricted_word(param) {
                return Err(RunError::syntax(
                    "Parameter name eval or arguments is not allowed in strict mode",
                    tok.line_number,
                ));
            }
            params.push(param);
            self.expect_punct(Punct::RParen)?;
        }
        self.parse_function_body_common(None, params, true, None, start)
    }
}

fn make_binary(op_token: Token, left: ExprNode, right: ExprNode) -> ExprNode {
    let range = left.range.to(right.range);
    let expr = match op_token.kind {
        TokenKind::Keyword => match op_token.keyword {
            Some(Keyword::In) => Expr::Binary {
                op: BinaryOp::In,
                left: Box::new(left),
                right: Box::new(right),
            },
            Some(Keyword::Instanceof) => Expr::Binary {
                op: BinaryOp::InstanceOf,
                left: Box::new(left),
                right: Box::new(right),
            },
            _ => unreachable!("non-operator keyword on operator stack"),
        },
        _ => match op_token.punct {
            Some(Punct::AmpAmp) => Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            },
            Some(Punct::PipePipe) => Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            },
            Some(p) => {
                let op = BinaryOp::from_punct(p).expect("operator stack holds binary punctuators");
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            None => unreachable!("operator token without punctuator"),
        },
    };
    ExprNode::new(expr, range)
}
