use nerite::{Engine, ErrorKind, Exception};

/// Helper to parse a source text and extract the failure.
fn parse_err(source: &str) -> Exception {
    let mut engine = Engine::new().expect("engine");
    engine.parse(source, false).expect_err("expected parse error")
}

fn parses(source: &str) -> bool {
    let mut engine = Engine::new().expect("engine");
    engine.parse(source, false).is_ok()
}

#[test]
fn rejected_es2015_constructs_have_fixed_diagnostics() {
    let err = parse_err("var f = (a) => a;");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert!(err.message().contains("Arrow functions"), "got: {err}");

    let err = parse_err("class Foo {}");
    assert!(err.message().contains("Class declarations"), "got: {err}");

    let err = parse_err("const x = 1;");
    assert!(err.message().contains("const declarations"), "got: {err}");

    let err = parse_err("var t = `template`;");
    assert!(err.message().contains("Template literals"), "got: {err}");

    let err = parse_err("function f(...rest) {}");
    assert!(err.message().contains("Rest parameters"), "got: {err}");

    let err = parse_err("f(...spread);");
    assert!(err.message().contains("spread"), "got: {err}");

    let err = parse_err("function f(a = 1) {}");
    assert!(err.message().contains("Default parameters"), "got: {err}");
}

#[test]
fn let_is_an_identifier_in_sloppy_mode() {
    assert!(parses("var let = 1;"));
    let err = parse_err("'use strict'; var let = 1;");
    assert!(err.message().contains("future reserved word"), "got: {err}");
}

#[test]
fn strict_mode_octal_literals_are_rejected() {
    let err = parse_err("'use strict'; var n = 0777;");
    assert!(err.message().contains("Octal"), "got: {err}");

    let err = parse_err("'use strict'; var s = \"\\077\";");
    assert!(err.message().contains("Octal"), "got: {err}");

    // a directive before the use-strict directive retroactively fails
    let err = parse_err("\"\\077\"; 'use strict';");
    assert!(err.message().contains("Octal"), "got: {err}");

    assert!(parses("var n = 0777;"));
}

#[test]
fn strict_mode_restricted_names() {
    let err = parse_err("'use strict'; var eval = 1;");
    assert!(err.message().contains("eval or arguments"), "got: {err}");

    let err = parse_err("'use strict'; arguments = 1;");
    assert!(err.message().contains("eval or arguments"), "got: {err}");

    let err = parse_err("'use strict'; function f(a, a) {}");
    assert!(err.message().contains("duplicate parameter"), "got: {err}");

    // duplicate parameters are legal in sloppy mode
    assert!(parses("function f(a, a) { return a; }"));

    // a body prologue promotes strictness and re-validates the parameters
    let err = parse_err("function f(a, a) { 'use strict'; }");
    assert!(err.message().contains("duplicate parameter"), "got: {err}");
}

#[test]
fn strict_delete_of_identifier_is_rejected() {
    let err = parse_err("'use strict'; var x = 1; delete x;");
    assert!(err.message().contains("Delete"), "got: {err}");
    assert!(parses("var x = 1; delete x;"));
}

#[test]
fn with_is_rejected_in_strict_mode() {
    let err = parse_err("'use strict'; with ({}) {}");
    assert!(err.message().contains("with statement"), "got: {err}");
    assert!(parses("with ({}) {}"));
}

#[test]
fn invalid_assignment_targets_are_reference_errors() {
    let err = parse_err("1 = 2;");
    assert_eq!(err.kind(), ErrorKind::ReferenceError);
    assert!(err.message().contains("left-hand side"), "got: {err}");

    let err = parse_err("for (1 in {}) ;");
    assert_eq!(err.kind(), ErrorKind::ReferenceError);
    assert!(err.message().contains("for-in"), "got: {err}");

    let err = parse_err("a + b = c;");
    assert_eq!(err.kind(), ErrorKind::ReferenceError);
}

#[test]
fn orphan_jump_statements_are_rejected() {
    let err = parse_err("break;");
    assert!(err.message().contains("break"), "got: {err}");
    let err = parse_err("continue;");
    assert!(err.message().contains("continue"), "got: {err}");
    let err = parse_err("return 1;");
    assert!(err.message().contains("return"), "got: {err}");
    let err = parse_err("while (true) { continue missing; }");
    assert!(err.message().contains("Undefined label"), "got: {err}");
    let err = parse_err("lbl: lbl: ;");
    assert!(err.message().contains("already been declared"), "got: {err}");
}

#[test]
fn asi_accepts_newline_terminated_statements() {
    assert!(parses("var a = 1\nvar b = 2\na + b"));
    assert!(parses("var x = 1; x\n++x"));
    // no newline, no semicolon: hard error
    let err = parse_err("var a = 1 var b = 2");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn restricted_productions_honor_line_terminators() {
    // `return \n expr` parses as `return;` then an expression statement,
    // which is fine inside a function
    assert!(parses("function f() { return\n1; }"));
    // `throw \n expr` is always an error
    let err = parse_err("function f() { throw\n'x'; }");
    assert!(err.message().contains("newline"), "got: {err}");
}

#[test]
fn unterminated_constructs_fail_with_line_numbers() {
    let err = parse_err("var s = 'abc");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.line(), Some(1));

    let err = parse_err("\n\n/* never closed");
    assert_eq!(err.line(), Some(3));

    let err = parse_err("var r = /unterminated");
    assert!(err.message().contains("regular expression"), "got: {err}");
}

#[test]
fn duplicate_object_literal_properties() {
    let err = parse_err("'use strict'; var o = {a: 1, a: 2};");
    assert!(err.message().contains("Duplicate data property"), "got: {err}");
    assert!(parses("var o = {a: 1, a: 2};"));

    let err = parse_err("var o = {a: 1, get a() {}};");
    assert!(err.message().contains("data and accessor"), "got: {err}");

    let err = parse_err("var o = {get a() {}, get a() {}};");
    assert!(err.message().contains("multiple get/set"), "got: {err}");
}

#[test]
fn deep_nesting_overflows_the_recursion_guard() {
    // within the guard: accepted
    let shallow = format!("{}1{}", "(".repeat(32), ")".repeat(32));
    assert!(parses(&shallow));

    // far past the guard: RangeError, not a host stack overflow
    let deep = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
    let err = parse_err(&deep);
    assert_eq!(err.kind(), ErrorKind::RangeError);
    assert!(err.message().contains("call stack"), "got: {err}");
}

#[test]
fn regex_flags_are_validated() {
    let err = parse_err("var r = /a/gg;");
    assert!(err.message().contains("flags"), "got: {err}");
    let err = parse_err("var r = /a/x;");
    assert!(err.message().contains("flags"), "got: {err}");
    assert!(parses("var r = /a/gim;"));
}

#[test]
fn invalid_regex_patterns_fail_at_compile() {
    let mut engine = Engine::new().expect("engine");
    let err = engine.evaluate("var r = /(unclosed/;").expect_err("expected failure");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn future_reserved_words_always_rejected() {
    let err = parse_err("var enum = 1;");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    let err = parse_err("var x = super.y;");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn parse_function_surface() {
    let mut engine = Engine::new().expect("engine");
    let program = engine.parse_function("a, b", "return a + b;").expect("parse");
    assert_eq!(program.params(), ["a", "b"]);
    assert!(!program.body().is_strict());

    let err = engine
        .parse_function("a,", "return a;")
        .expect_err("dangling comma must fail");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}
