use nerite::{Engine, ErrorKind, Object};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Object {
    let mut engine = Engine::new().expect("engine");
    engine.evaluate(source).unwrap_or_else(|err| panic!("{source:?} threw {err}"))
}

fn eval_err(source: &str) -> nerite::Exception {
    let mut engine = Engine::new().expect("engine");
    engine.evaluate(source).expect_err("expected evaluation to throw")
}

#[test]
fn var_and_addition() {
    assert_eq!(eval("var a = 1; a + 2"), Object::Int(3));
}

#[test]
fn sum_loop_in_function() {
    let result = eval("(function(n){ var s=0; for(var i=1;i<=n;i++) s+=i; return s; })(100)");
    assert_eq!(result, Object::Int(5050));
}

#[test]
fn try_catch_finally_completes_normally() {
    assert_eq!(eval("try { throw \"x\"; } catch(e) { } finally { } 1"), Object::Int(1));
}

#[test]
fn finally_return_overrides_try_return() {
    assert_eq!(eval("function f(){ try { return 1; } finally { return 2; } } f()"), Object::Int(2));
}

#[test]
fn compound_member_assignment() {
    assert_eq!(eval("var o={a:1}; o.a+=10; o.a"), Object::Int(11));
}

#[test]
fn typeof_undeclared_does_not_throw() {
    assert_eq!(eval("typeof undeclared"), Object::Str("undefined".to_owned()));
}

#[test]
fn strict_unresolved_write_throws_reference_error() {
    let err = eval_err("\"use strict\"; undeclared = 1;");
    assert_eq!(err.kind(), ErrorKind::ReferenceError);
}

#[test]
fn sloppy_unresolved_write_creates_global() {
    assert_eq!(eval("phantom = 41; phantom + 1"), Object::Int(42));
}

#[test]
fn for_in_visits_keys_in_insertion_order() {
    let result = eval("var keys = ''; for (var k in {x:1,y:2}) keys += k; keys");
    assert_eq!(result, Object::Str("xy".to_owned()));
}

#[test]
fn int32_overflow_promotes_to_double() {
    assert_eq!(eval("2147483647 + 1"), Object::Float(2_147_483_648.0));
    assert_eq!(eval("-2147483648 - 1"), Object::Float(-2_147_483_649.0));
}

#[test]
fn division_by_zero_follows_ieee() {
    assert_eq!(eval("1 / 0"), Object::Float(f64::INFINITY));
    assert_eq!(eval("-1 / 0"), Object::Float(f64::NEG_INFINITY));
    match eval("0 / 0") {
        Object::Float(n) => assert!(n.is_nan()),
        other => panic!("expected NaN, got {other:?}"),
    }
}

#[test]
fn unsigned_right_shift_masks_count() {
    assert_eq!(eval("-1 >>> 0"), Object::Float(4_294_967_295.0));
    assert_eq!(eval("256 >>> 33"), Object::Int(128));
}

#[test]
fn octal_escape_in_sloppy_mode() {
    assert_eq!(eval("\"\\077\""), Object::Str("?".to_owned()));
}

#[test]
fn string_concatenation_and_coercion() {
    assert_eq!(eval("'a' + 'b' + 'c'"), Object::Str("abc".to_owned()));
    assert_eq!(eval("1 + '2'"), Object::Str("12".to_owned()));
    assert_eq!(eval("'' + 1.5"), Object::Str("1.5".to_owned()));
    assert_eq!(eval("'' + 123"), Object::Str("123".to_owned()));
}

#[test]
fn abstract_and_strict_equality() {
    assert_eq!(eval("1 == '1'"), Object::Bool(true));
    assert_eq!(eval("1 === '1'"), Object::Bool(false));
    assert_eq!(eval("null == undefined"), Object::Bool(true));
    assert_eq!(eval("null === undefined"), Object::Bool(false));
    assert_eq!(eval("NaN === NaN"), Object::Bool(false));
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(eval("false && crash()"), Object::Bool(false));
    assert_eq!(eval("true || crash()"), Object::Bool(true));
    assert_eq!(eval("0 || 'fallback'"), Object::Str("fallback".to_owned()));
    assert_eq!(eval("1 && 2"), Object::Int(2));
}

#[test]
fn conditional_and_sequence() {
    assert_eq!(eval("1 ? 'yes' : 'no'"), Object::Str("yes".to_owned()));
    assert_eq!(eval("(1, 2, 3)"), Object::Int(3));
}

#[test]
fn closures_capture_environments() {
    let source = "
        function counter() {
            var n = 0;
            return function() { n = n + 1; return n; };
        }
        var c = counter();
        c(); c(); c()
    ";
    assert_eq!(eval(source), Object::Int(3));
}

#[test]
fn closures_are_independent_per_call() {
    let source = "
        function make(start) { return function(){ start++; return start; }; }
        var a = make(10);
        var b = make(100);
        a(); b();
        a() + b()
    ";
    assert_eq!(eval(source), Object::Int(12 + 102));
}

#[test]
fn constructor_calls_build_instances() {
    let source = "
        function Point(x, y) { this.x = x; this.y = y; }
        var p = new Point(3, 4);
        p.x * p.x + p.y * p.y
    ";
    assert_eq!(eval(source), Object::Int(25));
}

#[test]
fn constructor_object_return_wins() {
    let source = "
        function F() { this.a = 1; return { a: 2 }; }
        new F().a
    ";
    assert_eq!(eval(source), Object::Int(2));
}

#[test]
fn constructor_primitive_return_ignored() {
    let source = "
        function F() { this.a = 1; return 42; }
        new F().a
    ";
    assert_eq!(eval(source), Object::Int(1));
}

#[test]
fn prototype_chain_lookup() {
    let source = "
        function Animal() {}
        Animal.prototype.legs = 4;
        var a = new Animal();
        a.legs
    ";
    assert_eq!(eval(source), Object::Int(4));
}

#[test]
fn instanceof_walks_prototype_chain() {
    let source = "
        function A() {}
        var a = new A();
        a instanceof A
    ";
    assert_eq!(eval(source), Object::Bool(true));
    let err = eval_err("1 instanceof 2");
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[test]
fn in_operator() {
    assert_eq!(eval("'a' in {a:1}"), Object::Bool(true));
    assert_eq!(eval("'b' in {a:1}"), Object::Bool(false));
    assert_eq!(eval("0 in [7]"), Object::Bool(true));
    assert_eq!(eval("1 in [7]"), Object::Bool(false));
}

#[test]
fn arguments_object() {
    let source = "(function(){ return arguments.length + arguments[0]; })(40, 'x')";
    assert_eq!(eval(source), Object::Int(42));
}

#[test]
fn hoisted_function_declarations_are_callable_before_definition() {
    assert_eq!(eval("var r = before(); function before(){ return 9; } r"), Object::Int(9));
}

#[test]
fn var_hoisting_reads_undefined_before_assignment() {
    assert_eq!(eval("typeof x === 'undefined' ? (x = 5, x) : -1; var x;"), Object::Int(5));
}

#[test]
fn named_function_expression_self_reference() {
    let source = "(function fact(n){ return n <= 1 ? 1 : n * fact(n - 1); })(6)";
    assert_eq!(eval(source), Object::Int(720));
}

#[test]
fn switch_dispatch_and_fallthrough() {
    let source = "
        var log = '';
        switch (2) {
            case 1: log += 'a';
            case 2: log += 'b';
            case 3: log += 'c'; break;
            default: log += 'd';
        }
        log
    ";
    assert_eq!(eval(source), Object::Str("bc".to_owned()));
}

#[test]
fn switch_default_runs_when_no_case_matches() {
    let source = "
        var out = '';
        switch (9) { case 1: out = 'one'; break; default: out = 'other'; }
        out
    ";
    assert_eq!(eval(source), Object::Str("other".to_owned()));
}

#[test]
fn labeled_break_exits_outer_loop() {
    let source = "
        var n = 0;
        outer: for (var i = 0; i < 10; i++) {
            for (var j = 0; j < 10; j++) {
                n++;
                if (n === 5) break outer;
            }
        }
        n
    ";
    assert_eq!(eval(source), Object::Int(5));
}

#[test]
fn labeled_continue_advances_outer_loop() {
    let source = "
        var hits = 0;
        outer: for (var i = 0; i < 3; i++) {
            for (var j = 0; j < 3; j++) {
                if (j === 1) continue outer;
                hits++;
            }
        }
        hits
    ";
    assert_eq!(eval(source), Object::Int(3));
}

#[test]
fn do_while_runs_at_least_once() {
    assert_eq!(eval("var n = 0; do { n++; } while (false); n"), Object::Int(1));
}

#[test]
fn thrown_values_surface_as_exceptions() {
    let err = eval_err("throw 'boom';");
    assert_eq!(err.kind(), ErrorKind::Error);
    assert_eq!(err.message(), "boom");
}

#[test]
fn calling_non_function_is_type_error() {
    let err = eval_err("var x = 3; x();");
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[test]
fn property_of_undefined_is_type_error() {
    let err = eval_err("var u; u.name;");
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[test]
fn direct_eval_sees_local_scope() {
    let source = "(function(){ var secret = 21; return eval('secret * 2'); })()";
    assert_eq!(eval(source), Object::Int(42));
}

#[test]
fn direct_eval_var_lands_in_caller_scope() {
    let source = "(function(){ eval('var planted = 7;'); return planted; })()";
    assert_eq!(eval(source), Object::Int(7));
}

#[test]
fn eval_of_non_string_passes_through() {
    assert_eq!(eval("eval(42)"), Object::Int(42));
}

#[test]
fn update_expressions() {
    assert_eq!(eval("var i = 5; i++"), Object::Int(5));
    assert_eq!(eval("var i = 5; i++; i"), Object::Int(6));
    assert_eq!(eval("var i = 5; ++i"), Object::Int(6));
    assert_eq!(eval("var i = 5; i--; i"), Object::Int(4));
    assert_eq!(eval("var o = {n: 1}; o.n++; o.n"), Object::Int(2));
    assert_eq!(eval("var s = '4'; s++; s"), Object::Int(5));
}

#[test]
fn void_and_typeof_operators() {
    assert_eq!(eval("void 0"), Object::Undefined);
    assert_eq!(eval("typeof 1"), Object::Str("number".to_owned()));
    assert_eq!(eval("typeof 'x'"), Object::Str("string".to_owned()));
    assert_eq!(eval("typeof null"), Object::Str("object".to_owned()));
    assert_eq!(eval("typeof {}"), Object::Str("object".to_owned()));
    assert_eq!(eval("typeof function(){}"), Object::Str("function".to_owned()));
}

#[test]
fn string_number_conversions() {
    assert_eq!(eval("+'42'"), Object::Int(42));
    assert_eq!(eval("+'0x10'"), Object::Int(16));
    assert_eq!(eval("+''"), Object::Int(0));
    match eval("+'nope'") {
        Object::Float(n) => assert!(n.is_nan()),
        other => panic!("expected NaN, got {other:?}"),
    }
}

#[test]
fn with_statement_binds_object_properties() {
    let source = "var o = {a: 5}; var r; with (o) { r = a + 1; a = 10; } r + o.a";
    assert_eq!(eval(source), Object::Int(16));
}

#[test]
fn program_completion_value_is_last_expression() {
    assert_eq!(eval("1; 2; 3"), Object::Int(3));
    // var statements leave the previous completion value intact
    assert_eq!(eval("4; var x = 99;"), Object::Int(4));
}

#[test]
fn function_call_depth_is_bounded() {
    let err = eval_err("function overflow(){ return overflow(); } overflow();");
    assert_eq!(err.kind(), ErrorKind::RangeError);
    assert!(err.message().contains("call stack"));
}

#[test]
fn string_length_and_indexing() {
    assert_eq!(eval("'hello'.length"), Object::Int(5));
    assert_eq!(eval("'hello'[1]"), Object::Str("e".to_owned()));
}

#[test]
fn negative_zero_is_preserved() {
    assert_eq!(eval("1 / -0"), Object::Float(f64::NEG_INFINITY));
    assert_eq!(eval("'' + -0"), Object::Str("0".to_owned()));
}
