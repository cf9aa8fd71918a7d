//! The try/catch/finally and abrupt-completion matrix: every way a
//! `break`/`continue`/`return`/`throw` can cross a `finally` block.

use nerite::{Engine, ErrorKind, Object};

fn eval(source: &str) -> Object {
    let mut engine = Engine::new().expect("engine");
    engine.evaluate(source).unwrap_or_else(|err| panic!("{source:?} threw {err}"))
}

fn eval_err(source: &str) -> nerite::Exception {
    let mut engine = Engine::new().expect("engine");
    engine.evaluate(source).expect_err("expected evaluation to throw")
}

#[test]
fn catch_binds_the_thrown_value() {
    assert_eq!(eval("var got; try { throw 'payload'; } catch (e) { got = e; } got"), Object::Str("payload".to_owned()));
}

#[test]
fn catch_scope_shadows_and_unwinds() {
    let source = "
        var e = 'outer';
        try { throw 'inner'; } catch (e) { }
        e
    ";
    assert_eq!(eval(source), Object::Str("outer".to_owned()));
}

#[test]
fn engine_errors_become_catchable_objects() {
    let source = "
        var name = '';
        try { missing_binding; } catch (e) { name = e.name; }
        name
    ";
    assert_eq!(eval(source), Object::Str("ReferenceError".to_owned()));
}

#[test]
fn finally_runs_on_normal_and_abrupt_paths() {
    assert_eq!(eval("var log = ''; try { log += 't'; } finally { log += 'f'; } log"), Object::Str("tf".to_owned()));
    let source = "
        var log = '';
        try { try { throw 1; } finally { log += 'f'; } } catch (e) { log += 'c'; }
        log
    ";
    assert_eq!(eval(source), Object::Str("fc".to_owned()));
}

#[test]
fn rethrow_from_catch_reaches_outer_handler() {
    let source = "
        var log = '';
        try {
            try { throw 'a'; } catch (e) { log += '1'; throw 'b'; }
        } catch (e) { log += '2'; log += e; }
        log
    ";
    assert_eq!(eval(source), Object::Str("12b".to_owned()));
}

#[test]
fn throw_in_finally_replaces_pending_throw() {
    let source = "
        var got = '';
        try {
            try { throw 'original'; } finally { throw 'replacement'; }
        } catch (e) { got = e; }
        got
    ";
    assert_eq!(eval(source), Object::Str("replacement".to_owned()));
}

#[test]
fn return_through_finally_runs_the_finally() {
    let source = "
        var log = '';
        function f() {
            try { return 'r'; } finally { log += 'f'; }
        }
        f() + log
    ";
    assert_eq!(eval(source), Object::Str("rf".to_owned()));
}

#[test]
fn return_through_two_finallies_runs_both() {
    let source = "
        var log = '';
        function f() {
            try {
                try { return 1; } finally { log += 'a'; }
            } finally { log += 'b'; }
        }
        f();
        log
    ";
    assert_eq!(eval(source), Object::Str("ab".to_owned()));
}

#[test]
fn finally_return_overrides_pending_throw() {
    let source = "
        function f() { try { throw 'x'; } finally { return 'saved'; } }
        f()
    ";
    assert_eq!(eval(source), Object::Str("saved".to_owned()));
}

#[test]
fn break_through_finally_runs_the_finally() {
    let source = "
        var log = '';
        for (var i = 0; i < 3; i++) {
            try { if (i === 1) break; log += i; } finally { log += 'f'; }
        }
        log
    ";
    assert_eq!(eval(source), Object::Str("0ff".to_owned()));
}

#[test]
fn continue_through_finally_runs_the_finally() {
    let source = "
        var log = '';
        for (var i = 0; i < 3; i++) {
            try { if (i === 1) continue; log += i; } finally { log += 'f'; }
        }
        log
    ";
    assert_eq!(eval(source), Object::Str("0ff2f".to_owned()));
}

#[test]
fn labeled_break_through_nested_finallies() {
    let source = "
        var log = '';
        outer: for (var i = 0; i < 2; i++) {
            try {
                for (var j = 0; j < 2; j++) {
                    try { if (j === 1) break outer; log += j; } finally { log += 'a'; }
                }
            } finally { log += 'b'; }
        }
        log
    ";
    assert_eq!(eval(source), Object::Str("0aab".to_owned()));
}

#[test]
fn break_inside_catch_crosses_the_try() {
    let source = "
        var log = '';
        for (var i = 0; i < 3; i++) {
            try { throw i; } catch (e) { if (e === 1) break; log += e; } finally { log += 'f'; }
        }
        log
    ";
    assert_eq!(eval(source), Object::Str("0ff".to_owned()));
}

#[test]
fn try_inside_loop_inside_try() {
    let source = "
        var log = '';
        try {
            for (var i = 0; i < 2; i++) {
                try { throw 'x'; } catch (e) { log += i; }
            }
            log += '.';
        } finally { log += 'f'; }
        log
    ";
    assert_eq!(eval(source), Object::Str("01.f".to_owned()));
}

#[test]
fn uncaught_throw_escapes_with_the_value() {
    let err = eval_err("try { throw 'deep'; } finally { }");
    assert_eq!(err.kind(), ErrorKind::Error);
    assert_eq!(err.message(), "deep");
}

#[test]
fn throw_across_function_boundaries() {
    let source = "
        function thrower() { throw 'from-below'; }
        var got = '';
        try { thrower(); } catch (e) { got = e; }
        got
    ";
    assert_eq!(eval(source), Object::Str("from-below".to_owned()));
}

#[test]
fn finally_observes_neither_value_nor_flow() {
    // the finally body runs the same regardless of how the try completed
    let source = "
        var probe = '';
        function f(mode) {
            try {
                if (mode === 'throw') throw 1;
                if (mode === 'return') return 2;
            } catch (e) {
            } finally {
                probe += mode + ';';
            }
            return 0;
        }
        f('plain'); f('throw'); f('return');
        probe
    ";
    assert_eq!(eval(source), Object::Str("plain;throw;return;".to_owned()));
}

#[test]
fn nested_catch_rebinding_same_name() {
    let source = "
        var seen = '';
        try {
            throw 'a';
        } catch (e) {
            try { throw 'b'; } catch (e) { seen += e; }
            seen += e;
        }
        seen
    ";
    assert_eq!(eval(source), Object::Str("ba".to_owned()));
}

#[test]
fn switch_break_inside_try() {
    let source = "
        var log = '';
        switch (1) {
            case 1:
                try { log += 'x'; break; } finally { log += 'f'; }
            default:
                log += 'd';
        }
        log
    ";
    assert_eq!(eval(source), Object::Str("xf".to_owned()));
}

#[test]
fn with_scope_unwinds_on_throw() {
    let source = "
        var a = 'outer';
        var got = '';
        try {
            with ({a: 'inner'}) { throw a; }
        } catch (e) { got = e + '/' + a; }
        got
    ";
    assert_eq!(eval(source), Object::Str("inner/outer".to_owned()));
}

#[test]
fn break_out_of_with_inside_loop() {
    let source = "
        var log = '';
        for (var i = 0; i < 3; i++) {
            with ({tag: i}) {
                if (tag === 1) break;
                log += tag;
            }
        }
        log
    ";
    assert_eq!(eval(source), Object::Str("0".to_owned()));
}
