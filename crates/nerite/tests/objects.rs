use nerite::{Engine, ErrorKind, Object};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Object {
    let mut engine = Engine::new().expect("engine");
    engine.evaluate(source).unwrap_or_else(|err| panic!("{source:?} threw {err}"))
}

#[test]
fn object_literals_round_trip_to_host() {
    let result = eval("({a: 1, b: 'two', c: null})");
    assert_eq!(
        result,
        Object::Object(vec![
            ("a".to_owned(), Object::Int(1)),
            ("b".to_owned(), Object::Str("two".to_owned())),
            ("c".to_owned(), Object::Null),
        ])
    );
}

#[test]
fn array_literals_and_holes() {
    assert_eq!(
        eval("[1, 2, 3]"),
        Object::Array(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
    assert_eq!(eval("[1, , 3].length"), Object::Int(3));
    // holes read as undefined
    assert_eq!(eval("typeof [1, , 3][1]"), Object::Str("undefined".to_owned()));
    // trailing comma does not add an element
    assert_eq!(eval("[1, 2, ].length"), Object::Int(2));
}

#[test]
fn array_length_tracks_appends() {
    assert_eq!(eval("var a = []; a[0] = 'x'; a[1] = 'y'; a.length"), Object::Int(2));
}

#[test]
fn array_length_assignment_truncates() {
    assert_eq!(eval("var a = [1,2,3,4]; a.length = 2; typeof a[2]"), Object::Str("undefined".to_owned()));
    assert_eq!(eval("var a = [1,2,3,4]; a.length = 2; a.length"), Object::Int(2));
}

#[test]
fn invalid_array_length_is_range_error() {
    let mut engine = Engine::new().expect("engine");
    let err = engine.evaluate("var a = []; a.length = 1.5;").expect_err("must throw");
    assert_eq!(err.kind(), ErrorKind::RangeError);
}

#[test]
fn sparse_writes_leave_the_dense_path() {
    let source = "var a = [1]; a[1000000000] = 2; a[0] + a[1000000000]";
    assert_eq!(eval(source), Object::Int(3));
}

#[test]
fn delete_creates_holes_and_for_in_skips_them() {
    let source = "
        var a = ['x', 'y', 'z'];
        delete a[1];
        var keys = '';
        for (var k in a) keys += k;
        keys
    ";
    assert_eq!(eval(source), Object::Str("02".to_owned()));
}

#[test]
fn delete_respects_configurability() {
    assert_eq!(eval("var o = {a: 1}; delete o.a"), Object::Bool(true));
    assert_eq!(eval("var o = {a: 1}; delete o.missing"), Object::Bool(true));
    // array length is not deletable
    assert_eq!(eval("var a = [1]; delete a.length"), Object::Bool(false));
}

#[test]
fn property_shadowing_beats_prototype() {
    let source = "
        function C() {}
        C.prototype.v = 'proto';
        var c = new C();
        c.v = 'own';
        c.v + '/' + new C().v
    ";
    assert_eq!(eval(source), Object::Str("own/proto".to_owned()));
}

#[test]
fn getters_and_setters_run_on_access() {
    let source = "
        var backing = 1;
        var o = {
            get x() { return backing; },
            set x(v) { backing = v * 2; }
        };
        o.x = 21;
        o.x
    ";
    assert_eq!(eval(source), Object::Int(42));
}

#[test]
fn getter_receiver_is_the_object() {
    let source = "
        var o = { base: 40, get total() { return this.base + 2; } };
        o.total
    ";
    assert_eq!(eval(source), Object::Int(42));
}

#[test]
fn repeated_shapes_share_and_caches_stay_correct() {
    // one constructor, many instances: the monomorphic fast path must
    // return exactly what the generic path would
    let source = "
        function Pair(a, b) { this.a = a; this.b = b; }
        var total = 0;
        for (var i = 0; i < 64; i++) {
            var p = new Pair(i, i * 2);
            total += p.a + p.b;
        }
        total
    ";
    assert_eq!(eval(source), Object::Int((0..64).map(|i| i * 3).sum()));
}

#[test]
fn polymorphic_sites_fall_back_to_the_generic_path() {
    let source = "
        function read(o) { return o.k; }
        var shapes = [{k: 1}, {k: 2, extra: 0}, {other: 0, k: 3}];
        var total = 0;
        for (var i = 0; i < 30; i++) total += read(shapes[i % 3]);
        total
    ";
    assert_eq!(eval(source), Object::Int(60));
}

#[test]
fn method_calls_bind_this() {
    let source = "
        var o = { n: 42, read: function() { return this.n; } };
        o.read()
    ";
    assert_eq!(eval(source), Object::Int(42));
}

#[test]
fn detached_method_call_gets_global_this_in_sloppy_mode() {
    let source = "
        top = 'global';
        var o = { top: 'local', read: function() { return this.top; } };
        var f = o.read;
        f()
    ";
    assert_eq!(eval(source), Object::Str("global".to_owned()));
}

#[test]
fn for_in_covers_inherited_enumerable_properties() {
    let source = "
        function B() { this.own = 1; }
        B.prototype.inherited = 2;
        var keys = '';
        for (var k in new B()) keys += k + ';';
        keys
    ";
    assert_eq!(eval(source), Object::Str("own;inherited;".to_owned()));
}

#[test]
fn for_in_skips_keys_deleted_mid_loop() {
    let source = "
        var o = {a: 1, b: 2, c: 3};
        var seen = '';
        for (var k in o) {
            seen += k;
            delete o.c;
        }
        seen
    ";
    assert_eq!(eval(source), Object::Str("ab".to_owned()));
}

#[test]
fn for_in_over_null_and_undefined_is_empty() {
    assert_eq!(eval("var n = 0; for (var k in null) n++; n"), Object::Int(0));
    assert_eq!(eval("var n = 0; for (var k in undefined) n++; n"), Object::Int(0));
}

#[test]
fn numeric_and_string_keys_collide() {
    assert_eq!(eval("var o = {1: 'a'}; o['1']"), Object::Str("a".to_owned()));
    assert_eq!(eval("var a = []; a['0'] = 'zero'; a[0]"), Object::Str("zero".to_owned()));
}

#[test]
fn regexp_literals_build_objects() {
    assert_eq!(eval("/ab+c/gi.source"), Object::Str("ab+c".to_owned()));
    assert_eq!(eval("/ab+c/gi.global"), Object::Bool(true));
    assert_eq!(eval("/ab+c/gi.multiline"), Object::Bool(false));
    assert_eq!(eval("/a/.lastIndex"), Object::Int(0));
}

#[test]
fn computed_member_compound_assignment() {
    let source = "var a = [10, 20]; var i = 1; a[i] += 5; a[1]";
    assert_eq!(eval(source), Object::Int(25));
}

#[test]
fn nested_objects_convert_with_depth() {
    let result = eval("({outer: {inner: [1]}})");
    assert_eq!(
        result,
        Object::Object(vec![(
            "outer".to_owned(),
            Object::Object(vec![("inner".to_owned(), Object::Array(vec![Object::Int(1)]))])
        )])
    );
}
