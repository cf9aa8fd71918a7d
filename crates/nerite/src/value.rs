//! The tagged runtime value and its primitive conversions.
//!
//! `Value` is a plain sum type (`Copy`, no packing): `Int32` is the
//! mandatory fast integer path, `Double` holds every other number,
//! `InternStr` is an interned string, `Ref` any heap entity, and `Empty`
//! the internal hole/uninitialized sentinel that user code never observes.
//!
//! Conversions here cover primitives only. Converting an object requires
//! running its `valueOf`/`toString`, which can execute user code, so the
//! interpreter performs `ToPrimitive` first and hands the result down.

use crate::{
    atom::{AtomId, AtomTable},
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    string::{self},
};

/// A polymorphic ECMAScript value.
///
/// Invariants: integer-valued numbers representable in 32 bits are `Int32`
/// (negative zero stays `Double`); `Empty` marks array holes and
/// uninitialized slots and is converted to `Undefined` before any user-visible
/// read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Empty,
    Undefined,
    Null,
    Bool(bool),
    Int32(i32),
    Double(f64),
    InternStr(AtomId),
    Ref(crate::heap::HeapId),
}

impl Value {
    /// Wraps an `f64`, normalizing to the `Int32` fast path when the value
    /// is a non-negative-zero integer in range.
    #[must_use]
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0
            && n >= f64::from(i32::MIN)
            && n <= f64::from(i32::MAX)
            && !(n == 0.0 && n.is_sign_negative())
        {
            Self::Int32(n as i32)
        } else {
            Self::Double(n)
        }
    }

    #[must_use]
    pub fn from_u32(n: u32) -> Self {
        i32::try_from(n).map_or(Self::Double(f64::from(n)), Self::Int32)
    }

    #[must_use]
    pub fn is_empty_value(self) -> bool {
        matches!(self, Self::Empty)
    }

    /// `Empty` reads as `Undefined` everywhere user code can look.
    #[must_use]
    pub fn materialize(self) -> Self {
        if self.is_empty_value() { Self::Undefined } else { self }
    }

    #[must_use]
    pub fn is_number(self) -> bool {
        matches!(self, Self::Int32(_) | Self::Double(_))
    }

    /// Numeric payload when this is already a number.
    #[must_use]
    pub fn as_number(self) -> Option<f64> {
        match self {
            Self::Int32(i) => Some(f64::from(i)),
            Self::Double(d) => Some(d),
            _ => None,
        }
    }

    /// True when this value is a primitive (needs no `ToPrimitive`).
    pub fn is_primitive(self, heap: &Heap<impl ResourceTracker>) -> bool {
        match self {
            Self::Ref(id) => matches!(heap.get(id), HeapData::Str(_)),
            Self::Empty => false,
            _ => true,
        }
    }

    /// ToBoolean (ES5 9.2).
    pub fn to_boolean(self, heap: &Heap<impl ResourceTracker>, atoms: &AtomTable) -> bool {
        match self {
            Self::Empty | Self::Undefined | Self::Null => false,
            Self::Bool(b) => b,
            Self::Int32(i) => i != 0,
            Self::Double(d) => !(d == 0.0 || d.is_nan()),
            Self::InternStr(id) => !atoms.units(id).is_empty(),
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => s.len() != 0,
                _ => true,
            },
        }
    }

    /// ToNumber (ES5 9.3) over primitives. Objects must be reduced with
    /// `ToPrimitive` first; hitting one here is an interpreter bug and
    /// yields NaN in release builds.
    pub fn to_number(self, heap: &mut Heap<impl ResourceTracker>, atoms: &AtomTable) -> f64 {
        match self {
            Self::Empty | Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int32(i) => f64::from(i),
            Self::Double(d) => d,
            Self::InternStr(id) => str_to_number(atoms.units(id)),
            Self::Ref(id) => {
                if matches!(heap.get(id), HeapData::Str(_)) {
                    string::ensure_flat(heap, atoms, self);
                    str_to_number(string::flat_units(heap, atoms, self))
                } else {
                    debug_assert!(false, "ToNumber on an unconverted object");
                    f64::NAN
                }
            }
        }
    }

    /// The `typeof` string for primitives; the interpreter special-cases
    /// heap entities (callable objects report "function").
    pub fn type_of_primitive(self) -> Option<&'static str> {
        match self {
            Self::Empty | Self::Undefined => Some("undefined"),
            Self::Null => Some("object"),
            Self::Bool(_) => Some("boolean"),
            Self::Int32(_) | Self::Double(_) => Some("number"),
            Self::InternStr(_) => Some("string"),
            Self::Ref(_) => None,
        }
    }
}

/// ToInt32 (ES5 9.5): modular reduction into the signed 32-bit range.
#[must_use]
pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    const TWO_32: f64 = 4_294_967_296.0;
    const TWO_31: f64 = 2_147_483_648.0;
    let mut m = n.trunc() % TWO_32;
    if m < 0.0 {
        m += TWO_32;
    }
    if m >= TWO_31 { (m - TWO_32) as i32 } else { m as i32 }
}

/// ToUint32 (ES5 9.6).
#[must_use]
pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    const TWO_32: f64 = 4_294_967_296.0;
    let mut m = n.trunc() % TWO_32;
    if m < 0.0 {
        m += TWO_32;
    }
    m as u32
}

/// String-to-number (ES5 9.3.1): whitespace trim, `Infinity`, hex literals,
/// or the decimal grammar; anything else is NaN.
#[must_use]
pub(crate) fn str_to_number(units: &[u16]) -> f64 {
    let is_js_space =
        |u: u16| crate::lexer::is_white_space(u) || crate::lexer::is_line_terminator(u);
    let mut start = 0;
    let mut end = units.len();
    while start < end && is_js_space(units[start]) {
        start += 1;
    }
    while end > start && is_js_space(units[end - 1]) {
        end -= 1;
    }
    let trimmed = &units[start..end];
    if trimmed.is_empty() {
        return 0.0;
    }
    let Ok(text) = String::from_utf16(trimmed) else {
        return f64::NAN;
    };

    let (sign, rest) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text.strip_prefix('+').unwrap_or(&text)),
    };
    if rest == "Infinity" {
        return sign * f64::INFINITY;
    }
    if sign == 1.0
        && let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return f64::NAN;
        }
        let mut value = 0.0f64;
        for b in hex.bytes() {
            value = value * 16.0 + f64::from((b as char).to_digit(16).expect("checked hex digit"));
        }
        return value;
    }
    // Restrict to the StrDecimalLiteral alphabet before delegating to the
    // host float parser, which otherwise accepts "inf"/"nan" spellings.
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-')) {
        return f64::NAN;
    }
    rest.parse::<f64>().map_or(f64::NAN, |v| sign * v)
}

/// Number-to-string (ES5 9.8.1), shortest-representation digits from `ryu`
/// reformatted into the ES notation rules.
#[must_use]
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n == 0.0 {
        return "0".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    let negative = n < 0.0;
    let magnitude = n.abs();

    let mut buffer = ryu::Buffer::new();
    let shortest = buffer.format(magnitude);

    // Decompose into (digits, k, n) where value = 0.digits * 10^n and
    // k = digits.len(), then apply the ES5 9.8.1 layout cases.
    let (mantissa, exp10) = match shortest.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().expect("ryu exponent is an integer")),
        None => (shortest, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut digits: String = format!("{int_part}{frac_part}");
    let mut point = i32::try_from(int_part.len()).expect("mantissa fits i32") + exp10;
    // normalize: strip leading zeros (adjusting the point), then trailing
    while digits.starts_with('0') {
        digits.remove(0);
        point -= 1;
    }
    while digits.ends_with('0') {
        digits.pop();
    }
    debug_assert!(!digits.is_empty(), "zero handled above");

    let k = i32::try_from(digits.len()).expect("digit count fits i32");
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if k <= point && point <= 21 {
        out.push_str(&digits);
        for _ in 0..(point - k) {
            out.push('0');
        }
    } else if 0 < point && point <= 21 {
        out.push_str(&digits[..point as usize]);
        out.push('.');
        out.push_str(&digits[point as usize..]);
    } else if -6 < point && point <= 0 {
        out.push_str("0.");
        for _ in 0..-point {
            out.push('0');
        }
        out.push_str(&digits);
    } else {
        out.push_str(&digits[..1]);
        if k > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        let e = point - 1;
        if e >= 0 {
            out.push('+');
        }
        out.push_str(&e.to_string());
    }
    out
}

/// Renders a number value; `Int32` takes the integer fast path.
pub(crate) fn value_number_to_string(value: Value) -> String {
    match value {
        Value::Int32(i) => i.to_string(),
        Value::Double(d) => number_to_string(d),
        _ => {
            debug_assert!(false, "value_number_to_string on non-number");
            String::new()
        }
    }
}

/// Strict equality (ES5 11.9.6). String comparison may flatten ropes.
pub(crate) fn strict_equals(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    a: Value,
    b: Value,
) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Empty, Value::Undefined | Value::Empty) => true,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int32(x), Value::Int32(y)) => x == y,
        (Value::Int32(x), Value::Double(y)) => f64::from(x) == y,
        (Value::Double(x), Value::Int32(y)) => x == f64::from(y),
        (Value::Double(x), Value::Double(y)) => x == y,
        (Value::InternStr(x), Value::InternStr(y)) => x == y,
        (Value::InternStr(_) | Value::Ref(_), Value::InternStr(_) | Value::Ref(_)) => {
            let a_str = string::is_string_value(a, heap);
            let b_str = string::is_string_value(b, heap);
            match (a_str, b_str) {
                (true, true) => string::string_eq(heap, atoms, a, b),
                (false, false) => a == b, // object identity
                _ => false,
            }
        }
        _ => false,
    }
}

/// Abstract equality (ES5 11.9.3) over primitives. Object operands must be
/// reduced by the interpreter's `ToPrimitive` before calling this.
pub(crate) fn abstract_equals_primitive(
    heap: &mut Heap<impl ResourceTracker>,
    atoms: &AtomTable,
    a: Value,
    b: Value,
) -> bool {
    let a = a.materialize();
    let b = b.materialize();
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        _ => {
            let a_is_str = string::is_string_value(a, heap);
            let b_is_str = string::is_string_value(b, heap);
            if a_is_str && b_is_str {
                return string::string_eq(heap, atoms, a, b);
            }
            // remaining combinations compare numerically
            let x = a.to_number(heap, atoms);
            let y = b.to_number(heap, atoms);
            x == y
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_normalizes_to_int32() {
        assert_eq!(Value::number(5.0), Value::Int32(5));
        assert_eq!(Value::number(-1.0), Value::Int32(-1));
        assert_eq!(Value::number(2_147_483_647.0), Value::Int32(i32::MAX));
        assert!(matches!(Value::number(2_147_483_648.0), Value::Double(_)));
        assert!(matches!(Value::number(0.5), Value::Double(_)));
        // negative zero must not collapse into Int32(0)
        assert!(matches!(Value::number(-0.0), Value::Double(_)));
    }

    #[test]
    fn to_int32_wraps_modularly() {
        assert_eq!(to_int32(0.0), 0);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
        assert_eq!(to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(to_int32(4_294_967_296.0), 0);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_uint32(-1.0), u32::MAX);
    }

    #[test]
    fn str_to_number_grammar() {
        let units = |s: &str| s.encode_utf16().collect::<Vec<_>>();
        assert_eq!(str_to_number(&units("  42  ")), 42.0);
        assert_eq!(str_to_number(&units("")), 0.0);
        assert_eq!(str_to_number(&units("0x10")), 16.0);
        assert_eq!(str_to_number(&units("-Infinity")), f64::NEG_INFINITY);
        assert_eq!(str_to_number(&units("+1.5e2")), 150.0);
        assert!(str_to_number(&units("12px")).is_nan());
        assert!(str_to_number(&units("inf")).is_nan());
        assert!(str_to_number(&units("1 2")).is_nan());
    }

    #[test]
    fn number_to_string_es_format() {
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(0.0), "0");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-1.5), "-1.5");
        assert_eq!(number_to_string(100.0), "100");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(0.0000001), "1e-7");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e21), "1.5e+21");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
    }
}
