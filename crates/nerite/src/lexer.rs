//! ECMAScript 5.1 token scanner.
//!
//! Pull-based: the parser keeps a one-token lookahead and calls
//! [`Lexer::next_token`] to refill it. The scanner tracks `(index,
//! line_number, line_start)` over a UTF-16 [`SourceBuffer`] and reports
//! whether a line terminator was crossed before each token, which drives
//! automatic semicolon insertion and the restricted productions
//! (`return`/`break`/`continue`/postfix `++`).
//!
//! Regular-expression bodies cannot be scanned with one-token lookahead
//! (whether `/` starts a regex or a division depends on the parser state), so
//! the parser re-enters the scanner via [`Lexer::rescan_as_regex`] at the
//! positions where a regex is grammatically possible.

use crate::{
    error::{RunError, RunResult, STACK_OVERFLOW_MESSAGE},
    source::SourceBuffer,
};

/// Classification of a scanned token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    BooleanLiteral,
    Eof,
    Identifier,
    Keyword,
    NullLiteral,
    NumericLiteral,
    Punctuator,
    StringLiteral,
    RegularExpression,
    Template,
}

/// ES5 keywords plus the future reserved words the parser must recognize to
/// reject (`class`, `const`, ...) or to police in strict mode (`let`,
/// `yield`, and friends are handled as identifiers with checks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::IntoStaticStr, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    If,
    In,
    Do,
    Var,
    For,
    New,
    Try,
    This,
    Else,
    Case,
    Void,
    With,
    Enum,
    While,
    Break,
    Catch,
    Throw,
    Const,
    Class,
    Super,
    Return,
    Typeof,
    Delete,
    Switch,
    Export,
    Import,
    Default,
    Finally,
    Extends,
    Function,
    Continue,
    Debugger,
    Instanceof,
}

impl Keyword {
    /// Keywords that may directly precede a regular expression literal.
    #[must_use]
    pub fn allows_regex_after(self) -> bool {
        !matches!(self, Self::This)
    }
}

/// Punctuator tags, matched longest-first and stored numerically so later
/// comparisons are integer equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    Question,
    Colon,
    Tilde,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    NotEq,
    StrictEq,
    NotStrictEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    LtLt,
    GtGt,
    GtGtGt,
    Amp,
    Pipe,
    Caret,
    Bang,
    AmpAmp,
    PipePipe,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    LtLtAssign,
    GtGtAssign,
    GtGtGtAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    Arrow,
    Ellipsis,
}

impl Punct {
    /// Binary-operator precedence used by the expression parser's climbing
    /// loop. `in` and `instanceof` carry precedence 7 through the keyword
    /// path. 0 means "not a binary operator".
    #[must_use]
    pub fn binary_precedence(self, allow_in: bool) -> u8 {
        match self {
            Self::PipePipe => 1,
            Self::AmpAmp => 2,
            Self::Pipe => 3,
            Self::Caret => 4,
            Self::Amp => 5,
            Self::Eq | Self::NotEq | Self::StrictEq | Self::NotStrictEq => 6,
            Self::Lt | Self::Gt | Self::LtEq | Self::GtEq => 7,
            Self::LtLt | Self::GtGt | Self::GtGtGt => 8,
            Self::Plus | Self::Minus => 9,
            Self::Star | Self::Slash | Self::Percent => 11,
            _ => {
                let _ = allow_in;
                0
            }
        }
    }

    /// Source text of the punctuator, for diagnostics.
    #[must_use]
    pub fn text(self) -> &'static str {
        match self {
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Question => "?",
            Self::Colon => ":",
            Self::Tilde => "~",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::StrictEq => "===",
            Self::NotStrictEq => "!==",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::LtLt => "<<",
            Self::GtGt => ">>",
            Self::GtGtGt => ">>>",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::Caret => "^",
            Self::Bang => "!",
            Self::AmpAmp => "&&",
            Self::PipePipe => "||",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::StarAssign => "*=",
            Self::SlashAssign => "/=",
            Self::PercentAssign => "%=",
            Self::LtLtAssign => "<<=",
            Self::GtGtAssign => ">>=",
            Self::GtGtGtAssign => ">>>=",
            Self::AmpAssign => "&=",
            Self::PipeAssign => "|=",
            Self::CaretAssign => "^=",
            Self::Arrow => "=>",
            Self::Ellipsis => "...",
        }
    }
}

/// Payload carried by a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    /// Identifier or keyword spelling. Also holds regex flags? No -- regex
    /// carries its own variant below.
    Ident(String),
    Number(f64),
    /// Cooked string value as UTF-16 units (escapes may produce lone
    /// surrogates, which are legal JS string contents).
    Str(Vec<u16>),
    Regex {
        body: String,
        flags: String,
    },
    /// Raw span of a template chunk. Templates are scanned for lexical
    /// correctness but rejected by the parser.
    Template(String),
}

/// One scanned token with position and flag metadata.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub value: TokenValue,
    pub punct: Option<Punct>,
    pub keyword: Option<Keyword>,
    pub start: u32,
    pub end: u32,
    pub line_number: u32,
    pub line_start: u32,
    /// A line terminator was crossed between the previous token and this one.
    pub preceded_by_newline: bool,
    /// The literal contained an octal escape or was a legacy octal number.
    pub octal: bool,
    /// Template-part flags.
    pub head: bool,
    pub tail: bool,
    /// Scratch precedence used by the binary-expression climber.
    pub prec: u8,
}

impl Token {
    fn at(kind: TokenKind, lexer: &Lexer<'_>, start: usize) -> Self {
        Self {
            kind,
            value: TokenValue::None,
            punct: None,
            keyword: None,
            start: start as u32,
            end: lexer.index as u32,
            line_number: lexer.line_number,
            line_start: lexer.line_start as u32,
            preceded_by_newline: lexer.saw_newline,
            octal: false,
            head: false,
            tail: false,
            prec: 0,
        }
    }

    #[must_use]
    pub fn is_punct(&self, p: Punct) -> bool {
        self.punct == Some(p)
    }

    #[must_use]
    pub fn is_keyword(&self, k: Keyword) -> bool {
        self.keyword == Some(k)
    }

    /// Identifier spelling, when this token is an identifier.
    #[must_use]
    pub fn ident_text(&self) -> Option<&str> {
        match &self.value {
            TokenValue::Ident(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable description for `Unexpected <token>` diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of input".to_owned(),
            TokenKind::NumericLiteral => "number".to_owned(),
            TokenKind::StringLiteral => "string".to_owned(),
            TokenKind::Template => "template literal".to_owned(),
            TokenKind::RegularExpression => "regular expression".to_owned(),
            TokenKind::Punctuator => self.punct.map_or_else(|| "punctuator".to_owned(), |p| format!("'{}'", p.text())),
            _ => match &self.value {
                TokenValue::Ident(s) => format!("'{s}'"),
                _ => "token".to_owned(),
            },
        }
    }
}

const CHAR_TAB: u16 = 0x09;
const CHAR_VT: u16 = 0x0B;
const CHAR_FF: u16 = 0x0C;
const CHAR_SP: u16 = 0x20;
const CHAR_NBSP: u16 = 0xA0;
const CHAR_BOM: u16 = 0xFEFF;
const CHAR_LF: u16 = 0x0A;
const CHAR_CR: u16 = 0x0D;
const CHAR_LS: u16 = 0x2028;
const CHAR_PS: u16 = 0x2029;
const CHAR_ZWNJ: u32 = 0x200C;
const CHAR_ZWJ: u32 = 0x200D;

/// Maximum nesting for the identifier/escape re-entry path. Pathological
/// inputs full of `\u` escapes otherwise recurse per escape.
const MAX_SCAN_DEPTH: u32 = 2048;

#[must_use]
pub fn is_white_space(cp: u16) -> bool {
    matches!(cp, CHAR_TAB | CHAR_VT | CHAR_FF | CHAR_SP | CHAR_NBSP | CHAR_BOM)
        || matches!(
            cp,
            0x1680 | 0x2000..=0x200A | 0x202F | 0x205F | 0x3000
        )
}

#[must_use]
pub fn is_line_terminator(cp: u16) -> bool {
    matches!(cp, CHAR_LF | CHAR_CR | CHAR_LS | CHAR_PS)
}

/// Identifier-start classification. The Unicode letter tables are an
/// external collaborator; `char::is_alphabetic` stands in for them.
#[must_use]
pub fn is_identifier_start(cp: u32) -> bool {
    cp == u32::from(b'$')
        || cp == u32::from(b'_')
        || cp == u32::from(b'\\')
        || char::from_u32(cp).is_some_and(char::is_alphabetic)
}

/// Identifier-part classification: start characters plus digits, combining
/// marks (via `is_alphanumeric`), ZWNJ, and ZWJ.
#[must_use]
pub fn is_identifier_part(cp: u32) -> bool {
    cp == u32::from(b'$')
        || cp == u32::from(b'_')
        || cp == u32::from(b'\\')
        || cp == CHAR_ZWNJ
        || cp == CHAR_ZWJ
        || char::from_u32(cp).is_some_and(char::is_alphanumeric)
}

fn is_decimal_digit(cp: u16) -> bool {
    (u16::from(b'0')..=u16::from(b'9')).contains(&cp)
}

fn is_octal_digit(cp: u16) -> bool {
    (u16::from(b'0')..=u16::from(b'7')).contains(&cp)
}

fn is_hex_digit(cp: u16) -> bool {
    is_decimal_digit(cp)
        || (u16::from(b'a')..=u16::from(b'f')).contains(&cp)
        || (u16::from(b'A')..=u16::from(b'F')).contains(&cp)
}

fn hex_value(cp: u16) -> u32 {
    let c = cp as u8 as char;
    c.to_digit(16).expect("caller checked hex digit")
}

/// Which kind of `{` sits on the template curly stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurlyKind {
    Brace,
    TemplateSubstitution,
}

/// The scanner state over one source buffer.
#[derive(Debug)]
pub struct Lexer<'a> {
    source: &'a SourceBuffer,
    pub index: usize,
    pub line_number: u32,
    pub line_start: usize,
    /// Set by comment/whitespace skipping when a terminator was crossed;
    /// copied onto the next token and reset.
    saw_newline: bool,
    curly_stack: Vec<CurlyKind>,
    depth: u32,
}

/// Opaque snapshot of scanner position, used by the parser for the one-token
/// rewind that disambiguates labels from expression statements.
#[derive(Debug, Clone)]
pub struct LexerState {
    index: usize,
    line_number: u32,
    line_start: usize,
    curly_stack: Vec<CurlyKind>,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a SourceBuffer) -> Self {
        Self {
            source,
            index: 0,
            line_number: 1,
            line_start: 0,
            saw_newline: false,
            curly_stack: Vec::new(),
            depth: 0,
        }
    }

    #[must_use]
    pub fn eof(&self) -> bool {
        self.index >= self.source.len()
    }

    fn unit(&self, at: usize) -> u16 {
        self.source.unit(at)
    }

    fn err_here(&self, message: &str) -> RunError {
        RunError::syntax(message, self.line_number)
    }

    fn err_illegal(&self) -> RunError {
        self.err_here("Unexpected token ILLEGAL")
    }

    /// Captures the scanner position for a bounded rewind.
    #[must_use]
    pub fn state(&self) -> LexerState {
        LexerState {
            index: self.index,
            line_number: self.line_number,
            line_start: self.line_start,
            curly_stack: self.curly_stack.clone(),
        }
    }

    /// Rewinds to a previously captured position.
    pub fn restore(&mut self, state: LexerState) {
        self.index = state.index;
        self.line_number = state.line_number;
        self.line_start = state.line_start;
        self.curly_stack = state.curly_stack;
    }

    /// Skips white space and comments, maintaining line bookkeeping and the
    /// crossed-a-newline flag. Handles `//`, `/* */`, and the HTML comment
    /// forms `<!--` and (at line start) `-->`.
    fn skip_comments(&mut self) -> RunResult<()> {
        self.saw_newline = false;
        let mut at_line_start = self.index == 0;
        while !self.eof() {
            let ch = self.unit(self.index);
            if is_white_space(ch) {
                self.index += 1;
            } else if is_line_terminator(ch) {
                self.index += 1;
                if ch == CHAR_CR && self.unit(self.index) == CHAR_LF {
                    self.index += 1;
                }
                self.line_number += 1;
                self.line_start = self.index;
                self.saw_newline = true;
                at_line_start = true;
            } else if ch == u16::from(b'/') {
                let next = self.unit(self.index + 1);
                if next == u16::from(b'/') {
                    self.index += 2;
                    self.skip_single_line_comment();
                } else if next == u16::from(b'*') {
                    self.index += 2;
                    self.skip_multi_line_comment()?;
                } else {
                    break;
                }
            } else if ch == u16::from(b'<')
                && self.unit(self.index + 1) == u16::from(b'!')
                && self.unit(self.index + 2) == u16::from(b'-')
                && self.unit(self.index + 3) == u16::from(b'-')
            {
                self.index += 4;
                self.skip_single_line_comment();
            } else if at_line_start
                && ch == u16::from(b'-')
                && self.unit(self.index + 1) == u16::from(b'-')
                && self.unit(self.index + 2) == u16::from(b'>')
            {
                self.index += 3;
                self.skip_single_line_comment();
            } else {
                break;
            }
        }
        Ok(())
    }

    fn skip_single_line_comment(&mut self) {
        while !self.eof() {
            let ch = self.unit(self.index);
            if is_line_terminator(ch) {
                break;
            }
            self.index += 1;
        }
    }

    fn skip_multi_line_comment(&mut self) -> RunResult<()> {
        while !self.eof() {
            let ch = self.unit(self.index);
            if is_line_terminator(ch) {
                self.index += 1;
                if ch == CHAR_CR && self.unit(self.index) == CHAR_LF {
                    self.index += 1;
                }
                self.line_number += 1;
                self.line_start = self.index;
                self.saw_newline = true;
            } else if ch == u16::from(b'*') && self.unit(self.index + 1) == u16::from(b'/') {
                self.index += 2;
                return Ok(());
            } else {
                self.index += 1;
            }
        }
        Err(self.err_here("Unterminated comment"))
    }

    /// Scans the next token.
    pub fn next_token(&mut self) -> RunResult<Token> {
        self.skip_comments()?;
        if self.eof() {
            let mut tok = Token::at(TokenKind::Eof, self, self.index);
            tok.preceded_by_newline = self.saw_newline;
            return Ok(tok);
        }
        let ch = self.unit(self.index);
        let cp = self.source.code_point(self.index).0;

        if is_identifier_start(cp) {
            return self.scan_identifier();
        }
        // Common punctuators before the generic matcher: ( ) ;
        if ch == u16::from(b'(') || ch == u16::from(b')') || ch == u16::from(b';') {
            return self.scan_punctuator();
        }
        if ch == u16::from(b'\'') || ch == u16::from(b'"') {
            return self.scan_string();
        }
        if ch == u16::from(b'.') {
            if is_decimal_digit(self.unit(self.index + 1)) {
                return self.scan_numeric();
            }
            return self.scan_punctuator();
        }
        if is_decimal_digit(ch) {
            return self.scan_numeric();
        }
        if ch == u16::from(b'`')
            || (ch == u16::from(b'}') && self.curly_stack.last() == Some(&CurlyKind::TemplateSubstitution))
        {
            return self.scan_template();
        }
        self.scan_punctuator()
    }

    // ------------------------------------------------------------------
    // Identifiers and keywords
    // ------------------------------------------------------------------

    fn scan_identifier(&mut self) -> RunResult<Token> {
        self.depth += 1;
        if self.depth > MAX_SCAN_DEPTH {
            self.depth = 0;
            return Err(RunError::range(STACK_OVERFLOW_MESSAGE).with_line(self.line_number));
        }
        let start = self.index;
        let (name, had_escape) = self.get_identifier()?;
        self.depth -= 1;

        let mut tok = Token::at(TokenKind::Identifier, self, start);
        if name.len() == 1 {
            tok.kind = TokenKind::Identifier;
        } else if let Ok(kw) = name.parse::<Keyword>() {
            // A keyword spelled with escapes is not a keyword.
            if had_escape {
                return Err(self.err_illegal());
            }
            tok.kind = TokenKind::Keyword;
            tok.keyword = Some(kw);
        } else if name == "null" {
            tok.kind = TokenKind::NullLiteral;
        } else if name == "true" || name == "false" {
            tok.kind = TokenKind::BooleanLiteral;
        }
        tok.end = self.index as u32;
        tok.value = TokenValue::Ident(name);
        Ok(tok)
    }

    /// Consumes identifier characters, decoding `\u` escapes.
    fn get_identifier(&mut self) -> RunResult<(String, bool)> {
        let mut name = String::new();
        let mut had_escape = false;
        let mut first = true;
        while !self.eof() {
            let (cp, width) = self.source.code_point(self.index);
            if cp == u32::from(b'\\') {
                had_escape = true;
                self.index += 1;
                if self.unit(self.index) != u16::from(b'u') {
                    return Err(self.err_illegal());
                }
                self.index += 1;
                let decoded = self.scan_unicode_escape()?;
                let valid = if first {
                    is_identifier_start(decoded) && decoded != u32::from(b'\\')
                } else {
                    is_identifier_part(decoded) && decoded != u32::from(b'\\')
                };
                if !valid {
                    return Err(self.err_illegal());
                }
                name.push(char::from_u32(decoded).ok_or_else(|| self.err_illegal())?);
            } else {
                let valid = if first {
                    is_identifier_start(cp)
                } else {
                    is_identifier_part(cp)
                };
                if !valid {
                    break;
                }
                name.push(char::from_u32(cp).ok_or_else(|| self.err_illegal())?);
                self.index += width;
            }
            first = false;
        }
        if name.is_empty() {
            return Err(self.err_illegal());
        }
        Ok((name, had_escape))
    }

    /// Decodes `\uXXXX` or `\u{...}` with the cursor just past the `u`.
    fn scan_unicode_escape(&mut self) -> RunResult<u32> {
        if self.unit(self.index) == u16::from(b'{') {
            self.index += 1;
            let mut value: u32 = 0;
            let mut any = false;
            while !self.eof() && self.unit(self.index) != u16::from(b'}') {
                let ch = self.unit(self.index);
                if !is_hex_digit(ch) {
                    return Err(self.err_illegal());
                }
                value = value
                    .checked_mul(16)
                    .and_then(|v| v.checked_add(hex_value(ch)))
                    .ok_or_else(|| self.err_illegal())?;
                if value > 0x0010_FFFF {
                    return Err(self.err_illegal());
                }
                any = true;
                self.index += 1;
            }
            if !any || self.unit(self.index) != u16::from(b'}') {
                return Err(self.err_illegal());
            }
            self.index += 1;
            Ok(value)
        } else {
            let mut value: u32 = 0;
            for _ in 0..4 {
                let ch = self.unit(self.index);
                if !is_hex_digit(ch) {
                    return Err(self.err_illegal());
                }
                value = value * 16 + hex_value(ch);
                self.index += 1;
            }
            Ok(value)
        }
    }

    // ------------------------------------------------------------------
    // Punctuators
    // ------------------------------------------------------------------

    /// ASCII view of a unit; non-ASCII maps to NUL so it can never alias a
    /// punctuator.
    fn ascii_at(&self, at: usize) -> char {
        let unit = self.unit(at);
        if unit < 0x80 { unit as u8 as char } else { '\0' }
    }

    fn scan_punctuator(&mut self) -> RunResult<Token> {
        let start = self.index;
        let c0 = self.ascii_at(self.index);
        let c1 = self.ascii_at(self.index + 1);
        let c2 = self.ascii_at(self.index + 2);
        let c3 = self.ascii_at(self.index + 3);

        let (punct, len) = match (c0, c1, c2, c3) {
            ('>', '>', '>', '=') => (Punct::GtGtGtAssign, 4),
            ('>', '>', '>', _) => (Punct::GtGtGt, 3),
            ('<', '<', '=', _) => (Punct::LtLtAssign, 3),
            ('>', '>', '=', _) => (Punct::GtGtAssign, 3),
            ('=', '=', '=', _) => (Punct::StrictEq, 3),
            ('!', '=', '=', _) => (Punct::NotStrictEq, 3),
            ('.', '.', '.', _) => (Punct::Ellipsis, 3),
            ('&', '&', _, _) => (Punct::AmpAmp, 2),
            ('|', '|', _, _) => (Punct::PipePipe, 2),
            ('=', '=', _, _) => (Punct::Eq, 2),
            ('!', '=', _, _) => (Punct::NotEq, 2),
            ('+', '+', _, _) => (Punct::PlusPlus, 2),
            ('-', '-', _, _) => (Punct::MinusMinus, 2),
            ('<', '<', _, _) => (Punct::LtLt, 2),
            ('>', '>', _, _) => (Punct::GtGt, 2),
            ('&', '=', _, _) => (Punct::AmpAssign, 2),
            ('|', '=', _, _) => (Punct::PipeAssign, 2),
            ('^', '=', _, _) => (Punct::CaretAssign, 2),
            ('%', '=', _, _) => (Punct::PercentAssign, 2),
            ('+', '=', _, _) => (Punct::PlusAssign, 2),
            ('-', '=', _, _) => (Punct::MinusAssign, 2),
            ('*', '=', _, _) => (Punct::StarAssign, 2),
            ('/', '=', _, _) => (Punct::SlashAssign, 2),
            ('<', '=', _, _) => (Punct::LtEq, 2),
            ('>', '=', _, _) => (Punct::GtEq, 2),
            ('=', '>', _, _) => (Punct::Arrow, 2),
            ('{', ..) => (Punct::LBrace, 1),
            ('}', ..) => (Punct::RBrace, 1),
            ('(', ..) => (Punct::LParen, 1),
            (')', ..) => (Punct::RParen, 1),
            ('[', ..) => (Punct::LBracket, 1),
            (']', ..) => (Punct::RBracket, 1),
            (';', ..) => (Punct::Semicolon, 1),
            (',', ..) => (Punct::Comma, 1),
            ('.', ..) => (Punct::Dot, 1),
            ('?', ..) => (Punct::Question, 1),
            (':', ..) => (Punct::Colon, 1),
            ('~', ..) => (Punct::Tilde, 1),
            ('<', ..) => (Punct::Lt, 1),
            ('>', ..) => (Punct::Gt, 1),
            ('=', ..) => (Punct::Assign, 1),
            ('+', ..) => (Punct::Plus, 1),
            ('-', ..) => (Punct::Minus, 1),
            ('*', ..) => (Punct::Star, 1),
            ('/', ..) => (Punct::Slash, 1),
            ('%', ..) => (Punct::Percent, 1),
            ('&', ..) => (Punct::Amp, 1),
            ('|', ..) => (Punct::Pipe, 1),
            ('^', ..) => (Punct::Caret, 1),
            ('!', ..) => (Punct::Bang, 1),
            _ => return Err(self.err_illegal()),
        };
        if punct == Punct::LBrace {
            self.curly_stack.push(CurlyKind::Brace);
        } else if punct == Punct::RBrace {
            self.curly_stack.pop();
        }
        self.index += len;
        let mut tok = Token::at(TokenKind::Punctuator, self, start);
        tok.punct = Some(punct);
        Ok(tok)
    }

    // ------------------------------------------------------------------
    // Numeric literals
    // ------------------------------------------------------------------

    fn scan_numeric(&mut self) -> RunResult<Token> {
        let start = self.index;
        let first = self.unit(self.index);

        if first == u16::from(b'0') {
            let second = self.unit(self.index + 1);
            match second as u8 {
                b'x' | b'X' => return self.scan_radix_literal(start, 16, is_hex_digit),
                b'o' | b'O' => return self.scan_radix_literal(start, 8, is_octal_digit),
                b'b' | b'B' => {
                    return self.scan_radix_literal(start, 2, |c| {
                        c == u16::from(b'0') || c == u16::from(b'1')
                    });
                }
                _ => {
                    if is_octal_digit(second) {
                        return self.scan_implicit_octal(start);
                    }
                    if is_decimal_digit(second) {
                        // "08" / "09" fall through to decimal per Annex B
                    }
                }
            }
        }
        self.scan_decimal(start)
    }

    fn scan_radix_literal(&mut self, start: usize, radix: u32, is_digit: fn(u16) -> bool) -> RunResult<Token> {
        self.index += 2; // 0x / 0o / 0b
        let digits_start = self.index;
        let mut value: f64 = 0.0;
        while !self.eof() && is_digit(self.unit(self.index)) {
            value = value * f64::from(radix) + f64::from(hex_value(self.unit(self.index)));
            self.index += 1;
        }
        if self.index == digits_start {
            return Err(self.err_illegal());
        }
        if is_identifier_part(self.source.code_point(self.index).0) && !self.eof() {
            return Err(self.err_illegal());
        }
        let mut tok = Token::at(TokenKind::NumericLiteral, self, start);
        tok.value = TokenValue::Number(value);
        Ok(tok)
    }

    fn scan_implicit_octal(&mut self, start: usize) -> RunResult<Token> {
        self.index += 1; // leading 0
        let mut value: f64 = 0.0;
        while !self.eof() && is_octal_digit(self.unit(self.index)) {
            value = value * 8.0 + f64::from(hex_value(self.unit(self.index)));
            self.index += 1;
        }
        // A trailing 8/9 turns the whole literal decimal ("0128" == 128? no:
        // it reparses as decimal per Annex B handling of 08/09 digits).
        if is_decimal_digit(self.unit(self.index)) {
            self.index = start;
            return self.scan_decimal(start);
        }
        if is_identifier_part(self.source.code_point(self.index).0) && !self.eof() {
            return Err(self.err_illegal());
        }
        let mut tok = Token::at(TokenKind::NumericLiteral, self, start);
        tok.value = TokenValue::Number(value);
        tok.octal = true;
        Ok(tok)
    }

    fn scan_decimal(&mut self, start: usize) -> RunResult<Token> {
        while is_decimal_digit(self.unit(self.index)) {
            self.index += 1;
        }
        if self.unit(self.index) == u16::from(b'.') {
            self.index += 1;
            while is_decimal_digit(self.unit(self.index)) {
                self.index += 1;
            }
        }
        let exp_ch = self.unit(self.index) as u8;
        if exp_ch == b'e' || exp_ch == b'E' {
            self.index += 1;
            let sign = self.unit(self.index) as u8;
            if sign == b'+' || sign == b'-' {
                self.index += 1;
            }
            if !is_decimal_digit(self.unit(self.index)) {
                return Err(self.err_illegal());
            }
            while is_decimal_digit(self.unit(self.index)) {
                self.index += 1;
            }
        }
        if is_identifier_part(self.source.code_point(self.index).0) && !self.eof() {
            return Err(self.err_illegal());
        }
        let text = self.source.slice_string(start, self.index);
        let value: f64 = text.parse().map_err(|_| self.err_illegal())?;
        let mut tok = Token::at(TokenKind::NumericLiteral, self, start);
        tok.value = TokenValue::Number(value);
        Ok(tok)
    }

    // ------------------------------------------------------------------
    // String literals
    // ------------------------------------------------------------------

    fn scan_string(&mut self) -> RunResult<Token> {
        let start = self.index;
        let quote = self.unit(self.index);
        self.index += 1;
        let mut cooked: Vec<u16> = Vec::new();
        let mut octal = false;

        loop {
            if self.eof() {
                return Err(self.err_illegal());
            }
            let ch = self.unit(self.index);
            if ch == quote {
                self.index += 1;
                break;
            }
            if is_line_terminator(ch) {
                return Err(self.err_illegal());
            }
            if ch == u16::from(b'\\') {
                self.index += 1;
                let esc = self.unit(self.index);
                if is_line_terminator(esc) {
                    // line continuation: consumed, contributes nothing
                    self.index += 1;
                    if esc == CHAR_CR && self.unit(self.index) == CHAR_LF {
                        self.index += 1;
                    }
                    self.line_number += 1;
                    self.line_start = self.index;
                    continue;
                }
                // non-ASCII escaped characters fall to the identity arm
                match if esc < 0x80 { esc as u8 } else { 0 } {
                    b'u' => {
                        self.index += 1;
                        let cp = self.scan_unicode_escape()?;
                        push_code_point(&mut cooked, cp);
                    }
                    b'x' => {
                        self.index += 1;
                        let h0 = self.unit(self.index);
                        let h1 = self.unit(self.index + 1);
                        if !is_hex_digit(h0) || !is_hex_digit(h1) {
                            return Err(self.err_illegal());
                        }
                        cooked.push((hex_value(h0) * 16 + hex_value(h1)) as u16);
                        self.index += 2;
                    }
                    b'n' => {
                        cooked.push(CHAR_LF);
                        self.index += 1;
                    }
                    b'r' => {
                        cooked.push(CHAR_CR);
                        self.index += 1;
                    }
                    b't' => {
                        cooked.push(CHAR_TAB);
                        self.index += 1;
                    }
                    b'b' => {
                        cooked.push(0x08);
                        self.index += 1;
                    }
                    b'f' => {
                        cooked.push(CHAR_FF);
                        self.index += 1;
                    }
                    b'v' => {
                        cooked.push(CHAR_VT);
                        self.index += 1;
                    }
                    b'0'..=b'7' => {
                        // Octal escape: 1-3 digits; first digit 0-3 allows a
                        // third digit, 4-7 allows at most two.
                        let d0 = u32::from(esc - u16::from(b'0'));
                        self.index += 1;
                        let mut value = d0;
                        let mut digits = 1;
                        let max_digits = if d0 <= 3 { 3 } else { 2 };
                        while digits < max_digits && is_octal_digit(self.unit(self.index)) {
                            value = value * 8 + u32::from(self.unit(self.index) - u16::from(b'0'));
                            self.index += 1;
                            digits += 1;
                        }
                        // a lone \0 not followed by a digit is NUL, not octal
                        if !(d0 == 0 && digits == 1 && !is_decimal_digit(self.unit(self.index))) {
                            octal = true;
                        }
                        cooked.push(value as u16);
                    }
                    b'8' | b'9' => {
                        // \8 and \9 pass the digit through unchanged
                        cooked.push(esc);
                        self.index += 1;
                    }
                    _ => {
                        // any other escaped character is itself
                        let (cp, width) = self.source.code_point(self.index);
                        push_code_point(&mut cooked, cp);
                        self.index += width;
                    }
                }
            } else {
                cooked.push(ch);
                self.index += 1;
            }
        }

        let mut tok = Token::at(TokenKind::StringLiteral, self, start);
        tok.value = TokenValue::Str(cooked);
        tok.octal = octal;
        Ok(tok)
    }

    // ------------------------------------------------------------------
    // Template literals (scanned, then rejected by the parser)
    // ------------------------------------------------------------------

    fn scan_template(&mut self) -> RunResult<Token> {
        let start = self.index;
        let head = self.unit(self.index) == u16::from(b'`');
        self.index += 1;
        if !head {
            // resuming after a `}` that closes a substitution
            self.curly_stack.pop();
        }
        let mut tail = false;
        loop {
            if self.eof() {
                return Err(self.err_illegal());
            }
            let ch = self.unit(self.index);
            if ch == u16::from(b'`') {
                self.index += 1;
                tail = true;
                break;
            }
            if ch == u16::from(b'$') && self.unit(self.index + 1) == u16::from(b'{') {
                self.curly_stack.push(CurlyKind::TemplateSubstitution);
                self.index += 2;
                break;
            }
            if ch == u16::from(b'\\') {
                self.index += 2;
                continue;
            }
            if is_line_terminator(ch) {
                self.index += 1;
                if ch == CHAR_CR && self.unit(self.index) == CHAR_LF {
                    self.index += 1;
                }
                self.line_number += 1;
                self.line_start = self.index;
                continue;
            }
            self.index += 1;
        }
        let mut tok = Token::at(TokenKind::Template, self, start);
        tok.head = head;
        tok.tail = tail;
        tok.value = TokenValue::Template(self.source.slice_string(start, self.index));
        Ok(tok)
    }

    // ------------------------------------------------------------------
    // Regular expression literals
    // ------------------------------------------------------------------

    /// Re-scans a regular expression literal starting at `start`, which must
    /// be the offset of a previously scanned `/` or `/=` token. The parser
    /// calls this in contexts where `/` cannot be division.
    pub fn rescan_as_regex(&mut self, start: usize) -> RunResult<Token> {
        self.index = start;
        debug_assert_eq!(self.unit(self.index), u16::from(b'/'));
        self.index += 1;

        let body_start = self.index;
        let mut in_class = false;
        loop {
            if self.eof() {
                return Err(self.err_here("Invalid regular expression: missing /"));
            }
            let ch = self.unit(self.index);
            if is_line_terminator(ch) {
                return Err(self.err_here("Invalid regular expression: missing /"));
            }
            if ch == u16::from(b'\\') {
                self.index += 1;
                if self.eof() || is_line_terminator(self.unit(self.index)) {
                    return Err(self.err_here("Invalid regular expression: missing /"));
                }
                self.index += 1;
                continue;
            }
            if ch == u16::from(b'[') {
                in_class = true;
            } else if ch == u16::from(b']') {
                in_class = false;
            } else if ch == u16::from(b'/') && !in_class {
                break;
            }
            self.index += 1;
        }
        let body = self.source.slice_string(body_start, self.index);
        if body.is_empty() {
            return Err(self.err_here("Invalid regular expression: empty pattern"));
        }
        self.index += 1; // closing /

        let flags_start = self.index;
        while !self.eof() && is_identifier_part(self.source.code_point(self.index).0) {
            let (cp, width) = self.source.code_point(self.index);
            if cp == u32::from(b'\\') {
                return Err(self.err_here("Invalid regular expression flags"));
            }
            self.index += width;
        }
        let flags = self.source.slice_string(flags_start, self.index);

        let mut tok = Token::at(TokenKind::RegularExpression, self, start);
        tok.value = TokenValue::Regex { body, flags };
        Ok(tok)
    }
}

/// Appends a code point as one or two UTF-16 units.
fn push_code_point(units: &mut Vec<u16>, cp: u32) {
    if cp <= 0xFFFF {
        units.push(cp as u16);
    } else {
        let v = cp - 0x10000;
        units.push(0xD800 + (v >> 10) as u16);
        units.push(0xDC00 + (v & 0x3FF) as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<Token> {
        let buf = SourceBuffer::new(src);
        let mut lexer = Lexer::new(&buf);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token().expect("lex error");
            let eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if eof {
                break;
            }
        }
        tokens
    }

    fn lex_one(src: &str) -> Token {
        lex_all(src).into_iter().next().expect("at least one token")
    }

    #[test]
    fn keywords_and_identifiers() {
        let toks = lex_all("var x = typeof y;");
        assert_eq!(toks[0].keyword, Some(Keyword::Var));
        assert_eq!(toks[1].ident_text(), Some("x"));
        assert!(toks[2].is_punct(Punct::Assign));
        assert_eq!(toks[3].keyword, Some(Keyword::Typeof));
        assert_eq!(toks[5].punct, Some(Punct::Semicolon));
    }

    #[test]
    fn escaped_keyword_is_rejected() {
        let buf = SourceBuffer::new("\\u0076ar x");
        let mut lexer = Lexer::new(&buf);
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn numeric_forms() {
        assert_eq!(lex_one("42").value, TokenValue::Number(42.0));
        assert_eq!(lex_one("0x1F").value, TokenValue::Number(31.0));
        assert_eq!(lex_one("0o17").value, TokenValue::Number(15.0));
        assert_eq!(lex_one("0b101").value, TokenValue::Number(5.0));
        assert_eq!(lex_one(".5").value, TokenValue::Number(0.5));
        assert_eq!(lex_one("1e3").value, TokenValue::Number(1000.0));
        let implicit = lex_one("0777");
        assert_eq!(implicit.value, TokenValue::Number(511.0));
        assert!(implicit.octal);
        // 08 reparses as decimal, no octal flag
        let decimal = lex_one("089");
        assert_eq!(decimal.value, TokenValue::Number(89.0));
        assert!(!decimal.octal);
    }

    #[test]
    fn number_followed_by_identifier_is_illegal() {
        let buf = SourceBuffer::new("3x");
        let mut lexer = Lexer::new(&buf);
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn string_escapes() {
        let tok = lex_one(r#""a\n\x41B""#);
        match tok.value {
            TokenValue::Str(units) => assert_eq!(String::from_utf16_lossy(&units), "a\nAB"),
            other => panic!("expected string, got {other:?}"),
        }
        assert!(!tok.octal);
    }

    #[test]
    fn octal_escape_sets_flag() {
        let tok = lex_one(r#""\077""#);
        match tok.value {
            TokenValue::Str(units) => assert_eq!(String::from_utf16_lossy(&units), "?"),
            other => panic!("expected string, got {other:?}"),
        }
        assert!(tok.octal);
    }

    #[test]
    fn nul_escape_is_not_octal() {
        let tok = lex_one(r#""\0""#);
        match tok.value {
            TokenValue::Str(units) => assert_eq!(units, vec![0u16]),
            other => panic!("expected string, got {other:?}"),
        }
        assert!(!tok.octal);
    }

    #[test]
    fn line_terminator_flag_crosses_comments() {
        let toks = lex_all("a /* x\n y */ b");
        assert!(!toks[0].preceded_by_newline);
        assert!(toks[1].preceded_by_newline);
    }

    #[test]
    fn html_comments() {
        let toks = lex_all("<!-- hi\n1\n--> bye\n2");
        assert_eq!(toks[0].value, TokenValue::Number(1.0));
        assert_eq!(toks[1].value, TokenValue::Number(2.0));
    }

    #[test]
    fn punctuator_longest_match() {
        let toks = lex_all("a >>>= b >>> c >> d > e");
        assert!(toks[1].is_punct(Punct::GtGtGtAssign));
        assert!(toks[3].is_punct(Punct::GtGtGt));
        assert!(toks[5].is_punct(Punct::GtGt));
        assert!(toks[7].is_punct(Punct::Gt));
    }

    #[test]
    fn regex_rescan() {
        let buf = SourceBuffer::new("/a[/]b/gi");
        let mut lexer = Lexer::new(&buf);
        let slash = lexer.next_token().expect("lex");
        assert!(slash.is_punct(Punct::Slash));
        let tok = lexer.rescan_as_regex(slash.start as usize).expect("regex");
        match tok.value {
            TokenValue::Regex { body, flags } => {
                assert_eq!(body, "a[/]b");
                assert_eq!(flags, "gi");
            }
            other => panic!("expected regex, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_fails() {
        let buf = SourceBuffer::new("\"abc");
        let mut lexer = Lexer::new(&buf);
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn template_scan_tracks_curly_stack() {
        let toks = lex_all("`a${ {x:1} }b`");
        assert_eq!(toks[0].kind, TokenKind::Template);
        assert!(toks[0].head);
        assert!(!toks[0].tail);
        let last_template = toks
            .iter()
            .rev()
            .find(|t| t.kind == TokenKind::Template)
            .expect("tail template");
        assert!(last_template.tail);
    }
}
