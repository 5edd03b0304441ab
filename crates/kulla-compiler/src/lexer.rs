use crate::diag::{Diag, Span};
use chumsky::prelude::*;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kw {
    Abstract,
    Boolean,
    Break,
    Catch,
    Char,
    Class,
    Continue,
    Do,
    Double,
    Else,
    Enum,
    Extends,
    False,
    Final,
    Finally,
    For,
    If,
    Implements,
    Import,
    InstanceOf,
    Int,
    Interface,
    Long,
    New,
    Null,
    Private,
    Protected,
    Public,
    Return,
    Static,
    Super,
    This,
    Throw,
    Throws,
    True,
    Try,
    Void,
    While,
    /// Java keyword outside the supported subset.
    Reserved(&'static str),
}

pub const KEYWORDS: &[(&str, Kw)] = &[
    ("abstract", Kw::Abstract),
    ("boolean", Kw::Boolean),
    ("break", Kw::Break),
    ("catch", Kw::Catch),
    ("char", Kw::Char),
    ("class", Kw::Class),
    ("continue", Kw::Continue),
    ("do", Kw::Do),
    ("double", Kw::Double),
    ("else", Kw::Else),
    ("enum", Kw::Enum),
    ("extends", Kw::Extends),
    ("false", Kw::False),
    ("final", Kw::Final),
    ("finally", Kw::Finally),
    ("for", Kw::For),
    ("if", Kw::If),
    ("implements", Kw::Implements),
    ("import", Kw::Import),
    ("instanceof", Kw::InstanceOf),
    ("int", Kw::Int),
    ("interface", Kw::Interface),
    ("long", Kw::Long),
    ("new", Kw::New),
    ("null", Kw::Null),
    ("private", Kw::Private),
    ("protected", Kw::Protected),
    ("public", Kw::Public),
    ("return", Kw::Return),
    ("static", Kw::Static),
    ("super", Kw::Super),
    ("this", Kw::This),
    ("throw", Kw::Throw),
    ("throws", Kw::Throws),
    ("true", Kw::True),
    ("try", Kw::Try),
    ("void", Kw::Void),
    ("while", Kw::While),
];

const RESERVED: &[&str] = &[
    "assert",
    "byte",
    "case",
    "const",
    "default",
    "float",
    "goto",
    "native",
    "package",
    "short",
    "strictfp",
    "switch",
    "synchronized",
    "transient",
    "volatile",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sym {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    At,
    Question,
    Colon,
    Assign,
    EqEq,
    Bang,
    BangEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    UShr,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
    UShrEq,
}

impl Sym {
    pub fn text(self) -> &'static str {
        SYMBOLS
            .iter()
            .find(|(_, sym)| *sym == self)
            .map_or("?", |(text, _)| *text)
    }
}

// Longest operators first, matching the order the lexer tries them in.
const SYMBOLS: &[(&str, Sym)] = &[
    (">>>=", Sym::UShrEq),
    (">>>", Sym::UShr),
    ("<<=", Sym::ShlEq),
    (">>=", Sym::ShrEq),
    ("==", Sym::EqEq),
    ("!=", Sym::BangEq),
    ("<=", Sym::Le),
    (">=", Sym::Ge),
    ("&&", Sym::AndAnd),
    ("||", Sym::OrOr),
    ("++", Sym::PlusPlus),
    ("--", Sym::MinusMinus),
    ("+=", Sym::PlusEq),
    ("-=", Sym::MinusEq),
    ("*=", Sym::StarEq),
    ("/=", Sym::SlashEq),
    ("%=", Sym::PercentEq),
    ("&=", Sym::AmpEq),
    ("|=", Sym::PipeEq),
    ("^=", Sym::CaretEq),
    ("<<", Sym::Shl),
    (">>", Sym::Shr),
    ("(", Sym::LParen),
    (")", Sym::RParen),
    ("{", Sym::LBrace),
    ("}", Sym::RBrace),
    ("[", Sym::LBracket),
    ("]", Sym::RBracket),
    (";", Sym::Semi),
    (",", Sym::Comma),
    (".", Sym::Dot),
    ("@", Sym::At),
    ("?", Sym::Question),
    (":", Sym::Colon),
    ("=", Sym::Assign),
    ("!", Sym::Bang),
    ("<", Sym::Lt),
    (">", Sym::Gt),
    ("+", Sym::Plus),
    ("-", Sym::Minus),
    ("*", Sym::Star),
    ("/", Sym::Slash),
    ("%", Sym::Percent),
    ("&", Sym::Amp),
    ("|", Sym::Pipe),
    ("^", Sym::Caret),
    ("~", Sym::Tilde),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Kw(Kw),
    Int(i64),
    Long(i64),
    Double(f64),
    Char(char),
    Str(String),
    Sym(Sym),
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Tok::Ident(name) => write!(f, "{name}"),
            Tok::Kw(Kw::Reserved(word)) => write!(f, "{word}"),
            Tok::Kw(kw) => {
                let name = KEYWORDS
                    .iter()
                    .find(|(_, k)| k == kw)
                    .map_or("?", |(name, _)| *name);
                write!(f, "{name}")
            }
            Tok::Int(v) | Tok::Long(v) => write!(f, "{v}"),
            Tok::Double(v) => write!(f, "{v}"),
            Tok::Char(c) => write!(f, "'{c}'"),
            Tok::Str(s) => write!(f, "\"{s}\""),
            Tok::Sym(sym) => write!(f, "{}", sym.text()),
            Tok::Eof => write!(f, "<EOF>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub span: Span,
}

impl Token {
    pub fn is_sym(&self, sym: Sym) -> bool {
        self.tok == Tok::Sym(sym)
    }

    pub fn is_kw(&self, kw: Kw) -> bool {
        self.tok == Tok::Kw(kw)
    }
}

pub fn keyword(text: &str) -> Option<Kw> {
    if let Some((_, kw)) = KEYWORDS.iter().find(|(name, _)| *name == text) {
        return Some(*kw);
    }
    RESERVED
        .iter()
        .find(|name| **name == text)
        .map(|name| Kw::Reserved(name))
}

pub fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

pub fn is_ident_part(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

/// What the character-level grammar produces for one stretch of input.
/// Malformed literals still lex, as `Bad`, so the first problem can be
/// reported with its own diagnostic code.
#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Tok(Tok),
    Bad(Diag),
    Trivia,
}

type LexExtra<'code> = extra::Err<Rich<'code, char>>;

fn lexer<'code>() -> impl Parser<'code, &'code str, Vec<(Lexeme, SimpleSpan)>, LexExtra<'code>> {
    let line_comment = just("//").then(none_of('\n').repeated()).to(Lexeme::Trivia);

    let block_comment = just("/*")
        .ignore_then(any().and_is(just("*/").not()).repeated())
        .ignore_then(just("*/").or_not())
        .map_with(|close, extra: &mut chumsky::input::MapExtra<'code, '_, &'code str, LexExtra<'code>>| match close {
            Some(_) => Lexeme::Trivia,
            None => Lexeme::Bad(Diag::error(
                Span::from(extra.span()),
                "compiler.err.unclosed.comment",
                "unclosed comment",
            )),
        });

    let word = any()
        .filter(|c: &char| is_ident_start(*c))
        .then(any().filter(|c: &char| is_ident_part(*c)).repeated())
        .to_slice()
        .map(|text: &str| {
            Lexeme::Tok(match keyword(text) {
                Some(kw) => Tok::Kw(kw),
                None => Tok::Ident(text.to_string()),
            })
        });

    let digit = any().filter(char::is_ascii_digit);
    let digits = any()
        .filter(|c: &char| c.is_ascii_digit() || *c == '_')
        .repeated();

    let hex = just('0')
        .then(one_of("xX"))
        .then(
            any()
                .filter(|c: &char| c.is_ascii_hexdigit() || *c == '_')
                .repeated(),
        )
        .then(one_of("lL").or_not())
        .to_slice()
        .map_with(|text: &str, extra: &mut chumsky::input::MapExtra<'code, '_, &'code str, LexExtra<'code>>| hex_literal(text, extra.span().into()));

    // `1.` is a double only when a digit or the end of input follows the dot.
    let fraction_ahead = just('.')
        .then(digit.clone().ignored().or(end()))
        .rewind();
    let whole = digit
        .clone()
        .then(digits.clone())
        .then(
            fraction_ahead
                .ignore_then(just('.').then(digits.clone()))
                .or_not(),
        )
        .ignored();
    let bare_fraction = just('.')
        .then(digit.clone())
        .then(digits.clone())
        .ignored();
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(digit.repeated());
    let decimal = whole
        .or(bare_fraction)
        .then(exponent.or_not())
        .then(one_of("dDlL").or_not())
        .to_slice()
        .map_with(|text: &str, extra: &mut chumsky::input::MapExtra<'code, '_, &'code str, LexExtra<'code>>| decimal_literal(text, extra.span().into()));

    let escape = just('\\')
        .then(
            just('u')
                .then(
                    any()
                        .filter(char::is_ascii_hexdigit)
                        .repeated()
                        .at_most(4),
                )
                .ignored()
                .or(any().ignored()),
        )
        .ignored();

    let string = just('"')
        .ignore_then(
            none_of("\"\\\n")
                .ignored()
                .or(escape.clone())
                .repeated()
                .to_slice(),
        )
        .then(just('"').or_not())
        .map_with(|(body, close): (&str, Option<char>), extra: &mut chumsky::input::MapExtra<'code, '_, &'code str, LexExtra<'code>>| {
            string_lexeme(body, close.is_some(), extra.span().into())
        });

    let character = just('\'')
        .ignore_then(
            none_of("'\\\n")
                .ignored()
                .or(escape)
                .to_slice()
                .or_not(),
        )
        .then(just('\'').or_not())
        .map_with(|(body, close): (Option<&str>, Option<char>), extra: &mut chumsky::input::MapExtra<'code, '_, &'code str, LexExtra<'code>>| {
            char_lexeme(body, close.is_some(), extra.span().into())
        });

    let long_operator = choice((
        just(">>>=").to(Sym::UShrEq),
        just(">>>").to(Sym::UShr),
        just("<<=").to(Sym::ShlEq),
        just(">>=").to(Sym::ShrEq),
    ));

    let pair_operator = choice((
        just("==").to(Sym::EqEq),
        just("!=").to(Sym::BangEq),
        just("<=").to(Sym::Le),
        just(">=").to(Sym::Ge),
        just("&&").to(Sym::AndAnd),
        just("||").to(Sym::OrOr),
        just("++").to(Sym::PlusPlus),
        just("--").to(Sym::MinusMinus),
        just("+=").to(Sym::PlusEq),
        just("-=").to(Sym::MinusEq),
        just("*=").to(Sym::StarEq),
        just("/=").to(Sym::SlashEq),
        just("%=").to(Sym::PercentEq),
        just("&=").to(Sym::AmpEq),
        just("|=").to(Sym::PipeEq),
        just("^=").to(Sym::CaretEq),
        just("<<").to(Sym::Shl),
        just(">>").to(Sym::Shr),
    ));

    let punctuation = choice((
        just('(').to(Sym::LParen),
        just(')').to(Sym::RParen),
        just('{').to(Sym::LBrace),
        just('}').to(Sym::RBrace),
        just('[').to(Sym::LBracket),
        just(']').to(Sym::RBracket),
        just(';').to(Sym::Semi),
        just(',').to(Sym::Comma),
        just('.').to(Sym::Dot),
        just('@').to(Sym::At),
        just('?').to(Sym::Question),
        just(':').to(Sym::Colon),
    ));

    let operator = choice((
        just('=').to(Sym::Assign),
        just('!').to(Sym::Bang),
        just('<').to(Sym::Lt),
        just('>').to(Sym::Gt),
        just('+').to(Sym::Plus),
        just('-').to(Sym::Minus),
        just('*').to(Sym::Star),
        just('/').to(Sym::Slash),
        just('%').to(Sym::Percent),
        just('&').to(Sym::Amp),
        just('|').to(Sym::Pipe),
        just('^').to(Sym::Caret),
        just('~').to(Sym::Tilde),
    ));

    let symbol = choice((long_operator, pair_operator, punctuation, operator))
        .map(|sym| Lexeme::Tok(Tok::Sym(sym)));

    let illegal = any().map_with(|ch: char, extra: &mut chumsky::input::MapExtra<'code, '_, &'code str, LexExtra<'code>>| {
        Lexeme::Bad(Diag::error(
            extra.span().into(),
            "compiler.err.illegal.char",
            format!("illegal character: '{ch}'"),
        ))
    });

    let lexeme = choice((
        line_comment,
        block_comment,
        word,
        hex,
        decimal,
        string,
        character,
        symbol,
        illegal,
    ));

    text::whitespace()
        .ignore_then(
            lexeme
                .map_with(|lexeme, extra: &mut chumsky::input::MapExtra<'code, '_, &'code str, LexExtra<'code>>| (lexeme, extra.span()))
                .then_ignore(text::whitespace())
                .repeated()
                .collect::<Vec<_>>(),
        )
        .then_ignore(end())
}

/// Tokenizes a complete snippet. The trailing `Eof` token spans the end of input.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Diag> {
    let (lexemes, errors) = lexer().parse(source).into_output_errors();
    if let Some(err) = errors.first() {
        return Err(Diag::error(
            (*err.span()).into(),
            "compiler.err.illegal.char",
            err.to_string(),
        ));
    }
    let mut out = Vec::new();
    for (lexeme, span) in lexemes.unwrap_or_default() {
        match lexeme {
            Lexeme::Tok(tok) => out.push(Token {
                tok,
                span: span.into(),
            }),
            Lexeme::Bad(diag) => return Err(diag),
            Lexeme::Trivia => {}
        }
    }
    let end = source.len();
    out.push(Token {
        tok: Tok::Eof,
        span: Span::new(end, end),
    });
    Ok(out)
}

fn malformed(text: &str, span: Span) -> Lexeme {
    Lexeme::Bad(Diag::error(
        span,
        "compiler.err.malformed.number",
        format!("malformed number: {text}"),
    ))
}

fn hex_literal(text: &str, span: Span) -> Lexeme {
    let long = text.ends_with(['l', 'L']);
    let digits: String = text[2..].chars().filter(char::is_ascii_hexdigit).collect();
    let Ok(value) = i64::from_str_radix(&digits, 16) else {
        return malformed(text, span);
    };
    // Hex int literals cover the full 32-bit pattern, so 0xFFFFFFFF is -1.
    if !long && value <= i64::from(u32::MAX) {
        return Lexeme::Tok(Tok::Int(i64::from(value as u32 as i32)));
    }
    integral(text, value, long, span)
}

fn decimal_literal(text: &str, span: Span) -> Lexeme {
    let (body, suffix) = match text.char_indices().last() {
        Some((at, c)) if matches!(c, 'd' | 'D' | 'l' | 'L') => (&text[..at], Some(c)),
        _ => (text, None),
    };
    let digits: String = body.chars().filter(|c| *c != '_').collect();
    let long = matches!(suffix, Some('l' | 'L'));
    if matches!(suffix, Some('d' | 'D')) || digits.contains(['.', 'e', 'E']) {
        if long {
            return malformed(text, span);
        }
        return match digits.parse::<f64>() {
            Ok(value) => Lexeme::Tok(Tok::Double(value)),
            Err(_) => malformed(text, span),
        };
    }
    match digits.parse::<i64>() {
        Ok(value) => integral(text, value, long, span),
        Err(_) => malformed(text, span),
    }
}

fn integral(text: &str, value: i64, long: bool, span: Span) -> Lexeme {
    if long {
        return Lexeme::Tok(Tok::Long(value));
    }
    // 2147483648 is only legal as the operand of unary minus; the parser folds it.
    if value > i64::from(i32::MAX) + 1 {
        return Lexeme::Bad(Diag::error(
            span,
            "compiler.err.int.number.too.large",
            format!("integer number too large: {text}"),
        ));
    }
    Lexeme::Tok(Tok::Int(value))
}

/// Decodes the escapes of a literal body that starts at byte `offset`.
fn unescape(body: &str, offset: usize) -> Result<String, Diag> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices().peekable();
    while let Some((at, ch)) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let start = offset + at;
        let Some((_, code)) = chars.next() else {
            break;
        };
        let decoded = match code {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            '0' => '\0',
            's' => ' ',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            'u' => {
                let mut hex = String::new();
                while hex.len() < 4 {
                    match chars.next_if(|(_, c)| c.is_ascii_hexdigit()) {
                        Some((_, c)) => hex.push(c),
                        None => break,
                    }
                }
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        Diag::error(
                            Span::new(start, start + 2 + hex.len()),
                            "compiler.err.illegal.unicode.esc",
                            "illegal unicode escape",
                        )
                    })?
            }
            other => {
                return Err(Diag::error(
                    Span::new(start, start + 1 + other.len_utf8()),
                    "compiler.err.illegal.esc.char",
                    format!("illegal escape character: \\{other}"),
                ));
            }
        };
        out.push(decoded);
    }
    Ok(out)
}

fn string_lexeme(body: &str, closed: bool, span: Span) -> Lexeme {
    if !closed {
        return Lexeme::Bad(Diag::error(
            span,
            "compiler.err.unclosed.str.lit",
            "unclosed string literal",
        ));
    }
    match unescape(body, span.start + 1) {
        Ok(value) => Lexeme::Tok(Tok::Str(value)),
        Err(diag) => Lexeme::Bad(diag),
    }
}

fn char_lexeme(body: Option<&str>, closed: bool, span: Span) -> Lexeme {
    let Some(body) = body else {
        return Lexeme::Bad(Diag::error(
            span,
            "compiler.err.illegal.char.literal",
            "illegal line end in character literal",
        ));
    };
    if !closed {
        return Lexeme::Bad(Diag::error(
            span,
            "compiler.err.unclosed.char.lit",
            "unclosed character literal",
        ));
    }
    match unescape(body, span.start + 1).map(|value| value.chars().next()) {
        Ok(Some(value)) => Lexeme::Tok(Tok::Char(value)),
        Ok(None) => Lexeme::Bad(Diag::error(
            span,
            "compiler.err.illegal.char.literal",
            "illegal line end in character literal",
        )),
        Err(diag) => Lexeme::Bad(diag),
    }
}

#[cfg(test)]
mod tests {
    use super::{Kw, Sym, Tok, tokenize};

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src)
            .expect("lexing should pass")
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn lexes_declaration() {
        assert_eq!(
            toks("int x = 0x1F;"),
            vec![
                Tok::Kw(Kw::Int),
                Tok::Ident("x".to_string()),
                Tok::Sym(Sym::Assign),
                Tok::Int(31),
                Tok::Sym(Sym::Semi),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn prefers_longest_operator() {
        assert_eq!(
            toks("a >>>= 2"),
            vec![
                Tok::Ident("a".to_string()),
                Tok::Sym(Sym::UShrEq),
                Tok::Int(2),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn literals_and_comments() {
        assert_eq!(
            toks("/* c */ 'a' \"b\\n\" 2.5 7L // tail"),
            vec![
                Tok::Char('a'),
                Tok::Str("b\n".to_string()),
                Tok::Double(2.5),
                Tok::Long(7),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn reports_unclosed_string() {
        let err = tokenize("String s = \"abc").expect_err("should fail");
        assert_eq!(err.code, "compiler.err.unclosed.str.lit");
        assert_eq!(err.span.start, 11);
    }

    #[test]
    fn reserved_words_are_keywords() {
        assert_eq!(toks("float")[0], Tok::Kw(Kw::Reserved("float")));
    }

    #[test]
    fn hex_literals_wrap_to_int() {
        assert_eq!(toks("0xFFFFFFFF")[0], Tok::Int(-1));
        assert_eq!(toks("0x1_0L")[0], Tok::Long(16));
    }

    #[test]
    fn dot_after_digits_needs_a_digit_to_be_a_fraction() {
        assert_eq!(
            toks("1.5 .25 3.x"),
            vec![
                Tok::Double(1.5),
                Tok::Double(0.25),
                Tok::Int(3),
                Tok::Sym(Sym::Dot),
                Tok::Ident("x".to_string()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn decodes_unicode_escapes() {
        assert_eq!(toks("'\\u0041'")[0], Tok::Char('A'));
        let err = tokenize("\"\\u00\"").expect_err("should fail");
        assert_eq!(err.code, "compiler.err.illegal.unicode.esc");
    }

    #[test]
    fn reports_lexical_errors_with_their_codes() {
        let cases = [
            ("/* open", "compiler.err.unclosed.comment"),
            ("int # = 1;", "compiler.err.illegal.char"),
            ("2147483649", "compiler.err.int.number.too.large"),
            ("1e", "compiler.err.malformed.number"),
            ("\"\\q\"", "compiler.err.illegal.esc.char"),
            ("''", "compiler.err.illegal.char.literal"),
            ("'ab'", "compiler.err.unclosed.char.lit"),
        ];
        for (src, code) in cases {
            let err = tokenize(src).expect_err(src);
            assert_eq!(err.code, code, "{src}");
        }
    }

    #[test]
    fn min_int_magnitude_lexes() {
        assert_eq!(toks("2147483648")[0], Tok::Int(2_147_483_648));
    }
}
