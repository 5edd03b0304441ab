use crate::ast::{
    BinOp, Block, CatchClause, ClassDecl, ConstructorDecl, Expr, ExprKind, FieldDecl, ImportDecl,
    Literal, LocalVar, Member, MethodDecl, Modifier, Modifiers, Param, Primitive, Stmt, StmtKind,
    TypeDeclKind, TypeRef, TypeRefKind, UnaryOp, VarDecl,
};
use crate::diag::{Diag, Span};
use crate::lexer::{Kw, Sym, Tok, tokenize};
use crate::unit::{ParsedUnit, Unit};
use chumsky::error::{RichPattern, RichReason};
use chumsky::input::{Input, Stream, ValueInput};
use chumsky::pratt::*;
use chumsky::prelude::*;
use std::sync::Arc;

pub type ParseError<'code> = Rich<'code, Tok>;
type ParseExtra<'code> = extra::Err<ParseError<'code>>;

/// Token streams the snippet grammar runs over.
pub trait TokenInput<'code>: ValueInput<'code, Token = Tok, Span = SimpleSpan> {}

impl<'code, T> TokenInput<'code> for T where T: ValueInput<'code, Token = Tok, Span = SimpleSpan> {}

const EXPRESSION: &str = "<expression>";
const IDENTIFIER: &str = "<identifier>";
const UNEXPECTED_TYPE: &str = "unexpected type\n  required: variable\n  found:    value";

// First match wins when an error expects several tokens.
const PREFERRED: &[Sym] = &[
    Sym::RParen,
    Sym::RBracket,
    Sym::RBrace,
    Sym::LBrace,
    Sym::LParen,
];

const CUSTOM_CODES: &[(&str, &str)] = &[
    ("not supported", "compiler.err.unsupported"),
    (
        "'try' without 'catch' or 'finally'",
        "compiler.err.try.without.catch.or.finally",
    ),
    ("array dimension missing", "compiler.err.array.dimension.missing"),
    (
        "both dimension expression and initialization",
        "compiler.err.illegal.array.creation.both.dimension.and.initialization",
    ),
    (
        "return type required",
        "compiler.err.invalid.meth.decl.ret.type.req",
    ),
    ("unexpected type", "compiler.err.unexpected.type"),
    (" expected", "compiler.err.expected"),
];

/// Parses one complete snippet into its units. A variable declaration with
/// several declarators becomes one unit per declarator, each with its own
/// synthesized source.
pub fn parse_snippet(source: &str) -> Result<Vec<ParsedUnit>, Vec<Diag>> {
    let tokens = tokenize(source).map_err(|d| vec![d])?;
    let end = source.len();
    let tokens: Vec<(Tok, SimpleSpan)> = tokens
        .into_iter()
        .filter(|token| token.tok != Tok::Eof)
        .map(|token| (token.tok, simple(token.span)))
        .collect();
    if tokens.is_empty() {
        return Err(vec![Diag::error(
            Span::new(end, end),
            "compiler.err.premature.eof",
            "reached end of input",
        )]);
    }
    let input = Stream::from_iter(tokens).map(SimpleSpan::from(end..end), |(tok, span)| (tok, span));
    let (top, errors) = snippet().parse(input).into_output_errors();
    if !errors.is_empty() {
        let mut diags: Vec<Diag> = errors.iter().map(to_diag).collect();
        diags.sort_by_key(|diag| diag.span.start);
        return Err(diags);
    }
    let Some(top) = top else {
        return Err(vec![Diag::error(
            Span::new(end, end),
            "compiler.err.premature.eof",
            "reached end of file while parsing",
        )]);
    };
    match top {
        Top::Unit(unit) => Ok(vec![ParsedUnit {
            unit,
            source: source.to_string(),
        }]),
        Top::Vars(mut vars) if vars.len() == 1 => Ok(vec![ParsedUnit {
            unit: Unit::Var(vars.remove(0)),
            source: source.to_string(),
        }]),
        Top::Vars(vars) => {
            let mut units = Vec::new();
            for var in vars {
                let split = split_declarator_source(source, &var);
                units.extend(parse_snippet(&split)?);
            }
            Ok(units)
        }
    }
}

fn split_declarator_source(source: &str, var: &VarDecl) -> String {
    let mut out = String::new();
    for (modifier, _) in &var.modifiers.list {
        out.push_str(modifier.name());
        out.push(' ');
    }
    out.push_str(&var.ty.render());
    out.push(' ');
    out.push_str(&var.name);
    if let Some(init) = &var.init {
        out.push_str(" = ");
        out.push_str(&source[init.span.start..init.span.end]);
    }
    out.push(';');
    out
}

fn simple(span: Span) -> SimpleSpan {
    SimpleSpan::from(span.start..span.end)
}

fn custom_code(message: &str) -> &'static str {
    CUSTOM_CODES
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map_or("compiler.err.illegal.start.of.expr", |(_, code)| *code)
}

fn expected_text(err: &ParseError<'_>) -> Option<String> {
    let mut tokens = Vec::new();
    let mut labels = Vec::new();
    for pattern in err.expected() {
        match pattern {
            RichPattern::Token(tok) => tokens.push((**tok).clone()),
            RichPattern::Label(label) => labels.push(label.to_string()),
            _ => {}
        }
    }
    if tokens.contains(&Tok::Sym(Sym::Semi)) {
        return Some("';'".to_string());
    }
    if labels.iter().any(|label| label == EXPRESSION) {
        return None;
    }
    if let Some(sym) = PREFERRED.iter().find(|sym| tokens.contains(&Tok::Sym(**sym))) {
        return Some(format!("'{}'", sym.text()));
    }
    if labels.iter().any(|label| label == IDENTIFIER) {
        return Some(IDENTIFIER.to_string());
    }
    labels
        .into_iter()
        .next()
        .or_else(|| tokens.first().map(|tok| format!("'{tok}'")))
}

fn to_diag(err: &ParseError<'_>) -> Diag {
    let span = Span::from(*err.span());
    if let RichReason::Custom(message) = err.reason() {
        return Diag::error(span, custom_code(message), message.clone());
    }
    let expected = expected_text(err);
    match err.found() {
        Some(Tok::Kw(Kw::Reserved(word))) => Diag::error(
            span,
            "compiler.err.unsupported",
            format!("'{word}' is not supported"),
        ),
        None => Diag::error(
            span,
            "compiler.err.premature.eof",
            "reached end of file while parsing",
        ),
        _ => match expected {
            Some(what) if what != EXPRESSION => {
                Diag::error(span, "compiler.err.expected", format!("{what} expected"))
            }
            _ => Diag::error(
                span,
                "compiler.err.illegal.start.of.expr",
                "illegal start of expression",
            ),
        },
    }
}

enum Top {
    Unit(Unit),
    Vars(Vec<VarDecl>),
}

/// One `name[] = init` part of a declaration, before the shared type is applied.
struct Declarator {
    name: String,
    name_span: Span,
    dims: Vec<Span>,
    init: Option<Expr>,
    end: usize,
}

#[derive(Clone)]
enum Prefix {
    Unary(UnaryOp),
    Step(bool),
    Cast(TypeRef),
}

#[derive(Clone)]
enum Suffix {
    Member(String, Option<Vec<Expr>>),
    Index(Expr),
    Step(bool),
}

enum NewTail {
    Args(Vec<Expr>, Option<SimpleSpan>),
    Array {
        dims: Vec<Expr>,
        empty: Vec<Span>,
        init: Option<Vec<Expr>>,
    },
}

fn sym<'code, I: TokenInput<'code>>(
    sym: Sym,
) -> impl Parser<'code, I, Tok, ParseExtra<'code>> + Clone {
    just(Tok::Sym(sym))
}

fn kw<'code, I: TokenInput<'code>>(kw: Kw) -> impl Parser<'code, I, Tok, ParseExtra<'code>> + Clone {
    just(Tok::Kw(kw))
}

fn ident<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, (String, Span), ParseExtra<'code>> + Clone {
    select! { Tok::Ident(name) => name }
        .map_with(|name, extra| (name, Span::from(extra.span())))
        .labelled(IDENTIFIER)
}

fn primitive<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, Primitive, ParseExtra<'code>> + Clone {
    select! {
        Tok::Kw(Kw::Int) => Primitive::Int,
        Tok::Kw(Kw::Long) => Primitive::Long,
        Tok::Kw(Kw::Double) => Primitive::Double,
        Tok::Kw(Kw::Boolean) => Primitive::Boolean,
        Tok::Kw(Kw::Char) => Primitive::Char,
        Tok::Kw(Kw::Void) => Primitive::Void,
    }
}

fn modifiers<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, Modifiers, ParseExtra<'code>> + Clone {
    select! {
        Tok::Kw(Kw::Public) => Modifier::Public,
        Tok::Kw(Kw::Private) => Modifier::Private,
        Tok::Kw(Kw::Protected) => Modifier::Protected,
        Tok::Kw(Kw::Static) => Modifier::Static,
        Tok::Kw(Kw::Final) => Modifier::Final,
        Tok::Kw(Kw::Abstract) => Modifier::Abstract,
    }
    .map_with(|modifier, extra| (modifier, Span::from(extra.span())))
    .repeated()
    .collect::<Vec<_>>()
    .map(|list| Modifiers { list })
}

fn type_kind<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, TypeDeclKind, ParseExtra<'code>> + Clone {
    select! {
        Tok::Kw(Kw::Class) => TypeDeclKind::Class,
        Tok::Kw(Kw::Interface) => TypeDeclKind::Interface,
        Tok::Kw(Kw::Enum) => TypeDeclKind::Enum,
    }
}

/// Type without trailing array dimensions.
fn base_type<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, TypeRef, ParseExtra<'code>> + Clone {
    let primitive = primitive().map_with(|primitive, extra| TypeRef {
        kind: TypeRefKind::Primitive(primitive),
        span: Span::from(extra.span()),
    });
    let named = ident()
        .then(sym(Sym::Dot).ignore_then(ident()).repeated().collect::<Vec<_>>())
        .map(|((first, first_span), rest)| {
            let mut span = first_span;
            let mut path = vec![first];
            for (name, name_span) in rest {
                span = span.to(name_span);
                path.push(name);
            }
            TypeRef {
                kind: TypeRefKind::Named(path),
                span,
            }
        });
    primitive.or(named)
}

/// Empty `[]` pairs, one span per pair.
fn dims<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, Vec<Span>, ParseExtra<'code>> + Clone {
    sym(Sym::LBracket)
        .then(sym(Sym::RBracket))
        .map_with(|_, extra| Span::from(extra.span()))
        .repeated()
        .collect::<Vec<_>>()
}

fn with_dims(mut ty: TypeRef, dims: Vec<Span>) -> TypeRef {
    for end in dims {
        let span = ty.span.to(end);
        ty = TypeRef {
            kind: TypeRefKind::Array(Box::new(ty)),
            span,
        };
    }
    ty
}

fn type_ref<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, TypeRef, ParseExtra<'code>> + Clone {
    base_type()
        .then(dims())
        .map(|(ty, dims)| with_dims(ty, dims))
}

fn type_list<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, Vec<TypeRef>, ParseExtra<'code>> + Clone {
    type_ref()
        .separated_by(sym(Sym::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
}

/// A balanced `{ ... }` group, skipped without looking inside.
fn braced<'code, I: TokenInput<'code>>() -> impl Parser<'code, I, (), ParseExtra<'code>> + Clone {
    recursive(|inner| {
        let other = any()
            .filter(|tok: &Tok| !matches!(tok, Tok::Sym(Sym::LBrace | Sym::RBrace)))
            .ignored();
        sym(Sym::LBrace)
            .ignore_then(other.or(inner).repeated())
            .then_ignore(sym(Sym::RBrace))
            .ignored()
    })
}

/// Header and body of a type declaration this grammar does not model.
fn skipped_declaration<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, (), ParseExtra<'code>> + Clone {
    modifiers()
        .then(type_kind())
        .then(
            any()
                .filter(|tok: &Tok| *tok != Tok::Sym(Sym::LBrace))
                .repeated(),
        )
        .then(braced())
        .ignored()
}

fn arguments<'code, I, E>(expr: E) -> impl Parser<'code, I, Vec<Expr>, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    E: Parser<'code, I, Expr, ParseExtra<'code>> + Clone,
{
    expr.separated_by(sym(Sym::Comma))
        .collect::<Vec<_>>()
        .delimited_by(sym(Sym::LParen), sym(Sym::RParen))
}

/// `{ a, { b }, c, }` with nested initializers.
fn array_items<'code, I, E>(expr: E) -> impl Parser<'code, I, Vec<Expr>, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    E: Parser<'code, I, Expr, ParseExtra<'code>> + Clone + 'code,
{
    recursive(move |items| {
        let nested = items.map_with(|items, extra| Expr {
            kind: ExprKind::ArrayInit { elem: None, items },
            span: Span::from(extra.span()),
        });
        nested
            .or(expr.clone())
            .separated_by(sym(Sym::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(sym(Sym::LBrace), sym(Sym::RBrace))
    })
}

/// Variable initializer: an expression or a bare array initializer.
fn initializer<'code, I, E>(expr: E) -> impl Parser<'code, I, Expr, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    E: Parser<'code, I, Expr, ParseExtra<'code>> + Clone + 'code,
{
    array_items(expr.clone())
        .map_with(|items, extra| Expr {
            kind: ExprKind::ArrayInit { elem: None, items },
            span: extra.span().into(),
        })
        .or(expr)
}

fn declarators<'code, I, V>(var_init: V) -> impl Parser<'code, I, Vec<Declarator>, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    V: Parser<'code, I, Expr, ParseExtra<'code>> + Clone,
{
    ident()
        .then(dims())
        .then(sym(Sym::Assign).ignore_then(var_init).or_not())
        .map_with(|(((name, name_span), dims), init), extra| Declarator {
            name,
            name_span,
            dims,
            init,
            end: extra.span().end,
        })
        .separated_by(sym(Sym::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
}

fn parameters<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, Vec<Param>, ParseExtra<'code>> + Clone {
    kw(Kw::Final)
        .or_not()
        .ignore_then(type_ref())
        .then(ident())
        .then(dims())
        .map(|((ty, (name, name_span)), dims)| {
            let ty = with_dims(ty, dims);
            Param {
                span: ty.span.to(name_span),
                ty,
                name,
            }
        })
        .separated_by(sym(Sym::Comma))
        .collect::<Vec<_>>()
        .delimited_by(sym(Sym::LParen), sym(Sym::RParen))
}

fn throws_clause<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, Vec<TypeRef>, ParseExtra<'code>> + Clone {
    kw(Kw::Throws)
        .ignore_then(type_list())
        .or_not()
        .map(Option::unwrap_or_default)
}

fn starts_cast_operand(ty: &TypeRef, next: &Tok) -> bool {
    let mut inner = ty;
    while let TypeRefKind::Array(elem) = &inner.kind {
        inner = elem;
    }
    let primitive = matches!(inner.kind, TypeRefKind::Primitive(_));
    let operand = matches!(
        next,
        Tok::Ident(_)
            | Tok::Int(_)
            | Tok::Long(_)
            | Tok::Double(_)
            | Tok::Char(_)
            | Tok::Str(_)
            | Tok::Kw(Kw::True | Kw::False | Kw::Null | Kw::This | Kw::Super | Kw::New)
            | Tok::Sym(Sym::LParen | Sym::Bang | Sym::Tilde)
    );
    let sign = matches!(
        next,
        Tok::Sym(Sym::Minus | Sym::Plus | Sym::PlusPlus | Sym::MinusMinus)
    );
    operand || (primitive && sign)
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span.to(rhs.span);
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}

fn apply_prefix(op: Prefix, op_span: Span, operand: Expr) -> Expr {
    let span = op_span.to(operand.span);
    let kind = match op {
        Prefix::Unary(UnaryOp::Neg) => match operand.kind {
            ExprKind::Literal(Literal::Int(v)) => ExprKind::Literal(Literal::Int(-v)),
            kind => ExprKind::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(Expr {
                    kind,
                    span: operand.span,
                }),
            },
        },
        Prefix::Unary(op) => ExprKind::Unary {
            op,
            expr: Box::new(operand),
        },
        Prefix::Step(increment) => ExprKind::IncDec {
            target: Box::new(operand),
            increment,
            prefix: true,
        },
        Prefix::Cast(ty) => ExprKind::Cast {
            ty,
            expr: Box::new(operand),
        },
    };
    Expr { kind, span }
}

fn apply_suffix(target: Expr, suffix: Suffix, suffix_span: Span) -> Expr {
    let span = target.span.to(suffix_span);
    let target = Box::new(target);
    let kind = match suffix {
        Suffix::Member(name, Some(args)) => ExprKind::Call {
            target: Some(target),
            name,
            args,
        },
        Suffix::Member(name, None) => ExprKind::Field { target, name },
        Suffix::Index(index) => ExprKind::Index {
            target,
            index: Box::new(index),
        },
        Suffix::Step(increment) => ExprKind::IncDec {
            target,
            increment,
            prefix: false,
        },
    };
    Expr { kind, span }
}

/// Builds a `new` expression, or the message for why it is malformed.
fn new_expr(base: TypeRef, tail: NewTail) -> (ExprKind, Option<(Option<SimpleSpan>, &'static str)>) {
    match tail {
        NewTail::Args(args, body) => {
            let problem = if matches!(base.kind, TypeRefKind::Primitive(_)) {
                Some((None, "'[' expected"))
            } else {
                body.map(|span| (Some(span), "anonymous classes are not supported"))
            };
            (ExprKind::New { ty: base, args }, problem)
        }
        NewTail::Array { dims, empty, init } => {
            if dims.is_empty() && empty.is_empty() {
                return (
                    ExprKind::New {
                        ty: base,
                        args: Vec::new(),
                    },
                    Some((None, "'(' or '[' expected")),
                );
            }
            match init {
                Some(items) if dims.is_empty() => {
                    let mut elem = base;
                    for _ in 1..empty.len() {
                        let span = elem.span;
                        elem = TypeRef {
                            kind: TypeRefKind::Array(Box::new(elem)),
                            span,
                        };
                    }
                    (
                        ExprKind::ArrayInit {
                            elem: Some(elem),
                            items,
                        },
                        None,
                    )
                }
                None if dims.is_empty() => (
                    ExprKind::NewArray {
                        elem: base,
                        dims,
                        extra_dims: empty.len(),
                    },
                    Some((None, "array dimension missing")),
                ),
                init => {
                    let problem = init.map(|_| {
                        (
                            None,
                            "array creation with both dimension expression and initialization is illegal",
                        )
                    });
                    (
                        ExprKind::NewArray {
                            elem: base,
                            dims,
                            extra_dims: empty.len(),
                        },
                        problem,
                    )
                }
            }
        }
    }
}

fn expression<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, Expr, ParseExtra<'code>> + Clone {
    recursive(|expr| {
        let args = arguments(expr.clone());

        let literal = select! {
            Tok::Int(v) => Literal::Int(v),
            Tok::Long(v) => Literal::Long(v),
            Tok::Double(v) => Literal::Double(v),
            Tok::Char(v) => Literal::Char(v),
            Tok::Str(v) => Literal::Str(v),
            Tok::Kw(Kw::True) => Literal::Bool(true),
            Tok::Kw(Kw::False) => Literal::Bool(false),
            Tok::Kw(Kw::Null) => Literal::Null,
        }
        .map(ExprKind::Literal);

        let this = kw(Kw::This).to(ExprKind::This);
        let super_ref = kw(Kw::Super)
            .then(sym(Sym::Dot).rewind())
            .to(ExprKind::Super);

        let name_or_call = select! { Tok::Ident(name) => name }
            .then(args.clone().or_not())
            .map(|(name, args)| match args {
                Some(args) => ExprKind::Call {
                    target: None,
                    name,
                    args,
                },
                None => ExprKind::Name(name),
            });

        let parens = expr
            .clone()
            .delimited_by(sym(Sym::LParen), sym(Sym::RParen))
            .map(|inner: Expr| inner.kind);

        let args_tail = args
            .clone()
            .then(braced().map_with(|_, extra| extra.span()).or_not())
            .map(|(args, body)| NewTail::Args(args, body));
        let array_tail = expr
            .clone()
            .delimited_by(sym(Sym::LBracket), sym(Sym::RBracket))
            .repeated()
            .collect::<Vec<_>>()
            .then(dims())
            .then(array_items(expr.clone()).or_not())
            .map(|((dims, empty), init)| NewTail::Array { dims, empty, init });
        let creation = kw(Kw::New)
            .ignore_then(base_type())
            .then(args_tail.or(array_tail))
            .validate(|(base, tail), extra, emitter| {
                let (kind, problem) = new_expr(base, tail);
                if let Some((span, message)) = problem {
                    emitter.emit(Rich::custom(span.unwrap_or_else(|| extra.span()), message));
                }
                kind
            });

        let atom = choice((literal, this, super_ref, name_or_call, parens, creation))
            .map_with(|kind, extra| Expr {
                kind,
                span: Span::from(extra.span()),
            });

        let cast = type_ref()
            .delimited_by(sym(Sym::LParen), sym(Sym::RParen))
            .then(any().rewind())
            .filter(|(ty, next): &(TypeRef, Tok)| starts_cast_operand(ty, next))
            .map(|(ty, _)| Prefix::Cast(ty));
        let prefix_op = cast
            .or(choice((
                sym(Sym::Minus).to(Prefix::Unary(UnaryOp::Neg)),
                sym(Sym::Plus).to(Prefix::Unary(UnaryOp::Plus)),
                sym(Sym::Bang).to(Prefix::Unary(UnaryOp::Not)),
                sym(Sym::Tilde).to(Prefix::Unary(UnaryOp::BitNot)),
                sym(Sym::PlusPlus).to(Prefix::Step(true)),
                sym(Sym::MinusMinus).to(Prefix::Step(false)),
            )))
            .map_with(|op, extra| (op, Span::from(extra.span())));

        let suffix = choice((
            sym(Sym::Dot)
                .ignore_then(ident())
                .then(args.or_not())
                .map(|((name, _), args)| Suffix::Member(name, args)),
            expr.clone()
                .delimited_by(sym(Sym::LBracket), sym(Sym::RBracket))
                .map(Suffix::Index),
            sym(Sym::PlusPlus).to(Suffix::Step(true)),
            sym(Sym::MinusMinus).to(Suffix::Step(false)),
        ))
        .map_with(|suffix, extra| (suffix, Span::from(extra.span())));

        let instance_of = kw(Kw::InstanceOf).ignore_then(type_ref());

        let ternary = sym(Sym::Question)
            .ignore_then(expr.clone())
            .then_ignore(sym(Sym::Colon));

        let operators = atom.pratt((
            infix(right(1), ternary, |cond: Expr, then: Expr, els: Expr, _| {
                let span = cond.span.to(els.span);
                Expr {
                    kind: ExprKind::Conditional {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        els: Box::new(els),
                    },
                    span,
                }
            }),
            infix(left(2), sym(Sym::OrOr).to(BinOp::Or), |l, op, r, _| binary(op, l, r)),
            infix(left(3), sym(Sym::AndAnd).to(BinOp::And), |l, op, r, _| binary(op, l, r)),
            infix(left(4), sym(Sym::Pipe).to(BinOp::BitOr), |l, op, r, _| binary(op, l, r)),
            infix(left(5), sym(Sym::Caret).to(BinOp::BitXor), |l, op, r, _| binary(op, l, r)),
            infix(left(6), sym(Sym::Amp).to(BinOp::BitAnd), |l, op, r, _| binary(op, l, r)),
            infix(
                left(7),
                choice((
                    sym(Sym::EqEq).to(BinOp::Eq),
                    sym(Sym::BangEq).to(BinOp::Ne),
                )),
                |l, op, r, _| binary(op, l, r),
            ),
            infix(
                left(8),
                choice((
                    sym(Sym::Le).to(BinOp::Le),
                    sym(Sym::Ge).to(BinOp::Ge),
                    sym(Sym::Lt).to(BinOp::Lt),
                    sym(Sym::Gt).to(BinOp::Gt),
                )),
                |l, op, r, _| binary(op, l, r),
            ),
            postfix(8, instance_of, |expr: Expr, ty: TypeRef, _| {
                let span = expr.span.to(ty.span);
                Expr {
                    kind: ExprKind::InstanceOf {
                        expr: Box::new(expr),
                        ty,
                    },
                    span,
                }
            }),
            infix(
                left(9),
                choice((
                    sym(Sym::Shl).to(BinOp::Shl),
                    sym(Sym::UShr).to(BinOp::UShr),
                    sym(Sym::Shr).to(BinOp::Shr),
                )),
                |l, op, r, _| binary(op, l, r),
            ),
            infix(
                left(10),
                choice((
                    sym(Sym::Plus).to(BinOp::Add),
                    sym(Sym::Minus).to(BinOp::Sub),
                )),
                |l, op, r, _| binary(op, l, r),
            ),
            infix(
                left(11),
                choice((
                    sym(Sym::Star).to(BinOp::Mul),
                    sym(Sym::Slash).to(BinOp::Div),
                    sym(Sym::Percent).to(BinOp::Rem),
                )),
                |l, op, r, _| binary(op, l, r),
            ),
            prefix(20, prefix_op, |(op, span): (Prefix, Span), operand: Expr, _| {
                apply_prefix(op, span, operand)
            }),
            postfix(30, suffix, |target: Expr, (suffix, span): (Suffix, Span), _| {
                apply_suffix(target, suffix, span)
            }),
        ));

        let assign_op = select! {
            Tok::Sym(Sym::Assign) => None,
            Tok::Sym(Sym::PlusEq) => Some(BinOp::Add),
            Tok::Sym(Sym::MinusEq) => Some(BinOp::Sub),
            Tok::Sym(Sym::StarEq) => Some(BinOp::Mul),
            Tok::Sym(Sym::SlashEq) => Some(BinOp::Div),
            Tok::Sym(Sym::PercentEq) => Some(BinOp::Rem),
            Tok::Sym(Sym::AmpEq) => Some(BinOp::BitAnd),
            Tok::Sym(Sym::PipeEq) => Some(BinOp::BitOr),
            Tok::Sym(Sym::CaretEq) => Some(BinOp::BitXor),
            Tok::Sym(Sym::ShlEq) => Some(BinOp::Shl),
            Tok::Sym(Sym::ShrEq) => Some(BinOp::Shr),
            Tok::Sym(Sym::UShrEq) => Some(BinOp::UShr),
        };

        operators
            .then(assign_op.then(expr).or_not())
            .validate(|(target, assignment), _, emitter| {
                let Some((op, value)) = assignment else {
                    return target;
                };
                if !matches!(
                    target.kind,
                    ExprKind::Name(_) | ExprKind::Field { .. } | ExprKind::Index { .. }
                ) {
                    emitter.emit(Rich::custom(simple(target.span), UNEXPECTED_TYPE));
                }
                let span = target.span.to(value.span);
                Expr {
                    kind: ExprKind::Assign {
                        op,
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                    span,
                }
            })
            .labelled(EXPRESSION)
    })
}

fn block_of<'code, I, S>(stmt: S) -> impl Parser<'code, I, Block, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    S: Parser<'code, I, Stmt, ParseExtra<'code>> + Clone,
{
    stmt.repeated()
        .collect::<Vec<_>>()
        .delimited_by(sym(Sym::LBrace), sym(Sym::RBrace))
        .map_with(|stmts, extra| Block {
            stmts,
            span: extra.span().into(),
        })
}

fn local_vars<'code, I, V>(var_init: V) -> impl Parser<'code, I, Vec<LocalVar>, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    V: Parser<'code, I, Expr, ParseExtra<'code>> + Clone,
{
    kw(Kw::Final)
        .or_not()
        .ignore_then(type_ref())
        .then(declarators(var_init))
        .map(|(ty, declarators)| {
            declarators
                .into_iter()
                .map(|d| LocalVar {
                    name: d.name,
                    name_span: d.name_span,
                    ty: with_dims(ty.clone(), d.dims),
                    init: d.init,
                })
                .collect()
        })
}

fn statement<'code, I, E>(expr: E) -> impl Parser<'code, I, Stmt, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    E: Parser<'code, I, Expr, ParseExtra<'code>> + Clone + 'code,
{
    recursive(move |stmt| {
        let block = block_of(stmt.clone());
        let locals = local_vars(initializer(expr.clone()));
        let condition = expr
            .clone()
            .delimited_by(sym(Sym::LParen), sym(Sym::RParen));
        let semi = sym(Sym::Semi);
        let boxed = |stmt: Stmt| Box::new(stmt);

        let if_stmt = kw(Kw::If)
            .ignore_then(condition.clone())
            .then(stmt.clone())
            .then(kw(Kw::Else).ignore_then(stmt.clone()).or_not())
            .map(move |((cond, then), els)| StmtKind::If {
                cond,
                then: boxed(then),
                els: els.map(boxed),
            });

        let while_stmt = kw(Kw::While)
            .ignore_then(condition.clone())
            .then(stmt.clone())
            .map(move |(cond, body)| StmtKind::While {
                cond,
                body: boxed(body),
            });

        let do_stmt = kw(Kw::Do)
            .ignore_then(stmt.clone())
            .then_ignore(kw(Kw::While))
            .then(condition)
            .then_ignore(semi.clone())
            .map(move |(body, cond)| StmtKind::DoWhile {
                body: boxed(body),
                cond,
            });

        let for_each = kw(Kw::For)
            .ignore_then(
                kw(Kw::Final)
                    .or_not()
                    .ignore_then(type_ref())
                    .then(ident())
                    .then_ignore(sym(Sym::Colon))
                    .then(expr.clone())
                    .delimited_by(sym(Sym::LParen), sym(Sym::RParen)),
            )
            .then(stmt.clone())
            .map(move |(((ty, (name, name_span)), iter), body)| StmtKind::ForEach {
                ty,
                name,
                name_span,
                iter,
                body: boxed(body),
            });

        let for_init = locals
            .clone()
            .map_with(|locals, extra| {
                vec![Stmt {
                    kind: StmtKind::Local(locals),
                    span: extra.span().into(),
                }]
            })
            .or(expr
                .clone()
                .map_with(|expr, extra| Stmt {
                    kind: StmtKind::Expr(expr),
                    span: extra.span().into(),
                })
                .separated_by(sym(Sym::Comma))
                .at_least(1)
                .collect::<Vec<_>>())
            .or_not()
            .map(Option::unwrap_or_default);
        let for_stmt = kw(Kw::For)
            .ignore_then(sym(Sym::LParen))
            .ignore_then(for_init)
            .then_ignore(semi.clone())
            .then(expr.clone().or_not())
            .then_ignore(semi.clone())
            .then(expr.clone().separated_by(sym(Sym::Comma)).collect::<Vec<_>>())
            .then_ignore(sym(Sym::RParen))
            .then(stmt.clone())
            .map(move |(((init, cond), update), body)| StmtKind::For {
                init,
                cond,
                update,
                body: boxed(body),
            });

        let return_stmt = kw(Kw::Return)
            .ignore_then(expr.clone().or_not())
            .then_ignore(semi.clone())
            .map(StmtKind::Return);
        let break_stmt = kw(Kw::Break).then(semi.clone()).to(StmtKind::Break);
        let continue_stmt = kw(Kw::Continue).then(semi.clone()).to(StmtKind::Continue);
        let throw_stmt = kw(Kw::Throw)
            .ignore_then(expr.clone())
            .then_ignore(semi.clone())
            .map(StmtKind::Throw);

        let catch = kw(Kw::Catch)
            .ignore_then(
                kw(Kw::Final)
                    .or_not()
                    .ignore_then(type_ref())
                    .then(ident())
                    .delimited_by(sym(Sym::LParen), sym(Sym::RParen)),
            )
            .then(block.clone())
            .map_with(|((ty, (name, _)), body), extra| CatchClause {
                ty,
                name,
                body,
                span: extra.span().into(),
            });
        let try_stmt = kw(Kw::Try)
            .ignore_then(block.clone())
            .then(catch.repeated().collect::<Vec<_>>())
            .then(kw(Kw::Finally).ignore_then(block.clone()).or_not())
            .validate(|((body, catches), finally), extra, emitter| {
                if catches.is_empty() && finally.is_none() {
                    emitter.emit(Rich::custom(
                        extra.span(),
                        "'try' without 'catch' or 'finally'",
                    ));
                }
                StmtKind::Try {
                    body,
                    catches,
                    finally,
                }
            });

        let super_call = kw(Kw::Super)
            .ignore_then(arguments(expr.clone()))
            .then_ignore(semi.clone())
            .map(StmtKind::SuperCtor);

        let local_type = skipped_declaration().validate(|_, extra, emitter| {
            emitter.emit(Rich::custom(
                extra.span(),
                "local type declarations are not supported",
            ));
            StmtKind::Empty
        });

        let local_stmt = locals.then_ignore(semi.clone()).map(StmtKind::Local);
        let expr_stmt = expr.clone().then_ignore(semi.clone()).map(StmtKind::Expr);

        choice((
            block.map(StmtKind::Block),
            semi.to(StmtKind::Empty),
            if_stmt,
            while_stmt,
            do_stmt,
            for_each,
            for_stmt,
            return_stmt,
            break_stmt,
            continue_stmt,
            throw_stmt,
            try_stmt,
            super_call,
            local_type,
            local_stmt,
            expr_stmt,
        ))
        .map_with(|kind, extra| Stmt {
            kind,
            span: extra.span().into(),
        })
        .boxed()
    })
}

fn member<'code, I, B, V>(block: B, var_init: V) -> impl Parser<'code, I, Vec<Member>, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    B: Parser<'code, I, Block, ParseExtra<'code>> + Clone,
    V: Parser<'code, I, Expr, ParseExtra<'code>> + Clone,
{
    let nested = skipped_declaration().validate(|_, extra, emitter| {
        emitter.emit(Rich::custom(
            extra.span(),
            "nested type declarations are not supported",
        ));
        Vec::new()
    });

    let constructor = group((
        modifiers(),
        ident(),
        parameters(),
        throws_clause(),
        block.clone(),
    ))
    .map_with(|(modifiers, (name, _), params, throws, body), extra| {
        vec![Member::Constructor(ConstructorDecl {
            modifiers,
            name,
            params,
            throws,
            body,
            span: extra.span().into(),
        })]
    });

    let method = group((
        modifiers(),
        type_ref(),
        ident(),
        parameters(),
        throws_clause(),
        block.map(Some).or(sym(Sym::Semi).to(None)),
    ))
    .map_with(|(modifiers, ret, (name, name_span), params, throws, body), extra| {
        vec![Member::Method(MethodDecl {
            modifiers,
            ret,
            name,
            name_span,
            params,
            throws,
            body,
            span: extra.span().into(),
        })]
    });

    let field = group((modifiers(), type_ref(), declarators(var_init)))
        .then_ignore(sym(Sym::Semi))
        .map_with(|(modifiers, ty, declarators), extra| {
            let start = extra.span().start;
            declarators
                .into_iter()
                .map(|d| {
                    Member::Field(FieldDecl {
                        modifiers: modifiers.clone(),
                        ty: with_dims(ty.clone(), d.dims),
                        name: d.name,
                        name_span: d.name_span,
                        init: d.init,
                        span: Span::new(start, d.end),
                    })
                })
                .collect()
        });

    choice((nested, constructor, method, field))
}

fn class_decl<'code, I, B, V>(block: B, var_init: V) -> impl Parser<'code, I, ClassDecl, ParseExtra<'code>> + Clone
where
    I: TokenInput<'code>,
    B: Parser<'code, I, Block, ParseExtra<'code>> + Clone,
    V: Parser<'code, I, Expr, ParseExtra<'code>> + Clone,
{
    let generics = sym(Sym::Lt)
        .then(
            any()
                .filter(|tok: &Tok| *tok != Tok::Sym(Sym::Gt))
                .repeated(),
        )
        .then(sym(Sym::Gt))
        .map_with(|_, extra| extra.span());

    let constants = ident()
        .separated_by(sym(Sym::Comma))
        .allow_trailing()
        .at_least(1)
        .collect::<Vec<_>>()
        .then_ignore(
            sym(Sym::Semi)
                .ignored()
                .or(sym(Sym::RBrace).ignored().rewind()),
        );

    let members = member(block, var_init)
        .or(sym(Sym::Semi).to(Vec::new()))
        .repeated()
        .collect::<Vec<_>>();

    let body = sym(Sym::LBrace)
        .ignore_then(constants.or_not())
        .then(members)
        .then_ignore(sym(Sym::RBrace));

    group((
        modifiers(),
        type_kind(),
        ident(),
        generics.or_not(),
        kw(Kw::Extends).ignore_then(type_list()).or_not(),
        kw(Kw::Implements).ignore_then(type_list()).or_not(),
        body,
    ))
    .validate(
        |(modifiers, kind, (name, name_span), generics, extends, implements, (constants, members)),
         extra,
         emitter| {
            if let Some(span) = generics {
                emitter.emit(Rich::custom(
                    span,
                    "generic type declarations are not supported",
                ));
            }
            let brace_expected = |list: &[TypeRef]| list.first().map(|ty| simple(ty.span));
            let (extends, implements) = match kind {
                TypeDeclKind::Class => {
                    let mut extends = extends.unwrap_or_default();
                    if let Some(span) = extends.get(1).map(|ty| simple(ty.span)) {
                        emitter.emit(Rich::custom(span, "'{' expected"));
                    }
                    let first = (!extends.is_empty()).then(|| extends.remove(0));
                    (first, implements.unwrap_or_default())
                }
                TypeDeclKind::Interface => {
                    if let Some(span) = implements.as_deref().and_then(brace_expected) {
                        emitter.emit(Rich::custom(span, "'{' expected"));
                    }
                    (None, extends.unwrap_or_default())
                }
                TypeDeclKind::Enum => {
                    if let Some(span) = extends.as_deref().and_then(brace_expected) {
                        emitter.emit(Rich::custom(span, "'{' expected"));
                    }
                    (None, implements.unwrap_or_default())
                }
            };
            let enum_constants = constants.unwrap_or_default();
            if kind != TypeDeclKind::Enum {
                if let Some((_, span)) = enum_constants.first() {
                    emitter.emit(Rich::custom(simple(*span), "<identifier> expected"));
                }
            }
            let members: Vec<Member> = members.into_iter().flatten().collect();
            for member in &members {
                if let Member::Constructor(ctor) = member {
                    if ctor.name != name {
                        emitter.emit(Rich::custom(
                            simple(ctor.span),
                            "invalid method declaration; return type required",
                        ));
                    }
                }
            }
            ClassDecl {
                modifiers,
                kind,
                name,
                name_span,
                extends,
                implements,
                enum_constants,
                members,
                span: extra.span().into(),
            }
        },
    )
}

fn import<'code, I: TokenInput<'code>>()
-> impl Parser<'code, I, ImportDecl, ParseExtra<'code>> + Clone {
    let step = ident().map(|(name, _)| Some(name)).or(sym(Sym::Star).to(None));
    kw(Kw::Import)
        .ignore_then(kw(Kw::Static).or_not())
        .then(ident())
        .then(sym(Sym::Dot).ignore_then(step).repeated().collect::<Vec<_>>())
        .validate(|((is_static, (first, _)), steps), extra, emitter| {
            let mut path = vec![first];
            let mut on_demand = false;
            for step in steps {
                match step {
                    Some(_) if on_demand => {
                        emitter.emit(Rich::custom(extra.span(), "';' expected"));
                    }
                    Some(name) => path.push(name),
                    None => on_demand = true,
                }
            }
            let is_static = is_static.is_some();
            if is_static && !on_demand && path.len() < 2 {
                emitter.emit(Rich::custom(extra.span(), "'.' expected"));
            }
            ImportDecl {
                path,
                is_static,
                on_demand,
                span: Span::from(extra.span()),
            }
        })
}

fn snippet<'code, I: TokenInput<'code>>() -> impl Parser<'code, I, Top, ParseExtra<'code>> {
    let expr = expression();
    let var_init = initializer(expr.clone());
    let stmt = statement(expr.clone());
    let block = block_of(stmt.clone());
    let end_of_top = sym(Sym::Semi).repeated().then(end());

    let method = group((
        modifiers(),
        type_ref(),
        ident(),
        parameters(),
        throws_clause(),
        block.clone(),
    ))
    .map_with(|(modifiers, ret, (name, name_span), params, throws, body), extra| MethodDecl {
        modifiers,
        ret,
        name,
        name_span,
        params,
        throws,
        body: Some(body),
        span: Span::from(extra.span()),
    });

    let vars = group((modifiers(), type_ref(), declarators(var_init.clone()))).map_with(
        |(modifiers, ty, declarators), extra: &mut chumsky::input::MapExtra<'code, '_, I, ParseExtra<'code>>| {
            let start = extra.span().start;
            declarators
                .into_iter()
                .map(|d| VarDecl {
                    modifiers: modifiers.clone(),
                    ty: with_dims(ty.clone(), d.dims),
                    name: d.name,
                    name_span: d.name_span,
                    init: d.init,
                    span: Span::new(start, d.end),
                })
                .collect()
        },
    );

    choice((
        import()
            .then_ignore(end_of_top.clone())
            .map(|import| Top::Unit(Unit::Import(import))),
        class_decl(block, var_init)
            .then_ignore(end_of_top.clone())
            .map(|class| Top::Unit(Unit::Type(Arc::new(class)))),
        method
            .then_ignore(end_of_top.clone())
            .map(|method| Top::Unit(Unit::Method(Arc::new(method)))),
        vars.then_ignore(end_of_top.clone()).map(Top::Vars),
        expr.then_ignore(end_of_top.clone())
            .map(|expr| Top::Unit(Unit::Expression(expr))),
        stmt.then_ignore(end_of_top)
            .map(|stmt| Top::Unit(Unit::Statement(stmt))),
    ))
}

#[cfg(test)]
mod tests {
    use super::parse_snippet;
    use crate::ast::{BinOp, ExprKind, Literal, StmtKind, TypeDeclKind};
    use crate::unit::{SubKind, Unit};

    fn single(src: &str) -> Unit {
        let mut units = parse_snippet(src).expect("parse should pass");
        assert_eq!(units.len(), 1);
        units.remove(0).unit
    }

    fn first_error(src: &str) -> (&'static str, String) {
        let errs = parse_snippet(src).expect_err("should fail");
        (errs[0].code, errs[0].message.clone())
    }

    #[test]
    fn parses_var_with_initializer() {
        let Unit::Var(var) = single("int x = 1 + 2 * 3;") else {
            panic!("expected var");
        };
        assert_eq!(var.name, "x");
        let Some(init) = var.init else {
            panic!("expected initializer");
        };
        let ExprKind::Binary { op, rhs, .. } = init.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn splits_multiple_declarators() {
        let units = parse_snippet("int a, b = 2;").expect("parse should pass");
        let sources: Vec<&str> = units.iter().map(|u| u.source.as_str()).collect();
        assert_eq!(sources, vec!["int a;", "int b = 2;"]);
        assert_eq!(units[1].unit.syntactic_sub_kind(), SubKind::VarDeclarationWithInitializer);
    }

    #[test]
    fn split_keeps_the_whole_initializer_text() {
        let units = parse_snippet("int[] a = {1, 2}, b = new int[a.length + 1];")
            .expect("parse should pass");
        let sources: Vec<&str> = units.iter().map(|u| u.source.as_str()).collect();
        assert_eq!(
            sources,
            vec!["int[] a = {1, 2};", "int[] b = new int[a.length + 1];"]
        );
    }

    #[test]
    fn parses_method_and_class() {
        let Unit::Method(method) = single("int mu() { return x * 4; }") else {
            panic!("expected method");
        };
        assert_eq!(method.name, "mu");
        assert_eq!(method.body.as_ref().map(|b| b.stmts.len()), Some(1));

        let Unit::Type(class) = single("class B extends A { int f; B(int f) { this.f = f; } }")
        else {
            panic!("expected class");
        };
        assert_eq!(class.kind, TypeDeclKind::Class);
        assert_eq!(class.extends.as_ref().map(|t| t.render()), Some("A".to_string()));
        assert_eq!(class.members.len(), 2);
    }

    #[test]
    fn parses_enum_constants_before_members() {
        let Unit::Type(color) = single("enum Color { RED, GREEN; int shade() { return 1; } }")
        else {
            panic!("expected enum");
        };
        let names: Vec<&str> = color.enum_constants.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["RED", "GREEN"]);
        assert_eq!(color.members.len(), 1);
    }

    #[test]
    fn expression_without_semicolon() {
        let Unit::Expression(expr) = single("x") else {
            panic!("expected expression");
        };
        assert_eq!(expr.kind, ExprKind::Name("x".to_string()));
    }

    #[test]
    fn distinguishes_cast_from_parenthesized() {
        let Unit::Expression(cast) = single("(int) 2.5") else {
            panic!("expected expression");
        };
        assert!(matches!(cast.kind, ExprKind::Cast { .. }));

        let Unit::Expression(paren) = single("(a) + b") else {
            panic!("expected expression");
        };
        assert!(matches!(paren.kind, ExprKind::Binary { op: BinOp::Add, .. }));

        let Unit::Expression(signed) = single("(int) -x") else {
            panic!("expected expression");
        };
        assert!(matches!(signed.kind, ExprKind::Cast { .. }));
    }

    #[test]
    fn operators_bind_by_precedence() {
        let Unit::Expression(expr) = single("a || b && c == d + e * -f") else {
            panic!("expected expression");
        };
        let ExprKind::Binary { op: BinOp::Or, rhs, .. } = expr.kind else {
            panic!("expected ||");
        };
        let ExprKind::Binary { op: BinOp::And, rhs, .. } = rhs.kind else {
            panic!("expected &&");
        };
        let ExprKind::Binary { op: BinOp::Eq, rhs, .. } = rhs.kind else {
            panic!("expected ==");
        };
        let ExprKind::Binary { op: BinOp::Add, rhs, .. } = rhs.kind else {
            panic!("expected +");
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn subtraction_is_left_associative() {
        let Unit::Expression(expr) = single("a - b - c") else {
            panic!("expected expression");
        };
        let ExprKind::Binary { op: BinOp::Sub, lhs, .. } = expr.kind else {
            panic!("expected -");
        };
        assert!(matches!(lhs.kind, ExprKind::Binary { op: BinOp::Sub, .. }));
    }

    #[test]
    fn conditional_and_assignment_nest_to_the_right() {
        let Unit::Expression(expr) = single("x = a ? b : c ? d : e") else {
            panic!("expected expression");
        };
        let ExprKind::Assign { op: None, value, .. } = expr.kind else {
            panic!("expected assignment");
        };
        let ExprKind::Conditional { els, .. } = value.kind else {
            panic!("expected conditional");
        };
        assert!(matches!(els.kind, ExprKind::Conditional { .. }));
    }

    #[test]
    fn postfix_chain_and_instanceof() {
        let Unit::Expression(expr) = single("a.b(1)[2]++") else {
            panic!("expected expression");
        };
        let ExprKind::IncDec { target, prefix: false, .. } = expr.kind else {
            panic!("expected postfix increment");
        };
        let ExprKind::Index { target, .. } = target.kind else {
            panic!("expected index");
        };
        assert!(matches!(target.kind, ExprKind::Call { .. }));

        let Unit::Expression(test) = single("s instanceof String == true") else {
            panic!("expected expression");
        };
        let ExprKind::Binary { op: BinOp::Eq, lhs, .. } = test.kind else {
            panic!("expected ==");
        };
        assert!(matches!(lhs.kind, ExprKind::InstanceOf { .. }));
    }

    #[test]
    fn folds_min_int_literal() {
        let Unit::Expression(expr) = single("-2147483648") else {
            panic!("expected expression");
        };
        assert_eq!(expr.kind, ExprKind::Literal(Literal::Int(-2147483648)));
    }

    #[test]
    fn parses_enhanced_for_and_try() {
        let Unit::Statement(stmt) = single("for (int v : values) { total += v; }") else {
            panic!("expected statement");
        };
        assert!(matches!(stmt.kind, StmtKind::ForEach { .. }));

        let Unit::Statement(stmt) =
            single("try { f(); } catch (RuntimeException e) { g(); } finally { h(); }")
        else {
            panic!("expected statement");
        };
        let StmtKind::Try { catches, finally, .. } = stmt.kind else {
            panic!("expected try");
        };
        assert_eq!(catches.len(), 1);
        assert!(finally.is_some());
    }

    #[test]
    fn parses_classic_for() {
        let Unit::Statement(stmt) = single("for (int i = 0, j = 1; i < 3; i++, j--) {}") else {
            panic!("expected statement");
        };
        let StmtKind::For { init, cond, update, .. } = stmt.kind else {
            panic!("expected for");
        };
        assert!(matches!(&init[0].kind, StmtKind::Local(locals) if locals.len() == 2));
        assert!(cond.is_some());
        assert_eq!(update.len(), 2);
    }

    #[test]
    fn reports_missing_semicolon_inside_block() {
        let errs = parse_snippet("void f() { int a = 1 }").expect_err("should fail");
        assert_eq!(errs[0].message, "';' expected");
    }

    #[test]
    fn reports_unsupported_forms() {
        assert_eq!(
            first_error("Runnable r = new Runnable() { public void run() {} };").0,
            "compiler.err.unsupported"
        );
        assert_eq!(
            first_error("class Box<T> { T value; }").1,
            "generic type declarations are not supported"
        );
        assert_eq!(
            first_error("class Outer { class Inner {} }").1,
            "nested type declarations are not supported"
        );
        assert_eq!(
            first_error("switch (x) {}"),
            ("compiler.err.unsupported", "'switch' is not supported".to_string())
        );
    }

    #[test]
    fn reports_malformed_statements() {
        assert_eq!(
            first_error("try { f(); }").0,
            "compiler.err.try.without.catch.or.finally"
        );
        assert_eq!(
            first_error("int[] a = new int[];").0,
            "compiler.err.array.dimension.missing"
        );
        assert_eq!(first_error("f() = 3;").0, "compiler.err.unexpected.type");
        assert_eq!(first_error("int x = ;").0, "compiler.err.illegal.start.of.expr");
        assert_eq!(first_error("{ int y = 1;").0, "compiler.err.premature.eof");
    }

    #[test]
    fn imports() {
        let Unit::Import(import) = single("import static java.lang.Math.*;") else {
            panic!("expected import");
        };
        assert!(import.is_static && import.on_demand);
        assert_eq!(import.full_name(), "java.lang.Math.*");
    }
}
