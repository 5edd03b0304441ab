//! Type checking and lowering of one unit against the current session scope.
//!
//! The checker never fails: it collects diagnostics, unresolved references
//! and the names used, split between the declaration (what other snippets
//! see) and the bodies (what only runs). The caller decides the resulting
//! status from that split.

use crate::ast::{
    ClassDecl, ImportDecl, Member, MethodDecl, Modifier, Modifiers, TypeDeclKind, TypeRef,
    TypeRefKind, VarDecl,
};
use crate::diag::{Diag, LineMap, Span};
use crate::ir::{self, Body, ClassIr, Code, FieldIr, MethodIr, Prim};
use crate::platform::{self, is_platform_package, platform_class};
use crate::scope::{DepName, ImportInfo, Scope, Unresolved};
use crate::types::{ClassInfo, ClassKind, FieldInfo, MethodInfo, OBJECT, Origin, Type, simple_name};
use crate::unit::{ParsedUnit, SubKind, Unit};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// First evaluation of a snippet: everything is checked.
    Fresh,
    /// Re-resolution after a dependency changed. Variable initializers have
    /// already run and are not checked again.
    Recheck,
}

/// What a unit contributes to the session once accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum Declared {
    Var { name: String, ty: Type },
    Method(MethodInfo),
    Type(Arc<ClassInfo>),
    Import(ImportInfo),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitAnalysis {
    pub sub_kind: SubKind,
    pub declared: Declared,
    /// Lookup key of a declaration: `x`, `f(int)`, `A`, `java.util.*`.
    pub lookup: Option<String>,
    /// Canonical signature; equal signatures mean an in-place redefinition.
    pub signature: String,
    /// Display type of a variable or expression.
    pub type_name: Option<String>,
    pub decl_errors: Vec<Diag>,
    pub body_errors: Vec<Diag>,
    pub decl_unresolved: Vec<Unresolved>,
    pub body_unresolved: Vec<Unresolved>,
    pub warnings: Vec<Diag>,
    pub decl_refs: BTreeSet<DepName>,
    pub body_refs: BTreeSet<DepName>,
    /// Top-level variable read by a `VarValue` or written by an `Assignment`.
    pub target_var: Option<String>,
    pub code: Code,
}

impl UnitAnalysis {
    pub fn refs(&self) -> BTreeSet<DepName> {
        self.decl_refs.union(&self.body_refs).cloned().collect()
    }

    pub fn has_decl_problems(&self) -> bool {
        !self.decl_errors.is_empty() || !self.decl_unresolved.is_empty()
    }

    pub fn has_body_problems(&self) -> bool {
        !self.body_errors.is_empty() || !self.body_unresolved.is_empty()
    }

    /// All errors, with unresolved references rendered as diagnostics.
    pub fn error_diags(&self) -> Vec<Diag> {
        let mut all: Vec<Diag> = self.decl_errors.clone();
        all.extend(self.decl_unresolved.iter().map(Unresolved::to_diag));
        all.extend(self.body_errors.iter().cloned());
        all.extend(self.body_unresolved.iter().map(Unresolved::to_diag));
        all.sort_by_key(|d| d.span.start);
        all
    }
}

/// Checks one parsed unit. `origin` is the id of the snippet, recorded on
/// lowered code for stack traces.
pub fn check_unit(
    parsed: &ParsedUnit,
    scope: &dyn Scope,
    mode: CheckMode,
    origin: &str,
) -> UnitAnalysis {
    let mut checker = Checker::new(scope, &parsed.source, origin);
    let outcome = match &parsed.unit {
        Unit::Import(import) => checker.import(import),
        Unit::Var(var) => checker.var(var, mode),
        Unit::Method(method) => checker.top_method(method),
        Unit::Type(decl) => checker.type_decl(decl),
        Unit::Expression(expr) => checker.expression(expr),
        Unit::Statement(stmt) => checker.statement_unit(stmt),
    };
    let analysis = checker.finish(parsed.unit.syntactic_sub_kind(), outcome);
    tracing::trace!(
        origin,
        sub_kind = ?analysis.sub_kind,
        decl_problems = analysis.has_decl_problems(),
        body_problems = analysis.has_body_problems(),
        "checked unit"
    );
    analysis
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Part {
    Decl,
    Body,
}

#[derive(Debug, Default)]
pub(crate) struct Sink {
    pub(crate) errors: Vec<Diag>,
    pub(crate) unresolved: Vec<Unresolved>,
    pub(crate) refs: BTreeSet<DepName>,
}

impl Sink {
    pub(crate) fn problems(&self) -> usize {
        self.errors.len() + self.unresolved.len()
    }
}

pub(crate) struct Outcome {
    sub_kind: Option<SubKind>,
    declared: Declared,
    lookup: Option<String>,
    signature: String,
    type_name: Option<String>,
    target_var: Option<String>,
    code: Code,
}

impl Outcome {
    fn new(declared: Declared, code: Code) -> Self {
        Self {
            sub_kind: None,
            declared,
            lookup: None,
            signature: String::new(),
            type_name: None,
            target_var: None,
            code,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Local {
    pub(crate) name: String,
    pub(crate) slot: ir::Slot,
    pub(crate) ty: Type,
}

/// State of the body being checked.
#[derive(Debug, Clone, Default)]
pub(crate) struct BodyCtx {
    pub(crate) class: Option<Arc<ClassInfo>>,
    pub(crate) is_static: bool,
    /// Declared return type; `None` outside methods.
    pub(crate) ret: Option<Type>,
    pub(crate) in_ctor: bool,
    pub(crate) method_name: String,
    pub(crate) scopes: Vec<Vec<Local>>,
    pub(crate) next_slot: usize,
    pub(crate) max_slot: usize,
    pub(crate) loop_depth: usize,
    /// Set while the first statement of a constructor is checked.
    pub(crate) super_allowed: bool,
}

impl BodyCtx {
    pub(crate) fn top_level() -> Self {
        Self {
            is_static: true,
            scopes: vec![Vec::new()],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Selection {
    Found(MethodInfo),
    NoCandidates,
    NotApplicable(Vec<MethodInfo>),
    Ambiguous(MethodInfo, MethodInfo),
}

pub(crate) struct Checker<'a> {
    pub(crate) scope: &'a dyn Scope,
    pub(crate) lines: LineMap,
    pub(crate) origin: String,
    pub(crate) part: Part,
    pub(crate) decl: Sink,
    pub(crate) body: Sink,
    pub(crate) warnings: Vec<Diag>,
    /// Class being declared, visible to its own members.
    pub(crate) self_class: Option<Arc<ClassInfo>>,
    /// Top-level method being declared, visible to its own body.
    pub(crate) self_method: Option<MethodInfo>,
    pub(crate) ctx: BodyCtx,
}

impl<'a> Checker<'a> {
    fn new(scope: &'a dyn Scope, source: &str, origin: &str) -> Self {
        Self {
            scope,
            lines: LineMap::new(source),
            origin: origin.to_string(),
            part: Part::Decl,
            decl: Sink::default(),
            body: Sink::default(),
            warnings: Vec::new(),
            self_class: None,
            self_method: None,
            ctx: BodyCtx::top_level(),
        }
    }

    fn finish(self, syntactic: SubKind, outcome: Outcome) -> UnitAnalysis {
        UnitAnalysis {
            sub_kind: outcome.sub_kind.unwrap_or(syntactic),
            declared: outcome.declared,
            lookup: outcome.lookup,
            signature: outcome.signature,
            type_name: outcome.type_name,
            decl_errors: self.decl.errors,
            body_errors: self.body.errors,
            decl_unresolved: self.decl.unresolved,
            body_unresolved: self.body.unresolved,
            warnings: self.warnings,
            decl_refs: self.decl.refs,
            body_refs: self.body.refs,
            target_var: outcome.target_var,
            code: outcome.code,
        }
    }

    pub(crate) fn sink(&mut self) -> &mut Sink {
        match self.part {
            Part::Decl => &mut self.decl,
            Part::Body => &mut self.body,
        }
    }

    pub(crate) fn error(&mut self, span: Span, code: &'static str, message: impl Into<String>) {
        let diag = Diag::error(span, code, message);
        let sink = self.sink();
        if !sink.errors.contains(&diag) {
            sink.errors.push(diag);
        }
    }

    pub(crate) fn warn(&mut self, span: Span, code: &'static str, message: impl Into<String>) {
        self.warnings.push(Diag::warning(span, code, message));
    }

    pub(crate) fn reference(&mut self, dep: DepName) {
        self.sink().refs.insert(dep);
    }

    pub(crate) fn unresolved(&mut self, dep: DepName, display: String, span: Span) {
        let sink = self.sink();
        sink.refs.insert(dep.clone());
        if !sink.unresolved.iter().any(|u| u.display == display) {
            sink.unresolved.push(Unresolved { dep, display, span });
        }
    }

    pub(crate) fn line(&self, span: Span) -> u32 {
        self.lines.line_of(span.start)
    }

    // ---- classes and types ------------------------------------------------

    /// Class by the name stored in `Type::Class`.
    pub(crate) fn lookup_class(&mut self, name: &str) -> Option<Arc<ClassInfo>> {
        if let Some(own) = &self.self_class {
            if &*own.name == name {
                return Some(own.clone());
            }
        }
        if name.contains('.') {
            if let Some(info) = platform_class(name) {
                return Some(info);
            }
            if self.scope.has_external_type(name) {
                let mut info = ClassInfo::new(name, ClassKind::Class, Origin::External);
                info.superclass = Some(Arc::from(OBJECT));
                return Some(Arc::new(info));
            }
            return None;
        }
        let found = self.scope.user_type(name).map(|user| user.info);
        if found.is_some() {
            self.reference(DepName::Type(name.to_string()));
        }
        found
    }

    /// Resolves a simple type name without reporting a miss.
    pub(crate) fn find_simple_type(&mut self, name: &str) -> Option<Type> {
        if self.self_class.as_ref().is_some_and(|c| &*c.name == name) {
            return Some(Type::class(name));
        }
        if self.scope.user_type(name).is_some() {
            self.reference(DepName::Type(name.to_string()));
            return Some(Type::class(name));
        }
        let imports = self.scope.imports();
        for import in imports.iter().filter(|i| !i.is_static && !i.on_demand) {
            if simple_name(&import.target) == name && self.qualified_exists(&import.target) {
                self.reference(DepName::Type(name.to_string()));
                return Some(Type::class(&import.target));
            }
        }
        let lang = format!("java.lang.{name}");
        if platform_class(&lang).is_some() {
            return Some(Type::class(&lang));
        }
        for import in imports.iter().filter(|i| !i.is_static && i.on_demand) {
            let candidate = format!("{}.{name}", import.target);
            if self.qualified_exists(&candidate) {
                return Some(Type::class(&candidate));
            }
        }
        None
    }

    pub(crate) fn qualified_exists(&self, name: &str) -> bool {
        platform_class(name).is_some() || self.scope.has_external_type(name)
    }

    pub(crate) fn package_exists(&self, name: &str) -> bool {
        is_platform_package(name) || self.scope.has_external_package(name)
    }

    pub(crate) fn resolve_type(&mut self, tref: &TypeRef) -> Type {
        match &tref.kind {
            TypeRefKind::Primitive(p) => match p {
                crate::ast::Primitive::Int => Type::Int,
                crate::ast::Primitive::Long => Type::Long,
                crate::ast::Primitive::Double => Type::Double,
                crate::ast::Primitive::Boolean => Type::Boolean,
                crate::ast::Primitive::Char => Type::Char,
                crate::ast::Primitive::Void => Type::Void,
            },
            TypeRefKind::Array(elem) => {
                let elem = self.resolve_type(elem);
                if elem == Type::Void {
                    self.error(tref.span, "compiler.err.void.not.allowed.here", "'void' type not allowed here");
                    return Type::Error;
                }
                if elem.is_error() {
                    Type::Error
                } else {
                    Type::array_of(elem)
                }
            }
            TypeRefKind::Named(path) if path.len() == 1 => {
                let name = &path[0];
                match self.find_simple_type(name) {
                    Some(ty) => ty,
                    None => {
                        self.unresolved(
                            DepName::Type(name.clone()),
                            format!("class {name}"),
                            tref.span,
                        );
                        Type::Error
                    }
                }
            }
            TypeRefKind::Named(path) => {
                let full = path.join(".");
                if self.qualified_exists(&full) {
                    return Type::class(&full);
                }
                let package = path[..path.len() - 1].join(".");
                if self.package_exists(&package) {
                    self.error(
                        tref.span,
                        "compiler.err.cant.resolve.location",
                        format!(
                            "cannot find symbol\n  symbol:   class {}\n  location: package {package}",
                            path[path.len() - 1]
                        ),
                    );
                } else {
                    self.error(
                        tref.span,
                        "compiler.err.doesnt.exist",
                        format!("package {package} does not exist"),
                    );
                }
                Type::Error
            }
        }
    }

    /// Identity used in canonical signatures.
    pub(crate) fn identity(&self, ty: &Type) -> String {
        match ty {
            Type::Class(name) if !name.contains('.') => {
                if self.self_class.as_ref().is_some_and(|c| c.name == *name) {
                    return format!("{name}#self");
                }
                match self.scope.user_type(name) {
                    Some(user) => format!("{name}#{}", user.identity),
                    None => name.to_string(),
                }
            }
            Type::Array(elem) => format!("{}[]", self.identity(elem)),
            other => other.qualified(),
        }
    }

    pub(crate) fn is_subclass(&mut self, sub: &str, sup: &str) -> bool {
        let mut seen = HashSet::new();
        self.is_subclass_inner(sub, sup, &mut seen)
    }

    fn is_subclass_inner(&mut self, sub: &str, sup: &str, seen: &mut HashSet<String>) -> bool {
        if sub == sup || sup == OBJECT {
            return true;
        }
        if !seen.insert(sub.to_string()) {
            return false;
        }
        let Some(info) = self.lookup_class(sub) else {
            return false;
        };
        let mut parents: Vec<Arc<str>> = info.interfaces.clone();
        if let Some(superclass) = &info.superclass {
            parents.push(superclass.clone());
        }
        parents
            .iter()
            .any(|parent| self.is_subclass_inner(parent, sup, seen))
    }

    /// Assignment compatibility; `boxing` allows boxing and unboxing.
    pub(crate) fn convertible(&mut self, from: &Type, to: &Type, boxing: bool) -> bool {
        if from.is_error() || to.is_error() || from == to {
            return true;
        }
        match (from, to) {
            (Type::Char, Type::Int | Type::Long | Type::Double)
            | (Type::Int, Type::Long | Type::Double)
            | (Type::Long, Type::Double) => true,
            (Type::Null, t) => t.is_reference(),
            (Type::Class(a), Type::Class(b)) => {
                let (a, b) = (a.clone(), b.clone());
                self.is_subclass(&a, &b)
            }
            (Type::Array(_), Type::Class(b)) => &**b == OBJECT,
            (Type::Array(a), Type::Array(b)) => {
                if a.is_primitive() || b.is_primitive() {
                    a == b
                } else {
                    self.convertible(a, b, false)
                }
            }
            (p, Type::Class(b)) if boxing && p.is_primitive() => {
                let boxed = p.boxed().unwrap_or(OBJECT);
                let b = b.clone();
                self.is_subclass(boxed, &b)
            }
            (Type::Class(_), p) if boxing && p.is_primitive() => match from.unboxed() {
                Some(prim) => self.convertible(&prim, p, false),
                None => false,
            },
            _ => false,
        }
    }

    pub(crate) fn assignable(&mut self, from: &Type, to: &Type) -> bool {
        self.convertible(from, to, true)
    }

    /// Inserts the runtime conversion needed to store `from` as `to`.
    pub(crate) fn coerce(&self, expr: ir::Expr, from: &Type, to: &Type) -> ir::Expr {
        let from_prim = if from.is_primitive() {
            Some(from.clone())
        } else {
            from.unboxed()
        };
        let Some(from_prim) = from_prim else {
            return expr;
        };
        let target = match to {
            t if t.is_primitive() => t.clone(),
            _ => return expr,
        };
        if from_prim == target {
            return expr;
        }
        match prim_of(&target) {
            Some(prim) => ir::Expr::Convert(prim, Box::new(expr)),
            None => expr,
        }
    }

    /// Methods named `name` visible on `class`, most derived first.
    pub(crate) fn class_methods(&mut self, class: &str, name: &str) -> Vec<MethodInfo> {
        let mut out: Vec<MethodInfo> = Vec::new();
        let mut seen_sigs = HashSet::new();
        let mut queue = vec![Arc::<str>::from(class)];
        let mut visited = HashSet::new();
        while let Some(current) = queue.first().cloned() {
            queue.remove(0);
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(info) = self.lookup_class(&current) else {
                continue;
            };
            for method in info.methods_named(name) {
                if seen_sigs.insert(method.sig()) {
                    out.push(method.clone());
                }
            }
            if let Some(superclass) = &info.superclass {
                queue.push(superclass.clone());
            }
            queue.extend(info.interfaces.iter().cloned());
            if info.kind == ClassKind::Interface && info.superclass.is_none() {
                queue.push(Arc::from(OBJECT));
            }
        }
        out
    }

    /// Field visible on `class`, with the class that declares it.
    pub(crate) fn class_field(&mut self, class: &str, name: &str) -> Option<(Arc<str>, FieldInfo)> {
        let mut current = Some(Arc::<str>::from(class));
        let mut visited = HashSet::new();
        while let Some(class_name) = current {
            if !visited.insert(class_name.clone()) {
                break;
            }
            let info = self.lookup_class(&class_name)?;
            if let Some(field) = info.field(name) {
                return Some((info.name.clone(), field.clone()));
            }
            for iface in &info.interfaces {
                if let Some(iface_info) = self.lookup_class(iface) {
                    if let Some(field) = iface_info.field(name) {
                        return Some((iface_info.name.clone(), field.clone()));
                    }
                }
            }
            current = info.superclass.clone();
        }
        None
    }

    /// Overload resolution in the three phases of the language: strict,
    /// loose (boxing), then variable arity.
    pub(crate) fn select(&mut self, candidates: &[MethodInfo], args: &[Type]) -> Selection {
        if candidates.is_empty() {
            return Selection::NoCandidates;
        }
        let any_error = args.iter().any(Type::is_error);
        for phase in 0..3 {
            let mut applicable: Vec<MethodInfo> = Vec::new();
            for candidate in candidates {
                if self.applicable(candidate, args, phase) {
                    applicable.push(candidate.clone());
                }
            }
            if applicable.is_empty() {
                continue;
            }
            if applicable.len() == 1 || any_error {
                return Selection::Found(applicable.remove(0));
            }
            let mut best: Option<MethodInfo> = None;
            for candidate in &applicable {
                let most_specific = applicable.iter().all(|other| {
                    std::ptr::eq(candidate, other) || self.more_specific(candidate, other)
                });
                if most_specific {
                    best = Some(candidate.clone());
                    break;
                }
            }
            return match best {
                Some(found) => Selection::Found(found),
                None => Selection::Ambiguous(applicable[0].clone(), applicable[1].clone()),
            };
        }
        Selection::NotApplicable(candidates.to_vec())
    }

    fn applicable(&mut self, method: &MethodInfo, args: &[Type], phase: u8) -> bool {
        let boxing = phase > 0;
        if phase < 2 || !method.varargs {
            if method.params.len() != args.len() {
                return false;
            }
            let params = method.params.clone();
            return params
                .iter()
                .zip(args)
                .all(|(param, arg)| self.convertible(arg, param, boxing));
        }
        let fixed = method.params.len() - 1;
        if args.len() < fixed {
            return false;
        }
        let params = method.params.clone();
        let elem = match &params[fixed] {
            Type::Array(elem) => (**elem).clone(),
            other => other.clone(),
        };
        params[..fixed]
            .iter()
            .zip(args)
            .all(|(param, arg)| self.convertible(arg, param, true))
            && args[fixed..]
                .iter()
                .all(|arg| self.convertible(arg, &elem, true))
    }

    fn more_specific(&mut self, a: &MethodInfo, b: &MethodInfo) -> bool {
        a.params.len() == b.params.len()
            && a.params
                .clone()
                .iter()
                .zip(b.params.clone().iter())
                .all(|(pa, pb)| self.convertible(pa, pb, false))
    }

    /// Lowers call arguments for `method`, packing variable arity arguments.
    pub(crate) fn lower_args(
        &mut self,
        method: &MethodInfo,
        args: Vec<(ir::Expr, Type)>,
    ) -> Vec<ir::Expr> {
        let params = method.params.clone();
        let packs = method.varargs
            && !(args.len() == params.len()
                && args
                    .last()
                    .zip(params.last())
                    .is_some_and(|((_, at), pt)| {
                        let (at, pt) = (at.clone(), pt.clone());
                        matches!(at, Type::Array(_) | Type::Null) && self.convertible(&at, &pt, true)
                    }));
        let fixed = if packs { params.len() - 1 } else { params.len() };
        let mut lowered = Vec::new();
        let mut rest = Vec::new();
        for (idx, (expr, ty)) in args.into_iter().enumerate() {
            if idx < fixed {
                lowered.push(self.coerce(expr, &ty, &params[idx]));
            } else {
                rest.push((expr, ty));
            }
        }
        if packs {
            let elem = match params.last() {
                Some(Type::Array(elem)) => (**elem).clone(),
                _ => Type::object(),
            };
            let items = rest
                .into_iter()
                .map(|(expr, ty)| self.coerce(expr, &ty, &elem))
                .collect();
            lowered.push(ir::Expr::ArrayLit { elem, items });
        }
        lowered
    }

    pub(crate) fn describe_args(args: &[Type]) -> String {
        args.iter()
            .map(|t| match t {
                Type::Null => "<null>".to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    // ---- modifiers --------------------------------------------------------

    fn top_level_modifiers(&mut self, modifiers: &Modifiers) {
        for (modifier, span) in &modifiers.list {
            match modifier {
                Modifier::Public | Modifier::Private | Modifier::Protected | Modifier::Static => {
                    self.warn(
                        *span,
                        "kulla.warn.modifier",
                        format!(
                            "Modifier '{}' not permitted in top-level declarations, ignored",
                            modifier.name()
                        ),
                    );
                }
                Modifier::Abstract => {
                    self.error(
                        *span,
                        "compiler.err.mod.not.allowed.here",
                        "modifier abstract not allowed here",
                    );
                }
                Modifier::Final => {}
            }
        }
    }

    // ---- units ------------------------------------------------------------

    fn import(&mut self, import: &ImportDecl) -> Outcome {
        let info = ImportInfo {
            target: import.path.join("."),
            is_static: import.is_static,
            on_demand: import.on_demand,
        };
        match (import.is_static, import.on_demand) {
            (false, false) => {
                if !self.qualified_exists(&info.target) {
                    let package = import.path[..import.path.len().saturating_sub(1)].join(".");
                    if self.package_exists(&package) {
                        self.error(
                            import.span,
                            "compiler.err.cant.resolve.location",
                            format!(
                                "cannot find symbol\n  symbol:   class {}\n  location: package {package}",
                                simple_name(&info.target)
                            ),
                        );
                    } else {
                        self.error(
                            import.span,
                            "compiler.err.doesnt.exist",
                            format!("package {package} does not exist"),
                        );
                    }
                }
            }
            (false, true) => {
                if !self.package_exists(&info.target) && !self.qualified_exists(&info.target) {
                    self.error(
                        import.span,
                        "compiler.err.doesnt.exist",
                        format!("package {} does not exist", info.target),
                    );
                }
            }
            (true, on_demand) => {
                let (class, member) = if on_demand {
                    (info.target.clone(), None)
                } else {
                    let (class, member) = info
                        .target
                        .rsplit_once('.')
                        .map(|(c, m)| (c.to_string(), Some(m.to_string())))
                        .unwrap_or((info.target.clone(), None));
                    (class, member)
                };
                match self.class_by_import_name(&class) {
                    None => self.error(
                        import.span,
                        "compiler.err.cant.resolve.location",
                        format!("cannot find symbol\n  symbol: class {}", simple_name(&class)),
                    ),
                    Some(info_class) => {
                        if let Some(member) = member {
                            let has_member = info_class
                                .fields
                                .iter()
                                .any(|f| f.is_static && f.name == member)
                                || info_class
                                    .methods
                                    .iter()
                                    .any(|m| m.is_static && m.name == member);
                            if !has_member {
                                self.error(
                                    import.span,
                                    "compiler.err.cant.resolve.location",
                                    format!(
                                        "cannot find symbol\n  symbol:   static {member}\n  location: class {}",
                                        simple_name(&class)
                                    ),
                                );
                            }
                        }
                    }
                }
            }
        }
        let mut outcome = Outcome::new(Declared::Import(info.clone()), Code::Import);
        outcome.lookup = Some(if info.is_static {
            format!("static {}", info.full_name())
        } else {
            info.full_name()
        });
        outcome.signature = outcome.lookup.clone().unwrap_or_default();
        outcome
    }

    pub(crate) fn class_by_import_name(&mut self, name: &str) -> Option<Arc<ClassInfo>> {
        if name.contains('.') {
            platform_class(name)
        } else {
            self.lookup_class(name)
        }
    }

    fn var(&mut self, var: &VarDecl, mode: CheckMode) -> Outcome {
        self.top_level_modifiers(&var.modifiers);
        let inferred = matches!(&var.ty.kind, TypeRefKind::Named(path) if path.len() == 1 && path[0] == "var");
        let mut ty = if inferred {
            Type::Error
        } else {
            self.resolve_type(&var.ty)
        };
        if ty == Type::Void {
            self.error(var.ty.span, "compiler.err.void.not.allowed.here", "'void' type not allowed here");
            ty = Type::Error;
        }
        let mut init_ir = None;
        if inferred {
            match &var.init {
                None => self.error(
                    var.name_span,
                    "compiler.err.cant.infer.local.var.type",
                    format!(
                        "cannot infer type for local variable {}\n  (cannot use 'var' on variable without initializer)",
                        var.name
                    ),
                ),
                Some(init) => {
                    // The initializer decides the declared type, so its
                    // problems belong to the declaration.
                    self.part = if mode == CheckMode::Fresh { Part::Body } else { Part::Decl };
                    let (expr, init_ty) = self.check_expr(init, None);
                    self.part = Part::Decl;
                    match init_ty {
                        Type::Null => self.error(
                            var.name_span,
                            "compiler.err.cant.infer.local.var.type",
                            format!(
                                "cannot infer type for local variable {}\n  (variable initializer is 'null')",
                                var.name
                            ),
                        ),
                        Type::Void => self.error(
                            var.name_span,
                            "compiler.err.cant.infer.local.var.type",
                            format!(
                                "cannot infer type for local variable {}\n  (variable initializer is 'void')",
                                var.name
                            ),
                        ),
                        other => ty = other,
                    }
                    init_ir = Some(expr);
                }
            }
        } else if let (Some(init), CheckMode::Fresh) = (&var.init, mode) {
            self.part = Part::Body;
            let (expr, init_ty) = self.check_expr(init, Some(&ty));
            let expr = self.assign_conversion(expr, &init_ty, &ty, init.span);
            self.part = Part::Decl;
            init_ir = Some(expr);
        }
        let frame_size = self.ctx.max_slot;
        let mut outcome = Outcome::new(
            Declared::Var {
                name: var.name.clone(),
                ty: ty.clone(),
            },
            Code::Var {
                name: var.name.clone(),
                ty: ty.clone(),
                init: init_ir,
                frame_size,
                origin: self.origin.clone(),
            },
        );
        outcome.lookup = Some(var.name.clone());
        outcome.signature = format!("var {}", self.identity(&ty));
        outcome.type_name = Some(ty.to_string());
        outcome
    }

    /// Conversion for assignment contexts, including narrowing of int
    /// constants to `char`.
    pub(crate) fn assign_conversion(
        &mut self,
        expr: ir::Expr,
        from: &Type,
        to: &Type,
        span: Span,
    ) -> ir::Expr {
        if let (Type::Int, Type::Char, ir::Expr::Const(ir::Const::Int(v))) = (from, to, &expr) {
            if (0..=0xFFFF).contains(v) {
                return ir::Expr::Convert(Prim::Char, Box::new(expr));
            }
        }
        if !self.assignable(from, to) {
            self.error(
                span,
                "compiler.err.prob.found.req",
                format!("incompatible types: {from} cannot be converted to {to}"),
            );
            return expr;
        }
        self.coerce(expr, from, to)
    }

    fn param_key(tref: &TypeRef, ty: &Type) -> String {
        if !ty.is_error() {
            return ty.to_string();
        }
        match &tref.kind {
            TypeRefKind::Array(elem) => format!("{}[]", Self::param_key(elem, &Type::Error)),
            TypeRefKind::Named(path) => path.last().cloned().unwrap_or_default(),
            TypeRefKind::Primitive(p) => p.name().to_string(),
        }
    }

    fn method_signature(&mut self, decl: &MethodDecl, owner: &str) -> (MethodInfo, String) {
        let ret = self.resolve_type(&decl.ret);
        let mut params = Vec::new();
        let mut keys = Vec::new();
        let mut names = HashSet::new();
        for param in &decl.params {
            let ty = self.resolve_type(&param.ty);
            if param.ty.is_void() {
                self.error(param.ty.span, "compiler.err.void.not.allowed.here", "'void' type not allowed here");
            }
            if !names.insert(param.name.clone()) {
                self.error(
                    param.span,
                    "compiler.err.already.defined",
                    format!("variable {} is already defined in method {}", param.name, decl.name),
                );
            }
            keys.push(Self::param_key(&param.ty, &ty));
            params.push(ty);
        }
        let info = MethodInfo {
            name: decl.name.clone(),
            owner: Arc::from(owner),
            params,
            ret,
            is_static: decl.modifiers.has(Modifier::Static),
            is_abstract: decl.modifiers.has(Modifier::Abstract),
            varargs: false,
        };
        let key = format!("{}({})", decl.name, keys.join(","));
        (info, key)
    }

    fn method_identity(&self, info: &MethodInfo) -> String {
        let params: Vec<String> = info.params.iter().map(|p| self.identity(p)).collect();
        format!("{} {}({})", self.identity(&info.ret), info.name, params.join(","))
    }

    fn top_method(&mut self, decl: &MethodDecl) -> Outcome {
        self.top_level_modifiers(&decl.modifiers);
        let (mut info, key) = self.method_signature(decl, "");
        info.is_static = true;
        info.is_abstract = false;
        self.self_method = Some(info.clone());
        self.part = Part::Body;
        let before = self.body.problems();
        let ctx = BodyCtx {
            is_static: true,
            ret: Some(info.ret.clone()),
            method_name: decl.name.clone(),
            ..BodyCtx::top_level()
        };
        let (body, frame_size) = self.method_body(decl, &info, ctx);
        let corralled = self.body.problems() > before;
        self.part = Part::Decl;
        let ir = MethodIr {
            name: info.name.clone(),
            sig: info.sig(),
            is_static: true,
            params: info.params.len(),
            frame_size,
            ret: info.ret.clone(),
            body: if corralled { Body::Corralled } else { body },
            origin: self.origin.clone(),
        };
        let mut outcome = Outcome::new(Declared::Method(info.clone()), Code::Method(ir));
        outcome.lookup = Some(key);
        outcome.signature = format!("method {}", self.method_identity(&info));
        outcome.type_name = Some(info.display());
        outcome
    }

    /// Checks a method body with its parameters bound to the first slots.
    fn method_body(&mut self, decl: &MethodDecl, info: &MethodInfo, ctx: BodyCtx) -> (Body, usize) {
        let Some(block) = &decl.body else {
            return (Body::Abstract, info.params.len());
        };
        self.ctx = ctx;
        for (param, ty) in decl.params.iter().zip(&info.params) {
            self.declare_local(&param.name, ty.clone(), param.span);
        }
        let stmts = self.check_block_stmts(&block.stmts);
        if info.ret != Type::Void && !info.ret.is_error() && crate::body::can_complete(&block.stmts) {
            self.error(
                Span::new(block.span.end.saturating_sub(1), block.span.end),
                "compiler.err.missing.ret.stmt",
                "missing return statement",
            );
        }
        let frame_size = self.ctx.max_slot;
        self.ctx = BodyCtx::top_level();
        (Body::Code(stmts), frame_size)
    }

    fn type_decl(&mut self, decl: &ClassDecl) -> Outcome {
        for (modifier, span) in &decl.modifiers.list {
            if matches!(
                modifier,
                Modifier::Public | Modifier::Private | Modifier::Protected | Modifier::Static
            ) {
                self.warn(
                    *span,
                    "kulla.warn.modifier",
                    format!(
                        "Modifier '{}' not permitted in top-level declarations, ignored",
                        modifier.name()
                    ),
                );
            }
        }
        let kind = match decl.kind {
            TypeDeclKind::Class => ClassKind::Class,
            TypeDeclKind::Interface => ClassKind::Interface,
            TypeDeclKind::Enum => ClassKind::Enum,
        };
        let mut info = ClassInfo::new(&decl.name, kind, Origin::User);
        info.is_abstract = kind == ClassKind::Interface || decl.modifiers.has(Modifier::Abstract);
        self.self_class = Some(Arc::new(info.clone()));

        // Supertypes.
        if let Some(extends) = &decl.extends {
            let sup = self.resolve_type(extends);
            if let Some(name) = sup.class_name().map(str::to_string) {
                match self.lookup_class(&name) {
                    Some(sup_info) if sup_info.kind != ClassKind::Class => self.error(
                        extends.span,
                        "compiler.err.no.intf.expected.here",
                        "no interface expected here",
                    ),
                    Some(sup_info)
                        if sup_info.origin == Origin::Platform
                            && &*sup_info.name != OBJECT
                            && !platform::is_throwable(&sup_info.name) =>
                    {
                        self.error(
                            extends.span,
                            "compiler.err.cant.inherit.from.final",
                            format!("cannot inherit from {}", sup_info.simple_name()),
                        )
                    }
                    _ => info.superclass = Some(Arc::from(name.as_str())),
                }
            } else if !sup.is_error() {
                self.error(extends.span, "compiler.err.type.found.req", "unexpected type");
            }
        }
        if info.superclass.is_none() && kind != ClassKind::Interface {
            info.superclass = Some(Arc::from(OBJECT));
        }
        for iface in &decl.implements {
            let ty = self.resolve_type(iface);
            if let Some(name) = ty.class_name().map(str::to_string) {
                match self.lookup_class(&name) {
                    Some(iface_info) if iface_info.kind != ClassKind::Interface => self.error(
                        iface.span,
                        "compiler.err.intf.expected.here",
                        "interface expected here",
                    ),
                    _ => info.interfaces.push(Arc::from(name.as_str())),
                }
            }
        }
        self.self_class = Some(Arc::new(info.clone()));
        if self.cyclic(&info) {
            self.error(
                decl.name_span,
                "compiler.err.cyclic.inheritance",
                format!("cyclic inheritance involving {}", decl.name),
            );
            info.superclass = Some(Arc::from(OBJECT));
            info.interfaces.clear();
        }

        // Enum constants.
        let self_type = Type::class(&decl.name);
        if kind == ClassKind::Enum {
            for (constant, _) in &decl.enum_constants {
                info.enum_constants.push(constant.clone());
                info.fields.push(FieldInfo {
                    name: constant.clone(),
                    ty: self_type.clone(),
                    is_static: true,
                    is_final: true,
                });
            }
            for (name, params, ret, is_static) in [
                ("values", vec![], Type::array_of(self_type.clone()), true),
                ("name", vec![], Type::string(), false),
                ("ordinal", vec![], Type::Int, false),
            ] {
                info.methods.push(MethodInfo {
                    name: name.to_string(),
                    owner: info.name.clone(),
                    params,
                    ret,
                    is_static,
                    is_abstract: false,
                    varargs: false,
                });
            }
        }

        // Member signatures.
        let is_interface = kind == ClassKind::Interface;
        for member in &decl.members {
            match member {
                Member::Field(field) => {
                    let ty = self.resolve_type(&field.ty);
                    if info.field(&field.name).is_some() {
                        self.error(
                            field.name_span,
                            "compiler.err.already.defined",
                            format!(
                                "variable {} is already defined in {} {}",
                                field.name,
                                kind.noun(),
                                decl.name
                            ),
                        );
                    }
                    info.fields.push(FieldInfo {
                        name: field.name.clone(),
                        ty,
                        is_static: is_interface || field.modifiers.has(Modifier::Static),
                        is_final: is_interface || field.modifiers.has(Modifier::Final),
                    });
                }
                Member::Method(method) => {
                    let (mut m, _) = self.method_signature(method, &decl.name);
                    if is_interface {
                        m.is_abstract = method.body.is_none() && !m.is_static;
                    } else if method.body.is_none() && !m.is_abstract {
                        self.error(
                            method.name_span,
                            "compiler.err.missing.meth.body.or.decl.abstract",
                            "missing method body, or declare abstract",
                        );
                    } else if method.body.is_some() && m.is_abstract {
                        self.error(
                            method.name_span,
                            "compiler.err.abstract.meth.cant.have.body",
                            "abstract methods cannot have a body",
                        );
                    }
                    if m.is_abstract && !info.is_abstract {
                        self.error(
                            decl.name_span,
                            "compiler.err.does.not.override.abstract",
                            format!(
                                "{} is not abstract and does not override abstract method {} in {}",
                                decl.name,
                                m.display(),
                                decl.name
                            ),
                        );
                    }
                    if info.methods.iter().any(|other| other.sig() == m.sig()) {
                        self.error(
                            method.name_span,
                            "compiler.err.already.defined",
                            format!(
                                "method {} is already defined in {} {}",
                                m.display(),
                                kind.noun(),
                                decl.name
                            ),
                        );
                    }
                    info.methods.push(m);
                }
                Member::Constructor(ctor) => {
                    if is_interface {
                        self.error(
                            ctor.span,
                            "compiler.err.intf.meth.cant.have.body",
                            "interface cannot have constructors",
                        );
                    }
                    let mut params = Vec::new();
                    for param in &ctor.params {
                        params.push(self.resolve_type(&param.ty));
                    }
                    let m = MethodInfo {
                        name: "<init>".to_string(),
                        owner: info.name.clone(),
                        params,
                        ret: Type::Void,
                        is_static: false,
                        is_abstract: false,
                        varargs: false,
                    };
                    if info.constructors.iter().any(|other| other.sig() == m.sig()) {
                        self.error(
                            ctor.span,
                            "compiler.err.already.defined",
                            format!("constructor {} is already defined in class {}", decl.name, decl.name),
                        );
                    }
                    info.constructors.push(m);
                }
            }
        }
        if info.constructors.is_empty() && !is_interface {
            info.constructors.push(MethodInfo {
                name: "<init>".to_string(),
                owner: info.name.clone(),
                params: Vec::new(),
                ret: Type::Void,
                is_static: false,
                is_abstract: false,
                varargs: false,
            });
        }
        let info = Arc::new(info);
        self.self_class = Some(info.clone());
        self.check_overrides(decl, &info);
        if !info.is_abstract {
            self.check_abstract_implemented(decl, &info);
        }

        // Bodies.
        self.part = Part::Body;
        let class_ir = self.class_bodies(decl, &info);
        self.part = Part::Decl;

        let mut outcome = Outcome::new(Declared::Type(info.clone()), Code::Class(class_ir));
        outcome.lookup = Some(decl.name.clone());
        outcome.signature = self.class_signature(&info);
        outcome
    }

    fn cyclic(&mut self, info: &ClassInfo) -> bool {
        let mut stack: Vec<Arc<str>> = info.interfaces.clone();
        if let Some(superclass) = &info.superclass {
            stack.push(superclass.clone());
        }
        let mut seen = HashSet::new();
        while let Some(name) = stack.pop() {
            if name == info.name {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            // Look through the session only: the class itself is what is
            // being replaced.
            if name.contains('.') {
                continue;
            }
            if let Some(user) = self.scope.user_type(&name) {
                stack.extend(user.info.interfaces.iter().cloned());
                if let Some(superclass) = &user.info.superclass {
                    stack.push(superclass.clone());
                }
            }
        }
        false
    }

    fn check_overrides(&mut self, decl: &ClassDecl, info: &ClassInfo) {
        let Some(superclass) = info.superclass.clone() else {
            return;
        };
        for method in &info.methods {
            let inherited: Vec<MethodInfo> = self.class_methods(&superclass, &method.name);
            for sup in inherited.iter().filter(|s| s.sig() == method.sig()) {
                if sup.ret != method.ret && !self.convertible(&method.ret.clone(), &sup.ret.clone(), false) {
                    self.error(
                        decl.name_span,
                        "compiler.err.override.incompatible.ret",
                        format!(
                            "{} in {} cannot override {} in {}\n  return type {} is not compatible with {}",
                            method.display(),
                            decl.name,
                            sup.display(),
                            simple_name(&sup.owner),
                            method.ret,
                            sup.ret
                        ),
                    );
                }
                if sup.is_static != method.is_static {
                    self.error(
                        decl.name_span,
                        "compiler.err.override.static",
                        format!(
                            "{} in {} cannot override {} in {}",
                            method.display(),
                            decl.name,
                            sup.display(),
                            simple_name(&sup.owner)
                        ),
                    );
                }
            }
        }
    }

    fn check_abstract_implemented(&mut self, decl: &ClassDecl, info: &ClassInfo) {
        let mut supertypes: Vec<Arc<str>> = info.interfaces.clone();
        if let Some(superclass) = &info.superclass {
            supertypes.push(superclass.clone());
        }
        let mut seen = HashSet::new();
        let mut abstract_methods: Vec<MethodInfo> = Vec::new();
        while let Some(name) = supertypes.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(sup) = self.lookup_class(&name) else {
                continue;
            };
            abstract_methods.extend(sup.methods.iter().filter(|m| m.is_abstract).cloned());
            supertypes.extend(sup.interfaces.iter().cloned());
            if let Some(superclass) = &sup.superclass {
                supertypes.push(superclass.clone());
            }
        }
        for method in abstract_methods {
            let implemented = self
                .class_methods(&info.name, &method.name)
                .iter()
                .any(|m| m.sig() == method.sig() && !m.is_abstract);
            if !implemented {
                self.error(
                    decl.name_span,
                    "compiler.err.does.not.override.abstract",
                    format!(
                        "{} is not abstract and does not override abstract method {} in {}",
                        decl.name,
                        method.display(),
                        simple_name(&method.owner)
                    ),
                );
                break;
            }
        }
    }

    fn class_signature(&self, info: &ClassInfo) -> String {
        let mut parts = vec![format!("{} {}", info.kind.noun(), info.name)];
        if let Some(superclass) = &info.superclass {
            parts.push(format!("extends {}", self.identity(&Type::Class(superclass.clone()))));
        }
        for iface in &info.interfaces {
            parts.push(format!("implements {}", self.identity(&Type::Class(iface.clone()))));
        }
        let mut members: Vec<String> = info
            .fields
            .iter()
            .map(|f| {
                format!(
                    "field {}{} {}",
                    if f.is_static { "static " } else { "" },
                    self.identity(&f.ty),
                    f.name
                )
            })
            .collect();
        members.extend(info.methods.iter().map(|m| {
            format!(
                "method {}{}{}",
                if m.is_static { "static " } else { "" },
                if m.is_abstract { "abstract " } else { "" },
                self.method_identity(m)
            )
        }));
        members.extend(info.constructors.iter().map(|c| format!("ctor {}", self.method_identity(c))));
        members.sort();
        parts.extend(members);
        parts.join("; ")
    }

    fn class_bodies(&mut self, decl: &ClassDecl, info: &Arc<ClassInfo>) -> ClassIr {
        let mut fields = Vec::new();
        let mut init_frame = 0;
        let mut init_corralled = false;
        let static_ctx = |is_static: bool| BodyCtx {
            class: Some(info.clone()),
            is_static,
            ..BodyCtx::top_level()
        };
        for member in &decl.members {
            let Member::Field(field) = member else {
                continue;
            };
            let Some(field_info) = info.field(&field.name).cloned() else {
                continue;
            };
            let init = match &field.init {
                Some(init) => {
                    let before = self.body.problems();
                    self.ctx = static_ctx(field_info.is_static);
                    let (expr, ty) = self.check_expr(init, Some(&field_info.ty));
                    let expr = self.assign_conversion(expr, &ty, &field_info.ty, init.span);
                    init_frame = init_frame.max(self.ctx.max_slot);
                    self.ctx = BodyCtx::top_level();
                    if self.body.problems() > before {
                        init_corralled = true;
                        None
                    } else {
                        Some(expr)
                    }
                }
                None => None,
            };
            fields.push(FieldIr {
                name: field_info.name.clone(),
                ty: field_info.ty.clone(),
                is_static: field_info.is_static,
                init,
            });
        }
        for field in info.fields.iter().filter(|f| info.enum_constants.contains(&f.name)) {
            fields.push(FieldIr {
                name: field.name.clone(),
                ty: field.ty.clone(),
                is_static: true,
                init: None,
            });
        }

        let mut methods = Vec::new();
        let declared_methods = decl.members.iter().filter_map(|m| match m {
            Member::Method(method) => Some(method),
            _ => None,
        });
        for (method, method_info) in declared_methods.zip(
            info.methods
                .iter()
                .filter(|m| !(info.kind == ClassKind::Enum && is_enum_builtin(m))),
        ) {
            let before = self.body.problems();
            let ctx = BodyCtx {
                class: Some(info.clone()),
                is_static: method_info.is_static,
                ret: Some(method_info.ret.clone()),
                method_name: method.name.clone(),
                ..BodyCtx::top_level()
            };
            let (body, frame_size) = self.method_body(method, method_info, ctx);
            let corralled = self.body.problems() > before;
            methods.push(MethodIr {
                name: method_info.name.clone(),
                sig: method_info.sig(),
                is_static: method_info.is_static,
                params: method_info.params.len(),
                frame_size,
                ret: method_info.ret.clone(),
                body: if corralled { Body::Corralled } else { body },
                origin: self.origin.clone(),
            });
        }

        let mut constructors = Vec::new();
        let declared_ctors: Vec<_> = decl
            .members
            .iter()
            .filter_map(|m| match m {
                Member::Constructor(ctor) => Some(ctor),
                _ => None,
            })
            .collect();
        for (idx, ctor_info) in info.constructors.iter().enumerate() {
            let before = self.body.problems();
            self.ctx = BodyCtx {
                class: Some(info.clone()),
                is_static: false,
                ret: Some(Type::Void),
                in_ctor: true,
                super_allowed: true,
                method_name: decl.name.clone(),
                ..BodyCtx::top_level()
            };
            let (stmts, explicit_super, span) = match declared_ctors.get(idx) {
                Some(ctor) => {
                    for (param, ty) in ctor.params.iter().zip(&ctor_info.params) {
                        self.declare_local(&param.name, ty.clone(), param.span);
                    }
                    let explicit = ctor
                        .body
                        .stmts
                        .first()
                        .is_some_and(|s| matches!(s.kind, crate::ast::StmtKind::SuperCtor(_)));
                    (self.check_block_stmts(&ctor.body.stmts), explicit, ctor.span)
                }
                None => (Vec::new(), false, decl.name_span),
            };
            if !explicit_super {
                self.implicit_super(info, span);
            }
            let frame_size = self.ctx.max_slot;
            self.ctx = BodyCtx::top_level();
            let corralled = init_corralled || self.body.problems() > before;
            constructors.push(MethodIr {
                name: "<init>".to_string(),
                sig: ctor_info.sig(),
                is_static: false,
                params: ctor_info.params.len(),
                frame_size,
                ret: Type::Void,
                body: if corralled { Body::Corralled } else { Body::Code(stmts) },
                origin: self.origin.clone(),
            });
        }

        ClassIr {
            name: info.name.clone(),
            kind: info.kind,
            superclass: info.superclass.clone(),
            interfaces: info.interfaces.clone(),
            fields,
            methods,
            constructors,
            enum_constants: info.enum_constants.clone(),
            is_abstract: info.is_abstract,
            init_frame,
            origin: self.origin.clone(),
        }
    }

    fn implicit_super(&mut self, info: &ClassInfo, span: Span) {
        let Some(superclass) = info.superclass.clone() else {
            return;
        };
        if superclass.contains('.') {
            return;
        }
        let Some(sup) = self.lookup_class(&superclass) else {
            return;
        };
        if !sup.constructors.iter().any(|c| c.params.is_empty()) {
            self.error(
                span,
                "compiler.err.cant.apply.symbol",
                format!(
                    "constructor {} in class {} cannot be applied to given types;\n  required: {}\n  found:    no arguments",
                    sup.simple_name(),
                    sup.simple_name(),
                    sup.constructors
                        .first()
                        .map(|c| Self::describe_args(&c.params))
                        .unwrap_or_default()
                ),
            );
        }
    }

    fn expression(&mut self, expr: &crate::ast::Expr) -> Outcome {
        self.part = Part::Body;
        self.ctx = BodyCtx::top_level();
        let target_var = match &expr.kind {
            crate::ast::ExprKind::Name(name) => self.top_level_var_name(name),
            crate::ast::ExprKind::Assign { target, .. } => match &target.kind {
                crate::ast::ExprKind::Name(name) => self.top_level_var_name(name),
                _ => None,
            },
            _ => None,
        };
        let (lowered, ty) = self.check_expr(expr, None);
        let frame_size = self.ctx.max_slot;
        self.part = Part::Decl;
        let sub_kind = match (&expr.kind, &target_var) {
            (crate::ast::ExprKind::Name(_), Some(_)) => SubKind::VarValue,
            (crate::ast::ExprKind::Assign { .. }, Some(_)) => SubKind::Assignment,
            _ if ty == Type::Void => SubKind::Statement,
            _ => SubKind::TempVarExpression,
        };
        let line = self.line(expr.span);
        let code = if sub_kind == SubKind::Statement {
            Code::Stmt {
                body: vec![ir::Stmt {
                    kind: ir::StmtKind::Expr(lowered),
                    line,
                }],
                frame_size,
                origin: self.origin.clone(),
            }
        } else {
            Code::Expr {
                expr: lowered,
                ty: ty.clone(),
                frame_size,
                origin: self.origin.clone(),
            }
        };
        let shown = match ty {
            Type::Null => Type::object(),
            other => other,
        };
        let mut outcome = Outcome::new(Declared::None, code);
        outcome.sub_kind = Some(sub_kind);
        outcome.type_name = (sub_kind != SubKind::Statement).then(|| shown.to_string());
        outcome.target_var = target_var;
        outcome.signature = format!("expr {}", self.identity(&shown));
        outcome
    }

    fn top_level_var_name(&mut self, name: &str) -> Option<String> {
        self.scope.var(name).map(|_| name.to_string())
    }

    fn statement_unit(&mut self, stmt: &crate::ast::Stmt) -> Outcome {
        self.part = Part::Body;
        self.ctx = BodyCtx::top_level();
        let lowered = self.check_stmt(stmt);
        let frame_size = self.ctx.max_slot;
        self.part = Part::Decl;
        Outcome::new(
            Declared::None,
            Code::Stmt {
                body: vec![lowered],
                frame_size,
                origin: self.origin.clone(),
            },
        )
    }

    // ---- locals -----------------------------------------------------------

    pub(crate) fn declare_local(&mut self, name: &str, ty: Type, span: Span) -> ir::Slot {
        if self.find_local(name).is_some() {
            let where_ = if self.ctx.method_name.is_empty() {
                String::new()
            } else {
                format!(" in method {}", self.ctx.method_name)
            };
            self.error(
                span,
                "compiler.err.already.defined",
                format!("variable {name} is already defined{where_}"),
            );
        }
        let slot = self.ctx.next_slot;
        self.ctx.next_slot += 1;
        self.ctx.max_slot = self.ctx.max_slot.max(self.ctx.next_slot);
        if let Some(scope) = self.ctx.scopes.last_mut() {
            scope.push(Local {
                name: name.to_string(),
                slot,
                ty,
            });
        }
        slot
    }

    pub(crate) fn find_local(&self, name: &str) -> Option<Local> {
        self.ctx
            .scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|local| local.name == name)
            .cloned()
    }

    pub(crate) fn push_scope(&mut self) {
        self.ctx.scopes.push(Vec::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        if let Some(scope) = self.ctx.scopes.pop() {
            if let Some(first) = scope.first() {
                self.ctx.next_slot = first.slot;
            }
        }
    }
}

fn is_enum_builtin(method: &MethodInfo) -> bool {
    matches!(
        (method.name.as_str(), method.params.len()),
        ("values", 0) | ("name", 0) | ("ordinal", 0)
    ) && (method.is_static == (method.name == "values"))
}

pub(crate) fn prim_of(ty: &Type) -> Option<Prim> {
    Some(match ty {
        Type::Int => Prim::Int,
        Type::Long => Prim::Long,
        Type::Double => Prim::Double,
        Type::Char => Prim::Char,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::{CheckMode, Declared, UnitAnalysis, check_unit};
    use crate::parser::parse_snippet;
    use crate::scope::{DepName, EmptyScope, ImportInfo, Scope, UserType};
    use crate::types::{ClassInfo, ClassKind, MethodInfo, Origin, Type};
    use crate::unit::SubKind;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct TestScope {
        vars: HashMap<String, Type>,
        methods: Vec<MethodInfo>,
        types: HashMap<String, Arc<ClassInfo>>,
    }

    impl Scope for TestScope {
        fn var(&self, name: &str) -> Option<Type> {
            self.vars.get(name).cloned()
        }

        fn methods(&self, name: &str) -> Vec<MethodInfo> {
            self.methods.iter().filter(|m| m.name == name).cloned().collect()
        }

        fn user_type(&self, name: &str) -> Option<UserType> {
            self.types.get(name).map(|info| UserType {
                info: info.clone(),
                identity: "1".to_string(),
            })
        }

        fn imports(&self) -> Vec<ImportInfo> {
            Vec::new()
        }

        fn has_external_type(&self, _name: &str) -> bool {
            false
        }

        fn has_external_package(&self, _name: &str) -> bool {
            false
        }
    }

    fn analyze(src: &str, scope: &dyn Scope) -> UnitAnalysis {
        let units = parse_snippet(src).expect("parse should pass");
        check_unit(&units[0], scope, CheckMode::Fresh, "1")
    }

    #[test]
    fn var_initializer_type_mismatch_is_an_error() {
        let analysis = analyze("int x = \"a\";", &EmptyScope);
        assert_eq!(
            analysis.body_errors[0].message,
            "incompatible types: String cannot be converted to int"
        );
    }

    #[test]
    fn unresolved_in_method_body_is_recorded_as_body_dependency() {
        let analysis = analyze("int mu() { return x * 4; }", &EmptyScope);
        assert!(analysis.decl_unresolved.is_empty());
        assert_eq!(analysis.body_unresolved[0].display, "variable x");
        assert!(analysis.body_refs.contains(&DepName::Var("x".to_string())));
        assert_eq!(analysis.lookup.as_deref(), Some("mu()"));
    }

    #[test]
    fn unresolved_signature_type_is_a_declaration_problem() {
        let analysis = analyze("void f(Foo foo) { }", &EmptyScope);
        assert_eq!(analysis.decl_unresolved[0].display, "class Foo");
        assert_eq!(analysis.lookup.as_deref(), Some("f(Foo)"));
    }

    #[test]
    fn expression_kinds() {
        let mut scope = TestScope::default();
        scope.vars.insert("x".to_string(), Type::Int);
        assert_eq!(analyze("x", &scope).sub_kind, SubKind::VarValue);
        assert_eq!(analyze("x = 3", &scope).sub_kind, SubKind::Assignment);
        let temp = analyze("x + 1L", &scope);
        assert_eq!(temp.sub_kind, SubKind::TempVarExpression);
        assert_eq!(temp.type_name.as_deref(), Some("long"));
        assert_eq!(
            analyze("System.out.println(x)", &scope).sub_kind,
            SubKind::Statement
        );
    }

    #[test]
    fn class_members_resolve_against_own_declaration() {
        let analysis = analyze(
            "class Node { Node next; int depth() { return next == null ? 1 : 1 + next.depth(); } }",
            &EmptyScope,
        );
        assert!(analysis.decl_errors.is_empty(), "{:?}", analysis.decl_errors);
        assert!(analysis.body_errors.is_empty(), "{:?}", analysis.body_errors);
        let Declared::Type(info) = analysis.declared else {
            panic!("expected a type");
        };
        assert_eq!(info.constructors.len(), 1);
    }

    #[test]
    fn subclass_signature_tracks_superclass_identity() {
        let mut scope = TestScope::default();
        scope.types.insert(
            "A".to_string(),
            Arc::new(ClassInfo::new("A", ClassKind::Class, Origin::User)),
        );
        let analysis = analyze("class B extends A {}", &scope);
        assert!(analysis.signature.contains("extends A#1"));
        assert!(analysis.decl_refs.contains(&DepName::Type("A".to_string())));
    }

    #[test]
    fn overloads_pick_most_specific() {
        let analysis = analyze("Math.max(1, 2L)", &EmptyScope);
        assert_eq!(analysis.type_name.as_deref(), Some("long"));
        let analysis = analyze("String.format(\"%d-%s\", 1, \"a\")", &EmptyScope);
        assert!(analysis.body_errors.is_empty(), "{:?}", analysis.body_errors);
        assert_eq!(analysis.type_name.as_deref(), Some("String"));
    }

    #[test]
    fn missing_return_is_reported() {
        let analysis = analyze("int f(int a) { if (a > 0) return 1; }", &EmptyScope);
        assert_eq!(analysis.body_errors[0].message, "missing return statement");
    }
}
