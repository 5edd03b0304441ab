//! Statement and expression checking. Every construct is lowered to IR as it
//! is checked; a construct that fails to check lowers to a `null` constant of
//! the error type so checking can continue.

use crate::ast::{BinOp, Expr, ExprKind, Literal, LocalVar, Stmt, StmtKind, TypeRef, TypeRefKind, UnaryOp};
use crate::check::{Checker, Selection, prim_of};
use crate::diag::Span;
use crate::ir::{self, Arith, Callee, Cmp, Const, IterKind, NumKind, Place};
use crate::scope::DepName;
use crate::types::{ClassInfo, ClassKind, FieldInfo, MethodInfo, OBJECT, Origin, Type, simple_name};
use std::sync::Arc;

const THROWABLE: &str = "java.lang.Throwable";
const LIST: &str = "java.util.List";

type Checked = (ir::Expr, Type);

fn failed() -> Checked {
    (ir::Expr::Const(Const::Null), Type::Error)
}

/// What the target of a `.` turned out to be.
enum Qual {
    Value(ir::Expr, Type),
    Class(Arc<ClassInfo>),
    Package(String),
    Failed,
}

/// Unboxed view of a type.
fn unbox(ty: &Type) -> Type {
    ty.unboxed().unwrap_or_else(|| ty.clone())
}

fn kind_of(ty: &Type) -> Option<NumKind> {
    match unbox(ty) {
        Type::Int | Type::Char => Some(NumKind::Int),
        Type::Long => Some(NumKind::Long),
        Type::Double => Some(NumKind::Double),
        Type::Boolean => Some(NumKind::Bool),
        _ => None,
    }
}

fn kind_type(kind: NumKind) -> Type {
    match kind {
        NumKind::Int => Type::Int,
        NumKind::Long => Type::Long,
        NumKind::Double => Type::Double,
        NumKind::Bool => Type::Boolean,
    }
}

/// Binary numeric promotion.
fn promote(a: &Type, b: &Type) -> Option<Type> {
    let (a, b) = (unbox(a), unbox(b));
    let rank = a.numeric_rank()?.max(b.numeric_rank()?);
    Some(match rank {
        3 => Type::Double,
        2 => Type::Long,
        _ => Type::Int,
    })
}

/// Unary numeric promotion of an integral type.
fn promote_integral(ty: &Type) -> Option<Type> {
    match unbox(ty) {
        Type::Int | Type::Char => Some(Type::Int),
        Type::Long => Some(Type::Long),
        _ => None,
    }
}

fn arith_of(op: BinOp) -> Option<Arith> {
    Some(match op {
        BinOp::Add => Arith::Add,
        BinOp::Sub => Arith::Sub,
        BinOp::Mul => Arith::Mul,
        BinOp::Div => Arith::Div,
        BinOp::Rem => Arith::Rem,
        BinOp::Shl => Arith::Shl,
        BinOp::Shr => Arith::Shr,
        BinOp::UShr => Arith::UShr,
        BinOp::BitAnd => Arith::And,
        BinOp::BitOr => Arith::Or,
        BinOp::BitXor => Arith::Xor,
        _ => return None,
    })
}

fn is_var_keyword(ty: &TypeRef) -> bool {
    matches!(&ty.kind, TypeRefKind::Named(path) if path.len() == 1 && path[0] == "var")
}

/// Whether control can fall off the end of a statement list.
pub(crate) fn can_complete(stmts: &[Stmt]) -> bool {
    stmts.iter().all(stmt_can_complete)
}

fn stmt_can_complete(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) | StmtKind::Throw(_) => false,
        StmtKind::Block(block) => can_complete(&block.stmts),
        StmtKind::If { then, els, .. } => match els {
            Some(els) => stmt_can_complete(then) || stmt_can_complete(els),
            None => true,
        },
        StmtKind::While { cond, body } => !is_true(cond) || breaks_out(body),
        StmtKind::DoWhile { body, cond } => {
            (stmt_can_complete(body) && !is_true(cond)) || breaks_out(body)
        }
        StmtKind::For { cond, body, .. } => {
            cond.as_ref().is_some_and(|c| !is_true(c)) || breaks_out(body)
        }
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            let finally_completes = finally.as_ref().is_none_or(|f| can_complete(&f.stmts));
            finally_completes
                && (can_complete(&body.stmts) || catches.iter().any(|c| can_complete(&c.body.stmts)))
        }
        _ => true,
    }
}

fn is_true(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Literal(Literal::Bool(true)))
}

/// A `break` that leaves this loop body.
fn breaks_out(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Break => true,
        StmtKind::Block(block) => block.stmts.iter().any(breaks_out),
        StmtKind::If { then, els, .. } => {
            breaks_out(then) || els.as_ref().is_some_and(|e| breaks_out(e))
        }
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            body.stmts.iter().any(breaks_out)
                || catches.iter().any(|c| c.body.stmts.iter().any(breaks_out))
                || finally.as_ref().is_some_and(|f| f.stmts.iter().any(breaks_out))
        }
        _ => false,
    }
}

fn is_statement_expression(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Assign { .. } | ExprKind::IncDec { .. } | ExprKind::Call { .. } | ExprKind::New { .. }
    )
}

impl Checker<'_> {
    // ---- statements -------------------------------------------------------

    pub(crate) fn check_block_stmts(&mut self, stmts: &[Stmt]) -> Vec<ir::Stmt> {
        self.push_scope();
        let lowered = stmts.iter().map(|stmt| self.check_stmt(stmt)).collect();
        self.pop_scope();
        lowered
    }

    pub(crate) fn check_stmt(&mut self, stmt: &Stmt) -> ir::Stmt {
        let line = self.line(stmt.span);
        let super_allowed = std::mem::take(&mut self.ctx.super_allowed);
        let kind = match &stmt.kind {
            StmtKind::Block(block) => ir::StmtKind::Block(self.check_block_stmts(&block.stmts)),
            StmtKind::Local(vars) => {
                let mut lowered: Vec<ir::Stmt> = vars
                    .iter()
                    .map(|var| ir::Stmt {
                        kind: self.local_var(var),
                        line,
                    })
                    .collect();
                if lowered.len() == 1 {
                    lowered.remove(0).kind
                } else {
                    ir::StmtKind::Block(lowered)
                }
            }
            StmtKind::Expr(expr) => {
                if !is_statement_expression(expr) {
                    self.error(expr.span, "compiler.err.not.stmt", "not a statement");
                }
                ir::StmtKind::Expr(self.check_expr(expr, None).0)
            }
            StmtKind::If { cond, then, els } => {
                let cond = self.condition(cond);
                let then = Box::new(self.check_stmt(then));
                let els = els.as_ref().map(|els| Box::new(self.check_stmt(els)));
                ir::StmtKind::If { cond, then, els }
            }
            StmtKind::While { cond, body } => {
                let cond = self.condition(cond);
                let body = Box::new(self.loop_body(body));
                ir::StmtKind::While { cond, body }
            }
            StmtKind::DoWhile { body, cond } => {
                let body = Box::new(self.loop_body(body));
                let cond = self.condition(cond);
                ir::StmtKind::DoWhile { body, cond }
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.push_scope();
                let init = init.iter().map(|s| self.check_stmt(s)).collect();
                let cond = cond.as_ref().map(|c| self.condition(c));
                let update = update
                    .iter()
                    .map(|u| {
                        if !is_statement_expression(u) {
                            self.error(u.span, "compiler.err.not.stmt", "not a statement");
                        }
                        self.check_expr(u, None).0
                    })
                    .collect();
                let body = Box::new(self.loop_body(body));
                self.pop_scope();
                ir::StmtKind::For {
                    init,
                    cond,
                    update,
                    body,
                }
            }
            StmtKind::ForEach {
                ty,
                name,
                name_span,
                iter,
                body,
            } => self.for_each(ty, name, *name_span, iter, body),
            StmtKind::Return(value) => self.return_stmt(value.as_ref(), stmt.span),
            StmtKind::Break => {
                if self.ctx.loop_depth == 0 {
                    self.error(stmt.span, "compiler.err.break.outside.switch.loop", "break outside switch or loop");
                }
                ir::StmtKind::Break
            }
            StmtKind::Continue => {
                if self.ctx.loop_depth == 0 {
                    self.error(stmt.span, "compiler.err.cont.outside.loop", "continue outside of loop");
                }
                ir::StmtKind::Continue
            }
            StmtKind::Throw(expr) => {
                let (lowered, ty) = self.check_expr(expr, None);
                let throwable = match &ty {
                    Type::Class(name) => {
                        let name = name.clone();
                        self.is_subclass(&name, THROWABLE)
                    }
                    Type::Null | Type::Error => true,
                    _ => false,
                };
                if !throwable {
                    self.error(
                        expr.span,
                        "compiler.err.prob.found.req",
                        format!("incompatible types: {ty} cannot be converted to Throwable"),
                    );
                }
                ir::StmtKind::Throw(lowered)
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                let body = self.check_block_stmts(&body.stmts);
                let mut lowered = Vec::new();
                for catch in catches {
                    let ty = self.resolve_type(&catch.ty);
                    let class: Arc<str> = match &ty {
                        Type::Class(name) => {
                            let name = name.clone();
                            if !self.is_subclass(&name, THROWABLE) {
                                self.error(
                                    catch.ty.span,
                                    "compiler.err.prob.found.req",
                                    format!("incompatible types: {ty} cannot be converted to Throwable"),
                                );
                            }
                            name
                        }
                        Type::Error => Arc::from(THROWABLE),
                        other => {
                            self.error(
                                catch.ty.span,
                                "compiler.err.prob.found.req",
                                format!("incompatible types: {other} cannot be converted to Throwable"),
                            );
                            Arc::from(THROWABLE)
                        }
                    };
                    self.push_scope();
                    let slot = self.declare_local(&catch.name, ty, catch.span);
                    let body = self.check_block_stmts(&catch.body.stmts);
                    self.pop_scope();
                    lowered.push(ir::Catch { class, slot, body });
                }
                let finally = finally.as_ref().map(|f| self.check_block_stmts(&f.stmts));
                ir::StmtKind::Try {
                    body,
                    catches: lowered,
                    finally,
                }
            }
            StmtKind::SuperCtor(args) => self.super_ctor(args, super_allowed, stmt.span),
            StmtKind::Empty => ir::StmtKind::Empty,
        };
        ir::Stmt { kind, line }
    }

    fn local_var(&mut self, var: &LocalVar) -> ir::StmtKind {
        let inferred = is_var_keyword(&var.ty);
        let mut ty = if inferred {
            Type::Error
        } else {
            self.resolve_type(&var.ty)
        };
        if ty == Type::Void {
            self.error(var.ty.span, "compiler.err.void.not.allowed.here", "'void' type not allowed here");
            ty = Type::Error;
        }
        let init = match &var.init {
            Some(init) => {
                let (expr, init_ty) = self.check_expr(init, (!inferred).then_some(&ty));
                if inferred {
                    match init_ty {
                        Type::Null | Type::Void => self.error(
                            var.name_span,
                            "compiler.err.cant.infer.local.var.type",
                            format!("cannot infer type for local variable {}", var.name),
                        ),
                        other => ty = other,
                    }
                    Some(expr)
                } else {
                    Some(self.assign_conversion(expr, &init_ty, &ty, init.span))
                }
            }
            None => {
                if inferred {
                    self.error(
                        var.name_span,
                        "compiler.err.cant.infer.local.var.type",
                        format!(
                            "cannot infer type for local variable {}\n  (cannot use 'var' on variable without initializer)",
                            var.name
                        ),
                    );
                }
                None
            }
        };
        let slot = self.declare_local(&var.name, ty.clone(), var.name_span);
        ir::StmtKind::Local { slot, ty, init }
    }

    fn loop_body(&mut self, body: &Stmt) -> ir::Stmt {
        self.ctx.loop_depth += 1;
        let lowered = self.check_stmt(body);
        self.ctx.loop_depth -= 1;
        lowered
    }

    fn condition(&mut self, cond: &Expr) -> ir::Expr {
        let (lowered, ty) = self.check_expr(cond, None);
        if !ty.is_error() && unbox(&ty) != Type::Boolean {
            self.error(
                cond.span,
                "compiler.err.prob.found.req",
                format!("incompatible types: {ty} cannot be converted to boolean"),
            );
        }
        lowered
    }

    fn for_each(
        &mut self,
        ty: &TypeRef,
        name: &str,
        name_span: Span,
        iter: &Expr,
        body: &Stmt,
    ) -> ir::StmtKind {
        let (iter_ir, iter_ty) = self.check_expr(iter, None);
        let (over, elem) = match &iter_ty {
            Type::Array(elem) => (IterKind::Array, (**elem).clone()),
            Type::Error => (IterKind::Array, Type::Error),
            Type::Class(class) => {
                let class = class.clone();
                if self.is_subclass(&class, LIST) {
                    (IterKind::List, Type::object())
                } else {
                    self.for_each_mismatch(iter.span, &iter_ty);
                    (IterKind::List, Type::Error)
                }
            }
            other => {
                self.for_each_mismatch(iter.span, other);
                (IterKind::Array, Type::Error)
            }
        };
        let var_ty = if is_var_keyword(ty) {
            elem.clone()
        } else {
            self.resolve_type(ty)
        };
        if !self.assignable(&elem, &var_ty) {
            self.error(
                ty.span,
                "compiler.err.prob.found.req",
                format!("incompatible types: {elem} cannot be converted to {var_ty}"),
            );
        }
        self.push_scope();
        let slot = self.declare_local(name, var_ty, name_span);
        let body = Box::new(self.loop_body(body));
        self.pop_scope();
        ir::StmtKind::ForEach {
            slot,
            iter: iter_ir,
            over,
            body,
        }
    }

    fn for_each_mismatch(&mut self, span: Span, found: &Type) {
        self.error(
            span,
            "compiler.err.foreach.not.applicable.to.type",
            format!(
                "for-each not applicable to expression type\n  required: array or java.lang.Iterable\n  found:    {found}"
            ),
        );
    }

    fn return_stmt(&mut self, value: Option<&Expr>, span: Span) -> ir::StmtKind {
        let expected = self.ctx.ret.clone();
        match (expected, value) {
            (None, value) => {
                self.error(span, "compiler.err.ret.outside.meth", "return outside method");
                ir::StmtKind::Return(value.map(|v| self.check_expr(v, None).0))
            }
            (Some(Type::Void), Some(value)) => {
                self.error(
                    value.span,
                    "compiler.err.prob.found.req",
                    "incompatible types: unexpected return value",
                );
                ir::StmtKind::Return(Some(self.check_expr(value, None).0))
            }
            (Some(Type::Void), None) => ir::StmtKind::Return(None),
            (Some(ret), None) => {
                if !ret.is_error() {
                    self.error(span, "compiler.err.prob.found.req", "missing return value");
                }
                ir::StmtKind::Return(None)
            }
            (Some(ret), Some(value)) => {
                let (lowered, ty) = self.check_expr(value, Some(&ret));
                ir::StmtKind::Return(Some(self.assign_conversion(lowered, &ty, &ret, value.span)))
            }
        }
    }

    fn super_ctor(&mut self, args: &[Expr], allowed: bool, span: Span) -> ir::StmtKind {
        let checked: Vec<Checked> = args.iter().map(|a| self.check_expr(a, None)).collect();
        if !allowed {
            self.error(
                span,
                "compiler.err.call.must.be.first.stmt.in.ctor",
                "call to super must be first statement in constructor",
            );
            return ir::StmtKind::Empty;
        }
        let superclass = self
            .ctx
            .class
            .as_ref()
            .and_then(|c| c.superclass.clone())
            .unwrap_or_else(|| Arc::from(OBJECT));
        let Some(info) = self.lookup_class(&superclass) else {
            return ir::StmtKind::Empty;
        };
        let types: Vec<Type> = checked.iter().map(|(_, t)| t.clone()).collect();
        match self.select(&info.constructors, &types) {
            Selection::Found(ctor) => ir::StmtKind::SuperCtor {
                class: info.name.clone(),
                sig: ctor.sig(),
                args: self.lower_args(&ctor, checked),
            },
            other => {
                self.report_selection(other, info.simple_name(), &info, true, &types, span);
                ir::StmtKind::Empty
            }
        }
    }

    // ---- expressions ------------------------------------------------------

    pub(crate) fn check_expr(&mut self, expr: &Expr, expected: Option<&Type>) -> Checked {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(lit) => self.literal(lit, span),
            ExprKind::Name(name) => self.name_expr(name, span),
            ExprKind::Field { target, name } => match self.qualifier(target) {
                Qual::Value(lowered, ty) => self.member_field(lowered, &ty, name, span),
                Qual::Class(info) => self.static_field(&info, name, span),
                Qual::Package(package) => {
                    self.error(
                        span,
                        "compiler.err.cant.resolve.location",
                        format!("cannot find symbol\n  symbol:   class {name}\n  location: package {package}"),
                    );
                    failed()
                }
                Qual::Failed => failed(),
            },
            ExprKind::Call { target, name, args } => self.call(target.as_deref(), name, args, span),
            ExprKind::New { ty, args } => self.new_object(ty, args, span),
            ExprKind::NewArray {
                elem,
                dims,
                extra_dims,
            } => {
                let elem_ty = self.resolve_type(elem);
                let dims: Vec<ir::Expr> = dims.iter().map(|d| self.int_operand(d)).collect();
                if elem_ty.is_error() {
                    return failed();
                }
                let mut ty = elem_ty.clone();
                for _ in 0..dims.len() + extra_dims {
                    ty = Type::array_of(ty);
                }
                (
                    ir::Expr::NewArray {
                        elem: elem_ty,
                        dims,
                        extra_dims: *extra_dims,
                    },
                    ty,
                )
            }
            ExprKind::ArrayInit { elem, items } => self.array_init(elem.as_ref(), items, expected, span),
            ExprKind::Index { target, index } => {
                let (target_ir, target_ty) = self.check_expr(target, None);
                let index_ir = self.int_operand(index);
                match target_ty {
                    Type::Array(elem) => (
                        ir::Expr::Index {
                            target: Box::new(target_ir),
                            index: Box::new(index_ir),
                        },
                        *elem,
                    ),
                    Type::Error => failed(),
                    other => {
                        self.error(
                            span,
                            "compiler.err.array.req.but.found",
                            format!("array required, but {other} found"),
                        );
                        failed()
                    }
                }
            }
            ExprKind::Unary { op, expr: operand } => self.unary(*op, operand, span),
            ExprKind::IncDec {
                target,
                increment,
                prefix,
            } => {
                let Some((place, ty, _)) = self.place(target) else {
                    return failed();
                };
                if !ty.is_error() && (kind_of(&ty).is_none() || unbox(&ty) == Type::Boolean) {
                    let symbol = if *increment { "++" } else { "--" };
                    self.error(
                        span,
                        "compiler.err.operator.cant.be.applied",
                        format!("bad operand type {ty} for unary operator '{symbol}'"),
                    );
                    return failed();
                }
                (
                    ir::Expr::IncDec {
                        place: Box::new(place),
                        store: unbox(&ty),
                        increment: *increment,
                        prefix: *prefix,
                    },
                    ty,
                )
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, span),
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value, span),
            ExprKind::Conditional { cond, then, els } => self.conditional(cond, then, els, expected),
            ExprKind::Cast { ty, expr: operand } => self.cast(ty, operand, span),
            ExprKind::InstanceOf { expr: operand, ty } => {
                let (lowered, from) = self.check_expr(operand, None);
                let ty = self.resolve_type(ty);
                if from.is_primitive() || ty.is_primitive() {
                    self.error(
                        span,
                        "compiler.err.type.found.req",
                        format!("unexpected type\n  required: reference\n  found:    {}", if from.is_primitive() { &from } else { &ty }),
                    );
                    return failed();
                }
                (
                    ir::Expr::InstanceOf {
                        expr: Box::new(lowered),
                        ty,
                    },
                    Type::Boolean,
                )
            }
            ExprKind::This => match self.ctx.class.clone() {
                Some(class) if !self.ctx.is_static => (ir::Expr::This, class.as_type()),
                _ => {
                    self.error(
                        span,
                        "compiler.err.non-static.cant.be.ref",
                        "non-static variable this cannot be referenced from a static context",
                    );
                    failed()
                }
            },
            ExprKind::Super => {
                self.error(span, "compiler.err.expected", "'.' expected");
                failed()
            }
        }
    }

    fn literal(&mut self, lit: &Literal, span: Span) -> Checked {
        match lit {
            Literal::Int(value) => match i32::try_from(*value) {
                Ok(value) => (ir::Expr::Const(Const::Int(value)), Type::Int),
                Err(_) => {
                    self.error(span, "compiler.err.int.number.too.large", format!("integer number too large: {value}"));
                    (ir::Expr::Const(Const::Int(0)), Type::Int)
                }
            },
            Literal::Long(value) => (ir::Expr::Const(Const::Long(*value)), Type::Long),
            Literal::Double(value) => (ir::Expr::Const(Const::Double(*value)), Type::Double),
            Literal::Char(value) => (ir::Expr::Const(Const::Char(*value)), Type::Char),
            Literal::Str(value) => (ir::Expr::Const(Const::Str(Arc::from(value.as_str()))), Type::string()),
            Literal::Bool(value) => (ir::Expr::Const(Const::Bool(*value)), Type::Boolean),
            Literal::Null => (ir::Expr::Const(Const::Null), Type::Null),
        }
    }

    /// Operand that must be an `int` after promotion.
    fn int_operand(&mut self, expr: &Expr) -> ir::Expr {
        let (lowered, ty) = self.check_expr(expr, None);
        match promote_integral(&ty) {
            Some(Type::Int) => self.coerce(lowered, &ty, &Type::Int),
            _ if ty.is_error() => lowered,
            Some(_) => {
                self.error(
                    expr.span,
                    "compiler.err.possible.loss.of.precision",
                    format!("incompatible types: possible lossy conversion from {ty} to int"),
                );
                lowered
            }
            None => {
                self.error(
                    expr.span,
                    "compiler.err.prob.found.req",
                    format!("incompatible types: {ty} cannot be converted to int"),
                );
                lowered
            }
        }
    }

    // ---- names ------------------------------------------------------------

    fn own_field(&mut self, name: &str) -> Option<(Arc<str>, FieldInfo)> {
        let class = self.ctx.class.clone()?;
        self.class_field(&class.name, name)
    }

    fn static_import_field(&mut self, name: &str) -> Option<(Arc<str>, FieldInfo)> {
        for import in self.scope.imports().into_iter().filter(|i| i.is_static) {
            let class = if import.on_demand {
                import.target.clone()
            } else {
                match import.target.rsplit_once('.') {
                    Some((class, member)) if member == name => class.to_string(),
                    _ => continue,
                }
            };
            let Some(info) = self.class_by_import_name(&class) else {
                continue;
            };
            if let Some(field) = info.field(name).filter(|f| f.is_static) {
                if !import.on_demand {
                    self.reference(DepName::Var(name.to_string()));
                }
                return Some((info.name.clone(), field.clone()));
            }
        }
        None
    }

    fn static_import_methods(&mut self, name: &str) -> Vec<MethodInfo> {
        let mut found = Vec::new();
        for import in self.scope.imports().into_iter().filter(|i| i.is_static) {
            let class = if import.on_demand {
                import.target.clone()
            } else {
                match import.target.rsplit_once('.') {
                    Some((class, member)) if member == name => class.to_string(),
                    _ => continue,
                }
            };
            if let Some(info) = self.class_by_import_name(&class) {
                let before = found.len();
                found.extend(info.methods_named(name).filter(|m| m.is_static).cloned());
                if !import.on_demand && found.len() > before {
                    self.reference(DepName::Method(name.to_string()));
                }
            }
        }
        found
    }

    fn name_is_value(&mut self, name: &str) -> bool {
        self.find_local(name).is_some()
            || self.own_field(name).is_some()
            || self.scope.var(name).is_some()
            || self.static_import_field(name).is_some()
    }

    fn name_expr(&mut self, name: &str, span: Span) -> Checked {
        if let Some(local) = self.find_local(name) {
            return (ir::Expr::Local(local.slot), local.ty);
        }
        if let Some((owner, field)) = self.own_field(name) {
            if field.is_static {
                return (
                    ir::Expr::StaticField {
                        class: owner,
                        name: name.to_string(),
                    },
                    field.ty,
                );
            }
            if self.ctx.is_static {
                self.error(
                    span,
                    "compiler.err.non-static.cant.be.ref",
                    format!("non-static variable {name} cannot be referenced from a static context"),
                );
                return failed();
            }
            return (
                ir::Expr::Field {
                    target: Box::new(ir::Expr::This),
                    name: name.to_string(),
                },
                field.ty,
            );
        }
        if let Some(ty) = self.scope.var(name) {
            self.reference(DepName::Var(name.to_string()));
            return (ir::Expr::Global(name.to_string()), ty);
        }
        if let Some((owner, field)) = self.static_import_field(name) {
            return (
                ir::Expr::StaticField {
                    class: owner,
                    name: name.to_string(),
                },
                field.ty,
            );
        }
        self.unresolved(DepName::Var(name.to_string()), format!("variable {name}"), span);
        failed()
    }

    fn qualifier(&mut self, target: &Expr) -> Qual {
        match &target.kind {
            ExprKind::Name(name) => {
                if self.name_is_value(name) {
                    let (lowered, ty) = self.name_expr(name, target.span);
                    return Qual::Value(lowered, ty);
                }
                if let Some(Type::Class(class)) = self.find_simple_type(name) {
                    if let Some(info) = self.lookup_class(&class) {
                        return Qual::Class(info);
                    }
                }
                if self.package_exists(name) {
                    return Qual::Package(name.clone());
                }
                // Either a variable or a class may be declared later.
                self.reference(DepName::Type(name.clone()));
                self.unresolved(DepName::Var(name.clone()), format!("variable {name}"), target.span);
                Qual::Failed
            }
            ExprKind::Field { target: inner, name } if inner.as_path().is_some() => {
                match self.qualifier(inner) {
                    Qual::Package(package) => {
                        let full = format!("{package}.{name}");
                        if self.qualified_exists(&full) {
                            if let Some(info) = self.lookup_class(&full) {
                                return Qual::Class(info);
                            }
                        }
                        if self.package_exists(&full) {
                            return Qual::Package(full);
                        }
                        self.error(
                            target.span,
                            "compiler.err.doesnt.exist",
                            format!("package {full} does not exist"),
                        );
                        Qual::Failed
                    }
                    Qual::Class(info) => match self.static_field(&info, name, target.span) {
                        (_, Type::Error) => Qual::Failed,
                        (lowered, ty) => Qual::Value(lowered, ty),
                    },
                    Qual::Value(lowered, ty) => match self.member_field(lowered, &ty, name, target.span) {
                        (_, Type::Error) => Qual::Failed,
                        (lowered, ty) => Qual::Value(lowered, ty),
                    },
                    Qual::Failed => Qual::Failed,
                }
            }
            ExprKind::Super => match self.ctx.class.clone() {
                Some(class) if !self.ctx.is_static => {
                    let superclass = class.superclass.clone().unwrap_or_else(|| Arc::from(OBJECT));
                    Qual::Value(ir::Expr::This, Type::Class(superclass))
                }
                _ => {
                    self.error(
                        target.span,
                        "compiler.err.non-static.cant.be.ref",
                        "non-static variable super cannot be referenced from a static context",
                    );
                    Qual::Failed
                }
            },
            _ => match self.check_expr(target, None) {
                (_, Type::Error) => Qual::Failed,
                (lowered, ty) => Qual::Value(lowered, ty),
            },
        }
    }

    fn member_field(&mut self, target: ir::Expr, ty: &Type, name: &str, span: Span) -> Checked {
        match ty {
            Type::Error => failed(),
            Type::Array(_) if name == "length" => (ir::Expr::Length(Box::new(target)), Type::Int),
            Type::Class(class) => {
                let class = class.clone();
                match self.class_field(&class, name) {
                    Some((owner, field)) if field.is_static => (
                        ir::Expr::StaticField {
                            class: owner,
                            name: name.to_string(),
                        },
                        field.ty,
                    ),
                    Some((_, field)) => (
                        ir::Expr::Field {
                            target: Box::new(target),
                            name: name.to_string(),
                        },
                        field.ty,
                    ),
                    None => {
                        self.missing_member(span, &format!("variable {name}"), ty);
                        failed()
                    }
                }
            }
            other if other.is_primitive() => {
                self.error(
                    span,
                    "compiler.err.cant.deref",
                    format!("{other} cannot be dereferenced"),
                );
                failed()
            }
            other => {
                self.missing_member(span, &format!("variable {name}"), other);
                failed()
            }
        }
    }

    fn static_field(&mut self, info: &ClassInfo, name: &str, span: Span) -> Checked {
        match self.class_field(&info.name, name) {
            Some((owner, field)) if field.is_static => (
                ir::Expr::StaticField {
                    class: owner,
                    name: name.to_string(),
                },
                field.ty,
            ),
            Some(_) => {
                self.error(
                    span,
                    "compiler.err.non-static.cant.be.ref",
                    format!("non-static variable {name} cannot be referenced from a static context"),
                );
                failed()
            }
            None => {
                self.missing_member(span, &format!("variable {name}"), &info.as_type());
                failed()
            }
        }
    }

    fn missing_member(&mut self, span: Span, symbol: &str, location: &Type) {
        let noun = match location {
            Type::Class(name) => {
                let name = name.clone();
                self.lookup_class(&name)
                    .map(|info| info.kind.noun())
                    .unwrap_or("class")
            }
            _ => "class",
        };
        self.error(
            span,
            "compiler.err.cant.resolve.location",
            format!("cannot find symbol\n  symbol:   {symbol}\n  location: {noun} {location}"),
        );
    }

    fn place(&mut self, target: &Expr) -> Option<(Place, Type, bool)> {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(local) = self.find_local(name) {
                    return Some((Place::Local(local.slot), local.ty, false));
                }
                if let Some((owner, field)) = self.own_field(name) {
                    let assignable_final = self.ctx.in_ctor && !field.is_static;
                    let is_final = field.is_final && !assignable_final;
                    if field.is_static {
                        return Some((
                            Place::StaticField {
                                class: owner,
                                name: name.clone(),
                            },
                            field.ty,
                            is_final,
                        ));
                    }
                    if self.ctx.is_static {
                        self.error(
                            target.span,
                            "compiler.err.non-static.cant.be.ref",
                            format!("non-static variable {name} cannot be referenced from a static context"),
                        );
                        return None;
                    }
                    return Some((
                        Place::Field {
                            target: ir::Expr::This,
                            name: name.clone(),
                        },
                        field.ty,
                        is_final,
                    ));
                }
                if let Some(ty) = self.scope.var(name) {
                    self.reference(DepName::Var(name.clone()));
                    return Some((Place::Global(name.clone()), ty, false));
                }
                if let Some((owner, field)) = self.static_import_field(name) {
                    return Some((
                        Place::StaticField {
                            class: owner,
                            name: name.clone(),
                        },
                        field.ty,
                        field.is_final,
                    ));
                }
                self.unresolved(DepName::Var(name.clone()), format!("variable {name}"), target.span);
                None
            }
            ExprKind::Field { target: inner, name } => {
                let (lowered, ty) = match self.qualifier(inner) {
                    Qual::Value(lowered, ty) => (lowered, ty),
                    Qual::Class(info) => match self.static_field(&info, name, target.span) {
                        (ir::Expr::StaticField { class, name }, ty) => {
                            let is_final = info.field(&name).is_some_and(|f| f.is_final);
                            return Some((Place::StaticField { class, name }, ty, is_final));
                        }
                        _ => return None,
                    },
                    _ => return None,
                };
                if let Type::Array(_) = ty {
                    if name == "length" {
                        self.error(
                            target.span,
                            "compiler.err.cant.assign.val.to.var",
                            "cannot assign a value to final variable length",
                        );
                        return None;
                    }
                }
                match self.member_field(lowered, &ty, name, target.span) {
                    (ir::Expr::Field { target: object, name }, field_ty) => {
                        let is_final = match (&ty, self.ctx.in_ctor, &*object) {
                            (_, true, ir::Expr::This) => false,
                            (Type::Class(class), _, _) => {
                                let class = class.clone();
                                self.class_field(&class, &name).is_some_and(|(_, f)| f.is_final)
                            }
                            _ => false,
                        };
                        Some((Place::Field { target: *object, name }, field_ty, is_final))
                    }
                    (ir::Expr::StaticField { class, name }, field_ty) => {
                        Some((Place::StaticField { class, name }, field_ty, false))
                    }
                    _ => None,
                }
            }
            ExprKind::Index { target: array, index } => {
                let (array_ir, array_ty) = self.check_expr(array, None);
                let index_ir = self.int_operand(index);
                match array_ty {
                    Type::Array(elem) => Some((
                        Place::Index {
                            target: array_ir,
                            index: index_ir,
                        },
                        *elem,
                        false,
                    )),
                    Type::Error => None,
                    other => {
                        self.error(
                            target.span,
                            "compiler.err.array.req.but.found",
                            format!("array required, but {other} found"),
                        );
                        None
                    }
                }
            }
            _ => {
                self.check_expr(target, None);
                self.error(
                    target.span,
                    "compiler.err.type.found.req",
                    "unexpected type\n  required: variable\n  found:    value",
                );
                None
            }
        }
    }

    // ---- calls ------------------------------------------------------------

    fn call(&mut self, target: Option<&Expr>, name: &str, args: &[Expr], span: Span) -> Checked {
        let checked: Vec<Checked> = args.iter().map(|a| self.check_expr(a, None)).collect();
        let types: Vec<Type> = checked.iter().map(|(_, t)| t.clone()).collect();
        match target {
            None => self.unqualified_call(name, checked, &types, span),
            Some(target) if matches!(target.kind, ExprKind::Super) => {
                self.super_call(name, checked, &types, span)
            }
            Some(target) => match self.qualifier(target) {
                Qual::Value(lowered, ty) => self.instance_call(lowered, &ty, name, checked, &types, span),
                Qual::Class(info) => self.static_call(&info, name, checked, &types, span),
                Qual::Package(package) => {
                    self.error(
                        target.span,
                        "compiler.err.doesnt.exist",
                        format!("package {package} does not exist"),
                    );
                    failed()
                }
                Qual::Failed => failed(),
            },
        }
    }

    fn finish_call(&mut self, callee: Callee, method: &MethodInfo, checked: Vec<Checked>) -> Checked {
        let args = self.lower_args(method, checked);
        (
            ir::Expr::Call(Box::new(ir::Call { callee, args })),
            method.ret.clone(),
        )
    }

    fn unqualified_call(&mut self, name: &str, checked: Vec<Checked>, types: &[Type], span: Span) -> Checked {
        if let Some(class) = self.ctx.class.clone() {
            let candidates = self.class_methods(&class.name, name);
            if !candidates.is_empty() {
                return match self.select(&candidates, types) {
                    Selection::Found(method) => {
                        if method.is_static {
                            let callee = Callee::Static {
                                class: method.owner.clone(),
                                name: name.to_string(),
                                sig: method.sig(),
                            };
                            self.finish_call(callee, &method, checked)
                        } else if self.ctx.is_static {
                            self.error(
                                span,
                                "compiler.err.non-static.cant.be.ref",
                                format!(
                                    "non-static method {} cannot be referenced from a static context",
                                    method.display()
                                ),
                            );
                            failed()
                        } else {
                            let callee = Callee::Virtual {
                                target: ir::Expr::This,
                                name: name.to_string(),
                                sig: method.sig(),
                            };
                            self.finish_call(callee, &method, checked)
                        }
                    }
                    other => {
                        self.report_selection(other, name, &class, false, types, span);
                        failed()
                    }
                };
            }
        }

        self.reference(DepName::Method(name.to_string()));
        let mut candidates = self.scope.methods(name);
        if let Some(own) = self.self_method.clone().filter(|m| m.name == name) {
            candidates.retain(|m| m.sig() != own.sig());
            candidates.insert(0, own);
        }
        if !candidates.is_empty() {
            return match self.select(&candidates, types) {
                Selection::Found(method) => {
                    let callee = Callee::Global {
                        name: name.to_string(),
                        sig: method.sig(),
                    };
                    self.finish_call(callee, &method, checked)
                }
                other => {
                    let top = ClassInfo::new("", ClassKind::Class, Origin::User);
                    self.report_selection(other, name, &top, false, types, span);
                    failed()
                }
            };
        }

        let imported = self.static_import_methods(name);
        if !imported.is_empty() {
            return match self.select(&imported, types) {
                Selection::Found(method) => {
                    let callee = Callee::Static {
                        class: method.owner.clone(),
                        name: name.to_string(),
                        sig: method.sig(),
                    };
                    self.finish_call(callee, &method, checked)
                }
                other => {
                    let owner = imported[0].owner.clone();
                    let info = self
                        .lookup_class(&owner)
                        .unwrap_or_else(|| Arc::new(ClassInfo::new(&owner, ClassKind::Class, Origin::Platform)));
                    self.report_selection(other, name, &info, false, types, span);
                    failed()
                }
            };
        }

        self.unresolved(
            DepName::Method(name.to_string()),
            format!("method {name}({})", Self::describe_args(types)),
            span,
        );
        failed()
    }

    fn super_call(&mut self, name: &str, checked: Vec<Checked>, types: &[Type], span: Span) -> Checked {
        let Some(class) = self.ctx.class.clone().filter(|_| !self.ctx.is_static) else {
            self.error(
                span,
                "compiler.err.non-static.cant.be.ref",
                "non-static variable super cannot be referenced from a static context",
            );
            return failed();
        };
        let superclass = class.superclass.clone().unwrap_or_else(|| Arc::from(OBJECT));
        let candidates = self.class_methods(&superclass, name);
        match self.select(&candidates, types) {
            Selection::Found(method) if method.is_abstract => {
                self.error(
                    span,
                    "compiler.err.abstract.cant.be.accessed.directly",
                    format!(
                        "abstract method {} in {} cannot be accessed directly",
                        method.display(),
                        simple_name(&method.owner)
                    ),
                );
                failed()
            }
            Selection::Found(method) => {
                let callee = Callee::Super {
                    class: superclass,
                    name: name.to_string(),
                    sig: method.sig(),
                };
                self.finish_call(callee, &method, checked)
            }
            other => {
                let info = self
                    .lookup_class(&superclass)
                    .unwrap_or_else(|| Arc::new(ClassInfo::new(&superclass, ClassKind::Class, Origin::Platform)));
                self.report_selection(other, name, &info, false, types, span);
                failed()
            }
        }
    }

    fn instance_call(
        &mut self,
        target: ir::Expr,
        ty: &Type,
        name: &str,
        checked: Vec<Checked>,
        types: &[Type],
        span: Span,
    ) -> Checked {
        let class: Arc<str> = match ty {
            Type::Error => return failed(),
            Type::Class(class) => class.clone(),
            Type::Array(_) => Arc::from(OBJECT),
            other if other.is_primitive() => {
                self.error(span, "compiler.err.cant.deref", format!("{other} cannot be dereferenced"));
                return failed();
            }
            other => {
                self.missing_member(
                    span,
                    &format!("method {name}({})", Self::describe_args(types)),
                    other,
                );
                return failed();
            }
        };
        let candidates = self.class_methods(&class, name);
        match self.select(&candidates, types) {
            Selection::Found(method) => {
                let callee = if method.is_static {
                    Callee::Static {
                        class: method.owner.clone(),
                        name: name.to_string(),
                        sig: method.sig(),
                    }
                } else {
                    Callee::Virtual {
                        target,
                        name: name.to_string(),
                        sig: method.sig(),
                    }
                };
                self.finish_call(callee, &method, checked)
            }
            Selection::NoCandidates => {
                self.missing_member(
                    span,
                    &format!("method {name}({})", Self::describe_args(types)),
                    ty,
                );
                failed()
            }
            other => {
                let info = self
                    .lookup_class(&class)
                    .unwrap_or_else(|| Arc::new(ClassInfo::new(&class, ClassKind::Class, Origin::External)));
                self.report_selection(other, name, &info, false, types, span);
                failed()
            }
        }
    }

    fn static_call(
        &mut self,
        info: &ClassInfo,
        name: &str,
        checked: Vec<Checked>,
        types: &[Type],
        span: Span,
    ) -> Checked {
        let candidates = self.class_methods(&info.name, name);
        match self.select(&candidates, types) {
            Selection::Found(method) if !method.is_static => {
                self.error(
                    span,
                    "compiler.err.non-static.cant.be.ref",
                    format!(
                        "non-static method {} cannot be referenced from a static context",
                        method.display()
                    ),
                );
                failed()
            }
            Selection::Found(method) => {
                let callee = Callee::Static {
                    class: method.owner.clone(),
                    name: name.to_string(),
                    sig: method.sig(),
                };
                self.finish_call(callee, &method, checked)
            }
            Selection::NoCandidates => {
                self.missing_member(
                    span,
                    &format!("method {name}({})", Self::describe_args(types)),
                    &info.as_type(),
                );
                failed()
            }
            other => {
                self.report_selection(other, name, info, false, types, span);
                failed()
            }
        }
    }

    pub(crate) fn report_selection(
        &mut self,
        selection: Selection,
        name: &str,
        owner: &ClassInfo,
        is_ctor: bool,
        types: &[Type],
        span: Span,
    ) {
        let found = if types.is_empty() {
            "no arguments".to_string()
        } else {
            Self::describe_args(types)
        };
        let what = if is_ctor { "constructor" } else { "method" };
        let location = if owner.name.is_empty() {
            String::new()
        } else {
            format!(" in {} {}", owner.kind.noun(), owner.simple_name())
        };
        match selection {
            Selection::Found(_) => {}
            Selection::NoCandidates => self.error(
                span,
                "compiler.err.cant.apply.symbol",
                format!(
                    "{what} {name}{location} cannot be applied to given types;\n  required: no arguments\n  found:    {found}"
                ),
            ),
            Selection::NotApplicable(candidates) if candidates.len() == 1 => {
                let required = if candidates[0].params.is_empty() {
                    "no arguments".to_string()
                } else {
                    Self::describe_args(&candidates[0].params)
                };
                self.error(
                    span,
                    "compiler.err.cant.apply.symbol",
                    format!(
                        "{what} {name}{location} cannot be applied to given types;\n  required: {required}\n  found:    {found}"
                    ),
                );
            }
            Selection::NotApplicable(_) => self.error(
                span,
                "compiler.err.cant.apply.symbols",
                format!("no suitable {what} found for {name}({})", Self::describe_args(types)),
            ),
            Selection::Ambiguous(a, b) => self.error(
                span,
                "compiler.err.ref.ambiguous",
                format!(
                    "reference to {name} is ambiguous\n  both {what} {} in {} and {what} {} in {} match",
                    a.display(),
                    simple_name(&a.owner),
                    b.display(),
                    simple_name(&b.owner)
                ),
            ),
        }
    }

    fn new_object(&mut self, ty: &TypeRef, args: &[Expr], span: Span) -> Checked {
        let checked: Vec<Checked> = args.iter().map(|a| self.check_expr(a, None)).collect();
        let types: Vec<Type> = checked.iter().map(|(_, t)| t.clone()).collect();
        let resolved = self.resolve_type(ty);
        let Some(class) = resolved.class_name().map(str::to_string) else {
            return failed();
        };
        let Some(info) = self.lookup_class(&class) else {
            return failed();
        };
        if info.origin == Origin::External {
            self.error(
                span,
                "compiler.err.cant.resolve.location",
                format!("cannot find symbol\n  symbol:   constructor {}", info.simple_name()),
            );
            return failed();
        }
        if info.kind == ClassKind::Enum {
            self.error(span, "compiler.err.enum.cant.be.instantiated", "enum classes may not be instantiated");
            return failed();
        }
        if info.is_abstract {
            self.error(
                span,
                "compiler.err.abstract.cant.be.instantiated",
                format!("{} is abstract; cannot be instantiated", info.simple_name()),
            );
            return failed();
        }
        match self.select(&info.constructors, &types) {
            Selection::Found(ctor) => {
                let args = self.lower_args(&ctor, checked);
                (
                    ir::Expr::New {
                        class: info.name.clone(),
                        sig: ctor.sig(),
                        args,
                    },
                    resolved,
                )
            }
            other => {
                self.report_selection(other, info.simple_name(), &info, true, &types, span);
                failed()
            }
        }
    }

    fn array_init(
        &mut self,
        elem: Option<&TypeRef>,
        items: &[Expr],
        expected: Option<&Type>,
        span: Span,
    ) -> Checked {
        let component = match (elem, expected) {
            (Some(elem), _) => self.resolve_type(elem),
            (None, Some(Type::Array(component))) => (**component).clone(),
            (None, Some(Type::Error)) => Type::Error,
            (None, other) => {
                let shown = other.map(|t| t.to_string()).unwrap_or_else(|| "<none>".to_string());
                self.error(
                    span,
                    "compiler.err.illegal.initializer.for.type",
                    format!("illegal initializer for {shown}"),
                );
                Type::Error
            }
        };
        let mut lowered = Vec::new();
        for item in items {
            let (item_ir, item_ty) = self.check_expr(item, Some(&component));
            lowered.push(self.assign_conversion(item_ir, &item_ty, &component, item.span));
        }
        if component.is_error() {
            return failed();
        }
        (
            ir::Expr::ArrayLit {
                elem: component.clone(),
                items: lowered,
            },
            Type::array_of(component),
        )
    }

    // ---- operators --------------------------------------------------------

    fn unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Checked {
        if let (UnaryOp::Neg, ExprKind::Literal(Literal::Int(value))) = (op, &operand.kind) {
            if *value == i64::from(i32::MAX) + 1 {
                return (ir::Expr::Const(Const::Int(i32::MIN)), Type::Int);
            }
        }
        let (lowered, ty) = self.check_expr(operand, None);
        if ty.is_error() {
            return failed();
        }
        let symbol = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        };
        let kind = kind_of(&ty);
        match (op, kind) {
            (UnaryOp::Not, Some(NumKind::Bool)) => (ir::Expr::Not(Box::new(lowered)), Type::Boolean),
            (UnaryOp::Neg | UnaryOp::Plus, Some(kind)) if kind != NumKind::Bool => {
                let result = kind_type(kind);
                let lowered = self.coerce(lowered, &ty, &result);
                if op == UnaryOp::Neg {
                    (ir::Expr::Neg(kind, Box::new(lowered)), result)
                } else {
                    (lowered, result)
                }
            }
            (UnaryOp::BitNot, Some(kind @ (NumKind::Int | NumKind::Long))) => {
                let result = kind_type(kind);
                let lowered = self.coerce(lowered, &ty, &result);
                (ir::Expr::BitNot(kind, Box::new(lowered)), result)
            }
            _ => {
                self.error(
                    span,
                    "compiler.err.operator.cant.be.applied",
                    format!("bad operand type {ty} for unary operator '{symbol}'"),
                );
                failed()
            }
        }
    }

    fn bad_operands(&mut self, op: BinOp, lhs: &Type, rhs: &Type, span: Span) -> Checked {
        self.error(
            span,
            "compiler.err.operator.cant.be.applied.1",
            format!(
                "bad operand types for binary operator '{}'\n  first type:  {lhs}\n  second type: {rhs}",
                op.symbol()
            ),
        );
        failed()
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> Checked {
        let (lhs_ir, lt) = self.check_expr(lhs, None);
        let (rhs_ir, rt) = self.check_expr(rhs, None);
        if lt.is_error() || rt.is_error() {
            return failed();
        }
        match op {
            BinOp::Add if lt.is_string() || rt.is_string() => {
                if lt == Type::Void || rt == Type::Void {
                    return self.bad_operands(op, &lt, &rt, span);
                }
                let mut parts = match lhs_ir {
                    ir::Expr::Concat(parts) if lt.is_string() => parts,
                    other => vec![other],
                };
                parts.push(rhs_ir);
                (ir::Expr::Concat(parts), Type::string())
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                let Some(result) = promote(&lt, &rt) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                let Some(kind) = kind_of(&result) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                let Some(arith) = arith_of(op) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                (
                    ir::Expr::Arith {
                        op: arith,
                        kind,
                        lhs: Box::new(self.coerce(lhs_ir, &lt, &result)),
                        rhs: Box::new(self.coerce(rhs_ir, &rt, &result)),
                    },
                    result,
                )
            }
            BinOp::Shl | BinOp::Shr | BinOp::UShr => {
                let (Some(left), Some(right)) = (promote_integral(&lt), promote_integral(&rt)) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                let (Some(kind), Some(arith)) = (kind_of(&left), arith_of(op)) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                (
                    ir::Expr::Arith {
                        op: arith,
                        kind,
                        lhs: Box::new(self.coerce(lhs_ir, &lt, &left)),
                        rhs: Box::new(self.coerce(rhs_ir, &rt, &right)),
                    },
                    left,
                )
            }
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let Some(common) = promote(&lt, &rt) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                let Some(kind) = kind_of(&common) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                let cmp = match op {
                    BinOp::Lt => Cmp::Lt,
                    BinOp::Gt => Cmp::Gt,
                    BinOp::Le => Cmp::Le,
                    _ => Cmp::Ge,
                };
                (
                    ir::Expr::Compare {
                        op: cmp,
                        kind,
                        lhs: Box::new(self.coerce(lhs_ir, &lt, &common)),
                        rhs: Box::new(self.coerce(rhs_ir, &rt, &common)),
                    },
                    Type::Boolean,
                )
            }
            BinOp::Eq | BinOp::Ne => self.equality(op, lhs_ir, &lt, rhs_ir, &rt, span),
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                let Some(arith) = arith_of(op) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                if unbox(&lt) == Type::Boolean && unbox(&rt) == Type::Boolean {
                    return (
                        ir::Expr::Arith {
                            op: arith,
                            kind: NumKind::Bool,
                            lhs: Box::new(lhs_ir),
                            rhs: Box::new(rhs_ir),
                        },
                        Type::Boolean,
                    );
                }
                let (Some(_), Some(_)) = (promote_integral(&lt), promote_integral(&rt)) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                let Some(result) = promote(&lt, &rt) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                let Some(kind) = kind_of(&result) else {
                    return self.bad_operands(op, &lt, &rt, span);
                };
                (
                    ir::Expr::Arith {
                        op: arith,
                        kind,
                        lhs: Box::new(self.coerce(lhs_ir, &lt, &result)),
                        rhs: Box::new(self.coerce(rhs_ir, &rt, &result)),
                    },
                    result,
                )
            }
            BinOp::And | BinOp::Or => {
                if unbox(&lt) != Type::Boolean || unbox(&rt) != Type::Boolean {
                    return self.bad_operands(op, &lt, &rt, span);
                }
                let (l, r) = (Box::new(lhs_ir), Box::new(rhs_ir));
                let lowered = if op == BinOp::And {
                    ir::Expr::And(l, r)
                } else {
                    ir::Expr::Or(l, r)
                };
                (lowered, Type::Boolean)
            }
        }
    }

    fn equality(
        &mut self,
        op: BinOp,
        lhs: ir::Expr,
        lt: &Type,
        rhs: ir::Expr,
        rt: &Type,
        span: Span,
    ) -> Checked {
        let negate = op == BinOp::Ne;
        let numeric_context = lt.is_primitive() || rt.is_primitive();
        if numeric_context {
            if unbox(lt) == Type::Boolean && unbox(rt) == Type::Boolean {
                return (
                    ir::Expr::Equals {
                        kind: Some(NumKind::Bool),
                        negate,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    Type::Boolean,
                );
            }
            let Some(common) = promote(lt, rt) else {
                return self.bad_operands(op, lt, rt, span);
            };
            let kind = kind_of(&common);
            return (
                ir::Expr::Equals {
                    kind,
                    negate,
                    lhs: Box::new(self.coerce(lhs, lt, &common)),
                    rhs: Box::new(self.coerce(rhs, rt, &common)),
                },
                Type::Boolean,
            );
        }
        if lt == &Type::Void || rt == &Type::Void {
            return self.bad_operands(op, lt, rt, span);
        }
        let comparable = self.convertible(lt, rt, false)
            || self.convertible(rt, lt, false)
            || self.involves_interface(lt)
            || self.involves_interface(rt);
        if !comparable {
            self.error(
                span,
                "compiler.err.incomparable.types",
                format!("incomparable types: {lt} and {rt}"),
            );
            return failed();
        }
        (
            ir::Expr::Equals {
                kind: None,
                negate,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            Type::Boolean,
        )
    }

    fn involves_interface(&mut self, ty: &Type) -> bool {
        match ty {
            Type::Class(name) => {
                let name = name.clone();
                self.lookup_class(&name)
                    .is_some_and(|info| info.kind == ClassKind::Interface)
            }
            _ => false,
        }
    }

    fn assign(&mut self, op: Option<BinOp>, target: &Expr, value: &Expr, span: Span) -> Checked {
        let Some((place, ty, is_final)) = self.place(target) else {
            self.check_expr(value, None);
            return failed();
        };
        if is_final {
            let name = match &target.kind {
                ExprKind::Name(name) | ExprKind::Field { name, .. } => name.clone(),
                _ => String::new(),
            };
            self.error(
                target.span,
                "compiler.err.cant.assign.val.to.var",
                format!("cannot assign a value to final variable {name}"),
            );
        }
        let place = Box::new(place);
        let Some(op) = op else {
            let (value_ir, value_ty) = self.check_expr(value, Some(&ty));
            let value_ir = self.assign_conversion(value_ir, &value_ty, &ty, value.span);
            return (
                ir::Expr::Assign {
                    place,
                    value: Box::new(value_ir),
                },
                ty,
            );
        };
        let (value_ir, vt) = self.check_expr(value, None);
        if ty.is_error() || vt.is_error() {
            return failed();
        }
        if op == BinOp::Add && ty.is_string() {
            return (
                ir::Expr::ConcatAssign {
                    place,
                    value: Box::new(value_ir),
                },
                ty,
            );
        }
        let Some(arith) = arith_of(op) else {
            return self.bad_operands(op, &ty, &vt, span);
        };
        let (kind, value_ir) = match op {
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor
                if unbox(&ty) == Type::Boolean && unbox(&vt) == Type::Boolean =>
            {
                (NumKind::Bool, value_ir)
            }
            BinOp::Shl | BinOp::Shr | BinOp::UShr => {
                let (Some(left), Some(right)) = (promote_integral(&ty), promote_integral(&vt)) else {
                    return self.bad_operands(op, &ty, &vt, span);
                };
                let Some(kind) = kind_of(&left) else {
                    return self.bad_operands(op, &ty, &vt, span);
                };
                (kind, self.coerce(value_ir, &vt, &right))
            }
            _ => {
                let integral_only = matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor);
                if integral_only && (promote_integral(&ty).is_none() || promote_integral(&vt).is_none()) {
                    return self.bad_operands(op, &ty, &vt, span);
                }
                let Some(common) = promote(&ty, &vt) else {
                    return self.bad_operands(op, &ty, &vt, span);
                };
                let Some(kind) = kind_of(&common) else {
                    return self.bad_operands(op, &ty, &vt, span);
                };
                (kind, self.coerce(value_ir, &vt, &common))
            }
        };
        (
            ir::Expr::CompoundAssign {
                place,
                op: arith,
                kind,
                value: Box::new(value_ir),
                store: unbox(&ty),
            },
            ty,
        )
    }

    fn conditional(&mut self, cond: &Expr, then: &Expr, els: &Expr, expected: Option<&Type>) -> Checked {
        let cond_ir = self.condition(cond);
        let (then_ir, tt) = self.check_expr(then, expected);
        let (els_ir, et) = self.check_expr(els, expected);
        if tt.is_error() || et.is_error() {
            return failed();
        }
        let ty = if tt == et {
            tt.clone()
        } else if let (Some(common), true) = (promote(&tt, &et), tt.is_primitive() || et.is_primitive()) {
            common
        } else if unbox(&tt) == Type::Boolean && unbox(&et) == Type::Boolean {
            Type::Boolean
        } else if tt == Type::Null {
            et.boxed().map(Type::class).unwrap_or_else(|| et.clone())
        } else if et == Type::Null {
            tt.boxed().map(Type::class).unwrap_or_else(|| tt.clone())
        } else if self.convertible(&tt, &et, false) {
            et.clone()
        } else if self.convertible(&et, &tt, false) {
            tt.clone()
        } else {
            Type::object()
        };
        let then_ir = self.coerce(then_ir, &tt, &ty);
        let els_ir = self.coerce(els_ir, &et, &ty);
        (
            ir::Expr::Cond {
                cond: Box::new(cond_ir),
                then: Box::new(then_ir),
                els: Box::new(els_ir),
            },
            ty,
        )
    }

    fn cast(&mut self, ty: &TypeRef, operand: &Expr, span: Span) -> Checked {
        let target = self.resolve_type(ty);
        let (lowered, from) = self.check_expr(operand, None);
        if target.is_error() || from.is_error() {
            return (lowered, target);
        }
        let mismatch = |checker: &mut Self| {
            checker.error(
                span,
                "compiler.err.prob.found.req",
                format!("incompatible types: {from} cannot be converted to {target}"),
            );
            failed()
        };
        match (&from, &target) {
            (f, t) if f.is_numeric() && t.is_numeric() => match prim_of(t) {
                Some(prim) if f != t => (ir::Expr::Convert(prim, Box::new(lowered)), target.clone()),
                _ => (lowered, target.clone()),
            },
            (Type::Boolean, Type::Boolean) => (lowered, target.clone()),
            (f, t) if f.is_primitive() => {
                if self.assignable(f, t) {
                    (lowered, target.clone())
                } else {
                    mismatch(self)
                }
            }
            (f, t) if t.is_primitive() => {
                if let Some(prim) = f.unboxed() {
                    if prim == *t || (prim.is_numeric() && t.is_numeric()) {
                        let lowered = self.coerce(lowered, &prim, t);
                        return (lowered, target.clone());
                    }
                    return mismatch(self);
                }
                let boxed = t.boxed().map(Type::class).unwrap_or_else(Type::object);
                if self.convertible(&boxed, f, false) {
                    let checked = ir::Expr::CheckCast {
                        ty: boxed.clone(),
                        expr: Box::new(lowered),
                    };
                    (self.coerce(checked, &boxed, t), target.clone())
                } else {
                    mismatch(self)
                }
            }
            (Type::Null, _) => (lowered, target.clone()),
            (f, t) => {
                if self.convertible(f, t, false) {
                    (lowered, target.clone())
                } else if self.convertible(t, f, false) || self.involves_interface(f) || self.involves_interface(t) {
                    (
                        ir::Expr::CheckCast {
                            ty: target.clone(),
                            expr: Box::new(lowered),
                        },
                        target.clone(),
                    )
                } else {
                    mismatch(self)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::check::{CheckMode, check_unit};
    use crate::ir::{Code, Expr, StmtKind};
    use crate::parser::parse_snippet;
    use crate::scope::EmptyScope;

    fn body_errors(src: &str) -> Vec<String> {
        let units = parse_snippet(src).expect("parse should pass");
        let analysis = check_unit(&units[0], &EmptyScope, CheckMode::Fresh, "1");
        analysis.body_errors.iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn string_concatenation_flattens_left_operands() {
        let units = parse_snippet("\"a\" + 1 + 2").expect("parse should pass");
        let analysis = check_unit(&units[0], &EmptyScope, CheckMode::Fresh, "1");
        let Code::Expr { expr: Expr::Concat(parts), .. } = analysis.code else {
            panic!("expected concatenation");
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn operator_mismatches_are_reported() {
        assert_eq!(
            body_errors("true - 1"),
            vec!["bad operand types for binary operator '-'\n  first type:  boolean\n  second type: int"]
        );
        assert_eq!(body_errors("!3"), vec!["bad operand type int for unary operator '!'"]);
    }

    #[test]
    fn statement_checks() {
        assert_eq!(body_errors("break;"), vec!["break outside switch or loop"]);
        assert_eq!(
            body_errors("void f() { return 1; }"),
            vec!["incompatible types: unexpected return value"]
        );
        assert_eq!(body_errors("void f() { 1 + 2; }"), vec!["not a statement"]);
        assert!(body_errors("int f(int n) { while (true) { if (n > 3) return n; n++; } }").is_empty());
    }

    #[test]
    fn locals_get_distinct_slots_in_nested_scopes() {
        let units = parse_snippet("void f() { int a = 1; { int b = 2; } int c = 3; }")
            .expect("parse should pass");
        let analysis = check_unit(&units[0], &EmptyScope, CheckMode::Fresh, "1");
        let Code::Method(method) = analysis.code else {
            panic!("expected a method");
        };
        assert_eq!(method.frame_size, 2);
        let crate::ir::Body::Code(stmts) = method.body else {
            panic!("expected code");
        };
        assert!(matches!(stmts[2].kind, StmtKind::Local { slot: 1, .. }));
    }

    #[test]
    fn static_context_rejects_instance_members() {
        assert_eq!(
            body_errors("class A { int n; static int get() { return n; } }"),
            vec!["non-static variable n cannot be referenced from a static context"]
        );
    }

    #[test]
    fn casts_convert_and_check() {
        assert!(body_errors("(int) 3.7").is_empty());
        assert!(body_errors("(String) (Object) \"s\"").is_empty());
        assert_eq!(
            body_errors("(String) 3"),
            vec!["incompatible types: int cannot be converted to String"]
        );
    }
}
