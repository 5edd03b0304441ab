use crate::ast::{ClassDecl, Expr, ExprKind, ImportDecl, MethodDecl, Stmt, TypeDeclKind, VarDecl};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Import,
    TypeDecl,
    Method,
    Var,
    Expression,
    Statement,
    Erroneous,
}

impl Kind {
    /// Persistent snippets survive across evaluations and can be dropped.
    pub fn is_persistent(self) -> bool {
        matches!(self, Kind::Import | Kind::TypeDecl | Kind::Method | Kind::Var)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubKind {
    SingleTypeImport,
    TypeImportOnDemand,
    SingleStaticImport,
    StaticImportOnDemand,
    Class,
    Interface,
    Enum,
    Method,
    VarDeclaration,
    VarDeclarationWithInitializer,
    TempVarExpression,
    VarValue,
    Assignment,
    OtherExpression,
    Statement,
    Unknown,
}

impl SubKind {
    pub fn kind(self) -> Kind {
        match self {
            SubKind::SingleTypeImport
            | SubKind::TypeImportOnDemand
            | SubKind::SingleStaticImport
            | SubKind::StaticImportOnDemand => Kind::Import,
            SubKind::Class | SubKind::Interface | SubKind::Enum => Kind::TypeDecl,
            SubKind::Method => Kind::Method,
            SubKind::VarDeclaration
            | SubKind::VarDeclarationWithInitializer
            | SubKind::TempVarExpression => Kind::Var,
            SubKind::VarValue | SubKind::Assignment | SubKind::OtherExpression => {
                Kind::Expression
            }
            SubKind::Statement => Kind::Statement,
            SubKind::Unknown => Kind::Erroneous,
        }
    }

    /// Executable sub kinds run code when evaluated.
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            SubKind::VarDeclarationWithInitializer
                | SubKind::TempVarExpression
                | SubKind::VarValue
                | SubKind::Assignment
                | SubKind::OtherExpression
                | SubKind::Statement
        )
    }
}

/// One syntactic unit of a snippet, the closed set of things a snippet can be.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    Import(ImportDecl),
    Type(Arc<ClassDecl>),
    Method(Arc<MethodDecl>),
    Var(VarDecl),
    Expression(Expr),
    Statement(Stmt),
}

impl Unit {
    /// Syntactic sub kind. Expressions are refined by the checker once the
    /// expression type and its target are known.
    pub fn syntactic_sub_kind(&self) -> SubKind {
        match self {
            Unit::Import(import) => match (import.is_static, import.on_demand) {
                (false, false) => SubKind::SingleTypeImport,
                (false, true) => SubKind::TypeImportOnDemand,
                (true, false) => SubKind::SingleStaticImport,
                (true, true) => SubKind::StaticImportOnDemand,
            },
            Unit::Type(decl) => match decl.kind {
                TypeDeclKind::Class => SubKind::Class,
                TypeDeclKind::Interface => SubKind::Interface,
                TypeDeclKind::Enum => SubKind::Enum,
            },
            Unit::Method(_) => SubKind::Method,
            Unit::Var(var) => {
                if var.init.is_some() {
                    SubKind::VarDeclarationWithInitializer
                } else {
                    SubKind::VarDeclaration
                }
            }
            Unit::Expression(expr) => match &expr.kind {
                ExprKind::Name(_) => SubKind::VarValue,
                ExprKind::Assign { .. } => SubKind::Assignment,
                _ => SubKind::TempVarExpression,
            },
            Unit::Statement(_) => SubKind::Statement,
        }
    }

    /// Declared name, if the unit declares one.
    pub fn name(&self) -> Option<String> {
        match self {
            Unit::Import(import) => Some(import.full_name()),
            Unit::Type(decl) => Some(decl.name.clone()),
            Unit::Method(decl) => Some(decl.name.clone()),
            Unit::Var(var) => Some(var.name.clone()),
            Unit::Expression(_) | Unit::Statement(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUnit {
    pub unit: Unit,
    /// Source of this unit alone; spans in `unit` index into it.
    pub source: String,
}
