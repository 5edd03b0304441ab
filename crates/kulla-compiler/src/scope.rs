use crate::diag::{Diag, Span};
use crate::types::{ClassInfo, MethodInfo, Type};
use std::fmt;
use std::sync::Arc;

/// A top-level name a snippet depends on. Dependents of a name are
/// re-resolved whenever something declared under it changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DepName {
    Var(String),
    Method(String),
    Type(String),
}

impl DepName {
    pub fn name(&self) -> &str {
        match self {
            DepName::Var(name) | DepName::Method(name) | DepName::Type(name) => name,
        }
    }
}

impl fmt::Display for DepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepName::Var(name) => write!(f, "variable {name}"),
            DepName::Method(name) => write!(f, "method {name}"),
            DepName::Type(name) => write!(f, "class {name}"),
        }
    }
}

/// A reference the checker could not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub dep: DepName,
    /// `variable x`, `method g(int)`, `class A`.
    pub display: String,
    pub span: Span,
}

impl Unresolved {
    pub fn to_diag(&self) -> Diag {
        Diag::error(
            self.span,
            "compiler.err.cant.resolve",
            format!("cannot find symbol\n  symbol:   {}", self.display),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportInfo {
    /// `java.util.List`, or the package / class for on-demand imports.
    pub target: String,
    pub is_static: bool,
    pub on_demand: bool,
}

impl ImportInfo {
    pub fn full_name(&self) -> String {
        if self.on_demand {
            format!("{}.*", self.target)
        } else {
            self.target.clone()
        }
    }
}

/// A user type visible to the checker, with its declaration identity.
#[derive(Debug, Clone)]
pub struct UserType {
    pub info: Arc<ClassInfo>,
    /// Changes whenever the declaration is replaced rather than redefined.
    pub identity: String,
}

/// What the checker may see of the current session.
pub trait Scope {
    /// Type of a defined top-level variable.
    fn var(&self, name: &str) -> Option<Type>;
    /// Defined top-level methods with this name.
    fn methods(&self, name: &str) -> Vec<MethodInfo>;
    /// Defined user type with this simple name.
    fn user_type(&self, name: &str) -> Option<UserType>;
    /// Active imports in declaration order.
    fn imports(&self) -> Vec<ImportInfo>;
    /// Qualified type found on the class path.
    fn has_external_type(&self, name: &str) -> bool;
    /// Package found on the class path.
    fn has_external_package(&self, name: &str) -> bool;
}

/// Scope with nothing declared.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn var(&self, _name: &str) -> Option<Type> {
        None
    }

    fn methods(&self, _name: &str) -> Vec<MethodInfo> {
        Vec::new()
    }

    fn user_type(&self, _name: &str) -> Option<UserType> {
        None
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
