//! Front end for the Kulla snippet language: a Java subset that is lexed,
//! parsed, classified into snippet units, type checked against the live REPL
//! scope and lowered into the `ir` tree run by `kulla-engine`.

pub mod ast;
mod body;
pub mod check;
pub mod completeness;
pub mod diag;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod platform;
pub mod scope;
pub mod types;
pub mod unit;

pub use check::{CheckMode, Declared, UnitAnalysis, check_unit};
pub use completeness::{Completeness, CompletionInfo, analyze_completion};
pub use diag::{Diag, DiagKind, LineMap, Span};
pub use parser::parse_snippet;
pub use scope::{DepName, EmptyScope, ImportInfo, Scope, Unresolved, UserType};
pub use types::{ClassInfo, ClassKind, FieldInfo, MethodInfo, Origin, Type};
pub use unit::{Kind, ParsedUnit, SubKind, Unit};
