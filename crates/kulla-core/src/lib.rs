//! Snippet state engine.
//!
//! [`Kulla`] accepts source fragments, files each declaration under a stable
//! key, tracks which snippets depend on which names and re-resolves the
//! dependents whenever a declaration is added, replaced or dropped. Every
//! change comes back as an ordered batch of [`SnippetEvent`]s.
//! [`SourceCodeAnalysis`] answers completion and documentation queries over
//! the current state.

mod analysis;
mod event;
mod graph;
mod index;
mod registry;
mod state;

pub use analysis::{QualifiedNames, SourceCodeAnalysis, Suggestion};
pub use event::SnippetEvent;
pub use index::{ClassIndex, IndexSnapshot};
pub use registry::{IdSpace, KeyId, Snippet, SnippetId, Status};
pub use state::{Kulla, KullaBuilder, KullaError};

pub use kulla_compiler::{
    Completeness, CompletionInfo, Declared, Diag, DiagKind, Kind, LineMap, Span, SubKind,
};
pub use kulla_engine::{
    ExceptionInfo, ExecError, ExecutionControl, Interpreter, OutputSink, StackFrame, StopHandle,
    stderr_sink, stdout_sink,
};
