//! Execution of lowered snippet code.
//!
//! [`Interpreter`] walks the resolved program form produced by
//! `kulla-compiler`. [`ThreadedExecutor`] hosts one on a dedicated thread so a
//! running snippet can be stopped from elsewhere. Both implement
//! [`ExecutionControl`], the seam the snippet state engine drives.

mod builtins;
mod interp;
mod thread;
pub mod value;

pub use interp::Interpreter;
pub use thread::ThreadedExecutor;

use kulla_compiler::Type;
use kulla_compiler::ir::Code;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Destination of snippet output.
pub type OutputSink = Arc<Mutex<dyn Write + Send>>;

pub fn stdout_sink() -> OutputSink {
    Arc::new(Mutex::new(std::io::stdout()))
}

pub fn stderr_sink() -> OutputSink {
    Arc::new(Mutex::new(std::io::stderr()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Simple class name; empty for top-level code.
    pub class_name: String,
    /// Empty for top-level statements and expressions.
    pub method_name: String,
    pub snippet_id: String,
    pub line: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.class_name.is_empty(), self.method_name.is_empty()) {
            (_, true) => write!(f, "at ({}:{})", self.location(), self.line),
            (true, false) => write!(f, "at {} ({}:{})", self.method_name, self.location(), self.line),
            (false, false) => write!(
                f,
                "at {}.{} ({}:{})",
                self.class_name,
                self.method_name,
                self.location(),
                self.line
            ),
        }
    }
}

impl StackFrame {
    fn location(&self) -> String {
        format!("#{}", self.snippet_id)
    }
}

/// How a run ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionInfo {
    /// An exception escaped the snippet.
    Eval {
        /// Qualified for platform classes, simple for user classes.
        class_name: String,
        message: Option<String>,
        stack: Vec<StackFrame>,
    },
    /// Code reached a declaration whose dependencies are missing.
    Unresolved { snippet: String },
    /// The run was interrupted with [`StopHandle::stop`].
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    /// Display form of the produced value, when there is one.
    pub value: Option<String>,
    pub exception: Option<ExceptionInfo>,
    /// Set when the snippet called `System.exit`.
    pub exit_code: Option<i32>,
}

/// A named runtime definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Var(String),
    /// Top-level method, by signature key.
    Method(String),
    Class(Arc<str>),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("execution engine is no longer running")]
    Disconnected,
    #[error("execution engine failure: {0}")]
    Internal(String),
}

/// Requests cooperative interruption of the current run. Stopping when
/// nothing runs has no effect.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub(crate) fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub trait ExecutionControl {
    /// Loads a method or class definition, replacing any earlier one with the
    /// same key. Existing instances pick up replaced class code.
    fn install(&mut self, code: Code) -> Result<(), ExecError>;

    /// Makes a definition raise an unresolved-reference exception naming
    /// `snippet` when used.
    fn corral(&mut self, target: Target, snippet: &str) -> Result<(), ExecError>;

    fn remove(&mut self, target: Target) -> Result<(), ExecError>;

    /// Runs a variable initializer, expression or statement. An expression's
    /// value is stored into the variable `bind` when given.
    fn run(&mut self, code: Code, bind: Option<String>) -> Result<RunOutcome, ExecError>;

    /// Sets a variable to the default value of `ty`.
    fn reset_var(&mut self, name: &str, ty: &Type) -> Result<(), ExecError>;

    fn var_value(&mut self, name: &str) -> Result<Option<String>, ExecError>;

    fn stop_handle(&self) -> StopHandle;

    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::{StackFrame, StopHandle};

    #[test]
    fn frames_render_like_platform_traces() {
        let top = StackFrame {
            class_name: String::new(),
            method_name: String::new(),
            snippet_id: "3".to_string(),
            line: 1,
        };
        assert_eq!(top.to_string(), "at (#3:1)");
        let method = StackFrame {
            class_name: "Foo".to_string(),
            method_name: "bar".to_string(),
            snippet_id: "2".to_string(),
            line: 4,
        };
        assert_eq!(method.to_string(), "at Foo.bar (#2:4)");
    }

    #[test]
    fn stop_is_idempotent() {
        let handle = StopHandle::default();
        handle.stop();
        handle.clone().stop();
        assert!(handle.requested());
        handle.clear();
        assert!(!handle.requested());
    }
}
