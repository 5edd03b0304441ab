use crate::feedback::{self, Level, Message, Subject};
use crate::prefs::Prefs;
use anyhow::{Context, Result};
use kulla_config::{FeedbackSetting, RunDefaults};
use kulla_core::{
    Completeness, ExceptionInfo, Kind, Kulla, KullaError, SnippetEvent, SnippetId, Status,
    SubKind, stderr_sink, stdout_sink,
};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Evaluated at the start of every session unless replaced.
pub(crate) const DEFAULT_STARTUP: &str = "import java.util.*;\nimport java.io.*;\n";
const CONTINUATION_PROMPT: &str = "   ...> ";

/// Why [`Tool::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ended {
    Eof,
    /// The session stopped being live: `/reset`, `/exit` or engine death.
    NotLive,
}

/// The interactive front end over a [`Kulla`] session.
pub(crate) struct Tool {
    pub(crate) kulla: Kulla,
    pub(crate) class_path: Vec<PathBuf>,
    /// Startup text from `--startup` or `--no-startup`; stored prefs
    /// are consulted otherwise.
    pub(crate) startup_override: Option<String>,
    pub(crate) prefs: Prefs,
    pub(crate) feedback: FeedbackSetting,
    pub(crate) prompt: String,
    pub(crate) display_prompt: bool,
    pub(crate) live: bool,
    pub(crate) regenerate_on_death: bool,
    pub(crate) in_startup: bool,
    /// Inputs that rebuild the current state, in order.
    pub(crate) replay: Vec<String>,
    pub(crate) replay_previous: Option<Vec<String>>,
    /// Everything entered this session.
    pub(crate) history: Vec<String>,
    /// Set by `/debug`: print every event a snippet produces.
    pub(crate) debug: bool,
}

impl Tool {
    pub(crate) fn new(defaults: &RunDefaults) -> Result<Self> {
        let prefs = Prefs::new(defaults.prefs_dir.clone());
        let startup_override = if defaults.no_startup {
            Some(String::new())
        } else if let Some(path) = &defaults.startup {
            Some(
                fs::read_to_string(path)
                    .with_context(|| format!("failed reading startup file {}", path.display()))?,
            )
        } else {
            None
        };
        let replay_previous = prefs.replay()?;
        debug!(
            prefs = %prefs.dir().display(),
            restorable = replay_previous.as_ref().map_or(0, Vec::len),
            "tool preferences loaded"
        );
        let mut tool = Self {
            kulla: open_session(&defaults.class_path)?,
            class_path: defaults.class_path.clone(),
            startup_override,
            prefs,
            feedback: defaults.feedback,
            prompt: defaults.prompt.clone(),
            display_prompt: true,
            live: true,
            regenerate_on_death: true,
            in_startup: false,
            replay: Vec::new(),
            replay_previous,
            history: Vec::new(),
            debug: false,
        };
        tool.load_startup()?;
        Ok(tool)
    }

    /// Greets the user, then reads from `input` until it ends.
    pub(crate) fn interact(&mut self, input: &mut dyn BufRead) -> Result<()> {
        self.fluff(format!(
            "Welcome to kulla -- Version {}",
            env!("CARGO_PKG_VERSION")
        ));
        self.fluff("Type /help for help");
        self.drive(input, true)
    }

    /// Evaluates snippets and commands from `input` without prompting.
    pub(crate) fn run_script(&mut self, input: &mut dyn BufRead) -> Result<()> {
        self.drive(input, false)
    }

    /// Runs `input` to its end, restarting the session after `/reset` or
    /// engine death until `/exit`.
    fn drive(&mut self, input: &mut dyn BufRead, interactive: bool) -> Result<()> {
        while self.regenerate_on_death {
            if !self.live {
                self.reset_state()?;
            }
            if self.run(input, interactive)? == Ended::Eof {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn reset_state(&mut self) -> Result<()> {
        debug!("restarting the session");
        self.kulla = open_session(&self.class_path)?;
        self.replay_previous = Some(std::mem::take(&mut self.replay));
        self.live = true;
        self.load_startup()
    }

    pub(crate) fn startup_text(&self) -> Result<String> {
        match &self.startup_override {
            Some(text) => Ok(text.clone()),
            None => Ok(self
                .prefs
                .startup()?
                .unwrap_or_else(|| DEFAULT_STARTUP.to_string())),
        }
    }

    fn load_startup(&mut self) -> Result<()> {
        let startup = self.startup_text()?;
        if startup.trim().is_empty() {
            return Ok(());
        }
        let feedback = std::mem::replace(&mut self.feedback, FeedbackSetting::Off);
        self.in_startup = true;
        let result = self.run(&mut startup.as_bytes(), false);
        self.in_startup = false;
        self.feedback = feedback;
        result.map(|_| ())
    }

    /// Main input loop: commands start with `/`, everything else is
    /// buffered until it forms complete snippets.
    pub(crate) fn run(&mut self, input: &mut dyn BufRead, interactive: bool) -> Result<Ended> {
        let mut incomplete = String::new();
        let mut line = String::new();
        while self.live {
            if interactive && self.display_prompt {
                let prompt = if incomplete.is_empty() {
                    self.prompt.as_str()
                } else {
                    CONTINUATION_PROMPT
                };
                print!("{prompt}");
                io::stdout().flush().context("failed flushing stdout")?;
            }

            line.clear();
            let bytes = input
                .read_line(&mut line)
                .context("failed reading input")?;
            if bytes == 0 {
                if !interactive && !incomplete.trim().is_empty() {
                    self.process_complete_source(incomplete.trim())?;
                }
                return Ok(Ended::Eof);
            }

            if incomplete.is_empty() && is_command(&line) {
                let command = line.trim().to_string();
                if !self.in_startup {
                    self.history.push(command.clone());
                }
                self.process_command(&command)?;
                continue;
            }
            incomplete.push_str(&line);
            incomplete = self.process_source(&incomplete)?;
        }
        Ok(Ended::NotLive)
    }

    /// Evaluates each complete snippet in `input`; returns what is left
    /// incomplete. A failing snippet discards the rest.
    pub(crate) fn process_source(&mut self, input: &str) -> Result<String> {
        let mut rest = input.to_string();
        loop {
            let info = self.kulla.source_code_analysis().analyze_completion(&rest);
            match info.completeness {
                Completeness::Empty => return Ok(String::new()),
                Completeness::DefinitelyIncomplete | Completeness::ConsideredIncomplete => {
                    return Ok(info.remaining);
                }
                Completeness::Complete | Completeness::CompleteWithSemi | Completeness::Unknown => {}
            }
            let failed = self.process_complete_source(&info.source)?;
            if failed || !self.live || info.remaining.trim().is_empty() {
                return Ok(String::new());
            }
            rest = info.remaining;
        }
    }

    fn process_complete_source(&mut self, source: &str) -> Result<bool> {
        debug!(source, "evaluating");
        if !self.in_startup {
            self.history.push(source.to_string());
        }
        let result = if self.in_startup {
            self.kulla.eval_startup(source)
        } else {
            self.kulla.eval(source)
        };
        let events = match result {
            Ok(events) => events,
            Err(err) => {
                self.engine_error(err);
                return Ok(true);
            }
        };
        if self.kulla.is_closed() {
            self.state_terminated();
        }

        let mut failed = false;
        let mut active = false;
        for event in &events {
            if self.debug {
                self.hard(debug_line(event));
            }
            failed |= self.handle_event(event);
            active |= event.is_root()
                && event.status.is_active()
                && self
                    .kulla
                    .snippet(&event.snippet)
                    .is_some_and(|s| s.sub_kind() != SubKind::VarValue);
        }
        if active && self.live && !self.in_startup {
            self.replay.push(source.to_string());
        }
        Ok(failed)
    }

    /// Prints one event; true when it counts as a failure.
    pub(crate) fn handle_event(&self, event: &SnippetEvent) -> bool {
        let Some(snippet) = self.kulla.snippet(&event.snippet) else {
            debug!(id = %event.snippet, "event for an unknown snippet");
            return false;
        };
        let subject = Subject::of(snippet);
        let diagnostics = self.kulla.diagnostics(&event.snippet).unwrap_or_default();
        let unresolved = self
            .kulla
            .unresolved_dependencies(&event.snippet)
            .unwrap_or_default();

        if event.is_root() {
            for diag in &diagnostics {
                self.emit(feedback::diagnostic(snippet.source(), diag, false));
            }
            if event.status.is_active() {
                match &event.exception {
                    Some(ExceptionInfo::Eval {
                        class_name,
                        message,
                        stack,
                    }) => {
                        self.emit(feedback::eval_exception(
                            class_name,
                            message.as_deref(),
                            stack,
                        ));
                        return true;
                    }
                    Some(ExceptionInfo::Unresolved { snippet }) => {
                        self.print_unresolved(&SnippetId::new(snippet.as_str()));
                    }
                    Some(ExceptionInfo::Stopped) => {
                        self.hard("Interrupted.");
                        return true;
                    }
                    None => self.emit(feedback::declaration(&subject, event, false, &unresolved)),
                }
            } else if event.status == Status::Rejected {
                if diagnostics.is_empty() {
                    self.hard("Failed.");
                }
                return true;
            } else if event.status == Status::Dropped {
                self.emit(feedback::declaration(&subject, event, false, &unresolved));
            }
        } else if event.status == Status::Rejected {
            self.hard(format!("Caused failure of dependent {} --", subject.name));
            for diag in &diagnostics {
                self.emit(feedback::diagnostic(snippet.source(), diag, true));
            }
        } else {
            let is_declaration = matches!(snippet.kind(), Kind::Var | Kind::Method | Kind::TypeDecl);
            let shown = self.feedback == FeedbackSetting::Verbose
                || event.status == Status::Overwritten
                || matches!(
                    snippet.sub_kind(),
                    SubKind::VarDeclaration | SubKind::VarDeclarationWithInitializer
                );
            if is_declaration && shown {
                self.emit(feedback::declaration(&subject, event, true, &unresolved));
                for diag in diagnostics.iter().filter(|d| d.is_error()) {
                    self.emit(feedback::diagnostic(snippet.source(), diag, true));
                }
            }
        }
        false
    }

    fn print_unresolved(&self, id: &SnippetId) {
        let Some(method) = self.kulla.snippet(id) else {
            return;
        };
        let errors: Vec<_> = self
            .kulla
            .diagnostics(id)
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.is_error())
            .collect();
        let unresolved = self.kulla.unresolved_dependencies(id).unwrap_or_default();
        let name = method.name().unwrap_or_default();
        self.emit(vec![feedback::unresolved_call(&name, &unresolved, errors.len())]);
        for diag in &errors {
            self.emit(feedback::diagnostic(method.source(), diag, true));
        }
    }

    pub(crate) fn engine_error(&mut self, err: KullaError) {
        match err {
            KullaError::Closed => self.state_terminated(),
            other => {
                warn!(error = %other, "evaluation failed");
                self.hard(format!("Unexpected execution exception: {other}"));
                if self.kulla.is_closed() {
                    self.state_terminated();
                }
            }
        }
    }

    fn state_terminated(&mut self) {
        if self.live {
            self.hard("State engine terminated.");
            self.hard("Restore definitions with: /reload restore");
            self.live = false;
        }
    }

    pub(crate) fn emit(&self, messages: Vec<Message>) {
        for message in messages {
            if message.level.shown_in(self.feedback) {
                println!("|  {}", message.text);
            }
        }
    }

    pub(crate) fn hard(&self, text: impl AsRef<str>) {
        println!("|  {}", text.as_ref());
    }

    pub(crate) fn fluff(&self, text: impl AsRef<str>) {
        if Level::Fluff.shown_in(self.feedback) {
            self.hard(text);
        }
    }

    pub(crate) fn concise(&self, text: impl AsRef<str>) {
        if Level::Concise.shown_in(self.feedback) {
            self.hard(text);
        }
    }
}

fn open_session(class_path: &[PathBuf]) -> Result<Kulla> {
    Kulla::builder()
        .out(stdout_sink())
        .err(stderr_sink())
        .class_path(class_path.iter().cloned())
        .build()
        .context("failed starting the snippet engine")
}

pub(crate) fn is_command(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('/') && !trimmed.starts_with("//") && !trimmed.starts_with("/*")
}

/// Raw form of an event for `/debug`.
fn debug_line(event: &SnippetEvent) -> String {
    let mut line = format!(
        "event: {} {:?} -> {:?}",
        event.snippet, event.previous_status, event.status
    );
    if event.is_signature_change {
        line.push_str(" signature");
    }
    if let Some(cause) = &event.cause_snippet {
        line.push_str(&format!(" caused by {cause}"));
    }
    if let Some(value) = &event.value {
        line.push_str(&format!(" value {value}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::{debug_line, is_command};
    use kulla_core::{SnippetEvent, SnippetId, Status};

    #[test]
    fn comments_are_not_commands() {
        assert!(is_command("/list\n"));
        assert!(is_command("  /-1"));
        assert!(!is_command("// note"));
        assert!(!is_command("/* block */ int x;"));
        assert!(!is_command("int x = 4 / 2;"));
    }

    #[test]
    fn debug_lines_show_the_raw_event() {
        let event = SnippetEvent {
            snippet: SnippetId::new("2"),
            previous_status: Status::Valid,
            status: Status::RecoverableDefined,
            is_signature_change: false,
            cause_snippet: Some(SnippetId::new("1")),
            value: None,
            exception: None,
        };
        assert_eq!(
            debug_line(&event),
            "event: 2 Valid -> RecoverableDefined caused by 1"
        );
    }
}
