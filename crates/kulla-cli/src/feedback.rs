use kulla_config::FeedbackSetting;
use kulla_core::{Declared, Diag, Kind, Snippet, SnippetEvent, StackFrame, Status, SubKind};

/// How much feedback a message needs before it is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    /// Always shown.
    Hard,
    /// Hidden in `off` and `concise` modes.
    Fluff,
    /// Shown only in `concise` mode.
    Concise,
}

impl Level {
    pub(crate) fn shown_in(self, mode: FeedbackSetting) -> bool {
        match self {
            Level::Hard => true,
            Level::Fluff => !matches!(mode, FeedbackSetting::Off | FeedbackSetting::Concise),
            Level::Concise => mode == FeedbackSetting::Concise,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Message {
    pub(crate) level: Level,
    pub(crate) text: String,
}

fn hard(text: impl Into<String>) -> Message {
    Message {
        level: Level::Hard,
        text: text.into(),
    }
}

fn fluff(text: impl Into<String>) -> Message {
    Message {
        level: Level::Fluff,
        text: text.into(),
    }
}

fn concise(text: impl Into<String>) -> Message {
    Message {
        level: Level::Concise,
        text: text.into(),
    }
}

/// What the event display needs to know about a snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Subject {
    pub(crate) kind: Kind,
    pub(crate) sub_kind: SubKind,
    pub(crate) name: String,
    pub(crate) type_name: String,
    /// `name(int,String)` for methods.
    pub(crate) method: Option<String>,
}

impl Subject {
    pub(crate) fn of(snippet: &Snippet) -> Self {
        let name = snippet.name().unwrap_or_default();
        let method = match snippet.declared() {
            Declared::Method(info) => Some(info.sig()),
            _ if snippet.kind() == Kind::Method => Some(format!("{name}()")),
            _ => None,
        };
        Self {
            kind: snippet.kind(),
            sub_kind: snippet.sub_kind(),
            name,
            type_name: snippet.type_name().unwrap_or_default().to_string(),
            method,
        }
    }

    fn is_declaration(&self) -> bool {
        matches!(self.kind, Kind::Var | Kind::Method | Kind::TypeDecl)
    }
}

/// ` variable x, and method g() are declared`; empty without names.
pub(crate) fn unresolved_phrase(names: &[String]) -> String {
    let mut out = String::new();
    if names.is_empty() {
        return out;
    }
    out.push(' ');
    for (idx, name) in names.iter().enumerate() {
        out.push_str(name);
        match names.len() - idx - 1 {
            0 => {}
            1 => out.push_str(", and "),
            _ => out.push_str(", "),
        }
    }
    out.push_str(if names.len() == 1 {
        " is declared"
    } else {
        " are declared"
    });
    out
}

/// Feedback for a declaration or expression event. `update` marks events
/// caused by another snippet.
pub(crate) fn declaration(
    subject: &Subject,
    event: &SnippetEvent,
    update: bool,
    unresolved: &[String],
) -> Vec<Message> {
    let status = event.status;
    let mut declared = match status {
        Status::Valid | Status::RecoverableDefined | Status::RecoverableNotDefined => {
            if event.previous_status.is_active() {
                if event.is_signature_change {
                    "Replaced".to_string()
                } else {
                    "Modified".to_string()
                }
            } else {
                "Added".to_string()
            }
        }
        Status::Overwritten => "Overwrote".to_string(),
        Status::Dropped => "Dropped".to_string(),
        Status::Rejected => "Rejected".to_string(),
        Status::Nonexistent => format!("{:?}=>{:?}", event.previous_status, status),
    };
    if update {
        declared = format!("  Update {}", declared.to_lowercase());
    }
    let however = if subject.is_declaration()
        && matches!(
            status,
            Status::RecoverableDefined | Status::RecoverableNotDefined
        ) {
        let cannot = if status == Status::RecoverableNotDefined {
            " cannot be referenced until"
        } else {
            " cannot be invoked until"
        };
        let lead = if update { " which" } else { ", however, it" };
        format!("{lead}{cannot}{}", unresolved_phrase(unresolved))
    } else {
        String::new()
    };
    let value = event.value.as_deref().unwrap_or("null");
    let name = &subject.name;
    let ty = &subject.type_name;
    let retired = matches!(status, Status::Dropped | Status::Overwritten);

    match subject.sub_kind {
        SubKind::Class => vec![fluff(format!("{declared} class {name}{however}"))],
        SubKind::Interface => vec![fluff(format!("{declared} interface {name}{however}"))],
        SubKind::Enum => vec![fluff(format!("{declared} enum {name}{however}"))],
        SubKind::Method => {
            let method = subject.method.clone().unwrap_or_else(|| format!("{name}()"));
            vec![fluff(format!("{declared} method {method}{however}"))]
        }
        SubKind::VarDeclaration | SubKind::VarDeclarationWithInitializer if retired && !update => {
            vec![fluff(format!("{declared} variable {name}"))]
        }
        SubKind::VarDeclaration if !update => {
            if status == Status::RecoverableNotDefined {
                vec![fluff(format!("{declared} variable {name}{however}"))]
            } else {
                vec![fluff(format!("{declared} variable {name} of type {ty}{however}"))]
            }
        }
        SubKind::VarDeclaration | SubKind::VarDeclarationWithInitializer => {
            if status == Status::RecoverableNotDefined {
                if update {
                    Vec::new()
                } else {
                    vec![fluff(format!("{declared} variable {name}{however}"))]
                }
            } else if update {
                if event.is_signature_change {
                    vec![hard(format!("{declared} variable {name}, reset to {value}"))]
                } else {
                    Vec::new()
                }
            } else {
                vec![
                    fluff(format!(
                        "{declared} variable {name} of type {ty} with initial value {value}"
                    )),
                    concise(format!("{name} : {value}")),
                ]
            }
        }
        SubKind::TempVarExpression => {
            if update {
                vec![hard(format!(
                    "{declared} temporary variable {name}, reset to {value}"
                ))]
            } else {
                vec![
                    fluff(format!("Expression value is: {value}")),
                    fluff(format!(
                        "  assigned to temporary variable {name} of type {ty}"
                    )),
                    concise(format!("{name} : {value}")),
                ]
            }
        }
        SubKind::OtherExpression => vec![fluff(format!("Expression value is: {value}"))],
        SubKind::VarValue => vec![
            fluff(format!("Variable {name} of type {ty} has value {value}")),
            concise(format!("{name} : {value}")),
        ],
        SubKind::Assignment => vec![
            fluff(format!("Variable {name} has been assigned the value {value}")),
            concise(format!("{name} : {value}")),
        ],
        _ => Vec::new(),
    }
}

/// Header, message, offending source line and a caret marker under the
/// diagnostic's span. Embedded diagnostics are indented and headerless.
pub(crate) fn diagnostic(source: &str, diag: &Diag, embed: bool) -> Vec<Message> {
    let padding = if embed { "    " } else { "" };
    let mut out = Vec::new();
    if !embed {
        out.push(hard(if diag.is_error() { "Error:" } else { "Warning:" }));
    }
    for line in diag.message.lines() {
        if !line.trim().starts_with("location:") {
            out.push(hard(format!("{padding}{line}")));
        }
    }

    let start = diag.start_position().min(source.len());
    let end = diag.end_position().min(source.len()).max(start);
    let mut line_start = 0;
    let mut line_end = source.len();
    for (idx, _) in source.match_indices('\n') {
        if idx >= start {
            line_end = idx;
            break;
        }
        line_start = idx + 1;
    }
    let line = source.get(line_start..line_end).unwrap_or_default();
    out.push(fluff(format!("{padding}{}", line.trim_end_matches('\r'))));

    let column = |offset: usize| {
        source
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset - line_start)
    };
    let caret_start = column(start);
    let multiline = end > line_end;
    let caret_end = column(if multiline { line_end } else { end }) as isize - 1;
    let mut marker = " ".repeat(caret_start);
    marker.push('^');
    if caret_end > caret_start as isize {
        marker.push_str(&"-".repeat((caret_end - caret_start as isize - 1).max(0) as usize));
        marker.push_str(if multiline { "-..." } else { "^" });
    }
    out.push(fluff(format!("{padding}{marker}")));
    out
}

/// `java.lang.ArithmeticException thrown: / by zero` plus the frames.
pub(crate) fn eval_exception(
    class_name: &str,
    message: Option<&str>,
    stack: &[StackFrame],
) -> Vec<Message> {
    let mut out = vec![match message {
        Some(message) => hard(format!("{class_name} thrown: {message}")),
        None => hard(format!("{class_name} thrown")),
    }];
    out.extend(stack.iter().map(|frame| hard(format!("      {frame}"))));
    out
}

/// Reported when a call reaches a method that cannot run yet.
pub(crate) fn unresolved_call(name: &str, unresolved: &[String], other_errors: usize) -> Message {
    let mut tail = String::new();
    if other_errors > 0 {
        if !unresolved.is_empty() {
            tail.push_str(" and");
        }
        tail.push_str(if other_errors == 1 {
            " this error is corrected:"
        } else {
            " these errors are corrected:"
        });
    }
    hard(format!(
        "Attempted to call {name} which cannot be invoked until{}{tail}",
        unresolved_phrase(unresolved)
    ))
}

#[cfg(test)]
mod tests {
    use super::{Level, Subject, declaration, diagnostic, unresolved_call, unresolved_phrase};
    use kulla_config::FeedbackSetting;
    use kulla_core::{Diag, Kind, SnippetEvent, SnippetId, Span, Status, SubKind};

    fn event(from: Status, to: Status, sig: bool, value: Option<&str>) -> SnippetEvent {
        SnippetEvent {
            snippet: SnippetId::new("1"),
            previous_status: from,
            status: to,
            is_signature_change: sig,
            cause_snippet: None,
            value: value.map(str::to_string),
            exception: None,
        }
    }

    fn var(sub_kind: SubKind) -> Subject {
        Subject {
            kind: Kind::Var,
            sub_kind,
            name: "x".to_string(),
            type_name: "int".to_string(),
            method: None,
        }
    }

    fn method(name: &str) -> Subject {
        Subject {
            kind: Kind::Method,
            sub_kind: SubKind::Method,
            name: name.to_string(),
            type_name: String::new(),
            method: Some(format!("{name}()")),
        }
    }

    fn texts(messages: Vec<super::Message>, mode: FeedbackSetting) -> Vec<String> {
        messages
            .into_iter()
            .filter(|m| m.level.shown_in(mode))
            .map(|m| m.text)
            .collect()
    }

    #[test]
    fn levels_follow_the_feedback_mode() {
        assert!(Level::Hard.shown_in(FeedbackSetting::Off));
        assert!(!Level::Fluff.shown_in(FeedbackSetting::Concise));
        assert!(Level::Fluff.shown_in(FeedbackSetting::Verbose));
        assert!(Level::Concise.shown_in(FeedbackSetting::Concise));
        assert!(!Level::Concise.shown_in(FeedbackSetting::Normal));
    }

    #[test]
    fn unresolved_lists_read_as_prose() {
        assert_eq!(unresolved_phrase(&[]), "");
        assert_eq!(
            unresolved_phrase(&["variable x".to_string()]),
            " variable x is declared"
        );
        assert_eq!(
            unresolved_phrase(&[
                "variable x".to_string(),
                "method g()".to_string(),
                "class A".to_string()
            ]),
            " variable x, method g(), and class A are declared"
        );
    }

    #[test]
    fn new_variable_reports_type_and_value() {
        let e = event(Status::Nonexistent, Status::Valid, true, Some("5"));
        let subject = var(SubKind::VarDeclarationWithInitializer);
        assert_eq!(
            texts(declaration(&subject, &e, false, &[]), FeedbackSetting::Normal),
            ["Added variable x of type int with initial value 5"]
        );
        assert_eq!(
            texts(declaration(&subject, &e, false, &[]), FeedbackSetting::Concise),
            ["x : 5"]
        );
    }

    #[test]
    fn redefinition_verbs_depend_on_the_signature() {
        let subject = method("f");
        let same = event(Status::Valid, Status::Valid, false, None);
        let changed = event(Status::Valid, Status::Valid, true, None);
        assert_eq!(
            texts(declaration(&subject, &same, false, &[]), FeedbackSetting::Normal),
            ["Modified method f()"]
        );
        assert_eq!(
            texts(declaration(&subject, &changed, false, &[]), FeedbackSetting::Normal),
            ["Replaced method f()"]
        );
    }

    #[test]
    fn cascaded_updates_explain_what_is_missing() {
        let subject = method("mu");
        let e = event(Status::Valid, Status::RecoverableDefined, false, None);
        assert_eq!(
            texts(
                declaration(&subject, &e, true, &["variable x".to_string()]),
                FeedbackSetting::Normal
            ),
            ["  Update modified method mu() which cannot be invoked until variable x is declared"]
        );
        let added = event(Status::Nonexistent, Status::RecoverableNotDefined, true, None);
        let class = Subject {
            kind: Kind::TypeDecl,
            sub_kind: SubKind::Class,
            name: "B".to_string(),
            type_name: String::new(),
            method: None,
        };
        assert_eq!(
            texts(
                declaration(&class, &added, false, &["class A".to_string()]),
                FeedbackSetting::Normal
            ),
            ["Added class B, however, it cannot be referenced until class A is declared"]
        );
    }

    #[test]
    fn expressions_name_their_temporary() {
        let subject = Subject {
            name: "$1".to_string(),
            ..var(SubKind::TempVarExpression)
        };
        let e = event(Status::Nonexistent, Status::Valid, true, Some("5"));
        assert_eq!(
            texts(declaration(&subject, &e, false, &[]), FeedbackSetting::Normal),
            [
                "Expression value is: 5",
                "  assigned to temporary variable $1 of type int"
            ]
        );
    }

    #[test]
    fn dropped_variables_are_named_without_a_value() {
        let e = event(Status::Valid, Status::Dropped, true, None);
        assert_eq!(
            texts(
                declaration(&var(SubKind::VarDeclarationWithInitializer), &e, false, &[]),
                FeedbackSetting::Normal
            ),
            ["Dropped variable x"]
        );
    }

    #[test]
    fn caret_marks_the_span_on_its_line() {
        let source = "int x = \"text\";";
        let diag = Diag::error(Span::new(8, 14), "compiler.err.prob.found.req", "incompatible types");
        let lines = texts(diagnostic(source, &diag, false), FeedbackSetting::Normal);
        assert_eq!(
            lines,
            ["Error:", "incompatible types", source, "        ^----^"]
        );
    }

    #[test]
    fn caret_for_a_single_character_and_second_line() {
        let source = "int f() {\n  return y;\n}";
        let diag = Diag::error(Span::new(19, 20), "compiler.err.cant.resolve", "cannot find symbol");
        let lines = texts(diagnostic(source, &diag, true), FeedbackSetting::Normal);
        assert_eq!(
            lines,
            ["    cannot find symbol", "      return y;", "             ^"]
        );
    }

    #[test]
    fn unresolved_calls_mention_remaining_errors() {
        let message = unresolved_call("twice", &["method g()".to_string()], 0);
        assert_eq!(
            message.text,
            "Attempted to call twice which cannot be invoked until method g() is declared"
        );
        let message = unresolved_call("twice", &["method g()".to_string()], 1);
        assert!(message.text.ends_with("is declared and this error is corrected:"));
    }
}
