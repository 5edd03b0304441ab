use crate::tool::{Tool, is_command};
use anyhow::Result;
use kulla_config::FeedbackSetting;
use kulla_core::{Declared, Kind, Snippet, SnippetId, Status, SubKind};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::PathBuf;
use tracing::{debug, warn};

type Action = fn(&mut Tool, &str) -> Result<bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Normal,
    /// Recorded in the replayable history when it succeeds.
    Replay,
    /// Accepted but left out of `/help`.
    Hidden,
}

struct Command {
    name: &'static str,
    params: &'static str,
    summary: &'static str,
    kind: CommandKind,
    action: Action,
}

impl Command {
    fn synopsis(&self) -> String {
        if self.params.is_empty() {
            self.name.to_string()
        } else {
            format!("{} {}", self.name, self.params)
        }
    }
}

const COMMANDS: &[Command] = &[
    Command {
        name: "/list",
        params: "[all|start|<name or id>]",
        summary: "list the source you have typed",
        kind: CommandKind::Normal,
        action: Tool::cmd_list,
    },
    Command {
        name: "/drop",
        params: "<name or id>",
        summary: "delete a source entry referenced by name or id",
        kind: CommandKind::Replay,
        action: Tool::cmd_drop,
    },
    Command {
        name: "/save",
        params: "[all|history|start] <file>",
        summary: "save snippet source you have typed to a file",
        kind: CommandKind::Normal,
        action: Tool::cmd_save,
    },
    Command {
        name: "/open",
        params: "<file>",
        summary: "open a file as source input",
        kind: CommandKind::Normal,
        action: Tool::cmd_open,
    },
    Command {
        name: "/vars",
        params: "",
        summary: "list the declared variables and their values",
        kind: CommandKind::Normal,
        action: Tool::cmd_vars,
    },
    Command {
        name: "/methods",
        params: "",
        summary: "list the declared methods and their signatures",
        kind: CommandKind::Normal,
        action: Tool::cmd_methods,
    },
    Command {
        name: "/types",
        params: "",
        summary: "list the declared classes, interfaces and enums",
        kind: CommandKind::Normal,
        action: Tool::cmd_types,
    },
    Command {
        name: "/classes",
        params: "",
        summary: "list the declared classes, interfaces and enums",
        kind: CommandKind::Hidden,
        action: Tool::cmd_types,
    },
    Command {
        name: "/imports",
        params: "",
        summary: "list the imported items",
        kind: CommandKind::Normal,
        action: Tool::cmd_imports,
    },
    Command {
        name: "/exit",
        params: "",
        summary: "exit the tool",
        kind: CommandKind::Normal,
        action: Tool::cmd_exit,
    },
    Command {
        name: "/reset",
        params: "",
        summary: "reset everything in the session",
        kind: CommandKind::Normal,
        action: Tool::cmd_reset,
    },
    Command {
        name: "/reload",
        params: "[restore] [quiet]",
        summary: "reset and replay relevant history -- current or previous (restore)",
        kind: CommandKind::Normal,
        action: Tool::cmd_reload,
    },
    Command {
        name: "/feedback",
        params: "<level>",
        summary: "feedback information: off, concise, normal, verbose, default, or ?",
        kind: CommandKind::Normal,
        action: Tool::cmd_feedback,
    },
    Command {
        name: "/prompt",
        params: "",
        summary: "toggle display of a prompt",
        kind: CommandKind::Normal,
        action: Tool::cmd_prompt,
    },
    Command {
        name: "/classpath",
        params: "<path>",
        summary: "add a path to the classpath",
        kind: CommandKind::Replay,
        action: Tool::cmd_classpath,
    },
    Command {
        name: "/history",
        params: "",
        summary: "history of what you have typed",
        kind: CommandKind::Normal,
        action: Tool::cmd_history,
    },
    Command {
        name: "/setstart",
        params: "<file>",
        summary: "read file and set as the new start-up definitions",
        kind: CommandKind::Normal,
        action: Tool::cmd_setstart,
    },
    Command {
        name: "/help",
        params: "[<command>]",
        summary: "this help message",
        kind: CommandKind::Normal,
        action: Tool::cmd_help,
    },
    Command {
        name: "/?",
        params: "",
        summary: "this help message",
        kind: CommandKind::Hidden,
        action: Tool::cmd_help,
    },
    Command {
        name: "/debug",
        params: "[on|off]",
        summary: "toggle display of the events each snippet produces",
        kind: CommandKind::Hidden,
        action: Tool::cmd_debug,
    },
    Command {
        name: "/!",
        params: "",
        summary: "re-run last snippet",
        kind: CommandKind::Normal,
        action: Tool::cmd_rerun_last,
    },
];

/// `/help` topics that are not commands: name, summary and body.
const HELP_SUBJECTS: &[(&str, &str, &[&str])] = &[
    (
        "intro",
        "an introduction to the tool",
        &[
            "kulla evaluates declarations, statements, and expressions as you type them.",
            "Each one is a snippet with an id; declarations stay in effect until they",
            "are replaced or dropped, and snippets that refer to names not declared yet",
            "are kept until those names appear.",
            "",
            "Commands start with a slash. Type /help to list them.",
        ],
    ),
    (
        "shortcuts",
        "a description of the shortcuts",
        &[
            "/!",
            "    re-run the last snippet",
            "/<id>",
            "    re-run the snippet with that id, for example /3 or /s1",
            "/-<n>",
            "    re-run the n-th previous snippet",
            "/<prefix>",
            "    any unambiguous prefix of a command name runs that command",
        ],
    ),
];

/// Exact name first, otherwise every command the input is a prefix of.
fn find_command(name: &str) -> Vec<&'static Command> {
    if let Some(exact) = COMMANDS.iter().find(|c| c.name == name) {
        return vec![exact];
    }
    COMMANDS.iter().filter(|c| c.name.starts_with(name)).collect()
}

fn is_declaration(snippet: &Snippet) -> bool {
    matches!(snippet.kind(), Kind::Var | Kind::Method | Kind::TypeDecl)
}

fn listing(id: &SnippetId, source: &str) -> String {
    format!("{:>4} : {}", id.as_str(), source.replace('\n', "\n       "))
}

/// Expands a leading `~/` to the home directory.
fn resolve_user_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

impl Tool {
    pub(crate) fn process_command(&mut self, input: &str) -> Result<()> {
        let (name, arg) = match input.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (input, ""),
        };
        if let Some(Ok(number)) = name.strip_prefix("/-").map(str::parse::<i64>) {
            return self.use_history_entry(-number);
        }

        match find_command(name).as_slice() {
            [] => {
                if !self.rerun_by_id(&name[1..])? {
                    self.hard(format!("No such command or snippet id: {name}"));
                    self.fluff("Type /help for help.");
                }
            }
            [command] => {
                debug!(command = command.name, arg, "running command");
                if (command.action)(self, arg)? && command.kind == CommandKind::Replay {
                    self.replay
                        .push(format!("{} {arg}", command.name).trim().to_string());
                }
            }
            many => {
                let names: Vec<&str> = many.iter().map(|c| c.name).collect();
                self.hard(format!(
                    "Command: {name} is ambiguous: {}",
                    names.join(", ")
                ));
                self.fluff("Type /help for help.");
            }
        }
        Ok(())
    }

    fn ids_where(&self, keep: impl Fn(&Snippet) -> bool) -> Vec<SnippetId> {
        self.kulla
            .snippets()
            .filter(|s| keep(s))
            .map(|s| s.id().clone())
            .collect()
    }

    /// Snippets an argument names: `all`, `start`, nothing for the active
    /// main snippets, else a declaration name or a snippet id. `None` when
    /// a name or id matches nothing.
    fn arg_to_snippets(&self, arg: &str, allow_all: bool) -> Option<Vec<SnippetId>> {
        if allow_all && arg == "all" {
            return Some(self.ids_where(|_| true));
        }
        if allow_all && arg == "start" {
            return Some(self.ids_where(Snippet::is_startup));
        }
        if arg.is_empty() {
            return Some(self.ids_where(|s| !s.is_startup() && s.status().is_active()));
        }
        let named = |s: &Snippet| is_declaration(s) && s.name().as_deref() == Some(arg);
        [
            self.ids_where(|s| s.status().is_active() && named(s)),
            self.ids_where(&named),
            self.ids_where(|s| s.id().as_str() == arg),
        ]
        .into_iter()
        .find(|ids| !ids.is_empty())
    }

    fn sources_of(&self, ids: &[SnippetId]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| self.kulla.snippet(id))
            .map(|s| s.source().to_string())
            .collect()
    }

    fn cmd_list(&mut self, arg: &str) -> Result<bool> {
        if arg == "history" {
            return self.cmd_history("");
        }
        let Some(ids) = self.arg_to_snippets(arg, true) else {
            if self
                .arg_to_snippets("", false)
                .is_some_and(|ids| !ids.is_empty())
            {
                self.hard(format!(
                    "No definition or id named {arg} found.  Try /list without arguments."
                ));
            } else {
                self.hard(format!(
                    "No definition or id named {arg} found.  There are no active definitions."
                ));
            }
            return Ok(false);
        };
        if !ids.is_empty() {
            println!();
        }
        for id in &ids {
            if let Some(snippet) = self.kulla.snippet(id) {
                println!("{}", listing(id, snippet.source()));
            }
        }
        Ok(true)
    }

    fn cmd_drop(&mut self, arg: &str) -> Result<bool> {
        if arg.is_empty() {
            self.hard("In the /drop argument, please specify an import, variable, method, or class to drop.");
            self.hard("Specify by id or name. Use /list to see ids. Use /reset to reset all state.");
            return Ok(false);
        }
        let Some(ids) = self.arg_to_snippets(arg, false) else {
            self.hard(format!(
                "No definition or id named {arg} found.  See /classes, /methods, /vars, or /list"
            ));
            return Ok(false);
        };
        let droppable: Vec<SnippetId> = ids
            .into_iter()
            .filter(|id| {
                self.kulla
                    .snippet(id)
                    .is_some_and(|s| s.status().is_active() && s.kind().is_persistent())
            })
            .collect();
        match droppable.as_slice() {
            [] => {
                self.hard("The argument did not specify an active import, variable, method, or class to drop.");
                Ok(false)
            }
            [id] => {
                let events = match self.kulla.drop(id) {
                    Ok(events) => events,
                    Err(err) => {
                        self.engine_error(err);
                        return Ok(false);
                    }
                };
                for event in &events {
                    self.handle_event(event);
                }
                Ok(true)
            }
            many => {
                self.hard("The argument references more than one import, variable, method, or class.");
                self.hard("Try again with one of the ids below:");
                for id in many {
                    if let Some(snippet) = self.kulla.snippet(id) {
                        println!("{}", listing(id, snippet.source()));
                    }
                }
                Ok(false)
            }
        }
    }

    fn cmd_save(&mut self, arg: &str) -> Result<bool> {
        let (mode, filename) = match arg.split_once(char::is_whitespace) {
            Some((mode @ ("all" | "history" | "start"), rest)) => (mode, rest.trim()),
            _ if matches!(arg, "all" | "history" | "start") => (arg, ""),
            _ => ("", arg),
        };
        if filename.is_empty() {
            self.hard("The /save command requires a filename argument.");
            return Ok(false);
        }
        let contents: String = match mode {
            "history" => self.history.iter().map(|s| format!("{s}\n")).collect(),
            "start" => self.startup_text()?,
            selection => {
                let ids = self.arg_to_snippets(selection, true).unwrap_or_default();
                self.sources_of(&ids)
                    .into_iter()
                    .map(|s| format!("{s}\n"))
                    .collect()
            }
        };
        if let Err(err) = fs::write(resolve_user_path(filename), contents) {
            self.hard(format!("File '{filename}' for save is not accessible: {err}"));
            return Ok(false);
        }
        Ok(true)
    }

    fn cmd_open(&mut self, arg: &str) -> Result<bool> {
        if arg.is_empty() {
            self.hard("The /open command requires a filename argument.");
            return Ok(false);
        }
        let file = match File::open(resolve_user_path(arg)) {
            Ok(file) => file,
            Err(err) => {
                self.hard(format!("File '{arg}' is not found: {err}"));
                return Ok(false);
            }
        };
        self.run(&mut BufReader::new(file), false)?;
        Ok(true)
    }

    fn cmd_vars(&mut self, _arg: &str) -> Result<bool> {
        let vars: Vec<(SnippetId, String, String, Status)> = self
            .kulla
            .vars()
            .into_iter()
            .map(|s| {
                (
                    s.id().clone(),
                    s.type_name().unwrap_or_default().to_string(),
                    s.name().unwrap_or_default(),
                    s.status(),
                )
            })
            .collect();
        for (id, ty, name, status) in vars {
            let value = if status == Status::Valid {
                match self.kulla.var_value(&id) {
                    Ok(value) => value.unwrap_or_else(|| "null".to_string()),
                    Err(err) => {
                        self.engine_error(err);
                        return Ok(false);
                    }
                }
            } else {
                "(not-active)".to_string()
            };
            self.hard(format!("  {ty} {name} = {value}"));
        }
        Ok(true)
    }

    fn cmd_methods(&mut self, _arg: &str) -> Result<bool> {
        for snippet in self.kulla.methods() {
            match snippet.declared() {
                Declared::Method(info) => {
                    let params: Vec<String> = info.params.iter().map(|p| p.to_string()).collect();
                    self.hard(format!("  {} ({}){}", info.name, params.join(","), info.ret));
                }
                _ => self.hard(format!("  {}", snippet.name().unwrap_or_default())),
            }
        }
        Ok(true)
    }

    fn cmd_types(&mut self, _arg: &str) -> Result<bool> {
        for snippet in self.kulla.types() {
            let kind = match snippet.sub_kind() {
                SubKind::Interface => "interface",
                SubKind::Enum => "enum",
                _ => "class",
            };
            self.hard(format!("  {kind} {}", snippet.name().unwrap_or_default()));
        }
        Ok(true)
    }

    fn cmd_imports(&mut self, _arg: &str) -> Result<bool> {
        for snippet in self.kulla.imports() {
            match snippet.declared() {
                Declared::Import(info) => self.hard(format!(
                    "  import {}{}",
                    if info.is_static { "static " } else { "" },
                    info.full_name()
                )),
                _ => self.hard(format!("  import {}", snippet.name().unwrap_or_default())),
            }
        }
        Ok(true)
    }

    fn cmd_exit(&mut self, _arg: &str) -> Result<bool> {
        self.regenerate_on_death = false;
        self.live = false;
        if let Err(err) = self.prefs.save_replay(&self.replay) {
            warn!(error = %format!("{err:#}"), "failed saving the replay history");
        }
        self.fluff("Goodbye");
        Ok(true)
    }

    fn cmd_reset(&mut self, _arg: &str) -> Result<bool> {
        self.live = false;
        self.fluff("Resetting state.");
        Ok(true)
    }

    fn cmd_reload(&mut self, arg: &str) -> Result<bool> {
        let mut restore = false;
        let mut echo = true;
        for word in arg.split_whitespace() {
            if "restore".starts_with(word) {
                restore = true;
            } else if "quiet".starts_with(word) {
                echo = false;
            } else {
                self.hard(format!("Invalid argument to reload command: {arg}"));
                self.hard("Use 'restore', 'quiet', or no argument");
                return Ok(false);
            }
        }
        let entries = if restore {
            match &self.replay_previous {
                Some(previous) => previous.clone(),
                None => {
                    self.hard("No previous history to restore");
                    return Ok(false);
                }
            }
        } else {
            self.replay.clone()
        };
        self.fluff(format!(
            "Restarting and restoring {}.",
            if restore { "from previous state" } else { "state" }
        ));
        self.reset_state()?;
        for entry in entries {
            if echo {
                println!("-: {entry}");
            }
            if is_command(&entry) {
                self.history.push(entry.clone());
                self.process_command(entry.trim())?;
            } else {
                self.process_source(&format!("{entry}\n"))?;
            }
            if !self.live {
                break;
            }
        }
        Ok(true)
    }

    fn cmd_feedback(&mut self, arg: &str) -> Result<bool> {
        let mode = match arg {
            "" | "d" | "default" | "n" | "normal" => FeedbackSetting::Normal,
            "o" | "off" => FeedbackSetting::Off,
            "c" | "concise" => FeedbackSetting::Concise,
            "v" | "verbose" => FeedbackSetting::Verbose,
            _ => {
                for line in [
                    "Follow /feedback with of the following:",
                    "  off       (errors and critical output only)",
                    "  concise",
                    "  normal",
                    "  verbose",
                    "  default",
                    "You may also use just the first letter, for example: /f c",
                    "'default' is the same as 'normal'",
                ] {
                    self.hard(line);
                }
                return Ok(false);
            }
        };
        self.feedback = mode;
        self.fluff(format!("Feedback mode: {}", mode.name()));
        Ok(true)
    }

    fn cmd_prompt(&mut self, _arg: &str) -> Result<bool> {
        self.display_prompt = !self.display_prompt;
        self.fluff(format!(
            "Prompt will {}display. Use /prompt to toggle.",
            if self.display_prompt { "" } else { "NOT " }
        ));
        self.concise(format!(
            "Prompt: {}",
            if self.display_prompt { "on" } else { "off" }
        ));
        Ok(true)
    }

    fn cmd_classpath(&mut self, arg: &str) -> Result<bool> {
        if arg.is_empty() {
            self.hard("/classpath requires a path argument");
            return Ok(false);
        }
        self.kulla.add_to_classpath(resolve_user_path(arg));
        self.fluff(format!("Path {arg} added to classpath"));
        Ok(true)
    }

    fn cmd_history(&mut self, _arg: &str) -> Result<bool> {
        println!();
        for entry in &self.history {
            println!("{entry}");
        }
        Ok(true)
    }

    fn cmd_setstart(&mut self, arg: &str) -> Result<bool> {
        if arg.is_empty() {
            self.hard("The /setstart command requires a filename argument.");
            return Ok(false);
        }
        let text = match fs::read_to_string(resolve_user_path(arg)) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.hard(format!("File '{arg}' for /setstart is not found."));
                return Ok(false);
            }
            Err(err) => {
                self.hard(format!("File '{arg}' for /setstart is not accessible: {err}"));
                return Ok(false);
            }
        };
        self.prefs.save_startup(&text)?;
        Ok(true)
    }

    fn cmd_help(&mut self, arg: &str) -> Result<bool> {
        if !arg.is_empty() {
            let wanted = if arg.starts_with('/') {
                arg.to_string()
            } else {
                format!("/{arg}")
            };
            let matches: Vec<&Command> = COMMANDS
                .iter()
                .filter(|c| c.kind != CommandKind::Hidden && c.name.starts_with(&wanted))
                .collect();
            let subjects: Vec<&(&str, &str, &[&str])> = HELP_SUBJECTS
                .iter()
                .filter(|(name, _, _)| name.starts_with(arg))
                .collect();
            if !matches.is_empty() || !subjects.is_empty() {
                for command in matches {
                    println!("{}", command.synopsis());
                    println!("    {}", command.summary);
                }
                for (_, _, body) in subjects {
                    for line in *body {
                        println!("{line}");
                    }
                }
                return Ok(true);
            }
            println!("No commands or subjects start with the provided argument: {arg}\n");
        }
        let shown: Vec<&Command> = COMMANDS
            .iter()
            .filter(|c| c.kind != CommandKind::Hidden)
            .collect();
        let width = shown.iter().map(|c| c.synopsis().len()).max().unwrap_or(0);
        println!("Type a snippet: an expression, statement, or declaration.");
        println!("Or type one of the following commands:\n");
        for command in shown {
            println!("{:<width$} -- {}", command.synopsis(), command.summary);
        }
        println!("{:<width$} -- {}", "/<id>", "re-run the snippet with that id");
        println!("{:<width$} -- {}", "/-<n>", "re-run the n-th previous snippet");
        println!("\nFor more information type '/help' followed by a command or subject name.");
        println!("Subjects:\n");
        for (name, summary, _) in HELP_SUBJECTS {
            println!("{:<width$} -- {summary}", name);
        }
        Ok(true)
    }

    fn cmd_debug(&mut self, arg: &str) -> Result<bool> {
        self.debug = match arg {
            "" => !self.debug,
            "on" => true,
            "off" => false,
            other => {
                self.hard(format!("Unknown /debug argument: {other}"));
                return Ok(false);
            }
        };
        self.hard(if self.debug { "Debugging on" } else { "Debugging off" });
        Ok(true)
    }

    fn cmd_rerun_last(&mut self, _arg: &str) -> Result<bool> {
        self.use_history_entry(-1)?;
        Ok(true)
    }

    /// Re-runs a snippet by position: negative counts back from the last.
    fn use_history_entry(&mut self, index: i64) -> Result<()> {
        let sources: Vec<String> = self.kulla.snippets().map(|s| s.source().to_string()).collect();
        let position = if index < 0 {
            sources.len() as i64 + index
        } else {
            index - 1
        };
        match usize::try_from(position).ok().and_then(|p| sources.get(p)) {
            Some(source) => self.rerun_source(source.clone()),
            None => {
                self.hard(format!("Cannot find snippet {}", position + 1));
                Ok(())
            }
        }
    }

    fn rerun_by_id(&mut self, id: &str) -> Result<bool> {
        let source = self
            .kulla
            .snippet(&SnippetId::new(id))
            .map(|s| s.source().to_string());
        match source {
            Some(source) => {
                self.rerun_source(source)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn rerun_source(&mut self, source: String) -> Result<()> {
        println!("{source}");
        // The re-run source takes the place of the command in the history.
        if !self.in_startup {
            self.history.pop();
        }
        self.process_source(&format!("{source}\n"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{COMMANDS, HELP_SUBJECTS, find_command, listing, resolve_user_path};
    use kulla_core::SnippetId;
    use std::path::PathBuf;

    fn names(found: Vec<&super::Command>) -> Vec<&'static str> {
        found.into_iter().map(|c| c.name).collect()
    }

    #[test]
    fn prefixes_select_commands() {
        assert_eq!(names(find_command("/l")), ["/list"]);
        assert_eq!(names(find_command("/dr")), ["/drop"]);
        assert_eq!(names(find_command("/cl")), ["/classes", "/classpath"]);
        assert_eq!(names(find_command("/s")), ["/save", "/setstart"]);
        assert!(find_command("/1").is_empty());
    }

    #[test]
    fn exact_names_win_over_prefixes() {
        assert_eq!(names(find_command("/!")), ["/!"]);
        assert_eq!(names(find_command("/?")), ["/?"]);
    }

    #[test]
    fn help_subjects_do_not_shadow_commands() {
        for (name, _, body) in HELP_SUBJECTS {
            assert!(find_command(&format!("/{name}")).is_empty());
            assert!(!body.is_empty());
        }
    }

    #[test]
    fn command_names_are_unique() {
        let mut seen: Vec<&str> = COMMANDS.iter().map(|c| c.name).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), COMMANDS.len());
    }

    #[test]
    fn listings_indent_continuation_lines() {
        assert_eq!(
            listing(&SnippetId::new("2"), "int f() {\n  return 1;\n}"),
            "   2 : int f() {\n         return 1;\n       }"
        );
    }

    #[test]
    fn plain_paths_are_kept() {
        assert_eq!(resolve_user_path("lib/classes"), PathBuf::from("lib/classes"));
    }
}
