use assert_cmd::Command;
use insta::assert_snapshot;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// A `kulla` command isolated from the user's preferences and config.
fn kulla(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("kulla"));
    cmd.current_dir(dir)
        .env("KULLA_PREFS_DIR", dir.join("prefs"))
        .env_remove("KULLA_FEEDBACK")
        .env_remove("KULLA_STARTUP")
        .env_remove("KULLA_NO_STARTUP")
        .env_remove("KULLA_CLASS_PATH")
        .env_remove("KULLA_LOG");
    cmd
}

#[test]
fn eval_prints_expression_value() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .args(["eval", "1+2+3"])
        .assert()
        .success()
        .stdout(contains("Expression value is: 6"));
}

#[test]
fn no_args_enters_repl() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("/exit\n")
        .assert()
        .success()
        .stdout(contains("Welcome to kulla").and(contains("Goodbye")));
}

#[test]
fn bare_file_argument_runs_the_script() {
    let dir = tempdir().expect("tempdir should work");
    let script = dir.path().join("hello.jsh");
    fs::write(&script, "System.out.println(\"hi from script\");\n").expect("write should work");

    kulla(dir.path())
        .arg(script.to_str().expect("path utf8"))
        .assert()
        .success()
        .stdout(contains("hi from script"));
}

#[test]
fn script_session_transcript() {
    let dir = tempdir().expect("tempdir should work");
    let script = dir.path().join("session.jsh");
    fs::write(
        &script,
        "int x = 5;\nint twice() { return x * 2; }\ntwice()\n/drop x\n/vars\n",
    )
    .expect("write should work");

    let output = kulla(dir.path())
        .args(["run", script.to_str().expect("path utf8"), "--no-startup"])
        .output()
        .expect("command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_snapshot!("session_transcript", stdout);
}

#[test]
fn incomplete_input_continues_on_the_next_line() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("int f() {\n  return 4;\n}\nf()\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("   ...> ")
                .and(contains("|  Added method f()"))
                .and(contains("|  Expression value is: 4")),
        );
}

#[test]
fn redefinition_reports_the_update() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .args(["repl", "--feedback", "verbose"])
        .write_stdin("int x = 1;\nint mu() { return x * 4; }\n/drop x\n/exit\n")
        .assert()
        .success()
        .stdout(contains(
            "|    Update modified method mu() which cannot be invoked until variable x is declared",
        ));
}

#[test]
fn type_errors_show_a_caret() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("int x = \"text\";\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("|  Error:")
                .and(contains("|  int x = \"text\";"))
                .and(contains("^")),
        );
}

#[test]
fn concise_feedback_shows_name_and_value() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .args(["eval", "int x = 5;", "--feedback", "concise"])
        .assert()
        .success()
        .stdout(contains("|  x : 5").and(contains("Added").not()));
}

#[test]
fn feedback_can_come_from_the_config_file() {
    let dir = tempdir().expect("tempdir should work");
    fs::write(dir.path().join("kulla.json"), r#"{"feedback":"concise"}"#)
        .expect("write should work");
    kulla(dir.path())
        .args(["eval", "int y = 2;"])
        .assert()
        .success()
        .stdout(contains("|  y : 2"));
}

#[test]
fn list_shows_ids_and_sources() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("int x = 5;\n/list\n/exit\n")
        .assert()
        .success()
        .stdout(contains("   1 : int x = 5;").and(contains("s1 : import").not()));
}

#[test]
fn list_all_includes_startup_snippets() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("/list all\n/exit\n")
        .assert()
        .success()
        .stdout(contains("  s1 : import java.util.*;"));
}

#[test]
fn drop_reports_unknown_names() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("/drop nothing\n/exit\n")
        .assert()
        .success()
        .stdout(contains("No definition or id named nothing found."));
}

#[test]
fn unknown_and_ambiguous_commands() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("/bogus\n/s x\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("No such command or snippet id: /bogus")
                .and(contains("Command: /s is ambiguous: /save, /setstart")),
        );
}

#[test]
fn snippets_rerun_by_id_and_offset() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .args(["repl", "--no-startup"])
        .write_stdin("int n = 3;\nn * 2\n/-1\n/1\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("Expression value is: 6")
                .and(contains("assigned to temporary variable $2 of type int"))
                .and(contains("Modified variable n of type int with initial value 3")),
        );
}

#[test]
fn exit_inside_a_snippet_restarts_the_engine() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("System.exit(0);\n1 + 1\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("|  State engine terminated.")
                .and(contains("Restore definitions with: /reload restore"))
                .and(contains("Expression value is: 2")),
        );
}

#[test]
fn reload_restore_brings_back_the_previous_session() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("int x = 41;\n/exit\n")
        .assert()
        .success();

    kulla(dir.path())
        .write_stdin("/reload restore\nx + 1\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("Restarting and restoring from previous state.")
                .and(contains("-: int x = 41;"))
                .and(contains("Expression value is: 42")),
        );
}

#[test]
fn reload_replays_drops_in_order() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("int a = 1;\nint b = 2;\n/drop a\n/reload quiet\n/vars\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("Restarting and restoring state.")
                .and(contains("|    int b = 2"))
                .and(contains("int a = 1").not()),
        );
}

#[test]
fn saved_snippets_open_in_a_new_session() {
    let dir = tempdir().expect("tempdir should work");
    let saved = dir.path().join("saved.jsh");
    let saved_arg = saved.to_str().expect("path utf8");
    kulla(dir.path())
        .write_stdin(format!(
            "int base = 20;\nint plus(int v) {{ return base + v; }}\n/save {saved_arg}\n/exit\n"
        ))
        .assert()
        .success();
    let contents = fs::read_to_string(&saved).expect("saved file should exist");
    assert!(contents.contains("int plus(int v)"));

    kulla(dir.path())
        .write_stdin(format!("/open {saved_arg}\nplus(22)\n/exit\n"))
        .assert()
        .success()
        .stdout(contains("Expression value is: 42"));
}

#[test]
fn setstart_replaces_the_startup_definitions() {
    let dir = tempdir().expect("tempdir should work");
    let startup = dir.path().join("start.jsh");
    fs::write(&startup, "int base = 7;\n").expect("write should work");
    kulla(dir.path())
        .write_stdin(format!(
            "/setstart {}\n/exit\n",
            startup.to_str().expect("path utf8")
        ))
        .assert()
        .success();

    kulla(dir.path())
        .write_stdin("base\n/exit\n")
        .assert()
        .success()
        .stdout(contains("Variable base of type int has value 7"));
}

#[test]
fn startup_file_option_is_loaded() {
    let dir = tempdir().expect("tempdir should work");
    let startup = dir.path().join("start.jsh");
    fs::write(&startup, "String greet() { return \"hey\"; }\n").expect("write should work");
    kulla(dir.path())
        .args([
            "eval",
            "greet()",
            "--startup",
            startup.to_str().expect("path utf8"),
        ])
        .assert()
        .success()
        .stdout(contains("Expression value is: \"hey\""));
}

#[test]
fn help_lists_commands() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("/help\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("/list [all|start|<name or id>]")
                .and(contains("/reload [restore] [quiet]"))
                .and(contains("/classes").not()),
        );
}

#[test]
fn help_covers_subjects() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("/help\n/help intro\n/help shortcuts\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("intro     ")
                .and(contains("kulla evaluates declarations, statements, and expressions"))
                .and(contains("    re-run the n-th previous snippet")),
        );
}

#[test]
fn debug_toggles_event_output() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .write_stdin("/debug\nint x = 3;\n/debug off\nint y = 4;\n/exit\n")
        .assert()
        .success()
        .stdout(
            contains("|  Debugging on")
                .and(contains("|  event: 1 Nonexistent -> Valid signature value 3"))
                .and(contains("|  Debugging off"))
                .and(contains("event: 2").not()),
        );
}

#[test]
fn no_startup_flag_without_a_subcommand() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .arg("--no-startup")
        .write_stdin("/list all\n/exit\n")
        .assert()
        .success()
        .stdout(contains("Welcome to kulla").and(contains("s1 : import").not()));
}

#[test]
fn missing_script_fails_with_context() {
    let dir = tempdir().expect("tempdir should work");
    kulla(dir.path())
        .args(["run", "absent.jsh"])
        .assert()
        .failure()
        .stderr(contains("failed reading absent.jsh"));
}
