use kulla_core::{ExceptionInfo, Kulla, KullaError, OutputSink, SnippetEvent, SnippetId, Status};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn session() -> (Kulla, Arc<Mutex<Vec<u8>>>) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink: OutputSink = out.clone();
    let kulla = Kulla::builder()
        .out(sink)
        .build()
        .expect("session should start");
    (kulla, out)
}

fn eval(kulla: &mut Kulla, source: &str) -> Vec<SnippetEvent> {
    kulla.eval(source).expect("eval should succeed")
}

fn id(text: &str) -> SnippetId {
    SnippetId::new(text)
}

/// Compact event form: `id prev->status [sig] cause`.
fn describe(events: &[SnippetEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| {
            format!(
                "{} {:?}->{:?}{}{}",
                e.snippet,
                e.previous_status,
                e.status,
                if e.is_signature_change { " sig" } else { "" },
                e.cause_snippet
                    .as_ref()
                    .map(|c| format!(" by {c}"))
                    .unwrap_or_default()
            )
        })
        .collect()
}

/// Like [`describe`] without the signature flag.
fn transitions(events: &[SnippetEvent]) -> Vec<String> {
    describe(events)
        .into_iter()
        .map(|line| line.replace(" sig", ""))
        .collect()
}

#[test]
fn variable_reports_its_value() {
    let (mut kulla, _) = session();
    let events = eval(&mut kulla, "int x = 5;");
    assert_eq!(describe(&events), ["1 Nonexistent->Valid sig"]);
    assert_eq!(events[0].value.as_deref(), Some("5"));
    assert_eq!(kulla.var_value(&id("1")).expect("lookup"), Some("5".to_string()));
}

#[test]
fn dropping_a_used_variable_changes_only_the_method() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "int x;");
    eval(&mut kulla, "int mu() { return x * 4; }");
    let events = kulla.drop(&id("1")).expect("drop should succeed");
    assert_eq!(
        describe(&events),
        ["1 Valid->Dropped sig", "2 Valid->RecoverableDefined by 1"]
    );
    assert_eq!(
        kulla.unresolved_dependencies(&id("2")).expect("lookup"),
        ["variable x"]
    );
}

#[test]
fn redeclaring_a_dropped_name_restores_dependents_and_identity() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "int x = 1;");
    eval(&mut kulla, "int mu() { return x * 4; }");
    kulla.drop(&id("1")).expect("drop should succeed");
    let events = eval(&mut kulla, "int x = 2;");
    assert_eq!(
        describe(&events),
        ["3 Nonexistent->Valid sig", "2 RecoverableDefined->Valid by 3"]
    );
    let dropped = kulla.snippet(&id("1")).expect("dropped snippet is kept");
    let again = kulla.snippet(&id("3")).expect("new snippet");
    assert_eq!(dropped.key(), again.key());
    assert_eq!(eval(&mut kulla, "mu()")[0].value.as_deref(), Some("8"));
}

#[test]
fn same_signature_keeps_identity() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "int f() { return 1; }");
    let events = eval(&mut kulla, "int f() { return 2; }");
    assert_eq!(
        describe(&events),
        ["2 Valid->Valid", "1 Valid->Overwritten by 2"]
    );
    let first = kulla.snippet(&id("1")).expect("first");
    let second = kulla.snippet(&id("2")).expect("second");
    assert_eq!(first.key(), second.key());
    assert_eq!(eval(&mut kulla, "f()")[0].value.as_deref(), Some("2"));
}

#[test]
fn different_signature_replaces_the_declaration() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "int x = 1;");
    let events = eval(&mut kulla, "long x = 2;");
    assert_eq!(
        describe(&events),
        ["2 Valid->Valid sig", "1 Valid->Overwritten by 2"]
    );
    let first = kulla.snippet(&id("1")).expect("first");
    let second = kulla.snippet(&id("2")).expect("second");
    assert_ne!(first.key(), second.key());
    assert_eq!(kulla.vars().len(), 1);
}

#[test]
fn dropping_a_base_class_cascades_to_every_subclass() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "class A {}");
    eval(&mut kulla, "class B1 extends A {}");
    eval(&mut kulla, "class B2 extends A {}");
    eval(&mut kulla, "class B3 extends A {}");
    let events = kulla.drop(&id("1")).expect("drop should succeed");
    assert_eq!(
        transitions(&events),
        [
            "1 Valid->Dropped",
            "2 Valid->RecoverableNotDefined by 1",
            "3 Valid->RecoverableNotDefined by 1",
            "4 Valid->RecoverableNotDefined by 1",
        ]
    );
}

#[test]
fn dropping_the_root_of_a_chain_reaches_the_end_in_one_batch() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "class A {}");
    eval(&mut kulla, "class B extends A {}");
    eval(&mut kulla, "class C extends B {}");
    let events = kulla.drop(&id("1")).expect("drop should succeed");
    assert_eq!(
        transitions(&events),
        [
            "1 Valid->Dropped",
            "2 Valid->RecoverableNotDefined by 1",
            "3 Valid->RecoverableNotDefined by 1",
        ]
    );
}

#[test]
fn forward_references_resolve_later() {
    let (mut kulla, _) = session();
    let events = eval(&mut kulla, "int twice() { return g() * 2; }");
    assert_eq!(describe(&events), ["1 Nonexistent->RecoverableDefined sig"]);
    let events = eval(&mut kulla, "int g() { return 21; }");
    assert_eq!(
        describe(&events),
        ["2 Nonexistent->Valid sig", "1 RecoverableDefined->Valid by 2"]
    );
    assert_eq!(eval(&mut kulla, "twice()")[0].value.as_deref(), Some("42"));
}

#[test]
fn calling_a_method_with_missing_dependencies_is_unresolved() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "int twice() { return g() * 2; }");
    let events = eval(&mut kulla, "twice();");
    assert_eq!(
        events[0].exception,
        Some(ExceptionInfo::Unresolved {
            snippet: "1".to_string()
        })
    );
}

#[test]
fn mutually_referencing_classes_become_valid_together() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "class P { Q q; }");
    assert_eq!(
        kulla.status(&id("1")).expect("lookup"),
        Status::RecoverableNotDefined
    );
    eval(&mut kulla, "class Q { P p; }");
    assert_eq!(kulla.status(&id("1")).expect("lookup"), Status::Valid);
    assert_eq!(kulla.status(&id("2")).expect("lookup"), Status::Valid);
}

#[test]
fn errors_reject_with_diagnostics() {
    let (mut kulla, _) = session();
    let events = eval(&mut kulla, "int x = \"text\";");
    assert_eq!(describe(&events), ["e1 Nonexistent->Rejected"]);
    assert!(!kulla.diagnostics(&id("e1")).expect("lookup").is_empty());
    assert!(kulla.vars().is_empty());
    let events = eval(&mut kulla, "int x = 3;");
    assert_eq!(describe(&events), ["1 Rejected->Valid sig"]);
}

#[test]
fn expressions_become_temporary_variables() {
    let (mut kulla, _) = session();
    let events = eval(&mut kulla, "2 + 3");
    assert_eq!(describe(&events), ["1 Nonexistent->Valid sig"]);
    assert_eq!(events[0].value.as_deref(), Some("5"));
    let names: Vec<String> = kulla.vars().iter().filter_map(|s| s.name()).collect();
    assert_eq!(names, ["$1"]);
    assert_eq!(eval(&mut kulla, "$1 * 2")[0].value.as_deref(), Some("10"));
}

#[test]
fn statements_write_to_the_output_sink() {
    let (mut kulla, out) = session();
    eval(&mut kulla, "System.out.println(\"hello\");");
    let written = String::from_utf8(out.lock().expect("lock").clone()).expect("utf8");
    assert_eq!(written, "hello\n");
}

#[test]
fn several_snippets_in_one_input() {
    let (mut kulla, _) = session();
    let events = eval(&mut kulla, "int a = 1; int b = a + 1;");
    assert_eq!(
        describe(&events),
        ["1 Nonexistent->Valid sig", "2 Nonexistent->Valid sig"]
    );
    assert_eq!(events[1].value.as_deref(), Some("2"));
}

#[test]
fn runtime_exceptions_carry_snippet_frames() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "int boom() { return 1 / 0; }");
    let events = eval(&mut kulla, "boom()");
    match &events[0].exception {
        Some(ExceptionInfo::Eval {
            class_name, stack, ..
        }) => {
            assert_eq!(class_name, "java.lang.ArithmeticException");
            assert!(stack.iter().any(|frame| frame.snippet_id == "1"));
        }
        other => panic!("expected an exception, got {other:?}"),
    }
}

#[test]
fn startup_snippets_use_their_own_ids() {
    let (mut kulla, _) = session();
    let events = kulla
        .eval_startup("import java.util.*;")
        .expect("startup should succeed");
    assert_eq!(events[0].snippet, id("s1"));
    assert!(kulla.snippet(&id("s1")).expect("startup").is_startup());
    assert_eq!(eval(&mut kulla, "int x = 1;")[0].snippet, id("1"));
}

#[test]
fn stop_interrupts_a_running_snippet() {
    let (mut kulla, _) = session();
    let handle = kulla.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.stop();
    });
    let events = eval(&mut kulla, "while (true) { Thread.sleep(10); }");
    stopper.join().expect("stopper thread");
    assert_eq!(events[0].exception, Some(ExceptionInfo::Stopped));
    assert_eq!(eval(&mut kulla, "1 + 1")[0].value.as_deref(), Some("2"));
}

#[test]
fn exit_closes_the_session() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "System.exit(0);");
    assert!(kulla.is_closed());
    assert!(matches!(kulla.eval("1"), Err(KullaError::Closed)));
}

#[test]
fn only_live_declarations_drop() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "1 + 1;");
    eval(&mut kulla, "int x = 1;");
    kulla.drop(&id("2")).expect("first drop");
    assert!(matches!(
        kulla.drop(&id("2")),
        Err(KullaError::NotDroppable(_))
    ));
    assert!(matches!(
        kulla.drop(&id("9")),
        Err(KullaError::UnknownSnippet(_))
    ));
}

#[test]
fn reading_a_variable_names_it() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "int x = 5;");
    let events = eval(&mut kulla, "x");
    let read = kulla.snippet(&events[0].snippet).expect("snippet");
    assert_eq!(read.sub_kind(), kulla_core::SubKind::VarValue);
    assert_eq!(read.name().as_deref(), Some("x"));
    assert_eq!(events[0].value.as_deref(), Some("5"));
}

#[test]
fn dropping_an_import_cascades() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "import java.util.ArrayList;");
    eval(&mut kulla, "ArrayList list = new ArrayList();");
    let events = kulla.drop(&id("1")).expect("drop should succeed");
    assert_eq!(
        transitions(&events),
        ["1 Valid->Dropped", "2 Valid->RecoverableNotDefined by 1"]
    );
    assert_eq!(
        kulla.unresolved_dependencies(&id("2")).expect("lookup"),
        ["class ArrayList"]
    );
}

#[test]
fn dropping_a_static_import_cascades() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "import static java.lang.Math.PI;");
    eval(&mut kulla, "double area(double r) { return PI * r * r; }");
    let events = kulla.drop(&id("1")).expect("drop should succeed");
    assert_eq!(
        transitions(&events),
        ["1 Valid->Dropped", "2 Valid->RecoverableDefined by 1"]
    );
    assert_eq!(
        kulla.unresolved_dependencies(&id("2")).expect("lookup"),
        ["variable PI"]
    );
}

#[test]
fn redefining_a_class_resets_variables_of_that_type() {
    let (mut kulla, _) = session();
    eval(&mut kulla, "class A {}");
    eval(&mut kulla, "A a = new A();");
    let events = eval(&mut kulla, "class A { int f; }");
    let var = events
        .iter()
        .find(|e| e.snippet == id("2"))
        .expect("the variable should be reported");
    assert_eq!(describe(std::slice::from_ref(var)), ["2 Valid->Valid sig by 3"]);
    assert_eq!(var.value.as_deref(), Some("null"));
    assert_eq!(kulla.var_value(&id("2")).expect("lookup"), Some("null".to_string()));
}
