use kulla_core::{Completeness, Kulla, OutputSink, Suggestion};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

fn session() -> Kulla {
    let out: OutputSink = Arc::new(Mutex::new(Vec::new()));
    Kulla::builder()
        .out(out)
        .build()
        .expect("session should start")
}

fn complete(kulla: &Kulla, code: &str) -> (Vec<Suggestion>, usize) {
    kulla
        .source_code_analysis()
        .completion_suggestions(code, code.len())
}

fn texts(suggestions: &[Suggestion]) -> Vec<&str> {
    suggestions.iter().map(|s| s.continuation.as_str()).collect()
}

#[test]
fn package_prefix_completes_subpackages() {
    let kulla = session();
    let (suggestions, anchor) = complete(&kulla, "java.u");
    assert_eq!(anchor, 5);
    assert!(texts(&suggestions).contains(&"util"));
}

#[test]
fn package_members_list_types() {
    let kulla = session();
    let (suggestions, _) = complete(&kulla, "java.util.Ar");
    assert_eq!(texts(&suggestions), ["ArrayList"]);
}

#[test]
fn declared_names_complete_with_call_shapes() {
    let mut kulla = session();
    kulla
        .eval("int volume = 3; int vol() { return 1; } int volOf(int x) { return x; }")
        .expect("eval should succeed");
    let (suggestions, anchor) = complete(&kulla, "vo");
    assert_eq!(anchor, 0);
    assert_eq!(texts(&suggestions), ["void", "vol()", "volOf(", "volume"]);
}

#[test]
fn typed_initializer_ranks_matching_values_first() {
    let mut kulla = session();
    kulla
        .eval("int count = 1; String caption = \"a\";")
        .expect("eval should succeed");
    let (suggestions, _) = complete(&kulla, "String s = c");
    assert_eq!(
        suggestions.first(),
        Some(&Suggestion {
            continuation: "caption".to_string(),
            is_smart: true
        })
    );
    let count = suggestions
        .iter()
        .find(|s| s.continuation == "count")
        .expect("count is offered");
    assert!(!count.is_smart);
}

#[test]
fn initializer_position_offers_no_primitive_types() {
    let mut kulla = session();
    kulla.eval("int index = 0;").expect("eval should succeed");
    let (suggestions, anchor) = complete(&kulla, "int x = i");
    assert_eq!(anchor, 8);
    assert!(!texts(&suggestions).contains(&"int"));
    assert!(texts(&suggestions).contains(&"index"));
}

#[test]
fn overloads_with_a_matching_one_appear_once_as_smart() {
    let mut kulla = session();
    kulla
        .eval("int size(int a) { return a; } String size(String s) { return s; }")
        .expect("eval should succeed");
    let (suggestions, _) = complete(&kulla, "String t = si");
    let sizes: Vec<&Suggestion> = suggestions
        .iter()
        .filter(|s| s.continuation == "size(")
        .collect();
    assert_eq!(
        sizes,
        [&Suggestion {
            continuation: "size(".to_string(),
            is_smart: true
        }]
    );
}

#[test]
fn members_of_a_typed_expression() {
    let mut kulla = session();
    kulla.eval("String s = \"abc\";").expect("eval should succeed");
    let (suggestions, anchor) = complete(&kulla, "s.len");
    assert_eq!(anchor, 2);
    assert_eq!(texts(&suggestions), ["length()"]);
}

#[test]
fn user_class_statics_and_instances() {
    let mut kulla = session();
    kulla
        .eval("class Box { static int made; int size; int twice() { return size * 2; } static Box of() { return new Box(); } }")
        .expect("eval should succeed");
    let (statics, _) = complete(&kulla, "Box.");
    let statics = texts(&statics);
    assert!(statics.contains(&"made"));
    assert!(statics.contains(&"of()"));
    assert!(!statics.contains(&"size"));
    let (members, _) = complete(&kulla, "Box.of().");
    let members = texts(&members);
    assert!(members.contains(&"size"));
    assert!(members.contains(&"twice()"));
}

#[test]
fn type_positions_offer_types_and_primitives() {
    let kulla = session();
    let (suggestions, _) = complete(&kulla, "new Str");
    let texts = texts(&suggestions);
    assert!(texts.contains(&"String"));
    assert!(texts.contains(&"StringBuilder"));
}

#[test]
fn documentation_lists_overloads() {
    let mut kulla = session();
    kulla
        .eval("int add(int a, int b) { return a + b; } double add(double a) { return a; }")
        .expect("eval should succeed");
    let docs = kulla
        .source_code_analysis()
        .documentation("add(1, ", 7)
        .expect("documentation should be found");
    assert_eq!(docs.lines().count(), 2);
    assert!(docs.contains("int add(int, int)"));
    assert!(docs.contains("double add(double)"));
}

#[test]
fn analyze_type_reports_qualified_types() {
    let mut kulla = session();
    kulla.eval("String s = \"abc\";").expect("eval should succeed");
    let analysis = kulla.source_code_analysis();
    assert_eq!(analysis.analyze_type("s", 1).as_deref(), Some("java.lang.String"));
    assert_eq!(analysis.analyze_type("s.length()", 10).as_deref(), Some("int"));
    assert_eq!(analysis.analyze_type("nothing", 7), None);
}

#[test]
fn completeness_of_partial_input() {
    let kulla = session();
    let analysis = kulla.source_code_analysis();
    assert_eq!(
        analysis.analyze_completion("int f() {").completeness,
        Completeness::DefinitelyIncomplete
    );
    assert_eq!(analysis.analyze_completion("").completeness, Completeness::Empty);
}

#[test]
fn qualified_names_come_from_the_class_path() {
    let dir = tempdir().expect("tempdir should work");
    fs::create_dir_all(dir.path().join("acme/tools")).expect("package dirs");
    fs::write(dir.path().join("acme/tools/Hammer.java"), "class Hammer {}").expect("write");
    let mut kulla = session();
    kulla.add_to_classpath(dir.path());

    let start = std::time::Instant::now();
    let names = loop {
        let names = kulla
            .source_code_analysis()
            .list_qualified_names("Hammer", 6);
        if names.up_to_date || start.elapsed() > Duration::from_secs(10) {
            break names;
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    assert!(names.up_to_date);
    assert_eq!(names.names, ["acme.tools.Hammer"]);
    assert_eq!(names.simple_name_length, 6);
    assert!(!names.resolvable);

    kulla.eval("import acme.tools.Hammer;").expect("import should succeed");
    let names = kulla
        .source_code_analysis()
        .list_qualified_names("Hammer", 6);
    assert!(names.resolvable);
}
