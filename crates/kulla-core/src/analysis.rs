//! Read-only queries over partial source: completion, documentation, the
//! type of an expression and importable qualified names.

use crate::state::{Kulla, SessionScope};
use kulla_compiler::ir::Code;
use kulla_compiler::lexer::is_ident_part;
use kulla_compiler::platform::platform_class;
use kulla_compiler::types::{OBJECT, simple_name};
use kulla_compiler::{
    CheckMode, ClassInfo, CompletionInfo, Declared, MethodInfo, Scope, Type, Unit,
    analyze_completion, check_unit, parse_snippet,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

const STATEMENT_KEYWORDS: &[&str] = &[
    "class", "do", "enum", "final", "for", "if", "import", "interface", "new", "return", "throw",
    "try", "var", "while",
];
const EXPRESSION_KEYWORDS: &[&str] = &["false", "new", "null", "true"];
const PRIMITIVES: &[&str] = &["boolean", "char", "double", "int", "long", "void"];
const TYPE_POSITION_WORDS: &[&str] = &["new", "extends", "implements", "instanceof", "throws"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    /// Text replacing the input from the anchor to the cursor.
    pub continuation: String,
    /// Matches the type expected at the cursor.
    pub is_smart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedNames {
    pub names: Vec<String>,
    /// Length of the simple name the names were found for.
    pub simple_name_length: usize,
    /// False while a class-path rescan is still pending.
    pub up_to_date: bool,
    /// The simple name already resolves in the session.
    pub resolvable: bool,
}

/// Where the cursor sits syntactically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    StatementStart,
    Type,
    Expression,
    Import,
}

struct Candidate {
    text: String,
    /// Value type, when the candidate produces one.
    ty: Option<Type>,
}

pub struct SourceCodeAnalysis<'a> {
    kulla: &'a Kulla,
}

impl<'a> SourceCodeAnalysis<'a> {
    pub(crate) fn new(kulla: &'a Kulla) -> Self {
        Self { kulla }
    }

    pub fn analyze_completion(&self, input: &str) -> CompletionInfo {
        analyze_completion(input)
    }

    /// Completions for the input at `cursor`, plus the anchor offset that
    /// continuations replace from.
    pub fn completion_suggestions(&self, code: &str, cursor: usize) -> (Vec<Suggestion>, usize) {
        let cursor = clamp(code, cursor);
        let scope = self.kulla.current_scope();
        let anchor = word_start(code, cursor);
        let word = &code[anchor..cursor];
        let before = &code[..anchor];
        let trimmed = before.trim_end();

        let (candidates, expected) = match trimmed.strip_suffix('.') {
            Some(head) => (self.member_candidates(&scope, head), None),
            None => {
                let position = position_of(trimmed);
                let expected = (position == Position::Expression)
                    .then(|| expected_type(&scope, trimmed))
                    .flatten();
                (general_candidates(&scope, position), expected)
            }
        };

        let mut smart = BTreeSet::new();
        let mut general = BTreeSet::new();
        for candidate in candidates {
            if !candidate.text.starts_with(word) {
                continue;
            }
            let is_smart = matches!((&expected, &candidate.ty), (Some(want), Some(have)) if assignable(&scope, have, want));
            if is_smart {
                smart.insert(candidate.text);
            } else {
                general.insert(candidate.text);
            }
        }
        let mut out: Vec<Suggestion> = smart
            .iter()
            .map(|text| Suggestion {
                continuation: text.clone(),
                is_smart: true,
            })
            .collect();
        out.extend(
            general
                .into_iter()
                .filter(|text| !smart.contains(text))
                .map(|continuation| Suggestion {
                    continuation,
                    is_smart: false,
                }),
        );
        (out, anchor)
    }

    fn member_candidates(&self, scope: &SessionScope, head: &str) -> Vec<Candidate> {
        let qualifier = qualifier_text(head);
        if qualifier.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        if is_dotted_name(qualifier) {
            let index = scope.index();
            if index.has_package(qualifier) {
                out.extend(index.subpackages(qualifier).map(|name| Candidate {
                    text: name.to_string(),
                    ty: None,
                }));
                out.extend(index.types_in(qualifier).map(|name| Candidate {
                    text: name.to_string(),
                    ty: None,
                }));
                return out;
            }
            if scope.var(qualifier).is_none() {
                if let Some(class) = resolve_type_name(scope, qualifier) {
                    return members(scope, &Type::Class(Arc::from(class.as_str())), true);
                }
            }
        }
        match expression_type(scope, qualifier) {
            Some(ty) => members(scope, &ty, false),
            None => Vec::new(),
        }
    }

    /// Signatures of the methods whose call encloses the cursor.
    pub fn documentation(&self, code: &str, cursor: usize) -> Option<String> {
        let cursor = clamp(code, cursor);
        let scope = self.kulla.current_scope();
        let before = &code[..cursor];
        let methods = match open_call(before) {
            Some(open) => self.callees(&scope, &before[..open]),
            None => {
                let end = word_end(code, cursor);
                let start = word_start(code, cursor);
                self.callees(&scope, &code[..end.max(start)])
            }
        };
        let lines: Vec<String> = methods.iter().map(MethodInfo::signature_line).collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }

    /// Methods named by the identifier that ends `head`.
    fn callees(&self, scope: &SessionScope, head: &str) -> Vec<MethodInfo> {
        let head = head.trim_end();
        let start = word_start(head, head.len());
        let name = &head[start..];
        if name.is_empty() {
            return Vec::new();
        }
        let rest = head[..start].trim_end();
        if ends_with_word(rest, "new") {
            return resolve_type_name(scope, name)
                .and_then(|class| class_info(scope, &class))
                .map(|info| info.constructors.clone())
                .unwrap_or_default();
        }
        if let Some(qualified) = rest.strip_suffix('.') {
            let qualifier = qualifier_text(qualified);
            let (ty, statics) = match resolve_type_name(scope, qualifier) {
                Some(class) if scope.var(qualifier).is_none() => (Type::class(&class), true),
                _ => match expression_type(scope, qualifier) {
                    Some(ty) => (ty, false),
                    None => return Vec::new(),
                },
            };
            return class_chain(scope, &ty)
                .iter()
                .flat_map(|info| info.methods_named(name).cloned().collect::<Vec<_>>())
                .filter(|m| !statics || m.is_static)
                .collect();
        }
        scope.methods(name)
    }

    /// Static type of the expression that ends at `cursor`, fully qualified.
    pub fn analyze_type(&self, code: &str, cursor: usize) -> Option<String> {
        let cursor = clamp(code, cursor);
        let scope = self.kulla.current_scope();
        expression_type(&scope, &code[..cursor]).map(|ty| ty.qualified())
    }

    /// Importable types whose simple name is the identifier at `cursor`.
    pub fn list_qualified_names(&self, code: &str, cursor: usize) -> QualifiedNames {
        let cursor = clamp(code, cursor);
        let scope = self.kulla.current_scope();
        let start = word_start(code, cursor);
        let end = word_end(code, cursor);
        let simple = &code[start..end];
        let mut names = if simple.is_empty() {
            Vec::new()
        } else {
            scope.index().types_named(simple)
        };
        names.sort();
        QualifiedNames {
            resolvable: !simple.is_empty() && resolve_type_name(&scope, simple).is_some(),
            names,
            simple_name_length: simple.len(),
            up_to_date: self.kulla.index_up_to_date(),
        }
    }
}

fn clamp(code: &str, cursor: usize) -> usize {
    let mut cursor = cursor.min(code.len());
    while !code.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}

fn word_start(code: &str, cursor: usize) -> usize {
    code[..cursor]
        .char_indices()
        .rev()
        .take_while(|(_, ch)| is_ident_part(*ch))
        .last()
        .map_or(cursor, |(idx, _)| idx)
}

fn word_end(code: &str, cursor: usize) -> usize {
    code[cursor..]
        .char_indices()
        .find(|(_, ch)| !is_ident_part(*ch))
        .map_or(code.len(), |(idx, _)| cursor + idx)
}

fn ends_with_word(text: &str, word: &str) -> bool {
    text.strip_suffix(word)
        .is_some_and(|rest| !rest.chars().next_back().is_some_and(is_ident_part))
}

fn is_dotted_name(text: &str) -> bool {
    !text.is_empty()
        && text
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(is_ident_part))
}

/// The expression that ends `head`: names, member accesses, calls,
/// indexing and string literals.
fn qualifier_text(head: &str) -> &str {
    let head = head.trim_end();
    let bytes: Vec<(usize, char)> = head.char_indices().collect();
    let mut i = bytes.len();
    let mut depth = 0usize;
    while i > 0 {
        let (_, ch) = bytes[i - 1];
        match ch {
            ')' | ']' => depth += 1,
            '(' | '[' if depth > 0 => depth -= 1,
            '(' | '[' => break,
            '"' => {
                // Skip back over the string literal.
                i -= 1;
                while i > 0 && !(bytes[i - 1].1 == '"' && (i < 2 || bytes[i - 2].1 != '\\')) {
                    i -= 1;
                }
                if i == 0 {
                    return "";
                }
            }
            _ if depth > 0 => {}
            c if is_ident_part(c) || c == '.' => {}
            _ => break,
        }
        i -= 1;
    }
    let start = bytes.get(i).map_or(head.len(), |(idx, _)| *idx);
    let mut text = &head[start..];
    // Keep `new` in front of a constructor call.
    let rest = head[..start].trim_end();
    if ends_with_word(rest, "new") && text.ends_with(')') {
        let new_start = rest.len() - "new".len();
        text = &head[new_start..];
    }
    text
}

fn position_of(before: &str) -> Position {
    let last_word_start = word_start(before, before.len());
    let last_word = &before[last_word_start..];
    if last_word == "import" || (last_word == "static" && before[..last_word_start].trim_end().ends_with("import")) {
        return Position::Import;
    }
    if TYPE_POSITION_WORDS.contains(&last_word) {
        return Position::Type;
    }
    match before.chars().next_back() {
        None | Some(';') | Some('{') | Some('}') => Position::StatementStart,
        Some('(') if before[..before.len() - 1].trim_end().ends_with("for") => {
            Position::StatementStart
        }
        _ => Position::Expression,
    }
}

fn general_candidates(scope: &SessionScope, position: Position) -> Vec<Candidate> {
    let mut out = Vec::new();
    if position == Position::Import {
        out.extend(scope.index().subpackages("").map(|name| Candidate {
            text: name.to_string(),
            ty: None,
        }));
        out.push(Candidate {
            text: "static".to_string(),
            ty: None,
        });
        return out;
    }
    if position != Position::Type {
        for (name, ty) in scope.vars() {
            out.push(Candidate {
                text: name.to_string(),
                ty: Some(ty.clone()),
            });
        }
        for method in scope.all_methods() {
            out.push(Candidate {
                text: call_text(method),
                ty: Some(method.ret.clone()),
            });
        }
    }
    for name in type_names(scope) {
        out.push(Candidate { text: name, ty: None });
    }
    let keywords: &[&str] = match position {
        Position::StatementStart => STATEMENT_KEYWORDS,
        Position::Expression => EXPRESSION_KEYWORDS,
        Position::Type | Position::Import => &[],
    };
    let primitives: &[&str] = match position {
        Position::StatementStart | Position::Type => PRIMITIVES,
        Position::Expression | Position::Import => &[],
    };
    for word in keywords.iter().chain(primitives) {
        let ty = match *word {
            "true" | "false" => Some(Type::Boolean),
            _ => None,
        };
        out.push(Candidate {
            text: word.to_string(),
            ty,
        });
    }
    out
}

fn call_text(method: &MethodInfo) -> String {
    if method.params.is_empty() {
        format!("{}()", method.name)
    } else {
        format!("{}(", method.name)
    }
}

/// Simple type names usable without qualification.
fn type_names(scope: &SessionScope) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = scope.type_names().map(str::to_string).collect();
    out.extend(scope.index().types_in("java.lang").map(str::to_string));
    for import in scope.imports() {
        if import.is_static {
            continue;
        }
        if import.on_demand {
            out.extend(scope.index().types_in(&import.target).map(str::to_string));
        } else {
            out.insert(simple_name(&import.target).to_string());
        }
    }
    out
}

fn members(scope: &SessionScope, ty: &Type, statics: bool) -> Vec<Candidate> {
    let mut out = Vec::new();
    if let Type::Array(_) = ty {
        out.push(Candidate {
            text: "length".to_string(),
            ty: Some(Type::Int),
        });
    }
    let mut seen = HashSet::new();
    for info in class_chain(scope, ty) {
        if statics {
            for constant in &info.enum_constants {
                if seen.insert(constant.clone()) {
                    out.push(Candidate {
                        text: constant.clone(),
                        ty: Some(info.as_type()),
                    });
                }
            }
        }
        for field in info.fields.iter().filter(|f| f.is_static == statics) {
            if seen.insert(field.name.clone()) {
                out.push(Candidate {
                    text: field.name.clone(),
                    ty: Some(field.ty.clone()),
                });
            }
        }
        for method in info.methods.iter().filter(|m| m.is_static == statics) {
            let text = call_text(method);
            if seen.insert(text.clone()) {
                out.push(Candidate {
                    text,
                    ty: Some(method.ret.clone()),
                });
            }
        }
    }
    out
}

fn class_info(scope: &SessionScope, name: &str) -> Option<Arc<ClassInfo>> {
    if name.contains('.') {
        platform_class(name)
    } else {
        scope.user_type(name).map(|user| user.info)
    }
}

/// The class of `ty` and all its supertypes, most derived first.
fn class_chain(scope: &SessionScope, ty: &Type) -> Vec<Arc<ClassInfo>> {
    let start = match ty {
        Type::Class(name) => name.to_string(),
        Type::Array(_) => OBJECT.to_string(),
        other => match other.boxed() {
            Some(boxed) => boxed.to_string(),
            None => return Vec::new(),
        },
    };
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = vec![start];
    while !queue.is_empty() {
        let name = queue.remove(0);
        if !seen.insert(name.clone()) {
            continue;
        }
        let Some(info) = class_info(scope, &name) else {
            continue;
        };
        queue.extend(info.superclass.iter().map(|s| s.to_string()));
        queue.extend(info.interfaces.iter().map(|s| s.to_string()));
        out.push(info);
    }
    if !seen.contains(OBJECT) {
        out.extend(platform_class(OBJECT));
    }
    out
}

/// Resolves a type name the way a snippet would, returning the name stored
/// in [`Type::Class`].
fn resolve_type_name(scope: &SessionScope, name: &str) -> Option<String> {
    if name.contains('.') {
        let known = platform_class(name).is_some() || scope.index().has_external_type(name);
        return known.then(|| name.to_string());
    }
    if scope.user_type(name).is_some() {
        return Some(name.to_string());
    }
    let imports = scope.imports();
    for import in imports.iter().filter(|i| !i.is_static && !i.on_demand) {
        if simple_name(&import.target) == name {
            return Some(import.target.clone());
        }
    }
    let lang = format!("java.lang.{name}");
    if platform_class(&lang).is_some() {
        return Some(lang);
    }
    imports
        .iter()
        .filter(|i| !i.is_static && i.on_demand)
        .map(|i| format!("{}.{name}", i.target))
        .find(|qualified| platform_class(qualified).is_some() || scope.index().has_external_type(qualified))
}

/// Type of an expression, if it checks without errors.
fn expression_type(scope: &SessionScope, text: &str) -> Option<Type> {
    let text = text.trim().trim_end_matches(';').trim_end();
    if text.is_empty() {
        return None;
    }
    let unit = parse_snippet(&format!("{text};")).ok()?.into_iter().next()?;
    if !matches!(unit.unit, Unit::Expression(_)) {
        return None;
    }
    let analysis = check_unit(&unit, scope, CheckMode::Fresh, "0");
    if !analysis.error_diags().is_empty() {
        return None;
    }
    match analysis.code {
        Code::Expr { ty, .. } => Some(ty),
        _ => None,
    }
}

/// Type wanted at the end of `before`: an initializer, the right side of
/// an assignment, or an argument of an unambiguous call.
fn expected_type(scope: &SessionScope, before: &str) -> Option<Type> {
    let statement_start = before
        .rfind([';', '{', '}'])
        .map_or(0, |idx| idx + 1);
    let statement = before[statement_start..].trim();
    if let Some(lhs) = statement.strip_suffix('=') {
        if lhs.ends_with(['=', '!', '<', '>']) {
            return None;
        }
        let lhs = lhs.trim();
        if lhs.chars().all(is_ident_part) {
            return scope.var(lhs);
        }
        let unit = parse_snippet(&format!("{lhs};")).ok()?.into_iter().next()?;
        if !matches!(unit.unit, Unit::Var(_)) {
            return None;
        }
        return match check_unit(&unit, scope, CheckMode::Recheck, "0").declared {
            Declared::Var { ty, .. } if !ty.is_error() => Some(ty),
            _ => None,
        };
    }
    let open = open_call(before)?;
    let callee = before[..open].trim_end();
    let name_start = word_start(callee, callee.len());
    let name = &callee[name_start..];
    if name.is_empty() || callee[..name_start].trim_end().ends_with('.') {
        return None;
    }
    let arg = top_level_commas(&before[open + 1..]);
    let methods: Vec<MethodInfo> = scope
        .methods(name)
        .into_iter()
        .filter(|m| m.params.len() > arg)
        .collect();
    match methods.as_slice() {
        [only] => only.params.get(arg).cloned(),
        _ => None,
    }
}

/// Offset of the innermost `(` still open at the end of `text`.
fn open_call(text: &str) -> Option<usize> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' => stack.push(idx),
            ')' => {
                stack.pop();
            }
            _ => {}
        }
    }
    stack.pop()
}

fn top_level_commas(args: &str) -> usize {
    let mut depth = 0usize;
    let mut count = 0;
    for ch in args.chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => count += 1,
            _ => {}
        }
    }
    count
}

/// Assignment compatibility of values for smart completion.
fn assignable(scope: &SessionScope, from: &Type, to: &Type) -> bool {
    if from == to {
        return true;
    }
    if let (Some(a), Some(b)) = (from.numeric_rank(), to.numeric_rank()) {
        return to != &Type::Char && a <= b;
    }
    if to.unboxed().as_ref() == Some(from) || from.unboxed().as_ref() == Some(to) {
        return true;
    }
    match to {
        Type::Class(name) if &**name == OBJECT => !matches!(from, Type::Void),
        Type::Class(name) if from.is_reference() => class_chain(scope, from)
            .iter()
            .any(|info| info.name == *name),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Position, clamp, is_dotted_name, open_call, position_of, qualifier_text, top_level_commas,
        word_start,
    };

    #[test]
    fn qualifiers_cover_calls_and_literals() {
        assert_eq!(qualifier_text("java"), "java");
        assert_eq!(qualifier_text("x = s.trim()"), "s.trim()");
        assert_eq!(qualifier_text("\"abc\""), "\"abc\"");
        assert_eq!(qualifier_text("a[0]"), "a[0]");
        assert_eq!(qualifier_text("foo(new A()"), "new A()");
    }

    #[test]
    fn positions_follow_the_preceding_text() {
        assert_eq!(position_of(""), Position::StatementStart);
        assert_eq!(position_of("int x = 1;"), Position::StatementStart);
        assert_eq!(position_of("int x ="), Position::Expression);
        assert_eq!(position_of("new"), Position::Type);
        assert_eq!(position_of("class B extends"), Position::Type);
        assert_eq!(position_of("import"), Position::Import);
    }

    #[test]
    fn calls_and_arguments() {
        assert_eq!(open_call("f(1, g(2), "), Some(1));
        assert_eq!(open_call("f(\"(\")"), None);
        assert_eq!(top_level_commas("1, g(2, 3), "), 2);
    }

    #[test]
    fn words_and_names() {
        assert_eq!(word_start("int va", 6), 4);
        assert!(is_dotted_name("java.util"));
        assert!(!is_dotted_name("s.trim()"));
        assert_eq!(clamp("é", 1), 0);
    }
}
