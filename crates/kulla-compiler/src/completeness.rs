//! Decides whether typed input forms a complete snippet, and where the first
//! snippet ends. This works on raw text so that partial input never errors.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completeness {
    /// Ends with a terminator; `source` is the snippet as typed.
    Complete,
    /// Complete once a semicolon is appended, which `source` already has.
    CompleteWithSemi,
    /// Cannot be complete without more input.
    DefinitelyIncomplete,
    /// Could be completed with a semicolon but that is rarely meant,
    /// e.g. `while (busy)` waiting for a body.
    ConsideredIncomplete,
    /// Only whitespace and comments.
    Empty,
    /// Malformed in a way that more input will not fix.
    Unknown,
}

impl Completeness {
    pub fn is_complete(self) -> bool {
        matches!(self, Completeness::Complete | Completeness::CompleteWithSemi)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionInfo {
    pub completeness: Completeness,
    /// First snippet of the input; empty when the input is incomplete.
    pub source: String,
    /// Input after `source`.
    pub remaining: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Sig {
    Word(String),
    Sym(char),
    Close(char),
    Literal,
}

struct OpenBrace {
    ch: char,
    block_like: bool,
}

const DANGLING_WORDS: &[&str] = &[
    "new",
    "class",
    "interface",
    "enum",
    "extends",
    "implements",
    "import",
    "throws",
    "instanceof",
    "throw",
    "try",
    "catch",
    "finally",
    "static",
    "final",
    "public",
    "private",
    "protected",
    "abstract",
];

const NOT_A_TYPE_HEAD: &[&str] = &["new", "return", "throw", "else", "do", "case"];

pub fn analyze_completion(input: &str) -> CompletionInfo {
    Scanner::new(input).run()
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    stack: Vec<OpenBrace>,
    first_word: Option<String>,
    last: Option<Sig>,
    /// Depth-0 words seen back to back right before the first depth-0 `(`.
    head_words: usize,
    run_words: usize,
    first_paren_seen: bool,
    saw_throws: bool,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            stack: Vec::new(),
            first_word: None,
            last: None,
            head_words: 0,
            run_words: 0,
            first_paren_seen: false,
            saw_throws: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn result(&self, completeness: Completeness) -> CompletionInfo {
        match completeness {
            Completeness::Complete => CompletionInfo {
                completeness,
                source: self.src[..self.pos].trim_start().to_string(),
                remaining: self.src[self.pos..].to_string(),
            },
            Completeness::CompleteWithSemi => CompletionInfo {
                completeness,
                source: format!("{};", self.src.trim()),
                remaining: String::new(),
            },
            Completeness::Unknown => CompletionInfo {
                completeness,
                source: self.src.trim().to_string(),
                remaining: String::new(),
            },
            Completeness::Empty
            | Completeness::DefinitelyIncomplete
            | Completeness::ConsideredIncomplete => CompletionInfo {
                completeness,
                source: String::new(),
                remaining: self.src.to_string(),
            },
        }
    }

    fn note(&mut self, sig: Sig) {
        if self.stack.is_empty() {
            match &sig {
                Sig::Word(word) => {
                    if self.first_word.is_none() {
                        self.first_word = Some(word.clone());
                    }
                    if word == "throws" {
                        self.saw_throws = true;
                    }
                    self.run_words += 1;
                }
                Sig::Close(']') => {}
                _ => self.run_words = 0,
            }
        } else if self.first_word.is_none() {
            self.first_word = Some(String::new());
        }
        self.last = Some(sig);
    }

    /// Skips whitespace and comments. `None` means an unclosed block comment.
    fn skip_trivia(&mut self) -> Option<()> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.pos += 2;
                    let end = self.src[self.pos..].find("*/")?;
                    self.pos += end + 2;
                }
                _ => return Some(()),
            }
        }
    }

    fn next_word(&mut self) -> Option<String> {
        let save = self.pos;
        self.skip_trivia();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            self.bump();
        }
        let word = self.src[start..self.pos].to_string();
        self.pos = save;
        (!word.is_empty()).then_some(word)
    }

    fn run(mut self) -> CompletionInfo {
        loop {
            if self.skip_trivia().is_none() {
                return self.result(Completeness::DefinitelyIncomplete);
            }
            let Some(ch) = self.peek() else {
                return self.at_end();
            };
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                let start = self.pos;
                let numeric = ch.is_ascii_digit();
                while self.peek().is_some_and(|c| {
                    c.is_alphanumeric() || c == '_' || c == '$' || (numeric && c == '.')
                }) {
                    self.bump();
                }
                if numeric {
                    self.note(Sig::Literal);
                } else {
                    let word = self.src[start..self.pos].to_string();
                    self.note(Sig::Word(word));
                }
                continue;
            }
            if ch == '"' || ch == '\'' {
                self.bump();
                loop {
                    match self.bump() {
                        None | Some('\n') => return self.result(Completeness::Unknown),
                        Some('\\') => {
                            self.bump();
                        }
                        Some(c) if c == ch => break,
                        Some(_) => {}
                    }
                }
                self.note(Sig::Literal);
                continue;
            }
            self.bump();
            match ch {
                '(' | '[' | '{' => {
                    if self.stack.is_empty() && ch == '(' && !self.first_paren_seen {
                        self.first_paren_seen = true;
                        self.head_words = self.run_words;
                    }
                    let block_like = ch == '{'
                        && match &self.last {
                            None => true,
                            Some(Sig::Close(')')) | Some(Sig::Word(_)) => true,
                            _ => false,
                        };
                    if self.stack.is_empty() && self.first_word.is_none() {
                        self.first_word = Some(String::new());
                    }
                    self.stack.push(OpenBrace { ch, block_like });
                    self.last = Some(Sig::Sym(ch));
                    if ch != '[' {
                        self.run_words = 0;
                    }
                }
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    let Some(open) = self.stack.pop() else {
                        return self.result(Completeness::Unknown);
                    };
                    if open.ch != expected {
                        return self.result(Completeness::Unknown);
                    }
                    self.note(Sig::Close(ch));
                    if ch == '}' && self.stack.is_empty() && open.block_like {
                        let continues = matches!(
                            self.next_word().as_deref(),
                            Some("else") | Some("catch") | Some("finally") | Some("while")
                        ) || self.first_word.as_deref() == Some("do");
                        if !continues {
                            return self.result(Completeness::Complete);
                        }
                    }
                }
                ';' if self.stack.is_empty() => {
                    return self.result(Completeness::Complete);
                }
                other => self.note(Sig::Sym(other)),
            }
        }
    }

    fn at_end(&self) -> CompletionInfo {
        if !self.stack.is_empty() {
            return self.result(Completeness::DefinitelyIncomplete);
        }
        let Some(last) = &self.last else {
            return self.result(Completeness::Empty);
        };
        let first = self.first_word.as_deref().unwrap_or("");
        match last {
            Sig::Sym('+') | Sig::Sym('-') => {
                let tail = self.src.trim_end();
                let doubled = tail.ends_with("++") || tail.ends_with("--");
                if !doubled {
                    return self.result(Completeness::DefinitelyIncomplete);
                }
            }
            Sig::Sym(_) => return self.result(Completeness::DefinitelyIncomplete),
            Sig::Word(word) => {
                if DANGLING_WORDS.contains(&word.as_str()) {
                    return self.result(Completeness::DefinitelyIncomplete);
                }
                if word == "else" || word == "do" {
                    return self.result(Completeness::ConsideredIncomplete);
                }
            }
            Sig::Close(')') => {
                if matches!(first, "if" | "while" | "for") {
                    return self.result(Completeness::ConsideredIncomplete);
                }
            }
            _ => {}
        }
        if matches!(first, "class" | "interface" | "enum")
            || self.source_declares_type()
            || self.saw_throws
        {
            return self.result(Completeness::DefinitelyIncomplete);
        }
        let method_header = matches!(last, Sig::Close(')'))
            && self.head_words >= 2
            && !NOT_A_TYPE_HEAD.contains(&first);
        if method_header {
            return self.result(Completeness::DefinitelyIncomplete);
        }
        self.result(Completeness::CompleteWithSemi)
    }

    fn source_declares_type(&self) -> bool {
        let mut words = self
            .src
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .filter(|w| !w.is_empty());
        loop {
            match words.next() {
                Some("public" | "private" | "protected" | "static" | "final" | "abstract") => {}
                Some("class" | "interface" | "enum") => return true,
                _ => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Completeness, analyze_completion};

    fn completeness(input: &str) -> Completeness {
        analyze_completion(input).completeness
    }

    #[test]
    fn terminated_statements_are_complete() {
        let info = analyze_completion("int x = 5;");
        assert_eq!(info.completeness, Completeness::Complete);
        assert_eq!(info.source, "int x = 5;");
        assert_eq!(info.remaining, "");
    }

    #[test]
    fn missing_semicolon_is_added() {
        let info = analyze_completion("int x = 5");
        assert_eq!(info.completeness, Completeness::CompleteWithSemi);
        assert_eq!(info.source, "int x = 5;");
        assert_eq!(completeness("x++"), Completeness::CompleteWithSemi);
        assert_eq!(completeness("int[] a = {1, 2}"), Completeness::CompleteWithSemi);
    }

    #[test]
    fn splits_first_snippet_from_rest() {
        let info = analyze_completion("class A {} int y;");
        assert_eq!(info.completeness, Completeness::Complete);
        assert_eq!(info.source, "class A {}");
        assert_eq!(info.remaining, " int y;");

        let info = analyze_completion("if (a) { f(); } else { g(); } h();");
        assert_eq!(info.source, "if (a) { f(); } else { g(); }");
    }

    #[test]
    fn open_constructs_need_more_input() {
        assert_eq!(completeness("int f() {"), Completeness::DefinitelyIncomplete);
        assert_eq!(completeness("int x ="), Completeness::DefinitelyIncomplete);
        assert_eq!(completeness("int f()"), Completeness::DefinitelyIncomplete);
        assert_eq!(completeness("class A"), Completeness::DefinitelyIncomplete);
        assert_eq!(completeness("/* note"), Completeness::DefinitelyIncomplete);
        assert_eq!(completeness("while (busy)"), Completeness::ConsideredIncomplete);
    }

    #[test]
    fn calls_are_not_method_headers() {
        assert_eq!(completeness("f(1)"), Completeness::CompleteWithSemi);
        assert_eq!(completeness("new Object()"), Completeness::CompleteWithSemi);
        assert_eq!(
            completeness("System.out.println(x)"),
            Completeness::CompleteWithSemi
        );
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(completeness("  // only a comment\n"), Completeness::Empty);
        assert_eq!(completeness("\"abc"), Completeness::Unknown);
        assert_eq!(completeness("x)"), Completeness::Unknown);
    }
}
