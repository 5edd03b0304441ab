use crate::builtins;
use crate::value::{
    ArrayObj, ENUM_NAME_FIELD, ENUM_ORDINAL_FIELD, Instance, MESSAGE_FIELD, StreamKind, Value, identity_hash,
    int_to_char, quote_char, quote_str, same,
};
use crate::{ExceptionInfo, ExecError, ExecutionControl, OutputSink, RunOutcome, StackFrame, StopHandle, Target};
use kulla_compiler::ir::{
    Arith, Body, Call, Callee, ClassIr, Cmp, Code, Const, Expr, FieldIr, IterKind, MethodIr, NumKind, Place, Prim,
    Slot, Stmt, StmtKind,
};
use kulla_compiler::platform;
use kulla_compiler::types::{OBJECT, simple_name};
use kulla_compiler::{ClassKind, Type};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Deepest call nesting before `StackOverflowError` is raised.
pub(crate) const MAX_DEPTH: usize = 1_024;
const MAX_TRACE: usize = 1_024;
/// Largest array length `new T[n]` will allocate.
const MAX_ARRAY_LEN: usize = 1 << 26;

pub(crate) const ARITHMETIC: &str = "java.lang.ArithmeticException";
pub(crate) const ARRAY_INDEX: &str = "java.lang.ArrayIndexOutOfBoundsException";
pub(crate) const CLASS_CAST: &str = "java.lang.ClassCastException";
pub(crate) const ILLEGAL_STATE: &str = "java.lang.IllegalStateException";
pub(crate) const NEGATIVE_SIZE: &str = "java.lang.NegativeArraySizeException";
pub(crate) const NULL_POINTER: &str = "java.lang.NullPointerException";
const OUT_OF_MEMORY: &str = "java.lang.OutOfMemoryError";
pub(crate) const STACK_OVERFLOW: &str = "java.lang.StackOverflowError";

/// Abrupt completion that unwinds the interpreter.
pub(crate) enum Throw {
    Exception(Value),
    /// A corralled definition was reached.
    Unresolved(String),
    Stopped,
    Exit(i32),
}

pub(crate) type Exec<T> = Result<T, Throw>;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    locals: Vec<Value>,
    this: Option<Value>,
}

impl Frame {
    fn new(size: usize, mut args: Vec<Value>, this: Option<Value>) -> Self {
        if args.len() < size {
            args.resize(size, Value::Null);
        }
        Self { locals: args, this }
    }

    fn get(&self, slot: Slot) -> Value {
        self.locals.get(slot).cloned().unwrap_or(Value::Null)
    }

    fn set(&mut self, slot: Slot, value: Value) {
        if slot >= self.locals.len() {
            self.locals.resize(slot + 1, Value::Null);
        }
        self.locals[slot] = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Pending,
    Running,
    Done,
}

/// Loaded form of a user class. Statics are initialized on first use.
struct RtClass {
    name: Arc<str>,
    kind: ClassKind,
    superclass: Option<Arc<str>>,
    interfaces: Vec<Arc<str>>,
    fields: Vec<FieldIr>,
    enum_constants: Vec<String>,
    init_frame: usize,
    origin: String,
    methods: HashMap<String, Rc<MethodIr>>,
    ctors: HashMap<String, Rc<MethodIr>>,
    statics: RefCell<HashMap<String, Value>>,
    state: Cell<InitState>,
}

impl RtClass {
    fn load(class: ClassIr) -> Self {
        let methods = class.methods.into_iter().map(|m| (m.sig.clone(), Rc::new(m))).collect();
        let ctors = class.constructors.into_iter().map(|m| (m.sig.clone(), Rc::new(m))).collect();
        Self {
            name: class.name,
            kind: class.kind,
            superclass: class.superclass,
            interfaces: class.interfaces,
            fields: class.fields,
            enum_constants: class.enum_constants,
            init_frame: class.init_frame,
            origin: class.origin,
            methods,
            ctors,
            statics: RefCell::new(HashMap::new()),
            state: Cell::new(InitState::Pending),
        }
    }
}

enum PlaceRef {
    Local(Slot),
    Global(String),
    Static(Rc<RtClass>, String),
    Field(Rc<Instance>, String),
    Index(Rc<ArrayObj>, usize),
}

/// Tree-walking interpreter holding the session's runtime state.
pub struct Interpreter {
    globals: HashMap<String, Value>,
    methods: HashMap<String, Rc<MethodIr>>,
    classes: HashMap<Arc<str>, Rc<RtClass>>,
    corralled: HashMap<Arc<str>, String>,
    out: OutputSink,
    err: OutputSink,
    stop: StopHandle,
    frames: Vec<StackFrame>,
    next_id: u32,
    closed: bool,
    started: Instant,
    seed: Cell<u64>,
}

impl Interpreter {
    pub fn new(out: OutputSink, err: OutputSink) -> Self {
        Self::with_stop_handle(out, err, StopHandle::default())
    }

    pub fn with_stop_handle(out: OutputSink, err: OutputSink, stop: StopHandle) -> Self {
        Self {
            globals: HashMap::new(),
            methods: HashMap::new(),
            classes: HashMap::new(),
            corralled: HashMap::new(),
            out,
            err,
            stop,
            frames: Vec::new(),
            next_id: 1,
            closed: false,
            started: Instant::now(),
            seed: Cell::new(0x2545_F491_4F6C_DD1D),
        }
    }

    // ---- services for builtins -------------------------------------------

    pub(crate) fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub(crate) fn check_stop(&self) -> Exec<()> {
        if self.stop.requested() {
            Err(Throw::Stopped)
        } else {
            Ok(())
        }
    }

    pub(crate) fn elapsed_nanos(&self) -> i64 {
        i64::try_from(self.started.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    /// Next value of a xorshift generator in `[0, 1)`.
    pub(crate) fn next_random(&self) -> f64 {
        let mut x = self.seed.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.seed.set(x);
        (x >> 11) as f64 / (1u64 << 53) as f64
    }

    pub(crate) fn write(&self, stream: StreamKind, text: &str) {
        let sink = match stream {
            StreamKind::Out => &self.out,
            StreamKind::Err => &self.err,
        };
        if let Ok(mut writer) = sink.lock() {
            if let Err(err) = writer.write_all(text.as_bytes()) {
                debug!(%err, "snippet output dropped");
            }
        }
    }

    fn flush(&self) {
        for sink in [&self.out, &self.err] {
            if let Ok(mut writer) = sink.lock() {
                let _ = writer.flush();
            }
        }
    }

    fn capture_stack(&self) -> Vec<StackFrame> {
        self.frames.iter().rev().take(MAX_TRACE).cloned().collect()
    }

    pub(crate) fn new_throwable(&mut self, class: &str, message: Option<String>) -> Value {
        let mut fields = HashMap::new();
        fields.insert(
            MESSAGE_FIELD.to_string(),
            message.map_or(Value::Null, |m| Value::str(&m)),
        );
        let instance = Instance {
            id: self.alloc_id(),
            class: Arc::from(class),
            fields: RefCell::new(fields),
            stack: RefCell::new(self.capture_stack()),
        };
        Value::Object(Rc::new(instance))
    }

    pub(crate) fn throw_new(&mut self, class: &str, message: impl Into<Option<String>>) -> Throw {
        Throw::Exception(self.new_throwable(class, message.into()))
    }

    pub(crate) fn npe(&mut self, message: String) -> Throw {
        self.throw_new(NULL_POINTER, message)
    }

    pub(crate) fn new_array(&mut self, elem: Type, items: Vec<Value>) -> Value {
        Value::Array(Rc::new(ArrayObj {
            id: self.alloc_id(),
            elem,
            items: RefCell::new(items),
        }))
    }

    /// `String.valueOf` of a value.
    pub(crate) fn to_display(&mut self, value: &Value) -> Exec<String> {
        Ok(match value {
            Value::Null => "null".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Double(v) => crate::value::format_double(*v),
            Value::Bool(v) => v.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Array(array) => format!("{}@{:x}", array_descriptor(&array.elem), identity_hash(array.id)),
            Value::Object(_) => match self.call_virtual(value.clone(), "toString()", Vec::new())? {
                Value::Str(text) => text.to_string(),
                other => self.to_display(&other)?,
            },
            Value::Builder(builder) => builder.text.borrow().clone(),
            Value::List(list) => {
                let items = list.items.borrow().clone();
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    if item.object_id() == Some(list.id) {
                        parts.push("(this Collection)".to_string());
                    } else {
                        parts.push(self.to_display(item)?);
                    }
                }
                format!("[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let entries = map.entries.borrow().clone();
                let mut parts = Vec::with_capacity(entries.len());
                for (key, item) in &entries {
                    parts.push(format!("{}={}", self.to_display(key)?, self.to_display(item)?));
                }
                format!("{{{}}}", parts.join(", "))
            }
            Value::Stream(stream) => format!("java.io.PrintStream@{:x}", *stream as u32 + 0x1b6d_3586),
        })
    }

    /// REPL display of a value: strings and chars quoted, arrays expanded.
    pub(crate) fn render(&mut self, value: &Value) -> Exec<String> {
        match value {
            Value::Str(text) => Ok(quote_str(text)),
            Value::Char(ch) => Ok(quote_char(*ch)),
            Value::Array(array) => {
                let items = array.items.borrow().clone();
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    parts.push(self.render(item)?);
                }
                let (base, depth) = split_array(&array.elem);
                let body = if parts.is_empty() {
                    "  ".to_string()
                } else {
                    format!(" {} ", parts.join(", "))
                };
                Ok(format!("{base}[{}]{} {{{body}}}", items.len(), "[]".repeat(depth)))
            }
            other => self.to_display(other),
        }
    }

    /// `equals` dispatch, honoring user overrides.
    pub(crate) fn values_equal(&mut self, a: &Value, b: &Value) -> Exec<bool> {
        match a {
            Value::Object(_) => Ok(self
                .call_virtual(a.clone(), "equals(Object)", vec![b.clone()])?
                .as_bool()),
            _ => Ok(crate::value::equal_values(a, b)),
        }
    }

    // ---- class model -----------------------------------------------------

    pub(crate) fn class_is(&self, sub: &str, sup: &str) -> bool {
        if sub == sup || sup == OBJECT {
            return true;
        }
        if let Some(class) = self.classes.get(sub) {
            return class.superclass.as_deref().is_some_and(|s| self.class_is(s, sup))
                || class.interfaces.iter().any(|i| self.class_is(i, sup));
        }
        match platform::platform_class(sub) {
            Some(info) => {
                info.superclass.as_deref().is_some_and(|s| self.class_is(s, sup))
                    || info.interfaces.iter().any(|i| self.class_is(i, sup))
            }
            None => false,
        }
    }

    fn instance_of(&self, value: &Value, ty: &Type) -> bool {
        match (value, ty) {
            (Value::Null, _) => false,
            (Value::Array(array), Type::Array(elem)) => self.array_assignable(&array.elem, elem),
            (Value::Array(_), Type::Class(name)) => &**name == OBJECT,
            (_, Type::Class(name)) => self.class_is(&value.class_name(), name),
            _ => false,
        }
    }

    fn array_assignable(&self, have: &Type, want: &Type) -> bool {
        if have == want {
            return true;
        }
        match (have, want) {
            (Type::Class(h), Type::Class(w)) => self.class_is(h, w),
            (Type::Array(h), Type::Array(w)) => self.array_assignable(h, w),
            (Type::Array(_), Type::Class(w)) => &**w == OBJECT,
            _ => false,
        }
    }

    fn is_throwable_class(&self, name: &str) -> bool {
        let mut current: Option<Arc<str>> = Some(Arc::from(name));
        while let Some(name) = current {
            match self.classes.get(&name) {
                Some(class) => current = class.superclass.clone(),
                None => return platform::is_throwable(&name),
            }
        }
        false
    }

    fn corralled_in_chain(&self, class: &str) -> Option<String> {
        let mut current: Option<Arc<str>> = Some(Arc::from(class));
        while let Some(name) = current {
            if let Some(snippet) = self.corralled.get(&name) {
                return Some(snippet.clone());
            }
            current = self.classes.get(&name).and_then(|c| c.superclass.clone());
        }
        None
    }

    /// Most derived implementation of `sig`, starting at `class`.
    fn find_method(&self, class: &str, sig: &str) -> Option<(Arc<str>, Rc<MethodIr>)> {
        let mut current = self.classes.get(class).cloned();
        while let Some(rt) = current {
            if let Some(method) = rt.methods.get(sig) {
                if !matches!(method.body, Body::Abstract) {
                    return Some((rt.name.clone(), method.clone()));
                }
            }
            current = rt.superclass.as_ref().and_then(|s| self.classes.get(s)).cloned();
        }
        None
    }

    fn instance_fields(&self, class: &str) -> HashMap<String, Value> {
        let mut fields = HashMap::new();
        let mut current = self.classes.get(class).cloned();
        while let Some(rt) = current {
            for field in rt.fields.iter().filter(|f| !f.is_static) {
                fields
                    .entry(field.name.clone())
                    .or_insert_with(|| Value::default_for(&field.ty));
            }
            current = rt.superclass.as_ref().and_then(|s| self.classes.get(s)).cloned();
        }
        fields
    }

    fn user_class(&self, name: &str) -> Exec<Option<Rc<RtClass>>> {
        if let Some(snippet) = self.corralled.get(name) {
            return Err(Throw::Unresolved(snippet.clone()));
        }
        Ok(self.classes.get(name).cloned())
    }

    fn ensure_init(&mut self, rt: &Rc<RtClass>) -> Exec<()> {
        if rt.state.get() != InitState::Pending {
            return Ok(());
        }
        rt.state.set(InitState::Running);
        if let Some(superclass) = rt.superclass.as_ref().and_then(|s| self.classes.get(s)).cloned() {
            self.ensure_init(&superclass)?;
        }
        {
            let mut statics = rt.statics.borrow_mut();
            for field in rt.fields.iter().filter(|f| f.is_static) {
                statics.insert(field.name.clone(), Value::default_for(&field.ty));
            }
        }
        self.frames.push(StackFrame {
            class_name: simple_name(&rt.name).to_string(),
            method_name: "<clinit>".to_string(),
            snippet_id: rt.origin.clone(),
            line: 1,
        });
        let result = self.run_static_init(rt);
        self.frames.pop();
        rt.state.set(InitState::Done);
        result
    }

    fn run_static_init(&mut self, rt: &Rc<RtClass>) -> Exec<()> {
        for (ordinal, name) in rt.enum_constants.iter().enumerate() {
            let mut fields = self.instance_fields(&rt.name);
            fields.insert(ENUM_NAME_FIELD.to_string(), Value::str(name));
            fields.insert(
                ENUM_ORDINAL_FIELD.to_string(),
                Value::Int(i32::try_from(ordinal).unwrap_or(i32::MAX)),
            );
            let constant = Value::Object(Rc::new(Instance {
                id: self.alloc_id(),
                class: rt.name.clone(),
                fields: RefCell::new(fields),
                stack: RefCell::new(Vec::new()),
            }));
            self.run_ctor(rt, "<init>()", &constant, Vec::new())?;
            rt.statics.borrow_mut().insert(name.clone(), constant);
        }
        for field in rt.fields.iter().filter(|f| f.is_static) {
            if let Some(init) = &field.init {
                let mut frame = Frame::new(rt.init_frame, Vec::new(), None);
                let value = self.eval(init, &mut frame)?;
                rt.statics.borrow_mut().insert(field.name.clone(), value);
            }
        }
        Ok(())
    }

    fn instantiate(&mut self, class: &str, sig: &str, args: Vec<Value>) -> Exec<Value> {
        let Some(rt) = self.user_class(class)? else {
            return builtins::construct(self, class, sig, args);
        };
        self.ensure_init(&rt)?;
        let stack = if self.is_throwable_class(class) {
            self.capture_stack()
        } else {
            Vec::new()
        };
        let mut fields = self.instance_fields(class);
        if !stack.is_empty() || self.is_throwable_class(class) {
            fields.insert(MESSAGE_FIELD.to_string(), Value::Null);
        }
        let value = Value::Object(Rc::new(Instance {
            id: self.alloc_id(),
            class: rt.name.clone(),
            fields: RefCell::new(fields),
            stack: RefCell::new(stack),
        }));
        self.run_ctor(&rt, sig, &value, args)?;
        Ok(value)
    }

    fn run_ctor(&mut self, rt: &Rc<RtClass>, sig: &str, this: &Value, args: Vec<Value>) -> Exec<()> {
        self.check_stop()?;
        let ctor = rt.ctors.get(sig).cloned();
        let empty = Vec::new();
        let (stmts, frame_size, origin) = match ctor.as_deref() {
            Some(MethodIr {
                body: Body::Code(stmts),
                frame_size,
                origin,
                ..
            }) => (stmts, *frame_size, origin.clone()),
            Some(MethodIr {
                body: Body::Corralled,
                origin,
                ..
            }) => return Err(Throw::Unresolved(origin.clone())),
            _ => (&empty, args.len(), rt.origin.clone()),
        };
        if self.frames.len() >= MAX_DEPTH {
            return Err(self.throw_new(STACK_OVERFLOW, None::<String>));
        }
        let mut frame = Frame::new(frame_size, args, Some(this.clone()));
        self.frames.push(StackFrame {
            class_name: simple_name(&rt.name).to_string(),
            method_name: "<init>".to_string(),
            snippet_id: origin,
            line: stmts.first().map_or(1, |s| s.line),
        });
        let result = self.ctor_body(rt, stmts, &mut frame, this);
        self.frames.pop();
        result
    }

    fn ctor_body(&mut self, rt: &Rc<RtClass>, stmts: &[Stmt], frame: &mut Frame, this: &Value) -> Exec<()> {
        let rest = match stmts.first() {
            Some(Stmt {
                kind: StmtKind::SuperCtor { class, sig, args },
                ..
            }) => {
                let args = self.eval_args(args, frame)?;
                self.super_ctor(class, sig, args, this)?;
                &stmts[1..]
            }
            _ => {
                let superclass = rt.superclass.as_ref().and_then(|s| self.classes.get(s)).cloned();
                if let Some(superclass) = superclass {
                    self.run_ctor(&superclass, "<init>()", this, Vec::new())?;
                }
                stmts
            }
        };
        for field in rt.fields.iter().filter(|f| !f.is_static) {
            if let Some(init) = &field.init {
                let mut init_frame = Frame::new(rt.init_frame, Vec::new(), Some(this.clone()));
                let value = self.eval(init, &mut init_frame)?;
                if let Value::Object(instance) = this {
                    instance.fields.borrow_mut().insert(field.name.clone(), value);
                }
            }
        }
        self.exec_block(rest, frame)?;
        Ok(())
    }

    fn super_ctor(&mut self, class: &str, sig: &str, args: Vec<Value>, this: &Value) -> Exec<()> {
        if let Some(rt) = self.user_class(class)? {
            return self.run_ctor(&rt, sig, this, args);
        }
        if platform::is_throwable(class) {
            let message = match args.first() {
                None | Some(Value::Null) => Value::Null,
                Some(Value::Str(text)) => Value::Str(text.clone()),
                Some(other) => Value::str(&self.to_display(other)?),
            };
            if let Value::Object(instance) = this {
                instance.fields.borrow_mut().insert(MESSAGE_FIELD.to_string(), message);
            }
        }
        Ok(())
    }

    fn static_field(&mut self, class: &str, name: &str) -> Exec<Value> {
        if let Some(rt) = self.user_class(class)? {
            self.ensure_init(&rt)?;
            let value = rt.statics.borrow().get(name).cloned();
            return Ok(value.unwrap_or(Value::Null));
        }
        match builtins::static_field(class, name) {
            Some(value) => Ok(value),
            None => Err(self.throw_new(ILLEGAL_STATE, format!("no field {name} in {class}"))),
        }
    }

    // ---- calls -----------------------------------------------------------

    fn eval_args(&mut self, args: &[Expr], frame: &mut Frame) -> Exec<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, frame)?);
        }
        Ok(values)
    }

    fn invoke(&mut self, method: &MethodIr, class_name: &str, this: Option<Value>, args: Vec<Value>) -> Exec<Value> {
        self.check_stop()?;
        let stmts = match &method.body {
            Body::Code(stmts) => stmts,
            Body::Corralled => return Err(Throw::Unresolved(method.origin.clone())),
            Body::Abstract => {
                return Err(self.throw_new(ILLEGAL_STATE, format!("{} is abstract", method.name)));
            }
        };
        if self.frames.len() >= MAX_DEPTH {
            return Err(self.throw_new(STACK_OVERFLOW, None::<String>));
        }
        let mut frame = Frame::new(method.frame_size, args, this);
        self.frames.push(StackFrame {
            class_name: simple_name(class_name).to_string(),
            method_name: method.name.clone(),
            snippet_id: method.origin.clone(),
            line: stmts.first().map_or(1, |s| s.line),
        });
        let flow = self.exec_block(stmts, &mut frame);
        self.frames.pop();
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }

    pub(crate) fn call_virtual(&mut self, target: Value, sig: &str, args: Vec<Value>) -> Exec<Value> {
        match &target {
            Value::Null => Err(self.npe(format!("Cannot invoke \"{sig}\" because value is null"))),
            Value::Object(instance) => {
                if let Some(snippet) = self.corralled_in_chain(&instance.class) {
                    return Err(Throw::Unresolved(snippet));
                }
                if let Some((owner, method)) = self.find_method(&instance.class, sig) {
                    return self.invoke(&method, &owner, Some(target.clone()), args);
                }
                builtins::call_method(self, &target, sig, args)
            }
            _ => builtins::call_method(self, &target, sig, args),
        }
    }

    fn call(&mut self, call: &Call, frame: &mut Frame) -> Exec<Value> {
        match &call.callee {
            Callee::Global { sig, .. } => {
                let args = self.eval_args(&call.args, frame)?;
                let Some(method) = self.methods.get(sig).cloned() else {
                    return Err(self.throw_new(ILLEGAL_STATE, format!("method {sig} is not defined")));
                };
                self.invoke(&method, "", None, args)
            }
            Callee::Static { class, sig, .. } => {
                let args = self.eval_args(&call.args, frame)?;
                let Some(rt) = self.user_class(class)? else {
                    return builtins::call_static(self, class, sig, args);
                };
                self.ensure_init(&rt)?;
                if rt.kind == ClassKind::Enum && sig == "values()" {
                    let constants: Vec<Value> = {
                        let statics = rt.statics.borrow();
                        rt.enum_constants
                            .iter()
                            .map(|c| statics.get(c).cloned().unwrap_or(Value::Null))
                            .collect()
                    };
                    return Ok(self.new_array(Type::Class(rt.name.clone()), constants));
                }
                match self.find_method(class, sig) {
                    Some((owner, method)) => self.invoke(&method, &owner, None, args),
                    None => Err(self.throw_new(ILLEGAL_STATE, format!("method {sig} is not defined in {class}"))),
                }
            }
            Callee::Virtual { target, sig, .. } => {
                let target = self.eval(target, frame)?;
                let args = self.eval_args(&call.args, frame)?;
                self.call_virtual(target, sig, args)
            }
            Callee::Super { class, sig, .. } => {
                let this = frame.this.clone().unwrap_or(Value::Null);
                let args = self.eval_args(&call.args, frame)?;
                match self.find_method(class, sig) {
                    Some((owner, method)) => self.invoke(&method, &owner, Some(this), args),
                    None => builtins::call_method(self, &this, sig, args),
                }
            }
        }
    }

    // ---- statements ------------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt], frame: &mut Frame) -> Exec<Flow> {
        for stmt in stmts {
            match self.exec(stmt, frame)? {
                Flow::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Flow::Normal)
    }

    /// Runs a loop body, folding break and continue into the loop.
    fn exec_loop_body(&mut self, body: &Stmt, frame: &mut Frame) -> Exec<Option<Flow>> {
        self.check_stop()?;
        Ok(match self.exec(body, frame)? {
            Flow::Break => Some(Flow::Normal),
            Flow::Return(value) => Some(Flow::Return(value)),
            Flow::Normal | Flow::Continue => None,
        })
    }

    fn exec(&mut self, stmt: &Stmt, frame: &mut Frame) -> Exec<Flow> {
        if let Some(top) = self.frames.last_mut() {
            top.line = stmt.line;
        }
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, frame)?;
                Ok(Flow::Normal)
            }
            StmtKind::Local { slot, ty, init } => {
                let value = match init {
                    Some(init) => self.eval(init, frame)?,
                    None => Value::default_for(ty),
                };
                frame.set(*slot, value);
                Ok(Flow::Normal)
            }
            StmtKind::Block(stmts) => self.exec_block(stmts, frame),
            StmtKind::If { cond, then, els } => {
                if self.eval(cond, frame)?.as_bool() {
                    self.exec(then, frame)
                } else if let Some(els) = els {
                    self.exec(els, frame)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond, frame)?.as_bool() {
                    if let Some(flow) = self.exec_loop_body(body, frame)? {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::DoWhile { body, cond } => {
                loop {
                    if let Some(flow) = self.exec_loop_body(body, frame)? {
                        return Ok(flow);
                    }
                    if !self.eval(cond, frame)?.as_bool() {
                        return Ok(Flow::Normal);
                    }
                }
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                for stmt in init {
                    self.exec(stmt, frame)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !self.eval(cond, frame)?.as_bool() {
                            return Ok(Flow::Normal);
                        }
                    }
                    if let Some(flow) = self.exec_loop_body(body, frame)? {
                        return Ok(flow);
                    }
                    for expr in update {
                        self.eval(expr, frame)?;
                    }
                }
            }
            StmtKind::ForEach { slot, iter, over, body } => {
                let items = match (self.eval(iter, frame)?, over) {
                    (Value::Array(array), IterKind::Array) => array.items.borrow().clone(),
                    (Value::List(list), IterKind::List) => list.items.borrow().clone(),
                    (Value::Null, _) => {
                        return Err(self.npe("Cannot iterate because value is null".to_string()));
                    }
                    (other, _) => {
                        let shown = other.class_name();
                        return Err(self.throw_new(CLASS_CAST, format!("class {shown} is not iterable")));
                    }
                };
                for item in items {
                    frame.set(*slot, item);
                    if let Some(flow) = self.exec_loop_body(body, frame)? {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Throw(expr) => {
                let value = self.eval(expr, frame)?;
                if value.is_null() {
                    return Err(self.npe("Cannot throw exception because value is null".to_string()));
                }
                Err(Throw::Exception(value))
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                let result = match self.exec_block(body, frame) {
                    Err(Throw::Exception(exception)) => {
                        let handler = catches
                            .iter()
                            .find(|c| self.instance_of(&exception, &Type::Class(c.class.clone())));
                        match handler {
                            Some(handler) => {
                                frame.set(handler.slot, exception);
                                self.exec_block(&handler.body, frame)
                            }
                            None => Err(Throw::Exception(exception)),
                        }
                    }
                    other => other,
                };
                let runs_finally = matches!(result, Ok(_) | Err(Throw::Exception(_)) | Err(Throw::Unresolved(_)));
                if let (Some(finally), true) = (finally, runs_finally) {
                    match self.exec_block(finally, frame)? {
                        Flow::Normal => {}
                        abrupt => return Ok(abrupt),
                    }
                }
                result
            }
            StmtKind::SuperCtor { .. } | StmtKind::Empty => Ok(Flow::Normal),
        }
    }

    // ---- expressions -----------------------------------------------------

    fn eval(&mut self, expr: &Expr, frame: &mut Frame) -> Exec<Value> {
        match expr {
            Expr::Const(constant) => Ok(match constant {
                Const::Int(v) => Value::Int(*v),
                Const::Long(v) => Value::Long(*v),
                Const::Double(v) => Value::Double(*v),
                Const::Bool(v) => Value::Bool(*v),
                Const::Char(v) => Value::Char(*v),
                Const::Str(text) => Value::str(text),
                Const::Null => Value::Null,
            }),
            Expr::Local(slot) => Ok(frame.get(*slot)),
            Expr::Global(name) => self.global(name),
            Expr::StaticField { class, name } => self.static_field(class, name),
            Expr::Field { target, name } => {
                let target = self.eval(target, frame)?;
                match target {
                    Value::Object(instance) => Ok(instance.fields.borrow().get(name).cloned().unwrap_or(Value::Null)),
                    Value::Null => Err(self.npe(format!("Cannot read field \"{name}\" because value is null"))),
                    _ => Ok(Value::Null),
                }
            }
            Expr::This => Ok(frame.this.clone().unwrap_or(Value::Null)),
            Expr::Length(target) => match self.eval(target, frame)? {
                Value::Array(array) => Ok(Value::Int(len_i32(array.items.borrow().len()))),
                _ => Err(self.npe("Cannot read the array length because value is null".to_string())),
            },
            Expr::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?.as_i32();
                let (array, idx) = self.array_slot(target, index)?;
                let value = array.items.borrow()[idx].clone();
                Ok(value)
            }
            Expr::Call(call) => self.call(call, frame),
            Expr::New { class, sig, args } => {
                let args = self.eval_args(args, frame)?;
                self.instantiate(class, sig, args)
            }
            Expr::NewArray { elem, dims, extra_dims } => {
                let mut sizes = Vec::with_capacity(dims.len());
                for dim in dims {
                    let size = self.eval(dim, frame)?.as_i32();
                    if size < 0 {
                        return Err(self.throw_new(NEGATIVE_SIZE, size.to_string()));
                    }
                    sizes.push(size as usize);
                }
                self.build_array(elem, &sizes, *extra_dims)
            }
            Expr::ArrayLit { elem, items } => {
                let values = self.eval_args(items, frame)?;
                Ok(self.new_array(elem.clone(), values))
            }
            Expr::Neg(kind, operand) => {
                let value = self.eval(operand, frame)?;
                Ok(match kind {
                    NumKind::Int => Value::Int(value.as_i32().wrapping_neg()),
                    NumKind::Long => Value::Long(value.as_i64().wrapping_neg()),
                    NumKind::Double => Value::Double(-value.as_f64()),
                    NumKind::Bool => value,
                })
            }
            Expr::BitNot(kind, operand) => {
                let value = self.eval(operand, frame)?;
                Ok(match kind {
                    NumKind::Long => Value::Long(!value.as_i64()),
                    _ => Value::Int(!value.as_i32()),
                })
            }
            Expr::Not(operand) => Ok(Value::Bool(!self.eval(operand, frame)?.as_bool())),
            Expr::Arith { op, kind, lhs, rhs } => {
                let lhs = self.eval(lhs, frame)?;
                let rhs = self.eval(rhs, frame)?;
                self.arith(*op, *kind, &lhs, &rhs)
            }
            Expr::Compare { op, kind, lhs, rhs } => {
                let lhs = self.eval(lhs, frame)?;
                let rhs = self.eval(rhs, frame)?;
                Ok(Value::Bool(compare(*op, *kind, &lhs, &rhs)))
            }
            Expr::Equals { kind, negate, lhs, rhs } => {
                let lhs = self.eval(lhs, frame)?;
                let rhs = self.eval(rhs, frame)?;
                let equal = match kind {
                    Some(NumKind::Int | NumKind::Long) => lhs.as_i64() == rhs.as_i64(),
                    Some(NumKind::Double) => lhs.as_f64() == rhs.as_f64(),
                    Some(NumKind::Bool) => lhs.as_bool() == rhs.as_bool(),
                    None => same(&lhs, &rhs),
                };
                Ok(Value::Bool(equal != *negate))
            }
            Expr::Concat(parts) => {
                let mut text = String::new();
                for part in parts {
                    let value = self.eval(part, frame)?;
                    text.push_str(&self.to_display(&value)?);
                }
                Ok(Value::str(&text))
            }
            Expr::And(lhs, rhs) => Ok(Value::Bool(
                self.eval(lhs, frame)?.as_bool() && self.eval(rhs, frame)?.as_bool(),
            )),
            Expr::Or(lhs, rhs) => Ok(Value::Bool(
                self.eval(lhs, frame)?.as_bool() || self.eval(rhs, frame)?.as_bool(),
            )),
            Expr::Cond { cond, then, els } => {
                if self.eval(cond, frame)?.as_bool() {
                    self.eval(then, frame)
                } else {
                    self.eval(els, frame)
                }
            }
            Expr::Assign { place, value } => {
                let place = self.resolve_place(place, frame)?;
                let value = self.eval(value, frame)?;
                self.store(&place, value.clone(), frame);
                Ok(value)
            }
            Expr::CompoundAssign {
                place,
                op,
                kind,
                value,
                store,
            } => {
                let place = self.resolve_place(place, frame)?;
                let current = self.load(&place, frame);
                let rhs = self.eval(value, frame)?;
                let result = self.arith(*op, *kind, &current, &rhs)?;
                let result = convert_to(&result, store);
                self.store(&place, result.clone(), frame);
                Ok(result)
            }
            Expr::ConcatAssign { place, value } => {
                let place = self.resolve_place(place, frame)?;
                let current = self.load(&place, frame);
                let rhs = self.eval(value, frame)?;
                let text = format!("{}{}", self.to_display(&current)?, self.to_display(&rhs)?);
                let result = Value::str(&text);
                self.store(&place, result.clone(), frame);
                Ok(result)
            }
            Expr::IncDec {
                place,
                store,
                increment,
                prefix,
            } => {
                let place = self.resolve_place(place, frame)?;
                let old = self.load(&place, frame);
                if old.is_null() {
                    return Err(self.npe("Cannot unbox because value is null".to_string()));
                }
                let new = step(&old, store, *increment);
                self.store(&place, new.clone(), frame);
                Ok(if *prefix { new } else { old })
            }
            Expr::Convert(prim, operand) => {
                let value = self.eval(operand, frame)?;
                if value.is_null() {
                    return Err(self.npe("Cannot unbox because value is null".to_string()));
                }
                Ok(convert(*prim, &value))
            }
            Expr::CheckCast { ty, expr } => {
                let value = self.eval(expr, frame)?;
                if value.is_null() || self.instance_of(&value, ty) {
                    Ok(value)
                } else {
                    let message = format!(
                        "class {} cannot be cast to class {}",
                        value.class_name(),
                        ty.qualified()
                    );
                    Err(self.throw_new(CLASS_CAST, message))
                }
            }
            Expr::InstanceOf { expr, ty } => {
                let value = self.eval(expr, frame)?;
                Ok(Value::Bool(self.instance_of(&value, ty)))
            }
        }
    }

    fn global(&mut self, name: &str) -> Exec<Value> {
        match self.globals.get(name) {
            Some(value) => Ok(value.clone()),
            None => Err(self.throw_new(ILLEGAL_STATE, format!("variable {name} is not defined"))),
        }
    }

    fn array_slot(&mut self, target: Value, index: i32) -> Exec<(Rc<ArrayObj>, usize)> {
        let Value::Array(array) = target else {
            return Err(self.npe("Cannot load from array because value is null".to_string()));
        };
        let len = array.items.borrow().len();
        match usize::try_from(index) {
            Ok(idx) if idx < len => Ok((array, idx)),
            _ => Err(self.throw_new(ARRAY_INDEX, format!("Index {index} out of bounds for length {len}"))),
        }
    }

    fn build_array(&mut self, base: &Type, sizes: &[usize], extra_dims: usize) -> Exec<Value> {
        let Some((&size, rest)) = sizes.split_first() else {
            return Ok(Value::Null);
        };
        let mut component = base.clone();
        for _ in 0..rest.len() + extra_dims {
            component = Type::array_of(component);
        }
        let mut items = Vec::new();
        if size > MAX_ARRAY_LEN || items.try_reserve_exact(size).is_err() {
            debug!(size, "array allocation refused");
            return Err(self.throw_new(OUT_OF_MEMORY, "Java heap space".to_string()));
        }
        if rest.is_empty() {
            items.resize(size, Value::default_for(&component));
        } else {
            for _ in 0..size {
                items.push(self.build_array(base, rest, extra_dims)?);
            }
        }
        Ok(self.new_array(component, items))
    }

    fn arith(&mut self, op: Arith, kind: NumKind, lhs: &Value, rhs: &Value) -> Exec<Value> {
        Ok(match kind {
            NumKind::Int => {
                let (a, b) = (lhs.as_i32(), rhs.as_i32());
                let shift = rhs.as_i64() as u32;
                Value::Int(match op {
                    Arith::Add => a.wrapping_add(b),
                    Arith::Sub => a.wrapping_sub(b),
                    Arith::Mul => a.wrapping_mul(b),
                    Arith::Div | Arith::Rem if b == 0 => {
                        return Err(self.throw_new(ARITHMETIC, "/ by zero".to_string()));
                    }
                    Arith::Div => a.wrapping_div(b),
                    Arith::Rem => a.wrapping_rem(b),
                    Arith::Shl => a.wrapping_shl(shift),
                    Arith::Shr => a.wrapping_shr(shift),
                    Arith::UShr => (a as u32).wrapping_shr(shift) as i32,
                    Arith::And => a & b,
                    Arith::Or => a | b,
                    Arith::Xor => a ^ b,
                })
            }
            NumKind::Long => {
                let (a, b) = (lhs.as_i64(), rhs.as_i64());
                let shift = b as u32;
                Value::Long(match op {
                    Arith::Add => a.wrapping_add(b),
                    Arith::Sub => a.wrapping_sub(b),
                    Arith::Mul => a.wrapping_mul(b),
                    Arith::Div | Arith::Rem if b == 0 => {
                        return Err(self.throw_new(ARITHMETIC, "/ by zero".to_string()));
                    }
                    Arith::Div => a.wrapping_div(b),
                    Arith::Rem => a.wrapping_rem(b),
                    Arith::Shl => a.wrapping_shl(shift),
                    Arith::Shr => a.wrapping_shr(shift),
                    Arith::UShr => (a as u64).wrapping_shr(shift) as i64,
                    Arith::And => a & b,
                    Arith::Or => a | b,
                    Arith::Xor => a ^ b,
                })
            }
            NumKind::Double => {
                let (a, b) = (lhs.as_f64(), rhs.as_f64());
                Value::Double(match op {
                    Arith::Add => a + b,
                    Arith::Sub => a - b,
                    Arith::Mul => a * b,
                    Arith::Div => a / b,
                    Arith::Rem => a % b,
                    _ => f64::NAN,
                })
            }
            NumKind::Bool => {
                let (a, b) = (lhs.as_bool(), rhs.as_bool());
                Value::Bool(match op {
                    Arith::And => a & b,
                    Arith::Or => a | b,
                    Arith::Xor => a ^ b,
                    _ => false,
                })
            }
        })
    }

    fn resolve_place(&mut self, place: &Place, frame: &mut Frame) -> Exec<PlaceRef> {
        match place {
            Place::Local(slot) => Ok(PlaceRef::Local(*slot)),
            Place::Global(name) => {
                if self.globals.contains_key(name) {
                    Ok(PlaceRef::Global(name.clone()))
                } else {
                    Err(self.throw_new(ILLEGAL_STATE, format!("variable {name} is not defined")))
                }
            }
            Place::StaticField { class, name } => match self.user_class(class)? {
                Some(rt) => {
                    self.ensure_init(&rt)?;
                    Ok(PlaceRef::Static(rt, name.clone()))
                }
                None => Err(self.throw_new(ILLEGAL_STATE, format!("cannot assign a value to {class}.{name}"))),
            },
            Place::Field { target, name } => match self.eval(target, frame)? {
                Value::Object(instance) => Ok(PlaceRef::Field(instance, name.clone())),
                _ => Err(self.npe(format!("Cannot assign field \"{name}\" because value is null"))),
            },
            Place::Index { target, index } => {
                let target = self.eval(target, frame)?;
                let index = self.eval(index, frame)?.as_i32();
                let (array, idx) = self.array_slot(target, index)?;
                Ok(PlaceRef::Index(array, idx))
            }
        }
    }

    fn load(&self, place: &PlaceRef, frame: &Frame) -> Value {
        match place {
            PlaceRef::Local(slot) => frame.get(*slot),
            PlaceRef::Global(name) => self.globals.get(name).cloned().unwrap_or(Value::Null),
            PlaceRef::Static(rt, name) => rt.statics.borrow().get(name).cloned().unwrap_or(Value::Null),
            PlaceRef::Field(instance, name) => instance.fields.borrow().get(name).cloned().unwrap_or(Value::Null),
            PlaceRef::Index(array, idx) => array.items.borrow()[*idx].clone(),
        }
    }

    fn store(&mut self, place: &PlaceRef, value: Value, frame: &mut Frame) {
        match place {
            PlaceRef::Local(slot) => frame.set(*slot, value),
            PlaceRef::Global(name) => {
                self.globals.insert(name.clone(), value);
            }
            PlaceRef::Static(rt, name) => {
                rt.statics.borrow_mut().insert(name.clone(), value);
            }
            PlaceRef::Field(instance, name) => {
                instance.fields.borrow_mut().insert(name.clone(), value);
            }
            PlaceRef::Index(array, idx) => array.items.borrow_mut()[*idx] = value,
        }
    }

    // ---- snippet entry points ---------------------------------------------

    fn run_code(&mut self, code: Code, bind: Option<String>) -> Exec<Option<String>> {
        match code {
            Code::Var {
                name,
                ty,
                init,
                frame_size,
                origin,
            } => {
                self.globals.insert(name.clone(), Value::default_for(&ty));
                if let Some(init) = init {
                    let mut frame = Frame::new(frame_size, Vec::new(), None);
                    self.frames.push(top_frame(&origin));
                    let value = self.eval(&init, &mut frame)?;
                    self.globals.insert(name.clone(), value);
                }
                let value = self.globals.get(&name).cloned().unwrap_or(Value::Null);
                Ok(Some(self.render(&value)?))
            }
            Code::Expr {
                expr,
                ty,
                frame_size,
                origin,
            } => {
                let mut frame = Frame::new(frame_size, Vec::new(), None);
                self.frames.push(top_frame(&origin));
                let value = self.eval(&expr, &mut frame)?;
                if let Some(name) = bind {
                    self.globals.insert(name, value.clone());
                }
                if ty == Type::Void {
                    Ok(None)
                } else {
                    Ok(Some(self.render(&value)?))
                }
            }
            Code::Stmt {
                body,
                frame_size,
                origin,
            } => {
                let mut frame = Frame::new(frame_size, Vec::new(), None);
                self.frames.push(top_frame(&origin));
                self.exec_block(&body, &mut frame)?;
                Ok(None)
            }
            Code::Method(_) | Code::Class(_) => {
                self.load_code(code);
                Ok(None)
            }
            Code::Import => Ok(None),
        }
    }

    fn load_code(&mut self, code: Code) {
        match code {
            Code::Method(method) => {
                debug!(sig = %method.sig, "installing method");
                self.methods.insert(method.sig.clone(), Rc::new(method));
            }
            Code::Class(class) => {
                debug!(class = %class.name, "installing class");
                self.corralled.remove(&class.name);
                self.classes.insert(class.name.clone(), Rc::new(RtClass::load(class)));
            }
            _ => {}
        }
    }
}

impl ExecutionControl for Interpreter {
    fn install(&mut self, code: Code) -> Result<(), ExecError> {
        if self.closed {
            return Err(ExecError::Disconnected);
        }
        self.load_code(code);
        Ok(())
    }

    fn corral(&mut self, target: Target, snippet: &str) -> Result<(), ExecError> {
        match target {
            Target::Var(name) => {
                self.globals.remove(&name);
            }
            Target::Method(sig) => {
                let name = sig.split('(').next().unwrap_or(&sig).to_string();
                let stub = MethodIr {
                    name,
                    sig: sig.clone(),
                    is_static: true,
                    params: 0,
                    frame_size: 0,
                    ret: Type::Void,
                    body: Body::Corralled,
                    origin: snippet.to_string(),
                };
                self.methods.insert(sig, Rc::new(stub));
            }
            Target::Class(name) => {
                self.corralled.insert(name, snippet.to_string());
            }
        }
        Ok(())
    }

    fn remove(&mut self, target: Target) -> Result<(), ExecError> {
        match target {
            Target::Var(name) => {
                self.globals.remove(&name);
            }
            Target::Method(sig) => {
                self.methods.remove(&sig);
            }
            Target::Class(name) => {
                self.classes.remove(&name);
                self.corralled.remove(&name);
            }
        }
        Ok(())
    }

    fn run(&mut self, code: Code, bind: Option<String>) -> Result<RunOutcome, ExecError> {
        if self.closed {
            return Err(ExecError::Disconnected);
        }
        self.stop.clear();
        self.frames.clear();
        let result = self.run_code(code, bind);
        self.frames.clear();
        self.flush();
        let mut outcome = RunOutcome::default();
        match result {
            Ok(value) => outcome.value = value,
            Err(Throw::Exception(value)) => outcome.exception = Some(exception_info(&value)),
            Err(Throw::Unresolved(snippet)) => outcome.exception = Some(ExceptionInfo::Unresolved { snippet }),
            Err(Throw::Stopped) => outcome.exception = Some(ExceptionInfo::Stopped),
            Err(Throw::Exit(code)) => {
                debug!(code, "snippet called exit");
                self.closed = true;
                outcome.exit_code = Some(code);
            }
        }
        Ok(outcome)
    }

    fn reset_var(&mut self, name: &str, ty: &Type) -> Result<(), ExecError> {
        self.globals.insert(name.to_string(), Value::default_for(ty));
        Ok(())
    }

    fn var_value(&mut self, name: &str) -> Result<Option<String>, ExecError> {
        let Some(value) = self.globals.get(name).cloned() else {
            return Ok(None);
        };
        self.stop.clear();
        let shown = self.render(&value).ok();
        self.frames.clear();
        Ok(shown)
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

fn top_frame(origin: &str) -> StackFrame {
    StackFrame {
        class_name: String::new(),
        method_name: String::new(),
        snippet_id: origin.to_string(),
        line: 1,
    }
}

fn exception_info(value: &Value) -> ExceptionInfo {
    match value {
        Value::Object(instance) => {
            let message = match instance.fields.borrow().get(MESSAGE_FIELD) {
                Some(Value::Str(text)) => Some(text.to_string()),
                _ => None,
            };
            ExceptionInfo::Eval {
                class_name: instance.class.to_string(),
                message,
                stack: instance.stack.borrow().clone(),
            }
        }
        other => ExceptionInfo::Eval {
            class_name: other.class_name(),
            message: None,
            stack: Vec::new(),
        },
    }
}

pub(crate) fn len_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

fn compare(op: Cmp, kind: NumKind, lhs: &Value, rhs: &Value) -> bool {
    let ordering = match kind {
        NumKind::Double => lhs.as_f64().partial_cmp(&rhs.as_f64()),
        _ => Some(lhs.as_i64().cmp(&rhs.as_i64())),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        Cmp::Lt => ordering.is_lt(),
        Cmp::Gt => ordering.is_gt(),
        Cmp::Le => ordering.is_le(),
        Cmp::Ge => ordering.is_ge(),
    }
}

fn convert(prim: Prim, value: &Value) -> Value {
    match prim {
        Prim::Int => Value::Int(value.as_i32()),
        Prim::Long => Value::Long(value.as_i64()),
        Prim::Double => Value::Double(value.as_f64()),
        Prim::Char => Value::Char(value.as_char()),
    }
}

fn store_prim(store: &Type) -> Type {
    if store.is_primitive() {
        store.clone()
    } else {
        store.unboxed().unwrap_or_else(|| store.clone())
    }
}

fn convert_to(value: &Value, store: &Type) -> Value {
    match store_prim(store) {
        Type::Int => convert(Prim::Int, value),
        Type::Long => convert(Prim::Long, value),
        Type::Double => convert(Prim::Double, value),
        Type::Char => convert(Prim::Char, value),
        _ => value.clone(),
    }
}

fn step(value: &Value, store: &Type, increment: bool) -> Value {
    let delta: i32 = if increment { 1 } else { -1 };
    match store_prim(store) {
        Type::Long => Value::Long(value.as_i64().wrapping_add(i64::from(delta))),
        Type::Double => Value::Double(value.as_f64() + f64::from(delta)),
        Type::Char => Value::Char(int_to_char(value.as_i32().wrapping_add(delta))),
        _ => Value::Int(value.as_i32().wrapping_add(delta)),
    }
}

/// Base type and array depth of a component type.
fn split_array(component: &Type) -> (String, usize) {
    let mut depth = 0;
    let mut current = component;
    while let Type::Array(inner) = current {
        depth += 1;
        current = inner;
    }
    (current.to_string(), depth)
}

fn array_descriptor(component: &Type) -> String {
    let inner = match component {
        Type::Int => "I".to_string(),
        Type::Long => "J".to_string(),
        Type::Double => "D".to_string(),
        Type::Boolean => "Z".to_string(),
        Type::Char => "C".to_string(),
        Type::Array(elem) => array_descriptor(elem),
        other => format!("L{};", other.qualified()),
    };
    format!("[{inner}")
}

#[cfg(test)]
mod tests {
    use super::Interpreter;
    use crate::{ExceptionInfo, ExecutionControl, OutputSink, RunOutcome};
    use kulla_compiler::{CheckMode, Declared, EmptyScope, check_unit, parse_snippet};
    use std::sync::{Arc, Mutex};

    fn interpreter() -> (Interpreter, Arc<Mutex<Vec<u8>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink: OutputSink = out.clone();
        let err: OutputSink = Arc::new(Mutex::new(Vec::new()));
        (Interpreter::new(sink, err), out)
    }

    fn run(interp: &mut Interpreter, source: &str) -> RunOutcome {
        let units = parse_snippet(source).expect("snippet should parse");
        let unit = units.into_iter().next().expect("one unit");
        let analysis = check_unit(&unit, &EmptyScope, CheckMode::Fresh, "1");
        assert!(analysis.error_diags().is_empty(), "unexpected errors: {:?}", analysis.error_diags());
        let bind = match &analysis.declared {
            Declared::None => Some("$1".to_string()),
            _ => None,
        };
        interp.run(analysis.code, bind).expect("run should complete")
    }

    fn printed(out: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(out.lock().expect("sink lock").clone()).expect("utf8 output")
    }

    #[test]
    fn expressions_render_values() {
        let (mut interp, _) = interpreter();
        assert_eq!(run(&mut interp, "1 + 2").value.as_deref(), Some("3"));
        assert_eq!(run(&mut interp, "\"a\" + 'b' + 1").value.as_deref(), Some("\"ab1\""));
        assert_eq!(run(&mut interp, "7 / 2.0").value.as_deref(), Some("3.5"));
        assert_eq!(run(&mut interp, "new int[]{1, 2, 3}").value.as_deref(), Some("int[3] { 1, 2, 3 }"));
        assert_eq!(run(&mut interp, "new String[0]").value.as_deref(), Some("String[0] {  }"));
        assert_eq!(run(&mut interp, "Integer.MAX_VALUE + 1").value.as_deref(), Some("-2147483648"));
    }

    #[test]
    fn statements_print_through_the_sink() {
        let (mut interp, out) = interpreter();
        let outcome = run(
            &mut interp,
            "for (int i = 0; i < 3; i++) { if (i == 1) continue; System.out.println(\"i=\" + i); }",
        );
        assert_eq!(outcome.exception, None);
        assert_eq!(printed(&out), "i=0\ni=2\n");
    }

    #[test]
    fn division_by_zero_raises() {
        let (mut interp, _) = interpreter();
        let outcome = run(&mut interp, "1 / 0");
        match outcome.exception {
            Some(ExceptionInfo::Eval { class_name, message, stack }) => {
                assert_eq!(class_name, "java.lang.ArithmeticException");
                assert_eq!(message.as_deref(), Some("/ by zero"));
                assert_eq!(stack.first().map(|f| f.to_string()).as_deref(), Some("at (#1:1)"));
            }
            other => panic!("expected arithmetic exception, got {other:?}"),
        }
    }

    #[test]
    fn try_catch_finally_runs_in_order() {
        let (mut interp, out) = interpreter();
        let outcome = run(
            &mut interp,
            "try { throw new IllegalStateException(\"bad\"); } \
             catch (RuntimeException e) { System.out.println(\"caught \" + e.getMessage()); } \
             finally { System.out.println(\"done\"); }",
        );
        assert_eq!(outcome.exception, None);
        assert_eq!(printed(&out), "caught bad\ndone\n");
    }

    #[test]
    fn variables_bind_and_reset() {
        let (mut interp, _) = interpreter();
        let outcome = run(&mut interp, "int x = 41 + 1;");
        assert_eq!(outcome.value.as_deref(), Some("42"));
        assert_eq!(interp.var_value("x").expect("value").as_deref(), Some("42"));
        interp
            .reset_var("x", &kulla_compiler::Type::Int)
            .expect("reset should work");
        assert_eq!(interp.var_value("x").expect("value").as_deref(), Some("0"));
    }

    #[test]
    fn exit_closes_the_interpreter() {
        let (mut interp, _) = interpreter();
        let outcome = run(&mut interp, "System.exit(3);");
        assert_eq!(outcome.exit_code, Some(3));
        assert!(interp.is_closed());
    }

    #[test]
    fn array_index_out_of_bounds() {
        let (mut interp, _) = interpreter();
        let outcome = run(&mut interp, "{ int[] a = new int[3]; a[5] = 1; }");
        match outcome.exception {
            Some(ExceptionInfo::Eval { class_name, message, .. }) => {
                assert_eq!(class_name, "java.lang.ArrayIndexOutOfBoundsException");
                assert_eq!(message.as_deref(), Some("Index 5 out of bounds for length 3"));
            }
            other => panic!("expected index exception, got {other:?}"),
        }
    }

    #[test]
    fn oversized_array_raises_out_of_memory() {
        let (mut interp, _) = interpreter();
        let outcome = run(&mut interp, "int[] big = new int[Integer.MAX_VALUE];");
        match outcome.exception {
            Some(ExceptionInfo::Eval { class_name, message, .. }) => {
                assert_eq!(class_name, "java.lang.OutOfMemoryError");
                assert_eq!(message.as_deref(), Some("Java heap space"));
            }
            other => panic!("expected out of memory error, got {other:?}"),
        }
        assert_eq!(run(&mut interp, "new int[2][3].length").value.as_deref(), Some("2"));
    }

    #[test]
    fn split_uses_regular_expressions() {
        let (mut interp, _) = interpreter();
        assert_eq!(run(&mut interp, "\"a1b22c\".split(\"\\\\d+\").length").value.as_deref(), Some("3"));
        assert_eq!(run(&mut interp, "\"x-y_z\".split(\"[a-z]\").length").value.as_deref(), Some("3"));
        assert_eq!(
            run(&mut interp, "\"a-b\".replaceAll(\"(\\\\w)-(\\\\w)\", \"$2-$1\")").value.as_deref(),
            Some("\"b-a\"")
        );
    }

    #[test]
    fn stop_before_run_is_cleared() {
        let (mut interp, _) = interpreter();
        interp.stop_handle().stop();
        assert_eq!(run(&mut interp, "2 * 21").value.as_deref(), Some("42"));
    }
}
