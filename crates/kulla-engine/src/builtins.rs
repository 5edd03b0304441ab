//! Behavior of the platform classes known to the checker's catalog.
//! Dispatch is by class and erased signature key.

use crate::interp::{Exec, ILLEGAL_STATE, Interpreter, Throw, len_i32};
use crate::value::{
    BuilderObj, ENUM_NAME_FIELD, ENUM_ORDINAL_FIELD, Instance, ListObj, MESSAGE_FIELD, MapObj, StreamKind, Value,
    equal_values, identity_hash, string_hash,
};
use kulla_compiler::platform;
use kulla_compiler::types::{OBJECT, simple_name};
use kulla_compiler::Type;
use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const ILLEGAL_ARGUMENT: &str = "java.lang.IllegalArgumentException";
const INDEX_OUT_OF_BOUNDS: &str = "java.lang.IndexOutOfBoundsException";
const NUMBER_FORMAT: &str = "java.lang.NumberFormatException";
const PATTERN_SYNTAX: &str = "java.util.regex.PatternSyntaxException";
const STRING_INDEX: &str = "java.lang.StringIndexOutOfBoundsException";
const UNSUPPORTED: &str = "java.lang.UnsupportedOperationException";

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

pub(crate) fn static_field(class: &str, name: &str) -> Option<Value> {
    Some(match (class, name) {
        ("java.lang.Math", "PI") => Value::Double(std::f64::consts::PI),
        ("java.lang.Math", "E") => Value::Double(std::f64::consts::E),
        ("java.lang.System", "out") => Value::Stream(StreamKind::Out),
        ("java.lang.System", "err") => Value::Stream(StreamKind::Err),
        ("java.lang.Integer", "MAX_VALUE") => Value::Int(i32::MAX),
        ("java.lang.Integer", "MIN_VALUE") => Value::Int(i32::MIN),
        ("java.lang.Long", "MAX_VALUE") => Value::Long(i64::MAX),
        ("java.lang.Long", "MIN_VALUE") => Value::Long(i64::MIN),
        ("java.lang.Double", "MAX_VALUE") => Value::Double(f64::MAX),
        ("java.lang.Double", "MIN_VALUE") => Value::Double(f64::from_bits(1)),
        ("java.lang.Double", "NaN") => Value::Double(f64::NAN),
        _ => return None,
    })
}

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or(Value::Null)
}

fn text_arg(interp: &mut Interpreter, args: &[Value], idx: usize) -> Exec<Rc<str>> {
    match arg(args, idx) {
        Value::Str(text) => Ok(text),
        Value::Null => Err(interp.npe("Cannot read a String argument because value is null".to_string())),
        other => Ok(Rc::from(interp.to_display(&other)?)),
    }
}

/// Items of a packed varargs array.
fn varargs(args: &[Value], idx: usize) -> Vec<Value> {
    match args.get(idx) {
        Some(Value::Array(array)) => array.items.borrow().clone(),
        _ => Vec::new(),
    }
}

fn unknown(interp: &mut Interpreter, class: &str, sig: &str) -> Throw {
    interp.throw_new(ILLEGAL_STATE, format!("{}.{sig} is not available", simple_name(class)))
}

pub(crate) fn call_static(interp: &mut Interpreter, class: &str, sig: &str, args: Vec<Value>) -> Exec<Value> {
    let value = match (class, sig) {
        ("java.lang.String", "valueOf(Object)") => Value::str(&interp.to_display(&arg(&args, 0))?),
        ("java.lang.String", "format(String,Object[])") => {
            let format = text_arg(interp, &args, 0)?;
            Value::str(&format_text(interp, &format, &varargs(&args, 1))?)
        }
        ("java.lang.String", "join(String,Object[])") => {
            let separator = text_arg(interp, &args, 0)?;
            let mut items = varargs(&args, 1);
            if let [Value::List(list)] = items.as_slice() {
                let inner = list.items.borrow().clone();
                items = inner;
            }
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(interp.to_display(item)?);
            }
            Value::str(&parts.join(&*separator))
        }
        ("java.lang.Math", "abs(int)") => Value::Int(arg(&args, 0).as_i32().wrapping_abs()),
        ("java.lang.Math", "abs(long)") => Value::Long(arg(&args, 0).as_i64().wrapping_abs()),
        ("java.lang.Math", "abs(double)") => Value::Double(arg(&args, 0).as_f64().abs()),
        ("java.lang.Math", "max(int,int)") => Value::Int(arg(&args, 0).as_i32().max(arg(&args, 1).as_i32())),
        ("java.lang.Math", "max(long,long)") => Value::Long(arg(&args, 0).as_i64().max(arg(&args, 1).as_i64())),
        ("java.lang.Math", "max(double,double)") => {
            Value::Double(nan_aware(arg(&args, 0).as_f64(), arg(&args, 1).as_f64(), f64::max))
        }
        ("java.lang.Math", "min(int,int)") => Value::Int(arg(&args, 0).as_i32().min(arg(&args, 1).as_i32())),
        ("java.lang.Math", "min(long,long)") => Value::Long(arg(&args, 0).as_i64().min(arg(&args, 1).as_i64())),
        ("java.lang.Math", "min(double,double)") => {
            Value::Double(nan_aware(arg(&args, 0).as_f64(), arg(&args, 1).as_f64(), f64::min))
        }
        ("java.lang.Math", "pow(double,double)") => Value::Double(arg(&args, 0).as_f64().powf(arg(&args, 1).as_f64())),
        ("java.lang.Math", "sqrt(double)") => Value::Double(arg(&args, 0).as_f64().sqrt()),
        ("java.lang.Math", "floor(double)") => Value::Double(arg(&args, 0).as_f64().floor()),
        ("java.lang.Math", "ceil(double)") => Value::Double(arg(&args, 0).as_f64().ceil()),
        ("java.lang.Math", "round(double)") => {
            let value = arg(&args, 0).as_f64();
            Value::Long(if value.is_nan() { 0 } else { (value + 0.5).floor() as i64 })
        }
        ("java.lang.Math", "random()") => Value::Double(interp.next_random()),
        ("java.lang.System", "currentTimeMillis()") => {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
                .unwrap_or(0);
            Value::Long(millis)
        }
        ("java.lang.System", "nanoTime()") => Value::Long(interp.elapsed_nanos()),
        ("java.lang.System", "exit(int)") => return Err(Throw::Exit(arg(&args, 0).as_i32())),
        ("java.lang.System", "lineSeparator()") => Value::str("\n"),
        ("java.lang.System", "getProperty(String)") => {
            let key = text_arg(interp, &args, 0)?;
            system_property(&key).map_or(Value::Null, |v| Value::str(&v))
        }
        ("java.lang.Integer", "parseInt(String)") => {
            let text = number_text(interp, &args)?;
            match text.parse::<i32>() {
                Ok(value) => Value::Int(value),
                Err(_) => return Err(number_format(interp, &text)),
            }
        }
        ("java.lang.Integer", "valueOf(int)")
        | ("java.lang.Long", "valueOf(long)")
        | ("java.lang.Double", "valueOf(double)")
        | ("java.lang.Boolean", "valueOf(boolean)") => arg(&args, 0),
        ("java.lang.Integer", "toString(int)") => Value::str(&arg(&args, 0).as_i32().to_string()),
        ("java.lang.Integer", "toBinaryString(int)") => Value::str(&format!("{:b}", arg(&args, 0).as_i32() as u32)),
        ("java.lang.Integer", "toHexString(int)") => Value::str(&format!("{:x}", arg(&args, 0).as_i32() as u32)),
        ("java.lang.Long", "parseLong(String)") => {
            let text = number_text(interp, &args)?;
            match text.parse::<i64>() {
                Ok(value) => Value::Long(value),
                Err(_) => return Err(number_format(interp, &text)),
            }
        }
        ("java.lang.Double", "parseDouble(String)") => {
            let text = number_text(interp, &args)?;
            match parse_double(&text) {
                Some(value) => Value::Double(value),
                None => return Err(number_format(interp, &text)),
            }
        }
        ("java.lang.Double", "isNaN(double)") => Value::Bool(arg(&args, 0).as_f64().is_nan()),
        ("java.lang.Boolean", "parseBoolean(String)") => Value::Bool(match arg(&args, 0) {
            Value::Str(text) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }),
        ("java.lang.Character", sig) if sig.ends_with("(char)") => {
            let ch = arg(&args, 0).as_char();
            match sig {
                "isDigit(char)" => Value::Bool(ch.is_numeric()),
                "isLetter(char)" => Value::Bool(ch.is_alphabetic()),
                "isLetterOrDigit(char)" => Value::Bool(ch.is_alphanumeric()),
                "isWhitespace(char)" => Value::Bool(ch.is_whitespace()),
                "isUpperCase(char)" => Value::Bool(ch.is_uppercase()),
                "isLowerCase(char)" => Value::Bool(ch.is_lowercase()),
                "toUpperCase(char)" => Value::Char(single_case(ch.to_uppercase(), ch)),
                "toLowerCase(char)" => Value::Char(single_case(ch.to_lowercase(), ch)),
                _ => return Err(unknown(interp, class, sig)),
            }
        }
        ("java.lang.Thread", "sleep(long)") => {
            sleep(interp, arg(&args, 0).as_i64())?;
            Value::Null
        }
        ("java.util.List", "of(Object[])") => {
            let items = varargs(&args, 0);
            if items.iter().any(Value::is_null) {
                return Err(interp.npe("List.of element is null".to_string()));
            }
            new_list(interp, items, true)
        }
        _ => return Err(unknown(interp, class, sig)),
    };
    Ok(value)
}

fn nan_aware(a: f64, b: f64, pick: fn(f64, f64) -> f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { pick(a, b) }
}

fn single_case(mut mapped: impl Iterator<Item = char>, fallback: char) -> char {
    match (mapped.next(), mapped.next()) {
        (Some(ch), None) => ch,
        _ => fallback,
    }
}

fn number_text(interp: &mut Interpreter, args: &[Value]) -> Exec<Rc<str>> {
    match arg(args, 0) {
        Value::Str(text) => Ok(text),
        _ => Err(interp.throw_new(NUMBER_FORMAT, "Cannot parse null string: null".to_string())),
    }
}

fn number_format(interp: &mut Interpreter, text: &str) -> Throw {
    interp.throw_new(NUMBER_FORMAT, format!("For input string: \"{text}\""))
}

fn parse_double(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let unsigned = trimmed.trim_start_matches(['+', '-']);
    match unsigned {
        "Infinity" => Some(if trimmed.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY }),
        "NaN" => Some(f64::NAN),
        _ if unsigned.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E' | 'd' | 'D' | 'f' | 'F')) => None,
        _ => trimmed.trim_end_matches(['d', 'D', 'f', 'F']).parse().ok(),
    }
}

fn system_property(key: &str) -> Option<String> {
    match key {
        "java.version" => Some("21".to_string()),
        "line.separator" => Some("\n".to_string()),
        "os.name" => Some(std::env::consts::OS.to_string()),
        "user.dir" => std::env::current_dir().ok().map(|p| p.display().to_string()),
        "user.home" => std::env::var("HOME").ok(),
        _ => None,
    }
}

fn sleep(interp: &mut Interpreter, millis: i64) -> Exec<()> {
    let Ok(millis) = u64::try_from(millis) else {
        return Err(interp.throw_new(ILLEGAL_ARGUMENT, "timeout value is negative".to_string()));
    };
    let deadline = Instant::now() + Duration::from_millis(millis);
    loop {
        interp.check_stop()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

fn new_list(interp: &mut Interpreter, items: Vec<Value>, immutable: bool) -> Value {
    Value::List(Rc::new(ListObj {
        id: interp.alloc_id(),
        items: RefCell::new(items),
        immutable,
    }))
}

pub(crate) fn construct(interp: &mut Interpreter, class: &str, sig: &str, args: Vec<Value>) -> Exec<Value> {
    if platform::is_throwable(class) {
        let message = match args.first() {
            None | Some(Value::Null) => None,
            Some(Value::Str(text)) => Some(text.to_string()),
            Some(other) => Some(interp.to_display(other)?),
        };
        return Ok(interp.new_throwable(class, message));
    }
    let value = match (class, sig) {
        (OBJECT, _) => Value::Object(Rc::new(Instance {
            id: interp.alloc_id(),
            class: Arc::from(OBJECT),
            fields: RefCell::new(HashMap::new()),
            stack: RefCell::new(Vec::new()),
        })),
        ("java.lang.String", "<init>()") => Value::str(""),
        ("java.lang.String", "<init>(String)") => Value::Str(text_arg(interp, &args, 0)?),
        ("java.lang.StringBuilder", _) => {
            let initial = match args.first() {
                Some(_) => text_arg(interp, &args, 0)?.to_string(),
                None => String::new(),
            };
            Value::Builder(Rc::new(BuilderObj {
                id: interp.alloc_id(),
                text: RefCell::new(initial),
            }))
        }
        ("java.util.ArrayList", _) => new_list(interp, Vec::new(), false),
        ("java.util.HashMap", _) => Value::Map(Rc::new(MapObj {
            id: interp.alloc_id(),
            entries: RefCell::new(Vec::new()),
        })),
        _ => return Err(unknown(interp, class, sig)),
    };
    Ok(value)
}

/// Instance method on a platform value, or an inherited `Object` or
/// `Throwable` method on a user instance.
pub(crate) fn call_method(interp: &mut Interpreter, target: &Value, sig: &str, args: Vec<Value>) -> Exec<Value> {
    match target {
        Value::Str(text) => string_method(interp, text, sig, args),
        Value::Builder(builder) => builder_method(interp, target, builder, sig, args),
        Value::List(list) => list_method(interp, target, list, sig, args),
        Value::Map(map) => map_method(interp, target, map, sig, args),
        Value::Stream(stream) => stream_method(interp, *stream, sig, args),
        _ => object_method(interp, target, sig, args),
    }
}

fn object_method(interp: &mut Interpreter, target: &Value, sig: &str, args: Vec<Value>) -> Exec<Value> {
    let value = match sig {
        "toString()" => Value::str(&default_to_string(interp, target)?),
        "equals(Object)" => Value::Bool(equal_values(target, &arg(&args, 0))),
        "hashCode()" => Value::Int(hash_of(target)),
        "getMessage()" => instance_field(target, MESSAGE_FIELD),
        "name()" => instance_field(target, ENUM_NAME_FIELD),
        "ordinal()" => instance_field(target, ENUM_ORDINAL_FIELD),
        "printStackTrace()" => {
            let mut text = default_to_string(interp, target)?;
            text.push('\n');
            if let Value::Object(instance) = target {
                for frame in instance.stack.borrow().iter() {
                    text.push_str(&format!("\t{frame}\n"));
                }
            }
            interp.write(StreamKind::Err, &text);
            Value::Null
        }
        "intValue()" => Value::Int(target.as_i32()),
        "longValue()" => Value::Long(target.as_i64()),
        "doubleValue()" => Value::Double(target.as_f64()),
        "booleanValue()" => Value::Bool(target.as_bool()),
        "charValue()" => Value::Char(target.as_char()),
        _ => return Err(unknown(interp, &target.class_name(), sig)),
    };
    Ok(value)
}

fn instance_field(target: &Value, field: &str) -> Value {
    match target {
        Value::Object(instance) => instance.fields.borrow().get(field).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// `Object.toString` before any user override.
fn default_to_string(interp: &mut Interpreter, target: &Value) -> Exec<String> {
    let Value::Object(instance) = target else {
        return interp.to_display(target);
    };
    let fields = instance.fields.borrow();
    if let Some(Value::Str(name)) = fields.get(ENUM_NAME_FIELD) {
        return Ok(name.to_string());
    }
    match fields.get(MESSAGE_FIELD) {
        Some(Value::Str(message)) => Ok(format!("{}: {message}", instance.class)),
        Some(_) => Ok(instance.class.to_string()),
        None => Ok(format!("{}@{:x}", instance.class, identity_hash(instance.id))),
    }
}

fn hash_of(value: &Value) -> i32 {
    match value {
        Value::Null => 0,
        Value::Int(v) => *v,
        Value::Long(v) => (*v ^ ((*v as u64) >> 32) as i64) as i32,
        Value::Double(v) => {
            let bits = v.to_bits();
            (bits ^ (bits >> 32)) as i32
        }
        Value::Bool(v) => {
            if *v {
                1231
            } else {
                1237
            }
        }
        Value::Char(c) => *c as i32,
        Value::Str(text) => string_hash(text),
        Value::List(list) => list
            .items
            .borrow()
            .iter()
            .fold(1i32, |hash, item| hash.wrapping_mul(31).wrapping_add(hash_of(item))),
        other => other.object_id().map_or(0, identity_hash),
    }
}

// ---- String ---------------------------------------------------------------

fn string_method(interp: &mut Interpreter, text: &Rc<str>, sig: &str, args: Vec<Value>) -> Exec<Value> {
    let len = text.chars().count();
    let value = match sig {
        "length()" => Value::Int(len_i32(len)),
        "isEmpty()" => Value::Bool(text.is_empty()),
        "isBlank()" => Value::Bool(text.chars().all(char::is_whitespace)),
        "charAt(int)" => {
            let index = arg(&args, 0).as_i32();
            match usize::try_from(index).ok().and_then(|i| text.chars().nth(i)) {
                Some(ch) => Value::Char(ch),
                None => {
                    return Err(interp.throw_new(
                        STRING_INDEX,
                        format!("Index {index} out of bounds for length {len}"),
                    ));
                }
            }
        }
        "substring(int)" | "substring(int,int)" => {
            let begin = arg(&args, 0).as_i32();
            let end = if args.len() > 1 { arg(&args, 1).as_i32() } else { len_i32(len) };
            if begin < 0 || end < begin || end > len_i32(len) {
                return Err(interp.throw_new(
                    STRING_INDEX,
                    format!("begin {begin}, end {end}, length {len}"),
                ));
            }
            let piece: String = text.chars().skip(begin as usize).take((end - begin) as usize).collect();
            Value::str(&piece)
        }
        "indexOf(String)" => {
            let needle = text_arg(interp, &args, 0)?;
            Value::Int(text.find(&*needle).map_or(-1, |b| len_i32(text[..b].chars().count())))
        }
        "lastIndexOf(String)" => {
            let needle = text_arg(interp, &args, 0)?;
            Value::Int(text.rfind(&*needle).map_or(-1, |b| len_i32(text[..b].chars().count())))
        }
        "contains(String)" => Value::Bool(text.contains(&*text_arg(interp, &args, 0)?)),
        "startsWith(String)" => Value::Bool(text.starts_with(&*text_arg(interp, &args, 0)?)),
        "endsWith(String)" => Value::Bool(text.ends_with(&*text_arg(interp, &args, 0)?)),
        "equalsIgnoreCase(String)" => Value::Bool(match arg(&args, 0) {
            Value::Str(other) => text.to_lowercase() == other.to_lowercase(),
            _ => false,
        }),
        "compareTo(String)" => {
            let other = text_arg(interp, &args, 0)?;
            Value::Int(compare_strings(text, &other))
        }
        "toUpperCase()" => Value::str(&text.to_uppercase()),
        "toLowerCase()" => Value::str(&text.to_lowercase()),
        "trim()" => Value::str(text.trim_matches(|c: char| c <= ' ')),
        "strip()" => Value::str(text.trim()),
        "concat(String)" => Value::str(&format!("{text}{}", text_arg(interp, &args, 0)?)),
        "replace(String,String)" => {
            let from = text_arg(interp, &args, 0)?;
            let to = text_arg(interp, &args, 1)?;
            Value::str(&text.replace(&*from, &to))
        }
        "repeat(int)" => {
            let count = arg(&args, 0).as_i32();
            match usize::try_from(count) {
                Ok(count) => Value::str(&text.repeat(count)),
                Err(_) => {
                    return Err(interp.throw_new(ILLEGAL_ARGUMENT, format!("count is negative: {count}")));
                }
            }
        }
        "split(String)" => {
            let pattern = text_arg(interp, &args, 0)?;
            let regex = compile(interp, &pattern)?;
            let parts: Vec<Value> = split(text, &regex).iter().map(|p| Value::str(p)).collect();
            interp.new_array(Type::string(), parts)
        }
        "matches(String)" => {
            let pattern = text_arg(interp, &args, 0)?;
            let regex = compile(interp, &format!("^(?:{pattern})$"))?;
            Value::Bool(regex.is_match(text))
        }
        "replaceAll(String,String)" | "replaceFirst(String,String)" => {
            let pattern = text_arg(interp, &args, 0)?;
            let regex = compile(interp, &pattern)?;
            let replacement = replacement(&text_arg(interp, &args, 1)?);
            let limit = if sig.starts_with("replaceAll") { 0 } else { 1 };
            Value::str(&regex.replacen(text, limit, replacement.as_str()))
        }
        "toCharArray()" => {
            let chars = text.chars().map(Value::Char).collect();
            interp.new_array(Type::Char, chars)
        }
        "equals(Object)" => Value::Bool(matches!(arg(&args, 0), Value::Str(other) if other == *text)),
        "hashCode()" => Value::Int(string_hash(text)),
        "toString()" => Value::Str(text.clone()),
        _ => return object_method(interp, &Value::Str(text.clone()), sig, args),
    };
    Ok(value)
}

/// Lexicographic comparison by UTF-16 code units.
fn compare_strings(a: &str, b: &str) -> i32 {
    let (a, b): (Vec<u16>, Vec<u16>) = (a.encode_utf16().collect(), b.encode_utf16().collect());
    for (x, y) in a.iter().zip(&b) {
        if x != y {
            return i32::from(*x) - i32::from(*y);
        }
    }
    len_i32(a.len()) - len_i32(b.len())
}

fn compile(interp: &mut Interpreter, pattern: &str) -> Exec<Regex> {
    Regex::new(pattern).map_err(|err| interp.throw_new(PATTERN_SYNTAX, err.to_string()))
}

/// `String.split` with no limit: a zero-width match at the start yields no
/// leading empty string and trailing empty strings are dropped.
pub(crate) fn split(text: &str, pattern: &Regex) -> Vec<String> {
    let mut parts = Vec::new();
    let mut from = 0;
    for found in pattern.find_iter(text) {
        if found.end() == 0 {
            continue;
        }
        parts.push(text[from..found.start()].to_string());
        from = found.end();
    }
    if parts.is_empty() {
        return vec![text.to_string()];
    }
    parts.push(text[from..].to_string());
    while parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }
    parts
}

/// Rewrites a `Matcher.replaceAll` replacement into the `regex` syntax:
/// `$1` becomes `${1}` and a backslash quotes the next character.
fn replacement(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('$') => out.push_str("$$"),
                Some(other) => out.push(other),
                None => {}
            },
            '$' => {
                let mut group = String::new();
                while let Some(digit) = chars.next_if(char::is_ascii_digit) {
                    group.push(digit);
                }
                if group.is_empty() {
                    out.push_str("$$");
                } else {
                    out.push_str(&format!("${{{group}}}"));
                }
            }
            other => out.push(other),
        }
    }
    out
}

// ---- StringBuilder, collections, streams ------------------------------------

fn builder_method(
    interp: &mut Interpreter,
    target: &Value,
    builder: &Rc<BuilderObj>,
    sig: &str,
    args: Vec<Value>,
) -> Exec<Value> {
    let value = match sig {
        "append(Object)" => {
            let piece = interp.to_display(&arg(&args, 0))?;
            builder.text.borrow_mut().push_str(&piece);
            target.clone()
        }
        "insert(int,Object)" => {
            let offset = arg(&args, 0).as_i32();
            let piece = interp.to_display(&arg(&args, 1))?;
            let len = builder.text.borrow().chars().count();
            let Some(at) = usize::try_from(offset).ok().filter(|o| *o <= len) else {
                return Err(interp.throw_new(STRING_INDEX, format!("offset {offset}, length {len}")));
            };
            let mut text = builder.text.borrow_mut();
            let byte = text.char_indices().nth(at).map_or(text.len(), |(b, _)| b);
            text.insert_str(byte, &piece);
            target.clone()
        }
        "reverse()" => {
            let reversed: String = builder.text.borrow().chars().rev().collect();
            *builder.text.borrow_mut() = reversed;
            target.clone()
        }
        "length()" => Value::Int(len_i32(builder.text.borrow().chars().count())),
        "charAt(int)" => {
            let index = arg(&args, 0).as_i32();
            let text = builder.text.borrow().clone();
            return string_method(interp, &Rc::<str>::from(text), "charAt(int)", vec![Value::Int(index)]);
        }
        "setLength(int)" => {
            let len = arg(&args, 0).as_i32();
            let Ok(len) = usize::try_from(len) else {
                return Err(interp.throw_new(STRING_INDEX, format!("String index out of range: {len}")));
            };
            let mut text = builder.text.borrow_mut();
            let current = text.chars().count();
            if len <= current {
                let cut = text.char_indices().nth(len).map_or(text.len(), |(b, _)| b);
                text.truncate(cut);
            } else {
                text.extend(std::iter::repeat_n('\0', len - current));
            }
            Value::Null
        }
        "toString()" => Value::str(&builder.text.borrow()),
        _ => return object_method(interp, target, sig, args),
    };
    Ok(value)
}

fn list_index(interp: &mut Interpreter, index: i32, len: usize) -> Exec<usize> {
    match usize::try_from(index) {
        Ok(idx) if idx < len => Ok(idx),
        _ => Err(interp.throw_new(INDEX_OUT_OF_BOUNDS, format!("Index {index} out of bounds for length {len}"))),
    }
}

fn list_method(
    interp: &mut Interpreter,
    target: &Value,
    list: &Rc<ListObj>,
    sig: &str,
    args: Vec<Value>,
) -> Exec<Value> {
    let mutating = matches!(
        sig,
        "add(Object)" | "add(int,Object)" | "set(int,Object)" | "remove(int)" | "clear()"
    );
    if mutating && list.immutable {
        return Err(interp.throw_new(UNSUPPORTED, None::<String>));
    }
    let items = list.items.borrow().clone();
    let len = items.len();
    let value = match sig {
        "add(Object)" => {
            list.items.borrow_mut().push(arg(&args, 0));
            Value::Bool(true)
        }
        "add(int,Object)" => {
            let index = arg(&args, 0).as_i32();
            match usize::try_from(index) {
                Ok(idx) if idx <= len => list.items.borrow_mut().insert(idx, arg(&args, 1)),
                _ => {
                    return Err(interp.throw_new(
                        INDEX_OUT_OF_BOUNDS,
                        format!("Index: {index}, Size: {len}"),
                    ));
                }
            }
            Value::Null
        }
        "get(int)" => {
            let idx = list_index(interp, arg(&args, 0).as_i32(), len)?;
            list.items.borrow()[idx].clone()
        }
        "set(int,Object)" => {
            let idx = list_index(interp, arg(&args, 0).as_i32(), len)?;
            std::mem::replace(&mut list.items.borrow_mut()[idx], arg(&args, 1))
        }
        "remove(int)" => {
            let idx = list_index(interp, arg(&args, 0).as_i32(), len)?;
            list.items.borrow_mut().remove(idx)
        }
        "size()" => Value::Int(len_i32(len)),
        "isEmpty()" => Value::Bool(len == 0),
        "contains(Object)" => Value::Bool(position(interp, &items, &arg(&args, 0))?.is_some()),
        "indexOf(Object)" => {
            let found = position(interp, &items, &arg(&args, 0))?;
            Value::Int(found.map_or(-1, len_i32))
        }
        "clear()" => {
            list.items.borrow_mut().clear();
            Value::Null
        }
        "toString()" => Value::str(&interp.to_display(target)?),
        _ => return object_method(interp, target, sig, args),
    };
    Ok(value)
}

/// Index of the first element equal to `needle`.
fn position(interp: &mut Interpreter, items: &[Value], needle: &Value) -> Exec<Option<usize>> {
    for (idx, item) in items.iter().enumerate() {
        let equal = match needle {
            Value::Null => item.is_null(),
            _ => interp.values_equal(needle, item)?,
        };
        if equal {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

fn map_method(
    interp: &mut Interpreter,
    target: &Value,
    map: &Rc<MapObj>,
    sig: &str,
    args: Vec<Value>,
) -> Exec<Value> {
    let keys: Vec<Value> = map.entries.borrow().iter().map(|(k, _)| k.clone()).collect();
    let key = arg(&args, 0);
    let value = match sig {
        "put(Object,Object)" => match position(interp, &keys, &key)? {
            Some(idx) => std::mem::replace(&mut map.entries.borrow_mut()[idx].1, arg(&args, 1)),
            None => {
                map.entries.borrow_mut().push((key, arg(&args, 1)));
                Value::Null
            }
        },
        "get(Object)" => match position(interp, &keys, &key)? {
            Some(idx) => map.entries.borrow()[idx].1.clone(),
            None => Value::Null,
        },
        "getOrDefault(Object,Object)" => match position(interp, &keys, &key)? {
            Some(idx) => map.entries.borrow()[idx].1.clone(),
            None => arg(&args, 1),
        },
        "containsKey(Object)" => Value::Bool(position(interp, &keys, &key)?.is_some()),
        "remove(Object)" => match position(interp, &keys, &key)? {
            Some(idx) => map.entries.borrow_mut().remove(idx).1,
            None => Value::Null,
        },
        "size()" => Value::Int(len_i32(keys.len())),
        "isEmpty()" => Value::Bool(keys.is_empty()),
        "clear()" => {
            map.entries.borrow_mut().clear();
            Value::Null
        }
        "toString()" => Value::str(&interp.to_display(target)?),
        _ => return object_method(interp, target, sig, args),
    };
    Ok(value)
}

fn stream_method(interp: &mut Interpreter, stream: StreamKind, sig: &str, args: Vec<Value>) -> Exec<Value> {
    match sig {
        "println()" => interp.write(stream, "\n"),
        "println(Object)" => {
            let text = interp.to_display(&arg(&args, 0))?;
            interp.write(stream, &format!("{text}\n"));
        }
        "print(Object)" => {
            let text = interp.to_display(&arg(&args, 0))?;
            interp.write(stream, &text);
        }
        "printf(String,Object[])" => {
            let format = text_arg(interp, &args, 0)?;
            let text = format_text(interp, &format, &varargs(&args, 1))?;
            interp.write(stream, &text);
            return Ok(Value::Stream(stream));
        }
        "flush()" => {}
        _ => return object_method(interp, &Value::Stream(stream), sig, args),
    }
    Ok(Value::Null)
}

// ---- String.format -----------------------------------------------------------

/// `String.format` for the `%[flags][width][.precision]conversion`
/// conversions `d s S f e x X c b n %`.
pub(crate) fn format_text(interp: &mut Interpreter, format: &str, args: &[Value]) -> Exec<String> {
    let chars: Vec<char> = format.chars().collect();
    let mut out = String::new();
    let mut next_arg = 0;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        let mut flags = String::new();
        while let Some(&c) = chars.get(i).filter(|c| "-0+, #".contains(**c)) {
            flags.push(c);
            i += 1;
        }
        let width = digits(&chars, &mut i);
        let precision = if chars.get(i) == Some(&'.') {
            i += 1;
            digits(&chars, &mut i)
        } else {
            None
        };
        let Some(&conversion) = chars.get(i) else {
            return Err(interp.throw_new(ILLEGAL_ARGUMENT, "Format specifier '%'".to_string()));
        };
        i += 1;
        let spec: String = chars[start..i].iter().collect();
        if matches!(conversion, '%' | 'n') {
            out.push_str(if conversion == '%' { "%" } else { "\n" });
            continue;
        }
        let Some(value) = args.get(next_arg).cloned() else {
            return Err(interp.throw_new(ILLEGAL_ARGUMENT, format!("Format specifier '{spec}'")));
        };
        next_arg += 1;
        let mismatch = |interp: &mut Interpreter, value: &Value| {
            interp.throw_new(ILLEGAL_ARGUMENT, format!("{conversion} != {}", value.class_name()))
        };
        let numeric = matches!(conversion, 'd' | 'f' | 'e' | 'x' | 'X');
        let text = match conversion {
            'd' => match value {
                Value::Int(_) | Value::Long(_) => signed(value.as_i64().to_string(), &flags),
                Value::Null => "null".to_string(),
                other => return Err(mismatch(interp, &other)),
            },
            'f' | 'e' => match value {
                Value::Double(v) => {
                    let places = precision.unwrap_or(6);
                    let text = if conversion == 'f' {
                        format!("{v:.places$}")
                    } else {
                        scientific(v, places)
                    };
                    signed(text, &flags)
                }
                Value::Null => "null".to_string(),
                other => return Err(mismatch(interp, &other)),
            },
            'x' | 'X' => {
                let text = match value {
                    Value::Int(v) => format!("{:x}", v as u32),
                    Value::Long(v) => format!("{:x}", v as u64),
                    Value::Null => "null".to_string(),
                    other => return Err(mismatch(interp, &other)),
                };
                if conversion == 'X' { text.to_uppercase() } else { text }
            }
            'c' => match value {
                Value::Char(c) => c.to_string(),
                Value::Int(v) => crate::value::int_to_char(v).to_string(),
                Value::Null => "null".to_string(),
                other => return Err(mismatch(interp, &other)),
            },
            'b' | 'B' => {
                let text = match value {
                    Value::Null => "false".to_string(),
                    Value::Bool(v) => v.to_string(),
                    _ => "true".to_string(),
                };
                if conversion == 'B' { text.to_uppercase() } else { text }
            }
            's' | 'S' => {
                let mut text = interp.to_display(&value)?;
                if let Some(limit) = precision {
                    text = text.chars().take(limit).collect();
                }
                if conversion == 'S' { text.to_uppercase() } else { text }
            }
            other => {
                return Err(interp.throw_new(ILLEGAL_ARGUMENT, format!("Conversion = '{other}'")));
            }
        };
        out.push_str(&pad(text, width, &flags, numeric));
    }
    Ok(out)
}

fn digits(chars: &[char], i: &mut usize) -> Option<usize> {
    let start = *i;
    while chars.get(*i).is_some_and(char::is_ascii_digit) {
        *i += 1;
    }
    let text: String = chars[start..*i].iter().collect();
    text.parse().ok()
}

/// Applies the `+` and `,` flags to a formatted number.
fn signed(text: String, flags: &str) -> String {
    let (sign, body) = match text.strip_prefix('-') {
        Some(body) => ("-", body.to_string()),
        None if flags.contains('+') => ("+", text),
        None => ("", text),
    };
    let body = if flags.contains(',') { group(&body) } else { body };
    format!("{sign}{body}")
}

fn group(number: &str) -> String {
    let (int_part, rest) = match number.find('.') {
        Some(dot) => number.split_at(dot),
        None => (number, ""),
    };
    let mut grouped = String::new();
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{grouped}{rest}")
}

fn scientific(value: f64, digits: usize) -> String {
    let text = format!("{value:.digits$e}");
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.abs())
}

fn pad(text: String, width: Option<usize>, flags: &str, numeric: bool) -> String {
    let Some(width) = width else {
        return text;
    };
    let len = text.chars().count();
    if len >= width {
        return text;
    }
    let fill = width - len;
    if flags.contains('-') {
        format!("{text}{}", " ".repeat(fill))
    } else if flags.contains('0') && numeric {
        let (sign, body) = match text.chars().next() {
            Some(c @ ('-' | '+')) => (c.to_string(), text[1..].to_string()),
            _ => (String::new(), text),
        };
        format!("{sign}{}{body}", "0".repeat(fill))
    } else {
        format!("{}{text}", " ".repeat(fill))
    }
}

#[cfg(test)]
mod tests {
    use super::{format_text, replacement, string_method};
    use crate::interp::Interpreter;
    use crate::value::Value;
    use crate::OutputSink;
    use regex::Regex;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    fn interpreter() -> Interpreter {
        let out: OutputSink = Arc::new(Mutex::new(Vec::new()));
        let err: OutputSink = Arc::new(Mutex::new(Vec::new()));
        Interpreter::new(out, err)
    }

    fn format(text: &str, args: &[Value]) -> String {
        let mut interp = interpreter();
        match format_text(&mut interp, text, args) {
            Ok(out) => out,
            Err(_) => panic!("format of {text:?} should succeed"),
        }
    }

    #[test]
    fn format_supports_common_conversions() {
        assert_eq!(format("%d items", &[Value::Int(3)]), "3 items");
        assert_eq!(format("%5d|%-5d|", &[Value::Int(42), Value::Int(7)]), "   42|7    |");
        assert_eq!(format("%05d", &[Value::Int(-42)]), "-0042");
        assert_eq!(format("%.2f", &[Value::Double(3.14159)]), "3.14");
        assert_eq!(format("%,d", &[Value::Long(1234567)]), "1,234,567");
        assert_eq!(format("%s=%b%n", &[Value::str("ok"), Value::Bool(true)]), "ok=true\n");
        assert_eq!(format("%x %c %%", &[Value::Int(255), Value::Char('z')]), "ff z %");
        assert_eq!(format("%.3e", &[Value::Double(12345.678)]), "1.235e+04");
    }

    #[test]
    fn format_rejects_missing_arguments() {
        let mut interp = interpreter();
        assert!(format_text(&mut interp, "%s %s", &[Value::str("one")]).is_err());
        assert!(format_text(&mut interp, "%d", &[Value::str("one")]).is_err());
    }

    fn split(text: &str, pattern: &str) -> Vec<String> {
        let regex = Regex::new(pattern).expect("pattern should compile");
        super::split(text, &regex)
    }

    #[test]
    fn split_follows_java_rules() {
        assert_eq!(split("a,b,,c,,", ","), vec!["a", "b", "", "c"]);
        assert_eq!(split(" a  b", "\\s+"), vec!["", "a", "b"]);
        assert_eq!(split("a.b", "\\."), vec!["a", "b"]);
        assert_eq!(split("a;b,c", "[,;]"), vec!["a", "b", "c"]);
        assert_eq!(split("abc", ""), vec!["a", "b", "c"]);
        assert_eq!(split("abc", ","), vec!["abc"]);
        assert_eq!(split("", ","), vec![""]);
        assert_eq!(split("a1b22c", "\\d+"), vec!["a", "b", "c"]);
        assert_eq!(split("x-y_z", "[a-z]"), vec!["", "-", "_"]);
    }

    #[test]
    fn replacement_maps_group_references() {
        assert_eq!(replacement("<$1>"), "<${1}>");
        assert_eq!(replacement("$12$"), "${12}$$");
        assert_eq!(replacement("\\$x\\\\"), "$$x\\");
    }

    #[test]
    fn regex_methods_on_strings() {
        let mut interp = interpreter();
        let text: Rc<str> = Rc::from("2024-10-14");
        let mut call = |sig: &str, args: &[&str]| {
            let args = args.iter().map(|a| Value::str(a)).collect();
            match string_method(&mut interp, &text, sig, args) {
                Ok(Value::Bool(found)) => found.to_string(),
                Ok(Value::Str(out)) => out.to_string(),
                Ok(_) => panic!("{sig} should return a boolean or a string"),
                Err(_) => panic!("{sig} should succeed"),
            }
        };
        assert_eq!(call("matches(String)", &["\\d{4}-\\d{2}-\\d{2}"]), "true");
        assert_eq!(call("matches(String)", &["\\d{4}"]), "false");
        assert_eq!(
            call("replaceAll(String,String)", &["(\\d+)-(\\d+)-(\\d+)", "$3/$2/$1"]),
            "14/10/2024"
        );
        assert_eq!(call("replaceFirst(String,String)", &["\\d", "#"]), "#024-10-14");
    }

    #[test]
    fn malformed_pattern_throws() {
        let mut interp = interpreter();
        let text: Rc<str> = Rc::from("a(b");
        assert!(string_method(&mut interp, &text, "split(String)", vec![Value::str("(")]).is_err());
    }
}
