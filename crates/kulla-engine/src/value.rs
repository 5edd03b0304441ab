//! Runtime values. Values live on the executor thread only, so heap objects
//! are shared with `Rc` and mutated through `RefCell`.

use crate::StackFrame;
use kulla_compiler::Type;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(Rc<str>),
    Array(Rc<ArrayObj>),
    Object(Rc<Instance>),
    Builder(Rc<BuilderObj>),
    List(Rc<ListObj>),
    Map(Rc<MapObj>),
    Stream(StreamKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Out,
    Err,
}

#[derive(Debug)]
pub struct ArrayObj {
    pub id: u32,
    /// Component type.
    pub elem: Type,
    pub items: RefCell<Vec<Value>>,
}

/// Instance of a user class, or of a platform class with no state of its own
/// beyond a message (`Object`, the throwables).
#[derive(Debug)]
pub struct Instance {
    pub id: u32,
    pub class: Arc<str>,
    pub fields: RefCell<HashMap<String, Value>>,
    /// Captured at construction for throwables.
    pub stack: RefCell<Vec<StackFrame>>,
}

#[derive(Debug)]
pub struct BuilderObj {
    pub id: u32,
    pub text: RefCell<String>,
}

#[derive(Debug)]
pub struct ListObj {
    pub id: u32,
    pub items: RefCell<Vec<Value>>,
    pub immutable: bool,
}

/// Insertion-ordered map keyed by value equality.
#[derive(Debug)]
pub struct MapObj {
    pub id: u32,
    pub entries: RefCell<Vec<(Value, Value)>>,
}

/// Field holding a throwable's message.
pub const MESSAGE_FIELD: &str = "$message";
/// Fields holding an enum constant's name and ordinal.
pub const ENUM_NAME_FIELD: &str = "$name";
pub const ENUM_ORDINAL_FIELD: &str = "$ordinal";

impl Value {
    pub fn str(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }

    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Int => Value::Int(0),
            Type::Long => Value::Long(0),
            Type::Double => Value::Double(0.0),
            Type::Boolean => Value::Bool(false),
            Type::Char => Value::Char('\0'),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Value::Int(v) => *v,
            Value::Long(v) => *v as i32,
            Value::Double(v) => *v as i32,
            Value::Char(c) => *c as i32,
            _ => 0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Int(v) => i64::from(*v),
            Value::Long(v) => *v,
            Value::Double(v) => *v as i64,
            Value::Char(c) => i64::from(u32::from(*c)),
            _ => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(v) => f64::from(*v),
            Value::Long(v) => *v as f64,
            Value::Double(v) => *v,
            Value::Char(c) => f64::from(u32::from(*c)),
            _ => 0.0,
        }
    }

    pub fn as_bool(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn as_char(&self) -> char {
        match self {
            Value::Char(c) => *c,
            other => int_to_char(other.as_i32()),
        }
    }

    /// Qualified runtime class name.
    pub fn class_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Int(_) => "java.lang.Integer".to_string(),
            Value::Long(_) => "java.lang.Long".to_string(),
            Value::Double(_) => "java.lang.Double".to_string(),
            Value::Bool(_) => "java.lang.Boolean".to_string(),
            Value::Char(_) => "java.lang.Character".to_string(),
            Value::Str(_) => "java.lang.String".to_string(),
            Value::Array(array) => format!("{}[]", array.elem.qualified()),
            Value::Object(instance) => instance.class.to_string(),
            Value::Builder(_) => "java.lang.StringBuilder".to_string(),
            Value::List(list) if list.immutable => "java.util.List".to_string(),
            Value::List(_) => "java.util.ArrayList".to_string(),
            Value::Map(_) => "java.util.HashMap".to_string(),
            Value::Stream(_) => "java.io.PrintStream".to_string(),
        }
    }

    /// Identity of heap objects, used for `==` and the default hash.
    pub fn object_id(&self) -> Option<u32> {
        match self {
            Value::Array(o) => Some(o.id),
            Value::Object(o) => Some(o.id),
            Value::Builder(o) => Some(o.id),
            Value::List(o) => Some(o.id),
            Value::Map(o) => Some(o.id),
            _ => None,
        }
    }
}

/// Conversion of an `int` to `char`, keeping the low 16 bits.
pub fn int_to_char(value: i32) -> char {
    char::from_u32(u32::from(value as u16)).unwrap_or('\u{FFFD}')
}

/// Reference comparison of `==`. Strings and boxed values compare by value.
pub fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Stream(x), Value::Stream(y)) => x == y,
        _ => match (a.object_id(), b.object_id()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// `equals` of platform values: lists compare element-wise.
pub fn equal_values(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.items.borrow(), y.items.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| equal_values(a, b))
        }
        _ => same(a, b),
    }
}

pub fn identity_hash(id: u32) -> i32 {
    (id.wrapping_mul(0x9E37_79B1) >> 1) as i32
}

pub fn string_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// `Double.toString` formatting.
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let magnitude = value.abs();
    if (1e-3..1e7).contains(&magnitude) {
        let text = format!("{value}");
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    } else {
        let text = format!("{value:e}");
        let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
        if mantissa.contains('.') {
            format!("{mantissa}E{exponent}")
        } else {
            format!("{mantissa}.0E{exponent}")
        }
    }
}

/// Source-like quoting of a string for value display.
pub fn quote_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        push_escaped(&mut out, ch, '"');
    }
    out.push('"');
    out
}

pub fn quote_char(ch: char) -> String {
    let mut out = String::from("'");
    push_escaped(&mut out, ch, '\'');
    out.push('\'');
    out
}

fn push_escaped(out: &mut String, ch: char, quote: char) {
    match ch {
        '\n' => out.push_str("\\n"),
        '\t' => out.push_str("\\t"),
        '\r' => out.push_str("\\r"),
        '\\' => out.push_str("\\\\"),
        '\0' => out.push_str("\\000"),
        c if c == quote => {
            out.push('\\');
            out.push(c);
        }
        c => out.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::{format_double, quote_char, quote_str, same, string_hash, Value};

    #[test]
    fn doubles_format_like_the_platform() {
        assert_eq!(format_double(1.0), "1.0");
        assert_eq!(format_double(3.14), "3.14");
        assert_eq!(format_double(1e10), "1.0E10");
        assert_eq!(format_double(1.5e-5), "1.5E-5");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(-0.0), "-0.0");
    }

    #[test]
    fn string_hash_matches_platform_values() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("hello"), 99162322);
    }

    #[test]
    fn quoting_escapes_controls() {
        assert_eq!(quote_str("a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(quote_char('\''), "'\\''");
    }

    #[test]
    fn strings_compare_by_content() {
        assert!(same(&Value::str("x"), &Value::str("x")));
        assert!(!same(&Value::Int(1), &Value::Long(1)));
    }
}
