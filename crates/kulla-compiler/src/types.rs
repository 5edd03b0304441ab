use std::fmt;
use std::sync::Arc;

/// Static type of a value. Platform classes carry their qualified name,
/// user classes their simple name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Long,
    Double,
    Boolean,
    Char,
    Void,
    Null,
    Class(Arc<str>),
    Array(Box<Type>),
    /// Result of a failed resolution; compatible with everything so that one
    /// mistake reports once.
    Error,
}

pub const OBJECT: &str = "java.lang.Object";
pub const STRING: &str = "java.lang.String";

impl Type {
    pub fn class(name: &str) -> Type {
        Type::Class(Arc::from(name))
    }

    pub fn string() -> Type {
        Type::class(STRING)
    }

    pub fn object() -> Type {
        Type::class(OBJECT)
    }

    pub fn array_of(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Int | Type::Long | Type::Double | Type::Boolean | Type::Char
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Long | Type::Double | Type::Char)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Type::Int | Type::Long | Type::Char)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Class(_) | Type::Array(_) | Type::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Class(name) if &**name == STRING)
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Class(name) => Some(name),
            _ => None,
        }
    }

    /// Boxed class of a primitive.
    pub fn boxed(&self) -> Option<&'static str> {
        Some(match self {
            Type::Int => "java.lang.Integer",
            Type::Long => "java.lang.Long",
            Type::Double => "java.lang.Double",
            Type::Boolean => "java.lang.Boolean",
            Type::Char => "java.lang.Character",
            _ => return None,
        })
    }

    /// Primitive behind a box class.
    pub fn unboxed(&self) -> Option<Type> {
        let name = self.class_name()?;
        Some(match name {
            "java.lang.Integer" => Type::Int,
            "java.lang.Long" => Type::Long,
            "java.lang.Double" => Type::Double,
            "java.lang.Boolean" => Type::Boolean,
            "java.lang.Character" => Type::Char,
            _ => return None,
        })
    }

    /// Rank used by binary numeric promotion.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            Type::Char | Type::Int => Some(1),
            Type::Long => Some(2),
            Type::Double => Some(3),
            _ => None,
        }
    }

    /// Fully qualified rendering, e.g. `java.lang.String[]`.
    pub fn qualified(&self) -> String {
        match self {
            Type::Class(name) => name.to_string(),
            Type::Array(elem) => format!("{}[]", elem.qualified()),
            other => other.to_string(),
        }
    }
}

/// Last segment of a dotted name.
pub fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Long => f.write_str("long"),
            Type::Double => f.write_str("double"),
            Type::Boolean => f.write_str("boolean"),
            Type::Char => f.write_str("char"),
            Type::Void => f.write_str("void"),
            Type::Null => f.write_str("<nulltype>"),
            Type::Class(name) => f.write_str(simple_name(name)),
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Error => f.write_str("<any>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Class,
    Interface,
    Enum,
}

impl ClassKind {
    pub fn noun(self) -> &'static str {
        match self {
            ClassKind::Class => "class",
            ClassKind::Interface => "interface",
            ClassKind::Enum => "enum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Platform,
    User,
    /// Found on the class path; members are unknown.
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub owner: Arc<str>,
    pub params: Vec<Type>,
    pub ret: Type,
    pub is_static: bool,
    pub is_abstract: bool,
    /// Last parameter is an array that also accepts trailing arguments.
    pub varargs: bool,
}

impl MethodInfo {
    /// Erased signature key, `name(int,String)`. Calls bind by this key.
    pub fn sig(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    /// Human form, `name(int, String)`.
    pub fn display(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .enumerate()
            .map(|(idx, p)| match p {
                Type::Array(elem) if self.varargs && idx + 1 == self.params.len() => {
                    format!("{elem}...")
                }
                other => other.to_string(),
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }

    /// `int sum(int, int)` style rendering for documentation lookups.
    pub fn signature_line(&self) -> String {
        let prefix = if self.name == "<init>" {
            String::new()
        } else {
            format!("{} ", self.ret)
        };
        let shown = if self.name == "<init>" {
            self.display()
                .replacen("<init>", simple_name(&self.owner), 1)
        } else {
            self.display()
        };
        format!("{prefix}{shown}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: Arc<str>,
    pub kind: ClassKind,
    pub origin: Origin,
    pub superclass: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub constructors: Vec<MethodInfo>,
    pub is_abstract: bool,
    pub enum_constants: Vec<String>,
}

impl ClassInfo {
    pub fn new(name: &str, kind: ClassKind, origin: Origin) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            origin,
            superclass: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            is_abstract: kind == ClassKind::Interface,
            enum_constants: Vec::new(),
        }
    }

    pub fn simple_name(&self) -> &str {
        simple_name(&self.name)
    }

    pub fn package(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(pkg, _)| pkg)
    }

    pub fn as_type(&self) -> Type {
        Type::Class(self.name.clone())
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodInfo> {
        self.methods.iter().filter(move |m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::{MethodInfo, Type};
    use std::sync::Arc;

    #[test]
    fn displays_simple_names() {
        assert_eq!(Type::string().to_string(), "String");
        assert_eq!(Type::array_of(Type::Int).to_string(), "int[]");
        assert_eq!(Type::string().qualified(), "java.lang.String");
    }

    #[test]
    fn method_keys_use_erased_parameters() {
        let method = MethodInfo {
            name: "format".to_string(),
            owner: Arc::from("java.lang.String"),
            params: vec![Type::string(), Type::array_of(Type::object())],
            ret: Type::string(),
            is_static: true,
            is_abstract: false,
            varargs: true,
        };
        assert_eq!(method.sig(), "format(String,Object[])");
        assert_eq!(method.display(), "format(String, Object...)");
        assert_eq!(method.signature_line(), "String format(String, Object...)");
    }
}
