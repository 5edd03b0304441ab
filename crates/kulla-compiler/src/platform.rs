//! Catalog of the platform classes snippets can use. The interpreter provides
//! the behavior; this module only knows their shapes.

use crate::types::{ClassInfo, ClassKind, FieldInfo, MethodInfo, Origin, Type};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

pub const PACKAGES: &[&str] = &["java", "java.io", "java.lang", "java.util", "java.util.regex"];

struct Def {
    name: &'static str,
    kind: ClassKind,
    superclass: Option<&'static str>,
    interfaces: &'static [&'static str],
    members: &'static [&'static str],
}

const fn class(
    name: &'static str,
    superclass: Option<&'static str>,
    members: &'static [&'static str],
) -> Def {
    Def {
        name,
        kind: ClassKind::Class,
        superclass,
        interfaces: &[],
        members,
    }
}

const THROWABLE_MEMBERS: &[&str] = &["new()", "new(String)"];

// Member grammar: `[static] [abstract] <ret> <name>(<params>)`, `new(<params>)`
// for constructors, and `[static] [final] <type> <name>` for fields. `T...`
// marks a varargs parameter.
const DEFS: &[Def] = &[
    class(
        "java.lang.Object",
        None,
        &[
            "new()",
            "String toString()",
            "boolean equals(Object)",
            "int hashCode()",
        ],
    ),
    class(
        "java.lang.String",
        Some("java.lang.Object"),
        &[
            "new()",
            "new(String)",
            "int length()",
            "char charAt(int)",
            "boolean isEmpty()",
            "boolean isBlank()",
            "String substring(int)",
            "String substring(int,int)",
            "int indexOf(String)",
            "int lastIndexOf(String)",
            "boolean contains(String)",
            "boolean startsWith(String)",
            "boolean endsWith(String)",
            "boolean equalsIgnoreCase(String)",
            "int compareTo(String)",
            "String toUpperCase()",
            "String toLowerCase()",
            "String trim()",
            "String strip()",
            "String concat(String)",
            "String replace(String,String)",
            "boolean matches(String)",
            "String replaceAll(String,String)",
            "String replaceFirst(String,String)",
            "String repeat(int)",
            "String[] split(String)",
            "char[] toCharArray()",
            "static String valueOf(Object)",
            "static String format(String,Object...)",
            "static String join(String,Object...)",
        ],
    ),
    class(
        "java.lang.StringBuilder",
        Some("java.lang.Object"),
        &[
            "new()",
            "new(String)",
            "StringBuilder append(Object)",
            "StringBuilder insert(int,Object)",
            "StringBuilder reverse()",
            "int length()",
            "char charAt(int)",
            "void setLength(int)",
        ],
    ),
    class(
        "java.lang.Math",
        Some("java.lang.Object"),
        &[
            "static final double PI",
            "static final double E",
            "static int abs(int)",
            "static long abs(long)",
            "static double abs(double)",
            "static int max(int,int)",
            "static long max(long,long)",
            "static double max(double,double)",
            "static int min(int,int)",
            "static long min(long,long)",
            "static double min(double,double)",
            "static double pow(double,double)",
            "static double sqrt(double)",
            "static double floor(double)",
            "static double ceil(double)",
            "static long round(double)",
            "static double random()",
        ],
    ),
    class(
        "java.lang.System",
        Some("java.lang.Object"),
        &[
            "static final PrintStream out",
            "static final PrintStream err",
            "static long currentTimeMillis()",
            "static long nanoTime()",
            "static void exit(int)",
            "static String lineSeparator()",
            "static String getProperty(String)",
        ],
    ),
    class(
        "java.lang.Integer",
        Some("java.lang.Number"),
        &[
            "static final int MAX_VALUE",
            "static final int MIN_VALUE",
            "static int parseInt(String)",
            "static Integer valueOf(int)",
            "static String toString(int)",
            "static String toBinaryString(int)",
            "static String toHexString(int)",
            "int intValue()",
        ],
    ),
    class(
        "java.lang.Long",
        Some("java.lang.Number"),
        &[
            "static final long MAX_VALUE",
            "static final long MIN_VALUE",
            "static long parseLong(String)",
            "static Long valueOf(long)",
            "long longValue()",
        ],
    ),
    class(
        "java.lang.Double",
        Some("java.lang.Number"),
        &[
            "static final double MAX_VALUE",
            "static final double MIN_VALUE",
            "static final double NaN",
            "static double parseDouble(String)",
            "static Double valueOf(double)",
            "static boolean isNaN(double)",
            "double doubleValue()",
        ],
    ),
    class(
        "java.lang.Number",
        Some("java.lang.Object"),
        &["int intValue()", "long longValue()", "double doubleValue()"],
    ),
    class(
        "java.lang.Boolean",
        Some("java.lang.Object"),
        &[
            "static boolean parseBoolean(String)",
            "static Boolean valueOf(boolean)",
            "boolean booleanValue()",
        ],
    ),
    class(
        "java.lang.Character",
        Some("java.lang.Object"),
        &[
            "static boolean isDigit(char)",
            "static boolean isLetter(char)",
            "static boolean isLetterOrDigit(char)",
            "static boolean isWhitespace(char)",
            "static boolean isUpperCase(char)",
            "static boolean isLowerCase(char)",
            "static char toUpperCase(char)",
            "static char toLowerCase(char)",
            "char charValue()",
        ],
    ),
    class(
        "java.lang.Thread",
        Some("java.lang.Object"),
        &["static void sleep(long)"],
    ),
    class(
        "java.lang.Throwable",
        Some("java.lang.Object"),
        &[
            "new()",
            "new(String)",
            "String getMessage()",
            "void printStackTrace()",
        ],
    ),
    class(
        "java.lang.Exception",
        Some("java.lang.Throwable"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.Error",
        Some("java.lang.Throwable"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.StackOverflowError",
        Some("java.lang.Error"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.OutOfMemoryError",
        Some("java.lang.Error"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.RuntimeException",
        Some("java.lang.Exception"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.InterruptedException",
        Some("java.lang.Exception"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.IllegalArgumentException",
        Some("java.lang.RuntimeException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.NumberFormatException",
        Some("java.lang.IllegalArgumentException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.util.regex.PatternSyntaxException",
        Some("java.lang.IllegalArgumentException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.IllegalStateException",
        Some("java.lang.RuntimeException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.ArithmeticException",
        Some("java.lang.RuntimeException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.NullPointerException",
        Some("java.lang.RuntimeException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.ClassCastException",
        Some("java.lang.RuntimeException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.UnsupportedOperationException",
        Some("java.lang.RuntimeException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.IndexOutOfBoundsException",
        Some("java.lang.RuntimeException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.ArrayIndexOutOfBoundsException",
        Some("java.lang.IndexOutOfBoundsException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.StringIndexOutOfBoundsException",
        Some("java.lang.IndexOutOfBoundsException"),
        THROWABLE_MEMBERS,
    ),
    class(
        "java.lang.NegativeArraySizeException",
        Some("java.lang.RuntimeException"),
        THROWABLE_MEMBERS,
    ),
    Def {
        name: "java.lang.Runnable",
        kind: ClassKind::Interface,
        superclass: None,
        interfaces: &[],
        members: &["abstract void run()"],
    },
    Def {
        name: "java.util.List",
        kind: ClassKind::Interface,
        superclass: None,
        interfaces: &[],
        members: &[
            "abstract boolean add(Object)",
            "abstract void add(int,Object)",
            "abstract Object get(int)",
            "abstract Object set(int,Object)",
            "abstract Object remove(int)",
            "abstract int size()",
            "abstract boolean isEmpty()",
            "abstract boolean contains(Object)",
            "abstract int indexOf(Object)",
            "abstract void clear()",
            "static List of(Object...)",
        ],
    },
    Def {
        name: "java.util.ArrayList",
        kind: ClassKind::Class,
        superclass: Some("java.lang.Object"),
        interfaces: &["java.util.List"],
        members: &[
            "new()",
            "new(int)",
            "boolean add(Object)",
            "void add(int,Object)",
            "Object get(int)",
            "Object set(int,Object)",
            "Object remove(int)",
            "int size()",
            "boolean isEmpty()",
            "boolean contains(Object)",
            "int indexOf(Object)",
            "void clear()",
        ],
    },
    Def {
        name: "java.util.Map",
        kind: ClassKind::Interface,
        superclass: None,
        interfaces: &[],
        members: &[
            "abstract Object put(Object,Object)",
            "abstract Object get(Object)",
            "abstract Object getOrDefault(Object,Object)",
            "abstract boolean containsKey(Object)",
            "abstract Object remove(Object)",
            "abstract int size()",
            "abstract boolean isEmpty()",
            "abstract void clear()",
        ],
    },
    Def {
        name: "java.util.HashMap",
        kind: ClassKind::Class,
        superclass: Some("java.lang.Object"),
        interfaces: &["java.util.Map"],
        members: &[
            "new()",
            "Object put(Object,Object)",
            "Object get(Object)",
            "Object getOrDefault(Object,Object)",
            "boolean containsKey(Object)",
            "Object remove(Object)",
            "int size()",
            "boolean isEmpty()",
            "void clear()",
        ],
    },
    class(
        "java.io.PrintStream",
        Some("java.lang.Object"),
        &[
            "void println()",
            "void println(Object)",
            "void print(Object)",
            "PrintStream printf(String,Object...)",
            "void flush()",
        ],
    ),
];

fn qualify(simple: &str) -> String {
    DEFS.iter()
        .map(|def| def.name)
        .find(|name| crate::types::simple_name(name) == simple)
        .map(str::to_string)
        .unwrap_or_else(|| simple.to_string())
}

fn parse_type(text: &str) -> Type {
    if let Some(elem) = text.strip_suffix("[]") {
        return Type::array_of(parse_type(elem));
    }
    if let Some(elem) = text.strip_suffix("...") {
        return Type::array_of(parse_type(elem));
    }
    match text {
        "int" => Type::Int,
        "long" => Type::Long,
        "double" => Type::Double,
        "boolean" => Type::Boolean,
        "char" => Type::Char,
        "void" => Type::Void,
        other => Type::Class(Arc::from(qualify(other).as_str())),
    }
}

fn build(def: &Def) -> ClassInfo {
    let mut info = ClassInfo::new(def.name, def.kind, Origin::Platform);
    info.superclass = def.superclass.map(Arc::from);
    info.interfaces = def.interfaces.iter().map(|i| Arc::from(*i)).collect();
    for member in def.members {
        let mut words: Vec<&str> = member.split_whitespace().collect();
        let is_static = words.first() == Some(&"static");
        if is_static {
            words.remove(0);
        }
        let is_final = words.first() == Some(&"final");
        if is_final {
            words.remove(0);
        }
        let is_abstract = words.first() == Some(&"abstract");
        if is_abstract {
            words.remove(0);
        }
        let rest = words.join(" ");
        let Some((head, params)) = rest.split_once('(') else {
            if let [ty, name] = words.as_slice() {
                info.fields.push(FieldInfo {
                    name: name.to_string(),
                    ty: parse_type(ty),
                    is_static,
                    is_final,
                });
            }
            continue;
        };
        let params_text = params.trim_end_matches(')');
        let varargs = params_text.ends_with("...");
        let params: Vec<Type> = params_text
            .split(',')
            .filter(|p| !p.is_empty())
            .map(parse_type)
            .collect();
        if head == "new" {
            info.constructors.push(MethodInfo {
                name: "<init>".to_string(),
                owner: info.name.clone(),
                params,
                ret: Type::Void,
                is_static: false,
                is_abstract: false,
                varargs,
            });
            continue;
        }
        let Some((ret, name)) = head.split_once(' ') else {
            continue;
        };
        info.methods.push(MethodInfo {
            name: name.to_string(),
            owner: info.name.clone(),
            params,
            ret: parse_type(ret),
            is_static,
            is_abstract,
            varargs,
        });
    }
    info
}

fn catalog() -> &'static HashMap<String, Arc<ClassInfo>> {
    static CATALOG: OnceLock<HashMap<String, Arc<ClassInfo>>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        DEFS.iter()
            .map(|def| (def.name.to_string(), Arc::new(build(def))))
            .collect()
    })
}

/// Platform class by qualified name.
pub fn platform_class(name: &str) -> Option<Arc<ClassInfo>> {
    catalog().get(name).cloned()
}

/// All platform classes, sorted by qualified name.
pub fn platform_classes() -> Vec<Arc<ClassInfo>> {
    let mut all: Vec<Arc<ClassInfo>> = catalog().values().cloned().collect();
    all.sort_by(|a, b| a.name.cmp(&b.name));
    all
}

pub fn is_platform_package(name: &str) -> bool {
    PACKAGES.contains(&name)
}

/// True for throwable platform classes, whose instances carry a message.
pub fn is_throwable(name: &str) -> bool {
    let mut current = platform_class(name);
    while let Some(info) = current {
        if &*info.name == "java.lang.Throwable" {
            return true;
        }
        current = info.superclass.as_deref().and_then(platform_class);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::{is_throwable, platform_class};
    use crate::types::Type;

    #[test]
    fn catalog_parses_members() {
        let string = platform_class("java.lang.String").expect("String should exist");
        let substring: Vec<_> = string.methods_named("substring").collect();
        assert_eq!(substring.len(), 2);
        assert_eq!(substring[1].params, vec![Type::Int, Type::Int]);

        let math = platform_class("java.lang.Math").expect("Math should exist");
        let pi = math.field("PI").expect("PI should exist");
        assert!(pi.is_static && pi.ty == Type::Double);

        let system = platform_class("java.lang.System").expect("System should exist");
        assert_eq!(
            system.field("out").map(|f| f.ty.clone()),
            Some(Type::class("java.io.PrintStream"))
        );
    }

    #[test]
    fn varargs_and_throwables() {
        let format = platform_class("java.lang.String")
            .expect("String should exist")
            .methods_named("format")
            .next()
            .cloned()
            .expect("format should exist");
        assert!(format.varargs);
        assert!(is_throwable("java.lang.ArrayIndexOutOfBoundsException"));
        assert!(is_throwable("java.lang.OutOfMemoryError"));
        assert!(is_throwable("java.util.regex.PatternSyntaxException"));
        assert!(!is_throwable("java.lang.String"));
    }
}
