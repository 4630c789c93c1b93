/// Capability Allowlist
///
/// **Core Responsibility:**
/// Define the complete global namespace visible to submitted code.
///
/// **Critical Properties:**
/// - Fixed at compile time, never extended per call
/// - No file, input, import, reflection or evaluation capability exists in
///   the table, so none can be reached by name
/// - Every sandbox execution seeds its fresh scope from this table only

use crate::runtime::builtins;
use crate::runtime::Builtin;

macro_rules! capability {
    ($name:ident) => {
        Builtin {
            name: stringify!($name),
            func: builtins::$name,
        }
    };
}

pub const ALLOWLIST: &[Builtin] = &[
    capability!(print),
    capability!(len),
    capability!(range),
    capability!(enumerate),
    capability!(str),
    capability!(int),
    capability!(float),
    capability!(list),
    capability!(dict),
    capability!(tuple),
    capability!(set),
    capability!(abs),
    capability!(max),
    capability!(min),
    capability!(sum),
    capability!(sorted),
    capability!(reversed),
    capability!(zip),
    capability!(map),
    capability!(filter),
    capability!(round),
    capability!(format),
];

/// The table handed to every interpreter.
pub fn capabilities() -> &'static [Builtin] {
    ALLOWLIST
}

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    ALLOWLIST.iter().find(|b| b.name == name)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    ALLOWLIST.iter().map(|b| b.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SandboxEngine;

    #[test]
    fn test_exact_name_set() {
        let mut got: Vec<&str> = names().collect();
        got.sort_unstable();
        let mut want = vec![
            "print", "len", "range", "enumerate", "str", "int", "float", "list", "dict", "tuple",
            "set", "abs", "max", "min", "sum", "sorted", "reversed", "zip", "map", "filter",
            "round", "format",
        ];
        want.sort_unstable();
        assert_eq!(got, want);
    }

    #[test]
    fn test_dangerous_names_are_absent() {
        for name in [
            "open", "input", "__import__", "eval", "exec", "compile", "getattr", "setattr",
            "globals", "locals", "vars", "type", "object", "__builtins__", "breakpoint", "help",
        ] {
            assert!(lookup(name).is_none(), "{} must not be allowlisted", name);
        }
    }

    #[test]
    fn test_omitted_names_fail_at_runtime() {
        let engine = SandboxEngine::default();
        for name in ["open", "input", "eval", "exec", "getattr", "globals", "type"] {
            let fault = engine.execute(&format!("{}('x')\n", name)).unwrap_err();
            assert_eq!(
                fault.to_string(),
                format!("NameError: name '{}' is not defined", name)
            );
        }
        let fault = engine.execute("import os\nprint(os.getcwd())\n").unwrap_err();
        assert_eq!(fault.to_string(), "ImportError: __import__ not found");
        let fault = engine.execute("from os import path\n").unwrap_err();
        assert_eq!(fault.to_string(), "ImportError: __import__ not found");
    }

    #[test]
    fn test_dunder_attributes_unreachable() {
        let engine = SandboxEngine::default();
        let fault = engine.execute("print([].__class__)\n").unwrap_err();
        assert_eq!(
            fault.to_string(),
            "AttributeError: 'list' object has no attribute '__class__'"
        );
    }
}
