//! Methods on built-in types (`str`, `list`, `dict`, `set`, `tuple`).
//!
//! Attribute access only resolves names listed here, so dunder attributes
//! and anything reflective stay out of reach of sandboxed code.

use super::builtins::{arity, index_arg, mapping_pairs, no_kwargs, sort_values, Kwargs};
use super::error::{ErrorKind, RunResult, RuntimeError};
use super::format::format_template;
use super::interpreter::{char_value, slice_indices, Interpreter};
use super::value::*;

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "endswith", "find", "format", "index", "isalnum", "isalpha",
    "isdecimal", "isdigit", "islower", "isnumeric", "isspace", "isupper", "join", "ljust", "lower",
    "lstrip", "partition", "replace", "rfind", "rjust", "rpartition", "rstrip", "split",
    "splitlines", "startswith", "strip", "swapcase", "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update", "values",
];

const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "discard", "intersection", "isdisjoint", "issubset",
    "issuperset", "pop", "remove", "symmetric_difference", "union", "update",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

pub fn has_method(receiver: &Value, name: &str) -> bool {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<Value> {
    match receiver {
        Value::Str(text) if name == "join" && args.len() == 1 => {
            let pieces = interp.collect(&args[0])?;
            str_method(text, name, vec![Value::list(pieces)], kwargs)
        }
        Value::Str(text) => str_method(text, name, args, kwargs),
        Value::List(list) => list_method(interp, list, name, args, kwargs),
        Value::Dict(dict) => dict_method(interp, dict, name, args, kwargs),
        Value::Set(set) => set_method(interp, set, name, args, kwargs),
        Value::Tuple(items) => {
            no_kwargs(name, &kwargs)?;
            sequence_method("tuple", items, name, &args)
        }
        other => Err(RuntimeError::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn str_arg<'a>(callee: &str, value: &'a Value) -> RunResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(RuntimeError::type_error(format!(
            "{}() argument must be str, not {}",
            callee,
            other.type_name()
        ))),
    }
}

fn optional_chars<'a>(callee: &str, args: &'a [Value]) -> RunResult<Option<&'a str>> {
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(value) => str_arg(callee, value).map(Some),
    }
}

fn fill_char(callee: &str, args: &[Value]) -> RunResult<char> {
    match args.get(1) {
        None => Ok(' '),
        Some(value) => {
            let text = str_arg(callee, value)?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(RuntimeError::type_error(
                    "The fill character must be exactly one character long",
                )),
            }
        }
    }
}

/// Sub-window of `text` given char-based `start`/`end` arguments, plus the
/// char offset the window starts at.
fn char_window<'a>(text: &'a str, start: Option<&Value>, end: Option<&Value>) -> RunResult<(&'a str, usize)> {
    let bound = |v: Option<&Value>| -> RunResult<Option<i64>> {
        match v {
            None | Some(Value::None) => Ok(None),
            Some(v) => index_arg(v).map(Some),
        }
    };
    let len = text.chars().count() as i64;
    let (start, end, _) = slice_indices(len, bound(start)?, bound(end)?, Some(1))?;
    let end = end.max(start);
    let byte_at = |pos: i64| {
        text.char_indices()
            .nth(pos as usize)
            .map(|(b, _)| b)
            .unwrap_or(text.len())
    };
    let (from, to) = (byte_at(start), byte_at(end));
    Ok((&text[from..to], start as usize))
}

fn char_offset(text: &str, byte: usize) -> i64 {
    text[..byte].chars().count() as i64
}

fn str_method(text: &std::rc::Rc<str>, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    if name == "format" {
        return Ok(Value::str(format_template(text, &args, &kwargs)?));
    }
    if name == "split" {
        let mut kw = Kwargs::new(kwargs);
        let sep = kw.take("sep");
        let maxsplit = kw.take("maxsplit");
        kw.finish("split")?;
        arity("split", &args, 0, 2)?;
        let sep = args.first().cloned().or(sep);
        let maxsplit = match args.get(1).cloned().or(maxsplit) {
            Some(v) => index_arg(&v)?,
            None => -1,
        };
        return split(text, sep.as_ref(), maxsplit);
    }
    no_kwargs(name, &kwargs)?;

    let text: &str = text;
    Ok(match name {
        "upper" => {
            arity(name, &args, 0, 0)?;
            Value::str(text.to_uppercase())
        }
        "lower" => {
            arity(name, &args, 0, 0)?;
            Value::str(text.to_lowercase())
        }
        "swapcase" => {
            arity(name, &args, 0, 0)?;
            Value::str(
                text.chars()
                    .flat_map(|c| -> Vec<char> {
                        if c.is_uppercase() {
                            c.to_lowercase().collect()
                        } else {
                            c.to_uppercase().collect()
                        }
                    })
                    .collect::<String>(),
            )
        }
        "capitalize" => {
            arity(name, &args, 0, 0)?;
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => Value::str(
                    first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect::<String>(),
                ),
                None => Value::str(""),
            }
        }
        "title" => {
            arity(name, &args, 0, 0)?;
            let mut out = String::with_capacity(text.len());
            let mut previous_cased = false;
            for c in text.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Value::str(out)
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let chars = optional_chars(name, &args)?;
            let matches = |c: char| match chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            Value::str(match name {
                "strip" => text.trim_matches(matches),
                "lstrip" => text.trim_start_matches(matches),
                _ => text.trim_end_matches(matches),
            })
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let items = match &args[0] {
                Value::List(l) => l.borrow().clone(),
                Value::Tuple(t) => t.to_vec(),
                Value::Str(s) => s.chars().map(char_value).collect(),
                Value::Set(s) => s.borrow().items().to_vec(),
                Value::Dict(d) => d.borrow().keys(),
                other => {
                    return Err(RuntimeError::type_error(format!(
                        "can only join an iterable, not '{}'",
                        other.type_name()
                    )))
                }
            };
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                let Value::Str(piece) = item else {
                    return Err(RuntimeError::type_error(format!(
                        "sequence item {}: expected str instance, {} found",
                        i,
                        item.type_name()
                    )));
                };
                if i > 0 {
                    out.push_str(text);
                }
                out.push_str(piece);
                Interpreter::check_string(out.len())?;
            }
            Value::str(out)
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            let count = match args.get(2) {
                Some(v) => index_arg(v)?,
                None => -1,
            };
            let estimate = text.len() + text.matches(old).count().saturating_add(1) * new.len();
            Interpreter::check_string(estimate)?;
            Value::str(if count < 0 {
                text.replace(old, new)
            } else {
                text.replacen(old, new, count as usize)
            })
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 3)?;
            let (window, _) = char_window(text, args.get(1), args.get(2))?;
            let candidates: Vec<Value> = match &args[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let mut found = false;
            for candidate in &candidates {
                let Value::Str(affix) = candidate else {
                    return Err(RuntimeError::type_error(format!(
                        "{} first arg must be str or a tuple of str, not {}",
                        name,
                        candidate.type_name()
                    )));
                };
                found |= if name == "startswith" {
                    window.starts_with(affix.as_ref())
                } else {
                    window.ends_with(affix.as_ref())
                };
            }
            Value::Bool(found)
        }
        "find" | "rfind" | "index" => {
            arity(name, &args, 1, 3)?;
            let needle = str_arg(name, &args[0])?;
            let (window, offset) = char_window(text, args.get(1), args.get(2))?;
            let hit = if name == "rfind" {
                window.rfind(needle)
            } else {
                window.find(needle)
            };
            match hit {
                Some(byte) => Value::Int(offset as i64 + char_offset(window, byte)),
                None if name == "index" => {
                    return Err(RuntimeError::value_error("substring not found"))
                }
                None => Value::Int(-1),
            }
        }
        "count" => {
            arity(name, &args, 1, 3)?;
            let needle = str_arg(name, &args[0])?;
            let (window, _) = char_window(text, args.get(1), args.get(2))?;
            let n = if needle.is_empty() {
                window.chars().count() + 1
            } else {
                window.matches(needle).count()
            };
            Value::Int(n as i64)
        }
        "isdigit" | "isdecimal" => {
            arity(name, &args, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))
        }
        "isnumeric" => {
            arity(name, &args, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_numeric))
        }
        "isalpha" => {
            arity(name, &args, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic))
        }
        "isalnum" => {
            arity(name, &args, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric))
        }
        "isspace" => {
            arity(name, &args, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace))
        }
        "isupper" => {
            arity(name, &args, 0, 0)?;
            Value::Bool(text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase))
        }
        "islower" => {
            arity(name, &args, 0, 0)?;
            Value::Bool(text.chars().any(char::is_lowercase) && !text.chars().any(char::is_uppercase))
        }
        "center" | "ljust" | "rjust" => {
            arity(name, &args, 1, 2)?;
            let width = index_arg(&args[0])?;
            let fill = fill_char(name, &args)?;
            let len = text.chars().count() as i64;
            if width <= len {
                return Ok(Value::str(text));
            }
            Interpreter::check_string(width as usize)?;
            let margin = width - len;
            let left = match name {
                "ljust" => 0,
                "rjust" => margin,
                _ => margin / 2 + (margin & width & 1),
            };
            let pad = |n: i64| std::iter::repeat(fill).take(n as usize);
            Value::str(
                pad(left)
                    .chain(text.chars())
                    .chain(pad(margin - left))
                    .collect::<String>(),
            )
        }
        "zfill" => {
            arity(name, &args, 1, 1)?;
            let width = index_arg(&args[0])?;
            let len = text.chars().count() as i64;
            if width <= len {
                return Ok(Value::str(text));
            }
            Interpreter::check_string(width as usize)?;
            let (sign, digits) = match text.chars().next() {
                Some(c @ ('+' | '-')) => (Some(c), &text[1..]),
                _ => (None, text),
            };
            let mut out = String::new();
            out.extend(sign);
            out.extend(std::iter::repeat('0').take((width - len) as usize));
            out.push_str(digits);
            Value::str(out)
        }
        "splitlines" => {
            arity(name, &args, 0, 1)?;
            let keepends = args.first().map(Value::truthy).unwrap_or(false);
            Value::list(splitlines(text, keepends))
        }
        "partition" | "rpartition" => {
            arity(name, &args, 1, 1)?;
            let sep = str_arg(name, &args[0])?;
            if sep.is_empty() {
                return Err(RuntimeError::value_error("empty separator"));
            }
            let hit = if name == "partition" {
                text.find(sep)
            } else {
                text.rfind(sep)
            };
            let parts = match hit {
                Some(at) => [&text[..at], sep, &text[at + sep.len()..]],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Value::tuple(parts.iter().map(Value::str).collect())
        }
        _ => return Err(missing_method("str", name)),
    })
}

fn split(text: &str, sep: Option<&Value>, maxsplit: i64) -> RunResult<Value> {
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize };
    let parts: Vec<Value> = match sep {
        None | Some(Value::None) => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if parts.len() == limit {
                    parts.push(Value::str(rest));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
        Some(Value::Str(sep)) => {
            if sep.is_empty() {
                return Err(RuntimeError::value_error("empty separator"));
            }
            text.splitn(limit.saturating_add(1), sep.as_ref())
                .map(Value::str)
                .collect()
        }
        Some(other) => {
            return Err(RuntimeError::type_error(format!(
                "must be str or None, not {}",
                other.type_name()
            )))
        }
    };
    Interpreter::check_items(parts.len())?;
    Ok(Value::list(parts))
}

fn splitlines(text: &str, keepends: bool) -> Vec<Value> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let terminator = match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => 2,
            b'\n' | b'\r' => 1,
            _ => 0,
        };
        if terminator == 0 {
            i += 1;
            continue;
        }
        let end = if keepends { i + terminator } else { i };
        lines.push(Value::str(&text[start..end]));
        i += terminator;
        start = i;
    }
    if start < text.len() {
        lines.push(Value::str(&text[start..]));
    }
    lines
}

fn sequence_method(kind: &str, items: &[Value], name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "count" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int(items.iter().filter(|v| v.py_eq(&args[0])).count() as i64))
        }
        "index" => {
            arity(name, args, 1, 3)?;
            let len = items.len() as i64;
            let bound = |v: Option<&Value>| -> RunResult<Option<i64>> {
                match v {
                    None => Ok(None),
                    Some(v) => index_arg(v).map(Some),
                }
            };
            let (start, end, _) = slice_indices(len, bound(args.get(1))?, bound(args.get(2))?, Some(1))?;
            (start..end.max(start))
                .find(|&i| items[i as usize].py_eq(&args[0]))
                .map(Value::Int)
                .ok_or_else(|| {
                    RuntimeError::value_error(if kind == "list" {
                        format!("{} is not in list", args[0].repr())
                    } else {
                        "tuple.index(x): x not in tuple".to_string()
                    })
                })
        }
        _ => Err(missing_method(kind, name)),
    }
}

fn list_method(
    interp: &mut Interpreter,
    list: &std::rc::Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<Value> {
    if name == "sort" {
        let mut kw = Kwargs::new(kwargs);
        let key = kw.take("key").filter(|v| !matches!(v, Value::None));
        let reverse = kw.take("reverse").map(|v| v.truthy()).unwrap_or(false);
        kw.finish("sort")?;
        arity(name, &args, 0, 0)?;
        // The list reads as empty while key functions run.
        let items = std::mem::take(&mut *list.borrow_mut());
        let backup = items.clone();
        match sort_values(interp, items, key.as_ref(), reverse) {
            Ok(sorted) => {
                *list.borrow_mut() = sorted;
                return Ok(Value::None);
            }
            Err(err) => {
                *list.borrow_mut() = backup;
                return Err(err);
            }
        }
    }
    no_kwargs(name, &kwargs)?;

    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            let mut items = list.borrow_mut();
            Interpreter::check_items(items.len() + 1)?;
            items.extend(args);
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = interp.collect(&args[0])?;
            let mut items = list.borrow_mut();
            Interpreter::check_items(items.len() + extra.len())?;
            items.extend(extra);
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let mut items = list.borrow_mut();
            Interpreter::check_items(items.len() + 1)?;
            let len = items.len() as i64;
            let mut pos = index_arg(&args[0])?;
            if pos < 0 {
                pos = (pos + len).max(0);
            }
            let pos = pos.min(len) as usize;
            items.insert(pos, args[1].clone());
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(RuntimeError::index_error("pop from empty list"));
            }
            let len = items.len() as i64;
            let raw = match args.first() {
                Some(v) => index_arg(v)?,
                None => -1,
            };
            let pos = if raw < 0 { raw + len } else { raw };
            if pos < 0 || pos >= len {
                return Err(RuntimeError::index_error("pop index out of range"));
            }
            return Ok(items.remove(pos as usize));
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let pos = list.borrow().iter().position(|v| v.py_eq(&args[0]));
            match pos {
                Some(pos) => {
                    list.borrow_mut().remove(pos);
                }
                None => return Err(RuntimeError::value_error("list.remove(x): x not in list")),
            }
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            list.borrow_mut().reverse();
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            return Ok(Value::list(list.borrow().clone()));
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            let items = std::mem::take(&mut *list.borrow_mut());
            drop(items);
        }
        "count" | "index" => {
            let items = list.borrow().clone();
            return sequence_method("list", &items, name, &args);
        }
        _ => return Err(missing_method("list", name)),
    }
    Ok(Value::None)
}

fn dict_method(
    interp: &mut Interpreter,
    dict: &std::rc::Rc<std::cell::RefCell<Dict>>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<Value> {
    if name == "update" {
        arity(name, &args, 0, 1)?;
        let mut pairs = match args.first() {
            Some(source) => mapping_pairs(interp, source)?,
            None => Vec::new(),
        };
        pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::str(k), v)));
        let mut dict = dict.borrow_mut();
        for (key, value) in pairs {
            dict.insert(key, value)?;
        }
        Interpreter::check_items(dict.len())?;
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;

    Ok(match name {
        "keys" | "values" | "items" => {
            arity(name, &args, 0, 0)?;
            let kind = match name {
                "keys" => ViewKind::Keys,
                "values" => ViewKind::Values,
                _ => ViewKind::Items,
            };
            Value::DictView {
                dict: dict.clone(),
                kind,
            }
        }
        "get" => {
            arity(name, &args, 1, 2)?;
            let found = dict.borrow().get(&args[0])?;
            found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None))
        }
        "pop" => {
            arity(name, &args, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(key_error(&args[0])),
            }
        }
        "popitem" => {
            arity(name, &args, 0, 0)?;
            let last = dict.borrow_mut().pop_last();
            match last {
                Some((key, value)) => Value::tuple(vec![key, value]),
                None => {
                    return Err(RuntimeError::new(
                        ErrorKind::KeyError,
                        "'popitem(): dictionary is empty'",
                    ))
                }
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let existing = dict.borrow().get(&args[0])?;
            match existing {
                Some(value) => value,
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    let mut dict = dict.borrow_mut();
                    dict.insert(args[0].clone(), default.clone())?;
                    Interpreter::check_items(dict.len())?;
                    default
                }
            }
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            let mut copy = Dict::new();
            for (k, v) in dict.borrow().entries() {
                copy.insert(k.clone(), v.clone())?;
            }
            Value::dict(copy)
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            dict.borrow_mut().clear();
            Value::None
        }
        _ => return Err(missing_method("dict", name)),
    })
}

fn set_method(
    interp: &mut Interpreter,
    set: &std::rc::Rc<std::cell::RefCell<Set>>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<Value> {
    no_kwargs(name, &kwargs)?;
    // Arguments may be any iterable; materialize them before borrowing.
    let mut others = Vec::with_capacity(args.len());
    if !matches!(name, "add" | "remove" | "discard") {
        for arg in &args {
            others.push(Set::from_values(interp.collect(arg)?)?);
        }
    }

    Ok(match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            let mut set = set.borrow_mut();
            set.add(args[0].clone())?;
            Interpreter::check_items(set.len())?;
            Value::None
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            if !set.borrow_mut().remove(&args[0])? {
                return Err(key_error(&args[0]));
            }
            Value::None
        }
        "discard" => {
            arity(name, &args, 1, 1)?;
            set.borrow_mut().remove(&args[0])?;
            Value::None
        }
        "pop" => {
            arity(name, &args, 0, 0)?;
            let first = set.borrow_mut().pop_first();
            first.ok_or_else(|| {
                RuntimeError::new(ErrorKind::KeyError, "'pop from an empty set'")
            })?
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            set.borrow_mut().clear();
            Value::None
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Value::set(Set::from_values(set.borrow().items().to_vec())?)
        }
        "update" => {
            let mut set = set.borrow_mut();
            for other in others {
                for item in other.into_items() {
                    set.add(item)?;
                }
            }
            Interpreter::check_items(set.len())?;
            Value::None
        }
        "union" => {
            let mut out = Set::from_values(set.borrow().items().to_vec())?;
            for other in others {
                for item in other.into_items() {
                    out.add(item)?;
                }
            }
            Value::set(out)
        }
        "intersection" | "difference" => {
            let keep_shared = name == "intersection";
            let mut out = Set::new();
            for item in set.borrow().items() {
                let mut keep = true;
                for other in &others {
                    if other.contains(item)? != keep_shared {
                        keep = false;
                        break;
                    }
                }
                if keep {
                    out.add(item.clone())?;
                }
            }
            Value::set(out)
        }
        "symmetric_difference" => {
            arity(name, &args, 1, 1)?;
            let mine = set.borrow();
            let other = &others[0];
            let mut out = Set::new();
            for item in mine.items() {
                if !other.contains(item)? {
                    out.add(item.clone())?;
                }
            }
            for item in other.items() {
                if !mine.contains(item)? {
                    out.add(item.clone())?;
                }
            }
            Value::set(out)
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            arity(name, &args, 1, 1)?;
            let mine = set.borrow();
            let other = &others[0];
            let mut result = true;
            match name {
                "issubset" => {
                    for item in mine.items() {
                        result &= other.contains(item)?;
                    }
                }
                "issuperset" => {
                    for item in other.items() {
                        result &= mine.contains(item)?;
                    }
                }
                _ => {
                    for item in mine.items() {
                        result &= !other.contains(item)?;
                    }
                }
            }
            Value::Bool(result)
        }
        _ => return Err(missing_method("set", name)),
    })
}

fn missing_method(kind: &str, name: &str) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", kind, name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::capabilities;
    use crate::runtime::interpreter::ExecutionLimits;
    use crate::runtime::parser::parse;

    fn run(source: &str) -> Result<String, String> {
        let module = parse(source).map_err(|e| e.to_string())?;
        let mut interp = Interpreter::new(capabilities(), ExecutionLimits::default());
        interp.run(&module).map_err(|e| e.to_string())?;
        Ok(interp.output().to_string())
    }

    #[test]
    fn test_string_methods() {
        let out = run(
            "s = '  Hello World  '\nprint(s.strip().upper(), s.split(), 'a,b,,c'.split(','))\nprint('-'.join(['x', 'y']), 'banana'.count('an'), 'banana'.find('na'), 'héllo'.index('l'))\nprint('abc'.center(7, '*'), '42'.zfill(5), '-7'.zfill(4), 'hello world'.title())\n",
        )
        .unwrap();
        assert_eq!(
            out,
            "HELLO WORLD ['Hello', 'World'] ['a', 'b', '', 'c']\nx-y 2 2 2\n**abc** 00042 -007 Hello World\n"
        );
    }

    #[test]
    fn test_split_with_maxsplit() {
        assert_eq!(
            run("print('  a b  c  '.split(None, 1), 'a-b-c'.split('-', maxsplit=1))\n").unwrap(),
            "['a', 'b  c  '] ['a', 'b-c']\n"
        );
    }

    #[test]
    fn test_join_rejects_non_strings() {
        assert_eq!(
            run("', '.join([1, 2])\n").unwrap_err(),
            "TypeError: sequence item 0: expected str instance, int found"
        );
    }

    #[test]
    fn test_join_accepts_any_iterable() {
        assert_eq!(
            run("print(' '.join(str(n * 2) for n in range(3)), '+'.join(map(str, (1, 2))), ''.join({'a': 1, 'b': 2}))\n").unwrap(),
            "0 2 4 1+2 ab\n"
        );
    }

    #[test]
    fn test_list_methods() {
        let out = run(
            "l = [3, 1, 2]\nl.append(4)\nl.insert(0, 9)\nl.sort()\nprint(l, l.pop(), l.index(2))\nl.remove(1)\nl.reverse()\nprint(l, l.count(3))\n",
        )
        .unwrap();
        assert_eq!(out, "[1, 2, 3, 4] 9 1\n[4, 3, 2] 1\n");
        assert_eq!(
            run("[].pop()\n").unwrap_err(),
            "IndexError: pop from empty list"
        );
        assert_eq!(
            run("[1].remove(5)\n").unwrap_err(),
            "ValueError: list.remove(x): x not in list"
        );
    }

    #[test]
    fn test_sort_with_key_sees_empty_list() {
        let out = run("l = ['bb', 'a']\nseen = []\ndef key(x):\n    seen.append(len(l))\n    return len(x)\nl.sort(key=key)\nprint(l, seen)\n").unwrap();
        assert_eq!(out, "['a', 'bb'] [0, 0]\n");
    }

    #[test]
    fn test_dict_methods() {
        let out = run(
            "d = {'a': 1}\nd.update(b=2)\nprint(d.keys(), d.values(), d.items())\nprint(d.get('z', 0), d.setdefault('c', 3), d.pop('a'), d)\n",
        )
        .unwrap();
        assert_eq!(
            out,
            "dict_keys(['a', 'b']) dict_values([1, 2]) dict_items([('a', 1), ('b', 2)])\n0 3 1 {'b': 2, 'c': 3}\n"
        );
        assert_eq!(run("{}.pop('x')\n").unwrap_err(), "KeyError: 'x'");
    }

    #[test]
    fn test_dict_views_are_live() {
        let out = run(
            "d = {'a': 1}\nks = d.keys()\nitems = d.items()\nd['b'] = 2\nprint(ks, len(ks), 'b' in ks, ('b', 2) in items, 2 in d.values())\nprint(sorted(d.values(), reverse=True), list(items), list(reversed(ks)))\n",
        )
        .unwrap();
        assert_eq!(
            out,
            "dict_keys(['a', 'b']) 2 True True True\n[2, 1] [('a', 1), ('b', 2)] ['b', 'a']\n"
        );
        assert_eq!(
            run("print({'a': 1}.keys()[0])\n").unwrap_err(),
            "TypeError: 'dict_keys' object is not subscriptable"
        );
    }

    #[test]
    fn test_set_methods() {
        let out = run(
            "s = {1, 2, 3}\nprint(s.union([4]), s.intersection({2, 3, 9}), s.difference([1]), s.issubset(range(5)))\ns.discard(7)\ns.add(2)\nprint(len(s), s.isdisjoint([8]))\n",
        )
        .unwrap();
        assert_eq!(out, "{1, 2, 3, 4} {2, 3} {2, 3} True\n3 True\n");
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(
            run("[].push(1)\n").unwrap_err(),
            "AttributeError: 'list' object has no attribute 'push'"
        );
    }
}
