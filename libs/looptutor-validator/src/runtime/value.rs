//! Runtime values of the sandboxed language.
//!
//! Mutable containers are `Rc<RefCell<..>>` because every value lives and
//! dies inside one interpreter on one thread; nothing here is `Send`.

use super::ast::{Comprehension, FunctionDef};
use super::error::{ErrorKind, RunResult, RuntimeError};
use super::format::float_repr;
use super::interpreter::{Interpreter, Scope};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

const MAX_REPR_DEPTH: usize = 64;

pub type BuiltinFn = fn(&mut Interpreter, Vec<Value>, Vec<(String, Value)>) -> RunResult<Value>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

/// User-defined function (from `def` or `lambda`) plus the scope it closes over.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Value>,
    pub closure: Rc<RefCell<Scope>>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> i64 {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let len = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        len.min(i64::MAX as i128) as i64
    }

    pub fn get(&self, idx: i64) -> i64 {
        (self.start as i128 + idx as i128 * self.step as i128) as i64
    }
}

/// Iteration cursor over any iterable value.
pub enum Cursor {
    List { list: Rc<RefCell<Vec<Value>>>, idx: usize },
    /// Live walk over a dict; `len` is the size when the loop started.
    Dict { dict: Rc<RefCell<Dict>>, kind: ViewKind, idx: usize, len: usize },
    Set { set: Rc<RefCell<Set>>, idx: usize, len: usize },
    Items(std::vec::IntoIter<Value>),
    Chars { text: Rc<str>, pos: usize },
    Range { next: i64, remaining: i64, step: i64 },
    Shared(Rc<RefCell<IterObject>>),
}

/// Which projection of a dict a view yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Keys,
    Values,
    Items,
}

impl ViewKind {
    pub fn type_name(self) -> &'static str {
        match self {
            ViewKind::Keys => "dict_keys",
            ViewKind::Values => "dict_values",
            ViewKind::Items => "dict_items",
        }
    }

    pub fn project(self, (key, value): &(Value, Value)) -> Value {
        match self {
            ViewKind::Keys => key.clone(),
            ViewKind::Values => value.clone(),
            ViewKind::Items => Value::tuple(vec![key.clone(), value.clone()]),
        }
    }
}

/// Lazy iterator object returned by `map`, `filter`, `zip`, `enumerate`
/// and `reversed`. Advancing it consumes it, as in the real language.
pub struct IterObject {
    pub kind: &'static str,
    pub state: IterState,
}

pub enum IterState {
    Map { func: Value, sources: Vec<Cursor> },
    Filter { func: Option<Value>, source: Cursor },
    Zip { sources: Vec<Cursor> },
    Enumerate { source: Cursor, index: i64 },
    Plain(Cursor),
    /// Lazy generator expression: one cursor per active `for` clause.
    Generator {
        body: Rc<Comprehension>,
        scope: Rc<RefCell<Scope>>,
        cursors: Vec<Cursor>,
    },
    Running,
    Exhausted,
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    /// `keys()`, `values()` or `items()` of a dict; reflects later edits.
    DictView { dict: Rc<RefCell<Dict>>, kind: ViewKind },
    Range(Range),
    Iter(Rc<RefCell<IterObject>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: Set) -> Value {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    pub fn iter(kind: &'static str, state: IterState) -> Value {
        Value::Iter(Rc::new(RefCell::new(IterObject { kind, state })))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::DictView { kind, .. } => kind.type_name(),
            Value::Range(_) => "range",
            Value::Iter(it) => it.borrow().kind,
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "builtin_function_or_method",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::DictView { dict, .. } => !dict.borrow().is_empty(),
            Value::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    /// Numeric view used by arithmetic; bools count as ints.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Text produced by `str()` and `print`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    /// Text produced by `repr()` and container display.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    /// `active` holds the containers whose repr is in progress, so a
    /// container that reaches itself prints as `[...]` or `{...}`.
    fn write_repr(&self, out: &mut String, active: &mut Vec<ReprKey>) {
        if active.len() > MAX_REPR_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::List(l) => {
                write_container(out, active, (Rc::as_ptr(l) as *const (), None), "[...]", |out, active| {
                    out.push('[');
                    write_seq(out, &l.borrow(), active);
                    out.push(']');
                });
            }
            Value::Tuple(t) => {
                write_container(out, active, (Rc::as_ptr(t) as *const (), None), "(...)", |out, active| {
                    out.push('(');
                    write_seq(out, t, active);
                    if t.len() == 1 {
                        out.push(',');
                    }
                    out.push(')');
                });
            }
            Value::Dict(d) => {
                write_container(out, active, (Rc::as_ptr(d) as *const (), None), "{...}", |out, active| {
                    out.push('{');
                    for (i, (k, v)) in d.borrow().entries().iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        k.write_repr(out, active);
                        out.push_str(": ");
                        v.write_repr(out, active);
                    }
                    out.push('}');
                });
            }
            Value::Set(s) => {
                let set = s.borrow();
                if set.is_empty() {
                    out.push_str("set()");
                } else {
                    write_container(out, active, (Rc::as_ptr(s) as *const (), None), "{...}", |out, active| {
                        out.push('{');
                        write_seq(out, set.items(), active);
                        out.push('}');
                    });
                }
            }
            Value::DictView { dict, kind } => {
                let key = (Rc::as_ptr(dict) as *const (), Some(*kind));
                write_container(out, active, key, "...", |out, active| {
                    out.push_str(kind.type_name());
                    out.push_str("([");
                    for (i, entry) in dict.borrow().entries().iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        kind.project(entry).write_repr(out, active);
                    }
                    out.push_str("])");
                });
            }
            Value::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Iter(it) => out.push_str(&format!("<{} object>", it.borrow().kind)),
            Value::Function(func) => out.push_str(&format!("<function {}>", func.def.name)),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
        }
    }

    /// Structural equality with numeric cross-type comparison.
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.entries().iter().all(|(k, v)| {
                        matches!(b.get(k), Ok(Some(other)) if v.py_eq(&other))
                    })
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.items().iter().all(|v| b.contains(v).unwrap_or(false))
            }
            (Value::DictView { dict: a, kind: ka }, Value::DictView { dict: b, kind: kb }) if ka == kb => {
                let (a, b) = (a.borrow(), b.borrow());
                match ka {
                    ViewKind::Keys => {
                        a.len() == b.len() && a.entries().iter().all(|(k, _)| b.contains(k).unwrap_or(false))
                    }
                    ViewKind::Items => {
                        a.len() == b.len()
                            && a.entries().iter().all(|(k, v)| {
                                matches!(b.get(k), Ok(Some(other)) if v.py_eq(&other))
                            })
                    }
                    ViewKind::Values => false,
                }
            }
            (Value::Range(a), Value::Range(b)) => {
                let (la, lb) = (a.len(), b.len());
                la == lb && (la == 0 || (a.start == b.start && (la == 1 || a.step == b.step)))
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Iter(a), Value::Iter(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Identity as seen by `is`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Iter(a), Value::Iter(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            _ => false,
        }
    }

    /// Ordering used by `<`, `sorted`, `min` and `max`.
    pub fn py_cmp(&self, other: &Value) -> RunResult<Ordering> {
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => {
                    let (x, y) = (a.as_float().unwrap_or(f64::NAN), b.as_float().unwrap_or(f64::NAN));
                    Ok(x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y)))
                }
            },
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b),
            _ => Err(RuntimeError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }
}

/// Allocation of a container being printed, plus the view kind when the
/// container is shown through a dict view.
type ReprKey = (*const (), Option<ViewKind>);

fn write_container(
    out: &mut String,
    active: &mut Vec<ReprKey>,
    key: ReprKey,
    recursive: &str,
    body: impl FnOnce(&mut String, &mut Vec<ReprKey>),
) {
    if active.contains(&key) {
        out.push_str(recursive);
        return;
    }
    active.push(key);
    body(out, active);
    active.pop();
}

fn write_seq(out: &mut String, items: &[Value], active: &mut Vec<ReprKey>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, active);
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> RunResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.py_cmp(y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Quote a string the way `repr` does: single quotes unless the text
/// contains a single quote and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Hashable projection of a value, used as dict/set key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Range(i64, i64, i64),
    Builtin(&'static str),
}

impl HashKey {
    pub fn from_value(value: &Value) -> RunResult<HashKey> {
        Ok(match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e18 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(HashKey::from_value)
                    .collect::<RunResult<Vec<_>>>()?,
            ),
            Value::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Value::Builtin(b) => HashKey::Builtin(b.name),
            other => {
                return Err(RuntimeError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }
}

/// Insertion-ordered mapping.
#[derive(Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<HashKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn get(&self, key: &Value) -> RunResult<Option<Value>> {
        let hk = HashKey::from_value(key)?;
        Ok(self.index.get(&hk).map(|&i| self.entries[i].1.clone()))
    }

    pub fn contains(&self, key: &Value) -> RunResult<bool> {
        Ok(self.index.contains_key(&HashKey::from_value(key)?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> RunResult<()> {
        let hk = HashKey::from_value(&key)?;
        match self.index.get(&hk) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hk, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> RunResult<Option<Value>> {
        let hk = HashKey::from_value(key)?;
        let Some(pos) = self.index.remove(&hk) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        let (key, value) = self.entries.pop()?;
        if let Ok(hk) = HashKey::from_value(&key) {
            self.index.remove(&hk);
        }
        Some((key, value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Keys and values, flattened, consuming the dict.
    pub fn into_values_flat(self) -> impl Iterator<Item = Value> {
        self.entries.into_iter().flat_map(|(k, v)| [k, v])
    }
}

/// Insertion-ordered set.
#[derive(Default)]
pub struct Set {
    items: Vec<Value>,
    index: HashMap<HashKey, usize>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> RunResult<Self> {
        let mut set = Set::new();
        for value in values {
            set.add(value)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn contains(&self, value: &Value) -> RunResult<bool> {
        Ok(self.index.contains_key(&HashKey::from_value(value)?))
    }

    pub fn add(&mut self, value: Value) -> RunResult<()> {
        let hk = HashKey::from_value(&value)?;
        if !self.index.contains_key(&hk) {
            self.index.insert(hk, self.items.len());
            self.items.push(value);
        }
        Ok(())
    }

    pub fn remove(&mut self, value: &Value) -> RunResult<bool> {
        let hk = HashKey::from_value(value)?;
        let Some(pos) = self.index.remove(&hk) else {
            return Ok(false);
        };
        self.items.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Ok(true)
    }

    pub fn pop_first(&mut self) -> Option<Value> {
        let first = self.items.first()?.clone();
        self.remove(&first).ok()?;
        Some(first)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }
}

pub fn key_error(key: &Value) -> RuntimeError {
    RuntimeError::new(ErrorKind::KeyError, key.repr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_quoting() {
        assert_eq!(quote_str("hello"), "'hello'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
        assert_eq!(quote_str("both ' and \""), "'both \\' and \"'");
    }

    #[test]
    fn test_container_repr() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(list.repr(), "[1, 'a', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::set(Set::new()).repr(), "set()");

        let mut dict = Dict::new();
        dict.insert(Value::str("b"), Value::Int(2)).unwrap();
        dict.insert(Value::str("a"), Value::Float(1.5)).unwrap();
        assert_eq!(Value::dict(dict).repr(), "{'b': 2, 'a': 1.5}");
    }

    #[test]
    fn test_recursive_containers_repr() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");

        let dict = Value::dict(Dict::new());
        if let Value::Dict(d) = &dict {
            d.borrow_mut().insert(Value::str("me"), dict.clone()).unwrap();
        }
        assert_eq!(dict.repr(), "{'me': {...}}");
    }

    #[test]
    fn test_shared_element_is_not_recursive() {
        let inner = Value::list(vec![Value::Int(0)]);
        let outer = Value::list(vec![inner.clone(), inner]);
        assert_eq!(outer.repr(), "[[0], [0]]");
    }

    #[test]
    fn test_dict_view_repr() {
        let mut dict = Dict::new();
        dict.insert(Value::str("a"), Value::Int(1)).unwrap();
        let dict = Rc::new(RefCell::new(dict));
        let view = |kind| Value::DictView { dict: dict.clone(), kind };

        assert_eq!(view(ViewKind::Keys).repr(), "dict_keys(['a'])");
        assert_eq!(view(ViewKind::Values).repr(), "dict_values([1])");
        assert_eq!(view(ViewKind::Items).repr(), "dict_items([('a', 1)])");
        assert_eq!(view(ViewKind::Items).type_name(), "dict_items");

        assert!(view(ViewKind::Keys).py_eq(&view(ViewKind::Keys)));
        assert!(!view(ViewKind::Values).py_eq(&view(ViewKind::Values)));
    }

    #[test]
    fn test_numeric_equality_and_hashing() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert_eq!(
            HashKey::from_value(&Value::Float(2.0)).unwrap(),
            HashKey::from_value(&Value::Int(2)).unwrap()
        );
        assert!(HashKey::from_value(&Value::list(vec![])).is_err());
    }

    #[test]
    fn test_dict_remove_keeps_order() {
        let mut dict = Dict::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            dict.insert(Value::str(k), Value::Int(v)).unwrap();
        }
        assert!(dict.remove(&Value::str("a")).unwrap().is_some());
        assert_eq!(Value::dict(dict).repr(), "{'b': 2, 'c': 3}");
    }

    #[test]
    fn test_range_len() {
        assert_eq!(Range { start: 0, stop: 5, step: 1 }.len(), 5);
        assert_eq!(Range { start: 0, stop: 10, step: 3 }.len(), 4);
        assert_eq!(Range { start: 5, stop: 0, step: -2 }.len(), 3);
        assert_eq!(Range { start: 5, stop: 0, step: 1 }.len(), 0);
    }

    #[test]
    fn test_ordering_errors_across_types() {
        let err = Value::Int(1).py_cmp(&Value::str("a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: '<' not supported between instances of 'int' and 'str'"
        );
        assert_eq!(
            Value::tuple(vec![Value::Int(1), Value::Int(2)])
                .py_cmp(&Value::tuple(vec![Value::Int(1), Value::Int(3)]))
                .unwrap(),
            Ordering::Less
        );
    }
}
