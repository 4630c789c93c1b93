//! Built-in functions reachable from sandboxed code.
//!
//! Each function here is only callable if the capability table handed to
//! the interpreter lists it. Argument errors use the wording learners see
//! in the reference language so feedback stays familiar.

use super::error::{ErrorKind, RunResult, RuntimeError};
use super::format::format_value;
use super::interpreter::{binary_op, Interpreter};
use super::ast::BinOp;
use super::value::*;
use std::cmp::Ordering;

/// Keyword arguments of one call, consumed by name.
pub struct Kwargs(Vec<(String, Value)>);

impl Kwargs {
    pub fn new(kwargs: Vec<(String, Value)>) -> Self {
        Self(kwargs)
    }

    pub fn take(&mut self, name: &str) -> Option<Value> {
        let pos = self.0.iter().position(|(k, _)| k == name)?;
        Some(self.0.remove(pos).1)
    }

    /// Reject whatever keywords the callee did not consume.
    pub fn finish(self, callee: &str) -> RunResult<()> {
        match self.0.first() {
            Some((name, _)) => Err(RuntimeError::type_error(format!(
                "'{}' is an invalid keyword argument for {}()",
                name, callee
            ))),
            None => Ok(()),
        }
    }
}

pub fn no_kwargs(callee: &str, kwargs: &[(String, Value)]) -> RunResult<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(RuntimeError::type_error(format!(
            "{}() takes no keyword arguments",
            callee
        )))
    }
}

pub fn arity(callee: &str, args: &[Value], min: usize, max: usize) -> RunResult<()> {
    let n = args.len();
    let plural = |count: usize| if count == 1 { "" } else { "s" };
    let message = if min == max && n != min {
        format!(
            "{}() takes exactly {} argument{} ({} given)",
            callee,
            min,
            plural(min),
            n
        )
    } else if n < min {
        format!(
            "{}() takes at least {} argument{} ({} given)",
            callee,
            min,
            plural(min),
            n
        )
    } else if n > max {
        format!(
            "{}() takes at most {} argument{} ({} given)",
            callee,
            max,
            plural(max),
            n
        )
    } else {
        return Ok(());
    };
    Err(RuntimeError::type_error(message))
}

fn not_none(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !matches!(v, Value::None))
}

pub fn index_arg(value: &Value) -> RunResult<i64> {
    value.as_int().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn text_kwarg(value: Option<Value>, default: &str, name: &str) -> RunResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(RuntimeError::type_error(format!(
            "{} must be None or a string, not {}",
            name,
            other.type_name()
        ))),
    }
}

// ---- output ----

pub fn print(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    let mut kw = Kwargs::new(kwargs);
    let sep = text_kwarg(kw.take("sep"), " ", "sep")?;
    let end = text_kwarg(kw.take("end"), "\n", "end")?;
    kw.take("flush");
    kw.finish("print")?;

    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push_str(&sep);
        }
        line.push_str(&arg.to_str());
        Interpreter::check_string(line.len())?;
    }
    line.push_str(&end);
    interp.write(&line)?;
    Ok(Value::None)
}

pub fn format(_: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("format", &kwargs)?;
    arity("format", &args, 1, 2)?;
    let spec = match args.get(1) {
        None => String::new(),
        Some(Value::Str(s)) => s.to_string(),
        Some(other) => {
            return Err(RuntimeError::type_error(format!(
                "format() argument 2 must be str, not {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::str(format_value(&args[0], &spec)?))
}

// ---- introspection and conversion ----

pub fn len(_: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("len", &kwargs)?;
    arity("len", &args, 1, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.borrow().len(),
        Value::Tuple(t) => t.len(),
        Value::Dict(d) => d.borrow().len(),
        Value::Set(s) => s.borrow().len(),
        Value::DictView { dict, .. } => dict.borrow().len(),
        Value::Range(r) => r.len() as usize,
        other => {
            return Err(RuntimeError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(n as i64))
}

pub fn str(_: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("str", &kwargs)?;
    arity("str", &args, 0, 1)?;
    Ok(match args.first() {
        Some(Value::Str(s)) => Value::Str(s.clone()),
        Some(value) => Value::str(value.to_str()),
        None => Value::str(""),
    })
}

pub fn int(_: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    let mut kw = Kwargs::new(kwargs);
    let base_kw = kw.take("base");
    kw.finish("int")?;
    arity("int", &args, 0, 2)?;

    let mut args = args.into_iter();
    let Some(value) = args.next() else {
        return Ok(Value::Int(0));
    };
    if let Some(base) = args.next().or(base_kw) {
        let Value::Str(text) = &value else {
            return Err(RuntimeError::type_error(
                "int() can't convert non-string with explicit base",
            ));
        };
        let base = index_arg(&base)?;
        if base != 0 && !(2..=36).contains(&base) {
            return Err(RuntimeError::value_error(
                "int() base must be >= 2 and <= 36, or 0",
            ));
        }
        return parse_int(text, base as u32);
    }

    match &value {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        Value::Float(f) => float_to_int(*f),
        Value::Str(text) => parse_int(text, 10),
        other => Err(RuntimeError::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> RunResult<Value> {
    if f.is_nan() {
        return Err(RuntimeError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(RuntimeError::new(
            ErrorKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < -9.223_372_036_854_775_808e18 || truncated >= 9.223_372_036_854_775_808e18 {
        return Err(RuntimeError::overflow());
    }
    Ok(Value::Int(truncated as i64))
}

fn parse_int(text: &str, base: u32) -> RunResult<Value> {
    let invalid = || {
        RuntimeError::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            quote_str(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let prefix = body.get(..2).map(|p| p.to_ascii_lowercase());
    let (radix, digits) = match (prefix.as_deref(), base) {
        (Some("0x"), 0 | 16) => (16, &body[2..]),
        (Some("0o"), 0 | 8) => (8, &body[2..]),
        (Some("0b"), 0 | 2) => (2, &body[2..]),
        (_, 0) => (10, body),
        (_, base) => (base, body),
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }

    let mut acc: i128 = 0;
    for c in digits.chars() {
        if c == '_' {
            continue;
        }
        let digit = c.to_digit(radix).ok_or_else(invalid)?;
        acc = acc * radix as i128 + digit as i128;
        if acc > i64::MAX as i128 + 1 {
            return Err(RuntimeError::overflow());
        }
    }
    if negative {
        acc = -acc;
    }
    i64::try_from(acc)
        .map(Value::Int)
        .map_err(|_| RuntimeError::overflow())
}

pub fn float(_: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("float", &kwargs)?;
    arity("float", &args, 0, 1)?;
    let Some(value) = args.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Str(text) => {
            let cleaned = text.trim();
            let parsed = if cleaned.is_empty() || cleaned.contains("__") {
                None
            } else {
                cleaned.replace('_', "").parse::<f64>().ok()
            };
            parsed.map(Value::Float).ok_or_else(|| {
                RuntimeError::value_error(format!(
                    "could not convert string to float: {}",
                    quote_str(text)
                ))
            })
        }
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            RuntimeError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

// ---- containers ----

pub fn list(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("list", &kwargs)?;
    arity("list", &args, 0, 1)?;
    match args.first() {
        Some(iterable) => Ok(Value::list(interp.collect(iterable)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

pub fn tuple(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("tuple", &kwargs)?;
    arity("tuple", &args, 0, 1)?;
    match args.first() {
        Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
        Some(iterable) => Ok(Value::tuple(interp.collect(iterable)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

pub fn set(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("set", &kwargs)?;
    arity("set", &args, 0, 1)?;
    match args.first() {
        Some(iterable) => Ok(Value::set(Set::from_values(interp.collect(iterable)?)?)),
        None => Ok(Value::set(Set::new())),
    }
}

pub fn dict(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    arity("dict", &args, 0, 1)?;
    let mut pairs = match args.first() {
        Some(source) => mapping_pairs(interp, source)?,
        None => Vec::new(),
    };
    pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::str(k), v)));
    let mut dict = Dict::new();
    for (key, value) in pairs {
        dict.insert(key, value)?;
    }
    Ok(Value::dict(dict))
}

/// Key/value pairs from a dict or from an iterable of two-item sequences.
pub fn mapping_pairs(interp: &mut Interpreter, source: &Value) -> RunResult<Vec<(Value, Value)>> {
    if let Value::Dict(dict) = source {
        return Ok(dict.borrow().entries().to_vec());
    }
    let items = interp.collect(source)?;
    let mut pairs = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let parts = match item {
            Value::List(_)
            | Value::Tuple(_)
            | Value::Str(_)
            | Value::Set(_)
            | Value::Dict(_)
            | Value::DictView { .. }
            | Value::Range(_)
            | Value::Iter(_) => {
                interp.collect(item)?
            }
            _ => {
                return Err(RuntimeError::type_error(format!(
                    "cannot convert dictionary update sequence element #{} to a sequence",
                    i
                )))
            }
        };
        let [key, value]: [Value; 2] = parts.try_into().map_err(|parts: Vec<Value>| {
            RuntimeError::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                parts.len()
            ))
        })?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

// ---- iteration ----

pub fn range(_: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("range", &kwargs)?;
    if args.is_empty() {
        return Err(RuntimeError::type_error("range expected at least 1 argument, got 0"));
    }
    if args.len() > 3 {
        return Err(RuntimeError::type_error(format!(
            "range expected at most 3 arguments, got {}",
            args.len()
        )));
    }
    let bounds = args.iter().map(index_arg).collect::<RunResult<Vec<_>>>()?;
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
        [] => (0, 0, 1),
    };
    if step == 0 {
        return Err(RuntimeError::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(Range { start, stop, step }))
}

pub fn enumerate(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    let mut kw = Kwargs::new(kwargs);
    let start_kw = kw.take("start");
    kw.finish("enumerate")?;
    arity("enumerate", &args, 1, 2)?;
    let index = match args.get(1).cloned().or(start_kw) {
        Some(start) => index_arg(&start)?,
        None => 0,
    };
    let source = interp.iterate(&args[0])?;
    Ok(Value::iter("enumerate", IterState::Enumerate { source, index }))
}

pub fn zip(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("zip", &kwargs)?;
    let sources = args
        .iter()
        .map(|a| interp.iterate(a))
        .collect::<RunResult<Vec<_>>>()?;
    Ok(Value::iter("zip", IterState::Zip { sources }))
}

pub fn map(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("map", &kwargs)?;
    if args.len() < 2 {
        return Err(RuntimeError::type_error("map() must have at least two arguments."));
    }
    let mut args = args.into_iter();
    let func = args.next().unwrap_or(Value::None);
    let sources = args
        .map(|a| interp.iterate(&a))
        .collect::<RunResult<Vec<_>>>()?;
    Ok(Value::iter("map", IterState::Map { func, sources }))
}

pub fn filter(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("filter", &kwargs)?;
    arity("filter", &args, 2, 2)?;
    let source = interp.iterate(&args[1])?;
    let func = not_none(Some(args[0].clone()));
    Ok(Value::iter("filter", IterState::Filter { func, source }))
}

pub fn reversed(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("reversed", &kwargs)?;
    arity("reversed", &args, 1, 1)?;
    let kind = match &args[0] {
        Value::List(_) => "list_reverseiterator",
        Value::Range(_) => "range_iterator",
        Value::Str(_) | Value::Tuple(_) | Value::Dict(_) | Value::DictView { .. } => "reversed",
        other => {
            return Err(RuntimeError::type_error(format!(
                "'{}' object is not reversible",
                other.type_name()
            )))
        }
    };
    let mut items = interp.collect(&args[0])?;
    items.reverse();
    Ok(Value::iter(kind, IterState::Plain(Cursor::Items(items.into_iter()))))
}

// ---- numeric ----

pub fn abs(_: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    no_kwargs("abs", &kwargs)?;
    arity("abs", &args, 1, 1)?;
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => match other.as_int() {
            Some(i) => i.checked_abs().map(Value::Int).ok_or_else(RuntimeError::overflow),
            None => Err(RuntimeError::type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
    }
}

pub fn max(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    extreme(interp, "max", args, kwargs, Ordering::Greater)
}

pub fn min(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    extreme(interp, "min", args, kwargs, Ordering::Less)
}

fn extreme(
    interp: &mut Interpreter,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    wanted: Ordering,
) -> RunResult<Value> {
    let mut kw = Kwargs::new(kwargs);
    let key = not_none(kw.take("key"));
    let default = kw.take("default");
    kw.finish(name)?;

    let items = match args.len() {
        0 => {
            return Err(RuntimeError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        1 => interp.collect(&args[0])?,
        _ => {
            if default.is_some() {
                return Err(RuntimeError::type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                )));
            }
            args
        }
    };
    if items.is_empty() {
        return default.ok_or_else(|| {
            RuntimeError::value_error(format!("{}() arg is an empty sequence", name))
        });
    }

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(func) => interp.call(func, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => rank.py_cmp(best_rank)? == wanted,
        };
        if replace {
            best = Some((rank, item));
        }
    }
    Ok(best.map(|(_, item)| item).unwrap_or(Value::None))
}

pub fn sum(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    let mut kw = Kwargs::new(kwargs);
    let start_kw = kw.take("start");
    kw.finish("sum")?;
    arity("sum", &args, 1, 2)?;

    let mut total = args.get(1).cloned().or(start_kw).unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(RuntimeError::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    let mut cursor = interp.iterate(&args[0])?;
    while let Some(item) = interp.next(&mut cursor)? {
        total = binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

pub fn round(_: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    let mut kw = Kwargs::new(kwargs);
    let ndigits_kw = kw.take("ndigits");
    kw.finish("round")?;
    arity("round", &args, 1, 2)?;

    let number = &args[0];
    let ndigits = not_none(args.get(1).cloned().or(ndigits_kw));
    match (number, ndigits) {
        (Value::Float(f), None) => {
            if f.is_nan() {
                return Err(RuntimeError::value_error("cannot convert float NaN to integer"));
            }
            float_to_int(f.round_ties_even())
        }
        (Value::Float(f), Some(digits)) => Ok(Value::Float(round_float(*f, index_arg(&digits)?))),
        (other, digits) => match other.as_int() {
            Some(i) => match digits {
                Some(digits) => round_int(i, index_arg(&digits)?),
                None => Ok(Value::Int(i)),
            },
            None => Err(RuntimeError::type_error(format!(
                "type {} doesn't define __round__ method",
                other.type_name()
            ))),
        },
    }
}

fn round_float(f: f64, digits: i64) -> f64 {
    if !f.is_finite() {
        return f;
    }
    if digits >= 0 {
        if digits > 300 {
            return f;
        }
        return format!("{:.*}", digits as usize, f).parse().unwrap_or(f);
    }
    let scale = 10f64.powi((-digits).min(308) as i32);
    (f / scale).round_ties_even() * scale
}

fn round_int(i: i64, digits: i64) -> RunResult<Value> {
    if digits >= 0 {
        return Ok(Value::Int(i));
    }
    if digits < -18 {
        return Ok(Value::Int(0));
    }
    let scale = 10i64.pow((-digits) as u32);
    let (quotient, remainder) = (i.div_euclid(scale), i.rem_euclid(scale));
    let twice = remainder * 2;
    let quotient = if twice > scale || (twice == scale && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    };
    quotient
        .checked_mul(scale)
        .map(Value::Int)
        .ok_or_else(RuntimeError::overflow)
}

// ---- sorting ----

pub fn sorted(interp: &mut Interpreter, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
    let mut kw = Kwargs::new(kwargs);
    let key = not_none(kw.take("key"));
    let reverse = kw.take("reverse").map(|v| v.truthy()).unwrap_or(false);
    kw.finish("sorted")?;
    if args.len() != 1 {
        return Err(RuntimeError::type_error(format!(
            "sorted expected 1 argument, got {}",
            args.len()
        )));
    }
    let items = interp.collect(&args[0])?;
    Ok(Value::list(sort_values(interp, items, key.as_ref(), reverse)?))
}

/// Stable sort with a fallible comparison. Equal elements keep their
/// relative order in both directions.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> RunResult<Vec<Value>> {
    let ranks = match key {
        Some(func) => items
            .iter()
            .map(|item| interp.call(func, vec![item.clone()], Vec::new()))
            .collect::<RunResult<Vec<_>>>()?,
        None => items.clone(),
    };

    let n = items.len();
    let mut order: Vec<usize> = (0..n).collect();
    let mut merged = vec![0usize; n];
    let mut width = 1;
    while width < n {
        interp.tick()?;
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut left, mut right, mut out) = (start, mid, start);
            while left < mid && right < end {
                let ordering = ranks[order[right]].py_cmp(&ranks[order[left]])?;
                let take_right = if reverse {
                    ordering == Ordering::Greater
                } else {
                    ordering == Ordering::Less
                };
                if take_right {
                    merged[out] = order[right];
                    right += 1;
                } else {
                    merged[out] = order[left];
                    left += 1;
                }
                out += 1;
            }
            merged[out..out + (mid - left)].copy_from_slice(&order[left..mid]);
            out += mid - left;
            merged[out..out + (end - right)].copy_from_slice(&order[right..end]);
            start = end;
        }
        std::mem::swap(&mut order, &mut merged);
        width *= 2;
    }

    let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
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
    fn test_print_keywords() {
        assert_eq!(run("print(1, 'a', sep='-', end='!')\n").unwrap(), "1-a!");
        assert_eq!(run("print()\n").unwrap(), "\n");
        assert!(run("print(1, file=None)\n").unwrap_err().starts_with("TypeError"));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(
            run("print(int(' 42 '), int(3.9), int('-7'), int('ff', 16), float('2.5'), str(None))\n").unwrap(),
            "42 3 -7 255 2.5 None\n"
        );
        assert_eq!(
            run("int('abc')\n").unwrap_err(),
            "ValueError: invalid literal for int() with base 10: 'abc'"
        );
        assert_eq!(
            run("float('x')\n").unwrap_err(),
            "ValueError: could not convert string to float: 'x'"
        );
    }

    #[test]
    fn test_min_max_sum() {
        assert_eq!(
            run("print(max([3, 9, 2]), min(4, 1, 8), sum([1, 2, 3], 10), max(['a', 'bbb'], key=len))\n").unwrap(),
            "9 1 16 bbb\n"
        );
        assert_eq!(
            run("max([])\n").unwrap_err(),
            "ValueError: max() arg is an empty sequence"
        );
        assert_eq!(run("print(min([], default=0))\n").unwrap(), "0\n");
    }

    #[test]
    fn test_sorted_is_stable_and_reversible() {
        let out = run(
            "words = ['bb', 'a', 'cc', 'd']\nprint(sorted(words, key=len))\nprint(sorted(words, key=len, reverse=True))\nprint(sorted([3, 1, 2], reverse=True))\n",
        )
        .unwrap();
        assert_eq!(
            out,
            "['a', 'd', 'bb', 'cc']\n['bb', 'cc', 'a', 'd']\n[3, 2, 1]\n"
        );
        assert_eq!(
            run("sorted([1, 'a'])\n").unwrap_err(),
            "TypeError: '<' not supported between instances of 'str' and 'int'"
        );
    }

    #[test]
    fn test_lazy_iterators() {
        let out = run(
            "print(list(map(lambda x: x * 2, [1, 2])))\nprint(list(filter(None, [0, 1, '', 'a'])))\nprint(list(zip('ab', range(5))))\nprint(list(reversed((1, 2, 3))))\n",
        )
        .unwrap();
        assert_eq!(out, "[2, 4]\n[1, 'a']\n[('a', 0), ('b', 1)]\n[3, 2, 1]\n");
    }

    #[test]
    fn test_iterators_are_single_use() {
        let out = run("m = map(str, [1, 2])\nprint(list(m))\nprint(list(m))\n").unwrap();
        assert_eq!(out, "['1', '2']\n[]\n");
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(
            run("print(round(2.5), round(3.5), round(3.14159, 2), round(1250, -2), round(7))\n").unwrap(),
            "2 4 3.14 1200 7\n"
        );
    }

    #[test]
    fn test_dict_constructor() {
        assert_eq!(
            run("print(dict([('a', 1), ['b', 2]], c=3))\n").unwrap(),
            "{'a': 1, 'b': 2, 'c': 3}\n"
        );
        assert!(run("dict([(1, 2, 3)])\n").unwrap_err().starts_with("ValueError"));
    }

    #[test]
    fn test_arity_messages() {
        assert_eq!(
            run("len()\n").unwrap_err(),
            "TypeError: len() takes exactly 1 argument (0 given)"
        );
        assert_eq!(
            run("len(5)\n").unwrap_err(),
            "TypeError: object of type 'int' has no len()"
        );
    }
}
