//! Text formatting: float repr, the format-spec mini-language used by
//! `format()`, f-strings and `str.format`, and `%` interpolation.

use super::error::{ErrorKind, RunResult, RuntimeError};
use super::value::Value;

/// Shortest round-trip float text, laid out the way the learner's
/// language prints floats (`1.0`, `0.1`, `1e+16`, `1.5e-05`).
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let (negative, digits, exp) = decompose(&format!("{:e}", f));
    let mut out = String::new();
    if negative {
        out.push('-');
    }

    if (-4..16).contains(&exp) {
        let point = exp + 1;
        if point <= 0 {
            out.push_str("0.");
            out.push_str(&"0".repeat((-point) as usize));
            out.push_str(&digits);
        } else if point as usize >= digits.len() {
            out.push_str(&digits);
            out.push_str(&"0".repeat(point as usize - digits.len()));
            out.push_str(".0");
        } else {
            out.push_str(&digits[..point as usize]);
            out.push('.');
            out.push_str(&digits[point as usize..]);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push_str(&exponent_suffix(exp));
    }
    out
}

/// Split Rust's `{:e}` output into (negative, significant digits, exponent).
fn decompose(sci: &str) -> (bool, String, i32) {
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci, "0"));
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    (negative, digits, exp.parse().unwrap_or(0))
}

fn exponent_suffix(exp: i32) -> String {
    format!("e{}{:02}", if exp < 0 { '-' } else { '+' }, exp.abs())
}

#[derive(Debug, Clone, PartialEq)]
struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: char,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

fn invalid_spec(spec: &str) -> RuntimeError {
    RuntimeError::value_error(format!("Invalid format specifier '{}'", spec))
}

fn parse_spec(spec: &str) -> RunResult<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut parsed = FormatSpec {
        fill: ' ',
        align: None,
        sign: '-',
        zero: false,
        width: 0,
        grouping: None,
        precision: None,
        ty: None,
    };

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = chars[0];
        parsed.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        parsed.align = Some(chars[0]);
        i = 1;
    }

    if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
        parsed.sign = chars[i];
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' {
        parsed.zero = true;
        i += 1;
    }

    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        let text: String = chars[start..i].iter().collect();
        parsed.width = text.parse().map_err(|_| invalid_spec(spec))?;
    }

    if i < chars.len() && matches!(chars[i], ',' | '_') {
        parsed.grouping = Some(chars[i]);
        i += 1;
    }

    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(RuntimeError::value_error("Format specifier missing precision"));
        }
        let text: String = chars[start..i].iter().collect();
        parsed.precision = Some(text.parse().map_err(|_| invalid_spec(spec))?);
    }

    if i < chars.len() {
        parsed.ty = Some(chars[i]);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid_spec(spec));
    }
    if parsed.width > 10_000 || parsed.precision.unwrap_or(0) > 1_000 {
        return Err(RuntimeError::value_error("Too many decimal digits in format string"));
    }
    Ok(parsed)
}

/// Apply a format spec to a value, as `format(value, spec)` does.
pub fn format_value(value: &Value, spec: &str) -> RunResult<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let fs = parse_spec(spec)?;

    match value {
        Value::Str(s) => {
            if !matches!(fs.ty, None | Some('s')) {
                return Err(unknown_code(fs.ty, "str"));
            }
            if fs.sign != '-' {
                return Err(RuntimeError::value_error(
                    "Sign not allowed in string format specifier",
                ));
            }
            let text: String = match fs.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.to_string(),
            };
            Ok(pad(&fs, "", &text, '<'))
        }
        Value::Int(_) | Value::Bool(_) => {
            let n = value.as_int().unwrap_or(0);
            match fs.ty {
                None | Some('d') | Some('n') => {
                    if fs.precision.is_some() {
                        return Err(RuntimeError::value_error(
                            "Precision not allowed in integer format specifier",
                        ));
                    }
                    let digits = group(&n.unsigned_abs().to_string(), fs.grouping);
                    Ok(pad(&fs, sign_prefix(n < 0, fs.sign), &digits, '>'))
                }
                Some(radix @ ('x' | 'X' | 'o' | 'b')) => {
                    let magnitude = n.unsigned_abs();
                    let digits = match radix {
                        'x' => format!("{:x}", magnitude),
                        'X' => format!("{:X}", magnitude),
                        'o' => format!("{:o}", magnitude),
                        _ => format!("{:b}", magnitude),
                    };
                    Ok(pad(&fs, sign_prefix(n < 0, fs.sign), &digits, '>'))
                }
                Some('c') => {
                    let ch = u32::try_from(n)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| RuntimeError::new(ErrorKind::OverflowError, "%c arg not in range"))?;
                    Ok(pad(&fs, "", &ch.to_string(), '<'))
                }
                Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') => format_float(n as f64, &fs),
                other => Err(unknown_code(other, "int")),
            }
        }
        Value::Float(f) => match fs.ty {
            Some('d' | 'x' | 'X' | 'o' | 'b' | 'c' | 's') => Err(unknown_code(fs.ty, "float")),
            _ => format_float(*f, &fs),
        },
        other => Err(RuntimeError::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn unknown_code(ty: Option<char>, type_name: &str) -> RuntimeError {
    RuntimeError::value_error(format!(
        "Unknown format code '{}' for object of type '{}'",
        ty.unwrap_or(' '),
        type_name
    ))
}

fn sign_prefix(negative: bool, sign: char) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

fn format_float(f: f64, fs: &FormatSpec) -> RunResult<String> {
    let negative = f.is_sign_negative() && !(f == 0.0 && fs.ty.is_none());
    let magnitude = f.abs();

    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        if matches!(fs.ty, Some('F' | 'E' | 'G')) {
            text.to_uppercase()
        } else {
            text.to_string()
        }
    } else {
        match fs.ty {
            Some('f' | 'F') => fixed(magnitude, fs.precision.unwrap_or(6), fs.grouping),
            Some('e' | 'E') => {
                let text = scientific(magnitude, fs.precision.unwrap_or(6));
                if fs.ty == Some('E') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            Some('%') => {
                let mut text = fixed(magnitude * 100.0, fs.precision.unwrap_or(6), fs.grouping);
                text.push('%');
                text
            }
            Some('g' | 'G') => {
                let text = general(magnitude, fs.precision.unwrap_or(6), false);
                if fs.ty == Some('G') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            None => match fs.precision {
                Some(p) => general(magnitude, p, true),
                None => {
                    let text = float_repr(magnitude);
                    match fs.grouping {
                        Some(sep) => group_float(&text, sep),
                        None => text,
                    }
                }
            },
            other => return Err(unknown_code(other, "float")),
        }
    };

    Ok(pad(fs, sign_prefix(negative, fs.sign), &body, '>'))
}

fn fixed(f: f64, precision: usize, grouping: Option<char>) -> String {
    let text = format!("{:.*}", precision, f);
    match grouping {
        Some(sep) => group_float(&text, sep),
        None => text,
    }
}

fn group_float(text: &str, sep: char) -> String {
    match text.split_once('.') {
        Some((int_part, frac)) => format!("{}.{}", group(int_part, Some(sep)), frac),
        None => group(text, Some(sep)),
    }
}

fn scientific(f: f64, precision: usize) -> String {
    let (_, digits, exp) = decompose(&format!("{:.*e}", precision, f));
    let mut out = digits[..1].to_string();
    if precision > 0 {
        out.push('.');
        out.push_str(&digits[1..]);
    }
    out.push_str(&exponent_suffix(exp));
    out
}

/// `g` presentation. `keep_point` gives the no-type variant, which keeps
/// at least one digit after the decimal point.
fn general(f: f64, precision: usize, keep_point: bool) -> String {
    let p = precision.max(1);
    if f == 0.0 {
        return if keep_point { "0.0" } else { "0" }.to_string();
    }
    let (_, _, exp) = decompose(&format!("{:.*e}", p - 1, f));
    if exp >= -4 && (exp as i64) < p as i64 {
        let decimals = (p as i64 - 1 - exp as i64).max(0) as usize;
        let mut text = format!("{:.*}", decimals, f);
        if text.contains('.') {
            text = text.trim_end_matches('0').trim_end_matches('.').to_string();
        }
        if keep_point && !text.contains('.') {
            text.push_str(".0");
        }
        text
    } else {
        let sci = scientific(f, p - 1);
        let (mantissa, suffix) = sci.split_once('e').unwrap_or((&sci, "+00"));
        let mantissa = if mantissa.contains('.') {
            mantissa.trim_end_matches('0').trim_end_matches('.')
        } else {
            mantissa
        };
        format!("{}e{}", mantissa, suffix)
    }
}

fn group(digits: &str, sep: Option<char>) -> String {
    let Some(sep) = sep else {
        return digits.to_string();
    };
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn pad(fs: &FormatSpec, sign: &str, body: &str, default_align: char) -> String {
    let (fill, align) = match (fs.align, fs.zero) {
        (Some(a), _) => (fs.fill, a),
        (None, true) => ('0', '='),
        (None, false) => (fs.fill, default_align),
    };
    let len = sign.chars().count() + body.chars().count();
    if len >= fs.width {
        return format!("{}{}", sign, body);
    }
    let padding = fs.width - len;
    let fill_str = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{}{}{}", sign, body, fill_str(padding)),
        '^' => format!(
            "{}{}{}{}",
            fill_str(padding / 2),
            sign,
            body,
            fill_str(padding - padding / 2)
        ),
        '=' => format!("{}{}{}", sign, fill_str(padding), body),
        _ => format!("{}{}{}", fill_str(padding), sign, body),
    }
}

/// `template % args` interpolation.
pub fn percent_format(template: &str, args: &Value) -> RunResult<String> {
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mut next = values.into_iter();
    let mut out = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut flags = String::new();
        while let Some(&f) = chars.peek() {
            if matches!(f, '-' | '+' | ' ' | '0') {
                flags.push(f);
                chars.next();
            } else {
                break;
            }
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                width.push(d);
                chars.next();
            } else {
                break;
            }
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            precision = Some(if digits.is_empty() { "0".to_string() } else { digits });
        }
        let ty = chars
            .next()
            .ok_or_else(|| RuntimeError::value_error("incomplete format"))?;
        if ty == '%' {
            out.push('%');
            continue;
        }

        let value = next
            .next()
            .ok_or_else(|| RuntimeError::type_error("not enough arguments for format string"))?;

        let mut spec = String::new();
        if flags.contains('-') {
            spec.push('<');
        }
        if flags.contains('+') {
            spec.push('+');
        } else if flags.contains(' ') {
            spec.push(' ');
        }
        if flags.contains('0') && !flags.contains('-') {
            spec.push('0');
        }
        spec.push_str(&width);
        let text = match ty {
            's' | 'r' => {
                let text = if ty == 's' { value.to_str() } else { value.repr() };
                let mut str_spec = String::from(if flags.contains('-') { "<" } else { ">" });
                str_spec.push_str(&width);
                if let Some(p) = &precision {
                    str_spec.push('.');
                    str_spec.push_str(p);
                }
                format_value(&Value::str(text), &str_spec)?
            }
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    v if v.as_int().is_some() => Value::Int(v.as_int().unwrap_or(0)),
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "%d format: a real number is required, not {}",
                            other.type_name()
                        )))
                    }
                };
                format_value(&n, &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' => {
                if !value.is_number() {
                    return Err(RuntimeError::type_error(format!(
                        "must be real number, not {}",
                        value.type_name()
                    )));
                }
                if let Some(p) = &precision {
                    spec.push('.');
                    spec.push_str(p);
                }
                spec.push(ty);
                format_value(&value, &spec)?
            }
            other => {
                return Err(RuntimeError::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&text);
    }

    if next.next().is_some() {
        return Err(RuntimeError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

/// `template.format(*args, **kwargs)`.
pub fn format_template(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> RunResult<String> {
    let mut auto_index = 0usize;
    render_template(template, args, kwargs, &mut auto_index, 0)
}

fn render_template(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    auto_index: &mut usize,
    depth: usize,
) -> RunResult<String> {
    if depth > 2 {
        return Err(RuntimeError::value_error("Max string recursion exceeded"));
    }
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => {
                return Err(RuntimeError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut level = 1;
                let mut j = i + 1;
                while j < chars.len() {
                    match chars[j] {
                        '{' => level += 1,
                        '}' => {
                            level -= 1;
                            if level == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(RuntimeError::value_error(
                        "Single '{' encountered in format string",
                    ));
                }
                let field: String = chars[i + 1..j].iter().collect();
                out.push_str(&render_field(&field, args, kwargs, auto_index, depth)?);
                i = j + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn render_field(
    field: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    auto_index: &mut usize,
    depth: usize,
) -> RunResult<String> {
    let (head, spec) = match field.find(':') {
        Some(pos) => (&field[..pos], &field[pos + 1..]),
        None => (field, ""),
    };
    let (name, conversion) = match head.find('!') {
        Some(pos) => (&head[..pos], head[pos + 1..].chars().next()),
        None => (head, None),
    };

    let value = if name.is_empty() {
        let idx = *auto_index;
        *auto_index += 1;
        args.get(idx).cloned().ok_or_else(|| {
            RuntimeError::index_error(format!(
                "Replacement index {} out of range for positional args tuple",
                idx
            ))
        })?
    } else if let Ok(idx) = name.parse::<usize>() {
        args.get(idx).cloned().ok_or_else(|| {
            RuntimeError::index_error(format!(
                "Replacement index {} out of range for positional args tuple",
                idx
            ))
        })?
    } else {
        kwargs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| RuntimeError::new(ErrorKind::KeyError, format!("'{}'", name)))?
    };

    let value = match conversion {
        None => value,
        Some('r') => Value::str(value.repr()),
        Some('s') => Value::str(value.to_str()),
        Some(other) => {
            return Err(RuntimeError::value_error(format!(
                "Unknown conversion specifier {}",
                other
            )))
        }
    };

    let spec = if spec.contains('{') {
        render_template(spec, args, kwargs, auto_index, depth + 1)?
    } else {
        spec.to_string()
    };
    format_value(&value, &spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(2.5), "2.5");
        assert_eq!(float_repr(-3.0), "-3.0");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(123456789.0), "123456789.0");
    }

    #[test]
    fn test_format_floats() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(5), ".1f").unwrap(), "5.0");
        assert_eq!(format_value(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_value(&Value::Float(1234.5), ",.2f").unwrap(), "1,234.50");
        assert_eq!(format_value(&Value::Float(12345.678), "e").unwrap(), "1.234568e+04");
        assert_eq!(format_value(&Value::Float(2.0), ".3").unwrap(), "2.0");
        assert_eq!(format_value(&Value::Float(0.00001234), "g").unwrap(), "1.234e-05");
    }

    #[test]
    fn test_format_alignment() {
        assert_eq!(format_value(&Value::str("ab"), ">5").unwrap(), "   ab");
        assert_eq!(format_value(&Value::str("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::Int(42), "05").unwrap(), "00042");
        assert_eq!(format_value(&Value::Int(-42), "05").unwrap(), "-0042");
        assert_eq!(format_value(&Value::Int(7), "<3").unwrap(), "7  ");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Int(255), "x").unwrap(), "ff");
        assert_eq!(format_value(&Value::Int(5), "+d").unwrap(), "+5");
    }

    #[test]
    fn test_format_rejects_bad_codes() {
        let err = format_value(&Value::str("a"), "d").unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: Unknown format code 'd' for object of type 'str'"
        );
        assert!(format_value(&Value::list(vec![]), ">3").is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("Ann"), Value::Int(3), Value::Float(2.5)]);
        assert_eq!(
            percent_format("%s has %d items costing %.2f", &args).unwrap(),
            "Ann has 3 items costing 2.50"
        );
        assert_eq!(percent_format("100%%", &Value::tuple(vec![])).unwrap(), "100%");
        assert!(percent_format("%s %s", &Value::str("x")).is_err());
        assert!(percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }

    #[test]
    fn test_format_template() {
        let args = vec![Value::str("x"), Value::Int(3)];
        let kwargs = vec![("unit".to_string(), Value::str("kg"))];
        assert_eq!(
            format_template("{} = {:>3} {unit}", &args, &kwargs).unwrap(),
            "x =   3 kg"
        );
        assert_eq!(format_template("{1}{0}{{}}", &args, &[]).unwrap(), "3x{}");
        assert_eq!(format_template("{0!r}", &args, &[]).unwrap(), "'x'");
        assert!(format_template("{5}", &args, &[]).is_err());
    }
}
