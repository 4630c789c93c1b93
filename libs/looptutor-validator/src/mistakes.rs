/// Mistake Detector
///
/// **Core Responsibility:**
/// Scan raw source text for the handful of iteration mistakes beginners make
/// most often and explain each one in plain language.
///
/// **Critical Properties:**
/// - Pure text analysis: never parses, never executes
/// - Works on code that does not parse, which is when it matters most
/// - Advisory only; findings never change a score
///
/// **Rule Table:**
/// Each rule is an independent function. Line rules look at one `for`
/// header at a time, source rules look at the whole program. Findings come
/// out in table order, then line order.

use lazy_static::lazy_static;
use looptutor_common::types::{MistakeFinding, MistakeKind};
use regex::Regex;

const MISSING_COLON: &str =
    "Missing colon (:) at the end of the for statement. Python requires a colon to start a code block.";
const MISSING_IN: &str = "Missing 'in' keyword in for loop. Correct syntax: for item in collection:";
const UNNEEDED_INDEX: &str = "Using index syntax when not needed. When iterating directly with 'for item in list', the item variable already contains the value.";
const ENUMERATE_UNPACK: &str =
    "enumerate() returns (index, value) tuples. You must unpack both: for i, item in enumerate(list)";
const ITEMS_UNPACK: &str =
    "dict.items() returns (key, value) tuples. You must unpack both: for key, value in dict.items()";
const USE_KEYS: &str = "Use .keys() to iterate over dictionary keys only, not .items()";
const USE_VALUES: &str = "Use .values() to iterate over dictionary values only, not .items()";
const UNINDENTED_BODY: &str =
    "Loop body must be indented. Python uses indentation to define code blocks (usually 4 spaces).";

lazy_static! {
    static ref FOR_HEADER: Regex = Regex::new(r"^for\s").unwrap();
    static ref MEMBERSHIP: Regex = Regex::new(r"\bin\b").unwrap();
    static ref INDEX_ACCESS: Regex = Regex::new(r"\[(i|idx|index)\]").unwrap();
    static ref ENUMERATE_SINGLE: Regex = Regex::new(r"^for\s+\w+\s+in\s+enumerate\b").unwrap();
    static ref ITEMS_SINGLE: Regex = Regex::new(r"^for\s+\w+\s+in\s+[\w.]+\.items\(\)").unwrap();
}

/// One `for` header and the line that should hold its body.
struct ForHeader<'a> {
    /// Header text with surrounding whitespace removed.
    text: &'a str,
    /// Next line that is neither blank nor comment-only, untrimmed.
    body: Option<&'a str>,
}

type LineRule = fn(&ForHeader) -> Option<MistakeFinding>;
type SourceRule = fn(&str, Option<&str>) -> Option<MistakeFinding>;

enum Rule {
    Line(LineRule),
    Source(SourceRule),
}

const RULES: &[Rule] = &[
    Rule::Line(missing_block_terminator),
    Rule::Line(missing_membership_keyword),
    Rule::Source(unnecessary_index_access),
    Rule::Source(enumerate_single_var),
    Rule::Source(items_single_var),
    Rule::Source(wrong_accessor_method),
    Rule::Line(unindented_body),
];

/// Run every rule over `source`. `concept` enables the concept-specific
/// rules (`BasicListIteration`, `StringIteration`, `DictKeysIteration`,
/// `DictValuesIteration`).
pub fn detect(source: &str, concept: Option<&str>) -> Vec<MistakeFinding> {
    let headers = for_headers(source);
    let mut findings = Vec::new();
    for rule in RULES {
        match rule {
            Rule::Line(check) => findings.extend(headers.iter().filter_map(check)),
            Rule::Source(check) => findings.extend(check(source, concept)),
        }
    }
    findings
}

fn for_headers(source: &str) -> Vec<ForHeader<'_>> {
    let lines: Vec<&str> = source.lines().collect();
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| FOR_HEADER.is_match(line.trim()))
        .map(|(i, line)| ForHeader {
            text: line.trim(),
            body: lines[i + 1..]
                .iter()
                .copied()
                .find(|next| !next.trim().is_empty() && !next.trim_start().starts_with('#')),
        })
        .collect()
}

fn finding(kind: MistakeKind, message: &str, offending_line: Option<&str>) -> MistakeFinding {
    MistakeFinding {
        kind,
        message: message.to_string(),
        offending_line: offending_line.map(str::to_string),
    }
}

/// Code part of a line with any trailing comment removed. A `#` inside a
/// string literal does not start a comment.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '#' => return &line[..i],
            None => {}
        }
    }
    line
}

/// True when the last significant character is a `:` outside any bracket
/// or string.
fn ends_block(header: &str) -> bool {
    let code = strip_comment(header).trim_end();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut last_colon_at_top = false;
    for c in code.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            last_colon_at_top = false;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if !c.is_whitespace() {
            last_colon_at_top = c == ':' && depth == 0;
        }
    }
    last_colon_at_top
}

fn has_membership(header: &str) -> bool {
    MEMBERSHIP.is_match(strip_comment(header))
}

fn missing_block_terminator(header: &ForHeader) -> Option<MistakeFinding> {
    (has_membership(header.text) && !ends_block(header.text)).then(|| {
        finding(
            MistakeKind::MissingBlockTerminator,
            MISSING_COLON,
            Some(header.text),
        )
    })
}

fn missing_membership_keyword(header: &ForHeader) -> Option<MistakeFinding> {
    (!has_membership(header.text)).then(|| {
        finding(
            MistakeKind::MissingMembershipKeyword,
            MISSING_IN,
            Some(header.text),
        )
    })
}

fn unnecessary_index_access(source: &str, concept: Option<&str>) -> Option<MistakeFinding> {
    if !matches!(concept, Some("BasicListIteration") | Some("StringIteration")) {
        return None;
    }
    if source.contains("enumerate") {
        return None;
    }
    let line = source.lines().find(|line| INDEX_ACCESS.is_match(line))?;
    Some(finding(
        MistakeKind::UnnecessaryIndexAccess,
        UNNEEDED_INDEX,
        Some(line.trim()),
    ))
}

fn single_var_header<'a>(source: &'a str, pattern: &Regex) -> Option<&'a str> {
    source
        .lines()
        .map(str::trim)
        .find(|line| pattern.is_match(strip_comment(line)))
}

fn enumerate_single_var(source: &str, _concept: Option<&str>) -> Option<MistakeFinding> {
    let line = single_var_header(source, &ENUMERATE_SINGLE)?;
    Some(finding(
        MistakeKind::BadTupleUnpackSingleVar,
        ENUMERATE_UNPACK,
        Some(line),
    ))
}

fn items_single_var(source: &str, _concept: Option<&str>) -> Option<MistakeFinding> {
    let line = single_var_header(source, &ITEMS_SINGLE)?;
    Some(finding(
        MistakeKind::BadTupleUnpackSingleVar,
        ITEMS_UNPACK,
        Some(line),
    ))
}

fn wrong_accessor_method(source: &str, concept: Option<&str>) -> Option<MistakeFinding> {
    let message = match concept {
        Some("DictKeysIteration") => USE_KEYS,
        Some("DictValuesIteration") => USE_VALUES,
        _ => return None,
    };
    let line = source.lines().find(|line| strip_comment(line).contains(".items()"))?;
    Some(finding(
        MistakeKind::WrongAccessorMethod,
        message,
        Some(line.trim()),
    ))
}

fn unindented_body(header: &ForHeader) -> Option<MistakeFinding> {
    if !ends_block(header.text) {
        return None;
    }
    let body = header.body?;
    if body.starts_with(' ') || body.starts_with('\t') {
        return None;
    }
    Some(finding(
        MistakeKind::BadIndentation,
        UNINDENTED_BODY,
        Some(body.trim()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(findings: &[MistakeFinding]) -> Vec<MistakeKind> {
        findings.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn test_clean_loop_has_no_findings() {
        let source = "fruits = ['apple', 'banana']\nfor fruit in fruits:\n    print(fruit)\n";
        assert!(detect(source, Some("BasicListIteration")).is_empty());
    }

    #[test]
    fn test_missing_colon() {
        let findings = detect("for x in range(5)\n    print(x)", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::MissingBlockTerminator]);
        assert_eq!(findings[0].message, MISSING_COLON);
        assert_eq!(findings[0].offending_line.as_deref(), Some("for x in range(5)"));
    }

    #[test]
    fn test_colon_inside_brackets_or_comment_does_not_count() {
        let findings = detect("for x in items[1:]\n    print(x)\n", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::MissingBlockTerminator]);

        let findings = detect("for x in items  # loop:\n    print(x)\n", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::MissingBlockTerminator]);

        assert!(detect("for x in items[1:]:  # tail\n    print(x)\n", None).is_empty());
    }

    #[test]
    fn test_missing_in_keyword() {
        let findings = detect("for x range(5):\n    print(x)\n", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::MissingMembershipKeyword]);
        assert_eq!(findings[0].message, MISSING_IN);
    }

    #[test]
    fn test_identifier_containing_in_is_not_membership() {
        let findings = detect("for index inside:\n    print(index)\n", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::MissingMembershipKeyword]);
    }

    #[test]
    fn test_unnecessary_index_access_requires_concept() {
        let source = "for i in range(len(items)):\n    print(items[i])\n";
        let findings = detect(source, Some("BasicListIteration"));
        assert_eq!(kinds(&findings), vec![MistakeKind::UnnecessaryIndexAccess]);
        assert_eq!(findings[0].message, UNNEEDED_INDEX);
        assert_eq!(findings[0].offending_line.as_deref(), Some("print(items[i])"));

        assert!(detect(source, None).is_empty());
        assert!(detect(source, Some("RangeIteration")).is_empty());
    }

    #[test]
    fn test_index_access_allowed_with_enumerate() {
        let source = "for idx, ch in enumerate(word):\n    print(word[idx])\n";
        assert!(detect(source, Some("StringIteration")).is_empty());
    }

    #[test]
    fn test_enumerate_single_variable() {
        let findings = detect("for i in enumerate(items):\n    print(i)", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::BadTupleUnpackSingleVar]);
        assert_eq!(findings[0].message, ENUMERATE_UNPACK);
    }

    #[test]
    fn test_items_single_variable() {
        let findings = detect("for pair in scores.items():\n    print(pair)\n", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::BadTupleUnpackSingleVar]);
        assert_eq!(findings[0].message, ITEMS_UNPACK);

        assert!(detect("for name, score in scores.items():\n    print(name)\n", None).is_empty());
    }

    #[test]
    fn test_wrong_accessor_names_the_right_method() {
        let source = "for k, v in ages.items():\n    print(k)\n";
        let keys = detect(source, Some("DictKeysIteration"));
        assert_eq!(kinds(&keys), vec![MistakeKind::WrongAccessorMethod]);
        assert_eq!(keys[0].message, USE_KEYS);

        let values = detect(source, Some("DictValuesIteration"));
        assert_eq!(values[0].message, USE_VALUES);

        assert!(detect(source, Some("DictItemsIteration")).is_empty());
    }

    #[test]
    fn test_unindented_body() {
        let findings = detect("for x in range(3):\nprint(x)\n", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::BadIndentation]);
        assert_eq!(findings[0].message, UNINDENTED_BODY);
        assert_eq!(findings[0].offending_line.as_deref(), Some("print(x)"));
    }

    #[test]
    fn test_indentation_skips_blank_and_comment_lines() {
        assert!(detect("for x in range(3):\n\n# note\n    print(x)\n", None).is_empty());
        let findings = detect("for x in range(3):\n\nprint(x)\n", None);
        assert_eq!(kinds(&findings), vec![MistakeKind::BadIndentation]);
    }

    #[test]
    fn test_one_line_can_trigger_several_rules() {
        let findings = detect("for i in enumerate(items)\n    print(i)\n", None);
        assert_eq!(
            kinds(&findings),
            vec![
                MistakeKind::MissingBlockTerminator,
                MistakeKind::BadTupleUnpackSingleVar
            ]
        );
    }

    #[test]
    fn test_nested_for_headers_are_each_checked() {
        let source = "for row in grid:\n    for cell in row\n        print(cell)\n";
        let findings = detect(source, None);
        assert_eq!(kinds(&findings), vec![MistakeKind::MissingBlockTerminator]);
        assert_eq!(findings[0].offending_line.as_deref(), Some("for cell in row"));
    }

    #[test]
    fn test_never_executes_source() {
        assert!(detect("while True:\n    pass\n", None).is_empty());
        assert!(detect("", Some("BasicListIteration")).is_empty());
    }

    #[test]
    fn test_strip_comment_respects_strings() {
        assert_eq!(strip_comment("print('#') # c"), "print('#') ");
        assert_eq!(strip_comment("x = \"a\\\"#\""), "x = \"a\\\"#\"");
    }
}
