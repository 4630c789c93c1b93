//! Tokenizer with significant indentation.
//!
//! Produces `Newline`/`Indent`/`Dedent` tokens the way the reference
//! language does: blank and comment-only lines are skipped, newlines
//! inside brackets are ignored, and a backslash joins physical lines.

use super::error::SyntaxFault;

pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield",
];

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=",
    "&=", "|=", "^=", "->", ":=", "<<", ">>", "+", "-", "*", "/", "%", "<", ">", "=", "(", ")",
    "[", "]", "{", "}", ",", ":", ".", ";", "@", "&", "|", "^", "~",
];

const INCONSISTENT_TABS: &str = "inconsistent use of tabs and spaces in indentation";

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Keyword(&'static str),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    EndOfFile,
}

impl Tok {
    pub fn describe(&self) -> String {
        match self {
            Tok::Name(n) => format!("name '{}'", n),
            Tok::Keyword(k) => format!("keyword '{}'", k),
            Tok::Int(_) | Tok::Float(_) => "number".to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
            Tok::Op(op) => format!("'{}'", op),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::EndOfFile => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    /// Open indentation levels as (column with 8-wide tabs, column with
    /// 1-wide tabs). The two must order the same way for every line.
    indents: Vec<(usize, usize)>,
    brackets: Vec<(char, usize)>,
    tokens: Vec<Token>,
    _source: &'a str,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxFault> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        indents: vec![(0, 0)],
        brackets: Vec::new(),
        tokens: Vec::new(),
        _source: source,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn run(&mut self) -> Result<(), SyntaxFault> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.brackets.is_empty() {
                at_line_start = false;
                if self.handle_indentation()? {
                    continue;
                }
            }

            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.brackets.is_empty() {
                        if !matches!(
                            self.tokens.last().map(|t| &t.tok),
                            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
                        ) {
                            self.push(Tok::Newline);
                        }
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '\\' => {
                    let next = self.peek_at(1);
                    if next == Some('\n') {
                        self.pos += 2;
                        self.line += 1;
                    } else if next == Some('\r') && self.peek_at(2) == Some('\n') {
                        self.pos += 3;
                        self.line += 1;
                    } else {
                        return Err(self.error("unexpected character after line continuation character"));
                    }
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                '"' | '\'' => self.string(String::new())?,
                c if c.is_alphabetic() || c == '_' => self.name_or_prefixed_string()?,
                _ => self.operator()?,
            }
        }

        if let Some(&(open, line)) = self.brackets.last() {
            return Err(SyntaxFault::new(line, format!("'{}' was never closed", open)));
        }
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::EndOfFile);
        Ok(())
    }

    /// Measure the indentation of a new logical line. Returns `true` when
    /// the line is blank or comment-only and has been consumed.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxFault> {
        let mut width = 0usize;
        let mut alt_width = 0usize;
        let mut scan = self.pos;
        while let Some(&c) = self.chars.get(scan) {
            match c {
                ' ' => {
                    width += 1;
                    alt_width += 1;
                }
                '\t' => {
                    width = (width / 8 + 1) * 8;
                    alt_width += 1;
                }
                '\x0c' => {
                    width = 0;
                    alt_width = 0;
                }
                _ => break,
            }
            scan += 1;
        }

        match self.chars.get(scan) {
            None => {
                self.pos = scan;
                return Ok(true);
            }
            Some('\n') => {
                self.pos = scan + 1;
                self.line += 1;
                return Ok(true);
            }
            Some('\r') if self.chars.get(scan + 1) == Some(&'\n') => {
                self.pos = scan + 2;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.pos = scan;
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        self.pos = scan;
        let (current, alt_current) = self.indents.last().copied().unwrap_or((0, 0));
        if width > current {
            if alt_width <= alt_current {
                return Err(self.error(INCONSISTENT_TABS));
            }
            self.indents.push((width, alt_width));
            self.push(Tok::Indent);
        } else {
            while width < self.indents.last().map_or(0, |level| level.0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            let (level, alt_level) = self.indents.last().copied().unwrap_or((0, 0));
            if width != level {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
            if alt_width != alt_level {
                return Err(self.error(INCONSISTENT_TABS));
            }
        }
        Ok(false)
    }

    fn error(&self, message: impl Into<String>) -> SyntaxFault {
        SyntaxFault::new(self.line, message)
    }

    fn number(&mut self) -> Result<(), SyntaxFault> {
        let start = self.pos;

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_digit(radix) || c == '_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let digits: String = self.chars[digits_start..self.pos]
                    .iter()
                    .filter(|c| **c != '_')
                    .collect();
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| self.error("invalid number literal"))?;
                self.push(Tok::Int(value));
                return self.check_number_end();
            }
        }

        let mut is_float = false;
        self.eat_digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            self.eat_digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign_offset = if matches!(self.peek_at(1), Some('+' | '-')) { 2 } else { 1 };
            if self.peek_at(sign_offset).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += sign_offset;
                self.eat_digits();
            }
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal '{}'", text)))?;
            self.push(Tok::Float(value));
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(self.error(
                    "leading zeros in decimal integer literals are not permitted",
                ));
            }
            let value: i64 = text
                .parse()
                .map_err(|_| self.error("integer literal too large"))?;
            self.push(Tok::Int(value));
        }
        self.check_number_end()
    }

    fn eat_digits(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn check_number_end(&self) -> Result<(), SyntaxFault> {
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {
                Err(self.error("invalid decimal literal"))
            }
            _ => Ok(()),
        }
    }

    fn name_or_prefixed_string(&mut self) -> Result<(), SyntaxFault> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"' | '\'')) {
            let lower = word.to_ascii_lowercase();
            if matches!(lower.as_str(), "r" | "f" | "rf" | "fr" | "b" | "br" | "rb" | "u") {
                if lower.contains('b') {
                    return Err(self.error("bytes literals are not supported"));
                }
                return self.string(lower);
            }
        }

        match KEYWORDS.iter().find(|k| **k == word) {
            Some(kw) => self.push(Tok::Keyword(kw)),
            None => self.push(Tok::Name(word)),
        }
        Ok(())
    }

    fn string(&mut self, prefix: String) -> Result<(), SyntaxFault> {
        let raw = prefix.contains('r');
        let fstring = prefix.contains('f');
        let quote = self.peek().unwrap_or('"');
        let start_line = self.line;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(if triple {
                    SyntaxFault::new(start_line, "unterminated triple-quoted string literal")
                } else {
                    SyntaxFault::new(start_line, "unterminated string literal")
                });
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
                value.push(c);
                self.pos += 1;
                continue;
            }

            if c == '\n' {
                if !triple {
                    return Err(SyntaxFault::new(
                        start_line,
                        format!("unterminated string literal (detected at line {})", self.line),
                    ));
                }
                self.line += 1;
                value.push(c);
                self.pos += 1;
                continue;
            }

            if c == '\\' {
                let Some(next) = self.peek_at(1) else {
                    self.pos += 1;
                    continue;
                };
                if raw {
                    value.push('\\');
                    value.push(next);
                    if next == '\n' {
                        self.line += 1;
                    }
                    self.pos += 2;
                    continue;
                }
                self.pos += 2;
                match next {
                    '\n' => self.line += 1,
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '0' => value.push('\0'),
                    'a' => value.push('\x07'),
                    'b' => value.push('\x08'),
                    'f' => value.push('\x0c'),
                    'v' => value.push('\x0b'),
                    '\\' => value.push('\\'),
                    '\'' => value.push('\''),
                    '"' => value.push('"'),
                    'x' => value.push(self.hex_escape(2)?),
                    'u' => value.push(self.hex_escape(4)?),
                    'U' => value.push(self.hex_escape(8)?),
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
                continue;
            }

            value.push(c);
            self.pos += 1;
        }

        if fstring {
            self.tokens.push(Token {
                tok: Tok::FStr(value),
                line: start_line,
            });
        } else {
            self.tokens.push(Token {
                tok: Tok::Str(value),
                line: start_line,
            });
        }
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, SyntaxFault> {
        let end = self.pos + digits;
        if end > self.chars.len() {
            return Err(self.error("truncated escape sequence"));
        }
        let text: String = self.chars[self.pos..end].iter().collect();
        let code = u32::from_str_radix(&text, 16).map_err(|_| self.error("truncated escape sequence"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("illegal Unicode character"))
    }

    fn operator(&mut self) -> Result<(), SyntaxFault> {
        let c = self.peek().unwrap_or(' ');
        for op in OPERATORS {
            let len = op.chars().count();
            if self.pos + len <= self.chars.len()
                && op.chars().zip(&self.chars[self.pos..self.pos + len]).all(|(a, b)| a == *b)
            {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.brackets.push((c, self.line)),
                    ")" | "]" | "}" => {
                        let expected = match *op {
                            ")" => '(',
                            "]" => '[',
                            _ => '{',
                        };
                        match self.brackets.pop() {
                            Some((open, _)) if open == expected => {}
                            Some((open, _)) => {
                                return Err(self.error(format!(
                                    "closing parenthesis '{}' does not match opening parenthesis '{}'",
                                    op, open
                                )))
                            }
                            None => return Err(self.error(format!("unmatched '{}'", op))),
                        }
                    }
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        if c == '!' {
            return Err(self.error("invalid syntax"));
        }
        Err(self.error(format!("invalid character '{}' (U+{:04X})", c, c as u32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indent_dedent() {
        let toks = kinds("for x in y:\n    print(x)\nprint(1)\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        assert_eq!(toks.last(), Some(&Tok::EndOfFile));
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_numbers_and_strings() {
        let toks = kinds("a = 1_000 + 0x1f + 2.5e3 + 'hi\\n' + f\"{a}\"");
        assert!(toks.contains(&Tok::Int(1000)));
        assert!(toks.contains(&Tok::Int(31)));
        assert!(toks.contains(&Tok::Float(2500.0)));
        assert!(toks.contains(&Tok::Str("hi\n".to_string())));
        assert!(toks.contains(&Tok::FStr("{a}".to_string())));
    }

    #[test]
    fn test_tab_width_must_agree_with_spaces() {
        // Eight spaces line up with one tab only at tab size 8.
        let err = tokenize("if x:\n\ta = 1\n        b = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.message, "inconsistent use of tabs and spaces in indentation");

        let err = tokenize("if x:\n        a = 1\n\t b = 2\n").unwrap_err();
        assert_eq!(err.message, "inconsistent use of tabs and spaces in indentation");

        let err = tokenize("if x:\n    if y:\n\t\ta = 1\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.message, "inconsistent use of tabs and spaces in indentation");
    }

    #[test]
    fn test_comment_and_blank_lines_skipped() {
        let toks = kinds("x = 1\n\n    # indented comment\nprint(x)\n");
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_errors_report_lines() {
        let err = tokenize("x = 1\nif x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert_eq!(err.line, 4);
        assert!(err.message.contains("unindent"));

        let err = tokenize("print('oops)\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated string literal"));

        let err = tokenize("x = (1,\n2\n").unwrap_err();
        assert_eq!(err.message, "'(' was never closed");

        let err = tokenize("x = 1)\n").unwrap_err();
        assert_eq!(err.message, "unmatched ')'");
    }
}
