/*! Detector for obfuscated VBA string expressions.

Malicious macros often build their strings at runtime, concatenating
literals and characters produced with `Chr`, reversing strings with
`StrReverse`, or reading environment variables with `Environ`:

```text
cmd = Chr(112) & Chr(111) & "wer" & StrReverse("llehs")
```

This module evaluates such expressions, one line at a time, and reports the
expressions that use a function or join two or more terms. Anything that
can't be evaluated statically (variables, unknown functions) ends the
expression.
*/

use crate::analysis::Match;
use crate::patterns::Category;

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Finds obfuscated string expressions in VBA code.
pub(crate) fn vba_strings(source: &str, matches: &mut Vec<Match>) {
    let mut line_start = 0;
    for line in source.split_inclusive('\n') {
        scan_line(line.trim_end_matches(['\r', '\n']), line_start, matches);
        line_start += line.len();
    }
}

fn scan_line(line: &str, base: usize, matches: &mut Vec<Match>) {
    let bytes = line.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let b = bytes[pos];

        // A quote outside a string literal starts a comment.
        if b == b'\'' {
            break;
        }

        let identifier_start = b.is_ascii_alphabetic()
            && (pos == 0 || !is_word_byte(bytes[pos - 1]));

        if b != b'"' && b != b'(' && !identifier_start {
            pos += 1;
            continue;
        }

        let mut parser = ExprParser::new(line, pos);

        if let Some(decoded) = parser.expr() {
            if parser.functions > 0 || parser.terms > 1 {
                let encoded = &line[pos..parser.pos];
                if encoded != decoded {
                    matches.push(Match::new(
                        Category::VbaString,
                        decoded,
                        encoded,
                        base + pos,
                    ));
                }
            }
            pos = parser.pos;
            continue;
        }

        // Not an expression, skip the whole literal or identifier so that
        // the next attempt doesn't start in the middle of it.
        pos = match b {
            b'"' => skip_string(bytes, pos),
            b'(' => pos + 1,
            _ => {
                let mut end = pos;
                while end < bytes.len() && is_word_byte(bytes[end]) {
                    end += 1;
                }
                end
            }
        };
    }
}

/// Returns the position that follows the string literal that starts at
/// `pos`, or the end of the line if the literal is not terminated.
fn skip_string(bytes: &[u8], pos: usize) -> usize {
    let mut i = pos + 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if bytes.get(i + 1) == Some(&b'"') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Recursive descent evaluator for string expressions.
///
/// ```text
/// expr     := term (("&" | "+") term)*
/// term     := string | "(" expr ")" | chr | strreverse | environ
/// chr      := ("Chr" | "ChrB" | "ChrW") ["$"] "(" int_expr ")"
/// int_expr := int_term (("+" | "-") int_term)*
/// int_term := factor (("*" | "/" | "\" | "Mod") factor)*
/// factor   := "-" factor | number | "(" int_expr ")"
/// number   := decimal | "&H" hex | "&O" octal
/// ```
///
/// Parentheses, function calls and unary minus can be nested up to
/// [`MAX_DEPTH`] levels, deeper expressions are not evaluated.
struct ExprParser<'a> {
    line: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Number of function calls evaluated.
    functions: usize,
    /// Number of string literals and function calls evaluated.
    terms: usize,
    /// Current nesting level.
    depth: usize,
}

/// Maximum nesting level of an expression.
const MAX_DEPTH: usize = 64;

impl<'a> ExprParser<'a> {
    fn new(line: &'a str, pos: usize) -> Self {
        Self {
            line,
            bytes: line.as_bytes(),
            pos,
            functions: 0,
            terms: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consumes `keyword` (case-insensitive) if it's not followed by a word
    /// character.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let end = self.pos + keyword.len();
        match self.bytes.get(self.pos..end) {
            Some(s)
                if s.eq_ignore_ascii_case(keyword.as_bytes())
                    && !self.bytes.get(end).is_some_and(|b| is_word_byte(*b)) =>
            {
                self.pos = end;
                true
            }
            _ => false,
        }
    }

    fn identifier(&mut self) -> Option<&'a str> {
        let start = self.pos;
        if !self.peek()?.is_ascii_alphabetic() {
            return None;
        }
        while self.peek().is_some_and(is_word_byte) {
            self.pos += 1;
        }
        Some(&self.line[start..self.pos])
    }

    fn expr(&mut self) -> Option<String> {
        let mut value = self.term()?;
        loop {
            let save = self.pos;
            self.skip_spaces();
            if !(self.eat(b'&') || self.eat(b'+')) {
                self.pos = save;
                break;
            }
            self.skip_spaces();
            match self.term() {
                Some(term) => value.push_str(&term),
                None => {
                    self.pos = save;
                    break;
                }
            }
        }
        Some(value)
    }

    fn term(&mut self) -> Option<String> {
        let start = (self.pos, self.functions, self.terms);
        let result = match self.peek()? {
            b'"' => self.string(),
            b'(' => self.parenthesized(Self::expr),
            _ => self.function(),
        };
        if result.is_none() {
            (self.pos, self.functions, self.terms) = start;
        }
        result
    }

    /// Calls `inner` one nesting level deeper. Returns `None` without
    /// calling it if the maximum depth has been reached.
    fn nested<T>(
        &mut self,
        inner: impl FnOnce(&mut Self) -> Option<T>,
    ) -> Option<T> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = inner(self);
        self.depth -= 1;
        value
    }

    fn parenthesized<T>(
        &mut self,
        inner: impl FnOnce(&mut Self) -> Option<T>,
    ) -> Option<T> {
        self.skip_spaces();
        if !self.eat(b'(') {
            return None;
        }
        self.skip_spaces();
        let value = self.nested(inner)?;
        self.skip_spaces();
        self.eat(b')').then_some(value)
    }

    fn string(&mut self) -> Option<String> {
        if !self.eat(b'"') {
            return None;
        }
        let mut value = String::new();
        loop {
            let rest = self.bytes.get(self.pos..)?;
            let quote = memchr::memchr(b'"', rest)?;
            value.push_str(&self.line[self.pos..self.pos + quote]);
            self.pos += quote + 1;
            // Two consecutive quotes are an escaped quote.
            if self.eat(b'"') {
                value.push('"');
            } else {
                break;
            }
        }
        self.terms += 1;
        Some(value)
    }

    fn function(&mut self) -> Option<String> {
        let name = self.identifier()?.to_ascii_lowercase();
        self.eat(b'$');

        let value = match name.as_str() {
            "chr" | "chrb" => {
                let code = self.parenthesized(Self::int_expr)?;
                char::from(u8::try_from(code).ok()?).to_string()
            }
            "chrw" => {
                let code = self.parenthesized(Self::int_expr)?;
                // ChrW accepts negative values for the upper half of the
                // 16-bit range.
                let code = if code < 0 { code + 0x10000 } else { code };
                char::from_u32(u32::try_from(code).ok()?)?.to_string()
            }
            "strreverse" => {
                self.parenthesized(Self::expr)?.chars().rev().collect()
            }
            "environ" => format!("%{}%", self.parenthesized(Self::expr)?),
            _ => return None,
        };

        self.functions += 1;
        self.terms += 1;
        Some(value)
    }

    fn int_expr(&mut self) -> Option<i64> {
        let mut value = self.int_term()?;
        loop {
            self.skip_spaces();
            if self.eat(b'+') {
                self.skip_spaces();
                value = value.checked_add(self.int_term()?)?;
            } else if self.peek() == Some(b'-') {
                self.pos += 1;
                self.skip_spaces();
                value = value.checked_sub(self.int_term()?)?;
            } else {
                return Some(value);
            }
        }
    }

    fn int_term(&mut self) -> Option<i64> {
        let mut value = self.factor()?;
        loop {
            self.skip_spaces();
            if self.eat(b'*') {
                self.skip_spaces();
                value = value.checked_mul(self.factor()?)?;
            } else if self.eat(b'/') {
                self.skip_spaces();
                let divisor = self.factor()?;
                if divisor == 0 {
                    return None;
                }
                // `/` is a floating point division, the result is rounded
                // when converted back to an integer.
                value = (value as f64 / divisor as f64).round_ties_even() as i64;
            } else if self.eat(b'\\') {
                self.skip_spaces();
                value = value.checked_div(self.factor()?)?;
            } else if self.eat_keyword("mod") {
                self.skip_spaces();
                value = value.checked_rem(self.factor()?)?;
            } else {
                return Some(value);
            }
        }
    }

    fn factor(&mut self) -> Option<i64> {
        self.skip_spaces();
        match self.peek()? {
            b'-' => {
                self.pos += 1;
                self.nested(Self::factor)?.checked_neg()
            }
            b'(' => self.parenthesized(Self::int_expr),
            b'&' => {
                self.pos += 1;
                let radix = match self.peek()?.to_ascii_uppercase() {
                    b'H' => 16,
                    b'O' => 8,
                    _ => return None,
                };
                self.pos += 1;
                self.number(radix)
            }
            b'0'..=b'9' => self.number(10),
            _ => None,
        }
    }

    fn number(&mut self, radix: u32) -> Option<i64> {
        let start = self.pos;
        while self.peek().is_some_and(|b| (b as char).is_digit(radix)) {
            self.pos += 1;
        }
        i64::from_str_radix(&self.line[start..self.pos], radix).ok()
    }
}
