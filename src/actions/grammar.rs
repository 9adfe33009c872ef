//! Restricted literal grammar for directive call expressions.
//!
//! Accepts exactly one call of the form `name(key=value, ...)` where values
//! are quoted strings, integers, or bracketed integer lists. `finish` style
//! positional string arguments are also accepted. Anything else — nested
//! calls, identifiers, arithmetic — is rejected. Nothing is ever evaluated.

use crate::actions::types::ParamValue;

#[derive(Debug, Clone)]
pub struct Call {
    pub name: String,
    pub kwargs: Vec<(String, ParamValue)>,
    pub positional: Vec<ParamValue>,
}

impl Call {
    pub fn kwarg(&self, key: &str) -> Option<&ParamValue> {
        self.kwargs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Parses a single call expression, consuming the entire input.
pub fn parse_call(text: &str) -> Result<Call, String> {
    let mut cursor = Cursor::new(text);
    cursor.skip_ws();
    let name = cursor.ident()?;
    cursor.skip_ws();
    cursor.expect('(')?;

    let mut kwargs = Vec::new();
    let mut positional = Vec::new();

    loop {
        cursor.skip_ws();
        if cursor.eat(')') {
            break;
        }
        if cursor.peek_ident() {
            let key = cursor.ident()?;
            cursor.skip_ws();
            cursor.expect('=')?;
            cursor.skip_ws();
            let value = cursor.value()?;
            kwargs.push((key, value));
        } else {
            positional.push(cursor.value()?);
        }
        cursor.skip_ws();
        if cursor.eat(',') {
            continue;
        }
        cursor.expect(')')?;
        break;
    }

    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(format!("trailing input after call at offset {}", cursor.pos));
    }
    Ok(Call {
        name,
        kwargs,
        positional,
    })
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c == ' ' || c == '\t') {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(format!(
                "expected '{expected}' at offset {}, found {:?}",
                self.pos,
                self.peek()
            ))
        }
    }

    fn peek_ident(&self) -> bool {
        // A bare identifier is only legal as a keyword name, so look ahead
        // for the '=' that must follow it.
        let mut i = self.pos;
        let mut saw_ident = false;
        while let Some(&c) = self.chars.get(i) {
            if c.is_ascii_alphanumeric() || c == '_' {
                saw_ident = true;
                i += 1;
            } else {
                break;
            }
        }
        if !saw_ident {
            return false;
        }
        while let Some(&c) = self.chars.get(i) {
            if c == ' ' || c == '\t' {
                i += 1;
            } else {
                return c == '=';
            }
        }
        false
    }

    fn ident(&mut self) -> Result<String, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(format!("expected identifier at offset {start}"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn value(&mut self) -> Result<ParamValue, String> {
        match self.peek() {
            Some('"') | Some('\'') => self.string().map(ParamValue::Str),
            Some('[') => self.int_list().map(ParamValue::IntList),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => {
                self.integer().map(ParamValue::Int)
            }
            other => Err(format!(
                "expected literal at offset {}, found {other:?}",
                self.pos
            )),
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let Some(quote) = self.bump() else {
            return Err("expected string literal".into());
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string literal".into()),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    // Unknown escapes keep both characters, like a Python
                    // string literal would.
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => return Err("dangling escape at end of string".into()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn integer(&mut self) -> Result<i64, String> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        raw.parse::<i64>()
            .map_err(|e| format!("bad integer {raw:?}: {e}"))
    }

    fn int_list(&mut self) -> Result<Vec<i64>, String> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(']') {
                return Ok(items);
            }
            items.push(self.integer()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.expect(']')?;
            return Ok(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keyword_call_with_all_literal_shapes() {
        let call = parse_call(r#"do(action="Tap", element=[500, 500], duration=3000)"#).unwrap();
        assert_eq!(call.name, "do");
        assert_eq!(call.kwarg("action"), Some(&ParamValue::Str("Tap".into())));
        assert_eq!(
            call.kwarg("element"),
            Some(&ParamValue::IntList(vec![500, 500]))
        );
        assert_eq!(call.kwarg("duration"), Some(&ParamValue::Int(3000)));
    }

    #[test]
    fn parses_positional_string() {
        let call = parse_call(r#"finish("all done")"#).unwrap();
        assert_eq!(call.positional, vec![ParamValue::Str("all done".into())]);
        assert!(call.kwargs.is_empty());
    }

    #[test]
    fn single_quoted_strings_and_escapes() {
        let call = parse_call(r"do(action='Type', text='line1\nline2\t\'quoted\'')").unwrap();
        assert_eq!(
            call.kwarg("text"),
            Some(&ParamValue::Str("line1\nline2\t'quoted'".into()))
        );
    }

    #[test]
    fn rejects_non_literal_arguments() {
        assert!(parse_call(r#"do(action="Tap", element=find_element())"#).is_err());
        assert!(parse_call(r#"do(action=__import__("os"))"#).is_err());
        assert!(parse_call(r#"do(action="Tap", element=1+2)"#).is_err());
        assert!(parse_call(r#"do(action="Tap", flag=True)"#).is_err());
    }

    #[test]
    fn rejects_unbalanced_and_trailing_input() {
        assert!(parse_call(r#"do(action="Tap""#).is_err());
        assert!(parse_call(r#"do(action="Tap") extra"#).is_err());
        assert!(parse_call(r#"do(action="He said "hi"")"#).is_err());
    }

    #[test]
    fn trailing_comma_is_tolerated() {
        let call = parse_call(r#"do(action="Back",)"#).unwrap();
        assert_eq!(call.kwarg("action"), Some(&ParamValue::Str("Back".into())));
    }
}
