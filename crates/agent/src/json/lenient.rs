//! Permissive JSON object parser.
//!
//! Accepts what strict parsers reject in model output: unterminated
//! containers, trailing or missing commas, bare identifier keys, raw control
//! characters inside strings and arbitrary trailing content. Values that may
//! still grow (an unterminated string, a number or literal touching the end
//! of the buffer) are withheld, so a field appears only once it is final.

use serde_json::{Map, Number, Value};

/// Parse the first object in `input`.
///
/// Returns `None` when the input does not start with `{`. With
/// `allow_partial_strings`, an unterminated trailing string is kept as-is.
pub(crate) fn parse_object(input: &str, allow_partial_strings: bool) -> Option<Map<String, Value>> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        allow_partial_strings,
    };
    parser.skip_ws();
    if parser.peek() != Some('{') {
        return None;
    }
    match parser.object() {
        Parsed::Complete(Value::Object(map)) | Parsed::Partial(Some(Value::Object(map))) => Some(map),
        _ => None,
    }
}

enum Parsed {
    Complete(Value),
    /// Input ended (or broke) inside the value; carries what is usable.
    Partial(Option<Value>),
    Invalid,
}

enum Key {
    Found(String),
    Incomplete,
    Invalid,
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    allow_partial_strings: bool,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Parsed {
        self.skip_ws();
        match self.peek() {
            None => Parsed::Partial(None),
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') => self.string_value(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.literal(),
            Some(_) => Parsed::Invalid,
        }
    }

    fn object(&mut self) -> Parsed {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Parsed::Partial(Some(Value::Object(map))),
                Some('}') => {
                    self.pos += 1;
                    return Parsed::Complete(Value::Object(map));
                }
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }

            let key = match self.key() {
                Key::Found(key) => key,
                Key::Incomplete | Key::Invalid => return Parsed::Partial(Some(Value::Object(map))),
            };

            self.skip_ws();
            if self.peek() != Some(':') {
                return Parsed::Partial(Some(Value::Object(map)));
            }
            self.pos += 1;

            match self.value() {
                Parsed::Complete(value) => {
                    map.insert(key, value);
                }
                Parsed::Partial(value) => {
                    if let Some(value) = value {
                        map.insert(key, value);
                    }
                    return Parsed::Partial(Some(Value::Object(map)));
                }
                Parsed::Invalid => return Parsed::Partial(Some(Value::Object(map))),
            }
        }
    }

    fn array(&mut self) -> Parsed {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Parsed::Partial(Some(Value::Array(items))),
                Some(']') => {
                    self.pos += 1;
                    return Parsed::Complete(Value::Array(items));
                }
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            match self.value() {
                Parsed::Complete(value) => items.push(value),
                Parsed::Partial(value) => {
                    items.extend(value);
                    return Parsed::Partial(Some(Value::Array(items)));
                }
                Parsed::Invalid => return Parsed::Partial(Some(Value::Array(items))),
            }
        }
    }

    fn key(&mut self) -> Key {
        match self.peek() {
            None => Key::Incomplete,
            Some('"') => match self.string() {
                (text, true) => Key::Found(text),
                (_, false) => Key::Incomplete,
            },
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    self.pos += 1;
                }
                if self.at_end() {
                    return Key::Incomplete;
                }
                Key::Found(self.chars[start..self.pos].iter().collect())
            }
            Some(_) => Key::Invalid,
        }
    }

    fn string_value(&mut self) -> Parsed {
        match self.string() {
            (text, true) => Parsed::Complete(Value::String(text)),
            (text, false) if self.allow_partial_strings => Parsed::Partial(Some(Value::String(text))),
            (_, false) => Parsed::Partial(None),
        }
    }

    /// Read a quoted string. The flag is `false` when input ended first.
    fn string(&mut self) -> (String, bool) {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return (out, false);
            };
            match c {
                '"' => return (out, true),
                '\\' => {
                    let Some(escaped) = self.bump() else {
                        return (out, false);
                    };
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'u' => match self.unicode_escape() {
                            Some(decoded) => out.push(decoded),
                            None if self.at_end() => return (out, false),
                            None => out.push(char::REPLACEMENT_CHARACTER),
                        },
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn hex4(&mut self) -> Option<u32> {
        if self.pos + 4 > self.chars.len() {
            self.pos = self.chars.len();
            return None;
        }
        let digits: String = self.chars[self.pos..self.pos + 4].iter().collect();
        let code = u32::from_str_radix(&digits, 16).ok()?;
        self.pos += 4;
        Some(code)
    }

    fn unicode_escape(&mut self) -> Option<char> {
        let high = self.hex4()?;
        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high);
        }
        // Surrogate pair: expect a `\uDC00`-range low half next.
        if self.peek() == Some('\\') && self.chars.get(self.pos + 1) == Some(&'u') {
            self.pos += 2;
            let low = self.hex4()?;
            if (0xDC00..0xE000).contains(&low) {
                return char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00));
            }
        }
        None
    }

    fn number(&mut self) -> Parsed {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        if self.at_end() {
            return Parsed::Partial(None);
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(n) = text.parse::<i64>() {
            return Parsed::Complete(Value::Number(n.into()));
        }
        match text.parse::<f64>().ok().and_then(Number::from_f64) {
            Some(n) => Parsed::Complete(Value::Number(n)),
            None => Parsed::Invalid,
        }
    }

    fn literal(&mut self) -> Parsed {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        let value = match word.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" | "none" => Some(Value::Null),
            _ => None,
        };
        match value {
            Some(value) => Parsed::Complete(value),
            None if self.at_end()
                && ["true", "false", "null"]
                    .iter()
                    .any(|lit| lit.starts_with(word.to_ascii_lowercase().as_str())) =>
            {
                Parsed::Partial(None)
            }
            None => Parsed::Invalid,
        }
    }
}
