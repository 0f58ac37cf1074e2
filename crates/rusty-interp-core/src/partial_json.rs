//! Best-effort parsing of JSON that is still arriving.
//!
//! Function-call arguments stream in a few characters at a time and are only
//! valid JSON once the last token lands. [`parse_partial_json`] recovers the
//! largest value that the prefix already pins down:
//!
//! - open strings are closed, and raw control characters inside them are kept
//!   as if they had been escaped;
//! - a dangling `\` or a partial `\uXXXX` escape at the end is dropped;
//! - open objects and arrays are closed, innermost first;
//! - a member whose value has not started yet, a trailing `,`, and a trailing
//!   number or literal that could still grow are dropped.
//!
//! A key that is still open (or not yet followed by `:`) yields `None`, as
//! does any real syntax error. The function is pure and runs in one pass.

use serde_json::{Map, Value};

const MAX_DEPTH: usize = 128;

/// Parse a JSON prefix. Returns `None` while nothing can be recovered with confidence.
pub fn parse_partial_json(input: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(input) {
        return Some(value);
    }

    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return None;
    }

    let value = match parser.value() {
        Ok(Node::Complete(v)) | Ok(Node::Partial(v)) => v,
        Ok(Node::Truncated) | Err(Reject) => return None,
    };

    parser.skip_ws();
    if !parser.at_end() {
        return None;
    }
    Some(value)
}

/// Outcome of parsing one value.
enum Node {
    /// The value ended inside the input.
    Complete(Value),
    /// The input ended inside the value; this is what it holds so far.
    Partial(Value),
    /// The input ended before anything trustworthy was read.
    Truncated,
}

/// Input is malformed, or ends somewhere nothing can be recovered.
struct Reject;

type Parsed = Result<Node, Reject>;

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Parsed {
        match self.peek() {
            None => Ok(Node::Truncated),
            Some(b'{') => self.nested(Self::object),
            Some(b'[') => self.nested(Self::array),
            Some(b'"') => Ok(match self.string()? {
                Text::Closed(s) => Node::Complete(Value::String(s)),
                Text::Open(s) => Node::Partial(Value::String(s)),
            }),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(Reject),
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Parsed) -> Parsed {
        if self.depth >= MAX_DEPTH {
            return Err(Reject);
        }
        self.depth += 1;
        let node = parse(self);
        self.depth -= 1;
        node
    }

    fn object(&mut self) -> Parsed {
        self.pos += 1; // '{'
        let mut map = Map::new();
        let mut after_comma = false;

        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Node::Partial(Value::Object(map))),
                Some(b'}') if !after_comma => {
                    self.pos += 1;
                    return Ok(Node::Complete(Value::Object(map)));
                }
                Some(b'"') => {}
                Some(_) => return Err(Reject),
            }

            let key = match self.string()? {
                Text::Closed(key) => key,
                Text::Open(_) => return Err(Reject),
            };

            self.skip_ws();
            match self.bump() {
                Some(b':') => {}
                _ => return Err(Reject),
            }

            self.skip_ws();
            match self.value()? {
                Node::Complete(v) => {
                    map.insert(key, v);
                }
                Node::Partial(v) => {
                    map.insert(key, v);
                    return Ok(Node::Partial(Value::Object(map)));
                }
                Node::Truncated => return Ok(Node::Partial(Value::Object(map))),
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Node::Partial(Value::Object(map))),
                Some(b',') => after_comma = true,
                Some(b'}') => return Ok(Node::Complete(Value::Object(map))),
                Some(_) => return Err(Reject),
            }
        }
    }

    fn array(&mut self) -> Parsed {
        self.pos += 1; // '['
        let mut items = Vec::new();
        let mut after_comma = false;

        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Node::Partial(Value::Array(items))),
                Some(b']') if !after_comma => {
                    self.pos += 1;
                    return Ok(Node::Complete(Value::Array(items)));
                }
                Some(_) => {}
            }

            match self.value()? {
                Node::Complete(v) => items.push(v),
                Node::Partial(v) => {
                    items.push(v);
                    return Ok(Node::Partial(Value::Array(items)));
                }
                Node::Truncated => return Ok(Node::Partial(Value::Array(items))),
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Node::Partial(Value::Array(items))),
                Some(b',') => after_comma = true,
                Some(b']') => return Ok(Node::Complete(Value::Array(items))),
                Some(_) => return Err(Reject),
            }
        }
    }

    fn string(&mut self) -> Result<Text, Reject> {
        self.pos += 1; // opening quote
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let Some(b) = self.bump() else {
                return open_text(buf);
            };
            match b {
                b'"' => return String::from_utf8(buf).map(Text::Closed).map_err(|_| Reject),
                b'\\' => {
                    let Some(esc) = self.bump() else {
                        return open_text(buf);
                    };
                    let unescaped = match esc {
                        b'"' => '"',
                        b'\\' => '\\',
                        b'/' => '/',
                        b'b' => '\u{0008}',
                        b'f' => '\u{000c}',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'u' => match self.unicode_escape()? {
                            Some(c) => c,
                            None => return open_text(buf),
                        },
                        _ => return Err(Reject),
                    };
                    let mut utf8 = [0u8; 4];
                    buf.extend_from_slice(unescaped.encode_utf8(&mut utf8).as_bytes());
                }
                other => buf.push(other),
            }
        }
    }

    /// Decode the `XXXX` after `\u`. `Ok(None)` means the input ended mid-escape.
    fn unicode_escape(&mut self) -> Result<Option<char>, Reject> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };

        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high).map(Some).ok_or(Reject);
        }

        // High surrogate: a `\uXXXX` low surrogate must follow.
        match (self.bump(), self.bump()) {
            (Some(b'\\'), Some(b'u')) => {}
            (None, _) | (Some(b'\\'), None) => return Ok(None),
            _ => return Err(Reject),
        }
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            return Err(Reject);
        }
        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        char::from_u32(code).map(Some).ok_or(Reject)
    }

    fn hex4(&mut self) -> Result<Option<u32>, Reject> {
        let end = self.pos + 4;
        let Some(digits) = self.bytes.get(self.pos..end) else {
            if self.bytes[self.pos..].iter().all(u8::is_ascii_hexdigit) {
                self.pos = self.bytes.len();
                return Ok(None);
            }
            return Err(Reject);
        };
        let digits = std::str::from_utf8(digits).map_err(|_| Reject)?;
        let code = u32::from_str_radix(digits, 16).map_err(|_| Reject)?;
        self.pos = end;
        Ok(Some(code))
    }

    fn literal(&mut self, word: &str, value: Value) -> Parsed {
        let rest = &self.bytes[self.pos..];
        let word = word.as_bytes();
        if rest.len() < word.len() {
            return if word.starts_with(rest) {
                self.pos = self.bytes.len();
                Ok(Node::Truncated)
            } else {
                Err(Reject)
            };
        }
        if &rest[..word.len()] != word {
            return Err(Reject);
        }
        self.pos += word.len();
        Ok(Node::Complete(value))
    }

    fn number(&mut self) -> Parsed {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        if self.at_end() {
            // More digits may still arrive.
            return Ok(Node::Truncated);
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).map_err(|_| Reject)?;
        match serde_json::from_str::<Value>(text) {
            Ok(n @ Value::Number(_)) => Ok(Node::Complete(n)),
            _ => Err(Reject),
        }
    }
}

enum Text {
    Closed(String),
    Open(String),
}

fn open_text(buf: Vec<u8>) -> Result<Text, Reject> {
    String::from_utf8(buf).map(Text::Open).map_err(|_| Reject)
}
