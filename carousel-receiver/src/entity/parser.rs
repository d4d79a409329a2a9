//! RFC 2068 / RFC 1521 entity parser.
//!
//! Data carousel modules are encoded as an entity (STD-B24 第二分冊 第二編
//! 第9章): a block of `name: value` headers, a blank line and a body. When
//! the entity is `multipart/mixed` the body is split on its boundary into
//! nested entities, one per file.
//!
//! The parser works on raw bytes with an explicit cursor and never
//! backtracks. Header and token text is mapped byte-for-byte to `char`.

use bytes::Bytes;
use carousel_protocol::MediaType;

use super::media_type::parse_media_type;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const SP: u8 = b' ';
const HT: u8 = b'\t';
const DQUOTE: u8 = b'"';
const BACKSLASH: u8 = b'\\';

/// CTL: octets 0 - 31 and DEL (127).
pub fn is_ctl(c: u8) -> bool {
    c <= 31 || c == 127
}

/// tspecials from RFC 2068 section 2.2.
pub fn is_tspecial(c: u8) -> bool {
    b"()<>@,;:\\\"/[]?={} \t".contains(&c)
}

/// Kind of a header value token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValueKind {
    /// Linear white space, collapsed to a single space.
    Lws,
    /// Contents of a quoted-string, unescaped.
    Quoted,
    /// A single tspecials character.
    TSpecials,
    /// A run of token characters.
    Token,
}

/// One token of a header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub kind: FieldValueKind,
    pub value: String,
}

impl FieldValue {
    pub fn new(kind: FieldValueKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub(crate) fn is(&self, kind: FieldValueKind, value: &str) -> bool {
        self.kind == kind && self.value == value
    }
}

/// A parsed header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHeader {
    /// Lower-cased field name.
    pub name: String,
    /// Field name as transmitted.
    pub original_name: String,
    /// Tokenized field value, in order.
    pub value: Vec<FieldValue>,
}

impl EntityHeader {
    /// Reconstruct the header value by concatenating its tokens.
    pub fn value_string(&self) -> String {
        self.value.iter().map(|v| v.value.as_str()).collect()
    }
}

/// A parsed entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub headers: Vec<EntityHeader>,
    /// Bytes after the header block. Empty once a multipart body was consumed.
    pub body: Bytes,
    /// Nested entities when the entity is `multipart/mixed` with a boundary.
    pub multipart_body: Option<Vec<Entity>>,
}

impl Entity {
    /// First header with the given (lower-case) name.
    pub fn header(&self, name: &str) -> Option<&EntityHeader> {
        self.headers.iter().find(|h| h.name == name)
    }
}

/// Cursor-based entity parser over one buffer.
#[derive(Debug)]
pub struct EntityParser {
    buffer: Bytes,
    offset: usize,
}

impl EntityParser {
    /// Create a parser positioned at the start of `buffer`.
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer, offset: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buffer.get(self.offset).copied()
    }

    fn at_crlf(&self) -> bool {
        self.offset + 1 < self.buffer.len()
            && self.buffer[self.offset] == CR
            && self.buffer[self.offset + 1] == LF
    }

    /// Parse an entity from the cursor to the end of the buffer.
    ///
    /// ```text
    /// entity = *entity-header CRLF [entity-body]
    /// ```
    pub fn read_entity(&mut self) -> Result<Entity, &'static str> {
        let mut headers = Vec::new();
        loop {
            if self.offset + 1 >= self.buffer.len() {
                return Err("buffer ended inside the header block");
            }
            if self.at_crlf() {
                self.offset += 2;
                break;
            }
            let header = self.read_entity_header()?;
            if !self.at_crlf() {
                return Err("header line is not terminated by CRLF");
            }
            self.offset += 2;
            headers.push(header);
        }

        let media_type = headers
            .iter()
            .find(|h| h.name == "content-type")
            .and_then(|h| parse_media_type(&h.value));

        let multipart_body = match media_type {
            Some(ref media_type) if media_type.is_multipart_mixed() => {
                match media_type.parameter("boundary") {
                    Some(boundary) => Some(self.read_multipart_body(boundary)?),
                    None => None,
                }
            }
            _ => None,
        };

        Ok(Entity {
            headers,
            body: self.buffer.slice(self.offset..),
            multipart_body,
        })
    }

    /// Split a multipart body into entities.
    ///
    /// ```text
    /// multipart-body  = preamble 1*encapsulation close-delimiter epilogue
    /// encapsulation   = delimiter body-part CRLF
    /// delimiter       = "--" boundary CRLF
    /// close-delimiter = "--" boundary "--" CRLF
    /// ```
    fn read_multipart_body(&mut self, boundary: &str) -> Result<Vec<Entity>, &'static str> {
        let delimiter = format!("--{}\r\n", boundary).into_bytes();
        let next_delimiter = format!("\r\n--{}\r\n", boundary).into_bytes();
        let close_delimiter = format!("\r\n--{}--\r\n", boundary).into_bytes();

        let mut entities = Vec::new();
        loop {
            let Some(start) = find(&self.buffer, &delimiter, self.offset) else {
                return Err("multipart delimiter not found");
            };
            let part_start = start + delimiter.len();

            let (part_end, is_last) = match find(&self.buffer, &next_delimiter, part_start) {
                Some(end) => {
                    self.offset = end + 2;
                    (end, false)
                }
                None => match find(&self.buffer, &close_delimiter, part_start) {
                    Some(end) => {
                        self.offset = end + close_delimiter.len();
                        (end, true)
                    }
                    None => return Err("multipart close-delimiter not found"),
                },
            };

            let mut parser = EntityParser::new(self.buffer.slice(part_start..part_end));
            entities.push(parser.read_entity()?);

            if is_last {
                break;
            }
        }

        // The epilogue is discarded.
        self.offset = self.buffer.len();
        Ok(entities)
    }

    /// ```text
    /// message-header = field-name ":" [ field-value ] CRLF
    /// ```
    fn read_entity_header(&mut self) -> Result<EntityHeader, &'static str> {
        let original_name = self.read_token().ok_or("missing header field name")?;
        self.read_implied_lws();
        if self.peek() != Some(b':') {
            return Err("missing ':' after header field name");
        }
        self.offset += 1;
        self.read_implied_lws();

        Ok(EntityHeader {
            name: original_name.to_ascii_lowercase(),
            original_name,
            value: self.read_field_value(),
        })
    }

    /// Tokenize a field value up to the end of the line.
    pub(crate) fn read_field_value(&mut self) -> Vec<FieldValue> {
        let mut values = Vec::new();
        while let Some(c) = self.peek() {
            if self.read_lws() {
                self.read_implied_lws();
                values.push(FieldValue::new(FieldValueKind::Lws, " "));
                continue;
            }
            if let Some(quoted) = self.read_quoted_string() {
                values.push(FieldValue::new(FieldValueKind::Quoted, quoted));
                continue;
            }
            if is_tspecial(c) {
                values.push(FieldValue::new(FieldValueKind::TSpecials, (c as char).to_string()));
                self.offset += 1;
                continue;
            }
            match self.read_token() {
                Some(token) => values.push(FieldValue::new(FieldValueKind::Token, token)),
                None => break,
            }
        }
        values
    }

    /// token = 1*<any CHAR except CTLs or tspecials>
    fn read_token(&mut self) -> Option<String> {
        let begin = self.offset;
        while let Some(c) = self.peek() {
            if is_ctl(c) || is_tspecial(c) {
                break;
            }
            self.offset += 1;
        }
        if self.offset == begin {
            return None;
        }
        Some(self.buffer[begin..self.offset].iter().map(|&b| b as char).collect())
    }

    fn read_implied_lws(&mut self) {
        while self.read_lws() {}
    }

    /// LWS = [CRLF] 1*( SP | HT )
    fn read_lws(&mut self) -> bool {
        let folded = self.offset + 2 < self.buffer.len()
            && self.at_crlf()
            && matches!(self.buffer[self.offset + 2], SP | HT);
        if folded {
            self.offset += 2;
        }
        if !matches!(self.peek(), Some(SP | HT)) {
            return false;
        }
        while matches!(self.peek(), Some(SP | HT)) {
            self.offset += 1;
        }
        true
    }

    /// qdtext = <any TEXT except <">>, with quoted-pair = "\" CHAR
    fn read_qd_text(&mut self) -> String {
        let mut result = String::new();
        while let Some(c) = self.peek() {
            if self.read_lws() {
                self.read_implied_lws();
                result.push(' ');
                continue;
            }
            if is_ctl(c) || c == DQUOTE {
                break;
            }
            if c == BACKSLASH {
                self.offset += 1;
                if let Some(escaped) = self.peek() {
                    result.push(escaped as char);
                    self.offset += 1;
                }
                continue;
            }
            result.push(c as char);
            self.offset += 1;
        }
        result
    }

    /// quoted-string = ( <"> *(qdtext) <"> )
    ///
    /// An unterminated quoted-string yields the text read so far.
    fn read_quoted_string(&mut self) -> Option<String> {
        if self.peek() != Some(DQUOTE) {
            return None;
        }
        self.offset += 1;
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c != DQUOTE) {
            let before = self.offset;
            text.push_str(&self.read_qd_text());
            if self.offset == before {
                break;
            }
        }
        if self.peek() == Some(DQUOTE) {
            self.offset += 1;
        }
        Some(text)
    }
}

/// Find `needle` in `haystack` at or after `from`.
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| from + pos)
}

/// Media type of the entity's Content-Type header, if it parses.
pub fn content_type_of(entity: &Entity) -> Option<MediaType> {
    entity
        .header("content-type")
        .and_then(|h| parse_media_type(&h.value))
}
