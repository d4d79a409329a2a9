//! Media type parsing over tokenized header values.
//!
//! ```text
//! media-type = type "/" subtype *( ";" parameter )
//! parameter  = attribute "=" value
//! value      = token | quoted-string
//! ```
//!
//! Type, subtype and attribute are compared case-insensitively; the
//! transmitted spelling is kept alongside. Linear white space is accepted
//! around `;` but not inside `type/subtype` or `attribute=value`.

use bytes::Bytes;
use carousel_protocol::{MediaType, MediaTypeParameter};

use super::parser::{EntityParser, FieldValue, FieldValueKind};

struct Tokens<'a> {
    tokens: &'a [FieldValue],
    offset: usize,
}

impl<'a> Tokens<'a> {
    fn peek(&self) -> Option<&'a FieldValue> {
        self.tokens.get(self.offset)
    }

    fn next_if(&mut self, pred: impl Fn(&FieldValue) -> bool) -> Option<&'a FieldValue> {
        let token = self.peek().filter(|t| pred(t))?;
        self.offset += 1;
        Some(token)
    }

    fn token(&mut self) -> Option<&'a str> {
        self.next_if(|t| t.kind == FieldValueKind::Token)
            .map(|t| t.value.as_str())
    }

    fn tspecial(&mut self, c: &str) -> Option<()> {
        self.next_if(|t| t.is(FieldValueKind::TSpecials, c)).map(|_| ())
    }

    fn skip_lws(&mut self) {
        while self.next_if(|t| t.kind == FieldValueKind::Lws).is_some() {}
    }
}

/// Parse a media type from a tokenized `Content-Type` value.
///
/// Returns `None` on any unexpected token; trailing tokens after the last
/// parameter are ignored.
pub fn parse_media_type(tokens: &[FieldValue]) -> Option<MediaType> {
    let mut tokens = Tokens { tokens, offset: 0 };

    let type_ = tokens.token()?;
    tokens.tspecial("/")?;
    let subtype = tokens.token()?;

    let mut parameters = Vec::new();
    loop {
        tokens.skip_lws();
        if tokens.tspecial(";").is_none() {
            break;
        }
        tokens.skip_lws();
        let attribute = tokens.token()?;
        tokens.tspecial("=")?;
        let value = tokens.next_if(|t| matches!(t.kind, FieldValueKind::Token | FieldValueKind::Quoted))?;
        parameters.push(MediaTypeParameter {
            attribute: attribute.to_ascii_lowercase(),
            original_attribute: attribute.to_string(),
            value: value.value.clone(),
        });
    }

    Some(MediaType {
        type_: type_.to_ascii_lowercase(),
        original_type: type_.to_string(),
        subtype: subtype.to_ascii_lowercase(),
        original_subtype: subtype.to_string(),
        parameters,
    })
}

/// Parse a media type from text, e.g. a module's Type descriptor.
pub fn parse_media_type_str(text: &str) -> Option<MediaType> {
    let mut parser = EntityParser::new(Bytes::copy_from_slice(text.trim().as_bytes()));
    parse_media_type(&parser.read_field_value())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_with_quoted_boundary() {
        let media_type = parse_media_type_str("multipart/mixed; boundary=\"X\"").unwrap();
        assert_eq!(media_type.type_, "multipart");
        assert_eq!(media_type.subtype, "mixed");
        assert_eq!(
            media_type.parameters,
            vec![MediaTypeParameter {
                attribute: "boundary".to_string(),
                original_attribute: "boundary".to_string(),
                value: "X".to_string(),
            }]
        );
        assert!(media_type.is_multipart_mixed());
    }

    #[test]
    fn test_case_is_normalized() {
        let media_type = parse_media_type_str("Text/X-Arib-BML;Charset=euc-jp").unwrap();
        assert_eq!(media_type.type_, "text");
        assert_eq!(media_type.original_type, "Text");
        assert_eq!(media_type.subtype, "x-arib-bml");
        assert_eq!(media_type.original_subtype, "X-Arib-BML");
        assert_eq!(media_type.parameter("charset"), Some("euc-jp"));
        assert_eq!(media_type.parameters[0].original_attribute, "Charset");
    }

    #[test]
    fn test_multiple_parameters() {
        let media_type = parse_media_type_str("image/png ; a=1 ;b=\"two words\"").unwrap();
        assert_eq!(media_type.parameters.len(), 2);
        assert_eq!(media_type.parameter("b"), Some("two words"));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_media_type_str("").is_none());
        assert!(parse_media_type_str("text").is_none());
        assert!(parse_media_type_str("text/").is_none());
        assert!(parse_media_type_str("text /plain").is_none());
        assert!(parse_media_type_str("text/plain; charset").is_none());
        assert!(parse_media_type_str("text/plain; charset = x").is_none());
        assert!(parse_media_type_str("text/plain; =x").is_none());
    }

    #[test]
    fn test_display_round_trip() {
        let media_type = parse_media_type_str("multipart/mixed; boundary=\"X\"").unwrap();
        let again = parse_media_type_str(&media_type.to_string()).unwrap();
        assert_eq!(again, media_type);
    }
}
