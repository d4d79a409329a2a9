//! Entity and multipart parsing for data carousel modules.

mod media_type;
mod parser;

pub use media_type::{parse_media_type, parse_media_type_str};
pub use parser::{
    content_type_of, is_ctl, is_tspecial, Entity, EntityHeader, EntityParser, FieldValue,
    FieldValueKind,
};
