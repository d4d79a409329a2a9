//! Decoder for `additional_data_component_info` of ARIB-XML based
//! multimedia coding (STD-B24 第二分冊 第二編 9.3, 第三分冊 第三編 C.1).

use carousel_protocol::{AdditionalAribBxmlInfo, AdditionalAribCarouselInfo, EntryPointInfo};

use crate::error::{CarouselError, Result};

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn peek(&self, field: &'static str) -> Result<u8> {
        self.data
            .get(self.offset)
            .copied()
            .ok_or(CarouselError::MalformedDescriptor(field))
    }

    fn read(&mut self, field: &'static str) -> Result<u8> {
        let b = self.peek(field)?;
        self.offset += 1;
        Ok(b)
    }

    /// Version fields are composed as `(b0 << 16) | b1`.
    fn read_version(&mut self, field: &'static str) -> Result<u32> {
        let hi = self.read(field)? as u32;
        let lo = self.read(field)? as u32;
        Ok((hi << 16) | lo)
    }

    fn skip_reserved(&mut self) {
        self.offset = (self.offset + 1).min(self.data.len());
    }
}

/// Decode `additional_arib_bxml_info`.
///
/// Every field read is bounds-checked; a truncated buffer yields
/// [`CarouselError::MalformedDescriptor`] naming the missing field.
/// Trailing reserved bytes may be absent.
pub fn decode_additional_arib_bxml_info(info: &[u8]) -> Result<AdditionalAribBxmlInfo> {
    let mut r = Reader { data: info, offset: 0 };

    let b = r.peek("transmission_format")?;
    let transmission_format = (b >> 6) & 0b11;
    let entry_point_flag = b & 0b0010_0000 != 0;

    let entry_point_info = if entry_point_flag {
        let auto_start_flag = b & 0b0001_0000 != 0;
        let document_resolution = b & 0b0000_1111;
        r.offset += 1;

        let flags = r.read("use_xml")?;
        let use_xml = flags & 0b1000_0000 != 0;
        let default_version_flag = flags & 0b0100_0000 != 0;

        let mut entry = EntryPointInfo {
            auto_start_flag,
            document_resolution,
            use_xml,
            default_version_flag,
            independent_flag: flags & 0b0010_0000 != 0,
            style_for_tv_flag: flags & 0b0001_0000 != 0,
            bml_major_version: 1,
            bml_minor_version: 0,
            bxml_major_version: None,
            bxml_minor_version: None,
        };
        if !default_version_flag {
            entry.bml_major_version = r.read_version("bml_major_version")?;
            entry.bml_minor_version = r.read_version("bml_minor_version")?;
            if use_xml {
                entry.bxml_major_version = Some(r.read_version("bxml_major_version")?);
                entry.bxml_minor_version = Some(r.read_version("bxml_minor_version")?);
            }
        }
        Some(entry)
    } else {
        r.skip_reserved();
        None
    };

    let additional_arib_carousel_info = match transmission_format {
        0 => {
            let b = r.read("data_event_id")?;
            let flags = r.read("ondemand_retrieval_flag")?;
            Some(AdditionalAribCarouselInfo {
                data_event_id: (b >> 4) & 0x0F,
                event_section_flag: b & 0b0000_1000 != 0,
                ondemand_retrieval_flag: flags & 0b1000_0000 != 0,
                file_storable_flag: flags & 0b0100_0000 != 0,
                start_priority: (flags >> 5) & 0b1,
            })
        }
        1 => {
            r.skip_reserved();
            None
        }
        _ => None,
    };

    Ok(AdditionalAribBxmlInfo {
        transmission_format,
        entry_point_flag,
        entry_point_info,
        additional_arib_carousel_info,
    })
}
