//! PMT (Program Map Table) parsing.
//!
//! The PMT lists the elementary streams of one program. Data carousel
//! streams (stream_type 0x0D) are identified here and their ES_info
//! descriptors are interpreted for the component resolver.

use super::descriptors::{parse_descriptor_loop, EsDescriptor};
use super::psi::PsiSection;
use super::table_id;

/// Stream type constants.
pub mod stream_type {
    /// MPEG-2 Private Sections.
    pub const PRIVATE_SECTIONS: u8 = 0x05;
    /// MPEG-2 PES Private Data (captions, superimposed text).
    pub const PES_PRIVATE_DATA: u8 = 0x06;
    /// ISO/IEC 13818-6 type D (DSM-CC data carousel).
    pub const DATA_CAROUSEL: u8 = carousel_protocol::STREAM_TYPE_DATA_CAROUSEL;
}

/// A single elementary stream entry in the PMT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    /// Stream type.
    pub stream_type: u8,
    /// Elementary PID.
    pub elementary_pid: u16,
    /// ES info descriptors.
    pub descriptors: Vec<EsDescriptor>,
}

impl PmtStream {
    /// Check if this stream carries a DSM-CC data carousel.
    pub fn is_data_carousel(&self) -> bool {
        self.stream_type == stream_type::DATA_CAROUSEL
    }
}

/// Parsed PMT (Program Map Table).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmtTable {
    /// Program number (service ID).
    pub program_number: u16,
    /// Version number.
    pub version_number: u8,
    /// PCR PID.
    pub pcr_pid: u16,
    /// Elementary streams.
    pub streams: Vec<PmtStream>,
}

impl PmtTable {
    /// Parse a PMT from a PSI section.
    pub fn parse(section: &PsiSection) -> Result<Self, &'static str> {
        if section.header.table_id != table_id::PMT {
            return Err("Not a PMT section");
        }

        let data = section.data;
        if data.len() < 4 {
            return Err("PMT data too short");
        }

        let pcr_pid = ((data[0] as u16 & 0x1F) << 8) | data[1] as u16;
        let program_info_length = ((data[2] as usize & 0x0F) << 8) | data[3] as usize;

        if data.len() < 4 + program_info_length {
            return Err("Invalid program info length");
        }

        let mut pmt = PmtTable {
            program_number: section.header.table_id_extension,
            version_number: section.header.version_number,
            pcr_pid,
            streams: Vec::new(),
        };

        let mut offset = 4 + program_info_length;
        while offset + 5 <= data.len() {
            let stream_type = data[offset];
            let elementary_pid = ((data[offset + 1] as u16 & 0x1F) << 8) | data[offset + 2] as u16;
            let es_info_length = ((data[offset + 3] as usize & 0x0F) << 8) | data[offset + 4] as usize;

            offset += 5;

            if offset + es_info_length > data.len() {
                break;
            }

            let descriptors = parse_descriptor_loop(&data[offset..offset + es_info_length])
                .into_iter()
                .map(|(tag, body)| EsDescriptor::from_raw(tag, body))
                .collect();
            offset += es_info_length;

            pmt.streams.push(PmtStream {
                stream_type,
                elementary_pid,
                descriptors,
            });
        }

        Ok(pmt)
    }

    /// Get data carousel stream PIDs.
    pub fn get_data_carousel_pids(&self) -> Vec<u16> {
        self.streams
            .iter()
            .filter(|s| s.is_data_carousel())
            .map(|s| s.elementary_pid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts_analyzer::psi::build_section;

    #[test]
    fn test_parse_pmt() {
        let body = [
            // PCR PID = 0x01FF
            0xE1, 0xFF,
            // Program info length = 0
            0xF0, 0x00,
            // H.264 video, PID=0x0100, no descriptors
            0x1B, 0xE1, 0x00, 0xF0, 0x00,
            // Data carousel, PID=0x0140, ES info length=9
            0x0D, 0xE1, 0x40, 0xF0, 0x09,
            0x52, 0x01, 0x40, // stream identifier: component_tag 0x40
            0xFD, 0x04, 0x00, 0x0C, 0x3F, 0x00, // data component 0x000C
        ];
        let raw = build_section(table_id::PMT, 0x0408, 2, &body);
        let section = PsiSection::parse(&raw).unwrap();
        let pmt = PmtTable::parse(&section).unwrap();

        assert_eq!(pmt.program_number, 0x0408);
        assert_eq!(pmt.version_number, 2);
        assert_eq!(pmt.pcr_pid, 0x01FF);
        assert_eq!(pmt.streams.len(), 2);
        assert!(!pmt.streams[0].is_data_carousel());
        assert!(pmt.streams[1].is_data_carousel());
        assert_eq!(pmt.get_data_carousel_pids(), vec![0x0140]);

        assert_eq!(
            pmt.streams[1].descriptors[0],
            EsDescriptor::StreamIdentifier { component_tag: 0x40 }
        );
        let EsDescriptor::DataComponent(d) = &pmt.streams[1].descriptors[1] else {
            panic!("expected data component descriptor");
        };
        assert_eq!(d.data_component_id, 0x000C);
        assert_eq!(d.additional_data_component_info, vec![0x3F, 0x00]);
    }
}
