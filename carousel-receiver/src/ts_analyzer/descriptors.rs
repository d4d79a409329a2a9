//! Descriptor parsing for PMT elementary stream loops.

use super::descriptor_tag;

/// Data component descriptor (0xFD).
///
/// `descriptor_length` is kept as reported by the demultiplexer so that
/// payloads produced by demultiplexers which read `data_component_id` as a
/// single byte can be recognised and repaired (see [`Self::normalized`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataComponentDescriptor {
    /// Descriptor length as stated in the descriptor header.
    pub descriptor_length: usize,
    /// Data component id (STD-B10 第2部 付録J).
    pub data_component_id: u16,
    /// `additional_data_component_info` bytes.
    pub additional_data_component_info: Vec<u8>,
}

impl DataComponentDescriptor {
    /// Parse a data component descriptor body.
    pub fn parse(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < 2 {
            return Err("Data component descriptor too short");
        }

        Ok(DataComponentDescriptor {
            descriptor_length: data.len(),
            data_component_id: ((data[0] as u16) << 8) | data[1] as u16,
            additional_data_component_info: data[2..].to_vec(),
        })
    }

    /// Repair a descriptor whose `data_component_id` was read as 8 bits.
    ///
    /// Such a payload is exactly one byte shorter than the stated length
    /// implies: the first info byte is really the low byte of the id.
    pub fn normalized(&self) -> (u16, &[u8]) {
        let info = self.additional_data_component_info.as_slice();
        match info.split_first() {
            Some((&low, rest)) if info.len() + 1 == self.descriptor_length => {
                ((self.data_component_id << 8) | low as u16, rest)
            }
            _ => (self.data_component_id, info),
        }
    }
}

/// A descriptor from a PMT ES_info loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsDescriptor {
    /// Stream identifier descriptor (0x52).
    StreamIdentifier { component_tag: u8 },
    /// Data component descriptor (0xFD).
    DataComponent(DataComponentDescriptor),
    /// Any other descriptor, kept raw.
    Other { tag: u8, data: Vec<u8> },
}

impl EsDescriptor {
    /// Interpret one `(tag, body)` pair. Malformed known descriptors are kept raw.
    pub fn from_raw(tag: u8, data: &[u8]) -> Self {
        match tag {
            descriptor_tag::STREAM_IDENTIFIER if !data.is_empty() => {
                EsDescriptor::StreamIdentifier {
                    component_tag: data[0],
                }
            }
            descriptor_tag::DATA_COMPONENT => match DataComponentDescriptor::parse(data) {
                Ok(d) => EsDescriptor::DataComponent(d),
                Err(_) => EsDescriptor::Other {
                    tag,
                    data: data.to_vec(),
                },
            },
            _ => EsDescriptor::Other {
                tag,
                data: data.to_vec(),
            },
        }
    }
}

/// Parse descriptors from a descriptor loop.
pub fn parse_descriptor_loop(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut descriptors = Vec::new();
    let mut offset = 0;

    while offset + 2 <= data.len() {
        let tag = data[offset];
        let length = data[offset + 1] as usize;
        offset += 2;

        if offset + length > data.len() {
            break;
        }

        descriptors.push((tag, &data[offset..offset + length]));
        offset += length;
    }

    descriptors
}
