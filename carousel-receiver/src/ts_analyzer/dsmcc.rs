//! DSM-CC section parsing (ISO/IEC 13818-6, ARIB STD-B24 第三分冊).
//!
//! Three section kinds are carried on a data carousel PID:
//! - 0x3B: DownloadInfoIndication (module list of one download cycle)
//! - 0x3C: DownloadDataBlock (one block of one module)
//! - 0x3D: stream descriptors (event messages, NPT references)

use bytes::{Buf, Bytes};

use super::descriptors::parse_descriptor_loop;
use super::psi::PsiSection;
use super::{descriptor_tag, table_id};

const MESSAGE_ID_DII: u16 = 0x1002;
const MESSAGE_ID_DDB: u16 = 0x1003;

/// Compression type descriptor contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionInfo {
    /// compression_type; 0 is zlib.
    pub compression_type: i8,
    /// Size of the module after decompression.
    pub original_size: u32,
}

impl CompressionInfo {
    /// Check if the module is zlib compressed.
    pub fn is_zlib(&self) -> bool {
        self.compression_type == 0
    }
}

/// One module announced in a DII.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub module_id: u16,
    pub module_size: u32,
    pub module_version: u8,
    /// Type descriptor text (a media type).
    pub content_type: Option<String>,
    /// Estimated download time descriptor, in seconds.
    pub estimated_download_time: Option<u32>,
    /// Compression type descriptor.
    pub compression: Option<CompressionInfo>,
}

impl ModuleInfo {
    fn apply_descriptors(&mut self, data: &[u8]) {
        for (tag, body) in parse_descriptor_loop(data) {
            match tag {
                descriptor_tag::TYPE => {
                    self.content_type = Some(body.iter().map(|&b| b as char).collect());
                }
                descriptor_tag::ESTIMATED_DOWNLOAD_TIME if body.len() >= 4 => {
                    self.estimated_download_time = Some((&body[..4]).get_u32());
                }
                descriptor_tag::COMPRESSION_TYPE if body.len() >= 5 => {
                    let mut buf = body;
                    self.compression = Some(CompressionInfo {
                        compression_type: buf.get_i8(),
                        original_size: buf.get_u32(),
                    });
                }
                _ => {}
            }
        }
    }
}

/// DownloadInfoIndication message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInfoIndication {
    pub transaction_id: u32,
    pub download_id: u32,
    pub block_size: u16,
    pub window_size: u8,
    pub ack_period: u8,
    pub t_c_download_window: u32,
    pub t_c_download_scenario: u32,
    pub compatibility_descriptor: Vec<u8>,
    pub modules: Vec<ModuleInfo>,
    /// privateData descriptor loop.
    pub private_data: Vec<u8>,
}

impl DownloadInfoIndication {
    /// data_event_id (top 4 bits of downloadId).
    pub fn data_event_id(&self) -> u8 {
        ((self.download_id >> 28) & 0x0F) as u8
    }

    /// returnToEntryFlag from the arib_bxml_privatedata_descriptor, if present.
    pub fn return_to_entry_flag(&self) -> Option<bool> {
        parse_descriptor_loop(&self.private_data)
            .into_iter()
            .filter(|(tag, _)| *tag == descriptor_tag::ARIB_BXML_PRIVATE_DATA)
            .filter_map(|(_, body)| body.first())
            .last()
            .map(|b| b & 0x80 != 0)
    }

    fn parse(mut buf: &[u8]) -> Result<Self, &'static str> {
        let header = MessageHeader::parse(&mut buf)?;
        if header.message_id != MESSAGE_ID_DII {
            return Err("Unexpected DII messageId");
        }

        if buf.remaining() < 18 {
            return Err("DII body too short");
        }
        let download_id = buf.get_u32();
        let block_size = buf.get_u16();
        let window_size = buf.get_u8();
        let ack_period = buf.get_u8();
        let t_c_download_window = buf.get_u32();
        let t_c_download_scenario = buf.get_u32();
        let compatibility_length = buf.get_u16() as usize;
        if buf.remaining() < compatibility_length + 2 {
            return Err("DII compatibilityDescriptor truncated");
        }
        let compatibility_descriptor = buf[..compatibility_length].to_vec();
        buf.advance(compatibility_length);

        let number_of_modules = buf.get_u16();
        let mut modules = Vec::with_capacity(number_of_modules as usize);
        for _ in 0..number_of_modules {
            if buf.remaining() < 8 {
                return Err("DII module loop truncated");
            }
            let mut module = ModuleInfo {
                module_id: buf.get_u16(),
                module_size: buf.get_u32(),
                module_version: buf.get_u8(),
                content_type: None,
                estimated_download_time: None,
                compression: None,
            };
            let info_length = buf.get_u8() as usize;
            if buf.remaining() < info_length {
                return Err("DII moduleInfo truncated");
            }
            module.apply_descriptors(&buf[..info_length]);
            buf.advance(info_length);
            modules.push(module);
        }

        let private_data = if buf.remaining() >= 2 {
            let length = (buf.get_u16() as usize).min(buf.remaining());
            buf[..length].to_vec()
        } else {
            Vec::new()
        };

        Ok(DownloadInfoIndication {
            transaction_id: header.transaction_id,
            download_id,
            block_size,
            window_size,
            ack_period,
            t_c_download_window,
            t_c_download_scenario,
            compatibility_descriptor,
            modules,
            private_data,
        })
    }
}

/// DownloadDataBlock message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDataBlock {
    pub download_id: u32,
    pub module_id: u16,
    pub module_version: u8,
    pub block_number: u16,
    pub block_data: Bytes,
}

impl DownloadDataBlock {
    /// data_event_id (top 4 bits of downloadId).
    pub fn data_event_id(&self) -> u8 {
        ((self.download_id >> 28) & 0x0F) as u8
    }

    fn parse(mut buf: &[u8]) -> Result<Self, &'static str> {
        let header = MessageHeader::parse(&mut buf)?;
        if header.message_id != MESSAGE_ID_DDB {
            return Err("Unexpected DDB messageId");
        }

        if buf.remaining() < 6 {
            return Err("DDB body too short");
        }
        let module_id = buf.get_u16();
        let module_version = buf.get_u8();
        buf.advance(1); // reserved
        let block_number = buf.get_u16();

        let block_length = (header.message_length as usize)
            .saturating_sub(header.adaptation_length as usize + 6)
            .min(buf.remaining());

        Ok(DownloadDataBlock {
            download_id: header.transaction_id,
            module_id,
            module_version,
            block_number,
            block_data: Bytes::copy_from_slice(&buf[..block_length]),
        })
    }
}

/// Stream descriptor section (table_id 0x3D).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptors {
    /// data_event_id (top 4 bits of table_id_extension).
    pub data_event_id: u8,
    /// event_msg_group_id (low 12 bits of table_id_extension).
    pub event_msg_group_id: u16,
    /// Raw descriptor loop.
    pub descriptors: Vec<u8>,
}

/// A parsed DSM-CC section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DsmccSection {
    DownloadInfoIndication(DownloadInfoIndication),
    DownloadDataBlock(DownloadDataBlock),
    StreamDescriptors(StreamDescriptors),
}

impl DsmccSection {
    /// Parse a DSM-CC section from a PSI section.
    pub fn parse(section: &PsiSection) -> Result<Self, &'static str> {
        match section.header.table_id {
            table_id::DII => {
                DownloadInfoIndication::parse(section.data).map(DsmccSection::DownloadInfoIndication)
            }
            table_id::DDB => {
                DownloadDataBlock::parse(section.data).map(DsmccSection::DownloadDataBlock)
            }
            table_id::STREAM_DESCRIPTORS => {
                let ext = section.header.table_id_extension;
                Ok(DsmccSection::StreamDescriptors(StreamDescriptors {
                    data_event_id: (ext >> 12) as u8,
                    event_msg_group_id: ext & 0x0FFF,
                    descriptors: section.data.to_vec(),
                }))
            }
            _ => Err("Not a DSM-CC section"),
        }
    }
}

/// dsmccMessageHeader / dsmccDownloadDataHeader.
///
/// Both share one layout; the 32-bit field is transaction_id in the former
/// and downloadId in the latter.
struct MessageHeader {
    message_id: u16,
    transaction_id: u32,
    adaptation_length: u8,
    message_length: u16,
}

impl MessageHeader {
    fn parse(buf: &mut &[u8]) -> Result<Self, &'static str> {
        if buf.remaining() < 12 {
            return Err("DSM-CC message header too short");
        }
        buf.advance(2); // protocolDiscriminator, dsmccType
        let message_id = buf.get_u16();
        let transaction_id = buf.get_u32();
        buf.advance(1); // reserved
        let adaptation_length = buf.get_u8();
        let message_length = buf.get_u16();
        if buf.remaining() < adaptation_length as usize {
            return Err("DSM-CC adaptation header truncated");
        }
        buf.advance(adaptation_length as usize);

        Ok(MessageHeader {
            message_id,
            transaction_id,
            adaptation_length,
            message_length,
        })
    }
}

#[cfg(test)]
fn message_header(message_id: u16, id: u32, body_length: usize) -> Vec<u8> {
    let mut out = vec![0x11, 0x03];
    out.extend_from_slice(&message_id.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.push(0xFF);
    out.push(0);
    out.extend_from_slice(&(body_length as u16).to_be_bytes());
    out
}

#[cfg(test)]
impl DownloadInfoIndication {
    /// Build a DII with the given modules (test fixture helper).
    pub(crate) fn for_test(transaction_id: u32, data_event_id: u8, block_size: u16, modules: Vec<ModuleInfo>) -> Self {
        DownloadInfoIndication {
            transaction_id,
            download_id: ((data_event_id as u32) << 28) | 0x0FFF_FFFF,
            block_size,
            window_size: 0,
            ack_period: 0,
            t_c_download_window: 0,
            t_c_download_scenario: 0,
            compatibility_descriptor: Vec::new(),
            modules,
            private_data: Vec::new(),
        }
    }

    /// Serialize to a section body (test fixture helper).
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.download_id.to_be_bytes());
        body.extend_from_slice(&self.block_size.to_be_bytes());
        body.push(self.window_size);
        body.push(self.ack_period);
        body.extend_from_slice(&self.t_c_download_window.to_be_bytes());
        body.extend_from_slice(&self.t_c_download_scenario.to_be_bytes());
        body.extend_from_slice(&(self.compatibility_descriptor.len() as u16).to_be_bytes());
        body.extend_from_slice(&self.compatibility_descriptor);
        body.extend_from_slice(&(self.modules.len() as u16).to_be_bytes());
        for module in &self.modules {
            let mut info = Vec::new();
            if let Some(content_type) = &module.content_type {
                info.push(descriptor_tag::TYPE);
                info.push(content_type.len() as u8);
                info.extend_from_slice(content_type.as_bytes());
            }
            if let Some(time) = module.estimated_download_time {
                info.extend_from_slice(&[descriptor_tag::ESTIMATED_DOWNLOAD_TIME, 4]);
                info.extend_from_slice(&time.to_be_bytes());
            }
            if let Some(compression) = module.compression {
                info.extend_from_slice(&[descriptor_tag::COMPRESSION_TYPE, 5, compression.compression_type as u8]);
                info.extend_from_slice(&compression.original_size.to_be_bytes());
            }
            body.extend_from_slice(&module.module_id.to_be_bytes());
            body.extend_from_slice(&module.module_size.to_be_bytes());
            body.push(module.module_version);
            body.push(info.len() as u8);
            body.extend_from_slice(&info);
        }
        body.extend_from_slice(&(self.private_data.len() as u16).to_be_bytes());
        body.extend_from_slice(&self.private_data);

        let mut out = message_header(MESSAGE_ID_DII, self.transaction_id, body.len());
        out.extend_from_slice(&body);
        out
    }
}

#[cfg(test)]
impl ModuleInfo {
    /// Module without descriptors (test fixture helper).
    pub(crate) fn for_test(module_id: u16, module_version: u8, module_size: u32) -> Self {
        ModuleInfo {
            module_id,
            module_size,
            module_version,
            content_type: None,
            estimated_download_time: None,
            compression: None,
        }
    }
}

#[cfg(test)]
impl DownloadDataBlock {
    /// Build a DDB (test fixture helper).
    pub(crate) fn for_test(data_event_id: u8, module_id: u16, module_version: u8, block_number: u16, data: &[u8]) -> Self {
        DownloadDataBlock {
            download_id: ((data_event_id as u32) << 28) | 0x0FFF_FFFF,
            module_id,
            module_version,
            block_number,
            block_data: Bytes::copy_from_slice(data),
        }
    }

    /// Serialize to a section body (test fixture helper).
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = message_header(MESSAGE_ID_DDB, self.download_id, 6 + self.block_data.len());
        out.extend_from_slice(&self.module_id.to_be_bytes());
        out.push(self.module_version);
        out.push(0xFF);
        out.extend_from_slice(&self.block_number.to_be_bytes());
        out.extend_from_slice(&self.block_data);
        out
    }
}
