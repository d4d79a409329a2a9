//! MPEG-TS (Transport Stream) demultiplexing for data carousels.
//!
//! This module provides parsing functionality for MPEG-TS packets, the
//! PSI tables needed to locate data carousel streams and the DSM-CC
//! sections carried on them.
//!
//! # Supported Tables
//! - PAT (Program Association Table) - PID 0x0000
//! - PMT (Program Map Table) - Variable PIDs from PAT
//! - DSM-CC DII / DDB / stream descriptors - PIDs with stream_type 0x0D
//!
//! # Usage
//! ```ignore
//! use carousel_receiver::ts_analyzer::{SectionDemuxer, SectionEvent};
//!
//! let mut demuxer = SectionDemuxer::new();
//! for event in demuxer.feed(&ts_data) {
//!     if let SectionEvent::Dsmcc { pid, section } = event {
//!         println!("PID {:#06x}: {:?}", pid, section);
//!     }
//! }
//! ```

mod demux;
mod descriptors;
mod dsmcc;
mod packet;
mod pat;
mod pmt;
mod psi;

pub use demux::{SectionDemuxer, SectionEvent};
pub use descriptors::{parse_descriptor_loop, DataComponentDescriptor, EsDescriptor};
pub use dsmcc::{
    CompressionInfo, DownloadDataBlock, DownloadInfoIndication, DsmccSection, ModuleInfo,
    StreamDescriptors,
};
pub use packet::{TsHeader, TsPacket, TsPacketIterator, SYNC_BYTE, TS_PACKET_SIZE};
pub use pat::{PatEntry, PatTable};
pub use pmt::{stream_type, PmtStream, PmtTable};
pub use psi::{crc32_mpeg2, PsiHeader, PsiSection, SectionCollector};

#[cfg(test)]
pub(crate) use demux::tests as test_support;
#[cfg(test)]
pub(crate) use psi::build_section;

/// Well-known PIDs in MPEG-TS.
pub mod pid {
    /// Program Association Table PID.
    pub const PAT: u16 = 0x0000;
    /// Null packet PID (stuffing).
    pub const NULL: u16 = 0x1FFF;
}

/// Table IDs for PSI and DSM-CC sections.
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Program Map Section.
    pub const PMT: u8 = 0x02;
    /// DSM-CC section carrying a DownloadInfoIndication.
    pub const DII: u8 = 0x3B;
    /// DSM-CC section carrying a DownloadDataBlock.
    pub const DDB: u8 = 0x3C;
    /// DSM-CC section carrying stream descriptors.
    pub const STREAM_DESCRIPTORS: u8 = 0x3D;
}

/// Descriptor tags used in PMT ES_info loops and DSM-CC messages.
pub mod descriptor_tag {
    /// Stream identifier descriptor (0x52).
    pub const STREAM_IDENTIFIER: u8 = 0x52;
    /// Data component descriptor (0xFD).
    pub const DATA_COMPONENT: u8 = 0xFD;
    /// Type descriptor in moduleInfo (0x01).
    pub const TYPE: u8 = 0x01;
    /// Estimated download time descriptor in moduleInfo (0x07).
    pub const ESTIMATED_DOWNLOAD_TIME: u8 = 0x07;
    /// Compression type descriptor in moduleInfo (0xC2).
    pub const COMPRESSION_TYPE: u8 = 0xC2;
    /// arib_bxml_privatedata_descriptor in DII privateData (0xF0).
    pub const ARIB_BXML_PRIVATE_DATA: u8 = 0xF0;
    /// NPT reference descriptor in stream descriptors (0x17).
    pub const NPT_REFERENCE: u8 = 0x17;
    /// General event descriptor in stream descriptors (0x40).
    pub const GENERAL_EVENT: u8 = 0x40;
}
