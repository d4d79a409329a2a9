//! Section demultiplexer.
//!
//! Turns a raw TS byte stream into decoded PAT, PMT and DSM-CC section
//! events. PMT PIDs are learned from the PAT; data carousel PIDs are
//! learned from each PMT's stream_type 0x0D entries.

use std::collections::{HashMap, HashSet};

use log::trace;

use super::dsmcc::DsmccSection;
use super::packet::{TsPacket, TsPacketIterator};
use super::pat::PatTable;
use super::pmt::PmtTable;
use super::psi::{PsiSection, SectionCollector};
use super::{pid, table_id};
use crate::error::CarouselError;

/// A decoded section, tagged with the PID it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionEvent {
    Pat { pid: u16, table: PatTable },
    Pmt { pid: u16, table: PmtTable },
    Dsmcc { pid: u16, section: DsmccSection },
}

/// Section demultiplexer.
#[derive(Debug, Default)]
pub struct SectionDemuxer {
    /// Section collectors by PID.
    collectors: HashMap<u16, SectionCollector>,
    /// PMT PIDs to watch (from PAT).
    pmt_pids: HashSet<u16>,
    /// Carousel PIDs announced by each PMT PID.
    carousel_pids: HashMap<u16, Vec<u16>>,
    /// Incomplete trailing packet from the previous feed.
    pending: Vec<u8>,
    /// Total packets processed.
    packets_processed: u64,
}

impl SectionDemuxer {
    /// Create a new demultiplexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total packets processed.
    pub fn packets_processed(&self) -> u64 {
        self.packets_processed
    }

    /// Feed TS data. Packets may be split across calls.
    pub fn feed(&mut self, data: &[u8]) -> Vec<SectionEvent> {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(data);

        let mut events = Vec::new();
        let mut packets = TsPacketIterator::new(&buffer);
        for packet in packets.by_ref() {
            self.packets_processed += 1;
            self.process_packet(&packet, &mut events);
        }
        let consumed = packets.consumed();

        buffer.drain(..consumed);
        self.pending = buffer;
        events
    }

    fn is_watched(&self, pid_val: u16) -> bool {
        pid_val == pid::PAT
            || self.pmt_pids.contains(&pid_val)
            || self.carousel_pids.values().any(|pids| pids.contains(&pid_val))
    }

    /// Process a single TS packet.
    fn process_packet(&mut self, packet: &TsPacket, events: &mut Vec<SectionEvent>) {
        let pid_val = packet.header.pid;

        // Skip null packets and packets with errors
        if pid_val == pid::NULL || packet.header.transport_error {
            return;
        }

        if packet.header.is_scrambled() || !packet.header.has_payload() || !self.is_watched(pid_val) {
            return;
        }

        let collector = self.collectors.entry(pid_val).or_default();
        if packet.discontinuity {
            collector.clear();
        }
        let sections = collector.push(
            packet.payload,
            packet.header.continuity_counter,
            packet.header.payload_unit_start,
        );

        for raw in sections {
            self.process_section(pid_val, &raw, events);
        }
    }

    /// Process a complete section.
    fn process_section(&mut self, pid_val: u16, data: &[u8], events: &mut Vec<SectionEvent>) {
        let section = match PsiSection::parse(data) {
            Ok(s) => s,
            Err(reason) => {
                trace!("{}", CarouselError::MalformedSection { pid: pid_val, reason });
                return;
            }
        };

        if section.header.section_syntax_indicator && !section.verify_crc(data) {
            trace!("PID {:#06x}: CRC mismatch (table_id {:#04x})", pid_val, section.header.table_id);
            return;
        }

        if pid_val == pid::PAT {
            self.process_pat(pid_val, &section, events);
        } else if self.pmt_pids.contains(&pid_val) && section.header.table_id == table_id::PMT {
            self.process_pmt(pid_val, &section, events);
        } else {
            match DsmccSection::parse(&section) {
                Ok(dsmcc) => events.push(SectionEvent::Dsmcc {
                    pid: pid_val,
                    section: dsmcc,
                }),
                Err(reason) => trace!("{}", CarouselError::MalformedSection { pid: pid_val, reason }),
            }
        }
    }

    /// Process PAT section.
    fn process_pat(&mut self, pid_val: u16, section: &PsiSection, events: &mut Vec<SectionEvent>) {
        let Ok(pat) = PatTable::parse(section) else {
            return;
        };

        let pmt_pids: HashSet<u16> = pat.programs.iter().map(|p| p.pid).collect();
        if pmt_pids != self.pmt_pids {
            self.carousel_pids.retain(|pmt_pid, _| pmt_pids.contains(pmt_pid));
            self.pmt_pids = pmt_pids;
        }

        events.push(SectionEvent::Pat { pid: pid_val, table: pat });
    }

    /// Process PMT section.
    fn process_pmt(&mut self, pid_val: u16, section: &PsiSection, events: &mut Vec<SectionEvent>) {
        let Ok(pmt) = PmtTable::parse(section) else {
            return;
        };

        self.carousel_pids.insert(pid_val, pmt.get_data_carousel_pids());
        events.push(SectionEvent::Pmt { pid: pid_val, table: pmt });
    }
}
