//! Component resolver: maps data carousel PIDs to component ids.
//!
//! A component is a data carousel elementary stream identified by the
//! component_tag of its stream identifier descriptor. The mapping is rebuilt
//! from every accepted PMT and announced only when the component id set
//! changes.

use std::collections::{BTreeMap, HashMap};

use carousel_protocol::{ComponentPmt, DataComponentProfile, PmtMessage};
use log::{debug, info, warn};

use super::descriptor::decode_additional_arib_bxml_info;
use crate::ts_analyzer::{EsDescriptor, PatEntry, PatTable, PmtTable};

/// data_component_id values handled by default (STD-B10 第2部 付録J 表J-1).
pub const DEFAULT_SUPPORTED_DATA_COMPONENT_IDS: [u16; 4] = [0x0C, 0x0D, 0x07, 0x0B];

/// Extract the data carousel components of a PMT.
///
/// A stream is kept when it has stream_type 0x0D, a stream identifier
/// descriptor, and a data component descriptor whose id is supported and
/// whose additional info decodes.
pub fn resolve_components(pmt: &PmtTable, supported_data_component_ids: &[u16]) -> Vec<ComponentPmt> {
    let mut components = Vec::new();

    for stream in pmt.streams.iter().filter(|s| s.is_data_carousel()) {
        let mut component_id = None;
        let mut resolved = None;

        for descriptor in &stream.descriptors {
            match descriptor {
                EsDescriptor::StreamIdentifier { component_tag } => component_id = Some(*component_tag),
                EsDescriptor::DataComponent(d) => {
                    let (data_component_id, info) = d.normalized();
                    if !supported_data_component_ids.contains(&data_component_id) {
                        debug!(
                            "PID {:#06x}: unsupported data_component_id {:#06x}",
                            stream.elementary_pid, data_component_id
                        );
                        continue;
                    }
                    match decode_additional_arib_bxml_info(info) {
                        Ok(bxml_info) => resolved = Some((data_component_id, bxml_info)),
                        Err(e) => warn!("PID {:#06x}: {}", stream.elementary_pid, e),
                    }
                }
                EsDescriptor::Other { .. } => {}
            }
        }

        if let (Some(component_id), Some((data_component_id, bxml_info))) = (component_id, resolved) {
            components.push(ComponentPmt {
                pid: stream.elementary_pid,
                component_id,
                data_component_id,
                bxml_info,
            });
        }
    }

    components
}

/// Tracks the program and component mapping of the received service.
#[derive(Debug)]
pub struct ComponentResolver {
    supported_data_component_ids: Vec<u16>,
    /// Service id to follow when the TS carries several programs.
    service_id: Option<u16>,
    /// Programs of the last PAT.
    programs: Vec<PatEntry>,
    pid_to_component: HashMap<u16, ComponentPmt>,
    component_to_pid: BTreeMap<u8, ComponentPmt>,
    /// Whether the current mapping has been announced.
    announced: bool,
}

impl Default for ComponentResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPORTED_DATA_COMPONENT_IDS.to_vec(), None)
    }
}

impl ComponentResolver {
    pub fn new(supported_data_component_ids: Vec<u16>, service_id: Option<u16>) -> Self {
        Self {
            supported_data_component_ids,
            service_id,
            programs: Vec::new(),
            pid_to_component: HashMap::new(),
            component_to_pid: BTreeMap::new(),
            announced: false,
        }
    }

    /// Record the programs of a PAT. A changed PMT PID set forces the next
    /// accepted PMT to be announced.
    pub fn on_pat(&mut self, pat: &PatTable) {
        let changed = pat.programs.len() != self.programs.len()
            || pat
                .programs
                .iter()
                .any(|p| !self.programs.iter().any(|q| q.pid == p.pid));

        if changed {
            info!(
                "PAT changed: {}",
                pat.programs
                    .iter()
                    .map(|p| format!("{:#06x}->{:#06x}", p.program_number, p.pid))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            if self.service_id.is_some() && pat.programs.len() > 1 {
                warn!("Multiple programs in TS, following service {:?}", self.service_id);
            }
            self.announced = false;
        }
        self.programs = pat.programs.clone();
    }

    /// Program number whose PMT is followed.
    pub fn selected_program(&self) -> Option<u16> {
        self.service_id
            .or_else(|| self.programs.first().map(|p| p.program_number))
    }

    fn accepts_pmt_pid(&self, pid: u16) -> bool {
        match self.programs.len() {
            0 => false,
            1 => true,
            _ => {
                let program = self.programs.iter().find(|p| p.pid == pid).map(|p| p.program_number);
                program.is_some() && program == self.selected_program()
            }
        }
    }

    /// Rebuild the mapping from a PMT received on `pid`.
    ///
    /// Returns the `pmt` message when the set of component ids differs from
    /// the previous one (or after a PAT change).
    pub fn on_pmt(&mut self, pid: u16, pmt: &PmtTable) -> Option<PmtMessage> {
        if !self.accepts_pmt_pid(pid) {
            return None;
        }

        let components = resolve_components(pmt, &self.supported_data_component_ids);
        let pid_to_component: HashMap<u16, ComponentPmt> =
            components.iter().map(|c| (c.pid, c.clone())).collect();
        let component_to_pid: BTreeMap<u8, ComponentPmt> =
            components.into_iter().map(|c| (c.component_id, c)).collect();

        let changed = component_to_pid.len() != self.component_to_pid.len()
            || component_to_pid.keys().any(|id| !self.component_to_pid.contains_key(id));

        self.pid_to_component = pid_to_component;
        self.component_to_pid = component_to_pid;

        if self.announced && !changed {
            return None;
        }
        self.announced = true;

        info!(
            "PMT changed: components [{}]",
            self.component_to_pid
                .values()
                .map(|c| {
                    let profile = DataComponentProfile::from_data_component_id(c.data_component_id)
                        .map(|p| p.name_en())
                        .unwrap_or("unknown");
                    format!("{:#04x}@{:#06x} ({})", c.component_id, c.pid, profile)
                })
                .collect::<Vec<_>>()
                .join(", ")
        );
        Some(PmtMessage {
            components: self.component_to_pid.values().cloned().collect(),
        })
    }

    /// Component carried on a PID.
    pub fn component_for_pid(&self, pid: u16) -> Option<&ComponentPmt> {
        self.pid_to_component.get(&pid)
    }

    /// Component by id.
    pub fn component(&self, component_id: u8) -> Option<&ComponentPmt> {
        self.component_to_pid.get(&component_id)
    }

    /// Profile of a component, from its data_component_id.
    pub fn profile(&self, component_id: u8) -> Option<DataComponentProfile> {
        self.component(component_id)
            .and_then(|c| DataComponentProfile::from_data_component_id(c.data_component_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts_analyzer::{DataComponentDescriptor, PmtStream};

    const BXML_INFO: [u8; 4] = [0x33, 0x70, 0xF8, 0x80];

    fn carousel_stream(pid: u16, component_tag: u8, data_component_id: u16) -> PmtStream {
        let mut info = data_component_id.to_be_bytes().to_vec();
        info.extend_from_slice(&BXML_INFO);
        PmtStream {
            stream_type: 0x0D,
            elementary_pid: pid,
            descriptors: vec![
                EsDescriptor::StreamIdentifier { component_tag },
                EsDescriptor::DataComponent(DataComponentDescriptor::parse(&info).unwrap()),
            ],
        }
    }

    fn pmt(streams: Vec<PmtStream>) -> PmtTable {
        PmtTable {
            program_number: 0x0408,
            version_number: 0,
            pcr_pid: 0x01FF,
            streams,
        }
    }

    fn pat(programs: &[(u16, u16)]) -> PatTable {
        PatTable {
            transport_stream_id: 1,
            version_number: 0,
            programs: programs
                .iter()
                .map(|&(program_number, pid)| PatEntry { program_number, pid })
                .collect(),
            nit_pid: None,
        }
    }

    #[test]
    fn test_resolve_components_filters() {
        let mut video = carousel_stream(0x0100, 0x00, 0x0C);
        video.stream_type = 0x1B;
        let mut no_tag = carousel_stream(0x0141, 0x41, 0x0C);
        no_tag.descriptors.remove(0);
        let table = pmt(vec![
            video,
            carousel_stream(0x0140, 0x40, 0x0C),
            no_tag,
            carousel_stream(0x0142, 0x42, 0x08), // unsupported profile
            carousel_stream(0x0143, 0x43, 0x07),
        ]);

        let components = resolve_components(&table, &DEFAULT_SUPPORTED_DATA_COMPONENT_IDS);
        let ids: Vec<(u8, u16)> = components.iter().map(|c| (c.component_id, c.pid)).collect();
        assert_eq!(ids, vec![(0x40, 0x0140), (0x43, 0x0143)]);
        assert_eq!(components[0].data_component_id, 0x0C);
        assert!(components[0].bxml_info.entry_point_flag);
    }

    #[test]
    fn test_resolve_repairs_eight_bit_data_component_id() {
        let mut info = vec![0x0C];
        info.extend_from_slice(&BXML_INFO);
        let stream = PmtStream {
            stream_type: 0x0D,
            elementary_pid: 0x0140,
            descriptors: vec![
                EsDescriptor::StreamIdentifier { component_tag: 0x40 },
                EsDescriptor::DataComponent(DataComponentDescriptor {
                    descriptor_length: 2 + BXML_INFO.len(),
                    data_component_id: 0x00,
                    additional_data_component_info: info,
                }),
            ],
        };

        let components = resolve_components(&pmt(vec![stream]), &DEFAULT_SUPPORTED_DATA_COMPONENT_IDS);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].data_component_id, 0x0C);
    }

    #[test]
    fn test_malformed_descriptor_excludes_stream() {
        let stream = PmtStream {
            stream_type: 0x0D,
            elementary_pid: 0x0140,
            descriptors: vec![
                EsDescriptor::StreamIdentifier { component_tag: 0x40 },
                EsDescriptor::DataComponent(DataComponentDescriptor::parse(&[0x00, 0x0C, 0x20]).unwrap()),
            ],
        };
        assert!(resolve_components(&pmt(vec![stream]), &DEFAULT_SUPPORTED_DATA_COMPONENT_IDS).is_empty());
    }

    #[test]
    fn test_notifies_only_on_change() {
        let mut resolver = ComponentResolver::default();
        resolver.on_pat(&pat(&[(0x0408, 0x01F0)]));

        let first = resolver.on_pmt(0x01F0, &pmt(vec![carousel_stream(0x0140, 0x40, 0x0C)]));
        assert_eq!(first.unwrap().components.len(), 1);
        assert_eq!(resolver.component_for_pid(0x0140).unwrap().component_id, 0x40);

        // Same set, even on a different PID: no notification
        assert!(resolver
            .on_pmt(0x01F0, &pmt(vec![carousel_stream(0x0150, 0x40, 0x0C)]))
            .is_none());
        assert!(resolver.component_for_pid(0x0140).is_none());
        assert_eq!(resolver.component(0x40).unwrap().pid, 0x0150);

        let grown = resolver.on_pmt(
            0x01F0,
            &pmt(vec![carousel_stream(0x0150, 0x40, 0x0C), carousel_stream(0x0151, 0x50, 0x0C)]),
        );
        assert_eq!(grown.unwrap().components.len(), 2);

        // PAT change forces a re-announcement
        resolver.on_pat(&pat(&[(0x0408, 0x01F1)]));
        let again = resolver.on_pmt(
            0x01F1,
            &pmt(vec![carousel_stream(0x0150, 0x40, 0x0C), carousel_stream(0x0151, 0x50, 0x0C)]),
        );
        assert!(again.is_some());
    }

    #[test]
    fn test_program_selection() {
        let mut resolver = ComponentResolver::default();
        assert!(resolver.on_pmt(0x01F0, &pmt(vec![carousel_stream(0x0140, 0x40, 0x0C)])).is_none());

        resolver.on_pat(&pat(&[(0x0408, 0x01F0), (0x0409, 0x01F1)]));
        assert_eq!(resolver.selected_program(), Some(0x0408));
        assert!(resolver.on_pmt(0x01F1, &pmt(vec![carousel_stream(0x0140, 0x40, 0x0C)])).is_none());
        assert!(resolver.on_pmt(0x01F0, &pmt(vec![carousel_stream(0x0140, 0x40, 0x0C)])).is_some());

        let mut resolver = ComponentResolver::new(DEFAULT_SUPPORTED_DATA_COMPONENT_IDS.to_vec(), Some(0x0409));
        resolver.on_pat(&pat(&[(0x0408, 0x01F0), (0x0409, 0x01F1)]));
        assert!(resolver.on_pmt(0x01F0, &pmt(vec![carousel_stream(0x0140, 0x40, 0x0C)])).is_none());
        assert!(resolver.on_pmt(0x01F1, &pmt(vec![carousel_stream(0x0140, 0x40, 0x0C)])).is_some());
        assert_eq!(resolver.profile(0x40), Some(DataComponentProfile::Terrestrial));
    }
}
