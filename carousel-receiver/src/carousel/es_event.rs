//! Stream descriptor (table_id 0x3D) event parsing.

use bytes::Buf;
use carousel_protocol::EsEvent;
use log::trace;

use crate::ts_analyzer::{descriptor_tag, parse_descriptor_loop, StreamDescriptors};

const NPT_REFERENCE_MIN_LENGTH: usize = 18;
const GENERAL_EVENT_MIN_LENGTH: usize = 11;

/// Extract events from the descriptor loop of a stream descriptor section.
///
/// Unknown descriptors, descriptors too short for their fixed fields and
/// general events with an unsupported time_mode are skipped.
pub fn parse_es_events(section: &StreamDescriptors) -> Vec<EsEvent> {
    parse_descriptor_loop(&section.descriptors)
        .into_iter()
        .filter_map(|(tag, data)| match tag {
            descriptor_tag::NPT_REFERENCE => parse_npt_reference(data),
            descriptor_tag::GENERAL_EVENT => parse_general_event(data),
            _ => None,
        })
        .collect()
}

/// 33-bit timestamp stored as 7 reserved bits, 1 high bit and 32 low bits.
fn read_u33(mut data: &[u8]) -> u64 {
    let hi = (data.get_u8() & 0x01) as u64;
    (hi << 32) | data.get_u32() as u64
}

fn parse_npt_reference(data: &[u8]) -> Option<EsEvent> {
    if data.len() < NPT_REFERENCE_MIN_LENGTH {
        trace!("NPT_reference_descriptor too short ({} bytes)", data.len());
        return None;
    }
    let mut scale = &data[14..18];
    Some(EsEvent::NptReference {
        post_discontinuity_indicator: data[0] & 0x80 != 0,
        dsm_content_id: data[0] & 0x7F,
        stc_reference: read_u33(&data[1..6]),
        npt_reference: read_u33(&data[9..14]),
        scale_numerator: scale.get_u16(),
        scale_denominator: scale.get_u16(),
    })
}

fn parse_general_event(data: &[u8]) -> Option<EsEvent> {
    if data.len() < GENERAL_EVENT_MIN_LENGTH {
        trace!("General_event_descriptor too short ({} bytes)", data.len());
        return None;
    }
    let event_message_group_id = ((data[0] as u16) << 4 | (data[1] as u16) >> 4) & 0x0FFF;
    let time_mode = data[2];
    let event_message_type = data[8];
    let event_message_id = (data[9] as u16) << 8 | data[10] as u16;
    let private_data_byte = data[11..].to_vec();

    match time_mode {
        0 => Some(EsEvent::ImmediateEvent {
            event_message_group_id,
            event_message_type,
            event_message_id,
            private_data_byte,
        }),
        2 => Some(EsEvent::NptEvent {
            event_message_group_id,
            event_message_npt: read_u33(&data[3..8]),
            event_message_type,
            event_message_id,
            private_data_byte,
        }),
        _ => {
            trace!("General_event_descriptor with time_mode {} ignored", time_mode);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(descriptors: Vec<u8>) -> StreamDescriptors {
        StreamDescriptors {
            data_event_id: 1,
            event_msg_group_id: 0x001,
            descriptors,
        }
    }

    fn general_event(time_mode: u8, npt: [u8; 5], private: &[u8]) -> Vec<u8> {
        let mut d = vec![descriptor_tag::GENERAL_EVENT, (11 + private.len()) as u8];
        d.extend_from_slice(&[0x00, 0x1F, time_mode]);
        d.extend_from_slice(&npt);
        d.extend_from_slice(&[0x01, 0x12, 0x34]);
        d.extend_from_slice(private);
        d
    }

    #[test]
    fn test_immediate_event() {
        let events = parse_es_events(&section(general_event(0, [0xFF; 5], b"ev")));
        assert_eq!(
            events,
            vec![EsEvent::ImmediateEvent {
                event_message_group_id: 0x001,
                event_message_type: 1,
                event_message_id: 0x1234,
                private_data_byte: b"ev".to_vec(),
            }]
        );
    }

    #[test]
    fn test_npt_event() {
        let events = parse_es_events(&section(general_event(2, [0xFF, 0x00, 0x00, 0x01, 0x00], &[])));
        assert_eq!(
            events,
            vec![EsEvent::NptEvent {
                event_message_group_id: 0x001,
                event_message_npt: 0x1_0000_0100,
                event_message_type: 1,
                event_message_id: 0x1234,
                private_data_byte: vec![],
            }]
        );
    }

    #[test]
    fn test_npt_reference() {
        let mut d = vec![descriptor_tag::NPT_REFERENCE, 18];
        d.push(0x85);
        d.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00, 0x10]);
        d.extend_from_slice(&[0xFF; 3]);
        d.extend_from_slice(&[0xFE, 0x00, 0x00, 0x00, 0x20]);
        d.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);

        let events = parse_es_events(&section(d));
        assert_eq!(
            events,
            vec![EsEvent::NptReference {
                post_discontinuity_indicator: true,
                dsm_content_id: 5,
                stc_reference: 0x1_0000_0010,
                npt_reference: 0x20,
                scale_numerator: 1,
                scale_denominator: 1,
            }]
        );
    }

    #[test]
    fn test_skips_unsupported_and_truncated() {
        let mut d = general_event(1, [0; 5], &[]);
        d.extend_from_slice(&[descriptor_tag::NPT_REFERENCE, 2, 0x00, 0x00]);
        d.extend_from_slice(&[0x99, 1, 0x00]);
        d.extend(general_event(0, [0; 5], &[]));
        // Length runs past the end of the loop
        d.extend_from_slice(&[descriptor_tag::GENERAL_EVENT, 40, 0x00]);

        let events = parse_es_events(&section(d));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EsEvent::ImmediateEvent { .. }));
    }
}
