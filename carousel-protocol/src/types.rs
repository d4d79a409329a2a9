//! Message type definitions for the data carousel notification channel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// PMT stream type carrying a DSM-CC data carousel.
pub const STREAM_TYPE_DATA_CAROUSEL: u8 = 0x0D;

/// Broadcast profile selected by `data_component_id`.
///
/// Based on ARIB STD-B10 第2部 付録J 表J-1, BML data broadcasting uses:
/// - 0x000C, 0x000D: Terrestrial (地上デジタル)
/// - 0x0007: BS
/// - 0x000B: 110度CS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataComponentProfile {
    /// Digital terrestrial television (地上波デジタル)
    Terrestrial,
    /// BS satellite (BS衛星)
    BS,
    /// 110度CS satellite
    CS,
}

impl DataComponentProfile {
    /// Classify a data component id, `None` for ids that are not BML carousels.
    pub fn from_data_component_id(id: u16) -> Option<Self> {
        match id {
            0x000C | 0x000D => Some(DataComponentProfile::Terrestrial),
            0x0007 => Some(DataComponentProfile::BS),
            0x000B => Some(DataComponentProfile::CS),
            _ => None,
        }
    }

    /// Get display name in English.
    pub fn name_en(&self) -> &'static str {
        match self {
            DataComponentProfile::Terrestrial => "Terrestrial",
            DataComponentProfile::BS => "BS",
            DataComponentProfile::CS => "CS",
        }
    }
}

/// Decoded `additional_data_component_info` of a BML data component
/// (STD-B24 第二分冊 (1/2) 第二編 9.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalAribBxmlInfo {
    /// 0: data carousel and event message, 1: storage-only data carousel.
    pub transmission_format: u8,
    /// Set when the component carries the startup document.
    pub entry_point_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point_info: Option<EntryPointInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_arib_carousel_info: Option<AdditionalAribCarouselInfo>,
}

/// Entry point metadata, present only when `entry_point_flag` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPointInfo {
    pub auto_start_flag: bool,
    /// 4-bit resolution code (0b0011 = 960x540, 0b0100 = 640x480 16:9, ...).
    pub document_resolution: u8,
    #[serde(rename = "useXML")]
    pub use_xml: bool,
    pub default_version_flag: bool,
    pub independent_flag: bool,
    #[serde(rename = "styleForTVFlag")]
    pub style_for_tv_flag: bool,
    pub bml_major_version: u32,
    pub bml_minor_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bxml_major_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bxml_minor_version: Option<u32>,
}

/// `additional_arib_carousel_info` (STD-B24 第三分冊 第三編 C.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalAribCarouselInfo {
    pub data_event_id: u8,
    pub event_section_flag: bool,
    pub ondemand_retrieval_flag: bool,
    pub file_storable_flag: bool,
    pub start_priority: u8,
}

/// A data carousel component as announced by the PMT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPmt {
    /// Elementary PID carrying the component.
    pub pid: u16,
    /// component_tag from the stream identifier descriptor.
    pub component_id: u8,
    pub data_component_id: u16,
    pub bxml_info: AdditionalAribBxmlInfo,
}

/// A single `attribute=value` parameter of a media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeParameter {
    /// Lower-cased attribute name.
    pub attribute: String,
    pub original_attribute: String,
    pub value: String,
}

/// RFC2068 media type. `type_`, `subtype` and parameter attributes are
/// lower-cased for comparison, the originals are kept alongside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaType {
    #[serde(rename = "type")]
    pub type_: String,
    pub original_type: String,
    pub subtype: String,
    pub original_subtype: String,
    pub parameters: Vec<MediaTypeParameter>,
}

impl MediaType {
    /// Check if this is `multipart/mixed`.
    pub fn is_multipart_mixed(&self) -> bool {
        self.type_ == "multipart" && self.subtype == "mixed"
    }

    /// Get a parameter value by (case-insensitive) attribute name.
    pub fn parameter(&self, attribute: &str) -> Option<&str> {
        let attribute = attribute.to_ascii_lowercase();
        self.parameters
            .iter()
            .find(|p| p.attribute == attribute)
            .map(|p| p.value.as_str())
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.original_type, self.original_subtype)?;
        for p in &self.parameters {
            write!(f, "; {}=\"{}\"", p.original_attribute, p.value)?;
        }
        Ok(())
    }
}

/// A file extracted from a downloaded module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleFile {
    /// `Content-Location` of the part; `None` for a non-multipart module.
    pub content_location: Option<String>,
    pub content_type: MediaType,
    #[serde(rename = "dataBase64", with = "base64_bytes")]
    pub data: Bytes,
}

/// Module announced by a DII.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleListEntry {
    pub id: u16,
    pub version: u8,
    pub size: u32,
}

/// `pmt`: the set of carousel components changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmtMessage {
    pub components: Vec<ComponentPmt>,
}

/// `moduleListUpdated`: a new download cycle was announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleListUpdatedMessage {
    pub component_id: u8,
    pub modules: Vec<ModuleListEntry>,
    pub data_event_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to_entry_flag: Option<bool>,
}

/// `moduleDownloaded`: a module was reassembled and decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDownloadedMessage {
    pub component_id: u8,
    pub module_id: u16,
    pub files: Vec<ModuleFile>,
    pub version: u8,
    pub data_event_id: u8,
}

/// Event carried by a stream descriptor section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EsEvent {
    /// General event descriptor with time_mode 0.
    #[serde(rename_all = "camelCase")]
    ImmediateEvent {
        event_message_group_id: u16,
        event_message_type: u8,
        event_message_id: u16,
        private_data_byte: Vec<u8>,
    },
    /// General event descriptor with time_mode 2.
    #[serde(rename_all = "camelCase")]
    NptEvent {
        event_message_group_id: u16,
        #[serde(rename = "eventMessageNPT")]
        event_message_npt: u64,
        event_message_type: u8,
        event_message_id: u16,
        private_data_byte: Vec<u8>,
    },
    /// NPT reference descriptor.
    #[serde(rename_all = "camelCase")]
    NptReference {
        post_discontinuity_indicator: bool,
        dsm_content_id: u8,
        #[serde(rename = "STCReference")]
        stc_reference: u64,
        #[serde(rename = "NPTReference")]
        npt_reference: u64,
        scale_numerator: u16,
        scale_denominator: u16,
    },
}

/// `esEventUpdated`: a stream descriptor section was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsEventUpdatedMessage {
    pub component_id: u8,
    pub events: Vec<EsEvent>,
    pub data_event_id: u8,
}

/// Messages pushed to the downstream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    Pmt(PmtMessage),
    ModuleListUpdated(ModuleListUpdatedMessage),
    ModuleDownloaded(ModuleDownloadedMessage),
    EsEventUpdated(EsEventUpdatedMessage),
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_html() -> MediaType {
        MediaType {
            type_: "text".to_string(),
            original_type: "Text".to_string(),
            subtype: "x-arib-bml".to_string(),
            original_subtype: "X-Arib-Bml".to_string(),
            parameters: vec![MediaTypeParameter {
                attribute: "charset".to_string(),
                original_attribute: "CharSet".to_string(),
                value: "EUC-JP".to_string(),
            }],
        }
    }

    #[test]
    fn test_profile_from_data_component_id() {
        assert_eq!(
            DataComponentProfile::from_data_component_id(0x0C),
            Some(DataComponentProfile::Terrestrial)
        );
        assert_eq!(
            DataComponentProfile::from_data_component_id(0x0D),
            Some(DataComponentProfile::Terrestrial)
        );
        assert_eq!(
            DataComponentProfile::from_data_component_id(0x07),
            Some(DataComponentProfile::BS)
        );
        assert_eq!(
            DataComponentProfile::from_data_component_id(0x0B),
            Some(DataComponentProfile::CS)
        );
        assert_eq!(DataComponentProfile::from_data_component_id(0x08), None);
        assert_eq!(DataComponentProfile::BS.name_en(), "BS");
    }

    #[test]
    fn test_media_type_parameter_lookup() {
        let mt = text_html();
        assert_eq!(mt.parameter("CHARSET"), Some("EUC-JP"));
        assert_eq!(mt.parameter("boundary"), None);
        assert!(!mt.is_multipart_mixed());
        assert_eq!(mt.to_string(), "Text/X-Arib-Bml; CharSet=\"EUC-JP\"");
    }

    #[test]
    fn test_notification_json_shape() {
        let msg = Notification::ModuleDownloaded(ModuleDownloadedMessage {
            component_id: 0x40,
            module_id: 0x0001,
            files: vec![ModuleFile {
                content_location: Some("startup.bml".to_string()),
                content_type: text_html(),
                data: Bytes::from_static(b"abc"),
            }],
            version: 3,
            data_event_id: 1,
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "moduleDownloaded");
        assert_eq!(value["componentId"], 0x40);
        assert_eq!(value["moduleId"], 1);
        assert_eq!(value["files"][0]["contentLocation"], "startup.bml");
        assert_eq!(value["files"][0]["contentType"]["type"], "text");
        assert_eq!(value["files"][0]["dataBase64"], "YWJj");
    }

    #[test]
    fn test_es_event_tags() {
        let event = EsEvent::NptReference {
            post_discontinuity_indicator: false,
            dsm_content_id: 0,
            stc_reference: 1,
            npt_reference: 2,
            scale_numerator: 1,
            scale_denominator: 1,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "nptReference");
        assert_eq!(value["STCReference"], 1);
        assert_eq!(value["NPTReference"], 2);
    }
}
