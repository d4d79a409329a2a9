//! Data carousel reception.
//!
//! - [`component`]: maps PMT streams to carousel components
//! - [`engine`]: DII/DDB module reassembly
//! - [`cache`]: decoded modules shared with readers
//! - [`receiver`]: wires the demuxer, resolver and engine to a sink

pub mod cache;
pub mod component;
pub mod descriptor;
pub mod engine;
pub mod es_event;
pub mod receiver;

pub use cache::{CachedModule, ModuleCache};
pub use component::{resolve_components, ComponentResolver, DEFAULT_SUPPORTED_DATA_COMPONENT_IDS};
pub use descriptor::decode_additional_arib_bxml_info;
pub use engine::{
    decode_module, BlockOutcome, CarouselEngine, CommitOutcome, CompletedModule, CompressionType,
    DecodedModule, DownloadComponentState, DropReason, ModuleState,
};
pub use es_event::parse_es_events;
pub use receiver::CarouselReceiver;
