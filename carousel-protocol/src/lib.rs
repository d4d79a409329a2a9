//! Notification definitions for the ARIB data carousel receiver.
//!
//! This crate defines the messages pushed from the carousel receiver to a
//! downstream consumer (typically a BML document renderer) and the
//! JSON-lines codec used to carry them.
//!
//! # Messages
//!
//! - [`Notification::Pmt`]: the set of data carousel components changed
//! - [`Notification::ModuleListUpdated`]: a DII announced a new download cycle
//! - [`Notification::ModuleDownloaded`]: a module was reassembled and decoded
//! - [`Notification::EsEventUpdated`]: stream descriptors (event messages, NPT)
//!
//! # Example
//!
//! ```rust
//! use carousel_protocol::{decode_notification, encode_notification};
//! use carousel_protocol::{ModuleListEntry, ModuleListUpdatedMessage, Notification};
//!
//! let msg = Notification::ModuleListUpdated(ModuleListUpdatedMessage {
//!     component_id: 0x40,
//!     modules: vec![ModuleListEntry { id: 0, version: 1, size: 1024 }],
//!     data_event_id: 1,
//!     return_to_entry_flag: None,
//! });
//! let line = encode_notification(&msg).unwrap();
//! assert_eq!(decode_notification(&line).unwrap(), msg);
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode_notification, encode_notification, MAX_LINE_SIZE};
pub use error::ProtocolError;
pub use types::{
    AdditionalAribBxmlInfo, AdditionalAribCarouselInfo, ComponentPmt, DataComponentProfile,
    EntryPointInfo, EsEvent, EsEventUpdatedMessage, MediaType, MediaTypeParameter,
    ModuleDownloadedMessage, ModuleFile, ModuleListEntry, ModuleListUpdatedMessage, Notification,
    PmtMessage, STREAM_TYPE_DATA_CAROUSEL,
};
