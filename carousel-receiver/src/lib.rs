//! ARIB data carousel receiver.
//!
//! Reassembles DSM-CC modules carried on data carousel streams of an
//! MPEG-TS, decodes their multipart entities and publishes the resulting
//! files as [`carousel_protocol::Notification`]s.

pub mod carousel;
pub mod config;
pub mod entity;
pub mod error;
pub mod logging;
pub mod sink;
pub mod ts_analyzer;

pub use carousel::{CarouselReceiver, ComponentResolver, ModuleCache};
pub use error::{CarouselError, Result};
pub use sink::NotificationSink;
