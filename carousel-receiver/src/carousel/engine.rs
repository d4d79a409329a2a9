//! Module reassembly engine.
//!
//! Per component, the engine tracks the modules announced by the current
//! DownloadInfoIndication and collects DownloadDataBlocks until a module is
//! complete. Completion is split in three steps so that the CPU-bound part
//! can run elsewhere:
//!
//! 1. [`CarouselEngine::handle_module_data`] yields a [`CompletedModule`]
//! 2. [`decode_module`] inflates and parses it into a [`DecodedModule`]
//! 3. [`CarouselEngine::commit`] checks that the download cycle is still
//!    current and publishes the result to the [`ModuleCache`]

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use carousel_protocol::{
    ModuleDownloadedMessage, ModuleFile, ModuleListEntry, ModuleListUpdatedMessage, Notification,
};
use flate2::read::ZlibDecoder;
use log::{debug, info, trace, warn};

use super::cache::{CachedModule, ModuleCache};
use crate::entity::{content_type_of, parse_media_type_str, EntityParser};
use crate::error::{CarouselError, Result};
use crate::ts_analyzer::{DownloadDataBlock, DownloadInfoIndication, ModuleInfo};

/// Upper bound for the inflate buffer preallocation.
const MAX_INFLATE_PREALLOC: usize = 16 * 1024 * 1024;

/// Upper bound for inflated module data when no original_size is declared.
const MAX_INFLATED_SIZE: u64 = 16 * 1024 * 1024;

/// Slack allowed over the declared original_size when inflating.
const INFLATE_SLACK: u64 = 64 * 1024;

/// blockNumber is 16 bits wide; larger modules can never complete.
const MAX_BLOCK_COUNT: usize = u16::MAX as usize + 1;

/// Module compression (Compression Type descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None,
    Zlib,
}

/// Download progress of one announced module.
#[derive(Debug, Clone)]
pub struct ModuleState {
    pub module_id: u16,
    pub module_version: u8,
    pub module_size: u32,
    pub data_event_id: u8,
    pub compression_type: CompressionType,
    pub original_size: Option<u32>,
    pub content_type: Option<String>,
    block_count: usize,
    /// One slot per block; released once the module completes.
    blocks: Vec<Option<Bytes>>,
    downloaded_block_count: usize,
    completed: bool,
}

impl ModuleState {
    fn new(info: &ModuleInfo, block_size: u16, data_event_id: u8) -> Self {
        let block_count = if block_size == 0 {
            0
        } else {
            (info.module_size as usize).div_ceil(block_size as usize)
        };
        let slots = if block_count > MAX_BLOCK_COUNT {
            warn!(
                "Module {:#06x}: moduleSize {} needs {} blocks of {} bytes, ignoring its blocks",
                info.module_id, info.module_size, block_count, block_size
            );
            0
        } else {
            block_count
        };

        let compression_type = match info.compression {
            Some(c) if c.is_zlib() => CompressionType::Zlib,
            Some(c) => {
                warn!(
                    "Module {:#06x}: unknown compression_type {}, treating as uncompressed",
                    info.module_id, c.compression_type
                );
                CompressionType::None
            }
            None => CompressionType::None,
        };

        Self {
            module_id: info.module_id,
            module_version: info.module_version,
            module_size: info.module_size,
            data_event_id,
            compression_type,
            original_size: info.compression.map(|c| c.original_size),
            content_type: info.content_type.clone(),
            block_count,
            blocks: vec![None; slots],
            downloaded_block_count: 0,
            completed: false,
        }
    }

    /// Number of blocks the module is split into.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn downloaded_block_count(&self) -> usize {
        self.downloaded_block_count
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Download state of one component for the current transaction.
#[derive(Debug, Clone)]
pub struct DownloadComponentState {
    pub component_id: u8,
    pub transaction_id: u32,
    pub data_event_id: u8,
    pub modules: HashMap<u16, ModuleState>,
    pub downloaded_module_count: usize,
}

/// Why a DownloadDataBlock was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No DII has been received for the component.
    UnknownComponent,
    /// The module is not in the current DII.
    UnknownModule,
    /// moduleVersion differs from the announced one.
    VersionMismatch,
    /// data_event_id differs from the announced one.
    DataEventMismatch,
    /// The module has already been reassembled in this transaction.
    AlreadyCompleted,
    /// blockNumber is past the end of the module.
    BlockOutOfRange,
    /// The block has already been received.
    DuplicateBlock,
    /// The module completed but the same version is already cached.
    AlreadyCached,
}

/// A fully reassembled module, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedModule {
    pub component_id: u8,
    pub transaction_id: u32,
    pub module_id: u16,
    pub module_version: u8,
    pub module_size: u32,
    pub data_event_id: u8,
    pub compression_type: CompressionType,
    pub original_size: Option<u32>,
    pub content_type: Option<String>,
    /// Blocks concatenated in index order.
    pub data: Bytes,
}

/// Result of storing a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Dropped(DropReason),
    Stored,
    Completed(CompletedModule),
}

/// A decoded module ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedModule {
    pub component_id: u8,
    pub transaction_id: u32,
    pub module_id: u16,
    pub module_version: u8,
    pub module_size: u32,
    pub data_event_id: u8,
    pub content_type: Option<String>,
    /// `None` when the module could not be parsed.
    pub files: Option<Vec<ModuleFile>>,
}

impl DecodedModule {
    fn from_completed(module: &CompletedModule, files: Option<Vec<ModuleFile>>) -> Self {
        Self {
            component_id: module.component_id,
            transaction_id: module.transaction_id,
            module_id: module.module_id,
            module_version: module.module_version,
            module_size: module.module_size,
            data_event_id: module.data_event_id,
            content_type: module.content_type.clone(),
            files,
        }
    }

    /// Metadata-only result for a module whose body failed to parse.
    ///
    /// Committing it marks the version as processed without publishing files.
    pub fn unparsed(module: &CompletedModule) -> Self {
        Self::from_completed(module, None)
    }
}

/// Result of committing a decoded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Cached; the `moduleDownloaded` notification to publish.
    Published(Notification),
    /// Cached without files.
    CachedWithoutFiles,
    /// The same version was already cached.
    Unchanged,
    /// The download cycle was replaced while the module was being decoded.
    Stale,
}

/// Module reassembly engine.
#[derive(Debug, Default)]
pub struct CarouselEngine {
    components: HashMap<u8, DownloadComponentState>,
    cache: Arc<ModuleCache>,
}

impl CarouselEngine {
    pub fn new(cache: Arc<ModuleCache>) -> Self {
        Self {
            components: HashMap::new(),
            cache,
        }
    }

    /// Shared module cache.
    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    /// Download state of a component.
    pub fn component_state(&self, component_id: u8) -> Option<&DownloadComponentState> {
        self.components.get(&component_id)
    }

    /// Handle a DownloadInfoIndication.
    ///
    /// A DII repeating the current transaction_id is ignored. Otherwise all
    /// in-flight state of the component is replaced and the new module list
    /// is returned as a `moduleListUpdated` notification.
    pub fn handle_module_info(&mut self, component_id: u8, dii: &DownloadInfoIndication) -> Option<Notification> {
        let previous = self.components.get(&component_id);
        if previous.map(|c| c.transaction_id) == Some(dii.transaction_id) {
            return None;
        }
        let previous_data_event_id = previous.map(|c| c.data_event_id);

        let data_event_id = dii.data_event_id();
        let modules: HashMap<u16, ModuleState> = dii
            .modules
            .iter()
            .map(|m| (m.module_id, ModuleState::new(m, dii.block_size, data_event_id)))
            .collect();

        debug!(
            "Component {:#04x}: transaction {:#010x}, data_event_id {}, {} modules, blockSize {}",
            component_id,
            dii.transaction_id,
            data_event_id,
            modules.len(),
            dii.block_size
        );

        if previous_data_event_id != Some(data_event_id) && self.cache.module_count(component_id) > 0 {
            info!(
                "Component {:#04x}: data_event_id changed to {}, clearing cached modules",
                component_id, data_event_id
            );
            self.cache.clear_component(component_id);
        }

        self.components.insert(
            component_id,
            DownloadComponentState {
                component_id,
                transaction_id: dii.transaction_id,
                data_event_id,
                modules,
                downloaded_module_count: 0,
            },
        );

        Some(Notification::ModuleListUpdated(ModuleListUpdatedMessage {
            component_id,
            modules: dii
                .modules
                .iter()
                .map(|m| ModuleListEntry {
                    id: m.module_id,
                    version: m.module_version,
                    size: m.module_size,
                })
                .collect(),
            data_event_id,
            return_to_entry_flag: dii.return_to_entry_flag(),
        }))
    }

    /// Handle a DownloadDataBlock.
    pub fn handle_module_data(&mut self, component_id: u8, ddb: &DownloadDataBlock) -> BlockOutcome {
        let outcome = self.store_block(component_id, ddb);
        if let BlockOutcome::Dropped(reason) = &outcome {
            trace!(
                "Component {:#04x} module {:#06x} v{} block {}: dropped ({:?})",
                component_id,
                ddb.module_id,
                ddb.module_version,
                ddb.block_number,
                reason
            );
        }
        outcome
    }

    fn store_block(&mut self, component_id: u8, ddb: &DownloadDataBlock) -> BlockOutcome {
        let Some(component) = self.components.get_mut(&component_id) else {
            return BlockOutcome::Dropped(DropReason::UnknownComponent);
        };
        let Some(module) = component.modules.get_mut(&ddb.module_id) else {
            return BlockOutcome::Dropped(DropReason::UnknownModule);
        };
        if module.module_version != ddb.module_version {
            return BlockOutcome::Dropped(DropReason::VersionMismatch);
        }
        if module.data_event_id != ddb.data_event_id() {
            return BlockOutcome::Dropped(DropReason::DataEventMismatch);
        }
        if module.is_completed() {
            return BlockOutcome::Dropped(DropReason::AlreadyCompleted);
        }
        let Some(slot) = module.blocks.get_mut(ddb.block_number as usize) else {
            return BlockOutcome::Dropped(DropReason::BlockOutOfRange);
        };
        if slot.is_some() {
            return BlockOutcome::Dropped(DropReason::DuplicateBlock);
        }

        *slot = Some(ddb.block_data.clone());
        module.downloaded_block_count += 1;
        if module.downloaded_block_count < module.block_count {
            return BlockOutcome::Stored;
        }

        module.completed = true;
        component.downloaded_module_count += 1;

        let blocks = std::mem::take(&mut module.blocks);
        let mut data = BytesMut::with_capacity(blocks.iter().flatten().map(|b| b.len()).sum());
        for block in blocks.iter().flatten() {
            data.extend_from_slice(block);
        }

        if self
            .cache
            .is_current(component_id, module.module_id, module.module_version, module.data_event_id)
        {
            return BlockOutcome::Dropped(DropReason::AlreadyCached);
        }

        debug!(
            "Component {:#04x} module {:#06x} v{}: reassembled {} bytes",
            component_id,
            module.module_id,
            module.module_version,
            data.len()
        );

        BlockOutcome::Completed(CompletedModule {
            component_id,
            transaction_id: component.transaction_id,
            module_id: module.module_id,
            module_version: module.module_version,
            module_size: module.module_size,
            data_event_id: module.data_event_id,
            compression_type: module.compression_type,
            original_size: module.original_size,
            content_type: module.content_type.clone(),
            data: data.freeze(),
        })
    }

    /// Publish a decoded module to the cache.
    ///
    /// The module is discarded when its download cycle is no longer the
    /// current one, and ignored when the same version is already cached.
    pub fn commit(&mut self, decoded: DecodedModule) -> CommitOutcome {
        let current = self
            .components
            .get(&decoded.component_id)
            .map(|c| c.transaction_id == decoded.transaction_id && c.data_event_id == decoded.data_event_id)
            .unwrap_or(false);
        if !current {
            debug!(
                "Component {:#04x} module {:#06x}: transaction {:#010x} superseded, discarding",
                decoded.component_id, decoded.module_id, decoded.transaction_id
            );
            return CommitOutcome::Stale;
        }

        if self.cache.is_current(
            decoded.component_id,
            decoded.module_id,
            decoded.module_version,
            decoded.data_event_id,
        ) {
            return CommitOutcome::Unchanged;
        }

        let DecodedModule {
            component_id,
            module_id,
            module_version,
            module_size,
            data_event_id,
            content_type,
            files,
            ..
        } = decoded;

        self.cache.insert(
            component_id,
            CachedModule {
                module_id,
                module_version,
                module_size,
                data_event_id,
                content_type,
                files: files.clone(),
            },
        );

        match files {
            Some(files) => {
                info!(
                    "Component {:#04x} module {:#06x} v{}: {} files",
                    component_id,
                    module_id,
                    module_version,
                    files.len()
                );
                CommitOutcome::Published(Notification::ModuleDownloaded(ModuleDownloadedMessage {
                    component_id,
                    module_id,
                    files,
                    version: module_version,
                    data_event_id,
                }))
            }
            None => CommitOutcome::CachedWithoutFiles,
        }
    }
}

/// Inflate and parse a reassembled module.
///
/// A module whose Type descriptor names a media type other than
/// `multipart/mixed` becomes a single file without a location. Otherwise the
/// module is parsed as a multipart entity and each part with a
/// Content-Location and a parseable Content-Type becomes a file.
pub fn decode_module(module: &CompletedModule) -> Result<DecodedModule> {
    let data = match module.compression_type {
        CompressionType::None => module.data.clone(),
        CompressionType::Zlib => {
            inflate(&module.data, module.original_size).map_err(|e| CarouselError::Decompression {
                component_id: module.component_id,
                module_id: module.module_id,
                reason: e.to_string(),
            })?
        }
    };

    let declared = module.content_type.as_deref().and_then(parse_media_type_str);
    let files = match declared {
        Some(media_type) if !media_type.is_multipart_mixed() => vec![ModuleFile {
            content_location: None,
            content_type: media_type,
            data,
        }],
        _ => extract_files(module, data)?,
    };

    Ok(DecodedModule::from_completed(module, Some(files)))
}

fn inflate(data: &[u8], original_size: Option<u32>) -> std::io::Result<Bytes> {
    let limit = original_size
        .map(|s| s as u64 + INFLATE_SLACK)
        .unwrap_or(MAX_INFLATED_SIZE);
    let capacity = original_size.map(|s| s as usize).unwrap_or(data.len() * 2);
    let mut out = Vec::with_capacity(capacity.min(MAX_INFLATE_PREALLOC));

    // One byte past the limit tells an oversized stream from an exact fit
    ZlibDecoder::new(data).take(limit + 1).read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("inflated data exceeds {} bytes", limit),
        ));
    }
    Ok(Bytes::from(out))
}

fn extract_files(module: &CompletedModule, data: Bytes) -> Result<Vec<ModuleFile>> {
    let parse_failure = |reason| CarouselError::ParseFailure {
        component_id: module.component_id,
        module_id: module.module_id,
        reason,
    };

    let entity = EntityParser::new(data).read_entity().map_err(parse_failure)?;
    let parts = entity
        .multipart_body
        .ok_or_else(|| parse_failure("module is not a multipart/mixed entity"))?;

    let mut files: Vec<ModuleFile> = Vec::with_capacity(parts.len());
    for part in parts {
        let Some(location) = part.header("content-location") else {
            warn!(
                "Component {:#04x} module {:#06x}: part without Content-Location",
                module.component_id, module.module_id
            );
            continue;
        };
        let location = location.value_string();
        let Some(content_type) = part.header("content-type") else {
            warn!(
                "Component {:#04x} module {:#06x}: {} has no Content-Type",
                module.component_id, module.module_id, location
            );
            continue;
        };
        let Some(media_type) = content_type_of(&part) else {
            warn!(
                "Component {:#04x} module {:#06x}: {} has unparseable Content-Type {}",
                module.component_id,
                module.module_id,
                location,
                content_type.value_string()
            );
            continue;
        };

        let file = ModuleFile {
            content_location: Some(location),
            content_type: media_type,
            data: part.body.clone(),
        };
        match files.iter_mut().find(|f| f.content_location == file.content_location) {
            Some(existing) => *existing = file,
            None => files.push(file),
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts_analyzer::CompressionInfo;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    const COMPONENT: u8 = 0x40;

    fn engine() -> CarouselEngine {
        CarouselEngine::new(Arc::new(ModuleCache::new()))
    }

    fn dii(transaction_id: u32, modules: Vec<ModuleInfo>) -> DownloadInfoIndication {
        DownloadInfoIndication::for_test(transaction_id, 0, 10, modules)
    }

    fn ddb(module_id: u16, version: u8, block_number: u16, data: &[u8]) -> DownloadDataBlock {
        DownloadDataBlock::for_test(0, module_id, version, block_number, data)
    }

    fn multipart(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut data = b"Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n".to_vec();
        for (location, content_type, body) in parts {
            data.extend_from_slice(b"--B\r\n");
            data.extend_from_slice(format!("Content-Location: {}\r\n", location).as_bytes());
            data.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
            data.extend_from_slice(body);
            data.extend_from_slice(b"\r\n");
        }
        data.extend_from_slice(b"--B--\r\n");
        data
    }

    /// Announce one module and deliver `data` in 10-byte blocks.
    fn download(engine: &mut CarouselEngine, transaction_id: u32, module: ModuleInfo, data: &[u8]) -> BlockOutcome {
        let module_id = module.module_id;
        let version = module.module_version;
        engine.handle_module_info(COMPONENT, &dii(transaction_id, vec![module]));
        let mut outcome = BlockOutcome::Stored;
        for (i, chunk) in data.chunks(10).enumerate() {
            outcome = engine.handle_module_data(COMPONENT, &ddb(module_id, version, i as u16, chunk));
        }
        outcome
    }

    fn complete(outcome: BlockOutcome) -> CompletedModule {
        match outcome {
            BlockOutcome::Completed(module) => module,
            other => panic!("expected completed module, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut engine = engine();
        let notification = engine.handle_module_info(COMPONENT, &dii(1, vec![ModuleInfo::for_test(0x0001, 0, 25)]));
        assert!(matches!(notification, Some(Notification::ModuleListUpdated(_))));

        let blocks: [&[u8]; 3] = [b"0123456789", b"abcdefghij", b"ABCDE"];
        assert_eq!(engine.handle_module_data(COMPONENT, &ddb(1, 0, 2, blocks[2])), BlockOutcome::Stored);
        assert_eq!(engine.handle_module_data(COMPONENT, &ddb(1, 0, 0, blocks[0])), BlockOutcome::Stored);
        let module = complete(engine.handle_module_data(COMPONENT, &ddb(1, 0, 1, blocks[1])));

        assert_eq!(module.data.len(), 25);
        assert_eq!(&module.data[..], b"0123456789abcdefghijABCDE");
        assert_eq!(engine.component_state(COMPONENT).unwrap().downloaded_module_count, 1);
    }

    #[test]
    fn test_any_delivery_order_reassembles() {
        let blocks: [&[u8]; 4] = [b"0123456789", b"abcdefghij", b"ABCDEFGHIJ", b"xyz"];
        let orders = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [3, 0, 1, 2],
            [0, 3, 2, 1],
        ];

        for order in orders {
            let mut engine = engine();
            engine.handle_module_info(COMPONENT, &dii(1, vec![ModuleInfo::for_test(1, 0, 33)]));

            let (last, rest) = order.split_last().unwrap();
            for &i in rest {
                assert_eq!(
                    engine.handle_module_data(COMPONENT, &ddb(1, 0, i, blocks[i as usize])),
                    BlockOutcome::Stored,
                    "order {:?}",
                    order
                );
            }
            let module = complete(engine.handle_module_data(COMPONENT, &ddb(1, 0, *last, blocks[*last as usize])));
            assert_eq!(&module.data[..], b"0123456789abcdefghijABCDEFGHIJxyz", "order {:?}", order);
        }
    }

    #[test]
    fn test_oversized_module_allocates_no_blocks() {
        let mut engine = engine();
        let dii = DownloadInfoIndication::for_test(
            1,
            0,
            1,
            vec![ModuleInfo::for_test(1, 0, u32::MAX), ModuleInfo::for_test(2, 0, 3)],
        );
        let Some(Notification::ModuleListUpdated(msg)) = engine.handle_module_info(COMPONENT, &dii) else {
            panic!("expected moduleListUpdated");
        };
        assert_eq!(msg.modules.len(), 2);

        let state = &engine.component_state(COMPONENT).unwrap().modules[&1];
        assert_eq!(state.block_count(), u32::MAX as usize);
        assert_eq!(
            engine.handle_module_data(COMPONENT, &ddb(1, 0, 0, b"x")),
            BlockOutcome::Dropped(DropReason::BlockOutOfRange)
        );

        // Other modules of the same cycle still download
        engine.handle_module_data(COMPONENT, &ddb(2, 0, 0, b"a"));
        engine.handle_module_data(COMPONENT, &ddb(2, 0, 1, b"b"));
        let module = complete(engine.handle_module_data(COMPONENT, &ddb(2, 0, 2, b"c")));
        assert_eq!(&module.data[..], b"abc");
    }

    #[test]
    fn test_duplicate_block_is_dropped() {
        let mut engine = engine();
        engine.handle_module_info(COMPONENT, &dii(1, vec![ModuleInfo::for_test(1, 0, 25)]));

        assert_eq!(engine.handle_module_data(COMPONENT, &ddb(1, 0, 0, b"0123456789")), BlockOutcome::Stored);
        assert_eq!(
            engine.handle_module_data(COMPONENT, &ddb(1, 0, 0, b"XXXXXXXXXX")),
            BlockOutcome::Dropped(DropReason::DuplicateBlock)
        );
        let state = &engine.component_state(COMPONENT).unwrap().modules[&1];
        assert_eq!(state.downloaded_block_count(), 1);
        assert_eq!(state.block_count(), 3);

        engine.handle_module_data(COMPONENT, &ddb(1, 0, 1, b"abcdefghij"));
        let module = complete(engine.handle_module_data(COMPONENT, &ddb(1, 0, 2, b"ABCDE")));
        assert_eq!(&module.data[..10], b"0123456789");
    }

    #[test]
    fn test_block_preconditions() {
        let mut engine = engine();
        assert_eq!(
            engine.handle_module_data(COMPONENT, &ddb(1, 0, 0, b"x")),
            BlockOutcome::Dropped(DropReason::UnknownComponent)
        );

        engine.handle_module_info(COMPONENT, &dii(1, vec![ModuleInfo::for_test(1, 3, 25)]));
        assert_eq!(
            engine.handle_module_data(COMPONENT, &ddb(2, 3, 0, b"x")),
            BlockOutcome::Dropped(DropReason::UnknownModule)
        );
        assert_eq!(
            engine.handle_module_data(COMPONENT, &ddb(1, 2, 0, b"x")),
            BlockOutcome::Dropped(DropReason::VersionMismatch)
        );
        assert_eq!(
            engine.handle_module_data(COMPONENT, &DownloadDataBlock::for_test(5, 1, 3, 0, b"x")),
            BlockOutcome::Dropped(DropReason::DataEventMismatch)
        );
        assert_eq!(
            engine.handle_module_data(COMPONENT, &ddb(1, 3, 3, b"x")),
            BlockOutcome::Dropped(DropReason::BlockOutOfRange)
        );
    }

    #[test]
    fn test_same_transaction_keeps_progress() {
        let mut engine = engine();
        engine.handle_module_info(COMPONENT, &dii(1, vec![ModuleInfo::for_test(1, 0, 25)]));
        engine.handle_module_data(COMPONENT, &ddb(1, 0, 0, b"0123456789"));

        assert!(engine
            .handle_module_info(COMPONENT, &dii(1, vec![ModuleInfo::for_test(1, 0, 25)]))
            .is_none());
        assert_eq!(engine.component_state(COMPONENT).unwrap().modules[&1].downloaded_block_count(), 1);
    }

    #[test]
    fn test_new_transaction_discards_progress() {
        let mut engine = engine();
        engine.handle_module_info(COMPONENT, &dii(1, vec![ModuleInfo::for_test(1, 0, 25)]));
        engine.handle_module_data(COMPONENT, &ddb(1, 0, 0, b"0123456789"));
        engine.handle_module_data(COMPONENT, &ddb(1, 0, 1, b"abcdefghij"));

        let notification = engine.handle_module_info(COMPONENT, &dii(2, vec![ModuleInfo::for_test(1, 0, 25)]));
        let Some(Notification::ModuleListUpdated(msg)) = notification else {
            panic!("expected moduleListUpdated");
        };
        assert_eq!(msg.modules, vec![ModuleListEntry { id: 1, version: 0, size: 25 }]);

        let state = engine.component_state(COMPONENT).unwrap();
        assert_eq!(state.transaction_id, 2);
        assert_eq!(state.modules[&1].downloaded_block_count(), 0);
        // Block 2 alone no longer completes the module
        assert_eq!(engine.handle_module_data(COMPONENT, &ddb(1, 0, 2, b"ABCDE")), BlockOutcome::Stored);
    }

    #[test]
    fn test_decode_and_commit_multipart() {
        let mut engine = engine();
        let body = multipart(&[
            ("startup.bml", "text/X-arib-bml; charset=\"euc-jp\"", b"<bml/>"),
            ("a.png", "image/png", &[0x89, b'P', b'N', b'G']),
        ]);
        let module = complete(download(&mut engine, 1, ModuleInfo::for_test(1, 0, body.len() as u32), &body));

        let decoded = decode_module(&module).unwrap();
        let CommitOutcome::Published(Notification::ModuleDownloaded(msg)) = engine.commit(decoded) else {
            panic!("expected moduleDownloaded");
        };
        assert_eq!(msg.component_id, COMPONENT);
        assert_eq!(msg.module_id, 1);
        assert_eq!(msg.files.len(), 2);
        assert_eq!(msg.files[0].content_location.as_deref(), Some("startup.bml"));
        assert_eq!(msg.files[0].content_type.parameter("charset"), Some("euc-jp"));
        assert_eq!(&msg.files[1].data[..], &[0x89, b'P', b'N', b'G']);

        let cached = engine.cache().file(COMPONENT, 1, "startup.bml").unwrap();
        assert_eq!(&cached.data[..], b"<bml/>");
    }

    #[test]
    fn test_parts_without_required_headers_are_skipped() {
        let mut engine = engine();
        let mut body = b"Content-Type: multipart/mixed; boundary=B\r\n\r\n".to_vec();
        body.extend_from_slice(b"--B\r\nContent-Type: text/plain\r\n\r\nno location\r\n");
        body.extend_from_slice(b"--B\r\nContent-Location: b.txt\r\n\r\nno type\r\n");
        body.extend_from_slice(b"--B\r\nContent-Location: c.txt\r\nContent-Type: bogus\r\n\r\nbad type\r\n");
        body.extend_from_slice(b"--B\r\nContent-Location: d.txt\r\nContent-Type: text/plain\r\n\r\nok\r\n--B--\r\n");
        let module = complete(download(&mut engine, 1, ModuleInfo::for_test(1, 0, body.len() as u32), &body));

        let decoded = decode_module(&module).unwrap();
        let files = decoded.files.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content_location.as_deref(), Some("d.txt"));
    }

    #[test]
    fn test_zlib_module() {
        let body = multipart(&[("startup.bml", "text/X-arib-bml", b"<bml>compressed</bml>")]);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut info = ModuleInfo::for_test(1, 0, compressed.len() as u32);
        info.compression = Some(CompressionInfo {
            compression_type: 0,
            original_size: body.len() as u32,
        });
        let mut engine = engine();
        let module = complete(download(&mut engine, 1, info, &compressed));
        assert_eq!(module.compression_type, CompressionType::Zlib);

        let decoded = decode_module(&module).unwrap();
        let files = decoded.files.unwrap();
        assert_eq!(&files[0].data[..], b"<bml>compressed</bml>");
    }

    #[test]
    fn test_zlib_output_is_bounded() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&vec![0u8; 1024 * 1024]).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut info = ModuleInfo::for_test(1, 0, compressed.len() as u32);
        info.compression = Some(CompressionInfo {
            compression_type: 0,
            original_size: 1024,
        });
        let mut engine = engine();
        let module = complete(download(&mut engine, 1, info, &compressed));

        assert!(matches!(decode_module(&module), Err(CarouselError::Decompression { .. })));
        assert_eq!(inflate(&compressed, Some(1024 * 1024)).unwrap().len(), 1024 * 1024);
    }

    #[test]
    fn test_corrupt_zlib_is_not_cached() {
        let mut info = ModuleInfo::for_test(1, 0, 12);
        info.compression = Some(CompressionInfo {
            compression_type: 0,
            original_size: 100,
        });
        let mut engine = engine();
        let module = complete(download(&mut engine, 1, info, b"not zlib...."));

        assert!(matches!(decode_module(&module), Err(CarouselError::Decompression { .. })));
        assert!(engine.cache().module(COMPONENT, 1).is_none());
    }

    #[test]
    fn test_declared_non_multipart_type() {
        let mut info = ModuleInfo::for_test(1, 0, 8);
        info.content_type = Some("image/png".to_string());
        let mut engine = engine();
        let module = complete(download(&mut engine, 1, info, b"PNGBYTES"));

        let files = decode_module(&module).unwrap().files.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content_location, None);
        assert_eq!(files[0].content_type.subtype, "png");
        assert_eq!(&files[0].data[..], b"PNGBYTES");
    }

    #[test]
    fn test_parse_failure() {
        let mut engine = engine();
        let body = b"Content-Type: multipart/mixed; boundary=B\r\n\r\n--B\r\n\r\nunterminated";
        let module = complete(download(&mut engine, 1, ModuleInfo::for_test(1, 0, body.len() as u32), body));

        assert!(matches!(decode_module(&module), Err(CarouselError::ParseFailure { .. })));
        assert_eq!(engine.commit(DecodedModule::unparsed(&module)), CommitOutcome::CachedWithoutFiles);
        let cached = engine.cache().module(COMPONENT, 1).unwrap();
        assert!(cached.files.is_none());
        assert_eq!(cached.module_version, 0);
    }

    #[test]
    fn test_same_version_is_not_republished() {
        let body = multipart(&[("a.txt", "text/plain", b"same")]);
        let mut engine = engine();
        let module = complete(download(&mut engine, 1, ModuleInfo::for_test(1, 0, body.len() as u32), &body));
        assert!(matches!(engine.commit(decode_module(&module).unwrap()), CommitOutcome::Published(_)));

        // New cycle, same module version: completion stops before decoding
        let outcome = download(&mut engine, 2, ModuleInfo::for_test(1, 0, body.len() as u32), &body);
        assert_eq!(outcome, BlockOutcome::Dropped(DropReason::AlreadyCached));

        // New version with identical content is published again
        let module = complete(download(&mut engine, 3, ModuleInfo::for_test(1, 1, body.len() as u32), &body));
        let CommitOutcome::Published(Notification::ModuleDownloaded(msg)) = engine.commit(decode_module(&module).unwrap()) else {
            panic!("expected moduleDownloaded");
        };
        assert_eq!(msg.version, 1);
    }

    #[test]
    fn test_commit_after_new_transaction_is_stale() {
        let body = multipart(&[("a.txt", "text/plain", b"x")]);
        let mut engine = engine();
        let module = complete(download(&mut engine, 1, ModuleInfo::for_test(1, 0, body.len() as u32), &body));
        let decoded = decode_module(&module).unwrap();

        engine.handle_module_info(COMPONENT, &dii(2, vec![ModuleInfo::for_test(1, 0, body.len() as u32)]));
        assert_eq!(engine.commit(decoded.clone()), CommitOutcome::Stale);
        assert!(engine.cache().module(COMPONENT, 1).is_none());

        // Committing twice under the current transaction is idempotent
        let module = complete(download(&mut engine, 3, ModuleInfo::for_test(1, 0, body.len() as u32), &body));
        let decoded = decode_module(&module).unwrap();
        assert!(matches!(engine.commit(decoded.clone()), CommitOutcome::Published(_)));
        assert_eq!(engine.commit(decoded), CommitOutcome::Unchanged);
    }

    #[test]
    fn test_data_event_change_clears_cache() {
        let body = multipart(&[("a.txt", "text/plain", b"x")]);
        let mut engine = engine();
        let module = complete(download(&mut engine, 1, ModuleInfo::for_test(1, 0, body.len() as u32), &body));
        engine.commit(decode_module(&module).unwrap());
        assert_eq!(engine.cache().module_count(COMPONENT), 1);

        // Same data_event_id: cache kept
        engine.handle_module_info(COMPONENT, &dii(2, vec![ModuleInfo::for_test(1, 0, 1)]));
        assert_eq!(engine.cache().module_count(COMPONENT), 1);

        let next_event = DownloadInfoIndication::for_test(3, 1, 10, vec![ModuleInfo::for_test(1, 0, 1)]);
        let Some(Notification::ModuleListUpdated(msg)) = engine.handle_module_info(COMPONENT, &next_event) else {
            panic!("expected moduleListUpdated");
        };
        assert_eq!(msg.data_event_id, 1);
        assert_eq!(engine.cache().module_count(COMPONENT), 0);
    }

    #[test]
    fn test_completed_module_ignores_late_blocks() {
        let mut engine = engine();
        let module = download(&mut engine, 1, ModuleInfo::for_test(1, 0, 15), b"hello, carousel");
        assert!(matches!(module, BlockOutcome::Completed(_)));
        assert_eq!(
            engine.handle_module_data(COMPONENT, &ddb(1, 0, 0, b"hello, car")),
            BlockOutcome::Dropped(DropReason::AlreadyCompleted)
        );

        // Counts survive the release of the block slots
        let state = &engine.component_state(COMPONENT).unwrap().modules[&1];
        assert!(state.is_completed());
        assert_eq!(state.block_count(), 2);
        assert_eq!(state.downloaded_block_count(), 2);
    }
}
