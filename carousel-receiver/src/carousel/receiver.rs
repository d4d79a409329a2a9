//! Carousel receiver: routes demultiplexed sections to the component
//! resolver and the reassembly engine and forwards notifications.

use std::sync::Arc;

use carousel_protocol::{EsEventUpdatedMessage, Notification};
use log::{debug, error};

use super::cache::ModuleCache;
use super::component::ComponentResolver;
use super::engine::{decode_module, BlockOutcome, CarouselEngine, CommitOutcome, DecodedModule};
use super::es_event::parse_es_events;
use crate::error::CarouselError;
use crate::sink::NotificationSink;
use crate::ts_analyzer::{DsmccSection, PatTable, PmtTable, SectionDemuxer, SectionEvent};

/// End-to-end receiver for one transport stream.
pub struct CarouselReceiver<S: NotificationSink> {
    demuxer: SectionDemuxer,
    resolver: ComponentResolver,
    engine: CarouselEngine,
    sink: S,
}

impl<S: NotificationSink> CarouselReceiver<S> {
    pub fn new(resolver: ComponentResolver, cache: Arc<ModuleCache>, sink: S) -> Self {
        Self {
            demuxer: SectionDemuxer::new(),
            resolver,
            engine: CarouselEngine::new(cache),
            sink,
        }
    }

    pub fn resolver(&self) -> &ComponentResolver {
        &self.resolver
    }

    pub fn engine(&self) -> &CarouselEngine {
        &self.engine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Total TS packets consumed so far.
    pub fn packets_processed(&self) -> u64 {
        self.demuxer.packets_processed()
    }

    /// Feed raw TS bytes. Partial packets are kept for the next call.
    pub fn feed(&mut self, data: &[u8]) {
        for event in self.demuxer.feed(data) {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: SectionEvent) {
        match event {
            SectionEvent::Pat { table, .. } => self.on_pat(&table),
            SectionEvent::Pmt { pid, table } => self.on_pmt(pid, &table),
            SectionEvent::Dsmcc { pid, section } => self.on_dsmcc(pid, &section),
        }
    }

    pub fn on_pat(&mut self, pat: &PatTable) {
        self.resolver.on_pat(pat);
    }

    pub fn on_pmt(&mut self, pid: u16, pmt: &PmtTable) {
        if let Some(msg) = self.resolver.on_pmt(pid, pmt) {
            self.sink.notify(Notification::Pmt(msg));
        }
    }

    /// Handle a DSM-CC section. Sections on PIDs that do not carry a
    /// supported component are ignored.
    pub fn on_dsmcc(&mut self, pid: u16, section: &DsmccSection) {
        let Some(component_id) = self.resolver.component_for_pid(pid).map(|c| c.component_id) else {
            return;
        };

        match section {
            DsmccSection::DownloadInfoIndication(dii) => {
                if let Some(notification) = self.engine.handle_module_info(component_id, dii) {
                    self.sink.notify(notification);
                }
            }
            DsmccSection::DownloadDataBlock(ddb) => {
                if let BlockOutcome::Completed(module) = self.engine.handle_module_data(component_id, ddb) {
                    let decoded = match decode_module(&module) {
                        Ok(decoded) => decoded,
                        Err(e @ CarouselError::ParseFailure { .. }) => {
                            error!("{}", e);
                            DecodedModule::unparsed(&module)
                        }
                        Err(e) => {
                            error!("{}", e);
                            return;
                        }
                    };
                    match self.engine.commit(decoded) {
                        CommitOutcome::Published(notification) => self.sink.notify(notification),
                        outcome => debug!(
                            "Component {:#04x} module {:#06x}: {:?}",
                            component_id, module.module_id, outcome
                        ),
                    }
                }
            }
            DsmccSection::StreamDescriptors(descriptors) => {
                self.sink.notify(Notification::EsEventUpdated(EsEventUpdatedMessage {
                    component_id,
                    events: parse_es_events(descriptors),
                    data_event_id: descriptors.data_event_id,
                }));
            }
        }
    }
}
