//! carousel-receiver: reads an MPEG-TS and writes data carousel
//! notifications as JSON lines.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use clap::Parser;
use log::{debug, error, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use carousel_protocol::{encode_notification, Notification};
use carousel_receiver::config::{self, Args, ConfigFile, Input, Settings};
use carousel_receiver::{logging, CarouselReceiver, ComponentResolver, ModuleCache};

/// Chunks buffered between the reader and the processing loop.
const INPUT_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match config::config_path(&args) {
        Some(path) => match config::load_config(&path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };
    let settings = Settings::merge(args, file_config);

    logging::init_logging(
        &settings.log_dir,
        settings.log_retention_days,
        settings.verbose,
        settings.log_level.as_deref(),
    )?;

    info!("carousel-receiver starting...");
    info!("  Input: {:?}", settings.input);
    if let Some(service_id) = settings.service_id {
        info!("  Service id: {:#06x}", service_id);
    }
    info!(
        "  Supported data component ids: [{}]",
        settings
            .supported_data_component_ids
            .iter()
            .map(|id| format!("{:#06x}", id))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let input: Box<dyn AsyncRead + Unpin + Send> = match &settings.input {
        Input::Stdin => Box::new(tokio::io::stdin()),
        Input::File(path) => Box::new(tokio::fs::File::open(path).await?),
    };
    let output: Box<dyn AsyncWrite + Unpin + Send> = match &settings.output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let (chunk_tx, chunk_rx) = mpsc::channel::<Bytes>(INPUT_CHANNEL_CAPACITY);
    let (notify_tx, notify_rx) = mpsc::unbounded_channel::<Notification>();

    let reader = tokio::spawn(read_input(input, settings.chunk_size, chunk_tx));
    let writer = tokio::spawn(write_notifications(output, notify_rx));

    let resolver = ComponentResolver::new(settings.supported_data_component_ids.clone(), settings.service_id);
    let cache = Arc::new(ModuleCache::new());
    let processor = tokio::task::spawn_blocking(move || process(resolver, cache, chunk_rx, notify_tx));

    let read_result = reader.await?;
    let packets = processor.await?;
    let written = writer.await??;

    info!("Processed {} TS packets, wrote {} notifications", packets, written);
    read_result?;
    Ok(())
}

/// Read the TS input in chunks until EOF or until the processing loop stops.
async fn read_input(
    mut input: Box<dyn AsyncRead + Unpin + Send>,
    chunk_size: usize,
    tx: mpsc::Sender<Bytes>,
) -> std::io::Result<()> {
    loop {
        let mut buf = BytesMut::with_capacity(chunk_size);
        let n = input.read_buf(&mut buf).await?;
        if n == 0 {
            debug!("Input reached EOF");
            return Ok(());
        }
        if tx.send(buf.freeze()).await.is_err() {
            return Ok(());
        }
    }
}

/// Drive the receiver on a blocking thread; returns the packet count.
fn process(
    resolver: ComponentResolver,
    cache: Arc<ModuleCache>,
    mut rx: mpsc::Receiver<Bytes>,
    notify_tx: mpsc::UnboundedSender<Notification>,
) -> u64 {
    let mut receiver = CarouselReceiver::new(resolver, cache, notify_tx);
    while let Some(chunk) = rx.blocking_recv() {
        receiver.feed(&chunk);
    }
    receiver.packets_processed()
}

/// Write each notification as one JSON line; returns the number written.
async fn write_notifications(
    mut output: Box<dyn AsyncWrite + Unpin + Send>,
    mut rx: mpsc::UnboundedReceiver<Notification>,
) -> std::io::Result<u64> {
    let mut written = 0;
    while let Some(notification) = rx.recv().await {
        match encode_notification(&notification) {
            Ok(line) => {
                output.write_all(&line).await?;
                output.flush().await?;
                written += 1;
            }
            Err(e) => error!("Failed to encode notification: {}", e),
        }
    }
    Ok(written)
}
