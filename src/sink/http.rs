use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::atom::{Atom, AtomValue};
use crate::config::HttpSinkConfig;

use super::{Sink, SinkError};

const SINK_NAME: &str = "http";

/// JSON line sent for one atom.
#[derive(Debug, Clone, Serialize)]
pub struct AtomJson {
    pub atom: &'static str,
    pub reported_at: String,
    pub fields: Vec<FieldJson>,
}

/// One named atom value.
#[derive(Debug, Clone, Serialize)]
pub struct FieldJson {
    pub name: &'static str,
    pub value: AtomValue,
}

impl AtomJson {
    fn from_atom(atom: &Atom, now: DateTime<Utc>) -> Self {
        Self {
            atom: atom.kind().as_str(),
            reported_at: format_datetime(now),
            fields: atom
                .fields()
                .map(|(name, value)| FieldJson {
                    name,
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

/// Batches atoms and POSTs them as NDJSON.
///
/// `report` only enqueues; a background task owns batching and requests.
pub struct HttpSink {
    cfg: HttpSinkConfig,
    tx: parking_lot::Mutex<Option<mpsc::Sender<AtomJson>>>,
    cancel: parking_lot::Mutex<Option<CancellationToken>>,
}

impl HttpSink {
    pub fn new(cfg: HttpSinkConfig) -> Self {
        Self {
            cfg,
            tx: parking_lot::Mutex::new(None),
            cancel: parking_lot::Mutex::new(None),
        }
    }

    /// Spawns the batching task. Must run inside a tokio runtime.
    pub fn start(&self, ctx: CancellationToken) -> Result<()> {
        if self.cfg.max_queue_size == 0 {
            bail!("http max_queue_size must be positive");
        }
        if self.cfg.workers == 0 {
            bail!("http workers must be positive");
        }

        let (tx, mut rx) = mpsc::channel::<AtomJson>(self.cfg.max_queue_size);
        *self.tx.lock() = Some(tx);
        *self.cancel.lock() = Some(ctx.clone());

        let cfg = Arc::new(self.cfg.clone());
        let client = reqwest::Client::builder()
            .timeout(cfg.export_timeout)
            .build()
            .context("building HTTP client")?;
        let semaphore = Arc::new(Semaphore::new(cfg.workers));

        tokio::spawn(async move {
            let batch_size = cfg.batch_size.max(1);
            let mut batch = Vec::with_capacity(batch_size);
            let mut in_flight = tokio::task::JoinSet::new();
            let mut interval = tokio::time::interval(cfg.batch_timeout);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        while let Ok(item) = rx.try_recv() {
                            batch.push(item);
                        }
                        for items in batch.chunks(batch_size) {
                            spawn_send_batch(
                                &mut in_flight,
                                client.clone(),
                                Arc::clone(&cfg),
                                Arc::clone(&semaphore),
                                items.to_vec(),
                            );
                        }
                        break;
                    }

                    item = rx.recv() => {
                        let Some(item) = item else {
                            let items = std::mem::take(&mut batch);
                            spawn_send_batch(
                                &mut in_flight,
                                client.clone(),
                                Arc::clone(&cfg),
                                Arc::clone(&semaphore),
                                items,
                            );
                            break;
                        };

                        batch.push(item);
                        if batch.len() >= batch_size {
                            let items =
                                std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                            spawn_send_batch(
                                &mut in_flight,
                                client.clone(),
                                Arc::clone(&cfg),
                                Arc::clone(&semaphore),
                                items,
                            );
                        }
                    }

                    _ = interval.tick() => {
                        if !batch.is_empty() {
                            let items =
                                std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                            spawn_send_batch(
                                &mut in_flight,
                                client.clone(),
                                Arc::clone(&cfg),
                                Arc::clone(&semaphore),
                                items,
                            );
                        }
                    }

                    joined = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Some(Err(e)) = joined {
                            tracing::debug!(error = %e, "HTTP sink worker join failed");
                        }
                    }
                }
            }

            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    tracing::debug!(error = %e, "HTTP sink worker join failed");
                }
            }
        });

        tracing::info!(
            address = %self.cfg.address,
            compression = %self.cfg.compression,
            workers = self.cfg.workers,
            "HTTP sink started",
        );

        Ok(())
    }

    /// Stops accepting atoms and flushes what is queued.
    pub fn stop(&self) {
        self.tx.lock().take();

        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }
}

impl Sink for HttpSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn report(&self, atom: &Atom) -> Result<(), SinkError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(SinkError::NotStarted { sink: SINK_NAME });
        };

        tx.try_send(AtomJson::from_atom(atom, Utc::now()))
            .map_err(|_| SinkError::QueueFull { sink: SINK_NAME })
    }
}

fn spawn_send_batch(
    in_flight: &mut tokio::task::JoinSet<()>,
    client: reqwest::Client,
    cfg: Arc<HttpSinkConfig>,
    semaphore: Arc<Semaphore>,
    items: Vec<AtomJson>,
) {
    if items.is_empty() {
        return;
    }

    in_flight.spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(error = %e, "HTTP sink semaphore closed");
                return;
            }
        };

        if let Err(e) = send_batch(&client, &cfg, &items).await {
            tracing::warn!(error = %e, atoms = items.len(), "HTTP sink request failed");
        }
    });
}

/// Sends one batch of atoms via HTTP.
async fn send_batch(
    client: &reqwest::Client,
    cfg: &HttpSinkConfig,
    items: &[AtomJson],
) -> Result<()> {
    let body = encode_ndjson(items)?;
    let raw_len = body.len();

    let compressed = compress(&body, &cfg.compression).context("compressing NDJSON data")?;

    let mut request = client
        .post(&cfg.address)
        .header("Content-Type", "application/x-ndjson")
        .body(compressed);

    if let Some(encoding) = content_encoding(&cfg.compression) {
        request = request.header("Content-Encoding", encoding);
    }

    for (k, v) in &cfg.headers {
        request = request.header(k.as_str(), v.as_str());
    }

    let resp = request.send().await.context("sending HTTP sink request")?;

    let status = resp.status();
    // Drain body for connection reuse.
    let _ = resp.bytes().await;

    if !status.is_success() {
        bail!("HTTP sink unexpected status: {status}");
    }

    tracing::debug!(atoms = items.len(), bytes = raw_len, "sent atom batch");

    Ok(())
}

/// Serializes items as newline-delimited JSON.
fn encode_ndjson(items: &[AtomJson]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(items.len() * 192);
    for item in items {
        serde_json::to_writer(&mut buf, item).context("serializing atom to JSON")?;
        buf.push(b'\n');
    }
    Ok(buf)
}

// --- Compression ---

/// Compresses data using the specified algorithm.
fn compress(data: &[u8], algorithm: &str) -> Result<Vec<u8>> {
    match algorithm {
        "none" | "" => Ok(data.to_vec()),
        "gzip" => {
            use flate2::write::GzEncoder;
            use flate2::Compression;

            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).context("gzip write")?;
            encoder.finish().context("gzip finish")
        }
        "zlib" => {
            use flate2::write::ZlibEncoder;
            use flate2::Compression;

            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).context("zlib write")?;
            encoder.finish().context("zlib finish")
        }
        other => bail!("unsupported compression: {other}"),
    }
}

/// Returns the Content-Encoding header value for the algorithm.
fn content_encoding(algorithm: &str) -> Option<&'static str> {
    match algorithm {
        "gzip" => Some("gzip"),
        "zlib" => Some("deflate"),
        _ => None,
    }
}

fn format_datetime(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
