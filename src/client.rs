//! Initiator driver: request streams, collect them, report statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::event::Event;
use crate::state::{ConnectionState, Role};

/// What the client received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientReport {
    /// Bytes received per stream id.
    pub per_stream: BTreeMap<u64, usize>,
    /// Time from the stream request until the last stream finished.
    pub elapsed: Duration,
}

impl ClientReport {
    pub fn total_bytes(&self) -> usize {
        self.per_stream.values().sum()
    }

    /// Throughput in MiB/s over [`elapsed`](Self::elapsed).
    pub fn throughput_mib(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total_bytes() as f64 / (1024.0 * 1024.0) / secs
    }
}

impl fmt::Display for ClientReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Received {} stream(s)", self.per_stream.len())?;
        for (id, bytes) in &self.per_stream {
            writeln!(f, "  stream {id}: {bytes} bytes")?;
        }
        writeln!(f, "  total:      {} bytes", self.total_bytes())?;
        writeln!(f, "  elapsed:    {:.3}s", self.elapsed.as_secs_f64())?;
        write!(f, "  throughput: {:.2} MiB/s", self.throughput_mib())
    }
}

/// Connect to `config.server`, receive `config.streams` streams, then close.
pub async fn run(config: ClientConfig) -> Result<ClientReport> {
    let mut conn = Connection::new(Role::Initiator);
    conn.connect(config.server).await?;
    log::info!(
        "connected to {} (connection id {})",
        config.server,
        conn.connection_id()
    );

    conn.request_streams(config.streams).await?;
    let start = Instant::now();
    let mut report = ClientReport::default();

    while conn.closed_stream_count() < config.streams as usize {
        if conn.state() != ConnectionState::Established {
            bail!(
                "server closed after {} of {} streams finished",
                conn.closed_stream_count(),
                config.streams
            );
        }

        conn.receive_step().await?;
        for event in conn.drain_events() {
            match event {
                Event::StreamDataReceived {
                    stream_id,
                    data,
                    end_of_stream,
                } => {
                    log::debug!("received {} bytes on stream {stream_id}", data.len());
                    *report.per_stream.entry(stream_id).or_default() += data.len();
                    if end_of_stream {
                        log::info!("stream {stream_id} finished");
                    }
                }
                other => log::debug!("ignoring {other:?}"),
            }
        }
    }
    report.elapsed = start.elapsed();

    conn.close().await?;
    Ok(report)
}
