//! Responder driver: serve one dummy file per requested stream.
//!
//! 1. Accept a connection.
//! 2. Wait for the client's stream request (`n` streams).
//! 3. Send `file_size` bytes on each of streams `0..n`, round-robin, each
//!    stream using its own randomly chosen frame size.  The last frame of a
//!    stream carries the fin flag.
//! 4. Keep receiving until the client closes the connection.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use rand::Rng;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::event::Event;
use crate::state::{ConnectionState, Role};

/// Outcome of one served connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReport {
    pub streams: u32,
    pub bytes_sent: usize,
    pub packets_acked: usize,
    pub elapsed: Duration,
}

impl fmt::Display for ServerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Served {} stream(s)", self.streams)?;
        writeln!(f, "  bytes sent:    {}", self.bytes_sent)?;
        writeln!(f, "  packets acked: {}", self.packets_acked)?;
        write!(f, "  elapsed:       {:.3}s", self.elapsed.as_secs_f64())
    }
}

/// Per-stream progress through its dummy file.
struct FileCursor {
    stream_id: u64,
    remaining: usize,
    frame_size: usize,
    done: bool,
}

/// Bind `config.bind` and serve a single client.
pub async fn run(config: ServerConfig) -> Result<ServerReport> {
    config.validate()?;
    let mut conn = Connection::new(Role::Responder);
    conn.bind(config.bind).await?;
    serve(conn, &config).await
}

/// Serve a single client on an already bound responder connection.
pub async fn serve(mut conn: Connection, config: &ServerConfig) -> Result<ServerReport> {
    config.validate()?;
    conn.accept_connection().await?;

    let mut packets_acked = 0usize;
    let num_streams = loop {
        conn.receive_step().await?;
        let mut requested = None;
        for event in conn.drain_events() {
            match event {
                Event::StreamRequest { num_streams } => requested = Some(num_streams),
                Event::AckReceived { .. } => packets_acked += 1,
                Event::StreamDataReceived { stream_id, .. } => {
                    log::debug!("ignoring client data on stream {stream_id}");
                }
            }
        }
        if let Some(n) = requested {
            break n;
        }
        if conn.state() != ConnectionState::Established {
            bail!("client closed before requesting streams");
        }
    };

    if num_streams as usize > config.max_streams() {
        // The client is blocked waiting for data until it sees a FIN.
        conn.close().await?;
        bail!(
            "client requested {num_streams} streams; at most {} fit a datagram batch",
            config.max_streams()
        );
    }
    log::info!("client requested {num_streams} file(s)");

    let mut files: Vec<FileCursor> = {
        let mut rng = rand::rng();
        (0..u64::from(num_streams))
            .map(|stream_id| FileCursor {
                stream_id,
                remaining: config.file_size,
                frame_size: rng.random_range(config.min_frame..=config.max_frame),
                done: false,
            })
            .collect()
    };
    conn.open_streams(files.iter().map(|f| f.stream_id));

    let start = Instant::now();
    let mut bytes_sent = 0usize;
    while files.iter().any(|f| !f.done) && conn.state() == ConnectionState::Established {
        for file in files.iter_mut().filter(|f| !f.done) {
            let chunk = file.frame_size.min(file.remaining);
            file.remaining -= chunk;
            file.done = file.remaining == 0;

            conn.send(file.stream_id, vec![b'a'; chunk], file.done).await?;
            bytes_sent += chunk;
            packets_acked += count_acks(&mut conn);

            if conn.state() != ConnectionState::Established {
                break;
            }
        }
    }

    if conn.state() == ConnectionState::Established {
        conn.flush().await?;
        packets_acked += count_acks(&mut conn);
        log::info!("file transfer completed; waiting for client to close");
    }

    while conn.state() == ConnectionState::Established {
        conn.receive_step().await?;
        packets_acked += count_acks(&mut conn);
    }

    Ok(ServerReport {
        streams: num_streams,
        bytes_sent,
        packets_acked,
        elapsed: start.elapsed(),
    })
}

fn count_acks(conn: &mut Connection) -> usize {
    conn.drain_events()
        .filter(|e| matches!(e, Event::AckReceived { .. }))
        .count()
}
