//! Bidirectional copy between the front and back connections of a session
//!
//! Each direction runs in its own task and reports exactly one terminal
//! outcome. A direction that ends, on end-of-stream or error, shuts down the
//! write side of its destination so the far end sees EOF, but never
//! interrupts the opposite direction. Both connections are closed only after
//! both tasks have finished.

use std::fmt;
use std::future::Future;
use std::io;

use chrono::{DateTime, Local};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::format::format_bytes;
use crate::session::{DirectionLabels, SessionContext};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FrontToBack,
    BackToFront,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrontToBack => f.write_str("front->back"),
            Self::BackToFront => f.write_str("back->front"),
        }
    }
}

/// Terminal status of one copy direction
#[derive(Debug)]
pub struct DirectionOutcome {
    pub direction: Direction,
    /// Bytes written to the destination, including those written before an error
    pub bytes: u64,
    pub error: Option<io::Error>,
    pub finished_at: DateTime<Local>,
}

impl DirectionOutcome {
    fn new(direction: Direction, bytes: u64, error: Option<io::Error>) -> Self {
        Self {
            direction,
            bytes,
            error,
            finished_at: Local::now(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Final record of a finished session
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: u64,
    pub front_to_back: DirectionOutcome,
    pub back_to_front: DirectionOutcome,
}

/// Establish the back connection and relay.
///
/// If `connect` fails no copy is started; the front connection is shut down
/// and dropped, and the connect error is handed back to the caller after
/// being logged.
pub async fn run_session<F, B, E, C>(
    ctx: SessionContext,
    mut front: F,
    connect: C,
) -> Result<SessionReport, E>
where
    F: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: fmt::Display,
    C: Future<Output = Result<B, E>>,
{
    let back = match connect.await {
        Ok(back) => back,
        Err(e) => {
            error!(
                session_id = ctx.session_id,
                peer = %ctx.peer_addr,
                "Connection to {} failed: {}",
                ctx.target,
                e
            );
            if let Err(e) = front.shutdown().await {
                debug!(session_id = ctx.session_id, "Front shutdown failed: {}", e);
            }
            drop(front);
            info!(
                session_id = ctx.session_id,
                "Connection with {} closed", ctx.peer_addr
            );
            return Err(e);
        }
    };

    info!(
        session_id = ctx.session_id,
        peer = %ctx.peer_addr,
        "Connected to {}",
        ctx.target
    );

    Ok(relay(ctx, front, back).await)
}

/// Copy bytes between `front` and `back` until both directions have ended.
///
/// I/O errors end the affected direction and show up in the report; they are
/// never returned to the caller.
pub async fn relay<F, B>(ctx: SessionContext, front: F, back: B) -> SessionReport
where
    F: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!(
        session_id = ctx.session_id,
        peer = %ctx.peer_addr,
        identity = %ctx.identity,
        target = %ctx.target,
        "Session started"
    );

    let (front_read, front_write) = tokio::io::split(front);
    let (back_read, back_write) = tokio::io::split(back);

    let front_to_back = spawn_direction(
        ctx.clone(),
        Direction::FrontToBack,
        front_read,
        back_write,
    );
    let back_to_front = spawn_direction(
        ctx.clone(),
        Direction::BackToFront,
        back_read,
        front_write,
    );

    let (front_to_back, back_to_front) = tokio::join!(front_to_back, back_to_front);
    let (front_to_back, front_read, back_write) =
        collect_direction(&ctx, Direction::FrontToBack, front_to_back);
    let (back_to_front, back_read, front_write) =
        collect_direction(&ctx, Direction::BackToFront, back_to_front);

    close_connection(&ctx, "front", front_read, front_write).await;
    close_connection(&ctx, "back", back_read, back_write).await;

    info!(
        session_id = ctx.session_id,
        identity = %ctx.identity,
        "Connection with {} closed",
        ctx.peer_addr
    );

    SessionReport {
        session_id: ctx.session_id,
        front_to_back,
        back_to_front,
    }
}

type DirectionResult<R, W> = (DirectionOutcome, ReadHalf<R>, WriteHalf<W>);

fn spawn_direction<R, W>(
    ctx: SessionContext,
    direction: Direction,
    reader: ReadHalf<R>,
    writer: WriteHalf<W>,
) -> JoinHandle<DirectionResult<R, W>>
where
    R: AsyncRead + Send + 'static,
    W: AsyncWrite + Send + 'static,
{
    tokio::spawn(async move {
        let (outcome, reader, writer) = copy_direction(direction, reader, writer).await;
        log_outcome(&ctx, &outcome);
        (outcome, reader, writer)
    })
}

async fn copy_direction<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
) -> (DirectionOutcome, R, W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut bytes = 0u64;

    let error = loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(e),
        };

        // Count every accepted write so a failure mid-chunk keeps the partial total
        let mut offset = 0;
        let write_error = loop {
            if offset == n {
                break None;
            }
            match writer.write(&buffer[offset..n]).await {
                Ok(0) => break Some(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(written) => {
                    offset += written;
                    bytes += written as u64;
                }
                Err(e) => break Some(e),
            }
        };
        if let Some(e) = write_error {
            break Some(e);
        }
        if let Err(e) = writer.flush().await {
            break Some(e);
        }
    };

    // Propagate the end of this direction so the far end can finish its side
    let shutdown = writer.shutdown().await;
    let error = match (error, shutdown) {
        (Some(e), _) => Some(e),
        (None, Err(e)) if e.kind() != io::ErrorKind::NotConnected => Some(e),
        (None, _) => None,
    };

    (DirectionOutcome::new(direction, bytes, error), reader, writer)
}

fn collect_direction<R, W>(
    ctx: &SessionContext,
    direction: Direction,
    joined: Result<DirectionResult<R, W>, tokio::task::JoinError>,
) -> (DirectionOutcome, Option<ReadHalf<R>>, Option<WriteHalf<W>>) {
    match joined {
        Ok((outcome, reader, writer)) => (outcome, Some(reader), Some(writer)),
        Err(e) => {
            // The halves went down with the task
            error!(
                session_id = ctx.session_id,
                %direction,
                "Copy task failed: {}",
                e
            );
            let error = io::Error::other(e.to_string());
            (DirectionOutcome::new(direction, 0, Some(error)), None, None)
        }
    }
}

async fn close_connection<T>(
    ctx: &SessionContext,
    side: &str,
    reader: Option<ReadHalf<T>>,
    writer: Option<WriteHalf<T>>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (Some(reader), Some(writer)) = (reader, writer) else {
        return;
    };

    let mut stream = reader.unsplit(writer);
    if let Err(e) = stream.shutdown().await {
        debug!(
            session_id = ctx.session_id,
            "Shutdown of {} connection failed: {}", side, e
        );
    }
}

fn log_outcome(ctx: &SessionContext, outcome: &DirectionOutcome) {
    let label = direction_label(&ctx.labels, outcome.direction);

    if let Some(e) = &outcome.error {
        warn!(
            session_id = ctx.session_id,
            peer = %ctx.peer_addr,
            identity = %ctx.identity,
            direction = %outcome.direction,
            "{} failed: {}",
            label,
            e
        );
    }

    info!(
        session_id = ctx.session_id,
        peer = %ctx.peer_addr,
        identity = %ctx.identity,
        direction = %outcome.direction,
        bytes = outcome.bytes,
        "{}",
        outcome_message(&ctx.labels, outcome)
    );
}

/// `HH:MM:SS - <label>: <size>`
fn outcome_message(labels: &DirectionLabels, outcome: &DirectionOutcome) -> String {
    format!(
        "{} - {}: {}",
        outcome.finished_at.format("%H:%M:%S"),
        direction_label(labels, outcome.direction),
        format_bytes(outcome.bytes)
    )
}

fn direction_label(labels: &DirectionLabels, direction: Direction) -> &'static str {
    match direction {
        Direction::FrontToBack => labels.front_to_back,
        Direction::BackToFront => labels.back_to_front,
    }
}
