//! Stream adapter: consumes partitioned message streams into the index
//!
//! Each partition is owned by one [`PartitionConsumer`] holding an exclusive
//! lock file and an offset sidecar under the index root, so a restarted
//! consumer resumes right after the last ingested message.

use crate::index::SearchIndex;
use crate::sidecar::{lock_path, offset_path, OffsetSidecar, PartitionLock, OFFSET_FIRST};
use crate::{BlackrockError, Envelope, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default wait for a single fetch
pub const DEFAULT_POLL: Duration = Duration::from_millis(100);

/// Global document id for a stream position
pub fn message_id(partition: u32, offset: i64) -> u64 {
    ((partition as u64) << 56) | (offset as u64 & ((1 << 56) - 1))
}

/// A message read from a partition
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub partition: u32,
    pub offset: i64,
    /// Encoded [`Envelope`]
    pub bytes: Vec<u8>,
}

/// Result of one fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Message(Message),
    /// Nothing arrived before the timeout
    Idle,
    /// The stream ended
    Closed,
}

/// One partition of an ordered message stream
pub trait MessageStream: Send {
    fn partition(&self) -> u32;

    /// Position the stream so the next fetch returns `offset`, or the oldest
    /// message for [`OFFSET_FIRST`]
    fn seek(&mut self, offset: i64) -> Result<()>;

    /// Next message, waiting at most `timeout`
    fn fetch(&mut self, timeout: Duration) -> Result<Fetched>;
}

// ============================================================================
// In-memory stream
// ============================================================================

#[derive(Default)]
struct LogState {
    messages: Vec<Vec<u8>>,
    closed: bool,
}

#[derive(Default)]
struct LogShared {
    state: Mutex<LogState>,
    arrived: Condvar,
}

/// Append-only in-memory partition; offsets are positions in the log
#[derive(Clone, Default)]
pub struct MemoryLog {
    shared: Arc<LogShared>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, returning its offset
    pub fn publish(&self, bytes: Vec<u8>) -> i64 {
        let mut state = self.shared.state.lock();
        state.messages.push(bytes);
        self.shared.arrived.notify_all();
        state.messages.len() as i64 - 1
    }

    /// Encode and append an envelope
    pub fn publish_envelope(&self, envelope: &Envelope) -> Result<i64> {
        Ok(self.publish(envelope.encode()?))
    }

    /// End the stream once readers drain it
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.arrived.notify_all();
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A reader positioned at the oldest message
    pub fn stream(&self, partition: u32) -> MemoryStream {
        MemoryStream {
            partition,
            log: self.clone(),
            position: 0,
        }
    }
}

/// Reader over a [`MemoryLog`]
pub struct MemoryStream {
    partition: u32,
    log: MemoryLog,
    position: usize,
}

impl MessageStream for MemoryStream {
    fn partition(&self) -> u32 {
        self.partition
    }

    fn seek(&mut self, offset: i64) -> Result<()> {
        self.position = if offset == OFFSET_FIRST {
            0
        } else {
            usize::try_from(offset)
                .map_err(|_| BlackrockError::Config(format!("invalid stream offset {}", offset)))?
        };
        Ok(())
    }

    fn fetch(&mut self, timeout: Duration) -> Result<Fetched> {
        let shared = &self.log.shared;
        let mut state = shared.state.lock();
        if self.position >= state.messages.len() && !state.closed {
            shared.arrived.wait_for(&mut state, timeout);
        }

        if let Some(bytes) = state.messages.get(self.position) {
            let message = Message {
                partition: self.partition,
                offset: self.position as i64,
                bytes: bytes.clone(),
            };
            self.position += 1;
            return Ok(Fetched::Message(message));
        }
        if state.closed {
            Ok(Fetched::Closed)
        } else {
            Ok(Fetched::Idle)
        }
    }
}

// ============================================================================
// Partition consumer
// ============================================================================

/// Lifecycle of a [`PartitionConsumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Unlocked,
    Locked,
    Reading,
    Failed,
    Closed,
}

/// Counters reported when a consumer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub ingested: u64,
    /// Envelopes rejected by validation
    pub dropped: u64,
    /// Offset of the last message handled
    pub last_offset: Option<i64>,
}

/// Drives one partition from its stream into the index
pub struct PartitionConsumer<S: MessageStream> {
    index: Arc<SearchIndex>,
    stream: S,
    state: ConsumerState,
    lock: Option<PartitionLock>,
    sidecar: Option<OffsetSidecar>,
    poll: Duration,
    stats: ConsumerStats,
}

impl<S: MessageStream> PartitionConsumer<S> {
    pub fn new(index: Arc<SearchIndex>, stream: S) -> Self {
        Self {
            index,
            stream,
            state: ConsumerState::Unlocked,
            lock: None,
            sidecar: None,
            poll: DEFAULT_POLL,
            stats: ConsumerStats::default(),
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn partition(&self) -> u32 {
        self.stream.partition()
    }

    /// Take the partition lock, open the sidecar and seek past the last
    /// ingested offset
    pub fn start(&mut self) -> Result<()> {
        let root = self.index.root().to_path_buf();
        let partition = self.partition();

        self.lock = Some(PartitionLock::acquire(lock_path(&root, partition))?);
        self.state = ConsumerState::Locked;

        let result = self.resume(&root, partition);
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn resume(&mut self, root: &std::path::Path, partition: u32) -> Result<()> {
        let sidecar = OffsetSidecar::open(offset_path(root, partition))?;
        let stored = sidecar.read_or_default(OFFSET_FIRST)?;
        let next = if stored == OFFSET_FIRST { OFFSET_FIRST } else { stored + 1 };
        self.stream.seek(next)?;
        self.sidecar = Some(sidecar);
        self.state = ConsumerState::Reading;

        info!("Partition {} reading from offset {}", partition, next);
        Ok(())
    }

    /// Fetch and ingest at most one message; `false` once the stream closed
    pub fn poll_once(&mut self) -> Result<bool> {
        if self.state != ConsumerState::Reading {
            return Ok(false);
        }
        let result = match self.stream.fetch(self.poll) {
            Ok(Fetched::Message(message)) => self.handle(message).map(|_| true),
            Ok(Fetched::Idle) => Ok(true),
            Ok(Fetched::Closed) => Ok(false),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn handle(&mut self, message: Message) -> Result<()> {
        let mut envelope = Envelope::decode(&message.bytes)?;
        if let Some(metadata) = envelope.metadata.as_mut() {
            metadata.id = message_id(message.partition, message.offset);
        }

        match self.index.ingest(envelope) {
            Ok(_) => self.stats.ingested += 1,
            Err(e) if e.is_validation() => {
                warn!(
                    "Dropping message {}@{}: {}",
                    message.partition, message.offset, e
                );
                self.stats.dropped += 1;
            }
            Err(e) => return Err(e),
        }

        if let Some(sidecar) = &self.sidecar {
            sidecar.set(message.offset)?;
        }
        self.stats.last_offset = Some(message.offset);
        Ok(())
    }

    /// Release everything but keep reporting `Failed`
    fn fail(&mut self) {
        self.state = ConsumerState::Failed;
        self.close();
    }

    /// Release the sidecar and the lock
    pub fn close(&mut self) {
        if let Some(sidecar) = self.sidecar.take() {
            if let Err(e) = sidecar.sync() {
                warn!("Failed to sync {:?}: {}", sidecar.path(), e);
            }
        }
        self.lock = None;
        if self.state != ConsumerState::Failed {
            self.state = ConsumerState::Closed;
        }
    }

    /// Consume until the stream closes or `shutdown` fires
    pub fn run(mut self, shutdown: &Receiver<()>) -> Result<ConsumerStats> {
        self.start()?;
        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }
            if !self.poll_once()? {
                break;
            }
        }
        self.close();
        info!(
            "Partition {} stopped: {} ingested, {} dropped",
            self.partition(),
            self.stats.ingested,
            self.stats.dropped
        );
        Ok(self.stats)
    }
}

// ============================================================================
// Consumer group
// ============================================================================

/// One consumer thread per partition sharing a shutdown signal
pub struct ConsumerGroup {
    shutdown: Option<Sender<()>>,
    workers: Vec<(u32, JoinHandle<Result<ConsumerStats>>)>,
}

impl ConsumerGroup {
    pub fn spawn<S>(index: Arc<SearchIndex>, streams: Vec<S>, poll: Duration) -> Result<Self>
    where
        S: MessageStream + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        let mut workers = Vec::with_capacity(streams.len());

        for stream in streams {
            let partition = stream.partition();
            let consumer = PartitionConsumer::new(index.clone(), stream).with_poll(poll);
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("blackrock-partition-{}", partition))
                .spawn(move || {
                    let result = consumer.run(&rx);
                    if let Err(e) = &result {
                        error!("Partition {} failed: {}", partition, e);
                    }
                    result
                })?;
            workers.push((partition, handle));
        }

        info!("Started consumer group with {} partitions", workers.len());
        Ok(Self {
            shutdown: Some(tx),
            workers,
        })
    }

    /// Signal every consumer to stop and collect their results
    pub fn shutdown(mut self) -> Vec<(u32, Result<ConsumerStats>)> {
        self.shutdown.take();
        self.join()
    }

    /// Wait for every stream to close on its own
    pub fn wait(mut self) -> Vec<(u32, Result<ConsumerStats>)> {
        self.join()
    }

    fn join(&mut self) -> Vec<(u32, Result<ConsumerStats>)> {
        self.workers
            .drain(..)
            .map(|(partition, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(BlackrockError::Config(format!(
                        "consumer thread for partition {} panicked",
                        partition
                    )))
                });
                (partition, result)
            })
            .collect()
    }
}

impl Drop for ConsumerGroup {
    fn drop(&mut self) {
        self.shutdown.take();
        self.join();
    }
}
