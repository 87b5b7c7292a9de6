//! In-process transport for tests and single-host simulation.
//!
//! [`LocalGroup`] wires `world_size` [`LocalTransport`]s together with tokio
//! channels. Each collective is tagged with its operation name and a per-rank
//! sequence number, so interleaved collectives never mix their messages as
//! long as every rank issues them in the same order.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use embshard_core::{RankInfo, Result, ShardingError};
use embshard_tensor::{NdArrayTensor, Tensor};

use crate::awaitable::Awaitable;
use crate::transport::{check_destinations, Payload, Transport};

const ALL_TO_ALL: &str = "all_to_all";
const REDUCE_SCATTER: &str = "reduce_scatter";

#[derive(Debug)]
enum Body {
    Chunks(Vec<Payload>),
    Dense(NdArrayTensor),
}

#[derive(Debug)]
struct Envelope {
    op: &'static str,
    seq: u64,
    src: usize,
    body: Body,
}

type Key = (&'static str, u64, usize);

/// Sequence numbers of one operation that are complete or abandoned.
///
/// Every seq below `floor` is retired; `above` holds retired seqs that
/// finished ahead of an older round.
#[derive(Debug, Default)]
struct Retired {
    floor: u64,
    above: HashSet<u64>,
}

impl Retired {
    fn contains(&self, seq: u64) -> bool {
        seq < self.floor || self.above.contains(&seq)
    }

    fn insert(&mut self, seq: u64) {
        if seq < self.floor {
            return;
        }
        self.above.insert(seq);
        while self.above.remove(&self.floor) {
            self.floor += 1;
        }
    }
}

struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    pending: HashMap<Key, Body>,
    retired: HashMap<&'static str, Retired>,
}

impl Inbox {
    fn new(rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            rx,
            pending: HashMap::new(),
            retired: HashMap::new(),
        }
    }

    fn is_retired(&self, op: &'static str, seq: u64) -> bool {
        self.retired.get(op).is_some_and(|r| r.contains(seq))
    }

    async fn take(&mut self, op: &'static str, seq: u64, src: usize) -> Result<Body> {
        if let Some(body) = self.pending.remove(&(op, seq, src)) {
            return Ok(body);
        }
        loop {
            let envelope = self.rx.recv().await.ok_or_else(|| {
                ShardingError::transport(op, "all peers disconnected from the group")
            })?;
            if envelope.op == op && envelope.seq == seq && envelope.src == src {
                return Ok(envelope.body);
            }
            if self.is_retired(envelope.op, envelope.seq) {
                debug!(
                    op = envelope.op,
                    seq = envelope.seq,
                    src = envelope.src,
                    "dropping message of a retired round"
                );
                continue;
            }
            self.pending
                .insert((envelope.op, envelope.seq, envelope.src), envelope.body);
        }
    }

    /// Marks round `(op, seq)` finished and drops whatever is still buffered
    /// for it. Returns how many buffered messages were dropped.
    fn retire(&mut self, op: &'static str, seq: u64) -> usize {
        self.retired.entry(op).or_default().insert(seq);
        let before = self.pending.len();
        let retired = &self.retired;
        self.pending.retain(|&(o, s, _), _| {
            o != op || !retired.get(o).is_some_and(|r| r.contains(s))
        });
        before - self.pending.len()
    }
}

/// Builds the transports of an in-process group.
pub struct LocalGroup;

impl LocalGroup {
    /// Creates one connected transport per rank, without a collective timeout.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(world_size: usize) -> Result<Vec<LocalTransport>> {
        Self::with_timeout(world_size, None)
    }

    /// Creates one connected transport per rank.
    ///
    /// When `timeout` is set, waiting on a collective longer than that fails
    /// with a transport error instead of blocking forever.
    pub fn with_timeout(
        world_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<LocalTransport>> {
        if world_size == 0 {
            return Err(ShardingError::config("world_size must be positive"));
        }
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..world_size).map(|_| mpsc::unbounded_channel()).unzip();
        let senders = Arc::new(senders);
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| {
                Ok(LocalTransport {
                    rank_info: RankInfo::new(rank, world_size)?,
                    peers: senders.clone(),
                    inbox: Arc::new(tokio::sync::Mutex::new(Inbox::new(rx))),
                    sequence: Mutex::new(HashMap::new()),
                    timeout,
                })
            })
            .collect()
    }
}

/// One rank's endpoint of a [`LocalGroup`].
pub struct LocalTransport {
    rank_info: RankInfo,
    peers: Arc<Vec<mpsc::UnboundedSender<Envelope>>>,
    inbox: Arc<tokio::sync::Mutex<Inbox>>,
    sequence: Mutex<HashMap<&'static str, u64>>,
    timeout: Option<Duration>,
}

impl LocalTransport {
    fn next_seq(&self, op: &'static str) -> u64 {
        let mut sequence = self.sequence.lock();
        let seq = sequence.entry(op).or_insert(0);
        let current = *seq;
        *seq += 1;
        current
    }

    fn send(&self, op: &'static str, seq: u64, dst: usize, body: Body) -> Result<()> {
        let envelope = Envelope {
            op,
            seq,
            src: self.rank_info.rank(),
            body,
        };
        self.peers[dst]
            .send(envelope)
            .map_err(|_| ShardingError::transport(op, format!("rank {dst} has left the group")))
    }

    /// Returns a future collecting one message of `(op, seq)` from every rank,
    /// ordered by source rank.
    fn gather(
        &self,
        op: &'static str,
        seq: u64,
    ) -> impl std::future::Future<Output = Result<Vec<Body>>> + Send + 'static {
        let inbox = self.inbox.clone();
        let world_size = self.rank_info.world_size();
        let rank = self.rank_info.rank();
        let timeout = self.timeout;
        async move {
            let collect = async {
                let mut inbox = inbox.lock().await;
                let mut bodies = Vec::with_capacity(world_size);
                for src in 0..world_size {
                    bodies.push(inbox.take(op, seq, src).await?);
                }
                inbox.retire(op, seq);
                Ok(bodies)
            };
            match timeout {
                None => collect.await,
                Some(limit) => match tokio::time::timeout(limit, collect).await {
                    Ok(result) => result,
                    Err(_) => {
                        let dropped = inbox.lock().await.retire(op, seq);
                        warn!(rank, op, seq, dropped, "collective timed out after {:?}", limit);
                        Err(ShardingError::transport(
                            op,
                            format!("timed out after {limit:?} waiting for peers"),
                        ))
                    }
                },
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    fn rank_info(&self) -> RankInfo {
        self.rank_info
    }

    fn all_to_all(&self, sends: Vec<Vec<Payload>>) -> Result<Awaitable<Vec<Vec<Payload>>>> {
        check_destinations(ALL_TO_ALL, &sends, self.rank_info.world_size())?;
        let seq = self.next_seq(ALL_TO_ALL);
        debug!(
            rank = self.rank_info.rank(),
            seq,
            buffers = sends.iter().map(Vec::len).sum::<usize>(),
            "issuing all_to_all"
        );
        for (dst, chunks) in sends.into_iter().enumerate() {
            self.send(ALL_TO_ALL, seq, dst, Body::Chunks(chunks))?;
        }

        let gathered = self.gather(ALL_TO_ALL, seq);
        Ok(Awaitable::new(ALL_TO_ALL, async move {
            gathered
                .await?
                .into_iter()
                .enumerate()
                .map(|(src, body)| match body {
                    Body::Chunks(chunks) => Ok(chunks),
                    Body::Dense(_) => Err(ShardingError::exchange(
                        ALL_TO_ALL,
                        format!("rank {src} sent a dense tensor"),
                    )),
                })
                .collect()
        }))
    }

    fn reduce_scatter(&self, input: NdArrayTensor) -> Result<Awaitable<NdArrayTensor>> {
        let world_size = self.rank_info.world_size();
        if input.ndim() != 2 {
            return Err(ShardingError::invalid_input(format!(
                "reduce_scatter expects a 2-D input, got shape {:?}",
                input.shape()
            )));
        }
        let blocks = input.split_rows(world_size)?;
        let own_shape = blocks[0].shape().to_vec();
        let seq = self.next_seq(REDUCE_SCATTER);
        debug!(
            rank = self.rank_info.rank(),
            seq,
            shape = ?input.shape(),
            "issuing reduce_scatter"
        );
        for (dst, block) in blocks.into_iter().enumerate() {
            self.send(REDUCE_SCATTER, seq, dst, Body::Dense(block))?;
        }

        let gathered = self.gather(REDUCE_SCATTER, seq);
        Ok(Awaitable::new(REDUCE_SCATTER, async move {
            let mut sum = NdArrayTensor::zeros(&own_shape);
            for (src, body) in gathered.await?.into_iter().enumerate() {
                let block = match body {
                    Body::Dense(block) => block,
                    Body::Chunks(_) => {
                        return Err(ShardingError::exchange(
                            REDUCE_SCATTER,
                            format!("rank {src} sent sparse buffers"),
                        ))
                    }
                };
                if block.shape() != own_shape.as_slice() {
                    return Err(ShardingError::exchange(
                        REDUCE_SCATTER,
                        format!(
                            "rank {src} contributed a block of shape {:?}, expected {:?}",
                            block.shape(),
                            own_shape
                        ),
                    ));
                }
                sum.add_assign(&block)?;
            }
            Ok(sum)
        }))
    }
}
