//! Variable-batch all-to-all of bucketized sparse features.
//!
//! The exchange runs in two rounds. Round 1 sends every destination a small
//! header: the sender's batch size, which kinds carry weights, and how many
//! ids of each feature are bound for that destination. Once the headers are
//! in, every receiver knows the exact shape of what it will get, and round 2
//! moves the lengths, ids and weights themselves.
//!
//! Received data is regrouped feature-major (`[feature][origin rank][example]`)
//! and tagged with the per-origin batch sizes.

use tracing::debug;

use embshard_core::{JaggedFeatures, Result, ShardingError, SparseFeatures};

use crate::awaitable::Awaitable;
use crate::bucketize::BucketizedFeatures;
use crate::transport::{Payload, SharedTransport};

const OP: &str = "all_to_all";
const HEADER_FIXED: usize = 3;

/// The two feature kinds, in wire order.
const KINDS: usize = 2;

/// What one origin rank announced in round 1.
#[derive(Debug, Clone, PartialEq)]
struct Header {
    batch_size: usize,
    weighted: [bool; KINDS],
    counts: [Vec<usize>; KINDS],
}

impl Header {
    fn encode(&self) -> Payload {
        let mut out = Vec::with_capacity(HEADER_FIXED + self.counts[0].len() + self.counts[1].len());
        out.push(self.batch_size as i64);
        out.extend(self.weighted.iter().map(|&w| i64::from(w)));
        for counts in &self.counts {
            out.extend(counts.iter().map(|&c| c as i64));
        }
        Payload::I64(out)
    }

    fn decode(src: usize, chunks: Vec<Payload>, num_features: [usize; KINDS]) -> Result<Self> {
        let [payload]: [Payload; 1] = chunks.try_into().map_err(|chunks: Vec<Payload>| {
            ShardingError::exchange(
                OP,
                format!("rank {src} sent {} header buffers, expected 1", chunks.len()),
            )
        })?;
        let raw = payload.into_i64(OP)?;
        let expected = HEADER_FIXED + num_features[0] + num_features[1];
        if raw.len() != expected {
            return Err(ShardingError::exchange(
                OP,
                format!(
                    "rank {src} sent a header of {} values, expected {expected}",
                    raw.len()
                ),
            ));
        }
        if raw.iter().any(|&v| v < 0) {
            return Err(ShardingError::exchange(
                OP,
                format!("rank {src} sent a header with negative counts"),
            ));
        }
        let split = HEADER_FIXED + num_features[0];
        Ok(Self {
            batch_size: raw[0] as usize,
            weighted: [raw[1] != 0, raw[2] != 0],
            counts: [
                raw[HEADER_FIXED..split].iter().map(|&c| c as usize).collect(),
                raw[split..].iter().map(|&c| c as usize).collect(),
            ],
        })
    }
}

/// One origin rank's contribution of a single feature kind.
#[derive(Debug)]
struct Part {
    batch_size: usize,
    lengths: Vec<u32>,
    ids: Vec<i64>,
    weights: Option<Vec<f32>>,
    feature_offsets: Vec<usize>,
}

/// All-to-all of bucketized sparse features between workers of different batch sizes.
pub struct SparseFeaturesAllToAll {
    transport: SharedTransport,
    keys: [Vec<String>; KINDS],
}

impl SparseFeaturesAllToAll {
    /// Creates the exchange for the given id-list and id-score-list keys.
    ///
    /// A kind with no keys is never sent.
    pub fn new(
        transport: SharedTransport,
        id_list_keys: Vec<String>,
        id_score_list_keys: Vec<String>,
    ) -> Self {
        Self {
            transport,
            keys: [id_list_keys, id_score_list_keys],
        }
    }

    /// Issues round 1 of the exchange.
    ///
    /// Awaiting the outer handle completes round 1 and issues round 2;
    /// awaiting the inner handle yields the features owned by this worker.
    /// Every kind with configured keys must be supplied, with a bucket per rank.
    pub fn forward(
        &self,
        id_list: Option<BucketizedFeatures>,
        id_score_list: Option<BucketizedFeatures>,
        batch_size: usize,
    ) -> Result<Awaitable<Awaitable<SparseFeatures>>> {
        let world_size = self.transport.rank_info().world_size();
        let kinds = [id_list, id_score_list];
        for (k, kind) in kinds.iter().enumerate() {
            match kind {
                Some(_) if self.keys[k].is_empty() => {
                    return Err(ShardingError::out_of_range(
                        "features supplied for a kind with no configured features",
                    ))
                }
                Some(b) if b.num_features() != self.keys[k].len() => {
                    return Err(ShardingError::out_of_range(format!(
                        "{} features bucketized, {} configured",
                        b.num_features(),
                        self.keys[k].len()
                    )))
                }
                Some(b) if b.num_buckets() != world_size || b.batch_size() != batch_size => {
                    return Err(ShardingError::invalid_input(format!(
                        "bucketized into {} buckets of batch {}, expected {world_size} of batch {batch_size}",
                        b.num_buckets(),
                        b.batch_size()
                    )))
                }
                None if !self.keys[k].is_empty() => {
                    return Err(ShardingError::out_of_range(format!(
                        "{} configured features are missing from the input",
                        self.keys[k].len()
                    )))
                }
                _ => {}
            }
        }

        let weighted = [0, 1].map(|k| kinds[k].as_ref().is_some_and(|b| b.weights().is_some()));
        let headers: Vec<Vec<Payload>> = (0..world_size)
            .map(|dst| {
                let counts = [0, 1].map(|k| {
                    kinds[k]
                        .as_ref()
                        .map(|b| b.feature_bucket_counts(dst))
                        .unwrap_or_default()
                });
                vec![Header {
                    batch_size,
                    weighted,
                    counts,
                }
                .encode()]
            })
            .collect();
        let round1 = self.transport.all_to_all(headers)?;

        let transport = self.transport.clone();
        let keys = self.keys.clone();
        Ok(Awaitable::new("sparse_all_to_all", async move {
            let num_features = [keys[0].len(), keys[1].len()];
            let peer_headers = round1
                .wait()
                .await?
                .into_iter()
                .enumerate()
                .map(|(src, chunks)| Header::decode(src, chunks, num_features))
                .collect::<Result<Vec<_>>>()?;
            debug!(
                rank = transport.rank_info().rank(),
                batch_size_per_rank = ?peer_headers.iter().map(|h| h.batch_size).collect::<Vec<_>>(),
                "sparse all_to_all headers received"
            );

            let sends = (0..world_size)
                .map(|dst| {
                    let mut chunks = Vec::new();
                    for b in kinds.iter().flatten() {
                        chunks.push(Payload::U32(b.bucket_lengths(dst).to_vec()));
                        chunks.push(Payload::I64(b.bucket_ids(dst).to_vec()));
                        if let Some(w) = b.bucket_weights(dst) {
                            chunks.push(Payload::F32(w.to_vec()));
                        }
                    }
                    chunks
                })
                .collect();
            let round2 = transport.all_to_all(sends)?;
            Ok(round2.map(move |received| assemble(&keys, &peer_headers, received)))
        }))
    }
}

fn assemble(
    keys: &[Vec<String>; KINDS],
    headers: &[Header],
    received: Vec<Vec<Payload>>,
) -> Result<SparseFeatures> {
    let mut parts: [Vec<Part>; KINDS] = [Vec::new(), Vec::new()];
    for (src, chunks) in received.into_iter().enumerate() {
        let header = &headers[src];
        let mut chunks = chunks.into_iter();
        for k in 0..KINDS {
            if keys[k].is_empty() {
                continue;
            }
            let mut next = || {
                chunks.next().ok_or_else(|| {
                    ShardingError::exchange(OP, format!("rank {src} sent too few buffers"))
                })
            };
            let lengths = next()?.into_u32(OP)?;
            let ids = next()?.into_i64(OP)?;
            let weights = if header.weighted[k] {
                Some(next()?.into_f32(OP)?)
            } else {
                None
            };
            parts[k].push(validate_part(src, header, k, lengths, ids, weights)?);
        }
        if chunks.next().is_some() {
            return Err(ShardingError::exchange(
                OP,
                format!("rank {src} sent unexpected extra buffers"),
            ));
        }
    }

    let batch_size_per_rank: Vec<usize> = headers.iter().map(|h| h.batch_size).collect();
    let [list_parts, score_parts] = parts;
    let id_list = recat(&keys[0], list_parts, &batch_size_per_rank)?;
    let id_score_list = recat(&keys[1], score_parts, &batch_size_per_rank)?;
    Ok(SparseFeatures::new(id_list, id_score_list))
}

fn validate_part(
    src: usize,
    header: &Header,
    kind: usize,
    lengths: Vec<u32>,
    ids: Vec<i64>,
    weights: Option<Vec<f32>>,
) -> Result<Part> {
    let counts = &header.counts[kind];
    let expected_lengths = counts.len() * header.batch_size;
    if lengths.len() != expected_lengths {
        return Err(ShardingError::exchange(
            OP,
            format!(
                "rank {src} sent {} lengths, expected {expected_lengths}",
                lengths.len()
            ),
        ));
    }
    let mut feature_offsets = Vec::with_capacity(counts.len() + 1);
    feature_offsets.push(0);
    for (f, &count) in counts.iter().enumerate() {
        let per_feature = &lengths[f * header.batch_size..(f + 1) * header.batch_size];
        let total: usize = per_feature.iter().map(|&l| l as usize).sum();
        if total != count {
            return Err(ShardingError::exchange(
                OP,
                format!("rank {src} announced {count} ids for feature {f}, lengths sum to {total}"),
            ));
        }
        feature_offsets.push(feature_offsets[f] + count);
    }
    let announced = feature_offsets[counts.len()];
    if ids.len() != announced || weights.as_ref().is_some_and(|w| w.len() != announced) {
        return Err(ShardingError::exchange(
            OP,
            format!(
                "rank {src} announced {announced} ids, sent {} ids and {} weights",
                ids.len(),
                weights.as_ref().map_or(0, Vec::len)
            ),
        ));
    }
    Ok(Part {
        batch_size: header.batch_size,
        lengths,
        ids,
        weights,
        feature_offsets,
    })
}

/// Regroups per-origin parts into one feature-major batch.
fn recat(
    keys: &[String],
    parts: Vec<Part>,
    batch_size_per_rank: &[usize],
) -> Result<Option<JaggedFeatures>> {
    if keys.is_empty() {
        return Ok(None);
    }
    let weighted = parts.first().is_some_and(|p| p.weights.is_some());
    if parts.iter().any(|p| p.weights.is_some() != weighted) {
        return Err(ShardingError::exchange(
            OP,
            "ranks disagree on whether features carry weights",
        ));
    }

    let stride: usize = batch_size_per_rank.iter().sum();
    let total: usize = parts.iter().map(|p| p.ids.len()).sum();
    let mut lengths = Vec::with_capacity(keys.len() * stride);
    let mut ids = Vec::with_capacity(total);
    let mut weights = Vec::with_capacity(if weighted { total } else { 0 });
    for f in 0..keys.len() {
        for part in &parts {
            let b = part.batch_size;
            lengths.extend_from_slice(&part.lengths[f * b..(f + 1) * b]);
            let range = part.feature_offsets[f]..part.feature_offsets[f + 1];
            ids.extend_from_slice(&part.ids[range.clone()]);
            if let Some(w) = &part.weights {
                weights.extend_from_slice(&w[range]);
            }
        }
    }

    let features = if weighted {
        JaggedFeatures::with_weights(keys.to_vec(), ids, lengths, weights)?
    } else {
        JaggedFeatures::new(keys.to_vec(), ids, lengths)?
    };
    features
        .with_stride_per_rank(batch_size_per_rank.to_vec())
        .map(Some)
}
