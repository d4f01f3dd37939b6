//! Forward error correction over GF(2^8).
//!
//! A frame is cut into `data_shards` blocks of a fixed size and
//! `fec_shards` parity blocks are computed from them, so that any
//! `data_shards` of the resulting shards are enough to rebuild the frame.
//!
//! ```text
//!   payload ──split/pad──> d0 d1 .. d(k-1)          data shards
//!                          p_i = Σ_j M[i][j]·d_j     parity shards (i < m)
//! ```
//!
//! The generator `M` is either derived as a Cauchy matrix, which is MDS for
//! any shard counts, or supplied as a fixed constant. The fixed form exists
//! because the client's audio decoder expects the exact matrix below for
//! its 4+2 layout; parity from any other matrix parses fine but cannot be
//! used to repair losses.

use crate::error::{FecErrorKind, Result, StreamError};

pub const AUDIO_DATA_SHARDS: usize = 4;
pub const AUDIO_FEC_SHARDS: usize = 2;
pub const AUDIO_TOTAL_SHARDS: usize = AUDIO_DATA_SHARDS + AUDIO_FEC_SHARDS;
pub const AUDIO_MAX_BLOCK_SIZE: usize = 1400;

/// Audio parity rows expected by the client, `AUDIO_FEC_SHARDS` x `AUDIO_DATA_SHARDS`.
pub const AUDIO_FEC_PARITY: [u8; AUDIO_FEC_SHARDS * AUDIO_DATA_SHARDS] =
    [0x77, 0x40, 0x38, 0x0e, 0xc7, 0xa7, 0x0d, 0x6c];

/// Largest shard count GF(2^8) can address.
pub const MAX_TOTAL_SHARDS: usize = 256;

/// x^8 + x^4 + x^3 + x^2 + 1
const GF_POLYNOMIAL: u16 = 0x11d;

struct GfTables {
    exp: [u8; 512],
    log: [u8; 256],
}

impl GfTables {
    const fn build() -> Self {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        let mut i = 0;
        while i < 255 {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= GF_POLYNOMIAL;
            }
            i += 1;
        }
        while i < 512 {
            exp[i] = exp[i - 255];
            i += 1;
        }
        Self { exp, log }
    }
}

static GF: GfTables = GfTables::build();

fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    GF.exp[GF.log[a as usize] as usize + GF.log[b as usize] as usize]
}

fn gf_inv(a: u8) -> u8 {
    debug_assert_ne!(a, 0, "zero has no inverse");
    GF.exp[255 - GF.log[a as usize] as usize]
}

/// `dst ^= coefficient * src`, byte by byte.
fn mul_add(dst: &mut [u8], coefficient: u8, src: &[u8]) {
    if coefficient == 0 {
        return;
    }
    let log_c = GF.log[coefficient as usize] as usize;
    for (d, s) in dst.iter_mut().zip(src) {
        if *s != 0 {
            *d ^= GF.exp[log_c + GF.log[*s as usize] as usize];
        }
    }
}

/// Gauss-Jordan inverse of a row-major `n` x `n` matrix.
fn invert(matrix: &[u8], n: usize) -> Result<Vec<u8>> {
    let mut work = matrix.to_vec();
    let mut inverse = vec![0u8; n * n];
    for i in 0..n {
        inverse[i * n + i] = 1;
    }

    for col in 0..n {
        let pivot = (col..n)
            .find(|&row| work[row * n + col] != 0)
            .ok_or(StreamError::Fec {
                kind: FecErrorKind::SingularMatrix,
            })?;
        if pivot != col {
            for k in 0..n {
                work.swap(pivot * n + k, col * n + k);
                inverse.swap(pivot * n + k, col * n + k);
            }
        }

        let scale = gf_inv(work[col * n + col]);
        for k in 0..n {
            work[col * n + k] = gf_mul(work[col * n + k], scale);
            inverse[col * n + k] = gf_mul(inverse[col * n + k], scale);
        }

        for row in 0..n {
            let factor = work[row * n + col];
            if row == col || factor == 0 {
                continue;
            }
            for k in 0..n {
                work[row * n + k] ^= gf_mul(factor, work[col * n + k]);
                inverse[row * n + k] ^= gf_mul(factor, inverse[col * n + k]);
            }
        }
    }
    Ok(inverse)
}

/// Where the parity rows of the generator come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParityMatrix {
    /// `M[i][j] = 1 / ((k + i) ^ j)`.
    Cauchy,
    /// Row-major `fec_shards` x `data_shards` constant.
    Fixed(Vec<u8>),
}

/// Shard layout of one stream type, fixed for the lifetime of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecConfig {
    pub data_shards: usize,
    pub fec_shards: usize,
    pub max_block_size: usize,
    pub parity: ParityMatrix,
}

impl FecConfig {
    /// Layout with a derived (Cauchy) generator.
    pub fn new(data_shards: usize, fec_shards: usize, max_block_size: usize) -> Self {
        Self {
            data_shards,
            fec_shards,
            max_block_size,
            parity: ParityMatrix::Cauchy,
        }
    }

    /// The client's fixed audio layout: 4 data + 2 parity shards.
    pub fn audio() -> Self {
        Self {
            data_shards: AUDIO_DATA_SHARDS,
            fec_shards: AUDIO_FEC_SHARDS,
            max_block_size: AUDIO_MAX_BLOCK_SIZE,
            parity: ParityMatrix::Fixed(AUDIO_FEC_PARITY.to_vec()),
        }
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.fec_shards
    }

    /// Largest payload one frame can carry.
    pub fn capacity(&self) -> usize {
        self.data_shards * self.max_block_size
    }
}

/// Systematic Reed-Solomon erasure code.
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    data_shards: usize,
    parity_shards: usize,
    /// Row-major `parity_shards` x `data_shards`.
    parity: Vec<u8>,
}

impl ReedSolomon {
    pub fn new(data_shards: usize, parity_shards: usize, matrix: &ParityMatrix) -> Result<Self> {
        if data_shards == 0 || parity_shards == 0 {
            return Err(StreamError::Fec {
                kind: FecErrorKind::ZeroShards,
            });
        }
        let total = data_shards + parity_shards;
        if total > MAX_TOTAL_SHARDS {
            return Err(StreamError::Fec {
                kind: FecErrorKind::TooManyShards { total },
            });
        }

        let parity = match matrix {
            ParityMatrix::Cauchy => (0..parity_shards)
                .flat_map(|i| (0..data_shards).map(move |j| gf_inv(((data_shards + i) ^ j) as u8)))
                .collect(),
            ParityMatrix::Fixed(rows) => {
                let expected = data_shards * parity_shards;
                if rows.len() != expected {
                    return Err(StreamError::Fec {
                        kind: FecErrorKind::MatrixShape {
                            expected,
                            actual: rows.len(),
                        },
                    });
                }
                rows.clone()
            }
        };

        Ok(Self {
            data_shards,
            parity_shards,
            parity,
        })
    }

    pub fn from_config(config: &FecConfig) -> Result<Self> {
        Self::new(config.data_shards, config.fec_shards, &config.parity)
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    fn parity_row(&self, row: usize) -> &[u8] {
        &self.parity[row * self.data_shards..(row + 1) * self.data_shards]
    }

    /// Generator row for shard `index`: a unit row for data shards.
    fn generator_row(&self, index: usize) -> Vec<u8> {
        if index < self.data_shards {
            let mut row = vec![0u8; self.data_shards];
            row[index] = 1;
            row
        } else {
            self.parity_row(index - self.data_shards).to_vec()
        }
    }

    /// Compute the parity shards for `data`, which must hold exactly
    /// `data_shards` equal-length blocks.
    pub fn encode<T: AsRef<[u8]>>(&self, data: &[T]) -> Result<Vec<Vec<u8>>> {
        if data.len() != self.data_shards {
            return Err(StreamError::Fec {
                kind: FecErrorKind::ShardCountMismatch {
                    expected: self.data_shards,
                    actual: data.len(),
                },
            });
        }
        let shard_len = data[0].as_ref().len();
        if data.iter().any(|shard| shard.as_ref().len() != shard_len) {
            return Err(StreamError::Fec {
                kind: FecErrorKind::ShardLengthMismatch,
            });
        }

        let parity = (0..self.parity_shards)
            .map(|row| {
                let mut out = vec![0u8; shard_len];
                for (coefficient, shard) in self.parity_row(row).iter().zip(data) {
                    mul_add(&mut out, *coefficient, shard.as_ref());
                }
                out
            })
            .collect();
        Ok(parity)
    }

    /// Fill in every `None` entry of `shards` (data first, then parity)
    /// from any `data_shards` present ones.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        let total = self.total_shards();
        if shards.len() != total {
            return Err(StreamError::Fec {
                kind: FecErrorKind::ShardCountMismatch {
                    expected: total,
                    actual: shards.len(),
                },
            });
        }

        let present: Vec<usize> = (0..total).filter(|&i| shards[i].is_some()).collect();
        if present.len() < self.data_shards {
            return Err(StreamError::Fec {
                kind: FecErrorKind::TooFewShards {
                    present: present.len(),
                    required: self.data_shards,
                },
            });
        }
        if present.len() == total {
            return Ok(());
        }

        let shard_len = shards[present[0]].as_ref().map_or(0, Vec::len);
        if present
            .iter()
            .any(|&i| shards[i].as_ref().map_or(0, Vec::len) != shard_len)
        {
            return Err(StreamError::Fec {
                kind: FecErrorKind::ShardLengthMismatch,
            });
        }

        let k = self.data_shards;
        let rows = &present[..k];
        let missing_data: Vec<usize> = (0..k).filter(|&i| shards[i].is_none()).collect();

        if !missing_data.is_empty() {
            let sub: Vec<u8> = rows.iter().flat_map(|&r| self.generator_row(r)).collect();
            let decode = invert(&sub, k)?;

            let recovered: Vec<(usize, Vec<u8>)> = missing_data
                .iter()
                .map(|&d| {
                    let mut out = vec![0u8; shard_len];
                    for (j, &r) in rows.iter().enumerate() {
                        if let Some(source) = &shards[r] {
                            mul_add(&mut out, decode[d * k + j], source);
                        }
                    }
                    (d, out)
                })
                .collect();
            for (d, shard) in recovered {
                shards[d] = Some(shard);
            }
        }

        if shards[k..].iter().any(Option::is_none) {
            let data: Vec<&[u8]> = shards[..k]
                .iter()
                .map(|shard| shard.as_deref().unwrap_or(&[]))
                .collect();
            let parity = self.encode(&data)?;
            for (slot, shard) in shards[k..].iter_mut().zip(parity) {
                if slot.is_none() {
                    *slot = Some(shard);
                }
            }
        }
        Ok(())
    }
}

/// One shard as handed to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPacket<'a> {
    pub frame_sequence: u16,
    /// 0-based, data shards first.
    pub index: usize,
    pub total: usize,
    /// Unpadded frame length, for stripping padding after recovery.
    pub payload_len: usize,
    pub data: &'a [u8],
}

/// Data and parity shards of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSet {
    pub frame_sequence: u16,
    pub data_shards: usize,
    pub fec_shards: usize,
    pub shard_size: usize,
    pub payload_len: usize,
    pub shards: Vec<Vec<u8>>,
}

impl ShardSet {
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.fec_shards
    }

    /// Shards in emission order, tagged for the receiver.
    pub fn packets(&self) -> impl Iterator<Item = ShardPacket<'_>> {
        let total = self.total_shards();
        self.shards
            .iter()
            .enumerate()
            .map(move |(index, data)| ShardPacket {
                frame_sequence: self.frame_sequence,
                index,
                total,
                payload_len: self.payload_len,
                data,
            })
    }
}

/// Splits frames into FEC-protected shard sets.
///
/// Stateless: the caller supplies each frame's sequence number and decides
/// emission order, so one packetizer can serve many frames concurrently.
#[derive(Debug, Clone)]
pub struct FecPacketizer {
    config: FecConfig,
    codec: ReedSolomon,
}

impl FecPacketizer {
    pub fn new(config: FecConfig) -> Result<Self> {
        if config.max_block_size == 0 {
            return Err(StreamError::Fec {
                kind: FecErrorKind::ZeroShards,
            });
        }
        let codec = ReedSolomon::from_config(&config)?;
        Ok(Self { config, codec })
    }

    pub fn config(&self) -> &FecConfig {
        &self.config
    }

    /// Shard one frame. Payloads larger than
    /// [`capacity`](FecConfig::capacity) are rejected, never truncated.
    pub fn packetize(&self, frame_sequence: u16, payload: &[u8]) -> Result<ShardSet> {
        let capacity = self.config.capacity();
        if payload.len() > capacity {
            tracing::warn!(
                frame_sequence,
                len = payload.len(),
                capacity,
                "frame too large for shard layout"
            );
            return Err(StreamError::Fec {
                kind: FecErrorKind::PayloadTooLarge {
                    len: payload.len(),
                    capacity,
                },
            });
        }

        let shard_size = self.config.max_block_size;
        let mut shards: Vec<Vec<u8>> = (0..self.config.data_shards)
            .map(|i| {
                let start = (i * shard_size).min(payload.len());
                let end = ((i + 1) * shard_size).min(payload.len());
                let mut block = payload[start..end].to_vec();
                block.resize(shard_size, 0);
                block
            })
            .collect();
        let parity = self.codec.encode(&shards)?;
        shards.extend(parity);

        tracing::trace!(
            frame_sequence,
            payload_len = payload.len(),
            shards = shards.len(),
            "frame sharded"
        );

        Ok(ShardSet {
            frame_sequence,
            data_shards: self.config.data_shards,
            fec_shards: self.config.fec_shards,
            shard_size,
            payload_len: payload.len(),
            shards,
        })
    }

    /// Receiver-side inverse of [`packetize`](Self::packetize): rebuild the
    /// frame from surviving shards and strip the padding.
    pub fn recover(&self, shards: &mut [Option<Vec<u8>>], payload_len: usize) -> Result<Vec<u8>> {
        self.codec.reconstruct(shards)?;
        let mut payload: Vec<u8> = shards[..self.config.data_shards]
            .iter()
            .flatten()
            .flat_map(|shard| shard.iter().copied())
            .collect();
        payload.truncate(payload_len);
        Ok(payload)
    }
}
