//! NIP-13 proof-of-work mining.
//!
//! The template is serialized once with a fixed-width placeholder nonce tag.
//! The placeholder is located with [`find_subsequence`] and each attempt
//! overwrites its digits in place before hashing, so the bytes hashed are
//! always exactly the canonical serialization of the final event.

use crate::difficulty::{count_leading_zero_bits, validate_difficulty, NONCE_TAG};
use crate::error::{Error, Result};
use crate::event::{Event, UnsignedEvent};
use crate::hash::{digest_to_hex, sha256, Digest};
use crate::pattern::find_subsequence;

/// Digits in the nonce value. Wide enough for any `u64`.
pub const NONCE_WIDTH: usize = 20;

/// Outcome of one batch of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    /// Winning nonce and its digest, if one was found.
    pub found: Option<(u64, Digest)>,
    /// Attempts made, up to and including the winning one.
    pub attempts: u64,
}

/// A fully mined event together with how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedEvent {
    /// Unsigned event whose id meets the difficulty.
    pub event: Event,
    pub nonce: u64,
    pub leading_zero_bits: u32,
}

/// Progress of a mining session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningStatus {
    /// Not found yet and the budget allows more attempts.
    Searching { attempts: u64 },
    /// A nonce meeting the difficulty was found.
    Found(MinedEvent),
    /// The attempt budget ran out.
    Exhausted { attempts: u64 },
}

/// A prepared template ready for repeated hash attempts.
#[derive(Debug, Clone)]
pub struct MiningJob {
    template: UnsignedEvent,
    difficulty: u32,
    buffer: Vec<u8>,
    nonce_offset: usize,
}

impl MiningJob {
    /// Prepare `template` for mining at `difficulty` leading zero bits.
    ///
    /// Any nonce tag already on the template is replaced.
    pub fn new(mut template: UnsignedEvent, difficulty: u32) -> Result<Self> {
        let difficulty = validate_difficulty(difficulty)?;

        let placeholder = "0".repeat(NONCE_WIDTH);
        template
            .tags
            .retain(|tag| tag.first().map(String::as_str) != Some(NONCE_TAG));
        template.tags.push(vec![
            NONCE_TAG.to_string(),
            placeholder.clone(),
            difficulty.to_string(),
        ]);

        let buffer = template.canonical_json()?.into_bytes();

        // Only a tag can start with `["nonce","`: string contents have
        // their quotes escaped.
        let marker = format!("[\"{}\",\"{}\"", NONCE_TAG, placeholder);
        let start = find_subsequence(&buffer, marker.as_bytes())?.ok_or_else(|| {
            Error::InvalidEvent("nonce placeholder missing from serialization".to_string())
        })?;
        let nonce_offset = start + marker.len() - 1 - NONCE_WIDTH;

        Ok(MiningJob {
            template,
            difficulty,
            buffer,
            nonce_offset,
        })
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Canonical serialization with the placeholder nonce.
    pub fn serialized(&self) -> &[u8] {
        &self.buffer
    }

    /// Byte offset of the nonce digits inside [`serialized`](Self::serialized).
    pub fn nonce_offset(&self) -> usize {
        self.nonce_offset
    }

    /// Hash the serialization with `nonce` written into `buffer`.
    ///
    /// `buffer` must be a copy of [`serialized`](Self::serialized).
    #[inline]
    pub fn attempt(&self, buffer: &mut [u8], nonce: u64) -> Digest {
        write_nonce(
            &mut buffer[self.nonce_offset..self.nonce_offset + NONCE_WIDTH],
            nonce,
        );
        sha256(buffer)
    }

    /// Try `count` consecutive nonces starting at `start`.
    pub fn mine_batch(&self, start: u64, count: u64) -> BatchResult {
        let mut buffer = self.buffer.clone();
        let end = start.saturating_add(count);

        for nonce in start..end {
            let hash = self.attempt(&mut buffer, nonce);
            if count_leading_zero_bits(&hash) >= self.difficulty {
                return BatchResult {
                    found: Some((nonce, hash)),
                    attempts: nonce - start + 1,
                };
            }
        }

        BatchResult {
            found: None,
            attempts: end - start,
        }
    }

    /// Build the final event for a winning nonce.
    ///
    /// The id is recomputed from the event fields and must equal the mined
    /// digest.
    pub fn finish(&self, nonce: u64, digest: &Digest) -> Result<MinedEvent> {
        let mut unsigned = self.template.clone();
        if let Some(tag) = unsigned
            .tags
            .iter_mut()
            .find(|tag| tag.first().map(String::as_str) == Some(NONCE_TAG))
        {
            tag[1] = format_nonce(nonce);
        }

        let event = unsigned.into_event()?;
        if event.id != digest_to_hex(digest) {
            return Err(Error::InvalidEvent(format!(
                "mined digest {} does not match event id {}",
                digest_to_hex(digest),
                event.id
            )));
        }

        Ok(MinedEvent {
            leading_zero_bits: count_leading_zero_bits(digest),
            event,
            nonce,
        })
    }
}

/// Sequential miner with an optional attempt budget.
#[derive(Debug, Clone)]
pub struct MiningSession {
    job: MiningJob,
    next_nonce: u64,
    attempts: u64,
    max_attempts: Option<u64>,
}

impl MiningSession {
    pub fn new(job: MiningJob, max_attempts: Option<u64>) -> Self {
        MiningSession {
            job,
            next_nonce: 0,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Run at most `batch_size` more attempts.
    pub fn step(&mut self, batch_size: u64) -> Result<MiningStatus> {
        let remaining = match self.max_attempts {
            Some(max) => max.saturating_sub(self.attempts),
            None => u64::MAX,
        };
        if remaining == 0 {
            return Ok(MiningStatus::Exhausted {
                attempts: self.attempts,
            });
        }

        let count = batch_size.min(remaining).max(1);
        let result = self.job.mine_batch(self.next_nonce, count);
        self.attempts += result.attempts;
        self.next_nonce = self.next_nonce.saturating_add(result.attempts);

        if let Some((nonce, digest)) = result.found {
            return Ok(MiningStatus::Found(self.job.finish(nonce, &digest)?));
        }
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return Ok(MiningStatus::Exhausted {
                attempts: self.attempts,
            });
        }
        Ok(MiningStatus::Searching {
            attempts: self.attempts,
        })
    }

    /// Step until found or exhausted. Loops forever without a budget if the
    /// difficulty is never met.
    pub fn run(&mut self, batch_size: u64) -> Result<MiningStatus> {
        loop {
            match self.step(batch_size)? {
                MiningStatus::Searching { .. } => continue,
                done => return Ok(done),
            }
        }
    }
}

/// Whether an event's id carries at least `min_difficulty` bits of work.
///
/// When the event commits to a target in its nonce tag, that target must
/// also reach `min_difficulty`.
pub fn verify_pow(event: &Event, min_difficulty: u32) -> Result<bool> {
    event.verify_id()?;
    if event.id_leading_zero_bits()? < min_difficulty {
        return Ok(false);
    }
    Ok(event
        .committed_difficulty()
        .map_or(true, |committed| committed >= min_difficulty))
}

/// Zero-padded decimal rendering of a nonce.
pub fn format_nonce(nonce: u64) -> String {
    format!("{:0width$}", nonce, width = NONCE_WIDTH)
}

fn write_nonce(out: &mut [u8], mut nonce: u64) {
    for slot in out.iter_mut().rev() {
        *slot = b'0' + (nonce % 10) as u8;
        nonce /= 10;
    }
}
