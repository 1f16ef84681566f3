// src/io/serial/framer.rs
//
// TF-Luna frame decoding.
//
// Frame layout (9 bytes, little-endian pairs):
//   [0x59][0x59][dist_lo][dist_hi][amp_lo][amp_hi][temp_lo][temp_hi][sum8]
//
// Malformed input is never an error. A bad header is skipped up to the next
// header candidate, a short buffer is left alone until more bytes arrive.

use crate::checksums::validate_trailing_sum8;
use crate::io::now_ms;
use crate::io::types::Measurement;

// =============================================================================
// Protocol Constants
// =============================================================================

pub const FRAME_LEN: usize = 9;
pub const HEADER_BYTE: u8 = 0x59;

/// Fixed calibration offset of the sensor family
const TEMP_OFFSET_C: f64 = 256.0;
const TEMP_DIVISOR: f64 = 8.0;

// =============================================================================
// Types
// =============================================================================

/// Checksum policy for byte 8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Byte 8 is passed through unchecked
    #[default]
    Ignore,
    /// Byte 8 must be the Sum8 of bytes 0..=7; failing frames resync like a bad header
    Sum8,
}

/// Result of one decode attempt at the front of a buffer
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeStep {
    /// A full frame was decoded from the first `FRAME_LEN` bytes
    Frame(Measurement),
    /// The first `n` bytes cannot start a frame and should be dropped
    Skip(usize),
    /// Fewer than `FRAME_LEN` bytes; nothing consumed
    NeedMore,
}

// =============================================================================
// Stateless Decoding
// =============================================================================

/// Decode the frame at the front of `buf`, if any.
pub fn decode_step(buf: &[u8], policy: ChecksumPolicy, captured_at_millis: u64) -> DecodeStep {
    if buf.len() < FRAME_LEN {
        return DecodeStep::NeedMore;
    }

    let frame = &buf[..FRAME_LEN];
    let header_ok = frame[0] == HEADER_BYTE && frame[1] == HEADER_BYTE;
    let checksum_ok = match policy {
        ChecksumPolicy::Ignore => true,
        ChecksumPolicy::Sum8 => validate_trailing_sum8(frame),
    };

    if !header_ok {
        return DecodeStep::Skip(resync_offset(buf));
    }
    if !checksum_ok {
        // Header looked right but the frame is bad; the next header may sit inside it
        return DecodeStep::Skip(1);
    }

    let distance_cm = u16::from_le_bytes([frame[2], frame[3]]);
    let signal_strength = u16::from_le_bytes([frame[4], frame[5]]);
    let raw_temp = u16::from_le_bytes([frame[6], frame[7]]);

    DecodeStep::Frame(Measurement {
        distance_cm,
        signal_strength,
        temperature_c: f64::from(raw_temp) / TEMP_DIVISOR - TEMP_OFFSET_C,
        captured_at_millis,
    })
}

/// Decode a single read as the reference reader does: the read either is a
/// frame or is dropped whole.
pub fn decode_frame(buf: &[u8], policy: ChecksumPolicy, captured_at_millis: u64) -> Option<Measurement> {
    match decode_step(buf, policy, captured_at_millis) {
        DecodeStep::Frame(m) => Some(m),
        DecodeStep::Skip(_) | DecodeStep::NeedMore => None,
    }
}

/// Number of leading bytes that cannot start a frame.
/// Always at least 1, so a corrupted first byte is never retried.
fn resync_offset(buf: &[u8]) -> usize {
    buf.iter()
        .skip(1)
        .position(|&b| b == HEADER_BYTE)
        .map(|p| p + 1)
        .unwrap_or(buf.len())
}

// =============================================================================
// Stateful Decoder
// =============================================================================

/// Scanning decoder that keeps unconsumed bytes between calls.
///
/// Used for byte-at-a-time decoding and for carry mode, where a frame torn
/// across two serial reads is reassembled instead of lost.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    policy: ChecksumPolicy,
    discarded: u64,
}

impl FrameDecoder {
    pub fn new(policy: ChecksumPolicy) -> Self {
        FrameDecoder {
            buffer: Vec::with_capacity(FRAME_LEN * 4),
            policy,
            discarded: 0,
        }
    }

    /// Feed bytes, timestamping decoded frames with the host clock.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Measurement> {
        self.feed_at(data, now_ms())
    }

    /// Feed bytes with an explicit decode timestamp.
    pub fn feed_at(&mut self, data: &[u8], captured_at_millis: u64) -> Vec<Measurement> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        let mut pos = 0;
        loop {
            match decode_step(&self.buffer[pos..], self.policy, captured_at_millis) {
                DecodeStep::Frame(m) => {
                    frames.push(m);
                    pos += FRAME_LEN;
                }
                DecodeStep::Skip(n) => {
                    self.discarded += n as u64;
                    pos += n;
                }
                DecodeStep::NeedMore => break,
            }
        }
        self.buffer.drain(..pos);

        // A trailing run with no header candidate can never become a frame
        if !self.buffer.is_empty() && !self.buffer.contains(&HEADER_BYTE) {
            self.discarded += self.buffer.len() as u64;
            self.buffer.clear();
        }

        frames
    }

    /// Bytes currently held waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes dropped while resynchronising
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
