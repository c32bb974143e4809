use crate::types::{RawSample, Vector3};

/// Frame marker at the start of every packet.
pub const MAGIC: u16 = 0xBA41;
/// `u16 magic | u32 timestamp | 6 x f32`, all big-endian.
pub const PACKET_SIZE: usize = 2 + 4 + 6 * 4;

/// Compact the accumulator once this many consumed bytes sit in front of the cursor.
const COMPACT_THRESHOLD: usize = 4096;

/// Streaming decoder for the sensor's fixed-size telemetry packets.
///
/// Feed raw bytes via `push_data`, then drain parsed samples via
/// `next_sample` or `samples`. Bytes that do not start with [`MAGIC`] are
/// dropped one at a time until the stream lines up again.
///
/// Resync cost: every failed probe advances a read cursor by one byte, so
/// skipping `k` garbage bytes is `O(k)` header comparisons. Consumed bytes
/// are compacted out of the accumulator in bulk, which keeps the copy cost
/// amortised `O(1)` per byte instead of the `O(n)` shift per dropped byte
/// that a slice-and-shift buffer would pay.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    buffer: Vec<u8>,
    cursor: usize,
    dropped: u64,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(8192),
            cursor: 0,
            dropped: 0,
        }
    }

    /// Append received bytes to the internal buffer.
    pub fn push_data(&mut self, data: &[u8]) {
        if self.cursor >= COMPACT_THRESHOLD {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract the next complete sample from the buffer.
    /// Returns `None` once fewer than [`PACKET_SIZE`] bytes remain.
    pub fn next_sample(&mut self) -> Option<RawSample> {
        let skipped_before = self.dropped;

        while self.pending() >= PACKET_SIZE {
            let window = &self.buffer[self.cursor..self.cursor + PACKET_SIZE];
            if u16::from_be_bytes([window[0], window[1]]) != MAGIC {
                self.cursor += 1;
                self.dropped += 1;
                continue;
            }

            let sample = decode_packet(window);
            self.cursor += PACKET_SIZE;

            if self.dropped != skipped_before {
                tracing::trace!(
                    skipped = self.dropped - skipped_before,
                    "Resynchronised on packet header"
                );
            }
            return Some(sample);
        }

        if self.cursor == self.buffer.len() {
            self.buffer.clear();
            self.cursor = 0;
        }
        None
    }

    /// Lazily decode every complete packet currently buffered.
    pub fn samples(&mut self) -> Samples<'_> {
        Samples { decoder: self }
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Total bytes discarded while searching for a header.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }
}

/// Iterator returned by [`PacketDecoder::samples`].
pub struct Samples<'a> {
    decoder: &'a mut PacketDecoder,
}

impl Iterator for Samples<'_> {
    type Item = RawSample;

    fn next(&mut self) -> Option<RawSample> {
        self.decoder.next_sample()
    }
}

/// Decode a packet whose header has already been validated.
fn decode_packet(packet: &[u8]) -> RawSample {
    let word = |offset: usize| -> [u8; 4] {
        [
            packet[offset],
            packet[offset + 1],
            packet[offset + 2],
            packet[offset + 3],
        ]
    };
    let f = |offset: usize| -> f64 { f32::from_be_bytes(word(offset)) as f64 };

    // Layout after the header: [t, ax, ay, az, gx, gy, gz]
    RawSample {
        timestamp_ms: u32::from_be_bytes(word(2)),
        accel: Vector3::new(f(6), f(10), f(14)),
        gyro: Vector3::new(f(18), f(22), f(26)),
    }
}

/// Serialise a sample in the firmware's wire format.
///
/// Vector components are narrowed to `f32`.
pub fn encode_packet(sample: &RawSample) -> [u8; PACKET_SIZE] {
    let mut packet = [0u8; PACKET_SIZE];
    packet[0..2].copy_from_slice(&MAGIC.to_be_bytes());
    packet[2..6].copy_from_slice(&sample.timestamp_ms.to_be_bytes());

    let values = sample
        .accel
        .to_array()
        .into_iter()
        .chain(sample.gyro.to_array());
    for (i, v) in values.enumerate() {
        let offset = 6 + i * 4;
        packet[offset..offset + 4].copy_from_slice(&(v as f32).to_be_bytes());
    }
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: u32, accel: [f64; 3], gyro: [f64; 3]) -> RawSample {
        RawSample {
            timestamp_ms: t,
            accel: accel.into(),
            gyro: gyro.into(),
        }
    }

    /// A few packets with assorted garbage between and around them.
    fn noisy_stream() -> (Vec<u8>, Vec<RawSample>) {
        let expected = vec![
            sample(1000, [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]),
            sample(1010, [0.5, -0.25, 2.0], [10.0, -3.5, 0.125]),
            sample(1020, [-1.0, 4.0, 0.75], [250.0, 1.0, -90.0]),
        ];

        let mut bytes = vec![0x00, 0xBA];
        bytes.extend_from_slice(&encode_packet(&expected[0]));
        bytes.extend_from_slice(&[0x41, 0xFF, 0xBA, 0x13]);
        bytes.extend_from_slice(&encode_packet(&expected[1]));
        bytes.extend_from_slice(&encode_packet(&expected[2]));
        bytes.extend_from_slice(&[0xBA, 0x41, 0x00]);

        (bytes, expected)
    }

    #[test]
    fn parse_single_packet() {
        let expected = sample(42, [1.0, 2.0, 3.0], [4.0, 5.0, 6.0]);
        let mut decoder = PacketDecoder::new();
        decoder.push_data(&encode_packet(&expected));

        assert_eq!(decoder.next_sample(), Some(expected));
        assert!(decoder.next_sample().is_none());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn wire_layout_is_big_endian() {
        let packet = encode_packet(&sample(0x0102_0304, [1.0, 0.0, 0.0], [0.0; 3]));

        assert_eq!(packet.len(), 30);
        assert_eq!(&packet[..6], &[0xBA, 0x41, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&packet[6..10], &1.0f32.to_be_bytes());
    }

    #[test]
    fn skips_exactly_the_leading_garbage() {
        let expected = sample(7, [0.125, 0.25, -0.5], [-1.0, -2.0, -3.0]);

        for k in 0..40 {
            let mut bytes: Vec<u8> = (0..k).map(|i| (i * 7 + 3) as u8).collect();
            // never let garbage form a header
            for b in bytes.iter_mut() {
                if *b == 0xBA {
                    *b = 0;
                }
            }
            bytes.extend_from_slice(&encode_packet(&expected));

            let mut decoder = PacketDecoder::new();
            decoder.push_data(&bytes);
            let decoded: Vec<_> = decoder.samples().collect();

            assert_eq!(decoded, vec![expected], "k = {k}");
            assert_eq!(decoder.dropped_bytes(), k as u64, "k = {k}");
        }
    }

    #[test]
    fn parse_fragmented_data() {
        let expected = sample(5, [0.5, -0.5, 0.25], [9.75, 0.0, 0.0]);
        let packet = encode_packet(&expected);
        let mid = packet.len() / 2;

        let mut decoder = PacketDecoder::new();

        decoder.push_data(&packet[..mid]);
        assert!(decoder.next_sample().is_none());
        assert_eq!(decoder.pending(), mid);

        decoder.push_data(&packet[mid..]);
        assert_eq!(decoder.next_sample(), Some(expected));
    }

    #[test]
    fn split_point_does_not_change_output() {
        let (bytes, expected) = noisy_stream();

        let mut whole = PacketDecoder::new();
        whole.push_data(&bytes);
        let reference: Vec<_> = whole.samples().collect();
        assert_eq!(reference, expected);

        for split in 0..=bytes.len() {
            let mut decoder = PacketDecoder::new();
            decoder.push_data(&bytes[..split]);
            let mut decoded: Vec<_> = decoder.samples().collect();
            decoder.push_data(&bytes[split..]);
            decoded.extend(decoder.samples());

            assert_eq!(decoded, reference, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_feed() {
        let (bytes, expected) = noisy_stream();
        let mut decoder = PacketDecoder::new();
        let mut decoded = Vec::new();

        for b in &bytes {
            decoder.push_data(std::slice::from_ref(b));
            decoded.extend(decoder.samples());
        }

        assert_eq!(decoded, expected);
    }

    #[test]
    fn trailing_partial_packet_is_retained() {
        let (bytes, _) = noisy_stream();
        let mut decoder = PacketDecoder::new();
        decoder.push_data(&bytes);
        decoder.samples().count();

        // The trailing `BA 41 00` is shorter than a packet and stays buffered.
        assert_eq!(decoder.pending(), 3);
    }

    #[test]
    fn survives_buffer_compaction() {
        let mut bytes = Vec::new();
        for t in 0..1000u32 {
            bytes.push(0x55);
            bytes.extend_from_slice(&encode_packet(&sample(t, [t as f64, 0.0, 0.0], [0.0; 3])));
        }

        let mut decoder = PacketDecoder::new();
        let mut count = 0;
        for chunk in bytes.chunks(7) {
            decoder.push_data(chunk);
            for decoded in decoder.samples() {
                assert_eq!(decoded.timestamp_ms, count);
                count += 1;
            }
        }

        assert_eq!(count, 1000);
        assert_eq!(decoder.dropped_bytes(), 1000);
        assert_eq!(decoder.pending(), 0);
    }
}
