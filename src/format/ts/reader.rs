use super::parser::TSPacketParser;
use super::types::{TsPacket, TS_PACKET_SIZE, TS_SYNC_BYTE};
use bytes::{Buf, BytesMut};
use log::{debug, trace};

/// How far past a lost sync byte the reader scans in one attempt.
pub const RESYNC_WINDOW: usize = 4 * TS_PACKET_SIZE;

/// Counters describing what the reader had to throw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub packets: u64,
    pub dropped_packets: u64,
    pub skipped_bytes: u64,
    pub resyncs: u64,
}

/// Slices an unbounded byte feed into transport packets.
///
/// Input may arrive in reads of any size; an incomplete tail is kept until
/// the next [`feed`](Self::feed). When the sync byte is not where the previous
/// packet said it would be, the reader scans forward for a position that has
/// a sync byte both there and one packet later. The very first packet of the
/// input may instead be confirmed by such a position within the window after
/// it, so garbage right behind it does not cost the packet. Packets that fail the
/// structural checks in [`TSPacketParser::parse_packet`] are dropped.
/// Nothing here ever returns an error.
pub struct PacketReader {
    parser: TSPacketParser,
    buffer: BytesMut,
    synced: bool,
    flushing: bool,
    stats: ReaderStats,
}

impl PacketReader {
    pub fn new() -> Self {
        Self {
            parser: TSPacketParser::new(),
            buffer: BytesMut::with_capacity(TS_PACKET_SIZE * 64),
            synced: false,
            flushing: false,
            stats: ReaderStats::default(),
        }
    }

    /// Appends `data` and returns the packets that are now complete.
    ///
    /// The iterator is lazy: packets are cut from the buffer as it is
    /// advanced, and whatever it does not consume stays buffered.
    pub fn feed(&mut self, data: &[u8]) -> Packets<'_> {
        self.buffer.extend_from_slice(data);
        Packets { reader: self }
    }

    /// Signals end of input. Packets still buffered are released without the
    /// look-ahead confirmation used during resync; a partial tail is dropped.
    pub fn finish(&mut self) -> Packets<'_> {
        self.flushing = true;
        Packets { reader: self }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    fn next_packet(&mut self) -> Option<TsPacket> {
        loop {
            if self.buffer.len() < TS_PACKET_SIZE {
                if self.flushing && !self.buffer.is_empty() {
                    self.stats.skipped_bytes += self.buffer.len() as u64;
                    trace!("dropping {} byte partial packet at end of input", self.buffer.len());
                    self.buffer.clear();
                }
                return None;
            }

            if !self.synced || self.buffer[0] != TS_SYNC_BYTE {
                match self.resync() {
                    Resync::Synced => {}
                    Resync::Skipped => continue,
                    Resync::NeedMore if self.flushing => {
                        // no more input will come to complete the candidate
                        self.stats.skipped_bytes += self.buffer.len() as u64;
                        self.buffer.clear();
                        return None;
                    }
                    Resync::NeedMore => return None,
                }
            }

            let raw = self.buffer.split_to(TS_PACKET_SIZE).freeze();
            match self.parser.parse_packet(raw) {
                Ok(packet) => {
                    self.stats.packets += 1;
                    return Some(packet);
                }
                Err(e) => {
                    self.stats.dropped_packets += 1;
                    trace!("dropping malformed packet: {}", e);
                }
            }
        }
    }

    /// Looks for a trustworthy sync position at most [`RESYNC_WINDOW`] bytes
    /// ahead, discarding everything before it.
    fn resync(&mut self) -> Resync {
        let was_synced = self.synced;
        self.synced = false;

        let limit = self.buffer.len().min(RESYNC_WINDOW);
        for offset in 0..limit {
            if self.buffer[offset] != TS_SYNC_BYTE {
                continue;
            }
            let next = offset + TS_PACKET_SIZE;
            if next < self.buffer.len() {
                if self.buffer[next] == TS_SYNC_BYTE {
                    self.skip(offset, was_synced);
                    self.synced = true;
                    return Resync::Synced;
                }
                if offset == 0 && self.at_input_start() {
                    match self.confirmed_within_window(next) {
                        Some(true) => {
                            self.synced = true;
                            return Resync::Synced;
                        }
                        Some(false) => {}
                        None => return Resync::NeedMore,
                    }
                }
            } else if self.flushing && next == self.buffer.len() {
                // last packet of the stream, nothing follows to confirm it
                self.skip(offset, was_synced);
                self.synced = true;
                return Resync::Synced;
            } else {
                // candidate found but its successor has not arrived yet
                self.skip(offset, was_synced);
                return Resync::NeedMore;
            }
        }

        self.skip(limit, was_synced);
        Resync::Skipped
    }

    /// Nothing has been taken from or discarded from the input yet.
    fn at_input_start(&self) -> bool {
        self.stats.packets == 0 && self.stats.dropped_packets == 0 && self.stats.skipped_bytes == 0
    }

    /// Whether a confirmed sync position (a sync byte with another one a
    /// packet later) starts within [`RESYNC_WINDOW`] bytes after `from`.
    /// `None` means more input is needed to tell.
    fn confirmed_within_window(&self, from: usize) -> Option<bool> {
        let len = self.buffer.len();
        for pos in from + 1..=from + RESYNC_WINDOW {
            if pos >= len {
                return if self.flushing { Some(false) } else { None };
            }
            if self.buffer[pos] != TS_SYNC_BYTE {
                continue;
            }
            let next = pos + TS_PACKET_SIZE;
            if next < len {
                if self.buffer[next] == TS_SYNC_BYTE {
                    return Some(true);
                }
            } else if !self.flushing {
                return None;
            } else if next == len {
                return Some(true);
            }
        }
        Some(false)
    }

    fn skip(&mut self, count: usize, was_synced: bool) {
        if count == 0 {
            return;
        }
        if was_synced {
            self.stats.resyncs += 1;
            debug!("lost TS sync, skipping {} bytes", count);
        }
        self.stats.skipped_bytes += count as u64;
        self.buffer.advance(count);
    }
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new()
    }
}

enum Resync {
    Synced,
    /// A whole window was discarded; scanning continues.
    Skipped,
    NeedMore,
}

/// Packets available from the reader's buffer.
pub struct Packets<'a> {
    reader: &'a mut PacketReader,
}

impl Iterator for Packets<'_> {
    type Item = TsPacket;

    fn next(&mut self) -> Option<TsPacket> {
        self.reader.next_packet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn packet(pid: u16, cc: u8) -> Vec<u8> {
        let mut p = vec![0xffu8; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p[1] = ((pid >> 8) & 0x1f) as u8;
        p[2] = (pid & 0xff) as u8;
        p[3] = 0x10 | (cc & 0x0f);
        p[4] = cc;
        p
    }

    fn stream(count: usize) -> Vec<u8> {
        (0..count)
            .flat_map(|i| packet(0x100 + (i % 3) as u16, i as u8))
            .collect()
    }

    fn collect_all(reader: &mut PacketReader, data: &[u8], step: usize) -> Vec<(u16, u8)> {
        let mut out = Vec::new();
        for piece in data.chunks(step.max(1)) {
            out.extend(reader.feed(piece).map(|p| (p.pid(), p.continuity_counter())));
        }
        out.extend(reader.finish().map(|p| (p.pid(), p.continuity_counter())));
        out
    }

    #[test]
    fn test_single_byte_feeding() {
        let data = stream(10);
        let mut reader = PacketReader::new();
        let packets = collect_all(&mut reader, &data, 1);
        assert_eq!(packets.len(), 10);
        assert_eq!(packets[4], (0x101, 4));
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_partial_tail_is_buffered() {
        let data = stream(2);
        let mut reader = PacketReader::new();
        assert_eq!(reader.feed(&data[..150]).count(), 0);
        assert_eq!(reader.buffered(), 150);
        // a full packet is held back until the next sync byte confirms it
        assert_eq!(reader.feed(&data[150..TS_PACKET_SIZE]).count(), 0);
        assert_eq!(reader.feed(&data[TS_PACKET_SIZE..]).count(), 2);
        assert_eq!(reader.finish().count(), 0);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut data = stream(3);
        data.splice(TS_PACKET_SIZE..TS_PACKET_SIZE, [0x00, 0x47, 0x12, 0x47, 0x99]);
        let mut reader = PacketReader::new();
        let packets = collect_all(&mut reader, &data, 64);

        assert_eq!(packets, vec![(0x100, 0), (0x101, 1), (0x102, 2)]);
        let stats = reader.stats();
        assert_eq!(stats.skipped_bytes, 5);
        assert_eq!(stats.resyncs, 1);
    }

    #[test]
    fn test_first_packet_before_garbage_survives_any_read_size() {
        let mut data = stream(3);
        data.splice(TS_PACKET_SIZE..TS_PACKET_SIZE, [0x00, 0x47, 0x12, 0x47, 0x99]);
        for step in [1, 7, TS_PACKET_SIZE, data.len()] {
            let mut reader = PacketReader::new();
            let packets = collect_all(&mut reader, &data, step);
            assert_eq!(packets, vec![(0x100, 0), (0x101, 1), (0x102, 2)], "step {step}");
            assert_eq!(reader.stats().skipped_bytes, 5, "step {step}");
        }
    }

    #[test]
    fn test_stray_sync_in_leading_garbage_is_not_a_packet() {
        let mut data = vec![0x00u8; 40];
        data[3] = TS_SYNC_BYTE;
        data.extend(stream(2));
        let mut reader = PacketReader::new();
        let packets = collect_all(&mut reader, &data, 1000);
        assert_eq!(packets, vec![(0x100, 0), (0x101, 1)]);
        assert_eq!(reader.stats().skipped_bytes, 40);
    }

    #[test]
    fn test_leading_garbage_without_sync_is_discarded() {
        let mut data = vec![0x00u8; RESYNC_WINDOW * 2 + 17];
        data.extend(stream(2));
        let mut reader = PacketReader::new();
        let packets = collect_all(&mut reader, &data, 1000);
        assert_eq!(packets.len(), 2);
        assert_eq!(reader.stats().skipped_bytes, (RESYNC_WINDOW * 2 + 17) as u64);
    }

    #[test]
    fn test_malformed_packet_is_dropped() {
        let mut data = stream(3);
        data[TS_PACKET_SIZE + 1] |= 0x80; // transport error on the second packet
        let mut reader = PacketReader::new();
        let packets = collect_all(&mut reader, &data, TS_PACKET_SIZE);
        assert_eq!(packets, vec![(0x100, 0), (0x102, 2)]);
        assert_eq!(reader.stats().dropped_packets, 1);
    }

    #[quickcheck]
    fn prop_chunking_does_not_change_packets(cuts: Vec<u8>) -> bool {
        let data = stream(12);
        let expected = collect_all(&mut PacketReader::new(), &data, data.len());

        let mut reader = PacketReader::new();
        let mut got = Vec::new();
        let mut rest = &data[..];
        for cut in cuts {
            let n = (cut as usize).min(rest.len());
            let (head, tail) = rest.split_at(n);
            got.extend(reader.feed(head).map(|p| (p.pid(), p.continuity_counter())));
            rest = tail;
        }
        got.extend(reader.feed(rest).map(|p| (p.pid(), p.continuity_counter())));
        got.extend(reader.finish().map(|p| (p.pid(), p.continuity_counter())));

        got == expected
    }
}
