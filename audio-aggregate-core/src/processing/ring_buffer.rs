use crate::models::buffer::{BlockMut, BlockRef};

/// Bounded circular buffer of audio frames for one sub-stream, one direction.
///
/// Frame-addressed: capacity, fill level and cursors count frames, and one
/// frame spans the buffer's channel count in either layout. Wrap in
/// `parking_lot::Mutex` for cross-thread access — the buffer does not lock
/// itself, so a caller can hold one lock across a related pair of operations
/// (a read followed by a zero-pad, for instance).
///
/// `write` never evicts queued data: it accepts at most `capacity() -
/// frames_queued()` frames and reports how many it took. `read` returns at
/// most `frames_queued()` frames and reports how many it produced. Partial
/// transfers are the buffer's backpressure signal, to be surfaced as an XRun
/// notification — never retried from inside a real-time callback.
#[derive(Debug)]
pub struct RingBuffer {
    interleaved: bool,
    channels: usize,
    capacity: usize,
    begin: usize,
    full: usize,
    samples: Vec<f32>,
    planes: Vec<Vec<f32>>,
}

impl RingBuffer {
    /// Creates a buffer holding up to `capacity` frames of `channels` channels.
    pub fn new(interleaved: bool, channels: usize, capacity: usize) -> Self {
        let (samples, planes) = if interleaved {
            (vec![0.0; capacity * channels], Vec::new())
        } else {
            (Vec::new(), vec![vec![0.0; capacity]; channels])
        };
        Self {
            interleaved,
            channels,
            capacity,
            begin: 0,
            full: 0,
            samples,
            planes,
        }
    }

    /// Copies up to `frames` frames from `src` into the buffer.
    ///
    /// Returns the number of frames actually written; the remainder did not
    /// fit and is the caller's overrun to report.
    pub fn write(&mut self, src: BlockRef<'_>, frames: usize) -> usize {
        let count = frames.min(self.capacity - self.full);
        if count == 0 {
            return 0;
        }
        let end = (self.begin + self.full) % self.capacity;
        let first = count.min(self.capacity - end);
        let second = count - first;
        match src {
            BlockRef::Interleaved(source) => {
                assert!(self.interleaved, "sample layout mismatch");
                let ch = self.channels;
                self.samples[end * ch..(end + first) * ch]
                    .copy_from_slice(&source[..first * ch]);
                self.samples[..second * ch].copy_from_slice(&source[first * ch..count * ch]);
            }
            BlockRef::Planar(source) => {
                assert!(!self.interleaved, "sample layout mismatch");
                for (plane, src_plane) in self.planes.iter_mut().zip(source) {
                    plane[end..end + first].copy_from_slice(&src_plane[..first]);
                    plane[..second].copy_from_slice(&src_plane[first..count]);
                }
            }
        }
        self.full += count;
        count
    }

    /// Copies up to `frames` frames out of the buffer into `dst`.
    ///
    /// Returns the number of frames actually read; the caller zero-pads the
    /// shortfall and reports an underrun.
    pub fn read(&mut self, dst: BlockMut<'_>, frames: usize) -> usize {
        let count = frames.min(self.full);
        if count == 0 {
            return 0;
        }
        let first = count.min(self.capacity - self.begin);
        let second = count - first;
        match dst {
            BlockMut::Interleaved(target) => {
                assert!(self.interleaved, "sample layout mismatch");
                let ch = self.channels;
                let begin = self.begin;
                target[..first * ch]
                    .copy_from_slice(&self.samples[begin * ch..(begin + first) * ch]);
                target[first * ch..count * ch].copy_from_slice(&self.samples[..second * ch]);
            }
            BlockMut::Planar(target) => {
                assert!(!self.interleaved, "sample layout mismatch");
                let begin = self.begin;
                for (plane, dst_plane) in self.planes.iter().zip(target.iter_mut()) {
                    dst_plane[..first].copy_from_slice(&plane[begin..begin + first]);
                    dst_plane[first..count].copy_from_slice(&plane[..second]);
                }
            }
        }
        self.begin = (self.begin + count) % self.capacity;
        self.full -= count;
        count
    }

    /// Discards all queued frames.
    pub fn clear(&mut self) {
        self.begin = 0;
        self.full = 0;
    }

    /// Frames currently queued, in `[0, capacity]`.
    pub fn frames_queued(&self) -> usize {
        self.full
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::buffer::SampleBlock;

    fn interleaved(samples: &[f32]) -> BlockRef<'_> {
        BlockRef::Interleaved(samples)
    }

    #[test]
    fn round_trip_returns_identical_samples() {
        let mut ring = RingBuffer::new(true, 2, 8);
        let queued_before = ring.frames_queued();
        let src = [1.0, -1.0, 2.0, -2.0, 3.0, -3.0];

        assert_eq!(ring.write(interleaved(&src), 3), 3);
        assert_eq!(ring.frames_queued(), 3);

        let mut out = [0.0f32; 6];
        assert_eq!(ring.read(BlockMut::Interleaved(&mut out), 3), 3);
        assert_eq!(out, src);
        assert_eq!(ring.frames_queued(), queued_before);
    }

    #[test]
    fn write_beyond_capacity_reports_capacity() {
        let mut ring = RingBuffer::new(true, 1, 4);
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];

        assert_eq!(ring.write(interleaved(&src), 7), 4);
        assert_eq!(ring.frames_queued(), 4);

        // Queued data is never evicted by further writes.
        assert_eq!(ring.write(interleaved(&src), 1), 0);
        let mut out = [0.0f32; 4];
        ring.read(BlockMut::Interleaved(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn read_beyond_fill_reports_fill() {
        let mut ring = RingBuffer::new(true, 1, 8);
        ring.write(interleaved(&[1.0, 2.0]), 2);

        let mut out = [0.0f32; 5];
        assert_eq!(ring.read(BlockMut::Interleaved(&mut out), 5), 2);
        assert_eq!(&out[..2], &[1.0, 2.0]);
        assert_eq!(ring.frames_queued(), 0);
    }

    #[test]
    fn wraparound_preserves_order() {
        let mut ring = RingBuffer::new(true, 1, 4);
        ring.write(interleaved(&[1.0, 2.0, 3.0]), 3);
        let mut out = [0.0f32; 2];
        ring.read(BlockMut::Interleaved(&mut out), 2);

        // Cursor now at frame 2; this write wraps.
        ring.write(interleaved(&[4.0, 5.0, 6.0]), 3);
        let mut all = [0.0f32; 4];
        assert_eq!(ring.read(BlockMut::Interleaved(&mut all), 4), 4);
        assert_eq!(all, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn planar_round_trip() {
        let mut ring = RingBuffer::new(false, 2, 4);
        let src = SampleBlock::Planar(vec![vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]]);

        assert_eq!(ring.write(src.as_view(), 3), 3);

        let mut dst = SampleBlock::new(false, 2, 3);
        assert_eq!(ring.read(dst.as_view_mut(), 3), 3);
        assert_eq!(dst, src);
    }

    #[test]
    fn planar_wraparound() {
        let mut ring = RingBuffer::new(false, 1, 4);
        ring.write(SampleBlock::Planar(vec![vec![1.0, 2.0, 3.0]]).as_view(), 3);
        let mut skip = SampleBlock::new(false, 1, 3);
        ring.read(skip.as_view_mut(), 3);

        ring.write(SampleBlock::Planar(vec![vec![4.0, 5.0, 6.0]]).as_view(), 3);
        let mut dst = SampleBlock::new(false, 1, 3);
        assert_eq!(ring.read(dst.as_view_mut(), 3), 3);
        assert_eq!(dst, SampleBlock::Planar(vec![vec![4.0, 5.0, 6.0]]));
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut ring = RingBuffer::new(true, 2, 8);
        ring.write(interleaved(&[1.0; 8]), 4);
        ring.clear();

        assert_eq!(ring.frames_queued(), 0);
        let mut out = [9.0f32; 2];
        assert_eq!(ring.read(BlockMut::Interleaved(&mut out), 1), 0);
        assert_eq!(out, [9.0, 9.0]);
    }
}
