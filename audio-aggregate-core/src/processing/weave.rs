//! Channel weave codec.
//!
//! Pure data-shuffling between a sub-stream's channel block and the
//! aggregate's unified channel layout. [`weave`] moves one channel per call;
//! the aggregate loops it over a sub-stream's channels at that sub-stream's
//! offset into the unified space, so that after all sub-streams are woven
//! every unified channel slot has been written exactly once per frame.
//! [`zero_buffer`] silences a frame range and is used wherever real data is
//! unavailable — stream not running, ring underrun — so neither the
//! application nor the backend ever observes uninitialized memory.

use crate::models::buffer::{BlockMut, BlockRef};

/// Copies `frames` samples of one channel from `src` into `dst`.
///
/// `dst_channels`/`src_channels` are the channel counts (interleaved strides)
/// of the two blocks; `dst_channel`/`src_channel` select the channel in each.
/// Both blocks must use the same layout.
pub fn weave(
    dst: &mut BlockMut<'_>,
    src: &BlockRef<'_>,
    dst_channels: usize,
    src_channels: usize,
    dst_channel: usize,
    src_channel: usize,
    frames: usize,
) {
    match (dst, src) {
        (BlockMut::Interleaved(target), BlockRef::Interleaved(source)) => {
            for frame in 0..frames {
                target[frame * dst_channels + dst_channel] =
                    source[frame * src_channels + src_channel];
            }
        }
        (BlockMut::Planar(target), BlockRef::Planar(source)) => {
            target[dst_channel][..frames].copy_from_slice(&source[src_channel][..frames]);
        }
        _ => panic!("sample layout mismatch"),
    }
}

/// Fills `frames` frames of the leading `channels` channels with silence,
/// starting at `start_frame`.
///
/// For interleaved storage `channels` is also the frame stride, so the zeroed
/// region is the contiguous sample range covering those frames.
pub fn zero_buffer(dst: &mut BlockMut<'_>, start_frame: usize, channels: usize, frames: usize) {
    match dst {
        BlockMut::Interleaved(target) => {
            target[start_frame * channels..(start_frame + frames) * channels].fill(0.0);
        }
        BlockMut::Planar(target) => {
            for plane in target.iter_mut().take(channels) {
                plane[start_frame..start_frame + frames].fill(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::buffer::SampleBlock;

    fn device_block(interleaved: bool, channels: usize, frames: usize, base: f32) -> SampleBlock {
        let mut block = SampleBlock::new(interleaved, channels, frames);
        match &mut block {
            SampleBlock::Interleaved(samples) => {
                for (i, s) in samples.iter_mut().enumerate() {
                    *s = base + i as f32;
                }
            }
            SampleBlock::Planar(planes) => {
                for (c, plane) in planes.iter_mut().enumerate() {
                    for (f, s) in plane.iter_mut().enumerate() {
                        *s = base + (f * channels + c) as f32;
                    }
                }
            }
        }
        block
    }

    fn weave_in(unified: &mut SampleBlock, device: &SampleBlock, total: usize, ch: usize, at: usize, frames: usize) {
        for c in 0..ch {
            weave(
                &mut unified.as_view_mut(),
                &device.as_view(),
                total,
                ch,
                at + c,
                c,
                frames,
            );
        }
    }

    fn weave_out(device: &mut SampleBlock, unified: &SampleBlock, total: usize, ch: usize, at: usize, frames: usize) {
        for c in 0..ch {
            weave(
                &mut device.as_view_mut(),
                &unified.as_view(),
                ch,
                total,
                c,
                at + c,
                frames,
            );
        }
    }

    #[test]
    fn interleaved_weave_places_channels_at_offset() {
        let frames = 4;
        let sub = device_block(true, 2, frames, 10.0);
        let mut unified = SampleBlock::new(true, 4, frames);

        weave_in(&mut unified, &sub, 4, 2, 2, frames);

        let SampleBlock::Interleaved(samples) = &unified else {
            panic!()
        };
        // Frame 1 of the unified buffer: channels 0..2 untouched, 2..4 from the sub-stream.
        assert_eq!(&samples[4..8], &[0.0, 0.0, 12.0, 13.0]);
    }

    #[test]
    fn weave_round_trip_interleaved() {
        let frames = 8;
        let a = device_block(true, 2, frames, 100.0);
        let b = device_block(true, 2, frames, 200.0);
        let mut unified = SampleBlock::new(true, 4, frames);

        weave_in(&mut unified, &a, 4, 2, 0, frames);
        weave_in(&mut unified, &b, 4, 2, 2, frames);

        let mut a_back = SampleBlock::new(true, 2, frames);
        let mut b_back = SampleBlock::new(true, 2, frames);
        weave_out(&mut a_back, &unified, 4, 2, 0, frames);
        weave_out(&mut b_back, &unified, 4, 2, 2, frames);

        assert_eq!(a_back, a);
        assert_eq!(b_back, b);
    }

    #[test]
    fn weave_round_trip_planar() {
        let frames = 8;
        let a = device_block(false, 1, frames, 100.0);
        let b = device_block(false, 3, frames, 200.0);
        let mut unified = SampleBlock::new(false, 4, frames);

        weave_in(&mut unified, &a, 4, 1, 0, frames);
        weave_in(&mut unified, &b, 4, 3, 1, frames);

        let mut a_back = SampleBlock::new(false, 1, frames);
        let mut b_back = SampleBlock::new(false, 3, frames);
        weave_out(&mut a_back, &unified, 4, 1, 0, frames);
        weave_out(&mut b_back, &unified, 4, 3, 1, frames);

        assert_eq!(a_back, a);
        assert_eq!(b_back, b);
    }

    #[test]
    fn every_unified_slot_written_exactly_once() {
        let frames = 4;
        let a = device_block(true, 2, frames, 1.0);
        let b = device_block(true, 2, frames, 1.0);
        let mut unified = SampleBlock::Interleaved(vec![f32::NAN; 4 * frames]);

        weave_in(&mut unified, &a, 4, 2, 0, frames);
        weave_in(&mut unified, &b, 4, 2, 2, frames);

        let SampleBlock::Interleaved(samples) = &unified else {
            panic!()
        };
        assert!(samples.iter().all(|s| !s.is_nan()));
    }

    #[test]
    fn zero_buffer_silences_tail_frames() {
        let frames = 4;
        let mut block = device_block(true, 2, frames, 1.0);
        zero_buffer(&mut block.as_view_mut(), 2, 2, 2);

        let SampleBlock::Interleaved(samples) = &block else {
            panic!()
        };
        assert!(samples[..4].iter().all(|s| *s != 0.0));
        assert!(samples[4..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn zero_buffer_planar_respects_channel_count() {
        let mut block = device_block(false, 3, 4, 1.0);
        zero_buffer(&mut block.as_view_mut(), 0, 2, 4);

        let SampleBlock::Planar(planes) = &block else {
            panic!()
        };
        assert!(planes[0].iter().all(|s| *s == 0.0));
        assert!(planes[1].iter().all(|s| *s == 0.0));
        assert!(planes[2].iter().all(|s| *s != 0.0));
    }
}
