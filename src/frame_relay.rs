use anyhow::Result;

use crate::{
    camera_controller::FrameSource,
    common::{Frame, PixelOrder, BYTES_PER_PIXEL},
    display::FrameSink,
};

/**
 * One tick of the feed: capture, convert to display order, optionally flip, and
 * present. Blocks for as long as the capture does.
 */
pub(crate) fn relay_frame(
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    flip: bool,
) -> Result<()> {
    let mut frame = source.capture_frame()?;
    to_display_order(&mut frame);
    if flip {
        flip_vertical(&mut frame);
    }
    sink.present(&frame)
}

/**
 * Displays take RGB. BGR frames get their red and blue bytes swapped in place.
 */
pub(crate) fn to_display_order(frame: &mut Frame) {
    if frame.order == PixelOrder::Rgb {
        return;
    }
    for pixel in frame.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        pixel.swap(0, 2);
    }
    frame.order = PixelOrder::Rgb;
}

/**
 * Mirrors the frame top-to-bottom.
 */
pub(crate) fn flip_vertical(frame: &mut Frame) {
    let stride = frame.geometry.stride();
    let height = frame.geometry.height;

    for y in 0..height / 2 {
        let mirrored = height - 1 - y;
        let (upper, lower) = frame.pixels.split_at_mut(mirrored * stride);
        upper[y * stride..(y + 1) * stride].swap_with_slice(&mut lower[..stride]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameGeometry;
    use anyhow::bail;

    fn frame(width: usize, height: usize, order: PixelOrder, pixels: Vec<u8>) -> Frame {
        Frame::new(FrameGeometry { width, height }, order, pixels).unwrap()
    }

    #[test]
    fn bgr_becomes_rgb() {
        let mut f = frame(2, 1, PixelOrder::Bgr, vec![1, 2, 3, 4, 5, 6]);
        to_display_order(&mut f);
        assert_eq!(f.order, PixelOrder::Rgb);
        assert_eq!(f.pixels, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn rgb_is_left_alone() {
        let mut f = frame(2, 1, PixelOrder::Rgb, vec![1, 2, 3, 4, 5, 6]);
        to_display_order(&mut f);
        assert_eq!(f.pixels, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn flip_swaps_rows() {
        // 1x3, one pixel per row
        let mut f = frame(1, 3, PixelOrder::Rgb, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
        flip_vertical(&mut f);
        assert_eq!(f.pixels, vec![3, 3, 3, 2, 2, 2, 1, 1, 1]);

        let mut f = frame(2, 2, PixelOrder::Rgb, (0..12).collect());
        flip_vertical(&mut f);
        assert_eq!(f.pixels, vec![6, 7, 8, 9, 10, 11, 0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn flip_of_single_row_is_identity() {
        let mut f = frame(2, 1, PixelOrder::Rgb, vec![1, 2, 3, 4, 5, 6]);
        flip_vertical(&mut f);
        assert_eq!(f.pixels, vec![1, 2, 3, 4, 5, 6]);
    }

    struct OneFrame(Option<Frame>);

    impl FrameSource for OneFrame {
        fn configure(&mut self) -> Result<FrameGeometry> {
            Ok(FrameGeometry {
                width: 1,
                height: 2,
            })
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn capture_frame(&mut self) -> Result<Frame> {
            match self.0.take() {
                Some(frame) => Ok(frame),
                None => bail!("no frame"),
            }
        }
    }

    #[derive(Default)]
    struct Shown(Vec<Frame>);

    impl FrameSink for Shown {
        fn present(&mut self, frame: &Frame) -> Result<()> {
            self.0.push(frame.clone());
            Ok(())
        }
    }

    #[test]
    fn relay_converts_then_flips() {
        let mut source = OneFrame(Some(frame(
            1,
            2,
            PixelOrder::Bgr,
            vec![10, 20, 30, 40, 50, 60],
        )));
        let mut sink = Shown::default();

        relay_frame(&mut source, &mut sink, true).unwrap();

        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].order, PixelOrder::Rgb);
        assert_eq!(sink.0[0].pixels, vec![60, 50, 40, 30, 20, 10]);
    }

    #[test]
    fn relay_without_flip_keeps_orientation() {
        let mut source = OneFrame(Some(frame(
            1,
            2,
            PixelOrder::Bgr,
            vec![10, 20, 30, 40, 50, 60],
        )));
        let mut sink = Shown::default();

        relay_frame(&mut source, &mut sink, false).unwrap();
        assert_eq!(sink.0[0].pixels, vec![30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn capture_failure_presents_nothing() {
        let mut source = OneFrame(None);
        let mut sink = Shown::default();
        assert!(relay_frame(&mut source, &mut sink, true).is_err());
        assert!(sink.0.is_empty());
    }
}
