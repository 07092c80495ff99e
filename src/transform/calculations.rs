//! Pure geometry for the operations.
//!
//! All functions here are pure and testable without any I/O or images.

/// How a resize will be carried out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizePlan {
    /// At least one target dimension exceeds the source. Each axis is scaled
    /// by its own factor with Lanczos3.
    Upscale {
        scale_x: f64,
        scale_y: f64,
        width: u32,
        height: u32,
    },
    /// Pure downscale or no change: fill the target box and crop the overflow
    /// around the centre.
    Thumbnail { width: u32, height: u32 },
}

impl ResizePlan {
    pub fn output_dimensions(&self) -> (u32, u32) {
        match *self {
            Self::Upscale { width, height, .. } | Self::Thumbnail { width, height } => {
                (width, height)
            }
        }
    }
}

/// Choose the resize branch for `source` → `target`.
///
/// ```
/// # use henkan::transform::calculations::{plan_resize, ResizePlan};
/// // width grows, so this is an upscale even though height shrinks
/// assert!(matches!(plan_resize((100, 100), (200, 50)), ResizePlan::Upscale { .. }));
/// assert!(matches!(plan_resize((100, 100), (100, 100)), ResizePlan::Thumbnail { .. }));
/// ```
pub fn plan_resize(source: (u32, u32), target: (u32, u32)) -> ResizePlan {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    if tgt_w > src_w || tgt_h > src_h {
        let scale_x = tgt_w as f64 / src_w as f64;
        let scale_y = tgt_h as f64 / src_h as f64;
        ResizePlan::Upscale {
            scale_x,
            scale_y,
            width: ((src_w as f64 * scale_x).round() as u32).max(1),
            height: ((src_h as f64 * scale_y).round() as u32).max(1),
        }
    } else {
        ResizePlan::Thumbnail {
            width: tgt_w,
            height: tgt_h,
        }
    }
}

/// Inclusive-exclusive pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Smallest rectangle containing every pixel for which `is_border` is false.
///
/// Returns `None` when every pixel is border.
pub fn content_bounds(
    width: u32,
    height: u32,
    is_border: impl Fn(u32, u32) -> bool,
) -> Option<Bounds> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for y in 0..height {
        for x in 0..width {
            if !is_border(x, y) {
                found = true;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }

    found.then(|| Bounds {
        left: min_x,
        top: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wider_target_is_upscale() {
        let plan = plan_resize((100, 100), (200, 50));
        assert_eq!(
            plan,
            ResizePlan::Upscale {
                scale_x: 2.0,
                scale_y: 0.5,
                width: 200,
                height: 50
            }
        );
    }

    #[test]
    fn taller_target_is_upscale() {
        assert!(matches!(
            plan_resize((100, 100), (50, 101)),
            ResizePlan::Upscale { .. }
        ));
    }

    #[test]
    fn smaller_target_is_thumbnail() {
        assert_eq!(
            plan_resize((100, 100), (50, 50)),
            ResizePlan::Thumbnail {
                width: 50,
                height: 50
            }
        );
    }

    #[test]
    fn same_size_is_thumbnail() {
        assert!(matches!(
            plan_resize((100, 100), (100, 100)),
            ResizePlan::Thumbnail { .. }
        ));
    }

    #[test]
    fn upscale_scales_axes_independently() {
        let plan = plan_resize((40, 20), (120, 80));
        assert_eq!(plan.output_dimensions(), (120, 80));
        assert!(matches!(
            plan,
            ResizePlan::Upscale { scale_x, scale_y, .. } if scale_x == 3.0 && scale_y == 4.0
        ));
    }

    #[test]
    fn content_bounds_finds_inner_rectangle() {
        // 10x8 canvas, content at x in 2..=5, y in 3..=4
        let bounds = content_bounds(10, 8, |x, y| !((2..=5).contains(&x) && (3..=4).contains(&y)));
        assert_eq!(
            bounds,
            Some(Bounds {
                left: 2,
                top: 3,
                width: 4,
                height: 2
            })
        );
    }

    #[test]
    fn content_bounds_all_border_is_none() {
        assert_eq!(content_bounds(5, 5, |_, _| true), None);
    }

    #[test]
    fn content_bounds_no_border_is_full_image() {
        assert_eq!(
            content_bounds(3, 2, |_, _| false),
            Some(Bounds {
                left: 0,
                top: 0,
                width: 3,
                height: 2
            })
        );
    }
}
