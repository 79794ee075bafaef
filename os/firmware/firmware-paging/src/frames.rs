use alloc::vec::Vec;
use firmware_addresses::{PageSize, PhysicalPage, PhysicalRange, Size4K, align_down, align_up};

/// Supplies zero-or-garbage 4 KiB frames for new page tables.
///
/// The editor clears every frame before linking it into a hierarchy.
pub trait FrameSource {
    /// One 4 KiB aligned frame, or `None` when exhausted.
    fn allocate_frame(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Hand back a frame obtained from [`allocate_frame`](Self::allocate_frame).
    fn release_frame(&mut self, frame: PhysicalPage<Size4K>);
}

impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    fn allocate_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        (**self).allocate_frame()
    }

    fn release_frame(&mut self, frame: PhysicalPage<Size4K>) {
        (**self).release_frame(frame);
    }
}

/// Take a frame from `source` that does not overlap `reserved`.
///
/// Candidates are taken in the order the source hands them out; rejected
/// frames are returned to the source once a usable one was found, so they
/// never end up inside the hierarchy. A source that hands out every frame
/// of `reserved` before anything else still yields the frame after it.
pub fn claim_outside<F: FrameSource + ?Sized>(
    source: &mut F,
    reserved: PhysicalRange,
) -> Option<PhysicalPage<Size4K>> {
    let budget = claim_budget(reserved);
    let mut rejected = Vec::new();
    let mut claimed = None;
    while rejected.len() < budget {
        let Some(frame) = source.allocate_frame() else {
            break;
        };
        if reserved.overlaps_page(frame) {
            log::trace!("Skipping table frame {frame} inside reserved range {reserved}");
            rejected.push(frame);
            continue;
        }
        claimed = Some(frame);
        break;
    }
    for frame in rejected.into_iter().rev() {
        source.release_frame(frame);
    }
    claimed
}

/// Frames worth drawing for one claim: every 4 KiB frame touching
/// `reserved`, plus the one that finally lies outside it.
fn claim_budget(reserved: PhysicalRange) -> usize {
    if reserved.is_empty() {
        return 1;
    }
    let first = align_down(reserved.start().as_u64(), Size4K::SIZE);
    let end = align_up(reserved.end().as_u64(), Size4K::SIZE).unwrap_or(u64::MAX);
    let frames = (end - first) >> Size4K::SHIFT;
    usize::try_from(frames).unwrap_or(usize::MAX).saturating_add(1)
}
