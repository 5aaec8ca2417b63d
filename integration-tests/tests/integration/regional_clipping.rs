//! Scenario 5: a dirty-rect batch that includes a region hanging off
//! the edge of the established surface has that region dropped, and no
//! region is accepted before the first full frame has arrived.

use servidesk_protocol::{PersistentSurface, Region};

fn region(x: u16, y: u16, w: u16, h: u16) -> Region {
    Region {
        x,
        y,
        w,
        h,
        jpeg: vec![0xFF, 0xD8],
    }
}

#[test]
fn regions_before_the_first_full_frame_are_dropped() {
    let surface = PersistentSurface::default();
    let regions = vec![region(0, 0, 10, 10)];
    assert!(!surface.is_established());
    assert!(surface.accept_regions(&regions).is_empty());
}

#[test]
fn out_of_bounds_region_is_dropped_after_establishment() {
    let mut surface = PersistentSurface::default();
    surface.set_full_frame(1920, 1080);

    let in_bounds = region(1900, 1060, 20, 20);
    let off_right = region(1910, 100, 20, 20);
    let off_bottom = region(100, 1070, 20, 20);

    let accepted = surface.accept_regions(&[in_bounds.clone(), off_right, off_bottom]);

    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0], &in_bounds);
}
