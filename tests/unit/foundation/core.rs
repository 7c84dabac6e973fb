use super::*;

#[test]
fn size_max_is_componentwise() {
    let a = Size::new(50, 300);
    let b = Size::new(200, 150);
    assert_eq!(a.max(b), Size::new(200, 300));
    assert!(a.fits_within(Size::new(50, 300)));
    assert!(!b.fits_within(a));
}

#[test]
fn top_left_viewport_is_anchored_at_origin() {
    let vp = Viewport::top_left(Size::new(100, 80));
    assert_eq!((vp.x, vp.y, vp.width, vp.height), (0, 0, 100, 80));
    assert_eq!(vp.min_depth, 0.0);
    assert_eq!(vp.max_depth, 1.0);
    assert_eq!(vp.rect(), Rect::new(0.0, 0.0, 100.0, 80.0));
}

#[test]
fn profiles_are_ordered() {
    assert!(GraphicsProfile::Reach < GraphicsProfile::HiDef);
    assert_eq!(GraphicsProfile::default(), GraphicsProfile::Reach);
}

#[test]
fn premul_scales_color_by_alpha() {
    let c = Rgba8 {
        r: 255,
        g: 128,
        b: 0,
        a: 128,
    };
    assert_eq!(c.to_premul(), [128, 64, 0, 128]);
    assert_eq!(Rgba8::BLACK.to_premul(), [0, 0, 0, 255]);
}

#[test]
fn frame_pixel_bounds() {
    let f = FrameRGBA {
        width: 2,
        height: 1,
        data: vec![1, 2, 3, 4, 5, 6, 7, 8],
        premultiplied: true,
    };
    assert_eq!(f.pixel(1, 0), Some([5, 6, 7, 8]));
    assert_eq!(f.pixel(2, 0), None);
    assert_eq!(f.size(), Size::new(2, 1));
}
