use super::*;

fn close(a: [u8; 4], b: [u8; 4]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x.abs_diff(*y) <= 2)
}

#[test]
fn default_style_is_cornflower_on_black() {
    let s = FallbackStyle::default();
    assert_eq!(s.background, Rgba8::opaque(100, 149, 237));
    assert_eq!(s.foreground, Rgba8::BLACK);
    assert!(s.font_path.is_none());
}

#[test]
fn background_only_renderer_clears_to_background() {
    let mut r = FallbackRenderer::background_only(FallbackStyle::default());

    let frame = r.render(Size::new(24, 10), "Graphics device lost");
    assert_eq!(frame.size(), Size::new(24, 10));
    assert_eq!(frame.data.len(), 24 * 10 * 4);
    for (x, y) in [(0, 0), (23, 9), (12, 5)] {
        assert!(close(frame.pixel(x, y).unwrap(), [100, 149, 237, 255]));
    }
    assert!(!r.has_font());
}

fn inked(frame: &FrameRGBA, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
    let bg = [100, 149, 237, 255];
    ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
        .filter(|&(x, y)| !close(frame.pixel(x, y).unwrap(), bg))
        .count()
}

#[test]
fn default_renderer_draws_centered_message() {
    let mut r = FallbackRenderer::default();
    let frame = r.render(Size::new(320, 240), "Graphics device lost");
    if !r.has_font() {
        // No system sans-serif face installed.
        return;
    }

    assert!(close(frame.pixel(0, 0).unwrap(), [100, 149, 237, 255]));
    assert!(inked(&frame, 0..320, 100..140) > 0);
    assert_eq!(inked(&frame, 0..320, 0..80), 0);
    assert_eq!(inked(&frame, 0..320, 160..240), 0);
    assert_eq!(inked(&frame, 0..30, 0..240), 0);
    assert_eq!(inked(&frame, 290..320, 0..240), 0);
}

#[test]
fn oversized_region_is_clamped() {
    let mut r = FallbackRenderer::background_only(FallbackStyle::default());
    let frame = r.render(Size::new(70_000, 2), "x");
    assert_eq!(frame.size(), Size::new(u32::from(u16::MAX), 2));
    assert_eq!(frame.data.len(), usize::from(u16::MAX) * 2 * 4);
}

#[test]
fn render_empty_region_yields_empty_frame() {
    let mut r = FallbackRenderer::default();
    let frame = r.render(Size::new(0, 30), "x");
    assert_eq!(frame.width, 0);
    assert_eq!(frame.height, 30);
    assert!(frame.data.is_empty());
}

#[test]
fn invalid_font_bytes_are_rejected() {
    let r = FallbackRenderer::default().with_font_bytes(vec![0, 1, 2, 3]);
    assert!(r.is_err());
}

#[test]
fn missing_font_file_is_reported() {
    let style = FallbackStyle {
        font_path: Some(PathBuf::from("definitely/missing/font.ttf")),
        ..FallbackStyle::default()
    };
    let err = FallbackRenderer::from_style(style).unwrap_err();
    assert!(err.to_string().contains("font.ttf"));
}

#[test]
fn style_deserializes_with_defaults() {
    let s: FallbackStyle =
        serde_json::from_str(r#"{ "background": { "r": 1, "g": 2, "b": 3, "a": 255 } }"#)
            .unwrap();
    assert_eq!(s.background, Rgba8::opaque(1, 2, 3));
    assert_eq!(s.font_size_px, 16.0);
}
