use std::path::PathBuf;

use crate::foundation::core::{FrameRGBA, Rgba8, Size};
use crate::foundation::error::{DevshareError, DevshareResult};

/// Appearance of the diagnostic frame drawn when the shared device cannot be used.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FallbackStyle {
    /// Clear color.
    pub background: Rgba8,
    /// Text color.
    pub foreground: Rgba8,
    /// Text size in pixels.
    pub font_size_px: f32,
    /// Font file used for the message. Without one the system sans-serif face is used.
    pub font_path: Option<PathBuf>,
}

impl Default for FallbackStyle {
    fn default() -> Self {
        Self {
            background: Rgba8::CORNFLOWER_BLUE,
            foreground: Rgba8::BLACK,
            font_size_px: 16.0,
            font_path: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TextBrushRgba8 {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

impl From<Rgba8> for TextBrushRgba8 {
    fn from(c: Rgba8) -> Self {
        Self {
            r: c.r,
            g: c.g,
            b: c.b,
            a: c.a,
        }
    }
}

/// Parley contexts plus the one registered message font.
struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
    family_name: String,
    font: vello_cpu::peniko::FontData,
}

impl TextLayoutEngine {
    fn from_bytes(font_bytes: Vec<u8>) -> DevshareResult<Self> {
        let mut font_ctx = parley::FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(font_bytes.clone()), None);
        let family_id = families.first().map(|(id, _)| *id).ok_or_else(|| {
            DevshareError::validation("no font families registered from font bytes")
        })?;
        let family_name = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| DevshareError::validation("registered font family has no name"))?
            .to_string();

        Ok(Self {
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            family_name,
            font: vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(font_bytes), 0),
        })
    }

    /// Default face of the system's generic sans-serif family.
    fn system_sans_serif() -> DevshareResult<Self> {
        let mut font_ctx = parley::FontContext::default();
        let family_id = font_ctx
            .collection
            .generic_families(parley::fontique::GenericFamily::SansSerif)
            .next()
            .ok_or_else(|| DevshareError::validation("no system sans-serif font family"))?;
        let family = font_ctx
            .collection
            .family(family_id)
            .ok_or_else(|| DevshareError::validation("system sans-serif family vanished"))?;
        let info = family
            .default_font()
            .ok_or_else(|| DevshareError::validation("system sans-serif family has no faces"))?;
        let index = info.index();
        let blob = info
            .load(Some(&mut font_ctx.source_cache))
            .ok_or_else(|| DevshareError::validation("system sans-serif face failed to load"))?;

        Ok(Self {
            family_name: family.name().to_string(),
            font: vello_cpu::peniko::FontData::new(
                vello_cpu::peniko::Blob::from(blob.data().to_vec()),
                index,
            ),
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
        })
    }

    /// Shape `text` centered within `width` pixels.
    fn layout_centered(
        &mut self,
        text: &str,
        size_px: f32,
        brush: TextBrushRgba8,
        width: f32,
    ) -> DevshareResult<parley::Layout<TextBrushRgba8>> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(DevshareError::validation(
                "font_size_px must be finite and > 0",
            ));
        }

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(self.family_name.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        layout.break_all_lines(Some(width));
        layout.align(
            Some(width),
            parley::Alignment::Center,
            parley::AlignmentOptions::default(),
        );
        Ok(layout)
    }
}

/// Software renderer for diagnostic frames.
///
/// Works without any device: the frame is rasterized on the CPU with `vello_cpu` and returned to
/// the host as RGBA8. Rendering never fails; text problems only degrade to a plain background.
///
/// Frames are at most 65535 pixels per side; larger regions are clamped.
pub struct FallbackRenderer {
    style: FallbackStyle,
    text: Option<TextLayoutEngine>,
    // Look up the system font on the next render.
    resolve_system_font: bool,
}

impl std::fmt::Debug for FallbackRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRenderer")
            .field("style", &self.style)
            .field("has_font", &self.text.is_some())
            .field("resolve_system_font", &self.resolve_system_font)
            .finish()
    }
}

impl Default for FallbackRenderer {
    fn default() -> Self {
        Self::new(FallbackStyle::default())
    }
}

impl FallbackRenderer {
    /// Renderer drawing the message with the system sans-serif face, looked up on first use.
    /// `style.font_path` is ignored; see [`Self::from_style`].
    pub fn new(style: FallbackStyle) -> Self {
        Self {
            style,
            text: None,
            resolve_system_font: true,
        }
    }

    /// Renderer that only clears to the background and never draws text.
    pub fn background_only(style: FallbackStyle) -> Self {
        Self {
            style,
            text: None,
            resolve_system_font: false,
        }
    }

    /// Renderer loading `style.font_path` when set, the system face otherwise.
    pub fn from_style(style: FallbackStyle) -> DevshareResult<Self> {
        let font_bytes = match &style.font_path {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                DevshareError::Other(
                    anyhow::Error::new(e).context(format!("read font '{}'", path.display())),
                )
            })?),
            None => None,
        };
        let mut out = Self::new(style);
        if let Some(bytes) = font_bytes {
            out = out.with_font_bytes(bytes)?;
        }
        Ok(out)
    }

    /// Use `font_bytes` for the message text.
    pub fn with_font_bytes(mut self, font_bytes: Vec<u8>) -> DevshareResult<Self> {
        self.text = Some(TextLayoutEngine::from_bytes(font_bytes)?);
        self.resolve_system_font = false;
        Ok(self)
    }

    /// Active style.
    pub fn style(&self) -> &FallbackStyle {
        &self.style
    }

    /// Return `true` once a message font is loaded. The system face is looked up by the first
    /// [`Self::render`].
    pub fn has_font(&self) -> bool {
        self.text.is_some()
    }

    fn ensure_font(&mut self) {
        if self.text.is_some() || !self.resolve_system_font {
            return;
        }
        self.resolve_system_font = false;
        match TextLayoutEngine::system_sans_serif() {
            Ok(engine) => {
                tracing::debug!(family = %engine.family_name, "fallback font resolved");
                self.text = Some(engine);
            }
            Err(e) => tracing::warn!(error = %e, "fallback text disabled"),
        }
    }

    /// Clear a `size` frame to the background and draw `message` centered on it.
    pub fn render(&mut self, size: Size, message: &str) -> FrameRGBA {
        if size.is_empty() {
            return FrameRGBA {
                width: size.width,
                height: size.height,
                data: Vec::new(),
                premultiplied: true,
            };
        }

        let w = clamp_u16(size.width);
        let h = clamp_u16(size.height);
        if u32::from(w) != size.width || u32::from(h) != size.height {
            tracing::warn!(%size, "fallback frame clamped to {w}x{h}");
        }
        self.ensure_font();
        let mut ctx = vello_cpu::RenderContext::new(w, h);
        ctx.set_paint(self.style.background.to_cpu_color());
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(w),
            f64::from(h),
        ));

        if let Some(text) = self.text.as_mut() {
            match text.layout_centered(
                message,
                self.style.font_size_px,
                self.style.foreground.into(),
                f32::from(w),
            ) {
                Ok(layout) => draw_layout(&mut ctx, &layout, &text.font, f32::from(h)),
                Err(e) => tracing::warn!(error = %e, "fallback text layout failed"),
            }
        }

        ctx.flush();
        let mut pixmap = vello_cpu::Pixmap::new(w, h);
        ctx.render_to_pixmap(&mut pixmap);
        FrameRGBA {
            width: u32::from(w),
            height: u32::from(h),
            data: pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        }
    }
}

fn draw_layout(
    ctx: &mut vello_cpu::RenderContext,
    layout: &parley::Layout<TextBrushRgba8>,
    font: &vello_cpu::peniko::FontData,
    height: f32,
) {
    let top = ((height - layout.height()) / 2.0).max(0.0);
    ctx.set_transform(vello_cpu::kurbo::Affine::translate((0.0, f64::from(top))));
    for line in layout.lines() {
        for item in line.items() {
            let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                continue;
            };
            let brush = run.style().brush;
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                brush.r, brush.g, brush.b, brush.a,
            ));
            let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                id: g.id,
                x: g.x,
                y: g.y,
            });
            ctx.glyph_run(font)
                .font_size(run.run().font_size())
                .fill_glyphs(glyphs);
        }
    }
    ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
}

fn clamp_u16(v: u32) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}

#[cfg(test)]
#[path = "../../tests/unit/surface/fallback.rs"]
mod tests;
