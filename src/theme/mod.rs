use serde::Serialize;
use std::sync::Mutex;

/// Minimum contrast for readable body text (WCAG AA).
const TEXT_CONTRAST_TARGET: f64 = 4.5;
/// Below this the palette's muted text is considered unreadable and re-derived.
const MUTED_CONTRAST_FLOOR: f64 = 2.4;
const MUTED_BLEND_RATIO: f64 = 0.35;
const BORDER_BLEND_RATIO: f64 = 0.10;
const SCROLLBAR_BLEND_RATIO: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_css_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// HSL lightness on the 0..=255 scale.
    fn lightness(&self) -> u8 {
        let max = self.r.max(self.g).max(self.b) as u16;
        let min = self.r.min(self.g).min(self.b) as u16;
        ((max + min) / 2) as u8
    }
}

pub fn blend_toward_white(color: Color, ratio: f64) -> Color {
    let ratio = ratio.clamp(0.0, 1.0);
    Color::rgb(
        (color.r as f64 + (255.0 - color.r as f64) * ratio) as u8,
        (color.g as f64 + (255.0 - color.g as f64) * ratio) as u8,
        (color.b as f64 + (255.0 - color.b as f64) * ratio) as u8,
    )
}

pub fn blend_toward_black(color: Color, ratio: f64) -> Color {
    let ratio = ratio.clamp(0.0, 1.0);
    Color::rgb(
        (color.r as f64 * (1.0 - ratio)) as u8,
        (color.g as f64 * (1.0 - ratio)) as u8,
        (color.b as f64 * (1.0 - ratio)) as u8,
    )
}

/// Blends away from the base: dark colors lighten, light colors darken.
pub fn derived_accent_like(base: Color, ratio: f64) -> Color {
    if base.lightness() < 128 {
        blend_toward_white(base, ratio)
    } else {
        blend_toward_black(base, ratio)
    }
}

fn srgb_to_linear(channel: f64) -> f64 {
    if channel <= 0.04045 {
        channel / 12.92
    } else {
        ((channel + 0.055) / 1.055).powf(2.4)
    }
}

pub fn relative_luminance(color: Color) -> f64 {
    let r = srgb_to_linear(color.r as f64 / 255.0);
    let g = srgb_to_linear(color.g as f64 / 255.0);
    let b = srgb_to_linear(color.b as f64 / 255.0);
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

pub fn contrast_ratio(a: Color, b: Color) -> f64 {
    let la = relative_luminance(a);
    let lb = relative_luminance(b);
    let hi = la.max(lb);
    let lo = la.min(lb);
    (hi + 0.05) / (lo + 0.05)
}

fn min_contrast_against(fg: Color, backgrounds: &[Color]) -> f64 {
    backgrounds
        .iter()
        .map(|bg| contrast_ratio(fg, *bg))
        .fold(f64::INFINITY, f64::min)
}

/// Picks the first candidate meeting `min_ratio` against every background;
/// otherwise the better of pure black or pure white.
pub fn pick_readable_text(candidates: &[Color], backgrounds: &[Color], min_ratio: f64) -> Color {
    for candidate in candidates {
        if min_contrast_against(*candidate, backgrounds) >= min_ratio {
            return *candidate;
        }
    }
    let black_score = min_contrast_against(Color::BLACK, backgrounds);
    let white_score = min_contrast_against(Color::WHITE, backgrounds);
    if black_score >= white_score {
        Color::BLACK
    } else {
        Color::WHITE
    }
}

/// Palette slots the shim reads from the host frontend.
#[derive(Debug, Clone, Copy)]
pub struct HostPalette {
    pub window: Color,
    pub base: Color,
    pub button: Color,
    pub window_text: Color,
    pub text: Color,
    pub button_text: Color,
    pub placeholder_text: Option<Color>,
    pub highlight: Color,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeSlots {
    pub bg: String,
    pub surface: String,
    pub panel: String,
    pub text: String,
    #[serde(rename = "textMuted")]
    pub text_muted: String,
    pub accent: String,
    pub border: String,
    pub scrollbar: String,
}

impl ThemeSlots {
    pub fn signature(&self) -> String {
        [
            &self.bg,
            &self.surface,
            &self.panel,
            &self.text,
            &self.text_muted,
            &self.accent,
            &self.border,
            &self.scrollbar,
        ]
        .map(|s| s.as_str())
        .join("|")
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn derive_theme(palette: &HostPalette) -> ThemeSlots {
    let bg = palette.window;
    let surface = palette.base;
    let panel = palette.button;
    let text_backgrounds = [bg, surface, panel];

    let text = pick_readable_text(
        &[palette.window_text, palette.text, palette.button_text],
        &text_backgrounds,
        TEXT_CONTRAST_TARGET,
    );

    let mut text_muted = match palette.placeholder_text {
        Some(color) if color.a != 0 => color,
        _ => text,
    };
    // Some host themes expose placeholder text with poor contrast.
    if min_contrast_against(text_muted, &text_backgrounds) < MUTED_CONTRAST_FLOOR {
        text_muted = if relative_luminance(text) < 0.5 {
            blend_toward_white(text, MUTED_BLEND_RATIO)
        } else {
            blend_toward_black(text, MUTED_BLEND_RATIO)
        };
    }

    ThemeSlots {
        bg: bg.to_css_hex(),
        surface: surface.to_css_hex(),
        panel: panel.to_css_hex(),
        text: text.to_css_hex(),
        text_muted: text_muted.to_css_hex(),
        accent: palette.highlight.to_css_hex(),
        border: derived_accent_like(bg, BORDER_BLEND_RATIO).to_css_hex(),
        scrollbar: derived_accent_like(surface, SCROLLBAR_BLEND_RATIO).to_css_hex(),
    }
}

/// Inserts `payload.theme` into a `status_snapshot` envelope JSON. Any other
/// envelope, or unparseable input, passes through untouched.
pub fn augment_status_snapshot_envelope(envelope_json: &str, theme: &ThemeSlots) -> String {
    let Ok(mut envelope) = serde_json::from_str::<serde_json::Value>(envelope_json) else {
        return envelope_json.to_string();
    };
    if envelope.get("type").and_then(|t| t.as_str()) != Some("status_snapshot") {
        return envelope_json.to_string();
    }
    let Some(payload) = envelope.get_mut("payload").and_then(|p| p.as_object_mut()) else {
        return envelope_json.to_string();
    };
    payload.insert("theme".to_string(), theme.to_json_value());
    serde_json::to_string(&envelope).unwrap_or_else(|_| envelope_json.to_string())
}

#[derive(Debug, Default)]
struct ThemeCacheState {
    cached: Option<ThemeSlots>,
    signature: String,
}

/// Last theme derived from the host palette, with change detection.
#[derive(Debug, Default)]
pub struct ThemeCache {
    state: Mutex<ThemeCacheState>,
}

impl ThemeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the freshly derived theme (or `None` when no palette was
    /// available) and reports whether it differs from the previous one.
    pub fn refresh(&self, theme: Option<ThemeSlots>, reason: &str) -> bool {
        let next_signature = theme.as_ref().map(ThemeSlots::signature).unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        let changed = next_signature != state.signature;
        state.cached = theme;
        state.signature = next_signature;
        tracing::debug!(changed, reason, "theme cache refresh");
        changed
    }

    pub fn cached(&self) -> Option<ThemeSlots> {
        self.state.lock().unwrap().cached.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.cached = None;
        state.signature.clear();
    }
}
