//! Diagram themes and accessibility validation.
//!
//! Every theme in use must pass WCAG AA: foreground/background contrast
//! ratio at least 4.5, accent contrast at least 3.0 (non-text graphics),
//! and a font size of at least 10 pt. A violation aborts the run — an
//! unreadable diagram is an invariant failure, not a cosmetic one.

use serde::{Deserialize, Serialize};

pub const MIN_TEXT_CONTRAST: f64 = 4.5;
pub const MIN_ACCENT_CONTRAST: f64 = 3.0;
pub const MIN_FONT_SIZE_PT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ThemeChoice {
    Light,
    Dark,
    /// Both variants; dark output files carry a `.dark` suffix.
    Auto,
}

impl ThemeChoice {
    pub fn resolve(&self) -> Vec<&'static Theme> {
        match self {
            ThemeChoice::Light => vec![&LIGHT],
            ThemeChoice::Dark => vec![&DARK],
            ThemeChoice::Auto => vec![&LIGHT, &DARK],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Theme {
    pub id: &'static str,
    pub foreground: &'static str,
    pub background: &'static str,
    pub accent: &'static str,
    pub font_size_pt: u32,
}

pub const LIGHT: Theme = Theme {
    id: "light",
    foreground: "#1b1d23",
    background: "#ffffff",
    accent: "#3356cc",
    font_size_pt: 14,
};

pub const DARK: Theme = Theme {
    id: "dark",
    foreground: "#f4f7fb",
    background: "#0b1622",
    accent: "#64ffda",
    font_size_pt: 14,
};

impl Theme {
    /// Accessibility violations, empty when the theme is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.font_size_pt < MIN_FONT_SIZE_PT {
            issues.push(format!(
                "theme '{}': font size {}pt below {}pt minimum",
                self.id, self.font_size_pt, MIN_FONT_SIZE_PT
            ));
        }
        match contrast_ratio(self.foreground, self.background) {
            Ok(ratio) if ratio < MIN_TEXT_CONTRAST => issues.push(format!(
                "theme '{}': foreground contrast {ratio:.2} below {MIN_TEXT_CONTRAST}",
                self.id
            )),
            Ok(_) => {}
            Err(err) => issues.push(format!("theme '{}': {err}", self.id)),
        }
        match contrast_ratio(self.accent, self.background) {
            Ok(ratio) if ratio < MIN_ACCENT_CONTRAST => issues.push(format!(
                "theme '{}': accent contrast {ratio:.2} below {MIN_ACCENT_CONTRAST}",
                self.id
            )),
            Ok(_) => {}
            Err(err) => issues.push(format!("theme '{}': {err}", self.id)),
        }
        issues
    }
}

/// WCAG contrast ratio between two hex colors.
pub fn contrast_ratio(color_a: &str, color_b: &str) -> Result<f64, String> {
    let lum_a = relative_luminance(color_a)?;
    let lum_b = relative_luminance(color_b)?;
    let lighter = lum_a.max(lum_b);
    let darker = lum_a.min(lum_b);
    Ok((lighter + 0.05) / (darker + 0.05))
}

fn relative_luminance(color: &str) -> Result<f64, String> {
    let hex = color.trim_start_matches('#');
    if hex.len() != 6 {
        return Err(format!("expected 6-digit hex color, got '{color}'"));
    }
    let mut channels = [0.0f64; 3];
    for (index, channel) in channels.iter_mut().enumerate() {
        let raw = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16)
            .map_err(|_| format!("invalid hex color '{color}'"))?;
        let srgb = raw as f64 / 255.0;
        *channel = if srgb <= 0.03928 {
            srgb / 12.92
        } else {
            ((srgb + 0.055) / 1.055).powf(2.4)
        };
    }
    Ok(0.2126 * channels[0] + 0.7152 * channels[1] + 0.0722 * channels[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_themes_pass_wcag_aa() {
        assert!(LIGHT.validate().is_empty(), "{:?}", LIGHT.validate());
        assert!(DARK.validate().is_empty(), "{:?}", DARK.validate());
    }

    #[test]
    fn black_on_white_has_max_contrast() {
        let ratio = contrast_ratio("#000000", "#ffffff").unwrap();
        assert!((ratio - 21.0).abs() < 0.01);
    }

    #[test]
    fn low_contrast_theme_is_rejected() {
        let theme = Theme {
            id: "pale",
            foreground: "#cccccc",
            background: "#ffffff",
            accent: "#dddddd",
            font_size_pt: 14,
        };
        let issues = theme.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("foreground contrast"));
    }

    #[test]
    fn tiny_font_is_rejected() {
        let theme = Theme { font_size_pt: 8, ..LIGHT };
        assert!(theme.validate().iter().any(|issue| issue.contains("font size")));
    }

    #[test]
    fn malformed_color_is_reported() {
        assert!(contrast_ratio("#fff", "#ffffff").is_err());
        assert!(contrast_ratio("#gggggg", "#ffffff").is_err());
    }

    #[test]
    fn auto_resolves_to_both_variants() {
        let themes = ThemeChoice::Auto.resolve();
        assert_eq!(themes.len(), 2);
        assert_eq!(themes[0].id, "light");
        assert_eq!(themes[1].id, "dark");
    }
}
