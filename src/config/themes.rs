use std::collections::HashMap;

use ratatui::style::Color;

use super::ThemeName;

/// Colors the renderer pulls from; one per theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub accent: Color,
    pub muted: Color,
    pub highlight: Color,
    pub editing: Color,
    pub danger: Color,
    pub success: Color,
    pub selection_fg: Color,
    pub selection_bg: Color,
}

#[derive(Debug, Clone)]
pub struct ThemeRegistry {
    palettes: HashMap<ThemeName, Palette>,
}

impl ThemeRegistry {
    #[cfg(test)]
    pub fn contains(&self, theme: &ThemeName) -> bool {
        self.palettes.contains_key(theme)
    }

    pub fn palette(&self, theme: &ThemeName) -> Palette {
        self.palettes
            .get(theme)
            .or_else(|| self.palettes.get(&ThemeName::Dark))
            .copied()
            .unwrap_or(DARK)
    }
}

const DARK: Palette = Palette {
    accent: Color::Cyan,
    muted: Color::DarkGray,
    highlight: Color::Yellow,
    editing: Color::Magenta,
    danger: Color::Red,
    success: Color::Green,
    selection_fg: Color::Black,
    selection_bg: Color::Blue,
};

impl Default for ThemeRegistry {
    fn default() -> Self {
        let palettes = [
            (ThemeName::Dark, DARK),
            (
                ThemeName::Light,
                Palette {
                    accent: Color::Blue,
                    muted: Color::Gray,
                    highlight: Color::Rgb(176, 96, 0),
                    editing: Color::Magenta,
                    danger: Color::Red,
                    success: Color::Green,
                    selection_fg: Color::White,
                    selection_bg: Color::Blue,
                },
            ),
            (
                ThemeName::HighContrast,
                Palette {
                    accent: Color::White,
                    muted: Color::Gray,
                    highlight: Color::LightYellow,
                    editing: Color::LightMagenta,
                    danger: Color::LightRed,
                    success: Color::LightGreen,
                    selection_fg: Color::Black,
                    selection_bg: Color::White,
                },
            ),
            (
                ThemeName::Solarized,
                Palette {
                    accent: Color::Rgb(38, 139, 210),
                    muted: Color::Rgb(88, 110, 117),
                    highlight: Color::Rgb(181, 137, 0),
                    editing: Color::Rgb(211, 54, 130),
                    danger: Color::Rgb(220, 50, 47),
                    success: Color::Rgb(133, 153, 0),
                    selection_fg: Color::Rgb(253, 246, 227),
                    selection_bg: Color::Rgb(7, 54, 66),
                },
            ),
        ]
        .into_iter()
        .collect();
        Self { palettes }
    }
}
