use ratatui::style::Color;

use super::ThemeName;

/// Colours the terminal view draws with.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub accent: Color,
    pub header: Color,
    pub text: Color,
    pub muted: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
    pub editing: Color,
    pub danger: Color,
}

impl Palette {
    pub fn for_theme(theme: ThemeName) -> Self {
        match theme {
            ThemeName::Dark => Self {
                accent: Color::Cyan,
                header: Color::Yellow,
                text: Color::White,
                muted: Color::Gray,
                selection_bg: Color::Blue,
                selection_fg: Color::Black,
                editing: Color::Magenta,
                danger: Color::Red,
            },
            ThemeName::Light => Self {
                accent: Color::Blue,
                header: Color::Magenta,
                text: Color::Black,
                muted: Color::DarkGray,
                selection_bg: Color::LightBlue,
                selection_fg: Color::Black,
                editing: Color::Red,
                danger: Color::Red,
            },
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::for_theme(ThemeName::default())
    }
}
