//! Terminal styling for part listings and run summaries.
//!
//! Map text itself is never colored: it goes to files and to consumers that
//! count its tokens. Only the CLI's human-facing listings pass through here,
//! and only when stdout is a terminal.

use std::fmt;

use owo_colors::{OwoColorize, Style};

/// Annotations shown next to a part in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Badge {
    /// Holds a single excerpt larger than the budget
    Oversized,
    /// Part of an unranked file listing
    Unranked,
}

impl Badge {
    pub fn label(&self) -> &'static str {
        match self {
            Badge::Oversized => "oversized",
            Badge::Unranked => "unranked",
        }
    }

    pub fn style(&self) -> Style {
        match self {
            Badge::Oversized => Style::new().bright_red().bold(),
            Badge::Unranked => Style::new().yellow().dimmed(),
        }
    }

    pub fn render(&self, color: bool) -> String {
        if color {
            format!("[{}]", self.label().style(self.style()))
        } else {
            format!("[{}]", self.label())
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(false))
    }
}

/// Styling helpers; each returns plain text when `color` is false.
pub struct Colorizer;

impl Colorizer {
    /// Bold blue, for file paths
    pub fn file_path(s: &str, color: bool) -> String {
        if color {
            s.bright_blue().bold().to_string()
        } else {
            s.to_string()
        }
    }

    pub fn part_index(index: usize, color: bool) -> String {
        let label = format!("part {:>5}", index);
        if color {
            label.green().to_string()
        } else {
            label
        }
    }

    pub fn tokens(count: usize, color: bool) -> String {
        let label = format!("{} tokens", count);
        if color {
            label.cyan().to_string()
        } else {
            label
        }
    }

    /// Secondary information (sizes, hints)
    pub fn dim(s: &str, color: bool) -> String {
        if color {
            s.dimmed().to_string()
        } else {
            s.to_string()
        }
    }
}

/// One line of a part listing: `part     1  path  detail  [badges]`.
pub fn part_line(index: usize, path: &str, detail: &str, badges: &[Badge], color: bool) -> String {
    let mut line = format!(
        "{}  {}  {}",
        Colorizer::part_index(index, color),
        Colorizer::file_path(path, color),
        detail
    );
    for badge in badges {
        line.push(' ');
        line.push_str(&badge.render(color));
    }
    line
}
