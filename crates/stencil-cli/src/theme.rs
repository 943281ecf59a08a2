//! CLI theme and styling.

use colored::Colorize;

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a dimmed message.
    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(50).dimmed().to_string()
    }

    /// Color an owner label: built-ins dimmed, plugins magenta.
    pub(crate) fn owner(owner: &str) -> String {
        if owner == "built-in" {
            Self::dimmed(owner)
        } else {
            owner.magenta().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_survives_styling() {
        colored::control::set_override(false);
        assert_eq!(Theme::success("loaded"), "✓ loaded");
        assert_eq!(Theme::error("failed"), "✗ failed");
        assert_eq!(Theme::owner("built-in"), "built-in");
        assert_eq!(Theme::owner("net"), "net");
        assert_eq!(Theme::separator().chars().count(), 50);
    }
}
