//! One-line status messages printed after a run.

use owo_colors::OwoColorize;

#[derive(Debug, Clone, Copy)]
enum Status {
    Success,
    Error,
    Warning,
}

impl Status {
    fn render(self, message: &str) -> String {
        match self {
            Status::Success => format!("{} {}", "✓".green(), message.green().bold()),
            Status::Error => format!("{} {}", "✗".red(), message.red().bold()),
            Status::Warning => format!("{} {}", "⚠".yellow(), message.yellow().bold()),
        }
    }

    fn print(self, message: &str) {
        println!("  {}", self.render(message));
    }
}

/// Prints a success message.
pub fn print_success(message: &str) {
    Status::Success.print(message);
}

/// Prints an error message.
pub fn print_error(message: &str) {
    Status::Error.print(message);
}

/// Prints a warning message.
pub fn print_warning(message: &str) {
    Status::Warning.print(message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_keeps_message_and_symbol() {
        let rendered = Status::Warning.render("Interrupted");
        assert!(rendered.contains('⚠'));
        assert!(rendered.contains("Interrupted"));
        assert!(Status::Success.render("done").contains('✓'));
        assert!(Status::Error.render("failed").contains('✗'));
    }
}
