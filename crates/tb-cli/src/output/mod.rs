//! Output formatting utilities for the CLI
//!
//! Colored status lines and the end-of-session summary.

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

use tb_session::SessionSummary;

/// Describe how a session ended, for printing after the terminal is restored
pub fn format_summary(summary: &SessionSummary) -> String {
    let mut output = format!("Session {} {}", summary.id, summary.final_state);
    match summary.exit_code {
        Some(code) => output.push_str(&format!(", remote exited with status {}", code)),
        None => output.push_str(", detached"),
    }
    if summary.reconnects > 0 {
        let plural = if summary.reconnects == 1 { "" } else { "s" };
        output.push_str(&format!(" after {} reconnect{}", summary.reconnects, plural));
    }
    if summary.dropped_input > 0 {
        output.push_str(&format!(
            " ({} input chunks dropped)",
            summary.dropped_input
        ));
    }
    output
}

fn print_colored(mut out: impl Write, color: Color, symbol: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(symbol),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_colored(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    print_colored(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    print_colored(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_colored(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_core::{SessionId, SessionState};

    fn summary() -> SessionSummary {
        SessionSummary {
            id: SessionId::generate(),
            final_state: SessionState::Closed,
            exit_code: None,
            reconnects: 0,
            dropped_input: 0,
            resizes_sent: 1,
        }
    }

    #[test]
    fn test_summary_for_detach() {
        let text = format_summary(&summary());
        assert!(text.ends_with("closed, detached"), "{}", text);
    }

    #[test]
    fn test_summary_with_exit_and_reconnects() {
        let mut s = summary();
        s.exit_code = Some(2);
        s.reconnects = 3;
        s.dropped_input = 4;
        let text = format_summary(&s);
        assert!(text.contains("remote exited with status 2"));
        assert!(text.contains("after 3 reconnects"));
        assert!(text.contains("4 input chunks dropped"));
    }
}
