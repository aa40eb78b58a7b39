//! Terminal rendering for composition results and progress.

use std::io::Write;

use colored::Colorize;
use compositor::RenderProgress;

/// How many stderr lines to show when a render fails.
const STDERR_TAIL_LINES: usize = 12;

#[derive(Clone)]
pub struct OutputHandler {
    /// Human-readable output; off when printing JSON.
    pub decorated: bool,
}

impl OutputHandler {
    pub fn new(decorated: bool) -> Self {
        Self { decorated }
    }

    pub fn print_header(&self, text: &str) {
        if !self.decorated {
            return;
        }
        println!();
        println!("{}", format!("▶ {}", text).bright_yellow().bold());
        println!("{}", "─".repeat(60).dimmed());
    }

    pub fn print_success(&self, text: &str) {
        println!("{} {}", "✓".bright_green(), text.bright_white());
    }

    pub fn print_error(&self, text: &str) {
        println!("{} {}", "✗".bright_red(), text.bright_red());
    }

    pub fn print_info(&self, text: &str) {
        println!("{} {}", "ℹ".bright_blue(), text);
    }

    /// Single updating status line.
    pub fn print_progress(&self, progress: &RenderProgress) {
        if !self.decorated {
            return;
        }
        let percent = progress
            .percent
            .map(|p| format!("{:>5.1}%", p))
            .unwrap_or_else(|| "  ...".to_string());
        let speed = progress.speed.as_deref().unwrap_or("-");
        print!(
            "\r  {} {} {} {}",
            percent.bright_cyan(),
            progress.timemark.bright_white(),
            "speed".dimmed(),
            speed.dimmed()
        );
        let _ = std::io::stdout().flush();
    }

    pub fn finish_progress(&self) {
        if self.decorated {
            println!();
        }
    }

    /// Last lines of engine stderr, where ffmpeg puts the actual error.
    pub fn print_stderr_tail(&self, stderr: &str) {
        let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        println!("{}", "─".repeat(60).dimmed());
        for line in &lines[start..] {
            println!("  {}", line.dimmed());
        }
    }
}

