//! Progress reporting for the scanner
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::walker::{ScanProgress, ScanReport};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays scan status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ScanProgress) {
        let msg = format!(
            "Dirs: {} | Files: {} | +{} / -{} | Errors: {} | Fetched: {} | Rate: {:.0}/s | In flight: {}",
            format_number(progress.dirs),
            format_number(progress.candidates),
            format_number(progress.positive),
            format_number(progress.negative),
            format_number(progress.errors),
            format_size(progress.bytes, BINARY),
            progress.files_per_second(),
            progress.outstanding,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print the final scan report
pub fn print_report(report: &ScanReport) {
    let stats = &report.stats;
    let walk = &report.walk;
    let secs = report.duration.as_secs_f64();

    println!();
    if report.completed {
        println!("{}", style("Scan Complete").green().bold());
    } else {
        println!("{}", style("Scan Interrupted (partial results)").yellow().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Directories:").bold(), format_number(walk.dirs_listed));
    println!("  {} {}", style("Files:").bold(), format_number(stats.total_files));
    println!("  {} {}", style("Positive:").bold(), format_number(stats.positive_count));
    println!("  {} {}", style("Negative:").bold(), format_number(stats.negative_count));
    if stats.error_count > 0 {
        println!(
            "  {} {} (download {}, classifier {})",
            style("Errors:").yellow().bold(),
            format_number(stats.error_count),
            format_number(stats.download_errors),
            format_number(stats.classifier_errors),
        );
    } else {
        println!("  {} 0", style("Errors:").bold());
    }
    if walk.listing_errors > 0 {
        println!(
            "  {} {}",
            style("Unlistable dirs:").yellow().bold(),
            format_number(walk.listing_errors)
        );
    }
    if walk.stat_failures > 0 {
        println!(
            "  {} {}",
            style("Stat failures:").yellow().bold(),
            format_number(walk.stat_failures)
        );
    }
    println!(
        "  {} {}",
        style("Downloaded:").bold(),
        format_size(stats.bytes_downloaded, BINARY)
    );
    println!(
        "  {} {:.1}s ({:.2} min, {:.0} files/sec)",
        style("Duration:").bold(),
        secs,
        secs / 60.0,
        report.files_per_second()
    );
    println!(
        "  {} {} requested, {} established, {} replaced",
        style("Sessions:").bold(),
        report.sessions_requested,
        report.sessions_established,
        report.sessions_replaced
    );
    println!();

    if !stats.positive_list.is_empty() {
        println!("{}", style("Flagged files").cyan().bold());
        println!("{}", style("─".repeat(50)).dim());
        for path in &stats.positive_list {
            println!("  {}", path);
        }
        println!();
    }
}

/// Print a header at the start of the scan
pub fn print_header(endpoint: &str, root: &str, connections: usize, threshold: f32) {
    println!();
    println!(
        "{} {}",
        style("remote-sweep").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), endpoint);
    println!("  {} {}", style("Root:").bold(), root);
    println!("  {} {}", style("Sessions:").bold(), connections);
    println!("  {} {:.2}", style("Threshold:").bold(), threshold);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }
}
