pub mod build;
pub mod completions;
pub mod man_pages;
pub mod pack;
pub mod packages;
pub mod verify;

use cbsgen_core::{ProgressFn, Verdict};
use cbsgen_image::{DirectoryDisk, Disk};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_VERIFY_FAILED: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn open_images(roots: &[PathBuf]) -> Result<Vec<Box<dyn Disk>>, String> {
    roots
        .iter()
        .map(|root| {
            DirectoryDisk::open(root)
                .map(|d| Box::new(d) as Box<dyn Disk>)
                .map_err(|e| format!("{}: {e}", root.display()))
        })
        .collect()
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn progress_bar(total: usize, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})")
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb.set_message(msg.to_owned());
    pb
}

/// Progress callback that drives `pb` from worker threads.
pub fn progress_callback(pb: &ProgressBar) -> Arc<ProgressFn> {
    let pb = pb.clone();
    Arc::new(move |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_verdict(verdict: Verdict) -> String {
    use console::Style;
    let text = verdict.to_string();
    match verdict {
        Verdict::Match => Style::new().green().apply_to(text).to_string(),
        Verdict::Mismatch => Style::new().red().bold().apply_to(text).to_string(),
        Verdict::NotFound => Style::new().yellow().apply_to(text).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_verdict_keeps_text() {
        assert!(colorize_verdict(Verdict::Match).contains("match"));
        assert!(colorize_verdict(Verdict::Mismatch).contains("mismatch"));
        assert!(colorize_verdict(Verdict::NotFound).contains("not found"));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_MANIFEST_ERROR,
            EXIT_STORE_ERROR,
            EXIT_VERIFY_FAILED,
        ];
        for (i, a) in codes.iter().enumerate() {
            assert!(codes[i + 1..].iter().all(|b| a != b));
        }
    }

    #[test]
    fn open_images_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_images(&[dir.path().join("missing")])
            .err()
            .expect("expected open_images to fail");
        assert!(err.contains("missing"));
    }

    #[test]
    fn progress_callback_moves_bar() {
        let pb = ProgressBar::hidden();
        let cb = progress_callback(&pb);
        cb(3, 10);
        assert_eq!(pb.position(), 3);
        assert_eq!(pb.length(), Some(10));
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
