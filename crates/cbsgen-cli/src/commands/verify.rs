use super::{
    colorize_verdict, json_pretty, progress_bar, progress_callback, EXIT_SUCCESS,
    EXIT_VERIFY_FAILED,
};
use cbsgen_core::{BatchReport, CancelToken, Config, Verifier, VerifyOptions};
use cbsgen_store::TarCodec;
use console::Style;
use std::path::Path;

pub fn run(path: &Path, config: &Config, cancel: &CancelToken, json: bool) -> Result<u8, String> {
    let codec = TarCodec::new(config.container_extension.clone());
    let options = VerifyOptions {
        jobs: config.effective_jobs(),
        unit_timeout: config.unit_timeout(),
    };
    let pb = if json {
        None
    } else {
        Some(progress_bar(0, "verifying"))
    };
    let mut verifier = Verifier::new(&codec, options).with_cancel(cancel.clone());
    if let Some(ref pb) = pb {
        verifier = verifier.with_progress(progress_callback(pb));
    }

    let report = verifier
        .verify_path(path, |container| {
            if let Some(ref pb) = pb {
                pb.set_position(0);
                pb.set_message(container.display().to_string());
            }
        })
        .map_err(|e| e.to_string());
    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }
    let report = report?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.is_valid() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_VERIFY_FAILED)
    }
}

fn print_report(report: &BatchReport) {
    let ok = Style::new().green();
    let bad = Style::new().red().bold();
    for package in &report.packages {
        let mark = if package.is_valid() {
            ok.apply_to("✓")
        } else {
            bad.apply_to("✗")
        };
        println!(
            "{mark} {} ({} files)",
            package.container.display(),
            package.results.len()
        );
        for failure in package.failures() {
            println!("    {} {}", colorize_verdict(failure.verdict), failure.placement_path);
            println!("      expected: {}", failure.declared_digest);
            println!(
                "      actual:   {}",
                failure.actual_digest.as_deref().unwrap_or("-")
            );
            if let Some(reason) = &failure.reason {
                println!("      reason:   {reason}");
            }
        }
    }
    for error in &report.errors {
        println!("{} {}: {}", bad.apply_to("✗"), error.container.display(), error.error);
    }
    for skipped in &report.skipped {
        println!(
            "{}",
            Style::new()
                .dim()
                .apply_to(format!("- {} (not a service package)", skipped.display()))
        );
    }
    println!(
        "{} packages checked, {} failed, {} skipped",
        report.packages.len() + report.errors.len(),
        report.failed_packages(),
        report.skipped.len()
    );
}
