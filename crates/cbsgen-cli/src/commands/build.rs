use super::{
    json_pretty, open_images, progress_bar, progress_callback, spin_fail, spin_ok, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use cbsgen_core::{AssembleOutcome, Builder, CancelToken, Config};
use cbsgen_store::TarCodec;
use console::Style;
use std::path::{Path, PathBuf};

pub fn run(
    images: &[PathBuf],
    output: &Path,
    config: Config,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let disks = open_images(images)?;
    let codec = TarCodec::new(config.container_extension.clone());
    let builder = Builder::new(&disks, config, &codec).with_cancel(cancel.clone());

    let total = builder.package_count().map_err(|e| e.to_string())?;
    let pb = if json {
        None
    } else {
        Some(progress_bar(total, "building packages"))
    };

    let report = match builder.build_all(output, pb.as_ref().map(progress_callback)) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("{} packages processed", r.packages.len()));
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "build failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        let dim = Style::new().dim();
        for package in &report.packages {
            let target = package
                .destination
                .as_ref()
                .map_or_else(|| package.manifest.clone(), |d| d.display().to_string());
            match (&package.outcome, &package.error) {
                (_, Some(error)) => {
                    println!("  {} {}: {error}", Style::new().red().apply_to("FAIL"), package.manifest);
                }
                (Some(AssembleOutcome::Built { entries, missing, wrapped }), _) => {
                    let note = if *wrapped { " (wrapped)" } else { "" };
                    println!("  built {target} [{entries} files{note}]");
                    for m in missing {
                        println!("    {}", dim.apply_to(format!("missing {m}")));
                    }
                }
                (Some(AssembleOutcome::Empty { missing }), _) => {
                    println!(
                        "  {} {}: none of {} files found",
                        Style::new().yellow().apply_to("empty"),
                        package.manifest,
                        missing.len()
                    );
                }
                (Some(AssembleOutcome::Skipped), _) => {
                    println!("  {}", dim.apply_to(format!("exists {target}")));
                }
                (None, None) => {}
            }
        }
        if let Some(metadata) = &report.metadata {
            for path in &metadata.written {
                println!("  exported {}", path.display());
            }
            for fm in &metadata.missing {
                println!("    {}", dim.apply_to(format!("missing feature manifest {fm}")));
            }
        }
        println!(
            "built: {}, skipped: {}, empty: {}, failed: {}, missing files: {}",
            report.built(),
            report.skipped(),
            report.empty(),
            report.failed(),
            report.missing_files()
        );
    }

    if report.is_success() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}
