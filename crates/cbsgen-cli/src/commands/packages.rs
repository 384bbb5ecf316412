use super::{json_pretty, open_images, EXIT_SUCCESS};
use cbsgen_core::{Builder, Config};
use cbsgen_image::partition_label;
use cbsgen_store::TarCodec;
use std::path::PathBuf;

pub fn run(images: &[PathBuf], config: Config, json: bool) -> Result<u8, String> {
    let disks = open_images(images)?;
    let codec = TarCodec::new(config.container_extension.clone());
    let builder = Builder::new(&disks, config, &codec);
    let jobs = builder.discover().map_err(|e| e.to_string())?;
    let partitions = builder.partitions();

    if json {
        let payload: Vec<_> = jobs
            .iter()
            .map(|j| {
                serde_json::json!({
                    "partition": partition_label(partitions[j.partition].name()),
                    "manifest": j.manifest,
                    "kind": j.kind,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for job in &jobs {
            println!("{}:{}", partition_label(partitions[job.partition].name()), job.manifest);
        }
        println!("{} packages", jobs.len());
    }
    Ok(EXIT_SUCCESS)
}
