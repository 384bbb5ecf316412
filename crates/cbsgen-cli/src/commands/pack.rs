use super::{json_pretty, EXIT_SUCCESS};
use cbsgen_store::{pack_directory, TarCodec};
use std::path::Path;

pub fn run(dest: &Path, dir: &Path, json: bool) -> Result<u8, String> {
    let codec = match dest.extension() {
        Some(ext) => TarCodec::new(ext.to_string_lossy()),
        None => TarCodec::default(),
    };
    let count = pack_directory(&codec, dest, dir).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "container": dest,
            "entries": count,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("packed {count} files into {}", dest.display());
    }
    Ok(EXIT_SUCCESS)
}
