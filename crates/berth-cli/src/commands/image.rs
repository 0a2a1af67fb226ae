use super::{json_pretty, parse_pairs, with_spinner, EXIT_SUCCESS};
use berth_core::Engine;
use std::path::Path;

pub fn add(engine: &Engine, tarball: &Path, properties: &[String], json: bool) -> Result<u8, String> {
    let properties = parse_pairs(properties)?;
    let image = with_spinner(json, "importing image...", || {
        engine.import_image_file(tarball, properties)
    })?;
    if json {
        println!("{}", json_pretty(&image)?);
    } else {
        println!("image {} ({} bytes)", image.fingerprint, image.size);
    }
    Ok(EXIT_SUCCESS)
}
