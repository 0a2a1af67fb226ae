use super::{json_pretty, parse_pairs, with_spinner, EXIT_SUCCESS};
use berth_core::Engine;
use berth_runtime::{InstanceIdentity, InstanceStorage};
use berth_schema::ContainerArgs;

pub struct CreateOptions<'a> {
    pub image: Option<&'a str>,
    pub profiles: &'a [String],
    pub config: &'a [String],
    pub ephemeral: bool,
}

pub fn run(engine: &Engine, name: &str, opts: &CreateOptions<'_>, json: bool) -> Result<u8, String> {
    let mut args = ContainerArgs::container(name);
    args.config = parse_pairs(opts.config)?;
    if !opts.profiles.is_empty() {
        args.profiles = Some(opts.profiles.to_vec());
    }
    args.ephemeral = opts.ephemeral;

    let inst = with_spinner(json, &format!("creating {name}..."), || match opts.image {
        Some(fingerprint) => engine.create_from_image(args, fingerprint),
        None => engine.create_as_empty(args),
    })?;

    if json {
        let payload = serde_json::json!({
            "name": inst.name(),
            "pool": inst.pool(),
            "record": inst.record(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("created '{}' on pool '{}'", inst.name(), inst.pool());
    }
    Ok(EXIT_SUCCESS)
}
