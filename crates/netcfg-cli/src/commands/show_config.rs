use super::{json_pretty, EXIT_SUCCESS};
use netcfg_core::NetcfgConfig;
use std::path::Path;

pub fn run(store_path: &Path, config: &NetcfgConfig, json: bool) -> Result<u8, String> {
    let effective = NetcfgConfig {
        store: Some(store_path.to_path_buf()),
        ..config.clone()
    };
    if json {
        println!("{}", json_pretty(&effective)?);
    } else {
        let rendered = toml::to_string_pretty(&effective)
            .map_err(|e| format!("config serialization failed: {e}"))?;
        print!("{rendered}");
    }
    Ok(EXIT_SUCCESS)
}
