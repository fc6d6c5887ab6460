use super::{orchestrator, report, spinner};
use netcfg_core::NetcfgConfig;
use std::path::Path;

pub fn run(
    store_path: &Path,
    config: &NetcfgConfig,
    component_id: &str,
    json: bool,
) -> Result<u8, String> {
    let orchestrator = orchestrator(store_path, config);
    let pb = (!json).then(|| spinner(&format!("uninstalling {component_id}...")));
    let result = orchestrator.run_uninstall(&config.app_name, component_id);
    report("uninstall", component_id, &result, pb.as_ref(), json)
}
