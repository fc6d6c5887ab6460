use super::{orchestrator, report, spinner};
use netcfg_core::{ClassId, NetcfgConfig};
use std::path::Path;

pub fn run(
    store_path: &Path,
    config: &NetcfgConfig,
    component_id: &str,
    class_id: ClassId,
    inf: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let orchestrator = orchestrator(store_path, config);
    let pb = (!json).then(|| spinner(&format!("installing {component_id}...")));
    let result = orchestrator.run_install(&config.app_name, component_id, class_id, inf);
    report("install", component_id, &result, pb.as_ref(), json)
}
