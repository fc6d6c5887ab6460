use super::{
    colorize_class, describe_error, exit_code_for, json_pretty, orchestrator, EXIT_SUCCESS,
};
use netcfg_core::NetcfgConfig;
use std::path::Path;

pub fn run(store_path: &Path, config: &NetcfgConfig, json: bool) -> Result<u8, String> {
    let components = match orchestrator(store_path, config).list_components(&config.app_name) {
        Ok(c) => c,
        Err(e) => {
            if json {
                let err = serde_json::json!({
                    "status": "failed",
                    "kind": e.kind(),
                    "code": e.code().map(|c| format!("{c:#010x}")),
                    "retryable": e.kind().is_retryable(),
                    "message": e.to_string(),
                });
                println!("{}", json_pretty(&err)?);
            } else {
                eprintln!("error: {}", describe_error(&e));
            }
            return Ok(exit_code_for(&e));
        }
    };

    if json {
        println!("{}", json_pretty(&components)?);
    } else if components.is_empty() {
        println!("no components installed.");
    } else {
        println!("{:<32} CLASS", "COMPONENT");
        for c in &components {
            println!("{:<32} {}", c.component_id, colorize_class(c.class_id));
        }
    }
    Ok(EXIT_SUCCESS)
}
