//! Show the metadata a plugin reports

use crate::logger;
use crate::GlobalOpts;
use sluice_bridge::Bridge;

/// Load a plugin and print its `plugin_info` metadata as JSON.
///
/// Only the JSON lands on stdout so the output stays pipeable.
pub fn handle_info(plugin_name: &str, opts: &GlobalOpts) -> Result<(), String> {
    logger::debug(&format!("Querying plugin '{}'", plugin_name));

    let bridge = Bridge::new(opts.search_paths());
    let Some(metadata) = bridge.info(plugin_name) else {
        return Err(format!(
            "Plugin '{}' reported no usable metadata (see log for details)",
            plugin_name
        ));
    };

    let rendered = serde_json::to_string_pretty(&metadata)
        .map_err(|e| format!("Failed to render metadata: {}", e))?;
    println!("{}", rendered);

    Ok(())
}
