use std::{fs, path::Path};

use anyhow::{Context, Result};
use flowly_channel::{InboundEvent, OutgoingMessage};
use schemars::{JsonSchema, schema_for};

use crate::flow::FlowDefinition;

pub const FLOW_SCHEMA_FILE: &str = "flow.schema.json";
pub const INBOUND_SCHEMA_FILE: &str = "inbound-event.schema.json";
pub const OUTGOING_SCHEMA_FILE: &str = "outgoing-message.schema.json";

fn pretty<T: JsonSchema>() -> Result<String> {
    Ok(serde_json::to_string_pretty(&schema_for!(T))?)
}

/// Writes the flow document schema plus the channel-facing message schemas
/// into `out_dir`, returning the files written.
pub fn write_schema(out_dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating schema directory {}", out_dir.display()))?;

    let schemas = [
        (FLOW_SCHEMA_FILE, pretty::<FlowDefinition>()?),
        (INBOUND_SCHEMA_FILE, pretty::<InboundEvent>()?),
        (OUTGOING_SCHEMA_FILE, pretty::<OutgoingMessage>()?),
    ];

    let mut written = Vec::with_capacity(schemas.len());
    for (file, json) in schemas {
        let path = out_dir.join(file);
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
