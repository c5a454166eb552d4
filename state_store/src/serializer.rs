use anyhow::{Context, Result};
use data_model::FunctionRecord;

pub fn encode_function(record: &FunctionRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record)
        .with_context(|| format!("error serializing function `{}`", record.name))
}

/// Decodes the record stored under `key`; errors name the key so a corrupt
/// entry can be found in the column family.
pub fn decode_function(key: &[u8], bytes: &[u8]) -> Result<FunctionRecord> {
    serde_json::from_slice(bytes).with_context(|| {
        format!(
            "error deserializing function stored under `{}`",
            String::from_utf8_lossy(key)
        )
    })
}
