use anyhow::{anyhow, Result};
use data_model::FunctionRecord;
use rocksdb::{IteratorMode, TransactionDB};
use strum::AsRefStr;

use crate::serializer::{decode_function, encode_function};

#[derive(AsRefStr, strum::Display, strum::EnumIter)]
pub enum RegistryColumns {
    Functions, //  FunctionName -> FunctionRecord
}

/// Writes a record under its name in a single committed transaction.
pub(crate) fn upsert_function(db: &TransactionDB, record: &FunctionRecord) -> Result<()> {
    let column = RegistryColumns::Functions;
    let cf_handle = db
        .cf_handle(column.as_ref())
        .ok_or(anyhow!("Failed to get column family {}", column))?;
    let serialized = encode_function(record)?;

    let txn = db.transaction();
    txn.put_cf(&cf_handle, record.name.as_bytes(), &serialized)?;
    txn.commit()?;
    Ok(())
}

pub(crate) fn delete_function(db: &TransactionDB, name: &str) -> Result<()> {
    let column = RegistryColumns::Functions;
    let cf_handle = db
        .cf_handle(column.as_ref())
        .ok_or(anyhow!("Failed to get column family {}", column))?;

    let txn = db.transaction();
    txn.delete_cf(&cf_handle, name.as_bytes())?;
    txn.commit()?;
    Ok(())
}

/// Reads every persisted record, in key order.
pub(crate) fn load_functions(db: &TransactionDB) -> Result<Vec<FunctionRecord>> {
    let column = RegistryColumns::Functions;
    let cf_handle = db
        .cf_handle(column.as_ref())
        .ok_or(anyhow!("Failed to get column family {}", column))?;

    db.iterator_cf(&cf_handle, IteratorMode::Start)
        .map(|item| {
            let (key, value) = item.map_err(|e| anyhow!(e.to_string()))?;
            let record = decode_function(&key, &value)?;
            if record.name.as_bytes() != &*key {
                return Err(anyhow!(
                    "function stored under `{}` is named `{}`",
                    String::from_utf8_lossy(&key),
                    record.name
                ));
            }
            Ok(record)
        })
        .collect()
}
