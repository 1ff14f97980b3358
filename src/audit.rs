use crate::data::Catalog;
use crate::error::Error;
use crate::registry::{Registry, ReportDefinition};
use datafusion::arrow::array::{Array, RecordBatch, StringArray};
use datafusion::arrow::compute::{cast_with_options, CastOptions};
use datafusion::arrow::datatypes::DataType;
use datafusion::common::ScalarValue;
use datafusion::functions_aggregate::expr_fn::{count, count_distinct, max, min};
use datafusion::prelude::{col, lit, ParquetReadOptions, SessionContext};
use log::info;
use serde::Serialize;
use std::path::Path;

/// Data-quality summary of one warehouse table.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TableAudit {
    pub table: String,
    pub report_type: String,
    pub provisioned: bool,
    pub row_count: i64,
    pub min_partition: Option<String>,
    pub max_partition: Option<String>,
    pub partitions: i64,
    pub null_partitions: i64,
    /// Key combinations stored more than once.
    pub duplicate_keys: usize,
}

/// Picks the definitions whose report type, alias or table is named; all of
/// them when `names` is empty.
pub fn select_definitions<'a>(
    registry: &'a Registry,
    names: &[String],
) -> Result<Vec<&'a ReportDefinition>, Error> {
    if names.is_empty() {
        return Ok(registry.list_all().iter().collect());
    }

    names
        .iter()
        .map(|name| {
            registry
                .list_all()
                .iter()
                .find(|d| d.target_table == *name)
                .map_or_else(|| registry.lookup(name), Ok)
        })
        .collect()
}

/// Audits the target table of every definition.
///
/// # Arguments
/// * `warehouse_dir` - Root of the warehouse.
/// * `catalog` - Declared table schemas.
/// * `definitions` - Reports whose tables to audit.
///
/// # Returns
/// One [`TableAudit`] per definition; tables never written to are reported as
/// not provisioned.
pub async fn audit(
    warehouse_dir: &Path,
    catalog: &Catalog,
    definitions: &[&ReportDefinition],
) -> Result<Vec<TableAudit>, Error> {
    let ctx = SessionContext::new();
    let mut audits = Vec::with_capacity(definitions.len());

    for definition in definitions {
        let audit = audit_table(&ctx, warehouse_dir, catalog, definition).await?;
        info!(
            "Audited {}: {} rows, {} partition(s), {} duplicate key(s)",
            audit.table, audit.row_count, audit.partitions, audit.duplicate_keys
        );
        audits.push(audit);
    }

    Ok(audits)
}

async fn audit_table(
    ctx: &SessionContext,
    warehouse_dir: &Path,
    catalog: &Catalog,
    definition: &ReportDefinition,
) -> Result<TableAudit, Error> {
    let mut audit = TableAudit {
        table: definition.target_table.clone(),
        report_type: definition.report_type.clone(),
        ..TableAudit::default()
    };

    let table_dir = warehouse_dir.join(&definition.target_table);
    let schema = match catalog.schema(&definition.target_table) {
        Some(schema) if table_dir.is_dir() => schema,
        _ => return Ok(audit),
    };
    audit.provisioned = true;

    let df = ctx
        .read_parquet(
            &format!("{}/", table_dir.to_string_lossy()),
            ParquetReadOptions::default().schema(&schema),
        )
        .await?;

    let partition = definition.partition_field.as_str();
    let stats = df
        .clone()
        .aggregate(
            vec![],
            vec![
                count(lit(1)).alias("row_count"),
                count(col(partition)).alias("dated_rows"),
                count_distinct(col(partition)).alias("partitions"),
                min(col(partition)).alias("min_partition"),
                max(col(partition)).alias("max_partition"),
            ],
        )?
        .collect()
        .await?;

    if let Some(batch) = stats.iter().find(|batch| batch.num_rows() > 0) {
        audit.row_count = int_value(batch, "row_count")?;
        audit.null_partitions = audit.row_count - int_value(batch, "dated_rows")?;
        audit.partitions = int_value(batch, "partitions")?;
        audit.min_partition = text_value(batch, "min_partition")?;
        audit.max_partition = text_value(batch, "max_partition")?;
    }

    let keys = definition
        .key_columns()
        .iter()
        .map(|column| col(column.as_str()))
        .collect();
    audit.duplicate_keys = df
        .aggregate(keys, vec![count(lit(1)).alias("copies")])?
        .filter(col("copies").gt(lit(1i64)))?
        .count()
        .await?;

    Ok(audit)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a dyn Array, Error> {
    batch
        .column_by_name(name)
        .map(|array| array.as_ref())
        .ok_or_else(|| Error::SchemaMismatch {
            table: "audit".to_string(),
            reason: format!("missing aggregate '{}'", name),
        })
}

fn int_value(batch: &RecordBatch, name: &str) -> Result<i64, Error> {
    match ScalarValue::try_from_array(column(batch, name)?, 0)? {
        ScalarValue::Int64(Some(value)) => Ok(value),
        _ => Ok(0),
    }
}

fn text_value(batch: &RecordBatch, name: &str) -> Result<Option<String>, Error> {
    let utf8 = cast_with_options(column(batch, name)?, &DataType::Utf8, &CastOptions::default())?;
    Ok(utf8
        .as_any()
        .downcast_ref::<StringArray>()
        .filter(|values| values.is_valid(0))
        .map(|values| values.value(0).to_string()))
}
