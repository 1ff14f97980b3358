use crate::data::{days_since_epoch, rows_to_record_batch, Catalog};
use crate::error::Error;
use crate::registry::ReportDefinition;
use crate::transform::WarehouseRow;
use chrono::NaiveDate;
use datafusion::common::ScalarValue;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::prelude::{col, lit, SessionContext};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const PARTITION_FILE: &str = "part-0.parquet";

/// Where a batch goes: the table and its date partitioning column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub table: String,
    pub partition_field: String,
}

impl LoadTarget {
    pub fn for_definition(definition: &ReportDefinition) -> Self {
        LoadTarget {
            table: definition.target_table.clone(),
            partition_field: definition.partition_field.clone(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait WarehouseLoader: Send + Sync + 'static {
    /// Writes `rows` into `target`, replacing every partition the rows touch.
    ///
    /// # Returns
    /// A Result containing either the number of rows written or an Error.
    async fn load(&self, target: &LoadTarget, rows: &[WarehouseRow]) -> Result<usize, Error>;
}

/// Warehouse made of one Parquet file per table partition:
/// `<root>/<table>/<partition_field>=<YYYY-MM-DD>/part-0.parquet`.
#[derive(Clone)]
pub struct ParquetWarehouseLoader {
    root: PathBuf,
    catalog: Catalog,
}

impl ParquetWarehouseLoader {
    pub fn new(root: &Path, catalog: Catalog) -> Self {
        ParquetWarehouseLoader {
            root: root.to_path_buf(),
            catalog,
        }
    }

    pub fn partition_dir(&self, target: &LoadTarget, value: NaiveDate) -> PathBuf {
        self.root
            .join(&target.table)
            .join(partition_dir_name(&target.partition_field, value))
    }

    fn staging_dir(&self, target: &LoadTarget, value: NaiveDate) -> PathBuf {
        self.root
            .join(".staging")
            .join(&target.table)
            .join(partition_dir_name(&target.partition_field, value))
    }

    fn retired_dir(&self, target: &LoadTarget, value: NaiveDate) -> PathBuf {
        self.root
            .join(".retired")
            .join(&target.table)
            .join(partition_dir_name(&target.partition_field, value))
    }

    /// Writes each partition into the staging area. Nothing under the table
    /// directory changes here.
    async fn stage(
        &self,
        target: &LoadTarget,
        rows: &[WarehouseRow],
        partitions: &BTreeSet<NaiveDate>,
    ) -> Result<(), Error> {
        let schema = self.catalog.schema(&target.table).ok_or_else(|| Error::LoadError {
            table: target.table.clone(),
            reason: "table is not provisioned".to_string(),
        })?;
        let batch = rows_to_record_batch(&target.table, rows, schema)?;

        let ctx = SessionContext::new();
        let df = ctx.read_batch(batch)?;

        for value in partitions {
            let staging = self.staging_dir(target, *value);
            if staging.exists() {
                fs::remove_dir_all(&staging)?;
            }
            fs::create_dir_all(&staging)?;

            let path = staging.join(PARTITION_FILE);
            let slice = df.clone().filter(
                col(target.partition_field.as_str())
                    .eq(lit(ScalarValue::Date32(Some(days_since_epoch(*value))))),
            )?;
            slice
                .write_parquet(
                    &path.to_string_lossy(),
                    DataFrameWriteOptions::new().with_single_file_output(true),
                    None,
                )
                .await?;
        }

        Ok(())
    }

    /// Moves a staged partition into the table. A partition it replaces is
    /// parked under the retired area and `Ok(true)` is returned.
    fn swap_in(&self, target: &LoadTarget, value: NaiveDate) -> Result<bool, Error> {
        let live = self.partition_dir(target, value);
        let staged = self.staging_dir(target, value);
        let retired = self.retired_dir(target, value);

        if let Some(parent) = live.parent() {
            fs::create_dir_all(parent)?;
        }

        if !live.exists() {
            fs::rename(&staged, &live)?;
            return Ok(false);
        }

        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }
        if let Some(parent) = retired.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&live, &retired)?;
        if let Err(err) = fs::rename(&staged, &live) {
            fs::rename(&retired, &live)?;
            return Err(err.into());
        }
        Ok(true)
    }

    /// Swaps every staged partition in. When one fails, the partitions
    /// already swapped get their previous contents back.
    fn swap_all(
        &self,
        target: &LoadTarget,
        partitions: &BTreeSet<NaiveDate>,
    ) -> Result<(), Error> {
        let mut swapped: Vec<(NaiveDate, bool)> = Vec::with_capacity(partitions.len());

        for value in partitions {
            match self.swap_in(target, *value) {
                Ok(replaced) => swapped.push((*value, replaced)),
                Err(err) => {
                    self.roll_back(target, &swapped);
                    self.discard_staging(target, partitions);
                    return Err(Error::LoadError {
                        table: target.table.clone(),
                        reason: format!("replacing partition {}: {}", value, err),
                    });
                }
            }
        }

        for (value, _) in swapped.iter().filter(|(_, replaced)| *replaced) {
            let retired = self.retired_dir(target, *value);
            if let Err(err) = fs::remove_dir_all(&retired) {
                warn!("Could not remove retired dir {}: {}", retired.display(), err);
            }
        }
        Ok(())
    }

    fn roll_back(&self, target: &LoadTarget, swapped: &[(NaiveDate, bool)]) {
        for (value, replaced) in swapped.iter().rev() {
            let live = self.partition_dir(target, *value);
            let restored = fs::remove_dir_all(&live).and_then(|()| {
                if *replaced {
                    fs::rename(self.retired_dir(target, *value), &live)
                } else {
                    Ok(())
                }
            });

            match restored {
                Ok(()) => warn!("Rolled back partition {} of {}", value, target.table),
                Err(err) => error!(
                    "Could not roll back partition {} of {}: {}",
                    value, target.table, err
                ),
            }
        }
    }

    fn discard_staging(&self, target: &LoadTarget, partitions: &BTreeSet<NaiveDate>) {
        for value in partitions {
            let staging = self.staging_dir(target, *value);
            if staging.exists() {
                if let Err(err) = fs::remove_dir_all(&staging) {
                    warn!("Could not remove staging dir {}: {}", staging.display(), err);
                }
            }
        }
    }
}

pub fn partition_dir_name(partition_field: &str, value: NaiveDate) -> String {
    format!("{}={}", partition_field, value.format("%Y-%m-%d"))
}

/// Distinct partition values of a batch; a row without one is a schema error.
pub fn partition_values(
    target: &LoadTarget,
    rows: &[WarehouseRow],
) -> Result<BTreeSet<NaiveDate>, Error> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            row.partition_value(&target.partition_field)
                .ok_or_else(|| Error::SchemaMismatch {
                    table: target.table.clone(),
                    reason: format!(
                        "row {} has no date in partition column '{}'",
                        index, target.partition_field
                    ),
                })
        })
        .collect()
}

#[async_trait::async_trait]
impl WarehouseLoader for ParquetWarehouseLoader {
    async fn load(&self, target: &LoadTarget, rows: &[WarehouseRow]) -> Result<usize, Error> {
        if rows.is_empty() {
            return Ok(0);
        }

        let partitions = partition_values(target, rows)?;

        if let Err(err) = self.stage(target, rows, &partitions).await {
            self.discard_staging(target, &partitions);
            return Err(match err {
                Error::SchemaMismatch { .. } | Error::LoadError { .. } => err,
                other => Error::LoadError {
                    table: target.table.clone(),
                    reason: other.to_string(),
                },
            });
        }

        self.swap_all(target, &partitions)?;

        info!(
            "Loaded {} rows into {} across {} partition(s)",
            rows.len(),
            target.table,
            partitions.len()
        );
        Ok(rows.len())
    }
}

/// Validates and counts rows without writing anything.
#[derive(Clone)]
pub struct DryRunLoader {
    catalog: Catalog,
}

impl DryRunLoader {
    pub fn new(catalog: Catalog) -> Self {
        DryRunLoader { catalog }
    }
}

#[async_trait::async_trait]
impl WarehouseLoader for DryRunLoader {
    async fn load(&self, target: &LoadTarget, rows: &[WarehouseRow]) -> Result<usize, Error> {
        let partitions = partition_values(target, rows)?;
        if let Some(schema) = self.catalog.schema(&target.table) {
            crate::data::validate_rows(&target.table, &schema, rows)?;
        }
        info!(
            "[DRY RUN] Would load {} rows into {} across {} partition(s)",
            rows.len(),
            target.table,
            partitions.len()
        );
        Ok(rows.len())
    }
}
