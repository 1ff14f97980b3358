use crate::error::Error;
use crate::registry::{FieldKind, PartitionRule, Registry, ReportDefinition};
use crate::transform::{WarehouseRow, WarehouseValue};
use chrono::{DateTime, NaiveDate, Utc};
use datafusion::arrow::array::{
    ArrayRef, Date32Builder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::collections::HashMap;
use std::sync::Arc;

/// Schema of the inventory table, partitioned by `date`.
pub fn inventory_daily_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("ad_unit_top_level", DataType::Utf8, true),
        Field::new("ad_unit_name", DataType::Utf8, true),
        Field::new("order_name", DataType::Utf8, true),
        Field::new("device_category", DataType::Utf8, true),
        Field::new("creative_size", DataType::Utf8, true),
        Field::new("ad_server_impressions", DataType::Int64, true),
        Field::new("ad_server_clicks", DataType::Int64, true),
        Field::new("active_view_measurable_impressions", DataType::Int64, true),
        Field::new("active_view_viewable_impressions", DataType::Int64, true),
    ]))
}

/// Schema of the geo table. `report_date` is the first day of the month.
pub fn geo_monthly_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("report_date", DataType::Date32, false),
        Field::new("country_name", DataType::Utf8, true),
        Field::new("country_code", DataType::Utf8, true),
        Field::new("ad_server_impressions", DataType::Int64, true),
        Field::new("ad_server_clicks", DataType::Int64, true),
        Field::new("active_view_measurable_rate", DataType::Float64, true),
        Field::new("active_view_viewable_impressions", DataType::Int64, true),
    ]))
}

pub fn fill_rate_daily_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("ad_unit_name", DataType::Utf8, true),
        Field::new("unfilled_impressions", DataType::Int64, true),
        Field::new("code_served_count", DataType::Int64, true),
        Field::new("responses_served", DataType::Int64, true),
        Field::new("ad_server_impressions", DataType::Int64, true),
        Field::new("fill_rate", DataType::Float64, true),
        Field::new("ad_requests", DataType::Int64, true),
    ]))
}

/// Schema of the interest table. `report_date` is the first day of the month.
pub fn audience_interest_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("report_date", DataType::Date32, false),
        Field::new("interest_category", DataType::Utf8, true),
        Field::new("ad_server_impressions", DataType::Int64, true),
        Field::new("ad_server_clicks", DataType::Int64, true),
    ]))
}

pub fn audience_demographics_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("report_date", DataType::Date32, false),
        Field::new("gender", DataType::Utf8, true),
        Field::new("age_bracket", DataType::Utf8, true),
        Field::new("ad_server_impressions", DataType::Int64, true),
        Field::new("ad_server_clicks", DataType::Int64, true),
    ]))
}

/// Table layout implied by a definition: the partition column first, then
/// every mapped field in request order.
pub fn schema_for(definition: &ReportDefinition) -> SchemaRef {
    let mut fields = Vec::new();
    if definition.partition_rule == PartitionRule::RangeMonthStart {
        fields.push(Field::new(&definition.partition_field, DataType::Date32, false));
    }
    for field in definition.fields() {
        let data_type = match field.kind {
            FieldKind::Date | FieldKind::MonthYear => DataType::Date32,
            FieldKind::Int64 => DataType::Int64,
            FieldKind::Float64 => DataType::Float64,
            FieldKind::String => DataType::Utf8,
        };
        let nullable = field.column != definition.partition_field;
        fields.push(Field::new(&field.column, data_type, nullable));
    }
    Arc::new(Schema::new(fields))
}

/// The tables provisioned in the warehouse and their declared schemas.
#[derive(Debug, Clone)]
pub struct Catalog {
    tables: HashMap<String, SchemaRef>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            tables: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        Catalog::new()
            .with_table("report_inventory_daily", inventory_daily_schema())
            .with_table("report_geo_monthly", geo_monthly_schema())
            .with_table("report_fill_rate_daily", fill_rate_daily_schema())
            .with_table("report_audience_interest", audience_interest_schema())
            .with_table("report_audience_demographics", audience_demographics_schema())
    }

    /// The built-in tables plus one derived table per definition whose target
    /// is not among them.
    pub fn for_registry(registry: &Registry) -> Self {
        registry
            .list_all()
            .iter()
            .fold(Catalog::builtin(), |catalog, definition| {
                if catalog.tables.contains_key(&definition.target_table) {
                    catalog
                } else {
                    let schema = schema_for(definition);
                    catalog.with_table(&definition.target_table, schema)
                }
            })
    }

    pub fn with_table(mut self, name: &str, schema: SchemaRef) -> Self {
        self.tables.insert(name.to_string(), schema);
        self
    }

    pub fn schema(&self, table: &str) -> Option<SchemaRef> {
        self.tables.get(table).cloned()
    }
}

/// Checks that every row only uses declared columns and fills every
/// non-nullable one.
pub fn validate_rows(table: &str, schema: &Schema, rows: &[WarehouseRow]) -> Result<(), Error> {
    for (index, row) in rows.iter().enumerate() {
        if let Some(column) = row
            .column_names()
            .find(|name| schema.field_with_name(name).is_err())
        {
            return Err(Error::SchemaMismatch {
                table: table.to_string(),
                reason: format!("row {} has undeclared column '{}'", index, column),
            });
        }

        if let Some(field) = schema
            .fields()
            .iter()
            .find(|field| !field.is_nullable() && row.get(field.name()).is_none())
        {
            return Err(Error::SchemaMismatch {
                table: table.to_string(),
                reason: format!("row {} has no value for '{}'", index, field.name()),
            });
        }
    }

    Ok(())
}

/// Converts warehouse rows into one Arrow batch laid out as `schema`.
/// Columns absent from a row become nulls.
///
/// # Returns
/// A Result containing either a [`RecordBatch`] or an [`Error::SchemaMismatch`]
/// when a value does not match its column type.
pub fn rows_to_record_batch(
    table: &str,
    rows: &[WarehouseRow],
    schema: SchemaRef,
) -> Result<RecordBatch, Error> {
    validate_rows(table, &schema, rows)?;

    let mismatch = |column: &str, value: &WarehouseValue| Error::SchemaMismatch {
        table: table.to_string(),
        reason: format!("value {:?} does not fit column '{}'", value, column),
    };

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let name = field.name().as_str();
        let array: ArrayRef = match field.data_type() {
            DataType::Date32 => {
                let mut builder = Date32Builder::with_capacity(rows.len());
                for row in rows {
                    match row.get(name) {
                        Some(WarehouseValue::Date(date)) => builder.append_value(days_since_epoch(*date)),
                        Some(other) => return Err(mismatch(name, other)),
                        None => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Int64 => {
                let mut builder = Int64Builder::with_capacity(rows.len());
                for row in rows {
                    match row.get(name) {
                        Some(WarehouseValue::Int64(value)) => builder.append_value(*value),
                        Some(other) => return Err(mismatch(name, other)),
                        None => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Float64 => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for row in rows {
                    match row.get(name) {
                        Some(WarehouseValue::Float64(value)) => builder.append_value(*value),
                        Some(WarehouseValue::Int64(value)) => builder.append_value(*value as f64),
                        Some(other) => return Err(mismatch(name, other)),
                        None => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Utf8 => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match row.get(name) {
                        Some(WarehouseValue::String(value)) => builder.append_value(value),
                        Some(other) => return Err(mismatch(name, other)),
                        None => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            other => {
                return Err(Error::SchemaMismatch {
                    table: table.to_string(),
                    reason: format!("unsupported column type {} for '{}'", other, name),
                })
            }
        };
        columns.push(array);
    }

    Ok(RecordBatch::try_new(schema, columns)?)
}

pub fn days_since_epoch(date: NaiveDate) -> i32 {
    let unix_duration = date - DateTime::<Utc>::UNIX_EPOCH.date_naive();
    unix_duration.num_days() as i32
}
