use crate::api_client::ReportValue;
use crate::chunker::{first_day_of_month, DateRange};
use crate::error::Error;
use crate::registry::{FieldKind, FieldSpec, PartitionRule, ReportDefinition};
use chrono::NaiveDate;
use log::warn;
use std::collections::BTreeMap;

/// One downloaded row, as `(field name, value)` pairs in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReportRow {
    fields: Vec<(String, ReportValue)>,
    /// Cells past the end of the header.
    surplus: usize,
}

impl RawReportRow {
    /// Pairs `values` with `header` position by position. Missing trailing
    /// cells are left out; extra ones are only counted.
    pub fn from_cells(header: &[&str], values: Vec<ReportValue>) -> Self {
        let surplus = values.len().saturating_sub(header.len());
        RawReportRow {
            fields: header
                .iter()
                .map(|name| name.to_string())
                .zip(values)
                .collect(),
            surplus,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.fields.len() + self.surplus
    }

    pub fn get(&self, name: &str) -> Option<&ReportValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseValue {
    Date(NaiveDate),
    Int64(i64),
    Float64(f64),
    String(String),
}

/// A row ready for the warehouse, keyed by column name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WarehouseRow {
    columns: BTreeMap<String, WarehouseValue>,
}

impl WarehouseRow {
    pub fn insert(&mut self, column: impl Into<String>, value: WarehouseValue) {
        self.columns.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&WarehouseValue> {
        self.columns.get(column)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// The date stored in `partition_field`, if any.
    pub fn partition_value(&self, partition_field: &str) -> Option<NaiveDate> {
        match self.columns.get(partition_field) {
            Some(WarehouseValue::Date(date)) => Some(*date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformOutput {
    pub rows: Vec<WarehouseRow>,
    pub dropped: usize,
}

/// Maps downloaded rows onto the definition's warehouse columns.
///
/// Rows that are missing a field or carry a value that cannot be converted
/// are logged, dropped and counted; the rest of the batch is kept.
///
/// # Arguments
/// * `definition` - Field mapping and partition rule.
/// * `raw_rows` - Rows as downloaded.
/// * `range` - The range the rows were fetched for; per-month reports take
///   their partition value from its start.
pub fn transform(
    definition: &ReportDefinition,
    raw_rows: &[RawReportRow],
    range: &DateRange,
) -> TransformOutput {
    let month_start = first_day_of_month(range.start);
    let mut output = TransformOutput::default();

    for (index, raw) in raw_rows.iter().enumerate() {
        match map_row(definition, raw, index, month_start) {
            Ok(row) => output.rows.push(row),
            Err(err) => {
                warn!("Dropping {} row: {}", definition.report_type, err);
                output.dropped += 1;
            }
        }
    }

    output
}

fn map_row(
    definition: &ReportDefinition,
    raw: &RawReportRow,
    index: usize,
    month_start: NaiveDate,
) -> Result<WarehouseRow, Error> {
    if raw.surplus > 0 {
        return Err(Error::MalformedRow {
            index,
            reason: format!("{} cell(s) beyond the requested fields", raw.surplus),
        });
    }

    let mut row = WarehouseRow::default();

    for field in definition.fields() {
        let value = match raw.get(&field.name) {
            None | Some(ReportValue::Null) => {
                return Err(Error::MalformedRow {
                    index,
                    reason: format!("missing {}", field.name),
                })
            }
            Some(value) => value,
        };

        let converted = convert(field, value).ok_or_else(|| Error::MalformedRow {
            index,
            reason: format!("cannot read {:?} as {:?} for {}", value, field.kind, field.name),
        })?;
        row.insert(field.column.as_str(), converted);
    }

    if definition.partition_rule == PartitionRule::RangeMonthStart {
        row.insert(
            definition.partition_field.as_str(),
            WarehouseValue::Date(month_start),
        );
    }

    Ok(row)
}

fn convert(field: &FieldSpec, value: &ReportValue) -> Option<WarehouseValue> {
    match field.kind {
        FieldKind::Date => parse_date(value).map(WarehouseValue::Date),
        FieldKind::MonthYear => parse_month_year(value).map(WarehouseValue::Date),
        FieldKind::Int64 => match value {
            ReportValue::Int(i) => Some(*i),
            ReportValue::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            ReportValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(WarehouseValue::Int64),
        FieldKind::Float64 => match value {
            ReportValue::Int(i) => Some(*i as f64),
            ReportValue::Double(d) => Some(*d),
            ReportValue::Text(s) => s.trim().parse().ok(),
            ReportValue::Null => None,
        }
        .map(WarehouseValue::Float64),
        FieldKind::String => match value {
            ReportValue::Text(s) => Some(s.clone()),
            ReportValue::Int(i) => Some(i.to_string()),
            ReportValue::Double(d) => Some(d.to_string()),
            ReportValue::Null => None,
        }
        .map(WarehouseValue::String),
    }
}

fn parse_date(value: &ReportValue) -> Option<NaiveDate> {
    match value {
        ReportValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .or_else(|| s.trim().parse::<i64>().ok().and_then(date_from_int)),
        ReportValue::Int(i) => date_from_int(*i),
        _ => None,
    }
}

/// `20240115` → 2024-01-15.
fn date_from_int(value: i64) -> Option<NaiveDate> {
    let year = i32::try_from(value / 10_000).ok()?;
    let month = u32::try_from((value % 10_000) / 100).ok()?;
    let day = u32::try_from(value % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Month codes count years from 2010 and months from zero: `1510` → 2025-11-01.
fn parse_month_year(value: &ReportValue) -> Option<NaiveDate> {
    let code = match value {
        ReportValue::Int(i) => *i,
        ReportValue::Text(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let year = 2010 + i32::try_from(code / 100).ok()?;
    let month = u32::try_from(code % 100).ok()? + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        date, definition, demographics_row, geo_definition, geo_row, inventory_definition,
        inventory_row, raw,
    };

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(date(start), date(end)).unwrap()
    }

    #[test]
    fn test_monthly_rows_share_month_start_partition() {
        let definition = geo_definition();
        let rows = raw(
            &definition,
            vec![geo_row("France", 250), geo_row("Spain", 120), geo_row("Italy", 80)],
        );

        let output = transform(&definition, &rows, &range("2024-02-01", "2024-02-29"));

        assert_eq!(output.rows.len(), 3);
        assert_eq!(output.dropped, 0);
        for row in &output.rows {
            assert_eq!(row.partition_value("report_date"), Some(date("2024-02-01")));
        }
        assert_eq!(
            output.rows[0].get("country_name"),
            Some(&WarehouseValue::String("France".to_string()))
        );
        assert_eq!(
            output.rows[0].get("country_code"),
            Some(&WarehouseValue::String("2250".to_string()))
        );
        assert_eq!(
            output.rows[0].get("active_view_measurable_rate"),
            Some(&WarehouseValue::Float64(0.5))
        );
    }

    #[test]
    fn test_monthly_partition_uses_month_of_clipped_chunk_start() {
        let definition = geo_definition();
        let rows = raw(&definition, vec![geo_row("France", 1)]);

        let output = transform(&definition, &rows, &range("2024-01-15", "2024-01-31"));
        assert_eq!(
            output.rows[0].partition_value("report_date"),
            Some(date("2024-01-01"))
        );
    }

    #[test]
    fn test_daily_rows_keep_their_own_date() {
        let definition = inventory_definition();
        let rows = raw(
            &definition,
            vec![inventory_row("2024-03-01", 10), inventory_row("2024-03-02", 20)],
        );

        let output = transform(&definition, &rows, &range("2024-03-01", "2024-03-31"));

        let dates: Vec<Option<NaiveDate>> = output
            .rows
            .iter()
            .map(|row| row.partition_value("date"))
            .collect();
        assert_eq!(dates, vec![Some(date("2024-03-01")), Some(date("2024-03-02"))]);
        assert_eq!(
            output.rows[1].get("ad_server_impressions"),
            Some(&WarehouseValue::Int64(20))
        );
    }

    #[test]
    fn test_row_missing_dimension_is_dropped_and_counted() {
        let definition = geo_definition();
        let mut broken = geo_row("France", 1);
        broken[0] = ReportValue::Null;
        let mut short = geo_row("Spain", 2);
        short.truncate(3);
        let rows = raw(&definition, vec![broken, geo_row("Italy", 3), short]);

        let output = transform(&definition, &rows, &range("2024-02-01", "2024-02-29"));

        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.dropped, 2);
        assert_eq!(
            output.rows[0].get("country_name"),
            Some(&WarehouseValue::String("Italy".to_string()))
        );
    }

    #[test]
    fn test_unparseable_metric_is_dropped() {
        let definition = inventory_definition();
        let mut bad = inventory_row("2024-03-01", 10);
        bad[6] = ReportValue::Text("n/a".to_string());
        let rows = raw(&definition, vec![bad, inventory_row("2024-03-01", 11)]);

        let output = transform(&definition, &rows, &range("2024-03-01", "2024-03-01"));
        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.dropped, 1);
    }

    #[test]
    fn test_inventory_keeps_top_level_ad_unit() {
        let definition = inventory_definition();
        let rows = raw(&definition, vec![inventory_row("2024-03-01", 10)]);

        let output = transform(&definition, &rows, &range("2024-03-01", "2024-03-01"));
        assert_eq!(
            output.rows[0].get("ad_unit_top_level"),
            Some(&WarehouseValue::String("Homepage".to_string()))
        );
        assert_eq!(
            output.rows[0].get("ad_unit_name"),
            Some(&WarehouseValue::String("unit-10".to_string()))
        );
    }

    #[test]
    fn test_demographics_partition_comes_from_month_code() {
        let definition = definition("AUDIENCE_DEMOGRAPHICS");
        let rows = raw(
            &definition,
            vec![
                demographics_row(1401, "Female", "25-34"),
                demographics_row(1401, "Male", "18-24"),
            ],
        );

        let output = transform(&definition, &rows, &range("2024-02-01", "2024-02-29"));

        assert_eq!(output.dropped, 0);
        for row in &output.rows {
            assert_eq!(row.partition_value("report_date"), Some(date("2024-02-01")));
        }
        assert_eq!(
            output.rows[1].get("age_bracket"),
            Some(&WarehouseValue::String("18-24".to_string()))
        );
        assert_eq!(
            output.rows[0].get("ad_server_clicks"),
            Some(&WarehouseValue::Int64(4))
        );
    }

    #[test]
    fn test_interest_row_with_bad_month_code_is_dropped() {
        let definition = definition("AUDIENCE_INTEREST");
        let rows = raw(
            &definition,
            vec![
                vec![
                    ReportValue::Int(1412),
                    ReportValue::Text("Travel".to_string()),
                    ReportValue::Int(10),
                    ReportValue::Int(1),
                ],
                vec![
                    ReportValue::Text("1401".to_string()),
                    ReportValue::Text("Sports".to_string()),
                    ReportValue::Int(20),
                    ReportValue::Int(2),
                ],
            ],
        );

        let output = transform(&definition, &rows, &range("2024-02-01", "2024-02-29"));

        assert_eq!(output.dropped, 1);
        assert_eq!(
            output.rows[0].get("interest_category"),
            Some(&WarehouseValue::String("Sports".to_string()))
        );
        assert_eq!(
            output.rows[0].partition_value("report_date"),
            Some(date("2024-02-01"))
        );
    }

    #[test]
    fn test_row_with_extra_cells_is_dropped() {
        let definition = geo_definition();
        let mut wide = geo_row("France", 1);
        wide.push(ReportValue::Int(7));
        let rows = raw(&definition, vec![wide, geo_row("Spain", 2)]);

        let output = transform(&definition, &rows, &range("2024-02-01", "2024-02-29"));
        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.dropped, 1);
        assert_eq!(
            output.rows[0].get("country_name"),
            Some(&WarehouseValue::String("Spain".to_string()))
        );
    }

    #[test]
    fn test_transform_empty_batch() {
        let output = transform(&geo_definition(), &[], &range("2024-02-01", "2024-02-29"));
        assert_eq!(output, TransformOutput::default());
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(
            parse_date(&ReportValue::Text("2025-11-25".to_string())),
            Some(date("2025-11-25"))
        );
        assert_eq!(parse_date(&ReportValue::Int(20251125)), Some(date("2025-11-25")));
        assert_eq!(parse_date(&ReportValue::Int(20251325)), None);
        assert_eq!(parse_date(&ReportValue::Double(1.0)), None);
    }

    #[test]
    fn test_month_year_codes() {
        assert_eq!(parse_month_year(&ReportValue::Int(1510)), Some(date("2025-11-01")));
        assert_eq!(parse_month_year(&ReportValue::Int(1509)), Some(date("2025-10-01")));
        assert_eq!(
            parse_month_year(&ReportValue::Text("1400".to_string())),
            Some(date("2024-01-01"))
        );
        assert_eq!(parse_month_year(&ReportValue::Int(1512)), None);
    }
}
