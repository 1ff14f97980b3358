use crate::api_client::ReportValue;
use crate::registry::{Registry, ReportDefinition};
use crate::transform::RawReportRow;
use chrono::NaiveDate;
use std::str::FromStr;

pub(crate) fn date(s: &str) -> NaiveDate {
    NaiveDate::from_str(s).unwrap()
}

pub(crate) fn definition(report_type: &str) -> ReportDefinition {
    Registry::builtin()
        .unwrap()
        .lookup(report_type)
        .unwrap()
        .clone()
}

pub(crate) fn geo_definition() -> ReportDefinition {
    definition("GEO_MONTHLY")
}

pub(crate) fn inventory_definition() -> ReportDefinition {
    definition("INVENTORY_DAILY")
}

/// Cells of a GEO_MONTHLY row, in request order.
pub(crate) fn geo_row(country: &str, impressions: i64) -> Vec<ReportValue> {
    vec![
        ReportValue::Text(country.to_string()),
        ReportValue::Int(2250),
        ReportValue::Int(impressions),
        ReportValue::Int(impressions / 10),
        ReportValue::Double(0.5),
        ReportValue::Int(impressions / 2),
    ]
}

/// Cells of an INVENTORY_DAILY row, in request order.
pub(crate) fn inventory_row(day: &str, impressions: i64) -> Vec<ReportValue> {
    vec![
        ReportValue::Text(day.to_string()),
        ReportValue::Text("Homepage".to_string()),
        ReportValue::Text(format!("unit-{}", impressions)),
        ReportValue::Text("House".to_string()),
        ReportValue::Text("Desktop".to_string()),
        ReportValue::Text("300x250".to_string()),
        ReportValue::Int(impressions),
        ReportValue::Int(impressions / 10),
        ReportValue::Int(impressions),
        ReportValue::Int(impressions / 2),
    ]
}

/// Cells of an AUDIENCE_DEMOGRAPHICS row, in request order.
pub(crate) fn demographics_row(
    month_code: i64,
    gender: &str,
    age_bracket: &str,
) -> Vec<ReportValue> {
    vec![
        ReportValue::Int(month_code),
        ReportValue::Text(gender.to_string()),
        ReportValue::Text(age_bracket.to_string()),
        ReportValue::Int(100),
        ReportValue::Int(4),
    ]
}

pub(crate) fn raw(definition: &ReportDefinition, rows: Vec<Vec<ReportValue>>) -> Vec<RawReportRow> {
    let header: Vec<&str> = definition.fields().map(|f| f.name.as_str()).collect();
    rows.into_iter()
        .map(|values| RawReportRow::from_cells(&header, values))
        .collect()
}
