use crate::chunker::{first_day_of_month, DateRange};
use crate::error::Error;
use chrono::{Months, NaiveDate};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

pub const PARTITION_FIELDS: [&str; 2] = ["date", "report_date"];

/// Selector expanding to every registered report.
pub const ALL_REPORTS: &str = "all";

/// How a raw value is converted into a warehouse value.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    /// `YYYY-MM-DD` text or a `YYYYMMDD` integer.
    Date,
    /// The API's month code: `(year - 2010) * 100 + zero_based_month`.
    MonthYear,
    Int64,
    Float64,
    String,
}

/// One requested dimension or metric and the column it lands in.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeRule {
    Yesterday,
    LastMonth,
}

impl RangeRule {
    /// Resolves the rule against the current calendar day.
    pub fn resolve(self, today: NaiveDate) -> Result<DateRange, Error> {
        let invalid = || Error::InvalidDate {
            date: today.to_string(),
        };

        match self {
            RangeRule::Yesterday => Ok(DateRange::single_day(today.pred_opt().ok_or_else(invalid)?)),
            RangeRule::LastMonth => {
                let this_month = first_day_of_month(today);
                let start = this_month
                    .checked_sub_months(Months::new(1))
                    .ok_or_else(invalid)?;
                let end = this_month.pred_opt().ok_or_else(invalid)?;
                DateRange::new(start, end)
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionRule {
    /// Each row is partitioned on its own date or month dimension.
    RowDate,
    /// Every row of a run is partitioned on the first day of the range's month.
    RangeMonthStart,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportDefinition {
    pub report_type: String,
    #[serde(default)]
    pub alias: String,
    pub dimensions: Vec<FieldSpec>,
    pub metrics: Vec<FieldSpec>,
    pub default_range_rule: RangeRule,
    pub target_table: String,
    pub partition_field: String,
    pub partition_rule: PartitionRule,
}

impl ReportDefinition {
    /// Dimensions followed by metrics, in request order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.dimensions.iter().chain(self.metrics.iter())
    }

    pub fn dimension_names(&self) -> Vec<String> {
        self.dimensions.iter().map(|f| f.name.clone()).collect()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.iter().map(|f| f.name.clone()).collect()
    }

    /// Columns identifying a row within the table: every dimension column
    /// plus the partition column.
    pub fn key_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.dimensions.iter().map(|f| f.column.clone()).collect();
        if !columns.contains(&self.partition_field) {
            columns.push(self.partition_field.clone());
        }
        columns
    }

    fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: String| Error::InvalidConfiguration {
            report_type: self.report_type.clone(),
            reason,
        };

        if self.report_type.trim().is_empty() {
            return Err(invalid("report type identifier is empty".to_string()));
        }
        if [&self.report_type, &self.alias]
            .iter()
            .any(|key| key.eq_ignore_ascii_case(ALL_REPORTS))
        {
            return Err(invalid(format!("'{}' is reserved", ALL_REPORTS)));
        }
        if self.dimensions.is_empty() {
            return Err(invalid("no dimensions".to_string()));
        }
        if self.metrics.is_empty() {
            return Err(invalid("no metrics".to_string()));
        }
        if self.target_table.trim().is_empty() {
            return Err(invalid("no target table".to_string()));
        }
        if !PARTITION_FIELDS.contains(&self.partition_field.as_str()) {
            return Err(invalid(format!(
                "unrecognized partition field '{}'",
                self.partition_field
            )));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in self.fields() {
            if field.name.is_empty() || field.column.is_empty() {
                return Err(invalid("field with empty name or column".to_string()));
            }
            if !names.insert(field.name.as_str()) {
                return Err(invalid(format!("field '{}' requested twice", field.name)));
            }
            if !columns.insert(field.column.as_str()) {
                return Err(invalid(format!("column '{}' mapped twice", field.column)));
            }
        }

        let partition_sources: Vec<&FieldSpec> = self
            .fields()
            .filter(|f| f.column == self.partition_field)
            .collect();

        match self.partition_rule {
            PartitionRule::RowDate => match partition_sources.as_slice() {
                [field] if matches!(field.kind, FieldKind::Date | FieldKind::MonthYear) => Ok(()),
                _ => Err(invalid(format!(
                    "row partitioning needs one DATE or MONTH_YEAR field mapped to '{}'",
                    self.partition_field
                ))),
            },
            PartitionRule::RangeMonthStart if partition_sources.is_empty() => Ok(()),
            PartitionRule::RangeMonthStart => Err(invalid(format!(
                "per-month partition column '{}' is derived and cannot be mapped from a field",
                self.partition_field
            ))),
        }
    }
}

/// The set of report definitions a process can run, validated once at load.
#[derive(Debug, Clone)]
pub struct Registry {
    definitions: Vec<ReportDefinition>,
}

impl Registry {
    pub fn new(definitions: Vec<ReportDefinition>) -> Result<Self, Error> {
        let mut keys = HashSet::new();
        for definition in &definitions {
            definition.validate()?;
            for key in [&definition.report_type, &definition.alias] {
                if !key.is_empty() && !keys.insert(key.to_ascii_lowercase()) {
                    return Err(Error::InvalidConfiguration {
                        report_type: definition.report_type.clone(),
                        reason: format!("identifier '{}' is registered twice", key),
                    });
                }
            }
        }

        Ok(Registry { definitions })
    }

    /// Loads definitions from a JSON array.
    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let definitions: Vec<ReportDefinition> =
            serde_json::from_str(&contents).map_err(|err| Error::InvalidConfiguration {
                report_type: path.display().to_string(),
                reason: err.to_string(),
            })?;
        Registry::new(definitions)
    }

    /// Resolves a report type by identifier or alias, case-insensitively.
    pub fn lookup(&self, report_type: &str) -> Result<&ReportDefinition, Error> {
        self.definitions
            .iter()
            .find(|d| {
                d.report_type.eq_ignore_ascii_case(report_type)
                    || (!d.alias.is_empty() && d.alias.eq_ignore_ascii_case(report_type))
            })
            .ok_or_else(|| Error::UnknownReportType {
                report_type: report_type.to_string(),
            })
    }

    pub fn list_all(&self) -> &[ReportDefinition] {
        &self.definitions
    }

    pub fn builtin() -> Result<Self, Error> {
        Registry::new(builtin_definitions())
    }
}

fn field(name: &str, column: &str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        column: column.to_string(),
        kind,
    }
}

fn builtin_definitions() -> Vec<ReportDefinition> {
    vec![
        ReportDefinition {
            report_type: "INVENTORY_DAILY".to_string(),
            alias: "inventory".to_string(),
            dimensions: vec![
                field("DATE", "date", FieldKind::Date),
                field("AD_UNIT_NAME_LEVEL_1", "ad_unit_top_level", FieldKind::String),
                field("AD_UNIT_NAME", "ad_unit_name", FieldKind::String),
                field("ORDER_NAME", "order_name", FieldKind::String),
                field("DEVICE_CATEGORY_NAME", "device_category", FieldKind::String),
                field("CREATIVE_SIZE", "creative_size", FieldKind::String),
            ],
            metrics: vec![
                field("AD_SERVER_IMPRESSIONS", "ad_server_impressions", FieldKind::Int64),
                field("AD_SERVER_CLICKS", "ad_server_clicks", FieldKind::Int64),
                field(
                    "AD_SERVER_ACTIVE_VIEW_MEASURABLE_IMPRESSIONS",
                    "active_view_measurable_impressions",
                    FieldKind::Int64,
                ),
                field(
                    "AD_SERVER_ACTIVE_VIEW_VIEWABLE_IMPRESSIONS",
                    "active_view_viewable_impressions",
                    FieldKind::Int64,
                ),
            ],
            default_range_rule: RangeRule::Yesterday,
            target_table: "report_inventory_daily".to_string(),
            partition_field: "date".to_string(),
            partition_rule: PartitionRule::RowDate,
        },
        ReportDefinition {
            report_type: "GEO_MONTHLY".to_string(),
            alias: "geo".to_string(),
            dimensions: vec![
                field("COUNTRY_NAME", "country_name", FieldKind::String),
                field("COUNTRY_CRITERIA_ID", "country_code", FieldKind::String),
            ],
            metrics: vec![
                field("AD_SERVER_IMPRESSIONS", "ad_server_impressions", FieldKind::Int64),
                field("AD_SERVER_CLICKS", "ad_server_clicks", FieldKind::Int64),
                field(
                    "AD_SERVER_ACTIVE_VIEW_MEASURABLE_IMPRESSIONS_RATE",
                    "active_view_measurable_rate",
                    FieldKind::Float64,
                ),
                field(
                    "AD_SERVER_ACTIVE_VIEW_VIEWABLE_IMPRESSIONS",
                    "active_view_viewable_impressions",
                    FieldKind::Int64,
                ),
            ],
            default_range_rule: RangeRule::LastMonth,
            target_table: "report_geo_monthly".to_string(),
            partition_field: "report_date".to_string(),
            partition_rule: PartitionRule::RangeMonthStart,
        },
        ReportDefinition {
            report_type: "FILL_RATE_DAILY".to_string(),
            alias: "fill_rate".to_string(),
            dimensions: vec![
                field("DATE", "date", FieldKind::Date),
                field("AD_UNIT_NAME", "ad_unit_name", FieldKind::String),
            ],
            metrics: vec![
                field("UNFILLED_IMPRESSIONS", "unfilled_impressions", FieldKind::Int64),
                field("CODE_SERVED_COUNT", "code_served_count", FieldKind::Int64),
                field("RESPONSES_SERVED", "responses_served", FieldKind::Int64),
                field("AD_SERVER_IMPRESSIONS", "ad_server_impressions", FieldKind::Int64),
                field("FILL_RATE", "fill_rate", FieldKind::Float64),
                field("AD_REQUESTS", "ad_requests", FieldKind::Int64),
            ],
            default_range_rule: RangeRule::Yesterday,
            target_table: "report_fill_rate_daily".to_string(),
            partition_field: "date".to_string(),
            partition_rule: PartitionRule::RowDate,
        },
        ReportDefinition {
            report_type: "AUDIENCE_INTEREST".to_string(),
            alias: "interest".to_string(),
            dimensions: vec![
                field("MONTH_YEAR", "report_date", FieldKind::MonthYear),
                field("INTEREST_NAME", "interest_category", FieldKind::String),
            ],
            metrics: vec![
                field("AD_SERVER_IMPRESSIONS", "ad_server_impressions", FieldKind::Int64),
                field("AD_SERVER_CLICKS", "ad_server_clicks", FieldKind::Int64),
            ],
            default_range_rule: RangeRule::LastMonth,
            target_table: "report_audience_interest".to_string(),
            partition_field: "report_date".to_string(),
            partition_rule: PartitionRule::RowDate,
        },
        ReportDefinition {
            report_type: "AUDIENCE_DEMOGRAPHICS".to_string(),
            alias: "demographics".to_string(),
            dimensions: vec![
                field("MONTH_YEAR", "report_date", FieldKind::MonthYear),
                field("GENDER_NAME", "gender", FieldKind::String),
                field("AGE_BRACKET_NAME", "age_bracket", FieldKind::String),
            ],
            metrics: vec![
                field("AD_SERVER_IMPRESSIONS", "ad_server_impressions", FieldKind::Int64),
                field("AD_SERVER_CLICKS", "ad_server_clicks", FieldKind::Int64),
            ],
            default_range_rule: RangeRule::LastMonth,
            target_table: "report_audience_demographics".to_string(),
            partition_field: "report_date".to_string(),
            partition_rule: PartitionRule::RowDate,
        },
    ]
}
