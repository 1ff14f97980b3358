use crate::chunker::DateRange;
use crate::error::Error;
use crate::loader::{LoadTarget, WarehouseLoader};
use crate::registry::Registry;
use crate::reporting_client::ReportingClient;
use crate::transform::transform;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Failure,
}

/// Outcome of one orchestrator run over one date range.
#[derive(Debug)]
pub struct PipelineResult {
    pub report_type: String,
    pub date_range: DateRange,
    pub rows_loaded: usize,
    pub rows_dropped: usize,
    pub status: Status,
    pub error: Option<Error>,
}

impl PipelineResult {
    fn success(report_type: &str, date_range: DateRange, rows_loaded: usize, rows_dropped: usize) -> Self {
        PipelineResult {
            report_type: report_type.to_string(),
            date_range,
            rows_loaded,
            rows_dropped,
            status: Status::Success,
            error: None,
        }
    }

    fn failure(report_type: &str, date_range: DateRange, rows_dropped: usize, error: Error) -> Self {
        PipelineResult {
            report_type: report_type.to_string(),
            date_range,
            rows_loaded: 0,
            rows_dropped,
            status: Status::Failure,
            error: Some(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == Status::Failure
    }

    /// The single structured record monitoring consumes.
    pub fn to_record(&self) -> serde_json::Value {
        json!({
            "report_type": self.report_type,
            "start_date": self.date_range.start.to_string(),
            "end_date": self.date_range.end.to_string(),
            "rows_loaded": self.rows_loaded,
            "rows_dropped": self.rows_dropped,
            "status": self.status,
            "error": self.error.as_ref().map(|e| e.to_string()),
        })
    }

    pub fn emit(&self) {
        let record = self.to_record();
        match self.status {
            Status::Success => info!("{}", record),
            Status::Failure => error!("{}", record),
        }
    }
}

/// Runs lookup, fetch, transform and load for one report type and range.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    client: ReportingClient,
    loader: Arc<dyn WarehouseLoader>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        client: ReportingClient,
        loader: Arc<dyn WarehouseLoader>,
    ) -> Self {
        Orchestrator {
            registry,
            client,
            loader,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Never returns an error: any stage failure ends up in the result.
    pub async fn run(&self, report_type: &str, date_range: DateRange) -> PipelineResult {
        let result = self.execute(report_type, date_range).await;
        result.emit();
        result
    }

    async fn execute(&self, report_type: &str, date_range: DateRange) -> PipelineResult {
        let definition = match self.registry.lookup(report_type) {
            Ok(definition) => definition,
            Err(err) => return PipelineResult::failure(report_type, date_range, 0, err),
        };
        let report_type = definition.report_type.as_str();

        let raw_rows = match self.client.fetch(definition, &date_range).await {
            Ok(rows) => rows,
            Err(err) => return PipelineResult::failure(report_type, date_range, 0, err),
        };

        let output = transform(definition, &raw_rows, &date_range);
        if output.dropped > 0 {
            warn!(
                "{} of {} {} rows were malformed for {}",
                output.dropped,
                raw_rows.len(),
                report_type,
                date_range
            );
        }

        if output.rows.is_empty() {
            info!("No {} rows for {}, nothing to load", report_type, date_range);
            return PipelineResult::success(report_type, date_range, 0, output.dropped);
        }

        let target = LoadTarget::for_definition(definition);
        match self.loader.load(&target, &output.rows).await {
            Ok(loaded) => PipelineResult::success(report_type, date_range, loaded, output.dropped),
            Err(err) => PipelineResult::failure(report_type, date_range, output.dropped, err),
        }
    }
}
