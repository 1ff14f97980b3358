use crate::error::Error;
use crate::pipeline::{Orchestrator, PipelineResult};
use chrono::{FixedOffset, NaiveDate, Utc};
use serde::Deserialize;

/// Scheduled trigger payload, e.g. `{"report_type": "GEO_MONTHLY"}`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub report_type: String,
}

impl TriggerRequest {
    pub fn from_json(payload: &str) -> Result<Self, Error> {
        let request: TriggerRequest =
            serde_json::from_str(payload).map_err(|err| Error::InvalidTrigger {
                reason: err.to_string(),
            })?;
        if request.report_type.trim().is_empty() {
            return Err(Error::InvalidTrigger {
                reason: "report_type is empty".to_string(),
            });
        }
        Ok(request)
    }
}

/// Turns a scheduled trigger into one orchestrator run over the report's
/// default range.
pub struct LiveRouter {
    orchestrator: Orchestrator,
    offset: FixedOffset,
}

impl LiveRouter {
    pub fn new(orchestrator: Orchestrator, offset: FixedOffset) -> Self {
        LiveRouter {
            orchestrator,
            offset,
        }
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    pub async fn handle(&self, request: &TriggerRequest) -> Result<PipelineResult, Error> {
        self.handle_on(request, self.today()).await
    }

    /// Same as [`LiveRouter::handle`] with an explicit current day.
    pub async fn handle_on(
        &self,
        request: &TriggerRequest,
        today: NaiveDate,
    ) -> Result<PipelineResult, Error> {
        let definition = self.orchestrator.registry().lookup(&request.report_type)?;
        let range = definition.default_range_rule.resolve(today)?;
        let report_type = definition.report_type.clone();

        Ok(self.orchestrator.run(&report_type, range).await)
    }
}
