use crate::api_client::{JobStatus, ReportRequest, ReportingApi};
use crate::chunker::DateRange;
use crate::error::Error;
use crate::registry::ReportDefinition;
use crate::retry::{Exhausted, RetryPolicy};
use crate::transform::RawReportRow;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How often to poll a submitted job and how long to wait for it overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

/// Runs one report against the reporting API: submit, poll until ready, download.
#[derive(Clone)]
pub struct ReportingClient {
    api: Arc<dyn ReportingApi>,
    retry: RetryPolicy,
    poll: PollSettings,
}

fn fetch_error(phase: &'static str, exhausted: Exhausted) -> Error {
    Error::ReportFetchError {
        phase,
        attempts: exhausted.attempts,
        source: Box::new(exhausted.last_error),
    }
}

impl ReportingClient {
    pub fn new(api: Arc<dyn ReportingApi>, retry: RetryPolicy, poll: PollSettings) -> Self {
        ReportingClient { api, retry, poll }
    }

    /// Fetches the rows of `definition` for `range`.
    ///
    /// # Returns
    /// Every downloaded row, keyed by the definition's field names. An empty
    /// vector means the report ran and had no data.
    ///
    /// # Errors
    /// [`Error::ReportTimeout`] when the job is not ready within the maximum
    /// wait, [`Error::ReportFetchError`] when a call fails permanently or
    /// keeps failing after the retry policy gives up.
    pub async fn fetch(
        &self,
        definition: &ReportDefinition,
        range: &DateRange,
    ) -> Result<Vec<RawReportRow>, Error> {
        let api = &self.api;
        let request = &ReportRequest {
            dimensions: definition.dimension_names(),
            metrics: definition.metric_names(),
            start: range.start,
            end: range.end,
        };

        let job_id = self
            .retry
            .run("submit report", move || api.submit(request))
            .await
            .map_err(|e| fetch_error("submit", e))?;
        info!(
            "Submitted {} report job {} for {}",
            definition.report_type, job_id, range
        );

        self.wait_until_ready(&job_id).await?;

        let job = job_id.as_str();
        let rows = self
            .retry
            .run("download report", move || api.download(job))
            .await
            .map_err(|e| fetch_error("download", e))?;
        info!("Downloaded {} rows from report job {}", rows.len(), job_id);

        let header: Vec<&str> = definition.fields().map(|f| f.name.as_str()).collect();
        let raw_rows: Vec<RawReportRow> = rows
            .into_iter()
            .map(|values| RawReportRow::from_cells(&header, values))
            .collect();

        let misshapen = raw_rows
            .iter()
            .filter(|row| row.cell_count() != header.len())
            .count();
        if misshapen > 0 {
            warn!(
                "{} of {} rows from report job {} do not have {} cells",
                misshapen,
                raw_rows.len(),
                job_id,
                header.len()
            );
        }

        Ok(raw_rows)
    }

    async fn wait_until_ready(&self, job_id: &str) -> Result<(), Error> {
        let api = &self.api;
        let started = Instant::now();

        loop {
            let remaining = self.poll.max_wait.saturating_sub(started.elapsed());
            let status = tokio::time::timeout(
                remaining,
                self.retry.run("poll report", move || api.poll(job_id)),
            )
            .await
            .map_err(|_| Error::ReportTimeout {
                job_id: job_id.to_string(),
                waited: started.elapsed(),
            })?
            .map_err(|e| fetch_error("poll", e))?;

            match status {
                JobStatus::Completed => return Ok(()),
                JobStatus::Failed => {
                    return Err(Error::ReportFetchError {
                        phase: "poll",
                        attempts: 1,
                        source: Box::new(Error::ReportJobFailed {
                            job_id: job_id.to_string(),
                        }),
                    })
                }
                JobStatus::InProgress => {
                    let waited = started.elapsed();
                    if waited >= self.poll.max_wait {
                        return Err(Error::ReportTimeout {
                            job_id: job_id.to_string(),
                            waited,
                        });
                    }
                    debug!("Report job {} still running after {:?}", job_id, waited);
                    tokio::time::sleep(self.poll.interval.min(self.poll.max_wait - waited)).await;
                }
            }
        }
    }
}
