use crate::chunker::{self, DateRange};
use crate::error::Error;
use crate::pipeline::{Orchestrator, PipelineResult};
use crate::registry::ALL_REPORTS;
use chrono::NaiveDate;
use log::{error, info};

/// Replays historical ranges one month at a time, report type by report type.
pub struct BackfillDriver {
    orchestrator: Orchestrator,
}

impl BackfillDriver {
    pub fn new(orchestrator: Orchestrator) -> Self {
        BackfillDriver { orchestrator }
    }

    /// Resolves the selection to registered identifiers, expanding `all`
    /// and dropping repeats while keeping the first-seen order.
    pub fn resolve_selection(&self, report_types: &[String]) -> Result<Vec<String>, Error> {
        if report_types.is_empty() {
            return Err(Error::EmptyReportSelection);
        }

        let registry = self.orchestrator.registry();
        let mut resolved: Vec<String> = Vec::new();
        for name in report_types {
            let identifiers: Vec<String> = if name.eq_ignore_ascii_case(ALL_REPORTS) {
                registry
                    .list_all()
                    .iter()
                    .map(|d| d.report_type.clone())
                    .collect()
            } else {
                vec![registry.lookup(name)?.report_type.clone()]
            };

            for identifier in identifiers {
                if !resolved.contains(&identifier) {
                    resolved.push(identifier);
                }
            }
        }

        Ok(resolved)
    }

    /// Runs every selected report type over `[start, end]`, chunked by month.
    ///
    /// Chunks run strictly in order. The first failed chunk ends that report
    /// type; already loaded chunks are kept and the next report type starts.
    ///
    /// # Returns
    /// One result per attempted `(report type, chunk)` pair, or an Error when
    /// the selection or the range is rejected before anything runs.
    pub async fn run(
        &self,
        report_types: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PipelineResult>, Error> {
        if report_types.is_empty() {
            return Err(Error::EmptyReportSelection);
        }
        let chunks: Vec<DateRange> = chunker::split(start, end)?.collect();
        let selection = self.resolve_selection(report_types)?;

        info!(
            "Backfilling {} from {} to {} in {} chunk(s)",
            selection.join(", "),
            start,
            end,
            chunks.len()
        );

        let mut results = Vec::new();
        for report_type in &selection {
            let mut last_loaded: Option<DateRange> = None;

            for chunk in &chunks {
                let result = self.orchestrator.run(report_type, *chunk).await;
                let failed = result.is_failure();
                results.push(result);

                if failed {
                    match last_loaded {
                        Some(done) => error!(
                            "Backfill of {} stopped at {}; loaded through {}, resume from {}",
                            report_type, chunk, done.end, chunk.start
                        ),
                        None => error!(
                            "Backfill of {} stopped at {}; nothing loaded, resume from {}",
                            report_type, chunk, chunk.start
                        ),
                    }
                    break;
                }
                last_loaded = Some(*chunk);
            }

            if let Some(done) = last_loaded {
                info!("Backfill of {} loaded {} to {}", report_type, start, done.end);
            }
        }

        Ok(results)
    }
}
