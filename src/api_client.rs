use crate::credentials::Credentials;
use crate::error::Error;
use chrono::{Datelike, NaiveDate};
use reqwest::{header::AUTHORIZATION, Client, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single cell of a downloaded report.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ReportValue {
    Int(i64),
    Double(f64),
    Text(String),
    Null,
}

/// Everything needed to submit one report job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[serde(alias = "PENDING")]
    InProgress,
    #[serde(alias = "READY")]
    Completed,
    Failed,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ReportingApi: Send + Sync + 'static {
    /// Submits a report job.
    /// # Returns
    /// The opaque job handle assigned by the API.
    async fn submit(&self, request: &ReportRequest) -> Result<String, Error>;

    /// Fetches the current status of a submitted job.
    async fn poll(&self, job_id: &str) -> Result<JobStatus, Error>;

    /// Downloads the rows of a completed job.
    /// # Returns
    /// Rows whose cells follow the order of the requested dimensions then metrics.
    async fn download(&self, job_id: &str) -> Result<Vec<Vec<ReportValue>>, Error>;
}

#[derive(Clone)]
pub struct HttpReportingApi {
    client: Client,
    base_url: String,
    network_code: String,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiDate {
    year: i32,
    month: u32,
    day: u32,
}

impl From<NaiveDate> for ApiDate {
    fn from(date: NaiveDate) -> Self {
        ApiDate {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportQuery<'a> {
    dimensions: &'a [String],
    columns: &'a [String],
    date_range_type: &'static str,
    start_date: ApiDate,
    end_date: ApiDate,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportJob<'a> {
    report_query: ReportQuery<'a>,
}

#[derive(Deserialize)]
struct SubmittedJob {
    id: String,
}

#[derive(Deserialize)]
struct JobState {
    status: JobStatus,
}

#[derive(Deserialize)]
struct ReportRows {
    #[serde(default)]
    rows: Vec<Vec<ReportValue>>,
}

impl HttpReportingApi {
    /// Every request, body included, is abandoned after `request_timeout`.
    pub fn new(
        api_url: &str,
        credentials: &Credentials,
        request_timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(HttpReportingApi {
            client,
            base_url: api_url.to_string(),
            network_code: credentials.network_code.clone(),
            token: credentials.access_token.clone(),
        })
    }

    fn jobs_url(&self, job_path: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(&["networks", self.network_code.as_str(), "reportJobs"])
            .extend(job_path);
        Ok(url)
    }

    /// Sends the request, turning rate limiting and server errors into
    /// retryable failures and anything else non-2xx into a permanent one.
    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, Error> {
        let resp = request
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;

        match resp.status() {
            status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                Err(Error::TransientStatus { operation, status })
            }
            _ => Ok(resp.error_for_status()?),
        }
    }
}

#[async_trait::async_trait]
impl ReportingApi for HttpReportingApi {
    async fn submit(&self, request: &ReportRequest) -> Result<String, Error> {
        let url = self.jobs_url(&[])?;
        let body = ReportJob {
            report_query: ReportQuery {
                dimensions: &request.dimensions,
                columns: &request.metrics,
                date_range_type: "CUSTOM_DATE",
                start_date: request.start.into(),
                end_date: request.end.into(),
            },
        };

        let resp = self.send("submit", self.client.post(url).json(&body)).await?;
        let job = resp.json::<SubmittedJob>().await?;
        Ok(job.id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, Error> {
        let url = self.jobs_url(&[job_id])?;
        let resp = self.send("poll", self.client.get(url)).await?;
        let state = resp.json::<JobState>().await?;
        Ok(state.status)
    }

    async fn download(&self, job_id: &str) -> Result<Vec<Vec<ReportValue>>, Error> {
        let url = self.jobs_url(&[job_id, "rows"])?;
        let resp = self.send("download", self.client.get(url)).await?;
        let report = resp.json::<ReportRows>().await?;
        Ok(report.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn credentials() -> Credentials {
        Credentials {
            network_code: "1234".to_string(),
            access_token: "test_token".to_string(),
        }
    }

    fn api(api_url: &str) -> HttpReportingApi {
        HttpReportingApi::new(api_url, &credentials(), Duration::from_secs(5)).unwrap()
    }

    fn request() -> ReportRequest {
        ReportRequest {
            dimensions: vec!["DATE".to_string()],
            metrics: vec!["AD_SERVER_CLICKS".to_string()],
            start: NaiveDate::from_str("2024-01-01").unwrap(),
            end: NaiveDate::from_str("2024-01-31").unwrap(),
        }
    }

    #[test]
    fn test_jobs_url() {
        let api = api("https://reports.example.com/v1/");
        assert_eq!(
            api.jobs_url(&["42", "rows"]).unwrap().as_str(),
            "https://reports.example.com/v1/networks/1234/reportJobs/42/rows"
        );
    }

    #[tokio::test]
    async fn test_submit_invalid_url() {
        let api = api("invalid_url");
        let result = api.submit(&request()).await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out_as_transient() {
        // Accepts connections into the backlog but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let api_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let api = HttpReportingApi::new(&api_url, &credentials(), Duration::from_millis(100))
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), api.poll("42"))
            .await
            .expect("request should give up on its own");

        let err = result.unwrap_err();
        assert!(matches!(&err, Error::ApiFailure(inner) if inner.is_timeout()));
        assert!(err.is_transient());
        drop(listener);
    }

    #[test]
    fn test_report_query_body() {
        let request = request();
        let body = ReportJob {
            report_query: ReportQuery {
                dimensions: &request.dimensions,
                columns: &request.metrics,
                date_range_type: "CUSTOM_DATE",
                start_date: request.start.into(),
                end_date: request.end.into(),
            },
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["reportQuery"]["dateRangeType"], "CUSTOM_DATE");
        assert_eq!(json["reportQuery"]["columns"][0], "AD_SERVER_CLICKS");
        assert_eq!(json["reportQuery"]["endDate"]["day"], 31);
    }

    #[test]
    fn test_report_rows_parse_mixed_values() {
        let rows: ReportRows =
            serde_json::from_str(r#"{"rows": [["France", 250, 3, 0.75, null]]}"#).unwrap();
        assert_eq!(
            rows.rows[0],
            vec![
                ReportValue::Text("France".to_string()),
                ReportValue::Int(250),
                ReportValue::Int(3),
                ReportValue::Double(0.75),
                ReportValue::Null,
            ]
        );
    }

    #[test]
    fn test_empty_report_parses_to_no_rows() {
        let rows: ReportRows = serde_json::from_str("{}").unwrap();
        assert!(rows.rows.is_empty());
    }

    #[test]
    fn test_job_status_parse() {
        let state: JobState = serde_json::from_str(r#"{"status": "IN_PROGRESS"}"#).unwrap();
        assert_eq!(state.status, JobStatus::InProgress);
        let state: JobState = serde_json::from_str(r#"{"status": "COMPLETED"}"#).unwrap();
        assert_eq!(state.status, JobStatus::Completed);
    }
}
