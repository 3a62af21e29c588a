use super::{Store, StoreError, SAMPLES_LIMIT};
use crate::measurement::{ChannelId, DeviceId, RawSample, RunHeader, RunId, RunStatus, SamplePoint};
use crate::time::{RunIdGen, SysTime};
use crate::HashMap;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Header records land in this measurement, tagged by `history_id`.
const HEADER_MEASUREMENT: &str = "measurement_history";

/// Sample points land in this measurement, tagged by `history_id`,
/// `device_id` and `channel_id`.
const SAMPLE_MEASUREMENT: &str = "measurement_data";

/// Connection parameters of an InfluxDB 2.x instance.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

/// InfluxDB-backed store: plain line protocol over the v2 HTTP API for
/// writes, Flux over the query endpoint (annotated CSV back) for reads.
pub struct InfluxStore {
    client: reqwest::Client,
    config: InfluxConfig,
    /// how far back `list_recent_runs` looks
    window: Duration,
    time: Arc<dyn SysTime>,
    ids: RunIdGen,
}

impl InfluxStore {
    pub fn new(config: InfluxConfig, window: Duration, time: Arc<dyn SysTime>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            window,
            time,
            ids: RunIdGen::new(),
        }
    }

    async fn write_lines(&self, lines: String) -> Result<(), StoreError> {
        let url = format!("{}/api/v2/write", self.config.url);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines)
            .send()
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Write(format!("{}: {}", status, body)))
        }
    }

    async fn query(&self, flux: String) -> Result<Vec<HashMap<String, String>>, StoreError> {
        let url = format!("{}/api/v2/query", self.config.url);
        let response = self
            .client
            .post(&url)
            .query(&[("org", self.config.org.as_str())])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(flux)
            .send()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        if status.is_success() {
            Ok(parse_annotated_csv(&body))
        } else {
            Err(StoreError::Query(format!("{}: {}", status, body)))
        }
    }
}

#[async_trait]
impl Store for InfluxStore {
    async fn write_run_header(
        &self,
        start_time: u64,
        end_time: u64,
        status: RunStatus,
        device_count: u32,
        channel_count: u32,
    ) -> Result<RunId, StoreError> {
        let history_id = self.ids.next(&*self.time);
        let line = header_line(
            history_id,
            start_time,
            end_time,
            status,
            device_count,
            channel_count,
        );
        self.write_lines(line).await?;
        Ok(history_id)
    }

    async fn write_samples(
        &self,
        run_id: RunId,
        device: DeviceId,
        channel: ChannelId,
        samples: Vec<RawSample>,
    ) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }
        let base = self.time.nanos();
        self.write_lines(sample_lines(run_id, device, channel, &samples, base))
            .await
    }

    async fn list_recent_runs(&self, limit: usize) -> Result<Vec<RunHeader>, StoreError> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> range(start: -{window}s)
  |> filter(fn: (r) => r._measurement == "{measurement}")
  |> pivot(rowKey: ["_time"], columnKey: ["_field"], valueColumn: "_value")
  |> group()
  |> sort(columns: ["_time"], desc: true)
  |> limit(n: {limit})"#,
            bucket = self.config.bucket,
            window = self.window.as_secs(),
            measurement = HEADER_MEASUREMENT,
            limit = limit,
        );
        let rows = self.query(flux).await?;
        parse_headers(rows)
    }

    async fn get_samples(&self, run_id: RunId) -> Result<Vec<SamplePoint>, StoreError> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> range(start: 0)
  |> filter(fn: (r) => r._measurement == "{measurement}" and r.history_id == "{run_id}")
  |> map(fn: (r) => ({{ r with nanos: int(v: r._time) }}))
  |> group()
  |> sort(columns: ["_time"])
  |> limit(n: {limit})"#,
            bucket = self.config.bucket,
            measurement = SAMPLE_MEASUREMENT,
            run_id = run_id,
            limit = SAMPLES_LIMIT,
        );
        let rows = self.query(flux).await?;
        parse_samples(rows)
    }
}

fn header_line(
    history_id: RunId,
    start_time: u64,
    end_time: u64,
    status: RunStatus,
    device_count: u32,
    channel_count: u32,
) -> String {
    // the point's timestamp doubles as the run id: both come from the same
    // wall-clock nanosecond read
    format!(
        "{},history_id={} start_time={}i,end_time={}i,status=\"{}\",device_count={}i,channel_count={}i {}",
        HEADER_MEASUREMENT,
        history_id,
        start_time,
        end_time,
        status.as_str(),
        device_count,
        channel_count,
        history_id,
    )
}

fn sample_lines(
    run_id: RunId,
    device: DeviceId,
    channel: ChannelId,
    samples: &[RawSample],
    base: i64,
) -> String {
    let lines: Vec<_> = samples
        .iter()
        .enumerate()
        .map(|(index, value)| {
            format!(
                "{},history_id={},device_id={},channel_id={} value={}i {}",
                SAMPLE_MEASUREMENT,
                run_id,
                device,
                channel,
                value,
                base + index as i64 * 1_000_000,
            )
        })
        .collect();
    lines.join("\n")
}

/// Parses the annotated CSV format of the v2 query endpoint into one map per
/// row, keyed by column name. Annotation lines and table separators are
/// skipped; quoting is stripped.
fn parse_annotated_csv(body: &str) -> Vec<HashMap<String, String>> {
    let mut rows = Vec::new();
    let mut columns: Option<Vec<String>> = None;
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            // a blank line separates tables; the next one is a header
            columns = None;
            continue;
        }
        let values: Vec<String> = line
            .split(',')
            .map(|value| value.trim_matches('"').to_string())
            .collect();
        match &columns {
            None => columns = Some(values),
            Some(columns) => {
                let row = columns
                    .iter()
                    .cloned()
                    .zip(values.into_iter())
                    .collect::<HashMap<_, _>>();
                rows.push(row);
            }
        }
    }
    rows
}

fn field<'a>(
    row: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, StoreError> {
    row.get(name)
        .map(|value| value.as_str())
        .ok_or_else(|| StoreError::Query(format!("column {} missing from query result", name)))
}

// influx renders numeric columns as plain integers or float-formatted
// decimals depending on their datatype annotation; run ids don't fit f64
// exactly, so try i64 first
fn integer(row: &HashMap<String, String>, name: &str) -> Result<i64, StoreError> {
    let value = field(row, name)?;
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|float| float as i64))
        .ok_or_else(|| StoreError::Query(format!("column {} is not numeric: {}", name, value)))
}

fn parse_headers(rows: Vec<HashMap<String, String>>) -> Result<Vec<RunHeader>, StoreError> {
    rows.into_iter()
        .map(|row| {
            let status = field(&row, "status")?
                .parse::<RunStatus>()
                .map_err(StoreError::Query)?;
            Ok(RunHeader {
                history_id: integer(&row, "history_id")? as RunId,
                start_time: integer(&row, "start_time")? as u64,
                end_time: integer(&row, "end_time")? as u64,
                status,
                device_count: integer(&row, "device_count")? as u32,
                channel_count: integer(&row, "channel_count")? as u32,
            })
        })
        .collect()
}

fn parse_samples(rows: Vec<HashMap<String, String>>) -> Result<Vec<SamplePoint>, StoreError> {
    rows.into_iter()
        .map(|row| {
            Ok(SamplePoint {
                history_id: integer(&row, "history_id")? as RunId,
                device_id: integer(&row, "device_id")? as DeviceId,
                channel_id: integer(&row, "channel_id")? as ChannelId,
                value: integer(&row, "_value")? as RawSample,
                timestamp: integer(&row, "nanos")?,
            })
        })
        .collect()
}
