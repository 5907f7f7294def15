//! The remote compression service.
//!
//! Jobs talk to the service through the [`Compressor`] trait so that the HTTP
//! client can be swapped for an in-process fake.

use crate::decorator::RequestDecorator;
use crate::error::{BatchError, JobError};

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

pub const DEFAULT_ENDPOINTS: [&str; 2] = ["tinyjpg.com", "tinypng.com"];
const SHRINK_PATH: &str = "/web/shrink";

/// Size-annotated result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkReport {
  pub input_size: u64,
  pub output_size: u64,
  /// Where the compressed bytes can be fetched from.
  pub url: String,
}

impl ShrinkReport {
  /// Output size as a percentage of the input size.
  pub fn ratio_percent(&self) -> f64 {
    self.output_size as f64 * 100.0 / self.input_size as f64
  }
}

#[async_trait]
pub trait Compressor: Send + Sync {
  /// Uploads one image and returns the service's result descriptor.
  async fn shrink(&self, file_name: &str, body: Vec<u8>) -> Result<ShrinkReport, JobError>;

  /// Streams the compressed bytes behind `url` into `sink`; returns the byte count.
  async fn download(&self, url: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64, JobError>;
}

#[derive(Debug, Deserialize)]
struct RawShrinkResponse {
  #[serde(default)]
  error: Option<Value>,
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  input: Option<RawInput>,
  #[serde(default)]
  output: Option<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
  size: u64,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
  size: u64,
  url: String,
}

fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

/// Decodes the service's JSON reply.
///
/// The `error` field is a flag in some replies and an error code string in
/// others; any truthy value marks a rejection.
pub fn parse_shrink_response(body: &[u8]) -> Result<ShrinkReport, JobError> {
  let raw: RawShrinkResponse = serde_json::from_slice(body)?;

  if let Some(error) = raw.error.as_ref().filter(|e| is_truthy(e)) {
    let message = match (raw.message, error) {
      (Some(message), _) => message,
      (None, Value::String(code)) => code.clone(),
      (None, other) => format!("service reported error {}", other),
    };
    return Err(JobError::Service { message });
  }

  match (raw.input, raw.output) {
    (Some(input), Some(output)) => {
      if input.size == 0 {
        return Err(JobError::Parse("service reported an input size of zero".to_string()));
      }
      Ok(ShrinkReport {
        input_size: input.size,
        output_size: output.size,
        url: output.url,
      })
    }
    (None, _) => Err(JobError::Parse("response has no `input` section".to_string())),
    (_, None) => Err(JobError::Parse("response has no `output` section".to_string())),
  }
}

/// Talks to the real service over HTTPS.
pub struct HttpCompressor {
  client: reqwest::Client,
  endpoints: Vec<String>,
  decorator: Arc<dyn RequestDecorator>,
}

impl HttpCompressor {
  /// `endpoints` are bare host names or full base URLs; one is picked at
  /// random for every upload.
  pub fn new(endpoints: Vec<String>, decorator: Arc<dyn RequestDecorator>) -> Result<Self, BatchError> {
    if endpoints.is_empty() {
      return Err(BatchError::Config("no compression endpoint configured".to_string()));
    }
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| BatchError::Config(format!("cannot build HTTP client: {}", e)))?;
    Ok(Self {
      client,
      endpoints,
      decorator,
    })
  }

  fn shrink_url(&self) -> String {
    let index = rand::rng().random_range(0..self.endpoints.len());
    shrink_url_for(&self.endpoints[index])
  }
}

fn shrink_url_for(endpoint: &str) -> String {
  if endpoint.contains("://") {
    format!("{}{}", endpoint.trim_end_matches('/'), SHRINK_PATH)
  } else {
    format!("https://{}{}", endpoint, SHRINK_PATH)
  }
}

#[async_trait]
impl Compressor for HttpCompressor {
  async fn shrink(&self, file_name: &str, body: Vec<u8>) -> Result<ShrinkReport, JobError> {
    let url = self.shrink_url();
    let mut headers = HeaderMap::new();
    self.decorator.decorate(&mut headers);
    debug!(%file_name, %url, bytes = body.len(), "Uploading.");

    let response = self.client.post(&url).headers(headers).body(body).send().await?;
    let status = response.status();
    let payload = response.bytes().await?;
    trace!(%file_name, %status, "Upload response received.");

    match parse_shrink_response(&payload) {
      Err(JobError::Parse(_)) if !status.is_success() => Err(JobError::Service {
        message: format!("HTTP {}", status),
      }),
      other => other,
    }
  }

  async fn download(&self, url: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64, JobError> {
    let download_error = |message: String| JobError::Download {
      url: url.to_string(),
      message,
    };

    let response = self.client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(download_error(format!("HTTP {}", status)));
    }

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
      let chunk = chunk.map_err(|e| download_error(e.to_string()))?;
      sink.write_all(&chunk).await.map_err(|e| download_error(e.to_string()))?;
      written += chunk.len() as u64;
    }
    sink.flush().await.map_err(|e| download_error(e.to_string()))?;
    Ok(written)
  }
}
