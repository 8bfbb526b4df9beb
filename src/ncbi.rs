use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bio::io::fasta;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SepiError;

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const TOOL_NAME: &str = "sepi";

/// Published E-utilities budgets, calls per second.
pub const RATE_LIMIT_ANONYMOUS: usize = 3;
pub const RATE_LIMIT_WITH_KEY: usize = 10;

/// One protein record as returned by the remote service, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub uid: String,
    pub summary: Value,
    pub fasta: Option<FastaEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaEntry {
    pub id: String,
    pub description: Option<String>,
    pub sequence: String,
}

pub trait EntrezClient: Send + Sync {
    fn search(&self, term: &str, retmax: usize) -> Result<Vec<String>, SepiError>;
    fn fetch(&self, ids: &[String]) -> Result<Vec<RawRecord>, SepiError>;
}

/// Rolling one-second call budget shared by every request of a run.
///
/// The lock is held while waiting, so concurrent callers are granted slots
/// strictly one after another.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    recent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn per_second(max_calls: usize) -> Self {
        Self::with_window(max_calls, Duration::from_secs(1))
    }

    pub fn with_window(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Blocks until a call may be issued and returns the granted instant.
    pub fn acquire(&self) -> Instant {
        let mut recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let now = Instant::now();
            while let Some(front) = recent.front() {
                if now.duration_since(*front) >= self.window {
                    recent.pop_front();
                } else {
                    break;
                }
            }
            if recent.len() < self.max_calls {
                recent.push_back(now);
                return now;
            }
            if let Some(front) = recent.front() {
                let wait = self.window.saturating_sub(now.duration_since(*front));
                thread::sleep(wait);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Classification of a single failed attempt.
#[derive(Debug)]
pub enum CallError {
    Transient(String),
    Fatal(SepiError),
}

impl From<SepiError> for CallError {
    fn from(err: SepiError) -> Self {
        match err {
            SepiError::MalformedResponse(detail) | SepiError::NcbiHttp(detail) => {
                CallError::Transient(detail)
            }
            other => CallError::Fatal(other),
        }
    }
}

pub fn retry_with_backoff<T, F>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, SepiError>
where
    F: FnMut() -> Result<T, CallError>,
{
    let mut attempt = 0usize;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(CallError::Fatal(err)) => return Err(err),
            Err(CallError::Transient(detail)) => {
                if attempt >= policy.max_retries {
                    return Err(SepiError::Unavailable {
                        attempts: attempt + 1,
                        detail: format!("{operation}: {detail}"),
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    %detail,
                    "transient NCBI failure, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[derive(Clone)]
pub struct EntrezHttpClient {
    client: Client,
    base_url: String,
    contact: String,
    api_key: Option<String>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl EntrezHttpClient {
    pub fn new(
        contact: &str,
        api_key: Option<String>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, SepiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("{TOOL_NAME}/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SepiError::NcbiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SepiError::NcbiHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: EUTILS_BASE_URL.to_string(),
            contact: contact.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            limiter,
            retry,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn api_key_from_env() -> Option<String> {
        std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }

    pub fn rate_limit_for(api_key: Option<&str>) -> usize {
        if api_key.is_some() {
            RATE_LIMIT_WITH_KEY
        } else {
            RATE_LIMIT_ANONYMOUS
        }
    }

    fn get_once(&self, endpoint: &str, params: &[(&str, String)]) -> Result<String, CallError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(params)
            .query(&[("tool", TOOL_NAME), ("email", self.contact.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        self.limiter.acquire();
        let response = request.send().map_err(|err| {
            if is_retryable_error(&err) {
                CallError::Transient(err.to_string())
            } else {
                CallError::Fatal(SepiError::NcbiHttp(err.to_string()))
            }
        })?;

        let status = response.status().as_u16();
        if is_retryable_status(status) {
            return Err(CallError::Transient(format!("{endpoint} returned {status}")));
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "NCBI request failed".to_string());
            return Err(CallError::Fatal(SepiError::NcbiStatus { status, message }));
        }
        response
            .text()
            .map_err(|err| CallError::Transient(err.to_string()))
    }
}

impl EntrezClient for EntrezHttpClient {
    fn search(&self, term: &str, retmax: usize) -> Result<Vec<String>, SepiError> {
        let params = [
            ("db", "protein".to_string()),
            ("term", term.to_string()),
            ("retmax", retmax.to_string()),
            ("retmode", "json".to_string()),
        ];
        retry_with_backoff(&self.retry, "esearch", || {
            let body = self.get_once("esearch.fcgi", &params)?;
            Ok(parse_search_response(&body)?)
        })
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<RawRecord>, SepiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = ids.join(",");
        let summary = retry_with_backoff(&self.retry, "esummary", || {
            let body = self.get_once(
                "esummary.fcgi",
                &[
                    ("db", "protein".to_string()),
                    ("id", id_list.clone()),
                    ("retmode", "json".to_string()),
                ],
            )?;
            serde_json::from_str::<Value>(&body)
                .map_err(|err| CallError::Transient(format!("esummary body: {err}")))
        })?;
        let entries = retry_with_backoff(&self.retry, "efetch", || {
            let body = self.get_once(
                "efetch.fcgi",
                &[
                    ("db", "protein".to_string()),
                    ("id", id_list.clone()),
                    ("rettype", "fasta".to_string()),
                    ("retmode", "text".to_string()),
                ],
            )?;
            Ok(parse_fasta(&body)?)
        })?;
        join_records(&summary, entries)
    }
}

/// Extracts the id list from an `esearch` JSON body.
pub fn parse_search_response(body: &str) -> Result<Vec<String>, SepiError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| SepiError::MalformedResponse(format!("esearch body: {err}")))?;
    let result = value
        .get("esearchresult")
        .ok_or_else(|| SepiError::MalformedResponse("missing esearchresult".to_string()))?;
    if let Some(message) = result.get("ERROR").and_then(|v| v.as_str()) {
        return Err(SepiError::NcbiStatus {
            status: 400,
            message: message.to_string(),
        });
    }
    let ids = result
        .get("idlist")
        .and_then(|v| v.as_array())
        .ok_or_else(|| SepiError::MalformedResponse("missing idlist".to_string()))?;
    Ok(ids
        .iter()
        .filter_map(|id| id.as_str())
        .map(str::to_string)
        .collect())
}

pub fn parse_fasta(body: &str) -> Result<Vec<FastaEntry>, SepiError> {
    let mut entries = Vec::new();
    for record in fasta::Reader::new(body.as_bytes()).records() {
        let record = record.map_err(|err| SepiError::MalformedResponse(format!("fasta: {err}")))?;
        entries.push(FastaEntry {
            id: record.id().to_string(),
            description: record.desc().map(str::to_string),
            sequence: String::from_utf8_lossy(record.seq()).into_owned(),
        });
    }
    Ok(entries)
}

/// Pairs `esummary` documents with FASTA entries on accession-version, in
/// the order of the summary's `uids` list. A document whose accession is not
/// among the FASTA ids falls back to its gi number.
pub fn join_records(summary: &Value, entries: Vec<FastaEntry>) -> Result<Vec<RawRecord>, SepiError> {
    let result = summary
        .get("result")
        .ok_or_else(|| SepiError::MalformedResponse("esummary missing result".to_string()))?;
    let uids = result
        .get("uids")
        .and_then(|v| v.as_array())
        .ok_or_else(|| SepiError::MalformedResponse("esummary missing uids".to_string()))?;

    let mut by_accession = HashMap::new();
    let mut by_gi = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let header = FastaHeader::parse(&entry.id);
        by_accession.entry(header.accession).or_insert(index);
        if let Some(gi) = header.gi {
            by_gi.entry(gi).or_insert(index);
        }
    }
    let mut slots: Vec<Option<FastaEntry>> = entries.into_iter().map(Some).collect();

    let mut records = Vec::with_capacity(uids.len());
    for uid in uids.iter().filter_map(|v| v.as_str()) {
        let doc = result.get(uid).cloned().unwrap_or(Value::Null);
        let gi = id_field(&doc, "gi").unwrap_or_else(|| uid.to_string());
        let fasta = doc
            .get("accessionversion")
            .and_then(|v| v.as_str())
            .and_then(|acc| by_accession.get(acc))
            .or_else(|| by_gi.get(&gi))
            .and_then(|index| slots[*index].take());
        if fasta.is_none() {
            debug!(uid, "no FASTA entry matched summary");
        }
        records.push(RawRecord {
            uid: uid.to_string(),
            summary: doc,
            fasta,
        });
    }
    Ok(records)
}

fn id_field(doc: &Value, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(value) if !value.is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

/// Identifiers carried by a FASTA id token such as `sp|P0AE06.1|ACRA_ECOLI`,
/// `pdb|2F1M|A` or the legacy `gi|16128441|ref|NP_414996.1|`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FastaHeader {
    accession: String,
    gi: Option<String>,
}

impl FastaHeader {
    fn parse(id: &str) -> Self {
        let fields: Vec<&str> = id.split('|').collect();
        let mut gi = None;
        let mut accession = None;
        let mut index = 0;
        while index < fields.len() && accession.is_none() {
            let value = fields.get(index + 1).copied().filter(|v| !v.is_empty());
            match fields[index] {
                "gi" => gi = value.map(str::to_string),
                "pdb" => {
                    accession = value.map(|pdb| match fields.get(index + 2) {
                        Some(chain) if !chain.is_empty() => format!("{pdb}_{chain}"),
                        _ => pdb.to_string(),
                    })
                }
                "sp" | "tr" | "ref" | "gb" | "emb" | "dbj" | "pir" | "prf" | "tpg" | "tpe"
                | "tpd" => accession = value.map(str::to_string),
                _ if fields.len() == 1 => accession = Some(id.to_string()),
                _ => break,
            }
            index += 2;
        }
        let accession = accession.unwrap_or_else(|| {
            fields
                .iter()
                .rev()
                .find(|field| !field.is_empty())
                .unwrap_or(&id)
                .to_string()
        });
        Self { accession, gi }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
