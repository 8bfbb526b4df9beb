use std::cmp::Ordering;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{AssemblyLevel, CandidateRecord, ProteinTarget, Request, ResolvedOutcome};
use crate::error::SepiError;
use crate::ncbi::{EntrezClient, RawRecord};
use crate::query::SearchQuery;

pub const NO_MATCHING_RECORDS: &str = "no matching records";
pub const NO_PARSEABLE_RECORDS: &str = "no parseable records";

/// A tie-break preference. The accession order always applies last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    AssemblyLevel,
    Biosample,
    Length,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionPolicy {
    order: Vec<Criterion>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            order: vec![Criterion::AssemblyLevel, Criterion::Biosample, Criterion::Length],
        }
    }
}

impl SelectionPolicy {
    /// Keeps the first occurrence of each criterion; omitted ones are not used.
    pub fn new(order: Vec<Criterion>) -> Self {
        let mut seen = HashSet::new();
        Self {
            order: order.into_iter().filter(|c| seen.insert(*c)).collect(),
        }
    }

    pub fn order(&self) -> &[Criterion] {
        &self.order
    }

    /// Picks the preferred candidate. Input order never affects the result.
    pub fn select<'a>(
        &self,
        candidates: &'a [CandidateRecord],
        assembly_filter: Option<AssemblyLevel>,
        biosample_requested: bool,
    ) -> Option<&'a CandidateRecord> {
        candidates
            .iter()
            .min_by(|a, b| self.compare(a, b, assembly_filter, biosample_requested))
    }

    fn compare(
        &self,
        a: &CandidateRecord,
        b: &CandidateRecord,
        assembly_filter: Option<AssemblyLevel>,
        biosample_requested: bool,
    ) -> Ordering {
        for criterion in &self.order {
            let ordering = match criterion {
                Criterion::AssemblyLevel => match assembly_filter {
                    Some(level) => {
                        let a_match = a.assembly_level() == Some(level);
                        let b_match = b.assembly_level() == Some(level);
                        b_match.cmp(&a_match)
                    }
                    None => Ordering::Equal,
                },
                Criterion::Biosample if biosample_requested => {
                    b.biosample().is_some().cmp(&a.biosample().is_some())
                }
                Criterion::Biosample => Ordering::Equal,
                Criterion::Length => b.len().cmp(&a.len()),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.accession().cmp(b.accession())
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub retmax: usize,
    pub refseq_first: bool,
    pub timeout: Option<Duration>,
    pub selection: SelectionPolicy,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            retmax: 20,
            refseq_first: true,
            timeout: None,
            selection: SelectionPolicy::default(),
        }
    }
}

/// Resolves one protein name at a time against a fixed request.
pub struct Resolver<'a, C: EntrezClient> {
    client: &'a C,
    request: &'a Request,
    options: &'a ResolveOptions,
}

impl<'a, C: EntrezClient> Resolver<'a, C> {
    pub fn new(client: &'a C, request: &'a Request, options: &'a ResolveOptions) -> Self {
        Self {
            client,
            request,
            options,
        }
    }

    /// Always yields a terminal outcome; failures stay inside this protein.
    pub fn resolve(&self, target: &ProteinTarget, sink: &dyn ProgressSink) -> ResolvedOutcome {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.try_resolve(target, sink)));
        match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(protein = %target.name, error = %err, "resolution failed");
                ResolvedOutcome::Errored {
                    protein: target.name.clone(),
                    detail: err.to_string(),
                }
            }
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(protein = %target.name, %detail, "resolution panicked");
                ResolvedOutcome::Errored {
                    protein: target.name.clone(),
                    detail: format!("internal error: {detail}"),
                }
            }
        }
    }

    fn try_resolve(
        &self,
        target: &ProteinTarget,
        sink: &dyn ProgressSink,
    ) -> Result<ResolvedOutcome, SepiError> {
        let deadline = Deadline::start(self.options.timeout);
        let protein = target.name.as_str();
        let terms = SearchQuery::for_target(self.request, target).ladder(self.options.refseq_first)?;

        let mut ids = Vec::new();
        for (tier, term) in terms.iter().enumerate() {
            deadline.check()?;
            sink.event(ProgressEvent {
                message: format!("phase=Search; protein {protein} tier {}", tier + 1),
                elapsed: None,
            });
            debug!(protein, tier = tier + 1, term = %term, "esearch");
            ids = self.client.search(term, self.options.retmax)?;
            if !ids.is_empty() {
                info!(protein, tier = tier + 1, hits = ids.len(), "search matched");
                break;
            }
        }
        if ids.is_empty() {
            return Ok(ResolvedOutcome::NotFound {
                protein: protein.to_string(),
                reason: NO_MATCHING_RECORDS.to_string(),
            });
        }

        deadline.check()?;
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} records", ids.len()),
            elapsed: None,
        });
        let start = Instant::now();
        let raw = self.client.fetch(&ids)?;
        deadline.check()?;
        sink.event(ProgressEvent {
            message: "phase=Fetch; done".to_string(),
            elapsed: Some(start.elapsed()),
        });

        let candidates = normalize_all(protein, &raw);
        sink.event(ProgressEvent {
            message: format!("phase=Select; {} candidates", candidates.len()),
            elapsed: None,
        });
        let chosen = self.options.selection.select(
            &candidates,
            self.request.assembly_level(),
            self.request.biosample_query().is_some(),
        );
        Ok(match chosen {
            Some(record) => {
                info!(protein, accession = record.accession(), length = record.len(), "selected");
                ResolvedOutcome::Found {
                    protein: protein.to_string(),
                    record: record.clone(),
                }
            }
            None => ResolvedOutcome::NotFound {
                protein: protein.to_string(),
                reason: NO_PARSEABLE_RECORDS.to_string(),
            },
        })
    }
}

struct Deadline {
    at: Option<(Instant, Duration)>,
}

impl Deadline {
    fn start(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|limit| (Instant::now() + limit, limit)),
        }
    }

    fn check(&self) -> Result<(), SepiError> {
        match self.at {
            Some((at, limit)) if Instant::now() >= at => Err(SepiError::Timeout(limit)),
            _ => Ok(()),
        }
    }
}

/// Normalizes every raw record, dropping unparseable ones and duplicate accessions.
pub fn normalize_all(protein: &str, raw: &[RawRecord]) -> Vec<CandidateRecord> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for record in raw {
        match normalize(record) {
            Ok(candidate) => {
                if seen.insert(candidate.accession().to_string()) {
                    candidates.push(candidate);
                }
            }
            Err(err) => {
                warn!(protein, uid = %record.uid, reason = %err, "skipping unparseable record");
            }
        }
    }
    candidates
}

pub fn normalize(raw: &RawRecord) -> Result<CandidateRecord, SepiError> {
    let summary = &raw.summary;
    let fasta = raw.fasta.as_ref().ok_or_else(|| {
        SepiError::MalformedResponse(format!("record {} has no sequence", raw.uid))
    })?;
    let accession = str_field(summary, "accessionversion").unwrap_or(fasta.id.as_str());

    CandidateRecord::new(
        accession,
        &fasta.sequence,
        strain_of(summary).as_deref(),
        assembly_level_of(summary),
        str_field(summary, "biosample"),
        str_field(summary, "title"),
    )
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn strain_of(summary: &Value) -> Option<String> {
    if let Some(strain) = str_field(summary, "strain") {
        return Some(strain.to_string());
    }
    let subtypes = str_field(summary, "subtype")?;
    let subnames = str_field(summary, "subname")?;
    subtypes
        .split('|')
        .zip(subnames.split('|'))
        .find(|(kind, _)| kind.eq_ignore_ascii_case("strain"))
        .map(|(_, name)| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn assembly_level_of(summary: &Value) -> Option<AssemblyLevel> {
    ["assemblylevel", "completeness", "genome"]
        .iter()
        .filter_map(|key| str_field(summary, key))
        .find_map(AssemblyLevel::from_annotation)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ncbi::FastaEntry;

    fn record(accession: &str, len: usize, level: Option<AssemblyLevel>) -> CandidateRecord {
        CandidateRecord::new(accession, &"M".repeat(len), None, level, None, None).unwrap()
    }

    #[test]
    fn assembly_match_beats_length() {
        let candidates = vec![
            record("WP_000003.1", 500, Some(AssemblyLevel::Scaffold)),
            record("WP_000002.1", 300, Some(AssemblyLevel::CompleteGenome)),
        ];
        let chosen = SelectionPolicy::default()
            .select(&candidates, Some(AssemblyLevel::CompleteGenome), false)
            .unwrap();
        assert_eq!(chosen.accession(), "WP_000002.1");
    }

    #[test]
    fn biosample_first_when_reordered() {
        let with_biosample =
            CandidateRecord::new("WP_000009.1", "MKV", None, None, Some("SAMN001"), None).unwrap();
        let with_level = record("WP_000001.1", 3, Some(AssemblyLevel::CompleteGenome));
        let candidates = vec![with_level, with_biosample];

        let default_pick = SelectionPolicy::default()
            .select(&candidates, Some(AssemblyLevel::CompleteGenome), true)
            .unwrap();
        assert_eq!(default_pick.accession(), "WP_000001.1");

        let biosample_first = SelectionPolicy::new(vec![
            Criterion::Biosample,
            Criterion::AssemblyLevel,
            Criterion::Length,
        ]);
        let pick = biosample_first
            .select(&candidates, Some(AssemblyLevel::CompleteGenome), true)
            .unwrap();
        assert_eq!(pick.accession(), "WP_000009.1");
    }

    #[test]
    fn accession_breaks_full_ties() {
        let candidates = vec![record("WP_000200.1", 10, None), record("WP_000100.1", 10, None)];
        let chosen = SelectionPolicy::default()
            .select(&candidates, None, false)
            .unwrap();
        assert_eq!(chosen.accession(), "WP_000100.1");
    }

    #[test]
    fn normalize_reads_subtype_strain() {
        let raw = RawRecord {
            uid: "1".to_string(),
            summary: json!({
                "accessionversion": "NP_414995.1",
                "subtype": "strain|host",
                "subname": "K-12 MG1655|human",
                "completeness": "complete",
                "title": "multidrug efflux pump subunit AcrA"
            }),
            fasta: Some(FastaEntry {
                id: "NP_414995.1".to_string(),
                description: None,
                sequence: "MNKNRGF".to_string(),
            }),
        };
        let candidate = normalize(&raw).unwrap();
        assert_eq!(candidate.strain(), "K-12 MG1655");
        assert_eq!(candidate.assembly_level(), Some(AssemblyLevel::CompleteGenome));
        assert_eq!(candidate.biosample(), None);
    }

    #[test]
    fn normalize_drops_missing_sequence() {
        let raw = RawRecord {
            uid: "2".to_string(),
            summary: json!({"accessionversion": "WP_1.1"}),
            fasta: None,
        };
        assert!(normalize(&raw).is_err());
        assert!(normalize_all("AcrA", &[raw]).is_empty());
    }
}
