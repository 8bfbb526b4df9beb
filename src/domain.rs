use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SepiError;

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+(_[A-Za-z0-9]+)?(\.[0-9]+)?$").expect("valid regex"));

pub const NCBI_PROTEIN_URL: &str = "https://www.ncbi.nlm.nih.gov/protein";

/// Genome assembly tier, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyLevel {
    CompleteGenome,
    Chromosome,
    Scaffold,
    Contig,
}

impl AssemblyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblyLevel::CompleteGenome => "complete_genome",
            AssemblyLevel::Chromosome => "chromosome",
            AssemblyLevel::Scaffold => "scaffold",
            AssemblyLevel::Contig => "contig",
        }
    }

    /// Wording used by the Entrez `[Assembly Level]` field.
    pub fn entrez_label(&self) -> &'static str {
        match self {
            AssemblyLevel::CompleteGenome => "complete genome",
            AssemblyLevel::Chromosome => "chromosome",
            AssemblyLevel::Scaffold => "scaffold",
            AssemblyLevel::Contig => "contig",
        }
    }

    /// Parses a filter token where `none` (or an empty value) disables filtering.
    pub fn parse_filter(value: &str) -> Result<Option<Self>, SepiError> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }

    /// Lenient mapping of free-text annotations found in remote summaries.
    pub fn from_annotation(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "complete_genome" | "complete" | "complete_sequence" => {
                Some(AssemblyLevel::CompleteGenome)
            }
            "chromosome" => Some(AssemblyLevel::Chromosome),
            "scaffold" => Some(AssemblyLevel::Scaffold),
            "contig" => Some(AssemblyLevel::Contig),
            _ => None,
        }
    }
}

impl fmt::Display for AssemblyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssemblyLevel {
    type Err = SepiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "complete_genome" => Ok(AssemblyLevel::CompleteGenome),
            "chromosome" => Ok(AssemblyLevel::Chromosome),
            "scaffold" => Ok(AssemblyLevel::Scaffold),
            "contig" => Ok(AssemblyLevel::Contig),
            _ => Err(SepiError::InvalidAssemblyLevel(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProteinTarget {
    pub name: String,
    pub strain: Option<String>,
}

/// One validated retrieval request. Built once per run and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    organism: String,
    proteins: Vec<ProteinTarget>,
    assembly_level: Option<AssemblyLevel>,
    biosample_query: Option<String>,
    #[serde(skip)]
    contact: String,
}

impl Request {
    pub fn new(
        organism: &str,
        proteins: Vec<String>,
        assembly_level: Option<AssemblyLevel>,
        biosample_query: Option<String>,
        contact: &str,
    ) -> Result<Self, SepiError> {
        let targets = proteins
            .into_iter()
            .map(|name| ProteinTarget { name, strain: None })
            .collect();
        Self::with_targets(organism, targets, assembly_level, biosample_query, contact)
    }

    pub fn with_targets(
        organism: &str,
        targets: Vec<ProteinTarget>,
        assembly_level: Option<AssemblyLevel>,
        biosample_query: Option<String>,
        contact: &str,
    ) -> Result<Self, SepiError> {
        let organism = organism.trim();
        if organism.is_empty() {
            return Err(SepiError::InvalidRequest(
                "organism must not be empty".to_string(),
            ));
        }
        let contact = contact.trim();
        if contact.is_empty() {
            return Err(SepiError::InvalidRequest(
                "a contact email is required by NCBI".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut proteins = Vec::new();
        for target in targets {
            let name = target.name.trim();
            if name.is_empty() || !seen.insert(name.to_lowercase()) {
                continue;
            }
            proteins.push(ProteinTarget {
                name: name.to_string(),
                strain: target
                    .strain
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            });
        }
        if proteins.is_empty() {
            return Err(SepiError::InvalidRequest(
                "at least one protein name is required".to_string(),
            ));
        }

        let biosample_query = biosample_query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());

        Ok(Self {
            organism: organism.to_string(),
            proteins,
            assembly_level,
            biosample_query,
            contact: contact.to_string(),
        })
    }

    pub fn organism(&self) -> &str {
        &self.organism
    }

    pub fn proteins(&self) -> &[ProteinTarget] {
        &self.proteins
    }

    pub fn protein_names(&self) -> impl Iterator<Item = &str> {
        self.proteins.iter().map(|target| target.name.as_str())
    }

    pub fn assembly_level(&self) -> Option<AssemblyLevel> {
        self.assembly_level
    }

    pub fn biosample_query(&self) -> Option<&str> {
        self.biosample_query.as_deref()
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }
}

/// A normalized hit for one protein query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateRecord {
    accession: String,
    sequence: String,
    strain: String,
    assembly_level: Option<AssemblyLevel>,
    biosample: Option<String>,
    title: Option<String>,
    url: String,
}

impl CandidateRecord {
    pub fn new(
        accession: &str,
        sequence: &str,
        strain: Option<&str>,
        assembly_level: Option<AssemblyLevel>,
        biosample: Option<&str>,
        title: Option<&str>,
    ) -> Result<Self, SepiError> {
        let accession = accession.trim();
        if !ACCESSION_RE.is_match(accession) {
            return Err(SepiError::MalformedResponse(format!(
                "malformed accession {accession:?}"
            )));
        }
        let sequence: String = sequence
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_uppercase())
            .collect();
        if !sequence.chars().any(|ch| ch.is_ascii_alphabetic()) {
            return Err(SepiError::MalformedResponse(format!(
                "no residues in sequence for {accession}"
            )));
        }
        if let Some(bad) = sequence
            .chars()
            .find(|ch| !(ch.is_ascii_alphabetic() || *ch == '*'))
        {
            return Err(SepiError::MalformedResponse(format!(
                "non amino-acid symbol {bad:?} in {accession}"
            )));
        }
        let strain = strain
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown");
        let non_empty = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            url: format!("{NCBI_PROTEIN_URL}/{accession}"),
            accession: accession.to_string(),
            sequence,
            strain: strain.to_string(),
            assembly_level,
            biosample: non_empty(biosample),
            title: non_empty(title),
        })
    }

    pub fn accession(&self) -> &str {
        &self.accession
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn strain(&self) -> &str {
        &self.strain
    }

    pub fn assembly_level(&self) -> Option<AssemblyLevel> {
        self.assembly_level
    }

    pub fn biosample(&self) -> Option<&str> {
        self.biosample.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Terminal result for one requested protein.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolvedOutcome {
    Found {
        protein: String,
        record: CandidateRecord,
    },
    NotFound {
        protein: String,
        reason: String,
    },
    Errored {
        protein: String,
        detail: String,
    },
}

impl ResolvedOutcome {
    pub fn protein(&self) -> &str {
        match self {
            ResolvedOutcome::Found { protein, .. }
            | ResolvedOutcome::NotFound { protein, .. }
            | ResolvedOutcome::Errored { protein, .. } => protein,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ResolvedOutcome::Found { .. } => "found",
            ResolvedOutcome::NotFound { .. } => "not_found",
            ResolvedOutcome::Errored { .. } => "error",
        }
    }

    pub fn record(&self) -> Option<&CandidateRecord> {
        match self {
            ResolvedOutcome::Found { record, .. } => Some(record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub found: usize,
    pub not_found: usize,
    pub errored: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.found + self.not_found + self.errored
    }
}

/// Outcomes in request order, one per requested protein.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    outcomes: Vec<ResolvedOutcome>,
}

impl ResultSet {
    pub(crate) fn new(outcomes: Vec<ResolvedOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[ResolvedOutcome] {
        &self.outcomes
    }

    pub fn found(&self) -> impl Iterator<Item = (&str, &CandidateRecord)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.record().map(|record| (outcome.protein(), record)))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in &self.outcomes {
            match outcome {
                ResolvedOutcome::Found { .. } => counts.found += 1,
                ResolvedOutcome::NotFound { .. } => counts.not_found += 1,
                ResolvedOutcome::Errored { .. } => counts.errored += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_assembly_filter_none() {
        assert_eq!(AssemblyLevel::parse_filter("none").unwrap(), None);
        assert_eq!(
            AssemblyLevel::parse_filter("Complete_Genome").unwrap(),
            Some(AssemblyLevel::CompleteGenome)
        );
    }

    #[test]
    fn parse_assembly_filter_invalid() {
        let err = AssemblyLevel::parse_filter("invalid_level").unwrap_err();
        assert_matches!(err, SepiError::InvalidAssemblyLevel(_));
    }

    #[test]
    fn request_dedups_case_insensitively() {
        let request = Request::new(
            "Escherichia coli",
            vec![
                "AcrA".to_string(),
                " acra ".to_string(),
                "AcrB".to_string(),
                "".to_string(),
            ],
            None,
            None,
            "user@example.com",
        )
        .unwrap();
        let names: Vec<_> = request.protein_names().collect();
        assert_eq!(names, vec!["AcrA", "AcrB"]);
    }

    #[test]
    fn request_rejects_empty_organism() {
        let err = Request::new("  ", vec!["AcrA".to_string()], None, None, "a@b.c").unwrap_err();
        assert_matches!(err, SepiError::InvalidRequest(_));
    }

    #[test]
    fn candidate_rejects_bad_sequence() {
        let err = CandidateRecord::new("WP_000001.1", "MK1L", None, None, None, None).unwrap_err();
        assert_matches!(err, SepiError::MalformedResponse(_));
    }

    #[test]
    fn candidate_defaults_strain_and_url() {
        let record =
            CandidateRecord::new("WP_000001.1", "mkl\nqv", Some(" "), None, None, None).unwrap();
        assert_eq!(record.strain(), "unknown");
        assert_eq!(record.sequence(), "MKLQV");
        assert_eq!(record.url(), "https://www.ncbi.nlm.nih.gov/protein/WP_000001.1");
    }
}
