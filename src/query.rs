use crate::domain::{AssemblyLevel, ProteinTarget, Request};
use crate::error::SepiError;

const REFSEQ_FILTER: &str = "srcdb_refseq[PROP]";
const COMPLETE_GENOME_FILTER: &str = "\"complete genome\"[Filter]";
const EXCLUDE_NOISE: &str = "NOT (resistance OR resistant OR multidrug OR hypothetical)";

/// Inputs for one protein's Entrez search term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchQuery<'a> {
    pub organism: &'a str,
    pub protein: &'a str,
    pub strain: Option<&'a str>,
    pub assembly_level: Option<AssemblyLevel>,
    pub biosample_query: Option<&'a str>,
}

impl<'a> SearchQuery<'a> {
    pub fn for_target(request: &'a Request, target: &'a ProteinTarget) -> Self {
        Self {
            organism: request.organism(),
            protein: &target.name,
            strain: target.strain.as_deref(),
            assembly_level: request.assembly_level(),
            biosample_query: request.biosample_query(),
        }
    }

    /// The term every search tier is built on: organism, optional strain,
    /// protein name, optional assembly level and biosample clause, ANDed.
    pub fn term(&self) -> Result<String, SepiError> {
        self.term_with_level(true)
    }

    /// Search terms from most to least strict. Without an assembly level the
    /// first three tiers are held to complete genomes; the last tier drops
    /// the genome qualifier either way. With `refseq_first` unset the ladder
    /// holds the base term only.
    pub fn ladder(&self, refseq_first: bool) -> Result<Vec<String>, SepiError> {
        let base = self.term()?;
        if !refseq_first {
            return Ok(vec![base]);
        }
        let qualified = match self.assembly_level {
            Some(_) => base,
            None => format!("{base} AND ({COMPLETE_GENOME_FILTER})"),
        };
        Ok(vec![
            format!("{qualified} AND ({REFSEQ_FILTER}) {EXCLUDE_NOISE}"),
            format!("{qualified} AND ({REFSEQ_FILTER})"),
            qualified,
            self.term_with_level(false)?,
        ])
    }

    fn term_with_level(&self, with_level: bool) -> Result<String, SepiError> {
        let mut parts = vec![format!("{}[Organism]", quoted(self.organism, "organism")?)];
        if let Some(strain) = self.strain {
            parts.push(format!("{}[Strain]", quoted(strain, "strain")?));
        }
        let protein = quoted(self.protein, "protein name")?;
        parts.push(format!("({protein}[Protein Name] OR {protein}[Gene Name])"));
        if let Some(level) = self.assembly_level.filter(|_| with_level) {
            parts.push(format!("(\"{}\"[Assembly Level])", level.entrez_label()));
        }
        if let Some(query) = self.biosample_query {
            parts.push(format!("({})", biosample_clause(query)?));
        }
        Ok(parts.join(" AND "))
    }
}

pub fn build_term(
    organism: &str,
    protein: &str,
    assembly_level: Option<AssemblyLevel>,
    biosample_query: Option<&str>,
) -> Result<String, SepiError> {
    SearchQuery {
        organism,
        protein,
        strain: None,
        assembly_level,
        biosample_query,
    }
    .term()
}

fn quoted(value: &str, field: &str) -> Result<String, SepiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SepiError::MalformedQuery(format!("empty {field}")));
    }
    if trimmed.contains('"') {
        return Err(SepiError::MalformedQuery(format!(
            "{field} contains a double quote: {trimmed}"
        )));
    }
    Ok(format!("\"{trimmed}\""))
}

fn biosample_clause(query: &str) -> Result<&str, SepiError> {
    let trimmed = query.trim();
    let mut depth = 0i32;
    for ch in trimmed.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SepiError::MalformedQuery(format!(
            "unbalanced parentheses in biosample query: {trimmed}"
        )));
    }
    if trimmed.matches('"').count() % 2 != 0 {
        return Err(SepiError::MalformedQuery(format!(
            "unbalanced quotes in biosample query: {trimmed}"
        )));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn term_without_filters() {
        let term = build_term("Escherichia coli", "AcrA", None, None).unwrap();
        assert_eq!(
            term,
            "\"Escherichia coli\"[Organism] AND (\"AcrA\"[Protein Name] OR \"AcrA\"[Gene Name])"
        );
    }

    #[test]
    fn term_with_all_filters() {
        let query = SearchQuery {
            organism: "Escherichia coli",
            protein: "AcrB",
            strain: Some("K-12 MG1655"),
            assembly_level: Some(AssemblyLevel::CompleteGenome),
            biosample_query: Some("host=human"),
        };
        assert_eq!(
            query.term().unwrap(),
            "\"Escherichia coli\"[Organism] AND \"K-12 MG1655\"[Strain] AND \
             (\"AcrB\"[Protein Name] OR \"AcrB\"[Gene Name]) AND \
             (\"complete genome\"[Assembly Level]) AND (host=human)"
        );
    }

    #[test]
    fn ladder_prefers_complete_genomes_without_a_level() {
        let query = SearchQuery {
            organism: "Klebsiella pneumoniae",
            protein: "OqxA",
            strain: None,
            assembly_level: None,
            biosample_query: None,
        };
        let base = query.term().unwrap();
        let ladder = query.ladder(true).unwrap();
        assert_eq!(ladder.len(), 4);
        assert!(ladder[0].contains(EXCLUDE_NOISE));
        assert!(ladder[..3].iter().all(|t| t.contains("(\"complete genome\"[Filter])")));
        assert_eq!(
            ladder[1],
            format!("{base} AND (\"complete genome\"[Filter]) AND (srcdb_refseq[PROP])")
        );
        assert_eq!(ladder[2], format!("{base} AND (\"complete genome\"[Filter])"));
        assert_eq!(ladder[3], base);
        assert_eq!(query.ladder(false).unwrap(), vec![base]);
    }

    #[test]
    fn ladder_relaxes_requested_level_last() {
        let query = SearchQuery {
            organism: "Escherichia coli",
            protein: "TolC",
            strain: None,
            assembly_level: Some(AssemblyLevel::Chromosome),
            biosample_query: Some("host=human"),
        };
        let base = query.term().unwrap();
        let ladder = query.ladder(true).unwrap();
        assert_eq!(ladder.len(), 4);
        assert!(ladder.iter().all(|t| !t.contains("[Filter]")));
        assert_eq!(ladder[2], base);
        assert!(ladder[..3].iter().all(|t| t.contains("(\"chromosome\"[Assembly Level])")));
        assert_eq!(
            ladder[3],
            "\"Escherichia coli\"[Organism] AND (\"TolC\"[Protein Name] OR \"TolC\"[Gene Name]) \
             AND (host=human)"
        );
        assert_eq!(query.ladder(false).unwrap(), vec![base]);
    }

    #[test]
    fn quote_in_protein_is_malformed() {
        let err = build_term("Escherichia coli", "Acr\"A", None, None).unwrap_err();
        assert_matches!(err, SepiError::MalformedQuery(_));
    }

    #[test]
    fn unbalanced_biosample_is_malformed() {
        let err = build_term("Escherichia coli", "AcrA", None, Some("(host=human")).unwrap_err();
        assert_matches!(err, SepiError::MalformedQuery(_));
        let err = build_term("Escherichia coli", "AcrA", None, Some("host=human)(")).unwrap_err();
        assert_matches!(err, SepiError::MalformedQuery(_));
    }
}
