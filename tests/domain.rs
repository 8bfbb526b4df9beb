use std::str::FromStr;

use assert_matches::assert_matches;

use sepi::domain::{AssemblyLevel, CandidateRecord, Request, ResolvedOutcome};
use sepi::error::SepiError;

#[test]
fn request_trims_and_dedupes_names() {
    let request = Request::new(
        "  Klebsiella pneumoniae ",
        vec![
            "OqxA".to_string(),
            " oqxa ".to_string(),
            "".to_string(),
            "OqxB".to_string(),
        ],
        Some(AssemblyLevel::Chromosome),
        Some("  ".to_string()),
        "lab@example.org",
    )
    .unwrap();

    assert_eq!(request.organism(), "Klebsiella pneumoniae");
    assert_eq!(request.protein_names().collect::<Vec<_>>(), vec!["OqxA", "OqxB"]);
    assert_eq!(request.biosample_query(), None);
}

#[test]
fn request_needs_proteins_and_contact() {
    let err = Request::new("E. coli", Vec::new(), None, None, "a@b.c").unwrap_err();
    assert_matches!(err, SepiError::InvalidRequest(_));

    let err = Request::new("E. coli", vec!["AcrA".to_string()], None, None, " ").unwrap_err();
    assert_matches!(err, SepiError::InvalidRequest(_));
}

#[test]
fn assembly_level_names() {
    assert_eq!(
        AssemblyLevel::from_str("complete_genome").unwrap(),
        AssemblyLevel::CompleteGenome
    );
    assert_eq!(AssemblyLevel::parse_filter("none").unwrap(), None);
    assert_matches!(
        AssemblyLevel::parse_filter("invalid_level"),
        Err(SepiError::InvalidAssemblyLevel(_))
    );
    assert_eq!(
        AssemblyLevel::from_annotation("Complete Genome"),
        Some(AssemblyLevel::CompleteGenome)
    );
    assert_eq!(AssemblyLevel::Contig.to_string(), "contig");
}

#[test]
fn candidate_sequence_is_normalized() {
    let record = CandidateRecord::new(
        "NP_414996.1",
        "mnknr\ngftpl *",
        Some(" K-12 "),
        None,
        None,
        Some("AcrA"),
    )
    .unwrap();
    assert_eq!(record.sequence(), "MNKNRGFTPL*");
    assert_eq!(record.len(), 11);
    assert_eq!(record.strain(), "K-12");
    assert_eq!(record.url(), "https://www.ncbi.nlm.nih.gov/protein/NP_414996.1");
}

#[test]
fn candidate_defaults_strain_to_unknown() {
    let record = CandidateRecord::new("WP_000001.1", "MK", None, None, None, None).unwrap();
    assert_eq!(record.strain(), "unknown");
}

#[test]
fn candidate_rejects_bad_input() {
    assert_matches!(
        CandidateRecord::new("not an accession", "MK", None, None, None, None),
        Err(SepiError::MalformedResponse(_))
    );
    assert_matches!(
        CandidateRecord::new("WP_000001.1", "  ", None, None, None, None),
        Err(SepiError::MalformedResponse(_))
    );
    assert_matches!(
        CandidateRecord::new("WP_000001.1", "MK1", None, None, None, None),
        Err(SepiError::MalformedResponse(_))
    );
}

#[test]
fn stop_codons_alone_are_not_a_protein() {
    assert_matches!(
        CandidateRecord::new("WP_000001.1", "*", None, None, None, None),
        Err(SepiError::MalformedResponse(_))
    );
    assert_matches!(
        CandidateRecord::new("WP_000001.1", "**\n*", None, None, None, None),
        Err(SepiError::MalformedResponse(_))
    );
    let record = CandidateRecord::new("WP_000001.1", "MK*", None, None, None, None).unwrap();
    assert_eq!(record.len(), 3);
}

#[test]
fn outcome_serializes_with_status_tag() {
    let outcome = ResolvedOutcome::NotFound {
        protein: "AcrZ".to_string(),
        reason: "no matching records".to_string(),
    };
    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["status"], "not_found");
    assert_eq!(value["protein"], "AcrZ");
    assert_eq!(outcome.status(), "not_found");
    assert!(outcome.record().is_none());
}
