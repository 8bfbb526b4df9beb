use std::fs;
use std::io::Write;

use bio::io::fasta;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::PipelineRun;
use crate::domain::{CandidateRecord, ResolvedOutcome};
use crate::error::SepiError;
use crate::fs_util::{sanitize_file_component, zip_dir};

#[derive(Debug, Clone)]
pub struct OutputOptions {
    /// Base name every artifact path is derived from.
    pub base: Utf8PathBuf,
    pub multi_fasta: bool,
    pub html_report: bool,
}

impl OutputOptions {
    pub fn artifact(&self, suffix: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}{suffix}", self.base))
    }

    pub fn log_path(&self) -> Utf8PathBuf {
        self.artifact(".log")
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportArtifacts {
    pub csv: Option<String>,
    pub multi_fasta: Option<String>,
    pub html: Option<String>,
    pub zip: Option<String>,
}

/// Writes every requested artifact for a finished run.
pub fn write_reports(run: &PipelineRun, options: &OutputOptions) -> Result<ReportArtifacts, SepiError> {
    let mut artifacts = ReportArtifacts::default();
    ensure_parent(&options.base)?;

    let csv_path = options.artifact("_accessions.csv");
    write_csv(run, &csv_path)?;
    info!(path = %csv_path, "accession report written");
    artifacts.csv = Some(csv_path.to_string());

    if options.html_report {
        let html_path = options.artifact("_report.html");
        fs::write(&html_path, render_html(run, options.base.as_str()))
            .map_err(|err| SepiError::Report(format!("{html_path}: {err}")))?;
        info!(path = %html_path, "HTML report written");
        artifacts.html = Some(html_path.to_string());
    }

    if run.counts.found == 0 {
        warn!("no proteins were retrieved; skipping FASTA outputs");
        return Ok(artifacts);
    }

    if options.multi_fasta {
        let fasta_path = options.artifact(".fasta");
        let file = fs::File::create(&fasta_path)
            .map_err(|err| SepiError::Report(format!("{fasta_path}: {err}")))?;
        write_fasta(file, run.results.found())?;
        info!(path = %fasta_path, "multi-FASTA written");
        artifacts.multi_fasta = Some(fasta_path.to_string());
    }

    let zip_path = options.artifact(".zip");
    write_fasta_bundle(run, &zip_path)?;
    info!(path = %zip_path, "FASTA files packaged");
    artifacts.zip = Some(zip_path.to_string());

    Ok(artifacts)
}

/// File name used for one protein inside the bundle.
pub fn fasta_file_name(protein: &str, record: &CandidateRecord) -> String {
    format!(
        "{}_{}.fasta",
        sanitize_file_component(protein),
        sanitize_file_component(record.accession())
    )
}

pub fn write_fasta<'a, W: Write>(
    writer: W,
    records: impl Iterator<Item = (&'a str, &'a CandidateRecord)>,
) -> Result<(), SepiError> {
    let mut writer = fasta::Writer::new(writer);
    for (protein, record) in records {
        let description = match record.title() {
            Some(title) => format!("{title} [protein={protein}] [strain={}]", record.strain()),
            None => format!("[protein={protein}] [strain={}]", record.strain()),
        };
        writer
            .write(record.accession(), Some(&description), record.sequence().as_bytes())
            .map_err(|err| SepiError::Report(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| SepiError::Report(err.to_string()))
}

fn write_fasta_bundle(run: &PipelineRun, zip_path: &Utf8Path) -> Result<(), SepiError> {
    let staging_parent = zip_path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    let staging = tempfile::Builder::new()
        .prefix("sepi-fasta")
        .tempdir_in(staging_parent.as_std_path())
        .map_err(|err| SepiError::Filesystem(err.to_string()))?;

    for (protein, record) in run.results.found() {
        let path = staging.path().join(fasta_file_name(protein, record));
        let file = fs::File::create(&path).map_err(|err| SepiError::Filesystem(err.to_string()))?;
        write_fasta(file, std::iter::once((protein, record)))?;
    }
    zip_dir(staging.path(), zip_path.as_std_path())?;
    Ok(())
}

pub fn write_csv(run: &PipelineRun, path: &Utf8Path) -> Result<(), SepiError> {
    let file = fs::File::create(path).map_err(|err| SepiError::Report(format!("{path}: {err}")))?;
    write_csv_to(run, file)
}

pub fn write_csv_to<W: Write>(run: &PipelineRun, writer: W) -> Result<(), SepiError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record([
        "Protein_Name",
        "Accession_Number",
        "Protein_Length",
        "Source_Strain",
        "NCBI_URL",
        "Status",
    ])
    .map_err(|err| SepiError::Report(err.to_string()))?;

    for outcome in run.results.outcomes() {
        let row = match outcome.record() {
            Some(record) => [
                outcome.protein().to_string(),
                record.accession().to_string(),
                record.len().to_string(),
                record.strain().to_string(),
                record.url().to_string(),
                outcome.status().to_string(),
            ],
            None => [
                outcome.protein().to_string(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                outcome.status().to_string(),
            ],
        };
        csv.write_record(&row)
            .map_err(|err| SepiError::Report(err.to_string()))?;
    }
    csv.flush().map_err(|err| SepiError::Report(err.to_string()))
}

pub fn render_html(run: &PipelineRun, title: &str) -> String {
    let request = &run.request;
    let counts = run.counts;
    let mut html = String::new();
    html.push_str(&format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>SEPI Report - {title}</title>
<style>
body {{ font-family: Arial, sans-serif; margin: 20px; }}
.header {{ background-color: #f0f0f0; padding: 20px; border-radius: 5px; margin-bottom: 20px; }}
.stats {{ display: flex; gap: 20px; margin-bottom: 20px; }}
.stat-box {{ background-color: #e8f4f8; padding: 15px; border-radius: 5px; flex: 1; text-align: center; }}
.found {{ background-color: #d4edda; }}
.not_found {{ background-color: #fff3cd; }}
.error {{ background-color: #f8d7da; }}
table {{ width: 100%; border-collapse: collapse; margin-top: 20px; }}
th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}
th {{ background-color: #f2f2f2; }}
.filters {{ background-color: #f8f9fa; padding: 15px; border-radius: 5px; margin-bottom: 20px; }}
</style>
</head>
<body>
<div class="header">
<h1>SEPI Run Report</h1>
<p><strong>Output Name:</strong> {title}</p>
<p><strong>Organism:</strong> {organism}</p>
<p><strong>Run Date:</strong> {started}</p>
</div>
<div class="stats">
<div class="stat-box found"><h3>{found}</h3><p>Proteins Retrieved</p></div>
<div class="stat-box not_found"><h3>{not_found}</h3><p>Proteins Not Found</p></div>
<div class="stat-box error"><h3>{errored}</h3><p>Proteins Errored</p></div>
<div class="stat-box"><h3>{total}</h3><p>Total Proteins</p></div>
</div>
<div class="filters">
<h3>Applied Filters</h3>
<p><strong>Assembly Level:</strong> {assembly}</p>
<p><strong>BioSample Query:</strong> {biosample}</p>
</div>
<h2>Proteins</h2>
<table>
<thead>
<tr><th>Protein Name</th><th>Status</th><th>Accession Number</th><th>Protein Length</th><th>Source Strain</th><th>NCBI Link</th></tr>
</thead>
<tbody>
"##,
        title = escape_html(title),
        organism = escape_html(request.organism()),
        started = escape_html(&run.started_at),
        found = counts.found,
        not_found = counts.not_found,
        errored = counts.errored,
        total = counts.total(),
        assembly = request
            .assembly_level()
            .map(|level| level.as_str())
            .unwrap_or("None"),
        biosample = escape_html(request.biosample_query().unwrap_or("None")),
    ));

    for outcome in run.results.outcomes() {
        let protein = escape_html(outcome.protein());
        let status = outcome.status();
        let row = match outcome {
            ResolvedOutcome::Found { record, .. } => format!(
                "<tr class=\"{status}\"><td>{protein}</td><td>{status}</td><td>{}</td><td>{}</td><td>{}</td><td><a href=\"{}\" target=\"_blank\">View on NCBI</a></td></tr>\n",
                escape_html(record.accession()),
                record.len(),
                escape_html(record.strain()),
                escape_html(record.url()),
            ),
            ResolvedOutcome::NotFound { reason: note, .. }
            | ResolvedOutcome::Errored { detail: note, .. } => format!(
                "<tr class=\"{status}\"><td>{protein}</td><td>{status}</td><td colspan=\"4\">{}</td></tr>\n",
                escape_html(note),
            ),
        };
        html.push_str(&row);
    }

    html.push_str(
        "</tbody>\n</table>\n<p>Report generated by SEPI.</p>\n</body>\n</html>\n",
    );
    html
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Creates the directory an output base name lives in.
pub fn ensure_parent(base: &Utf8Path) -> Result<(), SepiError> {
    if let Some(parent) = base.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| SepiError::Filesystem(err.to_string()))?;
    }
    Ok(())
}
