use std::io::{self, Write};

use serde::Serialize;

use crate::app::{PipelineRun, ProgressEvent, ProgressSink};
use crate::report::ReportArtifacts;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    #[serde(flatten)]
    pub run: &'a PipelineRun,
    pub artifacts: &'a ReportArtifacts,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(run: &PipelineRun, artifacts: &ReportArtifacts) -> io::Result<()> {
        Self::print_json(&RunSummary { run, artifacts })
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_run(run: &PipelineRun, artifacts: &ReportArtifacts) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";

        println!("{cyan}SEPI summary for {}{reset}", run.request.organism());
        println!(
            "{green}found {} / not found {} / errors {} (total {}){reset}",
            run.counts.found,
            run.counts.not_found,
            run.counts.errored,
            run.counts.total()
        );
        for outcome in run.results.outcomes() {
            match outcome.record() {
                Some(record) => println!(
                    "{green}  + {} {} ({} aa, {}){reset}",
                    outcome.protein(),
                    record.accession(),
                    record.len(),
                    record.strain()
                ),
                None if outcome.status() == "not_found" => {
                    println!("{yellow}  - {} not found{reset}", outcome.protein())
                }
                None => println!("{red}  ! {} error{reset}", outcome.protein()),
            }
        }
        for path in [
            &artifacts.csv,
            &artifacts.multi_fasta,
            &artifacts.html,
            &artifacts.zip,
        ]
        .into_iter()
        .flatten()
        {
            println!("{cyan}  wrote {path}{reset}");
        }
    }
}
