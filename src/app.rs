use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{OutcomeCounts, Request, ResolvedOutcome, ResultSet};
use crate::ncbi::EntrezClient;
use crate::resolver::{ResolveOptions, Resolver};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub resolve: ResolveOptions,
    pub workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resolve: ResolveOptions::default(),
            workers: 1,
        }
    }
}

/// Everything one pipeline run hands to the report layer. `counts` is
/// derived from `results`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub request: Request,
    pub results: ResultSet,
    pub counts: OutcomeCounts,
    pub started_at: String,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress to the tracing subscriber at debug level.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::debug!(
                latency_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::debug!("{}", event.message),
        }
    }
}

#[derive(Clone)]
pub struct App<C: EntrezClient> {
    client: C,
}

impl<C: EntrezClient> App<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Resolves every requested protein, in request order. One protein's
    /// failure never aborts the others.
    pub fn run(&self, request: &Request, options: &RunOptions, sink: &dyn ProgressSink) -> PipelineRun {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        info!(
            organism = request.organism(),
            proteins = request.proteins().len(),
            assembly_level = ?request.assembly_level(),
            biosample_query = ?request.biosample_query(),
            "starting retrieval"
        );

        let outcomes = self.resolve_all(request, options, sink);
        debug_assert_eq!(outcomes.len(), request.proteins().len());

        for outcome in &outcomes {
            match outcome {
                ResolvedOutcome::Found { protein, record } => {
                    info!(protein = %protein, accession = record.accession(), "found")
                }
                ResolvedOutcome::NotFound { protein, reason } => {
                    warn!(protein = %protein, %reason, "not found")
                }
                ResolvedOutcome::Errored { protein, detail } => {
                    warn!(protein = %protein, %detail, "errored")
                }
            }
        }

        let results = ResultSet::new(outcomes);
        let counts = results.counts();
        info!(
            found = counts.found,
            not_found = counts.not_found,
            errored = counts.errored,
            "retrieval finished"
        );

        PipelineRun {
            request: request.clone(),
            results,
            counts,
            started_at,
            elapsed_ms: start.elapsed().as_millis(),
        }
    }

    fn resolve_all(
        &self,
        request: &Request,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Vec<ResolvedOutcome> {
        let resolver = Resolver::new(&self.client, request, &options.resolve);
        let targets = request.proteins();

        if options.workers > 1 && targets.len() > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(options.workers)
                .build()
            {
                Ok(pool) => {
                    return pool.install(|| {
                        targets
                            .par_iter()
                            .map(|target| resolver.resolve(target, sink))
                            .collect()
                    });
                }
                Err(err) => {
                    warn!(error = %err, "worker pool unavailable, resolving sequentially");
                }
            }
        }

        targets
            .iter()
            .map(|target| resolver.resolve(target, sink))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::SepiError;
    use crate::ncbi::RawRecord;

    #[derive(Default)]
    struct CountingClient {
        searches: Mutex<Vec<String>>,
    }

    impl EntrezClient for CountingClient {
        fn search(&self, term: &str, _retmax: usize) -> Result<Vec<String>, SepiError> {
            self.searches
                .lock()
                .unwrap()
                .push(term.to_string());
            Ok(Vec::new())
        }

        fn fetch(&self, _ids: &[String]) -> Result<Vec<RawRecord>, SepiError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn every_ladder_tier_is_tried_before_not_found() {
        let request = Request::new(
            "Escherichia coli",
            vec!["TolC".to_string()],
            None,
            None,
            "user@example.com",
        )
        .unwrap();
        let app = App::new(CountingClient::default());
        let run = app.run(&request, &RunOptions::default(), &LogSink);

        assert_eq!(run.counts.not_found, 1);
        assert_eq!(app.client().searches.lock().unwrap().len(), 4);
    }
}
