//! Static job dependency graph.
//!
//! An edge `A → B` exists whenever `B` declares a dependency type that `A`
//! outputs. The graph is validated when the scheduler is built (cycles and
//! double-produced kinds are configuration errors raised before any RPC
//! traffic) and topologically ordered into waves of mutually independent
//! jobs.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::types::DomainKind;

use super::Job;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("dependency cycle among jobs: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("domain kind '{kind}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        kind: DomainKind,
        first: String,
        second: String,
    },
}

#[derive(Debug)]
pub struct JobGraph {
    waves: Vec<Vec<usize>>,
}

impl JobGraph {
    pub fn build(jobs: &[Arc<dyn Job>]) -> Result<Self, GraphError> {
        let mut producer: HashMap<DomainKind, usize> = HashMap::new();
        for (idx, job) in jobs.iter().enumerate() {
            for kind in job.output_types() {
                if let Some(&existing) = producer.get(kind) {
                    return Err(GraphError::DuplicateProducer {
                        kind: *kind,
                        first: jobs[existing].name().to_string(),
                        second: job.name().to_string(),
                    });
                }
                producer.insert(*kind, idx);
            }
        }

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); jobs.len()];
        let mut indegree: Vec<usize> = vec![0; jobs.len()];
        for (idx, job) in jobs.iter().enumerate() {
            for dep in job.dependency_types() {
                // Base kinds (populated by the fetch phase) have no producer
                // job and impose no ordering.
                if let Some(&source) = producer.get(dep) {
                    if source != idx {
                        successors[source].push(idx);
                        indegree[idx] += 1;
                    }
                }
            }
        }

        let mut waves = Vec::new();
        let mut remaining: Vec<usize> = (0..jobs.len()).collect();
        while !remaining.is_empty() {
            let mut wave: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&idx| indegree[idx] == 0)
                .collect();
            if wave.is_empty() {
                let stuck: Vec<String> = remaining
                    .iter()
                    .map(|&idx| jobs[idx].name().to_string())
                    .collect();
                return Err(GraphError::CycleDetected(stuck));
            }
            wave.sort_unstable();
            for &idx in &wave {
                for &next in &successors[idx] {
                    indegree[next] -= 1;
                }
            }
            remaining.retain(|idx| !wave.contains(idx));
            waves.push(wave);
        }

        Ok(Self { waves })
    }

    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    pub fn job_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobContext, JobError};
    use async_trait::async_trait;

    struct StubJob {
        name: &'static str,
        deps: Vec<DomainKind>,
        outputs: Vec<DomainKind>,
    }

    #[async_trait]
    impl Job for StubJob {
        fn name(&self) -> &'static str {
            self.name
        }

        fn dependency_types(&self) -> &[DomainKind] {
            &self.deps
        }

        fn output_types(&self) -> &[DomainKind] {
            &self.outputs
        }

        async fn collect(&self, _ctx: &JobContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    fn job(
        name: &'static str,
        deps: Vec<DomainKind>,
        outputs: Vec<DomainKind>,
    ) -> Arc<dyn Job> {
        Arc::new(StubJob {
            name,
            deps,
            outputs,
        })
    }

    #[test]
    fn chain_schedules_into_strict_waves() {
        // A outputs Log; B consumes Log, outputs transfers; C consumes
        // transfers. Waves must be [A], [B], [C], never [A, B] together.
        let jobs = vec![
            job("a", vec![], vec![DomainKind::Log]),
            job(
                "b",
                vec![DomainKind::Log],
                vec![DomainKind::Erc20TokenTransfer],
            ),
            job("c", vec![DomainKind::Erc20TokenTransfer], vec![]),
        ];
        let graph = JobGraph::build(&jobs).unwrap();
        assert_eq!(graph.waves(), &[vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn independent_jobs_share_a_wave() {
        let jobs = vec![
            job("a", vec![DomainKind::Log], vec![DomainKind::Erc20TokenTransfer]),
            job("b", vec![DomainKind::Log], vec![DomainKind::DecodedEvent]),
            job(
                "c",
                vec![DomainKind::Erc20TokenTransfer, DomainKind::DecodedEvent],
                vec![],
            ),
        ];
        let graph = JobGraph::build(&jobs).unwrap();
        assert_eq!(graph.waves(), &[vec![0, 1], vec![2]]);
    }

    #[test]
    fn cycle_is_a_build_time_error() {
        let jobs = vec![
            job("a", vec![DomainKind::DecodedEvent], vec![DomainKind::Log]),
            job("b", vec![DomainKind::Log], vec![DomainKind::DecodedEvent]),
        ];
        match JobGraph::build(&jobs) {
            Err(GraphError::CycleDetected(names)) => {
                assert_eq!(names.len(), 2);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_producer_is_rejected() {
        let jobs = vec![
            job("a", vec![], vec![DomainKind::Trace]),
            job("b", vec![], vec![DomainKind::Trace]),
        ];
        assert!(matches!(
            JobGraph::build(&jobs),
            Err(GraphError::DuplicateProducer { .. })
        ));
    }
}
