//! Suite results and their per-status roll-up.

use std::collections::BTreeMap;

use serde::Serialize;

use super::step::{Status, ValidationStep};

/// Every step a suite run attempted, in order.
#[derive(Debug, Clone)]
pub struct SuiteReport {
    steps: Vec<ValidationStep>,
    broken: bool,
}

impl SuiteReport {
    pub fn new(steps: Vec<ValidationStep>, broken: bool) -> Self {
        Self { steps, broken }
    }

    pub fn steps(&self) -> &[ValidationStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<ValidationStep> {
        self.steps
    }

    /// A required step did not succeed and the run stopped early.
    pub fn broken(&self) -> bool {
        self.broken
    }

    /// Worst status among the steps; SUCCESS when there are none.
    pub fn worst(&self) -> Status {
        worst(&self.steps)
    }

    pub fn summary(&self) -> SuiteSummary {
        SuiteSummary::of(&self.steps)
    }
}

pub fn worst(steps: &[ValidationStep]) -> Status {
    steps.iter().map(ValidationStep::status).max().unwrap_or(Status::Success)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteSummary {
    pub worst: Status,
    pub total: usize,
    pub counts: BTreeMap<Status, usize>,
}

impl SuiteSummary {
    pub fn of(steps: &[ValidationStep]) -> Self {
        let mut counts: BTreeMap<Status, usize> =
            Status::TERMINAL.iter().map(|s| (*s, 0)).collect();
        for step in steps {
            *counts.entry(step.status()).or_insert(0) += 1;
        }
        Self { worst: worst(steps), total: steps.len(), counts }
    }

    pub fn count(&self, status: Status) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::step::{Failure, StepError};

    fn step(status: Status) -> ValidationStep {
        let mut step = ValidationStep::new(status.as_str());
        step.run(|_| match status {
            Status::Success => Ok(None),
            Status::Error => Err(StepError::Fault("x".into())),
            other => Err(Failure::new("x", other).into()),
        });
        step
    }

    #[test]
    fn test_worst_of_empty_is_success() {
        let report = SuiteReport::new(Vec::new(), false);
        assert_eq!(report.worst(), Status::Success);
        assert_eq!(report.summary().total, 0);
    }

    #[test]
    fn test_summary_counts() {
        let report = SuiteReport::new(
            vec![
                step(Status::Success),
                step(Status::Warning),
                step(Status::Success),
                step(Status::Notice),
            ],
            false,
        );
        let summary = report.summary();
        assert_eq!(summary.worst, Status::Warning);
        assert_eq!(summary.count(Status::Success), 2);
        assert_eq!(summary.count(Status::Failure), 0);
        assert_eq!(summary.total, 4);
    }

    #[test]
    fn test_summary_serializes_status_names() {
        let summary = SuiteSummary::of(&[step(Status::Failure)]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["worst"], "FAILURE");
        assert_eq!(json["counts"]["FAILURE"], 1);
    }
}
