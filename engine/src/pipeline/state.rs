//! Per-run state machine
//!
//! A `PipelineRun` only moves forward through `PipelineStage::WORK_STAGES`.
//! Each stage gets a `StageReport`; timestamps are clamped so that every
//! recorded instant is strictly later than the previous one, even when the
//! wall clock stalls or steps backwards.

use chrono::{DateTime, Duration, Utc};
use sdk::errors::PipelineError;
use sdk::{PipelineStage, StageReport, StageStatus};

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: String,
    stage: PipelineStage,
    /// Furthest work stage entered
    reached: PipelineStage,
    reports: Vec<StageReport>,
    last_instant: Option<DateTime<Utc>>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stage: PipelineStage::Pending,
            reached: PipelineStage::Pending,
            reports: Vec::new(),
            last_instant: None,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// The failing stage on failure, `Complete` on success, otherwise the
    /// stage currently running
    pub fn final_stage(&self) -> PipelineStage {
        match self.stage {
            PipelineStage::Failed => self.reached,
            other => other,
        }
    }

    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<StageReport> {
        self.reports
    }

    /// Enter the next work stage
    ///
    /// Returns `None` once the run is terminal or every work stage has run.
    pub fn advance(&mut self) -> Option<PipelineStage> {
        if self.stage.is_terminal() || self.stage == PipelineStage::Deploying {
            return None;
        }
        if let Some(report) = self.reports.last() {
            if report.status == StageStatus::Running {
                return None;
            }
        }

        let next = self.stage.next();
        let started_at = self.tick();
        self.stage = next;
        self.reached = next;
        self.reports.push(StageReport {
            stage: next,
            status: StageStatus::Running,
            attempts: 0,
            started_at,
            finished_at: None,
            error: None,
        });
        Some(next)
    }

    /// Mark the running stage successful
    pub fn succeed(&mut self, attempts: u32) {
        let finished_at = self.tick();
        if let Some(report) = self.running_report() {
            report.status = StageStatus::Succeeded;
            report.attempts = attempts;
            report.finished_at = Some(finished_at);
        }
    }

    /// Mark the running stage failed and halt the run
    pub fn fail(&mut self, attempts: u32, error: &PipelineError) {
        let finished_at = self.tick();
        if let Some(report) = self.running_report() {
            report.status = StageStatus::Failed;
            report.attempts = attempts;
            report.finished_at = Some(finished_at);
            report.error = Some(error.to_string());
        }
        self.stage = PipelineStage::Failed;
    }

    /// Finish the run after its last stage succeeded
    pub fn complete(&mut self) {
        if self.stage != PipelineStage::Failed {
            self.stage = PipelineStage::Complete;
        }
    }

    pub fn is_success(&self) -> bool {
        self.stage == PipelineStage::Complete
    }

    fn running_report(&mut self) -> Option<&mut StageReport> {
        self.reports
            .last_mut()
            .filter(|report| report.status == StageStatus::Running)
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_instant {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_instant = Some(now);
        now
    }
}
