use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::alert::{AlertContext, AlertDispatcher, DispatchOutcome};
use crate::classify::{classify, AlertCategory, ThreatAssessment};
use crate::detect::DetectionClient;
use crate::incident::{IncidentLog, IncidentRecord, LocationDirectory, LocationOverview};
use crate::ingest::FrameSource;

/// What started a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    OnDemand,
    AutoStart,
    Timer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The source had no active stream or could not hand out a frame.
    FrameUnavailable,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Skipped { reason: SkipReason },
    /// Detection failed; rendered error chain.
    Failed { error: String },
    Completed {
        incident: IncidentRecord,
        assessment: ThreatAssessment,
        dispatch: Option<DispatchOutcome>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    pub trigger: Trigger,
    pub outcome: CycleOutcome,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn assessment(&self) -> Option<&ThreatAssessment> {
        match &self.outcome {
            CycleOutcome::Completed { assessment, .. } => Some(assessment),
            _ => None,
        }
    }

    pub fn dispatch(&self) -> Option<DispatchOutcome> {
        match &self.outcome {
            CycleOutcome::Completed { dispatch, .. } => *dispatch,
            _ => None,
        }
    }
}

/// The capture → detect → classify → {log, dispatch} pipeline.
///
/// Each collaborator sits behind its own lock so operators can read the
/// incident log while a cycle is waiting on the detection service. Mutual
/// exclusion of whole cycles is the scheduler's job, not the locks'.
pub struct Monitor {
    source: Mutex<Box<dyn FrameSource>>,
    detector: Mutex<Box<dyn DetectionClient>>,
    dispatcher: Mutex<AlertDispatcher>,
    incidents: Mutex<IncidentLog>,
    directory: LocationDirectory,
}

impl Monitor {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectionClient>,
        dispatcher: AlertDispatcher,
        directory: LocationDirectory,
    ) -> Self {
        Self {
            source: Mutex::new(source),
            detector: Mutex::new(detector),
            dispatcher: Mutex::new(dispatcher),
            incidents: Mutex::new(IncidentLog::new()),
            directory,
        }
    }

    pub(crate) fn connect_source(&self) -> Result<()> {
        let mut source = self
            .source
            .lock()
            .map_err(|_| anyhow!("frame source lock poisoned"))?;
        source.connect()
    }

    pub(crate) fn disconnect_source(&self) {
        match self.source.lock() {
            Ok(mut source) => source.disconnect(),
            Err(poisoned) => poisoned.into_inner().disconnect(),
        }
    }

    pub(crate) fn close_sinks(&self) {
        match self.dispatcher.lock() {
            Ok(dispatcher) => dispatcher.close(),
            Err(poisoned) => poisoned.into_inner().close(),
        }
    }

    pub fn incidents(&self) -> Result<Vec<IncidentRecord>> {
        let log = self
            .incidents
            .lock()
            .map_err(|_| anyhow!("incident log lock poisoned"))?;
        Ok(log.snapshot())
    }

    pub fn overview(&self) -> Result<Vec<LocationOverview>> {
        let log = self
            .incidents
            .lock()
            .map_err(|_| anyhow!("incident log lock poisoned"))?;
        Ok(log.overview())
    }

    pub fn run_cycle(&self) -> CycleOutcome {
        match self.try_run_cycle() {
            Ok(outcome) => outcome,
            Err(e) => CycleOutcome::Failed {
                error: format!("{:#}", e),
            },
        }
    }

    fn try_run_cycle(&self) -> Result<CycleOutcome> {
        let frame = {
            let mut source = self
                .source
                .lock()
                .map_err(|_| anyhow!("frame source lock poisoned"))?;
            match source.capture() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    return Ok(CycleOutcome::Skipped {
                        reason: SkipReason::FrameUnavailable,
                    })
                }
                Err(e) => {
                    log::warn!("frame capture from {} failed: {:#}", source.name(), e);
                    return Ok(CycleOutcome::Skipped {
                        reason: SkipReason::FrameUnavailable,
                    });
                }
            }
        };

        let detection = {
            let mut detector = self
                .detector
                .lock()
                .map_err(|_| anyhow!("detection client lock poisoned"))?;
            detector
                .detect(&frame)
                .map_err(|e| e.context(format!("detection via {}", detector.name())))?
        };

        let assessment = classify(&detection);
        let coords = self.directory.resolve(&detection.location);
        let incident = IncidentRecord::new(detection, SystemTime::now(), coords);
        self.incidents
            .lock()
            .map_err(|_| anyhow!("incident log lock poisoned"))?
            .append(incident.clone());

        let dispatch = if assessment.dominant_alert == AlertCategory::None {
            None
        } else {
            let context = AlertContext {
                fire_count: incident.detection.fire_count,
                crowd_density: incident.detection.crowd_density,
            };
            let mut dispatcher = self
                .dispatcher
                .lock()
                .map_err(|_| anyhow!("alert dispatcher lock poisoned"))?;
            Some(dispatcher.maybe_dispatch(
                assessment.dominant_alert,
                &incident.detection.location,
                context,
            ))
        };

        Ok(CycleOutcome::Completed {
            incident,
            assessment,
            dispatch,
        })
    }
}
