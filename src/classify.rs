//! Threat classification.
//!
//! `classify` is a pure function from one `DetectionResult` to a ranked
//! `ThreatAssessment`. Rules fire independently in a fixed order:
//! fire, smoke, then at most one crowd tier.

use serde::Serialize;
use std::fmt;

use crate::detect::DetectionResult;

/// Crowd density above which the HIGH crowd rule fires (strict).
pub const CROWD_HIGH_DENSITY: f64 = 0.7;
/// Crowd density above which the MEDIUM crowd rule fires (strict).
pub const CROWD_MEDIUM_DENSITY: f64 = 0.4;

pub const THREAT_BANNER: &str = "THREAT DETECTED";
pub const ALL_CLEAR_SUMMARY: &str = "No immediate threats detected. Situation normal.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
    Critical,
    High,
    Medium,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Critical => "CRITICAL",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Medium => "MEDIUM",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert category used for notification and cooldown bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    None,
    Fire,
    Crowd,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::None => "none",
            AlertCategory::Fire => "fire",
            AlertCategory::Crowd => "crowd",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Threat {
    pub level: ThreatLevel,
    pub message: String,
    pub recommended_actions: Vec<String>,
}

impl Threat {
    fn new(level: ThreatLevel, message: String, actions: &[&str]) -> Self {
        Self {
            level,
            message,
            recommended_actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn summary_block(&self) -> String {
        format!(
            "{} RISK: {}\nACTIONS: {}",
            self.level,
            self.message,
            self.recommended_actions.join(", ")
        )
    }
}

/// Ranked threats derived from one detection result.
///
/// `dominant_alert` is `AlertCategory::None` exactly when `threats` is empty.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThreatAssessment {
    pub threats: Vec<Threat>,
    pub summary_text: String,
    pub dominant_alert: AlertCategory,
}

impl ThreatAssessment {
    pub fn is_clear(&self) -> bool {
        self.threats.is_empty()
    }

    pub fn highest_level(&self) -> Option<ThreatLevel> {
        self.threats.iter().map(|t| t.level).min()
    }
}

pub fn classify(result: &DetectionResult) -> ThreatAssessment {
    let mut threats = Vec::new();

    if result.fire_count > 0 {
        threats.push(Threat::new(
            ThreatLevel::Critical,
            format!(
                "Fire detected in {} {}",
                result.fire_count,
                plural(result.fire_count, "location", "locations")
            ),
            &[
                "Activate fire alarms",
                "Initiate evacuation",
                "Contact fire department",
            ],
        ));
    }

    if result.smoke_count > 0 {
        threats.push(Threat::new(
            ThreatLevel::High,
            format!(
                "Smoke detected in {} {}",
                result.smoke_count,
                plural(result.smoke_count, "area", "areas")
            ),
            &[
                "Investigate smoke source",
                "Prepare fire extinguishers",
                "Check ventilation",
            ],
        ));
    }

    if result.crowd_density > CROWD_HIGH_DENSITY {
        threats.push(Threat::new(
            ThreatLevel::High,
            format!("High crowd density ({}%)", result.crowd_percent()),
            &[
                "Deploy security personnel",
                "Open additional exits",
                "Monitor choke points",
            ],
        ));
    } else if result.crowd_density > CROWD_MEDIUM_DENSITY {
        threats.push(Threat::new(
            ThreatLevel::Medium,
            format!("Elevated crowd density ({}%)", result.crowd_percent()),
            &["Monitor situation", "Prepare crowd control measures"],
        ));
    }

    if threats.is_empty() {
        return ThreatAssessment {
            threats,
            summary_text: ALL_CLEAR_SUMMARY.to_string(),
            dominant_alert: AlertCategory::None,
        };
    }

    let blocks: Vec<String> = threats.iter().map(Threat::summary_block).collect();
    let summary_text = format!("{}\n\n{}", THREAT_BANNER, blocks.join("\n\n"));
    let dominant_alert = dominant_alert(&threats);
    ThreatAssessment {
        threats,
        summary_text,
        dominant_alert,
    }
}

/// Any CRITICAL maps to Fire, otherwise any HIGH maps to Crowd.
///
/// A smoke-only HIGH threat therefore resolves to `Crowd`; a MEDIUM-only
/// assessment (elevated crowd) also resolves to `Crowd` so that the
/// invariant "no threats iff no alert" holds.
fn dominant_alert(threats: &[Threat]) -> AlertCategory {
    if threats.iter().any(|t| t.level == ThreatLevel::Critical) {
        AlertCategory::Fire
    } else if threats.is_empty() {
        AlertCategory::None
    } else {
        AlertCategory::Crowd
    }
}

fn plural(count: u32, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 {
        one
    } else {
        many
    }
}
