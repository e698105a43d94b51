use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndicatorLevel {
    Green,
    Orange,
    Red,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorStatus {
    pub name: String,
    pub level: IndicatorLevel,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

/// Latest status per health indicator.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    indicators: DashMap<String, IndicatorStatus>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, level: IndicatorLevel, message: impl Into<String>) {
        self.indicators.insert(
            name.to_string(),
            IndicatorStatus {
                name: name.to_string(),
                level,
                message: message.into(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn level(&self, name: &str) -> Option<IndicatorLevel> {
        self.indicators.get(name).map(|s| s.level)
    }

    pub fn statuses(&self) -> Vec<IndicatorStatus> {
        let mut statuses: Vec<IndicatorStatus> =
            self.indicators.iter().map(|s| s.value().clone()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}
