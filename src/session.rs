use std::collections::VecDeque;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, warn};

use crate::{
    classifier::{Classifier, NO_MODEL_LABEL},
    parsing::{parse_reading, Reading},
    MonitorEvent, SensorKind, Topics,
};

/// default cap on the session log
pub const DEFAULT_LOG_CAPACITY: usize = 2000;

/// timestamp format for snapshots and the csv export
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The most recent value per topic, last write wins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestReadings {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub ldr: Option<f64>,
    pub light_status: Option<String>,
    pub door_status: Option<String>,
    pub log: Option<String>,
    pub prediction: Option<String>,
    pub confidence: Option<f64>,
}

impl LatestReadings {
    fn set(&mut self, kind: SensorKind, reading: Reading) {
        match (kind, reading) {
            (SensorKind::Temperature, Reading::Number(val)) => self.temperature = Some(val),
            (SensorKind::Humidity, Reading::Number(val)) => self.humidity = Some(val),
            (SensorKind::Ldr, Reading::Number(val)) => self.ldr = Some(val),
            (SensorKind::LightStatus, Reading::Text(val)) => self.light_status = Some(val),
            (SensorKind::DoorStatus, Reading::Text(val)) => self.door_status = Some(val),
            (SensorKind::Log, Reading::Text(val)) => self.log = Some(val),
            (kind, reading) => warn!("Mismatched reading {:?} for {:?}", reading, kind),
        }
    }
}

/// One row of the session log
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: String,
    pub readings: LatestReadings,
}

/// Ordered snapshots, oldest dropped first once full
#[derive(Debug, Clone)]
pub struct SessionLog {
    rows: VecDeque<Snapshot>,
    capacity: usize,
}

impl SessionLog {
    pub fn new(capacity: usize) -> SessionLog {
        if capacity == 0 {
            warn!("Session log capacity 0 is not usable, keeping 1 row");
        }
        let capacity = capacity.max(1);
        SessionLog {
            rows: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        while self.rows.len() >= self.capacity {
            self.rows.pop_front();
        }
        self.rows.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.rows.iter()
    }
}

/// Temperature figures over the session log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// The dashboard's view of the node
pub struct Session {
    topics: Topics,
    offset: FixedOffset,
    classifier: Option<Box<dyn Classifier>>,
    pub connected: bool,
    pub last: LatestReadings,
    pub log: SessionLog,
    pub last_error: Option<String>,
    pub received: u64,
    pub rejected: u64,
}

impl Session {
    pub fn new(
        topics: Topics,
        capacity: usize,
        offset: FixedOffset,
        classifier: Option<Box<dyn Classifier>>,
    ) -> Session {
        Session {
            topics,
            offset,
            classifier,
            connected: false,
            last: LatestReadings::default(),
            log: SessionLog::new(capacity),
            last_error: None,
            received: 0,
            rejected: 0,
        }
    }

    pub fn has_model(&self) -> bool {
        self.classifier.is_some()
    }

    /// Apply one queued event
    pub fn apply(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Status(connected) => {
                if connected != self.connected {
                    debug!("Broker connection is now {}", connected);
                }
                self.connected = connected;
            }
            MonitorEvent::Error(msg) => {
                self.connected = false;
                self.last_error = Some(msg);
            }
            MonitorEvent::Sensor {
                topic,
                payload,
                received,
            } => self.apply_sensor(&topic, &payload, received),
        }
    }

    fn apply_sensor(&mut self, topic: &str, payload: &str, received: DateTime<Utc>) {
        self.received += 1;
        let Some(kind) = self.topics.kind_of(topic) else {
            debug!("Ignoring message on unknown topic {}", topic);
            self.rejected += 1;
            return;
        };
        let reading = match parse_reading(kind, payload) {
            Ok(reading) => reading,
            Err(err) => {
                warn!("{}", err);
                self.rejected += 1;
                return;
            }
        };
        self.last.set(kind, reading);

        if matches!(kind, SensorKind::Temperature | SensorKind::Humidity) {
            self.refresh_prediction();
        }

        if self.last.temperature.is_some() {
            self.log.push(Snapshot {
                timestamp: received
                    .with_timezone(&self.offset)
                    .format(TIMESTAMP_FORMAT)
                    .to_string(),
                readings: self.last.clone(),
            });
        }
    }

    fn refresh_prediction(&mut self) {
        let (Some(temperature), Some(humidity)) = (self.last.temperature, self.last.humidity)
        else {
            return;
        };
        match &self.classifier {
            Some(model) => {
                let pred = model.predict(temperature, humidity);
                self.last.prediction = Some(pred.label);
                self.last.confidence = pred.confidence;
            }
            None => {
                self.last.prediction = Some(NO_MODEL_LABEL.to_string());
                self.last.confidence = None;
            }
        }
    }

    /// Rows of the session log, oldest first
    pub fn rows(&self) -> impl Iterator<Item = &Snapshot> {
        self.log.iter()
    }

    pub fn summary(&self) -> Option<TemperatureSummary> {
        let mut temps = self.rows().filter_map(|row| row.readings.temperature);
        let first = temps.next()?;
        let (count, min, max, sum) = temps.fold((1usize, first, first, first), |acc, t| {
            (acc.0 + 1, acc.1.min(t), acc.2.max(t), acc.3 + t)
        });
        Some(TemperatureSummary {
            count,
            min,
            max,
            mean: sum / count as f64,
        })
    }
}
