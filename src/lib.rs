use chrono::{DateTime, Utc};

pub mod mqtt_handler;

// MODULES
pub mod classifier;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod parsing;
pub mod session;

/// the default topic prefix the ESP32 node publishes under
pub const DEFAULT_TOPIC_PREFIX: &str = "smuhsa/gudang";

/// payload to switch the LED on
pub const LED_ON_PAYLOAD: &str = "LED_ON";
/// payload to switch the LED off
pub const LED_OFF_PAYLOAD: &str = "LED_OFF";

/// The sensor channels the node publishes, one topic each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Ldr,
    LightStatus,
    DoorStatus,
    Log,
}

impl SensorKind {
    /// all kinds, in subscription order
    pub const ALL: [SensorKind; 6] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Ldr,
        SensorKind::LightStatus,
        SensorKind::DoorStatus,
        SensorKind::Log,
    ];

    /// the topic suffix under the prefix
    pub fn suffix(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "suhu",
            SensorKind::Humidity => "kelembapan",
            SensorKind::Ldr => "ldr",
            SensorKind::LightStatus => "status",
            SensorKind::DoorStatus => "pintu",
            SensorKind::Log => "log",
        }
    }

    /// whether the payload carries a number
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SensorKind::Temperature | SensorKind::Humidity | SensorKind::Ldr
        )
    }
}

/// The full topic set for one node
#[derive(Debug, Clone)]
pub struct Topics {
    sensors: [(SensorKind, String); 6],
    control: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Topics {
        let prefix = prefix.trim_end_matches('/');
        Topics {
            sensors: SensorKind::ALL.map(|kind| (kind, format!("{}/{}", prefix, kind.suffix()))),
            control: format!("{}/kontrol", prefix),
        }
    }

    /// The six sensor topics in subscription order
    pub fn subscribed(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|(_, topic)| topic.as_str())
    }

    /// The LED control topic
    pub fn control(&self) -> &str {
        &self.control
    }

    pub fn kind_of(&self, topic: &str) -> Option<SensorKind> {
        self.sensors
            .iter()
            .find(|(_, t)| t == topic)
            .map(|(kind, _)| *kind)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Topics::new(DEFAULT_TOPIC_PREFIX)
    }
}

/// An item on the queue between the mqtt listener and the dashboard
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// broker connection went up or down
    Status(bool),
    /// a raw message on one of the sensor topics
    Sensor {
        topic: String,
        payload: String,
        received: DateTime<Utc>,
    },
    /// the listener hit a connection error, it will retry
    Error(String),
}

/// A manual LED command to publish to the control topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    LedOn,
    LedOff,
}

impl ControlCommand {
    pub fn payload(&self) -> &'static str {
        match self {
            ControlCommand::LedOn => LED_ON_PAYLOAD,
            ControlCommand::LedOff => LED_OFF_PAYLOAD,
        }
    }
}
