use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Local;
use tracing::info;

use crate::{error::MonitorError, session::Session, session::Snapshot};

/// csv header of the exported session log
pub const CSV_HEADER: [&str; 9] = [
    "timestamp",
    "temperature",
    "humidity",
    "ldr",
    "light_status",
    "door_status",
    "log",
    "prediction",
    "confidence",
];

fn cell<T: ToString>(val: &Option<T>) -> String {
    val.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Write the rows as csv, missing values become empty cells
pub fn write_csv<'a, W: Write>(
    rows: impl IntoIterator<Item = &'a Snapshot>,
    writer: W,
) -> Result<usize, MonitorError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADER)?;
    let mut written = 0;
    for row in rows {
        let r = &row.readings;
        wtr.write_record([
            row.timestamp.clone(),
            cell(&r.temperature),
            cell(&r.humidity),
            cell(&r.ldr),
            cell(&r.light_status),
            cell(&r.door_status),
            cell(&r.log),
            cell(&r.prediction),
            cell(&r.confidence),
        ])?;
        written += 1;
    }
    wtr.flush()?;
    Ok(written)
}

/// Export the session log into a new timestamped file in `dir`
pub fn export_to_dir(session: &Session, dir: &Path) -> Result<PathBuf, MonitorError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "gudang-log-{}.csv",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let file = File::create(&path)?;
    let written = write_csv(session.rows(), file)?;
    info!("Exported {} rows to {}", written, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LatestReadings;

    #[test]
    fn header_and_empty_cells() {
        let rows = vec![
            Snapshot {
                timestamp: "2024-11-20 10:00:00".to_string(),
                readings: LatestReadings {
                    temperature: Some(27.5),
                    door_status: Some("TERBUKA".to_string()),
                    ..Default::default()
                },
            },
            Snapshot {
                timestamp: "2024-11-20 10:00:02".to_string(),
                readings: LatestReadings {
                    temperature: Some(28.0),
                    humidity: Some(65.0),
                    log: Some("pintu dibuka, lampu menyala".to_string()),
                    prediction: Some("Normal".to_string()),
                    confidence: Some(0.8),
                    ..Default::default()
                },
            },
        ];
        let mut out = Vec::new();
        assert_eq!(write_csv(&rows, &mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines[0],
            "timestamp,temperature,humidity,ldr,light_status,door_status,log,prediction,confidence"
        );
        assert_eq!(lines[1], "2024-11-20 10:00:00,27.5,,,,TERBUKA,,,");
        assert_eq!(
            lines[2],
            "2024-11-20 10:00:02,28,65,,,,\"pintu dibuka, lampu menyala\",Normal,0.8"
        );
    }

    #[test]
    fn empty_log_still_has_header() {
        let mut out = Vec::new();
        assert_eq!(write_csv(&Vec::<Snapshot>::new(), &mut out).unwrap(), 0);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }
}
