use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for decoded records.
///
/// Both variants are terminal: a record failing semantic validation is never
/// retried, it poisons the transport message that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// `machine_id` must identify the producing machine.
    #[error("record has empty machine_id")]
    EmptyMachineId,
    /// Sequence zero is reserved; live records start at one.
    #[error("record for machine {machine_id} has reserved sequence number zero")]
    ZeroSequence { machine_id: String },
}

/// One telemetry sample from a CNC machine.
///
/// The logical unit of the whole pipeline: produced by the sensor loop,
/// buffered as a length-prefixed JSON frame, published in batches and
/// persisted keyed on `(machine_id, sequence_number)`. Unknown JSON fields
/// are ignored on decode so wire additions stay backwards compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Identity of the producing machine (non-empty).
    pub machine_id: String,
    /// Monotonic per-machine sequence, never zero, survives restarts.
    pub sequence_number: u64,
    /// Sample instant, UTC. RFC3339 with sub-second precision on the wire.
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub spindle_speed: f64,
    pub x_pos_mm: f64,
    pub y_pos_mm: f64,
    pub z_pos_mm: f64,
    pub feed_rate_actual: f64,
    pub spindle_load_percent: f64,
    pub total_power_kw: f64,
    /// Controller state tag (e.g. "RUNNING", "IDLE", "ALARM").
    pub machine_state: String,
    /// Line of the active NC program, 0 when none is running.
    pub active_program_line: i32,
}

impl SensorRecord {
    /// Checks the semantic invariants the ingest side enforces.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.machine_id.is_empty() {
            return Err(RecordError::EmptyMachineId);
        }
        if self.sequence_number == 0 {
            return Err(RecordError::ZeroSequence {
                machine_id: self.machine_id.clone(),
            });
        }
        Ok(())
    }
}

/// Registry entry for a CNC machine.
///
/// Referenced by records via `machine_id` but deliberately not foreign-keyed
/// at ingest time: telemetry from a not-yet-registered machine still lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub location: String,
    pub controller_type: String,
    pub max_spindle_rpm: f64,
    pub axis_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_record(machine_id: &str, sequence_number: u64) -> SensorRecord {
        SensorRecord {
            machine_id: machine_id.to_string(),
            sequence_number,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            temperature: 36.5,
            spindle_speed: 8200.0,
            x_pos_mm: 120.25,
            y_pos_mm: -14.5,
            z_pos_mm: 3.125,
            feed_rate_actual: 1500.0,
            spindle_load_percent: 42.0,
            total_power_kw: 5.6,
            machine_state: "RUNNING".to_string(),
            active_program_line: 118,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_record() {
        assert!(sample_record("M1", 1).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_machine_id() {
        let record = sample_record("", 1);
        assert_eq!(record.validate(), Err(RecordError::EmptyMachineId));
    }

    #[test]
    fn test_validate_rejects_sequence_zero() {
        let record = sample_record("M1", 0);
        assert!(matches!(
            record.validate(),
            Err(RecordError::ZeroSequence { .. })
        ));
    }

    #[test]
    fn test_decoder_ignores_unknown_fields() {
        let mut value = serde_json::to_value(sample_record("M1", 7)).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("firmware_rev".to_string(), serde_json::json!("v2.1"));

        let decoded: SensorRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.sequence_number, 7);
    }

    #[test]
    fn test_timestamp_survives_json_roundtrip_with_microseconds() {
        let mut record = sample_record("M1", 1);
        record.timestamp = Utc.timestamp_opt(1_717_243_200, 123_456_000).unwrap();

        let json = serde_json::to_string(&record).unwrap();
        let decoded: SensorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.timestamp, record.timestamp);
    }
}
