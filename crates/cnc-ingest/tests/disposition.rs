//! Disposition-policy scenarios driven through the broker-independent core.

use chrono::Utc;
use cnc_ingest::{Disposition, Ingestor, MemoryRepository, RepoError};
use std::sync::Arc;
use telemetry_wire::{encode_frame, encode_record, SensorRecord};

fn record(machine_id: &str, sequence_number: u64) -> SensorRecord {
    SensorRecord {
        machine_id: machine_id.to_string(),
        sequence_number,
        timestamp: Utc::now(),
        temperature: 36.0,
        spindle_speed: 7500.0,
        x_pos_mm: 10.0,
        y_pos_mm: 20.0,
        z_pos_mm: 30.0,
        feed_rate_actual: 1800.0,
        spindle_load_percent: 55.0,
        total_power_kw: 6.2,
        machine_state: "RUNNING".to_string(),
        active_program_line: 42,
    }
}

/// Builds one transport message out of the given records.
fn message(records: &[SensorRecord]) -> Vec<u8> {
    let mut payload = Vec::new();
    for record in records {
        payload.extend_from_slice(&encode_record(record).unwrap());
    }
    payload
}

fn setup() -> (Arc<MemoryRepository>, Ingestor) {
    let repository = Arc::new(MemoryRepository::new());
    let ingestor = Ingestor::new(repository.clone());
    (repository, ingestor)
}

#[tokio::test]
async fn test_happy_path_thousand_records() {
    let (repository, ingestor) = setup();

    // 1000 records for one machine, batched 50 per transport message.
    let records: Vec<SensorRecord> = (1..=1000).map(|seq| record("M1", seq)).collect();
    for chunk in records.chunks(50) {
        assert_eq!(ingestor.dispose(&message(chunk)).await, Disposition::Ack);
    }

    assert_eq!(repository.sequences_for("M1"), (1..=1000).collect::<Vec<_>>());
    assert_eq!(ingestor.metrics().records_inserted(), 1000);
    assert_eq!(ingestor.metrics().acked(), 20);
    assert_eq!(ingestor.metrics().naked(), 0);
    assert_eq!(ingestor.metrics().termed(), 0);
}

#[tokio::test]
async fn test_duplicate_redelivery_absorbed() {
    let (repository, ingestor) = setup();
    let payload = message(&[record("M1", 42)]);

    assert_eq!(ingestor.dispose(&payload).await, Disposition::Ack);
    // Broker-side redelivery of the identical message.
    assert_eq!(ingestor.dispose(&payload).await, Disposition::Ack);

    assert_eq!(repository.sequences_for("M1"), vec![42]);
    assert_eq!(ingestor.metrics().records_inserted(), 1);
    assert_eq!(ingestor.metrics().duplicates(), 1);
}

#[tokio::test]
async fn test_poison_frame_terminates_without_rows() {
    let (repository, ingestor) = setup();

    // Declared length exceeds the actual payload.
    let mut payload = 500u32.to_be_bytes().to_vec();
    payload.extend_from_slice(b"short");

    assert_eq!(ingestor.dispose(&payload).await, Disposition::Term);
    assert!(repository.is_empty());
    assert_eq!(ingestor.metrics().termed(), 1);
    assert_eq!(ingestor.metrics().acked(), 0);
}

#[tokio::test]
async fn test_malformed_json_poisons_whole_message() {
    let (repository, ingestor) = setup();

    // A valid record followed by a truncated JSON frame in the same message.
    let mut payload = message(&[record("M1", 1)]);
    let json = serde_json::to_vec(&record("M1", 2)).unwrap();
    payload.extend_from_slice(&encode_frame(&json[..json.len() / 2]).unwrap());

    assert_eq!(ingestor.dispose(&payload).await, Disposition::Term);
    // Atomic per-message disposition: the valid sibling frame is not stored.
    assert!(repository.is_empty());
}

#[tokio::test]
async fn test_semantic_violations_terminate() {
    let (repository, ingestor) = setup();

    assert_eq!(
        ingestor.dispose(&message(&[record("", 1)])).await,
        Disposition::Term
    );
    assert_eq!(
        ingestor.dispose(&message(&[record("M1", 0)])).await,
        Disposition::Term
    );
    assert!(repository.is_empty());
    assert_eq!(ingestor.metrics().termed(), 2);
}

#[tokio::test]
async fn test_transient_failure_naks_then_succeeds_on_redelivery() {
    let (repository, ingestor) = setup();
    let payload = message(&[record("M1", 1), record("M1", 2)]);

    repository.fail_with(RepoError::Transient("connection refused".to_string()));
    assert_eq!(
        ingestor.dispose(&payload).await,
        Disposition::Nak { pause: false }
    );
    assert!(repository.is_empty());

    // Redelivery after the database recovers.
    repository.heal();
    assert_eq!(ingestor.dispose(&payload).await, Disposition::Ack);
    assert_eq!(repository.sequences_for("M1"), vec![1, 2]);
}

#[tokio::test]
async fn test_fatal_failure_naks_with_pause() {
    let (_repository, ingestor) = setup();
    let payload = message(&[record("M1", 1)]);

    let repository = Arc::new(MemoryRepository::new());
    repository.fail_with(RepoError::Fatal("relation does not exist".to_string()));
    let ingestor_with_broken_db = Ingestor::new(repository);

    assert_eq!(
        ingestor_with_broken_db.dispose(&payload).await,
        Disposition::Nak { pause: true }
    );
    // The healthy ingestor is untouched by the broken one's state.
    assert_eq!(ingestor.dispose(&payload).await, Disposition::Ack);
}

#[tokio::test]
async fn test_empty_message_acks_harmlessly() {
    let (repository, ingestor) = setup();
    assert_eq!(ingestor.dispose(&[]).await, Disposition::Ack);
    assert!(repository.is_empty());
}
