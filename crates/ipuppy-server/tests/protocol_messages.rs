//! Integration tests for realtime protocol serialization.

use ipuppy_core::OutputEvent;
use ipuppy_server::protocol::*;
use serde_json::json;

#[test]
fn test_running_update_has_no_output() {
    let json = serde_json::to_value(CellUpdate::running(3)).unwrap();
    assert_eq!(json, json!({"cell_index": 3, "status": "running"}));
}

#[test]
fn test_output_update_appends_event() {
    let update = CellUpdate::output(
        1,
        OutputEvent::Stream {
            name: "stdout".to_string(),
            text: "hi\n".to_string(),
        },
    );

    let json = serde_json::to_value(&update).unwrap();

    assert_eq!(
        json,
        json!({
            "cell_index": 1,
            "status": "running",
            "output": {"output_type": "stream", "name": "stdout", "text": "hi\n"},
            "append": true
        })
    );
}

#[test]
fn test_completed_and_failed_updates() {
    assert_eq!(
        serde_json::to_value(CellUpdate::completed(0)).unwrap(),
        json!({"cell_index": 0, "status": "completed"})
    );
    assert_eq!(
        serde_json::to_value(CellUpdate::failed(0, "no kernel is running")).unwrap(),
        json!({"cell_index": 0, "status": "error", "output": {"text": "no kernel is running"}})
    );
}

#[test]
fn test_updates_round_trip_through_json() {
    let updates = vec![
        CellUpdate::running(2),
        CellUpdate::output(
            2,
            OutputEvent::Error {
                ename: "ValueError".to_string(),
                evalue: "boom".to_string(),
                traceback: vec![],
                text: "ValueError: boom\n".to_string(),
            },
        ),
        CellUpdate::failed(2, "kernel process exited during startup"),
        CellUpdate::completed(2),
    ];

    for update in updates {
        let text = serde_json::to_string(&update).unwrap();
        let parsed: CellUpdate = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, update);
    }
}

#[test]
fn test_client_execute_cell_parses() {
    let msg: ClientMessage =
        serde_json::from_str(r#"{"type": "execute_cell", "cell_index": 4, "code": "1+1"}"#).unwrap();
    match msg {
        ClientMessage::ExecuteCell { cell_index, code } => {
            assert_eq!(cell_index, 4);
            assert_eq!(code, "1+1");
        }
    }
}

#[test]
fn test_unknown_client_message_is_rejected() {
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "interrupt"}"#).is_err());
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "execute_cell"}"#).is_err());
}

#[test]
fn test_server_event_envelope() {
    let event = ServerEvent::new(
        CELL_UPDATE_EVENT,
        serde_json::to_value(CellUpdate::running(0)).unwrap(),
    );
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        json!({"event": "cell_update", "payload": {"cell_index": 0, "status": "running"}})
    );
}
