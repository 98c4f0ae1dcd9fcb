mod common;

use common::Harness;
use kernelwire_core::{Comm, KernelError};
use kernelwire_frame::Channel;
use serde_json::{json, Map};

fn open_echo(harness: &Harness, comm_id: &str) {
    harness.shell(
        "comm_open",
        json!({ "comm_id": comm_id, "target_name": "echo", "data": {} }),
    );
}

#[test]
fn comm_lifecycle() {
    let harness = Harness::new();
    let comms = harness.core.comm_manager();

    open_echo(&harness, "c1");
    assert_eq!(comms.comms(None).len(), 1);
    assert_eq!(comms.comms(None).get("c1").map(String::as_str), Some("echo"));

    let msg = harness.shell("comm_msg", json!({ "comm_id": "c1", "data": { "ping": 1 } }));
    let echoed = harness
        .server
        .broadcasts_for(&msg)
        .into_iter()
        .find(|b| b.msg_type() == "comm_msg")
        .expect("handler should echo the message");
    assert_eq!(echoed.content()["comm_id"], "c1");
    assert_eq!(echoed.content()["data"]["ping"], 1);

    let close = harness.shell("comm_close", json!({ "comm_id": "c1", "data": {} }));
    assert!(comms.comms(None).is_empty());
    assert_eq!(harness.server.statuses(&close), ["busy", "idle"]);
}

#[test]
fn unknown_target_is_closed_immediately() {
    let harness = Harness::new();
    let header = harness.shell(
        "comm_open",
        json!({ "comm_id": "c9", "target_name": "nobody", "data": {} }),
    );

    assert!(harness.core.comm_manager().comms(None).is_empty());
    let close = harness
        .server
        .broadcasts_for(&header)
        .into_iter()
        .find(|b| b.msg_type() == "comm_close")
        .expect("comm_close should be broadcast");
    assert_eq!(close.content()["comm_id"], "c9");
    assert_eq!(harness.server.statuses(&header), ["busy", "idle"]);
}

#[test]
fn messages_for_unknown_comms_are_errors() {
    let harness = Harness::new();
    let message = common::request("comm_msg", json!({ "comm_id": "ghost", "data": {} }));

    let err = harness
        .core
        .comm_manager()
        .comm_msg(&message)
        .expect_err("unknown comm should be rejected");
    assert!(matches!(err, KernelError::UnknownComm(id) if id == "ghost"));

    let header = harness.shell("comm_close", json!({ "comm_id": "ghost" }));
    assert_eq!(harness.server.statuses(&header), ["busy", "idle"]);
}

#[test]
fn comm_info_filters_by_target() {
    let harness = Harness::new();
    open_echo(&harness, "a");
    open_echo(&harness, "b");
    let _local = Comm::open(harness.core.comm_manager(), "plots", Map::new(), json!({}))
        .expect("local comm should open");

    for filter in [json!({}), json!({ "target_name": null }), json!({ "target_name": "" })] {
        let header = harness.shell("comm_info_request", filter);
        let reply = harness.reply_to(Channel::Shell, &header);
        assert_eq!(reply.content()["status"], "ok");
        assert_eq!(reply.content()["comms"].as_object().map(Map::len), Some(3));
    }

    let header = harness.shell("comm_info_request", json!({ "target_name": "echo" }));
    let reply = harness.reply_to(Channel::Shell, &header);
    assert_eq!(
        reply.content()["comms"],
        json!({ "a": { "target_name": "echo" }, "b": { "target_name": "echo" } })
    );
}

#[test]
fn dropping_the_last_handle_unregisters() {
    let harness = Harness::new();
    harness.shell(
        "comm_open",
        json!({ "comm_id": "e1", "target_name": "ephemeral", "data": {} }),
    );
    assert!(harness.core.comm_manager().comms(None).is_empty());

    let comm = Comm::open(harness.core.comm_manager(), "plots", Map::new(), json!({}))
        .expect("local comm should open");
    assert_eq!(harness.core.comm_manager().comms(None).len(), 1);
    drop(comm);
    assert!(harness.core.comm_manager().comms(None).is_empty());
}

#[test]
fn local_comm_announces_sends_and_closes() {
    let harness = Harness::new();
    let manager = harness.core.comm_manager();
    let comm = Comm::open(manager, "plots", Map::new(), json!({ "version": "1" }))
        .expect("local comm should open");

    let mut data = Map::new();
    data.insert("x".to_string(), json!([1, 2, 3]));
    comm.send(data, json!({}), vec![bytes::Bytes::from_static(b"raw")])
        .expect("comm_msg should publish");
    comm.close(Map::new()).expect("comm_close should publish");
    assert!(manager.comms(None).is_empty());

    let broadcasts: Vec<_> = harness
        .server
        .broadcasts()
        .into_iter()
        .map(|(b, _)| b)
        .filter(|b| b.msg_type().starts_with("comm_"))
        .collect();
    let types: Vec<&str> = broadcasts.iter().map(|b| b.msg_type()).collect();
    assert_eq!(types, ["comm_open", "comm_msg", "comm_close"]);

    assert_eq!(broadcasts[0].content()["target_name"], "plots");
    assert_eq!(broadcasts[0].body.metadata["version"], "1");
    assert_eq!(broadcasts[1].content()["data"]["x"], json!([1, 2, 3]));
    assert_eq!(broadcasts[1].body.buffers.len(), 1);
    for broadcast in &broadcasts {
        assert_eq!(broadcast.content()["comm_id"], comm.id());
    }
}

#[test]
fn comm_broadcasts_carry_current_request_as_parent() {
    let harness = Harness::new();
    open_echo(&harness, "c1");
    let header = harness.shell("comm_msg", json!({ "comm_id": "c1", "data": {} }));
    assert!(harness.server.broadcast_types(&header).contains(&"comm_msg".to_string()));
}

#[test]
fn close_handler_runs_on_client_close() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let harness = Harness::new();
    open_echo(&harness, "c1");
    let closed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&closed);
    let comm = harness
        .core
        .comm_manager()
        .get("c1")
        .expect("comm should be registered");
    comm.on_close(move |_| flag.store(true, Ordering::SeqCst));
    drop(comm);

    harness.shell("comm_close", json!({ "comm_id": "c1" }));
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn targets_can_be_unregistered() {
    let harness = Harness::new();
    let manager = harness.core.comm_manager();
    assert!(manager.has_target("echo"));
    manager.unregister_comm_target("echo").expect("target should be removed");
    assert!(!manager.has_target("echo"));
    assert!(matches!(
        manager.unregister_comm_target("echo"),
        Err(KernelError::UnknownTarget(_))
    ));
}

#[test]
fn stale_handle_does_not_unregister_reopened_comm() {
    use std::sync::{Arc, Mutex};

    let harness = Harness::new();
    let manager = harness.core.comm_manager();
    let kept: Arc<Mutex<Vec<Comm>>> = Arc::default();
    let sink = Arc::clone(&kept);
    manager.register_comm_target("keep", move |comm: Comm, _| {
        sink.lock().expect("sink lock should not be poisoned").push(comm);
    });

    let open = json!({ "comm_id": "k1", "target_name": "keep", "data": {} });
    harness.shell("comm_open", open.clone());
    harness.shell("comm_close", json!({ "comm_id": "k1" }));
    assert!(manager.comms(None).is_empty());

    harness.shell("comm_open", open);
    let stale = kept.lock().expect("sink lock should not be poisoned").remove(0);
    drop(stale);

    assert_eq!(manager.comms(None).get("k1").map(String::as_str), Some("keep"));
    assert!(manager.get("k1").is_some());
}
