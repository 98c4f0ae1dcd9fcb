use std::thread::{self, JoinHandle};
use std::time::Duration;

use kernelwire::frame::{new_id, Channel, Header, PubMessage};
use kernelwire::kernel::Kernel;
use kernelwire::server::{is_child_of, KernelClient};
use kernelwire::transport::ConnectionInfo;
use kernelwire::EchoInterpreter;
use serde_json::{json, Value};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Session {
    client: KernelClient,
    running: JoinHandle<kernelwire::kernel::Result<()>>,
}

impl Session {
    fn start() -> Self {
        let info = ConnectionInfo {
            key: new_id(),
            ..ConnectionInfo::default()
        };
        let kernel = Kernel::builder(info, EchoInterpreter::new())
            .build()
            .expect("kernel should build");
        let info = kernel.connection_info().clone();
        let running = thread::spawn(move || kernel.run());
        let client = KernelClient::connect(&info).expect("client should connect");
        client.wait_for_ready(TIMEOUT).expect("kernel should become ready");
        Self { client, running }
    }

    fn shell(&self, msg_type: &str, content: Value) -> (Header, Value) {
        let request = self
            .client
            .request(Channel::Shell, msg_type, content)
            .expect("request should send");
        let reply = self
            .client
            .recv_reply(Channel::Shell, &request, TIMEOUT)
            .expect("reply should arrive");
        (request, reply.content().clone())
    }

    /// Send a shell message that gets no reply; returns the broadcasts it caused.
    fn notify(&self, msg_type: &str, content: Value) -> Vec<PubMessage> {
        let request = self
            .client
            .request(Channel::Shell, msg_type, content)
            .expect("request should send");
        self.broadcasts(&request)
    }

    /// Broadcasts caused by `parent`, up to and including its `idle`.
    fn broadcasts(&self, parent: &Header) -> Vec<PubMessage> {
        let mut seen = Vec::new();
        loop {
            let broadcast = self.client.recv_iopub(TIMEOUT).expect("broadcast should arrive");
            if !is_child_of(broadcast.body.parent_header.as_ref(), parent) {
                continue;
            }
            let idle = broadcast.msg_type() == "status" && broadcast.content()["execution_state"] == "idle";
            seen.push(broadcast);
            if idle {
                return seen;
            }
        }
    }

    fn shutdown(self) {
        let request = self
            .client
            .request(Channel::Control, "shutdown_request", json!({ "restart": false }))
            .expect("shutdown should send");
        self.client
            .recv_reply(Channel::Control, &request, TIMEOUT)
            .expect("shutdown reply should arrive");
        self.running
            .join()
            .expect("kernel thread should not panic")
            .expect("kernel should stop cleanly");
    }
}

#[test]
fn echo_kernel_session() {
    let session = Session::start();

    let (request, reply) = session.shell("execute_request", json!({ "code": "print hello" }));
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["execution_count"], 1);
    let stream = session
        .broadcasts(&request)
        .into_iter()
        .find(|b| b.msg_type() == "stream")
        .expect("print should stream");
    assert_eq!(stream.content()["text"], "hello\n");

    let (request, reply) = session.shell("execute_request", json!({ "code": "raise broken" }));
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["ename"], "EchoError");
    let types: Vec<String> = session
        .broadcasts(&request)
        .iter()
        .map(|b| b.msg_type().to_string())
        .collect();
    assert!(types.contains(&"error".to_string()));

    let (_, reply) = session.shell(
        "history_request",
        json!({ "output": false, "raw": true, "hist_access_type": "tail", "n": 10 }),
    );
    assert_eq!(reply["history"], json!([[1, 1, "print hello"], [1, 2, "raise broken"]]));

    let (_, reply) = session.shell("complete_request", json!({ "code": "pri", "cursor_pos": 3 }));
    assert_eq!(reply["matches"], json!(["print"]));
    assert_eq!(reply["cursor_start"], 0);

    session.shutdown();
}

#[test]
fn echo_comms_reply_to_their_sender() {
    let session = Session::start();

    let opened = session.notify("comm_open", json!({ "comm_id": "w1", "target_name": "echo", "data": {} }));
    assert!(opened.iter().all(|b| b.msg_type() != "comm_close"));
    let (_, reply) = session.shell("comm_info_request", json!({ "target_name": "echo" }));
    assert_eq!(reply["comms"], json!({ "w1": { "target_name": "echo" } }));

    let echoed = session
        .notify("comm_msg", json!({ "comm_id": "w1", "data": { "n": 7 } }))
        .into_iter()
        .find(|b| b.msg_type() == "comm_msg")
        .expect("comm message should be echoed");
    assert_eq!(echoed.content()["comm_id"], "w1");
    assert_eq!(echoed.content()["data"]["n"], 7);

    session.notify("comm_close", json!({ "comm_id": "w1", "data": {} }));
    let (_, reply) = session.shell("comm_info_request", json!({}));
    assert_eq!(reply["comms"], json!({}));

    session.shutdown();
}
