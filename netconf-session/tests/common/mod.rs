#![allow(dead_code)]

use netconf_session::framer::async_framer::{split, FrameReader, FrameWriter};
use netconf_session::framer::{FrameRead, FrameWrite};
use netconf_session::{NetconfClientResult, Session, SessionConfig};
use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

pub const BASE_10: &str = "urn:ietf:params:netconf:base:1.0";
pub const BASE_11: &str = "urn:ietf:params:netconf:base:1.1";
pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
pub const CONFIRMED_COMMIT: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.1";
pub const VALIDATE: &str = "urn:ietf:params:netconf:capability:validate:1.1";
pub const NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";
pub const INTERFACES_MODULE: &str =
    "urn:ietf:params:xml:ns:yang:ietf-interfaces?module=ietf-interfaces&revision=2014-05-08";

pub const SESSION_ID: u64 = 4;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Server end of an in-memory NETCONF channel, driven step by step by a test.
pub struct FakeServer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
}

pub fn pair() -> (DuplexStream, FakeServer) {
    let (client, server) = duplex(64 * 1024);
    let (reader, writer) = split(server);
    (client, FakeServer { reader, writer })
}

pub fn server_hello(capabilities: &[&str], session_id: Option<u64>) -> String {
    let capabilities: String = capabilities
        .iter()
        .map(|capability| {
            format!(
                "<capability>{}</capability>",
                capability.replace('&', "&amp;")
            )
        })
        .collect();
    let session_id = session_id
        .map(|id| format!("<session-id>{}</session-id>", id))
        .unwrap_or_default();
    format!(
        r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities>{}</capabilities>{}</hello>"#,
        capabilities, session_id
    )
}

impl FakeServer {
    /// Answers the client hello and returns it.
    pub async fn hello(&mut self, capabilities: &[&str], session_id: u64) -> String {
        let client_hello = self.next_frame().await.expect("client hello");
        self.send(&server_hello(capabilities, Some(session_id))).await;
        if capabilities.contains(&BASE_11) && client_hello.contains(BASE_11) {
            self.reader.mode().upgrade();
        }
        client_hello
    }

    pub async fn next_frame(&mut self) -> Option<String> {
        self.reader.read_frame().await.expect("read frame")
    }

    /// Reads the next `<rpc>` and returns its message-id with the raw XML.
    pub async fn next_request(&mut self) -> (u64, String) {
        let frame = self.next_frame().await.expect("request");
        (message_id(&frame), frame)
    }

    pub async fn send(&mut self, frame: &str) {
        self.writer.write_frame(frame).await.expect("send frame")
    }

    pub async fn reply(&mut self, message_id: u64, body: &str) {
        self.send(&format!(
            r#"<rpc-reply message-id="{}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">{}</rpc-reply>"#,
            message_id, body
        ))
        .await
    }

    pub async fn reply_ok(&mut self, message_id: u64) {
        self.reply(message_id, "<ok/>").await
    }

    /// Answers the next request, expected to be `operation`, with `<ok/>`.
    pub async fn expect_ok(&mut self, operation: &str) -> String {
        let (id, request) = self.next_request().await;
        assert!(
            request.contains(&format!("<{}", operation)),
            "expected {}, got {}",
            operation,
            request
        );
        self.reply_ok(id).await;
        request
    }
}

fn message_id(frame: &str) -> u64 {
    let start = frame.find("message-id=\"").expect("message-id") + "message-id=\"".len();
    let end = start + frame[start..].find('"').expect("closing quote");
    frame[start..end].parse().expect("numeric message-id")
}

/// Connects a session to a fresh fake server announcing `capabilities`.
pub async fn connect(capabilities: &[&str], config: SessionConfig) -> (Session, FakeServer) {
    let (client, mut server) = pair();
    let (session, _) = tokio::join!(
        Session::connect(client, config),
        server.hello(capabilities, SESSION_ID)
    );
    (session.expect("session"), server)
}

pub async fn try_connect(hello: &str, config: SessionConfig) -> NetconfClientResult<Session> {
    let (client, mut server) = pair();
    let (session, _) = tokio::join!(Session::connect(client, config), async {
        server.next_frame().await;
        server.send(hello).await;
    });
    session
}
