#![cfg(feature = "cli")]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use sosbus_frame::{FrameReader, Message};

fn wire(message: &Message) -> Vec<u8> {
    let mut out = message.header().to_bytes().to_vec();
    out.extend_from_slice(message.payload());
    out
}

fn broker() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("broker should bind");
    let addr = format!("127.0.0.1:{}", listener.local_addr().expect("addr").port());
    (listener, addr)
}

fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().expect("broker should accept");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream
}

fn sosbus(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sosbus"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("sosbus should run")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line should be JSON"))
        .collect()
}

#[test]
fn version_prints_package_version() {
    let output = sosbus(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("sosbus {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn send_writes_one_frame_with_defaults_filled() {
    let (listener, addr) = broker();
    let broker_thread = thread::spawn(move || {
        let stream = accept(&listener);
        FrameReader::new(stream).read_message().expect("frame")
    });

    let output = sosbus(&[
        "send", &addr, "--daddr", "5", "--type", "0x21", "--hex", "aa bb cc dd",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let message = broker_thread.join().expect("broker thread");
    assert_eq!(message.dest_module(), 128);
    assert_eq!(message.src_module(), 128);
    assert_eq!(message.dest_addr(), 5);
    assert_eq!(message.src_addr(), 0xFFFE);
    assert_eq!(message.msg_type(), 33);
    assert_eq!(message.payload().as_ref(), &[0xAA, 0xBB, 0xCC, 0xDD]);
}

#[test]
fn rpc_prints_reply_as_json() {
    let (listener, addr) = broker();
    thread::spawn(move || {
        let stream = accept(&listener);
        let mut writer = stream.try_clone().expect("clone");
        let request = FrameReader::new(stream).read_message().expect("request");
        let reply = Message::new(
            request.src_module(),
            request.dest_module(),
            request.src_addr(),
            request.dest_addr(),
            request.msg_type(),
            vec![0x01, 0x02],
        )
        .expect("reply");
        writer.write_all(&wire(&reply)).expect("reply write");
        thread::sleep(Duration::from_millis(500));
    });

    let output = sosbus(&[
        "--format",
        "json",
        "rpc",
        &addr,
        "--daddr",
        "5",
        "--type",
        "33",
        "--text",
        "ping",
        "--reply-saddr",
        "5",
        "--reply-type",
        "33",
        "--timeout",
        "3s",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["src_addr"], 5);
    assert_eq!(lines[0]["dest_addr"], 0xFFFE);
    assert_eq!(lines[0]["msg_type"], 33);
    assert_eq!(lines[0]["payload"], "0102");
}

#[test]
fn rpc_without_reply_times_out() {
    let (listener, addr) = broker();
    thread::spawn(move || {
        let stream = accept(&listener);
        let _ = FrameReader::new(stream).read_message();
        thread::sleep(Duration::from_secs(2));
    });

    let output = sosbus(&["rpc", &addr, "--type", "40", "--timeout", "300ms"]);
    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no reply within 300ms"));
}

#[test]
fn listen_stops_after_count() {
    let (listener, addr) = broker();
    thread::spawn(move || {
        let mut stream = accept(&listener);
        for (node, msg_type) in [(1u16, 50u8), (2, 51), (3, 50), (4, 50)] {
            let message = Message::new(128, 128, 0xFFFE, node, msg_type, vec![node as u8])
                .expect("message");
            stream.write_all(&wire(&message)).expect("broker write");
        }
        thread::sleep(Duration::from_secs(2));
    });

    let output = sosbus(&[
        "--format", "json", "listen", &addr, "--type", "50", "--count", "2",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["src_addr"], 1);
    assert_eq!(lines[1]["src_addr"], 3);
}

#[test]
fn listen_reports_lost_broker() {
    let (listener, addr) = broker();
    thread::spawn(move || {
        let stream = accept(&listener);
        drop(stream);
    });

    let output = sosbus(&["listen", &addr]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connection to broker lost"));
}

#[test]
fn closed_port_is_a_transport_error() {
    let (listener, addr) = broker();
    drop(listener);

    let output = sosbus(&["send", &addr, "--retries", "1", "--text", "x"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("2 attempt(s)"));
}

#[test]
fn oversize_payload_is_invalid_data() {
    let (listener, addr) = broker();
    drop(listener);

    let big = "ab".repeat(256);
    let output = sosbus(&["send", &addr, "--hex", &big]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn bad_hex_is_a_usage_error() {
    let output = sosbus(&["send", "127.0.0.1:1", "--hex", "zz"]);
    assert_eq!(output.status.code(), Some(64));
}
