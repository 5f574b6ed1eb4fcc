use std::{io::Write, sync::mpsc, time::Duration};

use tempfile::NamedTempFile;
use zynq_protocol::{Pointer, PointerSet, ProtocolConfig, codec::DeviceFrame};
use zynq_server::{error::BridgeError, multiplexer::Outcome, server::Server};
use zynq_tests::{Recorder, connect_device, quiet_config};

fn protocol() -> ProtocolConfig {
    ProtocolConfig {
        pointers: PointerSet::new(0..=2),
        ..Default::default()
    }
}

/// Large enough that the transfer outlasts the socket buffers.
fn large_transfer() -> ProtocolConfig {
    ProtocolConfig {
        chunk_size: 4096,
        ..protocol()
    }
}

fn pattern_file(len: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    file
}

fn position(lines: &[String], line: &str) -> usize {
    lines
        .iter()
        .position(|l| l == line)
        .unwrap_or_else(|| panic!("`{}` missing from {:#?}", line, lines))
}

#[tokio::test]
async fn commands_and_replies_keep_their_order() {
    let (disconnect_tx, disconnect_rx) = mpsc::channel();
    let (session, device) = connect_device(protocol(), move |mut device| {
        let mut frames = Vec::new();
        for _ in 0..3 {
            let frame = device.read_frame().unwrap();
            device.ack(&frame, 0).unwrap();
            frames.push(frame);
        }
        disconnect_rx.recv().unwrap();
        device.disconnect().unwrap();
        assert!(device.wait_closed().unwrap().is_empty());
        frames
    })
    .await;

    let (tx, rx) = mpsc::channel();
    let recorder = Recorder::default();
    let server = Server::new(quiet_config(protocol())).unwrap();
    let display = recorder.clone();
    let bridge =
        tokio::spawn(async move { server.serve(session, display, Recorder::default(), rx).await });

    for (line, reply) in [
        ("status", "recv status OK"),
        ("route 1", "recv route 1 OK"),
        ("rstfifo", "recv rstfifo OK"),
    ] {
        tx.send(line.to_string()).unwrap();
        recorder.wait_for(|l| l == reply).await;
    }
    disconnect_tx.send(()).unwrap();

    assert_eq!(bridge.await.unwrap().unwrap(), Outcome::RemoteDisconnect);
    assert_eq!(
        device.join().unwrap(),
        vec![
            DeviceFrame::Status,
            DeviceFrame::Route(Pointer::new(1)),
            DeviceFrame::ResetFifo
        ]
    );
    assert_eq!(
        recorder.lines(),
        vec![
            "sent status",
            "recv status OK",
            "sent route 1",
            "recv route 1 OK",
            "sent rstfifo",
            "recv rstfifo OK",
            "info The device disconnected",
        ]
    );
    drop(tx);
}

#[tokio::test]
async fn replies_ending_in_ff_keep_the_session() {
    let (session, device) = connect_device(protocol(), |mut device| {
        let status = device.read_frame().unwrap();
        device.reply(0x80, &[0x12, 0xFF]).unwrap();
        let route = device.read_frame().unwrap();
        device.ack(&route, 0).unwrap();
        let exit = device.read_frame().unwrap();
        assert!(device.wait_closed().unwrap().is_empty());
        vec![status, route, exit]
    })
    .await;

    let (tx, rx) = mpsc::channel();
    let recorder = Recorder::default();
    let server = Server::new(quiet_config(protocol())).unwrap();
    let display = recorder.clone();
    let bridge =
        tokio::spawn(async move { server.serve(session, display, Recorder::default(), rx).await });

    tx.send("status".to_string()).unwrap();
    recorder.wait_for(|l| l == "recv status [12, ff]").await;
    tx.send("route 1".to_string()).unwrap();
    recorder.wait_for(|l| l == "recv route 1 OK").await;
    tx.send("exit".to_string()).unwrap();

    assert_eq!(bridge.await.unwrap().unwrap(), Outcome::LocalDisconnect);
    assert_eq!(
        device.join().unwrap(),
        vec![
            DeviceFrame::Status,
            DeviceFrame::Route(Pointer::new(1)),
            DeviceFrame::Disconnect
        ]
    );
    assert_eq!(
        recorder.lines(),
        vec![
            "sent status",
            "recv status [12, ff]",
            "sent route 1",
            "recv route 1 OK",
            "info Disconnected",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_are_rejected_while_loading() {
    let file = pattern_file(32 << 20);
    let expected = std::fs::read(file.path()).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();

    let (session, device) = connect_device(large_transfer(), move |mut device| {
        let DeviceFrame::LoadChunk { data, last, .. } = device.read_frame().unwrap() else {
            panic!("expected a load chunk first");
        };
        assert!(!last);
        started_tx.send(()).unwrap();
        resume_rx.recv().unwrap();

        let (pointer, rest) = device.receive_transfer().unwrap();
        let mut contents = data.to_vec();
        contents.extend(rest);

        let status = device.read_frame().unwrap();
        device.ack(&status, 0).unwrap();
        let exit = device.read_frame().unwrap();
        assert!(device.wait_closed().unwrap().is_empty());
        (pointer, contents, status, exit)
    })
    .await;

    let (tx, rx) = mpsc::channel();
    let recorder = Recorder::default();
    let server = Server::new(quiet_config(large_transfer())).unwrap();
    let display = recorder.clone();
    let bridge =
        tokio::spawn(async move { server.serve(session, display, Recorder::default(), rx).await });

    tx.send(format!("load 1 {}", file.path().display())).unwrap();
    tokio::task::spawn_blocking(move || started_rx.recv().unwrap())
        .await
        .unwrap();
    tx.send("status".to_string()).unwrap();
    tx.send("route 0".to_string()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    resume_tx.send(()).unwrap();

    recorder
        .wait_for(|l| l == format!("info Loaded {} bytes to pointer 1", expected.len()))
        .await;
    tx.send("status".to_string()).unwrap();
    recorder.wait_for(|l| l == "recv status OK").await;
    tx.send("exit".to_string()).unwrap();

    assert_eq!(bridge.await.unwrap().unwrap(), Outcome::LocalDisconnect);
    let (pointer, contents, status, exit) = device.join().unwrap();
    assert_eq!(pointer, Pointer::new(1));
    assert!(contents == expected, "transferred contents differ");
    assert_eq!(status, DeviceFrame::Status);
    assert_eq!(exit, DeviceFrame::Disconnect);

    let lines = recorder.lines();
    let rejected: Vec<_> = lines
        .iter()
        .filter(|l| l.starts_with("error Transfer to pointer 1 in progress"))
        .collect();
    assert_eq!(rejected.len(), 2, "{:#?}", lines);
    assert!(rejected[0].contains("`status` rejected"));
    assert!(rejected[1].contains("`route` rejected"));
    assert_eq!(lines.iter().filter(|l| *l == "sent status").count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_stops_a_transfer() {
    let file = pattern_file(32 << 20);
    let total = 32 << 20;
    let (started_tx, started_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();

    let (session, device) = connect_device(large_transfer(), move |mut device| {
        let mut received = 0;
        let mut first = true;
        let status = loop {
            match device.read_frame().unwrap() {
                DeviceFrame::LoadChunk { data, last, .. } => {
                    assert!(!last, "the final chunk must not be sent");
                    received += data.len();
                    if first {
                        first = false;
                        started_tx.send(()).unwrap();
                        resume_rx.recv().unwrap();
                    }
                }
                other => break other,
            }
        };
        device.ack(&status, 0).unwrap();
        let exit = device.read_frame().unwrap();
        (received, status, exit)
    })
    .await;

    let (tx, rx) = mpsc::channel();
    let recorder = Recorder::default();
    let server = Server::new(quiet_config(large_transfer())).unwrap();
    let display = recorder.clone();
    let bridge =
        tokio::spawn(async move { server.serve(session, display, Recorder::default(), rx).await });

    tx.send(format!("load 1 {}", file.path().display())).unwrap();
    tokio::task::spawn_blocking(move || started_rx.recv().unwrap())
        .await
        .unwrap();
    tx.send("abort".to_string()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    resume_tx.send(()).unwrap();

    recorder
        .wait_for(|l| l.starts_with("info Transfer to pointer 1 aborted after"))
        .await;
    tx.send("status".to_string()).unwrap();
    recorder.wait_for(|l| l == "recv status OK").await;
    tx.send("abort".to_string()).unwrap();
    recorder
        .wait_for(|l| l == "info No transfer in progress")
        .await;
    tx.send("exit".to_string()).unwrap();

    assert_eq!(bridge.await.unwrap().unwrap(), Outcome::LocalDisconnect);
    let (received, status, exit) = device.join().unwrap();
    assert!(received < total);
    assert_eq!(status, DeviceFrame::Status);
    assert_eq!(exit, DeviceFrame::Disconnect);
}

#[tokio::test]
async fn invalid_pointer_sends_nothing() {
    let (session, device) =
        connect_device(protocol(), |mut device| device.wait_closed().unwrap()).await;

    let (tx, rx) = mpsc::channel();
    for line in ["rstptr 99", "route 3", "rstptr 300", "exit"] {
        tx.send(line.to_string()).unwrap();
    }
    let recorder = Recorder::default();
    let outcome = Server::new(quiet_config(protocol()))
        .unwrap()
        .serve(session, recorder.clone(), Recorder::default(), rx)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LocalDisconnect);
    assert_eq!(device.join().unwrap(), vec![0xFF]);
    assert_eq!(
        recorder.lines(),
        vec![
            "error Pointer 99 is out of range, valid pointers are {0, 1, 2}",
            "error Pointer 3 is out of range, valid pointers are {0, 1, 2}",
            "error Pointer 300 is out of range, valid pointers are {0, 1, 2}",
            "info Disconnected",
        ]
    );
}

#[tokio::test]
async fn operator_mistakes_keep_the_session_alive() {
    let empty = NamedTempFile::new().unwrap();
    let (session, device) = connect_device(protocol(), |mut device| {
        let custom = device.read_raw(1).unwrap();
        let rest = device.wait_closed().unwrap();
        (custom, rest)
    })
    .await;

    let (tx, rx) = mpsc::channel();
    for line in [
        "flash 1".to_string(),
        "".to_string(),
        format!("load 0 {}", empty.path().display()),
        "load 0 /no/such/file.bin".to_string(),
        "custom -b 0101".to_string(),
        "custom -b 11111111".to_string(),
        "custom -b 0100 0001".to_string(),
        "exit".to_string(),
    ] {
        tx.send(line).unwrap();
    }
    let recorder = Recorder::default();
    let outcome = Server::new(quiet_config(protocol()))
        .unwrap()
        .serve(session, recorder.clone(), Recorder::default(), rx)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LocalDisconnect);
    let (custom, rest) = device.join().unwrap();
    assert_eq!(custom, vec![0x41]);
    assert_eq!(rest, vec![0xFF]);

    let lines = recorder.lines();
    assert_eq!(lines.len(), 7, "{:#?}", lines);
    assert_eq!(lines[0], "error Command \"flash\" unknown");
    assert!(lines[1].ends_with("is empty. Nothing was sent"));
    assert_eq!(
        lines[2],
        "error /no/such/file.bin is not a file. Nothing was sent"
    );
    assert!(lines[3].starts_with("error Could not encode the command"));
    assert_eq!(
        lines[4],
        "error Could not encode the command: A custom frame of only 0xff is the disconnect byte, use `exit` instead"
    );
    assert_eq!(lines[5], "sent custom -b 01000001");
    assert_eq!(lines[6], "info Disconnected");
}

#[tokio::test]
async fn end_of_input_disconnects() {
    let (session, device) =
        connect_device(protocol(), |mut device| device.wait_closed().unwrap()).await;

    let (tx, rx) = mpsc::channel::<String>();
    drop(tx);
    let outcome = Server::new(quiet_config(protocol()))
        .unwrap()
        .serve(session, Recorder::default(), Recorder::default(), rx)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::InputClosed);
    assert_eq!(device.join().unwrap(), vec![0xFF]);
}

#[tokio::test]
async fn remote_disconnect_gets_no_reply() {
    let (session, device) = connect_device(protocol(), |mut device| {
        device.disconnect().unwrap();
        device.wait_closed().unwrap()
    })
    .await;

    let (tx, rx) = mpsc::channel::<String>();
    let recorder = Recorder::default();
    let outcome = Server::new(quiet_config(protocol()))
        .unwrap()
        .serve(session, recorder.clone(), Recorder::default(), rx)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::RemoteDisconnect);
    assert!(device.join().unwrap().is_empty());
    assert_eq!(recorder.lines(), vec!["info The device disconnected"]);
    drop(tx);
}

#[tokio::test]
async fn hang_up_is_a_transport_error() {
    let (session, device) =
        connect_device(protocol(), |device| device.hang_up().unwrap()).await;

    let (tx, rx) = mpsc::channel::<String>();
    let display = Recorder::default();
    let log = Recorder::default();
    let result = Server::new(quiet_config(protocol()))
        .unwrap()
        .serve(session, display.clone(), log.clone(), rx)
        .await;

    device.join().unwrap();
    match result {
        Err(BridgeError::Receive(e)) => {
            assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
        }
        other => panic!("expected a receive error, got {:?}", other),
    }
    for sink in [display, log] {
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("error Could not receive from the device"));
    }
    drop(tx);
}

#[tokio::test]
async fn identifies_on_connect() {
    let (disconnect_tx, disconnect_rx) = mpsc::channel();
    let (session, device) = connect_device(protocol(), move |mut device| {
        let frame = device.read_frame().unwrap();
        device.reply(0x00, b"zynq-fw 1.2").unwrap();
        disconnect_rx.recv().unwrap();
        device.disconnect().unwrap();
        device.wait_closed().unwrap();
        frame
    })
    .await;

    let (tx, rx) = mpsc::channel::<String>();
    let recorder = Recorder::default();
    let mut config = quiet_config(protocol());
    config.identify_on_connect = true;
    let server = Server::new(config).unwrap();
    let display = recorder.clone();
    let bridge =
        tokio::spawn(async move { server.serve(session, display, Recorder::default(), rx).await });
    recorder.wait_for(|l| l == "recv id \"zynq-fw 1.2\"").await;
    disconnect_tx.send(()).unwrap();

    let outcome = bridge.await.unwrap().unwrap();

    assert_eq!(outcome, Outcome::RemoteDisconnect);
    assert_eq!(device.join().unwrap(), DeviceFrame::Identify);
    assert_eq!(
        recorder.lines(),
        vec![
            "sent id",
            "recv id \"zynq-fw 1.2\"",
            "info The device disconnected",
        ]
    );
    drop(tx);
}

#[tokio::test]
async fn total_length_transfer() {
    let config = ProtocolConfig {
        chunk_size: 16,
        use_length_prefix: false,
        ..protocol()
    };
    let file = pattern_file(100);
    let expected = std::fs::read(file.path()).unwrap();

    let (session, device) = connect_device(config.clone(), |mut device| {
        let DeviceFrame::LoadChunk { total, .. } = device.read_frame().unwrap() else {
            panic!("expected a load chunk");
        };
        let (pointer, rest) = device.receive_transfer().unwrap();
        let exit = device.read_frame().unwrap();
        (total, pointer, rest, exit)
    })
    .await;

    let (tx, rx) = mpsc::channel();
    let recorder = Recorder::default();
    let server = Server::new(quiet_config(config)).unwrap();
    let display = recorder.clone();
    let bridge =
        tokio::spawn(async move { server.serve(session, display, Recorder::default(), rx).await });

    tx.send(format!("load 0 {}", file.path().display())).unwrap();
    recorder
        .wait_for(|l| l == "info Loaded 100 bytes to pointer 0")
        .await;
    tx.send("exit".to_string()).unwrap();

    assert_eq!(bridge.await.unwrap().unwrap(), Outcome::LocalDisconnect);
    let (total, pointer, rest, exit) = device.join().unwrap();
    assert_eq!(total, Some(100));
    assert_eq!(pointer, Pointer::new(0));
    assert_eq!(rest, expected[16..]);
    assert_eq!(exit, DeviceFrame::Disconnect);
    assert_eq!(
        recorder.lines(),
        vec![
            "info Loading 100 bytes to pointer 0",
            "info Loaded 100 bytes to pointer 0",
            "info Disconnected",
        ]
    );
}
