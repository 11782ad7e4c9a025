use std::{cell::RefCell, os::unix::net::UnixListener, path::PathBuf, rc::Rc, sync::Arc, time::Duration};

use compositor_ipc::{
    transport::Connection, ChannelState, CommandType, EventType, Frame, IpcClient, IpcConfig, IpcError, MessageType, ProtocolError,
    ReconnectPolicy, StreamStatus, UiLoop,
};
use pretty_assertions::assert_eq;

const WAIT: Duration = Duration::from_secs(5);

struct Script {
    ack: &'static str,
    events: Vec<Frame>,
    /// Raw bytes written after the events, for streams that aren't valid frames.
    trailer: Vec<u8>,
    /// Close the event connection once all events were sent.
    hang_up: bool,
}

/// Answers commands, acknowledges subscriptions and then plays back the scripted events.
fn serve(script: Script) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ipc.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let script = Arc::new(script);
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let script = script.clone();
            std::thread::spawn(move || handle(&mut Connection::from_stream(stream), &script));
        }
    });
    (dir, path)
}

fn handle(conn: &mut Connection, script: &Script) {
    while let Ok(Some(request)) = conn.recv_frame(1 << 20) {
        if request.message_type == CommandType::Subscribe.into() {
            if conn.send_frame(&Frame::new(request.message_type, script.ack)).is_err() {
                return;
            }
            for event in &script.events {
                if conn.send_frame(event).is_err() {
                    return;
                }
            }
            if conn.send_all(&script.trailer).is_err() {
                return;
            }
            if script.hang_up {
                return;
            }
        } else {
            let reply = match CommandType::from_tag(request.message_type.0) {
                Some(CommandType::GetWorkspaces) => r#"[{"num":1,"name":"1","focused":true}]"#,
                _ => r#"[{"success":true}]"#,
            };
            if conn.send_frame(&Frame::new(request.message_type, reply)).is_err() {
                return;
            }
        }
    }
}

fn event(ty: EventType, payload: &str) -> Frame {
    Frame::new(ty, payload)
}

fn recorder() -> Rc<RefCell<Vec<String>>> {
    Rc::default()
}

#[test]
fn test_mode_event_reaches_handler() {
    let (_dir, path) = serve(Script { ack: r#"{"success": true}"#, events: vec![event(EventType::Mode, r#"{"change":"resize"}"#)], trailer: vec![], hang_up: false });
    let ui = UiLoop::new();
    let client = IpcClient::connect(IpcConfig::new(&path), &[EventType::Mode], &ui).unwrap();
    let seen = recorder();
    client.on_event(EventType::Mode, {
        let seen = seen.clone();
        move |_, frame| {
            assert_eq!(frame.message_type, MessageType(0x8000_0002));
            seen.borrow_mut().push(frame.text()?.to_string());
            Ok(())
        }
    });
    client.on_event(EventType::Workspace, |_, _| panic!("not a workspace event"));

    assert!(ui.run_until(|| !seen.borrow().is_empty(), WAIT));
    assert_eq!(*seen.borrow(), vec![r#"{"change":"resize"}"#]);
}

#[test]
fn test_events_arrive_in_order() {
    let events = (0..100).map(|n| event(EventType::Workspace, &format!(r#"{{"n":{}}}"#, n))).collect();
    let (_dir, path) = serve(Script { ack: r#"{"success": true}"#, events, trailer: vec![], hang_up: false });
    let ui = UiLoop::new();
    let client = IpcClient::connect(IpcConfig::new(&path), &[EventType::Workspace], &ui).unwrap();
    let seen = recorder();
    client.on_any_event({
        let seen = seen.clone();
        move |_, frame| {
            let value: serde_json::Value = frame.json()?;
            seen.borrow_mut().push(value["n"].to_string());
            Ok(())
        }
    });

    assert!(ui.run_until(|| seen.borrow().len() == 100, WAIT));
    let expected: Vec<String> = (0..100).map(|n| n.to_string()).collect();
    assert_eq!(*seen.borrow(), expected);
}

#[test]
fn test_handler_command_reply_is_routed() {
    let (_dir, path) = serve(Script {
        ack: r#"{"success": true}"#,
        events: vec![event(EventType::Workspace, r#"{"change":"init"}"#)],
        trailer: vec![],
        hang_up: false,
    });
    let ui = UiLoop::new();
    let client = IpcClient::connect(IpcConfig::new(&path), &[EventType::Workspace], &ui).unwrap();
    let seen = recorder();
    client.on_event(EventType::Workspace, {
        let seen = seen.clone();
        move |commands, _| {
            seen.borrow_mut().push("event".to_string());
            commands.send_cmd(CommandType::GetWorkspaces, "")?;
            Ok(())
        }
    });
    client.on_reply(CommandType::GetWorkspaces, {
        let seen = seen.clone();
        move |_, reply| {
            seen.borrow_mut().push(reply.text()?.to_string());
            Ok(())
        }
    });

    assert!(ui.run_until(|| seen.borrow().len() == 2, WAIT));
    assert_eq!(*seen.borrow(), vec!["event", r#"[{"num":1,"name":"1","focused":true}]"#]);

    // synchronous calls outside of handlers
    let reply = client.call(CommandType::RunCommand, "workspace 2").unwrap();
    assert_eq!(reply.text().unwrap(), r#"[{"success":true}]"#);
    client.send_command(CommandType::GetWorkspaces, "").unwrap();
    assert_eq!(seen.borrow().len(), 3);
}

#[test]
fn test_rejected_subscription_fails_connect() {
    let (_dir, path) = serve(Script { ack: r#"{"success": false}"#, events: vec![], trailer: vec![], hang_up: false });
    let ui = UiLoop::new();
    match IpcClient::connect(IpcConfig::new(&path), &[EventType::Window], &ui) {
        Err(IpcError::Protocol(ProtocolError::SubscribeRejected(reply))) => assert_eq!(reply, r#"{"success": false}"#),
        Err(other) => panic!("expected SubscribeRejected, got {:?}", other),
        Ok(_) => panic!("expected SubscribeRejected, got a client"),
    }
}

#[test]
fn test_hang_up_is_reported() {
    let (_dir, path) = serve(Script { ack: r#"{"success": true}"#, events: vec![event(EventType::Tick, "{}")], trailer: vec![], hang_up: true });
    let ui = UiLoop::new();
    let client = IpcClient::connect(IpcConfig::new(&path), &[EventType::Tick], &ui).unwrap();
    let seen = recorder();
    client.on_any_event({
        let seen = seen.clone();
        move |_, _| {
            seen.borrow_mut().push("tick".to_string());
            Ok(())
        }
    });
    client.on_status({
        let seen = seen.clone();
        move |_, status| {
            seen.borrow_mut().push(format!("{:?}", status));
            Ok(())
        }
    });

    assert!(ui.run_until(|| seen.borrow().len() == 3, WAIT));
    assert_eq!(*seen.borrow(), vec!["tick", "Disconnected", "Closed"]);
}

#[test]
fn test_reconnect_after_hang_up() {
    let (_dir, path) = serve(Script { ack: r#"{"success": true}"#, events: vec![event(EventType::Tick, "{}")], trailer: vec![], hang_up: true });
    let ui = UiLoop::new();
    let policy = ReconnectPolicy { max_attempts: 3, initial_delay: Duration::from_millis(10), max_delay: Duration::from_millis(50) };
    let mut client = IpcClient::connect(IpcConfig::new(&path).with_reconnect(Some(policy)), &[EventType::Tick], &ui).unwrap();
    let statuses = Rc::new(RefCell::new(Vec::new()));
    let ticks = Rc::new(RefCell::new(0));
    client.on_any_event({
        let ticks = ticks.clone();
        move |_, _| {
            *ticks.borrow_mut() += 1;
            Ok(())
        }
    });
    client.on_status({
        let statuses = statuses.clone();
        move |_, status| {
            statuses.borrow_mut().push(status);
            Ok(())
        }
    });

    // every reconnect subscribes again and gets the scripted tick
    assert!(ui.run_until(|| *ticks.borrow() >= 2, WAIT));
    assert_eq!(statuses.borrow()[..2].to_vec(), vec![StreamStatus::Disconnected, StreamStatus::Reconnected]);
    client.shutdown();
    assert_eq!(client.status(), ChannelState::Closed);
}

/// Runs a client against `config` and returns the first two deliveries it saw.
fn statuses_until_closed(config: IpcConfig) -> Vec<String> {
    let ui = UiLoop::new();
    let client = IpcClient::connect(config, &[EventType::Tick], &ui).unwrap();
    let seen = recorder();
    client.on_any_event({
        let seen = seen.clone();
        move |_, frame| {
            seen.borrow_mut().push(frame.message_type.to_string());
            Ok(())
        }
    });
    client.on_status({
        let seen = seen.clone();
        move |_, status| {
            seen.borrow_mut().push(format!("{:?}", status));
            Ok(())
        }
    });
    assert!(ui.run_until(|| seen.borrow().len() >= 2, WAIT));
    let seen = seen.borrow().clone();
    seen
}

#[test]
fn test_bad_magic_disconnects() {
    // what sway sends before it exits
    let (_dir, path) = serve(Script { ack: r#"{"success": true}"#, events: vec![], trailer: b"close-sway-ipc".to_vec(), hang_up: true });
    assert_eq!(statuses_until_closed(IpcConfig::new(&path)), vec!["Disconnected", "Closed"]);
}

#[test]
fn test_oversized_payload_disconnects() {
    let mut header = b"i3-ipc".to_vec();
    header.extend_from_slice(&(1u32 << 20).to_ne_bytes());
    header.extend_from_slice(&EventType::Tick.message_type().0.to_ne_bytes());
    let (_dir, path) = serve(Script { ack: r#"{"success": true}"#, events: vec![], trailer: header, hang_up: true });
    let config = IpcConfig::new(&path).with_max_payload_len(1024);
    assert_eq!(statuses_until_closed(config), vec!["Disconnected", "Closed"]);
}
