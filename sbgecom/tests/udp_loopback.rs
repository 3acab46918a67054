//! End-to-end tests against a simulated device on the loopback interface.

#![cfg(feature = "udp")]

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sbgecom::commands::{generic_get_model_id, settings_action, SettingsAction};
use sbgecom::ids::{cmd, log};
use sbgecom::protocol::{encode, AckPayload, FrameParser, ParseEvent};
use sbgecom::{DiagLog, DiagType, EComError, EComHandle, ErrorCode, LogData, MsgClass, UdpTransport};

const MODEL_ID: u32 = 0x0001_2345;

/// Device side of the link. Answers commands and emits a diagnostic before
/// each ACK so the host sees logs interleaved with replies.
struct SimulatedDevice {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    fn spawn(socket: UdpSocket, host: SocketAddr, ack_code: ErrorCode) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::clone(&stop);

        let thread = thread::spawn(move || {
            socket
                .set_read_timeout(Some(Duration::from_millis(5)))
                .unwrap();
            let mut parser = FrameParser::new();
            let mut buf = [0u8; 2048];
            let mut timestamp = 0u32;

            while !stopped.load(Ordering::Relaxed) {
                let Ok((len, _)) = socket.recv_from(&mut buf) else {
                    continue;
                };
                parser.push(&buf[..len]);

                while let ParseEvent::FrameComplete(frame) = parser.poll() {
                    timestamp += 1000;
                    let diag = DiagLog {
                        timestamp_us: timestamp,
                        diag_type: DiagType::Info,
                        error_code: ErrorCode::NoError,
                        message: format!("command {:#04x}", frame.msg_id),
                    };
                    let log_frame =
                        encode(MsgClass::LogEcom0.as_u8(), log::DIAG, &diag.to_payload()).unwrap();
                    socket.send_to(&log_frame, host).unwrap();

                    let reply = if frame.msg_id == cmd::INFO {
                        encode(frame.msg_class, frame.msg_id, &MODEL_ID.to_le_bytes()).unwrap()
                    } else {
                        let ack = AckPayload::new(frame.msg_class, frame.msg_id, ack_code);
                        encode(MsgClass::Cmd0.as_u8(), cmd::ACK, ack.as_bytes()).unwrap()
                    };
                    socket.send_to(&reply, host).unwrap();
                }
            }
        });

        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn connect(ack_code: ErrorCode) -> (EComHandle<UdpTransport>, SimulatedDevice) {
    let device_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let host_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let device_addr = device_socket.local_addr().unwrap();
    let host_addr = host_socket.local_addr().unwrap();

    let device = SimulatedDevice::spawn(device_socket, host_addr, ack_code);
    let transport = UdpTransport::from_socket(host_socket, device_addr, true).unwrap();
    let mut handle = EComHandle::new(transport);
    handle
        .set_cmd_trials_and_timeout(3, Duration::from_millis(500))
        .unwrap();

    (handle, device)
}

#[test]
fn test_settings_action_over_udp() {
    let (mut handle, _device) = connect(ErrorCode::NoError);

    let logs: Arc<Mutex<Vec<DiagLog>>> = Arc::default();
    let sink = Arc::clone(&logs);
    handle.set_receive_log_callback(move |_, _, data| {
        if let LogData::Diag(diag) = data {
            sink.lock().unwrap().push(diag.clone());
        }
    });

    settings_action(&mut handle, SettingsAction::SaveSettings).unwrap();

    let logs = logs.lock().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].diag_type, DiagType::Info);
    assert_eq!(logs[0].message, "command 0x01");
}

#[test]
fn test_get_model_id_over_udp() {
    let (mut handle, _device) = connect(ErrorCode::NoError);

    let model_id = generic_get_model_id(&mut handle, MsgClass::Cmd0.as_u8(), cmd::INFO).unwrap();
    assert_eq!(model_id, MODEL_ID);
    assert_eq!(handle.protocol().stats().checksum_errors, 0);
}

#[test]
fn test_device_error_is_reported() {
    let (mut handle, _device) = connect(ErrorCode::InvalidParameter);

    let err = settings_action(&mut handle, SettingsAction::RebootOnly).unwrap_err();
    assert!(matches!(
        err,
        EComError::Ack {
            code: ErrorCode::InvalidParameter
        }
    ));
}

#[test]
fn test_logs_interleaved_with_acks() {
    let (mut handle, _device) = connect(ErrorCode::NoError);

    let count = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&count);
    handle.set_receive_log_callback(move |msg_class, msg_id, _| {
        assert_eq!(msg_class, MsgClass::LogEcom0.as_u8());
        assert_eq!(msg_id, log::DIAG);
        *counter.lock().unwrap() += 1;
    });

    for _ in 0..3 {
        settings_action(&mut handle, SettingsAction::SaveSettings).unwrap();
    }
    handle.handle().unwrap();

    assert_eq!(*count.lock().unwrap(), 3);
}
