//! End-to-end runs against a simulated hub.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hublink::{
    ByteChannel, ChannelKind, Error, Hub, HubConfig, Notification, NotificationSink, ProgramState,
    PumpExit, RunOptions, SessionPhase, Source, StreamChannel, Subscription, TransportError,
    subscription,
};
use hublink_proto::{DeviceEvent, StatusFlags, xor_checksum};
use tokio::time::Instant;

const RUNNING: StatusFlags = StatusFlags(1 << 6);
const IDLE: StatusFlags = StatusFlags(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    Correct,
    Wrong,
    Silent,
}

/// Stdio bytes or a status report the simulated hub sends back.
#[derive(Debug, Clone)]
enum Reply {
    Out(&'static str),
    Status(StatusFlags),
}

#[derive(Debug, Default)]
struct Received {
    writes: Vec<Vec<u8>>,
    block: Vec<u8>,
    remaining: Option<usize>,
    program_done: bool,
    stdin: Vec<u8>,
    line: Vec<u8>,
}

/// Accepts program blocks, acknowledges them and plays a script of replies
/// once the program is complete. After that, writes are program input:
/// each line is echoed as `> line`, `r` restarts the program and `q` ends it.
struct SimHub {
    sink: NotificationSink,
    ack: Ack,
    max_write: Option<usize>,
    on_loaded: Vec<Reply>,
    rx: Mutex<Received>,
}

impl SimHub {
    fn new(sink: NotificationSink) -> Self {
        Self {
            sink,
            ack: Ack::Correct,
            max_write: None,
            on_loaded: Vec::new(),
            rx: Mutex::new(Received::default()),
        }
    }

    fn ack(mut self, ack: Ack) -> Self {
        self.ack = ack;
        self
    }

    fn max_write(mut self, n: usize) -> Self {
        self.max_write = Some(n);
        self
    }

    fn on_loaded(mut self, replies: &[Reply]) -> Self {
        self.on_loaded = replies.to_vec();
        self
    }

    fn write_sizes(&self) -> Vec<usize> {
        self.rx.lock().unwrap().writes.iter().map(Vec::len).collect()
    }

    fn stdin(&self) -> Vec<u8> {
        self.rx.lock().unwrap().stdin.clone()
    }

    fn send(&self, reply: &Reply) {
        match reply {
            Reply::Out(s) => self.sink.deliver(Source::Stdio, s.as_bytes()).unwrap(),
            Reply::Status(f) => self
                .sink
                .deliver(Source::Control, DeviceEvent::StatusReport(*f).encode())
                .unwrap(),
        }
    }

    fn acknowledge(&self, block: &[u8]) {
        let sum = xor_checksum(block);
        match self.ack {
            Ack::Correct => self.sink.deliver(Source::Stdio, vec![sum]).unwrap(),
            Ack::Wrong => self.sink.deliver(Source::Stdio, vec![!sum]).unwrap(),
            Ack::Silent => {}
        }
    }

    fn on_input(&self, rx: &mut Received, data: &[u8]) {
        rx.stdin.extend_from_slice(data);
        for &b in data {
            match b {
                b'\n' => {
                    let line = std::mem::take(&mut rx.line);
                    let echo = format!("> {}\r\n", String::from_utf8_lossy(&line));
                    self.sink.deliver(Source::Stdio, echo.into_bytes()).unwrap();
                }
                b'r' => {
                    self.send(&Reply::Status(IDLE));
                    self.send(&Reply::Status(RUNNING));
                }
                b'q' => self.send(&Reply::Status(IDLE)),
                _ => rx.line.push(b),
            }
        }
    }
}

#[async_trait]
impl ByteChannel for SimHub {
    async fn write(&self, data: &[u8], _with_response: bool) -> Result<(), TransportError> {
        if let Some(max) = self.max_write {
            assert!(data.len() <= max, "write of {} bytes over limit", data.len());
        }
        let mut rx = self.rx.lock().unwrap();
        rx.writes.push(data.to_vec());
        if rx.program_done {
            self.on_input(&mut rx, data);
            return Ok(());
        }

        rx.block.extend_from_slice(data);
        let want = match rx.remaining {
            None => 4,
            Some(left) => left.min(100),
        };
        if rx.block.len() < want {
            return Ok(());
        }
        let block = std::mem::take(&mut rx.block);
        self.acknowledge(&block);
        let left = match rx.remaining {
            None => u32::from_le_bytes(block[..4].try_into().unwrap()) as usize,
            Some(left) => left - block.len(),
        };
        rx.remaining = Some(left);
        if left == 0 {
            rx.program_done = true;
            for reply in &self.on_loaded {
                self.send(reply);
            }
        }
        Ok(())
    }

    fn max_write(&self) -> Option<usize> {
        self.max_write
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Ble
    }
}

/// Terminal stand-in shared with the test.
#[derive(Clone, Default)]
struct Screen(Arc<Mutex<Vec<u8>>>);

impl Screen {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Screen {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn setup(build: impl FnOnce(SimHub) -> SimHub) -> (Hub<Arc<SimHub>>, Arc<SimHub>, Subscription, Screen) {
    let (sink, events) = subscription();
    let sim = Arc::new(build(SimHub::new(sink)));
    let screen = Screen::default();
    let hub = Hub::builder(Arc::clone(&sim))
        .terminal(screen.clone())
        .build();
    (hub, sim, events, screen)
}

fn no_wait() -> RunOptions {
    RunOptions::default().wait(false).raw_terminal(false)
}

fn attached() -> RunOptions {
    RunOptions::default().raw_terminal(false)
}

fn program(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[tokio::test(start_paused = true)]
async fn downloads_in_acknowledged_blocks() {
    let (sink, mut events) = subscription();
    let sim = Arc::new(SimHub::new(sink));
    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&progress);
    let hub = Hub::builder(Arc::clone(&sim))
        .terminal(Screen::default())
        .on_progress(move |p| seen.lock().unwrap().push((p.sent, p.total)))
        .build();

    let report = hub
        .run_program(&mut events, &program(250), "".as_ref(), tokio::io::empty(), &no_wait())
        .await
        .unwrap();

    assert_eq!(report.bytes_sent, 250);
    assert!(report.session.is_none());
    assert_eq!(sim.write_sizes(), [4, 100, 100, 50]);
    assert_eq!(sim.rx.lock().unwrap().writes[0], 250u32.to_le_bytes());
    assert_eq!(
        *progress.lock().unwrap(),
        [(100, 250), (200, 250), (250, 250)]
    );
    assert_eq!(hub.program_state(), ProgramState::Unknown);
}

#[tokio::test(start_paused = true)]
async fn empty_program_sends_only_the_length() {
    let (hub, sim, mut events, _) = setup(|s| s);
    let report = hub
        .run_program(&mut events, &[], "".as_ref(), tokio::io::empty(), &no_wait())
        .await
        .unwrap();
    assert_eq!(report.bytes_sent, 0);
    assert_eq!(sim.write_sizes(), [4]);
}

#[tokio::test(start_paused = true)]
async fn small_mtu_splits_writes_but_not_acks() {
    let (hub, sim, mut events, _) = setup(|s| s.max_write(20));
    hub.run_program(&mut events, &program(45), "".as_ref(), tokio::io::empty(), &no_wait())
        .await
        .unwrap();
    assert_eq!(sim.write_sizes(), [4, 20, 20, 5]);
}

#[tokio::test(start_paused = true)]
async fn custom_chunk_size_is_honored() {
    let (sink, mut events) = subscription();
    let sim = Arc::new(SimHub::new(sink));
    let hub = Hub::builder(Arc::clone(&sim))
        .config(HubConfig::default().chunk_size(100))
        .terminal(Screen::default())
        .build();
    hub.run_program(&mut events, &program(100), "".as_ref(), tokio::io::empty(), &no_wait())
        .await
        .unwrap();
    assert_eq!(sim.write_sizes(), [4, 100]);
}

#[tokio::test(start_paused = true)]
async fn wrong_checksum_fails_and_disarms() {
    let (hub, _sim, mut events, screen) = setup(|s| s.ack(Ack::Wrong));
    let err = hub
        .run_program(&mut events, &program(10), "".as_ref(), tokio::io::empty(), &no_wait())
        .await
        .unwrap_err();

    let expected = xor_checksum(&10u32.to_le_bytes());
    assert!(matches!(
        err,
        Error::ChecksumMismatch { expected: e, got } if e == expected && got == !expected
    ));
    assert_ne!(hub.program_state(), ProgramState::Loading);

    // Nothing is waiting for an acknowledgment any more: stdio bytes print.
    hub.handle_notification(&Notification::new(Source::Stdio, b"x\r\n".to_vec()))
        .unwrap();
    assert_eq!(screen.text(), "x\n");
}

#[tokio::test(start_paused = true)]
async fn silent_hub_times_out() {
    let (hub, _sim, mut events, _) = setup(|s| s.ack(Ack::Silent));
    let start = Instant::now();
    let err = hub
        .run_program(&mut events, &program(10), "".as_ref(), tokio::io::empty(), &no_wait())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AckTimeout(t) if t == Duration::from_millis(500)));
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn oversized_block_is_rejected_before_writing() {
    let (hub, sim, _events, _) = setup(|s| s);
    let err = hub.send_block(&[0; 101]).await.unwrap_err();
    assert!(matches!(err, Error::OversizedBlock(101)));
    assert!(sim.write_sizes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn output_during_download_is_held_until_loading_ends() {
    let (sink, mut events) = subscription();
    let sim = Arc::new(SimHub::new(sink).on_loaded(&[
        Reply::Out("early\r\n"),
        Reply::Status(RUNNING),
    ]));
    let screen = Screen::default();
    let at_progress = Arc::new(Mutex::new(Vec::new()));
    let (probe, seen) = (screen.clone(), Arc::clone(&at_progress));
    let hub = Hub::builder(Arc::clone(&sim))
        .terminal(screen.clone())
        .on_progress(move |_| seen.lock().unwrap().push(probe.text()))
        .build();

    hub.run_program(&mut events, &program(150), "".as_ref(), b"ping\nq".as_slice(), &attached())
        .await
        .unwrap();

    assert!(at_progress.lock().unwrap().iter().all(String::is_empty));
    assert_eq!(screen.text(), "early\n> ping\n");
}

#[tokio::test(start_paused = true)]
async fn interactive_session_forwards_input_until_program_ends() {
    let (hub, sim, mut events, screen) = setup(|s| s.on_loaded(&[Reply::Status(RUNNING)]));
    let report = hub
        .run_program(&mut events, &program(30), "".as_ref(), b"ping\nq".as_slice(), &attached())
        .await
        .unwrap();

    let session = report.session.unwrap();
    assert_eq!(session.stdin, PumpExit::Eof);
    assert_eq!(session.forwarded, 6);
    assert_eq!(sim.stdin(), b"ping\nq");
    assert_eq!(report.output, [b"> ping".to_vec()]);
    assert_eq!(screen.text(), "> ping\n");
    assert_eq!(hub.session_phase(), SessionPhase::Done);
    assert_eq!(hub.program_state(), ProgramState::Idle);
}

#[tokio::test(start_paused = true)]
async fn program_end_cancels_pending_input() {
    let (hub, sim, mut events, _) =
        setup(|s| s.on_loaded(&[Reply::Status(RUNNING), Reply::Status(IDLE)]));
    let (_keyboard, input) = tokio::io::duplex(64);

    let report = hub
        .run_program(&mut events, &program(30), "".as_ref(), input, &attached())
        .await
        .unwrap();

    let session = report.session.unwrap();
    assert_eq!(session.stdin, PumpExit::Cancelled);
    assert_eq!(session.forwarded, 0);
    assert!(sim.stdin().is_empty());
}

#[tokio::test(start_paused = true)]
async fn quiet_run_records_output_without_printing() {
    let (hub, _sim, mut events, screen) =
        setup(|s| s.on_loaded(&[Reply::Out("hi\r\n"), Reply::Status(IDLE)]));
    let report = hub
        .run_program(
            &mut events,
            &program(5),
            "".as_ref(),
            tokio::io::empty(),
            &attached().print_output(false),
        )
        .await
        .unwrap();
    assert_eq!(report.output, [b"hi".to_vec()]);
    assert!(screen.text().is_empty());
}

#[tokio::test(start_paused = true)]
async fn restart_within_settle_delay_is_waited_out() {
    let (hub, _sim, mut events, _) = setup(|s| s.on_loaded(&[Reply::Status(RUNNING)]));
    let (mut keyboard, input) = tokio::io::duplex(64);
    let start = Instant::now();

    let typist = async move {
        use tokio::io::AsyncWriteExt;
        keyboard.write_all(b"r").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        keyboard.write_all(b"q").await.unwrap();
        keyboard
    };
    let (prog, opts) = (program(5), attached());
    let (report, _keyboard) = tokio::join!(
        hub.run_program(&mut events, &prog, "".as_ref(), input, &opts),
        typist
    );

    report.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(1300));
    assert_eq!(hub.program_state(), ProgramState::Idle);
}

#[tokio::test(start_paused = true)]
async fn log_sentinels_redirect_to_the_script_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, _sim, mut events, screen) = setup(|s| {
        s.on_loaded(&[
            Reply::Out("before\r\nLOG-OPEN data/out.csv\r\n1,2\r\n"),
            Reply::Out("3,4\r\nLOG-CLOSE\r\nafter\r\n"),
            Reply::Status(IDLE),
        ])
    });

    let report = hub
        .run_program(&mut events, &program(5), dir.path(), tokio::io::empty(), &attached())
        .await
        .unwrap();

    assert_eq!(screen.text(), "before\nafter\n");
    assert_eq!(report.output, [b"before".to_vec(), b"after".to_vec()]);
    let log = std::fs::read_to_string(dir.path().join("data/out.csv")).unwrap();
    assert_eq!(log, "1,2\n3,4\n");
}

#[tokio::test(start_paused = true)]
async fn second_log_open_fails_and_closes_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, _sim, mut events, _) = setup(|s| {
        s.on_loaded(&[Reply::Out("LOG-OPEN a.log\r\nrow\r\nLOG-OPEN b.log\r\n")])
    });

    let err = hub
        .run_program(&mut events, &program(5), dir.path(), tokio::io::empty(), &attached())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Protocol(m) if m == "log already open"));
    assert!(hub.log_path().is_none());
    assert_eq!(std::fs::read_to_string(dir.path().join("a.log")).unwrap(), "row\n");
    assert!(!dir.path().join("b.log").exists());
}

#[tokio::test(start_paused = true)]
async fn log_close_without_open_is_a_protocol_error() {
    let (hub, _sim, mut events, _) = setup(|s| s.on_loaded(&[Reply::Out("LOG-CLOSE\r\n")]));
    let err = hub
        .run_program(&mut events, &program(5), "".as_ref(), tokio::io::empty(), &attached())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(m) if m == "no log open"));
}

#[tokio::test(start_paused = true)]
async fn closed_notifications_are_a_disconnect() {
    let (sink, mut events) = subscription();
    drop(sink);
    let hub = Hub::builder(StreamChannel::new(Vec::<u8>::new(), ChannelKind::Usb))
        .terminal(Screen::default())
        .build();

    let err = hub
        .run_program(&mut events, &program(5), "".as_ref(), tokio::io::empty(), &no_wait())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
    assert_ne!(hub.program_state(), ProgramState::Loading);
}

#[test]
fn unknown_events_are_ignored_and_short_reports_rejected() {
    let hub = Hub::builder(StreamChannel::new(Vec::<u8>::new(), ChannelKind::Usb))
        .terminal(Screen::default())
        .build();
    hub.handle_notification(&Notification::new(Source::Control, vec![0x7f, 1, 2]))
        .unwrap();
    let err = hub
        .handle_notification(&Notification::new(Source::Control, vec![0x00, 0x40]))
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn status_change_outside_loading_is_applied_immediately() {
    let hub = Hub::builder(StreamChannel::new(Vec::<u8>::new(), ChannelKind::Usb))
        .terminal(Screen::default())
        .build();
    let report = DeviceEvent::StatusReport(RUNNING).encode();
    hub.handle_notification(&Notification::new(Source::Control, report))
        .unwrap();
    assert_eq!(hub.program_state(), ProgramState::Running);

    hub.enter_loading();
    let report = DeviceEvent::StatusReport(IDLE).encode();
    hub.handle_notification(&Notification::new(Source::Control, report))
        .unwrap();
    assert_eq!(hub.program_state(), ProgramState::Loading);
    hub.exit_loading().unwrap();
    assert_eq!(hub.program_state(), ProgramState::Idle);
}

#[test]
fn prompt_without_newline_reaches_the_terminal() {
    let screen = Screen::default();
    let hub = Hub::builder(StreamChannel::new(Vec::<u8>::new(), ChannelKind::Usb))
        .terminal(screen.clone())
        .build();
    let stdio = |data: &[u8]| {
        hub.handle_notification(&Notification::new(Source::Stdio, data.to_vec()))
            .unwrap();
    };

    stdio(b">>> ");
    assert_eq!(screen.text(), ">>> ");
    stdio(b"p");
    assert_eq!(screen.text(), ">>> p");
    stdio(b"\r\n");
    assert_eq!(screen.text(), ">>> p\n");

    stdio(b"LOG");
    assert_eq!(screen.text(), ">>> p\n");
    stdio(b"IN");
    assert_eq!(screen.text(), ">>> p\nLOGIN");
}
