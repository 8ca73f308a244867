//! Tests for upload dispatch, retention, and the HTTP transport.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, unbounded};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::batch::{Batch, BatchId, BatchWriter, decode_payload};
use crate::clock::ManualClock;
use crate::log_event::FemtoLogEvent;
use crate::network::NetworkStatus;
use crate::store::{BatchFile, BatchStore};
use crate::test_utils::{GatedTransport, ScriptedResponse, ScriptedTransport};

const MAX_AGE: Duration = Duration::from_secs(3_600);
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    _dir: TempDir,
    store: BatchStore,
    writer: BatchWriter,
    clock: Arc<ManualClock>,
    network: Arc<NetworkStatus>,
    completions: Receiver<UploadCompletion>,
    dispatcher: UploadDispatcher,
}

impl Harness {
    fn new(transport: Arc<dyn Transport>, allow_metered_network: bool) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BatchStore::new(dir.path().join("batches"));
        let clock = Arc::new(ManualClock::new());
        let network = Arc::new(NetworkStatus::default());
        let (tx, completions) = unbounded();
        let sink: CompletionSink = Arc::new(move |completion| {
            let _ = tx.send(completion);
        });
        let policy = UploadPolicy {
            max_batch_age: MAX_AGE,
            allow_metered_network,
        };
        let dispatcher = UploadDispatcher::new(store.clone(), transport, policy, sink)
            .with_clock(clock.clone())
            .with_network_monitor(network.clone());
        Self {
            _dir: dir,
            writer: BatchWriter::new(store.clone()),
            store,
            clock,
            network,
            completions,
            dispatcher,
        }
    }

    fn write_batch(&self, text: &str) -> BatchFile {
        let batch = Batch::new(BTreeMap::new(), vec![FemtoLogEvent::new(text)]);
        self.writer.write(&batch).expect("write batch")
    }

    fn next_completion(&self) -> UploadCompletion {
        self.completions.recv_timeout(WAIT).expect("completion")
    }

    fn upload_and_handle(&mut self, file: &BatchFile) -> CompletionAction {
        assert_eq!(self.dispatcher.submit(file), Submission::Started);
        let completion = self.next_completion();
        self.dispatcher.handle_completion(completion)
    }
}

#[fixture]
fn accepting() -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new())
}

#[rstest]
fn success_deletes_batch(accepting: Arc<ScriptedTransport>) {
    let mut h = Harness::new(accepting.clone(), true);
    let file = h.write_batch("delivered");

    assert_eq!(h.upload_and_handle(&file), CompletionAction::Delivered);
    assert!(!file.path.exists());
    assert!(h.dispatcher.is_idle());

    let uploads = accepting.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].batch, file.id);
    let decoded = decode_payload(&uploads[0].body).expect("decode body");
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].events[0].raw_text(), "delivered");
}

#[rstest]
fn client_error_deletes_batch_exactly_once() {
    let transport = Arc::new(ScriptedTransport::replying(ScriptedResponse::Status(400)));
    let mut h = Harness::new(transport, true);
    let file = h.write_batch("malformed");

    assert_eq!(h.dispatcher.submit(&file), Submission::Started);
    let completion = h.next_completion();
    let token = completion.token;
    assert_eq!(
        h.dispatcher.handle_completion(completion),
        CompletionAction::Rejected(400)
    );
    assert!(!file.path.exists());

    let duplicate = UploadCompletion {
        id: file.id,
        token,
        outcome: Ok(400),
    };
    assert_eq!(
        h.dispatcher.handle_completion(duplicate),
        CompletionAction::Ignored
    );
    assert!(!h.store.remove(file.id).expect("remove"));
}

#[rstest]
#[case(ScriptedResponse::Status(500))]
#[case(ScriptedResponse::Status(503))]
#[case(ScriptedResponse::Timeout)]
#[case(ScriptedResponse::NetworkFailure)]
fn transient_failure_keeps_young_batch(#[case] response: ScriptedResponse) {
    let mut h = Harness::new(Arc::new(ScriptedTransport::replying(response)), true);
    let file = h.write_batch("retry me");

    assert_eq!(h.upload_and_handle(&file), CompletionAction::Retained);
    assert!(file.path.exists());
    assert!(h.dispatcher.is_idle());
}

#[rstest]
fn transient_failure_expires_old_batch() {
    let transport = Arc::new(ScriptedTransport::replying(ScriptedResponse::Status(502)));
    let mut h = Harness::new(transport, true);
    let file = h.write_batch("stale");

    assert_eq!(h.dispatcher.submit(&file), Submission::Started);
    let completion = h.next_completion();
    h.clock.advance(MAX_AGE + Duration::from_secs(1));

    assert_eq!(
        h.dispatcher.handle_completion(completion),
        CompletionAction::Expired
    );
    assert!(!file.path.exists());
}

#[rstest]
fn metered_network_defers_upload_when_disallowed(accepting: Arc<ScriptedTransport>) {
    let mut h = Harness::new(accepting.clone(), false);
    h.network.set_metered(true);
    let file = h.write_batch("wait for wifi");

    assert_eq!(h.dispatcher.submit(&file), Submission::Deferred);
    assert!(file.path.exists());
    assert!(h.dispatcher.is_idle());
    assert_eq!(accepting.upload_count(), 0);

    h.network.set_metered(false);
    let report = h.dispatcher.resume();
    assert_eq!(report.resubmitted, 1);
    let completion = h.next_completion();
    assert_eq!(
        h.dispatcher.handle_completion(completion),
        CompletionAction::Delivered
    );
}

#[rstest]
fn metered_network_is_used_when_allowed(accepting: Arc<ScriptedTransport>) {
    let mut h = Harness::new(accepting, true);
    h.network.set_metered(true);
    let file = h.write_batch("cellular ok");
    assert_eq!(h.upload_and_handle(&file), CompletionAction::Delivered);
}

#[rstest]
fn resume_prunes_expired_batches_before_uploading(accepting: Arc<ScriptedTransport>) {
    let mut h = Harness::new(accepting.clone(), true);
    let old = h.write_batch("old");
    h.clock.advance(MAX_AGE + Duration::from_secs(1));
    let fresh = h.write_batch("fresh");
    filetime::set_file_mtime(
        &fresh.path,
        filetime::FileTime::from_system_time(crate::clock::Clock::now(h.clock.as_ref())),
    )
    .expect("set mtime");

    let report = h.dispatcher.resume();

    assert_eq!(report.pruned, 1);
    assert_eq!(report.resubmitted, 1);
    assert!(!old.path.exists());
    let completion = h.next_completion();
    assert_eq!(completion.id, fresh.id);
    assert_eq!(
        h.dispatcher.handle_completion(completion),
        CompletionAction::Delivered
    );
    assert_eq!(accepting.uploads_for(old.id), 0);
}

#[rstest]
fn resume_cancels_in_flight_uploads() {
    let (transport, gate) = GatedTransport::new(ScriptedTransport::new());
    let transport = Arc::new(transport);
    let mut h = Harness::new(transport.clone(), true);
    let file = h.write_batch("interrupted");

    assert_eq!(h.dispatcher.submit(&file), Submission::Started);
    assert_eq!(gate.wait_entered(WAIT), Some(file.id));

    let report = h.dispatcher.resume();
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.resubmitted, 1);
    assert_eq!(gate.wait_entered(WAIT), Some(file.id));

    gate.release_one();
    gate.release_one();
    let completion = h.next_completion();
    let stale_token = completion.token.wrapping_sub(1);
    assert_eq!(
        h.dispatcher.handle_completion(completion),
        CompletionAction::Delivered
    );
    assert!(
        h.completions.recv_timeout(Duration::from_millis(200)).is_err(),
        "cancelled upload must not report"
    );
    let stale = UploadCompletion {
        id: file.id,
        token: stale_token,
        outcome: Ok(500),
    };
    assert_eq!(
        h.dispatcher.handle_completion(stale),
        CompletionAction::Ignored
    );
    assert_eq!(transport.inner().uploads_for(file.id), 2);
}

#[rstest]
fn resume_ignores_batch_names_it_cannot_address(accepting: Arc<ScriptedTransport>) {
    let mut h = Harness::new(accepting.clone(), true);
    let kept = h.write_batch("kept");
    let shouted = h.store.dir().join(format!(
        "{}.data",
        BatchId::generate().to_string().to_uppercase()
    ));
    fs::write(&shouted, b"[]").expect("write");
    filetime::set_file_mtime(&shouted, filetime::FileTime::from_unix_time(1_000, 0))
        .expect("set mtime");

    let listed = h.store.list().expect("list");
    assert_eq!(listed, vec![kept.clone()]);

    let report = h.dispatcher.resume();
    assert_eq!(report.resubmitted, 1);
    assert_eq!(report.pruned, 0);
    let completion = h.next_completion();
    assert_eq!(completion.id, kept.id);
    assert_eq!(
        h.dispatcher.handle_completion(completion),
        CompletionAction::Delivered
    );
    assert_eq!(accepting.upload_count(), 1);
}

#[rstest]
fn resume_sweeps_abandoned_writes(accepting: Arc<ScriptedTransport>) {
    let mut h = Harness::new(accepting, true);
    h.write_batch("creates the directory");
    let now = crate::clock::Clock::now(h.clock.as_ref());
    let abandoned = h.store.dir().join(".pending-crashed.tmp");
    let in_progress = h.store.dir().join(".pending-live.tmp");
    fs::write(&abandoned, b"[{\"tags\"").expect("write");
    fs::write(&in_progress, b"[").expect("write");
    filetime::set_file_mtime(
        &abandoned,
        filetime::FileTime::from_system_time(now - Duration::from_secs(120)),
    )
    .expect("set mtime");
    filetime::set_file_mtime(&in_progress, filetime::FileTime::from_system_time(now))
        .expect("set mtime");

    h.dispatcher.resume();

    assert!(!abandoned.exists());
    assert!(in_progress.exists());
}

#[rstest]
fn submit_reads_batch_before_spawning(accepting: Arc<ScriptedTransport>) {
    let mut h = Harness::new(accepting.clone(), true);
    let file = h.write_batch("gone early");
    fs::remove_file(&file.path).expect("remove");

    assert_eq!(h.dispatcher.submit(&file), Submission::Failed);
    assert!(h.dispatcher.is_idle());
    assert!(
        h.completions.recv_timeout(Duration::from_millis(200)).is_err(),
        "no upload thread should report"
    );
    assert_eq!(accepting.upload_count(), 0);
}

#[rstest]
fn completion_for_vanished_file_is_harmless() {
    let transport = Arc::new(ScriptedTransport::replying(ScriptedResponse::Status(500)));
    let mut h = Harness::new(transport, true);
    let file = h.write_batch("gone");
    assert_eq!(h.dispatcher.submit(&file), Submission::Started);
    let completion = h.next_completion();
    fs::remove_file(&file.path).expect("remove");
    assert_eq!(
        h.dispatcher.handle_completion(completion),
        CompletionAction::Retained
    );
}

// ---------------------------------------------------------------------------
// UreqTransport against a loopback server
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn read_http_request(stream: &mut TcpStream) -> CapturedRequest {
    let _ = stream.set_read_timeout(Some(WAIT));
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

    let mut request_line = String::new();
    reader.read_line(&mut request_line).expect("read request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read header");
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            if key == "content-length" {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((key, value));
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("read body");
    CapturedRequest {
        method,
        path,
        headers,
        body,
    }
}

fn spawn_mock_server(status: u16) -> (SocketAddr, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let request = read_http_request(&mut stream);
        let response = format!(
            "HTTP/1.1 {status} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status_text(status)
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = tx.send(request);
    });
    (addr, rx)
}

fn transport_for(addr: SocketAddr, request_timeout: Duration) -> UreqTransport {
    UreqTransport::new(
        format!("http://{addr}/api/v1/ingest"),
        "secret-token",
        Duration::from_secs(2),
        request_timeout,
    )
    .expect("transport")
}

fn header<'a>(request: &'a CapturedRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[rstest]
#[case(200)]
#[case(201)]
#[case(400)]
#[case(503)]
fn ureq_transport_posts_json_with_bearer_token(#[case] status: u16) {
    let (addr, rx) = spawn_mock_server(status);
    let transport = transport_for(addr, WAIT);
    let body = br#"[{"tags":{},"events":[]}]"#;

    let result = transport.post(BatchId::generate(), body).expect("status");
    assert_eq!(result, status);

    let captured = rx.recv_timeout(WAIT).expect("request");
    assert_eq!(captured.method, "POST");
    assert_eq!(captured.path, "/api/v1/ingest");
    assert_eq!(header(&captured, "content-type"), Some("application/json"));
    assert_eq!(header(&captured, "authorization"), Some("Bearer secret-token"));
    assert_eq!(captured.body, body);
}

#[rstest]
fn ureq_transport_reports_unresponsive_server_as_error() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let server = thread::spawn(move || {
        let accepted = listener.accept();
        let _ = release_rx.recv_timeout(WAIT);
        drop(accepted);
    });

    let transport = transport_for(addr, Duration::from_millis(200));
    let start = Instant::now();
    let result = transport.post(BatchId::generate(), b"[]");
    assert!(result.is_err(), "expected a transport error, got {result:?}");
    assert!(start.elapsed() < WAIT);

    let _ = release_tx.send(());
    server.join().expect("server thread");
}

#[rstest]
fn ureq_transport_reports_refused_connection_as_network_error() {
    let addr = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        listener.local_addr().expect("local addr")
    };
    let transport = transport_for(addr, WAIT);
    let result = transport.post(BatchId::generate(), b"[]");
    assert!(matches!(result, Err(TransportError::Network(_))));
}
