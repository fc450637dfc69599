//! Async gateway RPC client.
//!
//! One connection per client. A background reader task routes response
//! frames to the waiting call by correlation id; writers share the socket
//! through an async mutex, so concurrent calls on `&GatewayClient` are safe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::{Credential, Endpoint, ResolvedGateway};
use crate::error::GatewayError;
use crate::protocol::{
    parse_job_list, response_id, ClientInfo, ConnectParams, CronAddSpec, CronAdded, CronJob,
    CronListOptions, CronPatch, Frame, ResponseError, CHALLENGE_EVENT, METHOD_CONNECT,
    METHOD_CRON_ADD, METHOD_CRON_LIST, METHOD_CRON_REMOVE, METHOD_CRON_UPDATE,
};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Pending = Arc<Mutex<HashMap<String, PendingCall>>>;

struct PendingCall {
    method: String,
    respond_to: oneshot::Sender<Result<Value, GatewayError>>,
}

/// The scheduler operations repair and status checks need.
#[async_trait]
pub trait CronScheduler: Send + Sync {
    async fn add_job(&self, spec: &CronAddSpec) -> Result<CronAdded, GatewayError>;
    async fn list_jobs(&self) -> Result<Vec<CronJob>, GatewayError>;
    async fn close(&self);
}

pub struct GatewayClient {
    writer: Arc<Mutex<Option<BoxWriter>>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    timeout: Duration,
}

impl GatewayClient {
    /// Open a socket to the resolved endpoint and complete the handshake.
    ///
    /// A socket that cannot be opened is a [`GatewayError::Connection`];
    /// it is not retried.
    pub async fn connect(resolved: &ResolvedGateway) -> Result<Self, GatewayError> {
        let url = resolved.endpoint.to_string();
        let connect_failed = |source: std::io::Error| GatewayError::Connection {
            url: url.clone(),
            source,
        };
        let connect_timed_out = || GatewayError::Timeout {
            method: METHOD_CONNECT.to_string(),
            timeout: resolved.timeout,
        };

        match &resolved.endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = tokio::time::timeout(
                    resolved.timeout,
                    tokio::net::TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| connect_timed_out())?
                .map_err(connect_failed)?;
                Self::connect_over(stream, resolved.credential.as_ref(), resolved.timeout).await
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream =
                    tokio::time::timeout(resolved.timeout, tokio::net::UnixStream::connect(path))
                        .await
                        .map_err(|_| connect_timed_out())?
                        .map_err(connect_failed)?;
                Self::connect_over(stream, resolved.credential.as_ref(), resolved.timeout).await
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(GatewayError::InvalidUrl {
                url,
                reason: "unix sockets are not supported on this platform".to_string(),
            }),
        }
    }

    /// Run the handshake over an already-open stream.
    pub async fn connect_over<S>(
        stream: S,
        credential: Option<&Credential>,
        timeout: Duration,
    ) -> Result<Self, GatewayError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (challenge_tx, challenge_rx) = oneshot::channel::<String>();

        let reader = tokio::spawn(reader_task(
            read_half,
            pending.clone(),
            closed.clone(),
            challenge_tx,
        ));

        let client = Self {
            writer: Arc::new(Mutex::new(Some(Box::new(write_half)))),
            pending,
            closed,
            reader,
            timeout,
        };

        let nonce = match tokio::time::timeout(timeout, challenge_rx).await {
            Ok(Ok(nonce)) => nonce,
            Ok(Err(_)) => {
                client.close().await;
                return Err(GatewayError::Closed);
            }
            Err(_) => {
                client.close().await;
                return Err(GatewayError::Timeout {
                    method: CHALLENGE_EVENT.to_string(),
                    timeout,
                });
            }
        };

        let params = ConnectParams {
            client: ClientInfo::default(),
            nonce,
            auth: credential.map(Credential::to_auth),
        };
        if let Err(err) = client.call(METHOD_CONNECT, serde_json::to_value(&params)?).await {
            client.close().await;
            return Err(err);
        }
        tracing::debug!("gateway handshake complete");
        Ok(client)
    }

    /// Issue one request and wait for its response, bounded by the client
    /// timeout whether or not the socket stays open.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::NotConnected);
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                respond_to: tx,
            },
        );
        // The reader flags `closed` before draining, so a call registered
        // after the drain is caught here.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(GatewayError::Closed);
        }

        let frame = Frame::Req {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        if let Err(err) = self.write_frame(&frame).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }
        tracing::debug!(method, id = %id, "gateway request sent");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(
                    method,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "gateway call timed out"
                );
                Err(GatewayError::Timeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }

    pub async fn cron_add(&self, spec: &CronAddSpec) -> Result<CronAdded, GatewayError> {
        let payload = self.call(METHOD_CRON_ADD, serde_json::to_value(spec)?).await?;
        let id = payload
            .get("id")
            .or_else(|| payload.get("job").and_then(|job| job.get("id")))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::Protocol("cron.add response carries no job id".to_string())
            })?;
        Ok(CronAdded { id: id.to_string() })
    }

    pub async fn cron_remove(&self, id: &str) -> Result<(), GatewayError> {
        self.call(METHOD_CRON_REMOVE, json!({ "id": id })).await?;
        Ok(())
    }

    pub async fn cron_list(&self, options: CronListOptions) -> Result<Vec<CronJob>, GatewayError> {
        let payload = self.call(METHOD_CRON_LIST, serde_json::to_value(options)?).await?;
        parse_job_list(payload)
    }

    pub async fn cron_update(&self, id: &str, patch: &CronPatch) -> Result<(), GatewayError> {
        self.call(METHOD_CRON_UPDATE, json!({ "id": id, "patch": patch }))
            .await?;
        Ok(())
    }

    /// Shut the connection down. Pending calls fail with `Closed`. Calling
    /// this more than once is harmless.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.abort();
        fail_pending(&self.pending).await;
        tracing::debug!("gateway connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), GatewayError> {
        let bytes = frame.encode()?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(GatewayError::NotConnected)?;
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        written.map_err(|err| {
            tracing::warn!(error = %err, "gateway write failed");
            GatewayError::Closed
        })
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl CronScheduler for GatewayClient {
    async fn add_job(&self, spec: &CronAddSpec) -> Result<CronAdded, GatewayError> {
        self.cron_add(spec).await
    }

    async fn list_jobs(&self) -> Result<Vec<CronJob>, GatewayError> {
        self.cron_list(CronListOptions {
            include_disabled: true,
        })
        .await
    }

    async fn close(&self) {
        GatewayClient::close(self).await;
    }
}

/// Liveness check: connect, handshake, close. Returns the round-trip time.
pub async fn probe(resolved: &ResolvedGateway) -> Result<Duration, GatewayError> {
    let started = Instant::now();
    let client = GatewayClient::connect(resolved).await?;
    client.close().await;
    Ok(started.elapsed())
}

async fn reader_task<S>(
    read_half: ReadHalf<S>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    challenge_tx: oneshot::Sender<String>,
) where
    S: AsyncRead + Send + 'static,
{
    let mut challenge_tx = Some(challenge_tx);
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "gateway read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame = match Frame::decode(&line) {
            Ok(frame) => frame,
            Err(err) => {
                let waiting = match response_id(&line) {
                    Some(id) => pending.lock().await.remove(&id),
                    None => None,
                };
                match waiting {
                    Some(call) => {
                        tracing::warn!(
                            method = %call.method,
                            error = %err,
                            "undecodable gateway response"
                        );
                        let _ = call.respond_to.send(Err(err));
                    }
                    None => tracing::warn!(error = %err, "ignoring gateway frame"),
                }
                continue;
            }
        };

        match frame {
            Frame::Res {
                id,
                ok,
                payload,
                error,
            } => {
                let Some(call) = pending.lock().await.remove(&id) else {
                    tracing::debug!(id = %id, "response for unknown or expired call");
                    continue;
                };
                let result = if ok {
                    Ok(payload.unwrap_or(Value::Null))
                } else {
                    let error = error.unwrap_or_else(|| ResponseError {
                        code: None,
                        message: "request failed".to_string(),
                    });
                    Err(GatewayError::Rpc {
                        method: call.method,
                        code: error.code,
                        message: error.message,
                    })
                };
                let _ = call.respond_to.send(result);
            }
            Frame::Event { event, payload } if event == CHALLENGE_EVENT => {
                let nonce = payload
                    .get("nonce")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(tx) = challenge_tx.take() {
                    let _ = tx.send(nonce);
                }
            }
            Frame::Event { event, .. } => {
                tracing::debug!(event = %event, "gateway event");
            }
            Frame::Req { method, .. } => {
                tracing::debug!(method = %method, "ignoring server-initiated request");
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    fail_pending(&pending).await;
}

async fn fail_pending(pending: &Pending) {
    let drained: Vec<PendingCall> = pending.lock().await.drain().map(|(_, call)| call).collect();
    for call in drained {
        let _ = call.respond_to.send(Err(GatewayError::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use tokio::io::{duplex, DuplexStream};

    const TIMEOUT: Duration = Duration::from_millis(200);

    enum Reply {
        Ok(Value),
        Err(&'static str),
        /// Written as-is, with `{id}` replaced by the request id.
        Raw(&'static str),
        Silent,
        Hangup,
    }

    /// Spawn an in-memory gateway. Returns the client end and the recorded
    /// `connect` params.
    fn fake_gateway<F>(handler: F) -> (DuplexStream, Arc<StdMutex<Vec<Value>>>)
    where
        F: Fn(&str, &Value) -> Reply + Send + 'static,
    {
        let (client_end, server_end) = duplex(64 * 1024);
        let connects = Arc::new(StdMutex::new(Vec::new()));
        let seen = connects.clone();
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_end);
            write
                .write_all(&Frame::challenge("n0nce").encode().unwrap())
                .await
                .unwrap();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Frame::Req { id, method, params } = Frame::decode(&line).unwrap() else {
                    continue;
                };
                let reply = if method == METHOD_CONNECT {
                    seen.lock().unwrap().push(params);
                    Reply::Ok(json!({ "protocol": 1 }))
                } else {
                    handler(&method, &params)
                };
                let bytes = match reply {
                    Reply::Ok(payload) => Frame::ok(id, payload).encode().unwrap(),
                    Reply::Err(message) => Frame::error(id, message).encode().unwrap(),
                    Reply::Raw(line) => format!("{}\n", line.replace("{id}", &id)).into_bytes(),
                    Reply::Silent => continue,
                    Reply::Hangup => return,
                };
                if write.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        });
        (client_end, connects)
    }

    fn spec() -> CronAddSpec {
        CronAddSpec {
            name: "acme-lead-1".into(),
            agent_id: "acme-lead".into(),
            schedule: "0 9 * * *".into(),
            timezone: Some("UTC".into()),
            prompt: "Morning report".into(),
        }
    }

    #[tokio::test]
    async fn handshake_echoes_nonce_and_sends_auth() {
        let (stream, connects) = fake_gateway(|method, params| match method {
            METHOD_CRON_ADD => {
                assert_eq!(params["agentId"], json!("acme-lead"));
                Reply::Ok(json!({ "id": "job-7" }))
            }
            _ => Reply::Err("unexpected"),
        });
        let credential = Credential::Token("t0k".into());
        let client = GatewayClient::connect_over(stream, Some(&credential), TIMEOUT)
            .await
            .expect("connect");

        let added = client.cron_add(&spec()).await.expect("cron.add");
        assert_eq!(added.id, "job-7");

        let connect = connects.lock().unwrap()[0].clone();
        assert_eq!(connect["nonce"], json!("n0nce"));
        assert_eq!(connect["auth"]["token"], json!("t0k"));
        assert_eq!(connect["client"]["name"], json!("formation"));
        client.close().await;
    }

    #[tokio::test]
    async fn rejected_call_is_rpc_error() {
        let (stream, _) = fake_gateway(|_, _| Reply::Err("no such job"));
        let client = GatewayClient::connect_over(stream, None, TIMEOUT).await.unwrap();
        let err = client.cron_remove("job-1").await.unwrap_err();
        match err {
            GatewayError::Rpc { method, message, .. } => {
                assert_eq!(method, METHOD_CRON_REMOVE);
                assert_eq!(message, "no such job");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn numeric_error_code_is_rpc_error() {
        let (stream, _) = fake_gateway(|_, _| {
            Reply::Raw(concat!(
                r#"{"type":"res","id":"{id}","ok":false,"#,
                r#""error":{"code":404,"message":"no such job"}}"#
            ))
        });
        let client = GatewayClient::connect_over(stream, None, Duration::from_secs(5))
            .await
            .unwrap();
        let started = Instant::now();
        let err = client.cron_remove("job-1").await.unwrap_err();
        match err {
            GatewayError::Rpc { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("404"));
                assert_eq!(message, "no such job");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn undecodable_response_fails_its_call() {
        let (stream, _) =
            fake_gateway(|_, _| Reply::Raw(r#"{"type":"res","id":"{id}","ok":"maybe"}"#));
        let client = GatewayClient::connect_over(stream, None, Duration::from_secs(5))
            .await
            .unwrap();
        let err = client
            .cron_list(CronListOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)), "got {err:?}");
        assert!(client.pending.lock().await.is_empty());
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn silent_gateway_times_out_while_socket_stays_open() {
        let (stream, _) = fake_gateway(|_, _| Reply::Silent);
        let client = GatewayClient::connect_over(stream, None, TIMEOUT).await.unwrap();
        let err = client
            .cron_list(CronListOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }), "got {err:?}");
        assert!(!client.is_closed());
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn hangup_fails_pending_call_with_closed() {
        let (stream, _) = fake_gateway(|_, _| Reply::Hangup);
        let client = GatewayClient::connect_over(stream, None, Duration::from_secs(5))
            .await
            .unwrap();
        let err = client
            .cron_list(CronListOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Closed), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_challenge_times_out() {
        let (client_end, _server_end) = duplex(1024);
        let err = GatewayClient::connect_over(client_end, None, TIMEOUT)
            .await
            .err()
            .expect("handshake must fail");
        assert!(matches!(err, GatewayError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn calls_after_close_are_rejected() {
        let (stream, _) = fake_gateway(|_, _| Reply::Ok(json!([])));
        let client = GatewayClient::connect_over(stream, None, TIMEOUT).await.unwrap();
        client.close().await;
        client.close().await;
        let err = client.cron_list(CronListOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected));
    }

    #[tokio::test]
    async fn out_of_order_responses_are_correlated() {
        let (client_end, server_end) = duplex(64 * 1024);
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_end);
            write.write_all(&Frame::challenge("n").encode().unwrap()).await.unwrap();
            let mut lines = BufReader::new(read).lines();
            let mut held = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let Frame::Req { id, method, params } = Frame::decode(&line).unwrap() else {
                    continue;
                };
                if method == METHOD_CONNECT {
                    write.write_all(&Frame::ok(id, json!({})).encode().unwrap()).await.unwrap();
                    continue;
                }
                held.push((id, params["id"].clone()));
                if held.len() == 2 {
                    for (id, job) in held.drain(..).rev() {
                        let frame = Frame::ok(id, json!({ "echo": job }));
                        write.write_all(&frame.encode().unwrap()).await.unwrap();
                    }
                }
            }
        });

        let client = GatewayClient::connect_over(client_end, None, Duration::from_secs(5))
            .await
            .unwrap();
        let (a, b) = tokio::join!(
            client.call(METHOD_CRON_UPDATE, json!({ "id": "a" })),
            client.call(METHOD_CRON_UPDATE, json!({ "id": "b" })),
        );
        assert_eq!(a.unwrap()["echo"], json!("a"));
        assert_eq!(b.unwrap()["echo"], json!("b"));
    }

    #[tokio::test]
    async fn refused_socket_is_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let resolved = ResolvedGateway {
            endpoint: Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            credential: None,
            timeout: Duration::from_secs(2),
        };
        let err = probe(&resolved).await.unwrap_err();
        assert!(matches!(err, GatewayError::Connection { .. }), "got {err:?}");
        assert!(err.is_unreachable());
    }
}
