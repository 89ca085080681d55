//! A single relay connection: connect/reconnect state machine, ping
//! keepalive, and the publish/subscribe surface built on top of a raw
//! WebSocket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use nostr_core::{Event, Request, Subscription};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::message_pool::MessagePool;

const PING_INTERVAL: Duration = Duration::from_secs(60);
const PING_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_SLEEP: Duration = Duration::from_secs(1);
const RECONNECT_CEILING: Duration = Duration::from_secs(30);
const PING_PAYLOAD: &[u8] = b"2";
/// An `error_threshold` of zero means retry forever.
const UNBOUNDED_ERROR_THRESHOLD: u32 = 0;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// What a relay connection is permitted to do. A read-only relay never
/// sends `EVENT`/`REQ`; a write-only relay never files incoming frames
/// into the pool.
#[derive(Debug, Clone, Copy)]
pub struct RelayPolicy {
    pub should_read: bool,
    pub should_write: bool,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        RelayPolicy { should_read: true, should_write: true }
    }
}

/// TLS and proxy knobs for the underlying connection. Verification is on by
/// default; `insecure_skip_verify` is an explicit, named opt-out rather than
/// a silent default, since failing closed is the safer default for a relay
/// that may carry a user's private events.
#[derive(Debug, Clone, Default)]
pub struct RelayProxyConfig {
    pub proxy_url: Option<String>,
    pub insecure_skip_verify: bool,
}

struct Shared {
    url: String,
    policy: RelayPolicy,
    proxy_config: RelayProxyConfig,
    message_pool: MessagePool,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    status: RwLock<RelayStatus>,
    outbound_tx: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    error_threshold: u32,
    errors_seen: RwLock<u32>,
}

/// One connection to one relay URL. Cheap to `Clone`: every clone shares
/// the same background task and state.
#[derive(Clone)]
pub struct Relay {
    shared: Arc<Shared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Relay {
    /// `error_threshold` caps how many consecutive connect/stream failures
    /// this relay tolerates before giving up and going `Closed`; `0` means
    /// retry forever.
    pub fn new(
        url: impl Into<String>,
        policy: RelayPolicy,
        proxy_config: RelayProxyConfig,
        error_threshold: u32,
        message_pool: MessagePool,
    ) -> Self {
        Relay {
            shared: Arc::new(Shared {
                url: url.into(),
                policy,
                proxy_config,
                message_pool,
                subscriptions: RwLock::new(HashMap::new()),
                status: RwLock::new(RelayStatus::Idle),
                outbound_tx: RwLock::new(None),
                error_threshold,
                errors_seen: RwLock::new(0),
            }),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn policy(&self) -> RelayPolicy {
        self.shared.policy
    }

    pub async fn status(&self) -> RelayStatus {
        *self.shared.status.read().await
    }

    /// Opens the connection and spawns the background read/write/ping loop.
    /// A no-op if already connected.
    pub async fn connect(&self) {
        if matches!(self.status().await, RelayStatus::Connected | RelayStatus::Connecting) {
            return;
        }
        *self.shared.status.write().await = RelayStatus::Connecting;

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move { run(shared).await });
        *self.task.lock().await = Some(handle);
    }

    pub async fn close(&self) {
        *self.shared.status.write().await = RelayStatus::Closed;
        if let Some(tx) = self.shared.outbound_tx.write().await.take() {
            let _ = tx.send(Message::Close(None));
        }
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    fn send_frame(&self, frame: Value) -> Result<()> {
        let tx_guard = self.shared.outbound_tx.try_read().map_err(|_| RelayError::NotConnected)?;
        let tx = tx_guard.as_ref().ok_or(RelayError::NotConnected)?;
        tx.send(Message::Text(frame.to_string())).map_err(|_| RelayError::NotConnected)
    }

    /// Publishes `event`. The event must already be signed and its
    /// signature must verify; an unsigned or forged event is rejected
    /// locally rather than sent to the relay.
    pub async fn publish(&self, event: &Event) -> Result<()> {
        if event.signature.is_none() {
            return Err(RelayError::EventNotSigned);
        }
        if !event.verify() {
            return Err(RelayError::SignatureVerificationFailed);
        }
        if !self.shared.policy.should_write {
            return Err(RelayError::NotConnected);
        }
        self.send_frame(nostr_core::request::event_message(event))
    }

    /// Registers `subscription` locally without sending a `REQ` frame. Use
    /// this to track a subscription the caller intends to open on some
    /// other relay, or to pre-register state before a connection exists.
    pub async fn register_subscription(&self, subscription: Subscription) {
        self.shared.subscriptions.write().await.insert(subscription.id.clone(), subscription);
    }

    /// Registers `subscription` and sends the `REQ` frame — the variant
    /// that actually asks the relay to start streaming matching events.
    pub async fn add_subscription(&self, subscription: Subscription) -> Result<()> {
        let request = Request::from_subscription(&subscription);
        self.register_subscription(subscription).await;
        self.send_frame(request.to_message())
    }

    pub async fn update_subscription(&self, subscription: Subscription) -> Result<()> {
        if !self.shared.subscriptions.read().await.contains_key(&subscription.id) {
            return Err(RelayError::UnknownSubscription(subscription.id));
        }
        self.add_subscription(subscription).await
    }

    pub async fn close_subscription(&self, subscription_id: &str) -> Result<()> {
        if self.shared.subscriptions.write().await.remove(subscription_id).is_none() {
            return Err(RelayError::UnknownSubscription(subscription_id.to_string()));
        }
        self.send_frame(nostr_core::request::close_message(subscription_id))
    }

    pub async fn subscription_ids(&self) -> Vec<String> {
        self.shared.subscriptions.read().await.keys().cloned().collect()
    }
}

/// Structural validation of a raw relay frame, independent of whether the
/// message pool can further process its contents.
fn is_valid_message(raw: &Value) -> bool {
    let Some(frame) = raw.as_array() else { return false };
    let Some(tag) = frame.first().and_then(Value::as_str) else { return false };
    match nostr_core::RelayMessageType::parse(tag) {
        Some(nostr_core::RelayMessageType::Event) => frame.len() == 3,
        Some(nostr_core::RelayMessageType::Notice) => frame.len() == 2,
        Some(nostr_core::RelayMessageType::Eose) => frame.len() == 2,
        Some(nostr_core::RelayMessageType::Ok) => frame.len() == 4,
        None => false,
    }
}

/// A certificate verifier that accepts anything. Only reachable through
/// `RelayProxyConfig::insecure_skip_verify`, which defaults to `false`.
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

fn insecure_tls_connector() -> Connector {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("rustls's default protocol versions are always supported")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        .with_no_client_auth();
    Connector::Rustls(Arc::new(config))
}

/// Opens a raw TCP connection to `host:port`, routed through
/// `proxy_config.proxy_url` via an HTTP `CONNECT` tunnel when set.
async fn open_tcp_stream(proxy_config: &RelayProxyConfig, host: &str, port: u16) -> std::result::Result<TcpStream, RelayError> {
    match &proxy_config.proxy_url {
        Some(proxy_url) => connect_through_proxy(proxy_url, host, port).await,
        None => Ok(TcpStream::connect((host, port)).await?),
    }
}

async fn connect_through_proxy(proxy_url: &str, host: &str, port: u16) -> std::result::Result<TcpStream, RelayError> {
    let proxy_uri: Uri = proxy_url
        .parse()
        .map_err(|e| RelayError::InvalidMessage(format!("invalid proxy_url `{proxy_url}`: {e}")))?;
    let proxy_host = proxy_uri
        .host()
        .ok_or_else(|| RelayError::InvalidMessage(format!("proxy_url `{proxy_url}` is missing a host")))?;
    let proxy_port = proxy_uri.port_u16().unwrap_or(8080);

    let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;
    let connect_request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream.write_all(connect_request.as_bytes()).await?;

    let mut response = [0u8; 512];
    let n = stream.read(&mut response).await?;
    let status_line = String::from_utf8_lossy(&response[..n]);
    if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
        let first_line = status_line.lines().next().unwrap_or_default();
        return Err(RelayError::WebSocket(format!("proxy CONNECT to {host}:{port} failed: {first_line}")));
    }
    Ok(stream)
}

/// Establishes the WebSocket connection for `shared.url`, honoring
/// `proxy_config.proxy_url` and `proxy_config.insecure_skip_verify`.
async fn open_stream(shared: &Shared) -> std::result::Result<WsStream, RelayError> {
    let uri: Uri = shared
        .url
        .parse()
        .map_err(|e| RelayError::InvalidMessage(format!("invalid relay url `{}`: {e}", shared.url)))?;
    let host = uri
        .host()
        .ok_or_else(|| RelayError::InvalidMessage(format!("relay url `{}` is missing a host", shared.url)))?
        .to_string();
    let is_tls = uri.scheme_str() == Some("wss");
    let port = uri.port_u16().unwrap_or(if is_tls { 443 } else { 80 });

    let tcp = open_tcp_stream(&shared.proxy_config, &host, port).await?;

    let connector = if shared.proxy_config.insecure_skip_verify {
        Some(insecure_tls_connector())
    } else {
        None
    };

    let (ws_stream, _response) = tokio_tungstenite::client_async_tls_with_config(&shared.url, tcp, None, connector).await?;
    Ok(ws_stream)
}

async fn run(shared: Arc<Shared>) {
    let deadline = Instant::now() + RECONNECT_CEILING;

    loop {
        if Instant::now() > deadline {
            warn!(url = %shared.url, "relay: giving up after reconnection ceiling elapsed");
            *shared.status.write().await = RelayStatus::Closed;
            return;
        }

        match open_stream(&shared).await {
            Ok(ws_stream) => {
                info!(url = %shared.url, "relay: connected");
                *shared.status.write().await = RelayStatus::Connected;
                *shared.errors_seen.write().await = 0;

                let (mut sink, mut stream) = ws_stream.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
                *shared.outbound_tx.write().await = Some(tx);

                let mut ping_interval = tokio::time::interval(PING_INTERVAL);
                ping_interval.tick().await;

                loop {
                    tokio::select! {
                        incoming = stream.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    if shared.policy.should_read {
                                        handle_inbound_text(&shared, &text).await;
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    debug!(url = %shared.url, "relay: connection closed by peer");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(url = %shared.url, error = %e, "relay: stream error");
                                    break;
                                }
                            }
                        }
                        outgoing = rx.recv() => {
                            match outgoing {
                                Some(Message::Close(frame)) => {
                                    let _ = sink.send(Message::Close(frame)).await;
                                    break;
                                }
                                Some(msg) => {
                                    if sink.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                        _ = ping_interval.tick() => {
                            let ping = sink.send(Message::Ping(PING_PAYLOAD.to_vec()));
                            if tokio::time::timeout(PING_TIMEOUT, ping).await.is_err() {
                                warn!(url = %shared.url, "relay: ping timed out");
                                break;
                            }
                        }
                    }
                }

                *shared.outbound_tx.write().await = None;
            }
            Err(e) => {
                warn!(url = %shared.url, error = %e, "relay: connect failed");
            }
        }

        if matches!(*shared.status.read().await, RelayStatus::Closed) {
            return;
        }

        if shared.error_threshold != UNBOUNDED_ERROR_THRESHOLD {
            let mut errors_seen = shared.errors_seen.write().await;
            *errors_seen += 1;
            if *errors_seen > shared.error_threshold {
                warn!(url = %shared.url, "relay: error threshold exhausted");
                *shared.status.write().await = RelayStatus::Closed;
                return;
            }
        }

        *shared.status.write().await = RelayStatus::Reconnecting;
        tokio::time::sleep(RECONNECT_SLEEP).await;
        *shared.status.write().await = RelayStatus::Connecting;
    }
}

async fn handle_inbound_text(shared: &Arc<Shared>, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(url = %shared.url, error = %e, "relay: unparseable frame");
            return;
        }
    };

    if !is_valid_message(&value) {
        warn!(url = %shared.url, frame = %value, "relay: rejecting malformed frame");
        return;
    }

    let frame = value.as_array().expect("is_valid_message guarantees an array");
    let tag = frame.first().and_then(Value::as_str).expect("is_valid_message guarantees a type tag");

    if tag == nostr_core::RelayMessageType::Event.as_str() && !validate_inbound_event(shared, frame).await {
        return;
    }

    if let Err(e) = shared.message_pool.process_message(None, &value).await {
        warn!(url = %shared.url, error = %e, "relay: failed to file inbound frame");
    }
}

/// Before an `EVENT` frame reaches the message pool: its subscription must
/// actually be registered on this relay, the embedded event's signature
/// must verify, and the event must match that subscription's filter set.
/// A relay that sends an EVENT for a subscription it was never asked to
/// open, or a forged/off-filter event, gets dropped here rather than
/// delivered to the caller.
async fn validate_inbound_event(shared: &Arc<Shared>, frame: &[Value]) -> bool {
    let Some(subscription_id) = frame.get(1).and_then(Value::as_str) else {
        warn!(url = %shared.url, "relay: EVENT frame missing subscription id");
        return false;
    };
    let Some(event_value) = frame.get(2) else {
        warn!(url = %shared.url, "relay: EVENT frame missing event body");
        return false;
    };

    let filters = {
        let subscriptions = shared.subscriptions.read().await;
        match subscriptions.get(subscription_id) {
            Some(subscription) => subscription.filters.clone(),
            None => {
                warn!(url = %shared.url, subscription_id, "relay: rejecting EVENT for a subscription not registered here");
                return false;
            }
        }
    };

    let event = match nostr_core::Event::from_dict(event_value) {
        Ok(event) => event,
        Err(e) => {
            warn!(url = %shared.url, error = %e, "relay: rejecting malformed EVENT body");
            return false;
        }
    };

    if !event.verify() {
        warn!(url = %shared.url, "relay: rejecting EVENT with an invalid signature");
        return false;
    }

    if !filters.matches(&event) {
        warn!(url = %shared.url, subscription_id, "relay: rejecting EVENT that does not match its subscription's filters");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_relay(policy: RelayPolicy, proxy_config: RelayProxyConfig) -> Relay {
        Relay::new("wss://example.invalid", policy, proxy_config, 5, MessagePool::new())
    }

    #[test]
    fn test_is_valid_message_accepts_well_formed_frames() {
        assert!(is_valid_message(&json!(["NOTICE", "hi"])));
        assert!(is_valid_message(&json!(["EOSE", "s1"])));
        assert!(is_valid_message(&json!(["OK", "abc", true, ""])));
        assert!(is_valid_message(&json!(["EVENT", "s1", {}])));
    }

    #[test]
    fn test_is_valid_message_rejects_wrong_arity() {
        assert!(!is_valid_message(&json!(["EVENT", "s1"])));
        assert!(!is_valid_message(&json!(["NOTICE"])));
    }

    #[test]
    fn test_is_valid_message_rejects_unknown_type() {
        assert!(!is_valid_message(&json!(["BOGUS", "whatever"])));
    }

    #[test]
    fn test_is_valid_message_rejects_non_array() {
        assert!(!is_valid_message(&json!({"type": "EVENT"})));
    }

    #[tokio::test]
    async fn test_publish_rejects_unsigned_event() {
        let relay = test_relay(RelayPolicy::default(), RelayProxyConfig::default());
        let event = nostr_core::Event::new(nostr_core::EventKind::Text, "hi");
        assert!(matches!(relay.publish(&event).await, Err(RelayError::EventNotSigned)));
    }

    #[tokio::test]
    async fn test_close_unknown_subscription_is_an_error() {
        let relay = test_relay(RelayPolicy::default(), RelayProxyConfig::default());
        assert!(matches!(relay.close_subscription("nope").await, Err(RelayError::UnknownSubscription(_))));
    }

    #[tokio::test]
    async fn test_register_subscription_does_not_send_a_frame() {
        let relay = test_relay(RelayPolicy::default(), RelayProxyConfig::default());
        let subscription = Subscription::new("s1", nostr_core::FilterSet::default());
        relay.register_subscription(subscription).await;
        assert_eq!(relay.subscription_ids().await, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_policy_accessor_reflects_constructor_argument() {
        let policy = RelayPolicy { should_read: false, should_write: true };
        let relay = test_relay(policy, RelayProxyConfig::default());
        assert!(!relay.policy().should_read);
        assert!(relay.policy().should_write);
    }

    #[tokio::test]
    async fn test_validate_inbound_event_rejects_unregistered_subscription() {
        let relay = test_relay(RelayPolicy::default(), RelayProxyConfig::default());
        let sk = nostr_core::SecretKey::generate();
        let mut event = nostr_core::Event::new(nostr_core::EventKind::Text, "hi");
        event.sign(&sk).unwrap();
        let frame = json!(["EVENT", "unknown-sub", event.to_dict()]);
        assert!(!validate_inbound_event(&relay.shared, frame.as_array().unwrap()).await);
    }

    #[tokio::test]
    async fn test_validate_inbound_event_rejects_forged_signature() {
        let relay = test_relay(RelayPolicy::default(), RelayProxyConfig::default());
        relay.register_subscription(Subscription::new("s1", nostr_core::FilterSet::default())).await;
        let mut event = nostr_core::Event::new(nostr_core::EventKind::Text, "hi");
        event.pubkey = nostr_core::SecretKey::generate().public_key().hex();
        event.signature = Some(hex::encode([0u8; 64]));
        let frame = json!(["EVENT", "s1", event.to_dict()]);
        assert!(!validate_inbound_event(&relay.shared, frame.as_array().unwrap()).await);
    }

    #[tokio::test]
    async fn test_validate_inbound_event_rejects_non_matching_filter() {
        let relay = test_relay(RelayPolicy::default(), RelayProxyConfig::default());
        let filters = nostr_core::FilterSet(vec![nostr_core::Filter {
            kinds: vec![nostr_core::EventKind::Metadata.as_u64()],
            ..Default::default()
        }]);
        relay.register_subscription(Subscription::new("s1", filters)).await;

        let sk = nostr_core::SecretKey::generate();
        let mut event = nostr_core::Event::new(nostr_core::EventKind::Text, "hi");
        event.sign(&sk).unwrap();
        let frame = json!(["EVENT", "s1", event.to_dict()]);
        assert!(!validate_inbound_event(&relay.shared, frame.as_array().unwrap()).await);
    }

    #[tokio::test]
    async fn test_validate_inbound_event_accepts_matching_signed_event() {
        let relay = test_relay(RelayPolicy::default(), RelayProxyConfig::default());
        let match_all = nostr_core::FilterSet::new(vec![nostr_core::Filter::default()]);
        relay.register_subscription(Subscription::new("s1", match_all)).await;

        let sk = nostr_core::SecretKey::generate();
        let mut event = nostr_core::Event::new(nostr_core::EventKind::Text, "hi");
        event.sign(&sk).unwrap();
        let frame = json!(["EVENT", "s1", event.to_dict()]);
        assert!(validate_inbound_event(&relay.shared, frame.as_array().unwrap()).await);
    }
}
