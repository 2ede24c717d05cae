//! JSON-RPC over WebSocket
//!
//! One socket per transport. A writer task drains an outgoing queue; a reader
//! task routes responses to waiting requests by id and status notifications to
//! their subscriptions. When the socket closes every pending request and every
//! open subscription is failed.
//!
//! A submission whose caller stopped waiting (request timeout) may still be
//! accepted by the node later. The reader task unwatches such subscriptions
//! as soon as their id arrives.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bucket_core::types::{from_hex, to_hex};
use bucket_core::{StorageKey, H256};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::error::{ChainError, Result};
use super::transport::{
    Connector, Header, LedgerTransport, NodeHealth, RuntimeVersion, StatusSubscription, TxStatus,
};

const METHOD_EXTRINSIC_UPDATE: &str = "author_extrinsicUpdate";
const METHOD_UNWATCH: &str = "author_unwatchExtrinsic";

enum Pending {
    Call(oneshot::Sender<Result<Value>>),
    Subscribe(oneshot::Sender<Result<StatusSubscription>>),
}

struct SubscriptionSink {
    statuses: mpsc::UnboundedSender<TxStatus>,
    errors: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Shared {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    subscriptions: Mutex<HashMap<String, SubscriptionSink>>,
    /// Submit requests that timed out before the node answered
    expired: Mutex<HashSet<u64>>,
    closed: AtomicBool,
}

impl Shared {
    fn request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn request_frame(id: u64, method: &str, params: Value) -> Message {
    let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
    Message::Text(body.to_string())
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: Value,
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
struct RpcMessage {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcError>,
    method: Option<String>,
    params: Option<NotificationParams>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcHeader {
    parent_hash: H256,
    number: String,
}

fn subscription_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn from_value<T: DeserializeOwned>(v: Value) -> Result<T> {
    serde_json::from_value(v).map_err(|e| ChainError::Decode(e.to_string()))
}

fn hex_value(v: Value) -> Result<Option<Vec<u8>>> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(from_hex(&s)?)),
        other => Err(ChainError::Decode(format!("expected hex string, got {}", other))),
    }
}

fn hash_value(v: Value) -> Result<Option<H256>> {
    match v {
        Value::Null => Ok(None),
        other => from_value(other).map(Some),
    }
}

/// WebSocket JSON-RPC client for one ledger endpoint
pub struct WsTransport {
    address: String,
    outgoing: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    request_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl WsTransport {
    /// Open a socket to `address` (`ws://` or `wss://`)
    pub async fn connect(address: &str, request_timeout: Duration) -> Result<Self> {
        let url = Url::parse(address)
            .map_err(|e| ChainError::Config(format!("invalid rpc address {}: {}", address, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ChainError::Config(format!(
                "rpc address must use ws:// or wss://, got {}",
                address
            )));
        }

        let (stream, _) = timeout(request_timeout, connect_async(address))
            .await
            .map_err(|_| ChainError::connection(format!("connect to {} timed out", address)))?
            .map_err(|e| ChainError::connection(format!("connect to {} failed: {}", address, e)))?;

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut queue) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(Shared::default());

        let writer = tokio::spawn(async move {
            while let Some(msg) = queue.recv().await {
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        let reader_outgoing = outgoing.clone();
        let reader_address = address.to_string();
        let reader = tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => receive(&reader_shared, &reader_outgoing, &text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => receive(&reader_shared, &reader_outgoing, &text),
                        Err(_) => warn!("Ignoring non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(address = %reader_address, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
            close(&reader_shared, &reader_address);
        });

        info!(address = %address, "Connected to ledger node");

        Ok(Self {
            address: address.to_string(),
            outgoing,
            shared,
            request_timeout,
            tasks: vec![writer, reader],
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn send(&self, method: &str, params: Value, pending: Pending) -> Result<u64> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ChainError::connection(format!("connection to {} closed", self.address)));
        }
        let id = self.shared.request_id();
        self.shared.pending.lock().insert(id, pending);

        trace!(id, method, "RPC request");
        if self.outgoing.send(request_frame(id, method, params)).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(ChainError::connection("writer task stopped"));
        }
        Ok(id)
    }

    async fn await_reply<T>(&self, id: u64, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        match timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ChainError::connection("connection closed before reply")),
            Err(_) => {
                if let Some(Pending::Subscribe(_)) = self.shared.pending.lock().remove(&id) {
                    self.shared.expired.lock().insert(id);
                }
                Err(ChainError::connection(format!(
                    "request {} timed out after {:?}",
                    id, self.request_timeout
                )))
            }
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let id = self.send(method, params, Pending::Call(tx))?;
        self.await_reply(id, rx).await
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Route one incoming frame and unwatch any subscription nobody waits for
fn receive(shared: &Shared, outgoing: &mpsc::UnboundedSender<Message>, text: &str) {
    let Some(orphan) = dispatch(shared, text) else {
        return;
    };
    debug!(subscription = %orphan, "Unwatching subscription of an abandoned submission");
    let frame = request_frame(shared.request_id(), METHOD_UNWATCH, json!([orphan]));
    if outgoing.send(frame).is_err() {
        warn!(subscription = %orphan, "Writer stopped, subscription left open");
    }
}

/// Route one incoming frame
///
/// Returns the id of a subscription the node opened for a submission whose
/// caller is gone; the caller of `dispatch` must unwatch it.
fn dispatch(shared: &Shared, text: &str) -> Option<String> {
    let msg: RpcMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed RPC message");
            return None;
        }
    };

    if let Some(id) = msg.id {
        let Some(pending) = shared.pending.lock().remove(&id) else {
            if shared.expired.lock().remove(&id) && msg.error.is_none() {
                return msg.result.as_ref().and_then(subscription_id);
            }
            debug!(id, "Reply for unknown or expired request");
            return None;
        };
        let reply = match msg.error {
            Some(err) => Err(ChainError::connection(format!(
                "rpc error {}: {}",
                err.code, err.message
            ))),
            None => Ok(msg.result.unwrap_or(Value::Null)),
        };
        match pending {
            Pending::Call(tx) => {
                let _ = tx.send(reply);
            }
            Pending::Subscribe(tx) => {
                let subscription = reply.and_then(|v| {
                    let id = subscription_id(&v).ok_or_else(|| {
                        ChainError::Decode(format!("bad subscription id {}", v))
                    })?;
                    let (status_tx, statuses) = mpsc::unbounded_channel();
                    let (error_tx, errors) = mpsc::unbounded_channel();
                    shared.subscriptions.lock().insert(
                        id.clone(),
                        SubscriptionSink {
                            statuses: status_tx,
                            errors: error_tx,
                        },
                    );
                    Ok(StatusSubscription {
                        id,
                        statuses,
                        errors,
                    })
                });
                // Waiter timed out between the reply and this point
                if let Err(Ok(orphan)) = tx.send(subscription) {
                    shared.subscriptions.lock().remove(&orphan.id);
                    return Some(orphan.id);
                }
            }
        }
        return None;
    }

    if msg.method.as_deref() != Some(METHOD_EXTRINSIC_UPDATE) {
        return None;
    }
    let params = msg.params?;
    let sub_id = subscription_id(&params.subscription)?;

    let subscriptions = shared.subscriptions.lock();
    let Some(sink) = subscriptions.get(&sub_id) else {
        trace!(subscription = %sub_id, "Update for released subscription");
        return None;
    };
    match serde_json::from_value::<TxStatus>(params.result) {
        Ok(status) => {
            trace!(subscription = %sub_id, ?status, "Extrinsic status");
            let _ = sink.statuses.send(status);
        }
        Err(e) => {
            let _ = sink.errors.send(format!("undecodable status update: {}", e));
        }
    }
    None
}

fn close(shared: &Shared, address: &str) {
    shared.closed.store(true, Ordering::Release);
    shared.expired.lock().clear();

    let pending: Vec<_> = shared.pending.lock().drain().collect();
    for (_, p) in pending {
        let err = ChainError::connection(format!("connection to {} closed", address));
        match p {
            Pending::Call(tx) => {
                let _ = tx.send(Err(err));
            }
            Pending::Subscribe(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }

    for (_, sink) in shared.subscriptions.lock().drain() {
        let _ = sink.errors.send(format!("connection to {} closed", address));
    }
    warn!(address = %address, "Ledger connection closed");
}

#[async_trait]
impl LedgerTransport for WsTransport {
    async fn metadata(&self) -> Result<Vec<u8>> {
        hex_value(self.request("state_getMetadata", json!([])).await?)?
            .ok_or_else(|| ChainError::Decode("empty metadata".to_string()))
    }

    async fn genesis_hash(&self) -> Result<H256> {
        hash_value(self.request("chain_getBlockHash", json!([0])).await?)?
            .ok_or_else(|| ChainError::Decode("node has no genesis block".to_string()))
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion> {
        from_value(self.request("state_getRuntimeVersion", json!([])).await?)
    }

    async fn storage(&self, key: &StorageKey, at: Option<H256>) -> Result<Option<Vec<u8>>> {
        let params = match at {
            Some(hash) => json!([key.to_hex(), hash.to_hex()]),
            None => json!([key.to_hex()]),
        };
        hex_value(self.request("state_getStorage", params).await?)
    }

    async fn block_hash(&self, number: Option<u64>) -> Result<Option<H256>> {
        let params = match number {
            Some(n) => json!([n]),
            None => json!([]),
        };
        hash_value(self.request("chain_getBlockHash", params).await?)
    }

    async fn header(&self, hash: Option<H256>) -> Result<Option<Header>> {
        let params = match hash {
            Some(h) => json!([h.to_hex()]),
            None => json!([]),
        };
        let value = self.request("chain_getHeader", params).await?;
        if value.is_null() {
            return Ok(None);
        }
        let header: RpcHeader = from_value(value)?;
        let number = u64::from_str_radix(header.number.trim_start_matches("0x"), 16)
            .map_err(|e| ChainError::Decode(format!("bad block number {}: {}", header.number, e)))?;
        Ok(Some(Header {
            number,
            parent_hash: header.parent_hash,
        }))
    }

    async fn health(&self) -> Result<NodeHealth> {
        from_value(self.request("system_health", json!([])).await?)
    }

    async fn submit_and_watch(&self, extrinsic: Vec<u8>) -> Result<StatusSubscription> {
        let (tx, rx) = oneshot::channel();
        let id = self.send(
            "author_submitAndWatchExtrinsic",
            json!([to_hex(&extrinsic)]),
            Pending::Subscribe(tx),
        )?;
        self.await_reply(id, rx).await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.shared.subscriptions.lock().remove(subscription_id);
        match self
            .request(METHOD_UNWATCH, json!([subscription_id]))
            .await
        {
            Ok(_) => Ok(()),
            // The node drops subscriptions on its own once a status is final
            Err(ChainError::Connection(msg)) if msg.starts_with("rpc error") => {
                debug!(subscription = %subscription_id, error = %msg, "Unwatch refused");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Opens [`WsTransport`] connections
#[derive(Debug, Clone)]
pub struct WsConnector {
    pub request_timeout: Duration,
}

impl WsConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn LedgerTransport>> {
        let transport = WsTransport::connect(address, self.request_timeout).await?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_with_call(id: u64) -> (Shared, oneshot::Receiver<Result<Value>>) {
        let shared = Shared::default();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().insert(id, Pending::Call(tx));
        (shared, rx)
    }

    #[test]
    fn test_dispatch_routes_reply_by_id() {
        let (shared, mut rx) = shared_with_call(7);
        dispatch(&shared, r#"{"jsonrpc":"2.0","id":7,"result":"0x01"}"#);
        assert_eq!(rx.try_recv().unwrap().unwrap(), Value::String("0x01".into()));
        assert!(shared.pending.lock().is_empty());
    }

    #[test]
    fn test_dispatch_rpc_error() {
        let (shared, mut rx) = shared_with_call(3);
        dispatch(
            &shared,
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":1010,"message":"Invalid Transaction"}}"#,
        );
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, ChainError::Connection(msg) if msg.contains("1010")));
    }

    #[test]
    fn test_subscription_registered_before_updates() {
        let shared = Shared::default();
        let (tx, mut rx) = oneshot::channel();
        shared.pending.lock().insert(1, Pending::Subscribe(tx));

        dispatch(&shared, r#"{"jsonrpc":"2.0","id":1,"result":"sub-9"}"#);
        dispatch(
            &shared,
            r#"{"jsonrpc":"2.0","method":"author_extrinsicUpdate","params":{"subscription":"sub-9","result":"ready"}}"#,
        );

        let mut sub = rx.try_recv().unwrap().unwrap();
        assert_eq!(sub.id, "sub-9");
        assert_eq!(sub.statuses.try_recv().unwrap(), TxStatus::Ready);
    }

    #[test]
    fn test_close_fails_pending_and_subscriptions() {
        let (shared, mut rx) = shared_with_call(5);
        let (status_tx, _statuses) = mpsc::unbounded_channel();
        let (error_tx, mut errors) = mpsc::unbounded_channel();
        shared.subscriptions.lock().insert(
            "s".to_string(),
            SubscriptionSink {
                statuses: status_tx,
                errors: error_tx,
            },
        );

        close(&shared, "ws://node");

        assert!(rx.try_recv().unwrap().is_err());
        assert!(errors.try_recv().unwrap().contains("closed"));
        assert!(shared.closed.load(Ordering::Acquire));
    }

    #[test]
    fn test_hex_values() {
        assert_eq!(hex_value(Value::Null).unwrap(), None);
        assert_eq!(
            hex_value(Value::String("0x0102".into())).unwrap(),
            Some(vec![1, 2])
        );
        assert!(hex_value(json!(5)).is_err());
    }

    #[test]
    fn test_late_subscription_reply_is_orphaned() {
        let shared = Shared::default();
        shared.expired.lock().insert(4);

        let orphan = dispatch(&shared, r#"{"jsonrpc":"2.0","id":4,"result":"sub-late"}"#);
        assert_eq!(orphan.as_deref(), Some("sub-late"));
        assert!(shared.expired.lock().is_empty());
        assert!(shared.subscriptions.lock().is_empty());

        // Only once, and never for plain unknown ids
        assert_eq!(
            dispatch(&shared, r#"{"jsonrpc":"2.0","id":4,"result":"sub-late"}"#),
            None
        );
        assert_eq!(
            dispatch(&shared, r#"{"jsonrpc":"2.0","id":8,"result":"sub-8"}"#),
            None
        );
    }

    #[test]
    fn test_subscription_for_gone_waiter_is_orphaned() {
        let shared = Shared::default();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().insert(2, Pending::Subscribe(tx));
        drop(rx);

        let orphan = dispatch(&shared, r#"{"jsonrpc":"2.0","id":2,"result":"sub-2"}"#);
        assert_eq!(orphan.as_deref(), Some("sub-2"));
        assert!(shared.subscriptions.lock().is_empty());
    }

    mod socket {
        use super::*;
        use crate::chain::builder::{AccountIdentity, Call, SignOptions};
        use crate::chain::engine::{
            ConfirmationOutcome, ConfirmationRule, EventExpectation, SubmissionEngine,
        };
        use crate::chain::mock::{runtime_metadata, MockLedger};
        use crate::chain::session::Session;
        use crate::chain::types::{names, AccountInfo};
        use bucket_core::events::encode_log;
        use bucket_core::{AccountId32, Value as FieldValue};
        use parity_scale_codec::Encode;
        use tokio::net::TcpListener;
        use tokio_tungstenite::accept_async;

        const SUB_ID: &str = "sub-1";

        fn genesis() -> H256 {
            H256([7u8; 32])
        }

        fn block() -> H256 {
            H256([0xbb; 32])
        }

        /// Node behavior once a submission arrives
        #[derive(Clone, Copy)]
        enum AfterSubmit {
            /// Ready, then in block
            Include,
            /// Ready, then the socket closes
            Hangup,
            /// Answer the submit request only after this delay
            ReplyLate(Duration),
        }

        fn reply(id: &Value, result: Value) -> Message {
            Message::Text(json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string())
        }

        fn update(status: Value) -> Message {
            Message::Text(
                json!({
                    "jsonrpc": "2.0",
                    "method": METHOD_EXTRINSIC_UPDATE,
                    "params": { "subscription": SUB_ID, "result": status },
                })
                .to_string(),
            )
        }

        /// A single-connection JSON-RPC node that records every request
        struct ScriptedNode {
            address: String,
            requests: Arc<Mutex<Vec<Value>>>,
        }

        impl ScriptedNode {
            async fn start(after_submit: AfterSubmit, event_log: Vec<u8>) -> Self {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let address = format!("ws://{}", listener.local_addr().unwrap());
                let requests = Arc::new(Mutex::new(Vec::new()));
                let log = requests.clone();

                tokio::spawn(async move {
                    let (stream, _) = listener.accept().await.unwrap();
                    let mut ws = accept_async(stream).await.unwrap();
                    let account = AccountInfo {
                        providers: 1,
                        ..Default::default()
                    };

                    while let Some(Ok(msg)) = ws.next().await {
                        let Message::Text(text) = msg else {
                            continue;
                        };
                        let request: Value = serde_json::from_str(&text).unwrap();
                        log.lock().push(request.clone());
                        let id = &request["id"];
                        let params = request["params"].as_array().cloned().unwrap_or_default();

                        let frames = match request["method"].as_str().unwrap_or_default() {
                            "state_getMetadata" => vec![reply(id, json!(to_hex(&runtime_metadata())))],
                            "chain_getBlockHash" => vec![reply(id, json!(genesis().to_hex()))],
                            "state_getRuntimeVersion" => vec![reply(
                                id,
                                json!({ "specVersion": 100, "transactionVersion": 1 }),
                            )],
                            // Account lookups carry no block hash, event reads do
                            "state_getStorage" if params.len() == 2 => {
                                vec![reply(id, json!(to_hex(&event_log)))]
                            }
                            "state_getStorage" => vec![reply(id, json!(to_hex(&account.encode())))],
                            "author_submitAndWatchExtrinsic" => match after_submit {
                                AfterSubmit::Include => vec![
                                    reply(id, json!(SUB_ID)),
                                    update(json!("ready")),
                                    update(json!({ "inBlock": block().to_hex() })),
                                ],
                                AfterSubmit::Hangup => {
                                    ws.send(reply(id, json!(SUB_ID))).await.unwrap();
                                    ws.send(update(json!("ready"))).await.unwrap();
                                    let _ = ws.close(None).await;
                                    return;
                                }
                                AfterSubmit::ReplyLate(delay) => {
                                    tokio::time::sleep(delay).await;
                                    vec![reply(id, json!(SUB_ID))]
                                }
                            },
                            METHOD_UNWATCH => vec![reply(id, json!(true))],
                            _ => vec![reply(id, Value::Null)],
                        };

                        for frame in frames {
                            if ws.send(frame).await.is_err() {
                                return;
                            }
                        }
                    }
                });

                Self { address, requests }
            }

            fn unwatch_requests(&self) -> Vec<Value> {
                self.requests
                    .lock()
                    .iter()
                    .filter(|r| r["method"] == METHOD_UNWATCH)
                    .map(|r| r["params"].clone())
                    .collect()
            }
        }

        async fn engine(node: &ScriptedNode, request_timeout: Duration) -> SubmissionEngine {
            let connector = Arc::new(WsConnector::new(request_timeout));
            let session = Session::connect(connector, &node.address).await.unwrap();
            assert_eq!(session.facts().genesis_hash, genesis());
            SubmissionEngine::new(Arc::new(session))
        }

        fn registered_log(acc: &AccountId32) -> Vec<u8> {
            let ledger = MockLedger::new();
            let record = ledger
                .event_record(names::SMINER, names::REGISTERED, &(acc, 100u128).encode())
                .unwrap();
            encode_log(&[record])
        }

        fn registered_rule(acc: &AccountId32) -> ConfirmationRule {
            ConfirmationRule::Event(
                EventExpectation::new(names::SMINER, names::REGISTERED)
                    .where_field("acc", FieldValue::AccountId(*acc)),
            )
        }

        #[tokio::test]
        async fn test_confirmed_over_socket_unwatches_once() {
            let identity = AccountIdentity::from_seed([1u8; 32]);
            let acc = *identity.account();
            let node = ScriptedNode::start(AfterSubmit::Include, registered_log(&acc)).await;
            let engine = engine(&node, Duration::from_secs(5)).await;

            let call = Call::new(names::SMINER, names::EXIT_MINER);
            let signed = engine
                .builder()
                .build(&identity, call, &SignOptions::default())
                .await
                .unwrap();
            let outcome = engine
                .submit(signed, &registered_rule(&acc), Duration::from_secs(5))
                .await;

            assert_eq!(outcome, ConfirmationOutcome::Confirmed(block()));
            assert_eq!(node.unwatch_requests(), vec![json!([SUB_ID])]);
        }

        #[tokio::test]
        async fn test_socket_close_while_waiting_is_subscription_error() {
            let identity = AccountIdentity::from_seed([2u8; 32]);
            let acc = *identity.account();
            let node = ScriptedNode::start(AfterSubmit::Hangup, Vec::new()).await;
            let engine = engine(&node, Duration::from_secs(5)).await;

            let signed = engine
                .builder()
                .build(
                    &identity,
                    Call::new(names::SMINER, names::EXIT_MINER),
                    &SignOptions::default(),
                )
                .await
                .unwrap();
            let outcome = engine
                .submit(signed, &registered_rule(&acc), Duration::from_secs(5))
                .await;

            assert!(
                matches!(outcome, ConfirmationOutcome::SubscriptionError(_)),
                "unexpected outcome {:?}",
                outcome
            );
            assert!(outcome.is_ambiguous());
        }

        #[tokio::test]
        async fn test_late_submit_reply_is_unwatched() {
            let identity = AccountIdentity::from_seed([3u8; 32]);
            let node = ScriptedNode::start(
                AfterSubmit::ReplyLate(Duration::from_millis(600)),
                Vec::new(),
            )
            .await;
            let engine = engine(&node, Duration::from_millis(200)).await;

            let signed = engine
                .builder()
                .build(
                    &identity,
                    Call::new(names::SMINER, names::EXIT_MINER),
                    &SignOptions::default(),
                )
                .await
                .unwrap();
            let outcome = engine
                .submit(
                    signed,
                    &ConfirmationRule::InclusionOnly,
                    Duration::from_secs(5),
                )
                .await;
            match &outcome {
                ConfirmationOutcome::ConnectionError(msg) => assert!(msg.contains("timed out")),
                other => panic!("unexpected outcome {:?}", other),
            }

            let mut unwatched = Vec::new();
            for _ in 0..100 {
                unwatched = node.unwatch_requests();
                if !unwatched.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert_eq!(unwatched, vec![json!([SUB_ID])]);
        }
    }
}
