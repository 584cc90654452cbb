//! Scripted transport session for client tests.

use comm_transport::{
    ActivityTimestamps, MetaKey, MetaValue, Outbound, PendingSend, SendCompleter, SendResult,
    SessionMeta, TransportError, TransportSession,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the next send resolves
pub enum Script {
    /// Resolve before `send` returns
    Resolve(SendResult),
    /// Stay pending until the test completes it
    Pending,
}

impl Script {
    pub fn ok() -> Self {
        Script::Resolve(Ok(()))
    }

    pub fn fail(err: TransportError) -> Self {
        Script::Resolve(Err(Arc::new(err)))
    }
}

#[derive(Debug, Default)]
pub struct MockSession {
    script: Mutex<VecDeque<Script>>,
    completers: Mutex<VecDeque<SendCompleter>>,
    issued: Mutex<Vec<PendingSend>>,
    sends: AtomicUsize,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    meta: SessionMeta,
    activity: Mutex<Option<ActivityTimestamps>>,
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Script::Resolve(res) => f.debug_tuple("Resolve").field(res).finish(),
            Script::Pending => f.write_str("Pending"),
        }
    }
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, script: Script) {
        self.script.lock().unwrap().push_back(script);
    }

    /// Resolve the oldest pending send
    pub fn complete_next(&self, result: SendResult) -> bool {
        let completer = self.completers.lock().unwrap().pop_front();
        completer.map(|c| c.complete(result)).unwrap_or(false)
    }

    /// Most recent operation handed out by `send`
    pub fn last_issued(&self) -> Option<PendingSend> {
        self.issued.lock().unwrap().last().cloned()
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn set_activity(&self, ts: ActivityTimestamps) {
        *self.activity.lock().unwrap() = Some(ts);
    }

    fn stamps(&self) -> ActivityTimestamps {
        self.activity.lock().unwrap().unwrap_or(ActivityTimestamps {
            last_receive: Duration::ZERO,
            last_send_schedule: Duration::ZERO,
            last_send: Duration::ZERO,
        })
    }
}

impl TransportSession for MockSession {
    fn id(&self) -> u64 {
        7
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn send(&self, _payload: Outbound) -> PendingSend {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().pop_front().unwrap_or(Script::Pending);

        let pending = match script {
            Script::Resolve(res) => PendingSend::resolved(res),
            Script::Pending => {
                let (pending, completer) = PendingSend::new();
                self.completers.lock().unwrap().push_back(completer);
                pending
            }
        };
        self.issued.lock().unwrap().push(pending.clone());
        pending
    }

    fn close(&self) -> bool {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn attach(&self, key: MetaKey, value: MetaValue) -> Option<MetaValue> {
        self.meta.attach(key, value)
    }

    fn remove(&self, key: MetaKey) -> Option<MetaValue> {
        self.meta.remove(key)
    }

    fn meta(&self, key: MetaKey) -> Option<MetaValue> {
        self.meta.get_raw(key)
    }

    fn last_receive_time(&self) -> Duration {
        self.stamps().last_receive
    }

    fn last_send_schedule_time(&self) -> Duration {
        self.stamps().last_send_schedule
    }

    fn last_send_time(&self) -> Duration {
        self.stamps().last_send
    }
}
