//! Common test utilities for `Ferry` integration tests.
//!
//! Provides scripted collaborators so the upload protocol can be driven
//! deterministically with paused tokio time.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ferry_core::bus::BusEndpoint;
use ferry_core::file::FilePayload;
use ferry_core::notify::Notifier;
use ferry_core::protocol::TransferMessage;
use ferry_core::scheduler::RecoveryScheduler;
use ferry_core::transport::{ProgressFn, Transport, TransportOutcome};
use ferry_core::{Error, Result};

/// Time a scripted transport spends on each tenth of the payload.
pub const STEP: Duration = Duration::from_millis(100);

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// What a scripted transport does with the next request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Stream everything, answer 200
    Accept,
    /// Stream everything, answer with this status
    Reject(u16),
    /// Lose the connection once this fraction has been sent
    DropAt(f64),
}

/// Transport following a script, one step per request.
///
/// Once the script runs out every request is accepted.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    posts: Mutex<Vec<FilePayload>>,
}

impl ScriptedTransport {
    /// Create a transport answering requests in the given order.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            posts: Mutex::new(Vec::new()),
        })
    }

    /// Create a transport accepting every request.
    pub fn accepting() -> Arc<Self> {
        Self::new(Vec::new())
    }

    /// Number of requests made so far.
    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    /// Payloads of every request made so far.
    pub fn posts(&self) -> Vec<FilePayload> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, file: &FilePayload, progress: ProgressFn) -> Result<TransportOutcome> {
        self.posts.lock().unwrap().push(file.clone());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Accept);

        let cutoff = match step {
            Step::DropAt(fraction) => fraction,
            Step::Accept | Step::Reject(_) => 1.0,
        };

        for tenth in 1..=10 {
            let fraction = f64::from(tenth) / 10.0;
            if fraction > cutoff + f64::EPSILON {
                break;
            }
            tokio::time::sleep(STEP).await;
            progress(fraction);
        }

        match step {
            Step::Accept => Ok(TransportOutcome::Accepted),
            Step::Reject(status) => Ok(TransportOutcome::Rejected { status }),
            Step::DropAt(fraction) => Err(Error::Network(format!(
                "connection reset at {:.0}%",
                fraction * 100.0
            ))),
        }
    }
}

/// Notifier remembering every title it was asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    /// Titles shown so far, in order.
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn display(&self, title: &str) {
        self.shown.lock().unwrap().push(title.to_string());
    }
}

/// Scheduler that rejects a fixed number of registrations and records the rest.
#[derive(Default)]
pub struct ScriptedScheduler {
    rejections: usize,
    calls: AtomicUsize,
    registered: Mutex<Vec<(String, tokio::time::Instant)>>,
}

impl ScriptedScheduler {
    /// Create a scheduler rejecting the first `rejections` registrations.
    pub fn rejecting(rejections: usize) -> Arc<Self> {
        Arc::new(Self {
            rejections,
            ..Self::default()
        })
    }

    /// Number of registration attempts, rejected ones included.
    pub fn attempts(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Accepted registrations with the time they were accepted.
    pub fn registered(&self) -> Vec<(String, tokio::time::Instant)> {
        self.registered.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecoveryScheduler for ScriptedScheduler {
    async fn register(&self, tag: &str) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.rejections {
            return Err(Error::RegistrationRejected(format!(
                "attempt {} refused",
                call + 1
            )));
        }
        self.registered
            .lock()
            .unwrap()
            .push((tag.to_string(), tokio::time::Instant::now()));
        Ok(())
    }
}

/// Collect everything an endpoint receives within `window`.
pub async fn collect_for(endpoint: &mut BusEndpoint, window: Duration) -> Vec<TransferMessage> {
    let mut messages = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(message)) = tokio::time::timeout_at(deadline, endpoint.recv()).await {
        messages.push(message);
    }
    messages
}

/// Wait until an endpoint receives a message matching `predicate`.
///
/// Returns everything received up to and including that message.
pub async fn collect_until(
    endpoint: &mut BusEndpoint,
    predicate: impl Fn(&TransferMessage) -> bool,
) -> Vec<TransferMessage> {
    let mut messages = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(60), endpoint.recv())
            .await
            .expect("expected message did not arrive")
            .expect("bus closed");
        let done = predicate(&message);
        messages.push(message);
        if done {
            return messages;
        }
    }
}

/// Progress fractions contained in a message log.
pub fn fractions(messages: &[TransferMessage]) -> Vec<f64> {
    messages
        .iter()
        .filter_map(|m| match m {
            TransferMessage::Progress { fraction } => Some(*fraction),
            _ => None,
        })
        .collect()
}
