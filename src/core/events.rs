use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Checking,
    Verifying,
    Copying,
    Downloading,
    Unpacking,
    Finalizing,
    Done,
    Error,
}

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Checking => "checking",
            Phase::Verifying => "verifying",
            Phase::Copying => "copying",
            Phase::Downloading => "downloading",
            Phase::Unpacking => "unpacking",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub key: String,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Receiver side of the progress channel.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Adapts a closure into a [`ProgressSink`].
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        (self.0)(&event);
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

/// Fan-out of progress events to every live subscriber.
///
/// Subscribers whose receiver has been dropped are pruned on the next emit.
#[derive(Default)]
pub struct EventBus {
    channels: RwLock<Vec<Sender<ProgressEvent>>>,
    sinks: RwLock<Vec<Arc<dyn ProgressSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        let (sender, receiver) = unbounded();
        self.channels.write().push(sender);
        receiver
    }

    pub fn add_sink(&self, sink: Arc<dyn ProgressSink>) {
        self.sinks.write().push(sink);
    }
}

impl ProgressSink for EventBus {
    fn emit(&self, event: ProgressEvent) {
        for sink in self.sinks.read().iter() {
            sink.emit(event.clone());
        }
        let mut channels = self.channels.write();
        channels.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

pub fn emit_phase(sink: &dyn ProgressSink, key: &str, phase: Phase, message: Option<&str>) {
    sink.emit(ProgressEvent {
        key: key.to_string(),
        phase,
        downloaded: None,
        total: None,
        progress: None,
        message: message.map(ToOwned::to_owned),
    });
}

pub fn emit_done(sink: &dyn ProgressSink, key: &str, message: &str) {
    sink.emit(ProgressEvent {
        key: key.to_string(),
        phase: Phase::Done,
        downloaded: None,
        total: None,
        progress: Some(1.0),
        message: Some(message.to_string()),
    });
}

pub fn emit_download(
    sink: &dyn ProgressSink,
    key: &str,
    downloaded: u64,
    total: u64,
    progress: f64,
    message: Option<&str>,
) {
    sink.emit(ProgressEvent {
        key: key.to_string(),
        phase: Phase::Downloading,
        downloaded: Some(downloaded),
        total: Some(total),
        progress: Some(progress),
        message: message.map(ToOwned::to_owned),
    });
}
