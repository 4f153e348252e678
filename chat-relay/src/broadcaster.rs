use std::sync::Arc;

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{bridge::Broadcast, notice::Notice};

/// A notice waiting for the broadcaster task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub notice: Notice,
}

/// Unbounded queue decoupling presence notices from the event acknowledgment.
#[derive(Debug, Clone)]
pub struct NoticeQueue {
    sender: UnboundedSender<Outbound>,
}

impl NoticeQueue {
    pub fn new() -> (Self, UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Returns `false` once the broadcaster is gone.
    pub fn submit(&self, topic: &str, notice: Notice) -> bool {
        let outbound = Outbound {
            topic: topic.to_string(),
            notice,
        };
        if let Err(error) = self.sender.send(outbound) {
            warn!(topic = %error.0.topic, "broadcaster stopped, dropping notice");
            return false;
        }
        true
    }
}

/// Drains the queue into `sink` until every [`NoticeQueue`] handle is dropped.
///
/// Resolves to the number of notices handed to the sink.
pub fn spawn_broadcaster(
    mut pending: UnboundedReceiver<Outbound>,
    sink: Arc<dyn Broadcast>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut delivered = 0;
        while let Some(Outbound { topic, notice }) = pending.recv().await {
            sink.broadcast(&topic, &notice);
            delivered += 1;
        }
        debug!(delivered, "notice queue closed");
        delivered
    })
}
