use crate::{BusInfo, CanBus, CanFilter, CanFrame, Result, Timestamp, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;

/// Callback invoked for every frame sent on a [`MockBus`]. Returned frames are
/// queued on the receive side, in order, as if a device had answered.
pub type Responder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame> + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    responder: Option<Responder>,
}

/// An in-process mock bus.
///
/// Clones share the same queues, so a test can keep one handle to inject
/// frames and inspect traffic while the code under test owns another.
/// `recv` never blocks: with nothing queued it reports [`TransportError::Timeout`].
#[derive(Clone)]
pub struct MockBus {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    fn lock(&self) -> Result<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| TransportError::Io(format!("mock bus {} poisoned", self.name)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a frame as if it had arrived from the wire.
    pub fn inject(&self, frame: CanFrame) -> Result<()> {
        self.lock()?.rx.push_back(frame);
        Ok(())
    }

    /// Frames sent so far, oldest first.
    pub fn sent(&self) -> Result<Vec<CanFrame>> {
        Ok(self.lock()?.sent.clone())
    }

    pub fn clear_sent(&self) -> Result<()> {
        self.lock()?.sent.clear();
        Ok(())
    }

    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.rx.len())
    }

    pub fn set_responder<F>(&self, responder: F) -> Result<()>
    where
        F: FnMut(&CanFrame) -> Vec<CanFrame> + Send + 'static,
    {
        self.lock()?.responder = Some(Box::new(responder));
        Ok(())
    }

    pub fn clear_responder(&self) -> Result<()> {
        self.lock()?.responder = None;
        Ok(())
    }
}

impl CanBus for MockBus {
    fn open(name: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        })
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn set_filters(&mut self, _filters: &[CanFilter]) -> Result<()> {
        let _ = _filters;
        Err(TransportError::Unsupported(
            "mock backend has no hardware filters",
        ))
    }

    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame> {
        let mut frame = self.lock()?.rx.pop_front().ok_or(TransportError::Timeout)?;
        if frame.timestamp.is_none() {
            frame.timestamp = Some(Timestamp(OffsetDateTime::now_utc()));
        }
        Ok(frame)
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let mut state = self.lock()?;
        state.sent.push(frame.clone());
        let replies = match state.responder.as_mut() {
            Some(respond) => respond(frame),
            None => Vec::new(),
        };
        if !replies.is_empty() {
            tracing::trace!(bus = %self.name, sent = %frame, replies = replies.len(), "mock responder");
        }
        state.rx.extend(replies);
        Ok(())
    }
}
