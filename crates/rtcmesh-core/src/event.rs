use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Listener registry held by composition in each component that emits events.
///
/// Every subscriber gets its own unbounded queue, so a slow listener never
/// blocks the emitter and no event is dropped for a live listener. Listeners
/// whose receiver was dropped are pruned on the next emit.
pub struct Emitter<E> {
    listeners: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> Emitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a new listener.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live listener. Returns how many received it.
    pub fn emit(&self, event: E) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|tx| !tx.is_closed());
        listeners.len()
    }

    /// Drop every listener; their receivers observe end-of-stream.
    pub fn close(&self) {
        self.listeners.lock().clear();
    }
}

impl<E: Clone> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
