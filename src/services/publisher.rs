//! Outbound bus seam used by the pipeline

/// Non-blocking publish side of the message bus
pub trait BusPublisher: Send + Sync {
    /// Offer a message to the bus; false when it was not sent
    ///
    /// Returns false without trying when the bus is disconnected.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> bool;

    fn is_connected(&self) -> bool;
}

/// Publisher used when no bus is configured; always disconnected
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedPublisher;

impl BusPublisher for DisconnectedPublisher {
    fn publish(&self, _topic: &str, _payload: Vec<u8>) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        false
    }
}
