/// Errors raised by the broker consumer pool and result publisher.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The underlying AMQP client failed to connect, open a channel, or
    /// declare topology.
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
}
