//! Units exchanged between the application core and the transport

/// A pending operation on its way to the peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Globally unique ID (the operation hash)
    pub id: String,
    /// Serialized operation
    pub tx_data: Vec<u8>,
}

/// A quorum of peers acknowledged transaction `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDistributed {
    pub id: String,
}

/// Messages received from other nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The leader shares a pending transaction
    AddTx {
        from_node: String,
        id: String,
        payload: Vec<u8>,
    },
    /// A follower holds every transaction of a published batch
    AckBatch { from_node: String, hash: String },
}
