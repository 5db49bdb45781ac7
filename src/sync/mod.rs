//! Synchronization primitives used by the transport and scheduler layers.

pub mod tx_queue;

pub use tx_queue::TxQueue;
