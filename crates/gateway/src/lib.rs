//! Chat transport seams: the adapter contract, a local stdin adapter, and
//! the dispatcher that feeds inbound events into the agent runtime.

pub mod adapter;
pub mod dispatcher;
pub mod stdin;

/// Transport adapter contract.
pub use adapter::ChannelAdapter;
/// Concurrent event dispatcher.
pub use dispatcher::Dispatcher;
/// Line-oriented stdin/stdout adapter.
pub use stdin::StdinAdapter;
