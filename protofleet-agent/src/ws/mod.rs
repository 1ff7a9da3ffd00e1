//! Watch stream transports.
//!
//! A connector opens one bidirectional watch stream: controls flow out,
//! batches flow in. The inbound channel closing means the stream ended; an
//! `Err` item reports the transport failure that ended it.

pub mod client;
#[cfg(any(test, feature = "memory"))]
pub mod memory;

use async_trait::async_trait;
use protofleet_core::protocol::{Batch, Control};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::utils::errors::Result;

pub struct WatchStream {
    pub outbound: mpsc::UnboundedSender<Control>,
    pub inbound: mpsc::UnboundedReceiver<Result<Batch>>,
    /// Cancelling closes the underlying transport
    pub shutdown: CancellationToken,
}

#[async_trait]
pub trait WatchConnector: Send + Sync {
    async fn open(&self) -> Result<WatchStream>;
}
