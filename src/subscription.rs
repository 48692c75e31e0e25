use crate::error::{AvrError, Result};
use crate::types::DeviceId;
use tokio::sync::broadcast;

/// Receiver for "device updated" notifications
pub struct UpdateReceiver {
    rx: broadcast::Receiver<DeviceId>,
}

impl UpdateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<DeviceId>) -> Self {
        Self { rx }
    }

    /// Receive the next updated device id.
    pub async fn recv(&mut self) -> Result<DeviceId> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => AvrError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                AvrError::ChannelError(format!("Lagged by {} updates", n))
            }
        })
    }

    /// Try to receive an update without blocking.
    ///
    /// Returns `None` if no notification is pending.
    pub fn try_recv(&mut self) -> Result<Option<DeviceId>> {
        match self.rx.try_recv() {
            Ok(id) => Ok(Some(id)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(AvrError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(AvrError::ChannelError(format!("Lagged by {} updates", n)))
            }
        }
    }
}
