//! Single-producer, multi-consumer hand-off of package descriptors
//!
//! The packager owns the [`PackageSender`]; storage workers share one
//! [`PackageStream`]. Every descriptor is delivered to exactly one worker,
//! in the order it was sent.

use tokio::sync::{mpsc, Mutex};

use crate::domain::PackageDescriptor;

/// Create a bounded descriptor channel
pub fn package_channel(buffer: usize) -> (PackageSender, PackageStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        PackageSender { tx },
        PackageStream {
            rx: Mutex::new(rx),
        },
    )
}

/// Producer side, closed when dropped
pub struct PackageSender {
    tx: mpsc::Sender<PackageDescriptor>,
}

impl PackageSender {
    /// Hand a descriptor to the workers
    ///
    /// Waits while the buffer is full. Returns the descriptor back if every
    /// consumer is gone.
    pub async fn send(&self, descriptor: PackageDescriptor) -> Result<(), PackageDescriptor> {
        self.tx.send(descriptor).await.map_err(|e| e.0)
    }
}

/// Consumer side, shared by all storage workers
pub struct PackageStream {
    rx: Mutex<mpsc::Receiver<PackageDescriptor>>,
}

impl PackageStream {
    /// A finished stream holding exactly `descriptors`
    pub fn from_descriptors(descriptors: Vec<PackageDescriptor>) -> Self {
        let (tx, rx) = mpsc::channel(descriptors.len().max(1));
        for descriptor in descriptors {
            // capacity covers every descriptor and the receiver is alive
            let _ = tx.try_send(descriptor);
        }
        Self {
            rx: Mutex::new(rx),
        }
    }

    /// Next descriptor, or `None` once the producer is done and the buffer drained
    pub async fn next(&self) -> Option<PackageDescriptor> {
        self.rx.lock().await.recv().await
    }
}
