//! Transport seams between the protocol cores and the network.
//!
//! Servers consume an [`Input`] and emit through an [`Output`], so the
//! protocol logic can be driven by channel-backed fakes in tests and by
//! the raw-socket bridge in production.

pub mod raw;

use std::io;

use async_trait::async_trait;

/// A source of inbound items (frames, datagrams).
#[async_trait]
pub trait Input<T>: Send {
    /// Waits for the next item. An error means the underlying source
    /// is gone and the caller's loop should wind down.
    async fn get(&mut self) -> Result<T, io::Error>;
}

/// A sink for outbound items.
#[async_trait]
pub trait Output<T>: Send + Sync {
    async fn send(&self, item: T) -> Result<(), io::Error>;
}

/// Channel-backed implementations, used in test mode and by unit tests.
pub mod channel {
    use super::*;
    use tokio::sync::mpsc;

    pub struct ChannelInput<T> {
        rx: mpsc::UnboundedReceiver<T>,
    }

    pub struct ChannelOutput<T> {
        tx: mpsc::UnboundedSender<T>,
    }

    /// An input fed by the returned sender.
    pub fn input<T: Send>(
    ) -> (mpsc::UnboundedSender<T>, ChannelInput<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, ChannelInput { rx })
    }

    /// An output draining into the returned receiver.
    pub fn output<T: Send>(
    ) -> (ChannelOutput<T>, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelOutput { tx }, rx)
    }

    #[async_trait]
    impl<T: Send> Input<T> for ChannelInput<T> {
        async fn get(&mut self) -> Result<T, io::Error> {
            self.rx
                .recv()
                .await
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "input channel closed"))
        }
    }

    #[async_trait]
    impl<T: Send + Sync> Output<T> for ChannelOutput<T> {
        async fn send(&self, item: T) -> Result<(), io::Error> {
            self.tx
                .send(item)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output channel closed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_transports_pass_items_through() {
        tokio_test::block_on(async {
            let (feed, mut input) = channel::input::<u32>();
            let (output, mut drained) = channel::output::<u32>();

            feed.send(7).unwrap();
            assert_eq!(input.get().await.unwrap(), 7);

            output.send(9).await.unwrap();
            assert_eq!(drained.recv().await, Some(9));
        });
    }

    #[test]
    fn closed_channels_error_out() {
        tokio_test::block_on(async {
            let (feed, mut input) = channel::input::<u32>();
            drop(feed);
            assert!(input.get().await.is_err());

            let (output, drained) = channel::output::<u32>();
            drop(drained);
            assert!(output.send(1).await.is_err());
        });
    }
}
