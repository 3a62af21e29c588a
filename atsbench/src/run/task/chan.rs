use color_eyre::eyre::{eyre, Report};
use tokio::sync::mpsc;

/// Creates a new bounded channel whose endpoints can be named; the name shows
/// up in send errors, which makes broken task wiring easy to spot in logs.
pub fn channel<M>(buffer_size: usize) -> (ChannelSender<M>, ChannelReceiver<M>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (ChannelSender { name: None, tx }, ChannelReceiver { rx })
}

/// Sender side of the channel.
#[derive(Debug)]
pub struct ChannelSender<M> {
    name: Option<String>,
    tx: mpsc::Sender<M>,
}

// a manual impl so that `M: Clone` is not required
impl<M> Clone for ChannelSender<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M> ChannelSender<M> {
    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = Some(name.into());
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Sends one message, waiting for capacity if the channel is full.
    pub async fn send(&self, value: M) -> Result<(), Report> {
        self.tx
            .send(value)
            .await
            .map_err(|_| eyre!("error sending to channel {}: receiver is gone", self.name()))
    }
}

/// Receiver side of the channel.
#[derive(Debug)]
pub struct ChannelReceiver<M> {
    rx: mpsc::Receiver<M>,
}

impl<M> ChannelReceiver<M> {
    /// Receives the next message; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }
}
