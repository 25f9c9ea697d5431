use std::future::Future;

use tokio::sync::{mpsc, oneshot, watch};

use crate::models::{CoreError, CoreErrorKind, CoreResult};

/// A unit of sequential message processing. Each actor owns its state exclusively and sees one
/// message at a time, in the order senders enqueued them.
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;

    fn start(&mut self, handle: &ActorHandle<Self>);

    fn receive(
        &mut self,
        message: Self::Message,
        handle: &ActorHandle<Self>,
    ) -> impl Future<Output = ActorAction> + Send;

    fn stop(self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActorAction {
    Continue,
    Stop,
}

pub struct ActorHandle<T>
where
    T: Actor,
{
    sender: mpsc::UnboundedSender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T> Clone for ActorHandle<T>
where
    T: Actor,
{
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub fn spawn(actor: T) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stopped_tx, stopped_rx) = watch::channel::<bool>(false);
        let out = Self {
            sender: tx,
            stopped: stopped_rx,
        };
        let handle = out.clone();
        tokio::spawn(async move {
            let mut actor = actor;
            actor.start(&handle);
            while let Some(message) = rx.recv().await {
                if actor.receive(message, &handle).await == ActorAction::Stop {
                    break;
                }
            }
            rx.close();
            actor.stop();
            let _ = stopped_tx.send(true);
        });
        out
    }

    /// Enqueues a message without waiting for it to be processed.
    pub fn tell(&self, message: T::Message) -> CoreResult<()> {
        self.sender.send(message).map_err(|_| stopped_error())
    }

    /// Enqueues a message carrying a reply channel and waits for the reply.
    pub async fn ask<R>(
        &self,
        message: impl FnOnce(oneshot::Sender<R>) -> T::Message,
    ) -> CoreResult<R> {
        let (reply, response) = oneshot::channel();
        self.tell(message(reply))?;
        response.await.map_err(|_| stopped_error())
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow() || self.sender.is_closed()
    }

    pub async fn wait_for_stop(mut self) {
        // A receive error means the sender was dropped, which only happens once the actor
        // loop has exited.
        let _ = self.stopped.wait_for(|stopped| *stopped).await;
    }
}

fn stopped_error() -> CoreError {
    CoreError::new(CoreErrorKind::NotFound, "actor has stopped")
}
