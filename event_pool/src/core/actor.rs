use crate::core::LocalRef;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::trace;

/// A component that owns its state and handles one message at a time.
#[async_trait]
pub trait Actor<M: Send + 'static>: Send + 'static {
  /// Runs once before the first message is received.
  async fn pre_start(&mut self, _: &ActorContext<M>) {}
  /// Handles one message.
  async fn recv(&mut self, ctx: &ActorContext<M>, msg: M);
  /// Runs once after the actor has been told to terminate.
  async fn post_stop(&mut self, _: &ActorContext<M>) {}
}

/// What actually travels through an actor's mailbox.
pub enum ActorMsg<M> {
  /// A regular message.
  Msg(M),
  /// Stop after the messages already queued ahead of this one.
  Term,
}

/// Handed to every [`Actor`] callback.
pub struct ActorContext<M: Send + 'static> {
  tx: UnboundedSender<ActorMsg<M>>,
  /// Name used in log output.
  pub name: String,
}
impl<M: Send + 'static> ActorContext<M> {
  /// A reference to this actor's own mailbox for any type its message type can be built from.
  pub fn local_interface<T: Send + 'static>(&self) -> LocalRef<T>
  where
    M: From<T>,
  {
    create_local(self.tx.clone())
  }

  /// Sends `msg` to this actor after `delay`. Dropping the returned handle does not cancel the
  /// timer; actors tag timer messages and ignore the stale ones instead.
  pub fn schedule_local_msg(&self, delay: Duration, msg: M) -> JoinHandle<()> {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = tx.send(ActorMsg::Msg(msg));
    })
  }

  /// Asks this actor to stop once it has drained the messages ahead of the request.
  pub fn stop(&self) {
    let _ = self.tx.send(ActorMsg::Term);
  }
}

fn create_local<M, T>(sender: UnboundedSender<ActorMsg<M>>) -> LocalRef<T>
where
  M: From<T> + Send + 'static,
  T: Send + 'static,
{
  LocalRef::new(move |x: T| sender.send(ActorMsg::Msg(M::from(x))).is_ok())
}

/// The owner's side of a running actor.
pub struct ActorHandle<M: Send + 'static> {
  tx: UnboundedSender<ActorMsg<M>>,
  join: JoinHandle<()>,
}
impl<M: Send + 'static> ActorHandle<M> {
  /// A reference to the actor's mailbox.
  pub fn local_interface<T: Send + 'static>(&self) -> LocalRef<T>
  where
    M: From<T>,
  {
    create_local(self.tx.clone())
  }

  /// Tells the actor to terminate. Returns `false` if it already had.
  pub fn terminate(&self) -> bool {
    self.tx.send(ActorMsg::Term).is_ok()
  }

  /// Whether the actor's task has finished.
  pub fn is_finished(&self) -> bool {
    self.join.is_finished()
  }
}

/// Starts `actor` on the current tokio runtime.
pub fn spawn<M, A>(actor: A, name: String) -> ActorHandle<M>
where
  M: Send + 'static,
  A: Actor<M>,
{
  let (tx, rx) = unbounded_channel();
  let ctx = ActorContext {
    tx: tx.clone(),
    name: name,
  };
  let join = tokio::spawn(run(actor, ctx, rx));
  ActorHandle { tx: tx, join: join }
}

async fn run<M, A>(mut actor: A, ctx: ActorContext<M>, mut rx: UnboundedReceiver<ActorMsg<M>>)
where
  M: Send + 'static,
  A: Actor<M>,
{
  actor.pre_start(&ctx).await;
  while let Some(msg) = rx.recv().await {
    match msg {
      ActorMsg::Msg(m) => actor.recv(&ctx, m).await,
      ActorMsg::Term => break,
    }
  }
  actor.post_stop(&ctx).await;
  trace!(actor = %ctx.name, "actor stopped");
}
