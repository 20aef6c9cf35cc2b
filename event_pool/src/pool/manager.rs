use crate::core::{
  Actor, ActorContext, CoordBody, CoordMsg, CoordinationChannel, Heartbeat, LocalRef, NodeId,
};
use crate::pool::{
  elect, BucketTable, Candidate, LeaderPolicy, Membership, MembershipRecord, PoolConfig,
  PoolEvent, PoolSnapshot, PoolState, Router,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use PoolState::*;

/// The timers of the protocol. Each firing carries the epoch it was scheduled in; the manager
/// bumps the epoch on every state change, which silently cancels everything scheduled before.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Timer {
  Identification,
  Heartbeat,
  Offline,
  Leader,
  Reactivate,
}

pub(crate) enum PoolCmd {
  Subscribe(LocalRef<PoolEvent>),
  Members(oneshot::Sender<Vec<MembershipRecord>>),
}

pub(crate) enum PoolMsg {
  Remote(CoordMsg),
  Locked(bool),
  Tick(Timer, u64),
  Cmd(PoolCmd),
}
impl From<CoordMsg> for PoolMsg {
  fn from(msg: CoordMsg) -> Self {
    PoolMsg::Remote(msg)
  }
}
impl From<PoolCmd> for PoolMsg {
  fn from(cmd: PoolCmd) -> Self {
    PoolMsg::Cmd(cmd)
  }
}

/// Runs a node's side of the pooling protocol: the membership state machine, offline detection
/// and, while this node authors the table, the leader logic. It is the only writer of the node's
/// table and membership records.
pub(crate) struct PoolManager {
  me: NodeId,
  config: PoolConfig,
  policy: Arc<dyn LeaderPolicy>,
  channel: CoordinationChannel,
  router: Arc<Router>,
  admin: watch::Receiver<bool>,
  snapshot: watch::Sender<PoolSnapshot>,
  state: PoolState,
  table: Option<Arc<BucketTable>>,
  members: Membership,
  subscribers: Vec<LocalRef<PoolEvent>>,
  epoch: u64,
  locked: bool,
  active_since: Instant,
  last_heartbeat: Option<Instant>,
  covered: Vec<NodeId>,
}
impl PoolManager {
  pub fn new(
    me: NodeId,
    config: PoolConfig,
    policy: Arc<dyn LeaderPolicy>,
    channel: CoordinationChannel,
    router: Arc<Router>,
    admin: watch::Receiver<bool>,
    snapshot: watch::Sender<PoolSnapshot>,
  ) -> PoolManager {
    PoolManager {
      members: Membership::new(me.clone()),
      me: me,
      config: config,
      policy: policy,
      channel: channel,
      router: router,
      admin: admin,
      snapshot: snapshot,
      state: Inactive,
      table: None,
      subscribers: Vec::new(),
      epoch: 0,
      locked: false,
      active_since: Instant::now(),
      last_heartbeat: None,
      covered: Vec::new(),
    }
  }

  fn version(&self) -> u64 {
    self.table.as_ref().map(|t| t.version()).unwrap_or(0)
  }

  fn is_leader(&self) -> bool {
    self.table.as_ref().map_or(false, |t| t.leader() == &self.me)
  }

  fn notify(&mut self, event: PoolEvent) {
    self.subscribers.retain(|s| s.send(event.clone()));
  }

  fn current(&self) -> PoolSnapshot {
    PoolSnapshot {
      node: self.me.clone(),
      enabled: self.config.enabled,
      state: self.state,
      table: self.table.clone(),
    }
  }

  fn publish(&self) {
    let _ = self.snapshot.send(self.current());
  }

  fn send(&self, body: CoordBody) {
    let kind = body.kind();
    if let Err(e) = self.channel.send(body) {
      warn!(node = %self.me, kind, error = %e, "coordination send failed");
    }
  }

  fn schedule(&self, ctx: &ActorContext<PoolMsg>, timer: Timer, delay: std::time::Duration) {
    ctx.schedule_local_msg(delay, PoolMsg::Tick(timer, self.epoch));
  }

  fn transition(&mut self, ctx: &ActorContext<PoolMsg>, to: PoolState) {
    let from = self.state;
    self.state = to;
    self.epoch += 1;
    info!(node = %self.me, %from, %to, version = self.version(), "pool state changed");
    match to {
      Start => {
        self.table = None;
        self.send(CoordBody::IdentificationRequest);
        self.schedule(ctx, Timer::Identification, self.config.identification);
        self.schedule(ctx, Timer::Offline, self.config.offline_tick());
      }
      Query => {
        self.schedule(ctx, Timer::Identification, self.config.identification);
        self.schedule(ctx, Timer::Offline, self.config.offline_tick());
      }
      Active => {
        self.active_since = Instant::now();
        self.last_heartbeat = None;
        self.heartbeat(ctx);
        self.schedule(ctx, Timer::Leader, self.config.leader);
        self.schedule(ctx, Timer::Offline, self.config.offline_tick());
      }
      Inactive => {
        self.table = None;
        let dropped = self.router.clear();
        if dropped > 0 {
          warn!(node = %self.me, dropped, "discarded events queued before the node was locked");
        }
      }
    }
    self.publish();
    self.notify(PoolEvent::StateChanged { from: from, to: to });
    if to == Active {
      self.router.drain();
    }
  }

  /// Sends a heartbeat unless one went out less than `inter_heartbeat` ago, and schedules the
  /// next one.
  fn heartbeat(&mut self, ctx: &ActorContext<PoolMsg>) {
    let now = Instant::now();
    let spacing = self.config.inter_heartbeat;
    if let Some(wait) = self
      .last_heartbeat
      .map(|last| (last + spacing).saturating_duration_since(now))
      .filter(|wait| !wait.is_zero())
    {
      self.schedule(ctx, Timer::Heartbeat, wait);
      return;
    }
    self.send(CoordBody::Heartbeat(Heartbeat::new(
      self.state,
      self.version(),
      self.config.priority,
    )));
    self.last_heartbeat = Some(now);
    let interval = if now.duration_since(self.active_since) < self.config.identification {
      self.config.start_heartbeat
    } else {
      self.config.active_heartbeat
    };
    self.schedule(ctx, Timer::Heartbeat, interval.max(spacing));
  }

  /// Answers an identification request right away, as long as that respects the heartbeat
  /// spacing. The regular schedule stays as it is.
  fn answer_identification(&mut self) {
    let now = Instant::now();
    let spaced = self
      .last_heartbeat
      .map_or(true, |last| now.duration_since(last) >= self.config.inter_heartbeat);
    if spaced {
      self.send(CoordBody::Heartbeat(Heartbeat::new(
        self.state,
        self.version(),
        self.config.priority,
      )));
      self.last_heartbeat = Some(now);
    }
    if let Some(table) = self.table.as_ref().filter(|_| self.is_leader()) {
      self.send(CoordBody::AssignmentTable((**table).clone()));
    }
  }

  /// Installs `table`, which the caller has checked to be newer than the current one.
  fn adopt(&mut self, table: Arc<BucketTable>) {
    let was_leader = self.is_leader();
    debug!(
      node = %self.me, version = table.version(), leader = %table.leader(), "adopting table"
    );
    let (version, leader) = (table.version(), table.leader().clone());
    self.table = Some(table);
    self.publish();
    self.notify(PoolEvent::TableAdopted {
      version: version,
      leader: leader.clone(),
    });
    if leader == self.me && !was_leader {
      info!(node = %self.me, version, "became pool leader");
      self.notify(PoolEvent::BecameLeader { version: version });
    }
  }

  /// The nodes a table authored here should cover: every member that last declared itself
  /// active, plus this node.
  fn expected_members(&self) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = self.members.active().map(|r| r.id.clone()).collect();
    ids.push(self.me.clone());
    ids.sort();
    ids
  }

  /// Computes, installs and broadcasts a new table authored by this node.
  fn recompute(&mut self) {
    let version = self.version().max(self.members.max_version()) + 1;
    let members = self.expected_members();
    let table = BucketTable::assign(
      self.table.as_deref(),
      &members,
      &self.me,
      version,
      self.config.buckets,
    );
    debug!(node = %self.me, version, members = members.len(), "recomputed table");
    let table = Arc::new(table);
    self.covered = members;
    self.adopt(table.clone());
    self.send(CoordBody::AssignmentTable((*table).clone()));
  }

  /// Runs when the author of the current table is gone. The preferred node among the remaining
  /// active members takes over; everybody else waits for its table.
  fn check_election(&mut self) {
    let leader = match self.table.as_ref() {
      Some(t) if t.leader() != &self.me && !self.members.contains(t.leader()) => t.leader().clone(),
      _ => return,
    };
    let mine = Candidate {
      id: &self.me,
      priority: self.config.priority,
    };
    let others = self.members.active().map(|r| Candidate {
      id: &r.id,
      priority: r.priority,
    });
    let best = elect(&*self.policy, others.chain(std::iter::once(mine)));
    if best.map_or(false, |c| c.id == &self.me) {
      info!(node = %self.me, previous = %leader, "leader is gone, taking over");
      self.recompute();
    } else {
      debug!(node = %self.me, previous = %leader, "leader is gone, waiting for successor");
    }
  }

  /// The node left the pool, one way or another.
  fn member_gone(&mut self) {
    if self.state != Active {
      return;
    }
    if self.is_leader() {
      self.recompute();
    } else {
      self.check_election();
    }
  }

  fn self_elect(&mut self, ctx: &ActorContext<PoolMsg>) {
    info!(
      node = %self.me, state = %self.state, known = self.members.len(),
      "nobody answered identification, electing self"
    );
    self.recompute();
    self.transition(ctx, Active);
  }

  fn on_remote(&mut self, ctx: &ActorContext<PoolMsg>, msg: CoordMsg) {
    let CoordMsg { sender, body } = msg;
    let now = Instant::now();
    match body {
      CoordBody::IdentificationRequest => {
        trace!(node = %self.me, from = %sender, "identification request");
        if self.state == Active {
          self.answer_identification();
        }
      }
      CoordBody::Heartbeat(hb) => {
        let added = self.members.observe(&sender, hb.state, hb.priority, hb.table_version, now);
        if added {
          self.notify(PoolEvent::MemberAdded(sender.clone()));
        }
        match self.state {
          Start if hb.state == Active => {
            self.transition(ctx, Query);
            self.send(CoordBody::IdentificationRequest);
          }
          Active if hb.state == Active && self.is_leader() => {
            if !self.covered.contains(&sender) {
              debug!(node = %self.me, joined = %sender, "new active member");
              self.recompute();
            }
          }
          _ => {}
        }
      }
      CoordBody::AssignmentTable(table) => {
        if self.members.touch(&sender, table.version(), now) {
          self.notify(PoolEvent::MemberAdded(sender.clone()));
        }
        self.on_table(ctx, &sender, table);
      }
      CoordBody::Forward(fwd) => {
        if fwd.target == self.me {
          self.router.accept_forward(&sender, fwd, &self.current());
        }
      }
      CoordBody::Leaving => {
        if self.members.remove(&sender).is_some() {
          info!(node = %self.me, left = %sender, "member is leaving");
          self.notify(PoolEvent::MemberLeft(sender.clone()));
          self.member_gone();
        }
      }
    }
  }

  fn on_table(&mut self, ctx: &ActorContext<PoolMsg>, sender: &NodeId, table: BucketTable) {
    if self.state == Inactive {
      return;
    }
    if !table.is_valid(self.config.buckets) {
      warn!(
        node = %self.me, from = %sender, buckets = table.buckets(),
        "ignoring table with the wrong number of buckets"
      );
      return;
    }
    if table.supersedes(self.table.as_deref()) {
      self.adopt(Arc::new(table));
      if self.state == Start {
        self.transition(ctx, Query);
      }
      if self.state == Query {
        self.transition(ctx, Active);
      }
      return;
    }
    if !self.is_leader() || table.leader() == &self.me {
      return;
    }
    if table.version() == self.version() {
      let mine = Candidate {
        id: &self.me,
        priority: self.config.priority,
      };
      let theirs = Candidate {
        id: table.leader(),
        priority: self.members.get(table.leader()).map_or(0, |r| r.priority),
      };
      if self.policy.prefers(&mine, &theirs) {
        debug!(
          node = %self.me, other = %table.leader(), version = table.version(),
          "conflicting table with equal version, republishing"
        );
        self.recompute();
      }
    } else if let Some(current) = self.table.clone() {
      trace!(node = %self.me, stale = %sender, "answering stale table with the current one");
      self.send(CoordBody::AssignmentTable((*current).clone()));
    }
  }

  fn on_tick(&mut self, ctx: &ActorContext<PoolMsg>, timer: Timer, epoch: u64) {
    if epoch != self.epoch {
      return;
    }
    match (timer, self.state) {
      (Timer::Identification, Start) | (Timer::Identification, Query) => self.self_elect(ctx),
      (Timer::Heartbeat, Active) => self.heartbeat(ctx),
      (Timer::Offline, Start) | (Timer::Offline, Query) | (Timer::Offline, Active) => {
        let offline =
          self
            .members
            .scan(Instant::now(), self.config.offline_age, self.config.offline_limit);
        for rec in offline {
          warn!(
            node = %self.me, offline = %rec.id, missed = rec.missed_count, "member is offline"
          );
          self.notify(PoolEvent::MemberOffline(rec.id.clone()));
          self.member_gone();
        }
        self.schedule(ctx, Timer::Offline, self.config.offline_tick());
      }
      (Timer::Leader, Active) => {
        if self.is_leader() {
          if self.covered != self.expected_members() {
            self.recompute();
          } else if let Some(table) = self.table.clone() {
            self.send(CoordBody::AssignmentTable((*table).clone()));
          }
        }
        self.schedule(ctx, Timer::Leader, self.config.leader);
      }
      (Timer::Reactivate, Inactive) if !self.locked => self.transition(ctx, Start),
      (timer, state) => trace!(node = %self.me, ?timer, %state, "ignoring timer"),
    }
  }

  fn on_locked(&mut self, ctx: &ActorContext<PoolMsg>, locked: bool) {
    if locked == self.locked {
      return;
    }
    self.locked = locked;
    if locked {
      info!(node = %self.me, state = %self.state, "node locked");
      if self.state == Active {
        self.send(CoordBody::Leaving);
      }
      if self.state == Inactive {
        self.epoch += 1;
      } else {
        self.transition(ctx, Inactive);
      }
    } else {
      info!(node = %self.me, delay = ?self.config.reactivate, "node unlocked");
      self.epoch += 1;
      self.schedule(ctx, Timer::Reactivate, self.config.reactivate);
    }
  }
}

#[async_trait]
impl Actor<PoolMsg> for PoolManager {
  async fn pre_start(&mut self, ctx: &ActorContext<PoolMsg>) {
    self.publish();
    if !self.config.enabled {
      debug!(node = %self.me, "pooling disabled");
      return;
    }
    let mut admin = self.admin.clone();
    let lock_ref: LocalRef<bool> = ctx.local_interface::<PoolMsg>().map(PoolMsg::Locked);
    tokio::spawn(async move {
      while admin.changed().await.is_ok() {
        let locked = *admin.borrow();
        if !lock_ref.send(locked) {
          break;
        }
      }
    });
    self.locked = *self.admin.borrow();
    if self.locked {
      info!(node = %self.me, "node starts locked");
      self.publish();
    } else {
      self.transition(ctx, Start);
    }
  }

  async fn recv(&mut self, ctx: &ActorContext<PoolMsg>, msg: PoolMsg) {
    match msg {
      PoolMsg::Remote(msg) => {
        if self.config.enabled {
          self.on_remote(ctx, msg);
        }
      }
      PoolMsg::Locked(locked) => {
        if self.config.enabled {
          self.on_locked(ctx, locked);
        }
      }
      PoolMsg::Tick(timer, epoch) => self.on_tick(ctx, timer, epoch),
      PoolMsg::Cmd(PoolCmd::Subscribe(subr)) => {
        if subr.send(PoolEvent::Identity(self.me.clone())) {
          self.subscribers.push(subr);
        }
      }
      PoolMsg::Cmd(PoolCmd::Members(reply)) => {
        let _ = reply.send(self.members.records());
      }
    }
  }

  async fn post_stop(&mut self, _: &ActorContext<PoolMsg>) {
    if self.state == Active {
      self.send(CoordBody::Leaving);
    }
    self.epoch += 1;
    let from = self.state;
    self.state = Inactive;
    self.table = None;
    self.publish();
    if from != Inactive {
      self.notify(PoolEvent::StateChanged { from: from, to: Inactive });
    }
    debug!(node = %self.me, "pool manager stopped");
  }
}
