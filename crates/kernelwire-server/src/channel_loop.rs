//! Poll loop for the addressed channels (shell, control).

use std::time::Duration;

use kernelwire_frame::{Channel, Message, Serializer};
use tracing::{debug, info, trace, warn};
use zmq::Socket;

use crate::control::{ack_stop, serve_controller, ControllerEvent};
use crate::dispatch::{Deferred, DeferredState, Dispatch, Dispatcher, ShellQueue};
use crate::error::Result;
use crate::handle::ServerHandle;

const IDLE_POLL_MS: i64 = 100;
const PENDING_POLL_MS: i64 = 10;

/// One addressed channel served by a loop.
pub(crate) struct Lane {
    channel: Channel,
    router: Socket,
    outbox: Socket,
    pending: Option<Deferred>,
}

impl Lane {
    pub(crate) fn new(channel: Channel, router: Socket, outbox: Socket) -> Self {
        Self {
            channel,
            router,
            outbox,
            pending: None,
        }
    }
}

/// How a loop decides to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Runs on the calling thread and exits once the server is stopped.
    Supervisor,
    /// Runs on a worker thread and exits on a controller `stop`.
    Worker,
}

#[derive(Debug, Clone, Copy)]
enum Ready {
    Outbox(usize),
    Router(usize),
    Controller,
}

pub(crate) struct ChannelLoop<'a> {
    name: &'static str,
    role: Role,
    lanes: Vec<Lane>,
    controller: Option<Socket>,
    handle: &'a ServerHandle,
    dispatcher: &'a dyn Dispatcher,
    abort_poll_interval: Duration,
}

impl<'a> ChannelLoop<'a> {
    pub(crate) fn new(
        name: &'static str,
        role: Role,
        lanes: Vec<Lane>,
        controller: Option<Socket>,
        handle: &'a ServerHandle,
        dispatcher: &'a dyn Dispatcher,
        abort_poll_interval: Duration,
    ) -> Self {
        Self {
            name,
            role,
            lanes,
            controller,
            handle,
            dispatcher,
            abort_poll_interval,
        }
    }

    pub(crate) fn run(mut self) -> Result<()> {
        info!(name = self.name, role = ?self.role, "channel loop started");
        loop {
            if self.role == Role::Supervisor && self.handle.is_stopped() {
                self.flush_outboxes();
                break;
            }

            for ready in self.wait()? {
                match ready {
                    Ready::Outbox(index) => self.flush_outbox(index),
                    Ready::Router(index) => self.receive(index)?,
                    Ready::Controller => {
                        if self.serve_controller()? == ControllerEvent::Stop {
                            self.flush_outboxes();
                            if let Some(controller) = &self.controller {
                                ack_stop(controller)?;
                            }
                            info!(name = self.name, "channel loop stopped");
                            return Ok(());
                        }
                    }
                }
            }

            self.poll_pending();
        }
        info!(name = self.name, "channel loop stopped");
        Ok(())
    }

    fn wait(&self) -> Result<Vec<Ready>> {
        let mut slots = Vec::with_capacity(self.lanes.len() * 2 + 1);
        let mut items = Vec::with_capacity(self.lanes.len() * 2 + 1);
        for (index, lane) in self.lanes.iter().enumerate() {
            slots.push(Ready::Outbox(index));
            items.push(lane.outbox.as_poll_item(zmq::POLLIN));
            // A lane with a request in flight keeps its backlog queued.
            if lane.pending.is_none() {
                slots.push(Ready::Router(index));
                items.push(lane.router.as_poll_item(zmq::POLLIN));
            }
        }
        if let Some(controller) = &self.controller {
            slots.push(Ready::Controller);
            items.push(controller.as_poll_item(zmq::POLLIN));
        }

        let timeout = if self.lanes.iter().any(|lane| lane.pending.is_some()) {
            PENDING_POLL_MS
        } else {
            IDLE_POLL_MS
        };
        match zmq::poll(&mut items, timeout) {
            Ok(_) => {}
            Err(zmq::Error::EINTR) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        }

        Ok(slots
            .into_iter()
            .zip(items.iter())
            .filter(|(_, item)| item.is_readable())
            .map(|(slot, _)| slot)
            .collect())
    }

    fn serve_controller(&self) -> Result<ControllerEvent> {
        let Some(controller) = &self.controller else {
            return Ok(ControllerEvent::Served);
        };
        serve_controller(controller, |request| {
            self.dispatcher.internal_request(request)
        })
    }

    fn receive(&mut self, index: usize) -> Result<()> {
        let lane = &self.lanes[index];
        let frames = match lane.router.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let message = match self.handle.serializer().deserialize(frames) {
            Ok(message) => message,
            Err(err) => {
                warn!(channel = %lane.channel, error = %err, "dropping inbound message");
                return Ok(());
            }
        };
        trace!(channel = %lane.channel, msg_type = message.msg_type(), "dispatching");

        let outcome = match lane.channel {
            Channel::Shell => self.dispatcher.dispatch_shell(message),
            Channel::Control => self.dispatcher.dispatch_control(message),
        };
        if let Dispatch::Deferred(deferred) = outcome {
            debug!(channel = %lane.channel, "request in flight; holding channel backlog");
            self.lanes[index].pending = Some(deferred);
        }
        Ok(())
    }

    fn poll_pending(&mut self) {
        for index in 0..self.lanes.len() {
            let Some(deferred) = self.lanes[index].pending.take() else {
                continue;
            };
            match deferred.poll() {
                DeferredState::Ready(continuation) => {
                    let lane = &self.lanes[index];
                    let mut queue = RouterQueue {
                        channel: lane.channel,
                        router: &lane.router,
                        serializer: self.handle.serializer(),
                        interval: self.abort_poll_interval,
                    };
                    continuation(&mut queue);
                    self.flush_outbox(index);
                }
                DeferredState::Pending => self.lanes[index].pending = Some(deferred),
                DeferredState::Abandoned => {
                    warn!(channel = %self.lanes[index].channel, "deferred request abandoned without a reply");
                }
            }
        }
    }

    fn flush_outboxes(&self) {
        for index in 0..self.lanes.len() {
            self.flush_outbox(index);
        }
    }

    /// Forward everything queued on a lane's outbox to its router.
    fn flush_outbox(&self, index: usize) {
        let lane = &self.lanes[index];
        loop {
            let frames = match lane.outbox.recv_multipart(zmq::DONTWAIT) {
                Ok(frames) => frames,
                Err(zmq::Error::EAGAIN) => return,
                Err(err) => {
                    warn!(channel = %lane.channel, error = %err, "outbox read failed");
                    return;
                }
            };
            if frames.len() == 1 && frames[0].is_empty() {
                continue;
            }
            if let Err(err) = lane.router.send_multipart(frames, 0) {
                warn!(channel = %lane.channel, error = %err, "reply not sent");
            }
        }
    }
}

/// A lane's router, drained on behalf of a continuation.
struct RouterQueue<'a> {
    channel: Channel,
    router: &'a Socket,
    serializer: &'a Serializer,
    interval: Duration,
}

impl ShellQueue for RouterQueue<'_> {
    fn abort_queue(&mut self, handler: &mut dyn FnMut(Message)) {
        let interval_ms = i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX);
        loop {
            match self.router.poll(zmq::POLLIN, interval_ms) {
                Ok(0) => return,
                Ok(_) => {}
                Err(err) => {
                    warn!(channel = %self.channel, error = %err, "abort poll failed");
                    return;
                }
            }
            let frames = match self.router.recv_multipart(zmq::DONTWAIT) {
                Ok(frames) => frames,
                Err(zmq::Error::EAGAIN) => continue,
                Err(err) => {
                    warn!(channel = %self.channel, error = %err, "abort read failed");
                    return;
                }
            };
            match self.serializer.deserialize(frames) {
                Ok(message) => handler(message),
                Err(err) => warn!(channel = %self.channel, error = %err, "dropping queued message"),
            }
        }
    }
}
