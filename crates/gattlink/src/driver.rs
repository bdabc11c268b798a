//! Link driver task: the single consumer of caller commands and transport
//! events, owning the operation queue, the connection state machine, the
//! notify table, the reconnect policy and the adapter recovery state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::config::LinkConfig;
use crate::continuation::{invoke_guarded, Continuation};
use crate::error::{LinkError, Result};
use crate::link::GattLink;
use crate::monitoring::LinkStats;
use crate::protocol::{
    Characteristic, CharacteristicId, GattStatus, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE,
};
use crate::queue::{OpContext, OpOutput, OpQueue, WorkItem};
use crate::transport::{
    event_channel, ConnectionState, EventReceiver, EventSender, GattEvent, GattTransport,
};

// ----------------------------------------------------------------------------
// Handler Types
// ----------------------------------------------------------------------------

/// Handler invoked for each notification on a subscribed characteristic
pub type NotifyHandler = Box<dyn FnMut(Vec<u8>) + Send>;

/// Handler invoked when the link drops while a policy is registered
pub type LostHandler = Box<dyn FnMut() + Send>;

/// Connect-result handler retained across reconnects. Shared between the
/// reconnect policy and whichever connect work item is currently in flight,
/// so every re-attempt resolves through the same handler object.
pub(crate) type SharedConnectHandler = Arc<Mutex<Box<dyn FnMut(Result<()>) + Send>>>;

pub(crate) fn shared_connect_handler(
    handler: impl FnMut(Result<()>) + Send + 'static,
) -> SharedConnectHandler {
    Arc::new(Mutex::new(Box::new(handler)))
}

fn call_connect_handler(handler: &SharedConnectHandler, result: Result<()>) {
    let mut guard = match handler.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    invoke_guarded("connect-result", move || (*guard)(result));
}

/// Completion sink for a connect attempt
pub(crate) enum ConnectSink {
    /// Resolve once and discard
    Once(Continuation<()>),
    /// Retained handler, re-invoked by the auto-connect loop
    Retained(SharedConnectHandler),
}

impl ConnectSink {
    fn fail(self, error: LinkError) {
        match self {
            ConnectSink::Once(continuation) => continuation.fail(error),
            ConnectSink::Retained(handler) => call_connect_handler(&handler, Err(error)),
        }
    }

    fn into_work_item(self, auto_connect: bool) -> WorkItem {
        match self {
            ConnectSink::Once(continuation) => WorkItem::new(
                "connect",
                continuation,
                |_| (),
                move |ctx| ctx.transport.connect(auto_connect),
            ),
            ConnectSink::Retained(handler) => WorkItem::with_sink(
                "connect",
                move |result| call_connect_handler(&handler, result.map(|_| ())),
                move |ctx| ctx.transport.connect(auto_connect),
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Requests from facade handles to the driver task
pub(crate) enum Command {
    /// Append a prepared work item to the operation queue
    Enqueue(WorkItem),
    /// Seed a session: register the reconnect policy and queue the connect
    Connect {
        auto_connect: bool,
        on_result: ConnectSink,
        on_lost: Option<LostHandler>,
    },
    /// Configure notifications: register/unregister the handler and queue
    /// the client-configuration descriptor write
    SetNotify {
        characteristic: Characteristic,
        enable: bool,
        on_changed: Option<NotifyHandler>,
        continuation: Continuation<()>,
    },
    /// Drop the reconnect policy and tear the link down
    CloseConnection { continuation: Continuation<()> },
    /// Full shutdown: drain everything and release the transport
    Close { continuation: Continuation<()> },
}

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;
type CommandReceiver = mpsc::UnboundedReceiver<Command>;

// ----------------------------------------------------------------------------
// Internal State
// ----------------------------------------------------------------------------

/// Policy registered by `connect`, living until `close_connection`
struct ReconnectPolicy {
    auto_connect: bool,
    /// Present when auto-connect retains the result handler
    on_result: Option<SharedConnectHandler>,
    on_lost: Option<LostHandler>,
}

/// Bounded adapter power-cycle in progress
struct RecoveryState {
    polls_left: u32,
}

// ----------------------------------------------------------------------------
// Link Driver
// ----------------------------------------------------------------------------

/// The driver task. Construct, hand out [`GattLink`] handles and the
/// [`EventSender`] for platform glue, then `run()` it on the runtime.
pub struct LinkDriver {
    transport: Box<dyn GattTransport>,
    config: LinkConfig,
    queue: OpQueue,
    state: ConnectionState,
    notify_handlers: HashMap<CharacteristicId, NotifyHandler>,
    reconnect: Option<ReconnectPolicy>,
    reliable_shadow: Option<Vec<u8>>,
    recovery: Option<RecoveryState>,
    stats: Arc<LinkStats>,
    running: bool,
    command_tx: CommandSender,
    command_rx: CommandReceiver,
    event_tx: EventSender,
    event_rx: EventReceiver,
}

impl LinkDriver {
    pub fn new(transport: impl GattTransport + 'static, config: LinkConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = event_channel();
        Self {
            transport: Box::new(transport),
            config,
            queue: OpQueue::new(),
            state: ConnectionState::Disconnected,
            notify_handlers: HashMap::new(),
            reconnect: None,
            reliable_shadow: None,
            recovery: None,
            stats: Arc::new(LinkStats::default()),
            running: true,
            command_tx,
            command_rx,
            event_tx,
            event_rx,
        }
    }

    /// Create a facade handle bound to this driver
    pub fn link(&self) -> GattLink {
        GattLink::new(self.command_tx.clone(), self.config.clone(), self.stats.clone())
    }

    /// Sender the platform glue pushes transport events into
    pub fn event_sender(&self) -> EventSender {
        self.event_tx.clone()
    }

    /// Main task loop. Runs until `close()` is requested or every facade
    /// handle is dropped; dropping the driver's event receiver is what
    /// unsubscribes the adapter lifecycle signal.
    pub async fn run(mut self) {
        tracing::info!("gatt link driver starting");

        while self.running {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            tracing::info!("all link handles dropped, shutting down");
                            break;
                        }
                    }
                }

                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            tracing::info!("event channel closed, shutting down");
                            break;
                        }
                    }
                }

                // Adapter recovery polling, only while a power-cycle is in
                // progress
                _ = tokio::time::sleep(self.config.recovery_poll_interval), if self.recovery.is_some() => {
                    self.step_recovery();
                }
            }
        }

        let drained = self.queue.drain(LinkError::Closed);
        if drained > 0 {
            tracing::debug!(drained, "operations failed by shutdown");
        }
        self.transport.close();
        tracing::info!("gatt link driver stopped");
    }

    // ------------------------------------------------------------------
    // Command handling
    // ------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue(item) => self.enqueue_item(item),
            Command::Connect {
                auto_connect,
                on_result,
                on_lost,
            } => self.handle_connect(auto_connect, on_result, on_lost),
            Command::SetNotify {
                characteristic,
                enable,
                on_changed,
                continuation,
            } => self.handle_set_notify(characteristic, enable, on_changed, continuation),
            Command::CloseConnection { continuation } => self.handle_close_connection(continuation),
            Command::Close { continuation } => self.handle_close(continuation),
        }
    }

    fn enqueue_item(&mut self, item: WorkItem) {
        let mut ctx = OpContext {
            transport: self.transport.as_mut(),
            reliable_shadow: &mut self.reliable_shadow,
        };
        self.queue.enqueue(item, &mut ctx);
    }

    fn handle_connect(
        &mut self,
        auto_connect: bool,
        on_result: ConnectSink,
        on_lost: Option<LostHandler>,
    ) {
        // Connect seeds the session; nothing may be queued or in flight.
        if !self.queue.is_idle() {
            let pending = self.queue.outstanding();
            tracing::warn!(pending, "connect rejected while operations are outstanding");
            on_result.fail(LinkError::Busy { pending });
            return;
        }

        let retained = match &on_result {
            ConnectSink::Retained(handler) => Some(handler.clone()),
            ConnectSink::Once(_) => None,
        };
        self.reconnect = Some(ReconnectPolicy {
            auto_connect,
            on_result: retained,
            on_lost,
        });
        let item = on_result.into_work_item(auto_connect);
        self.enqueue_item(item);
    }

    fn handle_set_notify(
        &mut self,
        characteristic: Characteristic,
        enable: bool,
        on_changed: Option<NotifyHandler>,
        continuation: Continuation<()>,
    ) {
        let Some(cccd) = characteristic.client_config_descriptor().cloned() else {
            tracing::warn!(
                characteristic = %characteristic.id(),
                "peripheral exposes no client configuration descriptor"
            );
            continuation.fail(LinkError::DescriptorNotFound {
                characteristic: characteristic.uuid,
            });
            return;
        };

        if enable {
            if let Some(handler) = on_changed {
                self.notify_handlers.insert(characteristic.id(), handler);
            }
        } else {
            self.notify_handlers.remove(&characteristic.id());
        }

        let value: &'static [u8] = if enable {
            &ENABLE_NOTIFICATION_VALUE
        } else {
            &DISABLE_NOTIFICATION_VALUE
        };
        let item = WorkItem::new("set-notify", continuation, |_| (), move |ctx| {
            ctx.transport
                .set_characteristic_notification(&characteristic, enable)
                && ctx.transport.write_descriptor(&cccd, value)
        });
        self.enqueue_item(item);
    }

    fn handle_close_connection(&mut self, continuation: Continuation<()>) {
        // Clear the policy before the disconnect is issued so this requested
        // teardown never re-fires the lost handler or the reconnect loop.
        self.reconnect = None;

        if self.state == ConnectionState::Disconnected && self.queue.is_idle() {
            continuation.resolve(());
            return;
        }
        let item = WorkItem::new("disconnect", continuation, |_| (), |ctx| {
            ctx.transport.disconnect()
        });
        self.enqueue_item(item);
    }

    fn handle_close(&mut self, continuation: Continuation<()>) {
        self.reconnect = None;
        let drained = self.queue.drain(LinkError::Closed);
        if drained > 0 {
            tracing::debug!(drained, "operations failed by close");
        }
        self.notify_handlers.clear();
        // The run loop releases the transport on its way out.
        self.running = false;
        continuation.resolve(());
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    /// Translate one transport event into queue completion or out-of-band
    /// state handling. This is the only place link state is mutated.
    fn handle_event(&mut self, event: GattEvent) {
        match event {
            GattEvent::ConnectionStateChanged { status, state } => {
                self.handle_connection_state(status, state);
            }
            GattEvent::ServicesDiscovered { status, services } => {
                self.complete("services-discovered", status, OpOutput::Services(services));
            }
            GattEvent::CharacteristicRead { status, value, .. } => {
                self.complete("characteristic-read", status, OpOutput::Value(value));
            }
            GattEvent::CharacteristicWrite {
                status,
                characteristic,
                value,
            } => self.handle_characteristic_write(status, characteristic, value),
            GattEvent::DescriptorRead { status, value, .. } => {
                self.complete("descriptor-read", status, OpOutput::Value(value));
            }
            GattEvent::DescriptorWrite { status, .. } => {
                self.complete("descriptor-write", status, OpOutput::Done);
            }
            GattEvent::MtuChanged { status, mtu } => {
                self.complete("mtu-changed", status, OpOutput::Mtu(mtu));
            }
            GattEvent::ReliableWriteCompleted { status } => {
                self.reliable_shadow = None;
                self.complete("reliable-write-completed", status, OpOutput::Done);
            }
            GattEvent::CharacteristicChanged {
                characteristic,
                value,
            } => self.dispatch_notification(characteristic, value),
            GattEvent::AdapterStateChanged { enabled } => self.handle_adapter_state(enabled),
        }
    }

    /// Resolve the current operation with a transport status and advance
    /// the queue. A completion with no outstanding operation is reported
    /// loudly, never silently accepted.
    fn complete(&mut self, event: &'static str, status: GattStatus, output: OpOutput) {
        let success = status.is_success();
        let mut ctx = OpContext {
            transport: self.transport.as_mut(),
            reliable_shadow: &mut self.reliable_shadow,
        };
        match self.queue.complete(event, status, output, &mut ctx) {
            Ok(()) => {
                LinkStats::bump(if success {
                    &self.stats.ops_completed
                } else {
                    &self.stats.ops_failed
                });
            }
            Err(err) => {
                tracing::error!(%err, "protocol violation");
                LinkStats::bump(&self.stats.protocol_violations);
            }
        }
    }

    /// Fail the current operation with a synthesized error (no transport
    /// status) and advance the queue
    fn fail_current(&mut self, event: &'static str, error: LinkError) {
        let mut ctx = OpContext {
            transport: self.transport.as_mut(),
            reliable_shadow: &mut self.reliable_shadow,
        };
        match self.queue.fail_current(event, error, &mut ctx) {
            Ok(()) => LinkStats::bump(&self.stats.ops_failed),
            Err(err) => {
                tracing::error!(%err, "protocol violation");
                LinkStats::bump(&self.stats.protocol_violations);
            }
        }
    }

    fn handle_characteristic_write(
        &mut self,
        status: GattStatus,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) {
        let Some(expected) = self.reliable_shadow.take() else {
            self.complete("characteristic-write", status, OpOutput::Done);
            return;
        };

        // A reliable write is mid-transaction: verify the echoed value
        // before committing.
        if !status.is_success() {
            tracing::warn!(%status, "reliable write failed before verification");
            self.transport.abort_reliable_write();
            self.complete("characteristic-write", status, OpOutput::Done);
            return;
        }
        if value != expected {
            tracing::warn!(
                characteristic = %characteristic,
                "reliable write echo mismatch, aborting transaction"
            );
            self.transport.abort_reliable_write();
            self.complete("characteristic-write", GattStatus::FAILURE, OpOutput::Done);
            return;
        }
        if !self.transport.execute_reliable_write() {
            self.transport.abort_reliable_write();
            self.fail_current(
                "characteristic-write",
                LinkError::IssueFailed {
                    tag: "write-reliable",
                },
            );
            return;
        }
        // Echo verified and commit issued; the reliable-write-completed
        // event resolves the item.
    }

    fn dispatch_notification(&mut self, characteristic: CharacteristicId, value: Vec<u8>) {
        match self.notify_handlers.get_mut(&characteristic) {
            Some(handler) => invoke_guarded("notify", move || handler(value)),
            None => {
                tracing::debug!(
                    characteristic = %characteristic,
                    "notification without a registered handler, dropping"
                );
                LinkStats::bump(&self.stats.notifications_dropped);
            }
        }
    }

    // ------------------------------------------------------------------
    // Connection state machine
    // ------------------------------------------------------------------

    fn handle_connection_state(&mut self, status: GattStatus, state: ConnectionState) {
        if status == GattStatus::STACK_ERROR {
            self.begin_adapter_recovery();
        }

        let previous = self.state;
        self.state = state;

        match state {
            ConnectionState::Connected => {
                if self.queue.current_tag() != Some("connect") {
                    tracing::error!("connected event with no connect outstanding");
                    LinkStats::bump(&self.stats.protocol_violations);
                    return;
                }
                if status.is_success() {
                    tracing::info!("link connected");
                    self.complete("connection-state", status, OpOutput::Done);
                } else if self.auto_connect_active() {
                    // The platform keeps retrying in the background; leave
                    // the connect attempt pending so a later real
                    // connection still resolves it.
                    tracing::warn!(%status, "connect attempt failed, auto-connect leaves it pending");
                    self.state = previous;
                } else {
                    self.complete("connection-state", status, OpOutput::Done);
                }
            }
            ConnectionState::Connecting => {
                tracing::debug!("link connecting");
            }
            ConnectionState::Disconnected => self.handle_disconnected(previous, status),
        }
    }

    fn handle_disconnected(&mut self, previous: ConnectionState, status: GattStatus) {
        match self.queue.current_tag() {
            // A requested disconnect resolves before the drain. The policy
            // was cleared when it was enqueued, so neither the lost handler
            // nor the reconnect loop fires.
            Some("disconnect") => {
                tracing::info!("link closed by request");
                if let Some(item) = self.queue.take_current() {
                    item.finish(Ok(OpOutput::Done));
                    LinkStats::bump(&self.stats.ops_completed);
                }
                self.drop_link_state(true, true);
            }
            // A connect attempt failed before the link was established.
            // Platforms report this as a disconnect with a failure status,
            // with or without an intervening connecting event.
            Some("connect") if previous != ConnectionState::Connected => {
                if self.auto_connect_active() {
                    // Attempt left pending; the platform keeps retrying.
                    tracing::warn!(%status, "connect attempt failed, auto-connect keeps trying");
                    return;
                }
                if let Some(item) = self.queue.take_current() {
                    let error = if status.is_success() {
                        LinkError::LostConnection
                    } else {
                        LinkError::Status {
                            tag: "connect",
                            status,
                        }
                    };
                    item.finish(Err(error));
                    LinkStats::bump(&self.stats.ops_failed);
                }
                // The link was never up, so the lost handler does not fire.
                self.drop_link_state(false, false);
            }
            _ => {
                if previous == ConnectionState::Disconnected {
                    tracing::debug!(%status, "redundant disconnected event");
                    return;
                }
                tracing::warn!(%status, "link lost");
                LinkStats::bump(&self.stats.connections_lost);
                self.drop_link_state(true, true);
            }
        }
    }

    /// Shared teardown for any lost link: drain, invalidate subscriptions,
    /// notify the caller, optionally kick the reconnect loop.
    fn drop_link_state(&mut self, invoke_lost: bool, reconnect: bool) {
        let drained = self.queue.drain(LinkError::LostConnection);
        if drained > 0 {
            tracing::debug!(drained, "queued operations failed with lost connection");
            self.stats
                .ops_failed
                .fetch_add(drained as u64, std::sync::atomic::Ordering::Relaxed);
        }

        // The remote side may have forgotten its subscription state; the
        // handlers are invalidated rather than silently resubscribed.
        if !self.notify_handlers.is_empty() {
            tracing::debug!(
                handlers = self.notify_handlers.len(),
                "clearing notify handlers"
            );
            self.notify_handlers.clear();
        }

        if invoke_lost {
            if let Some(policy) = self.reconnect.as_mut() {
                if let Some(on_lost) = policy.on_lost.as_mut() {
                    invoke_guarded("lost-connection", || on_lost());
                }
            }
        }

        if reconnect {
            self.maybe_auto_reconnect();
        }
    }

    /// Synthesize a fresh connect attempt through the retained handler
    fn maybe_auto_reconnect(&mut self) {
        let Some(policy) = &self.reconnect else {
            return;
        };
        if !policy.auto_connect {
            return;
        }
        let Some(handler) = policy.on_result.clone() else {
            return;
        };
        tracing::info!("auto-connect requeueing connect attempt");
        LinkStats::bump(&self.stats.reconnect_attempts);
        let item = WorkItem::with_sink(
            "connect",
            move |result| call_connect_handler(&handler, result.map(|_| ())),
            |ctx| ctx.transport.connect(true),
        );
        self.enqueue_item(item);
    }

    fn auto_connect_active(&self) -> bool {
        self.reconnect
            .as_ref()
            .map(|policy| policy.auto_connect)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Adapter lifecycle and hang recovery
    // ------------------------------------------------------------------

    fn handle_adapter_state(&mut self, enabled: bool) {
        if enabled {
            tracing::info!("adapter enabled");
            if self.state == ConnectionState::Disconnected {
                self.maybe_auto_reconnect();
            }
        } else {
            tracing::warn!("adapter disabled");
            if self.state == ConnectionState::Connected {
                // Radio loss is a link loss. The reconnect attempt waits for
                // the re-enable broadcast; issuing it now would be refused.
                self.state = ConnectionState::Disconnected;
                LinkStats::bump(&self.stats.connections_lost);
                self.drop_link_state(true, false);
            }
        }
    }

    /// Best-effort recovery from the platform hang status: power the
    /// adapter down, then poll it back up a bounded number of times.
    /// Independent of the queue.
    fn begin_adapter_recovery(&mut self) {
        if self.recovery.is_some() {
            return;
        }
        tracing::warn!("radio stack hang status, power-cycling the adapter");
        LinkStats::bump(&self.stats.adapter_recoveries);
        if !self.transport.reset_adapter() {
            tracing::warn!("adapter reset refused");
            return;
        }
        self.recovery = Some(RecoveryState {
            polls_left: self.config.recovery_max_polls,
        });
    }

    fn step_recovery(&mut self) {
        let Some(recovery) = self.recovery.as_mut() else {
            return;
        };
        if self.transport.adapter_enabled() {
            tracing::info!("adapter recovered");
            self.recovery = None;
            return;
        }
        if recovery.polls_left == 0 {
            tracing::warn!("adapter recovery gave up after bounded polling");
            self.recovery = None;
            return;
        }
        recovery.polls_left -= 1;
        self.transport.enable_adapter();
    }
}

impl core::fmt::Debug for LinkDriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkDriver")
            .field("state", &self.state)
            .field("outstanding", &self.queue.outstanding())
            .field("notify_handlers", &self.notify_handlers.len())
            .finish()
    }
}
