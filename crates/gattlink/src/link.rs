//! Public facade over the serialized operation queue.
//!
//! Every operation family has an awaitable entry point (suspends the calling
//! task until resolution or the configured timeout) and a `*_with` callback
//! entry point that returns immediately and fires its handler exactly once.
//! Both funnel into the same work items; ordering is strict FIFO.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::LinkConfig;
use crate::continuation::Continuation;
use crate::driver::{shared_connect_handler, Command, CommandSender, ConnectSink, LinkDriver};
use crate::error::{LinkError, Result};
use crate::monitoring::{LinkStats, StatsSnapshot};
use crate::protocol::{Characteristic, Descriptor, Service, WriteType};
use crate::queue::{OpOutput, WorkItem};
use crate::transport::{EventSender, GattTransport};

// ----------------------------------------------------------------------------
// Output Conversions
// ----------------------------------------------------------------------------

// A wrong variant here means the driver resolved an operation with the wrong
// payload kind, which is a queue bug, not a transport failure.

fn into_unit(_output: OpOutput) {}

fn into_value(output: OpOutput) -> Vec<u8> {
    match output {
        OpOutput::Value(value) => value,
        other => unreachable!("byte-valued operation resolved with {other:?}"),
    }
}

fn into_services(output: OpOutput) -> Vec<Service> {
    match output {
        OpOutput::Services(services) => services,
        other => unreachable!("service discovery resolved with {other:?}"),
    }
}

fn into_mtu(output: OpOutput) -> u16 {
    match output {
        OpOutput::Mtu(mtu) => mtu,
        other => unreachable!("mtu request resolved with {other:?}"),
    }
}

// ----------------------------------------------------------------------------
// GattLink
// ----------------------------------------------------------------------------

/// Cheaply cloneable handle to a [`LinkDriver`] task
#[derive(Debug, Clone)]
pub struct GattLink {
    commands: CommandSender,
    config: LinkConfig,
    stats: Arc<LinkStats>,
}

impl GattLink {
    pub(crate) fn new(commands: CommandSender, config: LinkConfig, stats: Arc<LinkStats>) -> Self {
        Self {
            commands,
            config,
            stats,
        }
    }

    /// Spawn a driver for `transport` on the current runtime. Returns the
    /// facade handle, the event sender the platform glue feeds, and the
    /// driver task handle.
    pub fn spawn(
        transport: impl GattTransport + 'static,
        config: LinkConfig,
    ) -> (GattLink, EventSender, JoinHandle<()>) {
        let driver = LinkDriver::new(transport, config);
        let link = driver.link();
        let events = driver.event_sender();
        let task = tokio::spawn(driver.run());
        (link, events, task)
    }

    /// Point-in-time operational counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| LinkError::Closed)
    }

    fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.send(Command::Enqueue(item))
    }

    /// Await a channel continuation with the configured timeout. The
    /// in-flight transport operation is not cancelled on timeout; its late
    /// completion is absorbed by the dropped receiver.
    async fn await_response<T>(
        &self,
        tag: &'static str,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.response_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::Closed),
            Err(_) => Err(LinkError::Timeout {
                tag,
                after: self.config.response_timeout,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------

    /// Connect to the device, awaiting the first result. With
    /// `auto_connect`, later reconnect outcomes are logged; use
    /// [`GattLink::connect_with`] to observe them.
    ///
    /// Fails with [`LinkError::Busy`] if any operation is queued or in
    /// flight; connect seeds the session.
    pub async fn connect(&self, auto_connect: bool) -> Result<()> {
        let (continuation, rx) = Continuation::channel();
        let on_result = if auto_connect {
            // The retained handler resolves the awaiter once; reconnect
            // outcomes after that only leave a trace.
            let mut first = Some(continuation);
            ConnectSink::Retained(shared_connect_handler(move |result: Result<()>| {
                match first.take() {
                    Some(continuation) => continuation.finish(result),
                    None => match result {
                        Ok(()) => tracing::info!("auto-connect re-established the link"),
                        Err(err) => tracing::warn!(%err, "auto-connect attempt failed"),
                    },
                }
            }))
        } else {
            ConnectSink::Once(continuation)
        };
        self.send(Command::Connect {
            auto_connect,
            on_result,
            on_lost: None,
        })?;
        self.await_response("connect", rx).await
    }

    /// Connect with callbacks. `on_result` fires for the initial attempt
    /// and, when `auto_connect` is set, again for every reconnect attempt's
    /// outcome, always through the same handler. `on_lost` fires whenever an
    /// established link drops (unless the drop was requested via
    /// [`GattLink::close_connection`]).
    pub fn connect_with(
        &self,
        auto_connect: bool,
        on_result: impl FnMut(Result<()>) + Send + 'static,
        on_lost: impl FnMut() + Send + 'static,
    ) -> Result<()> {
        let on_result = if auto_connect {
            ConnectSink::Retained(shared_connect_handler(on_result))
        } else {
            ConnectSink::Once(Continuation::callback(on_result))
        };
        self.send(Command::Connect {
            auto_connect,
            on_result,
            on_lost: Some(Box::new(on_lost)),
        })
    }

    // ------------------------------------------------------------------
    // Service discovery
    // ------------------------------------------------------------------

    pub async fn discover_services(&self) -> Result<Vec<Service>> {
        let (continuation, rx) = Continuation::channel();
        self.enqueue_discover(continuation)?;
        self.await_response("discover-services", rx).await
    }

    pub fn discover_services_with(
        &self,
        on_result: impl FnOnce(Result<Vec<Service>>) + Send + 'static,
    ) -> Result<()> {
        self.enqueue_discover(Continuation::callback(on_result))
    }

    fn enqueue_discover(&self, continuation: Continuation<Vec<Service>>) -> Result<()> {
        self.enqueue(WorkItem::new(
            "discover-services",
            continuation,
            into_services,
            |ctx| ctx.transport.discover_services(),
        ))
    }

    // ------------------------------------------------------------------
    // Characteristic reads and writes
    // ------------------------------------------------------------------

    pub async fn read_characteristic(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let (continuation, rx) = Continuation::channel();
        self.enqueue_read(characteristic, continuation)?;
        self.await_response("read-characteristic", rx).await
    }

    pub fn read_characteristic_with(
        &self,
        characteristic: &Characteristic,
        on_result: impl FnOnce(Result<Vec<u8>>) + Send + 'static,
    ) -> Result<()> {
        self.enqueue_read(characteristic, Continuation::callback(on_result))
    }

    fn enqueue_read(
        &self,
        characteristic: &Characteristic,
        continuation: Continuation<Vec<u8>>,
    ) -> Result<()> {
        let characteristic = characteristic.clone();
        self.enqueue(WorkItem::new(
            "read-characteristic",
            continuation,
            into_value,
            move |ctx| ctx.transport.read_characteristic(&characteristic),
        ))
    }

    pub async fn write_characteristic(
        &self,
        characteristic: &Characteristic,
        value: Vec<u8>,
        write_type: WriteType,
    ) -> Result<()> {
        let (continuation, rx) = Continuation::channel();
        self.enqueue_write(characteristic, value, write_type, continuation)?;
        self.await_response("write-characteristic", rx).await
    }

    pub fn write_characteristic_with(
        &self,
        characteristic: &Characteristic,
        value: Vec<u8>,
        write_type: WriteType,
        on_result: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        self.enqueue_write(
            characteristic,
            value,
            write_type,
            Continuation::callback(on_result),
        )
    }

    fn enqueue_write(
        &self,
        characteristic: &Characteristic,
        value: Vec<u8>,
        write_type: WriteType,
        continuation: Continuation<()>,
    ) -> Result<()> {
        let characteristic = characteristic.clone();
        self.enqueue(WorkItem::new(
            "write-characteristic",
            continuation,
            into_unit,
            move |ctx| {
                ctx.transport
                    .write_characteristic(&characteristic, &value, write_type)
            },
        ))
    }

    /// Two-phase write: stage the value, verify the stack's echo against a
    /// shadow copy, then commit. A mismatched echo aborts the transaction
    /// and fails with a synthetic failure status.
    pub async fn write_reliable(
        &self,
        characteristic: &Characteristic,
        value: Vec<u8>,
    ) -> Result<()> {
        let (continuation, rx) = Continuation::channel();
        self.enqueue_write_reliable(characteristic, value, continuation)?;
        self.await_response("write-reliable", rx).await
    }

    pub fn write_reliable_with(
        &self,
        characteristic: &Characteristic,
        value: Vec<u8>,
        on_result: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        self.enqueue_write_reliable(characteristic, value, Continuation::callback(on_result))
    }

    fn enqueue_write_reliable(
        &self,
        characteristic: &Characteristic,
        value: Vec<u8>,
        continuation: Continuation<()>,
    ) -> Result<()> {
        let characteristic = characteristic.clone();
        self.enqueue(WorkItem::new(
            "write-reliable",
            continuation,
            into_unit,
            move |ctx| {
                if !ctx.transport.begin_reliable_write() {
                    return false;
                }
                if !ctx
                    .transport
                    .write_characteristic(&characteristic, &value, WriteType::WithResponse)
                {
                    ctx.transport.abort_reliable_write();
                    return false;
                }
                // Shadow stashed at start time; the write-done event checks
                // the echo against it.
                *ctx.reliable_shadow = Some(value);
                true
            },
        ))
    }

    // ------------------------------------------------------------------
    // Descriptors
    // ------------------------------------------------------------------

    pub async fn read_descriptor(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let (continuation, rx) = Continuation::channel();
        self.enqueue_read_descriptor(descriptor, continuation)?;
        self.await_response("read-descriptor", rx).await
    }

    pub fn read_descriptor_with(
        &self,
        descriptor: &Descriptor,
        on_result: impl FnOnce(Result<Vec<u8>>) + Send + 'static,
    ) -> Result<()> {
        self.enqueue_read_descriptor(descriptor, Continuation::callback(on_result))
    }

    fn enqueue_read_descriptor(
        &self,
        descriptor: &Descriptor,
        continuation: Continuation<Vec<u8>>,
    ) -> Result<()> {
        let descriptor = descriptor.clone();
        self.enqueue(WorkItem::new(
            "read-descriptor",
            continuation,
            into_value,
            move |ctx| ctx.transport.read_descriptor(&descriptor),
        ))
    }

    /// Descriptor writes expose only the callback entry point
    pub fn write_descriptor_with(
        &self,
        descriptor: &Descriptor,
        value: Vec<u8>,
        on_result: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        let descriptor = descriptor.clone();
        self.enqueue(WorkItem::new(
            "write-descriptor",
            Continuation::callback(on_result),
            into_unit,
            move |ctx| ctx.transport.write_descriptor(&descriptor, &value),
        ))
    }

    // ------------------------------------------------------------------
    // MTU
    // ------------------------------------------------------------------

    /// Negotiate the MTU; resolves with the value the stack settled on
    pub async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        let (continuation, rx) = Continuation::channel();
        self.enqueue_mtu(mtu, continuation)?;
        self.await_response("request-mtu", rx).await
    }

    pub fn request_mtu_with(
        &self,
        mtu: u16,
        on_result: impl FnOnce(Result<u16>) + Send + 'static,
    ) -> Result<()> {
        self.enqueue_mtu(mtu, Continuation::callback(on_result))
    }

    fn enqueue_mtu(&self, mtu: u16, continuation: Continuation<u16>) -> Result<()> {
        self.enqueue(WorkItem::new(
            "request-mtu",
            continuation,
            into_mtu,
            move |ctx| ctx.transport.request_mtu(mtu),
        ))
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Subscribe to notifications: registers `on_changed`, toggles local
    /// routing, and writes the enable value to the client-configuration
    /// descriptor. Fails with [`LinkError::DescriptorNotFound`] (and
    /// registers nothing) when the peripheral lacks that descriptor.
    ///
    /// Handlers do not survive the link: any disconnect clears the whole
    /// table and subscribers must re-register.
    pub async fn set_notify(
        &self,
        characteristic: &Characteristic,
        on_changed: impl FnMut(Vec<u8>) + Send + 'static,
    ) -> Result<()> {
        let (continuation, rx) = Continuation::channel();
        self.send_set_notify(characteristic, true, Some(Box::new(on_changed)), continuation)?;
        self.await_response("set-notify", rx).await
    }

    pub fn set_notify_with(
        &self,
        characteristic: &Characteristic,
        on_changed: impl FnMut(Vec<u8>) + Send + 'static,
        on_result: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        self.send_set_notify(
            characteristic,
            true,
            Some(Box::new(on_changed)),
            Continuation::callback(on_result),
        )
    }

    /// Unsubscribe: drops the handler and writes the disable value to the
    /// client-configuration descriptor
    pub async fn clear_notify(&self, characteristic: &Characteristic) -> Result<()> {
        let (continuation, rx) = Continuation::channel();
        self.send_set_notify(characteristic, false, None, continuation)?;
        self.await_response("set-notify", rx).await
    }

    pub fn clear_notify_with(
        &self,
        characteristic: &Characteristic,
        on_result: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        self.send_set_notify(characteristic, false, None, Continuation::callback(on_result))
    }

    fn send_set_notify(
        &self,
        characteristic: &Characteristic,
        enable: bool,
        on_changed: Option<Box<dyn FnMut(Vec<u8>) + Send>>,
        continuation: Continuation<()>,
    ) -> Result<()> {
        self.send(Command::SetNotify {
            characteristic: characteristic.clone(),
            enable,
            on_changed,
            continuation,
        })
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Drop the reconnect policy and disconnect the link. The policy is
    /// cleared before the disconnect is issued, so this never fires the
    /// lost-connection handler.
    pub async fn close_connection(&self) -> Result<()> {
        let (continuation, rx) = Continuation::channel();
        self.send(Command::CloseConnection { continuation })?;
        self.await_response("disconnect", rx).await
    }

    pub fn close_connection_with(
        &self,
        on_result: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        self.send(Command::CloseConnection {
            continuation: Continuation::callback(on_result),
        })
    }

    /// Shut the driver down: fail everything outstanding, release the
    /// transport, stop the task. Closing an already-closed link is a no-op.
    pub async fn close(&self) -> Result<()> {
        let (continuation, rx) = Continuation::channel();
        if self.send(Command::Close { continuation }).is_err() {
            return Ok(());
        }
        self.await_response("close", rx).await
    }
}
