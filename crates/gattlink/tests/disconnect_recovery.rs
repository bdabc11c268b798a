//! Link-loss semantics: drain on disconnect, auto-reconnect through the
//! retained handler, requested teardown, adapter power-state handling and
//! the radio-stack hang recovery path.

mod test_utils;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gattlink::{GattEvent, GattStatus, LinkConfig, LinkError};
use test_utils::*;

#[tokio::test]
async fn test_disconnect_drains_every_outstanding_operation() {
    let mut harness = Harness::spawn(LinkConfig::default());
    harness.establish(false).await;

    let errors: Arc<Mutex<Vec<LinkError>>> = Arc::default();
    let capture = |errors: &Arc<Mutex<Vec<LinkError>>>| {
        let errors = errors.clone();
        move |result: gattlink::Result<Vec<u8>>| {
            errors.lock().unwrap().push(result.unwrap_err());
        }
    };

    // One in flight plus two pending.
    for n in 1..=3 {
        harness
            .link
            .read_characteristic_with(&numbered_characteristic(n), capture(&errors))
            .unwrap();
    }
    assert!(matches!(
        harness.expect_issued().await,
        IssuedOp::ReadCharacteristic(_)
    ));

    harness.send(disconnected(GattStatus::SUCCESS));

    harness
        .wait_until("all three drained", || errors.lock().unwrap().len() == 3)
        .await;
    assert!(errors
        .lock()
        .unwrap()
        .iter()
        .all(|e| *e == LinkError::LostConnection));

    // Nothing new was started by the drain.
    harness.expect_no_issuance().await;
}

#[tokio::test]
async fn test_auto_reconnect_reinvokes_the_original_handler() {
    let mut harness = Harness::spawn(LinkConfig::default());

    let results = Arc::new(AtomicUsize::new(0));
    let losses = Arc::new(AtomicUsize::new(0));
    let result_counter = results.clone();
    let loss_counter = losses.clone();

    harness
        .link
        .connect_with(
            true,
            move |result| {
                result.unwrap();
                result_counter.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                loss_counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    assert_eq!(
        harness.expect_issued().await,
        IssuedOp::Connect { auto_connect: true }
    );
    harness.send(connected());
    harness
        .wait_until("first connect resolved", || {
            results.load(Ordering::SeqCst) == 1
        })
        .await;

    // Link drops: lost handler fires and a fresh connect attempt is queued
    // through the same result handler.
    harness.send(disconnected(GattStatus(0x08)));
    assert_eq!(
        harness.expect_issued().await,
        IssuedOp::Connect { auto_connect: true }
    );
    assert_eq!(losses.load(Ordering::SeqCst), 1);

    harness.send(connected());
    harness
        .wait_until("same handler invoked again", || {
            results.load(Ordering::SeqCst) == 2
        })
        .await;

    // The queue accepts new work immediately after the reconnect.
    let link = harness.link.clone();
    let calls = async move {
        assert_eq!(link.request_mtu(185).await.unwrap(), 185);
    };
    let drive = async {
        assert_eq!(harness.expect_issued().await, IssuedOp::RequestMtu(185));
        harness.send(GattEvent::MtuChanged {
            status: GattStatus::SUCCESS,
            mtu: 185,
        });
    };
    tokio::join!(calls, drive);
}

#[tokio::test]
async fn test_requested_teardown_fires_no_lost_handler_and_no_reconnect() {
    let mut harness = Harness::spawn(LinkConfig::default());

    let losses = Arc::new(AtomicUsize::new(0));
    let loss_counter = losses.clone();
    harness
        .link
        .connect_with(true, |result| result.unwrap(), move || {
            loss_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(
        harness.expect_issued().await,
        IssuedOp::Connect { auto_connect: true }
    );
    harness.send(connected());

    let link = harness.link.clone();
    let calls = async move {
        link.close_connection().await.unwrap();
    };
    let drive = async {
        assert_eq!(harness.expect_issued().await, IssuedOp::Disconnect);
        harness.send(disconnected(GattStatus::SUCCESS));
    };
    tokio::join!(calls, drive);

    // Policy was cleared before the disconnect was issued: no lost-handler
    // invocation, no reconnect attempt.
    harness.expect_no_issuance().await;
    assert_eq!(losses.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_adapter_disable_acts_as_link_loss_and_enable_reconnects() {
    let mut harness = Harness::spawn(LinkConfig::default());

    let losses = Arc::new(AtomicUsize::new(0));
    let loss_counter = losses.clone();
    harness
        .link
        .connect_with(true, |_| {}, move || {
            loss_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(
        harness.expect_issued().await,
        IssuedOp::Connect { auto_connect: true }
    );
    harness.send(connected());

    let drained: Arc<Mutex<Vec<LinkError>>> = Arc::default();
    let errors = drained.clone();
    harness
        .link
        .read_characteristic_with(&characteristic(), move |result| {
            errors.lock().unwrap().push(result.unwrap_err());
        })
        .unwrap();
    assert!(matches!(
        harness.expect_issued().await,
        IssuedOp::ReadCharacteristic(_)
    ));

    // Radio goes down: outstanding work drains, lost handler fires, but the
    // reconnect waits for the radio to come back.
    harness.send(GattEvent::AdapterStateChanged { enabled: false });
    harness
        .wait_until("read drained", || drained.lock().unwrap().len() == 1)
        .await;
    assert_eq!(drained.lock().unwrap()[0], LinkError::LostConnection);
    assert_eq!(losses.load(Ordering::SeqCst), 1);
    harness.expect_no_issuance().await;

    harness.send(GattEvent::AdapterStateChanged { enabled: true });
    assert_eq!(
        harness.expect_issued().await,
        IssuedOp::Connect { auto_connect: true }
    );
}

#[tokio::test]
async fn test_stack_hang_status_power_cycles_the_adapter() {
    let config = LinkConfig::new()
        .with_recovery_poll_interval(Duration::from_millis(10))
        .with_recovery_max_polls(8);
    let mut harness = Harness::spawn(config);

    harness
        .link
        .connect_with(true, |_| {}, || {})
        .unwrap();
    assert_eq!(
        harness.expect_issued().await,
        IssuedOp::Connect { auto_connect: true }
    );
    harness.send(connected());

    // The infamous hang status arrives with the disconnect.
    harness.send(disconnected(GattStatus::STACK_ERROR));

    // Recovery resets the adapter; the auto-reconnect attempt is queued
    // independently of it.
    assert_eq!(harness.expect_issued().await, IssuedOp::ResetAdapter);
    assert_eq!(
        harness.expect_issued().await,
        IssuedOp::Connect { auto_connect: true }
    );
    // Bounded polling brings the adapter back up.
    assert_eq!(harness.expect_issued().await, IssuedOp::EnableAdapter);

    let link = harness.link.clone();
    harness
        .wait_until("recovery counted", || link.stats().adapter_recoveries == 1)
        .await;
}

#[tokio::test]
async fn test_connect_rejected_while_operations_outstanding() {
    let mut harness = Harness::spawn(LinkConfig::default());
    harness.establish(false).await;

    harness
        .link
        .read_characteristic_with(&characteristic(), |_| {})
        .unwrap();
    assert!(matches!(
        harness.expect_issued().await,
        IssuedOp::ReadCharacteristic(_)
    ));

    let result = harness.link.connect(false).await;
    assert_eq!(result, Err(LinkError::Busy { pending: 1 }));
}

#[tokio::test]
async fn test_failed_connect_attempt_without_auto_connect() {
    let mut harness = Harness::spawn(LinkConfig::default());

    let link = harness.link.clone();
    let calls = async move {
        let result = link.connect(false).await;
        assert_eq!(
            result,
            Err(LinkError::Status {
                tag: "connect",
                status: GattStatus(0x3E),
            })
        );
    };
    let drive = async {
        assert_eq!(
            harness.expect_issued().await,
            IssuedOp::Connect { auto_connect: false }
        );
        harness.send(disconnected(GattStatus(0x3E)));
    };
    tokio::join!(calls, drive);
}

#[tokio::test]
async fn test_failed_attempt_with_auto_connect_stays_pending() {
    let mut harness = Harness::spawn(LinkConfig::default());

    let results = Arc::new(AtomicUsize::new(0));
    let counter = results.clone();
    harness
        .link
        .connect_with(true, move |result| {
            result.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
        }, || {})
        .unwrap();
    assert_eq!(
        harness.expect_issued().await,
        IssuedOp::Connect { auto_connect: true }
    );

    // A failed attempt does not resolve the handler; the platform keeps
    // trying in the background.
    harness.send(disconnected(GattStatus(0x3E)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(results.load(Ordering::SeqCst), 0);

    // The eventual real connection resolves the original attempt.
    harness.send(connected());
    harness
        .wait_until("pending attempt resolved", || {
            results.load(Ordering::SeqCst) == 1
        })
        .await;
}

#[tokio::test]
async fn test_close_drains_and_stops_the_driver() {
    let mut harness = Harness::spawn(LinkConfig::default());
    harness.establish(false).await;

    let drained: Arc<Mutex<Vec<LinkError>>> = Arc::default();
    let errors = drained.clone();
    harness
        .link
        .read_characteristic_with(&characteristic(), move |result| {
            errors.lock().unwrap().push(result.unwrap_err());
        })
        .unwrap();
    assert!(matches!(
        harness.expect_issued().await,
        IssuedOp::ReadCharacteristic(_)
    ));

    harness.link.close().await.unwrap();
    assert_eq!(*drained.lock().unwrap(), [LinkError::Closed]);

    // The transport was released and the task wound down.
    assert_eq!(harness.expect_issued().await, IssuedOp::Close);
    let _ = tokio::time::timeout(Duration::from_secs(2), &mut harness.task)
        .await
        .expect("driver task did not stop");

    // Every further call observes the closed link.
    assert_eq!(
        harness.link.request_mtu(185).await,
        Err(LinkError::Closed)
    );
}
