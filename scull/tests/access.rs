#[macro_use]
extern crate hamcrest;

use std::sync::Arc;
use std::time::Duration;

use hamcrest::prelude::*;
use scull::{AccessMode, Caller, Controller, OpenRequest, Registry, ScullError, Session};
use tokio_util::sync::CancellationToken;

fn request(access: AccessMode, uid: u32) -> OpenRequest {
    OpenRequest::new(access, Caller::new(uid))
}

fn gated(registry: &Registry) -> &scull::access::Gated {
    match registry.controller("scullwuid").map(Arc::as_ref) {
        Some(Controller::Gated(gated)) => gated,
        other => panic!("scullwuid is {other:?}"),
    }
}

async fn wait_for_waiters(registry: &Registry, count: usize) {
    while gated(registry).waiting() < count {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn read_all(session: &mut Session) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        match session.read(&mut buf).await.unwrap() {
            0 => return data,
            n => data.extend_from_slice(&buf[..n]),
        }
    }
}

//
// Exclusive
//

#[tokio::test]
async fn test_exclusive_admits_one_of_many_concurrent_opens() {
    let registry = Registry::default();

    let opens = (0..8).map(|uid| registry.open("scullsingle", request(AccessMode::ReadOnly, uid)));
    let results = futures::future::join_all(opens).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(ScullError::Busy)))
        .count();
    assert_that!(admitted, is(equal_to(1)));
    assert_that!(busy, is(equal_to(7)));
}

#[tokio::test]
async fn test_exclusive_reopens_after_close() {
    let registry = Registry::default();

    let first = registry
        .open("scullsingle", request(AccessMode::ReadWrite, 1000))
        .await
        .unwrap();
    let err = registry
        .open("scullsingle", request(AccessMode::ReadWrite, 1000))
        .await
        .unwrap_err();
    assert_eq!(err, ScullError::Busy);
    assert!(err.is_transient());

    first.close();
    registry
        .open("scullsingle", request(AccessMode::ReadWrite, 2000))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_exclusive_released_on_drop() {
    let registry = Registry::default();
    {
        let _session = registry
            .open("scullsingle", request(AccessMode::ReadOnly, 1000))
            .await
            .unwrap();
    }
    assert!(registry
        .open("scullsingle", request(AccessMode::ReadOnly, 1000))
        .await
        .is_ok());
}

//
// Owner
//

#[tokio::test]
async fn test_owner_rejects_other_users() {
    let registry = Registry::default();

    let first = registry
        .open("sculluid", request(AccessMode::ReadWrite, 1000))
        .await
        .unwrap();
    let again = registry
        .open("sculluid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();

    let err = registry
        .open("sculluid", request(AccessMode::ReadOnly, 1001))
        .await
        .unwrap_err();
    assert_eq!(err, ScullError::Busy);

    // Effective uid of the owner is enough
    registry
        .open(
            "sculluid",
            OpenRequest::new(AccessMode::ReadOnly, Caller::new(1001).with_euid(1000)),
        )
        .await
        .unwrap();

    // Privileged callers always get in
    registry
        .open(
            "sculluid",
            OpenRequest::new(AccessMode::ReadOnly, Caller::new(0).privileged()),
        )
        .await
        .unwrap();

    drop(first);
    drop(again);
}

#[tokio::test]
async fn test_owner_changes_hands_after_last_close() {
    let registry = Registry::default();

    let first = registry
        .open("sculluid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();
    let second = registry
        .open("sculluid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();

    first.close();
    assert_eq!(
        registry
            .open("sculluid", request(AccessMode::ReadOnly, 1001))
            .await
            .unwrap_err(),
        ScullError::Busy
    );

    second.close();
    registry
        .open("sculluid", request(AccessMode::ReadOnly, 1001))
        .await
        .unwrap();
}

//
// Gated
//

#[tokio::test]
async fn test_gated_other_user_waits_for_close() {
    let registry = Arc::new(Registry::default());

    let mut owner = registry
        .open("scullwuid", request(AccessMode::WriteOnly, 1000))
        .await
        .unwrap();
    owner.write_all(b"from 1000").await.unwrap();

    let waiter = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut session = registry
                .open("scullwuid", request(AccessMode::ReadOnly, 1001))
                .await
                .unwrap();
            read_all(&mut session).await
        })
    };

    wait_for_waiters(&registry, 1).await;
    assert!(!waiter.is_finished());
    assert_eq!(gated(&registry).owner(), Some(1000));

    owner.close();
    assert_eq!(waiter.await.unwrap(), b"from 1000");
}

#[tokio::test]
async fn test_gated_owner_reenters_without_waiting() {
    let registry = Registry::default();

    let _first = registry
        .open("scullwuid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();
    let _second = registry
        .open("scullwuid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();

    assert_eq!(gated(&registry).open_count(), 2);
    assert_eq!(gated(&registry).waiting(), 0);
}

#[tokio::test]
async fn test_gated_wakes_waiters_one_at_a_time() {
    let registry = Arc::new(Registry::default());

    let owner = registry
        .open("scullwuid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();

    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut waiters = Vec::new();
    for uid in [1001, 1002] {
        let task_registry = Arc::clone(&registry);
        let done_tx = done_tx.clone();
        waiters.push(tokio::spawn(async move {
            let session = task_registry
                .open("scullwuid", request(AccessMode::ReadOnly, uid))
                .await
                .unwrap();
            done_tx.send(uid).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.close();
        }));
        wait_for_waiters(&registry, 1).await;
    }
    wait_for_waiters(&registry, 2).await;

    owner.close();
    // FIFO: the first waiter gets in first, the second follows its close
    assert_eq!(done_rx.recv().await, Some(1001));
    assert_eq!(done_rx.recv().await, Some(1002));
    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(gated(&registry).owner(), None);
}

#[tokio::test]
async fn test_gated_wait_is_interruptible() {
    let registry = Arc::new(Registry::default());

    let owner = registry
        .open("scullwuid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let waiter = {
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            registry
                .open(
                    "scullwuid",
                    request(AccessMode::ReadOnly, 1001).with_cancel(cancel),
                )
                .await
                .map(|_| ())
        })
    };

    wait_for_waiters(&registry, 1).await;
    cancel.cancel();
    assert_eq!(waiter.await.unwrap(), Err(ScullError::Interrupted));

    // The owner is unaffected and can still close normally
    assert_eq!(gated(&registry).owner(), Some(1000));
    owner.close();
    registry
        .open("scullwuid", request(AccessMode::ReadOnly, 1002))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_gated_dropped_opener_passes_wakeup_on() {
    let registry = Registry::default();

    let owner = registry
        .open("scullwuid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();

    let mut second = Box::pin(registry.open("scullwuid", request(AccessMode::ReadOnly, 2000)));
    let mut third = Box::pin(registry.open("scullwuid", request(AccessMode::ReadOnly, 3000)));
    assert!(futures::poll!(&mut second).is_pending());
    assert!(futures::poll!(&mut third).is_pending());
    assert_eq!(gated(&registry).waiting(), 2);

    // uid 2000 is woken first, then gives up without ever running again
    owner.close();
    drop(second);

    let session = tokio::time::timeout(Duration::from_millis(300), third)
        .await
        .expect("scullwuid is free, the next waiter must get in")
        .unwrap();
    assert_eq!(gated(&registry).owner(), Some(3000));
    drop(session);
}

#[tokio::test]
async fn test_gated_timeout_while_waiting_keeps_queue_moving() {
    let registry = Arc::new(Registry::default());

    let owner = registry
        .open("scullwuid", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();

    let impatient = tokio::time::timeout(
        Duration::from_millis(20),
        registry.open("scullwuid", request(AccessMode::ReadOnly, 2000)),
    )
    .await;
    assert!(impatient.is_err());

    let patient = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .open("scullwuid", request(AccessMode::ReadOnly, 3000))
                .await
                .map(|_| ())
        })
    };
    wait_for_waiters(&registry, 2).await;

    owner.close();
    assert_eq!(patient.await.unwrap(), Ok(()));
}

//
// Keyed
//

#[tokio::test]
async fn test_keyed_devices_are_private_and_persistent() {
    let registry = Registry::default();
    let open = |key: &'static str, access| {
        registry.open(
            "scullpriv",
            OpenRequest::new(access, Caller::new(1000).with_key(key)),
        )
    };

    let mut tty1 = open("tty1", AccessMode::WriteOnly).await.unwrap();
    tty1.write_all(b"one").await.unwrap();
    tty1.close();

    let mut tty2 = open("tty2", AccessMode::WriteOnly).await.unwrap();
    tty2.write_all(b"two").await.unwrap();
    tty2.close();

    let mut again = open("tty1", AccessMode::ReadOnly).await.unwrap();
    assert_eq!(read_all(&mut again).await, b"one");
    assert_eq!(again.device().name(), "scullpriv:tty1");

    let pool = match registry.controller("scullpriv").map(Arc::as_ref) {
        Some(Controller::Keyed(pool)) => pool,
        other => panic!("scullpriv is {other:?}"),
    };
    assert_that!(pool.keys(), is(equal_to(vec!["tty1".to_string(), "tty2".to_string()])));
}

#[tokio::test]
async fn test_keyed_default_key_is_console() {
    let registry = Registry::default();
    let session = registry
        .open("scullpriv", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();
    assert_eq!(session.device().name(), "scullpriv:console");
}

//
// Write-only truncation
//

#[tokio::test]
async fn test_write_only_open_truncates() {
    let registry = Registry::default();

    let mut writer = registry
        .open("scull0", request(AccessMode::ReadWrite, 1000))
        .await
        .unwrap();
    writer.write_all(b"old contents").await.unwrap();
    writer.close();

    let reader = registry
        .open("scull0", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();
    assert_eq!(reader.device_size().await.unwrap(), 12);

    let truncating = registry
        .open("scull0", request(AccessMode::WriteOnly, 1000))
        .await
        .unwrap();
    assert_eq!(truncating.device_size().await.unwrap(), 0);
    assert_eq!(reader.device_size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_interrupted_truncation_releases_admission() {
    let registry = Registry::default();
    let device = Arc::clone(
        registry
            .controller("scullsingle")
            .and_then(|c| c.device())
            .unwrap(),
    );

    let cancel = CancellationToken::new();
    let guard = device.lock_uninterruptible().await;
    let opening = registry.open(
        "scullsingle",
        request(AccessMode::WriteOnly, 1000).with_cancel(cancel.clone()),
    );
    cancel.cancel();
    assert_eq!(opening.await.unwrap_err(), ScullError::Interrupted);
    drop(guard);

    // Nothing is left holding the exclusive device
    registry
        .open("scullsingle", request(AccessMode::ReadOnly, 1000))
        .await
        .unwrap();
}
