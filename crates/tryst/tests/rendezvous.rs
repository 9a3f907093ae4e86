// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-to-end rendezvous scenarios: the blocking-work offload bridge,
//! multi-stage pipelines, token policing, and driver-side kill policies.

use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tryst::{Fiber, FiberError, FiberState, Identity, Message, Token};

/// A fiber parks while the driver runs the blocking work on a worker
/// thread, then gets the result handed back through `resume`. The request
/// object doubles as the rendezvous identity, so only the driver holding
/// it can deliver the result.
#[test]
fn offload_bridge_hands_a_worker_result_to_the_fiber() {
    struct Request {
        lo: i64,
        hi: i64,
    }

    let request = Rc::new(Request { lo: 1, hi: 100 });
    let body_request = request.clone();

    let mut fiber = Fiber::new(move |scope| {
        let request = body_request.clone();
        async move {
            let token = Token::new("disk_read");
            let got = scope
                .suspend(&token, Identity::of(&*request), Message::default())
                .await?;
            let sum = got.as_int().expect("worker result is an integer");
            Ok(Message::Int(sum * 2))
        }
    });

    fiber.start().unwrap();
    assert_eq!(fiber.state(), FiberState::Waiting);

    let (tx, rx) = mpsc::channel();
    let (lo, hi) = (request.lo, request.hi);
    thread::spawn(move || {
        let _ = tx.send((lo..=hi).sum::<i64>());
    });
    let sum = rx.recv().expect("worker delivers exactly one result");

    let done = fiber
        .resume(
            &Token::new("disk_read"),
            Identity::of(&*request),
            Message::Int(sum),
        )
        .unwrap();
    assert_eq!(done.as_int(), Some(10100));
    assert!(fiber.is_terminated());
}

#[test]
fn pipeline_runs_one_token_per_stage() {
    let mut fiber = Fiber::new(|scope| async move {
        let parsed = scope
            .suspend(&Token::new("stage/parse"), Identity::NONE, Message::default())
            .await?;
        let doubled = parsed.as_int().expect("parse stage feeds an integer") * 2;
        let emitted = scope
            .suspend(
                &Token::new("stage/emit"),
                Identity::NONE,
                Message::Int(doubled),
            )
            .await?;
        Ok(emitted)
    });

    fiber.start().unwrap();

    let doubled = fiber
        .resume(&Token::new("stage/parse"), Identity::NONE, Message::Int(21))
        .unwrap();
    assert_eq!(doubled, Message::Int(42));

    let done = fiber
        .resume(&Token::new("stage/emit"), Identity::NONE, Message::Int(0))
        .unwrap();
    assert_eq!(done, Message::Int(0));
    assert!(fiber.is_terminated());
}

#[test]
fn wrong_token_is_rejected() {
    let mut fiber = Fiber::new(|scope| async move {
        let got = scope
            .suspend(&Token::new("expected"), Identity::NONE, Message::default())
            .await;
        assert!(matches!(got, Err(FiberError::Mismatch { .. })));
        got
    });
    fiber.start().unwrap();

    let err = fiber
        .resume(&Token::new("imposter"), Identity::NONE, Message::default())
        .unwrap_err();
    assert!(
        matches!(err, FiberError::Mismatch { at, .. } if at.file.ends_with("rendezvous.rs"))
    );
    assert!(fiber.is_terminated());
}

/// Timeouts belong to the driver: wait however long the policy allows,
/// then `kill` the fiber that never got its result.
#[test]
fn driver_timeout_policy_is_built_from_kill() {
    let mut fiber = Fiber::new(|scope| async move {
        let token = Token::new("net_read");
        let got = scope
            .suspend(&token, Identity::NONE, Message::default())
            .await?;
        Ok(got)
    });
    fiber.start().unwrap();

    let (tx, rx) = mpsc::channel::<i64>();
    thread::spawn(move || {
        // A stalled backend: holds the sender open, never sends.
        thread::sleep(Duration::from_millis(50));
        drop(tx);
    });

    match rx.recv_timeout(Duration::from_millis(5)) {
        Ok(value) => {
            fiber
                .resume(&Token::new("net_read"), Identity::NONE, Message::Int(value))
                .unwrap();
        }
        Err(_) => fiber.kill(),
    }

    assert!(fiber.is_terminated());
    match fiber.last_message().as_error() {
        Some(FiberError::Killed { origin }) => {
            assert!(origin.file.ends_with("rendezvous.rs"));
        }
        other => panic!("expected Killed, got {:?}", other),
    }
}

/// A worker failure travels the other way: the fiber raises the fault and
/// the driver sees the exact same error value out of its `resume` call.
#[test]
fn offload_failure_is_raised_back_to_the_driver() {
    let fault = FiberError::raised("disk gone");
    let body_fault = fault.clone();

    let mut fiber = Fiber::new(move |scope| {
        let fault = body_fault.clone();
        async move {
            let token = Token::new("disk_read");
            let retry = scope.raise(&token, fault).await?;
            Ok(retry)
        }
    });

    let err = fiber.start().unwrap_err();
    assert_eq!(err, fault);
    assert!(fiber.is_waiting());

    // The driver opts to retry with a stand-in value instead.
    let done = fiber
        .resume(&Token::new("disk_read"), Identity::NONE, Message::Int(-1))
        .unwrap();
    assert_eq!(done, Message::Int(-1));
    assert!(fiber.is_terminated());
}
