// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The coroutine rendezvous wrapper.
//!
//! A `Fiber` wraps one cooperatively-scheduled body and disciplines every
//! handoff between it and its driver. `resume` states why it is waking the
//! fiber and who it is; the woken suspension verifies both before accepting
//! the message. `kill` forces the next suspension to fail instead.
//!
//! The body is an `async` block driven one `poll` at a time; the
//! compiler-generated state machine stands in for a stack switch. Control
//! strictly alternates: `resume` does not return until the body has
//! suspended or finished, and a suspended body does not continue until the
//! next `resume` (or `kill`). One wrapper, one driver, one logical thread;
//! `Fiber` is deliberately not `Send`.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crate::error::{FiberError, Location};
use crate::message::Message;
use crate::registry::{self, FiberId};
use crate::token::{rendezvous_key, Identity, Token};

/// Fiber lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Created or suspended; not executing.
    Waiting,
    /// Body code is executing.
    Running,
    /// The body returned, or let an error propagate out.
    Terminated,
}

/// State shared between the driver-facing [`Fiber`] and the body-facing
/// [`FiberScope`]. Only the side currently holding control touches it, so
/// no locking is needed.
pub(crate) struct Shared {
    pub(crate) state: FiberState,
    /// The single exchange slot: the last message handed across, in either
    /// direction.
    slot: Message,
    /// Rendezvous key stored by the most recent `resume`/`start`.
    expected: u64,
    /// Pending kill, with the `kill` call site. Taken by the suspension
    /// that observes it.
    killed: Option<Location>,
    /// Set by `Suspend`'s parking poll; lets the driver reject a body that
    /// went pending through some foreign future.
    yielded: bool,
}

type BodyFuture = Pin<Box<dyn Future<Output = Result<Message, FiberError>>>>;
type BodyFn = Rc<dyn Fn(FiberScope) -> BodyFuture>;

/// The wrapper around one coroutine body.
pub struct Fiber {
    shared: Rc<RefCell<Shared>>,
    /// Re-armable body factory. `None` for [`Fiber::from_future`] fibers.
    body: Option<BodyFn>,
    /// The in-flight body, if one has been created since the last re-arm.
    fut: Option<BodyFuture>,
    /// Whether the body has been entered since the last re-arm.
    entered: bool,
    waker: Waker,
    id: FiberId,
}

/// The fiber never parks on external events, so its waker has nothing to do.
struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

impl Fiber {
    /// Wrap a body factory. The factory runs on first entry and again after
    /// [`Fiber::reset`], so a terminated fiber can be restarted from the top.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn(FiberScope) -> Fut + 'static,
        Fut: Future<Output = Result<Message, FiberError>> + 'static,
    {
        let body: BodyFn = Rc::new(move |scope| -> BodyFuture { Box::pin(body(scope)) });
        Self::build(Some(body), None)
    }

    /// Wrap an existing computation as a run-once fiber. Re-arming it after
    /// termination requires [`Fiber::reset_with`].
    pub fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<Message, FiberError>> + 'static,
    {
        let fut: BodyFuture = Box::pin(fut);
        Self::build(None, Some(fut))
    }

    fn build(body: Option<BodyFn>, fut: Option<BodyFuture>) -> Self {
        let shared = Rc::new(RefCell::new(Shared {
            state: FiberState::Waiting,
            slot: Message::default(),
            expected: 0,
            killed: None,
            yielded: false,
        }));
        let id = registry::register(&shared);
        Fiber {
            shared,
            body,
            fut,
            entered: false,
            waker: Waker::from(Arc::new(NoopWake)),
            id,
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> FiberState {
        self.shared.borrow().state
    }

    pub fn is_waiting(&self) -> bool {
        self.state() == FiberState::Waiting
    }

    pub fn is_running(&self) -> bool {
        self.state() == FiberState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == FiberState::Terminated
    }

    /// The last message handed across the rendezvous, in either direction.
    pub fn last_message(&self) -> Message {
        self.shared.borrow().slot.clone()
    }

    /// Opaque handle identifying this fiber in the diagnostics registry.
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Enter the fiber for the first time, or restart a terminated one.
    /// Equivalent to [`Fiber::resume`] with the empty token and no identity.
    ///
    /// # Panics
    /// If the fiber is `Running`.
    pub fn start(&mut self) -> Result<Message, FiberError> {
        self.start_with(Message::default())
    }

    /// [`Fiber::start`] with an explicit initial message in the exchange
    /// slot. A terminated fiber is re-armed first: the body will run again
    /// from the top with the slot cleared to the default.
    pub fn start_with(&mut self, initial: Message) -> Result<Message, FiberError> {
        let state = self.state();
        assert!(
            state != FiberState::Running,
            "start: fiber is already running"
        );
        if state == FiberState::Terminated {
            self.rearm();
        }
        self.resume_keyed(rendezvous_key(&Token::new(""), Identity::NONE), initial)
    }

    /// Wake the fiber, stating the token and identity its pending suspension
    /// must agree on, and hand it `message`. Blocks until the body suspends
    /// again or finishes, then returns the message it left behind. If that
    /// message has the error member active, the error comes back as `Err`
    /// rather than as data. A panicking body propagates as a panic.
    ///
    /// # Panics
    /// If the fiber is not `Waiting`.
    pub fn resume(
        &mut self,
        token: &Token,
        identity: Identity,
        message: Message,
    ) -> Result<Message, FiberError> {
        self.resume_keyed(rendezvous_key(token, identity), message)
    }

    /// Force-cancel a waiting fiber: its next suspension observation fails
    /// with [`FiberError::Killed`] before any identity check. Blocks until
    /// the body reacts, terminating (uncaught) or suspending again
    /// (caught). A fiber that was never entered terminates immediately.
    /// Returns nothing; callers observe the outcome through the status
    /// queries and [`Fiber::last_message`].
    ///
    /// # Panics
    /// If the fiber is not `Waiting`, or a kill is already pending.
    #[track_caller]
    pub fn kill(&mut self) {
        let origin = Location::caller();
        {
            let mut shared = self.shared.borrow_mut();
            assert!(
                shared.state == FiberState::Waiting,
                "kill: fiber is {:?}, expected Waiting",
                shared.state
            );
            assert!(shared.killed.is_none(), "kill: fiber is already mid-kill");
            if !self.entered {
                // Never entered: there is no suspension point to deliver
                // Killed to, and running the body now would be worse.
                shared.state = FiberState::Terminated;
                shared.slot = Message::Error(FiberError::Killed { origin });
                drop(shared);
                self.fut = None;
                return;
            }
            shared.killed = Some(origin);
            shared.yielded = false;
            shared.state = FiberState::Running;
        }
        // Raw wake: expected key and exchange slot are left untouched, so
        // the killed check must run before the identity check.
        let step = self.poll_body();
        let _ = self.settle(step);
    }

    /// Re-arm a terminated fiber to run its body again from the top, with
    /// the exchange slot cleared to the default. Callers are responsible
    /// for only resetting terminated fibers.
    pub fn reset(&mut self) {
        debug_assert!(
            self.shared.borrow().state == FiberState::Terminated,
            "reset: fiber is not Terminated"
        );
        self.rearm();
    }

    /// [`Fiber::reset`], replacing the body.
    pub fn reset_with<F, Fut>(&mut self, body: F)
    where
        F: Fn(FiberScope) -> Fut + 'static,
        Fut: Future<Output = Result<Message, FiberError>> + 'static,
    {
        debug_assert!(
            self.shared.borrow().state == FiberState::Terminated,
            "reset: fiber is not Terminated"
        );
        self.body = Some(Rc::new(move |scope| -> BodyFuture { Box::pin(body(scope)) }));
        self.rearm();
    }

    fn rearm(&mut self) {
        self.fut = None;
        self.entered = false;
        let mut shared = self.shared.borrow_mut();
        shared.state = FiberState::Waiting;
        shared.slot = Message::default();
        shared.expected = 0;
        shared.killed = None;
        shared.yielded = false;
    }

    fn resume_keyed(&mut self, key: u64, message: Message) -> Result<Message, FiberError> {
        {
            let mut shared = self.shared.borrow_mut();
            assert!(
                shared.state == FiberState::Waiting,
                "resume: fiber is {:?}, expected Waiting",
                shared.state
            );
            shared.expected = key;
            shared.slot = message;
            shared.yielded = false;
            shared.state = FiberState::Running;
        }
        let step = self.poll_body();
        self.settle(step)
    }

    fn poll_body(&mut self) -> Poll<Result<Message, FiberError>> {
        self.entered = true;
        let shared = self.shared.clone();
        let fut = self.fut.get_or_insert_with(|| {
            let body = self
                .body
                .as_ref()
                .expect("fiber has no body factory; re-arm with reset_with");
            body(FiberScope { shared })
        });
        let mut cx = Context::from_waker(&self.waker);
        fut.as_mut().poll(&mut cx)
    }

    /// Record where the body left off and translate the exchange slot into
    /// the driver-facing result.
    fn settle(&mut self, step: Poll<Result<Message, FiberError>>) -> Result<Message, FiberError> {
        let mut shared = self.shared.borrow_mut();
        match step {
            Poll::Pending => {
                assert!(
                    shared.yielded,
                    "fiber suspended outside FiberScope::suspend"
                );
                shared.state = FiberState::Waiting;
                match shared.slot.clone() {
                    Message::Error(error) => Err(error),
                    message => Ok(message),
                }
            }
            Poll::Ready(outcome) => {
                shared.state = FiberState::Terminated;
                self.fut = None;
                match outcome {
                    Ok(message) => {
                        shared.slot = message.clone();
                        match message {
                            Message::Error(error) => Err(error),
                            message => Ok(message),
                        }
                    }
                    Err(error) => {
                        shared.slot = Message::Error(error.clone());
                        Err(error)
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        registry::unregister(self.id);
    }
}

/// Body-side handle to the rendezvous: the only legal way to suspend.
/// Cloneable, so the body can thread it through helpers.
#[derive(Clone)]
pub struct FiberScope {
    shared: Rc<RefCell<Shared>>,
}

impl FiberScope {
    /// Suspend the fiber, leaving `message` for the driver, and state the
    /// token and identity the waking `resume` must agree on. The returned
    /// future completes when a later `resume`/`start`/`kill` wakes this
    /// suspension: a pending kill fails it with [`FiberError::Killed`], a
    /// wrong `(token, identity)` fails it with [`FiberError::Mismatch`],
    /// and a matching resume yields the resumer's message.
    #[track_caller]
    pub fn suspend(&self, token: &Token, identity: Identity, message: Message) -> Suspend {
        Suspend {
            shared: self.shared.clone(),
            key: rendezvous_key(token, identity),
            at: Location::caller(),
            outgoing: Some(message),
        }
    }

    /// Deliver `error` to the resumer without unwinding the fiber:
    /// [`FiberScope::suspend`] with the error member active and no identity.
    #[track_caller]
    pub fn raise(&self, token: &Token, error: FiberError) -> Suspend {
        self.suspend(token, Identity::NONE, Message::Error(error))
    }

    /// Lifecycle state as seen from the body: `Running` while the body
    /// itself executes.
    pub fn state(&self) -> FiberState {
        self.shared.borrow().state
    }
}

/// An in-flight suspension. The parking poll stores the outgoing message;
/// the wake-up poll runs the kill check, then the identity check, then
/// accepts the incoming message.
pub struct Suspend {
    shared: Rc<RefCell<Shared>>,
    key: u64,
    at: Location,
    /// Outgoing message; taken by the parking poll.
    outgoing: Option<Message>,
}

impl Future for Suspend {
    type Output = Result<Message, FiberError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut shared = this.shared.borrow_mut();
        if let Some(outgoing) = this.outgoing.take() {
            assert!(
                shared.state == FiberState::Running,
                "suspend: fiber is {:?}, expected Running",
                shared.state
            );
            shared.slot = outgoing;
            shared.yielded = true;
            return Poll::Pending;
        }
        // Woken by resume, start, or kill.
        if let Some(origin) = shared.killed.take() {
            return Poll::Ready(Err(FiberError::Killed { origin }));
        }
        if this.key != shared.expected {
            return Poll::Ready(Err(FiberError::Mismatch {
                at: this.at,
                expected: shared.expected,
                observed: this.key,
            }));
        }
        Poll::Ready(Ok(shared.slot.clone()))
    }
}
