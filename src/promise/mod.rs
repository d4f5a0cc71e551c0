//! # Promise Runtime - The Concurrency Currency of the Gateway
//!
//! This module provides single-assignment value cells used to mediate
//! every asynchronous computation in the crate: backend operations return
//! promises, the dispatchers compose them with combinators, and deadlines
//! are enforced by racing an operation against a timer cell.
//!
//! ## Cell Model
//!
//! A [`Promise<T>`] is a shared handle to a cell with three observable
//! states:
//!
//! - **Pending**: no outcome yet; dependents queue up in FIFO order
//! - **Fulfilled**: carries a value of `T`
//! - **Rejected**: carries a [`GatewayError`] reason
//!
//! A cell transitions out of `Pending` at most once; later `resolve` or
//! `reject` calls are no-ops. Children attached with [`Promise::then`] /
//! [`Promise::catch`] are notified in attachment order. A cell rejected
//! with no children holds its reason silently until some descendant is
//! awaited.
//!
//! ## Chaining
//!
//! Each link's transform returns `Result<Step<U>, GatewayError>`:
//!
//! - `Ok(Step::Value(u))` fulfills the child with `u`
//! - `Ok(Step::Chain(p))` makes the child adopt another promise's outcome
//! - `Err(reason)` rejects the child — the explicit error branch that
//!   reroutes a failure to the nearest reject handler downstream
//!
//! A reject handler that returns `Ok(..)` *recovers*: the child cell is
//! fulfilled with the recovery value.
//!
//! ## Combinators
//!
//! - [`Promise::all`]: fulfills with values in input order (an empty input
//!   fulfills synchronously); rejects with the first rejection
//! - [`Promise::race`]: adopts the first settlement, fulfill or reject
//! - [`Promise::timeout`]: timer cell with an optional fulfill arm and an
//!   optional reject arm; the shorter timer wins
//! - [`Promise::spawn`]: bridges a future running on the tokio runtime
//!   into a promise cell
//!
//! ## Concurrency Contract
//!
//! The state transition is atomic (the cell's mutex also guards the child
//! list); children run outside the lock, sequentially, in FIFO order.
//! [`Promise::wait`] parks the task on a [`tokio::sync::Notify`]. The cell
//! works unchanged on the multi-threaded scheduler.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::GatewayError;

/// The outcome a settled cell hands to children and waiters.
pub type Settled<T> = Result<T, GatewayError>;

/// What a `then`/`catch` transform produces for the child cell.
pub enum Step<T> {
    /// Settle the child with this value.
    Value(T),
    /// Make the child adopt another promise's eventual outcome.
    Chain(Promise<T>),
}

/// Observable state of a promise cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

type ChildFn<T> = Box<dyn FnOnce(Settled<T>) + Send>;

enum State<T> {
    Pending { children: Vec<ChildFn<T>> },
    Fulfilled(T),
    Rejected(GatewayError),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Notify,
}

/// A single-assignment value cell; cloning yields another handle to the
/// same cell.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").field("state", &self.state()).finish()
    }
}

impl<T> Promise<T> {
    /// Current state without consuming the outcome.
    pub fn state(&self) -> PromiseState {
        match *self.lock() {
            State::Pending { .. } => PromiseState::Pending,
            State::Fulfilled(_) => PromiseState::Fulfilled,
            State::Rejected(_) => PromiseState::Rejected,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.shared.state.lock().expect("promise cell poisoned")
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Create an unsettled cell.
    pub fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending {
                    children: Vec::new(),
                }),
                settled: Notify::new(),
            }),
        }
    }

    /// Create a cell already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        let cell = Self::pending();
        cell.resolve(value);
        cell
    }

    /// Create a cell already rejected with `reason`.
    pub fn rejected(reason: GatewayError) -> Self {
        let cell = Self::pending();
        cell.reject(reason);
        cell
    }

    /// Run `future` on the tokio runtime and settle the cell with its
    /// outcome. Must be called from within a runtime context.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Settled<T>> + Send + 'static,
    {
        let cell = Self::pending();
        let handle = cell.clone();
        tokio::spawn(async move {
            handle.settle(future.await);
        });
        cell
    }

    /// Fulfill the cell if it is still pending; otherwise a no-op.
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Reject the cell if it is still pending; otherwise a no-op.
    pub fn reject(&self, reason: GatewayError) {
        self.settle(Err(reason));
    }

    /// Resolve-with-a-promise: adopt `other`'s eventual outcome.
    pub fn adopt(&self, other: Promise<T>) {
        let cell = self.clone();
        other.attach(Box::new(move |outcome| cell.settle(outcome)));
    }

    /// The settled outcome, if any.
    pub fn try_settled(&self) -> Option<Settled<T>> {
        match &*self.lock() {
            State::Pending { .. } => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Suspend until the cell settles, then return its outcome.
    pub async fn wait(&self) -> Settled<T> {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.try_settled() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Attach a resolve transform; rejections pass through untouched.
    pub fn then<U, F>(&self, on_resolve: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Step<U>, GatewayError> + Send + 'static,
    {
        let child = Promise::pending();
        let cell = child.clone();
        self.attach(Box::new(move |outcome| match outcome {
            Ok(value) => cell.complete(on_resolve(value)),
            Err(reason) => cell.reject(reason),
        }));
        child
    }

    /// Attach both arms. A reject handler returning `Ok` recovers: the
    /// child is fulfilled with the recovery value.
    pub fn then_or<U, F, G>(&self, on_resolve: F, on_reject: G) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Step<U>, GatewayError> + Send + 'static,
        G: FnOnce(GatewayError) -> Result<Step<U>, GatewayError> + Send + 'static,
    {
        let child = Promise::pending();
        let cell = child.clone();
        self.attach(Box::new(move |outcome| match outcome {
            Ok(value) => cell.complete(on_resolve(value)),
            Err(reason) => cell.complete(on_reject(reason)),
        }));
        child
    }

    /// Attach a reject handler only; values pass through untouched.
    pub fn catch<G>(&self, on_reject: G) -> Promise<T>
    where
        G: FnOnce(GatewayError) -> Result<Step<T>, GatewayError> + Send + 'static,
    {
        self.then_or(|value| Ok(Step::Value(value)), on_reject)
    }

    /// Fulfill with every value, in input order, once all inputs fulfill;
    /// reject with the first rejection. An empty input fulfills
    /// synchronously with an empty vector.
    pub fn all(items: Vec<Promise<T>>) -> Promise<Vec<T>> {
        let joined = Promise::pending();
        if items.is_empty() {
            joined.resolve(Vec::new());
            return joined;
        }

        let total = items.len();
        let slots: Arc<Mutex<(Vec<Option<T>>, usize)>> =
            Arc::new(Mutex::new((vec![None; total], 0)));
        for (index, item) in items.into_iter().enumerate() {
            let slots = slots.clone();
            let joined = joined.clone();
            item.attach(Box::new(move |outcome| match outcome {
                Ok(value) => {
                    let complete = {
                        let mut guard = slots.lock().expect("promise join poisoned");
                        guard.0[index] = Some(value);
                        guard.1 += 1;
                        guard.1 == total
                    };
                    if complete {
                        let values = {
                            let mut guard = slots.lock().expect("promise join poisoned");
                            guard
                                .0
                                .iter_mut()
                                .map(|slot| slot.take().expect("slot settled"))
                                .collect()
                        };
                        joined.resolve(values);
                    }
                }
                Err(reason) => joined.reject(reason),
            }));
        }
        joined
    }

    /// Adopt the first settlement among the inputs, fulfill or reject.
    pub fn race(items: Vec<Promise<T>>) -> Promise<T> {
        let winner = Promise::pending();
        for item in items {
            let winner = winner.clone();
            item.attach(Box::new(move |outcome| winner.settle(outcome)));
        }
        winner
    }

    /// A timer cell: fulfills with `fulfill.1` after `fulfill.0` and/or
    /// rejects with `reject.1` after `reject.0`; the shorter timer wins.
    /// With both arms absent the cell never self-settles. Must be called
    /// from within a runtime context.
    pub fn timeout(
        fulfill: Option<(Duration, T)>,
        reject: Option<(Duration, GatewayError)>,
    ) -> Promise<T> {
        let cell = Promise::pending();
        if let Some((after, value)) = fulfill {
            let cell = cell.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                cell.resolve(value);
            });
        }
        if let Some((after, reason)) = reject {
            let cell = cell.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                cell.reject(reason);
            });
        }
        cell
    }

    fn complete(&self, step: Result<Step<T>, GatewayError>) {
        match step {
            Ok(Step::Value(value)) => self.resolve(value),
            Ok(Step::Chain(other)) => self.adopt(other),
            Err(reason) => self.reject(reason),
        }
    }

    /// Transition out of `Pending` exactly once and notify children in
    /// attachment order, outside the lock.
    fn settle(&self, outcome: Settled<T>) {
        let children = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending { children } => {
                    let drained = std::mem::take(children);
                    *state = match &outcome {
                        Ok(value) => State::Fulfilled(value.clone()),
                        Err(reason) => State::Rejected(reason.clone()),
                    };
                    Some(drained)
                }
                _ => None,
            }
        };
        if let Some(children) = children {
            for child in children {
                child(outcome.clone());
            }
            self.shared.settled.notify_waiters();
        }
    }

    /// Enqueue a child, or run it immediately if the cell has settled.
    fn attach(&self, child: ChildFn<T>) {
        let immediate = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending { children } => {
                    children.push(child);
                    None
                }
                State::Fulfilled(value) => Some((child, Ok(value.clone()))),
                State::Rejected(reason) => Some((child, Err(reason.clone()))),
            }
        };
        if let Some((child, outcome)) = immediate {
            child(outcome);
        }
    }
}
