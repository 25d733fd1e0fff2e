//! Local mirror of the coordinator's round states.
//!
//! The updater polls the coordinator on a period and hands out awaiters: futures that resolve
//! with the first observed state of a round that satisfies a predicate. Every awaiter resolves
//! exactly once, with a state, because its round disappeared, or because it was cancelled or the
//! updater stopped.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use wabisabi_common::periodic::PeriodicAction;
use wabisabi_primitives::{
    api::WabiSabiApi, errors::ApiError, ids::RoundId, phase::Phase, round_state::RoundState,
};

use crate::errors::RoundStateAwaiterError;

type RoundPredicate = Box<dyn Fn(&RoundState) -> bool + Send + Sync>;
type AwaiterResult = Result<RoundState, RoundStateAwaiterError>;

struct Awaiter {
    /// `None` waits for any round matching the predicate.
    round_id: Option<RoundId>,
    predicate: RoundPredicate,
    respond_on: oneshot::Sender<AwaiterResult>,
}

impl fmt::Debug for Awaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Awaiter")
            .field("round_id", &self.round_id)
            .field("predicate", &"<fn>")
            .finish_non_exhaustive()
    }
}

impl Awaiter {
    /// Resolves the awaiter against `states`, or hands it back if it has to keep waiting.
    fn resolve(self, states: &HashMap<RoundId, RoundState>) -> Option<Self> {
        match self.round_id {
            Some(round_id) => match states.get(&round_id) {
                None => {
                    let _ = self
                        .respond_on
                        .send(Err(RoundStateAwaiterError::RoundNotRunning(round_id)));
                    None
                }
                Some(state) if (self.predicate)(state) => {
                    let _ = self.respond_on.send(Ok(state.clone()));
                    None
                }
                Some(_) => Some(self),
            },
            None => match states.values().find(|state| (self.predicate)(state)) {
                Some(state) => {
                    let _ = self.respond_on.send(Ok(state.clone()));
                    None
                }
                None => Some(self),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<RoundId, RoundState>,
    awaiters: Vec<Awaiter>,
    /// Whether at least one update completed.
    synced: bool,
    stopped: bool,
}

/// Keeps the latest round states reported by the coordinator.
pub struct RoundStateUpdater {
    api: Arc<dyn WabiSabiApi>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for RoundStateUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundStateUpdater")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl RoundStateUpdater {
    /// Creates an updater with no known rounds. Nothing is fetched until the first
    /// [`update`](Self::update).
    pub fn new(api: Arc<dyn WabiSabiApi>) -> Self {
        Self {
            api,
            inner: Mutex::default(),
        }
    }

    /// The last known state of `round_id`.
    pub fn round_state(&self, round_id: &RoundId) -> Option<RoundState> {
        self.inner.lock().states.get(round_id).cloned()
    }

    /// Every last known round state.
    pub fn round_states(&self) -> Vec<RoundState> {
        self.inner.lock().states.values().cloned().collect()
    }

    /// Number of awaiters still waiting.
    pub fn pending_awaiters(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.awaiters.retain(|a| !a.respond_on.is_closed());
        inner.awaiters.len()
    }

    /// Fetches the round states from the coordinator and resolves every awaiter they satisfy.
    pub async fn update(&self, cancel: &CancellationToken) -> Result<(), ApiError> {
        let states = self.api.get_status(cancel).await?;
        self.apply(states);
        Ok(())
    }

    fn apply(&self, states: Vec<RoundState>) {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return;
        }

        inner.states = states.into_iter().map(|s| (s.id, s)).collect();
        inner.synced = true;

        let pending = std::mem::take(&mut inner.awaiters);
        let before = pending.len();
        let Inner {
            states, awaiters, ..
        } = &mut *inner;
        awaiters.extend(
            pending
                .into_iter()
                .filter(|a| !a.respond_on.is_closed())
                .filter_map(|a| a.resolve(states)),
        );

        trace!(
            rounds = states.len(),
            resolved = before - awaiters.len(),
            waiting = awaiters.len(),
            "round states updated"
        );
    }

    /// Waits for the first state of `round_id` (or of any round, if `None`) satisfying
    /// `predicate`.
    ///
    /// A state already known to satisfy the predicate resolves the awaiter immediately.
    pub async fn create_round_awaiter(
        &self,
        round_id: Option<RoundId>,
        predicate: impl Fn(&RoundState) -> bool + Send + Sync + 'static,
        cancel: &CancellationToken,
    ) -> Result<RoundState, RoundStateAwaiterError> {
        let (respond_on, response) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return Err(RoundStateAwaiterError::Stopped);
            }

            let awaiter = Awaiter {
                round_id,
                predicate: Box::new(predicate),
                respond_on,
            };
            // Before the first update an unknown round is not evidence of anything.
            let waiting = match (inner.synced, round_id) {
                (false, _) => Some(awaiter),
                (true, Some(id)) if !inner.states.contains_key(&id) => Some(awaiter),
                (true, _) => awaiter.resolve(&inner.states),
            };
            if let Some(awaiter) = waiting {
                inner.awaiters.push(awaiter);
            }
        }

        tokio::select! {
            res = response => res.unwrap_or(Err(RoundStateAwaiterError::Stopped)),
            _ = cancel.cancelled() => {
                debug!(?round_id, "round state awaiter cancelled");
                Err(RoundStateAwaiterError::Cancelled)
            }
        }
    }

    /// Waits until `round_id` reaches `phase` or any later one.
    pub async fn wait_for_phase(
        &self,
        round_id: RoundId,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<RoundState, RoundStateAwaiterError> {
        self.create_round_awaiter(Some(round_id), move |s| s.phase >= phase, cancel)
            .await
    }

    /// Fails every pending awaiter and refuses new ones.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        for awaiter in inner.awaiters.drain(..) {
            let _ = awaiter
                .respond_on
                .send(Err(RoundStateAwaiterError::Stopped));
        }
    }
}

impl PeriodicAction for RoundStateUpdater {
    type Error = ApiError;

    fn name(&self) -> &'static str {
        "round-state-updater"
    }

    fn run(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.update(cancel)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use wabisabi_coordinator::{Arena, WabiSabiConfig};
    use wabisabi_primitives::messages::{
        ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest,
        InputRegistrationResponse, InputsRemovalRequest, OutputRegistrationRequest,
        OutputRegistrationResponse, ReadyToSignRequest, ReissueCredentialRequest,
        ReissueCredentialResponse, TransactionSignaturesRequest,
    };
    use wabisabi_test_utils::node::MockBitcoinRpc;

    use super::*;

    /// Serves whatever round states the test puts in it.
    #[derive(Debug, Default)]
    struct StatusFeed {
        states: Mutex<Vec<RoundState>>,
    }

    impl StatusFeed {
        fn set(&self, states: Vec<RoundState>) {
            *self.states.lock() = states;
        }
    }

    fn unsupported<T>() -> Result<T, ApiError> {
        Err(ApiError::Transport("unsupported".to_string()))
    }

    #[async_trait]
    impl WabiSabiApi for StatusFeed {
        async fn register_input(
            &self,
            _: InputRegistrationRequest,
            _: &CancellationToken,
        ) -> Result<InputRegistrationResponse, ApiError> {
            unsupported()
        }

        async fn confirm_connection(
            &self,
            _: ConnectionConfirmationRequest,
            _: &CancellationToken,
        ) -> Result<ConnectionConfirmationResponse, ApiError> {
            unsupported()
        }

        async fn register_output(
            &self,
            _: OutputRegistrationRequest,
            _: &CancellationToken,
        ) -> Result<OutputRegistrationResponse, ApiError> {
            unsupported()
        }

        async fn ready_to_sign(
            &self,
            _: ReadyToSignRequest,
            _: &CancellationToken,
        ) -> Result<(), ApiError> {
            unsupported()
        }

        async fn remove_input(
            &self,
            _: InputsRemovalRequest,
            _: &CancellationToken,
        ) -> Result<(), ApiError> {
            unsupported()
        }

        async fn sign_transaction(
            &self,
            _: TransactionSignaturesRequest,
            _: &CancellationToken,
        ) -> Result<(), ApiError> {
            unsupported()
        }

        async fn reissue_credentials(
            &self,
            _: ReissueCredentialRequest,
            _: &CancellationToken,
        ) -> Result<ReissueCredentialResponse, ApiError> {
            unsupported()
        }

        async fn get_status(&self, _: &CancellationToken) -> Result<Vec<RoundState>, ApiError> {
            Ok(self.states.lock().clone())
        }
    }

    async fn some_round() -> RoundState {
        let arena = Arena::new(WabiSabiConfig::default(), Arc::new(MockBitcoinRpc::default()));
        arena.step(&CancellationToken::new()).await.expect("step");
        arena.round_states().await.remove(0)
    }

    fn setup() -> (Arc<StatusFeed>, Arc<RoundStateUpdater>) {
        let feed = Arc::new(StatusFeed::default());
        let updater = Arc::new(RoundStateUpdater::new(feed.clone()));
        (feed, updater)
    }

    #[tokio::test]
    async fn awaiter_resolves_once_the_phase_is_reached() {
        let (feed, updater) = setup();
        let cancel = CancellationToken::new();
        let mut round = some_round().await;
        let round_id = round.id;
        feed.set(vec![round.clone()]);
        updater.update(&cancel).await.unwrap();

        let waiting = {
            let updater = updater.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                updater
                    .wait_for_phase(round_id, Phase::OutputRegistration, &cancel)
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(updater.pending_awaiters(), 1);

        round.phase = Phase::OutputRegistration;
        feed.set(vec![round.clone()]);
        updater.update(&cancel).await.unwrap();

        let state = waiting.await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::OutputRegistration);
        assert_eq!(updater.pending_awaiters(), 0);
    }

    #[tokio::test]
    async fn known_state_resolves_immediately() {
        let (feed, updater) = setup();
        let cancel = CancellationToken::new();
        let round = some_round().await;
        feed.set(vec![round.clone()]);
        updater.update(&cancel).await.unwrap();

        let state = updater
            .create_round_awaiter(None, |s| s.phase == Phase::InputRegistration, &cancel)
            .await
            .unwrap();
        assert_eq!(state.id, round.id);
    }

    #[tokio::test]
    async fn vanished_round_fails_its_awaiters() {
        let (feed, updater) = setup();
        let cancel = CancellationToken::new();
        let round = some_round().await;
        let round_id = round.id;
        feed.set(vec![round]);
        updater.update(&cancel).await.unwrap();

        let waiting = {
            let updater = updater.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                updater
                    .wait_for_phase(round_id, Phase::Ended, &cancel)
                    .await
            })
        };
        tokio::task::yield_now().await;

        feed.set(Vec::new());
        updater.update(&cancel).await.unwrap();

        assert_eq!(
            waiting.await.unwrap(),
            Err(RoundStateAwaiterError::RoundNotRunning(round_id))
        );
    }

    #[tokio::test]
    async fn cancelled_awaiter_is_dropped() {
        let (feed, updater) = setup();
        let round = some_round().await;
        let round_id = round.id;
        feed.set(vec![round]);
        updater.update(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let waiting = {
            let updater = updater.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                updater
                    .wait_for_phase(round_id, Phase::Ended, &cancel)
                    .await
            })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert_eq!(
            waiting.await.unwrap(),
            Err(RoundStateAwaiterError::Cancelled)
        );
        assert_eq!(updater.pending_awaiters(), 0);
    }

    #[tokio::test]
    async fn stop_fails_pending_and_future_awaiters() {
        let (_feed, updater) = setup();
        let cancel = CancellationToken::new();

        let waiting = {
            let updater = updater.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { updater.create_round_awaiter(None, |_| true, &cancel).await })
        };
        tokio::task::yield_now().await;

        updater.stop();
        assert_eq!(waiting.await.unwrap(), Err(RoundStateAwaiterError::Stopped));

        let late = tokio::time::timeout(
            Duration::from_secs(1),
            updater.create_round_awaiter(None, |_| true, &cancel),
        )
        .await
        .expect("resolves without waiting");
        assert_eq!(late, Err(RoundStateAwaiterError::Stopped));
    }
}
