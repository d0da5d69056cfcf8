use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use super::executor::RequestExecutor;
use super::sampler::sample_think_time;
use super::selector::WeightedSelector;
use super::RequestResult;
use crate::scenario::{EndpointDefinition, ThinkTime};

/// Everything a virtual user needs from its run. Shared, read-mostly.
pub struct RunContext {
    pub run_start: Instant,
    pub executor: RequestExecutor,
    pub endpoints: Vec<EndpointDefinition>,
    pub selector: WeightedSelector,
    pub think_time: ThinkTime,
    pub results: Mutex<Vec<RequestResult>>,
    pub in_flight: Semaphore,
    pub active_users: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Spawning,
    Running,
    Stopping,
    Done,
}

#[derive(Debug, Clone)]
pub struct UserReport {
    pub user_id: usize,
    pub requests: u64,
    pub state: UserState,
}

/// One simulated user: select, execute, record, think, repeat.
pub struct VirtualUser {
    id: usize,
    state: UserState,
    ctx: Arc<RunContext>,
    stop: watch::Receiver<bool>,
    retire: watch::Receiver<bool>,
    rng: StdRng,
}

impl VirtualUser {
    pub fn new(
        id: usize,
        ctx: Arc<RunContext>,
        stop: watch::Receiver<bool>,
        retire: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            state: UserState::Spawning,
            ctx,
            stop,
            retire,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn state(&self) -> UserState {
        self.state
    }

    fn should_stop(&self) -> bool {
        *self.stop.borrow() || *self.retire.borrow()
    }

    pub async fn run(mut self) -> UserReport {
        self.state = UserState::Running;
        self.ctx.active_users.fetch_add(1, Ordering::SeqCst);
        debug!("Virtual user {} running", self.id);

        let mut requests = 0u64;
        while !self.should_stop() {
            let idx = self.ctx.selector.pick(&mut self.rng);

            let permit = tokio::select! {
                permit = self.ctx.in_flight.acquire() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = stop_requested(&mut self.stop, &mut self.retire) => break,
            };
            // An in-flight request always completes, even if stop arrives meanwhile.
            let result = self
                .ctx
                .executor
                .execute(&self.ctx.endpoints[idx], self.id, self.ctx.run_start)
                .await;
            drop(permit);

            self.ctx.results.lock().await.push(result);
            requests += 1;

            let think = sample_think_time(&mut self.rng, &self.ctx.think_time);
            if think.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(think) => {}
                _ = stop_requested(&mut self.stop, &mut self.retire) => break,
            }
        }

        self.state = UserState::Stopping;
        self.ctx.active_users.fetch_sub(1, Ordering::SeqCst);
        debug!("Virtual user {} stopping after {} requests", self.id, requests);
        self.state = UserState::Done;

        UserReport {
            user_id: self.id,
            requests,
            state: self.state,
        }
    }
}

/// Resolves once either the run stop flag or the user's retire flag is set.
/// A dropped sender counts as a stop.
async fn stop_requested(stop: &mut watch::Receiver<bool>, retire: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = stop.wait_for(|v| *v) => {}
        _ = retire.wait_for(|v| *v) => {}
    }
}
