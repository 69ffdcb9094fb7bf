//! OAuth transaction state machine.
//!
//! Every iteration of a [`TransactionWorker`] walks one authentication,
//! authorization code, token, introspection, validation and refresh
//! lifecycle. Each stage may end the transaction early with a configured
//! probability. The walk is decided up front by [`plan`], then executed step
//! by step with real (scaled) sleeps and one audit record per stage.

use crate::config::{BranchProbabilities, SimConfig};
use crate::context::SimContext;
use crate::error::IterationError;
use crate::simulation::audit::{self, AuditEntry};
use crate::simulation::identity::TransactionContext;
use crate::simulation::response_time;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    AuthnStart,
    AuthnFailure,
    AuthnSuccess,
    AuthzCodeFailure,
    AuthzCodeExpired,
    AuthzCodeIssued,
    TokenIssued,
    IntrospectionExpired,
    IntrospectionSuccess,
    ValidationExpired,
    ValidationSuccess,
    RefreshFailure,
    RefreshSuccess,
}

impl Stage {
    pub const ALL: [Stage; 13] = [
        Stage::AuthnStart,
        Stage::AuthnFailure,
        Stage::AuthnSuccess,
        Stage::AuthzCodeFailure,
        Stage::AuthzCodeExpired,
        Stage::AuthzCodeIssued,
        Stage::TokenIssued,
        Stage::IntrospectionExpired,
        Stage::IntrospectionSuccess,
        Stage::ValidationExpired,
        Stage::ValidationSuccess,
        Stage::RefreshFailure,
        Stage::RefreshSuccess,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::AuthnStart => "AuthnStart",
            Stage::AuthnFailure => "AuthnFailure",
            Stage::AuthnSuccess => "AuthnSuccess",
            Stage::AuthzCodeFailure => "AuthzCodeFailure",
            Stage::AuthzCodeExpired => "AuthzCodeExpired",
            Stage::AuthzCodeIssued => "AuthzCodeIssued",
            Stage::TokenIssued => "TokenIssued",
            Stage::IntrospectionExpired => "IntrospectionExpired",
            Stage::IntrospectionSuccess => "IntrospectionSuccess",
            Stage::ValidationExpired => "ValidationExpired",
            Stage::ValidationSuccess => "ValidationSuccess",
            Stage::RefreshFailure => "RefreshFailure",
            Stage::RefreshSuccess => "RefreshSuccess",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    AuthnFailure,
    AuthzCodeFailure,
    AuthzCodeExpired,
    IntrospectionExpired,
    ValidationExpired,
    RefreshFailure,
    Completed,
}

/// Reason attached to a rejected authorization code request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzFailure {
    InvalidClient,
    InvalidScope,
    InvalidSecret,
}

impl AuthzFailure {
    pub fn description(&self) -> &'static str {
        match self {
            AuthzFailure::InvalidClient => audit::INVALID_CLIENT_ID,
            AuthzFailure::InvalidScope => audit::INVALID_SCOPE,
            AuthzFailure::InvalidSecret => audit::INVALID_SECRET,
        }
    }

    fn pick<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.random_range(0..3) {
            0 => AuthzFailure::InvalidClient,
            1 => AuthzFailure::InvalidScope,
            _ => AuthzFailure::InvalidSecret,
        }
    }
}

/// A simulated pause between two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Authentication,
    AuthCodeLifetime,
    AccessTokenLifetime,
    RefreshWait,
    RefreshTokenLifetime,
}

impl Wait {
    fn duration<R: Rng + ?Sized>(&self, config: &SimConfig, rng: &mut R) -> Duration {
        let oauth = &config.oauth;
        let secs = match self {
            Wait::Authentication => oauth.authn_secs.sample(rng),
            Wait::AuthCodeLifetime => oauth.auth_code_lifetime_secs,
            Wait::AccessTokenLifetime => oauth.access_token_lifetime_secs,
            Wait::RefreshWait => oauth.refresh_wait_secs.sample(rng),
            Wait::RefreshTokenLifetime => oauth.refresh_token_lifetime_secs,
        };
        config.scaled(secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Wait(Wait),
    Emit(Stage),
}

#[derive(Debug, Clone)]
pub struct TransactionPlan {
    pub steps: Vec<Step>,
    pub outcome: Outcome,
    pub authz_failure: Option<AuthzFailure>,
}

impl TransactionPlan {
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.steps.iter().filter_map(|step| match step {
            Step::Emit(stage) => Some(*stage),
            Step::Wait(_) => None,
        })
    }

    fn finish(steps: Vec<Step>, outcome: Outcome) -> Self {
        Self {
            steps,
            outcome,
            authz_failure: None,
        }
    }
}

fn fires<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    rng.random::<f64>() < probability
}

/// Decide the full path of one transaction.
pub fn plan<R: Rng + ?Sized>(rng: &mut R, p: &BranchProbabilities) -> TransactionPlan {
    use Stage::*;

    let mut steps = vec![Step::Emit(AuthnStart), Step::Wait(Wait::Authentication)];

    if fires(rng, p.authn_failure) {
        steps.push(Step::Emit(AuthnFailure));
        return TransactionPlan::finish(steps, Outcome::AuthnFailure);
    }
    steps.push(Step::Emit(AuthnSuccess));

    if fires(rng, p.authz_code_failure) {
        steps.push(Step::Emit(AuthzCodeFailure));
        return TransactionPlan {
            authz_failure: Some(AuthzFailure::pick(rng)),
            ..TransactionPlan::finish(steps, Outcome::AuthzCodeFailure)
        };
    }
    if fires(rng, p.authz_code_expiry) {
        steps.push(Step::Wait(Wait::AuthCodeLifetime));
        steps.push(Step::Emit(AuthzCodeExpired));
        return TransactionPlan::finish(steps, Outcome::AuthzCodeExpired);
    }
    steps.push(Step::Emit(AuthzCodeIssued));
    steps.push(Step::Emit(TokenIssued));

    if fires(rng, p.introspection_expiry) {
        steps.push(Step::Wait(Wait::AccessTokenLifetime));
        steps.push(Step::Emit(IntrospectionExpired));
        return TransactionPlan::finish(steps, Outcome::IntrospectionExpired);
    }
    steps.push(Step::Emit(IntrospectionSuccess));

    if fires(rng, p.validation_expiry) {
        steps.push(Step::Wait(Wait::AccessTokenLifetime));
        steps.push(Step::Emit(ValidationExpired));
        return TransactionPlan::finish(steps, Outcome::ValidationExpired);
    }
    steps.push(Step::Emit(ValidationSuccess));
    steps.push(Step::Wait(Wait::RefreshWait));

    if fires(rng, p.refresh_failure) {
        steps.push(Step::Wait(Wait::RefreshTokenLifetime));
        steps.push(Step::Emit(RefreshFailure));
        return TransactionPlan::finish(steps, Outcome::RefreshFailure);
    }
    steps.push(Step::Emit(RefreshSuccess));
    TransactionPlan::finish(steps, Outcome::Completed)
}

/// Runs transactions back to back until cancelled.
pub struct TransactionWorker {
    id: Uuid,
    ctx: Arc<SimContext>,
    cancel: CancellationToken,
    rng: StdRng,
}

impl TransactionWorker {
    pub fn new(ctx: Arc<SimContext>, cancel: CancellationToken) -> Self {
        Self::with_rng(ctx, cancel, StdRng::from_rng(&mut rand::rng()))
    }

    pub fn with_rng(ctx: Arc<SimContext>, cancel: CancellationToken, rng: StdRng) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            cancel,
            rng,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn run(mut self) {
        info!(worker = %self.id, "transaction worker started");
        let ctx = Arc::clone(&self.ctx);

        while !self.cancel.is_cancelled() {
            match self.iterate().await {
                Ok(Some(outcome)) => debug!(worker = %self.id, ?outcome, "transaction finished"),
                Ok(None) => break,
                Err(e) => warn!(worker = %self.id, error = %e, "transaction iteration failed"),
            }

            let delay = ctx.scaled(ctx.config().oauth.iteration_delay_secs.sample(&mut self.rng));
            if !self.pause(delay).await {
                break;
            }
        }

        info!(worker = %self.id, "transaction worker stopped");
    }

    /// Run one transaction. Returns `None` when cancelled part way through;
    /// the host usage is then left untouched.
    pub async fn iterate(&mut self) -> Result<Option<Outcome>, IterationError> {
        let ctx = Arc::clone(&self.ctx);
        let config = ctx.config();

        let tx = TransactionContext::scramble(&mut self.rng, &config.hosts)
            .ok_or(IterationError::NoHosts)?;
        let host = ctx.host(&tx.host)?;
        let plan = plan(&mut self.rng, &config.oauth.probabilities);

        for step in &plan.steps {
            match *step {
                Step::Wait(wait) => {
                    let delay = wait.duration(config, &mut self.rng);
                    if !self.pause(delay).await {
                        return Ok(None);
                    }
                }
                Step::Emit(stage) => {
                    let response_ms = response_time(&mut self.rng, &config.oauth.response_time);
                    if !self.pause(config.scaled(response_ms as f64 / 1000.0)).await {
                        return Ok(None);
                    }
                    let entry = AuditEntry::for_stage(stage, &tx, plan.authz_failure, response_ms);
                    ctx.sinks().audit.write(entry.to_record()).await?;
                }
            }
        }

        host.record_transaction(plan.outcome, config, &mut self.rng);
        Ok(Some(plan.outcome))
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
