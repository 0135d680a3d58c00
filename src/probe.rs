use std::{io::Read, sync::Arc, time::Duration};

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{instrument, warn};
use ureq::Agent;

use crate::config::app_config_capsule;

pub fn url_prober_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn UrlProber> {
    let timeout = get.as_ref(app_config_capsule).probe_timeout;
    Arc::new(HttpUrlProber::new(timeout))
}

/// Checks that a submitted URL currently answers with some content.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlProber: Send + Sync {
    async fn probe(&self, url: &str) -> Result<(), ProbeError>;
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] ureq::Error),
    #[error("failed to read response body: {0}")]
    Read(#[from] std::io::Error),
    #[error("response body was empty or \"0\"")]
    EmptyBody,
    #[error("probe task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Blocking `GET` prober backed by a shared [`ureq::Agent`].
///
/// The request runs on the blocking pool and the caller awaits it inline, so
/// a slow upstream holds a blocking worker for as long as it takes to answer.
/// There is no timeout unless one is passed to [`HttpUrlProber::new`].
#[derive(Clone)]
pub struct HttpUrlProber {
    agent: Agent,
}

impl HttpUrlProber {
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(timeout)
            .build()
            .into();
        Self { agent }
    }

    fn probe_blocking(agent: &Agent, url: &str) -> Result<(), ProbeError> {
        let response = agent.get(url).call()?;

        // NOTE: two bytes are enough to tell "" and "0" apart from real content
        let mut body = response.into_body();
        let mut head = Vec::with_capacity(2);
        body.as_reader().take(2).read_to_end(&mut head)?;
        if head.is_empty() || head == b"0" {
            return Err(ProbeError::EmptyBody);
        }
        Ok(())
    }
}

#[async_trait]
impl UrlProber for HttpUrlProber {
    #[instrument(skip(self))]
    async fn probe(&self, url: &str) -> Result<(), ProbeError> {
        let agent = self.agent.clone();
        let url = url.to_owned();
        tokio::task::spawn_blocking(move || Self::probe_blocking(&agent, &url))
            .await?
            .inspect_err(|err| warn!(?err, "Reachability probe failed"))
    }
}
