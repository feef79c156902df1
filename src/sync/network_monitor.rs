//! # Network Monitor
//!
//! Connectivity detection for the sync manager.
//!
//! A [`ConnectivitySource`] publishes the current online flag through a
//! `watch` channel, so the manager sees every transition edge (coalesced to
//! the latest value) without polling.
//!
//! - [`ManualConnectivity`]: driven by the host, e.g. OS or browser events
//! - [`ProbeConnectivity`]: polls a URL and treats any HTTP response as online

use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Client, Url};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::shared::config::{AppConfig, ConfigError};

/// Source of online/offline transitions
pub trait ConnectivitySource: Send + Sync {
    /// Connectivity right now
    fn current(&self) -> bool;

    /// Receiver notified on every change
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity flipped explicitly by the host application
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    /// Start in the given state
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Report a connectivity change; repeated values are ignored
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            tracing::debug!(online, "Connectivity changed");
        }
    }
}

impl ConnectivitySource for ManualConnectivity {
    fn current(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Connectivity derived from periodically probing an HTTP endpoint
#[derive(Debug)]
pub struct ProbeConnectivity {
    client: Client,
    url: Url,
    interval: Duration,
    tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeConnectivity {
    /// Build a probe; it assumes online until the first probe says otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(url: Url, interval: Duration, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let (tx, _) = watch::channel(true);
        Ok(Self {
            client,
            url,
            interval,
            tx,
            task: Mutex::new(None),
        })
    }

    /// Probe `probe_url`, falling back to the backend URL.
    ///
    /// # Errors
    ///
    /// Fails when neither URL is configured or the URL cannot be parsed.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let raw = config
            .probe_url
            .as_deref()
            .or(config.server_url.as_deref())
            .ok_or(ConfigError::MissingValue("probe_url"))?;
        let url = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
        Self::new(url, config.probe_interval, config.request_timeout).map_err(|e| {
            ConfigError::InvalidValue {
                key: "request_timeout",
                value: e.to_string(),
            }
        })
    }

    /// Run one probe and publish the result
    pub async fn probe_once(&self) -> bool {
        let online = probe(&self.client, &self.url).await;
        publish(&self.tx, online);
        online
    }

    /// Start polling in the background. Calling it again is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let tx = self.tx.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Probing connectivity at {} every {:?}", self.url, self.interval);
        *task = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let online = probe(&client, &url).await;
                publish(&tx, online);
            }
        }));
    }

    /// Stop background polling
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for ProbeConnectivity {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ConnectivitySource for ProbeConnectivity {
    fn current(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Any HTTP response proves the network path works; only transport errors count as offline
async fn probe(client: &Client, url: &Url) -> bool {
    match client.head(url.clone()).send().await {
        Ok(_) => true,
        Err(error) => {
            tracing::debug!("Connectivity probe failed: {}", error);
            false
        }
    }
}

fn publish(tx: &watch::Sender<bool>, online: bool) {
    let changed = tx.send_if_modified(|current| {
        let changed = *current != online;
        *current = online;
        changed
    });
    if changed {
        if online {
            tracing::info!("Connectivity probe: online");
        } else {
            tracing::warn!("Connectivity probe: offline");
        }
    }
}
