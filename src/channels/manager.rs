//! Fan-in of every channel's stream and routing of replies back out.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::select_all;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Owns the active channels.
pub struct ChannelManager {
    channels: Vec<Box<dyn Channel>>,
    /// Channel each user was last seen on.
    routes: Arc<RwLock<HashMap<String, String>>>,
    send_timeout: Duration,
}

impl ChannelManager {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            channels: Vec::new(),
            routes: Arc::new(RwLock::new(HashMap::new())),
            send_timeout,
        }
    }

    pub fn add(&mut self, channel: Box<dyn Channel>) {
        self.channels.push(channel);
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Channel> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Start every channel and merge their streams.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::new();
        for channel in &self.channels {
            match channel.start().await {
                Ok(stream) => {
                    tracing::info!(channel = channel.name(), "Channel started");
                    let routes = Arc::clone(&self.routes);
                    streams.push(
                        stream
                            .inspect(move |msg: &IncomingMessage| {
                                if let Ok(mut routes) = routes.write() {
                                    routes.insert(msg.user_id.clone(), msg.channel.clone());
                                }
                            })
                            .boxed(),
                    );
                }
                Err(e) => {
                    tracing::error!(channel = channel.name(), "Channel failed to start: {}", e);
                }
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".into(),
                reason: "no channel could be started".into(),
            });
        }

        Ok(Box::pin(select_all(streams)))
    }

    /// Reply on the channel the message came from, bounded by the send timeout.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channel = self
            .find(&msg.channel)
            .ok_or_else(|| ChannelError::SendFailed {
                name: msg.channel.clone(),
                reason: "unknown channel".into(),
            })?;
        self.bounded(channel.name(), channel.respond(msg, response))
            .await
    }

    /// Proactive send. Tries the user's last-seen channel first, then every
    /// other channel until one accepts.
    pub async fn broadcast(
        &self,
        user_id: &str,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let preferred = self
            .routes
            .read()
            .ok()
            .and_then(|routes| routes.get(user_id).cloned());

        let mut ordered: Vec<&dyn Channel> = Vec::new();
        if let Some(channel) = preferred.as_deref().and_then(|name| self.find(name)) {
            ordered.push(channel);
        }
        for channel in &self.channels {
            if Some(channel.name()) != preferred.as_deref() {
                ordered.push(channel.as_ref());
            }
        }

        let mut last_err = None;
        for channel in ordered {
            match self
                .bounded(channel.name(), channel.broadcast(user_id, response.clone()))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(channel = channel.name(), user_id, "Broadcast failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ChannelError::Unreachable {
            user_id: user_id.to_string(),
        }))
    }

    async fn bounded<F>(&self, name: &str, send: F) -> Result<(), ChannelError>
    where
        F: std::future::Future<Output = Result<(), ChannelError>>,
    {
        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout {
                name: name.to_string(),
                timeout: self.send_timeout,
            }),
        }
    }

    pub async fn health_check_all(&self) {
        for channel in &self.channels {
            if let Err(e) = channel.health_check().await {
                tracing::warn!(channel = channel.name(), "Health check failed: {}", e);
            }
        }
    }

    pub async fn shutdown_all(&self) {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = channel.name(), "Shutdown failed: {}", e);
            }
        }
    }
}
