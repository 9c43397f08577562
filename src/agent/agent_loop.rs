//! Main agent loop.
//!
//! Merges every channel's stream and hands each message to a per-user
//! worker. A worker applies its user's messages strictly in arrival order;
//! workers for different users run in parallel. Idle workers exit and are
//! recreated on demand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::commands::Command;
use crate::channels::{ChannelManager, IncomingMessage, OutgoingResponse};
use crate::engine::{FlowEngine, main_menu};
use crate::error::Error;
use crate::flows::prompts;
use crate::scheduler::{Invitation, ScheduleHandle, spawn_ticker};

/// How long a worker waits for its user's next message before exiting.
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How often empty session slots are pruned.
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Apply one command and return the replies.
pub async fn dispatch(engine: &FlowEngine, user_id: &str, command: Command) -> Vec<OutgoingResponse> {
    match command {
        Command::Register => engine.register(user_id).await,
        Command::StartFlow(kind) => engine.start_flow(user_id, kind).await,
        Command::QuickNote(text) => engine.quick_note(user_id, &text).await,
        Command::Cancel => engine.cancel(user_id).await,
        Command::Input(text) => engine.handle_input(user_id, &text).await,
        Command::AssistantInfo => vec![OutgoingResponse::text(prompts::ASSISTANT_INFO)],
        Command::Menu => vec![OutgoingResponse::text(prompts::MENU_HINT).with_keyboard(main_menu())],
        Command::Help => vec![OutgoingResponse::text(prompts::HELP).with_keyboard(main_menu())],
    }
}

/// Background components the agent drives alongside the message loop.
pub struct AgentDeps {
    pub engine: Arc<FlowEngine>,
    pub scheduler: Option<ScheduleHandle>,
    pub scheduler_tick: Duration,
    pub invitations: mpsc::Receiver<Invitation>,
}

struct Worker {
    tx: mpsc::UnboundedSender<IncomingMessage>,
    handle: JoinHandle<()>,
}

/// The main agent that coordinates all components.
pub struct Agent {
    deps: AgentDeps,
    channels: Arc<ChannelManager>,
}

impl Agent {
    pub fn new(deps: AgentDeps, channels: ChannelManager) -> Self {
        Self {
            deps,
            channels: Arc::new(channels),
        }
    }

    /// Run the agent main loop until Ctrl+C or every channel stream ends.
    pub async fn run(self) -> Result<(), Error> {
        let Agent { deps, channels } = self;
        let AgentDeps {
            engine,
            scheduler,
            scheduler_tick,
            mut invitations,
        } = deps;

        let mut message_stream = channels.start_all().await?;

        let sessions = Arc::clone(engine.sessions());
        let pruning_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PRUNE_INTERVAL);
            interval.tick().await; // Skip immediate first tick
            loop {
                interval.tick().await;
                sessions.prune_idle().await;
                let active = sessions.active_count().await;
                tracing::debug!(active, "Session slots pruned");
            }
        });

        let ticker_handle = scheduler.map(|s| spawn_ticker(s, scheduler_tick));

        let invite_channels = Arc::clone(&channels);
        let invitation_handle = tokio::spawn(async move {
            while let Some(invitation) = invitations.recv().await {
                let user_id = invitation.user_id.clone();
                if let Err(e) = invite_channels
                    .broadcast(&invitation.user_id, invitation.response)
                    .await
                {
                    tracing::warn!(user_id = %user_id, "Failed to deliver invitation: {}", e);
                }
            }
        });

        let mut workers: HashMap<String, Worker> = HashMap::new();

        tracing::info!("Alex ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            tracing::info!("All channel streams ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            enqueue(&mut workers, message, &engine, &channels);
        }

        // Cleanup
        pruning_handle.abort();
        invitation_handle.abort();
        if let Some(handle) = ticker_handle {
            handle.abort();
        }
        for (_, worker) in workers.drain() {
            drop(worker.tx);
            let _ = worker.handle.await;
        }
        channels.shutdown_all().await;

        Ok(())
    }
}

/// Queue `message` on its user's worker, spawning one if needed.
fn enqueue(
    workers: &mut HashMap<String, Worker>,
    message: IncomingMessage,
    engine: &Arc<FlowEngine>,
    channels: &Arc<ChannelManager>,
) {
    let user_id = message.user_id.clone();

    // Workers that exited while idle leave an entry behind until pruned here.
    workers.retain(|_, worker| !worker.handle.is_finished());

    let message = match workers.get(&user_id) {
        Some(worker) => match worker.tx.send(message) {
            Ok(()) => return,
            // Worker went idle; its queue is closed.
            Err(mpsc::error::SendError(message)) => message,
        },
        None => message,
    };

    let previous = workers.remove(&user_id).map(|w| w.handle);
    let (tx, rx) = mpsc::unbounded_channel();
    // Cannot fail: the receiver is alive.
    let _ = tx.send(message);
    let handle = tokio::spawn(run_worker(
        user_id.clone(),
        rx,
        previous,
        Arc::clone(engine),
        Arc::clone(channels),
    ));
    workers.insert(user_id, Worker { tx, handle });
}

async fn run_worker(
    user_id: String,
    mut rx: mpsc::UnboundedReceiver<IncomingMessage>,
    previous: Option<JoinHandle<()>>,
    engine: Arc<FlowEngine>,
    channels: Arc<ChannelManager>,
) {
    // The previous worker may still be draining older messages.
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    loop {
        match tokio::time::timeout(WORKER_IDLE_TIMEOUT, rx.recv()).await {
            Ok(Some(message)) => process(&engine, &channels, &message).await,
            Ok(None) => break,
            Err(_) => {
                rx.close();
                while let Ok(message) = rx.try_recv() {
                    process(&engine, &channels, &message).await;
                }
                tracing::debug!(user_id = %user_id, "Worker idle, exiting");
                break;
            }
        }
    }
}

async fn process(engine: &FlowEngine, channels: &ChannelManager, message: &IncomingMessage) {
    let command = Command::parse(&message.content);
    tracing::debug!(
        user_id = %message.user_id,
        user_name = message.user_name.as_deref().unwrap_or("-"),
        channel = %message.channel,
        ?command,
        "Handling message"
    );

    for reply in dispatch(engine, &message.user_id, command).await {
        if let Err(e) = channels.respond(message, reply).await {
            tracing::warn!(user_id = %message.user_id, "Failed to send reply: {}", e);
        }
    }
}
