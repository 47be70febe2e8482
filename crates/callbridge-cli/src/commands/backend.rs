//! Echo assistant backend
//!
//! Answers text commands by calling back into the UI while the UI's
//! `allCommand` is still waiting. There is no microphone here, so
//! `takeCommand` always hears silence.

use callbridge_core::presentation::{
    ALL_COMMAND, PresentationClient, TAKE_COMMAND, backend_contract,
};
use callbridge_core::transport::StreamTransport;
use callbridge_core::{Bridge, BridgeResult, ErrorInfo, async_fn, config::Config, to_result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Where the UI is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEndpoint {
    /// Connect to a UI waiting on this address
    Connect(String),
    /// The UI spawned us; talk over stdin/stdout
    Stdio,
}

/// Command handling for the echo backend
pub struct Assistant {
    ui: PresentationClient,
}

impl Assistant {
    pub fn new(ui: PresentationClient) -> Self {
        Self { ui }
    }

    /// Listen for one utterance
    pub async fn take_command(&self) -> BridgeResult<String> {
        self.ui.display_message("Listening...").await?;
        // No recognizer: every listen ends in silence
        Ok(String::new())
    }

    /// Handle submitted text, or listen when there is none
    pub async fn all_command(&self, message: Option<String>) -> BridgeResult<()> {
        match message {
            Some(message) => {
                let query = message.trim().to_lowercase();
                debug!("Text input received: {}", query);
                self.ui.sender_text(&query).await?;
                if !query.is_empty() {
                    self.process(&query).await?;
                }
            }
            None => loop {
                let query = self.take_command().await?.trim().to_lowercase();
                self.ui.sender_text(&query).await?;
                if query.is_empty() {
                    break;
                }
                if query.contains("stop listening") {
                    self.ui.speak("Okay, I will stop listening.").await?;
                    break;
                }
                self.process(&query).await?;
            },
        }
        self.ui.show_hood().await
    }

    async fn process(&self, query: &str) -> BridgeResult<()> {
        self.ui.speak(&reply_to(query)).await
    }
}

fn reply_to(query: &str) -> String {
    if matches!(query, "hello" | "hi" | "hey") {
        "Hello! How can I help you?".to_string()
    } else if let Some(target) = query.strip_prefix("open ") {
        format!("Opening {}", target)
    } else {
        format!("I'm not sure how to handle: {}", query)
    }
}

/// Expose `allCommand` and `takeCommand` backed by `assistant`
pub fn expose_assistant(bridge: &Bridge, assistant: Arc<Assistant>) {
    let handler = Arc::clone(&assistant);
    bridge.expose(
        ALL_COMMAND,
        async_fn(move |_ctx, args| {
            let assistant = Arc::clone(&handler);
            async move {
                let message = args.first().and_then(Value::as_str).map(str::to_string);
                assistant.all_command(message).await?;
                Ok::<_, ErrorInfo>(Value::Null)
            }
        }),
    );

    bridge.expose(
        TAKE_COMMAND,
        async_fn(move |_ctx, _args| {
            let assistant = Arc::clone(&assistant);
            async move { to_result(assistant.take_command().await?) }
        }),
    );
}

/// Run the backend until the UI goes away or ctrl-c
pub async fn run(config: &Config, endpoint: BackendEndpoint) -> anyhow::Result<()> {
    let max_frame = config.bridge.max_frame_bytes;
    let bridge = Bridge::new(config.bridge.clone());
    bridge.set_contract(Some(backend_contract()));
    let assistant = Arc::new(Assistant::new(PresentationClient::new(bridge.clone())));
    expose_assistant(&bridge, assistant);

    let channel = match endpoint {
        BackendEndpoint::Stdio => StreamTransport::stdio(max_frame),
        BackendEndpoint::Connect(addr) => StreamTransport::connect(addr.as_str(), max_frame)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to UI at {}: {}", addr, e))?,
    };
    bridge.connect(channel)?;
    info!("Backend ready");

    tokio::select! {
        _ = bridge.closed() => info!("UI disconnected"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    bridge.close().await;
    Ok(())
}
