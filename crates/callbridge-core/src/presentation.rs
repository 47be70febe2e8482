//! Presentation contract between the assistant backend and its UI
//!
//! The UI side exposes four rendering functions and the backend calls them
//! by name. The backend exposes `allCommand` for submitted text and
//! `takeCommand` for a single recognised utterance.
//!
//! Rendering functions run on the serial queue: a renderer only ever sees one
//! call at a time, in the order the backend made them.

use crate::bridge::Bridge;
use crate::contract::{Contract, Signature, ValueKind};
use crate::error::{BridgeResult, ErrorInfo, kinds};
use crate::registry::{CallContext, ExposedFunction};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Show a status line ("Listening...", "Recognizing...", a reply)
pub const DISPLAY_MESSAGE: &str = "DisplayMessage";
/// Return the UI to its idle view
pub const SHOW_HOOD: &str = "ShowHood";
/// Append a message from the user to the conversation
pub const SENDER_TEXT: &str = "senderText";
/// Append a message from the assistant to the conversation
pub const RECEIVER_TEXT: &str = "receiverText";

/// Process submitted text, or listen for a command when called without one
pub const ALL_COMMAND: &str = "allCommand";
/// Listen for one utterance and return it as text
pub const TAKE_COMMAND: &str = "takeCommand";

/// Renders what the backend asks for
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn display_message(&self, text: &str) -> Result<(), ErrorInfo>;

    async fn show_idle(&self) -> Result<(), ErrorInfo>;

    async fn append_sender(&self, text: &str) -> Result<(), ErrorInfo>;

    async fn append_receiver(&self, text: &str) -> Result<(), ErrorInfo>;
}

#[derive(Debug, Clone, Copy)]
enum Render {
    DisplayMessage,
    ShowHood,
    SenderText,
    ReceiverText,
}

struct PresenterFn {
    presenter: Arc<dyn Presenter>,
    render: Render,
}

#[async_trait]
impl ExposedFunction for PresenterFn {
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> Result<Value, ErrorInfo> {
        match self.render {
            Render::DisplayMessage => {
                let text = text_arg(ctx.name(), &args)?;
                self.presenter.display_message(text).await?;
            }
            Render::ShowHood => self.presenter.show_idle().await?,
            Render::SenderText => {
                let text = text_arg(ctx.name(), &args)?;
                if !text.trim().is_empty() {
                    self.presenter.append_sender(text).await?;
                }
            }
            Render::ReceiverText => {
                let text = text_arg(ctx.name(), &args)?;
                if !text.trim().is_empty() {
                    self.presenter.append_receiver(text).await?;
                }
            }
        }
        Ok(Value::Null)
    }
}

fn text_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a str, ErrorInfo> {
    match args {
        [Value::String(text)] => Ok(text),
        _ => Err(ErrorInfo::new(
            kinds::MALFORMED_ENVELOPE,
            format!("'{}' expects a single string argument", name),
        )),
    }
}

/// Expose the four rendering functions backed by `presenter`
pub fn expose_presenter(bridge: &Bridge, presenter: Arc<dyn Presenter>) {
    for (name, render) in [
        (DISPLAY_MESSAGE, Render::DisplayMessage),
        (SHOW_HOOD, Render::ShowHood),
        (SENDER_TEXT, Render::SenderText),
        (RECEIVER_TEXT, Render::ReceiverText),
    ] {
        bridge.expose_serial(
            name,
            Arc::new(PresenterFn {
                presenter: Arc::clone(&presenter),
                render,
            }),
        );
    }
}

/// Functions the UI side accepts
pub fn ui_contract() -> Contract {
    Contract::new()
        .with(Signature::new(DISPLAY_MESSAGE).param(ValueKind::String))
        .with(Signature::new(SHOW_HOOD))
        .with(Signature::new(SENDER_TEXT).param(ValueKind::String))
        .with(Signature::new(RECEIVER_TEXT).param(ValueKind::String))
}

/// Functions the backend side accepts
pub fn backend_contract() -> Contract {
    Contract::new()
        .with(Signature::new(ALL_COMMAND).optional(ValueKind::String))
        .with(Signature::new(TAKE_COMMAND).returns(ValueKind::String))
}

/// Typed calls from the backend into the UI
#[derive(Debug, Clone)]
pub struct PresentationClient {
    bridge: Bridge,
}

impl PresentationClient {
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub async fn display_message(&self, text: &str) -> BridgeResult<()> {
        self.bridge.invoke(DISPLAY_MESSAGE, [text]).await?;
        Ok(())
    }

    pub async fn show_hood(&self) -> BridgeResult<()> {
        self.bridge.invoke(SHOW_HOOD, NO_ARGS).await?;
        Ok(())
    }

    pub async fn sender_text(&self, text: &str) -> BridgeResult<()> {
        self.bridge.invoke(SENDER_TEXT, [text]).await?;
        Ok(())
    }

    pub async fn receiver_text(&self, text: &str) -> BridgeResult<()> {
        self.bridge.invoke(RECEIVER_TEXT, [text]).await?;
        Ok(())
    }

    /// Say something: show it as the status line, then add it to the conversation
    pub async fn speak(&self, text: &str) -> BridgeResult<()> {
        self.display_message(text).await?;
        self.receiver_text(text).await
    }
}

/// Argument list for zero-argument calls
pub const NO_ARGS: [Value; 0] = [];
