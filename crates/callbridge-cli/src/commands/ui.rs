//! Terminal UI side of the bridge

use async_trait::async_trait;
use callbridge_core::presentation::{ALL_COMMAND, Presenter, expose_presenter, ui_contract};
use callbridge_core::transport::StreamTransport;
use callbridge_core::{Bridge, ErrorInfo, config::Config};
use colored::Colorize;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Where the backend comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEndpoint {
    /// Wait for a backend to connect on this address
    Listen(String),
    /// Spawn the backend with this command line
    Spawn(Vec<String>),
}

/// Renders backend output as colored lines
pub struct TerminalPresenter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> TerminalPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn line(&self, text: String) -> Result<(), ErrorInfo> {
        let mut out = self.out.lock();
        writeln!(out, "{}", text)
            .and_then(|_| out.flush())
            .map_err(|e| ErrorInfo::failure(format!("terminal write failed: {}", e)))
    }
}

#[async_trait]
impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    async fn display_message(&self, text: &str) -> Result<(), ErrorInfo> {
        self.line(format!("  {}", text.cyan().italic()))
    }

    async fn show_idle(&self) -> Result<(), ErrorInfo> {
        self.line(
            "Ready. Type a command, or press enter to listen."
                .dimmed()
                .to_string(),
        )
    }

    async fn append_sender(&self, text: &str) -> Result<(), ErrorInfo> {
        self.line(format!("{} {}", "you >".green().bold(), text))
    }

    async fn append_receiver(&self, text: &str) -> Result<(), ErrorInfo> {
        self.line(format!("{} {}", "assistant >".blue().bold(), text))
    }
}

/// Run the terminal UI until stdin ends, the backend goes away or ctrl-c
pub async fn run(config: &Config, endpoint: UiEndpoint) -> anyhow::Result<()> {
    let max_frame = config.bridge.max_frame_bytes;
    let bridge = Bridge::new(config.bridge.clone());
    bridge.set_contract(Some(ui_contract()));
    expose_presenter(&bridge, Arc::new(TerminalPresenter::new(std::io::stdout())));

    let channel = match endpoint {
        UiEndpoint::Spawn(command) => {
            let (program, args) = command
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("--spawn needs a command"))?;
            info!("Spawning backend: {}", command.join(" "));
            StreamTransport::spawn(program, args, max_frame)?
        }
        UiEndpoint::Listen(addr) => {
            let listener = TcpListener::bind(addr.as_str())
                .await
                .map_err(|e| anyhow::anyhow!("failed to listen on {}: {}", addr, e))?;
            println!("{}", format!("Waiting for a backend on {}...", addr).dimmed());
            StreamTransport::accept(&listener, max_frame).await?
        }
    };
    bridge.connect(channel)?;
    println!(
        "{}",
        "Connected. Type a command, or press enter to listen.".dimmed()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => submit(&bridge, line.trim()),
                None => {
                    debug!("stdin closed");
                    break;
                }
            },
            _ = bridge.closed() => {
                println!("{}", "Backend disconnected.".yellow());
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    bridge.close().await;
    Ok(())
}

/// Hand one line to the backend without blocking input. An empty line means
/// "listen", which is `allCommand` without a message.
fn submit(bridge: &Bridge, line: &str) {
    let args: Vec<String> = if line.is_empty() {
        Vec::new()
    } else {
        vec![line.to_string()]
    };
    let bridge = bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = bridge.invoke(ALL_COMMAND, args).await {
            eprintln!("{} {}", "error:".red().bold(), e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_presenter_writes_one_line_per_call() {
        let presenter = TerminalPresenter::new(Vec::new());
        presenter.display_message("Listening...").await.unwrap();
        presenter.append_sender("open notepad").await.unwrap();
        presenter.append_receiver("Opening notepad").await.unwrap();
        presenter.show_idle().await.unwrap();

        let out = String::from_utf8(presenter.out.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("Listening..."));
        assert!(lines[1].contains("you >") && lines[1].contains("open notepad"));
        assert!(lines[2].contains("assistant >") && lines[2].contains("Opening notepad"));
        assert!(lines[3].contains("Ready"));
    }
}
