// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker-backed connector runner.
//!
//! Launches connector images via the `docker` CLI. Configuration, catalog,
//! and state artifacts are bind-mounted into fixed container paths; merged
//! stdout/stderr is scanned line by line into protocol messages.
//!
//! Mount sources must be host-visible paths: when cosmos itself runs in a
//! container, the `ARTIFACT_DIR`/`SCRATCH_SPACE`/`LOCAL_DIR` environment
//! variables carry the host-side equivalents of the process-visible roots.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cosmos_core::config::{LOCAL_DIR_ENV, SCRATCH_SPACE_ENV, rewrite_to_host};
use cosmos_core::connector::{Connector, ConnectorKind};
use cosmos_core::message::{Catalog, Message, MessageType};

use super::{CHANNEL_CAPACITY, ConnectorRunner, Item, OutStream, Result, RunnerError};
use crate::artifactory::{Artifactory, Slot};

/// Bundled image that performs basic SQL normalization after a write.
pub const NORMALIZATION_IMAGE: &str = "airbyte/normalization:0.1.36";

const CONFIG_MOUNT: &str = "/tmp/cosmos-config";
const CATALOG_MOUNT: &str = "/tmp/cosmos-configured-catalog";
const STATE_MOUNT: &str = "/tmp/cosmos-state";
const LOCAL_MOUNT: &str = "/local";

/// Docker CLI implementation of [`ConnectorRunner`].
pub struct DockerRunner {
    scratch_root: PathBuf,
    /// Host directory mounted at `/local` in every connector, from `LOCAL_DIR`.
    local_dir: Option<PathBuf>,
}

impl DockerRunner {
    /// Create a runner writing scratch config files under `scratch_root`.
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        let local_dir = std::env::var(LOCAL_DIR_ENV)
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        Self {
            scratch_root: scratch_root.into(),
            local_dir,
        }
    }

    /// Run a short-lived subcommand and return the first message of the
    /// expected type found on stdout.
    async fn run_once(
        &self,
        connector: &Connector,
        config: Option<&Value>,
        want: MessageType,
    ) -> Result<Message> {
        // The scratch file must outlive the process; dropping the handle
        // removes it from disk.
        let scratch = match config {
            Some(config) => Some(self.scratch_config(config)?),
            None => None,
        };
        let config_path = scratch
            .as_ref()
            .map(|file| rewrite_to_host(file.path(), &self.scratch_root, SCRATCH_SPACE_ENV));

        let subcommand = match want {
            MessageType::Spec => "spec",
            MessageType::ConnectionStatus => "check",
            MessageType::Catalog => "discover",
            _ => return Err(RunnerError::MissingMessage(want)),
        };

        let args = docker_args(DockerInvocation {
            subcommand,
            image: &connector.image_ref(),
            interactive: false,
            integration_type: None,
            config: config_path.as_deref(),
            catalog: None,
            state: None,
            local_dir: self.local_dir.as_deref(),
        });
        debug!(image = %connector.image_ref(), subcommand, "running connector");

        let output = Command::new("docker").args(&args).output().await?;
        if !output.status.success() {
            return Err(RunnerError::Exit {
                code: output.status.code().unwrap_or(-1),
            });
        }

        for line in output.stdout.split(|b| *b == b'\n') {
            if let Ok(msg) = Message::parse(line)
                && msg.is_type(want)
            {
                return Ok(msg);
            }
        }

        Err(RunnerError::MissingMessage(want))
    }

    fn scratch_config(&self, config: &Value) -> Result<tempfile::NamedTempFile> {
        std::fs::create_dir_all(&self.scratch_root)?;
        let file = tempfile::Builder::new()
            .prefix("cosmos-")
            .tempfile_in(&self.scratch_root)?;
        std::fs::write(file.path(), serde_json::to_vec(config)?)?;
        Ok(file)
    }
}

struct DockerInvocation<'a> {
    subcommand: &'a str,
    image: &'a str,
    interactive: bool,
    integration_type: Option<&'a str>,
    config: Option<&'a Path>,
    catalog: Option<&'a Path>,
    state: Option<&'a Path>,
    local_dir: Option<&'a Path>,
}

/// Build the full argument list for one connector invocation.
///
/// `--mount` is used instead of `-v` because volume syntax cannot express
/// paths containing `:`.
fn docker_args(inv: DockerInvocation<'_>) -> Vec<String> {
    let mut args: Vec<String> = ["run", "--rm", "--net", "host"]
        .into_iter()
        .map(String::from)
        .collect();

    if inv.interactive {
        args.push("-i".to_string());
    }

    let mut mount = |source: &Path, destination: &str| {
        args.push("--mount".to_string());
        args.push(format!(
            "type=bind,source={},destination={}",
            source.display(),
            destination
        ));
    };

    if let Some(config) = inv.config {
        mount(config, CONFIG_MOUNT);
    }
    if let Some(catalog) = inv.catalog {
        mount(catalog, CATALOG_MOUNT);
    }
    if let Some(state) = inv.state {
        mount(state, STATE_MOUNT);
    }
    if let Some(local_dir) = inv.local_dir {
        mount(local_dir, LOCAL_MOUNT);
    }

    args.push(inv.image.to_string());
    args.push(inv.subcommand.to_string());

    let (add_config, add_catalog, add_state, add_integration_type) = match inv.subcommand {
        "check" | "discover" => (true, false, false, false),
        "read" => (true, true, inv.state.is_some(), false),
        "write" => (true, true, false, false),
        "run" => (true, true, false, true),
        _ => (false, false, false, false),
    };

    if add_config {
        args.push("--config".to_string());
        args.push(CONFIG_MOUNT.to_string());
    }
    if add_catalog {
        args.push("--catalog".to_string());
        args.push(CATALOG_MOUNT.to_string());
    }
    if add_state {
        args.push("--state".to_string());
        args.push(STATE_MOUNT.to_string());
    }
    if add_integration_type {
        args.push("--integration-type".to_string());
        args.push(inv.integration_type.unwrap_or_default().to_string());
    }

    args
}

/// Scan one output stream into items. Protocol lines become messages,
/// everything else raw strings; sends are selected against cancellation.
fn scan_stream<R>(reader: R, tx: mpsc::Sender<Item>, cancel: CancellationToken) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return,
                line = lines.next_line() => line,
            };
            let Ok(Some(line)) = line else { return };

            let item = match Message::parse(line.as_bytes()) {
                Ok(msg) => Item::Message(Box::new(msg)),
                Err(_) => Item::Raw(line),
            };
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

/// Send one item, giving up on cancellation or a closed receiver.
async fn send_item(tx: &mpsc::Sender<Item>, item: Item, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tx.send(item) => {}
    }
}

/// Wait for the child, killing it promptly on cancellation.
async fn wait_child(child: &mut Child, cancel: &CancellationToken) -> Result<()> {
    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(RunnerError::Cancelled);
        }
        status = child.wait() => status?,
    };
    if status.success() {
        Ok(())
    } else {
        Err(RunnerError::Exit {
            code: status.code().unwrap_or(-1),
        })
    }
}

fn spawn_scanned(
    mut cmd: Command,
    tx: mpsc::Sender<Item>,
    done: oneshot::Sender<Result<()>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                drop(tx);
                let _ = done.send(Err(e.into()));
                return;
            }
        };

        let mut scanners = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            scanners.push(scan_stream(stdout, tx.clone(), cancel.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            scanners.push(scan_stream(stderr, tx.clone(), cancel.clone()));
        }
        drop(tx);

        let result = wait_child(&mut child, &cancel).await;
        for scanner in scanners {
            let _ = scanner.await;
        }
        let _ = done.send(result);
    });
}

#[async_trait]
impl ConnectorRunner for DockerRunner {
    async fn spec(&self, connector: &Connector) -> Result<Message> {
        self.run_once(connector, None, MessageType::Spec).await
    }

    async fn check(&self, connector: &Connector, config: &Value) -> Result<Message> {
        self.run_once(connector, Some(config), MessageType::ConnectionStatus)
            .await
    }

    async fn discover(&self, connector: &Connector, config: &Value) -> Result<Message> {
        // Destination connectors don't support "discover".
        if connector.kind == ConnectorKind::Destination {
            return Ok(Message {
                message_type: Some(MessageType::Catalog),
                catalog: Some(Catalog::default()),
                ..Default::default()
            });
        }
        self.run_once(connector, Some(config), MessageType::Catalog)
            .await
    }

    async fn read(
        &self,
        connector: &Connector,
        artifacts: &Artifactory,
        empty: bool,
        cancel: CancellationToken,
    ) -> OutStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        // Wipe mode: nothing flows from the source.
        if empty {
            drop(tx);
            let _ = done_tx.send(Ok(()));
            return (rx, done_rx);
        }

        let args = docker_args(DockerInvocation {
            subcommand: "read",
            image: &connector.image_ref(),
            interactive: false,
            integration_type: None,
            config: artifacts.path_of(Slot::SourceConfig).as_deref(),
            catalog: artifacts.path_of(Slot::Catalog).as_deref(),
            state: artifacts.path_of(Slot::BeforeState).as_deref(),
            local_dir: self.local_dir.as_deref(),
        });

        send_item(
            &tx,
            Item::Raw(format!("Docker command: docker {}", args.join(" "))),
            &cancel,
        )
        .await;

        let mut cmd = Command::new("docker");
        cmd.args(&args);
        spawn_scanned(cmd, tx, done_tx, cancel);
        (rx, done_rx)
    }

    async fn write(
        &self,
        connector: &Connector,
        artifacts: &Artifactory,
        mut input: mpsc::Receiver<Message>,
        cancel: CancellationToken,
    ) -> OutStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        let args = docker_args(DockerInvocation {
            subcommand: "write",
            image: &connector.image_ref(),
            interactive: true,
            integration_type: None,
            config: artifacts.path_of(Slot::DestinationConfig).as_deref(),
            catalog: artifacts.path_of(Slot::Catalog).as_deref(),
            state: None,
            local_dir: self.local_dir.as_deref(),
        });

        send_item(
            &tx,
            Item::Raw(format!("Docker command: docker {}", args.join(" "))),
            &cancel,
        )
        .await;

        tokio::spawn(async move {
            let mut cmd = Command::new("docker");
            cmd.args(&args);
            cmd.stdin(std::process::Stdio::piped());
            cmd.stdout(std::process::Stdio::piped());
            cmd.stderr(std::process::Stdio::piped());

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    drop(tx);
                    let _ = done_tx.send(Err(e.into()));
                    return;
                }
            };

            let mut scanners = Vec::new();
            if let Some(stdout) = child.stdout.take() {
                scanners.push(scan_stream(stdout, tx.clone(), cancel.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                scanners.push(scan_stream(stderr, tx.clone(), cancel.clone()));
            }

            let mut stdin = child.stdin.take();
            let forwarder_tx = tx.clone();
            let forwarder_cancel = cancel.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(msg) = input.recv().await {
                    if msg.is_type(MessageType::Record) {
                        let Some(stdin) = stdin.as_mut() else { break };
                        let mut line = match serde_json::to_vec(&msg) {
                            Ok(line) => line,
                            Err(e) => {
                                warn!(error = %e, "failed to encode message for destination");
                                continue;
                            }
                        };
                        line.push(b'\n');
                        match stdin.write_all(&line).await {
                            Ok(()) => {}
                            // The destination may have exited deliberately.
                            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => break,
                            Err(e) => {
                                warn!(error = %e, "failed to forward record to destination");
                            }
                        }
                    } else {
                        // Destinations don't process state messages; pass them
                        // through so the destination-side stage observes them.
                        send_item(
                            &forwarder_tx,
                            Item::Message(Box::new(msg)),
                            &forwarder_cancel,
                        )
                        .await;
                    }
                }
                // Dropping stdin closes the pipe and lets the connector finish.
                drop(stdin);
            });
            drop(tx);

            let result = wait_child(&mut child, &cancel).await;
            let _ = forwarder.await;
            for scanner in scanners {
                let _ = scanner.await;
            }
            let _ = done_tx.send(result);
        });

        (rx, done_rx)
    }

    async fn normalize(
        &self,
        connector: &Connector,
        artifacts: &Artifactory,
        enabled: bool,
        cancel: CancellationToken,
    ) -> OutStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        if !enabled || connector.destination_type.is_empty() {
            send_item(
                &tx,
                Item::Raw("Normalization is not available or is disabled. Skipping.".to_string()),
                &cancel,
            )
            .await;
            drop(tx);
            let _ = done_tx.send(Ok(()));
            return (rx, done_rx);
        }

        let args = docker_args(DockerInvocation {
            subcommand: "run",
            image: NORMALIZATION_IMAGE,
            interactive: false,
            integration_type: Some(&connector.destination_type),
            config: artifacts.path_of(Slot::DestinationConfig).as_deref(),
            catalog: artifacts.path_of(Slot::Catalog).as_deref(),
            state: None,
            local_dir: self.local_dir.as_deref(),
        });

        send_item(
            &tx,
            Item::Raw(format!("Docker command: docker {}", args.join(" "))),
            &cancel,
        )
        .await;

        let mut cmd = Command::new("docker");
        cmd.args(&args);
        spawn_scanned(cmd, tx, done_tx, cancel);
        (rx, done_rx)
    }
}
