//! The embedder-facing construction surface (§6 "VFS construction
//! surface", §10.4 "Configuration surface").
//!
//! `Dir`/`RealDir`/`File`/`RealFile` build the `vfs_root` node tree
//! programmatically — it is not TOML-representable, since real-path
//! bridging and in-memory file bytes don't fit a scalar config format.
//! [`SandboxConfig`] ties that tree together with the scalar knobs already
//! covered by [`crate::session::SessionConfig`] and assembles the
//! concrete layer stack (§4.3) a [`crate::session::Session`] dispatches
//! through.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::layer::Layer;
use crate::layers::defaults::DefaultsLayer;
use crate::layers::interpreter_bootstrap::InterpreterBootstrapLayer;
use crate::layers::stdin_forward::StdinForwardLayer;
use crate::layers::stdout_capture::StdoutCaptureLayer;
use crate::layers::stdout_dump::StdoutDumpLayer;
use crate::layers::vfs_layer::VfsLayer;
use crate::session::SessionConfig;
use crate::vfs::node::RealDirOptions;
use crate::vfs::{Node, VfsState};

/// Builds an in-memory directory node from named children (§6 `Dir({...})`).
pub fn dir(entries: impl IntoIterator<Item = (String, Arc<Node>)>) -> Arc<Node> {
    Node::dir(entries.into_iter().collect::<BTreeMap<_, _>>())
}

/// Bridges a real host directory into the tree (§6 `RealDir(path, ...)`).
pub fn real_dir(
    path: impl Into<PathBuf>,
    show_dotfiles: bool,
    follow_links: bool,
    exclude: Vec<String>,
) -> Arc<Node> {
    Node::real_dir(path, RealDirOptions { show_dotfiles, follow_links, exclude })
}

/// Builds an in-memory regular file node (§6 `File(bytes, mode=0)`).
pub fn file(bytes: impl Into<Vec<u8>>, mode: u32) -> Arc<Node> {
    Node::file(bytes, mode)
}

/// Bridges a real host file, opened on demand, into the tree (§6
/// `RealFile(path, mode=0)`).
pub fn real_file(path: impl Into<PathBuf>, mode: u32) -> Arc<Node> {
    Node::real_file(path, mode)
}

/// How the host disposes of the child's `write(1|2, ...)` calls (§4.3
/// "Stdout capture layer" vs. "Stdout dump layer" — mutually exclusive,
/// the embedder picks one).
#[derive(Debug, Clone)]
pub enum StdoutMode {
    /// Buffer writes in memory for the embedder to inspect afterward
    /// (tests, library callers).
    Capture,
    /// Write sanitized bytes straight through to the host's own
    /// stdout/stderr, as `sandbox-host` does interactively.
    Dump { color: bool, raw: bool },
}

/// The full embedder-facing construction surface: the static VFS tree,
/// the scalar session options, and which optional layers (§4.3) are
/// active for this session.
pub struct SandboxConfig {
    pub vfs_root: Arc<Node>,
    pub session: SessionConfig,
    pub stdout: StdoutMode,
    pub forward_stdin: bool,
    pub interpreter_home: Option<String>,
}

impl SandboxConfig {
    pub fn new(vfs_root: Arc<Node>) -> Self {
        SandboxConfig {
            vfs_root,
            session: SessionConfig::default(),
            stdout: StdoutMode::Capture,
            forward_stdin: false,
            interpreter_home: None,
        }
    }

    /// Fresh per-session VFS state (fd/dir tables start empty every
    /// session; the tree itself is shared via `Arc`, never copied).
    pub fn vfs_state(&self) -> VfsState {
        VfsState::new(
            self.vfs_root.clone(),
            self.session.virtual_fd_range(),
            self.session.max_open_dirs,
        )
    }

    /// Assembles the layer stack topmost-first (§9 "Layered handler stack
    /// vs. inheritance": "an explicit ordered list of handler
    /// providers"). [`crate::dispatch::Registry::build`] gives earlier
    /// entries priority for a shared signature, so the stdin-forward layer
    /// must precede the VFS layer here — both claim `read(ipi)i`, and only
    /// stdin-forward knows to delegate fds other than 0 back down to it.
    pub fn build_layers<R, W>(&self) -> Vec<Arc<dyn Layer<R, W>>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut layers: Vec<Arc<dyn Layer<R, W>>> = Vec::new();
        if let Some(home) = &self.interpreter_home {
            layers.push(Arc::new(InterpreterBootstrapLayer::new(home.clone())));
        }
        if self.forward_stdin {
            layers.push(Arc::new(StdinForwardLayer::new()));
        }
        match &self.stdout {
            StdoutMode::Capture => layers.push(Arc::new(StdoutCaptureLayer)),
            StdoutMode::Dump { color, raw } => {
                layers.push(Arc::new(StdoutDumpLayer::new(*color, *raw)))
            }
        }
        layers.push(Arc::new(VfsLayer));
        layers.push(Arc::new(DefaultsLayer::default()));
        layers
    }
}
