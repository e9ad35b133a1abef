//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use testforge_rs::config::ToolchainConfig;
use testforge_rs::engine::{CleanupConfig, CleanupPipeline, GenerationPipeline};
use testforge_rs::error::{Error, Result};
use testforge_rs::model::ProjectRecord;
use testforge_rs::process::{CommandOutput, CommandRunner, CommandSpec};
use testforge_rs::store::{MemoryStore, ProjectStore};
use testforge_rs::template::TemplateRenderer;
use testforge_rs::workspace::{DeletePolicy, FileProbe, WorkspaceManager};

pub const SCAFFOLD: &str = "fake-scaffold";
pub const INSTALL: &str = "fake-install";
pub const HEALTH_CHECK: &str = "fake-health-check";

/// Fast retries so blocked-file tests don't sleep for seconds.
pub fn fast_policy() -> DeletePolicy {
    DeletePolicy {
        attempts: 3,
        backoff: Duration::from_millis(5),
    }
}

pub fn toolchain() -> ToolchainConfig {
    ToolchainConfig {
        scaffold: SCAFFOLD.to_string(),
        install: INSTALL.to_string(),
        health_check: HEALTH_CHECK.to_string(),
        ..ToolchainConfig::default()
    }
}

pub fn project(root: &Path, name: &str) -> ProjectRecord {
    ProjectRecord::new(name, "https://api.example.test", root.join(name))
}

pub fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

// ---------------------------------------------------------------------------
// Command runner
// ---------------------------------------------------------------------------

type Script = dyn Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync;

/// Records every command and answers from a script.
pub struct FakeRunner {
    pub calls: Mutex<Vec<CommandSpec>>,
    script: Box<Script>,
}

impl FakeRunner {
    pub fn succeeding() -> Self {
        Self::scripted(|_| Ok(ok_output()))
    }

    /// Fail every command whose line starts with `command`.
    pub fn failing_on(command: &'static str, message: &'static str) -> Self {
        Self::scripted(move |spec| {
            if spec.command.starts_with(command) {
                Err(Error::Other(message.to_string()))
            } else {
                Ok(ok_output())
            }
        })
    }

    pub fn scripted(
        script: impl Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command.clone()).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.command == command)
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().push(spec.clone());
        (self.script)(spec)
    }
}

pub fn ok_output() -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: String::new(),
        duration: Duration::ZERO,
    }
}

// ---------------------------------------------------------------------------
// File probes
// ---------------------------------------------------------------------------

/// Reports files whose path ends with `suffix` as blocked for the first
/// `remaining` probes of such files, then lets them go.
pub struct FlakyProbe {
    suffix: PathBuf,
    remaining: AtomicUsize,
    pub probes: AtomicUsize,
}

impl FlakyProbe {
    pub fn new(suffix: impl Into<PathBuf>, blocked_probes: usize) -> Self {
        Self {
            suffix: suffix.into(),
            remaining: AtomicUsize::new(blocked_probes),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn always(suffix: impl Into<PathBuf>) -> Self {
        Self::new(suffix, usize::MAX)
    }
}

impl FileProbe for FlakyProbe {
    fn is_blocked(&self, path: &Path) -> bool {
        if !path.ends_with(&self.suffix) {
            return false;
        }
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Every file is blocked, forever.
pub struct LockedProbe;

impl FileProbe for LockedProbe {
    fn is_blocked(&self, _path: &Path) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// A workspace root in a temp dir plus the engine pieces on top of it.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub workspaces: Arc<WorkspaceManager>,
    pub templates: Arc<TemplateRenderer>,
    pub cleanup: Arc<CleanupPipeline>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(testforge_rs::workspace::OpenProbe))
    }

    pub fn with_probe(probe: Arc<dyn FileProbe>) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let workspaces = Arc::new(
            WorkspaceManager::with_probe(dir.path().join("workspaces"), probe)
                .delete_policy(fast_policy()),
        );
        let templates = Arc::new(TemplateRenderer::new().unwrap());
        let cleanup = Arc::new(CleanupPipeline::new(
            Arc::clone(&workspaces),
            store.clone() as Arc<dyn ProjectStore>,
            Arc::clone(&templates),
            CleanupConfig::default(),
        ));
        Self {
            dir,
            store,
            workspaces,
            templates,
            cleanup,
        }
    }

    pub fn root(&self) -> &Path {
        self.workspaces.root()
    }

    /// A PENDING project registered in the store.
    pub fn project(&self, name: &str) -> ProjectRecord {
        let project = project(self.root(), name);
        self.store.insert(project.clone());
        project
    }

    pub fn pipeline(&self, runner: Arc<FakeRunner>) -> GenerationPipeline {
        self.pipeline_with_store(runner, self.store.clone())
    }

    pub fn pipeline_with_store(
        &self,
        runner: Arc<FakeRunner>,
        store: Arc<dyn ProjectStore>,
    ) -> GenerationPipeline {
        GenerationPipeline::new(
            Arc::clone(&self.workspaces),
            runner,
            store,
            Arc::clone(&self.cleanup),
            Arc::clone(&self.templates),
            toolchain(),
        )
    }
}
