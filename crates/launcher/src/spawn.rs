//! Process spawning collaborator.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::info;

/// Starts app processes that outlive the launch.
pub trait ProcessSpawner: Send + Sync {
    /// Start `program` with `args` and return its pid if known. Must be
    /// called from within a tokio runtime.
    fn spawn_detached(&self, program: &Path, args: &[String]) -> io::Result<Option<u32>>;
}

pub type SharedSpawner = Arc<dyn ProcessSpawner>;

/// Spawns real processes with null stdio in their own process group. The
/// child is never killed or waited on by the launcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSpawner;

impl ProcessSpawner for DetachedSpawner {
    fn spawn_detached(&self, program: &Path, args: &[String]) -> io::Result<Option<u32>> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let pid = child.id();
        info!(program = %program.display(), pid = ?pid, "Spawned app process");
        Ok(pid)
    }
}
