//! Process-tree discovery and termination.
//!
//! Attacks may fork helper engines of their own, so killing the immediate
//! child is not enough. The tree is rediscovered from the process table
//! before every kill round, by parent links and by an environment marker
//! every member inherits. The marker catches helpers that were reparented
//! after their parent exited.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsStr;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// Environment variable carrying the per-invocation tree marker.
pub const TREE_MARKER_VAR: &str = "RSARMAGEDDON_ATTACK_TOKEN";

/// Kill rounds before giving up on processes that keep forking.
const MAX_KILL_ROUNDS: usize = 3;

/// Poll interval while waiting for killed processes to disappear.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Returns `roots` and every transitive child, roots first.
///
/// `links` holds `(pid, parent)` pairs as read from the process table.
#[must_use]
pub fn collect_tree(
    roots: impl IntoIterator<Item = u32>,
    links: impl IntoIterator<Item = (u32, Option<u32>)>,
) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, parent) in links {
        if let Some(parent) = parent {
            children.entry(parent).or_default().push(pid);
        }
    }

    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    let mut queue: std::collections::VecDeque<u32> = roots.into_iter().collect();
    while let Some(pid) = queue.pop_front() {
        if !seen.insert(pid) {
            continue;
        }
        order.push(pid);
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }
    order
}

fn is_live(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// A fresh `KEY=value` marker to set on an invocation.
#[must_use]
pub fn new_marker() -> (String, String) {
    let token = uuid::Uuid::new_v4().simple().to_string();
    (TREE_MARKER_VAR.to_string(), token)
}

/// A process and all of its descendants.
pub struct ProcessTree {
    root: u32,
    marker: Option<String>,
    system: System,
    known: BTreeSet<u32>,
}

impl std::fmt::Debug for ProcessTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTree")
            .field("root", &self.root)
            .field("marker", &self.marker)
            .field("known", &self.known)
            .finish_non_exhaustive()
    }
}

impl ProcessTree {
    /// Tracks the tree rooted at `root`.
    #[must_use]
    pub fn new(root: u32) -> Self {
        Self {
            root,
            marker: None,
            system: System::new(),
            known: BTreeSet::from([root]),
        }
    }

    /// Also treats every process whose environment holds `key=value` as a
    /// member.
    #[must_use]
    pub fn with_marker(mut self, key: &str, value: &str) -> Self {
        self.marker = Some(format!("{key}={value}"));
        self
    }

    fn refresh(&mut self) {
        let kind = if self.marker.is_some() {
            ProcessRefreshKind::nothing().with_environ(UpdateKind::Always)
        } else {
            ProcessRefreshKind::nothing()
        };
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, kind);
    }

    fn marked(&self) -> Vec<u32> {
        let Some(marker) = self.marker.as_deref() else {
            return Vec::new();
        };
        let marker = OsStr::new(marker);
        self.system
            .processes()
            .iter()
            .filter(|(_, process)| {
                process.environ().iter().any(|entry| {
                    let entry: &OsStr = entry.as_ref();
                    entry == marker
                })
            })
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }

    /// Re-reads the process table and returns every live tree member.
    fn snapshot(&mut self) -> Vec<u32> {
        self.refresh();
        let roots: Vec<u32> = self.known.iter().copied().chain(self.marked()).collect();
        let links = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| (pid.as_u32(), process.parent().map(Pid::as_u32)));
        let members = collect_tree(roots, links);
        self.known.extend(members.iter().copied());
        members
            .into_iter()
            .filter(|pid| {
                self.system
                    .process(Pid::from_u32(*pid))
                    .is_some_and(|p| is_live(p.status()))
            })
            .collect()
    }

    /// Sends a kill to every live member, root first.
    ///
    /// Individual failures are logged and skipped. Returns how many
    /// processes were signalled.
    pub fn terminate(&mut self) -> usize {
        let mut signalled = 0;
        for _ in 0..MAX_KILL_ROUNDS {
            let live = self.snapshot();
            if live.is_empty() {
                break;
            }
            for pid in live {
                let Some(process) = self.system.process(Pid::from_u32(pid)) else {
                    continue;
                };
                if process.kill() {
                    signalled += 1;
                } else {
                    tracing::debug!(pid, "failed to kill tree member");
                }
            }
        }
        tracing::debug!(root = self.root, signalled, "process tree terminated");
        signalled
    }

    /// Tracked pids that are still running.
    pub fn alive(&mut self) -> Vec<u32> {
        self.refresh();
        self.known
            .iter()
            .copied()
            .filter(|pid| {
                self.system
                    .process(Pid::from_u32(*pid))
                    .is_some_and(|p| is_live(p.status()))
            })
            .collect()
    }

    /// Waits up to `grace` for every tracked process to exit.
    ///
    /// Returns the pids still running when the grace period ran out.
    pub async fn wait_for_exit(&mut self, grace: Duration) -> Vec<u32> {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let alive = self.alive();
            if alive.is_empty() || tokio::time::Instant::now() >= deadline {
                if !alive.is_empty() {
                    tracing::warn!(root = self.root, ?alive, "processes survived termination");
                }
                return alive;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

/// Reports whether `pid` names a running, non-zombie process.
#[must_use]
pub fn is_running(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some_and(|p| is_live(p.status()))
}

/// Kills a process tree when dropped, unless disarmed first.
///
/// Covers the paths where the waiting future is dropped (run cancelled)
/// before the child finished.
#[derive(Debug)]
pub struct TreeGuard {
    tree: Option<ProcessTree>,
}

impl TreeGuard {
    /// Arms a guard for `tree`; `None` yields an inert guard.
    #[must_use]
    pub const fn new(tree: Option<ProcessTree>) -> Self {
        Self { tree }
    }

    /// Disarms the guard, handing back the tree.
    pub fn disarm(&mut self) -> Option<ProcessTree> {
        self.tree.take()
    }
}

impl Drop for TreeGuard {
    fn drop(&mut self) {
        if let Some(mut tree) = self.tree.take() {
            let signalled = tree.terminate();
            tracing::debug!(root = tree.root, signalled, "abandoned attack process tree killed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_tree_walks_descendants_breadth_first() {
        let links = [
            (1, None),
            (10, Some(1)),
            (20, Some(10)),
            (21, Some(10)),
            (30, Some(20)),
            (40, Some(1)),
            (99, Some(40)),
        ];
        assert_eq!(collect_tree([10], links), vec![10, 20, 21, 30]);
    }

    #[test]
    fn collect_tree_with_unknown_root() {
        assert_eq!(collect_tree([7], [(1, None), (2, Some(1))]), vec![7]);
    }

    #[test]
    fn collect_tree_merges_several_roots() {
        let links = [(2, Some(1)), (3, Some(2)), (5, Some(4))];
        assert_eq!(collect_tree([1, 4], links), vec![1, 4, 2, 5, 3]);
    }

    #[test]
    fn collect_tree_tolerates_cycles() {
        let links = [(1, Some(2)), (2, Some(1))];
        assert_eq!(collect_tree([1], links), vec![1, 2]);
    }

    #[test]
    fn disarmed_guard_does_nothing() {
        let mut guard = TreeGuard::new(Some(ProcessTree::new(u32::MAX)));
        assert_eq!(guard.disarm().map(|t| t.root), Some(u32::MAX));
        assert!(guard.disarm().is_none());
    }

    #[test]
    fn markers_are_unique() {
        let (key, a) = new_marker();
        let (_, b) = new_marker();
        assert_eq!(key, TREE_MARKER_VAR);
        assert_ne!(a, b);
    }

    #[test]
    fn current_process_is_running() {
        assert!(is_running(std::process::id()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_kills_child_and_grandchild() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let mut child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("sleep 30 & echo $! > '{}'; wait", pid_file.display()))
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let root = child.id().unwrap();

        let grandchild = loop {
            if let Ok(text) = std::fs::read_to_string(&pid_file) {
                if let Ok(pid) = text.trim().parse::<u32>() {
                    break pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        let mut tree = ProcessTree::new(root);
        assert!(tree.terminate() >= 2);
        child.wait().await.unwrap();
        assert!(tree.wait_for_exit(Duration::from_secs(5)).await.is_empty());
        assert!(!is_running(root));
        assert!(!is_running(grandchild));
    }
}
