//! Project/task configuration loading
//!
//! Mirrors the original's `mem_proj`/task list shape: one JSON file per
//! project names its scan targets and the schedule the daemon should
//! run them on. Validation happens once at load time, not per scan pass.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use etmem_rs::error::{EtmemError, Result};

/// How a task's scan target is identified.
///
/// Only a literal pid is implemented; a cgroup/container handle is left
/// as an open extension point (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPid {
    /// A literal numeric process id.
    Pid(u32),
}

impl TaskPid {
    /// The numeric pid this task targets.
    pub fn pid(&self) -> u32 {
        match self {
            TaskPid::Pid(p) => *p,
        }
    }
}

/// Which engine drives a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Run the scan/classification engine only; report, do not migrate.
    ScanOnly,
    /// Run the scan/classification engine and submit cold pages to the
    /// kernel's swap reclaim interface.
    ScanAndSwap,
}

/// One task within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Which process to scan.
    pub target: TaskPid,
    /// Which engine runs this task.
    pub engine: EngineKind,
}

/// A project: a named group of tasks sharing one daemon socket and scan
/// schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project name, as given to `etmem project add -n`.
    pub name: String,
    /// Unix socket path the daemon listens on for this project.
    pub sock_name: String,
    /// Number of scan passes per scan invocation (must be >= 1).
    pub loop_count: u32,
    /// Seconds between scan passes.
    pub sleep_secs: u32,
    /// Scan targets.
    pub tasks: Vec<TaskConfig>,
}

impl Project {
    /// Load and validate a project configuration from a JSON file.
    ///
    /// # Errors
    /// Returns [`EtmemError::ConfigError`] on a missing file, malformed
    /// JSON, a `loop_count` of zero, or an empty task list.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| EtmemError::ConfigError(format!("reading {}: {e}", path.display())))?;
        let project: Project = serde_json::from_str(&content)
            .map_err(|e| EtmemError::ConfigError(format!("parsing {}: {e}", path.display())))?;
        project.validate()?;
        Ok(project)
    }

    fn validate(&self) -> Result<()> {
        if self.loop_count == 0 {
            return Err(EtmemError::ConfigError(
                "loop_count must be at least 1".to_string(),
            ));
        }
        if self.tasks.is_empty() {
            return Err(EtmemError::ConfigError(
                "project must declare at least one task".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project(loop_count: u32, tasks: Vec<TaskConfig>) -> Project {
        Project {
            name: "demo".to_string(),
            sock_name: "/tmp/etmem-demo.sock".to_string(),
            loop_count,
            sleep_secs: 1,
            tasks,
        }
    }

    fn one_task() -> TaskConfig {
        TaskConfig {
            target: TaskPid::Pid(1234),
            engine: EngineKind::ScanOnly,
        }
    }

    #[test]
    fn rejects_zero_loop_count() {
        let project = sample_project(0, vec![one_task()]);
        assert!(matches!(project.validate(), Err(EtmemError::ConfigError(_))));
    }

    #[test]
    fn rejects_empty_task_list() {
        let project = sample_project(3, vec![]);
        assert!(matches!(project.validate(), Err(EtmemError::ConfigError(_))));
    }

    #[test]
    fn accepts_well_formed_project() {
        let project = sample_project(3, vec![one_task()]);
        assert!(project.validate().is_ok());
    }

    #[test]
    fn round_trips_through_json() {
        let project = sample_project(2, vec![one_task()]);
        let json = serde_json::to_string(&project).unwrap();
        let parsed: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, project.name);
        assert_eq!(parsed.tasks[0].target.pid(), 1234);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Project::load("/nonexistent/path/to/project.json").unwrap_err();
        assert!(matches!(err, EtmemError::ConfigError(_)));
    }

    #[test]
    fn load_rejects_malformed_json() {
        let path = std::env::temp_dir().join(format!(
            "etmem-config-test-{}-{}.json",
            std::process::id(),
            "malformed"
        ));
        std::fs::write(&path, b"not json").unwrap();
        let err = Project::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, EtmemError::ConfigError(_)));
    }
}
