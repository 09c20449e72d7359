//! The long-running daemon: holds one [`Scanner`] worker per task, behind
//! a thread pool, and answers the CLI's requests over the project's Unix
//! socket.

use std::collections::HashMap;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etmem_rs::classification::classify_by_threshold;
use etmem_rs::error::{EtmemError, Result};
use etmem_rs::scan::Scanner;
use etmem_rs::swap::SwapSession;
use etmem_rs::types::{SwapConfig, WeightConfig};
use etmem_rs::MemoryGrade;
use threadpool::ThreadPool;

use crate::config::{EngineKind, Project, TaskConfig};
use crate::protocol::{read_request, write_response, DaemonRequest, DaemonResponse, ProjectSummary};

/// A project whose tasks are currently running in their own pool.
struct RunningProject {
    project: Project,
    stop: Arc<AtomicBool>,
    pool: ThreadPool,
}

/// The daemon's in-memory registry of running projects.
///
/// One process hosts every project added through `etmem project add`;
/// each project gets its own [`ThreadPool`] sized to its task count so a
/// slow scan on one task never starves another project's tasks.
pub struct Daemon {
    projects: Mutex<HashMap<String, RunningProject>>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create an empty daemon with no projects running.
    pub fn new() -> Self {
        Self {
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Bind `sock_path` and serve requests until the listener errs.
    ///
    /// Each connection is handled synchronously and to completion before
    /// the next is accepted, matching the protocol's one-request,
    /// one-response, then-close shape.
    pub fn run(self: Arc<Self>, sock_path: &str) -> Result<()> {
        let _ = std::fs::remove_file(sock_path);
        let listener = UnixListener::bind(sock_path)
            .map_err(|e| EtmemError::IoError(format!("binding {sock_path}: {e}")))?;
        log::info!("etmemd listening on {sock_path}");

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.handle_connection(stream) {
                        log::warn!("connection error: {e}");
                    }
                }
                Err(e) => log::warn!("accept failed: {e}"),
            }
        }
        Ok(())
    }

    fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let request = read_request(&stream)?;
        let response = self.dispatch(request);
        let mut stream = stream;
        write_response(&mut stream, &response)
    }

    fn dispatch(&self, request: DaemonRequest) -> DaemonResponse {
        match request {
            DaemonRequest::ProjectAdd { name, file } => match self.add_project(&name, &file) {
                Ok(()) => DaemonResponse::Ok {
                    message: format!("project {name} started"),
                },
                Err(e) => DaemonResponse::Err {
                    message: e.to_string(),
                },
            },
            DaemonRequest::ProjectDel { name } => match self.remove_project(&name) {
                Ok(()) => DaemonResponse::Ok {
                    message: format!("project {name} stopped"),
                },
                Err(e) => DaemonResponse::Err {
                    message: e.to_string(),
                },
            },
            DaemonRequest::ProjectShow => DaemonResponse::Projects {
                projects: self.list_projects(),
            },
        }
    }

    /// Load `file` and start a worker thread per task under `name`.
    ///
    /// # Errors
    /// Returns [`EtmemError::ConfigError`] if `name` is already running,
    /// the config fails to load, or the thread pool can't be created.
    fn add_project(&self, name: &str, file: &str) -> Result<()> {
        let mut projects = self.projects.lock().expect("project registry poisoned");
        if projects.contains_key(name) {
            return Err(EtmemError::ConfigError(format!(
                "project {name} is already running"
            )));
        }

        let project = Project::load(file)?;
        let pool = ThreadPool::new(project.tasks.len().max(1))
            .map_err(|e| EtmemError::ConfigError(e.to_string()))?;
        let stop = Arc::new(AtomicBool::new(false));

        for task in project.tasks.clone() {
            let stop = Arc::clone(&stop);
            let loop_count = project.loop_count;
            let sleep_secs = project.sleep_secs;
            pool.execute(move || run_task(task, loop_count, sleep_secs, stop))
                .map_err(|e| EtmemError::ConfigError(e.to_string()))?;
        }

        projects.insert(
            name.to_string(),
            RunningProject {
                project,
                stop,
                pool,
            },
        );
        Ok(())
    }

    /// Signal `name`'s tasks to stop and drain its thread pool.
    ///
    /// # Errors
    /// Returns [`EtmemError::ConfigError`] if no project by that name is
    /// running, or if a worker thread panicked while draining.
    fn remove_project(&self, name: &str) -> Result<()> {
        let mut projects = self.projects.lock().expect("project registry poisoned");
        match projects.remove(name) {
            Some(mut running) => {
                running.stop.store(true, Ordering::SeqCst);
                running
                    .pool
                    .shutdown()
                    .map_err(|e| EtmemError::ConfigError(e.to_string()))?;
                Ok(())
            }
            None => Err(EtmemError::ConfigError(format!(
                "no project named {name}"
            ))),
        }
    }

    fn list_projects(&self) -> Vec<ProjectSummary> {
        let projects = self.projects.lock().expect("project registry poisoned");
        projects
            .values()
            .map(|r| ProjectSummary {
                name: r.project.name.clone(),
                task_count: r.project.tasks.len(),
                loop_count: r.project.loop_count,
                sleep_secs: r.project.sleep_secs,
            })
            .collect()
    }
}

/// One task's worker loop: scan, classify, and (for [`EngineKind::ScanAndSwap`])
/// migrate cold pages, until `stop` is set.
fn run_task(task: TaskConfig, loop_count: u32, sleep_secs: u32, stop: Arc<AtomicBool>) {
    let scanner = Scanner::new(WeightConfig::default());
    let pid = task.target.pid();

    while !stop.load(Ordering::SeqCst) {
        match scanner.scan(pid, loop_count, sleep_secs, None) {
            Ok(accumulated) => {
                let grade =
                    classify_by_threshold(accumulated.as_slice(), WeightConfig::default().w_write);
                if matches!(task.engine, EngineKind::ScanAndSwap) {
                    if let Err(e) = migrate(pid, &grade) {
                        log::warn!("migration failed for pid {pid}: {e}");
                    }
                }
            }
            Err(e) => log::warn!("scan failed for pid {pid}: {e}"),
        }
        std::thread::sleep(Duration::from_secs(sleep_secs as u64));
    }
}

/// Submit a grade's cold pages to the kernel's swap reclaim interface.
fn migrate(pid: u32, grade: &MemoryGrade) -> Result<()> {
    let mut session = SwapSession::new(pid, SwapConfig::default())?;
    let addrs: Vec<u64> = grade.cold_pages.iter().map(|r| r.addr).collect();
    session.add_addresses(&addrs)?;
    session.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskPid;

    fn sample_project(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(format!("{name}.json"));
        let project = Project {
            name: name.to_string(),
            sock_name: dir.join(format!("{name}.sock")).display().to_string(),
            loop_count: 1,
            sleep_secs: 0,
            tasks: vec![TaskConfig {
                target: TaskPid::Pid(std::process::id()),
                engine: EngineKind::ScanOnly,
            }],
        };
        std::fs::write(&path, serde_json::to_string(&project).unwrap()).unwrap();
        path
    }

    #[test]
    fn removing_an_unknown_project_is_an_error() {
        let daemon = Daemon::new();
        assert!(matches!(
            daemon.remove_project("nope"),
            Err(EtmemError::ConfigError(_))
        ));
    }

    #[test]
    fn listing_projects_starts_empty() {
        let daemon = Daemon::new();
        assert!(daemon.list_projects().is_empty());
    }

    #[test]
    fn dispatch_project_show_lists_running_projects() {
        let dir = std::env::temp_dir().join(format!("etmem-daemon-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = sample_project(&dir, "demo");

        let daemon = Daemon::new();
        let response = daemon.dispatch(DaemonRequest::ProjectAdd {
            name: "demo".to_string(),
            file: config_path.display().to_string(),
        });
        assert!(matches!(response, DaemonResponse::Ok { .. }));

        let response = daemon.dispatch(DaemonRequest::ProjectShow);
        match response {
            DaemonResponse::Projects { projects } => {
                assert_eq!(projects.len(), 1);
                assert_eq!(projects[0].name, "demo");
            }
            other => panic!("expected Projects, got {other:?}"),
        }

        let response = daemon.dispatch(DaemonRequest::ProjectDel {
            name: "demo".to_string(),
        });
        assert!(matches!(response, DaemonResponse::Ok { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn adding_the_same_project_twice_is_rejected() {
        let dir = std::env::temp_dir().join(format!("etmem-daemon-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = sample_project(&dir, "dup");

        let daemon = Daemon::new();
        assert!(daemon.add_project("dup", &config_path.display().to_string()).is_ok());
        assert!(matches!(
            daemon.add_project("dup", &config_path.display().to_string()),
            Err(EtmemError::ConfigError(_))
        ));

        daemon.remove_project("dup").ok();
        std::fs::remove_dir_all(&dir).ok();
    }
}
