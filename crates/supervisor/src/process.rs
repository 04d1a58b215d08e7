//! Converter process management.
//!
//! One child process per configured instance. Exited children are relaunched
//! on the next check; launches that fail are retried on the next check too.

use crate::SupervisorError;
use png2jpg_watch_config::Config;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

/// A supervised converter instance.
#[derive(Debug)]
pub struct Instance {
    name: String,
    child: Option<Child>,
    launches: u32,
}

impl Instance {
    fn new(name: String) -> Self {
        Self {
            name,
            child: None,
            launches: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process id while a child is held.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.id())
    }

    /// Successful launches so far, restarts included.
    pub fn launches(&self) -> u32 {
        self.launches
    }
}

/// A running child, as seen by the usage sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInstance {
    pub name: String,
    pub pid: u32,
}

/// Launches converter instances and keeps them running.
#[derive(Debug)]
pub struct Supervisor {
    program: PathBuf,
    leading_args: Vec<OsString>,
    instances: Vec<Instance>,
}

impl Supervisor {
    /// Each instance runs as `<program> <leading_args..> <name>`.
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<OsString>, names: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
            instances: names.into_iter().map(Instance::new).collect(),
        }
    }

    /// Supervise every `[supervisor].instances` entry with
    /// `<converter_program> --config <config_path> <name>`.
    pub fn from_config(config: &Config, config_path: &Path) -> Self {
        Self::new(
            &config.supervisor.converter_program,
            vec![OsString::from("--config"), config_path.as_os_str().to_owned()],
            config.supervisor.instances.clone(),
        )
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    fn command_line(&self, name: &str) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.leading_args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line.push(' ');
        line.push_str(name);
        line
    }

    /// Launch the instance at `index`, replacing any child it held.
    pub fn spawn(&mut self, index: usize) -> Result<u32, SupervisorError> {
        let command_line = match self.instances.get(index) {
            Some(instance) => self.command_line(&instance.name),
            None => return Err(SupervisorError::NoSuchInstance(index)),
        };
        let instance = &mut self.instances[index];

        let child = Command::new(&self.program)
            .args(&self.leading_args)
            .arg(&instance.name)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                name: instance.name.clone(),
                source,
            })?;

        let pid = child.id().unwrap_or_default();
        instance.child = Some(child);
        instance.launches += 1;
        info!(instance = %instance.name, pid, command = %command_line, "Started converter");
        Ok(pid)
    }

    /// Launch every instance. Returns how many started.
    pub fn start_all(&mut self) -> usize {
        let mut started = 0;
        for index in 0..self.instances.len() {
            match self.spawn(index) {
                Ok(_) => started += 1,
                Err(e) => error!(error = %e, "Launch failed, retrying at next check"),
            }
        }
        started
    }

    /// Relaunch instances that exited or never started. Returns how many
    /// were (re)started.
    pub fn check_and_restart(&mut self) -> usize {
        let mut restarted = 0;
        for index in 0..self.instances.len() {
            let instance = &mut self.instances[index];
            let needs_launch = match instance.child.as_mut() {
                None => true,
                Some(child) => match child.try_wait() {
                    Ok(None) => false,
                    Ok(Some(status)) => {
                        warn!(
                            instance = %instance.name,
                            pid = ?child.id(),
                            %status,
                            "Converter exited, restarting"
                        );
                        instance.child = None;
                        true
                    }
                    Err(e) => {
                        error!(instance = %instance.name, error = %e, "Could not poll converter");
                        false
                    }
                },
            };

            if needs_launch {
                match self.spawn(index) {
                    Ok(_) => restarted += 1,
                    Err(e) => error!(error = %e, "Relaunch failed, retrying at next check"),
                }
            }
        }
        restarted
    }

    /// Children currently held, with their process ids.
    pub fn running(&self) -> Vec<RunningInstance> {
        self.instances
            .iter()
            .filter_map(|instance| {
                instance.pid().map(|pid| RunningInstance {
                    name: instance.name.clone(),
                    pid,
                })
            })
            .collect()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_for_exit() -> Duration {
        Duration::from_millis(300)
    }

    #[test]
    fn test_from_config_builds_converter_command() {
        let config = Config::parse_toml(
            r#"
[supervisor]
converter_program = "/opt/bin/png2jpg-convert"
instances = ["abh125c_1", "abh125c_2"]
"#,
        )
        .unwrap();
        let supervisor = Supervisor::from_config(&config, Path::new("/etc/png2jpg.toml"));

        assert_eq!(supervisor.instances().len(), 2);
        assert_eq!(
            supervisor.command_line("abh125c_1"),
            "/opt/bin/png2jpg-convert --config /etc/png2jpg.toml abh125c_1"
        );
    }

    #[tokio::test]
    async fn test_start_all_tracks_running_children() {
        let mut supervisor = Supervisor::new("sleep", vec![], vec!["5".into(), "5".into()]);

        assert_eq!(supervisor.start_all(), 2);
        let running = supervisor.running();
        assert_eq!(running.len(), 2);
        assert!(running.iter().all(|r| r.pid > 0));

        // Nothing exited, nothing restarted.
        assert_eq!(supervisor.check_and_restart(), 0);
        for instance in &mut supervisor.instances {
            if let Some(child) = instance.child.as_mut() {
                child.kill().await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_exited_child_is_restarted() {
        let mut supervisor = Supervisor::new("true", vec![], vec!["ignored".into()]);
        supervisor.start_all();
        tokio::time::sleep(wait_for_exit()).await;

        assert_eq!(supervisor.check_and_restart(), 1);
        assert_eq!(supervisor.instances()[0].launches(), 2);
    }

    #[tokio::test]
    async fn test_failed_launch_is_retried() {
        let mut supervisor = Supervisor::new(
            "/nonexistent/png2jpg-convert",
            vec![],
            vec!["abh125c_1".into()],
        );

        assert_eq!(supervisor.start_all(), 0);
        assert!(supervisor.running().is_empty());
        assert_eq!(supervisor.check_and_restart(), 0);
        assert_eq!(supervisor.instances()[0].launches(), 0);
    }

    #[test]
    fn test_spawn_out_of_range() {
        let mut supervisor = Supervisor::new("true", vec![], vec![]);
        assert!(matches!(
            supervisor.spawn(3),
            Err(SupervisorError::NoSuchInstance(3))
        ));
    }
}
