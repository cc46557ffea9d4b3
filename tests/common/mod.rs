//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;

use ust_router::config::RouterConfig;

pub const PASSWORD: &str = "ingest-secret";

/// A scratch installation: root directory, password file and socket paths.
pub struct Sandbox {
    pub dir: TempDir,
    pub root: PathBuf,
    pub password_file: PathBuf,
    pub ingestion_socket: PathBuf,
    pub admin_socket: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("resources")).unwrap();
        let password_file = dir.path().join("password");
        fs::write(&password_file, format!("{PASSWORD}\n")).unwrap();
        Self {
            ingestion_socket: dir.path().join("ingest.sock"),
            admin_socket: dir.path().join("admin.sock"),
            root,
            password_file,
            dir,
        }
    }

    pub fn config(&self) -> RouterConfig {
        let mut config = RouterConfig::default();
        config.root_path = Some(self.root.clone());
        config.instance_dir = Some(self.dir.path().to_path_buf());
        config.listener.address = format!("unix:{}", self.ingestion_socket.display());
        config.listener.api_addresses = vec![format!("unix:{}", self.admin_socket.display())];
        config.auth.password_file = Some(self.password_file.clone());
        config
    }

    /// Write `config` as TOML and return its path.
    pub fn write_config(&self, config: &RouterConfig) -> PathBuf {
        let path = self.dir.path().join("ust-router.toml");
        fs::write(&path, toml::to_string(config).unwrap()).unwrap();
        path
    }
}

/// The agent binary running in its own process group.
pub struct AgentProcess {
    child: Child,
    lines: mpsc::Receiver<String>,
    pub seen: Vec<String>,
}

impl AgentProcess {
    pub fn spawn(config: &Path) -> Self {
        Self::spawn_with(config, None)
    }

    /// Spawn with `feedback` installed as descriptor 3.
    pub fn spawn_with(config: &Path, feedback: Option<OwnedFd>) -> Self {
        let mut command = Command::new(env!("CARGO_BIN_EXE_ust-router"));
        command
            .arg("--config")
            .arg(config)
            .env("RUST_LOG", "info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(fd) = feedback {
            command.arg("--feedback-fd").arg("3");
            let raw = fd.as_raw_fd();
            // SAFETY: dup2 and fcntl are async-signal-safe; `fd` outlives the
            // spawn below.
            unsafe {
                command.pre_exec(move || {
                    let result = if raw == 3 {
                        fcntl(3, FcntlArg::F_SETFD(FdFlag::empty())).map(|_| ())
                    } else {
                        nix::unistd::dup2(raw, 3).map(|_| ())
                    };
                    result.map_err(std::io::Error::from)
                });
            }
            let child = command.spawn().unwrap();
            drop(fd);
            return Self::attach(child);
        }
        Self::attach(command.spawn().unwrap())
    }

    fn attach(mut child: Child) -> Self {
        let stderr = child.stderr.take().unwrap();
        let (tx, lines) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            child,
            lines,
            seen: Vec::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    pub fn signal(&self, signal: Signal) {
        kill(self.pid(), signal).unwrap();
    }

    /// Read stderr until a line contains `needle`.
    pub fn wait_for_line(&mut self, needle: &str) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    let found = line.contains(needle);
                    self.seen.push(line);
                    if found {
                        return;
                    }
                }
                Err(_) => panic!("never saw {needle:?}; output so far:\n{}", self.seen.join("\n")),
            }
        }
    }

    /// Wait for exit and collect the remaining output.
    pub fn wait(mut self) -> (ExitStatus, Vec<String>) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let status = loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                break status;
            }
            if Instant::now() > deadline {
                let _ = self.child.kill();
                panic!("agent did not exit; output so far:\n{}", self.seen.join("\n"));
            }
            std::thread::sleep(Duration::from_millis(10));
        };
        while let Ok(line) = self.lines.recv_timeout(Duration::from_secs(1)) {
            self.seen.push(line);
        }
        (status, std::mem::take(&mut self.seen))
    }
}

pub fn count_lines(lines: &[String], needle: &str) -> usize {
    lines.iter().filter(|line| line.contains(needle)).count()
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
