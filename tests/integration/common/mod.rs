#![allow(dead_code)]

use std::{
    fs,
    net::TcpListener,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use justrun::ipc::{self, ControlCommand, ControlResponse};

/// Shared secret used by every daemon spawned from the test suites.
pub const TEST_PASSWORD: &str = "integration-secret";

/// Writes a small shell script and marks it executable.
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

/// Reserves a free TCP port by binding to an ephemeral one and releasing it.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// A resident daemon spawned from the `jrun` binary for one test, torn down
/// on drop.
pub struct DaemonFixture {
    child: Child,
    pub port: u16,
    pub config_dir: PathBuf,
}

impl DaemonFixture {
    /// Starts `jrun serve` against a fresh config directory and waits until
    /// the control endpoint answers a ping.
    pub fn spawn(config_dir: &Path) -> Self {
        fs::create_dir_all(config_dir).expect("config dir");
        let port = free_port();
        let child = Command::new(assert_cmd::cargo::cargo_bin!("jrun"))
            .arg("--config")
            .arg(config_dir)
            .arg("--port")
            .arg(port.to_string())
            .arg("--password")
            .arg(TEST_PASSWORD)
            .arg("serve")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        let fixture = Self {
            child,
            port,
            config_dir: config_dir.to_path_buf(),
        };
        assert!(
            wait_until(|| fixture.ping(), Duration::from_secs(10)),
            "daemon did not come up on port {port}"
        );
        fixture
    }

    fn ping(&self) -> bool {
        matches!(
            ipc::send_command(
                "127.0.0.1",
                self.port,
                TEST_PASSWORD.as_bytes(),
                &ControlCommand::Ping,
            ),
            Ok(ControlResponse::Pong { .. })
        )
    }

    /// Sends one authenticated command to the daemon.
    pub fn send(&self, command: &ControlCommand) -> Result<ControlResponse, ipc::ControlError> {
        ipc::send_command("127.0.0.1", self.port, TEST_PASSWORD.as_bytes(), command)
    }

    /// Runs a `jrun` client subcommand against this daemon.
    pub fn client(&self, args: &[&str]) -> assert_cmd::Command {
        let mut cmd =
            assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("jrun"));
        cmd.arg("--config")
            .arg(&self.config_dir)
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--password")
            .arg(TEST_PASSWORD);
        cmd.args(args);
        cmd
    }

    /// Asks the daemon to shut down and waits for the process to exit.
    pub fn shutdown(mut self) {
        let _ = self.send(&ControlCommand::Shutdown);
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    break;
                }
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(_) => break,
            }
        }
    }
}

impl Drop for DaemonFixture {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
