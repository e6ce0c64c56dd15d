//! Daemon frame: lock file, password file, the authenticated control
//! endpoint, and orderly shutdown of the whole supervisor.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, Write},
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use fs2::FileExt;
use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    constants::{ACCEPT_IDLE_INTERVAL, PASSWORD_LENGTH, SHUTDOWN_POLL_INTERVAL},
    error::{Severity, SupervisorError},
    ipc::{self, ControlCommand, ControlError, ControlResponse},
    manager::Manager,
    paths::{match_known_paths, search_files},
    plugin::PluginRegistry,
    roster::RosterConfig,
    runtime,
    sched::Scheduler,
};

/// Daemon-frame errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core supervisor error.
    #[error(transparent)]
    Core(#[from] SupervisorError),
    /// Control channel error.
    #[error(transparent)]
    Control(#[from] ControlError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A second daemon tried to start against the same config directory.
    #[error("another daemon already holds the lock file {0}")]
    AlreadyRunning(PathBuf),
}

/// Process-wide shutdown flag shared between the signal handler, the RPC
/// server, and the daemon main thread.
#[derive(Clone, Default)]
pub struct DaemonControl {
    shutdown: Arc<AtomicBool>,
}

impl DaemonControl {
    /// Creates a control with the flag cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the termination-signal handler that sets the shutdown flag.
    /// May be called at most once per process.
    pub fn install_signal_handler(&self) -> Result<(), DaemonError> {
        let flag = Arc::clone(&self.shutdown);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .map_err(|err| {
            DaemonError::Io(io::Error::other(format!(
                "failed to install signal handler: {err}"
            )))
        })
    }

    /// Sets the shutdown flag.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// True once shutdown has been requested.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Options for one daemon invocation.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Listen address for the control endpoint.
    pub address: String,
    /// Listen port for the control endpoint.
    pub port: u16,
    /// Shared secret; when `None` the password file is loaded or generated.
    pub password: Option<Vec<u8>>,
    /// Configuration directory.
    pub config_dir: PathBuf,
    /// Honor runit-style sibling `down` hooks.
    pub runit_compat: bool,
}

/// Reads the password file, generating a fresh 20-character alphanumeric
/// secret when it does not exist yet.
pub fn load_or_generate_password(path: &Path) -> Result<Vec<u8>, DaemonError> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let password: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(PASSWORD_LENGTH)
                .map(char::from)
                .collect();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(path)?;
            file.write_all(password.as_bytes())?;
            info!("generated password file {:?}", path);
            Ok(password.into_bytes())
        }
        Err(err) => Err(err.into()),
    }
}

/// Acquires the daemon-singleton lock file. The returned handle must stay
/// alive for the lifetime of the daemon.
fn acquire_lock(path: &Path) -> Result<File, DaemonError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    file.try_lock_exclusive()
        .map_err(|_| DaemonError::AlreadyRunning(path.to_path_buf()))?;
    Ok(file)
}

/// Runs the daemon until the control flag is set by a `shutdown` RPC or a
/// termination signal. The caller owns the control (and installs the signal
/// handler on it) and the plugin registry.
pub fn run_daemon(
    options: DaemonOptions,
    control: DaemonControl,
    plugins: Arc<PluginRegistry>,
) -> Result<(), DaemonError> {
    runtime::init(&options.config_dir);
    fs::create_dir_all(runtime::config_dir())?;
    fs::create_dir_all(runtime::tmp_dir())?;

    let lock_path = runtime::lock_path();
    let lock_file = acquire_lock(&lock_path)?;

    let password = match options.password.clone() {
        Some(password) => password,
        None => load_or_generate_password(&runtime::password_path())?,
    };

    let manager = Arc::new(Manager::new(
        RosterConfig::new(runtime::roster_path()),
        runtime::default_profile_dir(),
        runtime::runner_tmp_root(),
        Scheduler::new(),
        options.runit_compat,
    ));
    manager.set_observer(Arc::clone(&plugins) as Arc<dyn crate::runner::StatusObserver>);

    plugins.fire_on_start();
    manager.startup().map_err(DaemonError::Core)?;

    let listener = TcpListener::bind((options.address.as_str(), options.port))?;
    listener.set_nonblocking(true)?;
    info!(
        "daemon listening on {}:{} (config {:?})",
        options.address, options.port, options.config_dir
    );

    let server = spawn_server(listener, password, Arc::clone(&manager), control.clone());

    while !control.should_shutdown() {
        thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }
    info!("shutdown requested");

    if let Err(err) = server.join() {
        warn!("control server thread panicked: {err:?}");
    }

    plugins.fire_on_shutdown();
    manager.shutdown();

    let _ = FileExt::unlock(&lock_file);
    let _ = fs::remove_file(&lock_path);
    info!("daemon exited");
    Ok(())
}

/// Serves control connections on a background thread until shutdown.
fn spawn_server(
    listener: TcpListener,
    password: Vec<u8>,
    manager: Arc<Manager>,
    control: DaemonControl,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !control.should_shutdown() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("control connection from {peer}");
                    if let Err(err) =
                        handle_connection(&stream, &password, &manager, &control)
                    {
                        warn!("control connection failed: {err}");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_IDLE_INTERVAL);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    error!("control listener error: {err}");
                    break;
                }
            }
        }
    })
}

/// Authenticates one connection and serves exactly one command on it.
fn handle_connection(
    stream: &TcpStream,
    password: &[u8],
    manager: &Manager,
    control: &DaemonControl,
) -> Result<(), ControlError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;

    let mut reader = BufReader::new(stream);
    if !ipc::server_handshake(&mut reader, stream, password)? {
        warn!("rejected connection: bad credentials");
        // Drain the command the client already sent so it reads the
        // rejection instead of a broken pipe.
        let _ = ipc::read_command(&mut reader);
        ipc::write_response(
            stream,
            &ControlResponse::Error {
                severity: Severity::Error,
                message: "authentication failed".into(),
            },
        )?;
        return Ok(());
    }

    let command = ipc::read_command(&mut reader)?;
    debug!("control command: {command:?}");
    let shutdown_requested = matches!(command, ControlCommand::Shutdown);
    let response = dispatch(manager, command);
    ipc::write_response(stream, &response)?;
    if shutdown_requested {
        control.request_shutdown();
    }
    Ok(())
}

/// Routes one command to the object that owns it: the runner manager, the
/// roster config, or the utilities object.
fn dispatch(manager: &Manager, command: ControlCommand) -> ControlResponse {
    let result: Result<ControlResponse, SupervisorError> = match command {
        // Runner manager object.
        ControlCommand::Start { path } => manager
            .start_runner(&path, None)
            .map(|()| ControlResponse::Message(format!("{} started", path.display()))),
        ControlCommand::Stop { path } => manager
            .stop_runner(&path, false)
            .map(|()| ControlResponse::Message(format!("{} stopped", path.display()))),
        ControlCommand::Restart { path } => manager
            .restart_runner(&path)
            .map(|()| ControlResponse::Message(format!("{} restarted", path.display()))),
        ControlCommand::Reload { path } => manager
            .reload_runner(&path)
            .map(|()| ControlResponse::Message(format!("{} reloaded", path.display()))),
        ControlCommand::Status { path } => manager
            .get_runner(&path)
            .map(|runner| ControlResponse::Status(Box::new(runner.status_snapshot()))),
        ControlCommand::List => manager
            .get_runner_status_dict()
            .map(ControlResponse::List),
        ControlCommand::Gc => manager.clean_runner().map(ControlResponse::Paths),
        ControlCommand::Signal { path, signal } => manager
            .get_runner(&path)
            .and_then(|runner| runner.send_signal(signal))
            .map(|()| {
                ControlResponse::Message(format!(
                    "signal {signal} sent to {}",
                    path.display()
                ))
            }),

        // Roster config object.
        ControlCommand::Add { path } => manager
            .roster()
            .add(&path)
            .map(|()| ControlResponse::Message(format!("{} added", path.display()))),
        ControlCommand::Delete { path } => manager
            .roster()
            .delete(&path)
            .map(|()| ControlResponse::Message(format!("{} deleted", path.display()))),
        ControlCommand::Enable { path } => manager
            .roster()
            .enable(&path)
            .map(|()| ControlResponse::Message(format!("{} enabled", path.display()))),
        ControlCommand::Disable { path } => manager
            .roster()
            .disable(&path)
            .map(|()| ControlResponse::Message(format!("{} disabled", path.display()))),

        // Utilities object.
        ControlCommand::Ping => Ok(ControlResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
        ControlCommand::Match { patterns } => manager.known_paths().map(|known| {
            let mut matched = Vec::new();
            for pattern in &patterns {
                for path in match_known_paths(&known, pattern) {
                    if !matched.contains(&path) {
                        matched.push(path);
                    }
                }
            }
            ControlResponse::Paths(matched)
        }),
        ControlCommand::Find { keyword } => Ok(ControlResponse::Paths(search_files(
            &runtime::config_dir(),
            &keyword,
        ))),

        ControlCommand::Shutdown => {
            Ok(ControlResponse::Message("daemon shutting down".into()))
        }
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            let severity = err.severity();
            let message = err.to_string();
            match severity {
                Severity::Debug => debug!("{message}"),
                Severity::Info => info!("{message}"),
                Severity::Warning => warn!("{message}"),
                Severity::Error => error!("{message}"),
            }
            ControlResponse::Error { severity, message }
        }
    }
}
