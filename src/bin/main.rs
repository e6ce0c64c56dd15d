use std::{error::Error, path::PathBuf, process};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use justrun::{
    cli::{Cli, Commands, parse_args},
    daemon::{DaemonControl, DaemonOptions, load_or_generate_password, run_daemon},
    error::Severity,
    ipc::{self, ControlCommand, ControlError, ControlResponse},
    plugin::PluginRegistry,
    runtime,
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    let config_dir = args
        .config
        .clone()
        .unwrap_or_else(runtime::default_config_dir);
    runtime::init(&config_dir);

    let exit_code = match run(args, config_dir) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    };
    process::exit(exit_code);
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Cli, config_dir: PathBuf) -> Result<(), Box<dyn Error>> {
    if let Commands::Serve { runit_compat } = args.command {
        let control = DaemonControl::new();
        control.install_signal_handler()?;
        let options = DaemonOptions {
            address: args.address,
            port: args.port,
            password: args.password.map(String::into_bytes),
            config_dir,
            runit_compat,
        };
        run_daemon(options, control, PluginRegistry::with_defaults())?;
        return Ok(());
    }

    let client = Client {
        address: args.address,
        port: args.port,
        password: match args.password {
            Some(password) => password.into_bytes(),
            None => load_or_generate_password(&runtime::password_path())?,
        },
        json: args.json,
    };

    match args.command {
        Commands::Serve { .. } => unreachable!("handled above"),
        Commands::Add { paths } => {
            // Additions must name real files; no glob matching applies.
            for path in paths {
                let path = absolute(&path);
                client.invoke(ControlCommand::Add { path })?;
            }
        }
        Commands::Del { paths } => {
            client.for_each_target(&paths, |path| ControlCommand::Delete { path })?;
        }
        Commands::Enable { paths } => {
            client.for_each_target(&paths, |path| ControlCommand::Enable { path })?;
        }
        Commands::Disable { paths } => {
            client.for_each_target(&paths, |path| ControlCommand::Disable { path })?;
        }
        Commands::Start { paths } => {
            client.for_each_target(&paths, |path| ControlCommand::Start { path })?;
        }
        Commands::Stop { paths } => {
            client.for_each_target(&paths, |path| ControlCommand::Stop { path })?;
        }
        Commands::Restart { paths } => {
            client.for_each_target(&paths, |path| ControlCommand::Restart { path })?;
        }
        Commands::Reload { paths } => {
            client.for_each_target(&paths, |path| ControlCommand::Reload { path })?;
        }
        Commands::Status { paths } => {
            client.for_each_target(&paths, |path| ControlCommand::Status { path })?;
        }
        Commands::List => {
            client.invoke(ControlCommand::List)?;
        }
        Commands::Gc => {
            client.invoke(ControlCommand::Gc)?;
        }
        Commands::Shutdown => {
            client.invoke(ControlCommand::Shutdown)?;
        }
    }
    Ok(())
}

struct Client {
    address: String,
    port: u16,
    password: Vec<u8>,
    json: bool,
}

impl Client {
    /// Sends one command, printing the response. Info-or-lower failures are
    /// notices, not errors.
    fn invoke(&self, command: ControlCommand) -> Result<(), Box<dyn Error>> {
        match ipc::send_command(&self.address, self.port, &self.password, &command) {
            Ok(response) => {
                self.render(&response)?;
                Ok(())
            }
            Err(ControlError::Server { severity, message })
                if severity <= Severity::Info =>
            {
                info!("{message}");
                Ok(())
            }
            Err(ControlError::Server { severity, message }) => {
                if severity == Severity::Warning {
                    warn!("{message}");
                    Ok(())
                } else {
                    Err(message.into())
                }
            }
            Err(ControlError::NotAvailable) => Err(format!(
                "no daemon listening on {}:{}",
                self.address, self.port
            )
            .into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Expands each argument into service paths and issues one command per
    /// path. Existing files are used verbatim; anything else is resolved
    /// against the daemon's known-path set.
    fn for_each_target<F>(&self, patterns: &[String], build: F) -> Result<(), Box<dyn Error>>
    where
        F: Fn(PathBuf) -> ControlCommand,
    {
        for pattern in patterns {
            let candidate = absolute(pattern);
            if candidate.is_file() {
                self.invoke(build(candidate))?;
                continue;
            }

            let matched = self.match_known(pattern)?;
            if matched.is_empty() {
                return Err(format!("no known service matches '{pattern}'").into());
            }
            for path in matched {
                self.invoke(build(path))?;
            }
        }
        Ok(())
    }

    /// Asks the daemon to glob-match a pattern against its known paths.
    fn match_known(&self, pattern: &str) -> Result<Vec<PathBuf>, Box<dyn Error>> {
        let command = ControlCommand::Match {
            patterns: vec![pattern.to_string()],
        };
        match ipc::send_command(&self.address, self.port, &self.password, &command)? {
            ControlResponse::Paths(paths) => Ok(paths),
            other => Err(format!("unexpected match response: {other:?}").into()),
        }
    }

    fn render(&self, response: &ControlResponse) -> Result<(), Box<dyn Error>> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(response)?);
            return Ok(());
        }
        match response {
            ControlResponse::Ok => println!("ok"),
            ControlResponse::Message(message) => println!("{message}"),
            ControlResponse::Error { message, .. } => println!("error: {message}"),
            ControlResponse::Status(report) => {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            ControlResponse::List(dict) => {
                for (path, flags) in dict {
                    let rendered: Vec<String> =
                        flags.iter().map(|flag| flag.to_string()).collect();
                    println!("{}: {}", path.display(), rendered.join(" "));
                }
            }
            ControlResponse::Paths(paths) => {
                for path in paths {
                    println!("{}", path.display());
                }
            }
            ControlResponse::Pong { version } => println!("pong (daemon {version})"),
        }
        Ok(())
    }
}

/// Makes a user-supplied path absolute, resolving symlinks when it exists.
fn absolute(raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}
