// ABOUTME: Replays a snapshot into a target server through the mysql client
// ABOUTME: Credentials go through a scoped 0600 option file; process execution is injectable

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tempfile::NamedTempFile;
use which::which;

use crate::connection::ConnectionParams;
use crate::writer::GZIP_EXTENSION;

/// Name of the client binary snapshots are replayed with.
pub const MYSQL_CLIENT: &str = "mysql";

/// Runs external programs on behalf of the restore step.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, streaming `input` to its stdin.
    ///
    /// Fails when the program cannot be started or exits unsuccessfully.
    fn run_with_input(&self, program: &str, args: &[String], input: &mut dyn Read) -> Result<()>;
}

/// [`CommandRunner`] backed by `std::process`, resolving programs on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run_with_input(&self, program: &str, args: &[String], input: &mut dyn Read) -> Result<()> {
        let path = which(program).with_context(|| {
            format!(
                "{} not found in PATH\n\
                 \n\
                 Please install the MySQL client:\n\
                 - Ubuntu/Debian: sudo apt-get install mysql-client\n\
                 - macOS: brew install mysql-client",
                program
            )
        })?;

        tracing::debug!("Running {}", path.display());

        let mut child = Command::new(&path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", path.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .context("Child process has no stdin")?;
        match pipe(input, &mut stdin) {
            Ok(bytes) => tracing::debug!("Sent {} bytes to {}", bytes, program),
            Err(PipeError::Write(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                // The client exited early; its status and stderr say why
                tracing::debug!("{} closed its input: {}", program, e);
            }
            Err(err) => {
                // Stop the client before it sees EOF and applies what it has
                let _ = child.kill();
                drop(stdin);
                let _ = child.wait();
                return Err(match err {
                    PipeError::Read(e) => anyhow::Error::new(e).context(format!(
                        "Snapshot input is unreadable; stopped {} before applying a partial snapshot",
                        program
                    )),
                    PipeError::Write(e) => {
                        anyhow::Error::new(e).context(format!("Failed to write to {}", program))
                    }
                });
            }
        }
        drop(stdin);

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for {}", program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[derive(Debug)]
enum PipeError {
    Read(io::Error),
    Write(io::Error),
}

/// Copy `input` into `output`, keeping read failures apart from write failures.
fn pipe(input: &mut dyn Read, output: &mut dyn Write) -> std::result::Result<u64, PipeError> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PipeError::Read(e)),
        };
        output.write_all(&buf[..n]).map_err(PipeError::Write)?;
        total += n as u64;
    }
    output.flush().map_err(PipeError::Write)?;
    Ok(total)
}

/// Temporary MySQL option file holding client credentials.
///
/// Created with 0600 permissions and removed when dropped, on every exit path.
/// Pass it to the client with [`OptionFile::argument`].
pub struct OptionFile {
    file: NamedTempFile,
}

impl OptionFile {
    pub fn new(params: &ConnectionParams) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("db-snapper-")
            .suffix(".cnf")
            .tempfile()
            .context("Failed to create temporary option file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
                .with_context(|| {
                    format!(
                        "Failed to set permissions on option file at {}",
                        file.path().display()
                    )
                })?;
        }

        file.write_all(Self::render(params).as_bytes())
            .with_context(|| format!("Failed to write option file at {}", file.path().display()))?;
        file.flush()?;

        Ok(Self { file })
    }

    /// `[client]` section for `params`.
    fn render(params: &ConnectionParams) -> String {
        let mut content = String::from("[client]\n");
        content.push_str(&format!("user={}\n", option_value(&params.user)));
        if let Some(password) = &params.password {
            content.push_str(&format!("password={}\n", option_value(password)));
        }
        match &params.socket {
            Some(socket) => {
                content.push_str(&format!(
                    "socket={}\n",
                    option_value(&socket.display().to_string())
                ));
            }
            None => {
                if let Some(host) = &params.host {
                    content.push_str(&format!("host={}\n", option_value(host)));
                }
                if let Some(port) = params.port {
                    content.push_str(&format!("port={}\n", port));
                }
                content.push_str("protocol=TCP\n");
            }
        }
        content
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// `--defaults-extra-file=<path>`; must be the client's first argument.
    pub fn argument(&self) -> String {
        format!("--defaults-extra-file={}", self.path().display())
    }
}

/// Double-quote an option-file value, escaping backslashes and quotes.
fn option_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

/// Feeds a snapshot file into a target database.
pub struct Restorer<R: CommandRunner = SystemCommandRunner> {
    runner: R,
    client: String,
}

impl Restorer<SystemCommandRunner> {
    pub fn new() -> Self {
        Self::with_runner(SystemCommandRunner)
    }
}

impl Default for Restorer<SystemCommandRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> Restorer<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            client: MYSQL_CLIENT.to_string(),
        }
    }

    /// Use a different client binary (e.g. `mariadb`).
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = client.into();
        self
    }

    /// Replay `snapshot` into `target`. `.gz` snapshots are decompressed on the fly.
    pub fn restore(&self, target: &ConnectionParams, snapshot: &Path) -> Result<()> {
        target
            .validate()
            .context("Invalid restore target")?;

        let file = File::open(snapshot)
            .with_context(|| format!("Failed to open snapshot {}", snapshot.display()))?;
        let mut input: Box<dyn Read> = if is_compressed(snapshot) {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let options = OptionFile::new(target)?;
        let args = vec![options.argument(), target.database.clone()];

        tracing::info!(
            "Restoring {} into {}",
            snapshot.display(),
            target.identifier()
        );

        self.runner
            .run_with_input(&self.client, &args, &mut input)
            .with_context(|| {
                format!(
                    "Failed to restore {} into {}",
                    snapshot.display(),
                    target.identifier()
                )
            })?;

        tracing::info!("Restore of {} complete", snapshot.display());
        Ok(())
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(GZIP_EXTENSION)
}

/// Path of the option file referenced by a client argument list, if any.
pub fn option_file_from_args(args: &[String]) -> Option<PathBuf> {
    args.first()
        .and_then(|a| a.strip_prefix("--defaults-extra-file="))
        .map(PathBuf::from)
}
