use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use super::{MetadataEngine, TagMap, TagSet};
use crate::error::EngineError;
use crate::EngineConfig;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Output of one stream for one request, up to its ready marker.
#[derive(Debug)]
struct Chunk {
    stream: Stream,
    text: String,
}

#[derive(Debug, Default)]
struct Reply {
    stdout: String,
    stderr: String,
}

type Pending = Arc<Mutex<HashMap<u64, mpsc::Sender<Chunk>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One running exiftool child and the threads reading its output.
struct Process {
    generation: u64,
    child: Child,
    stdin: ChildStdin,
    pending: Pending,
    readers: Vec<JoinHandle<()>>,
}

impl Process {
    fn start(program: &Path, generation: u64) -> Result<Self, EngineError> {
        let mut child = Command::new(program)
            .args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.to_string_lossy().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(EngineError::Terminated)?;
        let stdout = child.stdout.take().ok_or(EngineError::Terminated)?;
        let stderr = child.stderr.take().ok_or(EngineError::Terminated)?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let readers = vec![
            spawn_reader(stdout, Stream::Stdout, Arc::clone(&pending)),
            spawn_reader(stderr, Stream::Stderr, Arc::clone(&pending)),
        ];

        tracing::info!(pid = child.id(), generation, "ExifTool process started");
        Ok(Self {
            generation,
            child,
            stdin,
            pending,
            readers,
        })
    }

    /// Ask the process to leave stay_open mode, killing it after `grace`.
    fn stop(mut self, grace: Duration) -> Result<(), EngineError> {
        let _ = self.stdin.write_all(b"-stay_open\nFalse\n");
        let _ = self.stdin.flush();
        drop(self.stdin);

        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait()? {
                Some(status) => {
                    tracing::debug!(%status, "ExifTool exited");
                    break;
                }
                None if Instant::now() >= deadline => {
                    tracing::warn!("ExifTool did not exit in time, killing it");
                    self.child.kill()?;
                    self.child.wait()?;
                    break;
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        }

        for handle in self.readers {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Kill at once and fail every request still waiting on this process.
    /// The reader threads finish by themselves once the pipes close.
    fn kill(mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!("ExifTool kill: {}", e);
        }
        let _ = self.child.wait();
        lock(&self.pending).clear();
    }
}

/// A single `exiftool -stay_open` process shared by every caller.
///
/// Requests are numbered and written to the process's argument stream under a
/// lock; exiftool executes them in order and terminates each reply with a
/// `{readyN}` line on stdout and (via `-echo4`) on stderr. Two reader threads
/// route those replies back to the waiting caller.
///
/// A call that times out or loses the process replaces it with a fresh one,
/// so one stuck file cannot stall the requests queued behind it.
pub struct ExifTool {
    program: PathBuf,
    process: Mutex<Option<Process>>,
    next_id: AtomicU64,
    next_generation: AtomicU64,
    timeout: Duration,
    extra_args: Vec<String>,
}

impl ExifTool {
    /// Start the engine process.
    pub fn spawn(config: &EngineConfig) -> Result<Self, EngineError> {
        let process = Process::start(&config.exiftool_path, 0)?;
        Ok(Self {
            program: config.exiftool_path.clone(),
            process: Mutex::new(Some(process)),
            next_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            timeout: Duration::from_secs(config.task_timeout_secs),
            extra_args: config.extra_args.clone(),
        })
    }

    /// Engine version string, also a cheap liveness check.
    pub fn version(&self) -> Result<String, EngineError> {
        let reply = self.execute(&["-ver".to_string()])?;
        Ok(reply.stdout.trim().to_string())
    }

    /// Stop the process. Consuming `self` guarantees no repair still holds a reference.
    pub fn shutdown(self) -> Result<(), EngineError> {
        tracing::info!("Ending ExifTool process...");
        self.close()?;
        tracing::info!("ExifTool process terminated.");
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        match lock(&self.process).take() {
            Some(process) => process.stop(SHUTDOWN_GRACE),
            None => Ok(()),
        }
    }

    fn execute(&self, args: &[String]) -> Result<Reply, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        let (generation, pending) = self.send(id, args, tx)?;

        let result = self.wait(&rx);
        lock(&pending).remove(&id);
        if let Err(e) = &result {
            tracing::warn!(id, "ExifTool call failed ({}), restarting the process", e);
            self.restart(generation);
        }
        result
    }

    /// Queue one request on the current process, starting one if none is running.
    fn send(
        &self,
        id: u64,
        args: &[String],
        tx: mpsc::Sender<Chunk>,
    ) -> Result<(u64, Pending), EngineError> {
        let payload = request_payload(id, self.extra_args.iter().chain(args));
        tracing::debug!(id, args = ?args, "ExifTool request");

        let mut guard = lock(&self.process);
        if guard.is_none() {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            *guard = Some(Process::start(&self.program, generation)?);
        }
        let process = guard.as_mut().ok_or(EngineError::Terminated)?;
        let generation = process.generation;
        let pending = Arc::clone(&process.pending);
        lock(&pending).insert(id, tx);

        let written = process
            .stdin
            .write_all(payload.as_bytes())
            .and_then(|_| process.stdin.flush());
        if let Err(e) = written {
            lock(&pending).remove(&id);
            drop(guard);
            self.restart(generation);
            return Err(e.into());
        }
        Ok((generation, pending))
    }

    fn wait(&self, rx: &mpsc::Receiver<Chunk>) -> Result<Reply, EngineError> {
        let deadline = Instant::now() + self.timeout;
        let mut stdout = None;
        let mut stderr = None;
        while stdout.is_none() || stderr.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Chunk { stream: Stream::Stdout, text }) => stdout = Some(text),
                Ok(Chunk { stream: Stream::Stderr, text }) => stderr = Some(text),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(EngineError::Timeout(self.timeout));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(EngineError::Terminated),
            }
        }
        Ok(Reply {
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
        })
    }

    /// Replace the process of `generation`; a no-op if another caller already did.
    fn restart(&self, generation: u64) {
        let mut guard = lock(&self.process);
        if guard.as_ref().map(|p| p.generation) != Some(generation) {
            return;
        }
        if let Some(old) = guard.take() {
            old.kill();
        }
        let next = self.next_generation.fetch_add(1, Ordering::Relaxed);
        match Process::start(&self.program, next) {
            Ok(process) => *guard = Some(process),
            Err(e) => tracing::error!("Could not restart ExifTool: {}", e),
        }
    }
}

/// Render `path` as one line of the argument stream.
/// Relative paths get a `./` prefix so a leading `-` is never taken as an option.
fn path_arg(path: &Path) -> Option<String> {
    let text = path.to_string_lossy();
    if text.contains(['\n', '\r']) {
        return None;
    }
    Some(if path.is_relative() {
        format!("./{}", text)
    } else {
        text.into_owned()
    })
}

const LINE_BREAK_IN_PATH: &str = "path contains a line break";

impl MetadataEngine for ExifTool {
    fn read(&self, path: &Path) -> Result<TagMap, EngineError> {
        let target = path_arg(path).ok_or_else(|| EngineError::Read {
            path: path.to_path_buf(),
            message: LINE_BREAK_IN_PATH.to_string(),
        })?;
        let args = vec![
            "-json".to_string(),
            "-G1".to_string(),
            "-n".to_string(),
            target,
        ];
        let reply = self.execute(&args)?;
        parse_read_output(path, &reply.stdout, &reply.stderr)
    }

    fn write(&self, path: &Path, tags: &TagSet) -> Result<(), EngineError> {
        let target = path_arg(path).ok_or_else(|| EngineError::Write {
            path: path.to_path_buf(),
            message: LINE_BREAK_IN_PATH.to_string(),
        })?;
        let mut args = Vec::with_capacity(tags.len() + 2);
        args.push("-overwrite_original".to_string());
        args.extend(tags.iter().map(|(field, value)| format!("-{}={}", field, value)));
        args.push(target);
        let reply = self.execute(&args)?;
        parse_write_output(path, &reply.stdout, &reply.stderr)
    }
}

impl Drop for ExifTool {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to stop ExifTool: {}", e);
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    source: R,
    stream: Stream,
    pending: Pending,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut line = Vec::new();
        let mut buffer = String::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let text = String::from_utf8_lossy(&line);
            if let Some(id) = ready_id(&text) {
                let chunk = Chunk {
                    stream,
                    text: std::mem::take(&mut buffer),
                };
                if let Some(sender) = lock(&pending).get(&id) {
                    let _ = sender.send(chunk);
                }
            } else {
                buffer.push_str(&text);
            }
        }
        // Process gone: dropping the senders wakes every waiter with Disconnected
        lock(&pending).clear();
    })
}

fn request_payload<'a>(id: u64, args: impl Iterator<Item = &'a String>) -> String {
    let mut payload = String::new();
    for arg in args {
        payload.push_str(arg);
        payload.push('\n');
    }
    payload.push_str(&format!("-echo4\n{{ready{}}}\n-execute{}\n", id, id));
    payload
}

fn ready_id(line: &str) -> Option<u64> {
    line.trim()
        .strip_prefix("{ready")?
        .strip_suffix('}')?
        .parse()
        .ok()
}

fn parse_read_output(path: &Path, stdout: &str, stderr: &str) -> Result<TagMap, EngineError> {
    let read_error = |message: String| EngineError::Read {
        path: path.to_path_buf(),
        message,
    };
    if stdout.trim().is_empty() {
        return Err(read_error(stderr.trim().to_string()));
    }
    let objects: Vec<Map<String, Value>> =
        serde_json::from_str(stdout).map_err(|e| read_error(e.to_string()))?;
    objects
        .into_iter()
        .next()
        .map(TagMap::from)
        .ok_or_else(|| read_error("no metadata returned".to_string()))
}

fn parse_write_output(path: &Path, stdout: &str, stderr: &str) -> Result<(), EngineError> {
    let mut errors = Vec::new();
    for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("Error") {
            errors.push(line);
        } else {
            tracing::debug!(path = %path.display(), "ExifTool: {}", line);
        }
    }
    if errors.is_empty() && stdout.contains("weren't updated") {
        errors.push(stdout.trim());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Write {
            path: path.to_path_buf(),
            message: errors.join("; "),
        })
    }
}
