use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{KernelBackend, KernelFactory};
use crate::errors::{SessionError, SessionResult};
use crate::models::output::OutputItem;

/// Stdout line prefix carrying a base64 png rendered by `plt.show()`
pub const IMAGE_MARKER: &str = "__nschat_image__:";
/// Stdout line prefix carrying a plotly figure spec from `fig.show()`
pub const FIGURE_MARKER: &str = "__nschat_figure__:";

/// Installed ahead of every script so plots come back as output items
/// instead of opening windows.
const PRELUDE: &str = r#"
def _nschat_install_hooks():
    import base64, io
    try:
        import matplotlib
        matplotlib.use("Agg")
        import matplotlib.pyplot as plt

        def _show(*args, **kwargs):
            for num in plt.get_fignums():
                buf = io.BytesIO()
                plt.figure(num).savefig(buf, format="png")
                data = base64.b64encode(buf.getvalue()).decode("ascii")
                print("__nschat_image__:png:" + data, flush=True)
            plt.close("all")

        plt.show = _show
    except ImportError:
        pass
    try:
        from plotly.basedatatypes import BaseFigure

        def _figure_show(self, *args, **kwargs):
            print("__nschat_figure__:plotly:" + self.to_json(), flush=True)

        BaseFigure.show = _figure_show
    except ImportError:
        pass

_nschat_install_hooks()
del _nschat_install_hooks
"#;

#[derive(Debug, Clone)]
pub struct LocalKernelConfig {
    /// Interpreter used to run scripts
    pub python: String,
    pub working_dir: Option<PathBuf>,
}

impl Default for LocalKernelConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            working_dir: None,
        }
    }
}

/// Runs each script in a fresh local Python interpreter process
pub struct LocalPythonKernel {
    config: LocalKernelConfig,
}

impl LocalPythonKernel {
    pub fn new(config: LocalKernelConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.python);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl KernelBackend for LocalPythonKernel {
    async fn connect(&mut self) -> SessionResult<()> {
        let output = self
            .command()
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                SessionError::Unreachable(format!("failed to start {}: {}", self.config.python, e))
            })?;

        if !output.status.success() {
            return Err(SessionError::Unreachable(format!(
                "{} --version exited with {}",
                self.config.python, output.status
            )));
        }
        debug!(
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "local python kernel available"
        );
        Ok(())
    }

    async fn execute(
        &mut self,
        script: &str,
        output: mpsc::UnboundedSender<OutputItem>,
    ) -> SessionResult<()> {
        info!(python = %self.config.python, "running script in local kernel");

        let mut child = self
            .command()
            .args(["-u", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Execution(format!("failed to spawn interpreter: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Execution("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Execution("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SessionError::Execution("failed to capture stderr".into()))?;

        let source = format!("{PRELUDE}\n{script}\n");
        stdin
            .write_all(source.as_bytes())
            .await
            .map_err(|e| SessionError::Execution(format!("failed to send script: {e}")))?;
        // closing stdin starts the execution
        drop(stdin);

        // a reader is dropped at eof or on a read error so the pipe closes
        // and the interpreter cannot block on a full buffer
        let mut stdout = Some(BufReader::new(stdout));
        let mut stderr = Some(BufReader::new(stderr));
        let (mut stdout_buf, mut stderr_buf) = (Vec::new(), Vec::new());

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                read = read_line(&mut stdout, &mut stdout_buf), if stdout.is_some() => {
                    if let Some(line) = finish_line(read, &mut stdout, &mut stdout_buf, "stdout") {
                        let _ = output.send(parse_stdout_line(&line));
                    }
                }
                read = read_line(&mut stderr, &mut stderr_buf), if stderr.is_some() => {
                    if let Some(line) = finish_line(read, &mut stderr, &mut stderr_buf, "stderr") {
                        let _ = output.send(OutputItem::stderr(format!("{line}\n")));
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SessionError::Execution(format!("failed to wait for interpreter: {e}")))?;
        if !status.success() {
            // a failing script is still a completed execution
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let _ = output.send(OutputItem::stderr(format!("Process exited with code {code}\n")));
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        debug!("local python kernel released");
    }
}

impl KernelFactory for LocalKernelConfig {
    fn create(&self) -> Box<dyn KernelBackend> {
        Box::new(LocalPythonKernel::new(self.clone()))
    }
}

/// Read up to the next newline into `buf`. Bytes from a read cut short by
/// the other stream stay in `buf` and are completed by the next call.
async fn read_line<R>(reader: &mut Option<R>, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    match reader {
        Some(reader) => reader.read_until(b'\n', buf).await,
        None => std::future::pending().await,
    }
}

/// Turn the outcome of `read_line` into a decoded line, closing the reader
/// at eof or on error. Invalid utf-8 is replaced rather than rejected.
fn finish_line<R>(
    read: std::io::Result<usize>,
    reader: &mut Option<R>,
    buf: &mut Vec<u8>,
    stream: &str,
) -> Option<String> {
    match read {
        Ok(0) => *reader = None,
        Ok(_) if !buf.ends_with(b"\n") => return None,
        Ok(_) => {}
        Err(e) => {
            warn!("{} read failed: {}", stream, e);
            *reader = None;
        }
    }
    if buf.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(buf);
    let line = line.strip_suffix('\n').unwrap_or(&line);
    let line = line.strip_suffix('\r').unwrap_or(line).to_string();
    buf.clear();
    Some(line)
}

/// Map one line of interpreter stdout to an output item
pub fn parse_stdout_line(line: &str) -> OutputItem {
    if let Some(data) = line
        .strip_prefix(IMAGE_MARKER)
        .and_then(|rest| rest.strip_prefix("png:"))
    {
        return OutputItem::png(data.trim());
    }
    if let Some(spec) = line
        .strip_prefix(FIGURE_MARKER)
        .and_then(|rest| rest.strip_prefix("plotly:"))
    {
        match serde_json::from_str(spec) {
            Ok(value) => return OutputItem::plotly(value),
            Err(e) => warn!("discarding malformed figure spec: {}", e),
        }
    }
    OutputItem::stdout(format!("{line}\n"))
}
