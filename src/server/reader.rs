//! 工作進程輸出讀取
//!
//! stdout 與 stderr 各由一個任務逐行讀取，寫入實例目錄下的緩衝日誌，
//! 並保留最近的輸出。開啟控制台日誌時會轉送到調度器自己的日誌。

use crate::scheduler::{TaskHandle, TaskScheduler};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const BUFFER_LOG_FILENAME: &str = "buffer_console.log";
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const RECENT_LINES: usize = 256;
const ERROR_PREFIX: &str = "[ERROR] ";

/// 一個實例的輸出緩衝
pub struct ConsoleBuffer {
    server: String,
    path: PathBuf,
    writer: tokio::sync::Mutex<Option<BufWriter<File>>>,
    recent: Mutex<VecDeque<String>>,
    echo: AtomicBool,
}

impl ConsoleBuffer {
    /// 在實例目錄建立（或清空）緩衝日誌
    pub async fn create(server: &str, directory: &Path) -> io::Result<Arc<Self>> {
        let path = directory.join(BUFFER_LOG_FILENAME);
        let file = File::create(&path).await?;
        debug!(server, path = %path.display(), "已建立輸出緩衝");

        Ok(Arc::new(Self {
            server: server.to_string(),
            path,
            writer: tokio::sync::Mutex::new(Some(BufWriter::new(file))),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_LINES)),
            echo: AtomicBool::new(false),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn push(&self, line: String, is_error: bool) {
        if line.is_empty() {
            return;
        }

        let line = if is_error {
            format!("{}{}", ERROR_PREFIX, line)
        } else {
            line
        };

        if self.echo.load(Ordering::Acquire) {
            if is_error {
                error!("[{}] {}", self.server, line);
            } else {
                info!("[{}] {}", self.server, line);
            }
        }

        {
            let mut writer = self.writer.lock().await;
            if let Some(writer) = writer.as_mut() {
                if let Err(e) = write_line(writer, &line).await {
                    debug!(server = %self.server, "寫入輸出緩衝失敗: {}", e);
                }
            }
        }

        let mut recent = self.recent.lock();
        if recent.len() == RECENT_LINES {
            recent.pop_front();
        }
        recent.push_back(line);
    }

    pub async fn flush(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(writer) = writer.as_mut() {
            if let Err(e) = writer.flush().await {
                warn!(server = %self.server, "刷新輸出緩衝失敗: {}", e);
            }
        }
    }

    /// 刷新並關閉檔案，之後的輸出只保留在記憶體
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(mut inner) = writer.take() {
            if let Err(e) = inner.flush().await {
                error!(server = %self.server, "關閉輸出緩衝失敗: {}", e);
            }
        }
    }

    /// 最近的輸出行
    pub fn recent_lines(&self) -> Vec<String> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn is_echo_enabled(&self) -> bool {
        self.echo.load(Ordering::Acquire)
    }

    /// 先重播已緩衝的內容，之後即時轉送
    pub async fn enable_echo(&self) {
        if self.echo.load(Ordering::Acquire) {
            return;
        }

        self.flush().await;
        let mut replayed = 0usize;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                for line in content.lines() {
                    info!("[{}] {}", self.server, line);
                    replayed += 1;
                }
            }
            Err(e) => {
                // 檔案已被刪除時改用記憶體中的內容
                debug!(server = %self.server, "無法讀取輸出緩衝: {}", e);
                for line in self.recent_lines() {
                    info!("[{}] {}", self.server, line);
                    replayed += 1;
                }
            }
        }
        debug!(server = %self.server, replayed, "已重播輸出緩衝");

        self.echo.store(true, Ordering::Release);
    }

    pub fn disable_echo(&self) {
        self.echo.store(false, Ordering::Release);
    }
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// 輸出讀取器，持有讀取任務與定期刷新任務
pub struct OutputReader {
    buffer: Arc<ConsoleBuffer>,
    tasks: Vec<JoinHandle<()>>,
    flush_task: TaskHandle,
    cancelled: AtomicBool,
}

impl OutputReader {
    pub fn start(
        buffer: Arc<ConsoleBuffer>,
        stdout: ChildStdout,
        stderr: ChildStderr,
        scheduler: &TaskScheduler,
    ) -> Self {
        let tasks = vec![
            tokio::spawn(read_stream(buffer.clone(), stdout, false)),
            tokio::spawn(read_stream(buffer.clone(), stderr, true)),
        ];

        let flushing = buffer.clone();
        let flush_task = scheduler.schedule_repeating(FLUSH_INTERVAL, move || {
            let buffer = flushing.clone();
            async move { buffer.flush().await }
        });

        Self {
            buffer,
            tasks,
            flush_task,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn buffer(&self) -> &Arc<ConsoleBuffer> {
        &self.buffer
    }

    /// 停止讀取並關閉緩衝檔，重複呼叫無效果
    pub async fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        for task in &self.tasks {
            task.abort();
        }
        self.flush_task.cancel();
        self.buffer.close().await;
    }
}

async fn read_stream<R>(buffer: Arc<ConsoleBuffer>, stream: R, is_error: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => buffer.push(line, is_error).await,
            Ok(None) => break,
            Err(e) => {
                debug!(server = %buffer.server, "輸出串流中斷: {}", e);
                break;
            }
        }
    }
}
