use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tempfile::NamedTempFile;
use tokio::select;
use tokio::sync::mpsc;

use super::download::download_to_path;
use super::{ReconnectPolicy, TransportCommand, TransportEvent};

struct ActiveSink {
    sink: Arc<Sink>,
    end_cancel: Arc<AtomicBool>,
    // 播放期间临时文件必须活着
    _file: NamedTempFile,
}

/// 已下载完成、等待开播的曲目
struct Downloaded {
    generation: u64,
    title: String,
    result: Result<NamedTempFile, String>,
}

struct Output {
    mixer: Mixer,
    _stream: OutputStream,
}

struct RodioEngine {
    rx_cmd: mpsc::Receiver<TransportCommand>,
    tx_evt: mpsc::Sender<TransportEvent>,
    http: reqwest::Client,
    output: Option<Output>,
    current: Option<ActiveSink>,
    /// 正在下载的 generation；被新的 Play/Stop 取代后，下载结果直接丢弃
    pending: Option<u64>,
    tx_ready: mpsc::Sender<Downloaded>,
    rx_ready: mpsc::Receiver<Downloaded>,
    paused: bool,
}

impl RodioEngine {
    fn new(rx_cmd: mpsc::Receiver<TransportCommand>, tx_evt: mpsc::Sender<TransportEvent>) -> Self {
        let http = match reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(err = %e, "初始化下载 HTTP 客户端失败，使用默认配置");
                reqwest::Client::new()
            }
        };
        let (tx_ready, rx_ready) = mpsc::channel(4);
        Self {
            rx_cmd,
            tx_evt,
            http,
            output: None,
            current: None,
            pending: None,
            tx_ready,
            rx_ready,
            paused: false,
        }
    }

    async fn run(mut self) {
        loop {
            select! {
                Some(ready) = self.rx_ready.recv() => {
                    self.handle_downloaded(ready).await;
                }
                maybe_cmd = self.rx_cmd.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        break;
                    };
                    self.handle_command(cmd);
                }
            }
        }
        self.stop_current();
    }

    fn handle_command(&mut self, cmd: TransportCommand) {
        match cmd {
            TransportCommand::Play {
                url,
                title,
                reconnect,
                generation,
                ..
            } => {
                tracing::info!(generation, title = %title, "开始播放请求");
                self.stop_current();
                self.paused = false;
                self.pending = Some(generation);
                self.spawn_download(url, title, reconnect, generation);
            }
            TransportCommand::Pause => {
                self.paused = true;
                if let Some(cur) = self.current.as_ref() {
                    cur.sink.pause();
                }
            }
            TransportCommand::Resume => {
                self.paused = false;
                if let Some(cur) = self.current.as_ref() {
                    cur.sink.play();
                }
            }
            TransportCommand::Stop => {
                self.pending = None;
                self.stop_current();
            }
            TransportCommand::Disconnect => {
                self.pending = None;
                self.stop_current();
                if self.output.take().is_some() {
                    tracing::info!("音频输出已释放");
                }
            }
        }
    }

    fn spawn_download(
        &self,
        url: String,
        title: String,
        reconnect: ReconnectPolicy,
        generation: u64,
    ) {
        let http = self.http.clone();
        let tx_ready = self.tx_ready.clone();
        tokio::task::spawn_local(async move {
            let result = match NamedTempFile::new() {
                Ok(file) => download_to_path(&http, file.path(), &url, &title, reconnect)
                    .await
                    .map(|()| file),
                Err(e) => Err(format!("创建临时文件失败({title}): {e}")),
            };
            let _ = tx_ready
                .send(Downloaded {
                    generation,
                    title,
                    result,
                })
                .await;
        });
    }

    async fn handle_downloaded(&mut self, ready: Downloaded) {
        if self.pending != Some(ready.generation) {
            tracing::debug!(
                generation = ready.generation,
                pending = ?self.pending,
                "丢弃过期的下载结果"
            );
            return;
        }
        self.pending = None;

        let result = ready
            .result
            .and_then(|file| self.start_playback(ready.generation, &ready.title, file));
        if let Err(message) = result {
            tracing::warn!(generation = ready.generation, err = %message, "播放失败");
            let _ = self
                .tx_evt
                .send(TransportEvent::Error {
                    generation: ready.generation,
                    message,
                })
                .await;
        }
    }

    fn ensure_output(&mut self) -> Result<&Mixer, String> {
        if self.output.is_none() {
            let stream = OutputStreamBuilder::open_default_stream()
                .map_err(|e| format!("初始化音频输出失败: {e}"))?;
            let mixer = stream.mixer().clone();
            tracing::info!("音频输出已打开");
            self.output = Some(Output {
                mixer,
                _stream: stream,
            });
        }
        self.output
            .as_ref()
            .map(|o| &o.mixer)
            .ok_or_else(|| "音频输出不可用".to_owned())
    }

    fn start_playback(
        &mut self,
        generation: u64,
        title: &str,
        file: NamedTempFile,
    ) -> Result<(), String> {
        let paused = self.paused;
        let mixer = self.ensure_output()?;
        let sink = build_sink(mixer, file.path(), title)?;
        if paused {
            sink.pause();
        } else {
            sink.play();
        }
        let sink = Arc::new(sink);
        let end_cancel = attach_end_check(&self.tx_evt, Arc::clone(&sink), generation);
        self.current = Some(ActiveSink {
            sink,
            end_cancel,
            _file: file,
        });
        tracing::info!(generation, title = %title, "开始播放");
        Ok(())
    }

    fn stop_current(&mut self) {
        if let Some(cur) = self.current.take() {
            cur.end_cancel.store(true, Ordering::Relaxed);
            cur.sink.stop();
        }
    }
}

fn build_sink(mixer: &Mixer, path: &Path, title: &str) -> Result<Sink, String> {
    let file = File::open(path).map_err(|e| format!("打开音频文件失败({title}): {e}"))?;
    let decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| format!("解码失败({title}): {e}"))?;
    let sink = Sink::connect_new(mixer);
    sink.append(decoder);
    Ok(sink)
}

/// 后台线程等待 sink 播完；被取消时不发 Finished
fn attach_end_check(
    tx_evt: &mpsc::Sender<TransportEvent>,
    sink: Arc<Sink>,
    generation: u64,
) -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_end = Arc::clone(&cancel);
    let tx_end = tx_evt.clone();

    let spawned = thread::Builder::new()
        .name(format!("audio-end-check-{generation}"))
        .spawn(move || {
            sink.sleep_until_end();
            if cancel_end.load(Ordering::Relaxed) {
                tracing::debug!(generation, "播放结束检测已取消");
            } else {
                let _ = tx_end.blocking_send(TransportEvent::Finished { generation });
            }
        });
    if let Err(e) = spawned {
        // 检测线程起不来时只是无法自动切歌，播放本身不受影响
        tracing::warn!(generation, err = %e, "启动播放结束检测线程失败");
    }
    cancel
}

pub(super) fn spawn(rx_cmd: mpsc::Receiver<TransportCommand>, tx_evt: mpsc::Sender<TransportEvent>) {
    let spawned = thread::Builder::new()
        .name("audio-transport".to_owned())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(err = %e, "创建音频线程运行时失败");
                    return;
                }
            };
            let local = tokio::task::LocalSet::new();
            local.block_on(&rt, async move {
                tracing::info!("音频输出线程已启动");
                RodioEngine::new(rx_cmd, tx_evt).run().await;
            });
        });
    if let Err(e) = spawned {
        tracing::error!(err = %e, "启动音频输出线程失败");
    }
}
