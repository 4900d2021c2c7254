mod cli;
mod console;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use cli::{Cli, Command};
use console::ConsoleCommand;
use tracklink::domain::{Requester, format_duration};
use tracklink::error::{AppError, PlayerError};
use tracklink::link_cache::{HttpProbe, LinkCache};
use tracklink::logging;
use tracklink::player::{PlayerEvent, PlayerHandle, Toggled, spawn_player};
use tracklink::resolver::YtDlpResolver;
use tracklink::settings::{AppSettings, default_data_dir, load_settings, save_settings};
use tracklink::transport::{TransportBackend, spawn_transport};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    let _log_guard = logging::init(
        &data_dir,
        logging::LogConfig {
            dir: cli.log_dir.clone(),
            filter: cli.log_filter.clone(),
        },
    );
    tracing::info!(data_dir = %data_dir.display(), "tracklink 启动");

    let settings = load_settings(&data_dir);
    if !data_dir.join("settings.json").exists()
        && let Err(e) = save_settings(&data_dir, &settings)
    {
        let err = AppError::Settings(e.to_string());
        tracing::warn!(err = %err, "写入默认设置失败");
    }

    let resolver = Arc::new(YtDlpResolver::new(settings.resolver_config(&data_dir)));
    let probe = Arc::new(HttpProbe::new(settings.probe_timeout()));
    let cache = LinkCache::open(
        settings.cache_options(&data_dir, cli.cache_file.clone()),
        resolver,
        probe,
    );

    let backend = if cli.no_audio {
        TransportBackend::Null
    } else {
        TransportBackend::Rodio
    };

    let command = cli.command.unwrap_or(Command::Play {
        requester: "local".to_owned(),
    });
    match command {
        Command::Play { requester } => {
            tracing::info!(?backend, "启动模式: Play");
            run_console(cache, &settings, backend, requester).await
        }
        Command::Stats => {
            let s = cache.stats();
            println!("条目: {}", s.entries);
            println!(
                "别名: {} (链接 {} / 搜索词 {})",
                s.total_keys, s.url_keys, s.search_keys
            );
            println!(
                "总时长: {}，平均 {}",
                format_duration(s.total_duration_secs),
                format_duration(s.avg_duration_secs.round() as u64)
            );
            println!("每条目平均搜索词: {:.2}", s.avg_search_keys_per_entry);
            Ok(())
        }
        Command::Check { search_keys, prune } => {
            tracing::info!(search_keys, prune, "启动模式: Check");
            let report = cache
                .verify(&settings.verify_options(search_keys, prune))
                .await;
            println!(
                "已检查 {}，更新 {}，未变 {}，失效 {}，删除 {}",
                report.checked,
                report.updated,
                report.unchanged,
                report.invalid.len(),
                report.pruned
            );
            for id in &report.invalid {
                println!("  失效: {id}");
            }
            if search_keys {
                println!(
                    "核对搜索词 {}，不一致 {}，出错 {}",
                    report.search_keys_checked,
                    report.search_mismatches.len(),
                    report.search_errors.len()
                );
                for (alias, was, now) in &report.search_mismatches {
                    println!("  {alias}: {was} -> {now}");
                }
                for (alias, err) in &report.search_errors {
                    println!("  {alias}: 搜索失败 ({err})");
                }
            }
            Ok(())
        }
        Command::Import { file } => {
            let bytes = tokio::fs::read(&file).await?;
            let report = cache.import_records(&bytes).await?;
            println!(
                "新增 {}，合并 {}，跳过 {}",
                report.created,
                report.merged,
                report.skipped.len()
            );
            for s in &report.skipped {
                println!("  第 {} 条: {}", s.index, s.reason);
            }
            Ok(())
        }
        Command::Export { file } => {
            let n = cache.export_to(&file).await?;
            println!("已导出 {n} 条到 {}", file.display());
            Ok(())
        }
        Command::AddKey { query, video_url } => {
            let entry = cache.add_key(&query, &video_url).await?;
            println!("{query:?} -> {} ({})", entry.canonical_id(), entry.title());
            Ok(())
        }
        Command::RemoveEntry { canonical_id } => {
            let entry = cache.remove_entry(&canonical_id).await?;
            println!("已删除 {} ({})", entry.canonical_id(), entry.title());
            Ok(())
        }
    }
}

async fn run_console(
    cache: LinkCache,
    settings: &AppSettings,
    backend: TransportBackend,
    requester: String,
) -> Result<(), AppError> {
    let (tx_transport, rx_transport) = spawn_transport(backend);
    let (player, events) = spawn_player(
        cache.clone(),
        tx_transport,
        rx_transport,
        settings.player_config(),
    );
    let requester = Requester::new(requester.clone(), requester);
    tokio::spawn(print_events(events));

    // 控制台本身算一个听众
    player.listeners_changed(1).await?;
    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到 Ctrl+C，退出");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let cmd = match console::parse_line(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };
        if cmd == ConsoleCommand::Quit {
            break;
        }
        if let Err(e) = dispatch(&player, &requester, cmd).await {
            println!("{e}");
        }
    }

    let _ = player.shutdown().await;
    cache.flush().await?;
    flush_note(cache.path());
    Ok(())
}

async fn dispatch(
    player: &PlayerHandle,
    requester: &Requester,
    cmd: ConsoleCommand,
) -> Result<(), PlayerError> {
    match cmd {
        ConsoleCommand::Play { input, front } => {
            let queued = player.enqueue(&input, requester.clone(), front).await?;
            if !queued.started {
                println!("已入队 #{}: {}", queued.position, queued.entry.title());
            }
        }
        ConsoleCommand::Skip => {
            let skipped = player.skip().await?;
            println!("已跳过: {}", skipped.title);
        }
        ConsoleCommand::Pause => {
            player.pause().await?;
            println!("已暂停");
        }
        ConsoleCommand::Resume => {
            player.resume().await?;
            println!("继续播放");
        }
        ConsoleCommand::Toggle => match player.toggle_pause().await? {
            Toggled::Paused => println!("已暂停"),
            Toggled::Resumed => println!("继续播放"),
            Toggled::Started => println!("开始播放队列"),
        },
        ConsoleCommand::Stop { clear_all } => {
            player.stop(clear_all).await?;
            println!("{}", if clear_all { "已停止并清空队列" } else { "已停止" });
        }
        ConsoleCommand::Remove(position) => {
            let item = player.remove(position).await?;
            println!("已移除: {}", item.entry.title());
        }
        ConsoleCommand::Shuffle => {
            let n = player.shuffle().await?;
            println!("已打乱 {n} 首");
        }
        ConsoleCommand::Previous => {
            let prev = player.previous().await?;
            println!("回到: {}", prev.title);
        }
        ConsoleCommand::Queue => {
            let snap = player.queue_state().await?;
            match &snap.current {
                Some(cur) => println!("[{}] {}", snap.state, cur.title),
                None if snap.advancing => println!("[{}] 正在准备下一首", snap.state),
                None => println!("[{}] 空闲", snap.state),
            }
            for (i, meta) in snap.upcoming.iter().enumerate() {
                println!(
                    "{:>3}. {} [{}]",
                    i + 1,
                    meta.title,
                    format_duration(meta.duration_secs)
                );
            }
            if let Some(left) = snap.idle_remaining {
                println!("空闲断开倒计时: {}", format_duration(left.as_secs()));
            }
        }
        ConsoleCommand::NowPlaying => match player.now_playing().await? {
            Some(np) => println!(
                "[{}] {} - {} [{}] (点播: {})",
                np.state,
                np.metadata.title,
                np.metadata.uploader,
                format_duration(np.metadata.duration_secs),
                np.item.requester.display_name
            ),
            None => println!("当前没有播放"),
        },
        ConsoleCommand::Listeners(count) => {
            player.listeners_changed(count).await?;
        }
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

async fn print_events(mut events: mpsc::Receiver<PlayerEvent>) {
    while let Some(evt) = events.recv().await {
        match evt {
            PlayerEvent::NowPlaying(np) => println!(
                "正在播放: {} [{}] (点播: {})",
                np.metadata.title,
                format_duration(np.metadata.duration_secs),
                np.item.requester.display_name
            ),
            PlayerEvent::TrackDropped { title, reason, .. } => {
                println!("跳过无法播放的曲目: {title} ({reason})")
            }
            PlayerEvent::QueueEnded => println!("队列已播完"),
            PlayerEvent::TornDown => println!("已断开输出"),
            PlayerEvent::TransportError { message } => println!("播放出错: {message}"),
        }
    }
}

fn flush_note(path: Option<&Path>) {
    if let Some(p) = path {
        tracing::info!(path = %p.display(), "缓存已保存");
    }
}
