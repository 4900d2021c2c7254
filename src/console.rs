//! 交互命令行：一行一条命令

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Play { input: String, front: bool },
    Skip,
    Pause,
    Resume,
    Toggle,
    /// `halt` 清空队列并断开
    Stop { clear_all: bool },
    Remove(usize),
    Shuffle,
    Previous,
    Queue,
    NowPlaying,
    Listeners(usize),
    Help,
    Quit,
}

pub const HELP: &str = "\
play <链接|搜索词>   排到队尾
next <链接|搜索词>   插到队首
skip                 跳过当前
pause / resume / toggle
stop                 停止，保留队列
halt                 停止并清空队列
remove <位置>        移除待播项（从 1 开始）
shuffle              打乱待播
previous             回到上一首
queue                查看队列
np                   当前播放
listeners <人数>     报告听众数
quit";

/// 空行返回 `Ok(None)`
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };

    let cmd = match head.to_lowercase().as_str() {
        "play" | "p" => ConsoleCommand::Play {
            input: require_arg(head, rest)?,
            front: false,
        },
        "next" => ConsoleCommand::Play {
            input: require_arg(head, rest)?,
            front: true,
        },
        "skip" | "s" => ConsoleCommand::Skip,
        "pause" => ConsoleCommand::Pause,
        "resume" => ConsoleCommand::Resume,
        "toggle" => ConsoleCommand::Toggle,
        "stop" => ConsoleCommand::Stop { clear_all: false },
        "halt" => ConsoleCommand::Stop { clear_all: true },
        "remove" | "rm" => ConsoleCommand::Remove(parse_number(head, rest)?),
        "shuffle" => ConsoleCommand::Shuffle,
        "previous" | "prev" => ConsoleCommand::Previous,
        "queue" | "q" => ConsoleCommand::Queue,
        "np" => ConsoleCommand::NowPlaying,
        "listeners" => ConsoleCommand::Listeners(parse_number(head, rest)?),
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("未知命令: {other}（输入 help 查看）")),
    };
    Ok(Some(cmd))
}

fn require_arg(head: &str, rest: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("{head} 需要一个链接或搜索词"))
    } else {
        Ok(rest.to_owned())
    }
}

fn parse_number(head: &str, rest: &str) -> Result<usize, String> {
    rest.parse::<usize>()
        .map_err(|_| format!("{head} 需要一个非负整数，收到 {rest:?}"))
}
