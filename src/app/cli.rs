use std::{
    io::{self, Write},
    time::Duration,
};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind},
    execute, terminal,
};

use crate::config::HostConfig;
use crate::errors::Result;
use crate::manager::task_manager::TaskManager;
use crate::models::message::SchedulerEvent;
use crate::models::task::{QueuePolicy, TaskSpec};

const INPUT_POLL: Duration = Duration::from_millis(50);

struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

enum Flow {
    Continue,
    Quit,
}

/// Entered commands, walked with Up/Down. `index == commands.len()` is the
/// empty line below the newest entry.
#[derive(Default)]
struct History {
    commands: Vec<String>,
    index: usize,
}

impl History {
    fn back(&mut self) -> Option<&str> {
        self.index = self.index.saturating_sub(1);
        self.commands.get(self.index).map(String::as_str)
    }

    fn forward(&mut self) -> &str {
        if self.index < self.commands.len() {
            self.index += 1;
        }
        self.commands.get(self.index).map(String::as_str).unwrap_or_default()
    }

    fn push(&mut self, input: &str) {
        if !input.trim().is_empty() {
            self.commands.push(input.to_string());
        }
        self.index = self.commands.len();
    }
}

pub fn run_cli(manager: TaskManager, config: &HostConfig) -> Result<()> {
    let resumed = manager.restore(&config.records_path)?;
    println!("procwatch host started. Enter a command or 'help'.");
    if !resumed.is_empty() {
        println!("Resumed {} task(s) from {}.", resumed.len(), config.records_path.display());
    }

    let mut history = History::default();

    let _raw = RawMode::enable()?;
    loop {
        prompt("")?;
        let mut input = String::new();
        loop {
            pump(&manager);
            if !event::poll(INPUT_POLL)? {
                continue;
            }
            let Event::Key(key_event) = event::read()? else {
                continue;
            };
            if key_event.kind != KeyEventKind::Press {
                continue;
            }
            match key_event.code {
                KeyCode::Enter => {
                    println!();
                    break;
                }
                KeyCode::Up => {
                    if let Some(command) = history.back() {
                        input = command.to_string();
                        prompt(&input)?;
                    }
                }
                KeyCode::Down => {
                    input = history.forward().to_string();
                    prompt(&input)?;
                }
                KeyCode::Char(c) => {
                    input.push(c);
                    print!("{}", c);
                    io::stdout().flush()?;
                }
                KeyCode::Backspace => {
                    input.pop();
                    prompt(&input)?;
                }
                _ => {}
            }
        }

        history.push(&input);

        if let Flow::Quit = execute_command(&manager, config, &input)? {
            break;
        }
    }
    Ok(())
}

fn execute_command(manager: &TaskManager, config: &HostConfig, input: &str) -> Result<Flow> {
    let mut args = input.split_whitespace();
    match args.next() {
        Some("start") => match args.next() {
            Some(kind) => match manager.registry().get(kind) {
                Ok(spec) => submit(manager, spec.clone())?,
                Err(e) => println!("\r{}", e),
            },
            None => println!("\rTask kind must be specified."),
        },
        Some("run") => {
            let Some(program) = args.next() else {
                println!("\rCommand to execute must be specified.");
                return Ok(Flow::Continue);
            };
            let spec = TaskSpec::new("adhoc", program, program).args(args).cacheable(false);
            submit(manager, spec)?;
        }
        Some("kinds") => {
            let mut kinds: Vec<_> = manager.registry().kinds().collect();
            kinds.sort_unstable();
            if kinds.is_empty() {
                println!("\rNo task kinds configured.");
            }
            for spec in kinds.into_iter().filter_map(|kind| manager.registry().get(kind).ok()) {
                println!("\r{}", describe_kind(spec));
            }
        }
        Some("list") => {
            let tasks = manager.get_all_tasks();
            if tasks.is_empty() {
                println!("\rNo tasks");
            } else {
                println!("\r{}\t {} \t {} \t {} \t {}", "ID", "Done", "Progress", "PID", "Task");
                println!("\r{}", "-".repeat(60));
                for (id, task) in tasks {
                    let pid = task.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "NONE".to_string());
                    println!(
                        "\r{}\t {} \t {:.0}% \t {} \t {}",
                        id,
                        task.done,
                        task.progress * 100.0,
                        pid,
                        task.label
                    );
                }
            }
        }
        Some("abort") => with_id(args.next(), |id| {
            if manager.abort_task(id) {
                println!("\rAborted task {}", id);
            } else {
                println!("\rTask {} not found", id);
            }
        }),
        Some("output") => with_id(args.next(), |id| match manager.get_task_output(id) {
            Some((stdout, stderr)) => {
                for line in stdout.lines() {
                    println!("\r[stdout] {}", line);
                }
                for line in stderr.lines() {
                    println!("\r[stderr] {}", line);
                }
            }
            None => println!("\rTask {} not found", id),
        }),
        Some("detach") => {
            let saved = manager.save_records(&config.records_path)?;
            println!("\rSaved {} task(s); they keep running without this host.", saved);
            return Ok(Flow::Quit);
        }
        Some("exit") => {
            println!("\rAborting running tasks and exiting...");
            manager.abort_all();
            return Ok(Flow::Quit);
        }
        Some("help") => {
            println!("\rstart <kind> | run <program> [args..] | kinds | list | abort <id> | output <id> | detach | exit");
        }
        Some(cmd) => println!("\rUnknown command: {}. Please try again.", cmd),
        None => {}
    }
    Ok(Flow::Continue)
}

fn submit(manager: &TaskManager, spec: TaskSpec) -> Result<()> {
    let label = spec.label.clone();
    let failed_label = spec.label.clone();
    let task = manager
        .new_task(spec)
        .on_success(move |output| println!("\r[{}] ok: {}", label, output))
        .on_failure(move || println!("\r[{}] failed, see `output`", failed_label));
    let id = manager.create_task(task);
    if manager.run_task(id)? {
        println!("\rStarted task {}. Use `list` to check on it.", id);
    }
    Ok(())
}

fn with_id(arg: Option<&str>, f: impl FnOnce(u64)) {
    match arg.map(str::parse::<u64>) {
        Some(Ok(id)) => f(id),
        Some(Err(_)) => println!("\rInvalid task ID format."),
        None => println!("\rTask ID must be specified."),
    }
}

fn describe_kind(spec: &TaskSpec) -> String {
    let mut flags = vec![match spec.queue_policy {
        QueuePolicy::Queue => "queued",
        QueuePolicy::Immediate => "immediate",
    }];
    if spec.blocking {
        flags.push("blocking");
    }
    if !spec.critical {
        flags.push("non-critical");
    }
    if !spec.cacheable {
        flags.push("not cached");
    }
    format!("{}: {} [{}]", spec.kind, spec.command_line(), flags.join(", "))
}

/// Print scheduler events and run queued main-thread callbacks.
fn pump(manager: &TaskManager) {
    for event in manager.drain_events() {
        match event {
            SchedulerEvent::Started { label, pid } => println!("\r[{}] running (pid {})", label, pid),
            SchedulerEvent::Finished { label } => println!("\r[{}] finished", label),
            SchedulerEvent::Failed { label, severity, message } => {
                println!("\r[{}] {:?}: {}", label, severity, message.trim_end())
            }
        }
    }
    manager.run_main_thread_callbacks();
}

fn prompt(input: &str) -> io::Result<()> {
    execute!(
        io::stdout(),
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine)
    )?;
    print!(">>> {}", input);
    io::stdout().flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_walks_back_and_forward() {
        let mut history = History::default();
        assert_eq!(history.back(), None);
        assert_eq!(history.forward(), "");

        history.push("start build");
        history.push("   ");
        history.push("list");

        assert_eq!(history.back(), Some("list"));
        assert_eq!(history.back(), Some("start build"));
        assert_eq!(history.back(), Some("start build"));
        assert_eq!(history.forward(), "list");
        assert_eq!(history.forward(), "");
        assert_eq!(history.forward(), "");
    }

    #[test]
    fn kinds_show_their_scheduling_flags() {
        let plain = TaskSpec::new("build", "Build", "make").args(["-j4"]);
        assert_eq!(describe_kind(&plain), "build: make -j4 [queued]");

        let flagged = TaskSpec::new("sync", "Sync", "rsync")
            .queue_policy(QueuePolicy::Immediate)
            .blocking(true)
            .critical(false)
            .cacheable(false);
        assert_eq!(
            describe_kind(&flagged),
            "sync: rsync [immediate, blocking, non-critical, not cached]"
        );
    }

    #[test]
    fn entering_a_command_resets_the_cursor() {
        let mut history = History::default();
        history.push("kinds");
        history.back();
        history.push("list");

        assert_eq!(history.back(), Some("list"));
    }
}
