//! Ansible-style terminal output.
//!
//! ```text
//! PLAY [webservers] **************************************************************
//!
//! TASK [Install nginx] ***********************************************************
//! changed: [web1]
//! ok: [web2]
//!
//! PLAY RECAP *********************************************************************
//! web1                           : ok=2    changed=1    unreachable=0    failed=0    skipped=0    rescued=0    ignored=0
//! ```
//!
//! Colors are disabled when `NO_COLOR` is set.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use colored::{Color, Colorize};
use parking_lot::Mutex;

use super::censor;
use crate::executor::{HostStats, RunStats, TaskResult, TaskSpec};
use crate::traits::ExecutionCallback;

const OUTPUT_WIDTH: usize = 80;

/// Writes progress to stdout.
#[derive(Debug)]
pub struct DefaultCallback {
    use_color: bool,
    verbosity: u8,
    show_skipped: bool,
    started: Mutex<Option<Instant>>,
    /// Last task header printed
    current_task: Mutex<Option<String>>,
}

impl Default for DefaultCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultCallback {
    pub fn new() -> Self {
        Self {
            use_color: std::env::var_os("NO_COLOR").is_none(),
            verbosity: 0,
            show_skipped: true,
            started: Mutex::new(None),
            current_task: Mutex::new(None),
        }
    }

    pub fn with_verbosity(mut self, level: u8) -> Self {
        self.verbosity = level;
        self
    }

    pub fn with_no_color(mut self, no_color: bool) -> Self {
        self.use_color = !no_color && std::env::var_os("NO_COLOR").is_none();
        self
    }

    pub fn with_show_skipped(mut self, show: bool) -> Self {
        self.show_skipped = show;
        self
    }

    fn emit(&self, line: &str) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }

    /// `PREFIX [name] ****...` padded to the output width.
    pub fn header(&self, prefix: &str, name: &str) -> String {
        let title = if name.is_empty() {
            prefix.to_string()
        } else {
            format!("{} [{}]", prefix, name)
        };
        let stars = "*".repeat(OUTPUT_WIDTH.saturating_sub(title.len() + 1));
        if self.use_color {
            format!("\n{} {}", title.bright_white().bold(), stars.bright_black())
        } else {
            format!("\n{} {}", title, stars)
        }
    }

    /// The line shown for one result, or `None` when it is hidden.
    pub fn result_line(&self, host: &str, task: &TaskSpec, result: &TaskResult) -> Option<String> {
        let shown = censor(task, result);
        let ignored = shown.is_failed() && task.ignore_errors;

        let fatal = shown.is_failed() || shown.is_unreachable();
        let (status, color) = if fatal {
            ("fatal", Color::Red)
        } else if shown.is_skipped() {
            if !self.show_skipped {
                return None;
            }
            ("skipping", Color::Cyan)
        } else if shown.is_changed() {
            ("changed", Color::Yellow)
        } else {
            ("ok", Color::Green)
        };

        let mut line = if self.use_color {
            format!("{}: [{}]", status.color(color), host.bold())
        } else {
            format!("{}: [{}]", status, host)
        };

        let detailed = fatal || self.verbosity > 0 || task.action == "debug";
        if detailed {
            let body = serde_json::to_string(&shown.to_json()).unwrap_or_default();
            let body = if shown.is_unreachable() {
                format!("UNREACHABLE! => {}", body)
            } else if shown.is_failed() {
                format!("FAILED! => {}", body)
            } else {
                format!("=> {}", body)
            };
            line.push_str(if fatal { ": " } else { " " });
            if self.use_color && fatal {
                line.push_str(&body.red().to_string());
            } else {
                line.push_str(&body);
            }
        }
        if ignored {
            line.push_str("\n...ignoring");
        }
        Some(line)
    }

    fn stat(&self, label: &str, value: usize, color: Color) -> String {
        let text = format!("{}={:<4}", label, value);
        if !self.use_color {
            return text;
        }
        if value > 0 {
            text.color(color).to_string()
        } else {
            text.dimmed().to_string()
        }
    }

    /// One recap line per host, in first-seen order.
    pub fn recap_lines(&self, stats: &RunStats) -> Vec<String> {
        stats
            .hosts()
            .map(|(host, s)| {
                let name = format!("{:<30}", host);
                let name = if !self.use_color {
                    name
                } else if s.failed > 0 || s.unreachable > 0 {
                    name.red().bold().to_string()
                } else if s.changed > 0 {
                    name.yellow().to_string()
                } else {
                    name.green().to_string()
                };
                format!("{} : {}", name, self.stat_columns(s))
            })
            .collect()
    }

    fn stat_columns(&self, s: &HostStats) -> String {
        [
            self.stat("ok", s.ok, Color::Green),
            self.stat("changed", s.changed, Color::Yellow),
            self.stat("unreachable", s.unreachable, Color::Red),
            self.stat("failed", s.failed, Color::Red),
            self.stat("skipped", s.skipped, Color::Cyan),
            self.stat("rescued", s.rescued, Color::Magenta),
            self.stat("ignored", s.ignored, Color::Blue),
        ]
        .join("   ")
    }

    fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs >= 3600 {
            format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        } else if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs > 0 {
            format!("{}.{:02}s", secs, duration.subsec_millis() / 10)
        } else {
            format!("{}ms", duration.subsec_millis())
        }
    }
}

#[async_trait]
impl ExecutionCallback for DefaultCallback {
    async fn on_playbook_start(&self, name: &str) {
        *self.started.lock() = Some(Instant::now());
        if self.verbosity > 0 {
            self.emit(&format!("PLAYBOOK: {}", name));
        }
    }

    async fn on_playbook_end(&self, _name: &str, success: bool) {
        if let Some(start) = *self.started.lock() {
            let status = if success { "completed" } else { "failed" };
            self.emit(&format!("\nPlaybook {} in {}", status, Self::format_duration(start.elapsed())));
        }
    }

    async fn on_play_start(&self, name: &str, hosts: &[String]) {
        self.emit(&self.header("PLAY", name));
        if hosts.is_empty() {
            self.emit("skipping: no hosts matched");
        }
        *self.current_task.lock() = None;
    }

    async fn on_task_start(&self, name: &str, _host: &str) {
        let mut current = self.current_task.lock();
        if current.as_deref() != Some(name) {
            *current = Some(name.to_string());
            self.emit(&self.header("TASK", name));
        }
    }

    async fn on_task_result(&self, host: &str, task: &TaskSpec, result: &TaskResult) {
        if let Some(line) = self.result_line(host, task, result) {
            self.emit(&line);
        }
    }

    async fn on_handler_triggered(&self, host: &str, name: &str) {
        if self.verbosity > 1 {
            self.emit(&format!("NOTIFIED HANDLER {} for {}", name, host));
        }
    }

    async fn on_stats(&self, stats: &RunStats) {
        self.emit(&self.header("PLAY RECAP", ""));
        for line in self.recap_lines(stats) {
            self.emit(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StatKind;

    fn plain() -> DefaultCallback {
        DefaultCallback::new().with_no_color(true)
    }

    #[test]
    fn test_header_width() {
        let header = plain().header("TASK", "Install nginx");
        assert!(header.starts_with("\nTASK [Install nginx] ***"));
        assert_eq!(header.trim_start().len(), OUTPUT_WIDTH);
    }

    #[test]
    fn test_result_lines() {
        let cb = plain();
        let task = TaskSpec::new("t", "command");
        assert_eq!(cb.result_line("web1", &task, &TaskResult::ok()).unwrap(), "ok: [web1]");
        assert_eq!(cb.result_line("web1", &task, &TaskResult::changed()).unwrap(), "changed: [web1]");

        let failed = cb.result_line("web1", &task, &TaskResult::failed("boom")).unwrap();
        assert!(failed.starts_with("fatal: [web1]: FAILED! => "), "{}", failed);
        assert!(failed.contains("boom"));

        let hidden = plain().with_show_skipped(false);
        assert!(hidden.result_line("web1", &task, &TaskResult::skipped("no")).is_none());
    }

    #[test]
    fn test_no_log_result_is_censored() {
        let mut task = TaskSpec::new("t", "command");
        task.no_log = true;
        let result = TaskResult::failed("password=hunter2");
        let line = plain().result_line("web1", &task, &result).unwrap();
        assert!(!line.contains("hunter2"));
        assert!(line.contains("no_log"));
    }

    #[test]
    fn test_recap() {
        let mut stats = RunStats::new();
        stats.increment("web1", StatKind::Ok);
        stats.increment("web1", StatKind::Changed);
        stats.increment("web2", StatKind::Failed);
        let lines = plain().recap_lines(&stats);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("web1 "));
        assert!(lines[0].contains("ok=1 "));
        assert!(lines[0].contains("changed=1 "));
        assert!(lines[1].contains("failed=1 "));
    }
}
