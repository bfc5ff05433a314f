//! Client-to-server command throttling.

use std::time::{Duration, Instant};

use log::warn;

use crate::console::CommandLine;

const QUOTA_WINDOW: Duration = Duration::from_secs(1);

/// Commands-per-second limit on lines forwarded to the server.
///
/// A window opens with the first command after the previous window's second
/// ran out; every command counts, and those beyond the limit are dropped.
#[derive(Debug, Clone)]
pub struct CommandQuota {
    limit: u32,
    window_start: Option<Instant>,
    count: u32,
}

impl CommandQuota {
    /// `limit` of 0 disables throttling.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window_start: None,
            count: 0,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
    }

    pub fn check(&mut self, command: &str) -> bool {
        self.check_at(command, Instant::now())
    }

    /// Counts `command` against the window containing `now`. Returns false
    /// (after warning) when it is over quota.
    pub fn check_at(&mut self, command: &str, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }

        let expired = match self.window_start {
            Some(start) => now.saturating_duration_since(start) >= QUOTA_WINDOW,
            None => true,
        };
        if expired {
            self.window_start = Some(now);
            self.count = 0;
        }

        self.count += 1;
        if self.count > self.limit {
            warn!(
                "Command '{}' ignored (submission quota of '{}' per second exceeded!)",
                command, self.limit
            );
            return false;
        }
        true
    }
}

/// Text to send for a forwarded console line, or `None` when there is nothing
/// to send or the quota dropped it. `cmd foo bar` is sent as `foo bar`.
pub fn forward_to_server(quota: &mut CommandQuota, line: &CommandLine) -> Option<String> {
    forward_to_server_at(quota, line, Instant::now())
}

pub fn forward_to_server_at(
    quota: &mut CommandQuota,
    line: &CommandLine,
    now: Instant,
) -> Option<String> {
    if line.argc() == 0 {
        return None;
    }

    let text = if line.arg(0).eq_ignore_ascii_case("cmd") {
        line.args()
    } else {
        line.command_string()
    };

    if !quota.check_at(line.args(), now) {
        return None;
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_fifty_commands_at_ten_per_second() {
        let mut quota = CommandQuota::new(10);
        let start = Instant::now();

        let forwarded = (0..50)
            .filter(|i| quota.check_at(&format!("say {}", i), start + Duration::from_millis(*i)))
            .count();
        assert_eq!(forwarded, 10);

        // The next second opens a fresh window.
        assert!(quota.check_at("say again", start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_window_measured_from_first_command() {
        let mut quota = CommandQuota::new(1);
        let start = Instant::now();

        assert!(quota.check_at("a", start));
        assert!(!quota.check_at("b", start + Duration::from_millis(999)));
        assert!(quota.check_at("c", start + Duration::from_millis(1000)));
        assert!(!quota.check_at("d", start + Duration::from_millis(1500)));
    }

    #[test]
    fn test_window_reopens_after_one_second_of_wall_clock() {
        let mut quota = CommandQuota::new(2);
        let start = Instant::now();
        assert!(quota.check("say 1"));
        assert!(quota.check("say 2"));
        assert!(!quota.check("say 3"));

        while !quota.check("say 4") {
            assert!(start.elapsed() < Duration::from_secs(3), "window never reopened");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_approx_eq!(start.elapsed().as_secs_f64(), 1.0, 0.1);
    }

    #[test]
    fn test_zero_limit_disables_throttling() {
        let mut quota = CommandQuota::new(0);
        let now = Instant::now();
        assert!((0..1000).all(|_| quota.check_at("spam", now)));
    }

    #[test]
    fn test_forward_strips_cmd_prefix() {
        let mut quota = CommandQuota::new(0);

        let line = CommandLine::parse("cmd say hello there");
        assert_eq!(forward_to_server(&mut quota, &line).as_deref(), Some("say hello there"));

        let line = CommandLine::parse("CMD kill");
        assert_eq!(forward_to_server(&mut quota, &line).as_deref(), Some("kill"));

        let line = CommandLine::parse("say hello");
        assert_eq!(forward_to_server(&mut quota, &line).as_deref(), Some("say hello"));

        assert_eq!(forward_to_server(&mut quota, &CommandLine::parse("   ")), None);
    }

    #[test]
    fn test_forward_respects_quota() {
        let mut quota = CommandQuota::new(2);
        let now = Instant::now();
        let line = CommandLine::parse("say hi");

        assert!(forward_to_server_at(&mut quota, &line, now).is_some());
        assert!(forward_to_server_at(&mut quota, &line, now).is_some());
        assert!(forward_to_server_at(&mut quota, &line, now).is_none());
    }
}
