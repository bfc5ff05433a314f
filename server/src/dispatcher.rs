//! Command execution behind the RCON server.

use std::time::Instant;

use log::debug;

use shared::NetKey;

/// Executes one command line and returns its console output.
///
/// The server hands over the full body of each authenticated exec frame and
/// streams whatever comes back to the peer, chunked to fit the frame limit.
pub trait CommandDispatcher {
    fn execute(&mut self, command: &str) -> String;
}

impl<F> CommandDispatcher for F
where
    F: FnMut(&str) -> String,
{
    fn execute(&mut self, command: &str) -> String {
        self(command)
    }
}

/// Small built-in command set used by the standalone server binary.
pub struct ConsoleDispatcher {
    host_name: String,
    started: Instant,
    executed: u64,
    net_key: NetKey,
}

impl ConsoleDispatcher {
    pub fn new(host_name: &str, net_key: NetKey) -> Self {
        Self {
            host_name: host_name.to_string(),
            started: Instant::now(),
            executed: 0,
            net_key,
        }
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }
}

impl CommandDispatcher for ConsoleDispatcher {
    fn execute(&mut self, command: &str) -> String {
        self.executed += 1;
        debug!("Executing '{}'", command);

        let trimmed = command.trim();
        let (name, args) = match trimmed.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (trimmed, ""),
        };

        match name {
            "status" => format!(
                "hostname: {}\nuptime  : {}s\ncommands: {}\n",
                self.host_name,
                self.started.elapsed().as_secs(),
                self.executed
            ),
            "echo" => format!("{}\n", args),
            "net_key" => format!("{}\n", self.net_key.current()),
            "help" => "status, echo <text>, net_key, help\n".to_string(),
            "" => String::new(),
            other => format!("Unknown command '{}'\n", other),
        }
    }
}
