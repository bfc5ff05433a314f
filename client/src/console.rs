//! Console command surface: the `rcon` family plus net key commands. Every
//! other line goes to the server through the command quota.

use log::{info, warn};

use shared::{AddressSpec, NetKey};

use crate::rcon_client::RconClient;
use crate::throttle::{forward_to_server, CommandQuota};

/// A tokenized console line.
///
/// Tokens are split on whitespace; double quotes group a token and are not
/// part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    raw: String,
    tokens: Vec<String>,
    args_offset: usize,
}

impl CommandLine {
    pub fn parse(line: &str) -> Self {
        let raw = line.trim().to_string();
        let mut tokens = Vec::new();
        let mut args_offset = raw.len();

        let mut chars = raw.char_indices().peekable();
        while let Some(&(_, c)) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }

            let mut token = String::new();
            if c == '"' {
                chars.next();
                for (_, c) in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    token.push(c);
                }
            } else {
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
            }

            if tokens.is_empty() {
                args_offset = chars.peek().map_or(raw.len(), |&(i, _)| i);
            }
            tokens.push(token);
        }

        Self {
            raw,
            tokens,
            args_offset,
        }
    }

    pub fn argc(&self) -> usize {
        self.tokens.len()
    }

    /// Token `index`, or `""` when out of range.
    pub fn arg(&self, index: usize) -> &str {
        self.tokens.get(index).map_or("", String::as_str)
    }

    /// Everything after the first token, as typed. A remainder that is a
    /// single quoted token loses its quotes.
    pub fn args(&self) -> &str {
        let rest = self.raw[self.args_offset..].trim();
        match rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            Some(inner) if !inner.contains('"') => inner,
            _ => rest,
        }
    }

    /// The whole line, trimmed.
    pub fn command_string(&self) -> &str {
        &self.raw
    }
}

/// Dispatches console lines to the RCON client and the net key.
pub struct Console {
    client: RconClient,
    quota: CommandQuota,
    net_key: NetKey,
    use_random_key: bool,
}

impl Console {
    pub fn new(client: RconClient, quota: CommandQuota, net_key: NetKey) -> Self {
        Self {
            client,
            quota,
            net_key,
            use_random_key: false,
        }
    }

    pub fn client(&self) -> &RconClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut RconClient {
        &mut self.client
    }

    pub fn net_key(&self) -> &NetKey {
        &self.net_key
    }

    pub fn quota_mut(&mut self) -> &mut CommandQuota {
        &mut self.quota
    }

    /// Runs one console line. Problems are reported through the log only.
    pub fn execute(&mut self, line: &str) {
        let command = CommandLine::parse(line);
        if command.argc() == 0 {
            return;
        }

        match command.arg(0) {
            "rcon" => self.rcon_query(&command),
            "rcon_disconnect" => self.rcon_disconnect(),
            "rcon_address" => self.rcon_address(&command),
            "rcon_password" => {
                let old = self.client.password().to_string();
                self.client.on_password_changed(&old, command.args());
            }
            "net_setkey" => {
                if command.argc() < 2 {
                    warn!("Usage: net_setkey \"<base64 key>\"");
                    return;
                }
                let _ = self.net_key.set(command.arg(1));
            }
            "net_generatekey" => {
                self.net_key.generate();
            }
            "net_userandomkey" => {
                let enabled = matches!(command.arg(1), "1" | "true");
                self.net_key
                    .on_random_key_changed(self.use_random_key, enabled);
                self.use_random_key = enabled;
            }
            _ => self.forward(&command),
        }
    }

    fn rcon_query(&mut self, command: &CommandLine) {
        if command.argc() < 2 {
            if !self.client.is_connected() && self.client.address().is_some() {
                // Failure is already logged by the client.
                let _ = self.client.connect();
            }
            return;
        }

        if !self.client.is_connected() {
            warn!("Failed to issue command to RCON server: unconnected");
            return;
        }

        let query = CommandLine::parse(command.args());
        let result = match query.arg(0) {
            "PASS" => {
                let password = if query.argc() > 1 {
                    query.arg(1).to_string()
                } else {
                    self.client.password().to_string()
                };
                self.client.send_auth(&password).map(|_| ())
            }
            "disconnect" => {
                self.client.disconnect();
                Ok(())
            }
            _ => self.client.send_command(command.args()).map(|_| ()),
        };

        if let Err(err) = result {
            warn!("Failed to issue command to RCON server: {}", err);
        }
    }

    fn rcon_disconnect(&mut self) {
        if self.client.is_connected() {
            self.client.disconnect();
            info!("User closed RCON connection");
        }
    }

    fn rcon_address(&mut self, command: &CommandLine) {
        let text = command.args();
        if text.is_empty() {
            self.client.set_address(None);
            return;
        }

        match AddressSpec::resolve(text) {
            Ok(address) => self.client.set_address(Some(address)),
            Err(err) => warn!("Invalid RCON address: {}", err),
        }
    }

    fn forward(&mut self, command: &CommandLine) {
        let Some(text) = forward_to_server(&mut self.quota, command) else {
            return;
        };

        if !self.client.is_authenticated() {
            warn!("Command '{}' not sent: no authenticated server connection", text);
            return;
        }
        if let Err(err) = self.client.send_command(&text) {
            warn!("Failed to forward '{}': {}", text, err);
        }
    }
}
