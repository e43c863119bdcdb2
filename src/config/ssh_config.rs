use std::path::Path;

use crate::error::ConfigError;

/// Directives of one `Host` block, exactly as written.
#[derive(Default, Debug, Clone)]
struct HostBlock {
    patterns: Vec<String>,
    hostname: Option<String>,
    user: Option<String>,
    port: Option<String>,
    identity_files: Vec<String>,
    proxy_jump: Option<String>,
    local_forwards: Vec<String>,
    keymaster_ignore: Option<bool>,
}

impl HostBlock {
    fn names_literally(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p == name)
    }

    /// OpenSSH semantics: any matching negated pattern excludes the block.
    fn matches(&self, name: &str) -> bool {
        let mut matched = false;
        for pattern in &self.patterns {
            let (negated, pattern) = pattern
                .strip_prefix('!')
                .map(|p| (true, p))
                .unwrap_or((false, pattern.as_str()));
            let is_match = glob_match(pattern, name);
            if negated {
                if is_match {
                    return false;
                }
                continue;
            }
            if is_match {
                matched = true;
            }
        }
        matched
    }
}

/// Effective directives for one named entry after applying every
/// matching block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEntry {
    pub name: String,
    pub hostname: Option<String>,
    pub user: Option<String>,
    /// Raw value; validated when the route is resolved.
    pub port: Option<String>,
    pub identity_files: Vec<String>,
    pub proxy_jump: Option<String>,
    /// Raw `"<port> <host>:<port>"` values in file order.
    pub local_forwards: Vec<String>,
    pub keymaster_ignore: Option<bool>,
}

impl HostEntry {
    // First obtained value wins, lists accumulate.
    fn merge(&mut self, block: &HostBlock) {
        if self.hostname.is_none() {
            self.hostname = block.hostname.clone();
        }
        if self.user.is_none() {
            self.user = block.user.clone();
        }
        if self.port.is_none() {
            self.port = block.port.clone();
        }
        if self.proxy_jump.is_none() {
            self.proxy_jump = block.proxy_jump.clone();
        }
        self.identity_files
            .extend(block.identity_files.iter().cloned());
        self.local_forwards
            .extend(block.local_forwards.iter().cloned());
        if self.keymaster_ignore.is_none() {
            self.keymaster_ignore = block.keymaster_ignore;
        }
    }
}

/// Parsed SSH client configuration, queried by entry name.
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    blocks: Vec<HostBlock>,
}

impl SshConfig {
    pub fn query(&self, name: &str) -> Option<HostEntry> {
        if !self.blocks.iter().any(|b| b.names_literally(name)) {
            return None;
        }

        let mut entry = HostEntry {
            name: name.to_string(),
            ..HostEntry::default()
        };
        for block in self.blocks.iter().filter(|b| b.matches(name)) {
            entry.merge(block);
        }
        Some(entry)
    }

    /// Literal host names worth offering as a toggle: they forward at least
    /// one port and are not marked `KeymasterIgnore yes`.
    pub fn toggleable_hosts(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for block in &self.blocks {
            for pattern in &block.patterns {
                if should_skip_pattern(pattern) || names.contains(pattern) {
                    continue;
                }
                if let Some(entry) = self.query(pattern) {
                    if !entry.local_forwards.is_empty() && entry.keymaster_ignore != Some(true) {
                        names.push(pattern.clone());
                    }
                }
            }
        }
        names
    }
}

pub fn load_ssh_config(path: &Path) -> Result<SshConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::SshConfigMissing(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(parse_ssh_config(&content))
}

pub fn parse_ssh_config(content: &str) -> SshConfig {
    let mut blocks = Vec::new();
    let mut current = HostBlock::default();
    let mut in_match_block = false;

    for raw_line in content.lines() {
        let line = strip_comments(raw_line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let tokens = split_tokens(line);
        if tokens.is_empty() {
            continue;
        }

        let key = tokens[0].to_ascii_lowercase();
        if key == "match" {
            flush_block(&mut current, &mut blocks);
            in_match_block = true;
            continue;
        }

        if key == "host" {
            in_match_block = false;
            flush_block(&mut current, &mut blocks);
            current.patterns = tokens[1..].to_vec();
            continue;
        }

        if in_match_block || current.patterns.is_empty() {
            continue;
        }

        let value = tokens[1..].join(" ");
        if value.is_empty() {
            continue;
        }

        match key.as_str() {
            "hostname" => {
                current.hostname.get_or_insert(value);
            }
            "user" => {
                current.user.get_or_insert(value);
            }
            "port" => {
                current.port.get_or_insert(value);
            }
            "identityfile" => current.identity_files.push(value),
            "proxyjump" => {
                // Only the closest upstream matters; it carries its own ProxyJump.
                let first = value.split(',').next().unwrap_or("").trim().to_string();
                if !first.is_empty() && !first.eq_ignore_ascii_case("none") {
                    current.proxy_jump.get_or_insert(first);
                }
            }
            "localforward" => current.local_forwards.push(value),
            "keymasterignore" => {
                current.keymaster_ignore = Some(value.eq_ignore_ascii_case("yes"));
            }
            _ => {}
        }
    }

    flush_block(&mut current, &mut blocks);
    SshConfig { blocks }
}

fn flush_block(current: &mut HostBlock, blocks: &mut Vec<HostBlock>) {
    let block = std::mem::take(current);
    if !block.patterns.is_empty() {
        blocks.push(block);
    }
}

fn should_skip_pattern(pattern: &str) -> bool {
    let trimmed = pattern.trim();
    trimmed.is_empty()
        || trimmed.starts_with('!')
        || trimmed.contains('*')
        || trimmed.contains('?')
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let (mut p_idx, mut t_idx) = (0usize, 0usize);
    let mut star_idx = None;
    let mut match_idx = 0usize;
    let p_bytes = pattern.as_bytes();
    let t_bytes = text.as_bytes();

    while t_idx < t_bytes.len() {
        if p_idx < p_bytes.len() && (p_bytes[p_idx] == b'?' || p_bytes[p_idx] == t_bytes[t_idx]) {
            p_idx += 1;
            t_idx += 1;
            continue;
        }

        if p_idx < p_bytes.len() && p_bytes[p_idx] == b'*' {
            star_idx = Some(p_idx);
            match_idx = t_idx;
            p_idx += 1;
            continue;
        }

        if let Some(star_pos) = star_idx {
            p_idx = star_pos + 1;
            match_idx += 1;
            t_idx = match_idx;
            continue;
        }

        return false;
    }

    while p_idx < p_bytes.len() && p_bytes[p_idx] == b'*' {
        p_idx += 1;
    }

    p_idx == p_bytes.len()
}

fn strip_comments(line: &str) -> String {
    let mut result = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                result.push(ch);
            }
            '#' if !in_quotes => break,
            _ => result.push(ch),
        }
    }
    result
}

/// Splits a line into tokens, honouring quotes and the `Key=Value` form.
fn split_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    let mut in_quotes = false;

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '=' if !in_quotes && (tokens.is_empty() || (tokens.len() == 1 && current.is_empty())) => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
