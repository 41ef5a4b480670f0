//! Space-separated command language spoken on the dispatcher socket.
//!
//! ```text
//! update1 <file_id>
//! update2 <status> <manager_id> <file_id>
//! insert  <manager_id> <file_id>
//! select  <manager_id> <limit> <offset>
//! count   <manager_id>
//! ```
//!
//! A request names its verb once and may then carry several argument groups
//! for it: `insert A F1 A F2` inserts two rows. Decoding stops at a truncated
//! group or a malformed argument; everything after that point is dropped.
//! Nothing here touches the store.

use std::fmt;

use clusterd_core::{FileId, FileStatus, FileSyncRecord, ManagerId, ResponseMode};

use crate::error::DaemonError;

/// Longest token accepted in a request.
pub const MAX_TOKEN_LEN: usize = 4096;

/// Acknowledgment for every mutating command, whether or not a row changed.
pub const ACK: &str = "Command OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Update1,
    Update2,
    Insert,
    Select,
    Count,
}

impl Verb {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "update1" => Some(Verb::Update1),
            "update2" => Some(Verb::Update2),
            "insert" => Some(Verb::Insert),
            "select" => Some(Verb::Select),
            "count" => Some(Verb::Count),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Update1 => "update1",
            Verb::Update2 => "update2",
            Verb::Insert => "insert",
            Verb::Select => "select",
            Verb::Count => "count",
        }
    }

    /// Number of argument tokens following the verb.
    pub fn arity(self) -> usize {
        match self {
            Verb::Update1 | Verb::Count => 1,
            Verb::Insert => 2,
            Verb::Update2 | Verb::Select => 3,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Mark `file_id` pending on every manager.
    Update1 { file_id: FileId },
    /// Set one row's status.
    Update2 {
        status: FileStatus,
        manager_id: ManagerId,
        file_id: FileId,
    },
    /// Create a pending row (or reset an existing one to pending).
    Insert { manager_id: ManagerId, file_id: FileId },
    Select {
        manager_id: ManagerId,
        limit: u32,
        offset: u32,
    },
    Count { manager_id: ManagerId },
}

impl Command {
    pub fn verb(&self) -> Verb {
        match self {
            Command::Update1 { .. } => Verb::Update1,
            Command::Update2 { .. } => Verb::Update2,
            Command::Insert { .. } => Verb::Insert,
            Command::Select { .. } => Verb::Select,
            Command::Count { .. } => Verb::Count,
        }
    }

    /// `true` for commands that write to the store.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Command::Update1 { .. } | Command::Update2 { .. } | Command::Insert { .. }
        )
    }

    /// Wire form, tokens separated by single spaces.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    fn from_args(verb: Verb, args: &[&str]) -> Result<Self, String> {
        if let Some(long) = args.iter().find(|arg| arg.len() > MAX_TOKEN_LEN) {
            return Err(format!(
                "argument of {} bytes exceeds the {MAX_TOKEN_LEN}-byte limit",
                long.len()
            ));
        }
        let command = match (verb, args) {
            (Verb::Update1, [file]) => Command::Update1 {
                file_id: FileId::from(*file),
            },
            (Verb::Update2, [status, manager, file]) => Command::Update2 {
                status: status
                    .parse::<FileStatus>()
                    .map_err(|err| err.to_string())?,
                manager_id: ManagerId::from(*manager),
                file_id: FileId::from(*file),
            },
            (Verb::Insert, [manager, file]) => Command::Insert {
                manager_id: ManagerId::from(*manager),
                file_id: FileId::from(*file),
            },
            (Verb::Select, [manager, limit, offset]) => Command::Select {
                manager_id: ManagerId::from(*manager),
                limit: parse_bound("limit", limit)?,
                offset: parse_bound("offset", offset)?,
            },
            (Verb::Count, [manager]) => Command::Count {
                manager_id: ManagerId::from(*manager),
            },
            (verb, args) => {
                return Err(format!(
                    "{verb} takes {} arguments, got {}",
                    verb.arity(),
                    args.len()
                ))
            }
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Update1 { file_id } => write!(f, "update1 {file_id}"),
            Command::Update2 {
                status,
                manager_id,
                file_id,
            } => write!(f, "update2 {status} {manager_id} {file_id}"),
            Command::Insert {
                manager_id,
                file_id,
            } => write!(f, "insert {manager_id} {file_id}"),
            Command::Select {
                manager_id,
                limit,
                offset,
            } => write!(f, "select {manager_id} {limit} {offset}"),
            Command::Count { manager_id } => write!(f, "count {manager_id}"),
        }
    }
}

fn parse_bound(name: &str, token: &str) -> Result<u32, String> {
    token
        .parse::<u32>()
        .map_err(|_| format!("{name} '{token}' is not a non-negative integer"))
}

/// Why decoding of a receive stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEnd {
    /// All tokens were consumed.
    Complete,
    /// The first token is not a verb.
    UnknownVerb(String),
    /// The input ran out in the middle of an argument group.
    Truncated(Verb),
    /// A command had all its arguments but one of them is invalid.
    Malformed { verb: Verb, reason: String },
}

/// Commands decoded from one receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub commands: Vec<Command>,
    pub end: BatchEnd,
}

impl Batch {
    fn empty(end: BatchEnd) -> Self {
        Self {
            commands: Vec::new(),
            end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Decode raw request bytes. The request ends at the first NUL byte, since
/// older clients pad their fixed-size writes with NULs.
pub fn decode(input: &[u8]) -> Batch {
    let end = input.iter().position(|&b| b == 0).unwrap_or(input.len());
    decode_str(&String::from_utf8_lossy(&input[..end]))
}

/// Split on single spaces, skipping the empty tokens left by runs of them.
/// Tabs and newlines are ordinary token bytes.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(' ').filter(|token| !token.is_empty())
}

pub fn decode_str(text: &str) -> Batch {
    let mut tokens = tokenize(text);
    let Some(first) = tokens.next() else {
        return Batch::empty(BatchEnd::Complete);
    };
    let Some(verb) = Verb::from_token(first) else {
        return Batch::empty(BatchEnd::UnknownVerb(truncate_for_log(first)));
    };

    let mut commands = Vec::new();
    let end = loop {
        let args: Vec<&str> = tokens.by_ref().take(verb.arity()).collect();
        if args.is_empty() {
            break BatchEnd::Complete;
        }
        if args.len() < verb.arity() {
            break BatchEnd::Truncated(verb);
        }
        match Command::from_args(verb, &args) {
            Ok(command) => commands.push(command),
            Err(reason) => break BatchEnd::Malformed { verb, reason },
        }
    };

    Batch { commands, end }
}

fn truncate_for_log(token: &str) -> String {
    token.chars().take(64).collect()
}

/// Outcome of executing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ack,
    Rows(Vec<FileSyncRecord>),
    Count(u64),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ack => f.write_str(ACK),
            Response::Rows(rows) => f.write_str(&render_rows(rows)),
            Response::Count(count) => write!(f, "{count}"),
        }
    }
}

/// Byte that ends one response (and, in per-command mode, one request).
pub fn terminator(mode: ResponseMode) -> u8 {
    match mode {
        ResponseMode::PerRead => b'\0',
        ResponseMode::PerCommand => b'\n',
    }
}

/// Bytes a client writes to send `command`.
pub fn encode_request(command: &Command, mode: ResponseMode) -> Vec<u8> {
    let mut bytes = command.encode().into_bytes();
    if mode == ResponseMode::PerCommand {
        bytes.push(b'\n');
    }
    bytes
}

/// Reply for one receive in per-read mode, followed by NUL. Rows from every
/// `select` group are concatenated into one listing; for other verbs only the
/// last group's response is sent. A receive with no commands yields a bare NUL.
pub fn frame_per_read(responses: &[Response]) -> Vec<u8> {
    let mut bytes = match responses.last() {
        None => Vec::new(),
        Some(Response::Rows(_)) => render_rows(responses.iter().flat_map(|response| match response {
            Response::Rows(rows) => rows.as_slice(),
            _ => &[][..],
        }))
        .into_bytes(),
        Some(last) => last.to_string().into_bytes(),
    };
    bytes.push(b'\0');
    bytes
}

fn render_rows<'a>(rows: impl IntoIterator<Item = &'a FileSyncRecord>) -> String {
    let mut out = String::from(" ");
    for row in rows {
        out.push_str(row.file_id.as_str());
        out.push('*');
        out.push_str(row.status.as_str());
        out.push(' ');
    }
    out
}

/// Reply for one request line in per-command mode: one line per command, or
/// a single empty line when the request held no commands.
pub fn frame_per_command(responses: &[Response]) -> Vec<u8> {
    if responses.is_empty() {
        return b"\n".to_vec();
    }
    let mut bytes = Vec::new();
    for response in responses {
        bytes.extend_from_slice(response.to_string().as_bytes());
        bytes.push(b'\n');
    }
    bytes
}

/// Parse a rendered `select` response back into `(file_id, status)` pairs.
pub fn parse_rows(text: &str) -> Result<Vec<(FileId, FileStatus)>, DaemonError> {
    tokenize(text)
        .map(|item| {
            let (file, status) = item
                .rsplit_once('*')
                .ok_or_else(|| DaemonError::Protocol(format!("malformed row '{item}'")))?;
            let status = status
                .parse::<FileStatus>()
                .map_err(|err| DaemonError::Protocol(err.to_string()))?;
            Ok((FileId::from(file), status))
        })
        .collect()
}
