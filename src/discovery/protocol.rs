//! Minimal, deliberately non-general JSON handling for the discovery wire
//! format: a flat object per line, no nesting, no arrays on the inbound
//! side. Strings are extracted by substring search rather than a full
//! parser, matching the on-wire vocabulary's narrow shape (spec.md §4.5).
//! Outbound responses are flat enough that `serde_json` renders them
//! directly from typed structs.

use serde::Serialize;

pub const ID_MAX: usize = 63;
pub const SVC_MAX: usize = 31;
pub const IP_MAX: usize = 63;
pub const CAPS_MAX: usize = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo {
        id: String,
        svc: String,
        ctrl_port: i64,
        data_port: i64,
        caps: String,
    },
    Bye {
        id: String,
        svc: Option<String>,
    },
    List,
    Find {
        svc: String,
    },
}

/// Truncates a `&str` to at most `max` bytes on a char boundary.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Extracts the string value of `"key":"..."` , unescaping `\n \r \t \" \\`.
pub fn extract_str(line: &str, key: &str) -> Option<String> {
    let pattern = format!("\"{key}\":\"");
    let idx = line.find(&pattern)?;
    let rest = &line[idx + pattern.len()..];
    let mut out = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let esc = chars.next()?;
                out.push(match esc {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    '"' => '"',
                    '\\' => '\\',
                    other => other,
                });
            }
            '"' => return Some(out),
            other => out.push(other),
        }
    }
    None
}

/// Extracts the integer value of `"key":<digits>`.
pub fn extract_int(line: &str, key: &str) -> Option<i64> {
    let pattern = format!("\"{key}\":");
    let idx = line.find(&pattern)?;
    let rest = &line[idx + pattern.len()..];
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn extract_cmd(line: &str) -> Option<String> {
    extract_str(line, "cmd")
}

/// Parses one line into a `Command`. Returns `None` for non-JSON lines,
/// unrecognised `cmd` values, or messages missing required fields — all
/// tolerated silently per spec.md §4.5/§4.6.
pub fn parse_line(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let cmd = extract_cmd(trimmed)?;
    match cmd.as_str() {
        "helo" => Some(Command::Helo {
            id: truncate(&extract_str(trimmed, "id")?, ID_MAX),
            svc: truncate(&extract_str(trimmed, "svc")?, SVC_MAX),
            ctrl_port: extract_int(trimmed, "port")?,
            data_port: extract_int(trimmed, "data")?,
            caps: truncate(&extract_str(trimmed, "caps").unwrap_or_default(), CAPS_MAX),
        }),
        "bye" => Some(Command::Bye {
            id: truncate(&extract_str(trimmed, "id")?, ID_MAX),
            svc: extract_str(trimmed, "svc").map(|s| truncate(&s, SVC_MAX)),
        }),
        "list" => Some(Command::List),
        "find" => Some(Command::Find {
            svc: truncate(&extract_str(trimmed, "svc")?, SVC_MAX),
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceOut {
    pub id: String,
    pub svc: String,
    pub ip: String,
    pub port: i64,
    pub data: i64,
    pub caps: String,
}

#[derive(Debug, Serialize)]
struct ListResponse<'a> {
    m: &'static str,
    v: u32,
    cmd: &'static str,
    services: &'a [ServiceOut],
}

/// Encodes the outbound `list`/`find` response, newline-terminated.
pub fn encode_response(cmd: &'static str, services: &[ServiceOut]) -> String {
    let resp = ListResponse {
        m: "PNSD",
        v: 1,
        cmd,
        services,
    };
    let mut line = serde_json::to_string(&resp).expect("flat struct always serializes");
    line.push('\n');
    line
}
