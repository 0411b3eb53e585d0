//! Batch host entry parsing
//!
//! The add-hosts dialog accepts one host per line, whitespace-separated:
//! `comment address username port password` for password auth, or
//! `comment address username port` when hosts authenticate by key.
//! Every line is validated before any request goes out; errors carry
//! the 1-based line number.

use crate::api::types::HostPayload;

/// Credential mode expected for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Password,
    Key,
}

impl AuthMode {
    fn field_count(self) -> usize {
        match self {
            AuthMode::Password => 5,
            AuthMode::Key => 4,
        }
    }
}

/// A rejected input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    /// 1-based line number in the original input
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Parse a batch of host lines. Blank lines are skipped. Returns either
/// every parsed host or every line error, so the dialog can show all
/// problems at once.
pub fn parse_host_lines(input: &str, mode: AuthMode) -> Result<Vec<HostPayload>, Vec<LineError>> {
    let mut hosts = Vec::new();
    let mut errors = Vec::new();

    for (index, raw) in input.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != mode.field_count() {
            errors.push(LineError {
                line,
                message: format!(
                    "expected {} fields, found {}",
                    mode.field_count(),
                    fields.len()
                ),
            });
            continue;
        }

        let port = match fields[3].parse::<u16>() {
            Ok(p) if p > 0 => p,
            _ => {
                errors.push(LineError {
                    line,
                    message: format!("invalid port '{}'", fields[3]),
                });
                continue;
            }
        };

        hosts.push(HostPayload {
            comment: fields[0].to_string(),
            address: fields[1].to_string(),
            username: fields[2].to_string(),
            port,
            password: match mode {
                AuthMode::Password => Some(fields[4].to_string()),
                AuthMode::Key => None,
            },
        });
    }

    if errors.is_empty() {
        Ok(hosts)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_password_mode() {
        let input = "web1 10.0.0.1 root 22 s3cret\n\ndb1 10.0.0.2 admin 2222 hunter2\n";
        let hosts = parse_host_lines(input, AuthMode::Password).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].comment, "web1");
        assert_eq!(hosts[0].port, 22);
        assert_eq!(hosts[0].password.as_deref(), Some("s3cret"));
        assert_eq!(hosts[1].port, 2222);
    }

    #[test]
    fn test_parse_key_mode_has_no_password() {
        let hosts = parse_host_lines("web1 10.0.0.1 root 22", AuthMode::Key).unwrap();
        assert_eq!(hosts.len(), 1);
        assert!(hosts[0].password.is_none());
    }

    #[test]
    fn test_field_count_mismatch_reports_line_number() {
        let input = "web1 10.0.0.1 root 22 pw\nbroken line\nweb2 10.0.0.2 root 22 pw";
        let errors = parse_host_lines(input, AuthMode::Password).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let errors = parse_host_lines("web1 10.0.0.1 root 70000 pw", AuthMode::Password)
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("port"));
    }

    #[test]
    fn test_all_errors_collected() {
        let input = "bad\nalso bad";
        let errors = parse_host_lines(input, AuthMode::Key).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
