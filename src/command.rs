//! NNTP command types and encoding.

use crate::error::{Error, Result};

/// NNTP commands issued by a pooled connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Authenticate with username
    AuthInfoUser(String),

    /// Authenticate with password
    AuthInfoPass(String),

    /// Select a newsgroup
    Group(String),

    /// Check whether an article exists, by message-id
    Stat(String),

    /// Retrieve an article body, by message-id
    Body(String),
}

impl Command {
    /// Encode command as bytes for transmission to server
    pub fn encode(&self) -> Result<Vec<u8>> {
        let command_line = match self {
            Command::AuthInfoUser(user) => {
                validate_parameter(user)?;
                format!("AUTHINFO USER {user}")
            }
            Command::AuthInfoPass(pass) => {
                validate_parameter(pass)?;
                format!("AUTHINFO PASS {pass}")
            }
            Command::Group(group) => {
                validate_parameter(group)?;
                format!("GROUP {group}")
            }
            Command::Stat(id) => format!("STAT {}", message_id(id)?),
            Command::Body(id) => format!("BODY {}", message_id(id)?),
        };

        let mut bytes = command_line.into_bytes();
        bytes.extend_from_slice(b"\r\n");
        Ok(bytes)
    }

    /// Short name used in logs. Never includes credentials.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::AuthInfoUser(_) => "AUTHINFO USER",
            Command::AuthInfoPass(_) => "AUTHINFO PASS",
            Command::Group(_) => "GROUP",
            Command::Stat(_) => "STAT",
            Command::Body(_) => "BODY",
        }
    }
}

/// Wrap a bare message id in angle brackets. Ids already bracketed pass through.
fn message_id(id: &str) -> Result<String> {
    validate_parameter(id)?;
    if id.starts_with('<') && id.ends_with('>') {
        Ok(id.to_string())
    } else if id.contains('<') || id.contains('>') {
        Err(Error::InvalidCommand(format!(
            "Malformed message-id: {id}"
        )))
    } else {
        Ok(format!("<{id}>"))
    }
}

/// Validate that a parameter doesn't contain invalid characters
fn validate_parameter(param: &str) -> Result<()> {
    if param.contains('\r') || param.contains('\n') {
        return Err(Error::InvalidCommand(
            "Parameters cannot contain line breaks".to_string(),
        ));
    }
    if param.is_empty() {
        return Err(Error::InvalidCommand(
            "Parameters cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_command() {
        let cmd = Command::Group("alt.test".to_string());
        let encoded = cmd.encode().unwrap();
        assert_eq!(encoded, b"GROUP alt.test\r\n");
    }

    #[test]
    fn test_stat_wraps_bare_message_id() {
        let cmd = Command::Stat("abc@example.com".to_string());
        assert_eq!(cmd.encode().unwrap(), b"STAT <abc@example.com>\r\n");
    }

    #[test]
    fn test_body_keeps_bracketed_message_id() {
        let cmd = Command::Body("<abc@example.com>".to_string());
        assert_eq!(cmd.encode().unwrap(), b"BODY <abc@example.com>\r\n");
    }

    #[test]
    fn test_half_bracketed_message_id_is_rejected() {
        let cmd = Command::Stat("<abc@example.com".to_string());
        assert!(matches!(cmd.encode(), Err(Error::InvalidCommand(_))));
    }

    #[test]
    fn test_invalid_parameter() {
        let cmd = Command::Group("test\r\nQUIT".to_string());
        assert!(cmd.encode().is_err());

        let cmd = Command::AuthInfoUser(String::new());
        assert!(cmd.encode().is_err());
    }

    #[test]
    fn test_verb_hides_credentials() {
        let cmd = Command::AuthInfoPass("hunter2".to_string());
        assert_eq!(cmd.verb(), "AUTHINFO PASS");
    }
}
