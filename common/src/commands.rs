use crate::{
    error::CommandError,
    topics::{TOPIC_CMD_CONFIG_SET, TOPIC_CMD_PUMP, TOPIC_CMD_SYSTEM_UPDATE, TOPIC_FIRMWARE_ADVERT},
    types::{PendingFirmwareInfo, UpdateCommand, FIRMWARE_UPDATE_COMMAND},
};

const PUMP_ON_TOKEN: &str = "ON";

/// Inbound broker message, routed by topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ActuatorOn,
    /// Raw body; parsed and validated by `config_sync`.
    ConfigUpdate(Vec<u8>),
    FirmwareUpdate {
        url: String,
        sha256: Option<String>,
    },
    FirmwareAdvertised(PendingFirmwareInfo),
}

pub fn route(topic: &str, payload: &[u8]) -> Result<Command, CommandError> {
    match topic {
        TOPIC_CMD_PUMP => {
            let token = std::str::from_utf8(payload)
                .map_err(|_| CommandError::NotUtf8)?
                .trim();
            if token.eq_ignore_ascii_case(PUMP_ON_TOKEN) {
                Ok(Command::ActuatorOn)
            } else {
                Err(CommandError::UnknownToken(token.to_string()))
            }
        }
        TOPIC_CMD_CONFIG_SET => Ok(Command::ConfigUpdate(payload.to_vec())),
        TOPIC_CMD_SYSTEM_UPDATE => {
            let command: UpdateCommand = serde_json::from_slice(payload)
                .map_err(|err| CommandError::Malformed(err.to_string()))?;
            if command.command != FIRMWARE_UPDATE_COMMAND {
                return Err(CommandError::UnsupportedCommand(command.command));
            }
            let url = command.url.trim();
            if url.is_empty() {
                return Err(CommandError::Malformed("missing url".to_string()));
            }
            Ok(Command::FirmwareUpdate {
                url: url.to_string(),
                sha256: command
                    .sha256
                    .map(|digest| digest.trim().to_ascii_lowercase())
                    .filter(|digest| !digest.is_empty()),
            })
        }
        TOPIC_FIRMWARE_ADVERT => serde_json::from_slice(payload)
            .map(Command::FirmwareAdvertised)
            .map_err(|err| CommandError::Malformed(err.to_string())),
        other => Err(CommandError::UnknownTopic(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_on_token() {
        assert_eq!(route(TOPIC_CMD_PUMP, b"ON"), Ok(Command::ActuatorOn));
        assert_eq!(route(TOPIC_CMD_PUMP, b" on\n"), Ok(Command::ActuatorOn));
        assert!(matches!(
            route(TOPIC_CMD_PUMP, b"OFF"),
            Err(CommandError::UnknownToken(_))
        ));
    }

    #[test]
    fn firmware_update_requires_url() {
        let parsed = route(
            TOPIC_CMD_SYSTEM_UPDATE,
            br#"{"command":"FIRMWARE_UPDATE","url":"http://ota.local/fw.bin"}"#,
        );
        assert_eq!(
            parsed,
            Ok(Command::FirmwareUpdate {
                url: "http://ota.local/fw.bin".to_string(),
                sha256: None,
            })
        );

        assert!(route(TOPIC_CMD_SYSTEM_UPDATE, br#"{"command":"FIRMWARE_UPDATE"}"#).is_err());
        assert!(matches!(
            route(TOPIC_CMD_SYSTEM_UPDATE, br#"{"command":"REBOOT","url":"x"}"#),
            Err(CommandError::UnsupportedCommand(_))
        ));
    }

    #[test]
    fn advertisement_and_unknown_topic() {
        assert_eq!(
            route(TOPIC_FIRMWARE_ADVERT, br#"{"version":"v2.0.0","url":"u"}"#),
            Ok(Command::FirmwareAdvertised(PendingFirmwareInfo {
                version: "v2.0.0".to_string(),
                release_notes: String::new(),
                url: "u".to_string(),
            }))
        );
        assert!(route(TOPIC_FIRMWARE_ADVERT, b"not json").is_err());
        assert!(matches!(
            route("jamur/other", b""),
            Err(CommandError::UnknownTopic(_))
        ));
    }
}
