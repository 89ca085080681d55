//! Wire-level tag constants for the client/relay message envelopes.

/// Frame types a client sends to a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessageType {
    Event,
    Req,
    Close,
}

impl ClientMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientMessageType::Event => "EVENT",
            ClientMessageType::Req => "REQ",
            ClientMessageType::Close => "CLOSE",
        }
    }
}

/// Frame types a relay sends to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMessageType {
    Event,
    Notice,
    Eose,
    Ok,
}

impl RelayMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayMessageType::Event => "EVENT",
            RelayMessageType::Notice => "NOTICE",
            RelayMessageType::Eose => "EOSE",
            RelayMessageType::Ok => "OK",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "EVENT" => Some(RelayMessageType::Event),
            "NOTICE" => Some(RelayMessageType::Notice),
            "EOSE" => Some(RelayMessageType::Eose),
            "OK" => Some(RelayMessageType::Ok),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_message_type_parse_round_trip() {
        for ty in [
            RelayMessageType::Event,
            RelayMessageType::Notice,
            RelayMessageType::Eose,
            RelayMessageType::Ok,
        ] {
            assert_eq!(RelayMessageType::parse(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn test_relay_message_type_parse_unknown() {
        assert_eq!(RelayMessageType::parse("BOGUS"), None);
    }
}
