//! Client message classification.
//!
//! Every byte a client sends is one message. Exactly one value means
//! "I am about to disconnect"; every other value is a liveness check-in.

/// The byte a client sends to announce that its next disconnect is intended.
///
/// Same value as the Linux watchdog "magic close" character.
pub const DEPARTING_BYTE: u8 = b'V';

/// A single message received from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// The client is alive. Carries the byte it sent.
    CheckIn(u8),

    /// The client intends to disconnect soon.
    Departing,
}

impl ClientMessage {
    /// Classifies one received byte.
    pub fn from_byte(byte: u8) -> Self {
        if byte == DEPARTING_BYTE {
            Self::Departing
        } else {
            Self::CheckIn(byte)
        }
    }

    /// Classifies every byte of a received chunk, in order.
    pub fn parse_all(data: &[u8]) -> impl Iterator<Item = ClientMessage> + '_ {
        data.iter().copied().map(Self::from_byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_departing_byte() {
        assert_eq!(ClientMessage::from_byte(b'V'), ClientMessage::Departing);
    }

    #[test]
    fn test_everything_else_is_check_in() {
        for byte in (0..=u8::MAX).filter(|b| *b != DEPARTING_BYTE) {
            assert_eq!(ClientMessage::from_byte(byte), ClientMessage::CheckIn(byte));
        }
    }

    #[test]
    fn test_lowercase_v_is_check_in() {
        assert_eq!(ClientMessage::from_byte(b'v'), ClientMessage::CheckIn(b'v'));
    }

    #[test]
    fn test_parse_all_keeps_order() {
        let messages: Vec<_> = ClientMessage::parse_all(&[0, b'V', 7]).collect();
        assert_eq!(
            messages,
            vec![
                ClientMessage::CheckIn(0),
                ClientMessage::Departing,
                ClientMessage::CheckIn(7),
            ]
        );
    }
}
