//! Content fingerprints used for duplicate suppression.
//!
//! A [`Fingerprint`] identifies the relayable payload of a message
//! independently of its message id: the origin channel, the trimmed text, and
//! the identity of the attachment. Two messages with equal fingerprints are the
//! same content as far as relaying is concerned.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::message::{CandidateMessage, ChannelId};

/// Identity of the relayed attachment.
///
/// Messages without an attachment use the [`AttachmentIdentity::Absent`]
/// sentinel so that two text-only messages with identical text fingerprint
/// identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttachmentIdentity {
    Absent,
    File { filename: String, size: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    channel: ChannelId,
    text: String,
    attachment: AttachmentIdentity,
}

impl Fingerprint {
    pub fn new(channel: ChannelId, text: &str, attachment: AttachmentIdentity) -> Self {
        Self {
            channel,
            text: text.trim().to_owned(),
            attachment,
        }
    }

    pub fn attachment(&self) -> &AttachmentIdentity {
        &self.attachment
    }

    /// SHA-256 over the fingerprint components, hex encoded.
    ///
    /// Each variable-length component is length-prefixed so that no two
    /// distinct fingerprints share an encoding.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.channel.0.to_be_bytes());
        hasher.update((self.text.len() as u64).to_be_bytes());
        hasher.update(self.text.as_bytes());
        match &self.attachment {
            AttachmentIdentity::Absent => hasher.update([0u8]),
            AttachmentIdentity::File { filename, size } => {
                hasher.update([1u8]);
                hasher.update((filename.len() as u64).to_be_bytes());
                hasher.update(filename.as_bytes());
                hasher.update(size.to_be_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digest = self.digest();
        write!(f, "{}:{}", self.channel, &digest[..16])
    }
}

/// Derives the fingerprint of a candidate message.
pub fn fingerprint(candidate: &CandidateMessage) -> Fingerprint {
    let attachment = match &candidate.attachment {
        Some(attachment) => AttachmentIdentity::File {
            filename: attachment.filename.clone(),
            size: attachment.size,
        },
        None => AttachmentIdentity::Absent,
    };
    Fingerprint::new(candidate.channel, &candidate.text, attachment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Attachment;

    fn candidate(id: u64, text: &str) -> CandidateMessage {
        CandidateMessage::new(id, 1, text).with_attachment(Attachment::new("a.png", vec![7u8; 100]))
    }

    #[test]
    fn test_fingerprint_ignores_message_id() {
        assert_eq!(fingerprint(&candidate(1, "ch1 out")), fingerprint(&candidate(2, "ch1 out")));
    }

    #[test]
    fn test_fingerprint_trims_text() {
        assert_eq!(
            fingerprint(&candidate(1, "  ch1 out\n")),
            fingerprint(&candidate(2, "ch1 out"))
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_channel_and_attachment() {
        let base = candidate(1, "ch1 out");

        let mut other_channel = base.clone();
        other_channel.channel = ChannelId(2);
        assert_ne!(fingerprint(&base), fingerprint(&other_channel));

        let other_file = CandidateMessage::new(1, 1, "ch1 out")
            .with_attachment(Attachment::new("b.png", vec![7u8; 100]));
        assert_ne!(fingerprint(&base), fingerprint(&other_file));

        let other_size = CandidateMessage::new(1, 1, "ch1 out")
            .with_attachment(Attachment::new("a.png", vec![7u8; 101]));
        assert_ne!(fingerprint(&base), fingerprint(&other_size));
    }

    #[test]
    fn test_text_only_messages_use_sentinel() {
        let a = fingerprint(&CandidateMessage::new(1, 1, "hello"));
        let b = fingerprint(&CandidateMessage::new(2, 1, "hello"));
        assert_eq!(a, b);
        assert_eq!(a.attachment(), &AttachmentIdentity::Absent);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let fp = fingerprint(&candidate(1, "ch1 out"));
        assert_eq!(fp.digest().len(), 64);
        assert_eq!(fp.digest(), fingerprint(&candidate(9, "ch1 out")).digest());
    }
}
