//! Session feature flags.
//!
//! Each flag enables one optional subsystem at session start. The
//! default set mirrors a typical attended remote-control session:
//! clipboard mirroring and file streaming on, audio off.

use bitflags::bitflags;

bitflags! {
    /// Toggleable subsystems for a session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFeatures: u32 {
        /// Mirror clipboard changes between the peers.
        const CLIPBOARD_SYNC   = 0b0001;
        /// Accept chunked file transfers.
        const FILE_STREAMING   = 0b0010;
        /// Stream captured audio.
        const AUDIO            = 0b0100;
        /// Adjust the quality tier from network feedback.
        const ADAPTIVE_QUALITY = 0b1000;
    }
}

impl Default for SessionFeatures {
    fn default() -> Self {
        SessionFeatures::CLIPBOARD_SYNC
            | SessionFeatures::FILE_STREAMING
            | SessionFeatures::ADAPTIVE_QUALITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_excludes_audio() {
        let f = SessionFeatures::default();
        assert!(f.contains(SessionFeatures::CLIPBOARD_SYNC));
        assert!(f.contains(SessionFeatures::FILE_STREAMING));
        assert!(f.contains(SessionFeatures::ADAPTIVE_QUALITY));
        assert!(!f.contains(SessionFeatures::AUDIO));
    }
}
