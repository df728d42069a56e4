//! Avatar media: a square-cropped image kept in the external object store,
//! referenced from the account by its object key and display URL.

mod services;
mod transform;

use serde::{Deserialize, Serialize};

pub use services::{AvatarUpload, MediaError, MediaStore};
pub use transform::AVATAR_SIZE;

/// Shown until the account uploads its own avatar.
pub const PLACEHOLDER_AVATAR_URL: &str = "https://picsum.photos/200/300?grayscale";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    pub media_id: String,
    pub url: String,
}

impl Avatar {
    /// Placeholder avatar assigned at registration; its media id is the email.
    pub fn placeholder(email: &str) -> Self {
        Self {
            media_id: email.to_string(),
            url: PLACEHOLDER_AVATAR_URL.to_string(),
        }
    }

    /// Placeholders have nothing behind them in the object store.
    pub fn is_placeholder(&self) -> bool {
        self.url == PLACEHOLDER_AVATAR_URL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_uses_email_as_media_id() {
        let avatar = Avatar::placeholder("ada@example.com");
        assert_eq!(avatar.media_id, "ada@example.com");
        assert_eq!(avatar.url, PLACEHOLDER_AVATAR_URL);
        assert!(avatar.is_placeholder());
    }

    #[test]
    fn hosted_avatar_is_not_placeholder() {
        let avatar = Avatar {
            media_id: "telefaces/abc.png".into(),
            url: "https://media.example.com/telefaces/abc.png".into(),
        };
        assert!(!avatar.is_placeholder());
    }
}
