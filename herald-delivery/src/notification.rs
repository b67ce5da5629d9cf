//! The notifications the application sends
//!
//! Each constructor only decides a template name, a subject and the payload
//! fields the template is rendered against. The queue treats all of them as
//! opaque.

use std::collections::BTreeMap;

use crate::types::{Payload, Recipient};

pub const WELCOME_TEMPLATE: &str = "welcome";
pub const POST_PUBLISHED_TEMPLATE: &str = "post-published";
pub const DIGEST_TEMPLATE: &str = "digest";
pub const TEST_TEMPLATE: &str = "test";

/// A ready-to-enqueue notification request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipients: Vec<Recipient>,
    pub subject: String,
    pub payload: Payload,
    pub template: Option<String>,
}

impl Notification {
    /// A message with a pre-rendered body and no template
    #[must_use]
    pub fn raw(recipients: Vec<Recipient>, subject: impl Into<String>, body: String) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            payload: Payload::Raw(body),
            template: None,
        }
    }

    /// Sent once to a newly registered user
    #[must_use]
    pub fn welcome(recipient: Recipient, display_name: &str, site_name: &str) -> Self {
        Self::templated(
            vec![recipient],
            format!("Welcome to {site_name}"),
            WELCOME_TEMPLATE,
            [("name", display_name), ("site", site_name)],
        )
    }

    /// Alerts subscribers that a post went live
    #[must_use]
    pub fn post_published(subscribers: Vec<Recipient>, title: &str, url: &str) -> Self {
        Self::templated(
            subscribers,
            format!("New post: {title}"),
            POST_PUBLISHED_TEMPLATE,
            [("title", title), ("url", url)],
        )
    }

    /// Periodic summary of new posts and downloads
    ///
    /// `entries` are rendered in the order given.
    #[must_use]
    pub fn digest(recipient: Recipient, period: &str, entries: &[String]) -> Self {
        let mut fields = BTreeMap::from([
            ("period".to_string(), period.to_string()),
            ("count".to_string(), entries.len().to_string()),
        ]);
        // Keys share one width so their sorted order is the entry order
        let width = entries.len().saturating_sub(1).to_string().len().max(3);
        fields.extend(
            entries
                .iter()
                .enumerate()
                .map(|(index, entry)| (format!("entry.{index:0width$}"), entry.clone())),
        );

        Self {
            recipients: vec![recipient],
            subject: format!("Your {period} digest"),
            payload: Payload::Fields(fields),
            template: Some(DIGEST_TEMPLATE.to_string()),
        }
    }

    /// Operator-triggered message to check the delivery path end to end
    #[must_use]
    pub fn test_message(recipient: Recipient) -> Self {
        Self::templated(
            vec![recipient],
            "Herald test message".to_string(),
            TEST_TEMPLATE,
            [("origin", "heraldctl")],
        )
    }

    fn templated<const N: usize>(
        recipients: Vec<Recipient>,
        subject: String,
        template: &str,
        fields: [(&str, &str); N],
    ) -> Self {
        Self {
            recipients,
            subject,
            payload: Payload::Fields(
                fields
                    .into_iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            ),
            template: Some(template.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_published_fields() {
        let notification = Notification::post_published(
            vec!["a@example.com".into(), "b@example.com".into()],
            "Release 2.0",
            "https://example.com/posts/release-2-0",
        );

        assert_eq!(notification.subject, "New post: Release 2.0");
        assert_eq!(notification.template.as_deref(), Some(POST_PUBLISHED_TEMPLATE));
        assert_eq!(notification.recipients.len(), 2);

        let Payload::Fields(fields) = notification.payload else {
            panic!("expected template fields");
        };
        assert_eq!(fields["url"], "https://example.com/posts/release-2-0");
    }

    #[test]
    fn test_digest_keeps_entry_order() {
        let entries = vec!["first".to_string(), "second".to_string()];
        let notification = Notification::digest("reader@example.com".into(), "weekly", &entries);

        let Payload::Fields(fields) = notification.payload else {
            panic!("expected template fields");
        };
        let rendered: Vec<_> = fields
            .iter()
            .filter(|(key, _)| key.starts_with("entry."))
            .map(|(_, value)| value.as_str())
            .collect();

        assert_eq!(rendered, vec!["first", "second"]);
        assert_eq!(fields["count"], "2");
        assert_eq!(notification.subject, "Your weekly digest");
    }

    #[test]
    fn test_large_digest_keeps_entry_order() {
        let entries: Vec<String> = (0..1200).map(|i| format!("post {i}")).collect();
        let notification = Notification::digest("reader@example.com".into(), "yearly", &entries);

        let Payload::Fields(fields) = notification.payload else {
            panic!("expected template fields");
        };
        let rendered: Vec<_> = fields
            .iter()
            .filter(|(key, _)| key.starts_with("entry."))
            .map(|(_, value)| value.clone())
            .collect();

        assert_eq!(rendered, entries);
        assert!(fields.contains_key("entry.0999"));
        assert!(fields.contains_key("entry.1000"));
    }

    #[test]
    fn test_raw_has_no_template() {
        let notification = Notification::raw(
            vec!["ops@example.com".into()],
            "Disk almost full",
            "95% used".to_string(),
        );
        assert!(notification.template.is_none());
        assert_eq!(notification.payload, Payload::Raw("95% used".to_string()));
    }
}
