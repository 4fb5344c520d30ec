//! Content renderer - personalization, tracking markup, unsubscribe footer

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use mailsurge_storage::models::Contact;
use regex::Regex;
use serde_json::Value;

/// Renders campaign content into per-recipient message bodies
pub struct ContentRenderer {
    /// Public base URL for tracking and unsubscribe endpoints
    base_url: String,
    /// Sender name shown in the unsubscribe footer
    sender_name: String,
    href_re: Regex,
    placeholder_re: Regex,
}

impl ContentRenderer {
    /// Create a new renderer
    pub fn new(base_url: String, sender_name: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            sender_name,
            href_re: Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).unwrap(),
            placeholder_re: Regex::new(r"\{\{[^}]+\}\}").unwrap(),
        }
    }

    /// Render a full HTML body for one recipient: personalization,
    /// unsubscribe footer, click rewriting, then the open pixel.
    pub fn render_html(
        &self,
        template: &str,
        contact: &Contact,
        tracking_id: &str,
        unsubscribe_token: &str,
    ) -> String {
        let unsubscribe_url = self.unsubscribe_url(unsubscribe_token);

        let mut html = self.personalize(template, contact);
        html = html.replace("{{unsubscribe_url}}", &unsubscribe_url);

        if !html.to_lowercase().contains("unsubscribe") {
            html = self.append_footer(&html, &unsubscribe_url);
        }

        html = self.rewrite_links(&html, tracking_id);
        html = self.inject_pixel(&html, tracking_id);
        self.strip_unresolved(&html)
    }

    /// Render a plain-text body (no tracking markup)
    pub fn render_text(
        &self,
        template: &str,
        contact: &Contact,
        unsubscribe_token: &str,
    ) -> String {
        let mut text = self.personalize(template, contact);
        text = text.replace("{{unsubscribe_url}}", &self.unsubscribe_url(unsubscribe_token));
        self.strip_unresolved(&text)
    }

    /// Render the subject line
    pub fn render_subject(&self, subject: &str, contact: &Contact) -> String {
        self.strip_unresolved(&self.personalize(subject, contact))
    }

    /// Substitute recipient variables
    fn personalize(&self, template: &str, contact: &Contact) -> String {
        let mut result = template.to_string();

        result = result.replace("{{email}}", &contact.email);

        let full_name = contact.full_name.as_deref().unwrap_or("");
        result = result.replace("{{full_name}}", full_name);

        let mut parts = full_name.split_whitespace();
        let first_name = parts.next().unwrap_or("");
        let last_name = parts.collect::<Vec<_>>().join(" ");
        result = result.replace("{{first_name}}", first_name);
        result = result.replace("{{last_name}}", &last_name);

        result = result.replace("{{company}}", contact.company.as_deref().unwrap_or(""));
        result = result.replace("{{phone}}", contact.phone.as_deref().unwrap_or(""));

        if let Some(fields) = contact.custom_fields.as_object() {
            for (key, value) in fields {
                let placeholder = format!("{{{{{}}}}}", key);
                let value_str = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => value.to_string(),
                };
                result = result.replace(&placeholder, &value_str);
            }
        }

        result
    }

    /// Rewrite each trackable link to pass through the click endpoint
    fn rewrite_links(&self, html: &str, tracking_id: &str) -> String {
        self.href_re
            .replace_all(html, |caps: &regex::Captures| {
                let url = &caps[1];
                if Self::skip_rewrite(url) {
                    caps[0].to_string()
                } else {
                    format!(
                        r#"href="{}/t/click/{}/{}""#,
                        self.base_url,
                        tracking_id,
                        encode_click_url(url)
                    )
                }
            })
            .to_string()
    }

    /// Links that must reach the recipient untouched
    fn skip_rewrite(url: &str) -> bool {
        url.starts_with("mailto:")
            || url.starts_with("tel:")
            || url.starts_with('#')
            || url.starts_with("javascript:")
            || url.to_lowercase().contains("unsubscribe")
    }

    /// Insert the open pixel just before </body> when present,
    /// otherwise append it
    fn inject_pixel(&self, html: &str, tracking_id: &str) -> String {
        let pixel = format!(
            r#"<img src="{}/t/open/{}.gif" width="1" height="1" alt="" style="display:none;">"#,
            self.base_url, tracking_id
        );

        let close = html.rfind("</body>").or_else(|| html.rfind("</BODY>"));
        if let Some(pos) = close {
            let mut result = String::with_capacity(html.len() + pixel.len());
            result.push_str(&html[..pos]);
            result.push_str(&pixel);
            result.push_str(&html[pos..]);
            result
        } else {
            format!("{}{}", html, pixel)
        }
    }

    /// Footer required when the body carries no unsubscribe link.
    /// Goes just before </body> when the template has one.
    fn append_footer(&self, html: &str, unsubscribe_url: &str) -> String {
        let footer = format!(
            concat!(
                r#"<div style="margin-top:24px;padding-top:12px;border-top:1px solid #ddd;"#,
                r#"font-size:12px;color:#888;">"#,
                "<p>You received this email from {}. ",
                r#"<a href="{}">Unsubscribe</a></p></div>"#
            ),
            self.sender_name, unsubscribe_url
        );

        let close = html.rfind("</body>").or_else(|| html.rfind("</BODY>"));
        if let Some(pos) = close {
            let mut result = String::with_capacity(html.len() + footer.len());
            result.push_str(&html[..pos]);
            result.push_str(&footer);
            result.push_str(&html[pos..]);
            result
        } else {
            format!("{}{}", html, footer)
        }
    }

    fn strip_unresolved(&self, content: &str) -> String {
        self.placeholder_re.replace_all(content, "").to_string()
    }

    fn unsubscribe_url(&self, token: &str) -> String {
        format!("{}/unsubscribe/{}", self.base_url, token)
    }
}

/// Encode a destination URL for embedding in a click-tracking path
pub fn encode_click_url(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

/// Decode a click-tracking path segment back into the destination URL.
/// Returns None when the segment is not valid base64 or UTF-8.
pub fn decode_click_url(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn renderer() -> ContentRenderer {
        ContentRenderer::new(
            "https://track.acme.test".to_string(),
            "Acme Newsletter".to_string(),
        )
    }

    fn contact() -> Contact {
        Contact {
            id: uuid::Uuid::new_v4(),
            org_id: uuid::Uuid::new_v4(),
            email: "jane@example.com".to_string(),
            full_name: Some("Jane van Dyk".to_string()),
            company: Some("Example Inc".to_string()),
            phone: None,
            status: "subscribed".to_string(),
            custom_fields: serde_json::json!({"plan": "premium"}),
            total_emails_sent: 0,
            total_emails_opened: 0,
            total_emails_clicked: 0,
            last_email_sent_at: None,
            last_opened_at: None,
            last_clicked_at: None,
            unsubscribed_at: None,
            unsubscribe_reason: None,
            bounce_count: 0,
            bounce_type: None,
            last_bounce_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_personalization_variables() {
        let r = renderer();
        let subject = r.render_subject(
            "Hi {{first_name}} {{last_name}} of {{company}} ({{plan}})",
            &contact(),
        );
        assert_eq!(subject, "Hi Jane van Dyk of Example Inc (premium)");
    }

    #[test]
    fn test_missing_variables_stripped() {
        let r = renderer();
        let subject = r.render_subject("Hello {{first_name}}, {{nonexistent}}!", &contact());
        assert_eq!(subject, "Hello Jane, !");

        let mut c = contact();
        c.full_name = None;
        assert_eq!(r.render_subject("Hi {{first_name}}", &c), "Hi ");
    }

    #[test]
    fn test_pixel_before_body_close() {
        let r = renderer();
        let html = r.render_html(
            "<html><body><p>Unsubscribe below</p></body></html>",
            &contact(),
            "abc123",
            "tok",
        );
        let pixel_pos = html.find("/t/open/abc123.gif").unwrap();
        let body_pos = html.find("</body>").unwrap();
        assert!(pixel_pos < body_pos);
    }

    #[test]
    fn test_pixel_appended_without_body_tag() {
        let r = renderer();
        let html = r.render_html("<p>unsubscribe info</p>", &contact(), "abc123", "tok");
        assert!(html.ends_with(r#"style="display:none;">"#));
        assert!(html.contains("/t/open/abc123.gif"));
    }

    #[test]
    fn test_click_rewriting() {
        let r = renderer();
        let html = r.render_html(
            r#"<body><a href="https://acme.test/pricing">Pricing</a> unsubscribe</body>"#,
            &contact(),
            "tid",
            "tok",
        );

        let encoded = encode_click_url("https://acme.test/pricing");
        assert!(html.contains(&format!(
            r#"href="https://track.acme.test/t/click/tid/{}""#,
            encoded
        )));
        assert!(!html.contains(r#"href="https://acme.test/pricing""#));
    }

    #[test]
    fn test_click_rewrite_skips_special_links() {
        let r = renderer();
        let template = concat!(
            r#"<body><a href="mailto:hi@acme.test">mail</a>"#,
            r#"<a href="tel:+1555">call</a>"#,
            r##"<a href="#section">jump</a>"##,
            r#"<a href="https://acme.test/unsubscribe/x">bye</a></body>"#
        );
        let html = r.render_html(template, &contact(), "tid", "tok");

        assert!(html.contains(r#"href="mailto:hi@acme.test""#));
        assert!(html.contains(r#"href="tel:+1555""#));
        assert!(html.contains(r##"href="#section""##));
        assert!(html.contains(r#"href="https://acme.test/unsubscribe/x""#));
        assert!(!html.contains("/t/click/"));
    }

    #[test]
    fn test_footer_added_when_missing() {
        let r = renderer();
        let html = r.render_html("<body><p>News</p></body>", &contact(), "tid", "tok");
        assert!(html.contains("https://track.acme.test/unsubscribe/tok"));
        assert!(html.contains("Acme Newsletter"));
    }

    #[test]
    fn test_footer_not_duplicated() {
        let r = renderer();
        let html = r.render_html(
            r#"<body><a href="{{unsubscribe_url}}">Unsubscribe</a></body>"#,
            &contact(),
            "tid",
            "tok",
        );
        assert_eq!(html.matches("/unsubscribe/tok").count(), 1);
        assert!(!html.contains("You received this email"));
    }

    #[test]
    fn test_click_url_roundtrip() {
        let url = "https://acme.test/a?b=c&d=e f";
        assert_eq!(decode_click_url(&encode_click_url(url)).unwrap(), url);
        assert_eq!(decode_click_url("!!not-base64!!"), None);
    }
}
