use bytes::Bytes;
use application_server::domain::message_format;
use common::domain::{
    ApplicationUp, ApplicationWebhookIdentifiers, DomainError, DomainResult, EndDeviceIdentifiers,
    Webhook,
};
use url::Url;

/// Outbound webhook call, ready for a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub ids: ApplicationWebhookIdentifiers,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// How this server announces its downlink API to webhook targets.
#[derive(Debug, Clone, Default)]
pub struct DownlinkAnnouncement {
    /// Public base URL of the HTTP ingress, e.g. `https://as.example.com`.
    pub public_address: String,
    /// Sent as `X-Tts-Domain`.
    pub domain: String,
}

/// Expands the URI template variables of `template` for a device.
pub fn expand_template(template: &str, ids: &EndDeviceIdentifiers) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &rest[start + 1..start + len];
        out.push_str(&template_variable(name, ids));
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

fn template_variable(name: &str, ids: &EndDeviceIdentifiers) -> String {
    match name {
        "appID" | "applicationID" => ids.application_ids.application_id.clone(),
        "devID" | "deviceID" => ids.device_id.clone(),
        "appEUI" | "joinEUI" => ids.join_eui.map(|e| e.to_string()).unwrap_or_default(),
        "devEUI" => ids.dev_eui.map(|e| e.to_string()).unwrap_or_default(),
        "devAddr" => ids.dev_addr.map(|a| a.to_string()).unwrap_or_default(),
        _ => String::new(),
    }
}

/// Resolves a message path against the base URL. Absolute URLs are used
/// as is; everything else extends the base path with one slash. The query
/// of the base is kept and the query of the path appended to it.
pub fn join_url(base: &str, path: &str) -> DomainResult<String> {
    if path.contains("://") {
        return Ok(path.to_string());
    }
    if path.is_empty() {
        return Ok(base.to_string());
    }
    let mut url = Url::parse(base).map_err(|e| {
        DomainError::FailedPrecondition(format!("invalid webhook base URL `{}`: {}", base, e))
    })?;
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };
    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        let merged = match url.query().filter(|q| !q.is_empty()) {
            Some(existing) => format!("{}&{}", existing, query),
            None => query.to_string(),
        };
        url.set_query(Some(&merged));
    }
    Ok(url.to_string())
}

fn downlink_url(
    announcement: &DownlinkAnnouncement,
    ids: &ApplicationWebhookIdentifiers,
    device_id: &str,
    operation: &str,
) -> String {
    format!(
        "{}/api/v3/as/applications/{}/webhooks/{}/devices/{}/down/{}",
        announcement.public_address.trim_end_matches('/'),
        ids.application_ids.application_id,
        ids.webhook_id,
        device_id,
        operation
    )
}

/// Builds the request for `up`, or `None` when the webhook does not
/// deliver this message kind.
pub fn build_request(
    webhook: &Webhook,
    up: &ApplicationUp,
    announcement: &DownlinkAnnouncement,
) -> DomainResult<Option<WebhookRequest>> {
    let Some(message) = webhook.messages.for_kind(up.up.name()) else {
        return Ok(None);
    };
    if webhook.base_url.is_empty() {
        return Err(DomainError::FailedPrecondition(format!(
            "webhook `{}` has no base URL",
            webhook.ids.unique_id()
        )));
    }
    let ids = &up.end_device_ids;
    let url = join_url(
        &expand_template(&webhook.base_url, ids),
        &expand_template(&message.path, ids),
    )?;

    let format = message_format(webhook.format);
    let body = format.from_up(up, &webhook.field_mask)?;

    let mut headers: Vec<(String, String)> = webhook
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    headers.sort();
    headers.push(("Content-Type".to_string(), format.content_type().to_string()));
    if let Some(api_key) = webhook.downlink_api_key.as_ref().filter(|k| !k.is_empty()) {
        headers.push(("X-Downlink-Apikey".to_string(), api_key.clone()));
        headers.push((
            "X-Downlink-Push".to_string(),
            downlink_url(announcement, &webhook.ids, &ids.device_id, "push"),
        ));
        headers.push((
            "X-Downlink-Replace".to_string(),
            downlink_url(announcement, &webhook.ids, &ids.device_id, "replace"),
        ));
    }
    if !announcement.domain.is_empty() {
        headers.push(("X-Tts-Domain".to_string(), announcement.domain.clone()));
    }

    Ok(Some(WebhookRequest {
        ids: webhook.ids.clone(),
        url,
        headers,
        body: Bytes::from(body),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        ApplicationUplink, DevAddr, Eui64, Up, WebhookFormat, WebhookMessage,
        WebhookMessagePaths,
    };
    use std::collections::HashMap;

    fn ids() -> EndDeviceIdentifiers {
        let mut ids = EndDeviceIdentifiers::new("foo-app", "foo-device");
        ids.dev_eui = Some(Eui64([0x11; 8]));
        ids.dev_addr = Some(DevAddr([0x01, 0x02, 0x03, 0x04]));
        ids
    }

    fn webhook() -> Webhook {
        Webhook {
            ids: ApplicationWebhookIdentifiers::new("foo-app", "foo-hook"),
            base_url: "https://example.com/{appID}/".to_string(),
            format: WebhookFormat::Json,
            headers: HashMap::from([("Authorization".to_string(), "Bearer x".to_string())]),
            messages: WebhookMessagePaths {
                uplink_message: Some(WebhookMessage {
                    path: "/up/{devID}/{devEUI}".to_string(),
                }),
                ..Default::default()
            },
            downlink_api_key: Some("down-key".to_string()),
            ..Default::default()
        }
    }

    fn uplink() -> ApplicationUp {
        ApplicationUp::new(
            ids(),
            Up::UplinkMessage(ApplicationUplink {
                f_port: 1,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_expand_template() {
        assert_eq!(
            expand_template("{appID}/{deviceID}/{devAddr}/{joinEUI}/{unknown}", &ids()),
            "foo-app/foo-device/01020304//"
        );
        assert_eq!(expand_template("no-vars", &ids()), "no-vars");
        assert_eq!(expand_template("open{", &ids()), "open{");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.b/x/", "/up").unwrap(), "https://a.b/x/up");
        assert_eq!(join_url("https://a.b/x", "up").unwrap(), "https://a.b/x/up");
        assert_eq!(join_url("https://a.b/x", "").unwrap(), "https://a.b/x");
        assert_eq!(
            join_url("https://a.b/x", "http://c.d/up").unwrap(),
            "http://c.d/up"
        );
    }

    #[test]
    fn test_join_url_keeps_base_query() {
        assert_eq!(
            join_url("https://a.b/x?k=v", "/up").unwrap(),
            "https://a.b/x/up?k=v"
        );
        assert_eq!(
            join_url("https://a.b/x?k=v", "up?f=1").unwrap(),
            "https://a.b/x/up?k=v&f=1"
        );
        assert_eq!(join_url("https://a.b", "up").unwrap(), "https://a.b/up");
    }

    #[test]
    fn test_join_url_rejects_relative_base() {
        assert!(matches!(
            join_url("not a url", "/up"),
            Err(DomainError::FailedPrecondition(_))
        ));
    }

    #[test]
    fn test_build_request() {
        let announcement = DownlinkAnnouncement {
            public_address: "https://as.example.com/".to_string(),
            domain: "as.example.com".to_string(),
        };

        let request = build_request(&webhook(), &uplink(), &announcement)
            .unwrap()
            .unwrap();

        assert_eq!(
            request.url,
            "https://example.com/foo-app/up/foo-device/1111111111111111"
        );
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("authorization"), Some("Bearer x"));
        assert_eq!(request.header("x-downlink-apikey"), Some("down-key"));
        assert_eq!(
            request.header("x-downlink-push"),
            Some("https://as.example.com/api/v3/as/applications/foo-app/webhooks/foo-hook/devices/foo-device/down/push")
        );
        assert_eq!(request.header("x-tts-domain"), Some("as.example.com"));
    }

    #[test]
    fn test_unconfigured_kind_is_skipped() {
        let up = ApplicationUp::new(ids(), Up::DownlinkAck(Default::default()));

        let request = build_request(&webhook(), &up, &DownlinkAnnouncement::default()).unwrap();

        assert!(request.is_none());
    }
}
