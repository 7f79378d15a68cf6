//! Subscribe / resubscribe / unsubscribe messages for the event stream.
//!
//! The controller expects a SOAP `Subscribe` POSTed over the same socket it
//! will push events on (`REUSE_SOCKET`). Once the controller assigns a
//! stream id, later subscriptions carry it so event continuity survives a
//! reconnect.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use xmltree::Element;

use crate::config::StreamConfig;
use crate::error::Result;
use crate::xml::attr_from_xml;

/// Element carrying the stream id attribute
pub const STREAM_ID_ELEMENT: &str = "Event";
/// Attribute name of the stream id
pub const STREAM_ID_ATTR: &str = "sid";

const SERVICE_URN: &str = "urn:udi-com:service:X_Insteon_Lighting_Service:1";

/// A head/body message with `{name}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct MessageTemplate {
    pub head: &'static str,
    pub body: &'static str,
}

/// Head shared by every subscription message. `{auth}` expands to a full
/// header line or to nothing.
const HEAD: &str = "POST /services HTTP/1.1\r\n\
Host: {addr}:{port}{webroot}\r\n\
{auth}\
Content-Length: {length}\r\n\
Content-Type: text/xml; charset=\"utf-8\"\r\n\
\r\n";

pub const SUBSCRIBE: MessageTemplate = MessageTemplate {
    head: HEAD,
    body: "<s:Envelope><s:Body>\r\n\
<u:Subscribe xmlns:u=\"{urn}\">\r\n\
<reportURL>REUSE_SOCKET</reportURL>\r\n\
<duration>infinite</duration>\r\n\
</u:Subscribe></s:Body></s:Envelope>\r\n\r\n",
};

pub const RESUBSCRIBE: MessageTemplate = MessageTemplate {
    head: HEAD,
    body: "<s:Envelope><s:Body>\r\n\
<u:Subscribe xmlns:u=\"{urn}\">\r\n\
<reportURL>REUSE_SOCKET</reportURL>\r\n\
<duration>infinite</duration>\r\n\
<SID>{sid}</SID>\r\n\
</u:Subscribe></s:Body></s:Envelope>\r\n\r\n",
};

pub const UNSUBSCRIBE: MessageTemplate = MessageTemplate {
    head: HEAD,
    body: "<s:Envelope><s:Body>\r\n\
<u:Unsubscribe xmlns:u=\"{urn}\">\r\n\
<SID>{sid}</SID>\r\n\
</u:Unsubscribe></s:Body></s:Envelope>\r\n\r\n",
};

impl MessageTemplate {
    /// Substitute `params` into the body, then into the head together with
    /// the body's byte length.
    pub fn render(&self, params: &[(&str, &str)]) -> String {
        let body = substitute(self.body, params);
        let length = body.len().to_string();

        let mut head_params = params.to_vec();
        head_params.push(("length", length.as_str()));
        let head = substitute(self.head, &head_params);

        head + &body
    }
}

fn substitute(template: &str, params: &[(&str, &str)]) -> String {
    params.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

/// Builds subscription payloads and tracks stream-id continuity.
///
/// Shared between the caller that starts/stops a session and the read loop
/// that captures the stream id, so state lives behind a lock and an atomic.
#[derive(Debug)]
pub struct SubscriptionProtocol {
    address: String,
    port: u16,
    webroot: String,
    authorization: Option<String>,
    stream_id: RwLock<Option<String>>,
    subscribed: AtomicBool,
}

impl SubscriptionProtocol {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            address: config.address.clone(),
            port: config.port,
            webroot: config.webroot.clone(),
            authorization: config.credentials.as_ref().map(|c| c.authorization_header()),
            stream_id: RwLock::new(config.stream_id.clone()),
            subscribed: AtomicBool::new(false),
        }
    }

    /// Subscribe payload; the resubscribe form once a stream id is known
    pub fn subscribe_payload(&self) -> Vec<u8> {
        let template = if self.stream_id().is_some() {
            RESUBSCRIBE
        } else {
            SUBSCRIBE
        };
        self.render(&template)
    }

    pub fn unsubscribe_payload(&self) -> Vec<u8> {
        self.render(&UNSUBSCRIBE)
    }

    fn render(&self, template: &MessageTemplate) -> Vec<u8> {
        let port = self.port.to_string();
        let auth = self
            .authorization
            .as_ref()
            .map(|value| format!("Authorization: {value}\r\n"))
            .unwrap_or_default();
        let sid = self.stream_id().unwrap_or_default();

        template
            .render(&[
                ("addr", self.address.as_str()),
                ("port", port.as_str()),
                ("webroot", self.webroot.as_str()),
                ("auth", auth.as_str()),
                ("urn", SERVICE_URN),
                ("sid", sid.as_str()),
            ])
            .into_bytes()
    }

    /// Write the subscribe payload unless already subscribed.
    ///
    /// Returns whether a message was written.
    pub fn subscribe<W: Write + ?Sized>(&self, writer: &mut W) -> Result<bool> {
        if self.is_subscribed() {
            return Ok(false);
        }
        let resubscribe = self.stream_id().is_some();
        writer.write_all(&self.subscribe_payload())?;
        writer.flush()?;
        self.subscribed.store(true, Ordering::SeqCst);
        tracing::debug!(resubscribe, "Subscribed to event stream");
        Ok(true)
    }

    /// Write the unsubscribe payload if subscribed; a no-op otherwise.
    pub fn unsubscribe<W: Write + ?Sized>(&self, writer: &mut W) -> Result<bool> {
        if !self.subscribed.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        writer.write_all(&self.unsubscribe_payload())?;
        writer.flush()?;
        tracing::debug!("Unsubscribed from event stream");
        Ok(true)
    }

    /// Forget the subscription without writing, as when the socket closed
    pub fn mark_unsubscribed(&self) {
        self.subscribed.store(false, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Store the stream id the controller assigned in `doc`
    pub fn capture_stream_id(&self, doc: &Element) -> Option<String> {
        let sid = attr_from_xml(doc, STREAM_ID_ELEMENT, STREAM_ID_ATTR)?;
        *self.stream_id.write() = Some(sid.clone());
        tracing::debug!(stream_id = %sid, "Updated event stream id");
        Some(sid)
    }

    pub fn stream_id(&self) -> Option<String> {
        self.stream_id.read().clone()
    }

    pub fn has_stream_id(&self) -> bool {
        self.stream_id.read().is_some()
    }
}
