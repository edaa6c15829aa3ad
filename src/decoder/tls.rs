use crate::observation::{Observation, Transport};
use crate::resolvers::TlsInspector;
use sha2::{Digest, Sha256};
use tls_parser::{
    SNIType, TlsClientHelloContents, TlsExtension, TlsMessage, TlsMessageHandshake,
    TlsServerHelloContents, parse_tls_extensions, parse_tls_plaintext,
};
use tracing::trace;

const FINGERPRINT_HEX_LEN: usize = 32;

/// Inspects the first TLS record of a TCP payload for Client/Server Hello
/// handshakes.
pub struct HandshakeInspector;

enum Hello<'a> {
    Client(TlsClientHelloContents<'a>),
    Server(TlsServerHelloContents<'a>),
}

pub fn looks_like_tls(payload: &[u8]) -> bool {
    if payload.len() < 5 {
        return false;
    }
    let content_type = payload[0];
    let version_major = payload[1];
    (20..=23).contains(&content_type) && version_major == 3
}

impl HandshakeInspector {
    fn hello<'a>(&self, observation: &'a Observation) -> Option<Hello<'a>> {
        let is_tcp = matches!(
            observation.flow.map(|f| f.transport),
            Some(Transport::TCP)
        );
        if !is_tcp || !looks_like_tls(&observation.payload) {
            return None;
        }

        let (_, record) = match parse_tls_plaintext(&observation.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                trace!(error = ?err, "Incomplete or malformed TLS record");
                return None;
            }
        };

        record.msg.into_iter().find_map(|msg| match msg {
            TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) => Some(Hello::Client(ch)),
            TlsMessage::Handshake(TlsMessageHandshake::ServerHello(sh)) => Some(Hello::Server(sh)),
            _ => None,
        })
    }
}

impl TlsInspector for HandshakeInspector {
    fn server_name(&self, observation: &Observation) -> Option<String> {
        let Some(Hello::Client(ch)) = self.hello(observation) else {
            return None;
        };
        let (_, extensions) = parse_tls_extensions(ch.ext?).ok()?;
        extensions.iter().find_map(|ext| match ext {
            TlsExtension::SNI(names) => names
                .iter()
                .find(|(kind, _)| *kind == SNIType::HostName)
                .map(|(_, name)| String::from_utf8_lossy(name).into_owned()),
            _ => None,
        })
    }

    fn fingerprint(&self, observation: &Observation) -> Option<String> {
        let descriptor = match self.hello(observation)? {
            Hello::Client(ch) => client_descriptor(&ch),
            Hello::Server(sh) => server_descriptor(&sh),
        };
        trace!(descriptor = %descriptor, "Computed TLS handshake descriptor");
        Some(hash_descriptor(&descriptor))
    }
}

/// JA3 layout: version,ciphers,extensions,curves,point formats.
fn client_descriptor(ch: &TlsClientHelloContents) -> String {
    let ciphers = join(ch.ciphers.iter().map(|c| c.0));
    let ext_bytes = ch.ext.unwrap_or_default();
    let extension_ids = join(extension_types(ext_bytes).into_iter());

    let mut curves = String::new();
    let mut point_formats = String::new();
    if let Ok((_, extensions)) = parse_tls_extensions(ext_bytes) {
        for ext in &extensions {
            match ext {
                TlsExtension::EllipticCurves(groups) => {
                    curves = join(groups.iter().map(|g| g.0));
                }
                TlsExtension::EcPointFormats(formats) => {
                    point_formats = join(formats.iter().map(|f| u16::from(*f)));
                }
                _ => {}
            }
        }
    }

    format!(
        "{},{},{},{},{}",
        ch.version.0, ciphers, extension_ids, curves, point_formats
    )
}

/// JA3S layout: version,cipher,extensions.
fn server_descriptor(sh: &TlsServerHelloContents) -> String {
    let extension_ids = join(extension_types(sh.ext.unwrap_or_default()).into_iter());
    format!("{},{},{}", sh.version.0, sh.cipher.0, extension_ids)
}

/// Walks the raw extension block and returns the extension type ids.
fn extension_types(mut data: &[u8]) -> Vec<u16> {
    let mut ids = Vec::new();
    while data.len() >= 4 {
        let id = u16::from_be_bytes([data[0], data[1]]);
        let len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            break;
        }
        ids.push(id);
        data = &data[4 + len..];
    }
    ids
}

fn is_grease(value: u16) -> bool {
    value & 0x0f0f == 0x0a0a && (value >> 8) == (value & 0xff)
}

fn join(values: impl Iterator<Item = u16>) -> String {
    values
        .filter(|v| !is_grease(*v))
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn hash_descriptor(descriptor: &str) -> String {
    let digest = Sha256::digest(descriptor.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(FINGERPRINT_HEX_LEN);
    hash
}
