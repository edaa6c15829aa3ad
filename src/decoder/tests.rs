use super::*;
use crate::observation::{Observation, Transport};
use crate::resolvers::TlsInspector;
use etherparse::PacketBuilder;
use std::net::IpAddr;

fn tcp_frame(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .tcp(12345, 443, 1, 64240);
    let mut packet = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut packet, payload).unwrap();
    packet
}

fn extension(kind: u16, body: &[u8]) -> Vec<u8> {
    let mut out = kind.to_be_bytes().to_vec();
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn sni_extension(host: &str) -> Vec<u8> {
    let mut entry = vec![0u8]; // host_name
    entry.extend_from_slice(&(host.len() as u16).to_be_bytes());
    entry.extend_from_slice(host.as_bytes());
    let mut list = (entry.len() as u16).to_be_bytes().to_vec();
    list.extend_from_slice(&entry);
    extension(0x0000, &list)
}

fn handshake_record(kind: u8, body: &[u8]) -> Vec<u8> {
    let mut handshake = vec![kind];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

fn client_hello(host: &str, ciphers: &[u16], extra_extensions: &[Vec<u8>]) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x11; 32]);
    body.push(0); // session id
    body.extend_from_slice(&((ciphers.len() * 2) as u16).to_be_bytes());
    for cipher in ciphers {
        body.extend_from_slice(&cipher.to_be_bytes());
    }
    body.extend_from_slice(&[1, 0]); // null compression

    let mut extensions = sni_extension(host);
    // supported_groups: x25519, secp256r1
    extensions.extend(extension(0x000a, &[0x00, 0x04, 0x00, 0x1d, 0x00, 0x17]));
    // ec_point_formats: uncompressed
    extensions.extend(extension(0x000b, &[0x01, 0x00]));
    for ext in extra_extensions {
        extensions.extend_from_slice(ext);
    }
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    handshake_record(0x01, &body)
}

fn server_hello(cipher: u16) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x22; 32]);
    body.push(0);
    body.extend_from_slice(&cipher.to_be_bytes());
    body.push(0);
    let extensions = extension(0xff01, &[0x00]);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);
    handshake_record(0x02, &body)
}

fn tls_observation(payload: Vec<u8>) -> Observation {
    Observation::new(1.0, payload.clone())
        .with_flow(Transport::TCP, 50000, 443)
        .with_payload(payload)
}

#[test]
fn decodes_ipv4_tcp_frame() {
    let frame = tcp_frame(b"hello");
    let decoded = decode_frame(&frame, 12.5).expect("valid frame");

    assert_eq!(decoded.src_ip, Some(IpAddr::from([10, 0, 0, 1])));
    assert_eq!(decoded.dst_ip, Some(IpAddr::from([10, 0, 0, 2])));
    let addresses: Vec<_> = decoded.addresses().collect();
    assert_eq!(addresses.len(), 2);
    assert_eq!(addresses[0], IpAddr::from([10, 0, 0, 1]));

    let obs = &decoded.observation;
    assert_eq!(obs.timestamp, 12.5);
    assert_eq!(obs.len(), frame.len() as u64);
    assert_eq!(obs.payload, b"hello");
    let flow = obs.flow.expect("tcp flow");
    assert_eq!(flow.transport, Transport::TCP);
    assert_eq!((flow.src_port, flow.dst_port), (12345, 443));
}

#[test]
fn decodes_ipv6_udp_frame() {
    let src = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    let dst = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
        .ipv6(src, dst, 64)
        .udp(5353, 5353);
    let payload = [0xab; 12];
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, &payload).unwrap();

    let decoded = decode_frame(&frame, 0.0).expect("valid frame");
    assert_eq!(decoded.src_ip, Some(IpAddr::from(src)));
    assert_eq!(decoded.dst_ip, Some(IpAddr::from(dst)));
    let flow = decoded.observation.flow.expect("udp flow");
    assert_eq!(flow.transport, Transport::UDP);
    assert_eq!(decoded.observation.payload, payload);
}

#[test]
fn non_ip_frame_has_no_addresses() {
    let mut frame = vec![6, 5, 4, 3, 2, 1, 1, 2, 3, 4, 5, 6];
    frame.extend_from_slice(&0x88b5u16.to_be_bytes());
    frame.extend_from_slice(&[0u8; 32]);

    let decoded = decode_frame(&frame, 0.0).expect("ethernet header parses");
    assert_eq!(decoded.addresses().count(), 0);
    assert!(decoded.observation.flow.is_none());
}

#[test]
fn truncated_frame_is_rejected() {
    assert!(decode_frame(&[0u8; 8], 0.0).is_err());
}

#[test]
fn extracts_server_name_from_client_hello() {
    let hello = client_hello("example.com", &[0x1301, 0xc02f], &[]);
    let decoded = decode_frame(&tcp_frame(&hello), 1.0).expect("valid frame");

    assert_eq!(
        HandshakeInspector.server_name(&decoded.observation),
        Some("example.com".to_string())
    );
}

#[test]
fn client_fingerprint_is_stable_and_ignores_grease() {
    let plain = tls_observation(client_hello("example.com", &[0x1301, 0xc02f], &[]));
    let greased = tls_observation(client_hello(
        "other.example.com",
        &[0x0a0a, 0x1301, 0xc02f],
        &[extension(0x1a1a, &[])],
    ));

    let first = HandshakeInspector.fingerprint(&plain).expect("fingerprint");
    assert_eq!(first.len(), 32);
    assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(HandshakeInspector.fingerprint(&plain), Some(first.clone()));
    assert_eq!(HandshakeInspector.fingerprint(&greased), Some(first));
}

#[test]
fn different_cipher_lists_fingerprint_differently() {
    let a = tls_observation(client_hello("example.com", &[0x1301], &[]));
    let b = tls_observation(client_hello("example.com", &[0x1302], &[]));
    assert_ne!(
        HandshakeInspector.fingerprint(&a),
        HandshakeInspector.fingerprint(&b)
    );
}

#[test]
fn server_hello_has_fingerprint_but_no_server_name() {
    let observation = tls_observation(server_hello(0xc02f));
    let fingerprint = HandshakeInspector.fingerprint(&observation).expect("fingerprint");
    assert_eq!(fingerprint.len(), 32);
    assert!(HandshakeInspector.server_name(&observation).is_none());

    let client = tls_observation(client_hello("example.com", &[0xc02f], &[]));
    assert_ne!(HandshakeInspector.fingerprint(&client), Some(fingerprint));
}

#[test]
fn non_tls_payloads_are_ignored() {
    let http = tls_observation(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec());
    assert!(HandshakeInspector.fingerprint(&http).is_none());
    assert!(HandshakeInspector.server_name(&http).is_none());

    let hello = client_hello("example.com", &[0x1301], &[]);
    let over_udp = Observation::new(1.0, hello.clone())
        .with_flow(Transport::UDP, 50000, 443)
        .with_payload(hello);
    assert!(HandshakeInspector.fingerprint(&over_udp).is_none());

    let truncated = tls_observation(client_hello("example.com", &[0x1301], &[])[..20].to_vec());
    assert!(HandshakeInspector.fingerprint(&truncated).is_none());
}

#[test]
fn tls_detection_checks_record_prefix() {
    assert!(tls::looks_like_tls(&[0x16, 0x03, 0x01, 0x00, 0x05]));
    assert!(!tls::looks_like_tls(&[0x16, 0x03, 0x01]));
    assert!(!tls::looks_like_tls(b"GET / HTTP/1.1"));
}
