use super::*;
use crate::observation::Transport;
use std::net::IpAddr;

fn build_dns_response_payload(name: &[&str], answers: &[(u16, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&0x1234u16.to_be_bytes()); // id
    buf.extend_from_slice(&0x8180u16.to_be_bytes()); // standard response, no error
    buf.extend_from_slice(&0x0001u16.to_be_bytes()); // qdcount
    buf.extend_from_slice(&(answers.len() as u16).to_be_bytes()); // ancount
    buf.extend_from_slice(&0x0000u16.to_be_bytes()); // nscount
    buf.extend_from_slice(&0x0000u16.to_be_bytes()); // arcount

    for label in name {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    buf.extend_from_slice(&0x0001u16.to_be_bytes()); // QTYPE
    buf.extend_from_slice(&0x0001u16.to_be_bytes()); // QCLASS

    for (rtype, rdata) in answers {
        buf.extend_from_slice(&[0xc0, 0x0c]); // pointer to question name
        buf.extend_from_slice(&rtype.to_be_bytes());
        buf.extend_from_slice(&0x0001u16.to_be_bytes()); // IN
        buf.extend_from_slice(&0x0000003cu32.to_be_bytes()); // ttl
        buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(rdata);
    }
    buf
}

fn dns_observation(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Observation {
    Observation::new(0.0, payload.clone())
        .with_flow(Transport::UDP, src_port, dst_port)
        .with_payload(payload)
}

#[test]
fn passive_dns_learns_a_and_aaaa_answers() {
    let v6 = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x10];
    let payload = build_dns_response_payload(
        &["www", "example", "com"],
        &[(1, &[93, 184, 216, 34]), (28, &v6)],
    );

    let dns = PassiveDns::new();
    dns.observe(&dns_observation(53, 40000, payload));

    assert_eq!(dns.len(), 2);
    assert_eq!(
        dns.resolve("93.184.216.34", true).unwrap(),
        vec!["www.example.com".to_string()]
    );
    assert_eq!(
        dns.names_for(&IpAddr::from(v6)),
        vec!["www.example.com".to_string()]
    );
}

#[test]
fn passive_dns_deduplicates_names() {
    let dns = PassiveDns::new();
    let ip = IpAddr::from([10, 0, 0, 3]);
    dns.insert(ip, "db.internal");
    dns.insert(ip, "db.internal");
    dns.insert(ip, "postgres.internal");

    assert_eq!(
        dns.names_for(&ip),
        vec!["db.internal".to_string(), "postgres.internal".to_string()]
    );
}

#[test]
fn passive_dns_ignores_queries_and_other_ports() {
    let dns = PassiveDns::new();

    let mut query = build_dns_response_payload(&["example", "com"], &[(1, &[1, 2, 3, 4])]);
    query[2] = 0x01; // clear QR bit
    dns.observe(&dns_observation(40000, 53, query));

    let answer = build_dns_response_payload(&["example", "com"], &[(1, &[1, 2, 3, 4])]);
    dns.observe(&dns_observation(40000, 5000, answer.clone()));
    dns.observe(
        &Observation::new(0.0, answer.clone())
            .with_flow(Transport::TCP, 53, 40000)
            .with_payload(answer),
    );

    assert!(dns.is_empty());
}

#[test]
fn truncated_dns_answer_is_skipped() {
    let mut payload = build_dns_response_payload(&["example", "com"], &[(1, &[1, 2, 3, 4])]);
    payload.truncate(payload.len() - 2);
    assert!(dns::parse_dns_answers(&payload).is_empty());
    assert!(dns::parse_dns_answers(&[0u8; 4]).is_empty());
}

#[test]
fn answers_before_truncation_are_kept() {
    let mut payload = build_dns_response_payload(
        &["cdn", "example", "net"],
        &[(1, &[10, 1, 1, 1]), (1, &[10, 1, 1, 2])],
    );
    payload.truncate(payload.len() - 1);

    assert_eq!(
        dns::parse_dns_answers(&payload),
        vec![(IpAddr::from([10, 1, 1, 1]), "cdn.example.net".to_string())]
    );
}

#[test]
fn looping_name_pointer_is_rejected() {
    let mut payload = build_dns_response_payload(&["a"], &[(1, &[10, 1, 1, 1])]);
    // Point the answer name at itself.
    let answer_name = 12 + 3 + 4;
    payload[answer_name] = 0xc0;
    payload[answer_name + 1] = answer_name as u8;

    assert!(dns::parse_dns_answers(&payload).is_empty());
}

#[test]
fn non_address_records_are_skipped() {
    let payload = build_dns_response_payload(
        &["example", "com"],
        &[(5, b"\x03www\xc0\x0c"), (1, &[10, 2, 2, 2])],
    );
    assert_eq!(
        dns::parse_dns_answers(&payload),
        vec![(IpAddr::from([10, 2, 2, 2]), "example.com".to_string())]
    );
}

#[test]
fn passive_dns_rejects_invalid_address() {
    let dns = PassiveDns::new();
    let err = dns.resolve("not-an-ip", false).unwrap_err();
    assert_eq!(err.resolver, "passive-dns");
    assert!(dns.resolve("10.0.0.1", false).unwrap().is_empty());
}

#[test]
fn port_classifier_prefers_service_port() {
    let classifier = PortClassifier::default();

    let https = Observation::new(0.0, vec![0; 10]).with_flow(Transport::TCP, 52000, 443);
    let detected = classifier.classify(&https);
    assert_eq!(detected.len(), 1);
    assert_eq!(detected["TLS"].category, "Web");
    assert_eq!(detected["TLS"].classifier, "port");

    let quic = Observation::new(0.0, vec![0; 10]).with_flow(Transport::UDP, 443, 52000);
    assert!(classifier.classify(&quic).contains_key("QUIC"));

    let unknown = Observation::new(0.0, vec![0; 10]).with_flow(Transport::TCP, 40000, 41000);
    assert!(classifier.classify(&unknown).is_empty());
    assert!(classifier.classify(&Observation::new(0.0, vec![0; 10])).is_empty());
}

#[test]
fn port_classifier_accepts_custom_services() {
    let mut classifier = PortClassifier::default();
    classifier.register(Transport::TCP, 5432, "PostgreSQL", "Database");

    let observation = Observation::new(0.0, vec![0; 10]).with_flow(Transport::TCP, 5432, 60000);
    assert_eq!(classifier.classify(&observation)["PostgreSQL"].category, "Database");
}

#[test]
fn fingerprint_table_labels_known_hashes() {
    let table = FingerprintTable::with_labels([("abcd", "curl/8.0")]);
    table.insert("ef01", "Firefox");

    assert_eq!(table.label("abcd"), "curl/8.0");
    assert_eq!(table.label("ef01"), "Firefox");
    assert_eq!(table.label("0000"), "");
}

#[test]
fn default_collaborators_are_local_only() {
    let collaborators = Collaborators::default();
    assert_eq!(collaborators.geolocator.locate("8.8.8.8").unwrap(), None);
    assert!(collaborators.names.resolve("8.8.8.8", true).unwrap().is_empty());
}
