use super::NameResolver;
use crate::error::ResolveError;
use crate::observation::{Observation, Transport};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, trace};

const DNS_PORT: u16 = 53;
const QR_FLAG: u16 = 0x8000;
const TYPE_A: u16 = 1;
const TYPE_AAAA: u16 = 28;
const CLASS_IN: u16 = 1;
const MAX_POINTER_HOPS: usize = 16;

/// Name table built from DNS answers seen on the wire.
///
/// Only local data is ever consulted: a request for networked resolution
/// is answered from the same table.
#[derive(Default)]
pub struct PassiveDns {
    names: RwLock<HashMap<IpAddr, Vec<String>>>,
}

impl PassiveDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ip: IpAddr, name: impl Into<String>) {
        add_name_resolution(ip, name.into(), &mut self.names.write());
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }

    pub fn names_for(&self, ip: &IpAddr) -> Vec<String> {
        self.names.read().get(ip).cloned().unwrap_or_default()
    }
}

impl NameResolver for PassiveDns {
    fn resolve(&self, address: &str, local_only: bool) -> Result<Vec<String>, ResolveError> {
        let ip: IpAddr = address
            .parse()
            .map_err(|err| ResolveError::new("passive-dns", format!("{address}: {err}")))?;
        if !local_only {
            trace!(address, "No upstream resolver configured; answering from passive table");
        }
        Ok(self.names_for(&ip))
    }

    fn observe(&self, observation: &Observation) {
        let Some(flow) = observation.flow else {
            return;
        };
        if flow.transport != Transport::UDP {
            return;
        }
        if flow.src_port != DNS_PORT && flow.dst_port != DNS_PORT {
            return;
        }

        let answers = parse_dns_answers(&observation.payload);
        if answers.is_empty() {
            return;
        }
        let mut names = self.names.write();
        for (ip, name) in answers {
            add_name_resolution(ip, name, &mut names);
        }
    }
}

pub(crate) fn parse_dns_answers(payload: &[u8]) -> Vec<(IpAddr, String)> {
    let mut answers = Vec::new();
    let mut message = Message {
        bytes: payload,
        pos: 0,
    };
    // Answers read before a truncation are kept.
    let _ = read_answers(&mut message, &mut answers);
    answers
}

fn read_answers(message: &mut Message<'_>, out: &mut Vec<(IpAddr, String)>) -> Option<()> {
    message.skip(2)?; // id
    if message.u16()? & QR_FLAG == 0 {
        return None;
    }
    let questions = message.u16()?;
    let answers = message.u16()?;
    message.skip(4)?; // authority and additional counts

    for _ in 0..questions {
        message.name()?;
        message.skip(4)?; // type, class
    }

    for _ in 0..answers {
        let name = message.name()?;
        let rtype = message.u16()?;
        let class = message.u16()?;
        message.skip(4)?; // ttl
        let rdlength = message.u16()? as usize;
        let rdata = message.take(rdlength)?;
        if class != CLASS_IN {
            continue;
        }

        let ip = match rtype {
            TYPE_A => <[u8; 4]>::try_from(rdata).ok().map(IpAddr::from),
            TYPE_AAAA => <[u8; 16]>::try_from(rdata).ok().map(IpAddr::from),
            _ => None,
        };
        if let Some(ip) = ip {
            out.push((ip, name));
        }
    }
    Some(())
}

/// Cursor over one DNS message. Every read is bounds-checked and yields
/// `None` past the end.
struct Message<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Message<'a> {
    fn u16(&mut self) -> Option<u16> {
        let raw = self.take(2)?;
        Some(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(slice)
    }

    /// Reads a possibly compressed name. The cursor ends up after the name's
    /// in-place encoding, not after any pointer target.
    fn name(&mut self) -> Option<String> {
        let mut labels: Vec<&[u8]> = Vec::new();
        let mut at = self.pos;
        let mut resume = None;
        let mut hops = 0;

        loop {
            let len = *self.bytes.get(at)? as usize;
            if len == 0 {
                at += 1;
                break;
            }
            if len & 0xc0 == 0xc0 {
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return None;
                }
                let low = *self.bytes.get(at + 1)? as usize;
                resume.get_or_insert(at + 2);
                at = ((len & 0x3f) << 8) | low;
                continue;
            }
            labels.push(self.bytes.get(at + 1..at + 1 + len)?);
            at += 1 + len;
        }

        self.pos = resume.unwrap_or(at);
        let labels: Vec<_> = labels.iter().map(|l| String::from_utf8_lossy(l)).collect();
        Some(labels.join("."))
    }
}

fn add_name_resolution(ip: IpAddr, name: String, names: &mut HashMap<IpAddr, Vec<String>>) {
    let entry = names.entry(ip).or_default();
    let inserted = !entry.iter().any(|existing| existing == &name);
    if inserted {
        entry.push(name);
    }
    debug!(ip = %ip, names = %entry.join(", "), inserted, "Name resolution updated");
}
