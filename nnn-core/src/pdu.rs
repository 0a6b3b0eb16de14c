use std::fmt;
use std::time::Duration;

use crate::name::{Name, SharedName};
use crate::tlv::{self, TlvElement, TlvError, TlvReader};

/// TLV type constants for PDUs
pub mod tlv_types {
    pub const NULLP: u8 = 0x00;
    pub const SO: u8 = 0x01;
    pub const DO: u8 = 0x02;
    pub const EN: u8 = 0x03;
    pub const AEN: u8 = 0x04;
    pub const REN: u8 = 0x05;
    pub const DEN: u8 = 0x06;
    pub const INF: u8 = 0x07;
    pub const DU: u8 = 0x08;

    pub const NAME: u8 = 0x10;
    pub const NAME_COMPONENT: u8 = 0x11;
    pub const SRC_NAME: u8 = 0x12;
    pub const DST_NAME: u8 = 0x13;
    pub const OLD_NAME: u8 = 0x14;
    pub const NEW_NAME: u8 = 0x15;
    pub const POA: u8 = 0x16;
    pub const LEASE: u8 = 0x17;
    pub const PAYLOAD: u8 = 0x18;

    pub const VERSION: u8 = 0x20;
    pub const LIFETIME: u8 = 0x21;
}

pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(2);
pub const PROTOCOL_VERSION: u8 = 1;

/// PDU type tag, one per handler of the forwarding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PduKind {
    /// Solicitation (SO)
    So,
    /// Data object (DO)
    Do,
    /// No-op keepalive (NULLp)
    Null,
    /// Name enrollment (EN)
    En,
    /// Acknowledged enrollment (AEN)
    Aen,
    /// Request (re-)enrollment (REN)
    Ren,
    /// Denied enrollment (DEN)
    Den,
    /// Information / rename (INF)
    Inf,
    /// Data unit (DU)
    Du,
}

impl PduKind {
    pub const ALL: [PduKind; 9] = [
        PduKind::So,
        PduKind::Do,
        PduKind::Null,
        PduKind::En,
        PduKind::Aen,
        PduKind::Ren,
        PduKind::Den,
        PduKind::Inf,
        PduKind::Du,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PduKind::So => "SO",
            PduKind::Do => "DO",
            PduKind::Null => "NULLp",
            PduKind::En => "EN",
            PduKind::Aen => "AEN",
            PduKind::Ren => "REN",
            PduKind::Den => "DEN",
            PduKind::Inf => "INF",
            PduKind::Du => "DU",
        }
    }

    fn tlv_type(self) -> u8 {
        match self {
            PduKind::So => tlv_types::SO,
            PduKind::Do => tlv_types::DO,
            PduKind::Null => tlv_types::NULLP,
            PduKind::En => tlv_types::EN,
            PduKind::Aen => tlv_types::AEN,
            PduKind::Ren => tlv_types::REN,
            PduKind::Den => tlv_types::DEN,
            PduKind::Inf => tlv_types::INF,
            PduKind::Du => tlv_types::DU,
        }
    }

    fn from_tlv_type(type_: u8) -> Option<Self> {
        PduKind::ALL.into_iter().find(|kind| kind.tlv_type() == type_)
    }
}

impl fmt::Display for PduKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub version: u8,
    pub lifetime: Duration,
}

impl Default for PduHeader {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            lifetime: DEFAULT_LIFETIME,
        }
    }
}

/// Solicitation: carries only the source name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solicitation {
    pub header: PduHeader,
    pub src: SharedName,
    pub payload: Vec<u8>,
}

/// Data object: carries only the destination name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataObject {
    pub header: PduHeader,
    pub dst: SharedName,
    pub payload: Vec<u8>,
}

/// Data unit: carries both source and destination names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUnit {
    pub header: PduHeader,
    pub src: SharedName,
    pub dst: SharedName,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NullPdu {
    pub header: PduHeader,
    pub payload: Vec<u8>,
}

/// Enrollment request, listing the sender's points of attachment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Enrollment {
    pub header: PduHeader,
    pub poas: Vec<Vec<u8>>,
}

/// Enrollment accepted: the leased name and how long the lease lasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEnrollment {
    pub header: PduHeader,
    pub name: SharedName,
    pub lease: Duration,
}

/// Enrollment renewal from a node that already holds `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnrollment {
    pub header: PduHeader,
    pub name: SharedName,
    pub poas: Vec<Vec<u8>>,
    pub remaining_lease: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedEnrollment {
    pub header: PduHeader,
    pub name: SharedName,
}

/// Rename notice: `old_name` is now reachable as `new_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub header: PduHeader,
    pub old_name: SharedName,
    pub new_name: SharedName,
    pub remaining_lease: Duration,
}

impl Solicitation {
    pub fn new(src: SharedName, payload: Vec<u8>) -> Self {
        Self {
            header: PduHeader::default(),
            src,
            payload,
        }
    }
}

impl DataObject {
    pub fn new(dst: SharedName, payload: Vec<u8>) -> Self {
        Self {
            header: PduHeader::default(),
            dst,
            payload,
        }
    }
}

impl DataUnit {
    pub fn new(src: SharedName, dst: SharedName, payload: Vec<u8>) -> Self {
        Self {
            header: PduHeader::default(),
            src,
            dst,
            payload,
        }
    }
}

impl Rename {
    pub fn new(old_name: SharedName, new_name: SharedName, remaining_lease: Duration) -> Self {
        Self {
            header: PduHeader::default(),
            old_name,
            new_name,
            remaining_lease,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    So(Solicitation),
    Do(DataObject),
    Null(NullPdu),
    En(Enrollment),
    Aen(AckEnrollment),
    Ren(RequestEnrollment),
    Den(DeniedEnrollment),
    Inf(Rename),
    Du(DataUnit),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PduError {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),
    #[error("Unknown PDU type: {0:#04x}")]
    UnknownType(u8),
}

impl Pdu {
    pub fn kind(&self) -> PduKind {
        match self {
            Pdu::So(_) => PduKind::So,
            Pdu::Do(_) => PduKind::Do,
            Pdu::Null(_) => PduKind::Null,
            Pdu::En(_) => PduKind::En,
            Pdu::Aen(_) => PduKind::Aen,
            Pdu::Ren(_) => PduKind::Ren,
            Pdu::Den(_) => PduKind::Den,
            Pdu::Inf(_) => PduKind::Inf,
            Pdu::Du(_) => PduKind::Du,
        }
    }

    pub fn header(&self) -> &PduHeader {
        match self {
            Pdu::So(p) => &p.header,
            Pdu::Do(p) => &p.header,
            Pdu::Null(p) => &p.header,
            Pdu::En(p) => &p.header,
            Pdu::Aen(p) => &p.header,
            Pdu::Ren(p) => &p.header,
            Pdu::Den(p) => &p.header,
            Pdu::Inf(p) => &p.header,
            Pdu::Du(p) => &p.header,
        }
    }

    /// Name the PDU is addressed to, for the kinds that carry one.
    pub fn destination(&self) -> Option<&SharedName> {
        match self {
            Pdu::Do(p) => Some(&p.dst),
            Pdu::Du(p) => Some(&p.dst),
            _ => None,
        }
    }

    /// Readdress a DO or DU. Other kinds are left untouched and `false` is returned.
    pub fn set_destination(&mut self, dst: SharedName) -> bool {
        match self {
            Pdu::Do(p) => p.dst = dst,
            Pdu::Du(p) => p.dst = dst,
            _ => return false,
        }
        true
    }

    /// Encode the PDU to its transportable TLV form.
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header();
        let mut value = Vec::new();
        TlvElement::new(tlv_types::VERSION, vec![header.version]).encode_to(&mut value);
        encode_duration(tlv_types::LIFETIME, header.lifetime, &mut value);

        match self {
            Pdu::So(p) => {
                encode_name(tlv_types::SRC_NAME, &p.src, &mut value);
                encode_payload(&p.payload, &mut value);
            }
            Pdu::Do(p) => {
                encode_name(tlv_types::DST_NAME, &p.dst, &mut value);
                encode_payload(&p.payload, &mut value);
            }
            Pdu::Du(p) => {
                encode_name(tlv_types::SRC_NAME, &p.src, &mut value);
                encode_name(tlv_types::DST_NAME, &p.dst, &mut value);
                encode_payload(&p.payload, &mut value);
            }
            Pdu::Null(p) => encode_payload(&p.payload, &mut value),
            Pdu::En(p) => encode_poas(&p.poas, &mut value),
            Pdu::Aen(p) => {
                encode_name(tlv_types::NAME, &p.name, &mut value);
                encode_duration(tlv_types::LEASE, p.lease, &mut value);
            }
            Pdu::Ren(p) => {
                encode_name(tlv_types::NAME, &p.name, &mut value);
                encode_poas(&p.poas, &mut value);
                encode_duration(tlv_types::LEASE, p.remaining_lease, &mut value);
            }
            Pdu::Den(p) => encode_name(tlv_types::NAME, &p.name, &mut value),
            Pdu::Inf(p) => {
                encode_name(tlv_types::OLD_NAME, &p.old_name, &mut value);
                encode_name(tlv_types::NEW_NAME, &p.new_name, &mut value);
                encode_duration(tlv_types::LEASE, p.remaining_lease, &mut value);
            }
        }

        TlvElement::new(self.kind().tlv_type(), value).encode()
    }

    /// Decode a PDU from its transportable TLV form.
    pub fn decode(data: &[u8]) -> Result<Self, PduError> {
        let (element, consumed) = TlvElement::decode(data)?;
        if consumed != data.len() {
            return Err(TlvError::TrailingBytes(data.len() - consumed).into());
        }
        let kind = PduKind::from_tlv_type(element.type_)
            .ok_or(PduError::UnknownType(element.type_))?;

        let mut reader = TlvReader::new(&element.value);
        let version = match reader.expect(tlv_types::VERSION)?.as_slice() {
            [version] => *version,
            other => return Err(TlvError::InvalidInteger(other.len()).into()),
        };
        let header = PduHeader {
            version,
            lifetime: decode_duration(&mut reader, tlv_types::LIFETIME)?,
        };

        let pdu = match kind {
            PduKind::So => Pdu::So(Solicitation {
                header,
                src: decode_name(&mut reader, tlv_types::SRC_NAME)?,
                payload: reader.expect(tlv_types::PAYLOAD)?,
            }),
            PduKind::Do => Pdu::Do(DataObject {
                header,
                dst: decode_name(&mut reader, tlv_types::DST_NAME)?,
                payload: reader.expect(tlv_types::PAYLOAD)?,
            }),
            PduKind::Du => Pdu::Du(DataUnit {
                header,
                src: decode_name(&mut reader, tlv_types::SRC_NAME)?,
                dst: decode_name(&mut reader, tlv_types::DST_NAME)?,
                payload: reader.expect(tlv_types::PAYLOAD)?,
            }),
            PduKind::Null => Pdu::Null(NullPdu {
                header,
                payload: reader.expect(tlv_types::PAYLOAD)?,
            }),
            PduKind::En => Pdu::En(Enrollment {
                header,
                poas: reader.repeated(tlv_types::POA)?,
            }),
            PduKind::Aen => Pdu::Aen(AckEnrollment {
                header,
                name: decode_name(&mut reader, tlv_types::NAME)?,
                lease: decode_duration(&mut reader, tlv_types::LEASE)?,
            }),
            PduKind::Ren => Pdu::Ren(RequestEnrollment {
                header,
                name: decode_name(&mut reader, tlv_types::NAME)?,
                poas: reader.repeated(tlv_types::POA)?,
                remaining_lease: decode_duration(&mut reader, tlv_types::LEASE)?,
            }),
            PduKind::Den => Pdu::Den(DeniedEnrollment {
                header,
                name: decode_name(&mut reader, tlv_types::NAME)?,
            }),
            PduKind::Inf => Pdu::Inf(Rename {
                header,
                old_name: decode_name(&mut reader, tlv_types::OLD_NAME)?,
                new_name: decode_name(&mut reader, tlv_types::NEW_NAME)?,
                remaining_lease: decode_duration(&mut reader, tlv_types::LEASE)?,
            }),
        };
        Ok(pdu)
    }
}

fn encode_name(type_: u8, name: &Name, buffer: &mut Vec<u8>) {
    tlv::encode_name(type_, tlv_types::NAME_COMPONENT, name, buffer);
}

fn decode_name(reader: &mut TlvReader<'_>, type_: u8) -> Result<SharedName, TlvError> {
    let value = reader.expect(type_)?;
    Ok(tlv::decode_name(&value, tlv_types::NAME_COMPONENT)?.into_shared())
}

fn encode_payload(payload: &[u8], buffer: &mut Vec<u8>) {
    TlvElement::new(tlv_types::PAYLOAD, payload.to_vec()).encode_to(buffer);
}

fn encode_poas(poas: &[Vec<u8>], buffer: &mut Vec<u8>) {
    for poa in poas {
        TlvElement::new(tlv_types::POA, poa.clone()).encode_to(buffer);
    }
}

// Durations travel as nanoseconds, saturating at about 584 years.
fn encode_duration(type_: u8, duration: Duration, buffer: &mut Vec<u8>) {
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    TlvElement::new(type_, tlv::encode_integer(nanos)).encode_to(buffer);
}

fn decode_duration(reader: &mut TlvReader<'_>, type_: u8) -> Result<Duration, TlvError> {
    let value = reader.expect(type_)?;
    Ok(Duration::from_nanos(tlv::decode_integer(&value)?))
}

macro_rules! impl_from_pdu {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Pdu {
                fn from(pdu: $ty) -> Self {
                    Pdu::$variant(pdu)
                }
            }
        )+
    };
}

impl_from_pdu! {
    So => Solicitation,
    Do => DataObject,
    Null => NullPdu,
    En => Enrollment,
    Aen => AckEnrollment,
    Ren => RequestEnrollment,
    Den => DeniedEnrollment,
    Inf => Rename,
    Du => DataUnit,
}

impl fmt::Display for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pdu::So(p) => write!(f, "SO src={}", p.src),
            Pdu::Do(p) => write!(f, "DO dst={}", p.dst),
            Pdu::Du(p) => write!(f, "DU src={} dst={}", p.src, p.dst),
            Pdu::Null(_) => f.write_str("NULLp"),
            Pdu::En(p) => write!(f, "EN poas={}", p.poas.len()),
            Pdu::Aen(p) => write!(f, "AEN name={} lease={:?}", p.name, p.lease),
            Pdu::Ren(p) => write!(f, "REN name={} lease={:?}", p.name, p.remaining_lease),
            Pdu::Den(p) => write!(f, "DEN name={}", p.name),
            Pdu::Inf(p) => write!(
                f,
                "INF old={} new={} lease={:?}",
                p.old_name, p.new_name, p.remaining_lease
            ),
        }
    }
}
