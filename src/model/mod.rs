/// Domain types: packets, protocol payloads, probe requests/confirmations,
/// and the assembled events the matchers produce.
pub mod event;
pub mod packet;
pub mod probe;
pub mod protocols;

pub use event::Event;
pub use packet::{EventKey, Packet, RetransmitSignature};
pub use probe::{ProbeConfirmation, ProbeKey, ProbeRequest};
pub use protocols::{IcmpPayload, Protocol, TcpFlags, TcpPayload, UdpPayload};
