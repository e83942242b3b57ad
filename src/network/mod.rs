//! Network subsystem for UDP block transport

pub mod udp;
pub mod sender;
pub mod receiver;

pub use udp::{create_socket, SocketOptions, UdpSocket};
pub use sender::{FrameSender, SenderStats};
pub use receiver::{FrameReceiver, ReceiverStats};
