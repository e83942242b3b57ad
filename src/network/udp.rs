//! UDP socket setup
//!
//! Sockets are built with socket2 so buffer sizes, address reuse and the
//! multicast membership are set before the socket is handed to tokio.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::config::NetworkConfig;
use crate::constants::SOCKET_BUFFER_FLOOR_RATE;
use crate::error::NetworkError;

pub use tokio::net::UdpSocket;

/// Receive buffer holding 250 ms of a stream at `sample_rate`
///
/// Rates below 96 kS/s are sized as 96 kS/s.
pub fn recv_buffer_size(sample_rate: u32, sample_bytes: usize) -> usize {
    let rate = sample_rate.max(SOCKET_BUFFER_FLOOR_RATE) as usize;
    rate * 2 * sample_bytes / 4
}

/// Options for [`create_socket`]
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    pub send_buffer_size: Option<usize>,
    pub recv_buffer_size: Option<usize>,
    /// Group to join on all interfaces
    pub multicast_group: Option<Ipv4Addr>,
    pub reuse_address: bool,
}

/// Create a non-blocking UDP socket bound to `bind_addr`
///
/// Must be called from within a tokio runtime.
pub fn create_socket(bind_addr: SocketAddr, options: &SocketOptions) -> Result<UdpSocket, NetworkError> {
    let domain = if bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if options.reuse_address {
        socket
            .set_reuse_address(true)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    }

    if let Some(size) = options.send_buffer_size {
        if let Err(e) = socket.set_send_buffer_size(size) {
            tracing::warn!("Cannot set send buffer to {} bytes: {}", size, e);
        }
    }

    if let Some(size) = options.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::warn!("Cannot set receive buffer to {} bytes: {}", size, e);
        }
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&SockAddr::from(bind_addr))
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

    if let Some(group) = options.multicast_group {
        socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| NetworkError::MulticastJoinFailed(format!("{}: {}", group, e)))?;
        tracing::info!("Joined multicast group {}", group);
    }

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|e| NetworkError::BindFailed(e.to_string()))
}

/// Socket for the receive side of `config`
///
/// With multicast the socket binds the unspecified address on the data port
/// and joins the group; otherwise it binds the data address.
pub fn create_receive_socket(
    config: &NetworkConfig,
    recv_buffer_size: usize,
) -> Result<UdpSocket, NetworkError> {
    let group = config.multicast_group()?;
    let bind_addr = match group {
        Some(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.data_port),
        None => config.data_socket_addr()?,
    };

    let options = SocketOptions {
        send_buffer_size: None,
        recv_buffer_size: Some(config.recv_buffer_size.unwrap_or(recv_buffer_size)),
        multicast_group: group,
        reuse_address: true,
    };

    create_socket(bind_addr, &options)
}

/// Socket for the send side of `config`, bound to an ephemeral port
pub fn create_send_socket(config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let destination = config.destination()?;
    let bind_addr = match destination.ip() {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
    };

    let options = SocketOptions {
        send_buffer_size: config.send_buffer_size,
        ..Default::default()
    };

    create_socket(bind_addr, &options)
}
