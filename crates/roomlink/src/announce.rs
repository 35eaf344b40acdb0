//! Join URL announcement
//!
//! At startup the server logs a URL people on the same network can open to
//! join a room.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use url::Url;

use crate::config::ServerConfig;

/// Name suggested in announced join URLs
const ANNOUNCE_NAME: &str = "User";

/// Best-effort address of this machine on the local network.
///
/// Connecting a UDP socket sends no packets; it only makes the OS pick the
/// outbound interface.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Build the shareable join URL for `room`
pub fn join_url(host: &str, port: u16, room: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("http://{}:{}/", host, port))?;
    url.query_pairs_mut()
        .append_pair("room", room)
        .append_pair("name", ANNOUNCE_NAME);
    Ok(url)
}

/// Join URL for the configured announce room
pub fn announce_url(config: &ServerConfig) -> Result<Url, url::ParseError> {
    let host = config
        .public_host
        .clone()
        .unwrap_or_else(|| local_ip().to_string());
    join_url(&host, config.port, &config.announce_room)
}
