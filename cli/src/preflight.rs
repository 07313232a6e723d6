// SPDX-License-Identifier: MIT OR Apache-2.0

//! Port checks printed before hosting or searching

use lanlink_network::port::{is_port_available, is_udp_port_available};

/// Warning for a session port that another process already holds
pub fn host_port_warning(port: u16) -> Option<String> {
    if port == 0 || is_port_available(port) {
        return None;
    }
    Some(format!(
        "TCP port {} is already in use, hosting will probably fail",
        port
    ))
}

/// Warning for a discovery port that another process already holds
pub fn search_port_warning(port: u16) -> Option<String> {
    if port == 0 || is_udp_port_available(port) {
        return None;
    }
    Some(format!(
        "UDP port {} is already in use, searching only works if its owner allows sharing",
        port
    ))
}
