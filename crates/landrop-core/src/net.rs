//! 本机局域网地址

use std::net::{IpAddr, UdpSocket};

/// 只用于选路，不会真的发包
const PROBE_ADDR: &str = "8.8.8.8:80";

/// 出站流量所用网卡的地址，探测失败时返回 `"localhost"`
pub fn local_ip() -> String {
    probe_local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string())
}

fn probe_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(PROBE_ADDR).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// 浏览器访问地址
pub fn share_url(port: u16) -> String {
    format!("http://{}:{}", local_ip(), port)
}
