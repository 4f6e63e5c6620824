//! controller side of the offload path: one datagram out, one back,
//! both exactly one snapshot long. loss is not handled here; the
//! controller blocks and a watchdog above owns the stall.

use crate::mpc::Snapshot;
use anyhow::Context;
use std::net::IpAddr;
use std::net::UdpSocket;

pub struct Endpoint {
    socket: UdpSocket,
}

impl Endpoint {
    pub fn connect(server: &str, port: u16) -> anyhow::Result<Self> {
        let ip: IpAddr = server
            .parse()
            .with_context(|| format!("invalid solver address {}", server))?;
        let socket = UdpSocket::bind(("0.0.0.0", 0)).context("binding client socket")?;
        socket
            .connect((ip, port))
            .with_context(|| format!("connecting to solver {}:{}", ip, port))?;
        Ok(Self { socket })
    }

    /// delegate one solve: ship the snapshot, block for the reply,
    /// overwrite the snapshot in place
    pub fn exchange(&self, st: &mut Snapshot) -> anyhow::Result<()> {
        let out = st.encode();
        self.socket.send(&out).context("sending snapshot")?;
        let mut reply = vec![0u8; out.len()];
        let got = loop {
            match self.socket.recv(&mut reply) {
                Ok(got) => break got,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("receiving snapshot"),
            }
        };
        st.decode(&reply[..got])
    }

    /// bound the blocking receive; only scenarios that cannot afford a
    /// stall (and tests) use this
    pub fn set_timeout(&self, timeout: Option<std::time::Duration>) -> anyhow::Result<()> {
        self.socket
            .set_read_timeout(timeout)
            .context("setting receive timeout")
    }
}
