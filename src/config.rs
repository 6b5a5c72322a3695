use std::{net::IpAddr, time::Duration};

use clap::{Parser, builder::RangedU64ValueParser};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::{
    handler::Mode,
    models::token::PeerToken,
    utils::{
        rtc::{parse_ice_server, stun_url},
        ws::signaling_url,
    },
};

#[derive(Debug, Parser)]
#[clap(about = "Data channel client over a websocket signaling relay")]
pub(crate) struct Args {
    #[clap(env, long, short = 'w', default_value = "localhost")]
    pub(crate) signaling_host: String,
    #[clap(env, long, short = 'x', default_value_t = 8000)]
    pub(crate) signaling_port: u16,
    #[clap(env, long, short = 's', default_value = "stun.l.google.com")]
    pub(crate) stun_server: String,
    #[clap(env, long, short = 't', default_value_t = 19302)]
    pub(crate) stun_port: u16,
    #[clap(env, long, short = 'n', default_value_t = false)]
    pub(crate) no_stun: bool,
    #[clap(env, long, value_parser = parse_ice_server, value_delimiter = ',')]
    pub(crate) ice_servers: Vec<RTCIceServer>,
    /// Echo data channel messages back instead of printing them
    #[clap(env, long, short = 'e', default_value_t = false)]
    pub(crate) echo: bool,
    /// Only signal local candidates with this address
    #[clap(env, long)]
    pub(crate) ip_restriction: Option<IpAddr>,
    #[clap(env, long, default_value_t = 4, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub(crate) token_length: usize,
    /// Drop sessions that have not connected within this time
    #[clap(env, long, value_parser = humantime::parse_duration)]
    pub(crate) session_timeout: Option<Duration>,
    #[clap(env, long, value_parser = humantime::parse_duration, default_value = "10s")]
    pub(crate) check_interval: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) local_token: PeerToken,
    pub(crate) signaling_url: String,
    pub(crate) stun_url: Option<String>,
    pub(crate) ice_servers: Vec<RTCIceServer>,
    pub(crate) mode: Mode,
    pub(crate) ip_restriction: Option<IpAddr>,
    pub(crate) session_timeout: Option<Duration>,
    pub(crate) check_interval: Duration,
}

impl Args {
    pub(crate) fn into_config(self, local_token: PeerToken) -> Config {
        let stun = (!self.no_stun).then(|| stun_url(&self.stun_server, self.stun_port));
        let mut ice_servers = Vec::with_capacity(self.ice_servers.len() + 1);
        if let Some(url) = &stun {
            ice_servers.push(RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            });
        }
        ice_servers.extend(self.ice_servers);
        Config {
            signaling_url: signaling_url(&self.signaling_host, self.signaling_port, &local_token),
            local_token,
            stun_url: stun,
            ice_servers,
            mode: if self.echo { Mode::Echo } else { Mode::Print },
            ip_restriction: self.ip_restriction,
            session_timeout: self.session_timeout,
            check_interval: self.check_interval,
        }
    }
}
