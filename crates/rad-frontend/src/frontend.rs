use crate::merge::{free_ra_iface, merge_ra_interfaces};
use crate::netif::{NetIf, SystemNetIf};
use crate::output::ra_output;
use crate::registry::Registry;
use crate::socket::{Icmp6Socket, RaSocket, Received};
use crate::validate::{describe_iface, validate};
use rad_core::error::{Error, Result};
use rad_core::types::{IfaceConf, PrefixConf, RaOptions, RadConf, MAX_PACKET_SIZE};
use rad_msg::records::{RaIfaceRecord, SendRa};
use rad_msg::{Imsg, ImsgChannel, ImsgType, Record};
use std::io;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// The front-end service: owns the raw socket and the interface registry,
/// talks to the parent over `main` and to the engine once it is handed over.
pub struct Frontend<S: RaSocket = Icmp6Socket, N: NetIf = SystemNetIf> {
    main: ImsgChannel,
    engine: Option<ImsgChannel>,
    socket: Option<S>,
    netif: N,
    conf: RadConf,
    /// Configuration transaction in progress.
    staged: Option<RadConf>,
    registry: Registry,
    running: bool,
}

impl Frontend {
    pub fn new(main: ImsgChannel) -> Self {
        Self::with_netif(main, SystemNetIf)
    }
}

impl<S: RaSocket, N: NetIf> Frontend<S, N> {
    pub fn with_netif(main: ImsgChannel, netif: N) -> Self {
        Self {
            main,
            engine: None,
            socket: None,
            netif,
            conf: RadConf::default(),
            staged: None,
            registry: Registry::new(),
            running: false,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn conf(&self) -> &RadConf {
        &self.conf
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn socket(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    /// Install the raw socket directly instead of receiving it from main.
    pub fn set_socket(&mut self, socket: S) {
        self.socket = Some(socket);
    }

    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!("frontend started");
        let result = self.event_loop(shutdown).await;
        if let Err(ref e) = result {
            error!("frontend: {e}");
        }
        self.shutdown().await;
        Ok(result?)
    }

    async fn event_loop(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];

        loop {
            tokio::select! {
                msg = self.main.recv() => match msg? {
                    Some(imsg) => self.dispatch_main(imsg)?,
                    None => {
                        info!("main channel closed");
                        return Ok(());
                    }
                },
                msg = recv_engine(self.engine.as_mut()) => match msg? {
                    Some(imsg) => self.dispatch_engine(imsg)?,
                    None => {
                        info!("engine channel closed");
                        return Ok(());
                    }
                },
                rx = recv_icmp6(self.socket.as_ref(), self.running, &mut buf) => match rx {
                    Ok(rx) => {
                        let n = rx.len.min(buf.len());
                        self.icmp6_receive(&rx, &buf[..n])?;
                    }
                    Err(e) => warn!("recvmsg: {e}"),
                },
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("frontend shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    pub fn dispatch_main(&mut self, imsg: Imsg) -> Result<()> {
        let Some(kind) = imsg.message_type() else {
            debug!("error handling imsg {} from main", imsg.kind);
            return Ok(());
        };

        match kind {
            ImsgType::SocketIpc => {
                if self.engine.is_some() {
                    warn!("received unexpected engine channel");
                    return Ok(());
                }
                let Some(fd) = imsg.fd else {
                    warn!("expected an engine channel descriptor, got none");
                    return Ok(());
                };
                self.engine = Some(ImsgChannel::from_fd(fd)?);
                debug!("engine channel established");
            }
            ImsgType::ReconfConf => {
                let options = RaOptions::from_bytes(&imsg.data)?;
                if self.staged.is_some() {
                    debug!("discarding unfinished configuration");
                }
                self.staged = Some(RadConf {
                    options,
                    interfaces: Vec::new(),
                });
            }
            ImsgType::ReconfRaIface => {
                let rec = RaIfaceRecord::from_bytes(&imsg.data)?;
                self.staging()?
                    .interfaces
                    .push(IfaceConf::new(&rec.name, rec.options));
            }
            ImsgType::ReconfRaAutoprefix => {
                let rule = PrefixConf::from_bytes(&imsg.data)?;
                self.staged_iface()?.autoprefix = Some(rule);
            }
            ImsgType::ReconfRaPrefix => {
                let prefix = PrefixConf::from_bytes(&imsg.data)?;
                self.staged_iface()?.prefixes.push(prefix);
            }
            ImsgType::ReconfEnd => {
                let conf = self
                    .staged
                    .take()
                    .ok_or_else(|| Error::Ipc("configuration end outside a transaction".into()))?;
                self.commit(conf)?;
            }
            ImsgType::Icmp6Sock => {
                let fd = imsg.fd.ok_or_else(|| {
                    Error::Ipc("expected an ICMPv6 socket descriptor, got none".into())
                })?;
                if self.socket.is_some() {
                    warn!("received unexpected ICMPv6 socket");
                    return Ok(());
                }
                self.socket = Some(S::from_fd(fd)?);
                debug!("ICMPv6 socket received");
            }
            ImsgType::Startup => self.startup()?,
            _ => debug!("error handling imsg {kind:?} from main"),
        }
        Ok(())
    }

    pub fn dispatch_engine(&mut self, imsg: Imsg) -> Result<()> {
        match imsg.message_type() {
            Some(ImsgType::SendRa) => {
                let req = SendRa::from_bytes(&imsg.data)?;
                let Some(iface) = self.registry.find_by_index(req.if_index) else {
                    debug!("send request for unknown interface index {}", req.if_index);
                    return Ok(());
                };
                match self.socket.as_ref() {
                    Some(sock) => ra_output(sock, iface, &req.to),
                    None => debug!("no socket, dropping send request for {}", iface.name),
                }
            }
            _ => debug!("error handling imsg {} from engine", imsg.kind),
        }
        Ok(())
    }

    /// Validate one datagram and queue it for the engine.
    pub fn icmp6_receive(&mut self, rx: &Received, data: &[u8]) -> Result<()> {
        let rec = match validate(rx, data) {
            Ok(rec) => rec,
            Err(reason) => {
                warn!(
                    "dropping RA or RS from {} on {}: {reason}",
                    rx.from.ip(),
                    describe_iface(&self.registry, rx.meta.if_index)
                );
                return Ok(());
            }
        };

        debug!(
            "RA or RS from {} on {}",
            rec.from.ip(),
            describe_iface(&self.registry, Some(rec.if_index))
        );
        match self.engine.as_mut() {
            Some(engine) if engine.is_full() => {
                warn!("engine is not keeping up, dropping datagram from {}", rec.from.ip());
                Ok(())
            }
            Some(engine) => engine.queue_record(ImsgType::RaRs, &rec),
            None => {
                debug!("no engine channel yet, dropping datagram");
                Ok(())
            }
        }
    }

    /// Wait until both channels have written everything queued.
    pub async fn flush(&mut self) -> Result<()> {
        self.main.flush().await?;
        if let Some(engine) = self.engine.as_mut() {
            engine.flush().await?;
        }
        Ok(())
    }

    fn commit(&mut self, conf: RadConf) -> Result<()> {
        let sock = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::Ipc("configuration received before the ICMPv6 socket".into()))?;
        info!("applying configuration with {} interface(s)", conf.interfaces.len());
        merge_ra_interfaces(&mut self.registry, &conf, sock, &self.netif)?;
        self.conf = conf;
        Ok(())
    }

    fn startup(&mut self) -> Result<()> {
        if self.socket.is_none() {
            return Err(Error::Ipc(
                "did not receive an ICMPv6 socket from the main process".into(),
            ));
        }
        self.running = true;
        info!("frontend listening on {} interface(s)", self.registry.len());
        self.main.queue(Imsg::empty(ImsgType::StartupDone))
    }

    fn staging(&mut self) -> Result<&mut RadConf> {
        self.staged
            .as_mut()
            .ok_or_else(|| Error::Ipc("configuration record outside a transaction".into()))
    }

    fn staged_iface(&mut self) -> Result<&mut IfaceConf> {
        self.staging()?
            .interfaces
            .last_mut()
            .ok_or_else(|| Error::Ipc("prefix record before any interface record".into()))
    }

    /// Leave every group and close both channels.
    pub async fn shutdown(&mut self) {
        self.running = false;
        for iface in self.registry.drain() {
            if let Some(sock) = self.socket.as_ref() {
                if let Err(e) = free_ra_iface(sock, iface) {
                    warn!("{e}");
                }
            }
        }
        if let Some(mut engine) = self.engine.take() {
            if let Err(e) = engine.shutdown().await {
                debug!("closing engine channel: {e}");
            }
        }
        if let Err(e) = self.main.shutdown().await {
            debug!("closing main channel: {e}");
        }
        info!("frontend exiting");
    }
}

async fn recv_engine(chan: Option<&mut ImsgChannel>) -> Result<Option<Imsg>> {
    match chan {
        Some(chan) => chan.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_icmp6<S: RaSocket>(
    sock: Option<&S>,
    running: bool,
    buf: &mut [u8],
) -> io::Result<Received> {
    match sock {
        Some(sock) if running => sock.recv(buf).await,
        _ => std::future::pending().await,
    }
}
