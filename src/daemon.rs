use crate::backend::NokhwaBackend;
use crate::canvas::{output_path, FileCanvas};
use crate::config::RenderConfig;
use crate::device::Platform;
use crate::ipc::ControlMessage;
use crate::model::{self, ModelOptions, SegmentationModel};
use crate::session::{Request, Session};
use std::fs;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::time::Duration;
use tracing::{debug, error, info, trace};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options given on the command line for a run.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub image: Option<PathBuf>,
    pub user_agent: Option<String>,
}

pub fn run_daemon(cfg: RenderConfig, opts: RunOptions) {
    info!("daemon started");
    debug!(strategy = ?cfg.estimate, camera = ?cfg.camera, "loaded configuration");

    let platform = match opts.user_agent {
        Some(ua) => Platform::from_user_agent(ua),
        None => Platform::detect(),
    };
    let output = cfg.output.clone().unwrap_or_else(output_path);
    info!(path = %output.display(), "rendering to file");

    let mut session = Session::new(
        cfg,
        Box::new(NokhwaBackend::default()),
        Box::new(|options: &ModelOptions| {
            model::load(options).map(|m| Box::new(m) as Box<dyn SegmentationModel>)
        }),
        Box::new(FileCanvas::new(output)),
        platform,
    );
    if let Err(e) = session.bind(opts.image.as_deref()) {
        error!("{e}");
        return;
    }

    let sock_path = crate::ipc::socket_path();
    if fs::remove_file(&sock_path).is_ok() {
        trace!(path = %sock_path.display(), "removed stale socket");
    }
    let listener = match UnixListener::bind(&sock_path) {
        Ok(l) => {
            debug!(path = %sock_path.display(), "socket bound");
            l
        }
        Err(e) => {
            error!("failed to bind socket: {e}");
            return;
        }
    };

    let (tx, rx) = mpsc::channel();
    debug!("starting IPC thread");
    std::thread::spawn(move || serve(listener, tx));

    session.run(rx);
    let _ = fs::remove_file(&sock_path);
}

/// Forwards decoded control messages to the session thread.
pub(crate) fn serve(listener: UnixListener, requests: Sender<Request>) {
    for stream in listener.incoming() {
        match stream {
            Ok(mut s) => {
                debug!("connection accepted");
                let msg = match serde_json::from_reader::<_, ControlMessage>(&mut s) {
                    Ok(msg) => msg,
                    Err(e) => {
                        error!("invalid control message: {e}");
                        continue;
                    }
                };
                debug!(?msg, "received message");
                let stop = msg == ControlMessage::Stop;
                let (reply_tx, reply_rx) = mpsc::channel();
                let reply = msg.expects_reply().then_some(reply_tx);
                if requests
                    .send(Request {
                        message: msg,
                        reply,
                    })
                    .is_err()
                {
                    debug!("session gone, closing IPC thread");
                    return;
                }
                if let Ok(text) = reply_rx.recv_timeout(REPLY_TIMEOUT) {
                    let _ = s.write_all(text.as_bytes());
                }
                if stop {
                    return;
                }
            }
            Err(e) => error!("failed to accept connection: {e}"),
        }
    }
}
