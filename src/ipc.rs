use crate::model::Architecture;
use crate::render::RenderStrategy;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::{env, io};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ControlMessage {
    SwitchCamera(Option<String>),
    SetArchitecture(Architecture),
    SetStrategy(RenderStrategy),
    Pause,
    Resume,
    Stop,
    Status,
}

impl ControlMessage {
    /// Whether the daemon writes a reply before closing the connection.
    pub fn expects_reply(&self) -> bool {
        matches!(self, ControlMessage::Status)
    }
}

pub fn socket_path() -> PathBuf {
    if let Some(path) = env::var_os("SEGCAM_SOCKET") {
        return PathBuf::from(path);
    }
    env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join("segcam.sock")
}

pub fn send_command(msg: ControlMessage) -> io::Result<Option<String>> {
    let path = socket_path();
    let mut stream = UnixStream::connect(&path)?;
    serde_json::to_writer(&mut stream, &msg)?;
    stream.flush()?;
    let _ = stream.shutdown(Shutdown::Write);

    if msg.expects_reply() {
        let mut buf = String::new();
        stream.read_to_string(&mut buf)?;
        Ok(Some(buf))
    } else {
        Ok(None)
    }
}
