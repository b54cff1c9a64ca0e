use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Fixed, well-known channel names. The command channel carries shim -> core
/// frames; the event channel carries core -> shim frames.
pub const CMD_CHANNEL_NAME: &str = "aegis_cmd_v1";
pub const EVT_CHANNEL_NAME: &str = "aegis_evt_v1";

#[cfg(windows)]
pub const CMD_PIPE_PATH: &str = r"\\.\pipe\aegis_cmd_v1";
#[cfg(windows)]
pub const EVT_PIPE_PATH: &str = r"\\.\pipe\aegis_evt_v1";

/// Opens the duplex channel pair for one session. Both channels must open or
/// the attempt fails as a whole; a half-open pair is closed by drop.
pub trait Connector: Send + Sync + 'static {
    type Cmd: AsyncWrite + Unpin + Send;
    type Evt: AsyncRead + Unpin + Send;

    fn connect(&self) -> impl Future<Output = io::Result<(Self::Cmd, Self::Evt)>> + Send;
}

#[cfg(unix)]
pub fn socket_path(channel_name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{channel_name}.sock"))
}

/// Unix dev transport: the channel names map to sockets in the temp dir.
#[cfg(unix)]
#[derive(Debug, Default, Clone)]
pub struct UnixSocketConnector;

#[cfg(unix)]
impl Connector for UnixSocketConnector {
    type Cmd = tokio::net::UnixStream;
    type Evt = tokio::net::UnixStream;

    async fn connect(&self) -> io::Result<(Self::Cmd, Self::Evt)> {
        let cmd = tokio::net::UnixStream::connect(socket_path(CMD_CHANNEL_NAME)).await?;
        let evt = tokio::net::UnixStream::connect(socket_path(EVT_CHANNEL_NAME)).await?;
        Ok((cmd, evt))
    }
}

#[cfg(windows)]
#[derive(Debug, Default, Clone)]
pub struct NamedPipeConnector;

#[cfg(windows)]
impl Connector for NamedPipeConnector {
    type Cmd = tokio::net::windows::named_pipe::NamedPipeClient;
    type Evt = tokio::net::windows::named_pipe::NamedPipeClient;

    async fn connect(&self) -> io::Result<(Self::Cmd, Self::Evt)> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let cmd = ClientOptions::new().read(false).write(true).open(CMD_PIPE_PATH)?;
        let evt = ClientOptions::new().read(true).write(false).open(EVT_PIPE_PATH)?;
        Ok((cmd, evt))
    }
}

#[cfg(windows)]
pub type DefaultConnector = NamedPipeConnector;
#[cfg(unix)]
pub type DefaultConnector = UnixSocketConnector;

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn socket_paths_follow_channel_names() {
        let cmd = socket_path(CMD_CHANNEL_NAME);
        let evt = socket_path(EVT_CHANNEL_NAME);
        assert!(cmd.to_string_lossy().ends_with("aegis_cmd_v1.sock"));
        assert!(evt.to_string_lossy().ends_with("aegis_evt_v1.sock"));
        assert_ne!(cmd, evt);
    }

    #[tokio::test]
    async fn connect_fails_when_event_channel_is_missing() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Only the command socket exists; the pair must fail as a whole and
        // release the half-open command connection.
        let dir = std::env::temp_dir().join(format!("aegis-shim-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cmd_path = dir.join("cmd.sock");
        let _ = std::fs::remove_file(&cmd_path);
        let listener = tokio::net::UnixListener::bind(&cmd_path).unwrap();

        struct HalfConnector {
            cmd_path: std::path::PathBuf,
        }
        impl Connector for HalfConnector {
            type Cmd = tokio::net::UnixStream;
            type Evt = tokio::net::UnixStream;
            async fn connect(&self) -> io::Result<(Self::Cmd, Self::Evt)> {
                let cmd = tokio::net::UnixStream::connect(&self.cmd_path).await?;
                let evt =
                    tokio::net::UnixStream::connect(self.cmd_path.with_extension("missing")).await?;
                Ok((cmd, evt))
            }
        }

        let connector = HalfConnector {
            cmd_path: cmd_path.clone(),
        };
        let accept = tokio::spawn(async move { listener.accept().await });
        assert!(connector.connect().await.is_err());

        // The accepted command side observes the drop as EOF.
        let (mut server_side, _addr) = accept.await.unwrap().unwrap();
        server_side.writable().await.unwrap();
        let mut buf = [0u8; 1];
        let read = server_side.read(&mut buf).await.unwrap();
        assert_eq!(read, 0);
        let _ = server_side.shutdown().await;
        let _ = std::fs::remove_file(&cmd_path);
    }
}
