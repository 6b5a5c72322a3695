use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ClientError {
    #[error("unexpected ice server: {0}")]
    IceServer(String),
    #[error("engine has no local description")]
    NoLocalDescription,
}
