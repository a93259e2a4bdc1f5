use std::sync::Arc;

use crate::protocol::WebRequest;
use crate::transport::Transport;

/// Receives the transport callbacks of a connection after a response handed
/// it over, e.g. to a server-sent events client.
pub trait ConnectionHook: Send {
    /// Bytes sent by the peer; most streams ignore them.
    fn on_data(&mut self, _data: &[u8]) {}

    fn on_ack(&mut self, len: usize);

    fn on_poll(&mut self);

    fn on_timeout(&mut self);

    fn on_disconnect(&mut self);
}

/// Builds the hook once the response head is acknowledged.
pub type Takeover = Box<dyn FnOnce(&WebRequest, Arc<dyn Transport>) -> Box<dyn ConnectionHook> + Send>;
