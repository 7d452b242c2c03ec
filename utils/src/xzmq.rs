pub use zmq::{Context as ZmqContext, Error as ZmqError, Socket as ZmqSocket, SocketType};

#[derive(Clone)]
pub struct SocketContext {
    context: ZmqContext,
}

impl SocketContext {
    pub fn new() -> Self {
        Self {
            context: ZmqContext::new(),
        }
    }

    fn create_connecting_socket(&self, address: &str, socket_type: SocketType) -> Result<ZmqSocket, zmq::Error> {
        let socket = self.context.socket(socket_type)?;
        socket.connect(address)?;
        Ok(socket)
    }

    /// Connects a SUB socket filtered on `topic`. A positive `receive_timeout_ms` makes `recv`
    /// return `EAGAIN` so callers can poll a shutdown signal between reads.
    pub fn create_subscriber(&self, address: &str, topic: &[u8], receive_timeout_ms: i32) -> Result<ZmqSocket, zmq::Error> {
        let socket = self.create_connecting_socket(address, zmq::SUB)?;
        socket.set_subscribe(topic)?;
        if receive_timeout_ms > 0 {
            socket.set_rcvtimeo(receive_timeout_ms)?;
        }
        Ok(socket)
    }

    /// Binds a PUB socket, mostly useful to feed subscribers in tests.
    pub fn create_publisher(&self, address: &str) -> Result<ZmqSocket, zmq::Error> {
        let socket = self.context.socket(zmq::PUB)?;
        socket.bind(address)?;
        Ok(socket)
    }
}

impl Default for SocketContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_times_out_without_messages() {
        let context = SocketContext::new();
        let _publisher = context.create_publisher("inproc://xzmq-timeout").unwrap();
        let subscriber = context.create_subscriber("inproc://xzmq-timeout", b"rawtx", 10).unwrap();

        assert!(matches!(subscriber.recv_multipart(0), Err(zmq::Error::EAGAIN)));
    }
}
