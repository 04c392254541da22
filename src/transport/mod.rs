mod http_transport;

pub use http_transport::{should_stream, HttpTransport, ResponseBody, TransportResponse};
