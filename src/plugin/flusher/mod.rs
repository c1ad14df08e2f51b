mod checker;
mod http;
mod stdout;

pub use checker::{CheckerFlusher, CheckerHandle};
pub use http::{FlushProtocol, HttpFlusher};
pub use stdout::StdoutFlusher;
