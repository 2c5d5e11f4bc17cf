use std::sync::Arc;

use formchat::ChatTransport;

mod config;
mod error;
mod http;

pub use config::{ClientConfig, DEFAULT_CHAT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT, STATUS_SEGMENT};
pub use error::{ClientError, ClientResult};
pub use http::HttpTransport;

pub fn create_transport(config: &ClientConfig) -> ClientResult<Arc<dyn ChatTransport>> {
    Ok(Arc::new(HttpTransport::new(config)?))
}
