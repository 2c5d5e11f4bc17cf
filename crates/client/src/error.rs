use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("chat endpoint '{endpoint}' is not a valid URL on `{stage}`: {details}"))]
    InvalidEndpoint {
        stage: &'static str,
        endpoint: String,
        details: String,
    },
    #[snafu(display("chat endpoint '{endpoint}' uses unsupported scheme '{scheme}'"))]
    UnsupportedScheme {
        stage: &'static str,
        endpoint: String,
        scheme: String,
    },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;
