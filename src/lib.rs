pub mod batch;
pub mod connector;
pub mod error;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

pub use connector::{Connector, ConnectorBuilder};
pub use error::{ConfigError, FatalHttpError};
pub use request::RequestSpec;
pub use response::Response;
pub use retry::{Outcome, RetryPolicy};
